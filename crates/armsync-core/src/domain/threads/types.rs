//! Managed thread types and error definitions

use crate::domain::health::HealthConfig;
use crate::domain::locking::LockConfig;
use crate::domain::tasks::PoolConfig;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Result type for thread operations
pub type ThreadResult<T> = std::result::Result<T, ThreadError>;

/// Managed thread errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ThreadError {
    /// A running thread already uses this name
    #[error("Thread already exists: {0}")]
    AlreadyExists(String),

    /// No managed thread with this name
    #[error("Thread not found: {0}")]
    NotFound(String),

    /// The OS refused to start the thread
    #[error("Failed to spawn thread '{name}': {message}")]
    Spawn { name: String, message: String },
}

impl ThreadError {
    /// Get error code for this thread error
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyExists(_) => "E700",
            Self::NotFound(_) => "E701",
            Self::Spawn { .. } => "E702",
        }
    }
}

/// One-shot flag that threads can wait on
#[derive(Debug, Default)]
pub(crate) struct Signal {
    set: Mutex<bool>,
    changed: Condvar,
}

impl Signal {
    pub(crate) fn set(&self) {
        *self.set.lock() = true;
        self.changed.notify_all();
    }

    pub(crate) fn is_set(&self) -> bool {
        *self.set.lock()
    }

    /// Wait until set or until `timeout` elapses; returns whether it is set
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let mut set = self.set.lock();
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            while !*set {
                self.changed.wait(&mut set);
            }
            return true;
        };

        while !*set {
            if self.changed.wait_until(&mut set, deadline).timed_out() {
                break;
            }
        }
        *set
    }
}

/// Cooperative stop request handed to every managed thread
///
/// Threads are never killed. A managed thread is expected to check
/// [`StopToken::is_stopped`] or sleep with [`StopToken::wait`] between units
/// of work and return once a stop has been requested.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    signal: Arc<Signal>,
}

impl StopToken {
    /// Create an unset token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop
    pub fn stop(&self) {
        self.signal.set();
    }

    /// Whether a stop has been requested
    pub fn is_stopped(&self) -> bool {
        self.signal.is_set()
    }

    /// Sleep for up to `timeout`, waking early on a stop request
    ///
    /// Returns true when a stop has been requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.signal.wait(timeout)
    }
}

/// Configuration for the thread manager and the services it owns
#[derive(Debug, Clone, Default)]
pub struct ThreadManagerConfig {
    pub locking: LockConfig,
    pub pool: PoolConfig,
    pub health: HealthConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_thread_error_codes() {
        assert_eq!(ThreadError::AlreadyExists("io".into()).code(), "E700");
        assert_eq!(ThreadError::NotFound("io".into()).code(), "E701");
        assert!(
            ThreadError::AlreadyExists("safety-monitor".into())
                .to_string()
                .contains("safety-monitor")
        );
    }

    #[test]
    fn test_stop_token_wait_times_out() {
        let token = StopToken::new();
        let start = Instant::now();
        assert!(!token.wait(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(!token.is_stopped());
    }

    #[test]
    fn test_stop_token_wakes_waiter() {
        let token = StopToken::new();
        let waiter = {
            let token = token.clone();
            thread::spawn(move || token.wait(Duration::from_secs(10)))
        };

        thread::sleep(Duration::from_millis(10));
        token.stop();
        assert!(waiter.join().unwrap());
        assert!(token.is_stopped());
    }
}
