//! Lock types and error definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for lock operations
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Lock errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Granting the request would close a cycle in the wait-for graph
    #[error("Deadlock avoided: thread '{thread}' requesting lock '{lock_id}' held by '{holder}'")]
    DeadlockAvoided {
        lock_id: String,
        thread: String,
        holder: String,
    },

    /// Lock acquisition timed out
    #[error("Lock timeout: lock '{lock_id}' was not acquired within {timeout:?}")]
    Timeout { lock_id: String, timeout: Duration },

    /// Release attempted by a thread that does not hold the lock
    #[error("Lock not held: lock '{lock_id}' is not held by thread '{thread}'")]
    NotHeld { lock_id: String, thread: String },
}

impl LockError {
    /// Get error code for this lock error
    pub fn code(&self) -> &'static str {
        match self {
            Self::DeadlockAvoided { .. } => "E300",
            Self::Timeout { .. } => "E301",
            Self::NotHeld { .. } => "E302",
        }
    }

    /// Whether the caller may simply try again later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Lock status as seen from the calling thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    /// Lock is free (or has never been used)
    Available,
    /// Lock is held by the calling thread
    HeldBySelf,
    /// Lock is held by another thread
    HeldByOther,
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::HeldBySelf => write!(f, "held_by_self"),
            Self::HeldByOther => write!(f, "held_by_other"),
        }
    }
}

/// Snapshot of a named lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Logical lock identifier
    pub lock_id: String,

    /// Name of the holding thread, if any
    pub holder: Option<String>,

    /// Reentrancy depth of the current holder (0 when free)
    pub depth: usize,
}

impl LockInfo {
    /// Whether somebody holds the lock right now
    pub fn is_held(&self) -> bool {
        self.depth > 0
    }
}

/// Configuration for the lock registry
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Timeout used by the scoped helpers when none is given
    pub default_timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(5),
        }
    }
}

impl LockConfig {
    /// Set the default timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

/// Human readable label for a thread, used in logs and errors
pub(crate) fn thread_label(thread: &std::thread::Thread) -> String {
    match thread.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", thread.id()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_error_codes() {
        let deadlock = LockError::DeadlockAvoided {
            lock_id: "arm".to_string(),
            thread: "t1".to_string(),
            holder: "t2".to_string(),
        };
        assert_eq!(deadlock.code(), "E300");
        assert!(!deadlock.is_retryable());

        let timeout = LockError::Timeout {
            lock_id: "arm".to_string(),
            timeout: Duration::from_millis(10),
        };
        assert_eq!(timeout.code(), "E301");
        assert!(timeout.is_retryable());
    }

    #[test]
    fn test_lock_error_display() {
        let err = LockError::NotHeld {
            lock_id: "gripper".to_string(),
            thread: "main".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("gripper"));
        assert!(msg.contains("main"));
    }

    #[test]
    fn test_lock_status_display() {
        assert_eq!(LockStatus::Available.to_string(), "available");
        assert_eq!(LockStatus::HeldBySelf.to_string(), "held_by_self");
        assert_eq!(LockStatus::HeldByOther.to_string(), "held_by_other");
    }

    #[test]
    fn test_lock_config_builder() {
        let config = LockConfig::default().with_timeout(Duration::from_millis(250));
        assert_eq!(config.default_timeout, Duration::from_millis(250));
    }
}
