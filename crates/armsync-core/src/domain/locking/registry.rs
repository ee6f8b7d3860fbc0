//! Named lock registry
//!
//! The registry hands out reentrant, timeout-bounded mutual exclusion keyed
//! by a logical lock id. Locks are created lazily on first reference and live
//! as long as the registry. Every request is checked against the
//! [`DeadlockDetector`] before the calling thread is allowed to block.

use super::detector::DeadlockDetector;
use super::guard::LockGuard;
use super::types::{LockConfig, LockError, LockInfo, LockResult, LockStatus, thread_label};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, Thread, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct HoldState {
    owner: Option<ThreadId>,
    owner_name: Option<String>,
    depth: usize,
}

/// A reentrant mutex whose ownership is not tied to a guard's lifetime
#[derive(Debug, Default)]
struct NamedLock {
    state: Mutex<HoldState>,
    available: Condvar,
}

impl NamedLock {
    fn try_acquire_for(&self, current: &Thread, timeout: Duration) -> bool {
        let me = current.id();
        // Overflowing deadlines mean "wait forever"
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();

        if state.owner == Some(me) {
            state.depth += 1;
            return true;
        }

        while state.owner.is_some() {
            match deadline {
                Some(deadline) => {
                    if self.available.wait_until(&mut state, deadline).timed_out()
                        && state.owner.is_some()
                    {
                        return false;
                    }
                }
                None => self.available.wait(&mut state),
            }
        }

        state.owner = Some(me);
        state.owner_name = Some(thread_label(current));
        state.depth = 1;
        true
    }

    /// Returns the remaining depth, or `None` when `me` is not the holder
    fn release(&self, me: ThreadId) -> Option<usize> {
        let mut state = self.state.lock();
        if state.owner != Some(me) {
            return None;
        }

        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            state.owner_name = None;
            drop(state);
            self.available.notify_one();
            return Some(0);
        }
        Some(state.depth)
    }

    fn snapshot(&self, lock_id: &str) -> LockInfo {
        let state = self.state.lock();
        LockInfo {
            lock_id: lock_id.to_string(),
            holder: state.owner_name.clone(),
            depth: state.depth,
        }
    }

    fn owner(&self) -> Option<ThreadId> {
        self.state.lock().owner
    }
}

/// Registry of named, reentrant, deadlock-aware locks
#[derive(Debug, Default)]
pub struct LockRegistry {
    /// Configuration
    config: LockConfig,

    /// lock_id -> lock; guarded separately from the locks themselves
    locks: Mutex<HashMap<String, Arc<NamedLock>>>,

    /// Wait-for graph consulted before blocking
    detector: DeadlockDetector,
}

impl LockRegistry {
    /// Create a new registry with the given configuration
    pub fn new(config: LockConfig) -> Self {
        Self {
            config,
            locks: Mutex::new(HashMap::new()),
            detector: DeadlockDetector::new(),
        }
    }

    /// Create a registry with default configuration
    pub fn with_defaults() -> Self {
        Self::new(LockConfig::default())
    }

    /// Get the configuration
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Get the deadlock detector backing this registry
    pub fn detector(&self) -> &DeadlockDetector {
        &self.detector
    }

    /// Acquire a named lock, blocking for at most `timeout`
    ///
    /// Returns `Ok(false)` on an ordinary timeout. Fails with
    /// [`LockError::DeadlockAvoided`] without blocking when waiting would
    /// close a cycle in the wait-for graph.
    pub fn acquire(&self, lock_id: &str, timeout: Duration) -> LockResult<bool> {
        let current = thread::current();
        let me = current.id();

        if !self.detector.register_request(me, lock_id) {
            let holder = self
                .lock_info(lock_id)
                .and_then(|info| info.holder)
                .unwrap_or_else(|| "unknown".to_string());
            let thread = thread_label(&current);
            warn!(
                lock_id = %lock_id,
                thread = %thread,
                holder = %holder,
                "Lock request rejected to avoid deadlock"
            );
            return Err(LockError::DeadlockAvoided {
                lock_id: lock_id.to_string(),
                thread,
                holder,
            });
        }

        let lock = self.lock_for(lock_id);
        let start = Instant::now();

        if lock.try_acquire_for(&current, timeout) {
            self.detector.register_acquired(me, lock_id);
            debug!(
                lock_id = %lock_id,
                elapsed_ms = start.elapsed().as_millis(),
                "Lock acquired"
            );
            Ok(true)
        } else {
            // Undo the pending wait edge
            self.detector.register_released(me, lock_id);
            debug!(
                lock_id = %lock_id,
                timeout_ms = timeout.as_millis(),
                "Lock acquisition timed out"
            );
            Ok(false)
        }
    }

    /// Release a lock held by the calling thread
    ///
    /// Returns false (and logs) when the caller does not hold the lock.
    pub fn release(&self, lock_id: &str) -> bool {
        match self.release_checked(lock_id) {
            Ok(()) => true,
            Err(e) => {
                warn!(lock_id = %lock_id, error = %e, "Release of a lock not held by caller");
                false
            }
        }
    }

    /// Release a lock, reporting [`LockError::NotHeld`] on caller error
    pub fn release_checked(&self, lock_id: &str) -> LockResult<()> {
        let current = thread::current();
        let me = current.id();
        let not_held = || LockError::NotHeld {
            lock_id: lock_id.to_string(),
            thread: thread_label(&current),
        };

        let lock = self.locks.lock().get(lock_id).cloned().ok_or_else(not_held)?;

        match lock.release(me) {
            None => Err(not_held()),
            Some(0) => {
                self.detector.register_released(me, lock_id);
                debug!(lock_id = %lock_id, "Lock released");
                Ok(())
            }
            Some(depth) => {
                debug!(lock_id = %lock_id, depth = depth, "Reentrant lock level released");
                Ok(())
            }
        }
    }

    /// Acquire a lock and return a guard that releases it on every exit path
    ///
    /// A timeout becomes [`LockError::Timeout`]; `None` uses the configured
    /// default timeout.
    pub fn lock(&self, lock_id: &str, timeout: Option<Duration>) -> LockResult<LockGuard<'_>> {
        let timeout = timeout.unwrap_or(self.config.default_timeout);
        if self.acquire(lock_id, timeout)? {
            Ok(LockGuard::new(self, lock_id.to_string()))
        } else {
            Err(LockError::Timeout {
                lock_id: lock_id.to_string(),
                timeout,
            })
        }
    }

    /// Run `f` while holding `lock_id`
    pub fn with_lock<R>(
        &self,
        lock_id: &str,
        timeout: Option<Duration>,
        f: impl FnOnce() -> R,
    ) -> LockResult<R> {
        let _guard = self.lock(lock_id, timeout)?;
        Ok(f())
    }

    /// Check the status of a lock from the caller's point of view
    pub fn status(&self, lock_id: &str) -> LockStatus {
        let lock = self.locks.lock().get(lock_id).cloned();
        match lock.and_then(|lock| lock.owner()) {
            None => LockStatus::Available,
            Some(owner) if owner == thread::current().id() => LockStatus::HeldBySelf,
            Some(_) => LockStatus::HeldByOther,
        }
    }

    /// Get information about a lock, if it has ever been referenced
    pub fn lock_info(&self, lock_id: &str) -> Option<LockInfo> {
        let lock = self.locks.lock().get(lock_id).cloned();
        lock.map(|lock| lock.snapshot(lock_id))
    }

    /// List every lock the registry knows about, sorted by id
    pub fn list_locks(&self) -> Vec<LockInfo> {
        let locks: Vec<(String, Arc<NamedLock>)> = self
            .locks
            .lock()
            .iter()
            .map(|(id, lock)| (id.clone(), lock.clone()))
            .collect();

        let mut infos: Vec<LockInfo> = locks
            .iter()
            .map(|(id, lock)| lock.snapshot(id))
            .collect();
        infos.sort_by(|a, b| a.lock_id.cmp(&b.lock_id));
        infos
    }

    /// Create a lock ahead of its first use
    pub fn ensure_lock(&self, lock_id: &str) {
        self.lock_for(lock_id);
    }

    /// Number of locks created so far
    pub fn lock_count(&self) -> usize {
        self.locks.lock().len()
    }

    fn lock_for(&self, lock_id: &str) -> Arc<NamedLock> {
        self.locks
            .lock()
            .entry(lock_id.to_string())
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn test_acquire_and_release() {
        let registry = LockRegistry::with_defaults();

        assert_eq!(registry.acquire("arm", SHORT), Ok(true));
        assert_eq!(registry.status("arm"), LockStatus::HeldBySelf);
        assert!(registry.release("arm"));
        assert_eq!(registry.status("arm"), LockStatus::Available);
    }

    #[test]
    fn test_lock_created_lazily() {
        let registry = LockRegistry::with_defaults();
        assert_eq!(registry.lock_count(), 0);
        assert!(registry.lock_info("arm").is_none());

        registry.acquire("arm", SHORT).unwrap();
        assert_eq!(registry.lock_count(), 1);
        registry.release("arm");

        // Still known after release
        assert_eq!(registry.lock_count(), 1);
    }

    #[test]
    fn test_reentrant_acquire() {
        let registry = LockRegistry::with_defaults();

        assert_eq!(registry.acquire("arm", SHORT), Ok(true));
        assert_eq!(registry.acquire("arm", SHORT), Ok(true));
        assert_eq!(registry.lock_info("arm").unwrap().depth, 2);

        assert!(registry.release("arm"));
        assert_eq!(registry.status("arm"), LockStatus::HeldBySelf);
        assert!(registry.release("arm"));
        assert_eq!(registry.status("arm"), LockStatus::Available);
        assert!(registry.detector().held_by(thread::current().id()).is_empty());
    }

    #[test]
    fn test_release_not_held() {
        let registry = LockRegistry::with_defaults();

        assert!(!registry.release("never-used"));
        assert!(matches!(
            registry.release_checked("never-used"),
            Err(LockError::NotHeld { .. })
        ));
    }

    #[test]
    fn test_release_by_other_thread_is_rejected() {
        let registry = Arc::new(LockRegistry::with_defaults());
        registry.acquire("arm", SHORT).unwrap();

        let other = registry.clone();
        let released = thread::spawn(move || other.release("arm")).join().unwrap();

        assert!(!released);
        assert_eq!(registry.status("arm"), LockStatus::HeldBySelf);
        registry.release("arm");
    }

    #[test]
    fn test_timeout_when_held_elsewhere() {
        let registry = Arc::new(LockRegistry::with_defaults());
        let (held_tx, held_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let holder = registry.clone();
        let handle = thread::spawn(move || {
            holder.acquire("arm", SHORT).unwrap();
            held_tx.send(()).unwrap();
            done_rx.recv().unwrap();
            holder.release("arm");
        });

        held_rx.recv().unwrap();
        let start = Instant::now();
        assert_eq!(registry.acquire("arm", SHORT), Ok(false));
        assert!(start.elapsed() >= SHORT);
        assert_eq!(registry.status("arm"), LockStatus::HeldByOther);

        // No stale wait edge after the timeout
        assert_eq!(registry.detector().wait_edge_count(), 0);

        done_tx.send(()).unwrap();
        handle.join().unwrap();
        assert_eq!(registry.acquire("arm", SHORT), Ok(true));
        registry.release("arm");
    }

    #[test]
    fn test_scoped_lock_releases_on_drop() {
        let registry = LockRegistry::with_defaults();
        {
            let guard = registry.lock("arm", Some(SHORT)).expect("Failed to lock");
            assert_eq!(guard.lock_id(), "arm");
            assert_eq!(registry.status("arm"), LockStatus::HeldBySelf);
        }
        assert_eq!(registry.status("arm"), LockStatus::Available);
    }

    #[test]
    fn test_with_lock_returns_value() {
        let registry = LockRegistry::with_defaults();
        let value = registry.with_lock("arm", None, || 42).unwrap();
        assert_eq!(value, 42);
        assert_eq!(registry.status("arm"), LockStatus::Available);
    }

    #[test]
    fn test_scoped_lock_timeout_error() {
        let registry = Arc::new(LockRegistry::with_defaults());
        let (held_tx, held_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let holder = registry.clone();
        let handle = thread::spawn(move || {
            let _guard = holder.lock("arm", None).unwrap();
            held_tx.send(()).unwrap();
            done_rx.recv().unwrap();
        });

        held_rx.recv().unwrap();
        let err = registry.lock("arm", Some(SHORT)).unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
        assert!(err.is_retryable());

        done_tx.send(()).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_list_locks_sorted() {
        let registry = LockRegistry::with_defaults();
        registry.acquire("b", SHORT).unwrap();
        registry.acquire("a", SHORT).unwrap();

        let locks = registry.list_locks();
        assert_eq!(locks.len(), 2);
        assert_eq!(locks[0].lock_id, "a");
        assert!(locks[0].is_held());
        assert_eq!(locks[1].lock_id, "b");

        registry.release("a");
        registry.release("b");
        assert!(registry.list_locks().iter().all(|info| !info.is_held()));
    }
}
