//! Lock guards for RAII-style lock management
//!
//! Guards automatically release locks when dropped, ensuring proper cleanup
//! even in the presence of panics or early returns.

use super::registry::LockRegistry;
use super::types::LockResult;
use std::fmt;
use std::marker::PhantomData;

/// A guard holding one level of a named lock
///
/// The lock is released when the guard is dropped. Guards are `!Send`: a
/// named lock must be released by the thread that acquired it.
#[derive(Debug)]
pub struct LockGuard<'a> {
    /// Registry the lock belongs to
    registry: &'a LockRegistry,

    /// Held lock id
    lock_id: String,

    /// Whether the lock has been explicitly released
    released: bool,

    _not_send: PhantomData<*const ()>,
}

impl<'a> LockGuard<'a> {
    /// Create a new lock guard for an already acquired lock
    pub(crate) fn new(registry: &'a LockRegistry, lock_id: String) -> Self {
        Self {
            registry,
            lock_id,
            released: false,
            _not_send: PhantomData,
        }
    }

    /// Get the lock ID
    pub fn lock_id(&self) -> &str {
        &self.lock_id
    }

    /// Explicitly release the lock (normally done automatically on drop)
    pub fn release(mut self) -> LockResult<()> {
        self.released = true;
        self.registry.release_checked(&self.lock_id)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.registry.release(&self.lock_id);
        }
    }
}

impl fmt::Display for LockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lock[{}]", self.lock_id)
    }
}
