//! Scoped resource access

use super::manager::ResourceManager;
use super::types::{AccessMode, ResourceInfo, ResourceResult};
use std::fmt;
use std::marker::PhantomData;

/// A guard holding access to a resource
///
/// Access is released when the guard is dropped, by the thread that
/// acquired it.
#[derive(Debug)]
pub struct ResourceGuard<'a> {
    manager: &'a ResourceManager,
    mode: AccessMode,

    /// Snapshot taken right after the grant
    info: ResourceInfo,

    released: bool,

    _not_send: PhantomData<*const ()>,
}

impl<'a> ResourceGuard<'a> {
    pub(crate) fn new(manager: &'a ResourceManager, mode: AccessMode, info: ResourceInfo) -> Self {
        Self {
            manager,
            mode,
            info,
            released: false,
            _not_send: PhantomData,
        }
    }

    /// Get the resource ID
    pub fn resource_id(&self) -> &str {
        &self.info.resource_id
    }

    /// Mode the resource is held in
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Resource snapshot at acquisition time
    pub fn info(&self) -> &ResourceInfo {
        &self.info
    }

    /// Explicitly release access (normally done automatically on drop)
    pub fn release(mut self) -> ResourceResult<()> {
        self.released = true;
        self.manager.release_checked(&self.info.resource_id)
    }
}

impl Drop for ResourceGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.manager.release(&self.info.resource_id);
        }
    }
}

impl fmt::Display for ResourceGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Resource[{}:{}]", self.info.resource_id, self.mode)
    }
}
