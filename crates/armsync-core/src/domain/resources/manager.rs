//! Resource manager for arbitrating access to shared device handles
//!
//! The resource manager provides a central point for acquiring and releasing
//! named external resources. It handles:
//! - Registration with a concurrency cap and resource type
//! - READ / WRITE / EXCLUSIVE access policy
//! - Per-holder tracking, so concurrent readers release independently
//! - A bounded audit log of accesses and usage statistics
//!
//! Bookkeeping mutations for one resource are serialized through the named
//! lock `resource_<id>` in the shared [`LockRegistry`]; the resource map
//! itself is protected by a separate manager-level mutex.

use super::guard::ResourceGuard;
use super::types::{
    AccessMode, AccessRecord, ResourceConfig, ResourceError, ResourceHolder, ResourceInfo,
    ResourceResult, ResourceType, ResourceUsageStats,
};
use crate::domain::health::{HealthConfig, HealthReport, HealthStatus};
use crate::domain::locking::types::thread_label;
use crate::domain::locking::{LockError, LockGuard, LockRegistry};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Lower bound on each wait slice while a release waits for bookkeeping
const RELEASE_RETRY_SLICE: Duration = Duration::from_millis(10);

#[derive(Debug)]
struct Holder {
    thread: ThreadId,
    thread_name: String,
    mode: AccessMode,
    record_id: u64,
    since: DateTime<Utc>,
    started: Instant,
}

#[derive(Debug)]
struct ResourceEntry {
    resource_type: ResourceType,
    max_concurrent_access: usize,
    usage_count: u64,
    metadata: Map<String, Value>,
    registered_at: DateTime<Utc>,
    holders: Vec<Holder>,
    owner_thread: Option<String>,
    records: VecDeque<AccessRecord>,
    next_record_id: u64,
    total_access_time: Duration,
    completed_accesses: u64,
}

impl ResourceEntry {
    fn snapshot(&self, resource_id: &str) -> ResourceInfo {
        ResourceInfo {
            resource_id: resource_id.to_string(),
            resource_type: self.resource_type,
            max_concurrent_access: self.max_concurrent_access,
            current_access_count: self.holders.len(),
            owner_thread: self.owner_thread.clone(),
            holders: self
                .holders
                .iter()
                .map(|h| ResourceHolder {
                    thread: h.thread_name.clone(),
                    mode: h.mode,
                    since: h.since,
                })
                .collect(),
            usage_count: self.usage_count,
            metadata: self.metadata.clone(),
            registered_at: self.registered_at,
        }
    }

    /// Append an open record, evicting the oldest closed one when full
    fn push_record(&mut self, record: AccessRecord, capacity: usize) {
        if self.records.len() >= capacity {
            if let Some(pos) = self.records.iter().position(|r| !r.is_open()) {
                self.records.remove(pos);
            }
        }
        self.records.push_back(record);
    }
}

/// Registry of named resources with access-mode arbitration
#[derive(Debug)]
pub struct ResourceManager {
    /// Configuration
    config: ResourceConfig,

    /// Shared lock registry used for per-resource bookkeeping locks
    locks: Arc<LockRegistry>,

    /// resource_id -> entry
    resources: Mutex<HashMap<String, ResourceEntry>>,
}

impl ResourceManager {
    /// Create a new resource manager on top of a lock registry
    pub fn new(locks: Arc<LockRegistry>, config: ResourceConfig) -> Self {
        Self {
            config,
            locks,
            resources: Mutex::new(HashMap::new()),
        }
    }

    /// Create a resource manager with default configuration
    pub fn with_defaults(locks: Arc<LockRegistry>) -> Self {
        Self::new(locks, ResourceConfig::default())
    }

    /// Get the configuration
    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    /// Get the lock registry used for bookkeeping
    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    /// Name of the bookkeeping lock for a resource
    pub fn lock_id(resource_id: &str) -> String {
        format!("resource_{}", resource_id)
    }

    /// Register a resource
    ///
    /// Returns false (and logs) when the id is already registered. A cap of
    /// zero is raised to one.
    pub fn register(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
        max_concurrent_access: usize,
        metadata: Option<Map<String, Value>>,
    ) -> bool {
        match self.try_register(resource_id, resource_type, max_concurrent_access, metadata) {
            Ok(()) => true,
            Err(e) => {
                warn!(resource_id = %resource_id, error = %e, "Resource not registered");
                false
            }
        }
    }

    /// Register, reporting why it was refused
    pub fn try_register(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
        max_concurrent_access: usize,
        metadata: Option<Map<String, Value>>,
    ) -> ResourceResult<()> {
        let mut resources = self.resources.lock();
        if resources.contains_key(resource_id) {
            return Err(ResourceError::AlreadyRegistered(resource_id.to_string()));
        }

        self.locks.ensure_lock(&Self::lock_id(resource_id));
        resources.insert(
            resource_id.to_string(),
            ResourceEntry {
                resource_type,
                max_concurrent_access: max_concurrent_access.max(1),
                usage_count: 0,
                metadata: metadata.unwrap_or_default(),
                registered_at: Utc::now(),
                holders: Vec::new(),
                owner_thread: None,
                records: VecDeque::new(),
                next_record_id: 0,
                total_access_time: Duration::ZERO,
                completed_accesses: 0,
            },
        );

        info!(
            resource_id = %resource_id,
            resource_type = %resource_type,
            max_concurrent_access = max_concurrent_access.max(1),
            "Resource registered"
        );
        Ok(())
    }

    /// Unregister an idle resource, dropping its access records
    pub fn unregister(&self, resource_id: &str) -> bool {
        match self.try_unregister(resource_id) {
            Ok(()) => true,
            Err(e) => {
                warn!(resource_id = %resource_id, error = %e, "Resource not unregistered");
                false
            }
        }
    }

    /// Unregister, reporting why it was refused
    pub fn try_unregister(&self, resource_id: &str) -> ResourceResult<()> {
        let mut resources = self.resources.lock();
        let entry = resources
            .get(resource_id)
            .ok_or_else(|| ResourceError::NotRegistered(resource_id.to_string()))?;

        if !entry.holders.is_empty() {
            return Err(ResourceError::StillInUse {
                resource_id: resource_id.to_string(),
                holders: entry.holders.len(),
            });
        }

        resources.remove(resource_id);
        info!(resource_id = %resource_id, "Resource unregistered");
        Ok(())
    }

    /// Acquire access to a resource
    ///
    /// Returns `Ok(false)` for every ordinary outcome: unknown id, policy
    /// conflict, or a bookkeeping lock timeout. Only a deadlock rejection
    /// from the lock registry is escalated as an error.
    pub fn acquire(
        &self,
        resource_id: &str,
        mode: AccessMode,
        timeout: Duration,
    ) -> ResourceResult<bool> {
        match self.try_acquire(resource_id, mode, timeout) {
            Ok(_) => Ok(true),
            Err(e @ ResourceError::Lock(LockError::DeadlockAvoided { .. })) => Err(e),
            Err(_) => Ok(false),
        }
    }

    /// Acquire access, reporting why it was refused
    ///
    /// Returns a snapshot of the resource taken right after the grant.
    pub fn try_acquire(
        &self,
        resource_id: &str,
        mode: AccessMode,
        timeout: Duration,
    ) -> ResourceResult<ResourceInfo> {
        if !self.resources.lock().contains_key(resource_id) {
            error!(resource_id = %resource_id, "Resource not registered");
            return Err(ResourceError::NotRegistered(resource_id.to_string()));
        }

        let _bookkeeping = self.bookkeeping_lock(resource_id, mode, timeout)?;

        let current = thread::current();
        let thread_name = thread_label(&current);
        let mut resources = self.resources.lock();
        let entry = resources
            .get_mut(resource_id)
            .ok_or_else(|| ResourceError::NotRegistered(resource_id.to_string()))?;

        if !mode.admits(entry.holders.len(), entry.max_concurrent_access) {
            debug!(
                resource_id = %resource_id,
                mode = %mode,
                current_access_count = entry.holders.len(),
                "Resource busy"
            );
            return Err(ResourceError::Busy {
                resource_id: resource_id.to_string(),
                mode,
            });
        }

        let now = Utc::now();
        let record_id = entry.next_record_id;
        entry.next_record_id += 1;
        entry.usage_count += 1;
        entry.owner_thread = Some(thread_name.clone());
        entry.holders.push(Holder {
            thread: current.id(),
            thread_name: thread_name.clone(),
            mode,
            record_id,
            since: now,
            started: Instant::now(),
        });
        entry.push_record(
            AccessRecord {
                id: record_id,
                thread: thread_name.clone(),
                mode,
                timeout,
                acquired_at: now,
                released_at: None,
                duration: None,
            },
            self.config.access_record_capacity,
        );

        debug!(
            resource_id = %resource_id,
            thread = %thread_name,
            mode = %mode,
            "Resource acquired"
        );
        Ok(entry.snapshot(resource_id))
    }

    /// Release the calling thread's most recent hold on a resource
    ///
    /// Returns false (and logs) when the resource is unknown or not held by
    /// the calling thread.
    pub fn release(&self, resource_id: &str) -> bool {
        match self.release_checked(resource_id) {
            Ok(()) => true,
            Err(e @ ResourceError::NotRegistered(_)) => {
                error!(resource_id = %resource_id, error = %e, "Release of unknown resource");
                false
            }
            Err(e) => {
                warn!(resource_id = %resource_id, error = %e, "Resource release refused");
                false
            }
        }
    }

    /// Release, reporting why it was refused
    ///
    /// Only an unknown id or a caller that holds nothing is refused; a busy
    /// bookkeeping lock delays the release but never fails it.
    pub fn release_checked(&self, resource_id: &str) -> ResourceResult<()> {
        if !self.resources.lock().contains_key(resource_id) {
            return Err(ResourceError::NotRegistered(resource_id.to_string()));
        }

        let current = thread::current();
        let _bookkeeping = self.release_bookkeeping_lock(resource_id);

        let mut resources = self.resources.lock();
        let entry = resources
            .get_mut(resource_id)
            .ok_or_else(|| ResourceError::NotRegistered(resource_id.to_string()))?;

        let me = current.id();
        let index = entry
            .holders
            .iter()
            .rposition(|h| h.thread == me)
            .ok_or_else(|| ResourceError::OwnershipMismatch {
                resource_id: resource_id.to_string(),
                thread: thread_label(&current),
            })?;

        let holder = entry.holders.remove(index);
        let duration = holder.started.elapsed();
        entry.total_access_time += duration;
        entry.completed_accesses += 1;
        entry.owner_thread = entry.holders.last().map(|h| h.thread_name.clone());

        match entry
            .records
            .iter_mut()
            .rev()
            .find(|r| r.id == holder.record_id)
        {
            Some(record) => {
                record.released_at = Some(Utc::now());
                record.duration = Some(duration);
            }
            None => debug!(resource_id = %resource_id, "Access record already evicted"),
        }

        debug!(
            resource_id = %resource_id,
            thread = %holder.thread_name,
            held_ms = duration.as_millis(),
            "Resource released"
        );
        Ok(())
    }

    /// Acquire a resource and return a guard that releases it on every exit path
    ///
    /// `None` uses the configured default timeout.
    pub fn managed(
        &self,
        resource_id: &str,
        mode: AccessMode,
        timeout: Option<Duration>,
    ) -> ResourceResult<ResourceGuard<'_>> {
        let timeout = timeout.unwrap_or(self.config.default_timeout);
        let info = self.try_acquire(resource_id, mode, timeout)?;
        Ok(ResourceGuard::new(self, mode, info))
    }

    /// Get a snapshot of a resource
    pub fn info(&self, resource_id: &str) -> Option<ResourceInfo> {
        self.resources
            .lock()
            .get(resource_id)
            .map(|entry| entry.snapshot(resource_id))
    }

    /// List all registered resources, sorted by id
    pub fn list(&self) -> Vec<ResourceInfo> {
        let mut infos: Vec<ResourceInfo> = self
            .resources
            .lock()
            .iter()
            .map(|(id, entry)| entry.snapshot(id))
            .collect();
        infos.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        infos
    }

    /// Whether a resource is registered and currently idle
    pub fn is_available(&self, resource_id: &str) -> bool {
        self.resources
            .lock()
            .get(resource_id)
            .map(|entry| entry.holders.is_empty())
            .unwrap_or(false)
    }

    /// The most recent `limit` access records, oldest first
    pub fn access_records(&self, resource_id: &str, limit: usize) -> Vec<AccessRecord> {
        let resources = self.resources.lock();
        match resources.get(resource_id) {
            Some(entry) => {
                let skip = entry.records.len().saturating_sub(limit);
                entry.records.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Drop closed access records, returning how many were removed
    ///
    /// Open records are kept so their release can still close them.
    pub fn clear_access_records(&self, resource_id: &str) -> usize {
        let mut resources = self.resources.lock();
        match resources.get_mut(resource_id) {
            Some(entry) => {
                let before = entry.records.len();
                entry.records.retain(AccessRecord::is_open);
                before - entry.records.len()
            }
            None => 0,
        }
    }

    /// Aggregate access statistics for a resource
    pub fn usage_stats(&self, resource_id: &str) -> Option<ResourceUsageStats> {
        let resources = self.resources.lock();
        let entry = resources.get(resource_id)?;

        let average_access_time = if entry.completed_accesses > 0 {
            entry
                .total_access_time
                .div_f64(entry.completed_accesses as f64)
        } else {
            Duration::ZERO
        };

        Some(ResourceUsageStats {
            resource_id: resource_id.to_string(),
            current_access_count: entry.holders.len(),
            holders: entry.holders.iter().map(|h| h.thread_name.clone()).collect(),
            usage_count: entry.usage_count,
            average_access_time,
            total_access_time: entry.total_access_time,
            access_records_count: entry.records.len(),
        })
    }

    /// Number of registered resources
    pub fn resource_count(&self) -> usize {
        self.resources.lock().len()
    }

    /// Utilization health check
    pub fn health(&self, config: &HealthConfig) -> HealthReport {
        let (total, occupied) = {
            let resources = self.resources.lock();
            let occupied = resources
                .values()
                .filter(|entry| !entry.holders.is_empty())
                .count();
            (resources.len(), occupied)
        };

        let utilization = if total > 0 {
            occupied as f64 / total as f64
        } else {
            0.0
        };

        let (status, message) = if total > 0 && occupied == total {
            (HealthStatus::Error, "All resources are occupied")
        } else if utilization > config.warning_utilization {
            (HealthStatus::Warning, "Resource utilization is high")
        } else {
            (HealthStatus::Healthy, "Resource management is healthy")
        };

        let mut metrics = Map::new();
        metrics.insert("total_resources".into(), Value::from(total));
        metrics.insert("occupied_resources".into(), Value::from(occupied));
        metrics.insert("utilization_rate".into(), Value::from(utilization));

        HealthReport::new("resource_manager", status, message, metrics)
    }

    // ========== Internal Methods ==========

    fn bookkeeping_lock(
        &self,
        resource_id: &str,
        mode: AccessMode,
        timeout: Duration,
    ) -> ResourceResult<LockGuard<'_>> {
        match self.locks.lock(&Self::lock_id(resource_id), Some(timeout)) {
            Ok(guard) => Ok(guard),
            Err(LockError::Timeout { .. }) => {
                debug!(resource_id = %resource_id, mode = %mode, "Bookkeeping lock busy");
                Err(ResourceError::Busy {
                    resource_id: resource_id.to_string(),
                    mode,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Bookkeeping lock for a release, waited for without a deadline
    ///
    /// A deadlock rejection yields `None`; the entry update then relies on
    /// the resource map mutex alone.
    fn release_bookkeeping_lock(&self, resource_id: &str) -> Option<LockGuard<'_>> {
        let lock_id = Self::lock_id(resource_id);
        let slice = self.config.default_timeout.max(RELEASE_RETRY_SLICE);
        loop {
            match self.locks.lock(&lock_id, Some(slice)) {
                Ok(guard) => return Some(guard),
                Err(LockError::Timeout { .. }) => {
                    debug!(resource_id = %resource_id, "Bookkeeping lock busy, release still waiting");
                }
                Err(e) => {
                    warn!(resource_id = %resource_id, error = %e, "Releasing without bookkeeping lock");
                    return None;
                }
            }
        }
    }
}
