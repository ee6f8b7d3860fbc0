//! Resource types and error definitions

use crate::domain::locking::LockError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for resource operations
pub type ResourceResult<T> = std::result::Result<T, ResourceError>;

/// Resource errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Operation on an unknown resource id
    #[error("Resource not registered: {0}")]
    NotRegistered(String),

    /// Registration of an id that already exists
    #[error("Resource already registered: {0}")]
    AlreadyRegistered(String),

    /// Access policy conflict or bookkeeping lock timeout
    #[error("Resource busy: '{resource_id}' cannot be acquired for {mode} access")]
    Busy { resource_id: String, mode: AccessMode },

    /// Release by a thread that does not hold the resource
    #[error("Resource '{resource_id}' is not held by thread '{thread}'")]
    OwnershipMismatch { resource_id: String, thread: String },

    /// Unregistration while the resource is held
    #[error("Resource '{resource_id}' is still in use by {holders} holder(s)")]
    StillInUse { resource_id: String, holders: usize },

    /// Escalated failure from the bookkeeping lock
    #[error(transparent)]
    Lock(#[from] LockError),
}

impl ResourceError {
    /// Get error code for this resource error
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotRegistered(_) => "E500",
            Self::AlreadyRegistered(_) => "E501",
            Self::Busy { .. } => "E502",
            Self::OwnershipMismatch { .. } => "E503",
            Self::StillInUse { .. } => "E504",
            Self::Lock(e) => e.code(),
        }
    }

    /// Whether the caller may simply try again later
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Busy { .. } | Self::StillInUse { .. } => true,
            Self::Lock(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Kind of external resource being arbitrated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// Robot controller connection
    Robot,
    /// Gripper / end effector
    Gripper,
    Camera,
    Sensor,
    Database,
    File,
    Network,
    Memory,
    /// Anything else (work coordinates, schedules, ...)
    Custom,
}

impl ResourceType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Robot => "robot",
            Self::Gripper => "gripper",
            Self::Camera => "camera",
            Self::Sensor => "sensor",
            Self::Database => "database",
            Self::File => "file",
            Self::Network => "network",
            Self::Memory => "memory",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Requested access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Read,
    Write,
    Exclusive,
}

impl AccessMode {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Exclusive => "exclusive",
        }
    }

    /// Whether this mode requires the resource to be otherwise idle
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Write | Self::Exclusive)
    }

    /// Access policy: may a request in this mode be granted right now?
    ///
    /// WRITE and EXCLUSIVE need an idle resource; READ needs a free slot
    /// below the concurrency cap.
    pub fn admits(&self, current_access_count: usize, max_concurrent_access: usize) -> bool {
        if self.is_exclusive() {
            current_access_count == 0
        } else {
            current_access_count < max_concurrent_access
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One audited access to a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRecord {
    /// Per-resource record number
    pub id: u64,

    /// Name of the acquiring thread
    pub thread: String,

    /// Requested mode
    pub mode: AccessMode,

    /// Timeout the caller passed to acquire
    pub timeout: Duration,

    /// When access was granted
    pub acquired_at: DateTime<Utc>,

    /// When access was released (None while open)
    pub released_at: Option<DateTime<Utc>>,

    /// How long access was held (None while open)
    pub duration: Option<Duration>,
}

impl AccessRecord {
    /// Whether the matching release has not happened yet
    pub fn is_open(&self) -> bool {
        self.released_at.is_none()
    }
}

/// A thread currently holding a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHolder {
    /// Name of the holding thread
    pub thread: String,

    /// Mode it holds the resource in
    pub mode: AccessMode,

    /// When it acquired the resource
    pub since: DateTime<Utc>,
}

/// Snapshot of a registered resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub max_concurrent_access: usize,
    pub current_access_count: usize,

    /// Last acquirer still holding the resource
    pub owner_thread: Option<String>,

    /// Every current holder
    pub holders: Vec<ResourceHolder>,

    /// Successful acquisitions since registration
    pub usage_count: u64,

    pub metadata: Map<String, Value>,
    pub registered_at: DateTime<Utc>,
}

/// Aggregated access statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsageStats {
    pub resource_id: String,
    pub current_access_count: usize,
    pub holders: Vec<String>,
    pub usage_count: u64,

    /// Mean duration of completed accesses
    pub average_access_time: Duration,

    /// Sum of all completed access durations
    pub total_access_time: Duration,

    /// Records currently retained in the audit log
    pub access_records_count: usize,
}

/// Configuration for the resource manager
#[derive(Debug, Clone)]
pub struct ResourceConfig {
    /// Timeout used by `release` for the bookkeeping lock, and by the
    /// scoped helper when none is given
    pub default_timeout: Duration,

    /// Audit records retained per resource
    pub access_record_capacity: usize,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(5),
            access_record_capacity: 1000,
        }
    }
}

impl ResourceConfig {
    /// Set the default timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the audit capacity (at least one)
    pub fn with_access_record_capacity(mut self, capacity: usize) -> Self {
        self.access_record_capacity = capacity.max(1);
        self
    }
}
