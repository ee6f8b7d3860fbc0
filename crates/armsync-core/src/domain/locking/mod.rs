//! Named locks with deadlock avoidance
//!
//! This module provides the in-process lock registry every device manager
//! uses to serialize access to shared handles.
//!
//! # Architecture
//!
//! - **Detector**: `DeadlockDetector` keeps a wait-for graph and refuses a
//!   request that would close a cycle, before any blocking happens
//! - **Registry**: `LockRegistry` lazily creates one reentrant, timeout-capable
//!   lock per id and consults the detector on every acquisition
//! - **Guards**: RAII-style lock guards for automatic release
//!
//! # Example
//!
//! ```ignore
//! use armsync_core::domain::locking::{LockConfig, LockRegistry};
//!
//! let registry = LockRegistry::new(LockConfig::default());
//!
//! let guard = registry.lock("robot_192.168.1.10", Some(Duration::from_secs(2)))?;
//!
//! // Talk to the robot...
//!
//! // Lock is automatically released when guard is dropped
//! ```

pub mod detector;
pub mod guard;
pub mod registry;
pub mod types;

// Re-export main types
pub use detector::DeadlockDetector;
pub use guard::LockGuard;
pub use registry::LockRegistry;
pub use types::{LockConfig, LockError, LockInfo, LockResult, LockStatus};
