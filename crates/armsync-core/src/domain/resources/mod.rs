//! Shared resource arbitration
//!
//! Resources are named external handles (robot connection, gripper, camera,
//! work-coordinate store) registered with a concurrency cap. Threads acquire
//! them in one of three modes:
//!
//! - **READ**: shared, up to `max_concurrent_access` holders
//! - **WRITE** and **EXCLUSIVE**: only when nobody else holds the resource
//!
//! Every grant and release is recorded in a bounded per-resource audit log.
//!
//! # Example
//!
//! ```ignore
//! use armsync_core::domain::resources::{AccessMode, ResourceManager, ResourceType};
//!
//! let resources = ResourceManager::with_defaults(locks.clone());
//! resources.register("robot", ResourceType::Robot, 1, None);
//!
//! let _robot = resources.managed("robot", AccessMode::Exclusive, None)?;
//! move_to_home()?;
//! ```

pub mod guard;
pub mod manager;
pub mod types;

pub use guard::ResourceGuard;
pub use manager::ResourceManager;
pub use types::{
    AccessMode, AccessRecord, ResourceConfig, ResourceError, ResourceHolder, ResourceInfo,
    ResourceResult, ResourceType, ResourceUsageStats,
};
