//! Armsync Core Library
//!
//! Concurrency coordination for robot-cell control software:
//! - Named, reentrant, timed locks with wait-for-graph deadlock avoidance
//! - Priority worker pool with per-task results and completion callbacks
//! - Resource arbitration (READ / WRITE / EXCLUSIVE) with an access audit log
//! - A thread manager owning the above plus named long-lived threads
//! - Health reports and TOML configuration

pub mod config;
pub mod domain;
pub mod error;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::health::{HealthConfig, HealthReport, HealthStatus};
    pub use crate::domain::locking::{LockError, LockGuard, LockRegistry, LockStatus};
    pub use crate::domain::resources::{
        AccessMode, ResourceError, ResourceGuard, ResourceManager, ResourceType,
    };
    pub use crate::domain::tasks::{
        PoolConfig, Task, TaskCoordinator, TaskError, TaskId, TaskPriority, TaskResult,
    };
    pub use crate::domain::threads::{StopToken, ThreadError, ThreadManager};
    pub use crate::error::{Error, Result};
}
