//! Background task execution with priority ordering
//!
//! # Architecture
//!
//! - **Tasks**: boxed closures producing a JSON value, with a priority, an
//!   optional queue timeout and an optional completion callback
//! - **Queue**: binary heap ordered by priority, FIFO within a priority
//! - **Coordinator**: `TaskCoordinator`, a fixed pool of worker threads and a
//!   bounded result store keyed by task id
//!
//! # Example
//!
//! ```ignore
//! use armsync_core::domain::tasks::{PoolConfig, Task, TaskCoordinator, TaskPriority};
//!
//! let pool = TaskCoordinator::new(PoolConfig::default())?;
//! let id = pool.submit(Task::from_fn(TaskPriority::High, || Ok(read_joint_angles()?)));
//! let angles = pool.get_result(id, Some(Duration::from_secs(2)))?;
//! pool.shutdown(Duration::from_secs(5));
//! ```

pub mod coordinator;
mod queue;
pub mod types;

pub use coordinator::TaskCoordinator;
pub use types::{
    PoolConfig, Task, TaskCallback, TaskError, TaskId, TaskOutcome, TaskPriority, TaskResult,
    WorkItem,
};
