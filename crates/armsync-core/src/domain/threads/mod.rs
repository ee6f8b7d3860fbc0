//! Runtime ownership and named long-lived threads
//!
//! [`ThreadManager`] owns one [`LockRegistry`](crate::domain::locking::LockRegistry)
//! and one [`TaskCoordinator`](crate::domain::tasks::TaskCoordinator), and
//! tracks named threads that run until asked to stop through a [`StopToken`].

pub mod manager;
pub mod types;

pub use manager::ThreadManager;
pub use types::{StopToken, ThreadError, ThreadManagerConfig, ThreadResult};
