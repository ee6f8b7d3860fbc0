//! Task types and error definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Result type for task operations
pub type TaskOutcome = std::result::Result<Value, TaskError>;

/// Boxed unit of work run by a worker thread
pub type WorkItem = Box<dyn FnOnce() -> anyhow::Result<Value> + Send + 'static>;

/// Completion callback, invoked outside every pool lock
pub type TaskCallback = Box<dyn FnOnce(&TaskResult) + Send + 'static>;

/// Task errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The work item returned an error
    #[error("Task {task_id} failed: {message}")]
    Failed { task_id: TaskId, message: String },

    /// The work item panicked
    #[error("Task {task_id} panicked: {message}")]
    Panicked { task_id: TaskId, message: String },

    /// The task sat in the queue past its timeout and was never run
    #[error("Task {task_id} expired after waiting {waited:?} in the queue")]
    Expired { task_id: TaskId, waited: Duration },

    /// No result was recorded within the caller's timeout
    #[error("Task {task_id} did not complete within {timeout:?}")]
    ResultTimeout { task_id: TaskId, timeout: Duration },
}

impl TaskError {
    /// Get error code for this task error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Failed { .. } => "E400",
            Self::Panicked { .. } => "E401",
            Self::Expired { .. } => "E402",
            Self::ResultTimeout { .. } => "E403",
        }
    }

    /// The task this error belongs to
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::Failed { task_id, .. }
            | Self::Panicked { task_id, .. }
            | Self::Expired { task_id, .. }
            | Self::ResultTimeout { task_id, .. } => *task_id,
        }
    }
}

/// Unique task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a fresh task id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task priority (higher runs first)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl TaskPriority {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of work submitted to the [`TaskCoordinator`](super::TaskCoordinator)
pub struct Task {
    /// Task ID
    pub id: TaskId,

    /// Scheduling priority
    pub priority: TaskPriority,

    /// Maximum time the task may wait in the queue before it expires
    pub timeout: Option<Duration>,

    pub(crate) work: WorkItem,

    pub(crate) callback: Option<TaskCallback>,
}

impl Task {
    /// Create a task from a closure producing a JSON value
    pub fn new<F>(priority: TaskPriority, work: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<Value> + Send + 'static,
    {
        Self {
            id: TaskId::new(),
            priority,
            timeout: None,
            work: Box::new(work),
            callback: None,
        }
    }

    /// Create a task from a closure returning any serializable value
    pub fn from_fn<F, T>(priority: TaskPriority, work: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Serialize,
    {
        Self::new(priority, move || Ok(serde_json::to_value(work()?)?))
    }

    /// Use a caller-chosen id
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    /// Set the queue timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set a completion callback
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&TaskResult) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("has_callback", &self.callback.is_some())
            .finish_non_exhaustive()
    }
}

/// Recorded outcome of one task
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// Task ID
    pub task_id: TaskId,

    /// Value returned by the work item, or the captured error
    pub outcome: TaskOutcome,

    /// Time spent running the work item
    pub execution_time: Duration,

    /// When the result was recorded
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    /// Whether the work item completed successfully
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads
    pub workers: usize,

    /// How long an idle worker waits before rechecking for shutdown
    pub poll_interval: Duration,

    /// Maximum number of retained results (oldest are evicted first)
    pub result_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_millis(100),
            result_capacity: 1024,
        }
    }
}

impl PoolConfig {
    /// Set the number of workers (at least one)
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the idle poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the result capacity (at least one)
    pub fn with_result_capacity(mut self, capacity: usize) -> Self {
        self.result_capacity = capacity.max(1);
        self
    }
}
