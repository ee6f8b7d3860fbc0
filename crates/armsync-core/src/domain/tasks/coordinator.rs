//! Priority worker pool
//!
//! A fixed set of OS threads pulls from one shared priority queue. Results
//! are stored by task id and can be waited on with [`TaskCoordinator::get_result`].
//! Idle workers wake up every `poll_interval` to notice shutdown, so a pool
//! never needs an explicit wake-up to stop.

use super::queue::{QueuedTask, TaskQueue};
use super::types::{PoolConfig, Task, TaskError, TaskId, TaskOutcome, TaskResult};
use chrono::Utc;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Bounded store of task results, oldest evicted first
#[derive(Debug)]
struct ResultStore {
    results: HashMap<TaskId, TaskResult>,
    order: VecDeque<TaskId>,
    capacity: usize,
}

impl ResultStore {
    fn new(capacity: usize) -> Self {
        Self {
            results: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn insert(&mut self, result: TaskResult) {
        let task_id = result.task_id;
        if self.results.insert(task_id, result).is_none() {
            self.order.push_back(task_id);
        }

        while self.results.len() > self.capacity {
            match self.order.pop_front() {
                Some(evicted) => {
                    if self.results.remove(&evicted).is_some() {
                        debug!(task_id = %evicted, "Evicted task result");
                    }
                }
                None => break,
            }
        }
    }

    fn take(&mut self, task_id: TaskId) -> Option<TaskResult> {
        let result = self.results.remove(&task_id)?;
        self.order.retain(|id| *id != task_id);
        Some(result)
    }

    fn clear(&mut self) -> usize {
        let count = self.results.len();
        self.results.clear();
        self.order.clear();
        count
    }
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<TaskQueue>,
    task_ready: Condvar,
    results: Mutex<ResultStore>,
    result_ready: Condvar,
    live_workers: Mutex<usize>,
    workers_exited: Condvar,
    shutdown: AtomicBool,
    poll_interval: Duration,
}

impl Shared {
    fn worker_loop(&self) {
        let _exit = WorkerExit(self);

        while !self.shutdown.load(Ordering::Acquire) {
            let next = {
                let mut queue = self.queue.lock();
                if queue.is_empty() {
                    self.task_ready.wait_for(&mut queue, self.poll_interval);
                }
                queue.pop()
            };

            if let Some(queued) = next {
                self.run(queued);
            }
        }
    }

    fn run(&self, queued: QueuedTask) {
        let QueuedTask {
            task, enqueued_at, ..
        } = queued;
        let Task {
            id,
            priority,
            timeout,
            work,
            callback,
        } = task;

        let waited = enqueued_at.elapsed();
        let start = Instant::now();

        let outcome: TaskOutcome = match timeout {
            Some(limit) if waited > limit => {
                warn!(task_id = %id, waited_ms = waited.as_millis(), "Task expired before it could run");
                Err(TaskError::Expired {
                    task_id: id,
                    waited,
                })
            }
            _ => {
                debug!(task_id = %id, priority = %priority, "Running task");
                match panic::catch_unwind(AssertUnwindSafe(work)) {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => {
                        error!(task_id = %id, error = %e, "Task execution failed");
                        Err(TaskError::Failed {
                            task_id: id,
                            message: format!("{:#}", e),
                        })
                    }
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        error!(task_id = %id, panic = %message, "Task panicked");
                        Err(TaskError::Panicked {
                            task_id: id,
                            message,
                        })
                    }
                }
            }
        };

        let execution_time = start.elapsed();
        if let Some(limit) = timeout {
            if waited + execution_time > limit && !matches!(outcome, Err(TaskError::Expired { .. })) {
                warn!(
                    task_id = %id,
                    elapsed_ms = (waited + execution_time).as_millis(),
                    timeout_ms = limit.as_millis(),
                    "Task overran its timeout"
                );
            }
        }

        let result = TaskResult {
            task_id: id,
            outcome,
            execution_time,
            completed_at: Utc::now(),
        };

        self.results.lock().insert(result.clone());
        self.result_ready.notify_all();

        if let Some(callback) = callback {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&result))).is_err() {
                error!(task_id = %id, "Task callback panicked");
            }
        }
    }
}

/// Decrements the live worker count however the worker loop exits
struct WorkerExit<'a>(&'a Shared);

impl Drop for WorkerExit<'_> {
    fn drop(&mut self) {
        let mut live = self.0.live_workers.lock();
        *live = live.saturating_sub(1);
        drop(live);
        self.0.workers_exited.notify_all();
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Fixed-size worker pool with one shared priority queue
#[derive(Debug)]
pub struct TaskCoordinator {
    /// Configuration
    config: PoolConfig,

    /// State shared with the workers
    shared: Arc<Shared>,

    /// Worker handles; dropped (detached) if a worker outlives shutdown
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskCoordinator {
    /// Start a pool with `config.workers` worker threads
    pub fn new(config: PoolConfig) -> std::io::Result<Self> {
        let count = config.workers.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(TaskQueue::new()),
            task_ready: Condvar::new(),
            results: Mutex::new(ResultStore::new(config.result_capacity)),
            result_ready: Condvar::new(),
            live_workers: Mutex::new(0),
            workers_exited: Condvar::new(),
            shutdown: AtomicBool::new(false),
            poll_interval: config.poll_interval,
        });

        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            *shared.live_workers.lock() += 1;
            let worker_shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("armsync-worker-{}", index))
                .spawn(move || worker_shared.worker_loop());

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    *shared.live_workers.lock() -= 1;
                    shared.shutdown.store(true, Ordering::Release);
                    shared.task_ready.notify_all();
                    error!(error = %e, "Failed to spawn worker thread");
                    return Err(e);
                }
            }
        }

        info!(workers = count, "Task coordinator started");

        Ok(Self {
            config,
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// Start a pool with default configuration
    pub fn with_defaults() -> std::io::Result<Self> {
        Self::new(PoolConfig::default())
    }

    /// Get the configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Enqueue a task; never fails
    pub fn submit(&self, task: Task) -> TaskId {
        let task_id = task.id;
        let priority = task.priority;

        if self.is_shutdown() {
            warn!(task_id = %task_id, "Task submitted after shutdown; it will not run");
        }

        let sequence = self.shared.queue.lock().push(task);
        self.shared.task_ready.notify_one();

        debug!(
            task_id = %task_id,
            priority = %priority,
            sequence = sequence,
            "Task submitted"
        );
        task_id
    }

    /// Wait for a task's result
    ///
    /// `None` waits indefinitely; `Some(Duration::ZERO)` checks once. Returns
    /// the captured value, the captured error, or
    /// [`TaskError::ResultTimeout`].
    pub fn get_result(&self, task_id: TaskId, timeout: Option<Duration>) -> TaskOutcome {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut results = self.shared.results.lock();

        loop {
            if let Some(result) = results.results.get(&task_id) {
                return result.outcome.clone();
            }

            match (timeout, deadline) {
                (Some(timeout), Some(deadline)) => {
                    if self
                        .shared
                        .result_ready
                        .wait_until(&mut results, deadline)
                        .timed_out()
                    {
                        if let Some(result) = results.results.get(&task_id) {
                            return result.outcome.clone();
                        }
                        debug!(task_id = %task_id, timeout_ms = timeout.as_millis(), "Timed out waiting for task result");
                        return Err(TaskError::ResultTimeout { task_id, timeout });
                    }
                }
                _ => self.shared.result_ready.wait(&mut results),
            }
        }
    }

    /// Get the full result record without waiting
    pub fn result(&self, task_id: TaskId) -> Option<TaskResult> {
        self.shared.results.lock().results.get(&task_id).cloned()
    }

    /// Remove and return a task's result
    pub fn take_result(&self, task_id: TaskId) -> Option<TaskResult> {
        self.shared.results.lock().take(task_id)
    }

    /// Drop every stored result, returning how many were removed
    pub fn clear_results(&self) -> usize {
        self.shared.results.lock().clear()
    }

    /// Number of stored results
    pub fn result_count(&self) -> usize {
        self.shared.results.lock().results.len()
    }

    /// Number of tasks waiting for a worker
    pub fn pending_count(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Configured number of workers
    pub fn worker_count(&self) -> usize {
        self.config.workers.max(1)
    }

    /// Workers whose loop has not exited yet
    pub fn live_workers(&self) -> usize {
        *self.shared.live_workers.lock()
    }

    /// Whether shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Stop all workers, waiting at most `timeout` for them to exit
    ///
    /// Workers still busy when the timeout elapses are detached and finish
    /// their current task in the background. Returns true when every worker
    /// exited in time.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            debug!("Task coordinator already shut down");
        }
        self.shared.task_ready.notify_all();

        let deadline = Instant::now().checked_add(timeout);
        let remaining = {
            let mut live = self.shared.live_workers.lock();
            while *live > 0 {
                match deadline {
                    Some(deadline) => {
                        if self
                            .shared
                            .workers_exited
                            .wait_until(&mut live, deadline)
                            .timed_out()
                        {
                            break;
                        }
                    }
                    None => self.shared.workers_exited.wait(&mut live),
                }
            }
            *live
        };

        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if handle.is_finished() {
                if handle.join().is_err() {
                    warn!("Worker thread terminated abnormally");
                }
            }
            // Unfinished handles are dropped, detaching the thread
        }

        let pending = self.pending_count();
        if remaining == 0 {
            info!(pending_tasks = pending, "Task coordinator shutdown completed");
        } else {
            warn!(
                stuck_workers = remaining,
                pending_tasks = pending,
                "Task coordinator shutdown timed out; detaching busy workers"
            );
        }
        remaining == 0
    }
}

impl Drop for TaskCoordinator {
    fn drop(&mut self) {
        // Let workers wind down on their own without blocking the caller
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.task_ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tasks::TaskPriority;
    use anyhow::anyhow;
    use serde_json::{Value, json};
    use std::sync::mpsc;

    const WAIT: Option<Duration> = Some(Duration::from_secs(5));

    fn single_worker() -> TaskCoordinator {
        TaskCoordinator::new(
            PoolConfig::default()
                .with_workers(1)
                .with_poll_interval(Duration::from_millis(10)),
        )
        .expect("Failed to start pool")
    }

    #[test]
    fn test_submit_and_get_result() {
        let pool = single_worker();
        let id = pool.submit(Task::new(TaskPriority::Normal, || Ok(json!({"joint": 3}))));

        assert_eq!(pool.get_result(id, WAIT), Ok(json!({"joint": 3})));
        // Results can be read any number of times
        assert_eq!(pool.get_result(id, WAIT), Ok(json!({"joint": 3})));
        assert!(pool.result(id).unwrap().success());
        pool.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_failure_is_captured() {
        let pool = single_worker();
        let id = pool.submit(Task::new(TaskPriority::Normal, || Err(anyhow!("servo fault"))));

        match pool.get_result(id, WAIT) {
            Err(TaskError::Failed { task_id, message }) => {
                assert_eq!(task_id, id);
                assert!(message.contains("servo fault"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        pool.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_panic_does_not_kill_worker() {
        let pool = single_worker();
        let bad = pool.submit(Task::new(TaskPriority::Normal, || panic!("encoder lost")));
        let good = pool.submit(Task::new(TaskPriority::Normal, || Ok(json!(1))));

        assert!(matches!(
            pool.get_result(bad, WAIT),
            Err(TaskError::Panicked { .. })
        ));
        assert_eq!(pool.get_result(good, WAIT), Ok(json!(1)));
        assert_eq!(pool.live_workers(), 1);
        pool.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_unknown_task_with_zero_timeout_fails_promptly() {
        let pool = single_worker();
        let start = Instant::now();
        let outcome = pool.get_result(TaskId::new(), Some(Duration::ZERO));

        assert!(matches!(outcome, Err(TaskError::ResultTimeout { .. })));
        assert!(start.elapsed() < Duration::from_millis(500));
        pool.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_priority_order_single_worker() {
        let pool = single_worker();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (order_tx, order_rx) = mpsc::channel();

        // Occupy the worker so the next three tasks queue up together
        let blocker = pool.submit(Task::new(TaskPriority::Critical, move || {
            gate_rx.recv().ok();
            Ok(Value::Null)
        }));
        while pool.pending_count() > 0 {
            thread::sleep(Duration::from_millis(1));
        }

        for priority in [TaskPriority::Low, TaskPriority::Critical, TaskPriority::Normal] {
            let tx = order_tx.clone();
            pool.submit(Task::new(priority, move || {
                tx.send(priority).ok();
                Ok(Value::Null)
            }));
        }
        gate_tx.send(()).unwrap();
        pool.get_result(blocker, WAIT).unwrap();

        let order: Vec<TaskPriority> = (0..3)
            .map(|_| order_rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(
            order,
            vec![TaskPriority::Critical, TaskPriority::Normal, TaskPriority::Low]
        );
        pool.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_callback_invoked_and_panic_swallowed() {
        let pool = single_worker();
        let (tx, rx) = mpsc::channel();

        pool.submit(
            Task::new(TaskPriority::Normal, || Ok(json!("done")))
                .with_callback(|_| panic!("callback bug")),
        );
        let id = pool.submit(
            Task::new(TaskPriority::Normal, || Ok(json!("second"))).with_callback(move |result| {
                tx.send(result.success()).ok();
            }),
        );

        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert_eq!(pool.get_result(id, WAIT), Ok(json!("second")));
        assert_eq!(pool.live_workers(), 1);
        pool.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_expired_task_is_not_run() {
        let pool = single_worker();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (ran_tx, ran_rx) = mpsc::channel::<()>();

        pool.submit(Task::new(TaskPriority::Normal, move || {
            gate_rx.recv().ok();
            Ok(Value::Null)
        }));
        let id = pool.submit(
            Task::new(TaskPriority::Normal, move || {
                ran_tx.send(()).ok();
                Ok(Value::Null)
            })
            .with_timeout(Duration::from_millis(10)),
        );

        thread::sleep(Duration::from_millis(50));
        gate_tx.send(()).unwrap();

        assert!(matches!(
            pool.get_result(id, WAIT),
            Err(TaskError::Expired { .. })
        ));
        assert!(ran_rx.try_recv().is_err());
        pool.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_result_capacity_evicts_oldest() {
        let pool = TaskCoordinator::new(
            PoolConfig::default()
                .with_workers(1)
                .with_result_capacity(2),
        )
        .unwrap();

        let ids: Vec<TaskId> = (0..3)
            .map(|i| pool.submit(Task::new(TaskPriority::Normal, move || Ok(json!(i)))))
            .collect();
        pool.get_result(ids[2], WAIT).unwrap();

        assert_eq!(pool.result_count(), 2);
        assert!(pool.result(ids[0]).is_none());
        assert!(pool.take_result(ids[1]).is_some());
        assert_eq!(pool.result_count(), 1);
        assert_eq!(pool.clear_results(), 1);
        pool.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_shutdown_is_bounded_with_stuck_worker() {
        let pool = single_worker();
        let (started_tx, started_rx) = mpsc::channel::<()>();

        pool.submit(Task::new(TaskPriority::Normal, move || {
            started_tx.send(()).ok();
            loop {
                thread::sleep(Duration::from_secs(60));
            }
        }));
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let timeout = Duration::from_millis(100);
        let start = Instant::now();
        let clean = pool.shutdown(timeout);

        assert!(!clean);
        assert!(start.elapsed() < timeout + Duration::from_millis(400));
        assert!(pool.is_shutdown());
    }

    #[test]
    fn test_shutdown_idle_pool() {
        let pool = TaskCoordinator::new(
            PoolConfig::default()
                .with_workers(3)
                .with_poll_interval(Duration::from_millis(10)),
        )
        .unwrap();
        assert_eq!(pool.worker_count(), 3);

        assert!(pool.shutdown(Duration::from_secs(2)));
        assert_eq!(pool.live_workers(), 0);
    }
}
