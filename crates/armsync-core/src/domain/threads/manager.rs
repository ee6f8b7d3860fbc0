//! Thread manager
//!
//! Owns the lock registry and the worker pool for one runtime, and keeps
//! track of long-lived named threads (safety monitor, I/O polling, robot
//! state updates) so they can be stopped together on shutdown.

use super::types::{Signal, StopToken, ThreadError, ThreadManagerConfig, ThreadResult};
use crate::domain::health::{HealthConfig, HealthReport, HealthStatus};
use crate::domain::locking::{LockGuard, LockRegistry, LockResult};
use crate::domain::tasks::coordinator::panic_message;
use crate::domain::tasks::{Task, TaskCoordinator, TaskId, TaskOutcome};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug)]
struct ManagedThread {
    handle: JoinHandle<()>,
    stop: StopToken,
    exited: Arc<Signal>,
    started_at: DateTime<Utc>,
}

impl ManagedThread {
    fn is_running(&self) -> bool {
        !self.exited.is_set()
    }

    /// Join if the thread has already exited; otherwise drop (detach) it
    fn reap(self, name: &str) {
        if self.handle.is_finished() {
            if self.handle.join().is_err() {
                warn!(thread = %name, "Managed thread terminated abnormally");
            }
        } else {
            debug!(thread = %name, "Detaching managed thread");
        }
    }
}

/// Marks a managed thread as exited however its body returns
struct ExitSignal(Arc<Signal>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        self.0.set();
    }
}

/// Runtime owner of the lock registry, the worker pool and named threads
#[derive(Debug)]
pub struct ThreadManager {
    locks: Arc<LockRegistry>,
    pool: TaskCoordinator,
    health: HealthConfig,
    threads: Mutex<HashMap<String, ManagedThread>>,
}

impl ThreadManager {
    /// Create a thread manager and start its worker pool
    pub fn new(config: ThreadManagerConfig) -> std::io::Result<Self> {
        let ThreadManagerConfig {
            locking,
            pool,
            health,
        } = config;

        let manager = Self {
            locks: Arc::new(LockRegistry::new(locking)),
            pool: TaskCoordinator::new(pool)?,
            health,
            threads: Mutex::new(HashMap::new()),
        };
        info!(
            workers = manager.pool.worker_count(),
            "Thread manager initialized"
        );
        Ok(manager)
    }

    /// Create a thread manager with default configuration
    pub fn with_defaults() -> std::io::Result<Self> {
        Self::new(ThreadManagerConfig::default())
    }

    /// Shared lock registry
    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    /// Worker pool
    pub fn pool(&self) -> &TaskCoordinator {
        &self.pool
    }

    // ========== Managed Threads ==========

    /// Start a named thread
    ///
    /// The closure receives a [`StopToken`] and should return once it is
    /// stopped. A name may be reused after the previous thread exited.
    pub fn spawn<F>(&self, name: &str, f: F) -> ThreadResult<()>
    where
        F: FnOnce(StopToken) + Send + 'static,
    {
        let mut threads = self.threads.lock();
        if threads.get(name).is_some_and(ManagedThread::is_running) {
            warn!(thread = %name, "Thread already exists");
            return Err(ThreadError::AlreadyExists(name.to_string()));
        }
        if let Some(finished) = threads.remove(name) {
            finished.reap(name);
        }

        let stop = StopToken::new();
        let exited = Arc::new(Signal::default());
        let thread_stop = stop.clone();
        let thread_exited = exited.clone();
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _exit = ExitSignal(thread_exited);
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| f(thread_stop))) {
                    error!(
                        thread = %thread_name,
                        panic = %panic_message(payload.as_ref()),
                        "Managed thread panicked"
                    );
                }
            })
            .map_err(|e| {
                error!(thread = %name, error = %e, "Failed to spawn thread");
                ThreadError::Spawn {
                    name: name.to_string(),
                    message: e.to_string(),
                }
            })?;

        threads.insert(
            name.to_string(),
            ManagedThread {
                handle,
                stop,
                exited,
                started_at: Utc::now(),
            },
        );
        info!(thread = %name, "Thread started");
        Ok(())
    }

    /// Whether a named thread is still running
    pub fn is_running(&self, name: &str) -> bool {
        self.threads
            .lock()
            .get(name)
            .is_some_and(ManagedThread::is_running)
    }

    /// Names of all tracked threads, sorted
    pub fn thread_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.threads.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// When a tracked thread was started
    pub fn started_at(&self, name: &str) -> Option<DateTime<Utc>> {
        self.threads.lock().get(name).map(|t| t.started_at)
    }

    /// Stop a named thread and forget it
    ///
    /// Requests a stop, then waits at most `timeout` for the thread to exit.
    /// Returns false when the thread is unknown or did not exit in time; a
    /// thread that misses the timeout is detached.
    pub fn stop(&self, name: &str, timeout: Duration) -> bool {
        match self.try_stop(name, timeout) {
            Ok(exited) => exited,
            Err(e) => {
                warn!(thread = %name, error = %e, "Stop requested for unknown thread");
                false
            }
        }
    }

    /// Stop a named thread, reporting an unknown name as an error
    ///
    /// `Ok(false)` means the thread did not exit within `timeout` and was
    /// detached.
    pub fn try_stop(&self, name: &str, timeout: Duration) -> ThreadResult<bool> {
        let managed = self
            .threads
            .lock()
            .remove(name)
            .ok_or_else(|| ThreadError::NotFound(name.to_string()))?;

        managed.stop.stop();
        let exited = managed.exited.wait(timeout);
        if exited {
            info!(thread = %name, "Thread stopped");
        } else {
            warn!(thread = %name, timeout_ms = timeout.as_millis(), "Thread did not stop in time");
        }
        managed.reap(name);
        Ok(exited)
    }

    // ========== Facade ==========

    /// Submit a task to the worker pool
    pub fn submit_task(&self, task: Task) -> TaskId {
        self.pool.submit(task)
    }

    /// Wait for a task result
    pub fn get_task_result(&self, task_id: TaskId, timeout: Option<Duration>) -> TaskOutcome {
        self.pool.get_result(task_id, timeout)
    }

    /// Acquire a named lock
    pub fn acquire_lock(&self, lock_id: &str, timeout: Duration) -> LockResult<bool> {
        self.locks.acquire(lock_id, timeout)
    }

    /// Release a named lock
    pub fn release_lock(&self, lock_id: &str) -> bool {
        self.locks.release(lock_id)
    }

    /// Acquire a named lock for the lifetime of the returned guard
    pub fn managed_lock(
        &self,
        lock_id: &str,
        timeout: Option<Duration>,
    ) -> LockResult<LockGuard<'_>> {
        self.locks.lock(lock_id, timeout)
    }

    /// Stop every managed thread, then the worker pool
    ///
    /// Both phases share one `timeout` budget. Returns true when everything
    /// exited in time.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let remaining = || match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => timeout,
        };

        let threads: Vec<(String, ManagedThread)> = self.threads.lock().drain().collect();
        info!(
            managed_threads = threads.len(),
            pending_tasks = self.pool.pending_count(),
            "Shutting down thread manager"
        );

        for (_, managed) in &threads {
            managed.stop.stop();
        }

        let mut clean = true;
        for (name, managed) in threads {
            if !managed.exited.wait(remaining()) {
                warn!(thread = %name, "Thread did not stop in time");
                clean = false;
            }
            managed.reap(&name);
        }

        let pool_clean = self.pool.shutdown(remaining());
        clean && pool_clean
    }

    /// Worker pool health check
    pub fn health(&self) -> HealthReport {
        let managed_threads = self
            .threads
            .lock()
            .values()
            .filter(|t| t.is_running())
            .count();
        let live_workers = self.pool.live_workers();
        let pending_tasks = self.pool.pending_count();
        let backlog_limit = self.pool.worker_count() * self.health.warning_backlog_per_worker;

        let (status, message) = if live_workers == 0 && !self.pool.is_shutdown() {
            (HealthStatus::Error, "No worker threads are alive")
        } else if pending_tasks > backlog_limit {
            (HealthStatus::Warning, "Task queue backlog is high")
        } else {
            (HealthStatus::Healthy, "Thread management is healthy")
        };

        let mut metrics = Map::new();
        metrics.insert("managed_threads".into(), Value::from(managed_threads));
        metrics.insert("live_workers".into(), Value::from(live_workers));
        metrics.insert("pending_tasks".into(), Value::from(pending_tasks));
        metrics.insert("locks".into(), Value::from(self.locks.lock_count()));

        HealthReport::new("thread_manager", status, message, metrics)
    }
}

impl Drop for ThreadManager {
    fn drop(&mut self) {
        for managed in self.threads.get_mut().values() {
            managed.stop.stop();
        }
    }
}
