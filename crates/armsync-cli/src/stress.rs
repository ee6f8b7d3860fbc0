//! Mixed lock / resource / task soak run

use anyhow::{Context, anyhow};
use armsync_core::config::Config;
use armsync_core::domain::health::HealthReport;
use armsync_core::domain::locking::{LockError, LockRegistry};
use armsync_core::domain::resources::{
    AccessMode, ResourceError, ResourceManager, ResourceType, ResourceUsageStats,
};
use armsync_core::domain::tasks::{Task, TaskError, TaskId, TaskPriority};
use armsync_core::domain::threads::ThreadManager;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

const CELLS: usize = 3;
const RESOURCES: [(&str, ResourceType, usize); 3] = [
    ("robot", ResourceType::Robot, 1),
    ("gripper", ResourceType::Gripper, 1),
    ("camera", ResourceType::Camera, 2),
];

#[derive(Debug, Serialize)]
pub struct StressSummary {
    pub tasks: usize,
    pub workers: usize,
    pub client_threads: usize,
    pub completed: usize,
    pub failed: usize,
    pub expired: usize,
    pub deadlocks_avoided: usize,
    pub lock_timeouts: usize,
    pub resource_busy: usize,
    pub elapsed_ms: u128,
    pub tasks_per_second: f64,
    pub health_samples: usize,
    pub resources: Vec<ResourceUsageStats>,
    pub health: Vec<HealthReport>,
}

impl StressSummary {
    pub fn print_text(&self) {
        println!("Stress Run");
        println!("==========");
        println!(
            "Tasks: {} ({} workers, {} client threads)",
            self.tasks, self.workers, self.client_threads
        );
        println!(
            "Completed: {}  Failed: {}  Expired: {}",
            self.completed, self.failed, self.expired
        );
        println!(
            "Deadlocks avoided: {}  Lock timeouts: {}  Resource busy: {}",
            self.deadlocks_avoided, self.lock_timeouts, self.resource_busy
        );
        println!(
            "Elapsed: {} ms ({:.1} tasks/s)",
            self.elapsed_ms, self.tasks_per_second
        );
        println!();
        for stats in &self.resources {
            println!(
                "{:<8} usage={} avg={:?}",
                stats.resource_id, stats.usage_count, stats.average_access_time
            );
        }
        for report in &self.health {
            println!("{}: {} ({})", report.component, report.status, report.message);
        }
    }
}

/// What a single stress task ran into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    DeadlockAvoided,
    LockTimeout,
    ResourceBusy,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::DeadlockAvoided => "deadlock_avoided",
            Self::LockTimeout => "lock_timeout",
            Self::ResourceBusy => "resource_busy",
        }
    }
}

/// Take two cell locks in index order `(i, i + 1)`, then touch one resource
///
/// Neighbouring tasks request overlapping cells in opposite order, so the
/// deadlock detector is exercised as well as plain contention.
fn stress_step(
    index: usize,
    locks: &LockRegistry,
    resources: &ResourceManager,
) -> anyhow::Result<Outcome> {
    let (first, second) = if index % 2 == 0 {
        (index % CELLS, (index + 1) % CELLS)
    } else {
        ((index + 1) % CELLS, index % CELLS)
    };
    let timeout = Some(Duration::from_millis(200));

    let step = || -> Result<Outcome, LockError> {
        let _outer = locks.lock(&format!("cell_{}", first), timeout)?;
        let _inner = locks.lock(&format!("cell_{}", second), timeout)?;

        let (resource_id, _, _) = RESOURCES[index % RESOURCES.len()];
        let mode = match index % 3 {
            0 => AccessMode::Read,
            1 => AccessMode::Write,
            _ => AccessMode::Exclusive,
        };
        match resources.managed(resource_id, mode, Some(Duration::from_millis(50))) {
            Ok(_guard) => {
                thread::sleep(Duration::from_micros(200));
                Ok(Outcome::Completed)
            }
            Err(ResourceError::Lock(e)) => Err(e),
            Err(_) => Ok(Outcome::ResourceBusy),
        }
    };

    match step() {
        Ok(outcome) => Ok(outcome),
        Err(LockError::DeadlockAvoided { .. }) => Ok(Outcome::DeadlockAvoided),
        Err(LockError::Timeout { .. }) => Ok(Outcome::LockTimeout),
        Err(e) => Err(anyhow!(e)),
    }
}

/// Run `tasks` tasks submitted from `client_threads` threads
pub fn run(
    config: &Config,
    tasks: usize,
    workers: Option<usize>,
    client_threads: usize,
) -> anyhow::Result<StressSummary> {
    let mut runtime_config = config.thread_manager_config();
    if let Some(workers) = workers {
        runtime_config.pool = runtime_config.pool.with_workers(workers);
    }

    let runtime = ThreadManager::new(runtime_config).context("Failed to start thread manager")?;
    let resources = Arc::new(ResourceManager::new(
        runtime.locks().clone(),
        config.resource_config(),
    ));
    for (id, resource_type, max) in RESOURCES {
        resources.register(id, resource_type, max, None);
    }

    // Background monitor sampling health while the load runs
    let samples = Arc::new(AtomicUsize::new(0));
    {
        let samples = samples.clone();
        let resources = resources.clone();
        let health = config.health_config();
        runtime.spawn("stress-monitor", move |stop| {
            while !stop.wait(Duration::from_millis(20)) {
                resources.health(&health);
                samples.fetch_add(1, Ordering::Relaxed);
            }
        })?;
    }

    let client_threads = client_threads.max(1);
    let started = Instant::now();
    info!(tasks, client_threads, "Starting stress run");

    let ids: Vec<TaskId> = thread::scope(|scope| {
        let runtime = &runtime;
        let handles: Vec<_> = (0..client_threads)
            .map(|client| {
                let resources = resources.clone();
                scope.spawn(move || {
                    (client..tasks)
                        .step_by(client_threads)
                        .map(|index| {
                            let locks = runtime.locks().clone();
                            let resources = resources.clone();
                            let priority = match index % 4 {
                                0 => TaskPriority::Low,
                                1 => TaskPriority::Normal,
                                2 => TaskPriority::High,
                                _ => TaskPriority::Critical,
                            };
                            let task = Task::from_fn(priority, move || {
                                let outcome = stress_step(index, &locks, &resources)?;
                                Ok(json!({ "index": index, "outcome": outcome.as_str() }))
                            });
                            runtime.submit_task(task)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        handles
            .into_iter()
            .filter_map(|handle| handle.join().ok())
            .flatten()
            .collect()
    });

    if ids.len() != tasks {
        return Err(anyhow!("A client thread panicked while submitting tasks"));
    }

    let mut summary = StressSummary {
        tasks,
        workers: runtime.pool().worker_count(),
        client_threads,
        completed: 0,
        failed: 0,
        expired: 0,
        deadlocks_avoided: 0,
        lock_timeouts: 0,
        resource_busy: 0,
        elapsed_ms: 0,
        tasks_per_second: 0.0,
        health_samples: 0,
        resources: Vec::new(),
        health: Vec::new(),
    };

    for id in ids {
        match runtime.get_task_result(id, Some(Duration::from_secs(30))) {
            Ok(value) => match value["outcome"].as_str() {
                Some("completed") => summary.completed += 1,
                Some("deadlock_avoided") => summary.deadlocks_avoided += 1,
                Some("lock_timeout") => summary.lock_timeouts += 1,
                _ => summary.resource_busy += 1,
            },
            Err(TaskError::Expired { .. }) => summary.expired += 1,
            Err(_) => summary.failed += 1,
        }
        runtime.pool().take_result(id);
    }

    let elapsed = started.elapsed();
    summary.elapsed_ms = elapsed.as_millis();
    summary.tasks_per_second = if elapsed.as_secs_f64() > 0.0 {
        tasks as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };

    runtime.stop("stress-monitor", Duration::from_secs(1));
    summary.health_samples = samples.load(Ordering::Relaxed);
    summary.resources = RESOURCES
        .iter()
        .filter_map(|(id, _, _)| resources.usage_stats(id))
        .collect();
    summary.health = vec![runtime.health(), resources.health(&config.health_config())];

    runtime.shutdown(Duration::from_secs(2));
    info!(
        completed = summary.completed,
        deadlocks_avoided = summary.deadlocks_avoided,
        elapsed_ms = summary.elapsed_ms,
        "Stress run finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_run_accounts_for_every_task() {
        let mut config = Config::default();
        config.set("workers.poll_interval_ms", "10").unwrap();

        let summary = run(&config, 40, Some(3), 2).unwrap();
        assert_eq!(summary.tasks, 40);
        assert_eq!(summary.workers, 3);
        assert_eq!(
            summary.completed
                + summary.failed
                + summary.expired
                + summary.deadlocks_avoided
                + summary.lock_timeouts
                + summary.resource_busy,
            40
        );
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.resources.len(), RESOURCES.len());
    }

    #[test]
    fn test_single_step_completes_when_uncontended() {
        let locks = Arc::new(LockRegistry::with_defaults());
        let resources = ResourceManager::with_defaults(locks.clone());
        for (id, resource_type, max) in RESOURCES {
            resources.register(id, resource_type, max, None);
        }

        assert_eq!(
            stress_step(0, &locks, &resources).unwrap(),
            Outcome::Completed
        );
        assert!(resources.is_available("robot"));
        assert_eq!(locks.lock_info("cell_0").unwrap().depth, 0);
    }
}
