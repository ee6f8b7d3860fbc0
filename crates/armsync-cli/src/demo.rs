//! Scripted demonstrations of the coordination core

use crate::{OutputFormat, print_output};
use anyhow::{Context, anyhow};
use armsync_core::domain::locking::{LockError, LockRegistry};
use armsync_core::domain::resources::{AccessMode, ResourceManager, ResourceType};
use armsync_core::domain::tasks::{PoolConfig, Task, TaskCoordinator, TaskPriority};
use serde::Serialize;
use serde_json::Value;
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Serialize)]
struct DeadlockOutcome {
    rejected_thread: String,
    rejected_lock: String,
    holder: String,
    error_code: String,
    other_thread_completed: bool,
}

/// Two threads each hold one lock and request the other's
pub fn deadlock(format: OutputFormat) -> anyhow::Result<()> {
    let locks = Arc::new(LockRegistry::with_defaults());
    let both_hold = Arc::new(Barrier::new(2));
    let timeout = Duration::from_secs(5);

    let spawn_arm = |name: &str, first: &'static str, second: &'static str, wait_first: bool| {
        let locks = locks.clone();
        let both_hold = both_hold.clone();
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || -> Result<bool, LockError> {
                if !locks.acquire(first, timeout)? {
                    return Ok(false);
                }
                both_hold.wait();

                if !wait_first {
                    // Let the other arm park on our lock before crossing over
                    let start = Instant::now();
                    while locks.detector().wait_edge_count() == 0
                        && start.elapsed() < Duration::from_secs(2)
                    {
                        thread::sleep(Duration::from_millis(2));
                    }
                }

                let result = locks.acquire(second, timeout);
                if result == Ok(true) {
                    locks.release(second);
                }
                locks.release(first);
                result
            })
            .context("Failed to spawn demo thread")
    };

    let arm_a = spawn_arm("arm-a", "robot", "gripper", true)?;
    let arm_b = spawn_arm("arm-b", "gripper", "robot", false)?;

    let a = arm_a.join().map_err(|_| anyhow!("arm-a panicked"))?;
    let b = arm_b.join().map_err(|_| anyhow!("arm-b panicked"))?;

    let (rejected, other) = match (a, b) {
        (Err(e), other) | (other, Err(e)) => (e, other),
        _ => return Err(anyhow!("No request was rejected")),
    };

    let outcome = match &rejected {
        LockError::DeadlockAvoided {
            lock_id,
            thread,
            holder,
        } => DeadlockOutcome {
            rejected_thread: thread.clone(),
            rejected_lock: lock_id.clone(),
            holder: holder.clone(),
            error_code: rejected.code().to_string(),
            other_thread_completed: other == Ok(true),
        },
        e => return Err(anyhow!("Unexpected lock error: {}", e)),
    };

    print_output(format, &outcome, |o| {
        println!(
            "{} requested '{}' held by {}: rejected with DeadlockAvoided ({})",
            o.rejected_thread, o.rejected_lock, o.holder, o.error_code
        );
        println!(
            "Other thread completed its cross request: {}",
            o.other_thread_completed
        );
    })
}

#[derive(Serialize)]
struct PriorityOutcome {
    submitted: Vec<String>,
    executed: Vec<String>,
}

/// LOW, CRITICAL, NORMAL submitted to a busy single-worker pool
pub fn priority(format: OutputFormat) -> anyhow::Result<()> {
    let pool = TaskCoordinator::new(
        PoolConfig::default()
            .with_workers(1)
            .with_poll_interval(Duration::from_millis(10)),
    )
    .context("Failed to start worker pool")?;

    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let (parked_tx, parked_rx) = mpsc::channel::<()>();
    pool.submit(Task::new(TaskPriority::Critical, move || {
        parked_tx.send(()).ok();
        gate_rx.recv().ok();
        Ok(Value::Null)
    }));
    parked_rx
        .recv_timeout(Duration::from_secs(5))
        .context("Worker did not start")?;

    let submitted = [TaskPriority::Low, TaskPriority::Critical, TaskPriority::Normal];
    let (order_tx, order_rx) = mpsc::channel::<String>();
    let ids: Vec<_> = submitted
        .iter()
        .map(|priority| {
            let label = priority.as_str().to_uppercase();
            let order_tx = order_tx.clone();
            pool.submit(Task::from_fn(*priority, move || {
                order_tx.send(label.clone()).ok();
                Ok(label)
            }))
        })
        .collect();
    drop(order_tx);

    gate_tx.send(()).ok();
    for id in ids {
        pool.get_result(id, Some(Duration::from_secs(5)))?;
    }

    let outcome = PriorityOutcome {
        submitted: submitted
            .iter()
            .map(|p| p.as_str().to_uppercase())
            .collect(),
        executed: order_rx.try_iter().collect(),
    };
    pool.shutdown(Duration::from_secs(2));

    print_output(format, &outcome, |o| {
        println!("Submitted: {}", o.submitted.join(", "));
        println!("Executed:  {}", o.executed.join(", "));
    })
}

#[derive(Serialize)]
struct ResourcesOutcome {
    resource_id: String,
    max_concurrent_access: usize,
    readers: usize,
    granted: usize,
    refused: usize,
    usage_count: u64,
}

/// `readers` threads request READ access to a resource capped at `max`
pub fn resources(readers: usize, max: usize, format: OutputFormat) -> anyhow::Result<()> {
    let manager = Arc::new(ResourceManager::with_defaults(Arc::new(
        LockRegistry::with_defaults(),
    )));
    let max = max.max(1);
    manager.register("camera", ResourceType::Camera, max, None);

    let attempted = Arc::new(Barrier::new(readers.max(1)));
    let handles = (0..readers)
        .map(|i| {
            let manager = manager.clone();
            let attempted = attempted.clone();
            thread::Builder::new()
                .name(format!("reader-{}", i))
                .spawn(move || {
                    let granted = manager
                        .acquire("camera", AccessMode::Read, Duration::from_millis(500))
                        .unwrap_or(false);
                    // Everyone holds until every reader has tried
                    attempted.wait();
                    if granted {
                        manager.release("camera");
                    }
                    granted
                })
                .context("Failed to spawn reader thread")
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut granted = 0;
    for handle in handles {
        if handle.join().map_err(|_| anyhow!("Reader thread panicked"))? {
            granted += 1;
        }
    }

    let usage_count = manager
        .usage_stats("camera")
        .map(|stats| stats.usage_count)
        .unwrap_or_default();

    let outcome = ResourcesOutcome {
        resource_id: "camera".to_string(),
        max_concurrent_access: max,
        readers,
        granted,
        refused: readers - granted,
        usage_count,
    };

    print_output(format, &outcome, |o| {
        println!(
            "{} readers against '{}' (max {}): {} granted, {} refused",
            o.readers, o.resource_id, o.max_concurrent_access, o.granted, o.refused
        );
    })
}
