//! Priority queue with deterministic FIFO tie-break
//!
//! Tasks are ordered by priority first and by a monotonically increasing
//! submission sequence second, so equal-priority tasks always come out in
//! the order they went in.

use super::types::{Task, TaskPriority};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

/// Task queue entry
#[derive(Debug)]
pub(crate) struct QueuedTask {
    pub task: Task,
    pub sequence: u64,
    pub enqueued_at: Instant,
}

impl QueuedTask {
    fn priority(&self) -> TaskPriority {
        self.task.priority
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then lower sequence first
        self.priority()
            .cmp(&other.priority())
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Binary-heap task queue
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    heap: BinaryHeap<QueuedTask>,
    next_sequence: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a task, returning its sequence number
    pub fn push(&mut self, task: Task) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(QueuedTask {
            task,
            sequence,
            enqueued_at: Instant::now(),
        });
        sequence
    }

    /// Dequeue the highest priority, earliest submitted task
    pub fn pop(&mut self) -> Option<QueuedTask> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn task(priority: TaskPriority) -> Task {
        Task::new(priority, || Ok(Value::Null))
    }

    #[test]
    fn test_priority_order() {
        let mut queue = TaskQueue::new();
        queue.push(task(TaskPriority::Low));
        queue.push(task(TaskPriority::Critical));
        queue.push(task(TaskPriority::Normal));
        queue.push(task(TaskPriority::High));

        let order: Vec<TaskPriority> = std::iter::from_fn(|| queue.pop())
            .map(|queued| queued.task.priority)
            .collect();
        assert_eq!(
            order,
            vec![
                TaskPriority::Critical,
                TaskPriority::High,
                TaskPriority::Normal,
                TaskPriority::Low,
            ]
        );
    }

    #[test]
    fn test_equal_priority_is_fifo() {
        let mut queue = TaskQueue::new();
        let ids: Vec<_> = (0..10)
            .map(|_| {
                let t = task(TaskPriority::Normal);
                let id = t.id;
                queue.push(t);
                id
            })
            .collect();

        let popped: Vec<_> = std::iter::from_fn(|| queue.pop())
            .map(|queued| queued.task.id)
            .collect();
        assert_eq!(popped, ids);
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let mut queue = TaskQueue::new();
        let a = queue.push(task(TaskPriority::Low));
        let b = queue.push(task(TaskPriority::Low));
        assert!(b > a);
        assert_eq!(queue.len(), 2);
        assert!(!queue.is_empty());
    }
}
