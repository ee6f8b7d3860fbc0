//! Wait-for graph used to refuse lock requests that would deadlock
//!
//! The detector never blocks and never fails: it only answers whether a
//! thread may start waiting on a lock. Edges are recorded when a request is
//! admitted and removed on every exit path (grant, timeout, release), so the
//! graph itself never contains a cycle.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::thread::ThreadId;
use tracing::warn;

#[derive(Debug, Default)]
struct WaitGraph {
    /// thread -> locks it is currently waiting for
    waiting: HashMap<ThreadId, HashSet<String>>,

    /// lock -> owning thread
    owners: HashMap<String, ThreadId>,

    /// thread -> locks it owns
    held: HashMap<ThreadId, HashSet<String>>,
}

impl WaitGraph {
    /// Would `thread` waiting on `lock_id` close a cycle?
    fn would_create_cycle(&self, thread: ThreadId, lock_id: &str) -> bool {
        match self.owners.get(lock_id) {
            Some(&owner) if owner != thread => self.has_path(owner, thread),
            _ => false,
        }
    }

    /// Is `to` reachable from `from` by following "waits for lock owned by"?
    fn has_path(&self, from: ThreadId, to: ThreadId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![from];

        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }

            if let Some(locks) = self.waiting.get(&current) {
                for lock_id in locks {
                    if let Some(&owner) = self.owners.get(lock_id) {
                        if !visited.contains(&owner) {
                            stack.push(owner);
                        }
                    }
                }
            }
        }

        false
    }

    fn clear_wait(&mut self, thread: ThreadId, lock_id: &str) {
        if let Some(locks) = self.waiting.get_mut(&thread) {
            locks.remove(lock_id);
            if locks.is_empty() {
                self.waiting.remove(&thread);
            }
        }
    }
}

/// Deadlock-avoiding wait-for graph over lock ids and threads
#[derive(Debug, Default)]
pub struct DeadlockDetector {
    graph: Mutex<WaitGraph>,
}

impl DeadlockDetector {
    /// Create an empty detector
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask permission for `thread` to wait on `lock_id`
    ///
    /// Returns false, without recording anything, when the current owner of
    /// the lock transitively waits on something `thread` holds. Otherwise the
    /// wait edge `thread -> lock_id` is recorded and true is returned.
    pub fn register_request(&self, thread: ThreadId, lock_id: &str) -> bool {
        let mut graph = self.graph.lock();

        if graph.would_create_cycle(thread, lock_id) {
            warn!(lock_id = %lock_id, thread = ?thread, "Lock request would close a wait cycle");
            return false;
        }

        graph
            .waiting
            .entry(thread)
            .or_default()
            .insert(lock_id.to_string());
        true
    }

    /// Record that `thread` now owns `lock_id`
    pub fn register_acquired(&self, thread: ThreadId, lock_id: &str) {
        let mut graph = self.graph.lock();
        graph.clear_wait(thread, lock_id);
        graph.owners.insert(lock_id.to_string(), thread);
        graph.held.entry(thread).or_default().insert(lock_id.to_string());
    }

    /// Record that `thread` released `lock_id`, or gave up waiting for it
    ///
    /// Ownership is only cleared when `thread` is the recorded owner, so an
    /// abandoned wait never erases somebody else's ownership.
    pub fn register_released(&self, thread: ThreadId, lock_id: &str) {
        let mut graph = self.graph.lock();
        graph.clear_wait(thread, lock_id);

        if graph.owners.get(lock_id) == Some(&thread) {
            graph.owners.remove(lock_id);
        }
        if let Some(locks) = graph.held.get_mut(&thread) {
            locks.remove(lock_id);
            if locks.is_empty() {
                graph.held.remove(&thread);
            }
        }
    }

    /// Current owner of a lock, if the detector knows one
    pub fn owner_of(&self, lock_id: &str) -> Option<ThreadId> {
        self.graph.lock().owners.get(lock_id).copied()
    }

    /// Locks `thread` is currently waiting for
    pub fn waiting_on(&self, thread: ThreadId) -> Vec<String> {
        self.graph
            .lock()
            .waiting
            .get(&thread)
            .map(|locks| locks.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Locks `thread` currently owns
    pub fn held_by(&self, thread: ThreadId) -> Vec<String> {
        self.graph
            .lock()
            .held
            .get(&thread)
            .map(|locks| locks.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Total number of outstanding wait edges
    pub fn wait_edge_count(&self) -> usize {
        self.graph.lock().waiting.values().map(HashSet::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn spawn_ids(n: usize) -> Vec<ThreadId> {
        (0..n)
            .map(|_| thread::spawn(|| thread::current().id()).join().unwrap())
            .collect()
    }

    #[test]
    fn test_uncontended_request_is_admitted() {
        let detector = DeadlockDetector::new();
        let me = thread::current().id();

        assert!(detector.register_request(me, "arm"));
        assert_eq!(detector.waiting_on(me), vec!["arm".to_string()]);

        detector.register_acquired(me, "arm");
        assert!(detector.waiting_on(me).is_empty());
        assert_eq!(detector.owner_of("arm"), Some(me));
        assert_eq!(detector.held_by(me), vec!["arm".to_string()]);
    }

    #[test]
    fn test_reentrant_request_is_admitted() {
        let detector = DeadlockDetector::new();
        let me = thread::current().id();

        assert!(detector.register_request(me, "arm"));
        detector.register_acquired(me, "arm");
        assert!(detector.register_request(me, "arm"));
    }

    #[test]
    fn test_two_thread_cycle_is_rejected() {
        let ids = spawn_ids(2);
        let (t1, t2) = (ids[0], ids[1]);
        let detector = DeadlockDetector::new();

        assert!(detector.register_request(t1, "l1"));
        detector.register_acquired(t1, "l1");
        assert!(detector.register_request(t2, "l2"));
        detector.register_acquired(t2, "l2");

        // t1 waits on l2, owned by t2
        assert!(detector.register_request(t1, "l2"));
        // t2 asking for l1 would close the cycle
        assert!(!detector.register_request(t2, "l1"));
        assert!(detector.waiting_on(t2).is_empty());
    }

    #[test]
    fn test_three_thread_cycle_is_rejected() {
        let ids = spawn_ids(3);
        let detector = DeadlockDetector::new();

        for (i, id) in ids.iter().enumerate() {
            let lock = format!("l{i}");
            assert!(detector.register_request(*id, &lock));
            detector.register_acquired(*id, &lock);
        }

        assert!(detector.register_request(ids[0], "l1"));
        assert!(detector.register_request(ids[1], "l2"));
        assert!(!detector.register_request(ids[2], "l0"));
    }

    #[test]
    fn test_release_clears_edges_and_ownership() {
        let ids = spawn_ids(2);
        let (t1, t2) = (ids[0], ids[1]);
        let detector = DeadlockDetector::new();

        detector.register_request(t1, "l1");
        detector.register_acquired(t1, "l1");
        assert!(detector.register_request(t2, "l1"));
        assert_eq!(detector.wait_edge_count(), 1);

        // t2 gives up waiting: t1 must keep ownership
        detector.register_released(t2, "l1");
        assert_eq!(detector.wait_edge_count(), 0);
        assert_eq!(detector.owner_of("l1"), Some(t1));

        detector.register_released(t1, "l1");
        assert_eq!(detector.owner_of("l1"), None);
        assert!(detector.held_by(t1).is_empty());
    }

    #[test]
    fn test_no_false_positive_after_release() {
        let ids = spawn_ids(2);
        let (t1, t2) = (ids[0], ids[1]);
        let detector = DeadlockDetector::new();

        detector.register_request(t1, "l1");
        detector.register_acquired(t1, "l1");
        detector.register_request(t2, "l2");
        detector.register_acquired(t2, "l2");
        detector.register_request(t1, "l2");

        // t1 times out on l2
        detector.register_released(t1, "l2");
        assert!(detector.register_request(t2, "l1"));
    }
}
