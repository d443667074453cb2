use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Records child PIDs started per task and gate-keeps kill authority.
/// The exec tool records; the kill tool asks `can_kill` before acting.
pub struct ProcessTracker {
    task_pids: RwLock<HashMap<String, HashSet<u32>>>,
}

impl ProcessTracker {
    pub fn new() -> Self {
        Self {
            task_pids: RwLock::new(HashMap::new()),
        }
    }

    pub fn record(&self, task_id: &str, pid: u32) {
        self.task_pids
            .write()
            .expect("process tracker lock poisoned")
            .entry(task_id.to_string())
            .or_default()
            .insert(pid);
    }

    /// True iff `pid` was recorded for `task_id`.
    pub fn can_kill(&self, task_id: &str, pid: u32) -> bool {
        self.task_pids
            .read()
            .expect("process tracker lock poisoned")
            .get(task_id)
            .map(|pids| pids.contains(&pid))
            .unwrap_or(false)
    }

    /// Clear all PIDs for a task on termination.
    pub fn remove_task(&self, task_id: &str) {
        self.task_pids
            .write()
            .expect("process tracker lock poisoned")
            .remove(task_id);
    }
}

impl Default for ProcessTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_then_can_kill() {
        let tracker = ProcessTracker::new();
        tracker.record("t1", 1234);
        assert!(tracker.can_kill("t1", 1234));
        assert!(!tracker.can_kill("t1", 9999));
        assert!(!tracker.can_kill("t2", 1234));
    }

    #[test]
    fn remove_task_clears_authority() {
        let tracker = ProcessTracker::new();
        tracker.record("t1", 1234);
        tracker.record("t1", 5678);
        tracker.remove_task("t1");
        assert!(!tracker.can_kill("t1", 1234));
        assert!(!tracker.can_kill("t1", 5678));
    }

    #[test]
    fn unknown_task_cannot_kill() {
        let tracker = ProcessTracker::new();
        assert!(!tracker.can_kill("nope", 1));
    }
}
