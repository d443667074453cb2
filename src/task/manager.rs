use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{Task, TaskState};

/// Tracks active tasks and owns the default timeout.
pub struct TaskManager {
    tasks: RwLock<HashMap<String, Arc<Task>>>,
    timeout: Duration,
}

impl TaskManager {
    pub fn new(timeout_sec: u64) -> Self {
        let timeout = if timeout_sec == 0 {
            Duration::from_secs(300)
        } else {
            Duration::from_secs(timeout_sec)
        };
        Self {
            tasks: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    /// Create and register a new task in `Pending` state.
    pub fn create(&self, agent_id: &str, session_key: &str) -> Arc<Task> {
        let task = Arc::new(Task::new(agent_id, session_key));
        self.tasks
            .write()
            .expect("task map lock poisoned")
            .insert(task.id.clone(), task.clone());
        task
    }

    pub fn get(&self, id: &str) -> Option<Arc<Task>> {
        self.tasks
            .read()
            .expect("task map lock poisoned")
            .get(id)
            .cloned()
    }

    /// Remove a task after completion.
    pub fn remove(&self, id: &str) {
        self.tasks
            .write()
            .expect("task map lock poisoned")
            .remove(id);
    }

    /// Set the cancelled flag on a task. Returns true iff it existed.
    /// The loop observes the flag before each LLM call and each tool call.
    pub fn cancel(&self, id: &str) -> bool {
        let task = self.get(id);
        match task {
            Some(t) => {
                t.set_cancelled();
                true
            }
            None => false,
        }
    }

    /// All registered non-terminal tasks.
    pub fn list_active(&self) -> Vec<Arc<Task>> {
        self.tasks
            .read()
            .expect("task map lock poisoned")
            .values()
            .filter(|t| !t.is_terminal())
            .cloned()
            .collect()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `f` under the manager timeout and a cancellation scope derived
    /// from the task. On expiry the task transitions to `Timeout`, the
    /// scope is cancelled, and an error is returned. `f` must be
    /// cancellation-aware: it receives the scope and is expected to stop
    /// when it fires.
    pub async fn run_with_timeout<F, Fut, T>(&self, task: &Arc<Task>, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let scope = task.cancel_token().child_token();
        match tokio::time::timeout(self.timeout, f(scope.clone())).await {
            Ok(result) => result,
            Err(_) => {
                task.transition(TaskState::Timeout);
                scope.cancel();
                Err(anyhow::anyhow!("task deadline exceeded"))
            }
        }
    }
}
