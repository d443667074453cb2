use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// Lifecycle states for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Authorized,
    Executing,
    Monitoring,
    Completed,
    Failed,
    Killed,
    Timeout,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Killed | TaskState::Timeout
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Authorized => "authorized",
            TaskState::Executing => "executing",
            TaskState::Monitoring => "monitoring",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Killed => "killed",
            TaskState::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct TaskInner {
    state: TaskState,
    updated_at: DateTime<Utc>,
    cancelled: bool,
}

/// A single inbound-message-to-reply execution.
///
/// State transitions are serialized behind a per-task lock. Terminal
/// states are frozen: a transition on a terminal task is a no-op.
pub struct Task {
    pub id: String,
    pub agent_id: String,
    pub session_key: String,
    pub created_at: DateTime<Utc>,
    cancel_token: CancellationToken,
    inner: RwLock<TaskInner>,
}

impl Task {
    pub fn new(agent_id: &str, session_key: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            session_key: session_key.to_string(),
            created_at: now,
            cancel_token: CancellationToken::new(),
            inner: RwLock::new(TaskInner {
                state: TaskState::Pending,
                updated_at: now,
                cancelled: false,
            }),
        }
    }

    /// Transition to `to`. Ignored once the task is terminal.
    pub fn transition(&self, to: TaskState) {
        let mut inner = self.inner.write().expect("task lock poisoned");
        if inner.state.is_terminal() {
            return;
        }
        inner.state = to;
        inner.updated_at = Utc::now();
    }

    pub fn state(&self) -> TaskState {
        self.inner.read().expect("task lock poisoned").state
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.inner.read().expect("task lock poisoned").updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Mark cancelled. The loop observes the flag at its checkpoints;
    /// the token interrupts whatever is currently suspended.
    pub fn set_cancelled(&self) {
        {
            let mut inner = self.inner.write().expect("task lock poisoned");
            inner.cancelled = true;
        }
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.read().expect("task lock poisoned").cancelled
    }

    /// Cancellation scope derived per task; child scopes inherit it.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }
}
