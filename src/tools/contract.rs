use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// The standard tool request schema shared by every tool.
#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub tool_call_id: String,
    pub task_id: String,
    pub agent_id: String,
    pub name: String,
    pub args: Value,
    /// Cancellation scope inherited from the task; child processes and
    /// network calls must stop when it fires.
    pub cancel: CancellationToken,
}

impl ToolRequest {
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(|v| v.as_str())
    }

    pub fn arg_u64(&self, key: &str) -> Option<u64> {
        self.args.get(key).and_then(|v| v.as_u64())
    }
}

/// Error classification for tool responses. Errors are classified by
/// kind, not by type; an empty code means success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorCode {
    SafetyBlocked,
    Timeout,
    RateLimited,
    PermissionDenied,
}

impl ToolErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolErrorCode::SafetyBlocked => "SAFETY_BLOCKED",
            ToolErrorCode::Timeout => "TIMEOUT",
            ToolErrorCode::RateLimited => "RATE_LIMITED",
            ToolErrorCode::PermissionDenied => "PERMISSION_DENIED",
        }
    }
}

impl std::fmt::Display for ToolErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The standard tool response schema: one payload for the model, one for
/// the user, plus error classification.
#[derive(Debug, Clone)]
pub struct ToolResponse {
    pub tool_call_id: String,
    pub for_llm: String,
    pub for_user: String,
    pub is_error: bool,
    pub code: Option<ToolErrorCode>,
    pub retriable: bool,
    pub audit_ref: Option<String>,
}

impl ToolResponse {
    pub fn success(
        tool_call_id: &str,
        for_llm: impl Into<String>,
        for_user: impl Into<String>,
        audit_ref: Option<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.to_string(),
            for_llm: for_llm.into(),
            for_user: for_user.into(),
            is_error: false,
            code: None,
            retriable: false,
            audit_ref,
        }
    }

    pub fn error(
        tool_call_id: &str,
        for_llm: impl Into<String>,
        for_user: impl Into<String>,
        code: ToolErrorCode,
        retriable: bool,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.to_string(),
            for_llm: for_llm.into(),
            for_user: for_user.into(),
            is_error: true,
            code: Some(code),
            retriable,
            audit_ref: None,
        }
    }
}
