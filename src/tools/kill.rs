use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::process::ProcessTracker;

use super::{Tool, ToolErrorCode, ToolRequest, ToolResponse};

/// Force-kill a process group (or the bare pid as fallback).
#[cfg(unix)]
fn send_sigkill(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let raw = pid as libc::pid_t;
    // Prefer signalling the process group (negative pid), fallback to direct pid.
    if unsafe { libc::kill(-raw, libc::SIGKILL) == 0 } {
        return true;
    }
    unsafe { libc::kill(raw, libc::SIGKILL) == 0 }
}

#[cfg(windows)]
fn send_sigkill(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Terminates a PID iff the process tracker certifies it was started by
/// the same task. Everything else is PERMISSION_DENIED.
pub struct KillTool {
    tracker: Arc<ProcessTracker>,
    safe_mode: bool,
}

impl KillTool {
    pub fn new(tracker: Arc<ProcessTracker>, safe_mode: bool) -> Self {
        Self { tracker, safe_mode }
    }
}

#[async_trait]
impl Tool for KillTool {
    fn name(&self) -> &'static str {
        "kill"
    }

    fn description(&self) -> &str {
        "Kill a process started for this task"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "kill",
            "description": "Kill a process started by Sypher for this task. Only PIDs from the exec tool can be killed.",
            "parameters": {
                "type": "object",
                "properties": {
                    "pid": { "type": "integer", "description": "Process ID to kill" }
                },
                "required": ["pid"]
            }
        })
    }

    async fn execute(&self, req: ToolRequest) -> ToolResponse {
        if self.safe_mode {
            return ToolResponse::error(
                &req.tool_call_id,
                "Kill disabled in safe mode",
                "Process killing is disabled in safe mode.",
                ToolErrorCode::PermissionDenied,
                false,
            );
        }

        // Accept integer or numeric-string pids.
        let pid = match req.args.get("pid") {
            Some(v) => match v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())) {
                Some(p) => p as u32,
                None => {
                    return ToolResponse::error(
                        &req.tool_call_id,
                        &format!("Invalid pid: {}", v),
                        "Invalid PID.",
                        ToolErrorCode::PermissionDenied,
                        false,
                    )
                }
            },
            None => {
                return ToolResponse::error(
                    &req.tool_call_id,
                    "Missing 'pid' argument",
                    "PID is required.",
                    ToolErrorCode::PermissionDenied,
                    false,
                )
            }
        };

        if !self.tracker.can_kill(&req.task_id, pid) {
            return ToolResponse::error(
                &req.tool_call_id,
                "PID not owned by this task - cannot kill",
                "Process not owned by this task.",
                ToolErrorCode::PermissionDenied,
                false,
            );
        }

        if !send_sigkill(pid) {
            return ToolResponse::error(
                &req.tool_call_id,
                &format!("Kill failed for pid {}", pid),
                "Kill failed.",
                ToolErrorCode::PermissionDenied,
                false,
            );
        }

        ToolResponse::success(
            &req.tool_call_id,
            format!("Process {} killed", pid),
            format!("Process {} killed.", pid),
            None,
        )
    }
}
