use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::bus::{MessageBus, OutboundMessage};
use crate::config::{expand_path, AppConfig};

use super::fs_utils;
use super::message::MessageTool;
use super::{Tool, ToolErrorCode, ToolRequest, ToolResponse};

const LLM_TAIL_CAP: usize = 4096;

/// Minimal deny subset; the allowlist is the primary gate here.
static STREAM_DENY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\brm\s+-[rf]{1,2}\b",
        r"\bsudo\b",
        r"\|\s*sh\b",
        r"\|\s*bash\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("stream deny pattern"))
    .collect()
});

/// Runs a command and streams each output line as a separate outbound
/// message to the task's reply target. Only allowlisted command prefixes
/// are permitted; an empty allowlist permits nothing.
pub struct StreamCommandTool {
    bus: Arc<MessageBus>,
    message_tool: Arc<MessageTool>,
    workspace: PathBuf,
    restrict_to_workspace: bool,
    allowed_commands: Vec<String>,
    safe_mode: bool,
}

impl StreamCommandTool {
    pub fn new(
        cfg: &AppConfig,
        bus: Arc<MessageBus>,
        message_tool: Arc<MessageTool>,
        safe_mode: bool,
    ) -> Self {
        let workspace = {
            let ws = expand_path(&cfg.agents.defaults.workspace);
            if ws.is_empty() {
                std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
            } else {
                PathBuf::from(ws)
            }
        };
        Self {
            bus,
            message_tool,
            workspace,
            restrict_to_workspace: cfg.agents.defaults.restrict_to_workspace,
            allowed_commands: cfg.tools.live_monitoring.allowed_commands.clone(),
            safe_mode,
        }
    }

    fn is_command_allowed(&self, command: &str) -> bool {
        if self.allowed_commands.is_empty() {
            return false;
        }
        let command = command.trim();
        self.allowed_commands
            .iter()
            .any(|allowed| allowed == "*" || command.starts_with(allowed.as_str()))
    }
}

#[async_trait]
impl Tool for StreamCommandTool {
    fn name(&self) -> &'static str {
        "stream_command"
    }

    fn description(&self) -> &str {
        "Run a command and stream output to the user"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "stream_command",
            "description": "Run a command and stream output to the user. Only commands in live_monitoring.allowed_commands are permitted (e.g. npm run, go run, gemini).",
            "parameters": {
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Command to run" },
                    "working_dir": { "type": "string", "description": "Working directory (optional)" }
                },
                "required": ["command"]
            }
        })
    }

    async fn execute(&self, req: ToolRequest) -> ToolResponse {
        if self.safe_mode {
            return ToolResponse::error(
                &req.tool_call_id,
                "stream_command disabled in safe mode",
                "Stream command is disabled in safe mode.",
                ToolErrorCode::PermissionDenied,
                false,
            );
        }

        let command = match req.arg_str("command") {
            Some(c) if !c.is_empty() => c.to_string(),
            _ => {
                return ToolResponse::error(
                    &req.tool_call_id,
                    "Missing 'command' argument",
                    "Command is required.",
                    ToolErrorCode::PermissionDenied,
                    false,
                )
            }
        };

        if !self.is_command_allowed(&command) {
            return ToolResponse::error(
                &req.tool_call_id,
                "Command not in live_monitoring allowed list",
                "Command is not allowed for live streaming.",
                ToolErrorCode::PermissionDenied,
                false,
            );
        }

        for re in STREAM_DENY_PATTERNS.iter() {
            if re.is_match(&command) {
                return ToolResponse::error(
                    &req.tool_call_id,
                    "Command blocked by safety guard",
                    "Command was blocked for safety.",
                    ToolErrorCode::SafetyBlocked,
                    false,
                );
            }
        }

        let working_dir = {
            let dir = req.arg_str("working_dir").unwrap_or("");
            if dir.is_empty() {
                self.workspace.clone()
            } else {
                PathBuf::from(expand_path(dir))
            }
        };
        if self.restrict_to_workspace {
            let abs = fs_utils::lexical_clean(&working_dir);
            if fs_utils::escapes_root(&self.workspace, &abs) {
                return ToolResponse::error(
                    &req.tool_call_id,
                    "Working directory outside workspace",
                    "Command blocked: working directory outside allowed workspace.",
                    ToolErrorCode::PermissionDenied,
                    false,
                );
            }
        }

        let target = self
            .message_tool
            .reply_target(&req.task_id)
            .unwrap_or_else(|| super::message::ReplyTarget {
                channel: "cli".to_string(),
                chat_id: "default".to_string(),
            });

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = tokio::process::Command::new("cmd");
            c.arg("/c").arg(&command);
            c
        } else {
            let mut c = tokio::process::Command::new("sh");
            c.arg("-c").arg(&command);
            c
        };
        cmd.current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                return ToolResponse::error(
                    &req.tool_call_id,
                    &format!("Failed to start: {}", e),
                    "Command failed to start.",
                    ToolErrorCode::PermissionDenied,
                    false,
                )
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let buffer = Arc::new(Mutex::new(String::new()));

        let mut readers = Vec::new();
        if let Some(stdout) = stdout {
            let bus = self.bus.clone();
            let buffer = buffer.clone();
            let target = target.clone();
            readers.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let line = format!("{}\n", line);
                    buffer.lock().expect("stream buffer poisoned").push_str(&line);
                    bus.publish_outbound(OutboundMessage {
                        channel: target.channel.clone(),
                        chat_id: target.chat_id.clone(),
                        content: line,
                    });
                }
            }));
        }
        if let Some(stderr) = stderr {
            let bus = self.bus.clone();
            let buffer = buffer.clone();
            let target = target.clone();
            readers.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let line = format!("[stderr] {}\n", line);
                    buffer.lock().expect("stream buffer poisoned").push_str(&line);
                    bus.publish_outbound(OutboundMessage {
                        channel: target.channel.clone(),
                        chat_id: target.chat_id.clone(),
                        content: line,
                    });
                }
            }));
        }

        let status = tokio::select! {
            status = child.wait() => Some(status),
            _ = req.cancel.cancelled() => None,
        };
        let Some(status) = status else {
            let _ = child.start_kill();
            self.bus.publish_outbound(OutboundMessage {
                channel: target.channel.clone(),
                chat_id: target.chat_id.clone(),
                content: "\n[Command cancelled]".to_string(),
            });
            return ToolResponse::error(
                &req.tool_call_id,
                "Command cancelled",
                "Command was cancelled.",
                ToolErrorCode::Timeout,
                true,
            );
        };

        // Let the line readers drain before summarizing.
        for reader in readers {
            let _ = reader.await;
        }

        let exit_code = match status {
            Ok(s) => s.code().unwrap_or(-1),
            Err(_) => -1,
        };
        let summary = if exit_code == 0 {
            format!("Stream completed (exit {})", exit_code)
        } else {
            format!("Stream failed (exit {})", exit_code)
        };

        let out = buffer.lock().expect("stream buffer poisoned").clone();
        let for_llm = if out.len() > LLM_TAIL_CAP {
            let mut begin = out.len() - LLM_TAIL_CAP;
            while begin < out.len() && !out.is_char_boundary(begin) {
                begin += 1;
            }
            format!("{}\n\n... (truncated)", &out[begin..])
        } else {
            out
        };

        ToolResponse::success(&req.tool_call_id, for_llm, summary, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn setup(allowed: Vec<&str>, workspace: &std::path::Path) -> (StreamCommandTool, Arc<MessageBus>) {
        let bus = Arc::new(MessageBus::new(64));
        let message_tool = Arc::new(MessageTool::new(bus.clone(), false));
        let mut cfg = AppConfig::default();
        cfg.agents.defaults.workspace = workspace.to_string_lossy().into_owned();
        cfg.tools.live_monitoring.allowed_commands =
            allowed.into_iter().map(str::to_string).collect();
        (
            StreamCommandTool::new(&cfg, bus.clone(), message_tool, false),
            bus,
        )
    }

    fn request(command: &str) -> ToolRequest {
        ToolRequest {
            tool_call_id: "c1".into(),
            task_id: "t1".into(),
            agent_id: "main".into(),
            name: "stream_command".into(),
            args: json!({"command": command}),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn empty_allowlist_rejects_everything() {
        let ws = tempfile::tempdir().unwrap();
        let (tool, _bus) = setup(vec![], ws.path());
        let resp = tool.execute(request("echo hi")).await;
        assert!(resp.is_error);
        assert_eq!(resp.code, Some(ToolErrorCode::PermissionDenied));
        assert!(resp.for_llm.contains("allowed list"));
    }

    #[tokio::test]
    async fn prefix_allowlist_gates_commands() {
        let ws = tempfile::tempdir().unwrap();
        let (tool, _bus) = setup(vec!["npm run", "go run"], ws.path());
        let resp = tool.execute(request("python server.py")).await;
        assert!(resp.is_error);

        // Allowed prefix passes the gate (the command itself may fail to
        // start, which is a different error).
        let resp = tool.execute(request("go run nothing.go")).await;
        assert!(!resp.for_llm.contains("allowed list"));
    }

    #[tokio::test]
    async fn deny_subset_still_applies() {
        let ws = tempfile::tempdir().unwrap();
        let (tool, _bus) = setup(vec!["*"], ws.path());
        let resp = tool.execute(request("sudo npm run build")).await;
        assert!(resp.is_error);
        assert_eq!(resp.code, Some(ToolErrorCode::SafetyBlocked));
    }

    #[tokio::test]
    async fn streams_lines_and_returns_tail() {
        let ws = tempfile::tempdir().unwrap();
        let (tool, bus) = setup(vec!["*"], ws.path());
        let resp = tool.execute(request("echo one && echo two")).await;
        assert!(!resp.is_error, "{}", resp.for_llm);
        assert!(resp.for_llm.contains("one"));
        assert!(resp.for_llm.contains("two"));
        assert!(resp.for_user.contains("Stream completed"));

        let cancel = CancellationToken::new();
        let first = bus.consume_outbound(&cancel).await.unwrap();
        assert_eq!(first.content, "one\n");
        let second = bus.consume_outbound(&cancel).await.unwrap();
        assert_eq!(second.content, "two\n");
    }

    #[tokio::test]
    async fn stderr_lines_are_prefixed() {
        let ws = tempfile::tempdir().unwrap();
        let (tool, bus) = setup(vec!["*"], ws.path());
        let resp = tool.execute(request("echo oops 1>&2")).await;
        assert!(!resp.is_error);
        assert!(resp.for_llm.contains("[stderr] oops"));

        let cancel = CancellationToken::new();
        let line = bus.consume_outbound(&cancel).await.unwrap();
        assert_eq!(line.content, "[stderr] oops\n");
    }

    #[tokio::test]
    async fn nonzero_exit_reported() {
        let ws = tempfile::tempdir().unwrap();
        let (tool, _bus) = setup(vec!["*"], ws.path());
        let resp = tool.execute(request("exit 3")).await;
        assert!(!resp.is_error);
        assert!(resp.for_user.contains("Stream failed (exit 3)"));
    }

    #[tokio::test]
    async fn workspace_restriction_checks_working_dir() {
        let ws = tempfile::tempdir().unwrap();
        let (tool, _bus) = setup(vec!["*"], ws.path());
        let mut req = request("echo hi");
        req.args = json!({"command": "echo hi", "working_dir": "/etc"});
        let resp = tool.execute(req).await;
        assert!(resp.is_error);
        assert!(resp.for_llm.contains("outside workspace"));
    }
}
