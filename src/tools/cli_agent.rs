use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::{expand_path, AppConfig};

use super::{Tool, ToolErrorCode, ToolRequest, ToolResponse};

const CLI_AGENT_TIMEOUT: Duration = Duration::from_secs(120);
const LLM_OUTPUT_CAP: usize = 8192;

/// Invokes a configured external CLI agent (e.g. a gemini binary) with
/// the task prompt appended as the final argument.
pub struct InvokeCliAgentTool {
    agents: Vec<CliAgentSpec>,
    workspace: PathBuf,
    safe_mode: bool,
}

#[derive(Clone)]
struct CliAgentSpec {
    id: String,
    command: String,
    args: Vec<String>,
}

impl InvokeCliAgentTool {
    pub fn new(cfg: &AppConfig, safe_mode: bool) -> Self {
        let agents = cfg
            .agents
            .list
            .iter()
            .filter_map(|a| {
                a.command.as_ref().map(|command| CliAgentSpec {
                    id: a.id.clone(),
                    command: command.clone(),
                    args: a.args.clone(),
                })
            })
            .collect();
        let workspace = {
            let ws = expand_path(&cfg.agents.defaults.workspace);
            if ws.is_empty() {
                std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
            } else {
                PathBuf::from(ws)
            }
        };
        Self {
            agents,
            workspace,
            safe_mode,
        }
    }

    /// Resolve by id, or the first agent with a command when no id given.
    fn resolve(&self, agent_id: &str) -> Option<&CliAgentSpec> {
        if agent_id.is_empty() {
            return self.agents.first();
        }
        self.agents.iter().find(|a| a.id == agent_id)
    }
}

#[async_trait]
impl Tool for InvokeCliAgentTool {
    fn name(&self) -> &'static str {
        "invoke_cli_agent"
    }

    fn description(&self) -> &str {
        "Invoke a configured CLI agent with a task"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "invoke_cli_agent",
            "description": "Invoke a configured CLI agent (e.g. Gemini CLI) with a task. Use for code generation when an agent with command/args is configured.",
            "parameters": {
                "type": "object",
                "properties": {
                    "task": { "type": "string", "description": "Task/prompt for the CLI agent" },
                    "agent_id": { "type": "string", "description": "Agent ID to use (optional; uses first agent with command/args if omitted)" },
                    "working_dir": { "type": "string", "description": "Working directory (optional)" }
                },
                "required": ["task"]
            }
        })
    }

    async fn execute(&self, req: ToolRequest) -> ToolResponse {
        if self.safe_mode {
            return ToolResponse::error(
                &req.tool_call_id,
                "invoke_cli_agent disabled in safe mode",
                "CLI agent invocation is disabled in safe mode.",
                ToolErrorCode::PermissionDenied,
                false,
            );
        }

        let task = match req.arg_str("task") {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => {
                return ToolResponse::error(
                    &req.tool_call_id,
                    "Missing 'task' argument",
                    "Task is required.",
                    ToolErrorCode::PermissionDenied,
                    false,
                )
            }
        };

        let agent_id = req.arg_str("agent_id").unwrap_or("");
        let spec = match self.resolve(agent_id) {
            Some(s) => s.clone(),
            None => {
                return ToolResponse::error(
                    &req.tool_call_id,
                    "No CLI agent configured",
                    "No agent with command/args found. Add an agent with command (e.g. gemini) and args in config.",
                    ToolErrorCode::PermissionDenied,
                    false,
                )
            }
        };

        let working_dir = {
            let dir = req.arg_str("working_dir").unwrap_or("");
            if dir.is_empty() {
                self.workspace.clone()
            } else {
                PathBuf::from(expand_path(dir))
            }
        };

        // The prompt rides as the final argument.
        let mut args = spec.args.clone();
        args.push(task);

        let mut cmd = tokio::process::Command::new(&spec.command);
        cmd.args(&args)
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                return ToolResponse::error(
                    &req.tool_call_id,
                    &format!("Failed to start CLI agent {}: {}", spec.id, e),
                    "CLI agent failed to start.",
                    ToolErrorCode::PermissionDenied,
                    false,
                )
            }
        };

        let output = tokio::select! {
            out = child.wait_with_output() => out,
            _ = tokio::time::sleep(CLI_AGENT_TIMEOUT) => {
                return ToolResponse::error(
                    &req.tool_call_id,
                    "CLI agent timed out",
                    "Command timed out.",
                    ToolErrorCode::Timeout,
                    true,
                );
            }
            _ = req.cancel.cancelled() => {
                return ToolResponse::error(
                    &req.tool_call_id,
                    "CLI agent cancelled",
                    "Command was cancelled.",
                    ToolErrorCode::Timeout,
                    true,
                );
            }
        };

        let output = match output {
            Ok(o) => o,
            Err(e) => {
                return ToolResponse::error(
                    &req.tool_call_id,
                    &format!("CLI agent failed: {}", e),
                    "CLI agent failed.",
                    ToolErrorCode::PermissionDenied,
                    false,
                )
            }
        };

        let mut merged = String::from_utf8_lossy(&output.stdout).into_owned();
        merged.push_str(&String::from_utf8_lossy(&output.stderr));
        if merged.len() > LLM_OUTPUT_CAP {
            let mut end = LLM_OUTPUT_CAP;
            while end > 0 && !merged.is_char_boundary(end) {
                end -= 1;
            }
            merged = format!("{}\n\n... (truncated)", &merged[..end]);
        }

        if !output.status.success() {
            merged.push_str(&format!("\nExit code: {}", output.status.code().unwrap_or(-1)));
            return ToolResponse::success(
                &req.tool_call_id,
                merged,
                format!("CLI agent exited with error: {}", output.status),
                None,
            );
        }

        ToolResponse::success(&req.tool_call_id, merged, "CLI agent completed", None)
    }
}
