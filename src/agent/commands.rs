use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::intent::{tier_level, CommandTier, ParsedCommand};
use crate::tools::ToolRequest;

use super::AgentLoop;

const DENY_OPERATOR: &str = "Access denied. Operator tier required.";
const DENY_ADMIN: &str = "Access denied. Admin tier required.";

impl AgentLoop {
    /// Serve a recognized messaging-channel admin command locally.
    pub(crate) async fn handle_channel_command(&self, cmd: ParsedCommand) -> String {
        match cmd.command.as_str() {
            "config" => self.handle_config_command(&cmd),
            "agents" => {
                if tier_level(cmd.tier) < tier_level(CommandTier::Operator) {
                    return DENY_OPERATOR.to_string();
                }
                self.format_agent_list()
            }
            "monitors" => {
                if tier_level(cmd.tier) < tier_level(CommandTier::Operator) {
                    return DENY_OPERATOR.to_string();
                }
                let mut out = String::from("HTTP: ");
                for m in &self.cfg.monitors.http {
                    out.push_str(&m.id);
                    out.push(' ');
                }
                out.push_str("\nProcess: ");
                for m in &self.cfg.monitors.process {
                    out.push_str(&m.id);
                    out.push(' ');
                }
                out
            }
            "audit" => {
                if tier_level(cmd.tier) < tier_level(CommandTier::Admin) {
                    return DENY_ADMIN.to_string();
                }
                match cmd.args.first() {
                    Some(task_id) => format!("Use: sypher audit show {}", task_id),
                    None => "Usage: audit <task_id>".to_string(),
                }
            }
            "status" => format!(
                "Agents: {}, Timeout: {}s",
                self.cfg.agents.list.len(),
                self.cfg.task.timeout_sec
            ),
            "cli" => self.handle_cli_command(&cmd.args).await,
            _ => String::new(),
        }
    }

    fn handle_config_command(&self, cmd: &ParsedCommand) -> String {
        let action = cmd.args.first().map(String::as_str).unwrap_or("");
        match action {
            "get" => {
                if tier_level(cmd.tier) < tier_level(CommandTier::Operator) {
                    return DENY_OPERATOR.to_string();
                }
                match cmd.args.get(1) {
                    Some(key) if key == "agents.list" => self.format_agent_list(),
                    Some(key) => format!("Config get: {}", key),
                    None => "Usage: config get <path>".to_string(),
                }
            }
            "set" => {
                if tier_level(cmd.tier) < tier_level(CommandTier::Admin) {
                    return DENY_ADMIN.to_string();
                }
                "Config set: use 'sypher config set <path> <value>' from the CLI".to_string()
            }
            _ => "Usage: config get <path> | config set <path> <value>".to_string(),
        }
    }

    fn format_agent_list(&self) -> String {
        if self.cfg.agents.list.is_empty() {
            return "No agents".to_string();
        }
        let mut out = String::new();
        for (i, agent) in self.cfg.agents.list.iter().enumerate() {
            out.push_str(&format!("{}: {}\n", i + 1, agent.id));
        }
        out
    }

    /// `cli list | cli new -m "tag" | cli run <id> <command> | cli <id> [--tail N]`
    pub(crate) async fn handle_cli_command(&self, args: &[String]) -> String {
        let Some(first) = args.first() else {
            return "Usage: cli list | cli new -m 'tag' | cli <N> [--tail N]".to_string();
        };

        match first.as_str() {
            "list" => {
                let sessions = self.cli_sessions.list();
                if sessions.is_empty() {
                    return "No active CLI sessions. Use 'cli new -m \"tag\"' to create one."
                        .to_string();
                }
                let now = chrono::Utc::now();
                let mut out = String::new();
                for s in sessions {
                    let age = now.signed_duration_since(s.last_activity);
                    let ago = if age.num_minutes() >= 1 {
                        format!("{}m ago", age.num_minutes())
                    } else {
                        "just now".to_string()
                    };
                    out.push_str(&format!("{}: {} (active {})\n", s.id, s.tag, ago));
                }
                out
            }
            "new" => {
                let tag = args
                    .iter()
                    .position(|a| a == "-m")
                    .and_then(|i| args.get(i + 1..))
                    .map(|rest| rest.join(" "))
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| "unnamed".to_string());
                let session = self.cli_sessions.create(&tag);
                format!("Created CLI session {}: {}", session.id, tag)
            }
            "run" => {
                if args.len() < 3 {
                    return "Usage: cli run <session_id> <command>".to_string();
                }
                let Ok(id) = args[1].parse::<u64>() else {
                    return "Invalid session ID".to_string();
                };
                let Some(session) = self.cli_sessions.get(id) else {
                    return format!("Session {} not found", id);
                };
                let command = args[2..].join(" ");

                let response = self
                    .registry
                    .dispatch(ToolRequest {
                        tool_call_id: "cli-run".to_string(),
                        task_id: format!("cli-{}", id),
                        agent_id: "main".to_string(),
                        name: "exec".to_string(),
                        args: json!({"command": command}),
                        cancel: CancellationToken::new(),
                    })
                    .await;

                let output = if response.is_error {
                    format!("Error: {}", response.for_llm)
                } else {
                    response.for_llm
                };
                session.append(&output);
                output
            }
            _ => {
                let Ok(id) = first.parse::<u64>() else {
                    return "Usage: cli <session_id> [--tail N]".to_string();
                };
                let Some(session) = self.cli_sessions.get(id) else {
                    return format!("Session {} not found. Use 'cli list' to see active sessions.", id);
                };
                let tail = args
                    .iter()
                    .position(|a| a == "--tail")
                    .and_then(|i| args.get(i + 1))
                    .and_then(|n| n.parse::<usize>().ok())
                    .unwrap_or(crate::cli_session::DEFAULT_TAIL_LINES);
                let out = session.tail(tail);
                if out.is_empty() {
                    format!("Session {} ({}): no output yet", id, session.tag)
                } else {
                    format!("Session {} ({}) last {} lines:\n{}", id, session.tag, tail.min(crate::cli_session::MAX_TAIL_LINES), out)
                }
            }
        }
    }
}
