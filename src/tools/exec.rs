use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::audit::AuditLogger;
use crate::config::{expand_path, AppConfig};
use crate::process::ProcessTracker;

use super::fs_utils;
use super::{Tool, ToolErrorCode, ToolRequest, ToolResponse};

const MAX_COMMAND_BYTES: usize = 32 * 1024;
const LLM_OUTPUT_CAP: usize = 4096;

/// Built-in deny patterns: destructive removals, shutdown/reboot, shell
/// substitution and backtick constructs, pipes to shells, privilege and
/// package escalations, git push, ssh to hosts.
static DEFAULT_DENY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\brm\s+-[rf]{1,2}\b",
        r"\bdel\s+/[fq]\b",
        r"\brmdir\s+/s\b",
        r"\b(format|mkfs|diskpart)\b\s",
        r"\bdd\s+if=",
        r">\s*/dev/sd[a-z]\b",
        r"\b(shutdown|reboot|poweroff)\b",
        r":\(\)\s*\{.*\};\s*:",
        r"\$\([^)]+\)",
        r"\$\{[^}]+\}",
        r"`[^`]+`",
        r"\|\s*sh\b",
        r"\|\s*bash\b",
        r";\s*rm\s+-[rf]",
        r"&&\s*rm\s+-[rf]",
        r"\|\|\s*rm\s+-[rf]",
        r">\s*/dev/null\s*>&?\s*\d?",
        r"<<\s*EOF",
        r"\$\(\s*cat\s+",
        r"\$\(\s*curl\s+",
        r"\$\(\s*wget\s+",
        r"\$\(\s*which\s+",
        r"\bsudo\b",
        r"\bchmod\s+[0-7]{3,4}\b",
        r"\bchown\b",
        r"\bpkill\b",
        r"\bkillall\b",
        r"\bkill\s+-9\b",
        r"\bcurl\b.*\|\s*(sh|bash)",
        r"\bwget\b.*\|\s*(sh|bash)",
        r"\bnpm\s+install\s+-g\b",
        r"\bpip\s+install\s+--user\b",
        r"\bapt\s+(install|remove|purge)\b",
        r"\byum\s+(install|remove)\b",
        r"\bdnf\s+(install|remove)\b",
        r"\bdocker\s+run\b",
        r"\bdocker\s+exec\b",
        r"\bgit\s+push\b",
        r"\bgit\s+force\b",
        r"\bssh\b.*@",
        r"\beval\b",
        r"\bsource\s+.*\.sh\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("builtin deny pattern"))
    .collect()
});

const GIT_PUSH_PATTERNS: [&str; 2] = [r"\bgit\s+push\b", r"\bgit\s+force\b"];

/// Runs commands through the platform shell with safety guards, workspace
/// confinement, a wall-clock timeout, and audit logging.
pub struct ExecTool {
    workspace: PathBuf,
    timeout: Duration,
    deny_patterns: Vec<Regex>,
    restrict_to_workspace: bool,
    allow_dirs: Vec<PathBuf>,
    audit: Arc<AuditLogger>,
    tracker: Arc<ProcessTracker>,
    safe_mode: bool,
}

impl ExecTool {
    pub fn new(
        cfg: &AppConfig,
        audit: Arc<AuditLogger>,
        tracker: Arc<ProcessTracker>,
        safe_mode: bool,
    ) -> Self {
        let mut deny_patterns: Vec<Regex> = Vec::new();
        for pattern in &cfg.tools.exec.custom_deny_patterns {
            match Regex::new(pattern) {
                Ok(re) => deny_patterns.push(re),
                Err(e) => warn!("Skipping invalid custom deny pattern {:?}: {}", pattern, e),
            }
        }
        for re in DEFAULT_DENY_PATTERNS.iter() {
            if cfg.tools.exec.allow_git_push && GIT_PUSH_PATTERNS.contains(&re.as_str()) {
                continue;
            }
            deny_patterns.push(re.clone());
        }

        let allow_dirs = cfg
            .tools
            .exec
            .allow_dirs
            .iter()
            .map(|d| PathBuf::from(expand_path(d)))
            .collect();

        let timeout = if cfg.tools.exec.timeout_sec == 0 {
            Duration::from_secs(60)
        } else {
            Duration::from_secs(cfg.tools.exec.timeout_sec)
        };

        let workspace = {
            let ws = expand_path(&cfg.agents.defaults.workspace);
            if ws.is_empty() {
                std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
            } else {
                PathBuf::from(ws)
            }
        };

        Self {
            workspace,
            timeout,
            deny_patterns,
            restrict_to_workspace: cfg.agents.defaults.restrict_to_workspace,
            allow_dirs,
            audit,
            tracker,
            safe_mode,
        }
    }

    /// Validate working directory and path tokens in the command string.
    /// Returns an error message on violation, None when clean.
    fn guard_workspace_and_command(&self, working_dir: &Path, command: &str) -> Option<String> {
        let ws = fs_utils::lexical_clean(&self.workspace);

        // A filesystem-root workspace would allow the entire drive.
        if fs_utils::is_path_root(&ws) {
            return Some("Workspace cannot be a filesystem root (security)".to_string());
        }

        let cwd = fs_utils::lexical_clean(working_dir);
        let in_allow_dirs = self
            .allow_dirs
            .iter()
            .any(|d| !fs_utils::escapes_root(d, &cwd));
        if !in_allow_dirs && fs_utils::escapes_root(&ws, &cwd) {
            return Some("Working directory outside workspace".to_string());
        }

        // Path traversal in the command string itself.
        if command.contains("../") || command.contains("..\\") {
            return Some("Command blocked by safety guard (path traversal detected)".to_string());
        }

        // Absolute path tokens must resolve under the effective working
        // directory; /dev/null and friends are exempt.
        for raw in fs_utils::absolute_path_tokens(command) {
            if raw == "/dev/null" || raw.starts_with("/dev/") {
                continue;
            }
            let p = fs_utils::lexical_clean(Path::new(raw));
            if fs_utils::escapes_root(&cwd, &p) {
                return Some("Command blocked by safety guard (path outside working dir)".to_string());
            }
        }

        None
    }

    fn shell_command(command: &str) -> tokio::process::Command {
        if cfg!(target_os = "windows") {
            let mut cmd = tokio::process::Command::new("cmd");
            cmd.arg("/c").arg(command);
            cmd
        } else {
            let mut cmd = tokio::process::Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        }
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &'static str {
        "exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its output"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "exec",
            "description": "Execute a shell command and return its output. Commands run in the workspace. Use platform-appropriate syntax (Windows: cmd; Linux/macOS: sh). See runtime context in system prompt.",
            "parameters": {
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "The shell command to run" },
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
                "Exec disabled in safe mode",
                "Command execution is disabled in safe mode.",
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
        if command.len() > MAX_COMMAND_BYTES {
            return ToolResponse::error(
                &req.tool_call_id,
                "Command too long (max 32KB)",
                "Command exceeds maximum length.",
                ToolErrorCode::PermissionDenied,
                false,
            );
        }

        let working_dir = {
            let dir = req.arg_str("working_dir").unwrap_or("");
            if dir.is_empty() {
                self.workspace.clone()
            } else {
                PathBuf::from(expand_path(dir))
            }
        };

        for re in &self.deny_patterns {
            if re.is_match(&command) {
                return ToolResponse::error(
                    &req.tool_call_id,
                    "Command blocked by safety guard (dangerous pattern detected)",
                    "Command was blocked for safety.",
                    ToolErrorCode::SafetyBlocked,
                    false,
                );
            }
        }

        if self.restrict_to_workspace {
            if let Some(msg) = self.guard_workspace_and_command(&working_dir, &command) {
                return ToolResponse::error(
                    &req.tool_call_id,
                    &msg,
                    "Command blocked: path or working directory outside allowed workspace.",
                    ToolErrorCode::PermissionDenied,
                    false,
                );
            }
        }

        let mut cmd = Self::shell_command(&command);
        cmd.current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
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

        if let Some(pid) = child.id() {
            self.tracker.record(&req.task_id, pid);
        }

        // Dropping the in-flight wait future kills the child
        // (kill_on_drop), so timeout and cancel both reap the process.
        let output = tokio::select! {
            out = child.wait_with_output() => out,
            _ = tokio::time::sleep(self.timeout) => {
                return ToolResponse::error(
                    &req.tool_call_id,
                    "Command timed out",
                    "Command timed out.",
                    ToolErrorCode::Timeout,
                    true,
                );
            }
            _ = req.cancel.cancelled() => {
                return ToolResponse::error(
                    &req.tool_call_id,
                    "Command cancelled",
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
                    &format!("Command failed: {}", e),
                    "Command failed.",
                    ToolErrorCode::PermissionDenied,
                    false,
                )
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let mut merged = String::from_utf8_lossy(&output.stdout).into_owned();
        merged.push_str(&String::from_utf8_lossy(&output.stderr));

        if let Err(e) = self.audit.log_command(
            &req.task_id,
            &req.tool_call_id,
            &command,
            &working_dir.to_string_lossy(),
            exit_code,
            &merged,
        ) {
            debug!("Audit write failed: {}", e);
        }

        let for_llm = if merged.len() > LLM_OUTPUT_CAP {
            let mut end = LLM_OUTPUT_CAP;
            while end > 0 && !merged.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}\n\n... (truncated)", &merged[..end])
        } else {
            merged
        };
        let for_user = if exit_code == 0 {
            format!("Exit code: {}", exit_code)
        } else {
            format!("Command failed (exit {})", exit_code)
        };
        let audit_ref = Some(format!("audit/{}.log", req.task_id));

        ToolResponse::success(&req.tool_call_id, for_llm, for_user, audit_ref)
    }
}
