use std::path::Path;

use crate::config::{expand_path, AppConfig};
use crate::platform;

/// Bootstrap documents loaded in order and injected into the system prompt.
const BOOTSTRAP_FILES: [&str; 5] = ["AGENTS.md", "AGENT.md", "SOUL.md", "USER.md", "IDENTITY.md"];

/// Non-overridable safety rules appended after the bootstrap documents.
const HARD_RULES: &str = "## Hard Rules (non-overridable)\n\
- ALWAYS use tools for actions; never pretend to execute\n\
- Be helpful and accurate\n\
- Use memory file for persistent info\n\
- For messaging channels (WhatsApp, etc.): send ONE consolidated reply per user message; avoid calling the message tool multiple times in one turn";

/// Load workspace bootstrap files and return their concatenated content.
/// A per-agent workspace (`workspace-<id>` next to the default) wins when
/// it exists.
pub fn load_bootstrap_files(workspace: &str, agent_id: &str) -> String {
    let base = expand_path(workspace);
    if base.is_empty() {
        return String::new();
    }
    let base = Path::new(&base);

    let agent_workspace = base
        .parent()
        .map(|parent| parent.join(format!("workspace-{}", agent_id)))
        .filter(|p| p.exists())
        .unwrap_or_else(|| base.to_path_buf());

    let mut parts = Vec::new();
    for name in BOOTSTRAP_FILES {
        let path = agent_workspace.join(name);
        if let Ok(content) = std::fs::read_to_string(&path) {
            parts.push(content);
        }
    }
    parts.join("\n\n").trim().to_string()
}

/// Assemble the system prompt: bootstrap documents, platform runtime
/// hint, then the hard rules.
pub fn build_system_prompt(cfg: &AppConfig, agent_id: &str) -> String {
    let workspace = cfg.agent_workspace(agent_id);
    let bootstrap = load_bootstrap_files(&workspace, agent_id);

    let mut parts = Vec::new();
    if bootstrap.is_empty() {
        parts.push("You are Sypher, a coding-centric AI assistant.".to_string());
    } else {
        parts.push(bootstrap);
    }
    parts.push(platform::agent_context().to_string());
    parts.push(HARD_RULES.to_string());
    parts.join("\n\n")
}
