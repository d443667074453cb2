use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Full daemon configuration, loaded from `~/.sypherd/config.json`.
///
/// A missing file yields `AppConfig::default()`; a file that exists but
/// fails to parse is a fatal startup error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub bindings: Vec<AgentBinding>,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub task: TaskConfig,
    #[serde(default)]
    pub deployment: DeploymentConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub policies: PoliciesConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub monitors: MonitorsConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agents: AgentsConfig::default(),
            bindings: vec![AgentBinding {
                agent_id: "main".into(),
                matcher: BindingMatch {
                    channel: "whatsapp".into(),
                    account_id: "*".into(),
                    peer: None,
                },
            }],
            channels: ChannelsConfig::default(),
            providers: ProvidersConfig::default(),
            task: TaskConfig::default(),
            deployment: DeploymentConfig::default(),
            gateway: GatewayConfig::default(),
            tools: ToolsConfig::default(),
            audit: AuditConfig::default(),
            policies: PoliciesConfig::default(),
            context: ContextConfig::default(),
            monitors: MonitorsConfig::default(),
            replay: ReplayConfig::default(),
            idempotency: IdempotencyConfig::default(),
            checkpoint: CheckpointConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default)]
    pub defaults: AgentDefaults,
    #[serde(default)]
    pub list: Vec<AgentConfig>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            defaults: AgentDefaults::default(),
            list: vec![AgentConfig {
                id: "main".into(),
                default: true,
                name: Some("Sypher".into()),
                workspace: None,
                command: None,
                args: Vec::new(),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefaults {
    #[serde(default = "default_workspace")]
    pub workspace: String,
    #[serde(default = "default_restrict_to_workspace")]
    pub restrict_to_workspace: bool,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            restrict_to_workspace: default_restrict_to_workspace(),
            model: default_model(),
            max_tool_iterations: default_max_tool_iterations(),
        }
    }
}

fn default_workspace() -> String {
    home_subdir("workspace")
}
fn default_restrict_to_workspace() -> bool {
    true
}
fn default_model() -> String {
    "cerebras/llama-3.1-70b".to_string()
}
fn default_max_tool_iterations() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// External CLI agent executable (used by invoke_cli_agent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerMatch {
    pub kind: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingMatch {
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<PeerMatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBinding {
    pub agent_id: String,
    #[serde(rename = "match")]
    pub matcher: BindingMatch,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allow_from: Vec<String>,
    #[serde(default)]
    pub operators: Vec<String>,
    #[serde(default)]
    pub admins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_routing_strategy")]
    pub routing_strategy: String,
    #[serde(default)]
    pub llm_rate_limit: LlmRateLimitConfig,
    #[serde(default)]
    pub cerebras: ProviderConfig,
    #[serde(default)]
    pub openai: ProviderConfig,
    #[serde(default)]
    pub anthropic: ProviderConfig,
    #[serde(default)]
    pub gemini: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            routing_strategy: default_routing_strategy(),
            llm_rate_limit: LlmRateLimitConfig::default(),
            cerebras: ProviderConfig::default(),
            openai: ProviderConfig::default(),
            anthropic: ProviderConfig::default(),
            gemini: ProviderConfig::default(),
        }
    }
}

fn default_routing_strategy() -> String {
    "cheap_first".to_string()
}

/// Global ceiling on outbound LLM calls, e.g. 2 per 15 seconds.
/// Zero values fall back to the built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmRateLimitConfig {
    #[serde(default)]
    pub max_per_window: usize,
    #[serde(default)]
    pub window_sec: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default = "default_task_timeout_sec")]
    pub timeout_sec: u64,
    #[serde(default = "default_retry_max")]
    pub retry_max: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            timeout_sec: default_task_timeout_sec(),
            retry_max: default_retry_max(),
        }
    }
}

fn default_task_timeout_sec() -> u64 {
    300
}
fn default_retry_max() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default = "default_deployment_mode")]
    pub mode: String,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            mode: default_deployment_mode(),
        }
    }
}

fn default_deployment_mode() -> String {
    "local_dev".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// e.g. "127.0.0.1:18790" (default) or "0.0.0.0:18790".
    #[serde(default)]
    pub bind: String,
    /// If set, /inbound requires the X-Sypher-Inbound-Secret header.
    #[serde(default)]
    pub inbound_secret: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub exec: ExecToolConfig,
    #[serde(default)]
    pub live_monitoring: LiveMonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecToolConfig {
    #[serde(default)]
    pub custom_deny_patterns: Vec<String>,
    #[serde(default = "default_exec_timeout_sec")]
    pub timeout_sec: u64,
    #[serde(default)]
    pub allow_git_push: bool,
    #[serde(default)]
    pub allow_dirs: Vec<String>,
}

impl Default for ExecToolConfig {
    fn default() -> Self {
        Self {
            custom_deny_patterns: Vec::new(),
            timeout_sec: default_exec_timeout_sec(),
            allow_git_push: false,
            allow_dirs: Vec::new(),
        }
    }
}

fn default_exec_timeout_sec() -> u64 {
    60
}

/// Config for tail_output and stream_command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiveMonitoringConfig {
    #[serde(default)]
    pub allowed_commands: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_dir")]
    pub dir: String,
    #[serde(default = "default_audit_retention_days")]
    pub retention_days: u32,
    /// Integrity scheme for audit logs; algorithm selection is external.
    #[serde(default = "default_audit_integrity")]
    pub integrity: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            dir: default_audit_dir(),
            retention_days: default_audit_retention_days(),
            integrity: default_audit_integrity(),
        }
    }
}

fn default_audit_dir() -> String {
    home_subdir("audit")
}
fn default_audit_retention_days() -> u32 {
    30
}
fn default_audit_integrity() -> String {
    "none".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoliciesConfig {
    #[serde(default)]
    pub files: Vec<FilePolicy>,
    #[serde(default)]
    pub network: Vec<NetPolicy>,
    #[serde(default)]
    pub rate_limits: Vec<RateLimitPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePolicy {
    pub path: String,
    pub agent_ids: Vec<String>,
    /// One of "read", "write", "read_write".
    pub access: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetPolicy {
    pub agent_ids: Vec<String>,
    #[serde(default)]
    pub allow_domains: Vec<String>,
    #[serde(default)]
    pub deny_domains: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub agent_id: String,
    pub tool_name: String,
    pub requests_per_minute: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_context_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_summarize_threshold")]
    pub summarize_threshold: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_context_max_tokens(),
            summarize_threshold: default_summarize_threshold(),
        }
    }
}

fn default_context_max_tokens() -> usize {
    8192
}
fn default_summarize_threshold() -> usize {
    6000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorsConfig {
    #[serde(default)]
    pub http: Vec<HttpMonitor>,
    #[serde(default)]
    pub process: Vec<ProcessMonitor>,
}

/// Monitor definitions are configuration only; the monitor daemons
/// themselves run outside this runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpMonitor {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub interval_sec: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessMonitor {
    pub id: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    #[serde(default = "default_idempotency_enabled")]
    pub enabled: bool,
    #[serde(default = "default_idempotency_ttl_sec")]
    pub ttl_sec: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            enabled: default_idempotency_enabled(),
            ttl_sec: default_idempotency_ttl_sec(),
        }
    }
}

fn default_idempotency_enabled() -> bool {
    true
}
fn default_idempotency_ttl_sec() -> u64 {
    60
}

/// Advisory crash-recovery checkpoints; disabled when dir is empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default)]
    pub dir: String,
}

fn home_subdir(name: &str) -> String {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".sypherd")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

/// Path to the per-user config file.
pub fn config_path() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".sypherd").join("config.json")
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_path(p: &str) -> String {
    if p.is_empty() {
        return p.to_string();
    }
    shellexpand::tilde(p).into_owned()
}

impl AppConfig {
    /// Load config from `path`. Missing file yields defaults; a present
    /// but unparseable file is an error (startup treats it as fatal).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                return Ok(cfg);
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {}", path.display(), e)),
        };

        let mut cfg: AppConfig = serde_json::from_str(&data)
            .map_err(|e| anyhow::anyhow!("parse config {}: {}", path.display(), e))?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SYPHER_MINI_MODE") {
            if !v.is_empty() {
                self.deployment.mode = v;
            }
        }
        if let Ok(v) = std::env::var("SYPHER_INBOUND_SECRET") {
            if !v.is_empty() {
                self.gateway.inbound_secret = v;
            }
        }
        if let Ok(v) = std::env::var("SYPHER_GATEWAY_BIND") {
            if !v.is_empty() {
                self.gateway.bind = v;
            }
        }
        // GEMINI_MODEL overrides the default model when a Gemini key is
        // available; the internal tag carries the provider prefix.
        let gemini_key_present = !std::env::var("GEMINI_API_KEY").unwrap_or_default().is_empty()
            || !self.providers.gemini.api_key.is_empty();
        if gemini_key_present {
            if let Ok(v) = std::env::var("GEMINI_MODEL") {
                if !v.is_empty() {
                    self.agents.defaults.model = format!("gemini/{}", v);
                }
            }
        }
    }

    /// Save config as pretty-printed JSON (0600 on unix).
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }
        Ok(())
    }

    /// Look up a configured agent by id (case-insensitive).
    pub fn find_agent(&self, id: &str) -> Option<&AgentConfig> {
        self.agents
            .list
            .iter()
            .find(|a| a.id.eq_ignore_ascii_case(id))
    }

    /// Resolve the workspace for an agent, falling back to defaults.
    pub fn agent_workspace(&self, agent_id: &str) -> String {
        let ws = self
            .find_agent(agent_id)
            .and_then(|a| a.workspace.clone())
            .unwrap_or_else(|| self.agents.defaults.workspace.clone());
        expand_path(&ws)
    }

    /// Labels attached to events and replay records.
    #[allow(dead_code)]
    pub fn deployment_labels(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("mode".to_string(), self.deployment.mode.clone());
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.task.timeout_sec, 300);
        assert_eq!(cfg.task.retry_max, 2);
        assert_eq!(cfg.agents.defaults.max_tool_iterations, 20);
        assert!(cfg.agents.defaults.restrict_to_workspace);
        assert_eq!(cfg.providers.routing_strategy, "cheap_first");
        assert_eq!(cfg.idempotency.ttl_sec, 60);
        assert!(cfg.idempotency.enabled);
        assert_eq!(cfg.tools.exec.timeout_sec, 60);
    }

    #[test]
    fn parse_partial_config() {
        let json = r#"{
            "task": { "timeout_sec": 42 },
            "policies": {
                "rate_limits": [
                    { "agent_id": "*", "tool_name": "exec", "requests_per_minute": 2 }
                ]
            }
        }"#;
        let cfg: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.task.timeout_sec, 42);
        assert_eq!(cfg.task.retry_max, 2); // default fills in
        assert_eq!(cfg.policies.rate_limits.len(), 1);
        assert_eq!(cfg.policies.rate_limits[0].requests_per_minute, 2);
    }

    #[test]
    fn parse_error_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = AppConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("parse config"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(cfg.deployment.mode, "local_dev");
    }

    #[test]
    fn binding_match_field_renamed() {
        let json = r#"{
            "bindings": [
                { "agent_id": "dev", "match": { "channel": "whatsapp", "account_id": "123" } }
            ]
        }"#;
        let cfg: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.bindings[0].agent_id, "dev");
        assert_eq!(cfg.bindings[0].matcher.account_id, "123");
    }

    #[test]
    fn expand_path_tilde() {
        let expanded = expand_path("~/x");
        assert!(!expanded.starts_with('~'));
        assert!(expanded.ends_with('x'));
        assert_eq!(expand_path(""), "");
        assert_eq!(expand_path("/abs/path"), "/abs/path");
    }
}
