use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::{expand_path, PoliciesConfig};

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Evaluates file-scope, network-scope, and per-(agent, tool) rate-limit
/// policies. Policy rules are an immutable snapshot taken at construction;
/// dynamic reload goes through `reload`, never shared mutable config.
pub struct PolicyEvaluator {
    inner: Mutex<PolicyState>,
}

struct PolicyState {
    policies: PoliciesConfig,
    workspace: String,
    rates: HashMap<String, Vec<Instant>>,
}

impl PolicyEvaluator {
    pub fn new(policies: PoliciesConfig, workspace: &str) -> Self {
        Self {
            inner: Mutex::new(PolicyState {
                policies,
                workspace: expand_path(workspace),
                rates: HashMap::new(),
            }),
        }
    }

    /// Swap in a new policy snapshot. Sliding windows survive the reload.
    #[allow(dead_code)]
    pub fn reload(&self, policies: PoliciesConfig, workspace: &str) {
        let mut inner = self.inner.lock().expect("policy lock poisoned");
        inner.policies = policies;
        inner.workspace = expand_path(workspace);
    }

    /// True if the agent may access `path` at the given level
    /// ("read", "write", or "read_write"). Workspace-rooted paths are
    /// always allowed; anything else needs a matching file policy.
    pub fn can_access_file(&self, agent_id: &str, path: &str, access: &str) -> bool {
        let inner = self.inner.lock().expect("policy lock poisoned");
        let expanded = expand_path(path);
        let abs = lexical_absolute(&expanded);

        if !inner.workspace.is_empty() {
            let ws = lexical_absolute(&inner.workspace);
            if abs == ws || abs.starts_with(&format!("{}/", ws.trim_end_matches('/'))) {
                return true;
            }
        }

        for policy in &inner.policies.files {
            let prefix = expand_path(policy.path.trim_end_matches("/**"));
            let prefix_abs = lexical_absolute(&prefix);
            let matched = abs == prefix_abs
                || abs.starts_with(&format!("{}/", prefix_abs.trim_end_matches('/')))
                || glob_match(&prefix, &abs);
            if !matched {
                continue;
            }
            for aid in &policy.agent_ids {
                if aid == "*" || aid == agent_id {
                    match policy.access.as_str() {
                        "read_write" => return true,
                        "read" => return access == "read",
                        "write" => return access == "write",
                        _ => {}
                    }
                }
            }
        }
        false
    }

    /// True if the agent may reach `host`. No network policies at all is
    /// permissive; otherwise a matching rule must allow the host and no
    /// deny glob may match.
    pub fn can_access_network(&self, agent_id: &str, host: &str) -> bool {
        let inner = self.inner.lock().expect("policy lock poisoned");
        if inner.policies.network.is_empty() {
            return true;
        }
        for rule in &inner.policies.network {
            let agent_match = rule
                .agent_ids
                .iter()
                .any(|aid| aid == "*" || aid == agent_id);
            if !agent_match {
                continue;
            }
            if rule.deny_domains.iter().any(|d| glob_match(d, host)) {
                return false;
            }
            if rule
                .allow_domains
                .iter()
                .any(|a| a == "*" || glob_match(a, host))
            {
                return true;
            }
        }
        false
    }

    /// Sliding one-minute window per (agent, tool). The first matching
    /// rule decides; no matching rule means unlimited. Returns true when
    /// the request is admitted (and counts it).
    pub fn check_rate_limit(&self, agent_id: &str, tool_name: &str) -> bool {
        let mut inner = self.inner.lock().expect("policy lock poisoned");
        let rule = inner.policies.rate_limits.iter().find(|rl| {
            rl.requests_per_minute > 0
                && (rl.agent_id == "*" || rl.agent_id == agent_id)
                && (rl.tool_name == "*" || rl.tool_name == tool_name)
        });
        let limit = match rule {
            Some(rl) => rl.requests_per_minute,
            None => return true,
        };

        let key = format!("{}:{}", agent_id, tool_name);
        let now = Instant::now();
        let window = inner.rates.entry(key).or_default();
        window.retain(|ts| now.duration_since(*ts) < RATE_WINDOW);
        if window.len() >= limit {
            return false;
        }
        window.push(now);
        true
    }
}

/// Lexically absolutize a path without touching the filesystem.
fn lexical_absolute(path: &str) -> String {
    let p = Path::new(path);
    let joined = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| ".".into())
            .join(p)
    };
    crate::tools::fs_utils::lexical_clean(&joined)
        .to_string_lossy()
        .into_owned()
}

/// Minimal `*`-glob match (single wildcard segment, like filepath.Match
/// used for domain and path patterns).
fn glob_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return pattern == value;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut rest = value;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(idx) => {
                // First literal must anchor at the start; last must anchor at the end.
                if i == 0 && idx != 0 {
                    return false;
                }
                rest = &rest[idx + part.len()..];
            }
            None => return false,
        }
    }
    if let Some(last) = parts.last() {
        if !last.is_empty() && !value.ends_with(last) {
            return false;
        }
    }
    true
}
