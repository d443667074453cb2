use crate::config::{AgentBinding, AppConfig, PeerMatch};

pub const DEFAULT_AGENT_ID: &str = "main";

/// Routing context extracted from an inbound message.
#[derive(Debug, Default)]
pub struct RouteInput<'a> {
    pub channel: &'a str,
    pub account_id: &'a str,
    pub peer: Option<&'a PeerMatch>,
}

/// The agent identity picked for a message, plus the derived session key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub agent_id: String,
    pub session_key: String,
    pub matched_by: &'static str,
}

/// Pick an agent by longest-prefix binding match:
/// peer binding > account binding > channel wildcard > default agent.
pub fn resolve(cfg: &AppConfig, input: RouteInput<'_>) -> ResolvedRoute {
    let channel = input.channel.trim().to_lowercase();
    let account_id = {
        let a = input.account_id.trim();
        if a.is_empty() {
            "default"
        } else {
            a
        }
    };

    let bindings: Vec<&AgentBinding> = cfg
        .bindings
        .iter()
        .filter(|b| {
            let mc = b.matcher.channel.trim().to_lowercase();
            mc.is_empty() || mc == channel
        })
        .collect();

    if let Some(peer) = input.peer {
        if !peer.id.trim().is_empty() {
            if let Some(b) = bindings.iter().find(|b| {
                b.matcher
                    .peer
                    .as_ref()
                    .map(|p| p.kind.eq_ignore_ascii_case(&peer.kind) && p.id == peer.id)
                    .unwrap_or(false)
            }) {
                let agent_id = pick_agent_id(cfg, &b.agent_id);
                return ResolvedRoute {
                    session_key: session_key(&agent_id, &channel, account_id, Some(peer)),
                    agent_id,
                    matched_by: "binding.peer",
                };
            }
        }
    }

    if account_id != "default" {
        if let Some(b) = bindings.iter().find(|b| {
            b.matcher.peer.is_none()
                && b.matcher.account_id != "*"
                && b.matcher.account_id.eq_ignore_ascii_case(account_id)
        }) {
            let agent_id = pick_agent_id(cfg, &b.agent_id);
            return ResolvedRoute {
                session_key: session_key(&agent_id, &channel, account_id, input.peer),
                agent_id,
                matched_by: "binding.account",
            };
        }
    }

    if let Some(b) = bindings
        .iter()
        .find(|b| b.matcher.peer.is_none() && b.matcher.account_id == "*")
    {
        let agent_id = pick_agent_id(cfg, &b.agent_id);
        return ResolvedRoute {
            session_key: session_key(&agent_id, &channel, account_id, input.peer),
            agent_id,
            matched_by: "binding.channel",
        };
    }

    let agent_id = default_agent_id(cfg);
    ResolvedRoute {
        session_key: session_key(&agent_id, &channel, account_id, input.peer),
        agent_id,
        matched_by: "default",
    }
}

fn pick_agent_id(cfg: &AppConfig, id: &str) -> String {
    let id = id.trim();
    if id.is_empty() {
        return default_agent_id(cfg);
    }
    // A binding may name an agent that was removed; fall back to default.
    match cfg.find_agent(id) {
        Some(agent) => agent.id.clone(),
        None => default_agent_id(cfg),
    }
}

fn default_agent_id(cfg: &AppConfig) -> String {
    for agent in &cfg.agents.list {
        if agent.default && !agent.id.trim().is_empty() {
            return agent.id.clone();
        }
    }
    if let Some(first) = cfg.agents.list.first() {
        if !first.id.trim().is_empty() {
            return first.id.clone();
        }
    }
    DEFAULT_AGENT_ID.to_string()
}

/// `agent:<id>:<channel>:<account>[:<kind>:<peer>]`
fn session_key(agent_id: &str, channel: &str, account_id: &str, peer: Option<&PeerMatch>) -> String {
    let mut parts = vec!["agent", agent_id, channel];
    if !account_id.is_empty() {
        parts.push(account_id);
    }
    if let Some(p) = peer {
        if !p.id.is_empty() {
            parts.push(&p.kind);
            parts.push(&p.id);
        }
    }
    parts.join(":")
}
