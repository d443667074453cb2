use std::sync::Arc;

use tracing::warn;

use crate::config::AppConfig;

use super::{
    AnthropicNativeProvider, GoogleGenAiProvider, OpenAiCompatibleProvider, ProviderEntry,
};

const CEREBRAS_BASE: &str = "https://api.cerebras.ai/v1";
const OPENAI_BASE: &str = "https://api.openai.com/v1";

/// Build the ordered provider list from config + env keys.
/// Order encodes failover priority; cheap_first runs
/// cerebras -> openai -> anthropic -> gemini.
pub fn build_provider_entries(cfg: &AppConfig) -> Vec<ProviderEntry> {
    let mut entries = Vec::new();

    if let Some(key) = api_key("CEREBRAS_API_KEY", &cfg.providers.cerebras.api_key) {
        let base = non_empty(&cfg.providers.cerebras.api_base, CEREBRAS_BASE);
        match OpenAiCompatibleProvider::new("cerebras", &key, base, "llama-3.1-70b") {
            Ok(p) => entries.push(ProviderEntry {
                name: "cerebras".into(),
                provider: Arc::new(p),
            }),
            Err(e) => warn!("Skipping cerebras provider: {}", e),
        }
    }

    if let Some(key) = api_key("OPENAI_API_KEY", &cfg.providers.openai.api_key) {
        let base = non_empty(&cfg.providers.openai.api_base, OPENAI_BASE);
        match OpenAiCompatibleProvider::new("openai", &key, base, "gpt-4o-mini") {
            Ok(p) => entries.push(ProviderEntry {
                name: "openai".into(),
                provider: Arc::new(p),
            }),
            Err(e) => warn!("Skipping openai provider: {}", e),
        }
    }

    if let Some(key) = api_key("ANTHROPIC_API_KEY", &cfg.providers.anthropic.api_key) {
        match AnthropicNativeProvider::new(&key, "claude-3-5-sonnet-20241022") {
            Ok(p) => entries.push(ProviderEntry {
                name: "anthropic".into(),
                provider: Arc::new(p),
            }),
            Err(e) => warn!("Skipping anthropic provider: {}", e),
        }
    }

    if let Some(key) = api_key("GEMINI_API_KEY", &cfg.providers.gemini.api_key) {
        match GoogleGenAiProvider::new(&key, "gemini-2.5-flash-lite") {
            Ok(p) => entries.push(ProviderEntry {
                name: "gemini".into(),
                provider: Arc::new(p),
            }),
            Err(e) => warn!("Skipping gemini provider: {}", e),
        }
    }

    entries
}

/// Config key wins over the environment.
fn api_key(env_key: &str, config_key: &str) -> Option<String> {
    if !config_key.is_empty() {
        return Some(config_key.to_string());
    }
    match std::env::var(env_key) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => None,
    }
}

fn non_empty<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}
