use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{info, warn};
use zeroize::Zeroize;

use super::error::ProviderError;
use super::{
    normalize_model, ChatMessage, ChatOptions, LlmProvider, LlmResponse, LlmToolCall, UsageInfo,
};

/// Adapter for OpenAI-compatible chat-completions endpoints (OpenAI,
/// Cerebras, and local servers exposing the same dialect).
pub struct OpenAiCompatibleProvider {
    client: Client,
    name: String,
    base_url: String,
    api_key: String,
    default_model: String,
}

impl Drop for OpenAiCompatibleProvider {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

/// Validate the base URL for security.
/// - HTTPS is required for remote URLs to protect API keys in transit
/// - HTTP is allowed only for localhost (local LLM servers)
fn validate_base_url(base_url: &str) -> anyhow::Result<()> {
    let parsed = reqwest::Url::parse(base_url)
        .map_err(|e| anyhow::anyhow!("Invalid base_url '{}': {}", base_url, e))?;

    let host = parsed.host_str().unwrap_or("");
    match parsed.scheme() {
        "https" => Ok(()),
        "http" => {
            let is_localhost =
                host == "localhost" || host == "127.0.0.1" || host == "[::1]" || host == "::1";
            if is_localhost {
                warn!(
                    "Using unencrypted HTTP for local LLM server at '{}'. \
                     API key will be transmitted in cleartext.",
                    base_url
                );
                Ok(())
            } else {
                anyhow::bail!(
                    "HTTP is not allowed for remote URLs (base_url: '{}'). \
                     Use HTTPS to protect your API key in transit.",
                    base_url
                )
            }
        }
        scheme => anyhow::bail!(
            "Unsupported URL scheme '{}' in base_url '{}'. Only http and https are allowed.",
            scheme,
            base_url
        ),
    }
}

impl OpenAiCompatibleProvider {
    pub fn new(
        name: &str,
        api_key: &str,
        base_url: &str,
        default_model: &str,
    ) -> anyhow::Result<Self> {
        validate_base_url(base_url)?;
        let client = super::build_http_client(Duration::from_secs(120))?;
        Ok(Self {
            client,
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            default_model: default_model.to_string(),
        })
    }

    /// Serialize the internal transcript to chat-completions messages.
    /// Tool-call arguments become JSON-encoded strings on the wire.
    fn convert_messages(messages: &[ChatMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| {
                let mut obj = json!({
                    "role": m.role,
                    "content": m.content,
                });
                if !m.tool_calls.is_empty() {
                    let calls: Vec<Value> = m
                        .tool_calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": tc.arguments.to_string(),
                                }
                            })
                        })
                        .collect();
                    obj["tool_calls"] = json!(calls);
                }
                if let Some(id) = &m.tool_call_id {
                    obj["tool_call_id"] = json!(id);
                }
                if m.role == "tool" {
                    if let Some(name) = &m.name {
                        obj["name"] = json!(name);
                    }
                }
                obj
            })
            .collect()
    }

    fn parse_response(data: &Value) -> anyhow::Result<LlmResponse> {
        let choice = data["choices"]
            .get(0)
            .ok_or_else(|| anyhow::anyhow!("No choices in response: {}", data))?;
        let message = &choice["message"];

        let mut tool_calls = Vec::new();
        if let Some(calls) = message["tool_calls"].as_array() {
            for tc in calls {
                let arguments_raw = tc["function"]["arguments"].as_str().unwrap_or("{}");
                let arguments: Value =
                    serde_json::from_str(arguments_raw).unwrap_or_else(|_| json!({}));
                tool_calls.push(LlmToolCall {
                    id: tc["id"].as_str().unwrap_or("").to_string(),
                    name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                    arguments,
                });
            }
        }

        let usage = data.get("usage").map(|u| UsageInfo {
            prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0),
            completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0),
            total_tokens: u["total_tokens"].as_u64().unwrap_or(0),
        });

        Ok(LlmResponse {
            content: message["content"].as_str().unwrap_or("").to_string(),
            tool_calls,
            finish_reason: choice["finish_reason"].as_str().unwrap_or("").to_string(),
            usage,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
        model: &str,
        options: &ChatOptions,
    ) -> anyhow::Result<LlmResponse> {
        let model = {
            let m = normalize_model(model);
            if m.is_empty() {
                self.default_model.as_str()
            } else {
                m
            }
        };

        let mut body = json!({
            "model": model,
            "messages": Self::convert_messages(messages),
            "max_tokens": options.max_tokens,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        let url = format!("{}/chat/completions", self.base_url);
        info!(provider = %self.name, model, tools = tools.len(), "Calling LLM API");

        let request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body);

        let resp = tokio::select! {
            r = request.send() => r.map_err(|e| anyhow::Error::from(ProviderError::network(&e)))?,
            _ = options.cancel.cancelled() => return Err(ProviderError::cancelled().into()),
        };

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16(), &text).into());
        }

        let data: Value = serde_json::from_str(&text)?;
        Self::parse_response(&data)
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}
