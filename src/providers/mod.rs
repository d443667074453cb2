//! LLM provider pipeline: a uniform internal transcript shape, one
//! adapter per wire dialect, and a failover wrapper with retries and a
//! global sliding-window rate limit.

mod anthropic_native;
mod error;
mod factory;
mod fallback;
mod google_genai;
mod openai_compatible;

pub use anthropic_native::AnthropicNativeProvider;
pub use error::{ProviderError, ProviderErrorKind};
pub use factory::build_provider_entries;
pub use fallback::{FallbackProvider, LlmRateLimiter};
pub use google_genai::GoogleGenAiProvider;
pub use openai_compatible::OpenAiCompatibleProvider;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A message in the uniform internal transcript.
///
/// Invariant: every `tool` message follows an `assistant` message that
/// carried a tool call with the same id.
#[derive(Debug, Clone, Default)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    pub tool_calls: Vec<LlmToolCall>,
    pub tool_call_id: Option<String>,
    /// Tool name, set on `tool` messages for dialects that correlate
    /// responses by name instead of id.
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn assistant_with_call(content: impl Into<String>, call: LlmToolCall) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
            tool_calls: vec![call],
            ..Default::default()
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".into(),
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// A tool invocation requested by the LLM.
#[derive(Debug, Clone)]
pub struct LlmToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// The LLM's reply: content text, tool calls, or both.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<LlmToolCall>,
    pub finish_reason: String,
    pub usage: Option<UsageInfo>,
}

#[derive(Debug, Clone, Default)]
pub struct UsageInfo {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Per-call knobs passed through to the wire request.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub max_tokens: u32,
    /// Scope that interrupts an in-flight call on task cancel/timeout.
    pub cancel: CancellationToken,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            cancel: CancellationToken::new(),
        }
    }
}

/// One LLM backend. Adapters translate the internal transcript to their
/// wire dialect and back, preserving tool-call ids and role order.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
        model: &str,
        options: &ChatOptions,
    ) -> anyhow::Result<LlmResponse>;

    fn default_model(&self) -> &str;
}

/// Ordered failover list element.
#[derive(Clone)]
pub struct ProviderEntry {
    pub name: String,
    pub provider: Arc<dyn LlmProvider>,
}

/// Strip a `provider/` prefix from an internal model tag, e.g.
/// `cerebras/llama-3.1-70b` -> `llama-3.1-70b`.
pub fn normalize_model(model: &str) -> &str {
    match model.find('/') {
        Some(idx) if idx > 0 => &model[idx + 1..],
        _ => model,
    }
}

/// Shared HTTP client for provider calls.
pub(crate) fn build_http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {}", e))
}
