use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::info;
use zeroize::Zeroize;

use super::error::ProviderError;
use super::{
    normalize_model, ChatMessage, ChatOptions, LlmProvider, LlmResponse, LlmToolCall, UsageInfo,
};

/// Adapter for the Anthropic Messages API.
///
/// The dialect differs from chat-completions in three ways this adapter
/// must bridge losslessly: the system prompt is a top-level field, tool
/// calls are `tool_use` content blocks inside assistant turns, and tool
/// responses are `tool_result` blocks inside *user* turns. Roles must
/// strictly alternate, so adjacent same-role messages are merged.
pub struct AnthropicNativeProvider {
    client: Client,
    base_url: String,
    api_key: String,
    default_model: String,
}

impl Drop for AnthropicNativeProvider {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

impl AnthropicNativeProvider {
    pub fn new(api_key: &str, default_model: &str) -> anyhow::Result<Self> {
        let client = super::build_http_client(Duration::from_secs(120))?;
        let default_model = if default_model.is_empty() {
            "claude-3-5-sonnet-20241022".to_string()
        } else {
            normalize_model(default_model).to_string()
        };
        Ok(Self {
            client,
            base_url: "https://api.anthropic.com/v1".to_string(),
            api_key: api_key.to_string(),
            default_model,
        })
    }

    fn convert_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
        let mut system: Option<String> = None;
        let mut out: Vec<Value> = Vec::new();

        for m in messages {
            match m.role.as_str() {
                "system" => {
                    if let Some(existing) = &mut system {
                        existing.push_str("\n\n");
                        existing.push_str(&m.content);
                    } else {
                        system = Some(m.content.clone());
                    }
                }
                "user" => {
                    out.push(json!({
                        "role": "user",
                        "content": [{ "type": "text", "text": m.content }],
                    }));
                }
                "assistant" => {
                    let mut blocks = Vec::new();
                    if !m.content.is_empty() {
                        blocks.push(json!({ "type": "text", "text": m.content }));
                    }
                    for tc in &m.tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.name,
                            "input": tc.arguments,
                        }));
                    }
                    if !blocks.is_empty() {
                        out.push(json!({ "role": "assistant", "content": blocks }));
                    }
                }
                "tool" => {
                    let id = m.tool_call_id.clone().unwrap_or_default();
                    out.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": id,
                            "content": m.content,
                        }],
                    }));
                }
                _ => {}
            }
        }

        (system, merge_adjacent_roles(out))
    }

    fn convert_tools(tools: &[Value]) -> Option<Vec<Value>> {
        if tools.is_empty() {
            return None;
        }
        let converted = tools
            .iter()
            .filter_map(|t| t.get("function"))
            .map(|f| {
                json!({
                    "name": f["name"],
                    "description": f.get("description").cloned().unwrap_or(json!("")),
                    "input_schema": f["parameters"],
                })
            })
            .collect();
        Some(converted)
    }

    fn parse_response(data: &Value) -> LlmResponse {
        let mut content = String::new();
        let mut tool_calls = Vec::new();

        if let Some(blocks) = data["content"].as_array() {
            for block in blocks {
                match block["type"].as_str().unwrap_or("") {
                    "text" => {
                        if let Some(t) = block["text"].as_str() {
                            content.push_str(t);
                        }
                    }
                    "tool_use" => {
                        tool_calls.push(LlmToolCall {
                            id: block["id"].as_str().unwrap_or("").to_string(),
                            name: block["name"].as_str().unwrap_or("").to_string(),
                            arguments: block["input"].clone(),
                        });
                    }
                    _ => {}
                }
            }
        }

        let usage = data.get("usage").map(|u| {
            let input = u["input_tokens"].as_u64().unwrap_or(0);
            let output = u["output_tokens"].as_u64().unwrap_or(0);
            UsageInfo {
                prompt_tokens: input,
                completion_tokens: output,
                total_tokens: input + output,
            }
        });

        LlmResponse {
            content,
            tool_calls,
            finish_reason: data["stop_reason"].as_str().unwrap_or("").to_string(),
            usage,
        }
    }
}

/// The Messages API rejects consecutive same-role messages, which the
/// loop produces when several tool results follow one assistant turn.
fn merge_adjacent_roles(messages: Vec<Value>) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::new();
    for msg in messages {
        if let Some(last) = result.last_mut() {
            if last["role"] == msg["role"] {
                let mut blocks = msg["content"].as_array().cloned().unwrap_or_default();
                if let Some(existing) = last["content"].as_array_mut() {
                    existing.append(&mut blocks);
                }
                continue;
            }
        }
        result.push(msg);
    }
    result
}

#[async_trait]
impl LlmProvider for AnthropicNativeProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
        model: &str,
        options: &ChatOptions,
    ) -> anyhow::Result<LlmResponse> {
        if self.api_key.is_empty() {
            anyhow::bail!("anthropic: API key not configured");
        }

        let model = {
            let m = normalize_model(model);
            if m.starts_with("claude-") {
                m
            } else {
                self.default_model.as_str()
            }
        };

        let (system, converted) = Self::convert_messages(messages);
        let mut body = json!({
            "model": model,
            "max_tokens": options.max_tokens,
            "messages": converted,
        });
        if let Some(sys) = system {
            body["system"] = json!(sys);
        }
        if let Some(tools) = Self::convert_tools(tools) {
            body["tools"] = json!(tools);
        }

        info!(model, url = %self.base_url, "Calling Anthropic Messages API");

        let request = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
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
        Ok(Self::parse_response(&data))
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_is_extracted_and_tool_flow_translated() {
        let call = LlmToolCall {
            id: "toolu_1".into(),
            name: "exec".into(),
            arguments: json!({"command": "ls"}),
        };
        let messages = vec![
            ChatMessage::system("be helpful"),
            ChatMessage::user("list files"),
            ChatMessage::assistant_with_call("", call),
            ChatMessage::tool("toolu_1", "exec", "a.txt"),
        ];
        let (system, converted) = AnthropicNativeProvider::convert_messages(&messages);
        assert_eq!(system.as_deref(), Some("be helpful"));

        assert_eq!(converted.len(), 3);
        assert_eq!(converted[0]["role"], "user");
        assert_eq!(converted[1]["role"], "assistant");
        assert_eq!(converted[1]["content"][0]["type"], "tool_use");
        assert_eq!(converted[1]["content"][0]["id"], "toolu_1");
        assert_eq!(converted[1]["content"][0]["input"]["command"], "ls");
        assert_eq!(converted[2]["role"], "user");
        assert_eq!(converted[2]["content"][0]["type"], "tool_result");
        assert_eq!(converted[2]["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn adjacent_tool_results_merge_into_one_user_turn() {
        let messages = vec![
            ChatMessage::user("go"),
            ChatMessage {
                role: "assistant".into(),
                content: String::new(),
                tool_calls: vec![
                    LlmToolCall {
                        id: "t1".into(),
                        name: "exec".into(),
                        arguments: json!({}),
                    },
                    LlmToolCall {
                        id: "t2".into(),
                        name: "web_fetch".into(),
                        arguments: json!({}),
                    },
                ],
                ..Default::default()
            },
            ChatMessage::tool("t1", "exec", "out1"),
            ChatMessage::tool("t2", "web_fetch", "out2"),
        ];
        let (_, converted) = AnthropicNativeProvider::convert_messages(&messages);
        // user, assistant, merged user (two tool_result blocks)
        assert_eq!(converted.len(), 3);
        let blocks = converted[2]["content"].as_array().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["tool_use_id"], "t1");
        assert_eq!(blocks[1]["tool_use_id"], "t2");
    }

    #[test]
    fn tools_convert_to_input_schema() {
        let tools = vec![json!({
            "type": "function",
            "function": {
                "name": "exec",
                "description": "run a command",
                "parameters": { "type": "object" }
            }
        })];
        let converted = AnthropicNativeProvider::convert_tools(&tools).unwrap();
        assert_eq!(converted[0]["name"], "exec");
        assert_eq!(converted[0]["input_schema"]["type"], "object");
        assert!(AnthropicNativeProvider::convert_tools(&[]).is_none());
    }

    #[test]
    fn parse_response_extracts_text_and_tool_use() {
        let data = json!({
            "content": [
                { "type": "text", "text": "checking" },
                { "type": "tool_use", "id": "toolu_2", "name": "exec", "input": {"command": "pwd"} }
            ],
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 7, "output_tokens": 3 }
        });
        let resp = AnthropicNativeProvider::parse_response(&data);
        assert_eq!(resp.content, "checking");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].id, "toolu_2");
        assert_eq!(resp.tool_calls[0].arguments["command"], "pwd");
        assert_eq!(resp.finish_reason, "tool_use");
        assert_eq!(resp.usage.unwrap().total_tokens, 10);
    }
}
