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

/// Adapter for the Google Generative Language API (generateContent).
///
/// The dialect carries the system prompt as `system_instruction`, tool
/// definitions as `function_declarations`, tool calls as `functionCall`
/// parts, and tool responses as `functionResponse` parts correlated by
/// *name*. Generated call ids are synthesized locally so the internal
/// transcript still correlates by id.
pub struct GoogleGenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    default_model: String,
}

impl Drop for GoogleGenAiProvider {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

impl GoogleGenAiProvider {
    pub fn new(api_key: &str, default_model: &str) -> anyhow::Result<Self> {
        let client = super::build_http_client(Duration::from_secs(120))?;
        let default_model = if default_model.is_empty() {
            "gemini-2.5-flash-lite".to_string()
        } else {
            normalize_model(default_model).to_string()
        };
        Ok(Self {
            client,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: api_key.to_string(),
            default_model,
        })
    }

    fn convert_messages(messages: &[ChatMessage]) -> (Option<Value>, Vec<Value>) {
        let mut system_instruction: Option<Value> = None;
        let mut contents = Vec::new();

        for m in messages {
            match m.role.as_str() {
                "system" => {
                    if let Some(existing) = &mut system_instruction {
                        if let Some(parts) = existing["parts"].as_array_mut() {
                            parts.push(json!({ "text": m.content }));
                        }
                    } else {
                        system_instruction = Some(json!({ "parts": [{ "text": m.content }] }));
                    }
                }
                "user" => {
                    contents.push(json!({
                        "role": "user",
                        "parts": [{ "text": m.content }],
                    }));
                }
                "assistant" => {
                    let mut parts = Vec::new();
                    if !m.content.is_empty() {
                        parts.push(json!({ "text": m.content }));
                    }
                    for tc in &m.tool_calls {
                        parts.push(json!({
                            "functionCall": { "name": tc.name, "args": tc.arguments }
                        }));
                    }
                    if !parts.is_empty() {
                        contents.push(json!({ "role": "model", "parts": parts }));
                    }
                }
                "tool" => {
                    // functionResponse.response maps to a protobuf Struct,
                    // which must be a JSON object, never an array or primitive.
                    let response_json = match serde_json::from_str::<Value>(&m.content) {
                        Ok(Value::Object(obj)) => Value::Object(obj),
                        Ok(other) => json!({ "result": other }),
                        Err(_) => json!({ "result": m.content }),
                    };
                    let name = m.name.clone().unwrap_or_else(|| "unknown_tool".to_string());
                    contents.push(json!({
                        "role": "function",
                        "parts": [{
                            "functionResponse": { "name": name, "response": response_json }
                        }],
                    }));
                }
                _ => {}
            }
        }
        (system_instruction, contents)
    }

    fn convert_tools(tools: &[Value]) -> Option<Vec<Value>> {
        if tools.is_empty() {
            return None;
        }
        let declarations: Vec<Value> = tools
            .iter()
            .filter_map(|t| t.get("function"))
            .map(|f| {
                json!({
                    "name": f["name"],
                    "description": f.get("description").cloned().unwrap_or(json!("")),
                    "parameters": f["parameters"],
                })
            })
            .collect();
        Some(vec![json!({ "function_declarations": declarations })])
    }

    fn parse_response(data: &Value) -> anyhow::Result<LlmResponse> {
        let candidate = data["candidates"]
            .get(0)
            .ok_or_else(|| anyhow::anyhow!("No candidates in response: {}", data))?;

        let empty = Vec::new();
        let parts = candidate["content"]["parts"].as_array().unwrap_or(&empty);

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for part in parts {
            if let Some(text) = part["text"].as_str() {
                content.push_str(text);
            }
            if let Some(fc) = part.get("functionCall") {
                tool_calls.push(LlmToolCall {
                    id: format!("call_{}", uuid::Uuid::new_v4()),
                    name: fc["name"].as_str().unwrap_or("").to_string(),
                    arguments: fc["args"].clone(),
                });
            }
        }

        let usage = data.get("usageMetadata").map(|u| UsageInfo {
            prompt_tokens: u["promptTokenCount"].as_u64().unwrap_or(0),
            completion_tokens: u["candidatesTokenCount"].as_u64().unwrap_or(0),
            total_tokens: u["totalTokenCount"].as_u64().unwrap_or(0),
        });

        Ok(LlmResponse {
            content,
            tool_calls,
            finish_reason: candidate["finishReason"].as_str().unwrap_or("").to_string(),
            usage,
        })
    }
}

#[async_trait]
impl LlmProvider for GoogleGenAiProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
        model: &str,
        options: &ChatOptions,
    ) -> anyhow::Result<LlmResponse> {
        let model = {
            let m = normalize_model(model);
            if m.starts_with("gemini-") {
                m
            } else {
                self.default_model.as_str()
            }
        };

        let (system_instruction, contents) = Self::convert_messages(messages);
        let mut body = json!({
            "contents": contents,
            "generationConfig": { "maxOutputTokens": options.max_tokens },
        });
        if let Some(si) = system_instruction {
            body["system_instruction"] = si;
        }
        if let Some(tools) = Self::convert_tools(tools) {
            body["tools"] = json!(tools);
        }

        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        info!(model, "Calling Google GenAI API");

        let request = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_becomes_system_instruction() {
        let messages = vec![ChatMessage::system("a"), ChatMessage::system("b"), ChatMessage::user("hi")];
        let (si, contents) = GoogleGenAiProvider::convert_messages(&messages);
        let si = si.unwrap();
        let parts = si["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0]["role"], "user");
    }

    #[test]
    fn tool_flow_uses_function_parts_correlated_by_name() {
        let call = LlmToolCall {
            id: "call_x".into(),
            name: "tail_output".into(),
            arguments: json!({"path": "/ws/log.txt"}),
        };
        let messages = vec![
            ChatMessage::user("tail the log"),
            ChatMessage::assistant_with_call("", call),
            ChatMessage::tool("call_x", "tail_output", "last line"),
        ];
        let (_, contents) = GoogleGenAiProvider::convert_messages(&messages);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["functionCall"]["name"], "tail_output");
        assert_eq!(contents[2]["role"], "function");
        let fr = &contents[2]["parts"][0]["functionResponse"];
        assert_eq!(fr["name"], "tail_output");
        // Non-JSON tool output is wrapped into an object.
        assert_eq!(fr["response"]["result"], "last line");
    }

    #[test]
    fn json_object_tool_output_passes_through() {
        let messages = vec![ChatMessage::tool("id", "exec", r#"{"exit": 0}"#)];
        let (_, contents) = GoogleGenAiProvider::convert_messages(&messages);
        assert_eq!(
            contents[0]["parts"][0]["functionResponse"]["response"]["exit"],
            0
        );
    }

    #[test]
    fn tools_become_function_declarations() {
        let tools = vec![json!({
            "type": "function",
            "function": { "name": "kill", "description": "kill", "parameters": {"type": "object"} }
        })];
        let converted = GoogleGenAiProvider::convert_tools(&tools).unwrap();
        assert_eq!(converted[0]["function_declarations"][0]["name"], "kill");
        assert!(GoogleGenAiProvider::convert_tools(&[]).is_none());
    }

    #[test]
    fn parse_response_synthesizes_call_ids() {
        let data = json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "running" },
                    { "functionCall": { "name": "exec", "args": {"command": "ls"} } }
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6 }
        });
        let resp = GoogleGenAiProvider::parse_response(&data).unwrap();
        assert_eq!(resp.content, "running");
        assert_eq!(resp.tool_calls.len(), 1);
        assert!(resp.tool_calls[0].id.starts_with("call_"));
        assert_eq!(resp.tool_calls[0].arguments["command"], "ls");
        assert_eq!(resp.usage.unwrap().total_tokens, 6);
    }

    #[test]
    fn parse_response_without_candidates_errors() {
        assert!(GoogleGenAiProvider::parse_response(&json!({})).is_err());
    }
}
