use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::bus::{MessageBus, OutboundMessage};

use super::{Tool, ToolErrorCode, ToolRequest, ToolResponse};

/// Where a task's replies go.
#[derive(Debug, Clone)]
pub struct ReplyTarget {
    pub channel: String,
    pub chat_id: String,
}

/// Emits an outbound message using the task's registered reply target.
/// This tool exclusively owns the task -> (channel, chat_id) mapping;
/// the loop registers it at task start and clears it on termination.
pub struct MessageTool {
    bus: Arc<MessageBus>,
    targets: RwLock<HashMap<String, ReplyTarget>>,
    safe_mode: bool,
}

impl MessageTool {
    pub fn new(bus: Arc<MessageBus>, safe_mode: bool) -> Self {
        Self {
            bus,
            targets: RwLock::new(HashMap::new()),
            safe_mode,
        }
    }

    pub fn set_reply_target(&self, task_id: &str, channel: &str, chat_id: &str) {
        self.targets
            .write()
            .expect("reply target lock poisoned")
            .insert(
                task_id.to_string(),
                ReplyTarget {
                    channel: channel.to_string(),
                    chat_id: chat_id.to_string(),
                },
            );
    }

    pub fn reply_target(&self, task_id: &str) -> Option<ReplyTarget> {
        self.targets
            .read()
            .expect("reply target lock poisoned")
            .get(task_id)
            .cloned()
    }

    pub fn clear_reply_target(&self, task_id: &str) {
        self.targets
            .write()
            .expect("reply target lock poisoned")
            .remove(task_id);
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &'static str {
        "message"
    }

    fn description(&self) -> &str {
        "Send a message to the user in the current conversation"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "message",
            "description": "Send a message to the user in the current conversation.",
            "parameters": {
                "type": "object",
                "properties": {
                    "content": { "type": "string", "description": "Message content to send" }
                },
                "required": ["content"]
            }
        })
    }

    async fn execute(&self, req: ToolRequest) -> ToolResponse {
        if self.safe_mode {
            return ToolResponse::error(
                &req.tool_call_id,
                "message disabled in safe mode",
                "Message sending is disabled in safe mode.",
                ToolErrorCode::PermissionDenied,
                false,
            );
        }

        let content = match req.arg_str("content") {
            Some(c) if !c.is_empty() => c.to_string(),
            _ => {
                return ToolResponse::error(
                    &req.tool_call_id,
                    "Missing 'content' argument",
                    "Content is required.",
                    ToolErrorCode::PermissionDenied,
                    false,
                )
            }
        };

        let target = self.reply_target(&req.task_id).unwrap_or(ReplyTarget {
            channel: "cli".to_string(),
            chat_id: "default".to_string(),
        });

        self.bus.publish_outbound(OutboundMessage {
            channel: target.channel,
            chat_id: target.chat_id,
            content,
        });

        ToolResponse::success(&req.tool_call_id, "Message sent.", "Message sent.", None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn request(task_id: &str, content: Option<&str>) -> ToolRequest {
        ToolRequest {
            tool_call_id: "c1".into(),
            task_id: task_id.into(),
            agent_id: "main".into(),
            name: "message".into(),
            args: match content {
                Some(c) => json!({"content": c}),
                None => json!({}),
            },
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn sends_to_registered_target() {
        let bus = Arc::new(MessageBus::new(8));
        let tool = MessageTool::new(bus.clone(), false);
        tool.set_reply_target("t1", "whatsapp", "chat-9");

        let resp = tool.execute(request("t1", Some("ping"))).await;
        assert!(!resp.is_error);

        let cancel = CancellationToken::new();
        let out = bus.consume_outbound(&cancel).await.unwrap();
        assert_eq!(out.channel, "whatsapp");
        assert_eq!(out.chat_id, "chat-9");
        assert_eq!(out.content, "ping");
    }

    #[tokio::test]
    async fn unregistered_task_falls_back_to_cli() {
        let bus = Arc::new(MessageBus::new(8));
        let tool = MessageTool::new(bus.clone(), false);

        tool.execute(request("ghost", Some("hello"))).await;
        let cancel = CancellationToken::new();
        let out = bus.consume_outbound(&cancel).await.unwrap();
        assert_eq!(out.channel, "cli");
        assert_eq!(out.chat_id, "default");
    }

    #[tokio::test]
    async fn clear_removes_target() {
        let bus = Arc::new(MessageBus::new(8));
        let tool = MessageTool::new(bus, false);
        tool.set_reply_target("t1", "whatsapp", "c");
        assert!(tool.reply_target("t1").is_some());
        tool.clear_reply_target("t1");
        assert!(tool.reply_target("t1").is_none());
    }

    #[tokio::test]
    async fn missing_content_denied() {
        let bus = Arc::new(MessageBus::new(8));
        let tool = MessageTool::new(bus, false);
        let resp = tool.execute(request("t1", None)).await;
        assert!(resp.is_error);
        assert_eq!(resp.code, Some(ToolErrorCode::PermissionDenied));
    }

    #[tokio::test]
    async fn safe_mode_denies() {
        let bus = Arc::new(MessageBus::new(8));
        let tool = MessageTool::new(bus, true);
        let resp = tool.execute(request("t1", Some("x"))).await;
        assert!(resp.is_error);
    }
}
