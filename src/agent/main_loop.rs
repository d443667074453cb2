use std::sync::Arc;

use serde_json::json;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bus::{Event, InboundMessage};
use crate::intent::{parse_channel_command, Intent};
use crate::providers::{ChatMessage, ChatOptions};
use crate::replay::ReplayRecord;
use crate::routing::{self, RouteInput};
use crate::task::{self, Task, TaskState};
use crate::tools::{ToolErrorCode, ToolRequest, ToolResponse};

use super::bootstrap::build_system_prompt;
use super::AgentLoop;

/// Transcript truncation keeps the system message plus this many of the
/// most recent messages.
const TRUNCATE_KEEP_RECENT: usize = 6;

impl AgentLoop {
    /// Handle a single inbound message and produce the reply text.
    pub async fn process_message(&self, msg: InboundMessage) -> anyhow::Result<String> {
        // Messaging-channel admin fast path (config, agents, status, ...).
        if msg.channel == "whatsapp" {
            if let Some(cmd) = parse_channel_command(&msg.content, &msg.sender_id, &self.cfg.channels)
            {
                return Ok(self.handle_channel_command(cmd).await);
            }
        }

        // Intent prefilter: some intents never reach the LLM. A `command`
        // intent deliberately falls through to the full loop.
        let intent = self.intent.parse(&msg.content);
        if !intent.needs_llm() {
            match intent.intent {
                Intent::ConfigChange => {
                    return Ok(
                        "Config commands: use 'sypher config get <path>' or 'sypher config set <path> <value>'"
                            .to_string(),
                    );
                }
                Intent::EmergencyAlert => {
                    return Ok("Alert received. (Notification delivery not yet wired)".to_string());
                }
                Intent::Command => {}
                _ => {}
            }
        }

        // Agent routing and session key.
        let route = routing::resolve(
            &self.cfg,
            RouteInput {
                channel: &msg.channel,
                account_id: &msg.sender_id,
                peer: None,
            },
        );
        let agent_id = route.agent_id;
        let session_key = if route.session_key.is_empty() {
            format!("agent:{}:{}:{}", agent_id, msg.channel, msg.chat_id)
        } else {
            route.session_key
        };

        // Duplicate within TTL: replay the cached reply, no task created.
        if let Some(cache) = &self.idempotency {
            if let Some((_task_id, result)) = cache.get(&session_key, &msg.content) {
                return Ok(result);
            }
        }

        let task = self.task_mgr.create(&agent_id, &session_key);
        task.transition(TaskState::Authorized);
        self.message_tool
            .set_reply_target(&task.id, &msg.channel, &msg.chat_id);

        if let Err(e) = self
            .event_bus
            .publish(Event::new(
                "task.started",
                json!({
                    "task_id": task.id.clone(),
                    "agent_id": agent_id.clone(),
                    "channel": msg.channel.clone(),
                    "chat_id": msg.chat_id.clone(),
                    "session_key": session_key.clone(),
                }),
            ))
            .await
        {
            debug!("task.started publish failed: {}", e);
        }

        task.transition(TaskState::Executing);
        let run = self
            .task_mgr
            .run_with_timeout(&task, |scope| self.run_agent_task(&task, &msg, &agent_id, scope))
            .await;

        let reply = match run {
            Ok(result) => {
                let state = task.state();
                if state == TaskState::Failed {
                    self.metrics.inc_task_failed();
                    self.write_replay(&task, &msg, &result, "failed");
                    result
                } else {
                    task.transition(TaskState::Completed);
                    self.metrics.inc_task_completed();
                    self.write_replay(&task, &msg, &result, "completed");
                    if let Some(cache) = &self.idempotency {
                        cache.set(&session_key, &msg.content, &task.id, &result);
                        cache.cleanup();
                    }
                    result
                }
            }
            Err(e) => match task.state() {
                TaskState::Timeout => {
                    self.metrics.inc_task_failed();
                    "Task timed out".to_string()
                }
                TaskState::Killed => "Task cancelled".to_string(),
                _ => {
                    task.transition(TaskState::Failed);
                    self.metrics.inc_task_failed();
                    format!("Task failed: {}", e)
                }
            },
        };

        // Per-task resource cleanup.
        if let Err(e) = task::remove_checkpoint(&self.cfg.checkpoint.dir, &task.id) {
            debug!("checkpoint remove failed: {}", e);
        }
        self.message_tool.clear_reply_target(&task.id);
        self.tracker.remove_task(&task.id);
        self.task_mgr.remove(&task.id);

        Ok(reply)
    }

    /// The LLM/tool iteration, run under the task timeout scope.
    async fn run_agent_task(
        &self,
        task: &Arc<Task>,
        msg: &InboundMessage,
        agent_id: &str,
        scope: CancellationToken,
    ) -> anyhow::Result<String> {
        if task.is_cancelled() {
            task.transition(TaskState::Killed);
            anyhow::bail!("task cancelled");
        }

        let provider = match (&self.provider, self.safe_mode) {
            (_, true) => {
                return Ok(format!(
                    "Received: {:?} (LLM disabled in safe mode)",
                    msg.content
                ));
            }
            (None, false) => {
                return Ok(format!(
                    "Received: {:?} (no LLM provider configured - set CEREBRAS_API_KEY or OPENAI_API_KEY)",
                    msg.content
                ));
            }
            (Some(p), false) => p.clone(),
        };

        let system_prompt = build_system_prompt(&self.cfg, agent_id);
        let mut messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(&msg.content),
        ];

        let model = self.cfg.agents.defaults.model.clone();
        let max_iter = {
            let n = self.cfg.agents.defaults.max_tool_iterations;
            if n == 0 {
                20
            } else {
                n
            }
        };
        let options = ChatOptions {
            max_tokens: 2048,
            cancel: scope.clone(),
        };
        let tool_defs = self.registry.definitions();

        for _iter in 0..max_iter {
            if task.is_cancelled() {
                task.transition(TaskState::Killed);
                anyhow::bail!("task cancelled");
            }

            let threshold = self.cfg.context.summarize_threshold;
            if threshold > 0 {
                messages = truncate_messages(messages, threshold);
            }

            if !self.cfg.checkpoint.dir.is_empty() {
                let hash = history_hash(&messages);
                if let Err(e) = task::write_checkpoint(
                    &self.cfg.checkpoint.dir,
                    &task.id,
                    task.state().as_str(),
                    &hash,
                ) {
                    debug!("checkpoint write failed: {}", e);
                }
            }

            let response = match provider.chat(&messages, &tool_defs, &model, &options).await {
                Ok(r) => r,
                Err(e) => {
                    // An external cancel interrupts the in-flight call;
                    // report that rather than a provider failure.
                    if task.is_cancelled() {
                        task.transition(TaskState::Killed);
                        anyhow::bail!("task cancelled");
                    }
                    task.transition(TaskState::Failed);
                    return Ok(format!("LLM error: {}", e));
                }
            };

            if response.tool_calls.is_empty() {
                let result = if response.content.is_empty() {
                    "(no response)".to_string()
                } else {
                    response.content
                };
                return Ok(result);
            }

            task.transition(TaskState::Monitoring);
            for call in response.tool_calls {
                if task.is_cancelled() {
                    task.transition(TaskState::Killed);
                    anyhow::bail!("task cancelled");
                }

                let tool_response = if !self.policy.check_rate_limit(agent_id, &call.name) {
                    ToolResponse::error(
                        &call.id,
                        "Rate limit exceeded",
                        "Rate limit exceeded.",
                        ToolErrorCode::RateLimited,
                        true,
                    )
                } else {
                    self.registry
                        .dispatch(ToolRequest {
                            tool_call_id: call.id.clone(),
                            task_id: task.id.clone(),
                            agent_id: agent_id.to_string(),
                            name: call.name.clone(),
                            args: call.arguments.clone(),
                            cancel: scope.clone(),
                        })
                        .await
                };

                self.metrics.inc_tool_call(&call.name);
                if tool_response.is_error {
                    self.metrics.inc_tool_error(&call.name);
                    warn!(
                        tool = %call.name,
                        code = tool_response.code.map(|c| c.as_str()).unwrap_or(""),
                        "Tool call failed"
                    );
                }

                let tool_content = if tool_response.is_error {
                    format!("Error: {}", tool_response.for_llm)
                } else {
                    tool_response.for_llm.clone()
                };
                messages.push(ChatMessage::assistant_with_call(
                    response.content.clone(),
                    call.clone(),
                ));
                messages.push(ChatMessage::tool(&call.id, &call.name, tool_content));
            }
            task.transition(TaskState::Executing);
        }

        task.transition(TaskState::Failed);
        Ok("(max tool iterations reached)".to_string())
    }

    fn write_replay(&self, task: &Arc<Task>, msg: &InboundMessage, result: &str, status: &str) {
        let record = ReplayRecord {
            task_id: task.id.clone(),
            input: json!({ "content": msg.content.clone(), "channel": msg.channel.clone() }),
            result: result.to_string(),
            tool_calls: None,
            status: status.to_string(),
        };
        if let Err(e) = self.replay.write(&record) {
            debug!("replay write failed: {}", e);
        }
    }
}

/// Keep system + recent messages when the token estimate (chars/4)
/// exceeds the threshold.
pub(crate) fn truncate_messages(
    messages: Vec<ChatMessage>,
    threshold_tokens: usize,
) -> Vec<ChatMessage> {
    if messages.len() <= 2 {
        return messages;
    }
    let total: usize = messages.iter().map(|m| m.content.len() / 4).sum();
    if total <= threshold_tokens {
        return messages;
    }
    if messages.len() <= TRUNCATE_KEEP_RECENT + 1 {
        return messages;
    }

    let mut out = Vec::with_capacity(TRUNCATE_KEEP_RECENT + 1);
    let start = messages.len() - TRUNCATE_KEEP_RECENT;
    if messages[0].role == "system" {
        out.push(messages[0].clone());
    }
    out.extend(messages[start.max(1)..].iter().cloned());
    out
}

/// Cheap digest of the transcript for the advisory checkpoint file.
fn history_hash(messages: &[ChatMessage]) -> String {
    let mut hasher = Sha256::new();
    for m in messages {
        hasher.update(m.role.as_bytes());
        hasher.update(b"\0");
        hasher.update(m.content.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(&hasher.finalize()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: &str) -> ChatMessage {
        ChatMessage {
            role: role.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    #[test]
    fn truncation_keeps_system_and_recent_six() {
        let mut messages = vec![msg("system", "rules")];
        for i in 0..20 {
            messages.push(msg("user", &format!("message number {} {}", i, "x".repeat(100))));
        }
        let truncated = truncate_messages(messages, 10);
        assert_eq!(truncated.len(), 7);
        assert_eq!(truncated[0].role, "system");
        assert!(truncated[6].content.contains("message number 19"));
    }

    #[test]
    fn under_threshold_is_untouched() {
        let messages = vec![msg("system", "s"), msg("user", "hi"), msg("assistant", "yo")];
        let out = truncate_messages(messages.clone(), 1000);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn tiny_transcripts_never_truncate() {
        let messages = vec![msg("system", &"x".repeat(100_000)), msg("user", "hi")];
        let out = truncate_messages(messages, 1);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn history_hash_is_stable_and_sensitive() {
        let a = vec![msg("user", "hello")];
        let b = vec![msg("user", "hello")];
        let c = vec![msg("user", "hello!")];
        assert_eq!(history_hash(&a), history_hash(&b));
        assert_ne!(history_hash(&a), history_hash(&c));
        assert_eq!(history_hash(&a).len(), 16);
    }
}
