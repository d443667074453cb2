//! The agent loop: per-message orchestration of intent, routing,
//! idempotency, task lifecycle, the LLM/tool iteration, and replies.

mod bootstrap;
mod commands;
mod main_loop;

pub use bootstrap::load_bootstrap_files;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::audit::AuditLogger;
use crate::bus::{EventBus, MessageBus, OutboundMessage};
use crate::cli_session::CliSessionManager;
use crate::config::AppConfig;
use crate::idempotency::IdempotencyCache;
use crate::intent::IntentParser;
use crate::observability::Metrics;
use crate::policy::PolicyEvaluator;
use crate::process::ProcessTracker;
use crate::providers::FallbackProvider;
use crate::replay::ReplayWriter;
use crate::task::TaskManager;
use crate::tools::{
    ExecTool, InvokeCliAgentTool, KillTool, MessageTool, StreamCommandTool, TailOutputTool,
    ToolRegistry, WebFetchTool,
};

/// Options for constructing the loop.
#[derive(Debug, Clone, Default)]
pub struct LoopOptions {
    /// Safe mode disables the LLM and every tool side effect.
    pub safe_mode: bool,
}

/// Long-lived worker that drains the inbound queue and produces replies.
pub struct AgentLoop {
    pub(crate) cfg: AppConfig,
    pub(crate) bus: Arc<MessageBus>,
    pub(crate) event_bus: Arc<EventBus>,
    pub(crate) task_mgr: Arc<TaskManager>,
    pub(crate) provider: Option<Arc<FallbackProvider>>,
    pub(crate) registry: ToolRegistry,
    pub(crate) message_tool: Arc<MessageTool>,
    pub(crate) tracker: Arc<ProcessTracker>,
    pub(crate) policy: Arc<PolicyEvaluator>,
    pub(crate) replay: ReplayWriter,
    pub(crate) idempotency: Option<IdempotencyCache>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) cli_sessions: CliSessionManager,
    pub(crate) intent: IntentParser,
    pub(crate) safe_mode: bool,
}

impl AgentLoop {
    pub fn new(
        cfg: AppConfig,
        bus: Arc<MessageBus>,
        event_bus: Arc<EventBus>,
        metrics: Arc<Metrics>,
        opts: LoopOptions,
    ) -> anyhow::Result<Self> {
        let task_mgr = Arc::new(TaskManager::new(cfg.task.timeout_sec));
        let audit = Arc::new(AuditLogger::new(&cfg.audit.dir, &cfg.audit.integrity));
        let tracker = Arc::new(ProcessTracker::new());
        let policy = Arc::new(PolicyEvaluator::new(
            cfg.policies.clone(),
            &cfg.agents.defaults.workspace,
        ));

        let fallback = Arc::new(
            FallbackProvider::from_config(&cfg).with_metrics(metrics.clone()),
        );
        let provider = if fallback.entries().is_empty() {
            None
        } else {
            Some(fallback)
        };

        let message_tool = Arc::new(MessageTool::new(bus.clone(), opts.safe_mode));
        let registry = ToolRegistry::new(vec![
            Arc::new(ExecTool::new(
                &cfg,
                audit.clone(),
                tracker.clone(),
                opts.safe_mode,
            )),
            Arc::new(KillTool::new(tracker.clone(), opts.safe_mode)),
            Arc::new(WebFetchTool::new(policy.clone(), opts.safe_mode)?),
            message_tool.clone(),
            Arc::new(TailOutputTool::new(&cfg, opts.safe_mode)),
            Arc::new(StreamCommandTool::new(
                &cfg,
                bus.clone(),
                message_tool.clone(),
                opts.safe_mode,
            )),
            Arc::new(InvokeCliAgentTool::new(&cfg, opts.safe_mode)),
        ]);

        let idempotency = if cfg.idempotency.enabled {
            let ttl = std::time::Duration::from_secs(cfg.idempotency.ttl_sec);
            Some(IdempotencyCache::new(ttl))
        } else {
            None
        };

        let replay = ReplayWriter::new(&cfg.replay);

        Ok(Self {
            cfg,
            bus,
            event_bus,
            task_mgr,
            provider,
            registry,
            message_tool,
            tracker,
            policy,
            replay,
            idempotency,
            metrics,
            cli_sessions: CliSessionManager::new(),
            intent: IntentParser::new(),
            safe_mode: opts.safe_mode,
        })
    }

    /// Process inbound messages until `cancel` fires. One message at a
    /// time; replies keep per-chat order.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(safe_mode = self.safe_mode, "Agent loop started");
        loop {
            let msg = match self.bus.consume_inbound(&cancel).await {
                Some(m) => m,
                None => break,
            };

            let channel = msg.channel.clone();
            let chat_id = msg.chat_id.clone();
            let response = match self.process_message(msg).await {
                Ok(r) => r,
                Err(e) => {
                    error!("Message processing failed: {}", e);
                    format!("Error: {}", e)
                }
            };

            if !response.is_empty() {
                self.bus.publish_outbound(OutboundMessage {
                    channel,
                    chat_id,
                    content: response,
                });
            }
        }
        info!("Agent loop stopped");
    }

    /// Whether any LLM provider is configured.
    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Set the cancelled flag on a task. Returns true iff it existed.
    pub fn cancel_task(&self, task_id: &str) -> bool {
        self.task_mgr.cancel(task_id)
    }

    pub fn task_manager(&self) -> &Arc<TaskManager> {
        &self.task_mgr
    }
}
