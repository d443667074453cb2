use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::agent::{AgentLoop, LoopOptions};
use crate::bus::{Event, EventBus, EventHandler, MessageBus};
use crate::config::AppConfig;
use crate::gateway::{self, GatewayState};
use crate::observability::{HealthChecker, Metrics};

/// Observability tap on task lifecycle events; runs on the async
/// dispatcher so it can never slow down the loop.
struct TaskEventLogger;

#[async_trait]
impl EventHandler for TaskEventLogger {
    async fn handle(&self, event: Event) -> anyhow::Result<()> {
        debug!(
            event_type = %event.event_type,
            task_id = event.payload["task_id"].as_str().unwrap_or(""),
            agent_id = event.payload["agent_id"].as_str().unwrap_or(""),
            "Task event"
        );
        Ok(())
    }
}

/// Wire up the runtime and block until shutdown.
pub async fn run(config: AppConfig, safe_mode: bool) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    // 1. Message fabric
    let bus = Arc::new(MessageBus::new(100));
    let event_bus = Arc::new(EventBus::new(100));
    event_bus
        .subscribe_async("task.started", Arc::new(TaskEventLogger))
        .await;
    {
        let event_bus = event_bus.clone();
        let cancel = shutdown.clone();
        tokio::spawn(async move { event_bus.run_async_dispatcher(cancel).await });
    }

    // 2. Observability
    let metrics = Arc::new(Metrics::new());
    let health = Arc::new(HealthChecker::new());
    health.set("bus", "ok");

    // 3. Agent loop
    let agent_loop = Arc::new(AgentLoop::new(
        config.clone(),
        bus.clone(),
        event_bus.clone(),
        metrics.clone(),
        LoopOptions { safe_mode },
    )?);
    health.set(
        "provider",
        if agent_loop.has_provider() || safe_mode {
            "ok"
        } else {
            "none configured"
        },
    );
    {
        let agent_loop = agent_loop.clone();
        let cancel = shutdown.clone();
        tokio::spawn(async move { agent_loop.run(cancel).await });
    }

    // 4. Outbound drain: the cli channel prints locally; other channels
    // are handled by their adapters (out of scope here) and logged.
    {
        let bus = bus.clone();
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let Some(out) = bus.consume_outbound(&cancel).await else {
                    break;
                };
                if out.channel == "cli" {
                    println!("{}", out.content);
                } else {
                    info!(channel = %out.channel, chat_id = %out.chat_id, "Outbound message: {}", out.content);
                }
            }
        });
    }

    // 5. Gateway HTTP service
    let gateway_state = Arc::new(GatewayState {
        bus: bus.clone(),
        agent_loop: agent_loop.clone(),
        metrics,
        health,
        inbound_secret: config.gateway.inbound_secret.clone(),
    });
    let bind = config.gateway.bind.clone();
    {
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = gateway::serve(gateway_state, &bind, cancel).await {
                error!("Gateway error: {}", e);
            }
        });
    }

    info!(
        mode = %config.deployment.mode,
        safe_mode,
        "sypherd running; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    shutdown.cancel();
    bus.close();
    Ok(())
}
