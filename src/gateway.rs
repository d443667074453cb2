use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::agent::AgentLoop;
use crate::bus::{InboundMessage, MessageBus};
use crate::observability::{HealthChecker, Metrics};

pub const DEFAULT_BIND: &str = "127.0.0.1:18790";
const SECRET_HEADER: &str = "x-sypher-inbound-secret";

/// Shared state for the gateway HTTP service.
pub struct GatewayState {
    pub bus: Arc<MessageBus>,
    pub agent_loop: Arc<AgentLoop>,
    pub metrics: Arc<Metrics>,
    pub health: Arc<HealthChecker>,
    /// When non-empty, /inbound and /cancel require the secret header.
    pub inbound_secret: String,
}

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/cancel", post(cancel_handler))
        .route("/inbound", post(inbound_handler))
        .with_state(state)
}

/// Serve until `cancel` fires.
pub async fn serve(
    state: Arc<GatewayState>,
    bind: &str,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let bind = if bind.is_empty() { DEFAULT_BIND } else { bind };
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "Gateway listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> Json<serde_json::Value> {
    Json(state.health.report())
}

#[derive(Deserialize)]
struct MetricsQuery {
    #[serde(default)]
    format: String,
}

async fn metrics_handler(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<MetricsQuery>,
) -> axum::response::Response {
    if query.format == "prometheus" {
        state.metrics.prometheus_format().into_response()
    } else {
        Json(state.metrics.snapshot()).into_response()
    }
}

#[derive(Deserialize)]
struct CancelBody {
    #[serde(default)]
    task_id: String,
}

async fn cancel_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(body): Json<CancelBody>,
) -> axum::response::Response {
    if !secret_ok(&state.inbound_secret, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"ok": false}))).into_response();
    }
    let ok = state.agent_loop.cancel_task(&body.task_id);
    Json(json!({"ok": ok})).into_response()
}

#[derive(Deserialize)]
struct InboundBody {
    /// Channel tag, e.g. "cli" or "whatsapp".
    #[serde(rename = "type", default)]
    channel: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    chat_id: String,
}

async fn inbound_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(body): Json<InboundBody>,
) -> axum::response::Response {
    if !secret_ok(&state.inbound_secret, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"ok": false}))).into_response();
    }

    let channel = if body.channel.is_empty() {
        "cli".to_string()
    } else {
        body.channel
    };
    let chat_id = if body.chat_id.is_empty() {
        "default".to_string()
    } else {
        body.chat_id
    };

    state.bus.publish_inbound(InboundMessage {
        channel,
        sender_id: body.from,
        chat_id,
        content: body.content,
        ..Default::default()
    });

    Json(json!({"ok": true})).into_response()
}

fn secret_ok(expected: &str, headers: &HeaderMap) -> bool {
    if expected.is_empty() {
        return true;
    }
    headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false)
}
