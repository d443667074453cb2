use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const DEFAULT_ASYNC_BUFFER: usize = 100;

/// A structured event on the bus, e.g. `task.started`.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: String,
    pub payload: Value,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

/// Handler invoked for events of a subscribed type.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> anyhow::Result<()>;
}

/// Typed event fan-out with sync and buffered-async delivery.
///
/// Sync handlers run on the publisher in registration order; the first
/// failure aborts publish and skips the remaining sync handlers. Async
/// handlers are fed from a bounded buffer (drop-newest on overflow) by
/// `run_async_dispatcher`, with errors swallowed.
pub struct EventBus {
    sync_handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    async_handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    async_tx: mpsc::Sender<Event>,
    async_rx: Mutex<mpsc::Receiver<Event>>,
}

impl EventBus {
    pub fn new(async_buffer: usize) -> Self {
        let async_buffer = if async_buffer == 0 {
            DEFAULT_ASYNC_BUFFER
        } else {
            async_buffer
        };
        let (async_tx, async_rx) = mpsc::channel(async_buffer);
        Self {
            sync_handlers: RwLock::new(HashMap::new()),
            async_handlers: RwLock::new(HashMap::new()),
            async_tx,
            async_rx: Mutex::new(async_rx),
        }
    }

    pub async fn subscribe_sync(&self, event_type: &str, handler: Arc<dyn EventHandler>) {
        self.sync_handlers
            .write()
            .await
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
    }

    pub async fn subscribe_async(&self, event_type: &str, handler: Arc<dyn EventHandler>) {
        self.async_handlers
            .write()
            .await
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
    }

    /// Publish an event. Sync handlers complete (or fail) before return;
    /// the event is then offered to the async buffer and dropped if full.
    pub async fn publish(&self, event: Event) -> anyhow::Result<()> {
        let sync = {
            let handlers = self.sync_handlers.read().await;
            handlers.get(&event.event_type).cloned().unwrap_or_default()
        };
        for handler in sync {
            handler.handle(event.clone()).await?;
        }

        let has_async = {
            let handlers = self.async_handlers.read().await;
            handlers
                .get(&event.event_type)
                .map(|v| !v.is_empty())
                .unwrap_or(false)
        };
        if has_async {
            if self.async_tx.try_send(event.clone()).is_err() {
                debug!(event_type = %event.event_type, "Async event buffer full, dropping event");
            }
        }
        Ok(())
    }

    /// Drain the async buffer until `cancel` fires. Handler errors are
    /// logged and swallowed.
    pub async fn run_async_dispatcher(&self, cancel: CancellationToken) {
        let mut rx = self.async_rx.lock().await;
        loop {
            let event = tokio::select! {
                ev = rx.recv() => match ev {
                    Some(ev) => ev,
                    None => return,
                },
                _ = cancel.cancelled() => return,
            };
            let handlers = {
                let map = self.async_handlers.read().await;
                map.get(&event.event_type).cloned().unwrap_or_default()
            };
            for handler in handlers {
                if let Err(e) = handler.handle(event.clone()).await {
                    debug!(event_type = %event.event_type, "Async event handler failed: {}", e);
                }
            }
        }
    }
}
