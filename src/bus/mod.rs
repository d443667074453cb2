//! Message and event fabric.
//!
//! The message bus carries channel-tagged inbound/outbound traffic between
//! channel adapters and the agent loop. The event bus fans out typed events
//! to sync handlers (must-happen side effects, run on the publisher) and
//! async handlers (observability, drained by a dedicated dispatcher).

mod event_bus;
mod message_bus;

pub use event_bus::{Event, EventBus, EventHandler};
pub use message_bus::MessageBus;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// An incoming message from a channel adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: String,
    pub sender_id: String,
    pub chat_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,
    #[serde(default)]
    pub session_key: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// An outgoing message to a channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
}
