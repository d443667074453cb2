use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::{InboundMessage, OutboundMessage};

const DEFAULT_CAPACITY: usize = 100;

/// Bounded inbound/outbound message queues for the agent loop.
///
/// Publish never blocks: a full queue drops the newest message so a
/// bursting channel adapter is never stalled behind the loop. Consume
/// blocks until a message arrives or the bus is closed.
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<mpsc::Receiver<InboundMessage>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: Mutex<mpsc::Receiver<OutboundMessage>>,
    closed: CancellationToken,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_CAPACITY
        } else {
            capacity
        };
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        Self {
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: Mutex::new(outbound_rx),
            closed: CancellationToken::new(),
        }
    }

    /// Publish an inbound message. Dropped silently when the queue is full
    /// or the bus is closed.
    pub fn publish_inbound(&self, msg: InboundMessage) {
        if self.closed.is_cancelled() {
            return;
        }
        let _ = self.inbound_tx.try_send(msg);
    }

    /// Consume the next inbound message. Returns `None` when `cancel`
    /// fires or the bus is closed.
    pub async fn consume_inbound(&self, cancel: &CancellationToken) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        tokio::select! {
            msg = rx.recv() => msg,
            _ = cancel.cancelled() => None,
            _ = self.closed.cancelled() => None,
        }
    }

    /// Publish an outbound message. Same drop-newest policy as inbound.
    pub fn publish_outbound(&self, msg: OutboundMessage) {
        if self.closed.is_cancelled() {
            return;
        }
        let _ = self.outbound_tx.try_send(msg);
    }

    /// Consume the next outbound message. Returns `None` when `cancel`
    /// fires or the bus is closed.
    pub async fn consume_outbound(&self, cancel: &CancellationToken) -> Option<OutboundMessage> {
        let mut rx = self.outbound_rx.lock().await;
        tokio::select! {
            msg = rx.recv() => msg,
            _ = cancel.cancelled() => None,
            _ = self.closed.cancelled() => None,
        }
    }

    /// Close the bus, unblocking all consumers and refusing new publishes.
    pub fn close(&self) {
        self.closed.cancel();
    }
}
