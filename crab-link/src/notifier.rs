//! Cross-context notifier
//!
//! Contexts sharing one persisted registry tell each other when they
//! connect or lose a printer. Delivery is best-effort and at most once;
//! each context still verifies its own links on the liveness tick.

use parking_lot::Mutex;
use shared::message::{ContextEnvelope, ContextMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

/// Publish/subscribe channel between contexts
pub trait ContextBus: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>);
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Vec<u8>>;
}

/// In-process bus; clones share topics
///
/// Stands in for a browser broadcast channel or an IPC bus when every
/// context lives in one process (tests, multi-window desktop shells).
#[derive(Clone)]
pub struct LocalBus {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>>,
    capacity: usize,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Vec<u8>> {
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextBus for LocalBus {
    fn publish(&self, topic: &str, payload: Vec<u8>) {
        // No subscribers is fine
        let _ = self.sender(topic).send(payload);
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Vec<u8>> {
        self.sender(topic).subscribe()
    }
}

/// This context's end of the bus
pub struct ContextNotifier {
    bus: Arc<dyn ContextBus>,
    topic: String,
    origin: Uuid,
}

impl ContextNotifier {
    pub fn new(bus: Arc<dyn ContextBus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
            origin: Uuid::new_v4(),
        }
    }

    /// Id stamped on every message this context sends
    pub fn origin(&self) -> Uuid {
        self.origin
    }

    pub fn publish(&self, message: ContextMessage) {
        let printer_id = message.printer().id.clone();
        match ContextEnvelope::new(self.origin, message).to_bytes() {
            Ok(bytes) => {
                debug!(printer_id = %printer_id, topic = %self.topic, "Context message published");
                self.bus.publish(&self.topic, bytes);
            }
            Err(e) => warn!(error = %e, "Failed to encode context message"),
        }
    }

    pub fn subscribe(&self) -> ContextSubscription {
        ContextSubscription {
            rx: self.bus.subscribe(&self.topic),
            origin: self.origin,
        }
    }
}

/// Messages from other contexts
pub struct ContextSubscription {
    rx: broadcast::Receiver<Vec<u8>>,
    origin: Uuid,
}

impl ContextSubscription {
    /// Next message from another context; `None` once the bus is gone
    ///
    /// Own messages and undecodable payloads are skipped. Messages lost to
    /// lag are dropped.
    pub async fn recv(&mut self) -> Option<ContextMessage> {
        loop {
            match self.rx.recv().await {
                Ok(bytes) => match ContextEnvelope::from_bytes(&bytes) {
                    Ok(envelope) if envelope.origin == self.origin => continue,
                    Ok(envelope) => return Some(envelope.message),
                    Err(e) => warn!(error = %e, "Ignoring undecodable context message"),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Context subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
