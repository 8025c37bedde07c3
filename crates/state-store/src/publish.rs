//! Fire-and-forget event publication.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{RwLock, broadcast};

use crate::Result;

/// Channel carrying `conflict_detected` / `conflict_resolved` envelopes.
pub const CONFLICT_EVENTS_CHANNEL: &str = "conflict-events";

/// Channel carrying `saga_completed` envelopes.
pub const SAGA_EVENTS_CHANNEL: &str = "saga-events";

/// Publishes JSON envelopes to a named channel.
///
/// Publication is best-effort: callers log failures and carry on.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, channel: &str, payload: Value) -> Result<()>;
}

/// A message observed by the in-memory publisher.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub channel: String,
    pub payload: Value,
}

const BROADCAST_CAPACITY: usize = 1024;

/// In-process publisher backed by a broadcast channel.
///
/// Keeps a history of everything published so tests can assert on it.
#[derive(Debug, Clone)]
pub struct InMemoryPublisher {
    sender: broadcast::Sender<PublishedMessage>,
    history: Arc<RwLock<Vec<PublishedMessage>>>,
}

impl InMemoryPublisher {
    /// Creates a new publisher with no subscribers.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            sender,
            history: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Subscribes to every message published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedMessage> {
        self.sender.subscribe()
    }

    /// Returns the payloads published to `channel`, oldest first.
    pub async fn published(&self, channel: &str) -> Vec<Value> {
        self.history
            .read()
            .await
            .iter()
            .filter(|m| m.channel == channel)
            .map(|m| m.payload.clone())
            .collect()
    }
}

impl Default for InMemoryPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InMemoryPublisher {
    async fn publish(&self, channel: &str, payload: Value) -> Result<()> {
        let message = PublishedMessage {
            channel: channel.to_string(),
            payload,
        };
        self.history.write().await.push(message.clone());
        // No subscribers is not an error for a fire-and-forget channel.
        let _ = self.sender.send(message);
        metrics::counter!("sync_events_published_total", "channel" => channel.to_string())
            .increment(1);
        Ok(())
    }
}
