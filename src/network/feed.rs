//! Live Feed
//!
//! Fire-and-forget events for connected clients: the live battle index and
//! winner announcements.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

/// Channel carrying battle index updates.
pub const BATTLES_CHANNEL: &str = "battles";

/// Channel carrying winner announcements.
pub const WINNERS_CHANNEL: &str = "winners";

/// One published event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedEvent {
    /// Channel name.
    pub channel: String,
    /// Event name within the channel.
    pub event: String,
    /// Event body.
    pub payload: Value,
}

/// Feed errors.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Payload could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    /// Transport refused the event.
    #[error("publish failed: {0}")]
    Publish(String),
}

/// Event sink.
#[async_trait]
pub trait LiveFeed: Send + Sync {
    /// Publish one event.
    async fn emit(&self, event: FeedEvent) -> Result<(), FeedError>;
}

/// In-process feed over a tokio broadcast channel.
pub struct BroadcastFeed {
    tx: broadcast::Sender<FeedEvent>,
}

impl BroadcastFeed {
    /// Feed buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive every event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl LiveFeed for BroadcastFeed {
    async fn emit(&self, event: FeedEvent) -> Result<(), FeedError> {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
        Ok(())
    }
}

/// Build an event from any serializable payload.
pub fn event(channel: &str, name: &str, payload: &impl Serialize) -> Result<FeedEvent, FeedError> {
    Ok(FeedEvent {
        channel: channel.to_string(),
        event: name.to_string(),
        payload: serde_json::to_value(payload)?,
    })
}
