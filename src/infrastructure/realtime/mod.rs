//! Realtime publish/subscribe substrate
//!
//! Named topics with broadcast and presence. The in-memory broker backs
//! both in-process calls and the WebSocket hub; `WsRealtimeClient` reaches
//! the hub from another process.

pub mod memory;
pub mod protocol;
pub mod ws_client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

pub use memory::InMemoryRealtime;
pub use ws_client::WsRealtimeClient;

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("Realtime service unavailable: {0}")]
    Unavailable(String),

    #[error("Channel {0} is closed")]
    ChannelClosed(String),

    #[error("Subscription rejected: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Subscription options of a channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOptions {
    /// Deliver own broadcasts back to this subscriber
    pub broadcast_self: bool,
    /// Presence key; set to take part in presence
    pub presence_key: Option<String>,
}

impl ChannelOptions {
    pub fn broadcast() -> Self {
        Self::default()
    }

    pub fn presence(key: impl Into<String>) -> Self {
        Self {
            broadcast_self: false,
            presence_key: Some(key.into()),
        }
    }
}

/// Inbound event on a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelEvent {
    Broadcast { event: String, payload: Value },
    /// Full presence state: key to tracked metas
    PresenceSync { state: HashMap<String, Vec<Value>> },
    PresenceJoin { key: String, meta: Value },
    PresenceLeave { key: String },
}

/// Outbound half of a channel, implemented per transport
pub trait ChannelBackend: Send + Sync {
    fn broadcast(&self, event: &str, payload: Value) -> Result<(), RealtimeError>;

    fn track(&self, meta: Value) -> Result<(), RealtimeError>;

    /// Unsubscribe; must tolerate repeated calls
    fn leave(&self);
}

/// Subscribed channel
///
/// Dropping the channel leaves the topic.
pub struct RealtimeChannel {
    topic: String,
    backend: Arc<dyn ChannelBackend>,
    inbound: mpsc::UnboundedReceiver<ChannelEvent>,
    closed: bool,
}

impl RealtimeChannel {
    pub fn new(
        topic: impl Into<String>,
        backend: Arc<dyn ChannelBackend>,
        inbound: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> Self {
        Self {
            topic: topic.into(),
            backend,
            inbound,
            closed: false,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Broadcast `payload` under `event`
    pub fn send<T: Serialize>(&self, event: &str, payload: &T) -> Result<(), RealtimeError> {
        if self.closed {
            return Err(RealtimeError::ChannelClosed(self.topic.clone()));
        }
        self.backend.broadcast(event, serde_json::to_value(payload)?)
    }

    /// Publish presence metadata for this subscriber
    pub fn track<T: Serialize>(&self, meta: &T) -> Result<(), RealtimeError> {
        if self.closed {
            return Err(RealtimeError::ChannelClosed(self.topic.clone()));
        }
        self.backend.track(serde_json::to_value(meta)?)
    }

    /// Next inbound event; None once closed
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        if self.closed {
            return None;
        }
        self.inbound.recv().await
    }

    /// Clonable outbound handle
    pub fn sender(&self) -> ChannelSender {
        ChannelSender {
            topic: self.topic.clone(),
            backend: self.backend.clone(),
        }
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.inbound.close();
        self.backend.leave();
        debug!(topic = %self.topic, "Channel closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Outbound handle detached from the inbound queue
#[derive(Clone)]
pub struct ChannelSender {
    topic: String,
    backend: Arc<dyn ChannelBackend>,
}

impl ChannelSender {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn send<T: Serialize>(&self, event: &str, payload: &T) -> Result<(), RealtimeError> {
        self.backend.broadcast(event, serde_json::to_value(payload)?)
    }

    pub fn send_value(&self, event: &str, payload: Value) -> Result<(), RealtimeError> {
        self.backend.broadcast(event, payload)
    }

    pub fn track_value(&self, meta: Value) -> Result<(), RealtimeError> {
        self.backend.track(meta)
    }
}

/// Pub/sub client with named channels
#[async_trait]
pub trait RealtimeClient: Send + Sync {
    async fn subscribe(
        &self,
        topic: &str,
        options: ChannelOptions,
    ) -> Result<RealtimeChannel, RealtimeError>;
}
