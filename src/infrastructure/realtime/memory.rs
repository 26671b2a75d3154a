//! In-process realtime broker

use super::{ChannelBackend, ChannelEvent, ChannelOptions, RealtimeChannel, RealtimeClient, RealtimeError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

struct Member {
    id: u64,
    tx: mpsc::UnboundedSender<ChannelEvent>,
    broadcast_self: bool,
    presence_key: Option<String>,
    meta: Option<Value>,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Vec<Member>>,
}

impl BrokerState {
    fn presence_state(&self, topic: &str) -> HashMap<String, Vec<Value>> {
        let mut state: HashMap<String, Vec<Value>> = HashMap::new();
        if let Some(members) = self.topics.get(topic) {
            for member in members {
                if let (Some(key), Some(meta)) = (&member.presence_key, &member.meta) {
                    state.entry(key.clone()).or_default().push(meta.clone());
                }
            }
        }
        state
    }

    /// Send to every presence participant of `topic`
    fn fan_out_presence(&self, topic: &str, event: &ChannelEvent) {
        if let Some(members) = self.topics.get(topic) {
            for member in members.iter().filter(|m| m.presence_key.is_some()) {
                let _ = member.tx.send(event.clone());
            }
        }
    }

    fn member_count(&self) -> usize {
        self.topics.values().map(Vec::len).sum()
    }
}

struct BrokerInner {
    state: Mutex<BrokerState>,
    next_id: AtomicU64,
    unavailable: AtomicBool,
}

impl BrokerInner {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-memory broker with broadcast and presence per topic
#[derive(Clone)]
pub struct InMemoryRealtime {
    inner: Arc<BrokerInner>,
}

impl InMemoryRealtime {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                state: Mutex::new(BrokerState::default()),
                next_id: AtomicU64::new(1),
                unavailable: AtomicBool::new(false),
            }),
        }
    }

    /// Make new subscriptions fail, as when the service is unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of subscribers on `topic`
    pub fn member_count(&self, topic: &str) -> usize {
        self.inner
            .lock()
            .topics
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Current presence state of `topic`
    pub fn presence_state(&self, topic: &str) -> HashMap<String, Vec<Value>> {
        self.inner.lock().presence_state(topic)
    }

    fn join(
        &self,
        topic: &str,
        options: ChannelOptions,
    ) -> Result<RealtimeChannel, RealtimeError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            warn!(topic, "Realtime broker unavailable, rejecting subscription");
            return Err(RealtimeError::Unavailable(format!(
                "cannot subscribe to {}",
                topic
            )));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.inner.lock();
        if options.presence_key.is_some() {
            let _ = tx.send(ChannelEvent::PresenceSync {
                state: state.presence_state(topic),
            });
        }
        state.topics.entry(topic.to_string()).or_default().push(Member {
            id,
            tx,
            broadcast_self: options.broadcast_self,
            presence_key: options.presence_key.clone(),
            meta: None,
        });
        metrics::gauge!("realtime_members").set(state.member_count() as f64);
        drop(state);

        debug!(topic, member = id, "Subscribed to channel");

        let backend = Arc::new(MemoryBackend {
            broker: self.inner.clone(),
            topic: topic.to_string(),
            member_id: id,
        });
        Ok(RealtimeChannel::new(topic, backend, rx))
    }
}

impl Default for InMemoryRealtime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RealtimeClient for InMemoryRealtime {
    async fn subscribe(
        &self,
        topic: &str,
        options: ChannelOptions,
    ) -> Result<RealtimeChannel, RealtimeError> {
        self.join(topic, options)
    }
}

struct MemoryBackend {
    broker: Arc<BrokerInner>,
    topic: String,
    member_id: u64,
}

impl ChannelBackend for MemoryBackend {
    fn broadcast(&self, event: &str, payload: Value) -> Result<(), RealtimeError> {
        let state = self.broker.lock();
        let members = state
            .topics
            .get(&self.topic)
            .filter(|members| members.iter().any(|m| m.id == self.member_id))
            .ok_or_else(|| RealtimeError::ChannelClosed(self.topic.clone()))?;

        let message = ChannelEvent::Broadcast {
            event: event.to_string(),
            payload,
        };
        for member in members {
            if member.id == self.member_id && !member.broadcast_self {
                continue;
            }
            let _ = member.tx.send(message.clone());
        }
        Ok(())
    }

    fn track(&self, meta: Value) -> Result<(), RealtimeError> {
        let mut state = self.broker.lock();
        let member = state
            .topics
            .get_mut(&self.topic)
            .and_then(|members| members.iter_mut().find(|m| m.id == self.member_id))
            .ok_or_else(|| RealtimeError::ChannelClosed(self.topic.clone()))?;

        let key = member.presence_key.clone().ok_or_else(|| {
            RealtimeError::Rejected(format!("{} was joined without a presence key", self.topic))
        })?;
        member.meta = Some(meta.clone());

        state.fan_out_presence(&self.topic, &ChannelEvent::PresenceJoin { key: key.clone(), meta });
        let sync = ChannelEvent::PresenceSync {
            state: state.presence_state(&self.topic),
        };
        state.fan_out_presence(&self.topic, &sync);

        info!(topic = %self.topic, key = %key, "Presence tracked");
        Ok(())
    }

    fn leave(&self) {
        let mut state = self.broker.lock();
        let Some(members) = state.topics.get_mut(&self.topic) else {
            return;
        };
        let Some(pos) = members.iter().position(|m| m.id == self.member_id) else {
            return;
        };
        let member = members.remove(pos);
        if members.is_empty() {
            state.topics.remove(&self.topic);
        }

        if let (Some(key), Some(_)) = (member.presence_key, member.meta) {
            state.fan_out_presence(&self.topic, &ChannelEvent::PresenceLeave { key: key.clone() });
            let sync = ChannelEvent::PresenceSync {
                state: state.presence_state(&self.topic),
            };
            state.fan_out_presence(&self.topic, &sync);
            info!(topic = %self.topic, key = %key, "Presence left");
        }
        metrics::gauge!("realtime_members").set(state.member_count() as f64);
        debug!(topic = %self.topic, member = self.member_id, "Left channel");
    }
}
