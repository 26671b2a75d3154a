//! Realtime client over the WebSocket hub

use super::protocol::{ClientFrame, ServerFrame};
use super::{ChannelBackend, ChannelEvent, ChannelOptions, RealtimeChannel, RealtimeClient, RealtimeError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct Routes {
    pending: HashMap<u64, oneshot::Sender<Result<(), String>>>,
    channels: HashMap<u64, mpsc::UnboundedSender<ChannelEvent>>,
}

struct Shared {
    routes: Mutex<Routes>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn dispatch(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::Joined { ref_id } => {
                if let Some(tx) = self.lock().pending.remove(&ref_id) {
                    let _ = tx.send(Ok(()));
                }
            }
            ServerFrame::Error { ref_id: Some(ref_id), message } => {
                if let Some(tx) = self.lock().pending.remove(&ref_id) {
                    let _ = tx.send(Err(message));
                } else {
                    warn!(ref_id, %message, "Realtime hub reported channel error");
                }
            }
            ServerFrame::Error { ref_id: None, message } => {
                warn!(%message, "Realtime hub error");
            }
            ServerFrame::Event { ref_id, event } => {
                let routes = self.lock();
                if let Some(tx) = routes.channels.get(&ref_id) {
                    let _ = tx.send(event);
                }
            }
        }
    }

    /// Fail pending joins and end every channel stream
    fn shutdown(&self) {
        let mut routes = self.lock();
        for (_, tx) in routes.pending.drain() {
            let _ = tx.send(Err("connection closed".to_string()));
        }
        routes.channels.clear();
    }
}

/// `RealtimeClient` connected to a remote hub
pub struct WsRealtimeClient {
    outbound: mpsc::UnboundedSender<ClientFrame>,
    shared: Arc<Shared>,
    next_ref: AtomicU64,
    tasks: Vec<JoinHandle<()>>,
}

impl WsRealtimeClient {
    pub async fn connect(url: &str) -> Result<Self, RealtimeError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| RealtimeError::Unavailable(format!("websocket connect failed: {}", e)))?;
        info!(url, "Connected to realtime hub");

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientFrame>();
        let shared = Arc::new(Shared {
            routes: Mutex::new(Routes::default()),
        });

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                match serde_json::to_string(&frame) {
                    Ok(text) => {
                        if ws_write.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to encode realtime frame: {}", e),
                }
            }
            let _ = ws_write.close().await;
        });

        let reader_shared = shared.clone();
        let reader = tokio::spawn(async move {
            while let Some(message) = ws_read.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(frame) => reader_shared.dispatch(frame),
                        Err(e) => warn!("Invalid frame from realtime hub: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Realtime hub connection error: {}", e);
                        break;
                    }
                }
            }
            reader_shared.shutdown();
            info!("Realtime hub connection closed");
        });

        Ok(Self {
            outbound,
            shared,
            next_ref: AtomicU64::new(1),
            tasks: vec![writer, reader],
        })
    }
}

impl Drop for WsRealtimeClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl RealtimeClient for WsRealtimeClient {
    async fn subscribe(
        &self,
        topic: &str,
        options: ChannelOptions,
    ) -> Result<RealtimeChannel, RealtimeError> {
        let ref_id = self.next_ref.fetch_add(1, Ordering::SeqCst);
        let (ack_tx, ack_rx) = oneshot::channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        {
            let mut routes = self.shared.lock();
            routes.pending.insert(ref_id, ack_tx);
            routes.channels.insert(ref_id, event_tx);
        }

        let join = ClientFrame::Join {
            ref_id,
            topic: topic.to_string(),
            broadcast_self: options.broadcast_self,
            presence_key: options.presence_key,
        };
        if self.outbound.send(join).is_err() {
            self.shared.lock().channels.remove(&ref_id);
            return Err(RealtimeError::Unavailable("hub connection closed".to_string()));
        }

        let outcome = tokio::time::timeout(JOIN_TIMEOUT, ack_rx).await;
        let failure = match outcome {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(message))) => Some(RealtimeError::Rejected(message)),
            Ok(Err(_)) => Some(RealtimeError::Unavailable("hub connection closed".to_string())),
            Err(_) => Some(RealtimeError::Unavailable(format!(
                "timed out joining {}",
                topic
            ))),
        };
        if let Some(err) = failure {
            let mut routes = self.shared.lock();
            routes.pending.remove(&ref_id);
            routes.channels.remove(&ref_id);
            return Err(err);
        }

        debug!(topic, ref_id, "Joined remote channel");
        let backend = Arc::new(WsBackend {
            ref_id,
            topic: topic.to_string(),
            outbound: self.outbound.clone(),
            shared: self.shared.clone(),
        });
        Ok(RealtimeChannel::new(topic, backend, event_rx))
    }
}

struct WsBackend {
    ref_id: u64,
    topic: String,
    outbound: mpsc::UnboundedSender<ClientFrame>,
    shared: Arc<Shared>,
}

impl WsBackend {
    fn push(&self, frame: ClientFrame) -> Result<(), RealtimeError> {
        if !self.shared.lock().channels.contains_key(&self.ref_id) {
            return Err(RealtimeError::ChannelClosed(self.topic.clone()));
        }
        self.outbound
            .send(frame)
            .map_err(|_| RealtimeError::Transport("hub connection closed".to_string()))
    }
}

impl ChannelBackend for WsBackend {
    fn broadcast(&self, event: &str, payload: Value) -> Result<(), RealtimeError> {
        self.push(ClientFrame::Broadcast {
            ref_id: self.ref_id,
            event: event.to_string(),
            payload,
        })
    }

    fn track(&self, meta: Value) -> Result<(), RealtimeError> {
        self.push(ClientFrame::Track {
            ref_id: self.ref_id,
            meta,
        })
    }

    fn leave(&self) {
        if self.shared.lock().channels.remove(&self.ref_id).is_some() {
            let _ = self.outbound.send(ClientFrame::Leave {
                ref_id: self.ref_id,
            });
        }
    }
}
