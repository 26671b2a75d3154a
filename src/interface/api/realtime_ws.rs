//! Realtime WebSocket hub
//!
//! Exposes the in-memory broker to `WsRealtimeClient`s in other processes.
//! Each socket can hold several channel subscriptions, addressed by the
//! client's `ref_id`.

use super::calls_handler::AppState;
use crate::infrastructure::realtime::protocol::{ClientFrame, ServerFrame};
use crate::infrastructure::realtime::{
    ChannelOptions, ChannelSender, InMemoryRealtime, RealtimeClient,
};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// WebSocket handler
pub async fn realtime_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state.broker))
}

struct Subscription {
    sender: ChannelSender,
    forward: JoinHandle<()>,
}

/// Channel subscriptions of one socket
struct HubSession {
    broker: InMemoryRealtime,
    outbound: mpsc::UnboundedSender<ServerFrame>,
    subscriptions: HashMap<u64, Subscription>,
}

impl HubSession {
    fn new(broker: InMemoryRealtime, outbound: mpsc::UnboundedSender<ServerFrame>) -> Self {
        Self {
            broker,
            outbound,
            subscriptions: HashMap::new(),
        }
    }

    fn reply(&self, frame: ServerFrame) {
        let _ = self.outbound.send(frame);
    }

    fn error(&self, ref_id: Option<u64>, message: impl Into<String>) {
        self.reply(ServerFrame::Error {
            ref_id,
            message: message.into(),
        });
    }

    async fn handle(&mut self, frame: ClientFrame) {
        match frame {
            ClientFrame::Join {
                ref_id,
                topic,
                broadcast_self,
                presence_key,
            } => {
                if self.subscriptions.contains_key(&ref_id) {
                    self.error(Some(ref_id), format!("ref_id {} already in use", ref_id));
                    return;
                }
                let options = ChannelOptions {
                    broadcast_self,
                    presence_key,
                };
                let mut channel = match self.broker.subscribe(&topic, options).await {
                    Ok(channel) => channel,
                    Err(e) => {
                        self.error(Some(ref_id), e.to_string());
                        return;
                    }
                };
                self.reply(ServerFrame::Joined { ref_id });

                let sender = channel.sender();
                let outbound = self.outbound.clone();
                let forward = tokio::spawn(async move {
                    while let Some(event) = channel.recv().await {
                        if outbound.send(ServerFrame::Event { ref_id, event }).is_err() {
                            break;
                        }
                    }
                });
                debug!(topic = %topic, ref_id, "Hub client joined channel");
                self.subscriptions.insert(ref_id, Subscription { sender, forward });
            }
            ClientFrame::Broadcast {
                ref_id,
                event,
                payload,
            } => match self.subscriptions.get(&ref_id) {
                Some(subscription) => {
                    if let Err(e) = subscription.sender.send_value(&event, payload) {
                        self.error(Some(ref_id), e.to_string());
                    }
                }
                None => self.error(Some(ref_id), "Unknown channel"),
            },
            ClientFrame::Track { ref_id, meta } => match self.subscriptions.get(&ref_id) {
                Some(subscription) => {
                    if let Err(e) = subscription.sender.track_value(meta) {
                        self.error(Some(ref_id), e.to_string());
                    }
                }
                None => self.error(Some(ref_id), "Unknown channel"),
            },
            ClientFrame::Leave { ref_id } => {
                // dropping the forwarded channel leaves the topic
                if let Some(subscription) = self.subscriptions.remove(&ref_id) {
                    subscription.forward.abort();
                    debug!(topic = %subscription.sender.topic(), ref_id, "Hub client left channel");
                }
            }
        }
    }
}

impl Drop for HubSession {
    fn drop(&mut self) {
        for (_, subscription) in self.subscriptions.drain() {
            subscription.forward.abort();
        }
    }
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, broker: InMemoryRealtime) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ServerFrame>();

    info!("Realtime client connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            match serde_json::to_string(&frame) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        debug!("Failed to send frame to realtime client");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize frame: {}", e);
                }
            }
        }
    });

    let mut session = HubSession::new(broker, outbound);
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => session.handle(frame).await,
                    Err(e) => {
                        warn!("Malformed realtime frame: {}", e);
                        session.error(None, format!("Malformed frame: {}", e));
                    }
                },
                Message::Close(_) => {
                    debug!("Received close message");
                    break;
                }
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    info!("Realtime client disconnected");
}
