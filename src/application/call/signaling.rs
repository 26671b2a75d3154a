//! Signaling transport over the session's realtime channel

use crate::domain::shared::value_objects::SessionId;
use crate::domain::signaling::{
    signaling_topic, PeerRole, SignalPayload, SignalingMessage, SIGNAL_EVENT,
};
use crate::infrastructure::realtime::{
    ChannelEvent, ChannelOptions, ChannelSender, RealtimeChannel, RealtimeClient, RealtimeError,
};
use tracing::{debug, info, warn};

/// Outbound signaling used by the peer connection manager
pub trait SignalSink: Send + Sync {
    fn send_signal(&self, payload: SignalPayload) -> Result<(), RealtimeError>;
}

/// Clonable sender that stamps role and time on every message
#[derive(Clone)]
pub struct SignalSender {
    role: PeerRole,
    sender: ChannelSender,
}

impl SignalSink for SignalSender {
    fn send_signal(&self, payload: SignalPayload) -> Result<(), RealtimeError> {
        let message = SignalingMessage::new(payload, self.role);
        debug!(kind = message.payload.kind(), sender = %self.role, "Sending signal");
        self.sender.send(SIGNAL_EVENT, &message)
    }
}

/// Signaling channel of one participant
///
/// Messages published before the other participant subscribes are lost.
pub struct SignalingTransport {
    role: PeerRole,
    channel: RealtimeChannel,
}

impl SignalingTransport {
    pub async fn connect(
        client: &dyn RealtimeClient,
        session_id: &SessionId,
        role: PeerRole,
    ) -> Result<Self, RealtimeError> {
        let topic = signaling_topic(session_id);
        let channel = client.subscribe(&topic, ChannelOptions::broadcast()).await?;
        info!(topic = %topic, role = %role, "Signaling channel subscribed");
        Ok(Self { role, channel })
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn send(&self, payload: SignalPayload) -> Result<(), RealtimeError> {
        self.sender().send_signal(payload)
    }

    pub fn sender(&self) -> SignalSender {
        SignalSender {
            role: self.role,
            sender: self.channel.sender(),
        }
    }

    /// Next message from the other role; None once the channel is closed
    pub async fn next_message(&mut self) -> Option<SignalingMessage> {
        loop {
            let event = self.channel.recv().await?;
            let ChannelEvent::Broadcast { event, payload } = event else {
                continue;
            };
            if event != SIGNAL_EVENT {
                continue;
            }
            match serde_json::from_value::<SignalingMessage>(payload) {
                Ok(message) if message.sender == self.role => {
                    debug!("Dropping own signaling message");
                }
                Ok(message) => return Some(message),
                Err(e) => {
                    metrics::counter!("signaling_errors_total").increment(1);
                    warn!("Discarding malformed signaling message: {}", e);
                }
            }
        }
    }

    pub fn close(&mut self) {
        if !self.channel.is_closed() {
            self.channel.close();
            info!(topic = %self.channel.topic(), "Signaling channel closed");
        }
    }
}
