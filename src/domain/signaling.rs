//! Signaling messages exchanged between the two peers of a call

use crate::domain::shared::value_objects::SessionId;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Broadcast event name carrying signaling messages
pub const SIGNAL_EVENT: &str = "webrtc-signal";

/// Channel carrying offer/answer/ICE for a session
pub fn signaling_topic(session_id: &SessionId) -> String {
    format!("webrtc-{}", session_id)
}

/// Negotiation role of a participant
///
/// The caller of a session is the initiator and sends the offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    Initiator,
    Receiver,
}

impl PeerRole {
    pub fn from_initiator(is_initiator: bool) -> Self {
        if is_initiator {
            PeerRole::Initiator
        } else {
            PeerRole::Receiver
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            PeerRole::Initiator => PeerRole::Receiver,
            PeerRole::Receiver => PeerRole::Initiator,
        }
    }

    pub fn is_initiator(&self) -> bool {
        matches!(self, PeerRole::Initiator)
    }

    /// Label drawn on placeholder video
    pub fn label(&self) -> &'static str {
        match self {
            PeerRole::Initiator => "INITIATOR",
            PeerRole::Receiver => "RECEIVER",
        }
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerRole::Initiator => f.write_str("initiator"),
            PeerRole::Receiver => f.write_str("receiver"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// SDP offer or answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate in browser JSON form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

/// Typed body of a signaling message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum SignalPayload {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
    /// Peer connection exists and the sender can take an offer
    Ready,
}

impl SignalPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalPayload::Offer(_) => "offer",
            SignalPayload::Answer(_) => "answer",
            SignalPayload::IceCandidate(_) => "ice-candidate",
            SignalPayload::Ready => "ready",
        }
    }
}

/// Message on the signaling channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingMessage {
    #[serde(flatten)]
    pub payload: SignalPayload,
    pub sender: PeerRole,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl SignalingMessage {
    pub fn new(payload: SignalPayload, sender: PeerRole) -> Self {
        Self {
            payload,
            sender,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}
