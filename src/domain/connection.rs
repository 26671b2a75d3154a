//! Peer connection state machine

use crate::domain::media::MediaTrack;
use crate::domain::signaling::IceCandidate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregate state of one peer connection
///
/// `new → connecting → connected → {disconnected → connecting | failed, failed}`.
/// `closed` is terminal; `failed` recovers through a rebuilt connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (New, Connecting | Failed | Closed) => true,
            (Connecting, Connected | Failed | Disconnected | Closed) => true,
            (Connected, Disconnected | Failed | Closed) => true,
            (Disconnected, Connecting | Connected | Failed | Closed) => true,
            // a retry rebuilds the connection
            (Failed, New | Closed) => true,
            _ => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback output of a peer connection, as a value
#[derive(Debug, Clone)]
pub enum ConnectionSignal {
    StateChanged(ConnectionState),
    /// Locally gathered candidate, to be sent to the other peer
    LocalCandidate(IceCandidate),
    /// Track received from the other peer
    RemoteTrack { stream_id: String, track: MediaTrack },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(ConnectionState::New.can_transition_to(&ConnectionState::Connecting));
        assert!(ConnectionState::Connecting.can_transition_to(&ConnectionState::Connected));
        assert!(ConnectionState::Connected.can_transition_to(&ConnectionState::Disconnected));
        assert!(ConnectionState::Disconnected.can_transition_to(&ConnectionState::Connecting));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!ConnectionState::New.can_transition_to(&ConnectionState::Connected));
        assert!(!ConnectionState::Connected.can_transition_to(&ConnectionState::Connecting));
        assert!(!ConnectionState::Failed.can_transition_to(&ConnectionState::Connected));
        for next in [
            ConnectionState::New,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Failed,
        ] {
            assert!(!ConnectionState::Closed.can_transition_to(&next));
        }
    }
}
