//! JSON frames spoken between `WsRealtimeClient` and the WebSocket hub

use super::ChannelEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frame sent by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientFrame {
    Join {
        ref_id: u64,
        topic: String,
        #[serde(default)]
        broadcast_self: bool,
        #[serde(default)]
        presence_key: Option<String>,
    },
    Broadcast {
        ref_id: u64,
        event: String,
        payload: Value,
    },
    Track {
        ref_id: u64,
        meta: Value,
    },
    Leave {
        ref_id: u64,
    },
}

/// Frame sent by the hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServerFrame {
    Joined {
        ref_id: u64,
    },
    Error {
        ref_id: Option<u64>,
        message: String,
    },
    Event {
        ref_id: u64,
        event: ChannelEvent,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_frame_defaults() {
        let frame: ClientFrame =
            serde_json::from_value(json!({"op": "join", "ref_id": 7, "topic": "chat-1"})).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Join {
                ref_id: 7,
                topic: "chat-1".into(),
                broadcast_self: false,
                presence_key: None,
            }
        );
    }

    #[test]
    fn test_event_frame_nests_channel_event() {
        let frame = ServerFrame::Event {
            ref_id: 3,
            event: ChannelEvent::PresenceLeave { key: "u1".into() },
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({"op": "event", "ref_id": 3, "event": {"kind": "presence_leave", "key": "u1"}})
        );
    }
}
