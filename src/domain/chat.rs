//! In-call chat messages

use crate::domain::shared::value_objects::SessionId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Broadcast event name for chat lines
pub const CHAT_EVENT: &str = "message";

/// Channel carrying chat lines of a session
pub fn chat_topic(session_id: &SessionId) -> String {
    format!("chat-{}", session_id)
}

/// One chat line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender_name: String,
    pub message: String,
}

impl ChatMessage {
    /// Build a chat line; returns None for blank text
    pub fn compose(sender_name: impl Into<String>, text: &str) -> Option<Self> {
        let message = text.trim();
        if message.is_empty() {
            return None;
        }
        Some(Self {
            id: Uuid::new_v4().to_string(),
            sender_name: sender_name.into(),
            message: message.to_string(),
        })
    }
}
