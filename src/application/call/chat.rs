//! In-call chat channel

use super::error::{CallError, CallResult};
use crate::domain::chat::{chat_topic, ChatMessage, CHAT_EVENT};
use crate::domain::shared::value_objects::SessionId;
use crate::infrastructure::realtime::{
    ChannelEvent, ChannelOptions, RealtimeChannel, RealtimeClient, RealtimeError,
};
use tracing::{debug, warn};

pub struct ChatChannel {
    sender_name: String,
    channel: RealtimeChannel,
}

impl ChatChannel {
    pub async fn open(
        realtime: &dyn RealtimeClient,
        session_id: &SessionId,
        sender_name: impl Into<String>,
    ) -> Result<Self, RealtimeError> {
        let channel = realtime
            .subscribe(&chat_topic(session_id), ChannelOptions::broadcast())
            .await?;
        debug!(topic = %channel.topic(), "Chat channel opened");
        Ok(Self {
            sender_name: sender_name.into(),
            channel,
        })
    }

    /// Publish a line; blank text is rejected
    pub fn send(&self, text: &str) -> CallResult<ChatMessage> {
        let message = ChatMessage::compose(self.sender_name.clone(), text)
            .ok_or_else(|| CallError::InvalidInput("Chat message is empty".to_string()))?;
        self.channel.send(CHAT_EVENT, &message)?;
        Ok(message)
    }

    /// Next line from the other participant; None once closed
    pub async fn next_message(&mut self) -> Option<ChatMessage> {
        loop {
            match self.channel.recv().await? {
                ChannelEvent::Broadcast { event, payload } if event == CHAT_EVENT => {
                    match serde_json::from_value(payload) {
                        Ok(message) => return Some(message),
                        Err(e) => warn!("Discarding malformed chat message: {}", e),
                    }
                }
                _ => continue,
            }
        }
    }

    pub fn close(&mut self) {
        self.channel.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::realtime::InMemoryRealtime;

    #[tokio::test]
    async fn test_chat_line_reaches_other_side_trimmed() {
        let broker = InMemoryRealtime::new();
        let session_id = SessionId::new();
        let mentor = ChatChannel::open(&broker, &session_id, "Grace").await.unwrap();
        let mut mentee = ChatChannel::open(&broker, &session_id, "Alan").await.unwrap();

        let sent = mentor.send("  see you at 5  ").unwrap();
        let got = mentee.next_message().await.unwrap();

        assert_eq!(got, sent);
        assert_eq!(got.message, "see you at 5");
        assert_eq!(got.sender_name, "Grace");
    }

    #[tokio::test]
    async fn test_blank_line_is_rejected() {
        let broker = InMemoryRealtime::new();
        let chat = tokio_test::assert_ok!(ChatChannel::open(&broker, &SessionId::new(), "Grace").await);
        let err = tokio_test::assert_err!(chat.send("   "));
        assert!(matches!(err, CallError::InvalidInput(_)));
    }
}
