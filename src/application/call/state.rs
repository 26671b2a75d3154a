//! Observable call state

use crate::domain::connection::ConnectionState;
use crate::domain::media::{MediaSource, MediaStream};
use chrono::{DateTime, Duration, Utc};

/// Everything the call page renders, published through a watch channel
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    pub local_stream: Option<MediaStream>,
    pub remote_stream: Option<MediaStream>,
    pub is_connecting: bool,
    pub is_connected: bool,
    pub connection_state: ConnectionState,
    /// Dismissible error text
    pub error: Option<String>,
    pub other_participant_joined: bool,
    pub retry_count: u32,
    pub connected_at: Option<DateTime<Utc>>,
    pub media_source: Option<MediaSource>,
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

impl Default for CallSnapshot {
    fn default() -> Self {
        Self {
            local_stream: None,
            remote_stream: None,
            is_connecting: false,
            is_connected: false,
            connection_state: ConnectionState::New,
            error: None,
            other_participant_joined: false,
            retry_count: 0,
            connected_at: None,
            media_source: None,
            audio_enabled: true,
            video_enabled: true,
        }
    }
}

impl CallSnapshot {
    /// Running call duration at `now`
    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.connected_at
            .map(|connected| (now - connected).max(Duration::zero()))
    }

    /// Call timer text, `MM:SS`
    pub fn elapsed_label(&self, now: DateTime<Utc>) -> String {
        let secs = self.elapsed(now).map(|d| d.num_seconds()).unwrap_or(0);
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_label() {
        let now = Utc::now();
        let snapshot = CallSnapshot {
            connected_at: Some(now - Duration::seconds(307)),
            ..Default::default()
        };
        assert_eq!(snapshot.elapsed_label(now), "05:07");
        assert_eq!(CallSnapshot::default().elapsed_label(now), "00:00");
        assert!(CallSnapshot::default().elapsed(now).is_none());
    }
}
