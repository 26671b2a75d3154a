//! Call-page presence
//!
//! Presence answers "is the other participant on the call page", which is
//! independent from whether media is connected.

use crate::domain::shared::value_objects::{SessionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Channel tracking who is on the call page
pub fn presence_topic(session_id: &SessionId) -> String {
    format!("presence-{}", session_id)
}

/// Metadata each participant tracks on the presence channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceMeta {
    pub user_id: UserId,
    pub online_at: DateTime<Utc>,
}

impl PresenceMeta {
    pub fn now(user_id: UserId) -> Self {
        Self {
            user_id,
            online_at: Utc::now(),
        }
    }
}

/// Presence notification keyed by presence key (the user id)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// Full set of keys currently present
    Sync(Vec<String>),
    Join(String),
    Leave(String),
}

/// Change of the other participant's presence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    OtherJoined,
    OtherLeft,
}

/// Presence state seen by one participant
pub struct PresenceRoster {
    self_key: String,
    present: HashSet<String>,
    event_callback: Option<Arc<dyn Fn(PresenceChange) + Send + Sync>>,
}

impl PresenceRoster {
    pub fn new(self_key: impl Into<String>) -> Self {
        Self {
            self_key: self_key.into(),
            present: HashSet::new(),
            event_callback: None,
        }
    }

    /// Set callback for changes of the other participant
    pub fn set_event_callback<F>(&mut self, callback: F)
    where
        F: Fn(PresenceChange) + Send + Sync + 'static,
    {
        self.event_callback = Some(Arc::new(callback));
    }

    /// Apply a presence event, reporting a change of the other participant
    pub fn apply(&mut self, event: PresenceEvent) -> Option<PresenceChange> {
        let before = self.other_present();

        match event {
            PresenceEvent::Sync(keys) => {
                self.present = keys.into_iter().collect();
            }
            PresenceEvent::Join(key) => {
                self.present.insert(key);
            }
            PresenceEvent::Leave(key) => {
                self.present.remove(&key);
            }
        }

        let change = match (before, self.other_present()) {
            (false, true) => Some(PresenceChange::OtherJoined),
            (true, false) => Some(PresenceChange::OtherLeft),
            _ => None,
        };

        if let (Some(change), Some(callback)) = (change, self.event_callback.as_ref()) {
            callback(change);
        }

        change
    }

    /// Someone other than self is on the page
    pub fn other_present(&self) -> bool {
        self.present.iter().any(|key| *key != self.self_key)
    }

    pub fn present_count(&self) -> usize {
        self.present.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_self_join_is_not_other() {
        let mut roster = PresenceRoster::new("me");
        assert_eq!(roster.apply(PresenceEvent::Join("me".into())), None);
        assert!(!roster.other_present());
    }

    #[test]
    fn test_other_join_and_leave() {
        let mut roster = PresenceRoster::new("me");
        assert_eq!(
            roster.apply(PresenceEvent::Join("you".into())),
            Some(PresenceChange::OtherJoined)
        );
        // sync repeating the same state is not a change
        assert_eq!(
            roster.apply(PresenceEvent::Sync(vec!["me".into(), "you".into()])),
            None
        );
        assert_eq!(
            roster.apply(PresenceEvent::Leave("you".into())),
            Some(PresenceChange::OtherLeft)
        );
    }

    #[test]
    fn test_callback_fires_on_change() {
        let joins = Arc::new(AtomicUsize::new(0));
        let counter = joins.clone();
        let mut roster = PresenceRoster::new("me");
        roster.set_event_callback(move |change| {
            if change == PresenceChange::OtherJoined {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        roster.apply(PresenceEvent::Sync(vec!["you".into()]));
        roster.apply(PresenceEvent::Join("you".into()));
        assert_eq!(joins.load(Ordering::SeqCst), 1);
        assert_eq!(roster.present_count(), 1);
    }
}
