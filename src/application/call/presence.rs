//! Call-page presence of the two participants

use super::state::CallSnapshot;
use super::toast::{Toast, Toaster};
use crate::domain::presence::{
    presence_topic, PresenceChange, PresenceEvent, PresenceMeta, PresenceRoster,
};
use crate::domain::shared::value_objects::{SessionId, UserId};
use crate::infrastructure::realtime::{ChannelEvent, ChannelOptions, RealtimeClient, RealtimeError};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Membership of the presence channel
///
/// Runs a task that keeps `other_participant_joined` of the snapshot up to
/// date. Leaving or dropping the tracker unsubscribes.
pub struct PresenceTracker {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PresenceTracker {
    pub async fn join(
        realtime: &dyn RealtimeClient,
        session_id: &SessionId,
        user_id: UserId,
        snapshot: Arc<watch::Sender<CallSnapshot>>,
        toaster: Arc<dyn Toaster>,
    ) -> Result<Self, RealtimeError> {
        let topic = presence_topic(session_id);
        let key = user_id.to_string();
        let mut channel = realtime
            .subscribe(&topic, ChannelOptions::presence(key.clone()))
            .await?;
        channel.track(&PresenceMeta::now(user_id))?;
        info!(topic = %topic, "Joined presence channel");

        let mut roster = PresenceRoster::new(key);
        roster.set_event_callback(move |change| {
            let joined = change == PresenceChange::OtherJoined;
            snapshot.send_modify(|s| s.other_participant_joined = joined);
            toaster.toast(if joined {
                Toast::participant_joined()
            } else {
                Toast::participant_left()
            });
        });

        let (stop, mut stopped) = oneshot::channel();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    event = channel.recv() => match event {
                        Some(event) => {
                            if let Some(change) = presence_event(event).and_then(|e| roster.apply(e)) {
                                info!(?change, present = roster.present_count(), "Presence changed");
                            }
                        }
                        None => break,
                    },
                }
            }
            channel.close();
            debug!(topic = %topic, "Left presence channel");
        });

        Ok(Self {
            stop: Some(stop),
            task: Some(task),
        })
    }

    /// Unsubscribe and wait for the presence task to finish
    pub async fn leave(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn presence_event(event: ChannelEvent) -> Option<PresenceEvent> {
    match event {
        ChannelEvent::PresenceSync { state } => Some(PresenceEvent::Sync(state.into_keys().collect())),
        ChannelEvent::PresenceJoin { key, .. } => Some(PresenceEvent::Join(key)),
        ChannelEvent::PresenceLeave { key } => Some(PresenceEvent::Leave(key)),
        ChannelEvent::Broadcast { .. } => None,
    }
}
