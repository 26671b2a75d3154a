//! Incoming call notifications for the callee

use super::status::StatusRecorder;
use super::toast::{Toast, Toaster};
use crate::domain::call_session::{
    CallSessionChange, CallSessionRepository, CallStatus, CallType, ChangeKind,
};
use crate::domain::shared::value_objects::{BookingId, SessionId, UserId};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const UNKNOWN_CALLER: &str = "Someone";

/// Call waiting for the current user to pick up
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncomingCall {
    pub session_id: SessionId,
    pub booking_id: BookingId,
    pub caller_id: UserId,
    pub caller_name: String,
    pub call_type: CallType,
}

/// Watches the session change feed for calls to `user_id`
pub struct IncomingCallNotifier {
    incoming: Arc<watch::Sender<Option<IncomingCall>>>,
    task: JoinHandle<()>,
}

impl IncomingCallNotifier {
    pub fn start(
        repository: Arc<dyn CallSessionRepository>,
        user_id: UserId,
        toaster: Arc<dyn Toaster>,
    ) -> Self {
        let mut changes = repository.subscribe_changes();
        let (incoming, _) = watch::channel(None);
        let incoming = Arc::new(incoming);

        let state = incoming.clone();
        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        handle_change(&repository, &user_id, toaster.as_ref(), &state, change).await
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Incoming call feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Call session change feed closed");
                        break;
                    }
                }
            }
        });
        info!(user_id = %user_id, "Watching for incoming calls");

        Self { incoming, task }
    }

    pub fn incoming(&self) -> Option<IncomingCall> {
        self.incoming.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<IncomingCall>> {
        self.incoming.subscribe()
    }

    /// Hide the pending call without declining it
    pub fn dismiss(&self) {
        self.incoming.send_replace(None);
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for IncomingCallNotifier {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle_change(
    repository: &Arc<dyn CallSessionRepository>,
    user_id: &UserId,
    toaster: &dyn Toaster,
    state: &watch::Sender<Option<IncomingCall>>,
    change: CallSessionChange,
) {
    let session = change.session;
    if session.callee_id() != user_id {
        return;
    }

    match (change.kind, session.status()) {
        (ChangeKind::Inserted, CallStatus::Initiated) => {
            let caller_name = match repository.get_participant(session.caller_id()).await {
                Ok(Some(profile)) => profile.display_name,
                Ok(None) => UNKNOWN_CALLER.to_string(),
                Err(e) => {
                    warn!(caller_id = %session.caller_id(), "Failed to load caller profile: {}", e);
                    UNKNOWN_CALLER.to_string()
                }
            };
            info!(session_id = %session.id(), caller = %caller_name, "Incoming call");
            toaster.toast(Toast::incoming_call(&caller_name));
            state.send_replace(Some(IncomingCall {
                session_id: *session.id(),
                booking_id: *session.booking_id(),
                caller_id: *session.caller_id(),
                caller_name,
                call_type: session.call_type(),
            }));

            let recorder = StatusRecorder::new(repository.clone(), *session.id(), *session.booking_id());
            if let Err(e) = recorder.record(CallStatus::Ringing).await {
                warn!(session_id = %session.id(), "Failed to mark call as ringing: {}", e);
            }
        }
        (ChangeKind::Updated, CallStatus::Ended | CallStatus::Cancelled) => {
            let session_id = *session.id();
            let cleared = state.send_if_modified(|current| {
                if current.as_ref().map(|c| c.session_id) == Some(session_id) {
                    *current = None;
                    true
                } else {
                    false
                }
            });
            if cleared {
                debug!(session_id = %session_id, "Incoming call withdrawn");
            }
        }
        _ => {}
    }
}
