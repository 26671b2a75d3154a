//! Persistence of call status transitions

use super::error::{CallError, CallResult};
use crate::domain::call_session::{BookingStatus, CallSession, CallSessionRepository, CallStatus};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::events::DomainEvent;
use crate::domain::shared::value_objects::{BookingId, SessionId};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Writes status changes of one session through the store
#[derive(Clone)]
pub struct StatusRecorder {
    repository: Arc<dyn CallSessionRepository>,
    session_id: SessionId,
    booking_id: BookingId,
}

impl StatusRecorder {
    pub fn new(
        repository: Arc<dyn CallSessionRepository>,
        session_id: SessionId,
        booking_id: BookingId,
    ) -> Self {
        Self {
            repository,
            session_id,
            booking_id,
        }
    }

    /// Persist `status`; returns the stored row, or None if nothing was written
    ///
    /// The session is re-read first so the write builds on the latest row.
    /// A transition the stored status does not allow is logged and skipped.
    pub async fn record(&self, status: CallStatus) -> CallResult<Option<CallSession>> {
        let mut session = self
            .repository
            .get_call_session(&self.session_id)
            .await?
            .ok_or(CallError::SessionNotFound(self.session_id))?;

        let update = match session.apply_status(status, Utc::now()) {
            Ok(Some(update)) => update,
            Ok(None) => {
                debug!(session_id = %self.session_id, status = %status, "Status already recorded");
                return Ok(None);
            }
            Err(DomainError::InvalidStateTransition(reason)) => {
                warn!(session_id = %self.session_id, "Skipping status write: {}", reason);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        for event in session.take_events() {
            debug!(
                event_type = event.event_type(),
                session_id = %event.session_id(),
                "Call session event"
            );
        }

        let stored = self
            .repository
            .update_call_session(&self.session_id, &update)
            .await?;
        info!(
            session_id = %self.session_id,
            status = %status,
            duration_seconds = ?stored.duration_seconds(),
            "Call status persisted"
        );

        if status.completes_booking() {
            self.repository
                .update_booking_status(&self.booking_id, BookingStatus::Completed)
                .await?;
            info!(booking_id = %self.booking_id, "Booking marked completed");
        }

        Ok(Some(stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call_session::repository::MockCallSessionRepository;
    use crate::domain::call_session::{CallSessionUpdate, CallType};
    use crate::domain::shared::value_objects::UserId;

    fn session_in(status: CallStatus) -> CallSession {
        CallSession::restore(
            SessionId::new(),
            BookingId::new(),
            UserId::new(),
            UserId::new(),
            CallType::Video,
            status,
            None,
            None,
            None,
            Utc::now(),
        )
    }

    fn store_returning(session: CallSession) -> MockCallSessionRepository {
        let mut repo = MockCallSessionRepository::new();
        let stored = session.clone();
        repo.expect_get_call_session()
            .returning(move |_| Ok(Some(stored.clone())));
        repo
    }

    #[tokio::test]
    async fn test_connected_stamps_started_at() {
        let session = session_in(CallStatus::Ringing);
        let base = session.clone();
        let mut repo = store_returning(session.clone());
        repo.expect_update_call_session()
            .withf(|_, update: &CallSessionUpdate| {
                update.status == CallStatus::Connected && update.started_at.is_some()
            })
            .times(1)
            .returning(move |_, update| {
                let mut stored = base.clone();
                stored.apply_update(update);
                Ok(stored)
            });
        repo.expect_update_booking_status().times(0);

        let recorder = StatusRecorder::new(Arc::new(repo), *session.id(), *session.booking_id());
        let stored = recorder.record(CallStatus::Connected).await.unwrap().unwrap();

        assert_eq!(stored.status(), CallStatus::Connected);
        assert!(stored.started_at().is_some());
    }

    #[tokio::test]
    async fn test_ended_completes_booking() {
        let session = session_in(CallStatus::Connected);
        let base = session.clone();
        let booking_id = *session.booking_id();
        let mut repo = store_returning(session.clone());
        repo.expect_update_call_session()
            .times(1)
            .returning(move |_, update| {
                let mut stored = base.clone();
                stored.apply_update(update);
                Ok(stored)
            });
        repo.expect_update_booking_status()
            .withf(move |id, status| *id == booking_id && *status == BookingStatus::Completed)
            .times(1)
            .returning(|_, _| Ok(()));

        let recorder = StatusRecorder::new(Arc::new(repo), *session.id(), booking_id);
        let stored = recorder.record(CallStatus::Ended).await.unwrap().unwrap();

        assert_eq!(stored.status(), CallStatus::Ended);
        assert!(stored.ended_at().is_some());
    }

    #[tokio::test]
    async fn test_disallowed_transition_writes_nothing() {
        let session = session_in(CallStatus::Cancelled);
        let mut repo = store_returning(session.clone());
        repo.expect_update_call_session().times(0);
        repo.expect_update_booking_status().times(0);

        let recorder = StatusRecorder::new(Arc::new(repo), *session.id(), *session.booking_id());
        assert!(recorder.record(CallStatus::Connected).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_session_is_reported() {
        let mut repo = MockCallSessionRepository::new();
        repo.expect_get_call_session().returning(|_| Ok(None));

        let session_id = SessionId::new();
        let recorder = StatusRecorder::new(Arc::new(repo), session_id, BookingId::new());
        let result = recorder.record(CallStatus::Ended).await;

        assert!(matches!(result, Err(CallError::SessionNotFound(id)) if id == session_id));
    }
}
