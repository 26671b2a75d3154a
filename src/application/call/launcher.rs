//! Starting and declining calls on a booking

use super::error::{CallError, CallResult};
use crate::domain::call_session::{
    BookingStatus, CallSession, CallSessionRepository, CallStatus, CallType, Participation,
};
use crate::domain::shared::events::DomainEvent;
use crate::domain::shared::value_objects::{BookingId, SessionId, UserId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where to navigate after joining
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedCall {
    pub session_id: SessionId,
    pub is_initiator: bool,
}

#[derive(Clone)]
pub struct CallLauncher {
    repository: Arc<dyn CallSessionRepository>,
}

impl CallLauncher {
    pub fn new(repository: Arc<dyn CallSessionRepository>) -> Self {
        Self { repository }
    }

    /// Join the call of a booking, creating its session when none is open
    ///
    /// New sessions have the mentor as caller, so the mentor initiates.
    pub async fn join_booking_call(
        &self,
        booking_id: &BookingId,
        user_id: &UserId,
    ) -> CallResult<JoinedCall> {
        let booking = self
            .repository
            .get_booking(booking_id)
            .await?
            .ok_or(CallError::BookingNotFound(*booking_id))?;

        if !booking.involves(user_id) {
            warn!(booking_id = %booking_id, user_id = %user_id, "Rejected call join");
            return Err(CallError::Unauthorized(format!(
                "User {} is not part of booking {}",
                user_id, booking_id
            )));
        }
        if booking.status == BookingStatus::Cancelled {
            return Err(CallError::InvalidInput(format!(
                "Booking {} is cancelled",
                booking_id
            )));
        }

        if let Some(session) = self.repository.find_open_by_booking(booking_id).await? {
            info!(session_id = %session.id(), booking_id = %booking_id, "Joining open call session");
            return Ok(JoinedCall {
                session_id: *session.id(),
                is_initiator: session.caller_id() == user_id,
            });
        }

        let mut session = CallSession::new(
            SessionId::new(),
            *booking_id,
            booking.mentor_user_id,
            booking.mentee_id,
            CallType::Video,
        );
        self.repository.create_call_session(&session).await?;
        for event in session.take_events() {
            debug!(event_type = event.event_type(), session_id = %event.session_id(), "Call session event");
        }
        info!(session_id = %session.id(), booking_id = %booking_id, "Call session created");

        Ok(JoinedCall {
            session_id: *session.id(),
            is_initiator: booking.mentor_user_id == *user_id,
        })
    }

    /// Callee turns down a call that has not connected yet
    pub async fn decline_call(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
    ) -> CallResult<CallSession> {
        let mut session = self
            .repository
            .get_call_session(session_id)
            .await?
            .ok_or(CallError::SessionNotFound(*session_id))?;

        if session.participation(user_id)? != Participation::Callee {
            return Err(CallError::Unauthorized(
                "Only the callee can decline a call".to_string(),
            ));
        }

        match session.apply_status(CallStatus::Cancelled, Utc::now())? {
            Some(update) => {
                let stored = self.repository.update_call_session(session_id, &update).await?;
                info!(session_id = %session_id, "Call declined");
                Ok(stored)
            }
            None => Ok(session),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call_session::Booking;
    use crate::infrastructure::persistence::InMemoryCallSessionRepository;

    async fn setup() -> (Arc<InMemoryCallSessionRepository>, CallLauncher, Booking) {
        let repo = Arc::new(InMemoryCallSessionRepository::new());
        let booking = Booking::new(BookingId::new(), UserId::new(), UserId::new());
        repo.insert_booking(booking.clone()).await;
        let launcher = CallLauncher::new(repo.clone());
        (repo, launcher, booking)
    }

    #[tokio::test]
    async fn test_mentor_creates_and_mentee_reuses_session() {
        let (repo, launcher, booking) = setup().await;

        let mentor = launcher
            .join_booking_call(&booking.id, &booking.mentor_user_id)
            .await
            .unwrap();
        let mentee = launcher
            .join_booking_call(&booking.id, &booking.mentee_id)
            .await
            .unwrap();

        assert!(mentor.is_initiator);
        assert!(!mentee.is_initiator);
        assert_eq!(mentor.session_id, mentee.session_id);
        assert_eq!(repo.session_count().await, 1);

        let session = repo.get_call_session(&mentor.session_id).await.unwrap().unwrap();
        assert_eq!(session.caller_id(), &booking.mentor_user_id);
        assert_eq!(session.status(), CallStatus::Initiated);
        assert_eq!(session.call_type(), CallType::Video);
    }

    #[tokio::test]
    async fn test_outsider_cannot_join() {
        let (_repo, launcher, booking) = setup().await;
        let result = launcher.join_booking_call(&booking.id, &UserId::new()).await;
        assert!(matches!(result, Err(CallError::Unauthorized(_))));

        let missing = launcher
            .join_booking_call(&BookingId::new(), &booking.mentee_id)
            .await;
        assert!(matches!(missing, Err(CallError::BookingNotFound(_))));
    }

    #[tokio::test]
    async fn test_only_callee_declines() {
        let (_repo, launcher, booking) = setup().await;
        let joined = launcher
            .join_booking_call(&booking.id, &booking.mentor_user_id)
            .await
            .unwrap();

        let by_caller = launcher
            .decline_call(&joined.session_id, &booking.mentor_user_id)
            .await;
        assert!(matches!(by_caller, Err(CallError::Unauthorized(_))));

        let declined = launcher
            .decline_call(&joined.session_id, &booking.mentee_id)
            .await
            .unwrap();
        assert_eq!(declined.status(), CallStatus::Cancelled);

        // a declined call is closed, so joining again opens a new session
        let again = launcher
            .join_booking_call(&booking.id, &booking.mentee_id)
            .await
            .unwrap();
        assert_ne!(again.session_id, joined.session_id);
    }
}
