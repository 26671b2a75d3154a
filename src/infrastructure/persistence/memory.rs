//! In-memory call session store
//!
//! Used by the demo, by tests and by `serve` when no database URL is
//! configured. Publishes the same change feed as the Postgres store.

use crate::domain::call_session::{
    Booking, BookingStatus, CallSession, CallSessionChange, CallSessionRepository,
    CallSessionUpdate, ChangeKind, ParticipantProfile,
};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{BookingId, SessionId, UserId};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

const CHANGE_FEED_CAPACITY: usize = 256;

pub struct InMemoryCallSessionRepository {
    sessions: RwLock<HashMap<SessionId, CallSession>>,
    bookings: RwLock<HashMap<BookingId, Booking>>,
    participants: RwLock<HashMap<UserId, ParticipantProfile>>,
    changes: broadcast::Sender<CallSessionChange>,
}

impl InMemoryCallSessionRepository {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            sessions: RwLock::new(HashMap::new()),
            bookings: RwLock::new(HashMap::new()),
            participants: RwLock::new(HashMap::new()),
            changes,
        }
    }

    pub async fn insert_booking(&self, booking: Booking) {
        self.bookings.write().await.insert(booking.id, booking);
    }

    pub async fn insert_participant(&self, profile: ParticipantProfile) {
        self.participants
            .write()
            .await
            .insert(profile.user_id, profile);
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    fn publish(&self, kind: ChangeKind, session: &CallSession) {
        // no subscribers is fine
        let _ = self.changes.send(CallSessionChange {
            kind,
            session: session.clone(),
        });
    }
}

impl Default for InMemoryCallSessionRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CallSessionRepository for InMemoryCallSessionRepository {
    async fn get_call_session(&self, id: &SessionId) -> Result<Option<CallSession>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn find_open_by_booking(&self, booking_id: &BookingId) -> Result<Option<CallSession>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .filter(|s| s.booking_id() == booking_id && s.is_open())
            .max_by_key(|s| s.created_at())
            .cloned())
    }

    async fn create_call_session(&self, session: &CallSession) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(session.id()) {
            return Err(DomainError::Conflict(format!(
                "Call session {} already exists",
                session.id()
            )));
        }
        let mut stored = session.clone();
        stored.take_events();
        sessions.insert(*session.id(), stored.clone());
        drop(sessions);

        debug!("Call session created: {}", session.id());
        self.publish(ChangeKind::Inserted, &stored);
        Ok(())
    }

    async fn update_call_session(
        &self,
        id: &SessionId,
        update: &CallSessionUpdate,
    ) -> Result<CallSession> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions
            .get_mut(id)
            .ok_or_else(|| DomainError::NotFound(format!("Call session {} not found", id)))?;
        stored.apply_update(update);
        let snapshot = stored.clone();
        drop(sessions);

        debug!("Call session {} updated to {}", id, update.status);
        self.publish(ChangeKind::Updated, &snapshot);
        Ok(snapshot)
    }

    async fn get_booking(&self, id: &BookingId) -> Result<Option<Booking>> {
        Ok(self.bookings.read().await.get(id).cloned())
    }

    async fn update_booking_status(&self, id: &BookingId, status: BookingStatus) -> Result<()> {
        let mut bookings = self.bookings.write().await;
        let booking = bookings
            .get_mut(id)
            .ok_or_else(|| DomainError::NotFound(format!("Booking {} not found", id)))?;
        booking.status = status;
        Ok(())
    }

    async fn get_participant(&self, user_id: &UserId) -> Result<Option<ParticipantProfile>> {
        Ok(self.participants.read().await.get(user_id).cloned())
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<CallSessionChange> {
        self.changes.subscribe()
    }
}
