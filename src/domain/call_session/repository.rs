//! Call session store interface

use crate::domain::call_session::aggregate::{CallSession, CallSessionUpdate};
use crate::domain::call_session::entity::{Booking, ParticipantProfile};
use crate::domain::call_session::value_object::BookingStatus;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{BookingId, SessionId, UserId};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Kind of row change published on the change feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Inserted,
    Updated,
}

/// Row change on the call session table
#[derive(Debug, Clone)]
pub struct CallSessionChange {
    pub kind: ChangeKind,
    pub session: CallSession,
}

/// Persistence and notification store consumed by the call core
///
/// Implemented in the infrastructure layer by the in-memory store and
/// the Postgres store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CallSessionRepository: Send + Sync {
    /// Load a call session by id
    async fn get_call_session(&self, id: &SessionId) -> Result<Option<CallSession>>;

    /// Most recent non-terminal session of a booking
    async fn find_open_by_booking(&self, booking_id: &BookingId) -> Result<Option<CallSession>>;

    /// Insert a freshly created session
    async fn create_call_session(&self, session: &CallSession) -> Result<()>;

    /// Apply a partial write and return the stored row
    async fn update_call_session(
        &self,
        id: &SessionId,
        update: &CallSessionUpdate,
    ) -> Result<CallSession>;

    async fn get_booking(&self, id: &BookingId) -> Result<Option<Booking>>;

    async fn update_booking_status(&self, id: &BookingId, status: BookingStatus) -> Result<()>;

    /// Display identity of a user
    async fn get_participant(&self, user_id: &UserId) -> Result<Option<ParticipantProfile>>;

    /// Subscribe to inserts and updates of call sessions
    fn subscribe_changes(&self) -> broadcast::Receiver<CallSessionChange>;
}
