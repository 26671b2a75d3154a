//! Call orchestration errors

use crate::domain::shared::error::DomainError;
use crate::domain::shared::value_objects::{BookingId, SessionId};
use crate::infrastructure::media::MediaError;
use crate::infrastructure::realtime::RealtimeError;
use crate::infrastructure::webrtc::PeerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("Call session {0} not found")]
    SessionNotFound(SessionId),

    #[error("Booking {0} not found")]
    BookingNotFound(BookingId),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Realtime channel error: {0}")]
    Realtime(#[from] RealtimeError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("Negotiation error: {0}")]
    Negotiation(String),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Domain(DomainError),
}

impl From<DomainError> for CallError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Unauthorized(message) => CallError::Unauthorized(message),
            other => CallError::Domain(other),
        }
    }
}

pub type CallResult<T> = std::result::Result<T, CallError>;
