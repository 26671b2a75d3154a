//! Domain errors

use thiserror::Error;

/// Failures of call session, booking and participant rules
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A stored status cannot move to the requested one
    #[error("Call status cannot change: {0}")]
    InvalidStateTransition(String),

    #[error("{0}")]
    NotFound(String),

    /// The user is not a participant of the session or booking
    #[error("Not a participant: {0}")]
    Unauthorized(String),

    /// A stored or received value does not parse
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Already exists: {0}")]
    Conflict(String),

    /// The backing store failed
    #[error("Storage failure: {0}")]
    Storage(String),
}
