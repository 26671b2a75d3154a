//! Domain result type

use super::error::DomainError;

/// Result of call session, booking and presence operations
pub type Result<T> = std::result::Result<T, DomainError>;
