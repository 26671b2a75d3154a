//! Domain layer - Core business logic and rules
//!
//! This layer contains:
//! - The call session aggregate and the store port it is persisted through
//! - Signaling, presence and chat messages exchanged over realtime channels
//! - The peer connection state machine and media handles

pub mod call_session;
pub mod chat;
pub mod connection;
pub mod media;
pub mod presence;
pub mod shared;
pub mod signaling;

// Re-export commonly used types
pub use shared::{DomainError, Result};
