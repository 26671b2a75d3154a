//! MentorCall - call orchestration for a mentorship marketplace
//!
//! Two participants of a booking meet in a one-to-one video call. This
//! crate owns the call session lifecycle, signaling over realtime
//! channels, the peer connection state machine with its retry policy,
//! presence, in-call chat and the HTTP/WebSocket surface around them.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::DomainError;
pub use domain::shared::result::Result;
