//! Call session bounded context
//!
//! The persisted record of one call on a booking, the booking itself as
//! seen by the call core, and the store port.

pub mod aggregate;
pub mod entity;
pub mod event;
pub mod repository;
pub mod value_object;

pub use aggregate::{CallSession, CallSessionUpdate, Participation};
pub use entity::{Booking, ParticipantProfile};
pub use event::CallSessionEvent;
pub use repository::{CallSessionChange, CallSessionRepository, ChangeKind};
pub use value_object::{BookingStatus, CallStatus, CallType};
