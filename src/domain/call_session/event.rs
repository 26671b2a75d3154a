//! Call session domain events

use crate::domain::call_session::value_object::CallStatus;
use crate::domain::shared::events::{DomainEvent, EventMetadata};
use crate::domain::shared::value_objects::{BookingId, SessionId, UserId};
use serde::{Deserialize, Serialize};

/// Call session created by the launching participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSessionCreated {
    pub metadata: EventMetadata,
    pub session_id: SessionId,
    pub booking_id: BookingId,
    pub caller_id: UserId,
    pub callee_id: UserId,
}

impl DomainEvent for CallSessionCreated {
    fn event_type(&self) -> &'static str {
        "call_session.created"
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}

/// Persisted status moved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSessionStatusChanged {
    pub metadata: EventMetadata,
    pub session_id: SessionId,
    pub from: CallStatus,
    pub to: CallStatus,
    pub duration_seconds: Option<i64>,
}

impl DomainEvent for CallSessionStatusChanged {
    fn event_type(&self) -> &'static str {
        "call_session.status_changed"
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CallSessionEvent {
    Created(CallSessionCreated),
    StatusChanged(CallSessionStatusChanged),
}

impl CallSessionEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            CallSessionEvent::Created(e) => e.session_id,
            CallSessionEvent::StatusChanged(e) => e.session_id,
        }
    }
}

impl DomainEvent for CallSessionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CallSessionEvent::Created(e) => e.event_type(),
            CallSessionEvent::StatusChanged(e) => e.event_type(),
        }
    }

    fn metadata(&self) -> &EventMetadata {
        match self {
            CallSessionEvent::Created(e) => &e.metadata,
            CallSessionEvent::StatusChanged(e) => &e.metadata,
        }
    }
}
