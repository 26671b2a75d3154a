//! Call session aggregate root

use crate::domain::call_session::event::{
    CallSessionCreated, CallSessionEvent, CallSessionStatusChanged,
};
use crate::domain::call_session::value_object::{CallStatus, CallType};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::events::EventMetadata;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{BookingId, SessionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of the call a user is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Participation {
    Caller,
    Callee,
}

/// Partial write produced by a status transition
///
/// `started_at` is a candidate stamp: stores keep an existing value and
/// only fill it when empty. `reopen` clears the end fields when a failed
/// call reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSessionUpdate {
    pub status: CallStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub reopen: bool,
}

impl CallSessionUpdate {
    pub fn status(status: CallStatus) -> Self {
        Self {
            status,
            started_at: None,
            ended_at: None,
            duration_seconds: None,
            reopen: false,
        }
    }
}

/// Call session aggregate root
///
/// One record per call attempt on a booking. The caller is always the
/// initiator of the peer negotiation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSession {
    id: SessionId,
    booking_id: BookingId,
    caller_id: UserId,
    callee_id: UserId,
    call_type: CallType,
    status: CallStatus,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    duration_seconds: Option<i64>,
    created_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<CallSessionEvent>,
}

impl CallSession {
    /// Create a new session in `initiated`
    pub fn new(
        id: SessionId,
        booking_id: BookingId,
        caller_id: UserId,
        callee_id: UserId,
        call_type: CallType,
    ) -> Self {
        let mut session = Self {
            id,
            booking_id,
            caller_id,
            callee_id,
            call_type,
            status: CallStatus::Initiated,
            started_at: None,
            ended_at: None,
            duration_seconds: None,
            created_at: Utc::now(),
            events: Vec::new(),
        };

        session.record_event(CallSessionEvent::Created(CallSessionCreated {
            metadata: EventMetadata::at(session.created_at),
            session_id: id,
            booking_id,
            caller_id,
            callee_id,
        }));

        session
    }

    /// Rebuild a session from storage without recording events
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: SessionId,
        booking_id: BookingId,
        caller_id: UserId,
        callee_id: UserId,
        call_type: CallType,
        status: CallStatus,
        started_at: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
        duration_seconds: Option<i64>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            booking_id,
            caller_id,
            callee_id,
            call_type,
            status,
            started_at,
            ended_at,
            duration_seconds,
            created_at,
            events: Vec::new(),
        }
    }

    /// Move to `status`, returning the fields to persist
    ///
    /// Returns `Ok(None)` when the session is already in `status`.
    pub fn apply_status(
        &mut self,
        status: CallStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<CallSessionUpdate>> {
        if self.status == status {
            return Ok(None);
        }
        let from = self.status;
        self.transition_to(status)?;

        let mut update = CallSessionUpdate::status(status);
        match status {
            CallStatus::Connected => {
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
                update.started_at = self.started_at;
                if from == CallStatus::Failed {
                    self.ended_at = None;
                    self.duration_seconds = None;
                    update.reopen = true;
                }
            }
            CallStatus::Ended | CallStatus::Failed => {
                self.ended_at = Some(now);
                self.duration_seconds = self
                    .started_at
                    .map(|started| (now - started).num_seconds().max(0));
                update.ended_at = self.ended_at;
                update.duration_seconds = self.duration_seconds;
            }
            _ => {}
        }

        self.record_event(CallSessionEvent::StatusChanged(CallSessionStatusChanged {
            metadata: EventMetadata::at(now),
            session_id: self.id,
            from,
            to: status,
            duration_seconds: self.duration_seconds,
        }));

        Ok(Some(update))
    }

    /// Merge a persisted write into this record (last write wins)
    pub fn apply_update(&mut self, update: &CallSessionUpdate) {
        self.status = update.status;
        if self.started_at.is_none() {
            self.started_at = update.started_at;
        }
        if update.reopen {
            self.ended_at = None;
            self.duration_seconds = None;
        }
        if update.ended_at.is_some() {
            self.ended_at = update.ended_at;
            self.duration_seconds = update.duration_seconds;
        }
    }

    /// Resolve how `user_id` takes part in this call
    pub fn participation(&self, user_id: &UserId) -> Result<Participation> {
        if self.caller_id == *user_id {
            Ok(Participation::Caller)
        } else if self.callee_id == *user_id {
            Ok(Participation::Callee)
        } else {
            Err(DomainError::Unauthorized(format!(
                "User {} is not a participant of call session {}",
                user_id, self.id
            )))
        }
    }

    /// The participant that is not `user_id`
    pub fn other_participant(&self, user_id: &UserId) -> Option<UserId> {
        match self.participation(user_id) {
            Ok(Participation::Caller) => Some(self.callee_id),
            Ok(Participation::Callee) => Some(self.caller_id),
            Err(_) => None,
        }
    }

    fn transition_to(&mut self, next: CallStatus) -> Result<()> {
        if !self.status.can_transition_to(&next) {
            return Err(DomainError::InvalidStateTransition(format!(
                "Cannot transition call session from {} to {}",
                self.status, next
            )));
        }

        self.status = next;
        Ok(())
    }

    fn record_event(&mut self, event: CallSessionEvent) {
        self.events.push(event);
    }

    /// Take all pending events
    pub fn take_events(&mut self) -> Vec<CallSessionEvent> {
        std::mem::take(&mut self.events)
    }

    // Getters
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn booking_id(&self) -> &BookingId {
        &self.booking_id
    }

    pub fn caller_id(&self) -> &UserId {
        &self.caller_id
    }

    pub fn callee_id(&self) -> &UserId {
        &self.callee_id
    }

    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        self.duration_seconds
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }
}
