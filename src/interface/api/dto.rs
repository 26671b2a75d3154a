//! Request and response bodies

use crate::domain::call_session::{CallSession, CallStatus, CallType};
use crate::domain::shared::value_objects::{BookingId, SessionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope of every API response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Body identifying the acting user
///
/// Authentication is handled in front of this service; the caller passes
/// the authenticated user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRequest {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSessionResponse {
    pub id: SessionId,
    pub booking_id: BookingId,
    pub caller_id: UserId,
    pub callee_id: UserId,
    pub call_type: CallType,
    pub status: CallStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl From<&CallSession> for CallSessionResponse {
    fn from(session: &CallSession) -> Self {
        Self {
            id: *session.id(),
            booking_id: *session.booking_id(),
            caller_id: *session.caller_id(),
            callee_id: *session.callee_id(),
            call_type: session.call_type(),
            status: session.status(),
            started_at: session.started_at(),
            ended_at: session.ended_at(),
            duration_seconds: session.duration_seconds(),
            created_at: session.created_at(),
        }
    }
}
