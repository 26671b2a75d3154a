//! Call session value objects

use crate::domain::shared::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Persisted status of a call session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// Created by the launching participant
    Initiated,
    /// Callee has been notified
    Ringing,
    /// Media connected at least once
    Connected,
    /// Call was hung up
    Ended,
    /// Peer connection failed (recoverable while retries remain)
    Failed,
    /// Callee declined before the call connected
    Cancelled,
}

impl CallStatus {
    /// Check if a stored status may move to `next`
    ///
    /// Statuses only move forward, except that a `failed` call may come
    /// back to `connected` when an automatic retry succeeds.
    pub fn can_transition_to(&self, next: &CallStatus) -> bool {
        use CallStatus::*;

        match (self, next) {
            (Initiated, Ringing | Connected | Ended | Failed | Cancelled) => true,
            (Ringing, Connected | Ended | Failed | Cancelled) => true,
            (Connected, Ended | Failed) => true,
            (Failed, Connected | Ended) => true,
            (Ended, _) | (Cancelled, _) => false,
            _ => false,
        }
    }

    /// Ended, failed and cancelled close the session record
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Ended | CallStatus::Failed | CallStatus::Cancelled)
    }

    /// Statuses that stamp `ended_at` and complete the booking
    pub fn completes_booking(&self) -> bool {
        matches!(self, CallStatus::Ended | CallStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Initiated => "initiated",
            CallStatus::Ringing => "ringing",
            CallStatus::Connected => "connected",
            CallStatus::Ended => "ended",
            CallStatus::Failed => "failed",
            CallStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(CallStatus::Initiated),
            "ringing" => Ok(CallStatus::Ringing),
            "connected" => Ok(CallStatus::Connected),
            "ended" => Ok(CallStatus::Ended),
            "failed" => Ok(CallStatus::Failed),
            "cancelled" => Ok(CallStatus::Cancelled),
            other => Err(DomainError::InvalidValue(format!(
                "Unknown call status: {}",
                other
            ))),
        }
    }
}

/// Booking status, only the part the call core touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for BookingStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(DomainError::InvalidValue(format!(
                "Unknown booking status: {}",
                other
            ))),
        }
    }
}

/// Kind of call requested from the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Video,
    Audio,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Video => "video",
            CallType::Audio => "audio",
        }
    }
}

impl FromStr for CallType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(CallType::Video),
            "audio" => Ok(CallType::Audio),
            other => Err(DomainError::InvalidValue(format!(
                "Unknown call type: {}",
                other
            ))),
        }
    }
}
