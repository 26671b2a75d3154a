//! Call session entities

use crate::domain::call_session::value_object::BookingStatus;
use crate::domain::shared::value_objects::{BookingId, UserId};
use serde::{Deserialize, Serialize};

/// Booking the call belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    /// User account of the mentor
    pub mentor_user_id: UserId,
    /// User account of the mentee
    pub mentee_id: UserId,
    pub status: BookingStatus,
}

impl Booking {
    pub fn new(id: BookingId, mentor_user_id: UserId, mentee_id: UserId) -> Self {
        Self {
            id,
            mentor_user_id,
            mentee_id,
            status: BookingStatus::Confirmed,
        }
    }

    pub fn involves(&self, user_id: &UserId) -> bool {
        self.mentor_user_id == *user_id || self.mentee_id == *user_id
    }
}

/// Display identity of a participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantProfile {
    pub user_id: UserId,
    pub display_name: String,
    pub title: Option<String>,
    pub avatar_url: Option<String>,
}

impl ParticipantProfile {
    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            title: None,
            avatar_url: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}
