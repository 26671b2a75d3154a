//! Domain events recorded by aggregates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub trait DomainEvent: Send + Sync {
    /// Dotted name, e.g. `call_session.created`
    fn event_type(&self) -> &'static str;

    fn metadata(&self) -> &EventMetadata;

    fn occurred_at(&self) -> DateTime<Utc> {
        self.metadata().occurred_at
    }
}

/// Identity and timestamp of one recorded event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

impl EventMetadata {
    /// Metadata of an event that happened at `occurred_at`
    pub fn at(occurred_at: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at,
        }
    }
}
