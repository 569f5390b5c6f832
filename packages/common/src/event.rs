use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::Score;

/// Core event trait
pub trait Event: Send + Sync + Sized + Serialize + DeserializeOwned {
    /// Get the event topic (e.g., "submission_graded")
    fn topic(&self) -> &str;

    /// Convert event to a generic event
    fn to_generic_event(&self) -> GenericEvent {
        GenericEvent {
            topic: self.topic().to_string(),
            payload: serde_json::to_value(self).unwrap_or_default(),
        }
    }

    /// Create an event from a generic event
    fn from_generic_event(e: &GenericEvent) -> Result<Self, anyhow::Error> {
        let payload: Self = serde_json::from_value(e.payload.clone())?;
        Ok(payload)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericEvent {
    pub topic: String,
    pub payload: serde_json::Value,
}

impl Event for GenericEvent {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn from_generic_event(e: &GenericEvent) -> Result<Self, anyhow::Error> {
        Ok(e.clone())
    }
}

/// Emitted once a submission reaches `graded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradedEvent {
    pub submission_id: Uuid,
    pub user_id: String,
    pub assignment_id: String,
    pub score: Score,
    pub graded_at: DateTime<Utc>,
}

impl GradedEvent {
    pub const TOPIC: &'static str = "submission_graded";
}

impl Event for GradedEvent {
    fn topic(&self) -> &str {
        Self::TOPIC
    }
}
