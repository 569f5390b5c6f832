use common::SubmissionStatus;
use thiserror::Error;
use uuid::Uuid;

/// Errors reported by persistence collaborators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Submission {id} is {actual}, expected {expected}")]
    Conflict {
        id: Uuid,
        expected: SubmissionStatus,
        actual: SubmissionStatus,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn submission_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "submission",
            id: id.to_string(),
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
