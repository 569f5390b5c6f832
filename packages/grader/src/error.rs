use common::{SubmissionKey, SubmissionStatus};
use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced to callers of the grading service.
#[derive(Debug, Error)]
pub enum GradeError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Submission {0} is already being graded")]
    GradingInProgress(SubmissionKey),

    #[error("Failed to load tests for assignment {assignment_id}: {source}")]
    TestLoad {
        assignment_id: String,
        #[source]
        source: StoreError,
    },

    #[error("Failed to persist grading state: {0}")]
    Persistence(#[from] StoreError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Cannot move submission from {from} to {to}")]
    InvalidTransition {
        from: SubmissionStatus,
        to: SubmissionStatus,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GradeError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            GradeError::Validation(_) => "VALIDATION_ERROR",
            GradeError::GradingInProgress(_) => "GRADING_IN_PROGRESS",
            GradeError::TestLoad { .. } => "TEST_LOAD_FAILED",
            GradeError::Persistence(_) => "PERSISTENCE_FAILED",
            GradeError::NotFound(_) => "NOT_FOUND",
            GradeError::PermissionDenied(_) => "PERMISSION_DENIED",
            GradeError::InvalidTransition { .. } => "INVALID_TRANSITION",
            GradeError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a collaborator (test loader or store) caused the failure
    /// rather than the request or the submitted program.
    pub fn is_collaborator_fault(&self) -> bool {
        matches!(self, GradeError::TestLoad { .. } | GradeError::Persistence(_))
    }
}
