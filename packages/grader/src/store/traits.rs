use async_trait::async_trait;
use common::{Feedback, Language, Score, Submission, SubmissionStatus, TestCase, TestResult};
use uuid::Uuid;

use super::error::StoreError;

/// Source of an assignment's test programs.
#[async_trait]
pub trait TestLoader: Send + Sync {
    /// Tests of an assignment in any order. Unknown assignments are
    /// `NotFound`; an assignment without tests is an empty list.
    async fn load_tests(&self, assignment_id: &str) -> Result<Vec<TestCase>, StoreError>;
}

/// Fields of a submission supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubmission {
    pub assignment_id: String,
    pub user_id: String,
    pub program: String,
    pub language: Language,
}

/// New status and grade fields written by [`SubmissionStore::update_status`].
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: SubmissionStatus,
    pub score: Option<Score>,
    pub feedback: Option<Feedback>,
}

impl StatusUpdate {
    pub fn grading() -> Self {
        Self {
            status: SubmissionStatus::Grading,
            score: None,
            feedback: None,
        }
    }

    pub fn graded(score: Score, feedback: Feedback) -> Self {
        Self {
            status: SubmissionStatus::Graded,
            score: Some(score),
            feedback: Some(feedback),
        }
    }

    pub fn failed(note: impl Into<String>) -> Self {
        Self {
            status: SubmissionStatus::Failed,
            score: None,
            feedback: Some(Feedback::note(note)),
        }
    }
}

/// Persistence of submissions and their test results.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Create the submission for `(assignment_id, user_id)` or replace the
    /// existing one in place: same id, status `pending`, score and feedback
    /// cleared, previous test results dropped.
    async fn upsert_submission(&self, new: NewSubmission) -> Result<Submission, StoreError>;

    /// Compare-and-set the status. Fails with `Conflict` if the submission
    /// is no longer in `expected`.
    async fn update_status(
        &self,
        id: Uuid,
        expected: SubmissionStatus,
        update: StatusUpdate,
    ) -> Result<Submission, StoreError>;

    /// Replace the whole result set of a submission.
    async fn write_test_results(
        &self,
        id: Uuid,
        results: Vec<TestResult>,
    ) -> Result<(), StoreError>;

    async fn find_submission(&self, id: Uuid) -> Result<Submission, StoreError>;

    async fn test_results(&self, id: Uuid) -> Result<Vec<TestResult>, StoreError>;

    async fn list_submissions(&self, assignment_id: &str) -> Result<Vec<Submission>, StoreError>;

    /// Submissions in `pending` or `grading`.
    async fn list_unfinished(&self) -> Result<Vec<Submission>, StoreError>;
}
