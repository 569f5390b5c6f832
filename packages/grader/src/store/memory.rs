use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use common::{Assignment, Submission, SubmissionKey, SubmissionStatus, TestCase, TestResult};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::error::StoreError;
use super::traits::{NewSubmission, StatusUpdate, SubmissionStore, TestLoader};

#[derive(Default)]
struct State {
    assignments: HashMap<String, Assignment>,
    submissions: HashMap<Uuid, Submission>,
    by_key: HashMap<SubmissionKey, Uuid>,
    results: HashMap<Uuid, Vec<TestResult>>,
}

/// In-process store for assignments, submissions and results.
///
/// Backs the command-line runner and tests. Each operation is atomic with
/// respect to the others.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_assignment(&self, assignment: Assignment) {
        let mut state = self.state.write().await;
        state.assignments.insert(assignment.id.clone(), assignment);
    }
}

#[async_trait]
impl TestLoader for MemoryStore {
    async fn load_tests(&self, assignment_id: &str) -> Result<Vec<TestCase>, StoreError> {
        let state = self.state.read().await;
        state
            .assignments
            .get(assignment_id)
            .map(|a| a.tests.clone())
            .ok_or_else(|| StoreError::NotFound {
                entity: "assignment",
                id: assignment_id.to_string(),
            })
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn upsert_submission(&self, new: NewSubmission) -> Result<Submission, StoreError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let key = SubmissionKey::new(&new.assignment_id, &new.user_id);

        let existing = state
            .by_key
            .get(&key)
            .and_then(|id| state.submissions.get(id))
            .cloned();
        let submission = match existing {
            Some(previous) => Submission {
                submitted_program: new.program,
                language: new.language,
                status: SubmissionStatus::Pending,
                score: None,
                feedback: None,
                updated_at: now,
                ..previous
            },
            None => Submission {
                id: Uuid::now_v7(),
                assignment_id: new.assignment_id,
                user_id: new.user_id,
                submitted_program: new.program,
                language: new.language,
                status: SubmissionStatus::Pending,
                score: None,
                feedback: None,
                created_at: now,
                updated_at: now,
            },
        };

        state.results.remove(&submission.id);
        state.by_key.insert(key, submission.id);
        state.submissions.insert(submission.id, submission.clone());
        Ok(submission)
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: SubmissionStatus,
        update: StatusUpdate,
    ) -> Result<Submission, StoreError> {
        let mut state = self.state.write().await;
        let submission = state
            .submissions
            .get_mut(&id)
            .ok_or_else(|| StoreError::submission_not_found(id))?;
        if submission.status != expected {
            return Err(StoreError::Conflict {
                id,
                expected,
                actual: submission.status,
            });
        }
        submission.status = update.status;
        submission.score = update.score;
        submission.feedback = update.feedback;
        submission.updated_at = Utc::now();
        Ok(submission.clone())
    }

    async fn write_test_results(
        &self,
        id: Uuid,
        results: Vec<TestResult>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.submissions.contains_key(&id) {
            return Err(StoreError::submission_not_found(id));
        }
        state.results.insert(id, results);
        Ok(())
    }

    async fn find_submission(&self, id: Uuid) -> Result<Submission, StoreError> {
        let state = self.state.read().await;
        state
            .submissions
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::submission_not_found(id))
    }

    async fn test_results(&self, id: Uuid) -> Result<Vec<TestResult>, StoreError> {
        let state = self.state.read().await;
        if !state.submissions.contains_key(&id) {
            return Err(StoreError::submission_not_found(id));
        }
        Ok(state.results.get(&id).cloned().unwrap_or_default())
    }

    async fn list_submissions(&self, assignment_id: &str) -> Result<Vec<Submission>, StoreError> {
        let state = self.state.read().await;
        let mut submissions: Vec<Submission> = state
            .submissions
            .values()
            .filter(|s| s.assignment_id == assignment_id)
            .cloned()
            .collect();
        submissions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(submissions)
    }

    async fn list_unfinished(&self) -> Result<Vec<Submission>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .submissions
            .values()
            .filter(|s| !s.status.is_terminal())
            .cloned()
            .collect())
    }
}
