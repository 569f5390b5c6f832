use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Feedback, Language, Score, SubmissionStatus};

/// A test program attached to an assignment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub name: String,
    /// Source implementing the evaluation entry point.
    pub program: String,
    pub created_at: DateTime<Utc>,
}

/// Assignment as seen by the grader: read-only during a grading pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: String,
    pub language: Language,
    pub tests: Vec<TestCase>,
}

/// Identity of a submission record. At most one record exists per key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubmissionKey {
    pub assignment_id: String,
    pub user_id: String,
}

impl SubmissionKey {
    pub fn new(assignment_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            assignment_id: assignment_id.into(),
            user_id: user_id.into(),
        }
    }
}

impl std::fmt::Display for SubmissionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.assignment_id, self.user_id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub assignment_id: String,
    pub user_id: String,
    pub submitted_program: String,
    pub language: Language,
    pub status: SubmissionStatus,
    pub score: Option<Score>,
    pub feedback: Option<Feedback>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Submission {
    pub fn key(&self) -> SubmissionKey {
        SubmissionKey::new(&self.assignment_id, &self.user_id)
    }
}

/// Outcome of running one test against a submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub test_id: String,
    pub pass: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl TestOutcome {
    pub fn passed(test_id: impl Into<String>, message: Option<String>, duration_ms: u64) -> Self {
        Self {
            test_id: test_id.into(),
            pass: true,
            message,
            duration_ms,
        }
    }

    pub fn failed(test_id: impl Into<String>, message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            test_id: test_id.into(),
            pass: false,
            message: Some(message.into()),
            duration_ms,
        }
    }
}

/// Persisted test outcome, one per (submission, test) pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub submission_id: Uuid,
    #[serde(flatten)]
    pub outcome: TestOutcome,
}

/// Score, ordered per-test outcomes and feedback produced by one grading pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GradeReport {
    pub score: Score,
    pub results: Vec<TestOutcome>,
    pub feedback: Feedback,
}

impl GradeReport {
    /// Report for an assignment without tests.
    pub fn no_tests() -> Self {
        Self {
            score: Score::ZERO,
            results: vec![],
            feedback: Feedback::no_tests(),
        }
    }

    /// Aggregate ordered outcomes into a report.
    pub fn from_outcomes(results: Vec<TestOutcome>) -> Self {
        if results.is_empty() {
            return Self::no_tests();
        }
        let total = results.len();
        let passed = results.iter().filter(|r| r.pass).count();
        Self {
            score: Score::from_ratio(passed, total),
            feedback: Feedback::passed(passed, total),
            results,
        }
    }

    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.pass).count()
    }

    /// Attach the outcomes to a submission for persistence.
    pub fn test_results(&self, submission_id: Uuid) -> Vec<TestResult> {
        self.results
            .iter()
            .cloned()
            .map(|outcome| TestResult {
                submission_id,
                outcome,
            })
            .collect()
    }
}
