use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::event::GradedEvent;
use common::retry::RetryPolicy;
use common::{
    Feedback, GradeReport, Language, Score, Submission, SubmissionKey, SubmissionStatus,
    TestOutcome,
};
use sandbox::Sandbox;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::GraderAppConfig;
use crate::error::GradeError;
use crate::lifecycle::{ConflictPolicy, InFlight};
use crate::notify::Notifier;
use crate::orchestrator::Grader;
use crate::store::{NewSubmission, StatusUpdate, StoreError, SubmissionStore, TestLoader};

/// A student's program for one assignment.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub assignment_id: String,
    pub user_id: String,
    pub program: String,
    pub language: Language,
}

/// Result of a completed grading pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitOutcome {
    pub submission_id: Uuid,
    pub score: Score,
    pub results: Vec<TestOutcome>,
    pub feedback: Feedback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Ta,
    Instructor,
    Admin,
}

impl Role {
    pub fn can_override_scores(&self) -> bool {
        !matches!(self, Role::Student)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Ta => "ta",
            Role::Instructor => "instructor",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller of a privileged operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }
}

/// Submission counts and score summary of one assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignmentStats {
    pub submissions: usize,
    pub graded: usize,
    pub failed: usize,
    pub in_progress: usize,
    /// Mean score of graded submissions.
    pub average_score: Option<Score>,
    pub perfect_scores: usize,
}

/// External collaborators of the grading service.
#[derive(Clone)]
pub struct Collaborators {
    pub tests: Arc<dyn TestLoader>,
    pub store: Arc<dyn SubmissionStore>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub conflict_policy: ConflictPolicy,
    pub retry: RetryPolicy,
    pub max_program_bytes: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::Reject,
            retry: RetryPolicy::default(),
            max_program_bytes: 50_000,
        }
    }
}

impl ServiceSettings {
    pub fn from_config(config: &GraderAppConfig) -> Self {
        Self {
            conflict_policy: config.submission.conflict_policy,
            retry: config.submission.retry_policy(),
            max_program_bytes: config.grading.max_program_bytes,
        }
    }
}

/// Accepts submissions and drives them through grading.
pub struct GradingService<S: Sandbox + 'static> {
    inner: Arc<Inner<S>>,
}

impl<S: Sandbox + 'static> Clone for GradingService<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<S: Sandbox> {
    grader: Grader<S>,
    tests: Arc<dyn TestLoader>,
    store: Arc<dyn SubmissionStore>,
    notifier: Arc<dyn Notifier>,
    in_flight: InFlight,
    settings: ServiceSettings,
}

impl<S: Sandbox + 'static> GradingService<S> {
    pub fn new(grader: Grader<S>, collaborators: Collaborators, settings: ServiceSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                grader,
                tests: collaborators.tests,
                store: collaborators.store,
                notifier: collaborators.notifier,
                in_flight: InFlight::new(),
                settings,
            }),
        }
    }

    /// Build the service and its grader from application config.
    pub fn from_config(
        config: &GraderAppConfig,
        sandbox: Arc<S>,
        collaborators: Collaborators,
    ) -> Self {
        let grader = Grader::new(
            sandbox,
            config.grading.entry_point.clone(),
            config.grading.budget(),
        )
        .with_test_concurrency(config.grading.test_concurrency);
        Self::new(grader, collaborators, ServiceSettings::from_config(config))
    }

    /// Whether a pass for this key is running right now.
    pub fn is_grading(&self, key: &SubmissionKey) -> bool {
        self.inner.in_flight.is_busy(key)
    }

    /// Store the program as the user's submission and grade it.
    ///
    /// The pass runs on its own task and completes even if the caller stops
    /// waiting. A resubmission replaces the previous record in place.
    pub async fn submit_and_grade(&self, req: SubmitRequest) -> Result<SubmitOutcome, GradeError> {
        self.validate(&req)?;
        let inner = self.inner.clone();
        join(tokio::spawn(async move { inner.submit(req).await })).await
    }

    /// Grade the stored program of a submission again.
    pub async fn regrade(&self, submission_id: Uuid) -> Result<SubmitOutcome, GradeError> {
        let inner = self.inner.clone();
        join(tokio::spawn(async move { inner.regrade(submission_id).await })).await
    }

    /// Replace the score of a finished submission by hand.
    #[instrument(skip(self, actor, note), fields(actor = %actor.user_id, role = %actor.role))]
    pub async fn override_score(
        &self,
        actor: &Actor,
        submission_id: Uuid,
        score: f64,
        note: Option<String>,
    ) -> Result<Submission, GradeError> {
        if !actor.role.can_override_scores() {
            return Err(GradeError::PermissionDenied(format!(
                "role {} cannot override scores",
                actor.role
            )));
        }
        let score = Score::from_percent(score).map_err(|e| GradeError::Validation(e.to_string()))?;

        let inner = &self.inner;
        let key = inner.find(submission_id).await?.key();
        let _guard = inner.in_flight.acquire(key, ConflictPolicy::Reject).await?;

        let current = inner.find(submission_id).await?;
        if !current.status.can_transition_to(SubmissionStatus::Graded) {
            return Err(GradeError::InvalidTransition {
                from: current.status,
                to: SubmissionStatus::Graded,
            });
        }

        let feedback = Feedback::note(
            note.unwrap_or_else(|| format!("Score overridden by {}", actor.user_id)),
        );
        let updated = inner
            .store
            .update_status(
                submission_id,
                current.status,
                StatusUpdate::graded(score, feedback),
            )
            .await?;
        info!(%submission_id, score = %score, "Score overridden");
        inner.notify(&updated, score);
        Ok(updated)
    }

    /// Submission counts and score summary of an assignment.
    pub async fn assignment_stats(&self, assignment_id: &str) -> Result<AssignmentStats, GradeError> {
        let submissions = self.inner.store.list_submissions(assignment_id).await?;
        let mut stats = AssignmentStats {
            submissions: submissions.len(),
            graded: 0,
            failed: 0,
            in_progress: 0,
            average_score: None,
            perfect_scores: 0,
        };

        let mut total_hundredths: u64 = 0;
        for submission in &submissions {
            match submission.status {
                SubmissionStatus::Graded => {
                    stats.graded += 1;
                    let score = submission.score.unwrap_or_default();
                    total_hundredths += u64::from(score.hundredths());
                    if score.is_full() {
                        stats.perfect_scores += 1;
                    }
                }
                SubmissionStatus::Failed => stats.failed += 1,
                SubmissionStatus::Pending | SubmissionStatus::Grading => stats.in_progress += 1,
            }
        }
        if stats.graded > 0 {
            let mean = total_hundredths as f64 / stats.graded as f64 / 100.0;
            stats.average_score = Score::from_percent(mean).ok();
        }
        Ok(stats)
    }

    /// Fail unfinished submissions untouched for longer than `threshold`
    /// that no running pass owns. Returns the ids that were failed.
    pub async fn recover_stuck(&self, threshold: Duration) -> Result<Vec<Uuid>, GradeError> {
        let inner = &self.inner;
        let threshold = chrono::Duration::from_std(threshold)
            .map_err(|e| GradeError::Internal(format!("invalid stuck threshold: {e}")))?;
        let cutoff = Utc::now() - threshold;

        let stuck: Vec<Submission> = inner
            .store
            .list_unfinished()
            .await?
            .into_iter()
            .filter(|s| s.updated_at < cutoff)
            .collect();
        if stuck.is_empty() {
            return Ok(vec![]);
        }
        info!(count = stuck.len(), "Found stuck submissions");

        let mut recovered = Vec::new();
        for submission in stuck {
            let Ok(_guard) = inner
                .in_flight
                .acquire(submission.key(), ConflictPolicy::Reject)
                .await
            else {
                debug!(submission_id = %submission.id, "Submission is being graded, skipping");
                continue;
            };
            match inner
                .store
                .update_status(
                    submission.id,
                    submission.status,
                    StatusUpdate::failed("Grading interrupted"),
                )
                .await
            {
                Ok(_) => {
                    warn!(submission_id = %submission.id, status = %submission.status, "Marked stuck submission as failed");
                    recovered.push(submission.id);
                }
                Err(StoreError::Conflict { .. }) => {
                    debug!(submission_id = %submission.id, "Submission moved on, skipping");
                }
                Err(e) => {
                    error!(submission_id = %submission.id, error = %e, "Failed to recover stuck submission");
                }
            }
        }
        Ok(recovered)
    }

    /// Run [`Self::recover_stuck`] every `interval` in the background.
    pub fn spawn_stuck_sweeper(&self, interval: Duration, threshold: Duration) -> JoinHandle<()> {
        let service = self.clone();
        info!(
            interval_secs = interval.as_secs(),
            threshold_secs = threshold.as_secs(),
            "Starting stuck submission sweeper"
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = service.recover_stuck(threshold).await {
                    error!(error = %e, "Stuck submission sweep failed");
                }
            }
        })
    }

    pub async fn find_submission(&self, submission_id: Uuid) -> Result<Submission, GradeError> {
        self.inner.find(submission_id).await
    }

    fn validate(&self, req: &SubmitRequest) -> Result<(), GradeError> {
        if req.assignment_id.trim().is_empty() {
            return Err(GradeError::Validation("assignment_id must not be empty".into()));
        }
        if req.user_id.trim().is_empty() {
            return Err(GradeError::Validation("user_id must not be empty".into()));
        }
        if req.program.trim().is_empty() {
            return Err(GradeError::Validation("program must not be empty".into()));
        }
        let max = self.inner.settings.max_program_bytes;
        if req.program.len() > max {
            return Err(GradeError::Validation(format!(
                "program must be at most {max} bytes, got {}",
                req.program.len()
            )));
        }
        if !self.inner.grader.supports(req.language) {
            return Err(GradeError::Validation(format!(
                "language {} is not supported",
                req.language
            )));
        }
        Ok(())
    }
}

async fn join<T>(handle: JoinHandle<Result<T, GradeError>>) -> Result<T, GradeError> {
    handle
        .await
        .map_err(|e| GradeError::Internal(format!("grading task aborted: {e}")))?
}

fn not_found(e: StoreError) -> GradeError {
    match e {
        StoreError::NotFound { entity, id } => GradeError::NotFound(format!("{entity} {id}")),
        other => GradeError::Persistence(other),
    }
}

impl<S: Sandbox + 'static> Inner<S> {
    async fn submit(&self, req: SubmitRequest) -> Result<SubmitOutcome, GradeError> {
        let key = SubmissionKey::new(&req.assignment_id, &req.user_id);
        let _guard = self
            .in_flight
            .acquire(key, self.settings.conflict_policy)
            .await?;

        let new = NewSubmission {
            assignment_id: req.assignment_id,
            user_id: req.user_id,
            program: req.program,
            language: req.language,
        };
        let submission = self.upsert(new).await?;
        self.grade_pass(submission).await
    }

    async fn regrade(&self, submission_id: Uuid) -> Result<SubmitOutcome, GradeError> {
        let key = self.find(submission_id).await?.key();
        let _guard = self
            .in_flight
            .acquire(key, self.settings.conflict_policy)
            .await?;

        // Re-read under the guard: a concurrent resubmission may have replaced it.
        let current = self.find(submission_id).await?;
        info!(%submission_id, "Regrading submission");
        let submission = self
            .upsert(NewSubmission {
                assignment_id: current.assignment_id,
                user_id: current.user_id,
                program: current.submitted_program,
                language: current.language,
            })
            .await?;
        self.grade_pass(submission).await
    }

    /// Run one pass for a submission in `pending`. The caller holds the key.
    #[instrument(skip_all, fields(submission_id = %submission.id, key = %submission.key()))]
    async fn grade_pass(&self, submission: Submission) -> Result<SubmitOutcome, GradeError> {
        let id = submission.id;
        if let Err(e) = self
            .settings
            .retry
            .run("mark_grading", StoreError::is_transient, || {
                self.store
                    .update_status(id, SubmissionStatus::Pending, StatusUpdate::grading())
            })
            .await
        {
            error!(error = %e, "Failed to start grading");
            self.mark_failed(id, SubmissionStatus::Pending, &e.to_string())
                .await;
            return Err(e.into());
        }

        let tests = match self
            .settings
            .retry
            .run("load_tests", StoreError::is_transient, || {
                self.tests.load_tests(&submission.assignment_id)
            })
            .await
        {
            Ok(tests) => tests,
            Err(source) => {
                error!(error = %source, "Failed to load tests");
                self.mark_failed(id, SubmissionStatus::Grading, &source.to_string())
                    .await;
                return Err(GradeError::TestLoad {
                    assignment_id: submission.assignment_id.clone(),
                    source,
                });
            }
        };

        let report = self
            .grader
            .grade(&tests, &submission.submitted_program, submission.language)
            .await;

        if let Err(e) = self.persist(id, &report).await {
            error!(error = %e, "Failed to persist grading results");
            self.mark_failed(id, SubmissionStatus::Grading, &e.to_string())
                .await;
            return Err(e.into());
        }

        self.notify(&submission, report.score);
        Ok(SubmitOutcome {
            submission_id: id,
            score: report.score,
            results: report.results,
            feedback: report.feedback,
        })
    }

    async fn persist(&self, id: Uuid, report: &GradeReport) -> Result<(), StoreError> {
        let retry = &self.settings.retry;
        retry
            .run("write_test_results", StoreError::is_transient, || {
                self.store.write_test_results(id, report.test_results(id))
            })
            .await?;
        retry
            .run("mark_graded", StoreError::is_transient, || {
                self.store.update_status(
                    id,
                    SubmissionStatus::Grading,
                    StatusUpdate::graded(report.score, report.feedback.clone()),
                )
            })
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, expected: SubmissionStatus, detail: &str) {
        let update = StatusUpdate::failed(format!("Grading failed: {detail}"));
        if let Err(e) = self
            .settings
            .retry
            .run("mark_failed", StoreError::is_transient, || {
                self.store.update_status(id, expected, update.clone())
            })
            .await
        {
            error!(submission_id = %id, error = %e, "Failed to mark submission as failed");
        }
    }

    async fn upsert(&self, new: NewSubmission) -> Result<Submission, GradeError> {
        let submission = self
            .settings
            .retry
            .run("upsert_submission", StoreError::is_transient, || {
                self.store.upsert_submission(new.clone())
            })
            .await?;
        debug!(submission_id = %submission.id, "Submission stored");
        Ok(submission)
    }

    async fn find(&self, submission_id: Uuid) -> Result<Submission, GradeError> {
        self.store.find_submission(submission_id).await.map_err(not_found)
    }

    /// Deliver the graded event in the background.
    fn notify(&self, submission: &Submission, score: Score) {
        let event = GradedEvent {
            submission_id: submission.id,
            user_id: submission.user_id.clone(),
            assignment_id: submission.assignment_id.clone(),
            score,
            graded_at: Utc::now(),
        };
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.graded(&event).await {
                warn!(submission_id = %event.submission_id, error = %e, "Failed to deliver grading notification");
            }
        });
    }
}
