use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::event::GradedEvent;
use common::hook::HookRegistry;
use common::retry::RetryPolicy;
use common::{Assignment, Language, Submission, SubmissionStatus, TestCase, TestResult};
use grader::notify::{HookNotifier, NotificationFeed};
use grader::store::{
    MemoryStore, NewSubmission, StatusUpdate, StoreError, SubmissionStore, TestLoader,
};
use grader::{Collaborators, ConflictPolicy, Grader, GradingService, ServiceSettings, SubmitRequest};
use sandbox::{
    EntryContract, EntryPoint, EvaluationUnit, Execution, ExecutionOutcome, QuickJsSandbox,
    Sandbox, SandboxError, TimeBudget,
};
use serde_json::json;
use tokio::sync::Semaphore;
use uuid::Uuid;

pub const ADD: &str = "module.exports = { add: (a, b) => a + b };";
pub const SUBTRACT: &str = "module.exports = { add: (a, b) => a - b };";
pub const ADD_TEST: &str = r#"
function run({ userCode }) {
  return userCode.add(1, 2) === 3
    ? { pass: true }
    : { pass: false, message: "add should return 3 for 1+2" };
}
"#;

pub fn test_case(id: &str, program: &str, offset_ms: i64) -> TestCase {
    TestCase {
        id: id.into(),
        name: id.into(),
        program: program.into(),
        created_at: Utc::now() + chrono::Duration::milliseconds(offset_ms),
    }
}

pub fn assignment(id: &str, tests: Vec<TestCase>) -> Assignment {
    Assignment {
        id: id.into(),
        language: Language::JavaScript,
        tests,
    }
}

pub fn request(assignment_id: &str, user_id: &str, program: &str) -> SubmitRequest {
    SubmitRequest {
        assignment_id: assignment_id.into(),
        user_id: user_id.into(),
        program: program.into(),
        language: Language::JavaScript,
    }
}

pub fn fast_settings(policy: ConflictPolicy) -> ServiceSettings {
    ServiceSettings {
        conflict_policy: policy,
        retry: RetryPolicy::new(2, 1, 5),
        max_program_bytes: 50_000,
    }
}

/// Service wired to an in-memory store and a notification feed.
pub struct TestGrader<S: Sandbox + 'static> {
    pub service: GradingService<S>,
    pub store: Arc<MemoryStore>,
    pub feed: Arc<NotificationFeed>,
}

impl TestGrader<QuickJsSandbox> {
    pub fn quickjs() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::build(
            Arc::new(QuickJsSandbox::default()),
            store.clone(),
            store,
            fast_settings(ConflictPolicy::Reject),
        )
    }

    /// QuickJS grader running up to `concurrency` tests of a pass at once.
    pub fn quickjs_concurrent(concurrency: usize) -> Self {
        let store = Arc::new(MemoryStore::new());
        let grader = Grader::new(Arc::new(QuickJsSandbox::default()), EntryPoint::default(), budget())
            .with_test_concurrency(concurrency);
        Self::assemble(
            grader,
            store.clone(),
            store.clone(),
            store,
            fast_settings(ConflictPolicy::Reject),
        )
    }
}

impl TestGrader<GatedSandbox> {
    pub fn gated(sandbox: Arc<GatedSandbox>, policy: ConflictPolicy) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::build(sandbox, store.clone(), store, fast_settings(policy))
    }
}

impl<S: Sandbox + 'static> TestGrader<S> {
    pub fn build(
        sandbox: Arc<S>,
        store: Arc<MemoryStore>,
        tests: Arc<dyn TestLoader>,
        settings: ServiceSettings,
    ) -> Self {
        let grader = Grader::new(sandbox, EntryPoint::default(), budget());
        Self::assemble(grader, store.clone(), store, tests, settings)
    }

    /// Service whose submission store is `port`. `store` is the memory
    /// store behind it, used by tests for setup and inspection.
    pub fn with_store_port(
        sandbox: Arc<S>,
        store: Arc<MemoryStore>,
        port: Arc<dyn SubmissionStore>,
    ) -> Self {
        let grader = Grader::new(sandbox, EntryPoint::default(), budget());
        Self::assemble(
            grader,
            store.clone(),
            port,
            store,
            fast_settings(ConflictPolicy::Reject),
        )
    }

    fn assemble(
        grader: Grader<S>,
        store: Arc<MemoryStore>,
        port: Arc<dyn SubmissionStore>,
        tests: Arc<dyn TestLoader>,
        settings: ServiceSettings,
    ) -> Self {
        let feed = NotificationFeed::new();
        let mut registry = HookRegistry::new();
        registry.add_hook::<GradedEvent, _>(feed.clone());

        let service = GradingService::new(
            grader,
            Collaborators {
                tests,
                store: port,
                notifier: Arc::new(HookNotifier::new(registry)),
            },
            settings,
        );
        Self {
            service,
            store,
            feed,
        }
    }

    pub async fn with_assignment(self, assignment: Assignment) -> Self {
        self.store.insert_assignment(assignment).await;
        self
    }
}

fn budget() -> TimeBudget {
    TimeBudget::from_millis(1000, 1000)
}

/// Poll `check` until it holds, for up to two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Sandbox that holds every test execution until permits are released.
///
/// Tests pass when the submission contains "correct".
pub struct GatedSandbox {
    gate: Semaphore,
    entered: AtomicUsize,
}

impl GatedSandbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            entered: AtomicUsize::new(0),
        })
    }

    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    pub fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[async_trait]
impl Sandbox for GatedSandbox {
    fn name(&self) -> &str {
        "gated"
    }

    fn supports(&self, language: Language) -> bool {
        language == Language::JavaScript
    }

    async fn execute(
        &self,
        unit: EvaluationUnit,
        _entry: &EntryContract,
        _budget: TimeBudget,
    ) -> Result<Execution, SandboxError> {
        let value = match unit.test_program {
            None => json!([]),
            Some(_) => {
                self.entered.fetch_add(1, Ordering::SeqCst);
                let _permit = self
                    .gate
                    .acquire()
                    .await
                    .map_err(|_| SandboxError::Unavailable)?;
                json!({ "pass": unit.submission.contains("correct") })
            }
        };
        Ok(Execution {
            outcome: ExecutionOutcome::Completed { value },
            console: vec![],
            duration: Duration::from_millis(1),
        })
    }
}

/// Test loader that fails with a transient error a number of times before
/// answering from the wrapped store.
pub struct FlakyLoader {
    pub inner: Arc<MemoryStore>,
    pub failures_left: AtomicU32,
    pub calls: AtomicU32,
}

impl FlakyLoader {
    pub fn new(inner: Arc<MemoryStore>, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl TestLoader for FlakyLoader {
    async fn load_tests(&self, assignment_id: &str) -> Result<Vec<TestCase>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.load_tests(assignment_id).await
    }
}

/// Store call that [`FlakyStore`] fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFault {
    MarkGrading,
    WriteResults,
    MarkGraded,
}

/// Submission store that fails one kind of call with a transient error a
/// number of times, delegating everything else to the wrapped store.
pub struct FlakyStore {
    pub inner: Arc<MemoryStore>,
    pub fault: StoreFault,
    pub failures_left: AtomicU32,
    pub calls: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>, fault: StoreFault, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fault,
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        })
    }

    fn trip(&self, call: StoreFault) -> Result<(), StoreError> {
        if call != self.fault {
            return Ok(());
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("disk full".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for FlakyStore {
    async fn upsert_submission(&self, new: NewSubmission) -> Result<Submission, StoreError> {
        self.inner.upsert_submission(new).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: SubmissionStatus,
        update: StatusUpdate,
    ) -> Result<Submission, StoreError> {
        match update.status {
            SubmissionStatus::Grading => self.trip(StoreFault::MarkGrading)?,
            SubmissionStatus::Graded => self.trip(StoreFault::MarkGraded)?,
            _ => {}
        }
        self.inner.update_status(id, expected, update).await
    }

    async fn write_test_results(
        &self,
        id: Uuid,
        results: Vec<TestResult>,
    ) -> Result<(), StoreError> {
        self.trip(StoreFault::WriteResults)?;
        self.inner.write_test_results(id, results).await
    }

    async fn find_submission(&self, id: Uuid) -> Result<Submission, StoreError> {
        self.inner.find_submission(id).await
    }

    async fn test_results(&self, id: Uuid) -> Result<Vec<TestResult>, StoreError> {
        self.inner.test_results(id).await
    }

    async fn list_submissions(&self, assignment_id: &str) -> Result<Vec<Submission>, StoreError> {
        self.inner.list_submissions(assignment_id).await
    }

    async fn list_unfinished(&self) -> Result<Vec<Submission>, StoreError> {
        self.inner.list_unfinished().await
    }
}
