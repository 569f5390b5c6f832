use std::sync::Arc;

use common::{GradeReport, Language, TestCase, TestOutcome};
use futures::{StreamExt, stream};
use sandbox::harness::submission_load_failure;
use sandbox::{
    EntryContract, EntryPoint, EvaluationUnit, Execution, Sandbox, TimeBudget, Verdict,
};
use tracing::{debug, info, instrument, warn};

/// Runs every test of an assignment against one submission.
///
/// Each test gets a fresh sandbox context with the submission loaded into
/// it; no state leaks between tests or submissions.
pub struct Grader<S: Sandbox> {
    sandbox: Arc<S>,
    contract: EntryContract,
    budget: TimeBudget,
    test_concurrency: usize,
}

impl<S: Sandbox> Grader<S> {
    pub fn new(sandbox: Arc<S>, entry: EntryPoint, budget: TimeBudget) -> Self {
        Self {
            sandbox,
            contract: EntryContract::Evaluate(entry),
            budget,
            test_concurrency: 1,
        }
    }

    /// Tests of one pass executed at once. Results keep test order either way.
    pub fn with_test_concurrency(mut self, concurrency: usize) -> Self {
        self.test_concurrency = concurrency.max(1);
        self
    }

    pub fn sandbox(&self) -> &Arc<S> {
        &self.sandbox
    }

    pub fn supports(&self, language: Language) -> bool {
        self.sandbox.supports(language)
    }

    /// Grade `program` against `tests`.
    ///
    /// Never fails: faults of the program and of the sandbox become failed
    /// test outcomes. Outcomes are ordered by test creation time, then id.
    #[instrument(skip_all, fields(tests = tests.len(), language = %language))]
    pub async fn grade(&self, tests: &[TestCase], program: &str, language: Language) -> GradeReport {
        if tests.is_empty() {
            info!("Assignment has no tests");
            return GradeReport::no_tests();
        }

        let mut ordered: Vec<&TestCase> = tests.iter().collect();
        ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        if !self.sandbox.supports(language) {
            warn!(sandbox = self.sandbox.name(), "Language not supported by sandbox");
            let message = format!("Language {language} is not supported");
            return GradeReport::from_outcomes(
                ordered
                    .iter()
                    .map(|t| TestOutcome::failed(&t.id, &message, 0))
                    .collect(),
            );
        }

        if let Some(message) = self.probe(program).await {
            info!(reason = %message, "Submission does not load, failing every test");
            return GradeReport::from_outcomes(
                ordered
                    .iter()
                    .map(|t| TestOutcome::failed(&t.id, &message, 0))
                    .collect(),
            );
        }

        let results: Vec<TestOutcome> = if self.test_concurrency <= 1 {
            let mut results = Vec::with_capacity(ordered.len());
            for test in &ordered {
                results.push(self.run_test(test, program).await);
            }
            results
        } else {
            let runs: Vec<_> = ordered
                .iter()
                .map(|test| Box::pin(self.run_test(test, program)))
                .collect();
            stream::iter(runs)
                .buffered(self.test_concurrency)
                .collect()
                .await
        };

        let report = GradeReport::from_outcomes(results);
        info!(
            passed = report.passed_count(),
            total = report.results.len(),
            score = %report.score,
            "Grading pass completed"
        );
        report
    }

    /// Load the submission on its own. Returns the failure message if it
    /// cannot be loaded at all.
    async fn probe(&self, program: &str) -> Option<String> {
        match self
            .sandbox
            .execute(
                EvaluationUnit::submission_only(program),
                &EntryContract::Exports,
                self.budget,
            )
            .await
        {
            Ok(execution) => {
                debug!(outcome = execution.outcome.kind(), "Submission load probe finished");
                submission_load_failure(&execution.outcome)
            }
            Err(e) => {
                // Each test reports the sandbox failure on its own.
                warn!(error = %e, "Submission load probe failed");
                None
            }
        }
    }

    #[instrument(skip_all, fields(test_id = %test.id))]
    async fn run_test(&self, test: &TestCase, program: &str) -> TestOutcome {
        let unit = EvaluationUnit::with_test(program, &test.program);
        match self.sandbox.execute(unit, &self.contract, self.budget).await {
            Ok(execution) => outcome_for(test, execution),
            Err(e) => {
                warn!(error = %e, "Sandbox failed to run test");
                TestOutcome::failed(&test.id, format!("Sandbox error: {e}"), 0)
            }
        }
    }
}

fn outcome_for(test: &TestCase, execution: Execution) -> TestOutcome {
    let verdict = Verdict::from_outcome(&execution.outcome);
    let duration_ms = execution.duration.as_millis() as u64;
    if !verdict.pass && !execution.console.is_empty() {
        debug!(console = ?execution.console, "Console output of failed test");
    }
    debug!(
        pass = verdict.pass,
        outcome = execution.outcome.kind(),
        duration_ms,
        "Test finished"
    );
    TestOutcome {
        test_id: test.id.clone(),
        pass: verdict.pass,
        message: verdict.message,
        duration_ms,
    }
}
