mod deadline;
mod session;

use async_trait::async_trait;
use common::Language;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use crate::Sandbox;
use crate::error::SandboxError;
use crate::outcome::{EntryContract, EvaluationUnit, Execution, ExecutionOutcome, Phase, TimeBudget};

/// Resource limits applied to every QuickJS execution.
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxLimits {
    /// Heap limit per runtime in kilobytes. Default: 65536.
    #[serde(default = "default_memory_limit_kb")]
    pub memory_limit_kb: u64,
    /// JS stack limit in kilobytes. Default: 1024.
    #[serde(default = "default_stack_limit_kb")]
    pub stack_limit_kb: u64,
    /// Runtimes alive at once across all submissions. Default: 8.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Console lines kept per execution. Default: 100.
    #[serde(default = "default_console_line_limit")]
    pub console_line_limit: u32,
    /// Characters kept per console line. Default: 500.
    #[serde(default = "default_console_line_width")]
    pub console_line_width: u32,
    /// Extra time granted to an execution thread before the host stops
    /// waiting for it. Default: 500.
    #[serde(default = "default_watchdog_grace_ms")]
    pub watchdog_grace_ms: u64,
}

fn default_memory_limit_kb() -> u64 {
    64 * 1024
}
fn default_stack_limit_kb() -> u64 {
    1024
}
fn default_max_concurrent() -> usize {
    8
}
fn default_console_line_limit() -> u32 {
    100
}
fn default_console_line_width() -> u32 {
    500
}
fn default_watchdog_grace_ms() -> u64 {
    500
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory_limit_kb: default_memory_limit_kb(),
            stack_limit_kb: default_stack_limit_kb(),
            max_concurrent: default_max_concurrent(),
            console_line_limit: default_console_line_limit(),
            console_line_width: default_console_line_width(),
            watchdog_grace_ms: default_watchdog_grace_ms(),
        }
    }
}

impl SandboxLimits {
    fn memory_limit_bytes(&self) -> usize {
        (self.memory_limit_kb as usize).saturating_mul(1024)
    }

    fn stack_limit_bytes(&self) -> usize {
        (self.stack_limit_kb as usize).saturating_mul(1024)
    }
}

/// Runs JavaScript in an embedded QuickJS engine.
///
/// Each execution gets its own runtime on a blocking thread: no `require`,
/// no `process`, no file or network API. Only `console`, `setTimeout` and
/// `clearTimeout` are provided. A semaphore caps live runtimes at
/// `max_concurrent`.
pub struct QuickJsSandbox {
    limits: SandboxLimits,
    permits: Arc<Semaphore>,
}

impl QuickJsSandbox {
    pub fn new(limits: SandboxLimits) -> Self {
        let permits = Arc::new(Semaphore::new(limits.max_concurrent.max(1)));
        Self { limits, permits }
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }
}

impl Default for QuickJsSandbox {
    fn default() -> Self {
        Self::new(SandboxLimits::default())
    }
}

#[async_trait]
impl Sandbox for QuickJsSandbox {
    fn name(&self) -> &str {
        "quickjs"
    }

    fn supports(&self, language: Language) -> bool {
        language == Language::JavaScript
    }

    #[instrument(skip_all, fields(entry = %entry))]
    async fn execute(
        &self,
        unit: EvaluationUnit,
        entry: &EntryContract,
        budget: TimeBudget,
    ) -> Result<Execution, SandboxError> {
        if matches!(entry, EntryContract::Evaluate(_)) && unit.test_program.is_none() {
            return Err(SandboxError::Execution(
                "evaluation requires a test program".into(),
            ));
        }

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SandboxError::Unavailable)?;

        let started = Instant::now();
        let limits = self.limits.clone();
        let contract = entry.clone();
        let task = tokio::task::spawn_blocking(move || {
            // Held until the runtime is gone, even if the host stops waiting.
            let _permit = permit;
            session::run(&limits, &unit, &contract, budget)
        });

        let watchdog = budget.total() + Duration::from_millis(self.limits.watchdog_grace_ms);
        match tokio::time::timeout(watchdog, task).await {
            Ok(Ok(report)) => {
                let report = report?;
                debug!(
                    outcome = report.outcome.kind(),
                    duration_ms = report.duration.as_millis() as u64,
                    console_lines = report.console.len(),
                    "Execution finished"
                );
                Ok(Execution {
                    outcome: report.outcome,
                    console: report.console,
                    duration: report.duration,
                })
            }
            Ok(Err(join_error)) => Err(SandboxError::Execution(format!(
                "sandbox thread failed: {join_error}"
            ))),
            Err(_) => {
                warn!(
                    watchdog_ms = watchdog.as_millis() as u64,
                    "Execution thread unresponsive, abandoning it"
                );
                Ok(Execution {
                    outcome: ExecutionOutcome::TimedOut {
                        phase: Phase::Run,
                        budget: budget.run,
                    },
                    console: vec![],
                    duration: started.elapsed(),
                })
            }
        }
    }
}
