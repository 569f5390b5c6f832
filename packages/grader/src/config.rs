use config::{Config, ConfigError, Environment, File};
use sandbox::{EntryPoint, SandboxLimits, TimeBudget};
use serde::Deserialize;

use crate::lifecycle::ConflictPolicy;
use common::retry::RetryPolicy;

/// Per-test budgets and pass settings.
#[derive(Debug, Deserialize, Clone)]
pub struct GradingConfig {
    /// Budget for loading the submitted program. Default: 1000.
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,
    /// Budget for loading a test program and settling its verdict. Default: 2000.
    #[serde(default = "default_run_timeout_ms")]
    pub run_timeout_ms: u64,
    /// Tests of one pass executed at once. Default: 1.
    #[serde(default = "default_test_concurrency")]
    pub test_concurrency: usize,
    /// Function test programs expose. Default: "run".
    #[serde(default)]
    pub entry_point: EntryPoint,
    /// Largest accepted submission in bytes. Default: 50000.
    #[serde(default = "default_max_program_bytes")]
    pub max_program_bytes: usize,
}

fn default_load_timeout_ms() -> u64 {
    1000
}
fn default_run_timeout_ms() -> u64 {
    2000
}
fn default_test_concurrency() -> usize {
    1
}
fn default_max_program_bytes() -> usize {
    50_000
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            load_timeout_ms: default_load_timeout_ms(),
            run_timeout_ms: default_run_timeout_ms(),
            test_concurrency: default_test_concurrency(),
            entry_point: EntryPoint::default(),
            max_program_bytes: default_max_program_bytes(),
        }
    }
}

impl GradingConfig {
    pub fn budget(&self) -> TimeBudget {
        TimeBudget::from_millis(self.load_timeout_ms, self.run_timeout_ms)
    }
}

/// Submission lifecycle settings.
#[derive(Debug, Deserialize, Clone)]
pub struct SubmissionConfig {
    /// What a second request for a key that is being graded does. Default: reject.
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    /// Retries of a failed collaborator call. Default: 2.
    #[serde(default = "default_collaborator_retries")]
    pub collaborator_retries: u8,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Age after which an unfinished submission counts as stuck. Default: 300.
    #[serde(default = "default_stuck_after_secs")]
    pub stuck_after_secs: u64,
    /// Interval of the background stuck sweep. Zero disables it. Default: 60.
    #[serde(default = "default_stuck_sweep_interval_secs")]
    pub stuck_sweep_interval_secs: u64,
}

fn default_collaborator_retries() -> u8 {
    2
}
fn default_retry_base_delay_ms() -> u64 {
    100
}
fn default_retry_max_delay_ms() -> u64 {
    2000
}
fn default_stuck_after_secs() -> u64 {
    300
}
fn default_stuck_sweep_interval_secs() -> u64 {
    60
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::default(),
            collaborator_retries: default_collaborator_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            stuck_after_secs: default_stuck_after_secs(),
            stuck_sweep_interval_secs: default_stuck_sweep_interval_secs(),
        }
    }
}

impl SubmissionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.collaborator_retries,
            self.retry_base_delay_ms,
            self.retry_max_delay_ms,
        )
    }
}

/// Grader application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct GraderAppConfig {
    #[serde(default)]
    pub sandbox: SandboxLimits,
    #[serde(default)]
    pub grading: GradingConfig,
    #[serde(default)]
    pub submission: SubmissionConfig,
}

impl GraderAppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("GRADELY_CONFIG").unwrap_or_else(|_| "config/gradely".to_string());

        let s = Config::builder()
            .set_default("grading.load_timeout_ms", 1000_i64)?
            .set_default("grading.run_timeout_ms", 2000_i64)?
            .set_default("grading.test_concurrency", 1_i64)?
            .set_default("grading.entry_point", "run")?
            .set_default("submission.conflict_policy", "reject")?
            .add_source(File::with_name(&config_path).required(false))
            .add_source(Environment::with_prefix("GRADELY").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
