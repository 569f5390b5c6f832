//! Host side of the test harness: turns execution outcomes into verdicts.

use serde::{Deserialize, Serialize};

use crate::outcome::{ExecutionOutcome, Fault, Phase, ProgramRole};

/// What a test program's entry point must settle to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Verdict {
    pub pass: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl Verdict {
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            pass: false,
            message: Some(message.into()),
        }
    }

    /// Validate a settled value against the verdict schema.
    pub fn from_value(value: serde_json::Value) -> Result<Self, String> {
        if value.is_null() {
            return Err("entry point settled without a value".to_string());
        }
        serde_json::from_value(value).map_err(|e| e.to_string())
    }

    /// Translate the outcome of an evaluation into a verdict.
    pub fn from_outcome(outcome: &ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Completed { value } => Self::from_value(value.clone())
                .unwrap_or_else(|e| Self::fail(format!("Invalid verdict: {e}"))),
            ExecutionOutcome::Faulted(fault) => Self::fail(fault_message(fault)),
            ExecutionOutcome::TimedOut { phase, budget } => {
                Self::fail(timeout_message(*phase, budget.as_millis()))
            }
        }
    }
}

fn fault_message(fault: &Fault) -> String {
    match fault {
        Fault::Load {
            role: ProgramRole::Submission,
            reason,
        } => format!("Submission failed to load: {reason}"),
        Fault::Load {
            role: ProgramRole::TestProgram,
            reason,
        } => format!("Test program failed to load: {reason}"),
        Fault::MissingEntry { .. } => "No evaluation entry point defined".to_string(),
        Fault::Runtime { reason } => reason.clone(),
    }
}

fn timeout_message(phase: Phase, budget_ms: u128) -> String {
    match phase {
        Phase::Load => format!("Submission timed out while loading after {budget_ms} ms"),
        Phase::Run => format!("Test timed out after {budget_ms} ms"),
    }
}

/// Message for a submission that cannot be loaded at all, if this outcome
/// says so. Used to fail a whole pass without running its tests.
pub fn submission_load_failure(outcome: &ExecutionOutcome) -> Option<String> {
    match outcome {
        ExecutionOutcome::Faulted(
            fault @ Fault::Load {
                role: ProgramRole::Submission,
                ..
            },
        ) => Some(fault_message(fault)),
        ExecutionOutcome::TimedOut {
            phase: Phase::Load,
            budget,
        } => Some(timeout_message(Phase::Load, budget.as_millis())),
        _ => None,
    }
}
