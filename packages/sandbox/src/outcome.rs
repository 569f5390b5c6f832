use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::SandboxError;

/// Parameter names the harness binds around test programs.
const HARNESS_BINDINGS: &[&str] = &[
    "userCode",
    "module",
    "exports",
    "console",
    "setTimeout",
    "clearTimeout",
];

const RESERVED_WORDS: &[&str] = &[
    "arguments", "await", "break", "case", "catch", "class", "const", "continue", "debugger",
    "default", "delete", "do", "else", "enum", "eval", "export", "extends", "false", "finally",
    "for", "function", "if", "implements", "import", "in", "instanceof", "interface", "let",
    "new", "null", "package", "private", "protected", "public", "return", "static", "super",
    "switch", "this", "throw", "true", "try", "typeof", "undefined", "var", "void", "while",
    "with", "yield",
];

/// Name of the function a test program exposes to the harness.
///
/// Always a plain identifier: the name is spliced into the generated loader.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct EntryPoint(String);

impl EntryPoint {
    pub fn new(name: impl Into<String>) -> Result<Self, SandboxError> {
        let name = name.into();
        let mut chars = name.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$');
        let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
        if !valid_start
            || !valid_rest
            || RESERVED_WORDS.contains(&name.as_str())
            || HARNESS_BINDINGS.contains(&name.as_str())
        {
            return Err(SandboxError::InvalidEntry(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EntryPoint {
    fn default() -> Self {
        Self("run".to_string())
    }
}

impl<'de> Deserialize<'de> for EntryPoint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        EntryPoint::new(name).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the harness does once the submission has loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryContract {
    /// Load the submission only and report the names it exports.
    Exports,
    /// Load a test program and call its entry point with `{ userCode }`.
    Evaluate(EntryPoint),
}

impl fmt::Display for EntryContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exports => f.write_str("exports"),
            Self::Evaluate(entry) => write!(f, "evaluate:{entry}"),
        }
    }
}

/// Program text for one execution.
#[derive(Debug, Clone)]
pub struct EvaluationUnit {
    pub submission: String,
    /// Required for [`EntryContract::Evaluate`], ignored otherwise.
    pub test_program: Option<String>,
}

impl EvaluationUnit {
    pub fn submission_only(submission: impl Into<String>) -> Self {
        Self {
            submission: submission.into(),
            test_program: None,
        }
    }

    pub fn with_test(submission: impl Into<String>, test_program: impl Into<String>) -> Self {
        Self {
            submission: submission.into(),
            test_program: Some(test_program.into()),
        }
    }
}

/// Two-phase wall-clock budget of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBudget {
    /// Loading the submitted program.
    pub load: Duration,
    /// Loading the test program and settling its verdict.
    pub run: Duration,
}

impl TimeBudget {
    pub fn from_millis(load_ms: u64, run_ms: u64) -> Self {
        Self {
            load: Duration::from_millis(load_ms),
            run: Duration::from_millis(run_ms),
        }
    }

    pub fn total(&self) -> Duration {
        self.load + self.run
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Load,
    Run,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramRole {
    Submission,
    TestProgram,
}

/// Fault raised by the program under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fault {
    /// The program did not parse or threw while initializing.
    Load { role: ProgramRole, reason: String },
    /// The test program does not expose the requested entry point.
    MissingEntry { name: String },
    /// Uncaught error or rejection while evaluating.
    Runtime { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed { value: serde_json::Value },
    Faulted(Fault),
    TimedOut { phase: Phase, budget: Duration },
}

impl ExecutionOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Faulted(_) => "faulted",
            Self::TimedOut { .. } => "timed_out",
        }
    }
}

/// Result of one sandbox execution.
#[derive(Debug, Clone)]
pub struct Execution {
    pub outcome: ExecutionOutcome,
    /// Captured console lines. Diagnostic only.
    pub console: Vec<String>,
    pub duration: Duration,
}
