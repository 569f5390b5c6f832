use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a submission during the grading lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    /// Stored, waiting for a grading pass to start.
    #[default]
    Pending,
    /// A grading pass owns the record.
    Grading,
    /// Grading completed and the record carries a score.
    Graded,
    /// Grading could not complete because a collaborator failed.
    Failed,
}

impl SubmissionStatus {
    /// Returns true once no grading pass is working on the record.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Graded | Self::Failed)
    }

    /// Whether a status update from `self` to `next` is allowed.
    ///
    /// Resetting to `Pending` is not listed here: it only happens through an
    /// upsert, which replaces the record wholesale. `Graded` can be reached
    /// from either terminal status by a manual score override.
    pub fn can_transition_to(&self, next: SubmissionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Grading)
                | (Self::Pending, Self::Failed)
                | (Self::Grading, Self::Graded)
                | (Self::Grading, Self::Failed)
                | (Self::Graded, Self::Graded)
                | (Self::Failed, Self::Graded)
        )
    }

    /// All possible status values.
    pub const ALL: &'static [SubmissionStatus] =
        &[Self::Pending, Self::Grading, Self::Graded, Self::Failed];

    /// Statuses a grading pass leaves behind.
    pub const TERMINAL: &'static [SubmissionStatus] = &[Self::Graded, Self::Failed];

    /// Returns the string representation (lowercase).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Grading => "grading",
            Self::Graded => "graded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an invalid status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError {
    invalid: String,
}

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid status '{}'. Valid values: {}",
            self.invalid,
            SubmissionStatus::ALL
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for SubmissionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "grading" => Ok(Self::Grading),
            "graded" => Ok(Self::Graded),
            "failed" => Ok(Self::Failed),
            _ => Err(ParseStatusError {
                invalid: s.to_string(),
            }),
        }
    }
}
