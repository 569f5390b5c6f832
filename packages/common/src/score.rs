use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Percentage score in [0, 100] with two decimal places.
///
/// Stored as hundredths so equality and ordering are exact. Serialized as a
/// plain JSON number (`33.33`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Score(u32);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Score must be a number between 0 and 100, got {0}")]
pub struct InvalidScore(pub f64);

impl Score {
    pub const ZERO: Score = Score(0);
    pub const FULL: Score = Score(10_000);

    /// Score for `passed` out of `total` tests.
    ///
    /// Computed in double precision as `round(passed / total * 10000) / 100`
    /// with halves rounded up, so stored scores stay comparable with grades
    /// computed by earlier graders. An empty test set scores zero.
    pub fn from_ratio(passed: usize, total: usize) -> Self {
        if total == 0 {
            return Self::ZERO;
        }
        let passed = passed.min(total);
        let hundredths = (passed as f64 / total as f64 * 10_000.0).round();
        Self(hundredths as u32)
    }

    /// Parse a percentage, rounding to two decimal places.
    pub fn from_percent(value: f64) -> Result<Self, InvalidScore> {
        if !value.is_finite() || !(0.0..=100.0).contains(&value) {
            return Err(InvalidScore(value));
        }
        Ok(Self((value * 100.0).round() as u32))
    }

    pub fn hundredths(&self) -> u32 {
        self.0
    }

    pub fn as_percent(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn is_full(&self) -> bool {
        *self == Self::FULL
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Score {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_percent())
    }
}

impl<'de> Deserialize<'de> for Score {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Score::from_percent(value).map_err(serde::de::Error::custom)
    }
}

/// Human-readable feedback attached to a graded submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Feedback {
    /// `{"summary": "Passed 2/3"}`
    Summary { summary: String },
    /// `{"note": "No tests defined"}`
    Note { note: String },
}

impl Feedback {
    pub fn passed(passed: usize, total: usize) -> Self {
        Self::Summary {
            summary: format!("Passed {passed}/{total}"),
        }
    }

    pub fn no_tests() -> Self {
        Self::note("No tests defined")
    }

    pub fn note(note: impl Into<String>) -> Self {
        Self::Note { note: note.into() }
    }
}
