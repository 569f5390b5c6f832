//! Assignments described in TOML files, for the command-line runner.
//!
//! ```toml
//! id = "sum"
//! language = "javascript"
//!
//! [[tests]]
//! id = "small"
//! name = "adds small numbers"
//! program = '''
//! function run({ userCode }) {
//!   return { pass: userCode.sum(1, 2) === 3 };
//! }
//! '''
//! ```

use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{Duration, Utc};
use common::{Assignment, Language, TestCase};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct AssignmentFile {
    id: String,
    #[serde(default = "default_language")]
    language: String,
    #[serde(default)]
    tests: Vec<TestFile>,
}

fn default_language() -> String {
    Language::JavaScript.as_str().to_string()
}

#[derive(Debug, Deserialize)]
struct TestFile {
    id: String,
    #[serde(default)]
    name: Option<String>,
    program: String,
}

/// Parse an assignment. Tests keep file order: each is stamped one
/// millisecond after the previous one.
pub fn parse(source: &str) -> Result<Assignment> {
    let file: AssignmentFile = toml::from_str(source).context("Invalid assignment file")?;
    if file.id.trim().is_empty() {
        bail!("Assignment id must not be empty");
    }
    let language: Language = file.language.parse()?;

    let mut seen = std::collections::HashSet::new();
    for test in &file.tests {
        if !seen.insert(test.id.as_str()) {
            bail!("Duplicate test id '{}'", test.id);
        }
    }

    let base = Utc::now();
    let tests = file
        .tests
        .into_iter()
        .enumerate()
        .map(|(index, test)| TestCase {
            name: test.name.unwrap_or_else(|| test.id.clone()),
            id: test.id,
            program: test.program,
            created_at: base + Duration::milliseconds(index as i64),
        })
        .collect();

    Ok(Assignment {
        id: file.id,
        language,
        tests,
    })
}

/// Language a submission to `assignment` is graded as. Defaults to the
/// assignment's own language; an explicit choice must agree with it.
pub fn submission_language(
    assignment: &Assignment,
    requested: Option<Language>,
) -> Result<Language> {
    match requested {
        None => Ok(assignment.language),
        Some(language) if language == assignment.language => Ok(language),
        Some(language) => bail!(
            "Submission language {language} does not match assignment '{}' ({})",
            assignment.id,
            assignment.language
        ),
    }
}

pub fn load(path: impl AsRef<Path>) -> Result<Assignment> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read assignment {}", path.display()))?;
    parse(&source).with_context(|| format!("Failed to parse assignment {}", path.display()))
}
