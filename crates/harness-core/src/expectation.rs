//! Declarative expectations checked against an `ExecutionResult`.

use harness_proto::{CaptureMode, ExecutionResult, strip_trailing_newline};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a scenario expects the subject to do.
///
/// Every field is optional; an empty expectation accepts any clean exit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Expectation {
    #[serde(default)]
    pub exit_code: Option<i32>,

    /// Exact stdout, compared after trailing-newline stripping.
    #[serde(default)]
    pub stdout: Option<String>,

    #[serde(default)]
    pub stdout_contains: Vec<String>,

    /// Regex that must match stdout.
    #[serde(default)]
    pub stdout_matches: Option<String>,

    #[serde(default)]
    pub stderr: Option<String>,

    #[serde(default)]
    pub stderr_contains: Vec<String>,

    /// Required prefix of the raw merged stream.
    #[serde(default)]
    pub combined_prefix: Option<String>,

    /// Known subject gap: stderr mismatches are recorded as a limitation
    /// instead of failing the scenario.
    #[serde(default)]
    pub stderr_known_gap: Option<String>,
}

/// One expectation the result did not meet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub field: &'static str,
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected {:?}, got {:?}",
            self.field, self.expected, self.actual
        )
    }
}

/// Outcome of evaluating an expectation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub mismatches: Vec<Mismatch>,
    pub known_limitations: Vec<String>,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// An expectation that can never be evaluated meaningfully.
#[derive(Debug, thiserror::Error)]
pub enum ExpectationError {
    #[error("invalid stdout pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Merged capture leaves stdout and stderr empty; separate capture
    /// leaves the combined stream unset.
    #[error("'{field}' needs {needed} capture but the scenario uses {actual}")]
    CaptureMismatch {
        field: &'static str,
        needed: &'static str,
        actual: &'static str,
    },
}

fn capture_name(capture: CaptureMode) -> &'static str {
    match capture {
        CaptureMode::Separate => "separate",
        CaptureMode::Merged => "merged",
    }
}

impl Expectation {
    /// Fields that read stdout or stderr individually.
    fn separate_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        [
            ("stdout", self.stdout.is_some()),
            ("stdout_contains", !self.stdout_contains.is_empty()),
            ("stdout_matches", self.stdout_matches.is_some()),
            ("stderr", self.stderr.is_some()),
            ("stderr_contains", !self.stderr_contains.is_empty()),
        ]
        .into_iter()
        .filter_map(|(field, set)| set.then_some(field))
    }

    /// Checks that every field can be evaluated under `capture` and that
    /// `stdout_matches` compiles.
    pub fn validate(&self, capture: CaptureMode) -> Result<(), ExpectationError> {
        let mismatch = match capture {
            CaptureMode::Merged => self.separate_fields().next(),
            CaptureMode::Separate => self.combined_prefix.is_some().then_some("combined_prefix"),
        };
        if let Some(field) = mismatch {
            let needed = match capture {
                CaptureMode::Merged => CaptureMode::Separate,
                CaptureMode::Separate => CaptureMode::Merged,
            };
            return Err(ExpectationError::CaptureMismatch {
                field,
                needed: capture_name(needed),
                actual: capture_name(capture),
            });
        }

        if let Some(pattern) = &self.stdout_matches {
            Regex::new(pattern)?;
        }
        Ok(())
    }

    pub fn evaluate(&self, result: &ExecutionResult) -> Verdict {
        let mut mismatches = Vec::new();
        let mut stderr_mismatches = Vec::new();

        if let Some(code) = self.exit_code.filter(|code| *code != result.exit_status()) {
            mismatches.push(Mismatch {
                field: "exit_code",
                expected: code.to_string(),
                actual: result.exit_status().to_string(),
            });
        }

        if let Some(expected) = &self.stdout {
            check_exact("stdout", expected, result.stdout(), &mut mismatches);
        }
        for needle in &self.stdout_contains {
            check_contains("stdout_contains", needle, result.stdout(), &mut mismatches);
        }
        if let Some(pattern) = &self.stdout_matches {
            let matched = Regex::new(pattern).map(|re| re.is_match(result.stdout()));
            if !matches!(matched, Ok(true)) {
                mismatches.push(Mismatch {
                    field: "stdout_matches",
                    expected: pattern.clone(),
                    actual: result.stdout().to_string(),
                });
            }
        }

        if let Some(expected) = &self.stderr {
            check_exact("stderr", expected, result.stderr(), &mut stderr_mismatches);
        }
        for needle in &self.stderr_contains {
            check_contains(
                "stderr_contains",
                needle,
                result.stderr(),
                &mut stderr_mismatches,
            );
        }

        if let Some(prefix) = &self.combined_prefix {
            let combined = result.combined_text().unwrap_or_default();
            if !combined.starts_with(prefix.as_str()) {
                mismatches.push(Mismatch {
                    field: "combined_prefix",
                    expected: prefix.clone(),
                    actual: combined,
                });
            }
        }

        let mut known_limitations = Vec::new();
        match &self.stderr_known_gap {
            Some(gap) if !stderr_mismatches.is_empty() => known_limitations.push(gap.clone()),
            _ => mismatches.extend(stderr_mismatches),
        }

        Verdict {
            mismatches,
            known_limitations,
        }
    }
}

fn check_exact(field: &'static str, expected: &str, actual: &str, out: &mut Vec<Mismatch>) {
    let expected = strip_trailing_newline(expected);
    if expected != actual {
        out.push(Mismatch {
            field,
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
}

fn check_contains(field: &'static str, needle: &str, haystack: &str, out: &mut Vec<Mismatch>) {
    if !haystack.contains(needle) {
        out.push(Mismatch {
            field,
            expected: needle.to_string(),
            actual: haystack.to_string(),
        });
    }
}
