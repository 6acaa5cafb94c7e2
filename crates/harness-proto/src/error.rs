//! Error taxonomy shared by every harness crate.

use crate::CapturedOutput;
use std::path::PathBuf;

/// Problems detected before the subject is started.
///
/// Fatal to the owning scenario; no subprocess is attempted afterward.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Subject binary not found at {0} (build or install it first)")]
    BinaryMissing(PathBuf),

    #[error("Fixture operation failed for {path}: {source}")]
    Fixture {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Fixture {0} is already held by another running scenario")]
    FixtureBusy(PathBuf),

    #[error("Entropy source unavailable: {0}")]
    Entropy(String),
}

impl SetupError {
    pub fn fixture(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Fixture {
            path: path.into(),
            source,
        }
    }
}

/// The subject started (or tried to) but did not exit normally.
///
/// Distinct from a non-zero exit code, which is a regular `ExecutionResult`.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Failed to start {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to capture subject output: {source}")]
    Capture {
        #[source]
        source: std::io::Error,
        partial: CapturedOutput,
    },

    #[error("Subject terminated abnormally ({description})")]
    Terminated {
        signal: Option<i32>,
        description: String,
        partial: CapturedOutput,
    },
}

impl ExecutionError {
    /// Output gathered before the failure, if the process ever started.
    pub fn partial_output(&self) -> Option<&CapturedOutput> {
        match self {
            Self::Spawn { .. } => None,
            Self::Capture { partial, .. } | Self::Terminated { partial, .. } => Some(partial),
        }
    }
}

/// Umbrella error for harness operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

pub type Result<T> = std::result::Result<T, Error>;
