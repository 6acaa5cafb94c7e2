//! A single request to run the subject.

use crate::Environment;
use serde::{Deserialize, Serialize};

/// How the subject's output streams are captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// stdout and stderr go to independent buffers.
    #[default]
    Separate,
    /// stdout and stderr share one pipe, preserving emission order.
    Merged,
}

/// Arguments plus environment for one subject run.
///
/// Immutable once constructed; the orchestrator owns it for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioInvocation {
    args: Vec<String>,
    env: Environment,
    capture: CaptureMode,
}

impl ScenarioInvocation {
    pub fn new<I, S>(args: I, env: Environment) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            env,
            capture: CaptureMode::Separate,
        }
    }

    /// Sets the capture mode.
    pub fn with_capture(mut self, capture: CaptureMode) -> Self {
        self.capture = capture;
        self
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn capture(&self) -> CaptureMode {
        self.capture
    }
}
