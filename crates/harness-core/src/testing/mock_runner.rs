//! A `SubjectRunner` that replays scripted responses and records invocations.

use async_trait::async_trait;
use harness_proto::{
    CaptureMode, CapturedOutput, Environment, ExecutionError, ExecutionResult,
    ScenarioInvocation, SetupError, SubjectRunner,
};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// Scripted outcome for one invocation.
#[derive(Debug, Clone)]
pub enum MockResponse {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    /// Killed by `signal` after writing `stderr`.
    Terminated {
        signal: i32,
        stderr: String,
    },
    MissingBinary,
}

impl MockResponse {
    pub fn exit(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::Exit {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn terminated(signal: i32, stderr: impl Into<String>) -> Self {
        Self::Terminated {
            signal,
            stderr: stderr.into(),
        }
    }
}

/// What the mock saw for one invocation.
#[derive(Debug, Clone)]
pub struct RecordedInvocation {
    pub args: Vec<String>,
    pub env: Environment,
    pub capture: CaptureMode,
    /// Absolute path arguments that existed when the run started.
    pub existing_paths: Vec<PathBuf>,
}

type SideEffect = Arc<dyn Fn(&ScenarioInvocation) + Send + Sync>;

/// Mock runner for orchestration tests.
///
/// Responses are served in order; once exhausted every run exits 0 with
/// empty output. Clones share state.
#[derive(Clone, Default)]
pub struct MockRunner {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    invocations: Arc<Mutex<Vec<RecordedInvocation>>>,
    side_effect: Option<SideEffect>,
}

impl std::fmt::Debug for MockRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRunner")
            .field("invocations", &self.invocation_count())
            .finish_non_exhaustive()
    }
}

impl MockRunner {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            ..Self::default()
        }
    }

    /// Runs `effect` during each invocation, after it is recorded.
    pub fn on_run<F>(mut self, effect: F) -> Self
    where
        F: Fn(&ScenarioInvocation) + Send + Sync + 'static,
    {
        self.side_effect = Some(Arc::new(effect));
        self
    }

    pub fn invocations(&self) -> Vec<RecordedInvocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl SubjectRunner for MockRunner {
    async fn run(&self, invocation: &ScenarioInvocation) -> harness_proto::Result<ExecutionResult> {
        let existing_paths = invocation
            .args()
            .iter()
            .map(PathBuf::from)
            .filter(|p| p.is_absolute() && p.exists())
            .collect();
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedInvocation {
                args: invocation.args().to_vec(),
                env: invocation.env().clone(),
                capture: invocation.capture(),
                existing_paths,
            });

        if let Some(effect) = &self.side_effect {
            effect(invocation);
        }

        let response = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| MockResponse::exit(0, "", ""));

        match response {
            MockResponse::Exit {
                code,
                stdout,
                stderr,
            } => {
                let output = match invocation.capture() {
                    CaptureMode::Separate => CapturedOutput {
                        stdout: stdout.into_bytes(),
                        stderr: stderr.into_bytes(),
                        combined: None,
                    },
                    CaptureMode::Merged => CapturedOutput {
                        combined: Some(format!("{stdout}{stderr}").into_bytes()),
                        ..CapturedOutput::default()
                    },
                };
                Ok(ExecutionResult::from_captured(code, output))
            }
            MockResponse::Terminated { signal, stderr } => {
                let partial = match invocation.capture() {
                    CaptureMode::Separate => CapturedOutput {
                        stderr: stderr.into_bytes(),
                        ..CapturedOutput::default()
                    },
                    CaptureMode::Merged => CapturedOutput {
                        combined: Some(stderr.into_bytes()),
                        ..CapturedOutput::default()
                    },
                };
                Err(ExecutionError::Terminated {
                    signal: Some(signal),
                    description: format!("killed by signal {signal}"),
                    partial,
                }
                .into())
            }
            MockResponse::MissingBinary => {
                Err(SetupError::BinaryMissing(PathBuf::from("dist/captain")).into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_serves_responses_then_defaults() {
        let runner = MockRunner::new(vec![MockResponse::exit(123, "out\n", "err\n")]);
        let invocation = ScenarioInvocation::new(["run"], Environment::new());

        let first = runner.run(&invocation).await.unwrap();
        assert_eq!(first.exit_status(), 123);
        assert_eq!(first.stdout(), "out");
        assert_eq!(first.stderr(), "err");

        let second = runner.run(&invocation).await.unwrap();
        assert!(second.success());
        assert_eq!(runner.invocation_count(), 2);
    }

    #[tokio::test]
    async fn test_clones_share_recordings() {
        let runner = MockRunner::default();
        let clone = runner.clone();
        clone
            .run(&ScenarioInvocation::new(["--version"], Environment::new()))
            .await
            .unwrap();
        assert_eq!(runner.invocations()[0].args, vec!["--version".to_string()]);
    }
}
