//! Runs the subject binary and captures exactly what it emits.
//!
//! Streams are drained concurrently so a full stderr pipe can never stall a
//! child still writing to stdout. In merged mode both streams share a single
//! pipe, which is the only way to observe true interleaving between the
//! subject's diagnostics and output passed through from its own children.

use crate::SubjectBinary;
use async_trait::async_trait;
use harness_proto::{
    CaptureMode, CapturedOutput, ExecutionError, ExecutionResult, ScenarioInvocation,
    SubjectRunner,
};
use std::io::Read;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Spawns the subject with an explicit argument list and environment.
#[derive(Debug, Clone)]
pub struct SubprocessRunner {
    subject: SubjectBinary,
    working_dir: Option<PathBuf>,
}

impl SubprocessRunner {
    /// Creates a runner for the given binary.
    pub fn new(subject: SubjectBinary) -> Self {
        Self {
            subject,
            working_dir: None,
        }
    }

    /// Runs the subject from `dir` instead of the harness's own cwd.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn subject(&self) -> &SubjectBinary {
        &self.subject
    }

    fn command(&self, invocation: &ScenarioInvocation) -> Command {
        let mut command = Command::new(self.subject.path());
        command.args(invocation.args());
        // Nothing from the harness's own environment leaks through
        command.env_clear();
        command.envs(invocation.env().iter());
        command.stdin(Stdio::null());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }

    fn spawn_error(&self, source: std::io::Error) -> ExecutionError {
        ExecutionError::Spawn {
            binary: self.subject.path().to_path_buf(),
            source,
        }
    }

    async fn run_separate(
        &self,
        invocation: &ScenarioInvocation,
    ) -> harness_proto::Result<ExecutionResult> {
        let mut command = self.command(invocation);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| self.spawn_error(e))?;

        // Take both handles upfront and drain them concurrently
        let ((stdout, stdout_outcome), (stderr, stderr_outcome)) =
            tokio::join!(drain(child.stdout.take()), drain(child.stderr.take()));

        let partial = CapturedOutput {
            stdout,
            stderr,
            combined: None,
        };

        if let Err(source) = stdout_outcome.and(stderr_outcome) {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(ExecutionError::Capture { source, partial }.into());
        }

        match child.wait().await {
            Ok(status) => classify(status, partial),
            Err(source) => Err(ExecutionError::Capture { source, partial }.into()),
        }
    }

    async fn run_merged(
        &self,
        invocation: &ScenarioInvocation,
    ) -> harness_proto::Result<ExecutionResult> {
        let capture_error = |source| ExecutionError::Capture {
            source,
            partial: CapturedOutput::default(),
        };

        let (mut reader, writer) = std::io::pipe().map_err(capture_error)?;
        let stdout_writer = writer.try_clone().map_err(capture_error)?;

        let mut command = self.command(invocation);
        command.stdout(stdout_writer);
        command.stderr(writer);
        let spawned = command.spawn();
        // The command still owns our copies of the write end; EOF only
        // arrives once every writer is closed.
        drop(command);
        let mut child = spawned.map_err(|e| self.spawn_error(e))?;

        let reader_task = tokio::task::spawn_blocking(move || {
            let mut buf = Vec::new();
            let outcome = reader.read_to_end(&mut buf).map(|_| ());
            (buf, outcome)
        });

        let status = child.wait().await;
        let (combined, read_outcome) = reader_task
            .await
            .map_err(|e| capture_error(std::io::Error::other(e)))?;

        let partial = CapturedOutput {
            stdout: Vec::new(),
            stderr: Vec::new(),
            combined: Some(combined),
        };

        match (status, read_outcome) {
            (Ok(status), Ok(())) => classify(status, partial),
            (Err(source), _) | (_, Err(source)) => {
                Err(ExecutionError::Capture { source, partial }.into())
            }
        }
    }
}

#[async_trait]
impl SubjectRunner for SubprocessRunner {
    async fn run(&self, invocation: &ScenarioInvocation) -> harness_proto::Result<ExecutionResult> {
        self.subject.ensure_present()?;

        debug!(
            binary = %self.subject.path().display(),
            args = ?invocation.args(),
            env_vars = invocation.env().len(),
            capture = ?invocation.capture(),
            cwd = ?self.working_dir,
            "Spawning subject"
        );

        let result = match invocation.capture() {
            CaptureMode::Separate => self.run_separate(invocation).await,
            CaptureMode::Merged => self.run_merged(invocation).await,
        };

        match &result {
            Ok(r) => debug!(exit_status = r.exit_status(), "Subject exited"),
            Err(e) => warn!(error = %e, "Subject did not exit normally"),
        }
        result
    }
}

async fn drain<R: AsyncRead + Unpin>(handle: Option<R>) -> (Vec<u8>, std::io::Result<()>) {
    let mut buf = Vec::new();
    let outcome = match handle {
        Some(mut reader) => reader.read_to_end(&mut buf).await.map(|_| ()),
        None => Ok(()),
    };
    (buf, outcome)
}

/// A normal exit (any code) is a result; anything else is an error.
fn classify(status: ExitStatus, output: CapturedOutput) -> harness_proto::Result<ExecutionResult> {
    match status.code() {
        Some(code) => Ok(ExecutionResult::from_captured(code, output)),
        None => {
            let signal = termination_signal(status);
            Err(ExecutionError::Terminated {
                signal,
                description: describe_signal(signal),
                partial: output,
            }
            .into())
        }
    }
}

#[cfg(unix)]
fn termination_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn termination_signal(_status: ExitStatus) -> Option<i32> {
    None
}

#[cfg(unix)]
fn describe_signal(signal: Option<i32>) -> String {
    use nix::sys::signal::Signal;
    match signal {
        Some(raw) => match Signal::try_from(raw) {
            Ok(sig) => format!("killed by {}", sig.as_str()),
            Err(_) => format!("killed by signal {raw}"),
        },
        None => "no exit code reported".to_string(),
    }
}

#[cfg(not(unix))]
fn describe_signal(_signal: Option<i32>) -> String {
    "no exit code reported".to_string()
}
