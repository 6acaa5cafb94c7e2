//! The seam between orchestration and process execution.

use crate::{ExecutionResult, Result, ScenarioInvocation};
use async_trait::async_trait;

/// Runs the subject once and reports what it did.
///
/// A clean exit with any code is `Ok`. Setup problems (missing binary) and
/// abnormal terminations are `Err`, never coerced into an exit code.
/// The call completes only after the process has exited and its streams
/// are drained.
#[async_trait]
pub trait SubjectRunner: Send + Sync {
    async fn run(&self, invocation: &ScenarioInvocation) -> Result<ExecutionResult>;
}
