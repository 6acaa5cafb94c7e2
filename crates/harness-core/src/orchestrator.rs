//! Scenario orchestration.
//!
//! For each scenario the orchestrator checks preconditions, then walks the
//! environment matrix sequentially: acquire fixtures, merge environments,
//! invoke the subject, release fixtures. Different scenarios run
//! concurrently; a single scenario's matrix entries never race each other
//! because they may share mutable fixtures.

use crate::config::CredentialConfig;
use crate::fixtures::{FixtureHandle, FixtureIsolationManager};
use crate::matrix::{EnvironmentMatrixGenerator, MatrixActivation, MatrixEntry, MatrixLabel};
use crate::scenario::{ScenarioDefinition, ScenarioMode, expand_placeholders};
use futures::StreamExt;
use harness_proto::{
    Environment, Error, ExecutionError, ExecutionResult, ScenarioInvocation, SetupError,
    SubjectRunner,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Why a scenario did not run. Never a pass, never a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    MissingCredential { var: String },
    NotInCi { marker: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCredential { var } => write!(f, "{var} is not set"),
            Self::NotInCi { marker } => {
                write!(f, "only runs under continuous integration ({marker} is not set)")
            }
        }
    }
}

/// One matrix entry's run of a scenario.
#[derive(Debug)]
pub struct EntryRun {
    pub label: MatrixLabel,
    pub invocation: ScenarioInvocation,
    /// A clean exit (any code), or an abnormal termination with partial output.
    pub outcome: Result<ExecutionResult, ExecutionError>,
}

#[derive(Debug)]
pub enum ScenarioOutcome {
    Skipped(SkipReason),
    /// One run per active matrix entry; empty when the matrix is empty.
    Ran(Vec<EntryRun>),
}

/// A scenario paired with what happened to it.
#[derive(Debug)]
pub struct ScenarioReport<'a> {
    pub scenario: &'a ScenarioDefinition,
    /// `Err` when setup failed and the scenario was aborted.
    pub outcome: Result<ScenarioOutcome, SetupError>,
}

/// Composes fixtures, the environment matrix, and a subject runner.
pub struct ScenarioOrchestrator<R> {
    runner: R,
    fixtures: FixtureIsolationManager,
    matrix: EnvironmentMatrixGenerator,
    activation: MatrixActivation,
    credentials: CredentialConfig,
    fixture_root: PathBuf,
}

impl<R: SubjectRunner> ScenarioOrchestrator<R> {
    /// Activation is read from the generator's inherited snapshot.
    pub fn new(
        runner: R,
        fixtures: FixtureIsolationManager,
        matrix: EnvironmentMatrixGenerator,
        credentials: CredentialConfig,
    ) -> Self {
        let activation = matrix.activation();
        Self {
            runner,
            fixtures,
            matrix,
            activation,
            credentials,
            fixture_root: PathBuf::from("."),
        }
    }

    pub fn with_activation(mut self, activation: MatrixActivation) -> Self {
        self.activation = activation;
        self
    }

    /// Directory relative fixture sources resolve against.
    pub fn with_fixture_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.fixture_root = root.into();
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn activation(&self) -> MatrixActivation {
        self.activation
    }

    /// Returns the reason `scenario` must be skipped, if any.
    pub fn precondition(&self, scenario: &ScenarioDefinition) -> Option<SkipReason> {
        if scenario.require_ci && !self.activation.ci {
            return Some(SkipReason::NotInCi {
                marker: self.matrix_marker(),
            });
        }
        if scenario.mode == ScenarioMode::Cloud && self.credential().is_none() {
            return Some(SkipReason::MissingCredential {
                var: self.credentials.token_var.clone(),
            });
        }
        None
    }

    fn matrix_marker(&self) -> String {
        self.matrix.config().ci_marker.clone()
    }

    fn credential(&self) -> Option<&str> {
        self.matrix
            .inherited()
            .get(&self.credentials.token_var)
            .filter(|token| !token.is_empty())
    }

    /// Matrix entry, then credential routing, then scenario overrides.
    fn environment_for(
        &self,
        scenario: &ScenarioDefinition,
        entry: &MatrixEntry,
        fixtures: &BTreeMap<String, PathBuf>,
    ) -> Environment {
        let mut base = Environment::new().merged(&entry.env);
        match scenario.mode {
            ScenarioMode::Oss => {
                base.remove(&self.credentials.token_var);
            }
            ScenarioMode::Cloud => {
                let inherited = self.matrix.inherited();
                for var in [&self.credentials.token_var, &self.credentials.host_var] {
                    if let Some(value) = inherited.get(var) {
                        base.set(var.clone(), value);
                    }
                }
            }
        }

        let overrides: Environment = scenario
            .env
            .iter()
            .map(|(name, value)| (name, expand_placeholders(value, fixtures, entry)))
            .collect();
        base.merged(&overrides)
    }

    /// Acquires every fixture of `scenario` on the blocking pool.
    ///
    /// Copies are fsynced, which would otherwise stall every scenario
    /// polled alongside this one.
    async fn acquire_fixtures(
        &self,
        scenario: &ScenarioDefinition,
    ) -> Result<Vec<(String, FixtureHandle)>, SetupError> {
        let requests: Vec<_> = scenario
            .fixtures
            .iter()
            .map(|spec| {
                (
                    spec.name.clone(),
                    self.fixture_root.join(&spec.source),
                    scenario.fixture_prefix(spec),
                    spec.isolation,
                )
            })
            .collect();
        let manager = self.fixtures.clone();

        blocking(&self.fixtures, move || {
            let mut handles = Vec::with_capacity(requests.len());
            for (name, source, prefix, isolation) in requests {
                // Earlier handles are released on drop if this fails
                let handle = manager.acquire(&source, &prefix, isolation)?;
                handles.push((name, handle));
            }
            Ok(handles)
        })
        .await
    }

    async fn run_entry(
        &self,
        scenario: &ScenarioDefinition,
        entry: &MatrixEntry,
    ) -> Result<EntryRun, SetupError> {
        let handles = self.acquire_fixtures(scenario).await?;
        let paths: BTreeMap<String, PathBuf> = handles
            .iter()
            .map(|(name, handle)| (name.clone(), handle.path().to_path_buf()))
            .collect();

        let args: Vec<String> = scenario
            .args
            .iter()
            .map(|arg| expand_placeholders(arg, &paths, entry))
            .collect();
        let env = self.environment_for(scenario, entry, &paths);
        let invocation = ScenarioInvocation::new(args, env).with_capture(scenario.capture);

        debug!(
            scenario = %scenario.name,
            label = %entry.label,
            args = ?invocation.args(),
            "Invoking subject"
        );
        let result = self.runner.run(&invocation).await;

        let released = blocking(&self.fixtures, move || release_all(handles)).await;

        let outcome = match result {
            Ok(result) => Ok(result),
            Err(Error::Execution(e)) => Err(e),
            Err(Error::Setup(e)) => return Err(e),
        };
        released?;

        Ok(EntryRun {
            label: entry.label,
            invocation,
            outcome,
        })
    }

    /// Runs one scenario under every active matrix entry, in order.
    ///
    /// Setup failures abort the scenario; execution failures are recorded
    /// on the entry and the remaining entries still run.
    pub async fn run(
        &self,
        scenario: &ScenarioDefinition,
    ) -> Result<ScenarioOutcome, SetupError> {
        if let Some(reason) = self.precondition(scenario) {
            info!(scenario = %scenario.name, %reason, "Skipping scenario");
            return Ok(ScenarioOutcome::Skipped(reason));
        }

        let entries = self.matrix.matrix(self.activation);
        let mut runs = Vec::with_capacity(entries.len());
        for entry in &entries {
            let run = self.run_entry(scenario, entry).await.inspect_err(|e| {
                warn!(
                    scenario = %scenario.name,
                    label = %entry.label,
                    error = %e,
                    "Scenario setup failed"
                );
            })?;
            match &run.outcome {
                Ok(result) => info!(
                    scenario = %scenario.name,
                    label = %run.label,
                    exit_status = result.exit_status(),
                    "Scenario entry finished"
                ),
                Err(e) => warn!(
                    scenario = %scenario.name,
                    label = %run.label,
                    error = %e,
                    "Scenario entry did not exit normally"
                ),
            }
            runs.push(run);
        }
        Ok(ScenarioOutcome::Ran(runs))
    }

    /// Runs scenarios concurrently, at most `concurrency` at a time.
    ///
    /// Reports come back in input order.
    pub async fn run_all<'a, I>(&self, scenarios: I, concurrency: usize) -> Vec<ScenarioReport<'a>>
    where
        I: IntoIterator<Item = &'a ScenarioDefinition>,
    {
        futures::stream::iter(scenarios)
            .map(|scenario| async move {
                ScenarioReport {
                    scenario,
                    outcome: self.run(scenario).await,
                }
            })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }
}

/// Runs fixture file work off the async workers.
///
/// A panicking task surfaces as a fixture error on the staging dir.
async fn blocking<T, F>(fixtures: &FixtureIsolationManager, work: F) -> Result<T, SetupError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SetupError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| SetupError::fixture(fixtures.staging_dir(), std::io::Error::other(e)))?
}

/// Releases every handle, reporting the first failure.
fn release_all(handles: Vec<(String, FixtureHandle)>) -> Result<(), SetupError> {
    let mut first_error = None;
    for (name, handle) in handles {
        if let Err(e) = handle.release() {
            warn!(fixture = %name, error = %e, "Fixture release failed");
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}
