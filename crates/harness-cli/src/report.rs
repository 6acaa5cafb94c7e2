//! Turns orchestrator reports into verdicts for display.

use harness_core::{MatrixLabel, Mismatch, ScenarioOutcome, ScenarioReport, SkipReason};
use harness_proto::{CapturedOutput, ExecutionResult};
use serde::Serialize;

/// Final status of one scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Passed,
    Failed,
    Skipped,
    /// Setup failed before the subject could run.
    Error,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Passed => "passed",
            Status::Failed => "failed",
            Status::Skipped => "skipped",
            Status::Error => "error",
        }
    }
}

/// One matrix entry's evaluated run.
#[derive(Debug, Clone, Serialize)]
pub struct EntryRecord {
    pub label: MatrixLabel,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
    /// Set when the subject did not exit normally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// What the subject wrote before it stopped abnormally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_output: Option<CapturedOutput>,
    pub mismatches: Vec<Mismatch>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub known_limitations: Vec<String>,
}

impl EntryRecord {
    pub fn passed(&self) -> bool {
        self.error.is_none() && self.mismatches.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioRecord {
    pub scenario: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub entries: Vec<EntryRecord>,
}

impl ScenarioRecord {
    /// Evaluates every entry of `report` against the scenario's expectation.
    pub fn from_report(report: &ScenarioReport<'_>) -> Self {
        let scenario = report.scenario.name.clone();
        let runs = match &report.outcome {
            Err(e) => {
                return Self {
                    scenario,
                    status: Status::Error,
                    skip_reason: None,
                    error: Some(e.to_string()),
                    entries: Vec::new(),
                };
            }
            Ok(ScenarioOutcome::Skipped(reason)) => {
                return Self {
                    scenario,
                    status: Status::Skipped,
                    skip_reason: Some(reason.clone()),
                    error: None,
                    entries: Vec::new(),
                };
            }
            Ok(ScenarioOutcome::Ran(runs)) => runs,
        };

        let entries: Vec<EntryRecord> = runs
            .iter()
            .map(|run| match &run.outcome {
                Ok(result) => {
                    let verdict = report.scenario.expect.evaluate(result);
                    EntryRecord {
                        label: run.label,
                        args: run.invocation.args().to_vec(),
                        result: Some(result.clone()),
                        error: None,
                        partial_output: None,
                        mismatches: verdict.mismatches,
                        known_limitations: verdict.known_limitations,
                    }
                }
                Err(e) => EntryRecord {
                    label: run.label,
                    args: run.invocation.args().to_vec(),
                    result: None,
                    error: Some(e.to_string()),
                    partial_output: e.partial_output().cloned(),
                    mismatches: Vec::new(),
                    known_limitations: Vec::new(),
                },
            })
            .collect();

        let status = if entries.iter().all(EntryRecord::passed) {
            Status::Passed
        } else {
            Status::Failed
        };
        Self {
            scenario,
            status,
            skip_reason: None,
            error: None,
            entries,
        }
    }
}

/// Counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl Summary {
    pub fn tally(records: &[ScenarioRecord]) -> Self {
        let mut summary = Self::default();
        for record in records {
            match record.status {
                Status::Passed => summary.passed += 1,
                Status::Failed => summary.failed += 1,
                Status::Skipped => summary.skipped += 1,
                Status::Error => summary.errors += 1,
            }
        }
        summary
    }

    /// Skips never fail a run.
    pub fn success(&self) -> bool {
        self.failed == 0 && self.errors == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::{
        CredentialConfig, EnvironmentMatrixGenerator, Expectation, FixtureIsolationManager,
        MatrixConfig, ScenarioDefinition, ScenarioMode, ScenarioOrchestrator,
        testing::{MockResponse, MockRunner},
    };
    use harness_proto::Environment;
    use tempfile::TempDir;

    async fn records(
        runner: MockRunner,
        scenarios: &[ScenarioDefinition],
    ) -> Vec<ScenarioRecord> {
        let staging = TempDir::new().unwrap();
        let orchestrator = ScenarioOrchestrator::new(
            runner,
            FixtureIsolationManager::new(staging.path()),
            EnvironmentMatrixGenerator::new(MatrixConfig::default(), Environment::new()),
            CredentialConfig::default(),
        );
        orchestrator
            .run_all(scenarios, 2)
            .await
            .iter()
            .map(ScenarioRecord::from_report)
            .collect()
    }

    fn expecting_exit(code: i32) -> Expectation {
        Expectation {
            exit_code: Some(code),
            ..Expectation::default()
        }
    }

    #[tokio::test]
    async fn test_all_entries_must_pass() {
        let runner = MockRunner::new(vec![
            MockResponse::exit(0, "v1.2.3", ""),
            MockResponse::exit(2, "", "boom"),
        ]);
        let scenarios =
            [ScenarioDefinition::new("version", ["--version"]).with_expect(expecting_exit(0))];

        let records = records(runner, &scenarios).await;

        assert_eq!(records[0].status, Status::Failed);
        assert!(records[0].entries[0].passed());
        assert_eq!(records[0].entries[1].mismatches[0].field, "exit_code");
    }

    #[tokio::test]
    async fn test_abnormal_termination_fails_entry() {
        let runner = MockRunner::new(vec![MockResponse::terminated(9, "Running 3 examples\n")]);
        let scenarios = [ScenarioDefinition::new("killed", ["run"])];

        let records = records(runner, &scenarios).await;

        let killed = &records[0].entries[0];
        assert_eq!(records[0].status, Status::Failed);
        assert!(killed.result.is_none());
        assert!(killed.error.is_some());
        assert_eq!(
            killed.partial_output.as_ref().unwrap().stderr,
            b"Running 3 examples\n"
        );
        // The entry that exited normally carries no partial output
        assert!(records[0].entries[1].partial_output.is_none());
    }

    #[tokio::test]
    async fn test_partial_output_reaches_json() {
        let runner = MockRunner::new(vec![MockResponse::terminated(15, "half a line")]);
        let scenarios = [ScenarioDefinition::new("killed", ["run"])];

        let records = records(runner, &scenarios).await;
        let json = serde_json::to_value(&records[0]).unwrap();

        assert_eq!(json["entries"][0]["partial_output"]["stderr"], "half a line");
        assert_eq!(json["entries"][0]["partial_output"]["stdout"], "");
        assert!(json["entries"][1].get("partial_output").is_none());
    }

    #[tokio::test]
    async fn test_skips_do_not_fail_the_run() {
        let scenarios = [
            ScenarioDefinition::new("version", ["--version"]),
            ScenarioDefinition::new("upload", ["upload"]).with_mode(ScenarioMode::Cloud),
        ];

        let records = records(MockRunner::default(), &scenarios).await;
        let summary = Summary::tally(&records);

        assert_eq!(records[1].status, Status::Skipped);
        assert_eq!(
            summary,
            Summary {
                passed: 1,
                failed: 0,
                skipped: 1,
                errors: 0
            }
        );
        assert!(summary.success());
    }

    #[tokio::test]
    async fn test_setup_error_is_reported() {
        let runner = MockRunner::new(vec![MockResponse::MissingBinary]);
        let scenarios = [ScenarioDefinition::new("version", ["--version"])];

        let records = records(runner, &scenarios).await;

        assert_eq!(records[0].status, Status::Error);
        assert!(!Summary::tally(&records).success());
    }

    #[test]
    fn test_record_serializes_status_and_reason() {
        let record = ScenarioRecord {
            scenario: "upload".to_string(),
            status: Status::Skipped,
            skip_reason: Some(SkipReason::MissingCredential {
                var: "RWX_ACCESS_TOKEN".to_string(),
            }),
            error: None,
            entries: Vec::new(),
        };

        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["status"], "skipped");
        assert_eq!(json["skip_reason"]["reason"], "missing_credential");
        assert_eq!(json["skip_reason"]["var"], "RWX_ACCESS_TOKEN");
        assert!(json.get("error").is_none());
    }
}
