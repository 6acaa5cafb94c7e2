//! Fixture isolation under real concurrency and a real subprocess.

use harness_core::{
    CredentialConfig, EnvironmentMatrixGenerator, FixtureHandle, FixtureIsolationManager,
    Isolation, MatrixActivation, MatrixConfig, ScenarioDefinition, ScenarioOrchestrator,
    ScenarioOutcome,
};
use harness_proto::{Environment, SetupError};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const RESULTS: &[u8] = b"{\"examples\":[],\"summary\":{\"example_count\":0}}\n";

#[test]
fn test_concurrent_copies_never_collide() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("rspec.json");
    fs::write(&source, RESULTS).unwrap();
    let staging = temp.path().join("staging");
    let manager = FixtureIsolationManager::new(&staging);

    let handles: Vec<FixtureHandle> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..32)
            .map(|_| scope.spawn(|| manager.acquire_unique_copy(&source, "concurrent-").unwrap()))
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let paths: HashSet<PathBuf> = handles.iter().map(|h| h.path().to_path_buf()).collect();
    assert_eq!(paths.len(), 32);
    for handle in &handles {
        assert_eq!(fs::read(handle.path()).unwrap(), RESULTS);
    }

    for handle in handles {
        handle.release().unwrap();
    }
    assert_eq!(fs::read_dir(&staging).unwrap().count(), 0);
    assert_eq!(fs::read(&source).unwrap(), RESULTS);
}

#[cfg(unix)]
#[test]
fn test_concurrent_redirects_of_one_path_are_exclusive() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("rspec.json");
    fs::write(&source, RESULTS).unwrap();
    let manager = FixtureIsolationManager::new(temp.path().join("staging"));

    // Every successful handle stays alive until all workers finish.
    let results: Vec<Result<FixtureHandle, SetupError>> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| manager.acquire_redirect(&source, "shared-")))
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let acquired = results.iter().filter(|r| r.is_ok()).count();
    let busy = results
        .iter()
        .filter(|r| matches!(r, Err(SetupError::FixtureBusy(_))))
        .count();
    assert_eq!(acquired, 1);
    assert_eq!(busy, 7);
}

#[cfg(unix)]
#[test]
fn test_redirect_survives_consumer_deleting_link() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("rspec.json");
    fs::write(&source, RESULTS).unwrap();
    let manager = FixtureIsolationManager::new(temp.path().join("staging"));

    let handle = manager.acquire(&source, "retry-", Isolation::Redirect).unwrap();
    let link = handle.path().to_path_buf();
    fs::remove_file(&link).unwrap();
    handle.release().unwrap();

    assert_eq!(fs::read(&link).unwrap(), RESULTS);
    assert_eq!(fs::read(&source).unwrap(), RESULTS);

    // The path is free again once released.
    let again = manager.acquire(&source, "retry-", Isolation::Redirect).unwrap();
    assert_eq!(again.path(), link.as_path());
}

#[cfg(unix)]
mod subprocess {
    use super::*;
    use harness_adapters::{SubjectBinary, SubprocessRunner};

    fn orchestrator(temp: &TempDir) -> ScenarioOrchestrator<SubprocessRunner> {
        let runner = SubprocessRunner::new(SubjectBinary::new("/bin/sh"));
        let path = std::env::var("PATH").unwrap_or_else(|_| "/usr/bin:/bin".to_string());
        let inherited = Environment::new().with("PATH", path);
        ScenarioOrchestrator::new(
            runner,
            FixtureIsolationManager::new(temp.path().join("staging")),
            EnvironmentMatrixGenerator::new(MatrixConfig::default(), inherited),
            CredentialConfig::default(),
        )
        .with_activation(MatrixActivation {
            skip_inherited: true,
            ..MatrixActivation::default()
        })
        .with_fixture_root(temp.path())
    }

    #[tokio::test]
    async fn test_subject_reads_isolated_copy() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("rspec.json"), RESULTS).unwrap();
        let scenario = ScenarioDefinition::new(
            "reads-copy",
            ["-c", "read -r line < '{fixture:results}'; echo \"$line\"; echo \"$CAPTAIN_BRANCH\" >&2"],
        )
        .with_fixture("results", "rspec.json", Isolation::Copy);

        let outcome = orchestrator(&temp).run(&scenario).await.unwrap();

        let ScenarioOutcome::Ran(runs) = outcome else {
            panic!("expected the scenario to run");
        };
        assert_eq!(runs.len(), 1);
        let result = runs[0].outcome.as_ref().unwrap();
        assert_eq!(result.exit_status(), 0);
        assert_eq!(result.stdout(), "{\"examples\":[],\"summary\":{\"example_count\":0}}");
        assert_eq!(result.stderr(), "main");
        assert_eq!(fs::read_dir(temp.path().join("staging")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_subject_deleting_redirect_leaves_source_intact() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("rspec.json"), RESULTS).unwrap();
        let scenario = ScenarioDefinition::new(
            "consumes-results",
            ["-c", "rm '{fixture:results}' && exit 3"],
        )
        .with_fixture("results", "rspec.json", Isolation::Redirect);

        let outcome = orchestrator(&temp).run(&scenario).await.unwrap();

        let ScenarioOutcome::Ran(runs) = outcome else {
            panic!("expected the scenario to run");
        };
        assert_eq!(runs[0].outcome.as_ref().unwrap().exit_status(), 3);
        assert_eq!(fs::read(temp.path().join("rspec.json")).unwrap(), RESULTS);
        let link = temp.path().join("staging").join("consumes-results-rspec.json");
        assert_eq!(fs::read(link).unwrap(), RESULTS);
    }
}
