//! # harness-core
//!
//! Core logic for Captain Harness, a black-box verification harness for the
//! captain CLI.
//!
//! This crate provides:
//! - Configuration loading and validation (`HarnessConfig`)
//! - Fixture isolation by copy or redirect (`FixtureIsolationManager`)
//! - Environment matrix generation (`EnvironmentMatrixGenerator`)
//! - The declarative scenario registry and expectations
//! - Scenario orchestration over any `SubjectRunner`
//!
//! Process spawning lives in `harness-adapters`; this crate only talks to
//! the `SubjectRunner` trait, so orchestration is testable with
//! `testing::MockRunner`.

mod config;
mod expectation;
mod fixtures;
mod matrix;
mod orchestrator;
mod scenario;
pub mod testing;

pub use config::{
    BINARY_OVERRIDE_VAR, CONCURRENCY_OVERRIDE_VAR, ConfigError, CredentialConfig, FixtureConfig,
    HarnessConfig, MatrixConfig, STAGING_OVERRIDE_VAR, SubjectConfig,
};
pub use expectation::{Expectation, ExpectationError, Mismatch, Verdict};
pub use fixtures::{
    COPY_SEPARATOR, FixtureHandle, FixtureIsolationManager, Isolation, redirect_link_name,
};
pub use matrix::{EnvironmentMatrixGenerator, MatrixActivation, MatrixEntry, MatrixLabel};
pub use orchestrator::{
    EntryRun, ScenarioOrchestrator, ScenarioOutcome, ScenarioReport, SkipReason,
};
pub use scenario::{
    FixtureSpec, ScenarioDefinition, ScenarioError, ScenarioMode, ScenarioRegistry,
    expand_placeholders,
};
