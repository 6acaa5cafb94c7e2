//! # harness-proto
//!
//! Shared types, error definitions, and traits for Captain Harness.
//!
//! This crate provides the foundational abstractions used across all harness
//! crates, including:
//! - `Environment` mappings passed end-to-end to the subject process
//! - `ScenarioInvocation` and `ExecutionResult`, the input and output of one run
//! - `RunIdentifier` for namespacing fixture copies and remote prefixes
//! - The setup/execution error taxonomy
//! - The `SubjectRunner` trait implemented by process adapters

mod environment;
mod error;
mod invocation;
mod result;
mod run_id;
mod runner;

pub use environment::Environment;
pub use error::{Error, ExecutionError, Result, SetupError};
pub use invocation::{CaptureMode, ScenarioInvocation};
pub use result::{CapturedOutput, ExecutionResult, strip_trailing_newline};
pub use run_id::{RUN_ID_BYTES, RunIdentifier};
pub use runner::SubjectRunner;
