//! # harness-adapters
//!
//! Process adapters for Captain Harness.
//!
//! This crate owns the only code that actually spawns the subject binary:
//! - `SubjectBinary` resolves the binary's location and distinguishes
//!   "not built" from "failed to run"
//! - `SubprocessRunner` implements `SubjectRunner`, launching the subject
//!   with an explicit environment and draining its streams either separately
//!   or through one shared pipe that preserves emission order

mod subject;
mod subprocess_runner;

pub use subject::SubjectBinary;
pub use subprocess_runner::SubprocessRunner;
