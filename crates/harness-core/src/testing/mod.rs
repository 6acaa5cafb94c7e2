//! Testing utilities for exercising orchestration without a real subject.

pub mod mock_runner;

pub use mock_runner::{MockResponse, MockRunner, RecordedInvocation};
