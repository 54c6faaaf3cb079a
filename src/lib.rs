//! restify - sequenced HTTP API test scenarios
//!
//! This library runs ordered HTTP test cases that can reference values from
//! earlier responses and assert on status codes and response bodies.

pub mod cli;
pub mod commands;
pub mod common;
pub mod scenario;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use scenario::{Engine, RunOutcome, Scenario, TestCase, TestResult};
