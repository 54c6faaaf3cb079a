//! Error types for restify
//!
//! Case-level errors never escape a scenario run: the pipeline converts
//! them into the message of that case's test result. The remaining
//! variants cover loading scenarios and configuration.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for restify
#[derive(Error, Debug)]
pub enum Error {
    // === Case Pipeline Errors ===
    #[error("Failed to create request: {0}")]
    Build(String),

    #[error("Failed to execute request: {0}")]
    Transport(String),

    #[error("Failed to get response body: {0}")]
    BodyRead(String),

    #[error("Failed to parse response body into map: {0}")]
    Parse(String),

    #[error("Expectation failed. {0}")]
    Expectation(String),

    #[error("Failed to get evaluator: {0}")]
    Evaluator(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create a request build error
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build(message.into())
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a body read error
    pub fn body_read(message: impl Into<String>) -> Self {
        Self::BodyRead(message.into())
    }

    /// Create a status code mismatch error
    pub fn status_mismatch(expected: u16, actual: u16) -> Self {
        Self::Expectation(format!("Expect status: {}, got: {}", expected, actual))
    }

    /// Create an evaluator error
    pub fn evaluator(message: impl Into<String>) -> Self {
        Self::Evaluator(message.into())
    }

    /// Name of the error kind in the case failure taxonomy
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Build(_) => "BuildError",
            Error::Transport(_) => "TransportError",
            Error::BodyRead(_) | Error::Io(_) | Error::FileRead { .. } => "IOError",
            Error::Parse(_) | Error::Json(_) | Error::Yaml(_) => "ParseError",
            Error::Expectation(_) => "ExpectationError",
            Error::Evaluator(_) => "EvaluatorError",
            Error::Config(_) | Error::ConfigParse(_) => "ConfigError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mismatch_message() {
        let err = Error::status_mismatch(200, 404);
        assert_eq!(err.kind(), "ExpectationError");
        assert_eq!(err.to_string(), "Expectation failed. Expect status: 200, got: 404");
    }

    #[test]
    fn test_kinds_follow_taxonomy() {
        assert_eq!(Error::build("x").kind(), "BuildError");
        assert_eq!(Error::transport("x").kind(), "TransportError");
        assert_eq!(Error::body_read("x").kind(), "IOError");
        assert_eq!(Error::Parse("x".into()).kind(), "ParseError");
        assert_eq!(Error::evaluator("x").kind(), "EvaluatorError");
    }
}
