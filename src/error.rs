//! Error types for the issue agent.

use std::time::Duration;

/// Top-level error type for the daemon.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors talking to the issue tracker.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("HTTP request to tracker failed: {0}")]
    Http(String),

    #[error("Tracker returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response from tracker: {0}")]
    InvalidResponse(String),

    #[error("Issue #{0} not found")]
    NotFound(u64),
}

impl From<reqwest::Error> for TrackerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Http(e.to_string())
        }
    }
}

/// Infrastructure failures while executing the generation tool.
///
/// A tool that ran and reported failure is not an error: it comes back as an
/// `ExecutionResult` with `succeeded == false`.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Execution target {target} unreachable: {reason}")]
    Transport { target: String, reason: String },

    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),
}

/// Label state-machine errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Issue #{issue} is {from}, cannot transition to {to}")]
    InvalidTransition {
        issue: u64,
        from: String,
        to: String,
    },

    #[error("Issue #{issue} carries conflicting status labels: {labels:?}")]
    InconsistentLabels { issue: u64, labels: Vec<String> },
}

/// Result type alias for the daemon.
pub type Result<T> = std::result::Result<T, Error>;
