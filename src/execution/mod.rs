//! Execution backends for the code-generation tool.
//!
//! Both variants share one contract so orchestration never branches on
//! which is active:
//! - `local`: the tool runs as a subprocess here
//! - `delegated`: the tool runs on a remote host over ssh
//!
//! A tool that ran and failed is an `ExecutionResult`, never an error. Only
//! failing to reach the execution target is an `ExecutionError`.

pub mod delegated;
pub mod local;
pub mod output;

pub use delegated::DelegatedBackend;
pub use local::LocalBackend;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ExecutionError;

/// Outcome of one backend invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub succeeded: bool,
    /// Captured tool output, or the reason the run failed.
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Pull request the tool reported opening.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<String>,
}

impl ExecutionResult {
    pub fn success(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self {
            succeeded: true,
            pull_request: output::extract_pull_request_url(&detail),
            detail,
            exit_code: Some(0),
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            detail: detail.into(),
            exit_code: None,
            pull_request: None,
        }
    }

    /// Exit code 0 is success; anything else, including death by signal,
    /// is a tool failure.
    pub fn from_exit(exit_code: Option<i32>, output: String) -> Self {
        match exit_code {
            Some(0) => Self::success(output),
            code => Self {
                exit_code: code,
                ..Self::failure(output)
            },
        }
    }
}

/// Runs the generation tool against a task.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Short name for logs, e.g. `local` or `delegated(user@host)`.
    fn name(&self) -> String;

    /// Run the tool with `task` as its input.
    async fn run(&self, task: &str) -> Result<ExecutionResult, ExecutionError>;
}
