//! Local execution: the tool runs as a subprocess of the daemon.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;

use super::output::run_captured;
use super::{ExecutionBackend, ExecutionResult};
use crate::error::ExecutionError;

/// Runs `sh -c '<prepare> && <tool> "$1"' <task>` in the working directory.
///
/// The task is passed as a positional argument, so it never needs quoting.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    tool_command: String,
    prepare_command: Option<String>,
    working_dir: Option<PathBuf>,
}

impl LocalBackend {
    pub fn new(tool_command: impl Into<String>) -> Self {
        Self {
            tool_command: tool_command.into(),
            prepare_command: None,
            working_dir: None,
        }
    }

    /// Command run before the tool; its failure fails the run.
    pub fn with_prepare_command(mut self, prepare: Option<String>) -> Self {
        self.prepare_command = prepare.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    fn script(&self) -> String {
        match &self.prepare_command {
            Some(prepare) => format!("{prepare} && {} \"$1\"", self.tool_command),
            None => format!("{} \"$1\"", self.tool_command),
        }
    }
}

#[async_trait]
impl ExecutionBackend for LocalBackend {
    fn name(&self) -> String {
        "local".to_string()
    }

    async fn run(&self, task: &str) -> Result<ExecutionResult, ExecutionError> {
        let mut command = Command::new("sh");
        // $0 names the script in sh's own error messages.
        command.arg("-c").arg(self.script()).arg("issue-agent").arg(task);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        tracing::debug!(tool = %self.tool_command, "Starting local tool run");
        let captured = run_captured(command)
            .await
            .map_err(|e| ExecutionError::Transport {
                target: self.name(),
                reason: format!("failed to spawn tool: {e}"),
            })?;

        Ok(ExecutionResult::from_exit(captured.exit_code, captured.output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn task_reaches_tool_verbatim() {
        let backend = LocalBackend::new("printf '%s'");
        let result = backend.run("it's \"quoted\" $HOME").await.unwrap();
        assert!(result.succeeded);
        assert_eq!(result.detail, "it's \"quoted\" $HOME");
    }

    #[tokio::test]
    async fn nonzero_exit_is_tool_failure() {
        let backend = LocalBackend::new("sh -c 'echo broke >&2; exit 4' x");
        let result = backend.run("task").await.unwrap();
        assert!(!result.succeeded);
        assert_eq!(result.exit_code, Some(4));
        assert!(result.detail.contains("broke"));
    }

    #[tokio::test]
    async fn missing_tool_is_tool_failure() {
        let backend = LocalBackend::new("/nonexistent/generator");
        let result = backend.run("task").await.unwrap();
        assert!(!result.succeeded);
        assert_eq!(result.exit_code, Some(127));
    }

    #[tokio::test]
    async fn prepare_failure_skips_tool() {
        let backend = LocalBackend::new("echo ran")
            .with_prepare_command(Some("false".to_string()));
        let result = backend.run("task").await.unwrap();
        assert!(!result.succeeded);
        assert!(!result.detail.contains("ran"));
    }

    #[tokio::test]
    async fn blank_prepare_is_ignored() {
        let backend = LocalBackend::new("echo").with_prepare_command(Some("  ".to_string()));
        assert_eq!(backend.script(), "echo \"$1\"");
    }

    #[tokio::test]
    async fn runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let backend = LocalBackend::new("cat marker.txt; echo")
            .with_working_dir(Some(dir.path().to_path_buf()));
        let result = backend.run("task").await.unwrap();
        assert!(result.succeeded);
        assert!(result.detail.starts_with("here"));
    }

    #[tokio::test]
    async fn missing_working_dir_is_transport_error() {
        let backend = LocalBackend::new("echo")
            .with_working_dir(Some(PathBuf::from("/nonexistent/workdir")));
        let err = backend.run("task").await.unwrap_err();
        assert!(matches!(err, ExecutionError::Transport { .. }));
    }
}
