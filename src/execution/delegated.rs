//! Delegated execution: the tool runs on a remote host over ssh, inheriting
//! that host's authenticated tool session.

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use shell_escape::unix::escape;
use tokio::process::Command;

use super::output::{LOG_TAIL_CHARS, run_captured, tail};
use super::{ExecutionBackend, ExecutionResult};
use crate::config::RemoteConfig;
use crate::error::ExecutionError;

/// ssh reserves this exit status for its own failures (connect, auth).
const SSH_TRANSPORT_FAILURE: i32 = 255;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Seconds between the remote `timeout`'s TERM and its KILL.
const REMOTE_KILL_GRACE_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct DelegatedBackend {
    remote: RemoteConfig,
    tool_command: String,
    prepare_command: Option<String>,
    ssh_program: String,
    connect_timeout: Duration,
    remote_deadline: Option<Duration>,
}

impl DelegatedBackend {
    pub fn new(remote: RemoteConfig, tool_command: impl Into<String>) -> Self {
        Self {
            remote,
            tool_command: tool_command.into(),
            prepare_command: None,
            ssh_program: "ssh".to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            remote_deadline: None,
        }
    }

    /// Command run in the remote workdir before the tool.
    pub fn with_prepare_command(mut self, prepare: Option<String>) -> Self {
        self.prepare_command = prepare.filter(|p| !p.trim().is_empty());
        self
    }

    /// Client binary to invoke instead of `ssh` from `PATH`.
    pub fn with_ssh_program(mut self, program: impl Into<String>) -> Self {
        self.ssh_program = program.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bound the remote run with coreutils `timeout`. Killing the local ssh
    /// client does not stop the remote command, so the deadline has to be
    /// enforced on the remote host as well.
    pub fn with_remote_deadline(mut self, deadline: Duration) -> Self {
        self.remote_deadline = Some(deadline);
        self
    }

    fn target(&self) -> String {
        format!("{}@{}", self.remote.user, self.remote.host)
    }

    /// Command line executed by the remote shell.
    ///
    /// Mirrors the local backend: the steps run under `sh -c` with the task
    /// as `$1`, optionally wrapped in `timeout` so the whole run has a
    /// remote-side deadline.
    fn remote_script(&self, task: &str) -> String {
        let steps = match &self.prepare_command {
            Some(prepare) => format!("{prepare} && {} \"$1\"", self.tool_command),
            None => format!("{} \"$1\"", self.tool_command),
        };
        let deadline = self
            .remote_deadline
            .map(|d| {
                format!(
                    "timeout -k {} {} ",
                    REMOTE_KILL_GRACE_SECS,
                    d.as_secs().max(1)
                )
            })
            .unwrap_or_default();
        format!(
            "cd {} && {deadline}sh -c {} issue-agent {}",
            escape(Cow::Borrowed(self.remote.workdir.as_str())),
            escape(Cow::Owned(steps)),
            escape(Cow::Borrowed(task)),
        )
    }

    fn ssh_args(&self, task: &str) -> Vec<String> {
        vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-p".to_string(),
            self.remote.port.to_string(),
            self.target(),
            self.remote_script(task),
        ]
    }
}

#[async_trait]
impl ExecutionBackend for DelegatedBackend {
    fn name(&self) -> String {
        format!("delegated({})", self.target())
    }

    async fn run(&self, task: &str) -> Result<ExecutionResult, ExecutionError> {
        let mut command = Command::new(&self.ssh_program);
        command.args(self.ssh_args(task));

        tracing::debug!(
            target_host = %self.target(),
            workdir = %self.remote.workdir,
            "Starting delegated tool run"
        );
        let captured = run_captured(command)
            .await
            .map_err(|e| ExecutionError::Transport {
                target: self.target(),
                reason: format!("failed to start {}: {e}", self.ssh_program),
            })?;

        if captured.exit_code == Some(SSH_TRANSPORT_FAILURE) {
            return Err(ExecutionError::Transport {
                target: self.target(),
                reason: tail(captured.output.trim(), LOG_TAIL_CHARS).to_string(),
            });
        }

        Ok(ExecutionResult::from_exit(captured.exit_code, captured.output))
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use super::*;

    fn remote() -> RemoteConfig {
        RemoteConfig {
            host: "10.0.0.5".to_string(),
            user: "builder".to_string(),
            port: 2222,
            workdir: "/srv/repos/web app".to_string(),
        }
    }

    fn fake_ssh(dir: &Path, body: &str) -> String {
        let path = dir.join("ssh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[test]
    fn remote_script_quotes_workdir_and_task() {
        let backend = DelegatedBackend::new(remote(), "claude --print")
            .with_prepare_command(Some("git pull".to_string()));
        assert_eq!(
            backend.remote_script("it's done"),
            "cd '/srv/repos/web app' && sh -c 'git pull && claude --print \"$1\"' issue-agent 'it'\\''s done'"
        );
    }

    #[test]
    fn remote_script_carries_the_deadline() {
        let backend = DelegatedBackend::new(remote(), "claude --print")
            .with_remote_deadline(Duration::from_secs(600));
        assert_eq!(
            backend.remote_script("task"),
            "cd '/srv/repos/web app' && timeout -k 10 600 sh -c 'claude --print \"$1\"' issue-agent task"
        );
    }

    #[test]
    fn ssh_args_target_configured_host() {
        let backend = DelegatedBackend::new(remote(), "tool");
        let args = backend.ssh_args("t");
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=15".to_string()));
        let port = args.iter().position(|a| a == "-p").unwrap();
        assert_eq!(args[port + 1], "2222");
        assert_eq!(args[args.len() - 2], "builder@10.0.0.5");
        assert_eq!(backend.name(), "delegated(builder@10.0.0.5)");
    }

    #[tokio::test]
    async fn remote_success_is_captured() {
        let dir = tempfile::tempdir().unwrap();
        let ssh = fake_ssh(
            dir.path(),
            "echo \"PR: https://github.com/acme/web/pull/77\"",
        );
        let backend = DelegatedBackend::new(remote(), "tool").with_ssh_program(ssh);

        let result = backend.run("task").await.unwrap();
        assert!(result.succeeded);
        assert_eq!(
            result.pull_request.as_deref(),
            Some("https://github.com/acme/web/pull/77")
        );
    }

    #[tokio::test]
    async fn remote_tool_failure_is_a_result() {
        let dir = tempfile::tempdir().unwrap();
        let ssh = fake_ssh(dir.path(), "echo 'tests failed' >&2; exit 1");
        let backend = DelegatedBackend::new(remote(), "tool").with_ssh_program(ssh);

        let result = backend.run("task").await.unwrap();
        assert!(!result.succeeded);
        assert!(result.detail.contains("tests failed"));
    }

    #[tokio::test]
    async fn ssh_failure_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let ssh = fake_ssh(
            dir.path(),
            "echo 'ssh: connect to host 10.0.0.5 port 2222: No route to host' >&2; exit 255",
        );
        let backend = DelegatedBackend::new(remote(), "tool").with_ssh_program(ssh);

        match backend.run("task").await {
            Err(ExecutionError::Transport { target, reason }) => {
                assert_eq!(target, "builder@10.0.0.5");
                assert!(reason.contains("No route to host"));
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    /// Fake ssh that runs the remote script locally, like sshd would.
    fn loopback_ssh(dir: &Path) -> String {
        fake_ssh(dir, "eval \"script=\\${$#}\"\nexec sh -c \"$script\"")
    }

    #[tokio::test]
    async fn remote_tool_receives_task_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let ssh = loopback_ssh(dir.path());
        let remote = RemoteConfig {
            workdir: dir.path().display().to_string(),
            ..remote()
        };
        let backend = DelegatedBackend::new(remote, "printf '%s'").with_ssh_program(ssh);

        let result = backend.run("it's \"quoted\" $HOME").await.unwrap();
        assert!(result.succeeded);
        assert_eq!(result.detail, "it's \"quoted\" $HOME");
    }

    #[tokio::test]
    async fn remote_deadline_stops_the_remote_tool() {
        let dir = tempfile::tempdir().unwrap();
        let ssh = loopback_ssh(dir.path());
        let remote = RemoteConfig {
            workdir: dir.path().display().to_string(),
            ..remote()
        };
        let backend = DelegatedBackend::new(remote, "sleep 5; echo finished")
            .with_ssh_program(ssh)
            .with_remote_deadline(Duration::from_secs(1));

        let result = backend.run("task").await.unwrap();
        assert!(!result.succeeded);
        assert_eq!(result.exit_code, Some(124));
        assert!(!result.detail.contains("finished"));
    }

    #[tokio::test]
    async fn missing_ssh_client_is_transport_error() {
        let backend =
            DelegatedBackend::new(remote(), "tool").with_ssh_program("/nonexistent/ssh");
        assert!(matches!(
            backend.run("task").await,
            Err(ExecutionError::Transport { .. })
        ));
    }
}
