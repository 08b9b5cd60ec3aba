//! Process lifecycle: build the tracker and backend once, run the poll loop,
//! drain on SIGTERM/SIGINT.

use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::info;

use crate::config::{DaemonConfig, ExecutionMode};
use crate::error::Result;
use crate::execution::{DelegatedBackend, ExecutionBackend, LocalBackend};
use crate::poller::{Poller, PollerSettings};
use crate::tracker::{GithubTracker, TrackerClient};

pub struct Daemon {
    poller: Poller,
}

impl Daemon {
    pub fn new(poller: Poller) -> Self {
        Self { poller }
    }

    /// Wire the GitHub tracker and the configured backend.
    pub fn from_config(config: &DaemonConfig) -> Result<Self> {
        let tracker: Arc<dyn TrackerClient> = Arc::new(GithubTracker::new(
            &config.api_base,
            config.repo.clone(),
            &config.tracker_token,
        )?);
        let backend = backend_for(config);
        let poller = Poller::new(tracker, backend, PollerSettings::from_config(config));
        Ok(Self::new(poller))
    }

    /// Poll until a termination signal arrives. The tick running when the
    /// signal lands is allowed to finish.
    pub async fn run(self) -> Result<()> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
            info!("Shutting down after the current tick");
            let _ = shutdown_tx.send(true);
        });

        self.run_until(shutdown_rx).await;
        Ok(())
    }

    pub async fn run_until(self, shutdown: watch::Receiver<bool>) {
        self.poller.run(shutdown).await;
    }
}

/// Pick the execution strategy once, at construction.
pub fn backend_for(config: &DaemonConfig) -> Arc<dyn ExecutionBackend> {
    match &config.mode {
        ExecutionMode::Local { workdir } => Arc::new(
            LocalBackend::new(config.tool_command.clone())
                .with_prepare_command(config.prepare_command.clone())
                .with_working_dir(workdir.clone()),
        ),
        ExecutionMode::Delegated(remote) => Arc::new(
            DelegatedBackend::new(remote.clone(), config.tool_command.clone())
                .with_prepare_command(config.prepare_command.clone())
                .with_remote_deadline(config.execution_timeout),
        ),
    }
}
