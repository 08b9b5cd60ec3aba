use anyhow::Context;

use issue_agent::config::{DaemonConfig, ExecutionMode};
use issue_agent::daemon::Daemon;
use issue_agent::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = DaemonConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    let _log_guard =
        logging::init(config.log_dir.as_deref()).context("failed to initialize logging")?;

    let mode = match &config.mode {
        ExecutionMode::Local { .. } => "local".to_string(),
        ExecutionMode::Delegated(remote) => {
            format!("delegated ({}@{}:{})", remote.user, remote.host, remote.port)
        }
    };
    eprintln!("issue-agent v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Repo: {}", config.repo);
    eprintln!("   Execution: {mode}");
    eprintln!("   Poll interval: {}s", config.poll_interval.as_secs());

    let daemon = Daemon::from_config(&config).context("failed to start daemon")?;
    daemon.run().await?;
    Ok(())
}
