//! Configuration types.
//!
//! Everything is read once at startup from the environment. Parsing goes
//! through a key lookup so it can be driven without touching process env.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::job::StatusLabels;
use crate::tracker::github::DEFAULT_API_BASE;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_REMOTE_PORT: u16 = 22;
pub const DEFAULT_TOOL_COMMAND: &str = "claude --print --permission-mode bypassPermissions";
pub const DEFAULT_PREPARE_COMMAND: &str = "git checkout main && git pull --rebase origin main";

/// Where the generation tool runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionMode {
    Local { workdir: Option<PathBuf> },
    Delegated(RemoteConfig),
}

/// Remote host reached over ssh for delegated execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub host: String,
    pub user: String,
    pub port: u16,
    /// Repository checkout on the remote host.
    pub workdir: String,
}

/// What to do with issues found `In Progress` that no live run owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalePolicy {
    /// Leave them alone and log.
    Ignore,
    /// Hand them back to `Ready` once older than the threshold.
    Reclaim { after: Duration },
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub tracker_token: SecretString,
    /// `owner/name`.
    pub repo: String,
    pub api_base: String,
    pub poll_interval: Duration,
    pub execution_timeout: Duration,
    pub mode: ExecutionMode,
    pub tool_command: String,
    pub prepare_command: Option<String>,
    pub stale_policy: StalePolicy,
    pub labels: StatusLabels,
    pub post_comments: bool,
    pub log_dir: Option<PathBuf>,
}

impl DaemonConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()));

        let tracker_token = SecretString::from(require("TRACKER_TOKEN")?);
        let repo = parse_repo(&require("REPO_IDENTIFIER")?)?;

        let poll_interval = Duration::from_secs(parse_positive(
            "POLL_INTERVAL_SECONDS",
            get("POLL_INTERVAL_SECONDS"),
            DEFAULT_POLL_INTERVAL_SECS,
        )?);
        let execution_timeout = Duration::from_secs(parse_positive(
            "EXECUTION_TIMEOUT_SECONDS",
            get("EXECUTION_TIMEOUT_SECONDS"),
            DEFAULT_EXECUTION_TIMEOUT_SECS,
        )?);

        let mode = match get("EXECUTION_MODE").as_deref().map(str::to_ascii_lowercase) {
            None => ExecutionMode::Local {
                workdir: get("LOCAL_WORKDIR").map(PathBuf::from),
            },
            Some(m) if m == "local" => ExecutionMode::Local {
                workdir: get("LOCAL_WORKDIR").map(PathBuf::from),
            },
            Some(m) if m == "delegated" => {
                let port = match get("REMOTE_PORT") {
                    None => DEFAULT_REMOTE_PORT,
                    Some(p) => p.parse().map_err(|_| ConfigError::InvalidValue {
                        key: "REMOTE_PORT".to_string(),
                        message: format!("expected a port number, got '{p}'"),
                    })?,
                };
                ExecutionMode::Delegated(RemoteConfig {
                    host: require("REMOTE_HOST")?,
                    user: require("REMOTE_USER")?,
                    port,
                    workdir: require("REMOTE_WORKDIR")?,
                })
            }
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "EXECUTION_MODE".to_string(),
                    message: format!("expected 'local' or 'delegated', got '{other}'"),
                });
            }
        };

        let stale_policy = match get("STALE_IN_PROGRESS_POLICY")
            .as_deref()
            .map(str::to_ascii_lowercase)
        {
            None => StalePolicy::Ignore,
            Some(p) if p == "ignore" => StalePolicy::Ignore,
            Some(p) if p == "reclaim" => {
                let secs = get("STALE_IN_PROGRESS_AFTER_SECONDS").ok_or_else(|| {
                    ConfigError::MissingRequired {
                        key: "STALE_IN_PROGRESS_AFTER_SECONDS".to_string(),
                        hint: "Reclaiming stale claims needs an explicit age threshold."
                            .to_string(),
                    }
                })?;
                StalePolicy::Reclaim {
                    after: Duration::from_secs(parse_positive(
                        "STALE_IN_PROGRESS_AFTER_SECONDS",
                        Some(secs),
                        0,
                    )?),
                }
            }
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "STALE_IN_PROGRESS_POLICY".to_string(),
                    message: format!("expected 'ignore' or 'reclaim', got '{other}'"),
                });
            }
        };

        let defaults = StatusLabels::default();
        let labels = StatusLabels {
            ready: get("LABEL_READY").unwrap_or(defaults.ready),
            in_progress: get("LABEL_IN_PROGRESS").unwrap_or(defaults.in_progress),
            review: get("LABEL_REVIEW").unwrap_or(defaults.review),
            failed: get("LABEL_FAILED").unwrap_or(defaults.failed),
        };
        validate_labels(&labels)?;

        // PREPARE_COMMAND set to blank disables the step, so read it raw.
        let prepare_command = match lookup("PREPARE_COMMAND") {
            None => Some(DEFAULT_PREPARE_COMMAND.to_string()),
            Some(p) if p.trim().is_empty() => None,
            Some(p) => Some(p.trim().to_string()),
        };

        let post_comments = match get("POST_COMMENTS").as_deref().map(str::to_ascii_lowercase) {
            None => true,
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "POST_COMMENTS".to_string(),
                    message: format!("expected a boolean, got '{other}'"),
                });
            }
        };

        Ok(Self {
            tracker_token,
            repo,
            api_base: get("TRACKER_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            poll_interval,
            execution_timeout,
            mode,
            tool_command: get("TOOL_COMMAND").unwrap_or_else(|| DEFAULT_TOOL_COMMAND.to_string()),
            prepare_command,
            stale_policy,
            labels,
            post_comments,
            log_dir: get("LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse_repo(value: &str) -> Result<String, ConfigError> {
    match value.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok(value.to_string())
        }
        _ => Err(ConfigError::InvalidValue {
            key: "REPO_IDENTIFIER".to_string(),
            message: format!("expected 'owner/name', got '{value}'"),
        }),
    }
}

/// Parse a positive integer, falling back to `default` when unset.
fn parse_positive(key: &str, value: Option<String>, default: u64) -> Result<u64, ConfigError> {
    let Some(raw) = value else {
        return Ok(default);
    };
    match raw.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a positive integer, got '{raw}'"),
        }),
    }
}

fn validate_labels(labels: &StatusLabels) -> Result<(), ConfigError> {
    let names = [
        &labels.ready,
        &labels.in_progress,
        &labels.review,
        &labels.failed,
    ];
    for (i, a) in names.iter().enumerate() {
        if names[i + 1..].iter().any(|b| a.eq_ignore_ascii_case(b)) {
            return Err(ConfigError::InvalidValue {
                key: "LABEL_*".to_string(),
                message: format!("status label '{a}' is used for more than one status"),
            });
        }
    }
    Ok(())
}
