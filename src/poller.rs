//! Poll loop: discover `Ready` issues, then claim, execute and resolve each
//! one in tracker order.
//!
//! Runs its first tick at startup, then one tick per interval. Jobs are
//! strictly sequential: an issue is resolved before the next is claimed.
//! Shutdown is honored only between ticks.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::{
    DEFAULT_EXECUTION_TIMEOUT_SECS, DEFAULT_POLL_INTERVAL_SECS, DaemonConfig, StalePolicy,
};
use crate::error::{ExecutionError, TrackerError};
use crate::execution::output::{LOG_TAIL_CHARS, tail};
use crate::execution::{ExecutionBackend, ExecutionResult};
use crate::job::{Job, JobStateMachine, JobStatus, StatusLabels, prompt};
use crate::tracker::{Issue, TrackerClient};

/// Knobs the poll loop needs from configuration.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// `owner/name`, rendered into the task text.
    pub repo: String,
    pub poll_interval: Duration,
    pub execution_timeout: Duration,
    pub stale_policy: StalePolicy,
    pub labels: StatusLabels,
    pub post_comments: bool,
}

impl PollerSettings {
    pub fn new(repo: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            execution_timeout: Duration::from_secs(DEFAULT_EXECUTION_TIMEOUT_SECS),
            stale_policy: StalePolicy::Ignore,
            labels: StatusLabels::default(),
            post_comments: true,
        }
    }

    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            repo: config.repo.clone(),
            poll_interval: config.poll_interval,
            execution_timeout: config.execution_timeout,
            stale_policy: config.stale_policy,
            labels: config.labels.clone(),
            post_comments: config.post_comments,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn with_stale_policy(mut self, policy: StalePolicy) -> Self {
        self.stale_policy = policy;
        self
    }

    pub fn with_post_comments(mut self, enabled: bool) -> Self {
        self.post_comments = enabled;
        self
    }
}

/// What a tick did with one `Ready` issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueOutcome {
    /// Tool succeeded; issue now `Review`.
    Review,
    /// Tool failed (or panicked); issue now `Failed`.
    Failed,
    /// Claimed, but execution or the resolve write hit infrastructure
    /// trouble. The issue is left `In Progress`.
    Abandoned,
    /// Not claimed: no longer `Ready`, inconsistent labels, or the tracker
    /// rejected the claim write.
    Skipped,
}

/// Summary of one tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Per-issue outcomes in processing order.
    pub outcomes: Vec<(u64, IssueOutcome)>,
    /// Stale claims released back to `Ready` at tick start.
    pub reclaimed: Vec<u64>,
}

impl TickReport {
    pub fn count(&self, outcome: IssueOutcome) -> usize {
        self.outcomes.iter().filter(|(_, o)| *o == outcome).count()
    }

    pub fn outcome_of(&self, issue: u64) -> Option<IssueOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| *id == issue)
            .map(|(_, o)| *o)
    }
}

pub struct Poller {
    tracker: Arc<dyn TrackerClient>,
    backend: Arc<dyn ExecutionBackend>,
    machine: JobStateMachine,
    settings: PollerSettings,
}

impl Poller {
    pub fn new(
        tracker: Arc<dyn TrackerClient>,
        backend: Arc<dyn ExecutionBackend>,
        settings: PollerSettings,
    ) -> Self {
        Self {
            tracker,
            backend,
            machine: JobStateMachine::new(settings.labels.clone()),
            settings,
        }
    }

    /// Run ticks until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// A tick in progress always completes; the signal only cuts the sleep
    /// between ticks short.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.settings.poll_interval.as_secs(),
            backend = %self.backend.name(),
            repo = %self.settings.repo,
            "Poller started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.tick().await {
                Ok(report) => debug!(
                    processed = report.outcomes.len(),
                    reclaimed = report.reclaimed.len(),
                    "Tick complete"
                ),
                Err(e) => error!(error = %e, "Tick aborted: could not list ready issues"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Poller stopped");
    }

    /// One polling cycle.
    ///
    /// Fails only when the `Ready` listing itself fails; everything that goes
    /// wrong for a single issue is logged and the tick moves on.
    pub async fn tick(&self) -> Result<TickReport, TrackerError> {
        let mut report = TickReport::default();
        self.recover_stale(&mut report).await;

        let ready = self
            .tracker
            .list_issues_with_label(self.machine.labels().label(JobStatus::Ready))
            .await?;

        if ready.is_empty() {
            debug!("No ready issues");
        } else {
            info!(count = ready.len(), "Found ready issues");
        }

        for issue in &ready {
            let outcome = self.process(issue).await;
            report.outcomes.push((issue.id, outcome));
        }

        if !report.outcomes.is_empty() || !report.reclaimed.is_empty() {
            info!(
                review = report.count(IssueOutcome::Review),
                failed = report.count(IssueOutcome::Failed),
                abandoned = report.count(IssueOutcome::Abandoned),
                skipped = report.count(IssueOutcome::Skipped),
                reclaimed = report.reclaimed.len(),
                "Tick summary"
            );
        }
        Ok(report)
    }

    /// Deal with `In Progress` issues no live run owns. Runs are sequential
    /// and finish inside a tick, so at tick start every such issue is stale.
    async fn recover_stale(&self, report: &mut TickReport) {
        let label = self.machine.labels().label(JobStatus::InProgress);
        let stuck = match self.tracker.list_issues_with_label(label).await {
            Ok(issues) => issues,
            Err(e) => {
                warn!(error = %e, "Failed to list in-progress issues for stale check");
                return;
            }
        };

        for issue in stuck {
            let after = match self.settings.stale_policy {
                StalePolicy::Ignore => {
                    warn!(issue = issue.id, "Issue is in progress with no active run");
                    continue;
                }
                StalePolicy::Reclaim { after } => after,
            };

            let Some(updated_at) = issue.updated_at else {
                warn!(issue = issue.id, "Stale claim has no update time, leaving it");
                continue;
            };
            let age = Utc::now()
                .signed_duration_since(updated_at)
                .to_std()
                .unwrap_or_default();
            if age < after {
                debug!(issue = issue.id, age_secs = age.as_secs(), "Claim not stale yet");
                continue;
            }

            let labels = match self.machine.release(&issue) {
                Ok(labels) => labels,
                Err(e) => {
                    warn!(issue = issue.id, error = %e, "Cannot release stale claim");
                    continue;
                }
            };
            if let Err(e) = self.tracker.set_labels(issue.id, &labels).await {
                warn!(issue = issue.id, error = %e, "Failed to release stale claim");
                continue;
            }
            info!(
                issue = issue.id,
                age_secs = age.as_secs(),
                "Released stale claim back to ready"
            );
            self.comment(
                issue.id,
                &format!(
                    "Claim went stale after {}s without a result; returning this issue to the queue.",
                    age.as_secs()
                ),
            )
            .await;
            report.reclaimed.push(issue.id);
        }
    }

    /// Claim one listed issue and, if that sticks, run it to a terminal label.
    async fn process(&self, listed: &Issue) -> IssueOutcome {
        // The listing may be stale by the time we reach this issue.
        let issue = match self.tracker.get_issue(listed.id).await {
            Ok(issue) => issue,
            Err(e) => {
                warn!(issue = listed.id, error = %e, "Failed to re-read issue before claim");
                return IssueOutcome::Skipped;
            }
        };

        let claimed = match self.machine.claim(&issue) {
            Ok(labels) => labels,
            Err(e) => {
                warn!(issue = issue.id, error = %e, "Skipping issue");
                return IssueOutcome::Skipped;
            }
        };
        if let Err(e) = self.tracker.set_labels(issue.id, &claimed).await {
            error!(issue = issue.id, error = %e, "Failed to write claim; issue left ready");
            return IssueOutcome::Skipped;
        }

        let task = prompt::render_task(&self.settings.repo, &issue);
        let job = Job::start(&issue, task, claimed);
        let span = info_span!("job", issue = job.issue_id, run_id = %job.run_id);
        self.run_job(job).instrument(span).await
    }

    async fn run_job(&self, job: Job) -> IssueOutcome {
        info!(title = %job.title, backend = %self.backend.name(), "Claimed issue");
        self.comment(
            job.issue_id,
            &format!(
                "Picked up for automated implementation (run `{}`, {}).",
                job.run_id,
                self.backend.name()
            ),
        )
        .await;

        let result = match self.execute(&job).await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    error = %e,
                    elapsed_secs = job.elapsed().as_secs(),
                    "Execution abandoned; issue stays in progress"
                );
                return IssueOutcome::Abandoned;
            }
        };

        let output_tail = tail(&result.detail, LOG_TAIL_CHARS);
        if result.succeeded {
            info!(
                elapsed_secs = job.elapsed().as_secs(),
                pull_request = result.pull_request.as_deref().unwrap_or("-"),
                output = %output_tail,
                "Tool run succeeded"
            );
        } else {
            error!(
                elapsed_secs = job.elapsed().as_secs(),
                exit_code = ?result.exit_code,
                output = %output_tail,
                "Tool run failed"
            );
        }

        let labels = match self.machine.resolve(&job.claimed_issue(), &result) {
            Ok(labels) => labels,
            Err(e) => {
                error!(error = %e, "Cannot resolve job");
                return IssueOutcome::Abandoned;
            }
        };
        if let Err(e) = self.tracker.set_labels(job.issue_id, &labels).await {
            error!(error = %e, "Failed to write result label; issue stays in progress");
            return IssueOutcome::Abandoned;
        }

        if result.succeeded {
            let body = match &result.pull_request {
                Some(url) => format!("Implementation finished. Pull request: {url}"),
                None => "Implementation finished; ready for review.".to_string(),
            };
            self.comment(job.issue_id, &body).await;
            info!("Issue moved to review");
            IssueOutcome::Review
        } else {
            let exit = result
                .exit_code
                .map_or_else(|| "none".to_string(), |c| c.to_string());
            self.comment(
                job.issue_id,
                &format!(
                    "Automated implementation failed (exit code {exit}). Re-label to retry.\n\n```\n{output_tail}\n```"
                ),
            )
            .await;
            info!("Issue moved to failed");
            IssueOutcome::Failed
        }
    }

    /// Run the backend under the execution deadline.
    ///
    /// The run happens on its own task so a panicking backend surfaces as a
    /// `JoinError` here and becomes a failed result.
    async fn execute(&self, job: &Job) -> Result<ExecutionResult, ExecutionError> {
        let backend = Arc::clone(&self.backend);
        let task = job.task.clone();
        let deadline = self.settings.execution_timeout;

        let handle = tokio::spawn(
            async move { tokio::time::timeout(deadline, backend.run(&task)).await }
                .in_current_span(),
        );

        match handle.await {
            Ok(Ok(result)) => result,
            Ok(Err(_elapsed)) => Err(ExecutionError::Timeout(deadline)),
            Err(e) if e.is_panic() => Ok(ExecutionResult::failure(format!(
                "execution panicked: {}",
                panic_detail(e.into_panic())
            ))),
            Err(e) => Err(ExecutionError::Transport {
                target: self.backend.name(),
                reason: format!("execution task cancelled: {e}"),
            }),
        }
    }

    async fn comment(&self, issue: u64, body: &str) {
        if !self.settings.post_comments {
            return;
        }
        if let Err(e) = self.tracker.add_comment(issue, body).await {
            warn!(issue, error = %e, "Failed to post comment");
        }
    }
}

fn panic_detail(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
