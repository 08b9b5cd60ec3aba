//! Jobs: the in-memory projection of one issue during one claim → execute →
//! resolve sequence.
//!
//! - `state`: label state machine (Ready → In Progress → Review/Failed)
//! - `prompt`: task text rendered from the issue

pub mod prompt;
pub mod state;

pub use state::{JobStateMachine, JobStatus, StatusLabels};

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::tracker::Issue;

/// One run of the generation tool against one issue. Never persisted.
#[derive(Debug, Clone)]
pub struct Job {
    /// Correlates log lines of a single run.
    pub run_id: Uuid,
    pub issue_id: u64,
    pub title: String,
    /// Task text handed to the backend.
    pub task: String,
    /// Label set written by the claim; `resolve` is computed against it.
    pub labels: Vec<String>,
    pub started_at: DateTime<Utc>,
}

impl Job {
    /// Start a job for an issue that has just been claimed.
    pub fn start(issue: &Issue, task: String, claimed_labels: Vec<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            issue_id: issue.id,
            title: issue.title.clone(),
            task,
            labels: claimed_labels,
            started_at: Utc::now(),
        }
    }

    /// The issue as the tracker holds it right after the claim.
    pub fn claimed_issue(&self) -> Issue {
        Issue::new(self.issue_id, self.title.clone()).with_labels_owned(self.labels.clone())
    }

    pub fn elapsed(&self) -> Duration {
        let elapsed = Utc::now().signed_duration_since(self.started_at);
        Duration::from_secs(elapsed.num_seconds().max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_snapshots_claimed_labels() {
        let issue = Issue::new(7, "Crash on save").with_labels(&["Ready", "bug"]);
        let job = Job::start(&issue, "task".into(), vec!["bug".into(), "In Progress".into()]);

        assert_eq!(job.issue_id, 7);
        let claimed = job.claimed_issue();
        assert_eq!(claimed.labels, vec!["bug".to_string(), "In Progress".to_string()]);
        assert_eq!(claimed.title, "Crash on save");
        assert!(job.elapsed() < Duration::from_secs(5));
    }
}
