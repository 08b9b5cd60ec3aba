//! Job state machine over tracker labels.
//!
//! The tracker's label set is the only persisted job state. Every transition
//! here is pure: it takes the labels an issue currently carries and returns
//! the full label set to write back, with exactly one status label present.

use serde::{Deserialize, Serialize};

use crate::error::JobError;
use crate::execution::ExecutionResult;
use crate::tracker::Issue;

/// Status of an issue as seen by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed.
    Ready,
    /// Claimed by a daemon; the tool is (or was) running.
    InProgress,
    /// Tool succeeded, a pull request awaits human review.
    Review,
    /// Tool failed; a human must re-label to retry.
    Failed,
}

impl JobStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (Ready, InProgress) |
            (InProgress, Review) | (InProgress, Failed) |
            // Stale-claim release
            (InProgress, Ready)
        )
    }

    /// Terminal for automated processing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Review | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Wire names of the four mutually exclusive status labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLabels {
    pub ready: String,
    pub in_progress: String,
    pub review: String,
    pub failed: String,
}

impl Default for StatusLabels {
    fn default() -> Self {
        Self {
            ready: "Ready".to_string(),
            in_progress: "In Progress".to_string(),
            review: "Review".to_string(),
            failed: "Failed".to_string(),
        }
    }
}

impl StatusLabels {
    /// The label that marks `status` on the tracker.
    pub fn label(&self, status: JobStatus) -> &str {
        match status {
            JobStatus::Ready => &self.ready,
            JobStatus::InProgress => &self.in_progress,
            JobStatus::Review => &self.review,
            JobStatus::Failed => &self.failed,
        }
    }

    /// Map a tracker label back to a status. Tracker label names compare
    /// case-insensitively.
    pub fn status_of(&self, label: &str) -> Option<JobStatus> {
        [
            JobStatus::Ready,
            JobStatus::InProgress,
            JobStatus::Review,
            JobStatus::Failed,
        ]
        .into_iter()
        .find(|s| self.label(*s).eq_ignore_ascii_case(label))
    }

    pub fn is_status_label(&self, label: &str) -> bool {
        self.status_of(label).is_some()
    }

    /// Distinct statuses present in a label set, in label order.
    pub fn statuses_in(&self, labels: &[String]) -> Vec<JobStatus> {
        let mut found = Vec::new();
        for status in labels.iter().filter_map(|l| self.status_of(l)) {
            if !found.contains(&status) {
                found.push(status);
            }
        }
        found
    }
}

/// Pure mapping from (current labels, event) to the next label set.
#[derive(Debug, Clone, Default)]
pub struct JobStateMachine {
    labels: StatusLabels,
}

impl JobStateMachine {
    pub fn new(labels: StatusLabels) -> Self {
        Self { labels }
    }

    pub fn labels(&self) -> &StatusLabels {
        &self.labels
    }

    /// Current status of an issue.
    ///
    /// `Ok(None)` when no status label is present; an error when more than
    /// one is.
    pub fn status(&self, issue: &Issue) -> Result<Option<JobStatus>, JobError> {
        let statuses = self.labels.statuses_in(&issue.labels);
        match statuses.as_slice() {
            [] => Ok(None),
            [single] => Ok(Some(*single)),
            _ => Err(JobError::InconsistentLabels {
                issue: issue.id,
                labels: issue
                    .labels
                    .iter()
                    .filter(|l| self.labels.is_status_label(l))
                    .cloned()
                    .collect(),
            }),
        }
    }

    /// `Ready` → `InProgress`. Rejected for any other current status, which
    /// is what makes a second claim of the same issue a no-op.
    pub fn claim(&self, issue: &Issue) -> Result<Vec<String>, JobError> {
        self.transition(issue, JobStatus::InProgress)
    }

    /// `InProgress` → `Review` on success, `Failed` otherwise.
    pub fn resolve(
        &self,
        issue: &Issue,
        result: &ExecutionResult,
    ) -> Result<Vec<String>, JobError> {
        let target = if result.succeeded {
            JobStatus::Review
        } else {
            JobStatus::Failed
        };
        self.transition(issue, target)
    }

    /// `InProgress` → `Ready`, used to hand a stale claim back to the queue.
    pub fn release(&self, issue: &Issue) -> Result<Vec<String>, JobError> {
        self.transition(issue, JobStatus::Ready)
    }

    fn transition(&self, issue: &Issue, target: JobStatus) -> Result<Vec<String>, JobError> {
        match self.status(issue)? {
            Some(from) if from.can_transition_to(target) => {
                Ok(self.relabel(&issue.labels, target))
            }
            from => Err(JobError::InvalidTransition {
                issue: issue.id,
                from: from.map_or_else(|| "unlabeled".to_string(), |s| s.to_string()),
                to: target.to_string(),
            }),
        }
    }

    /// Drop every status label, keep the rest, append the target label.
    fn relabel(&self, labels: &[String], target: JobStatus) -> Vec<String> {
        labels
            .iter()
            .filter(|l| !self.labels.is_status_label(l))
            .cloned()
            .chain(std::iter::once(self.labels.label(target).to_string()))
            .collect()
    }
}
