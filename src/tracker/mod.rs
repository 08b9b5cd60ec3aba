//! Issue tracker abstraction.
//!
//! The tracker is the work queue and the only persisted state: a label on an
//! issue says where its job stands.

pub mod github;
pub mod memory;

pub use github::GithubTracker;
pub use memory::InMemoryTracker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// One unit of work on the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Issue number, stable and tracker-assigned.
    pub id: u64,
    pub title: String,
    /// Task description, read once per job run.
    pub body: String,
    pub labels: Vec<String>,
    /// Last modification time, used to age stale claims.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Issue {
    pub fn new(id: u64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            body: String::new(),
            labels: Vec::new(),
            updated_at: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_labels(self, labels: &[&str]) -> Self {
        self.with_labels_owned(labels.iter().map(|l| l.to_string()).collect())
    }

    pub fn with_labels_owned(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l.eq_ignore_ascii_case(label))
    }
}

/// Capability interface over the issue tracker.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// Open issues carrying `label`, in the tracker's order.
    async fn list_issues_with_label(&self, label: &str) -> Result<Vec<Issue>, TrackerError>;

    /// Fresh read of a single issue.
    async fn get_issue(&self, id: u64) -> Result<Issue, TrackerError>;

    /// Replace the issue's whole label set in one call.
    async fn set_labels(&self, id: u64, labels: &[String]) -> Result<(), TrackerError>;

    /// Post a comment on the issue.
    async fn add_comment(&self, id: u64, body: &str) -> Result<(), TrackerError>;

    /// Task description of an issue.
    async fn get_body(&self, id: u64) -> Result<String, TrackerError> {
        Ok(self.get_issue(id).await?.body)
    }
}
