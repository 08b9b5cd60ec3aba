//! In-process tracker.
//!
//! Holds issues in insertion order and records every label write, so a run
//! can be replayed transition by transition. Failures can be injected per
//! operation to exercise the daemon's partial-failure handling.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{Issue, TrackerClient};
use crate::error::TrackerError;

#[derive(Debug, Default)]
struct State {
    issues: Vec<Issue>,
    label_writes: HashMap<u64, Vec<Vec<String>>>,
    comments: HashMap<u64, Vec<String>>,
    fail_listing: bool,
    fail_label_writes: HashSet<u64>,
}

/// Tracker backed by memory.
#[derive(Debug, Default)]
pub struct InMemoryTracker {
    state: Mutex<State>,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_issues(issues: Vec<Issue>) -> Self {
        Self {
            state: Mutex::new(State {
                issues,
                ..State::default()
            }),
        }
    }

    pub async fn insert(&self, issue: Issue) {
        let mut state = self.state.lock().await;
        state.issues.retain(|i| i.id != issue.id);
        state.issues.push(issue);
    }

    /// Current labels of an issue.
    pub async fn labels(&self, id: u64) -> Option<Vec<String>> {
        let state = self.state.lock().await;
        state
            .issues
            .iter()
            .find(|i| i.id == id)
            .map(|i| i.labels.clone())
    }

    /// Every label set written for an issue, oldest first.
    pub async fn label_writes(&self, id: u64) -> Vec<Vec<String>> {
        let state = self.state.lock().await;
        state.label_writes.get(&id).cloned().unwrap_or_default()
    }

    pub async fn comments(&self, id: u64) -> Vec<String> {
        let state = self.state.lock().await;
        state.comments.get(&id).cloned().unwrap_or_default()
    }

    /// Make `list_issues_with_label` fail until reset.
    pub async fn fail_listing(&self, fail: bool) {
        self.state.lock().await.fail_listing = fail;
    }

    /// Make `set_labels` fail for one issue.
    pub async fn fail_label_writes_for(&self, id: u64) {
        self.state.lock().await.fail_label_writes.insert(id);
    }
}

#[async_trait]
impl TrackerClient for InMemoryTracker {
    async fn list_issues_with_label(&self, label: &str) -> Result<Vec<Issue>, TrackerError> {
        let state = self.state.lock().await;
        if state.fail_listing {
            return Err(TrackerError::Http("listing unavailable".to_string()));
        }
        Ok(state
            .issues
            .iter()
            .filter(|i| i.has_label(label))
            .cloned()
            .collect())
    }

    async fn get_issue(&self, id: u64) -> Result<Issue, TrackerError> {
        let state = self.state.lock().await;
        state
            .issues
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or(TrackerError::NotFound(id))
    }

    async fn set_labels(&self, id: u64, labels: &[String]) -> Result<(), TrackerError> {
        let mut state = self.state.lock().await;
        if state.fail_label_writes.contains(&id) {
            return Err(TrackerError::Status {
                status: 502,
                body: "label write rejected".to_string(),
            });
        }
        let issue = state
            .issues
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(TrackerError::NotFound(id))?;
        issue.labels = labels.to_vec();
        issue.updated_at = Some(Utc::now());
        state.label_writes.entry(id).or_default().push(labels.to_vec());
        Ok(())
    }

    async fn add_comment(&self, id: u64, body: &str) -> Result<(), TrackerError> {
        let mut state = self.state.lock().await;
        if !state.issues.iter().any(|i| i.id == id) {
            return Err(TrackerError::NotFound(id));
        }
        state.comments.entry(id).or_default().push(body.to_string());
        Ok(())
    }
}
