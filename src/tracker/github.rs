//! GitHub Issues over the REST API.
//!
//! Status labels are swapped with `PUT /repos/{repo}/issues/{n}/labels`,
//! which replaces the whole label set in one request.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{Issue, TrackerClient};
use crate::error::TrackerError;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

const PAGE_SIZE: usize = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ApiLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<ApiLabel>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    /// Present when the "issue" is really a pull request.
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

impl From<ApiIssue> for Issue {
    fn from(api: ApiIssue) -> Self {
        Self {
            id: api.number,
            title: api.title,
            body: api.body.unwrap_or_default(),
            labels: api.labels.into_iter().map(|l| l.name).collect(),
            updated_at: api.updated_at,
        }
    }
}

/// Tracker client for one GitHub repository.
pub struct GithubTracker {
    client: reqwest::Client,
    api_base: String,
    repo: String,
}

impl GithubTracker {
    /// `repo` is `owner/name`.
    pub fn new(
        api_base: &str,
        repo: impl Into<String>,
        token: &SecretString,
    ) -> Result<Self, TrackerError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("issue-agent"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret().trim()))
            .map_err(|e| TrackerError::Http(format!("invalid authorization header: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            repo: repo.into(),
        })
    }

    fn issues_url(&self) -> String {
        format!("{}/repos/{}/issues", self.api_base, self.repo)
    }

    fn issue_url(&self, id: u64) -> String {
        format!("{}/{id}", self.issues_url())
    }
}

/// Turn a non-2xx response into `TrackerError::Status`.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, TrackerError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(TrackerError::Status {
        status: status.as_u16(),
        body: truncate_body(&body),
    })
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() <= 300 {
        body.to_string()
    } else {
        format!("{}...", body.chars().take(300).collect::<String>())
    }
}

#[async_trait]
impl TrackerClient for GithubTracker {
    async fn list_issues_with_label(&self, label: &str) -> Result<Vec<Issue>, TrackerError> {
        let mut issues = Vec::new();
        let per_page = PAGE_SIZE.to_string();

        for page in 1.. {
            let page_param = page.to_string();
            let resp = self
                .client
                .get(self.issues_url())
                .query(&[
                    ("labels", label),
                    ("state", "open"),
                    ("sort", "created"),
                    ("direction", "asc"),
                    ("per_page", per_page.as_str()),
                    ("page", page_param.as_str()),
                ])
                .send()
                .await?;
            let batch: Vec<ApiIssue> = check_status(resp).await?.json().await?;
            let done = batch.len() < PAGE_SIZE;

            issues.extend(
                batch
                    .into_iter()
                    .filter(|i| i.pull_request.is_none())
                    .map(Issue::from),
            );

            if done {
                break;
            }
        }

        tracing::debug!(label, count = issues.len(), "Listed issues");
        Ok(issues)
    }

    async fn get_issue(&self, id: u64) -> Result<Issue, TrackerError> {
        let resp = self.client.get(self.issue_url(id)).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(TrackerError::NotFound(id));
        }
        let issue: ApiIssue = check_status(resp).await?.json().await?;
        Ok(issue.into())
    }

    async fn set_labels(&self, id: u64, labels: &[String]) -> Result<(), TrackerError> {
        let resp = self
            .client
            .put(format!("{}/labels", self.issue_url(id)))
            .json(&serde_json::json!({ "labels": labels }))
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    async fn add_comment(&self, id: u64, body: &str) -> Result<(), TrackerError> {
        let resp = self
            .client
            .post(format!("{}/comments", self.issue_url(id)))
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_issue_maps_null_body_to_empty() {
        let api: ApiIssue = serde_json::from_value(serde_json::json!({
            "number": 42,
            "title": "Fix typo",
            "body": null,
            "labels": [{"name": "Ready", "color": "0e8a16"}],
            "updated_at": "2026-01-02T03:04:05Z"
        }))
        .unwrap();
        let issue = Issue::from(api);
        assert_eq!(issue.id, 42);
        assert_eq!(issue.body, "");
        assert_eq!(issue.labels, vec!["Ready".to_string()]);
        assert!(issue.updated_at.is_some());
    }

    #[test]
    fn urls_are_built_from_trimmed_base() {
        let token = SecretString::from("t");
        let tracker = GithubTracker::new("https://example.test/api/", "acme/web", &token).unwrap();
        assert_eq!(tracker.issues_url(), "https://example.test/api/repos/acme/web/issues");
        assert_eq!(tracker.issue_url(7), "https://example.test/api/repos/acme/web/issues/7");
    }

    #[test]
    fn token_with_newline_is_rejected() {
        let token = SecretString::from("abc\ndef");
        assert!(GithubTracker::new(DEFAULT_API_BASE, "a/b", &token).is_err());
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = "x".repeat(1000);
        let t = truncate_body(&body);
        assert!(t.ends_with("..."));
        assert_eq!(t.len(), 303);
    }
}
