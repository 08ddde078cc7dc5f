//! Remote patch metadata from the GitHub REST API
//!
//! Only two endpoints are used: the PR listing and the commit list of one PR.
//! Requests carry `User-Agent: reforge-updater`, an optional bearer token and
//! a fixed timeout. The [`PullRequestSource`] trait is the seam the patch
//! engine depends on, so tests can supply commit lists without a network.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::GithubConfig;
use crate::core::UpdaterError;
use crate::ledger::AppliedPrRecord;

const USER_AGENT: &str = "reforge-updater";
const MAX_ERROR_BODY: usize = 2048;
const DEFAULT_PER_PAGE: u32 = 30;
const COMMITS_PER_PAGE: usize = 100;
/// GitHub stops listing PR commits after this many.
const MAX_PR_COMMITS: usize = 250;

/// A pull request as listed by the API, joined with the local ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user: PrUser,
    pub head: PrHead,
    /// Commit count; the listing endpoint usually omits it
    #[serde(default)]
    pub commits: u32,
    /// A ledger entry exists for this PR
    #[serde(default)]
    pub applied: bool,
    /// The ledger entry has commits to revert
    #[serde(default, rename = "canRevert")]
    pub can_revert: bool,
}

/// `user` object of a PR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrUser {
    pub login: String,
}

/// `head` object of a PR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrHead {
    pub sha: String,
}

/// One commit of a PR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrCommit {
    pub sha: String,
    pub commit: PrCommitDetail,
}

/// `commit` object of a PR commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrCommitDetail {
    pub message: String,
}

impl PrCommit {
    /// A commit with only its identifier and message.
    pub fn new(sha: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sha: sha.into(),
            commit: PrCommitDetail {
                message: message.into(),
            },
        }
    }
}

impl PullRequest {
    /// Sets `applied` and `can_revert` from a ledger entry.
    pub fn join_ledger(&mut self, record: Option<&AppliedPrRecord>) {
        self.applied = record.is_some();
        self.can_revert = record.is_some_and(|r| !r.commits.is_empty());
    }
}

/// Where PR metadata comes from.
pub trait PullRequestSource: Send + Sync {
    /// PRs in `state` (empty means `open`), most recently updated first.
    fn list_pull_requests<'a>(
        &'a self,
        state: &'a str,
        per_page: u32,
    ) -> BoxFuture<'a, Result<Vec<PullRequest>>>;

    /// Commits of PR `number`, oldest first.
    fn pull_request_commits(&self, number: u64) -> BoxFuture<'_, Result<Vec<PrCommit>>>;
}

/// `reqwest`-backed client for the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    config: GithubConfig,
}

impl GitHubClient {
    /// Builds a client with the configured timeout.
    pub fn new(config: GithubConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            config,
        })
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.owner,
            self.config.repo,
            path
        )
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, operation: &str) -> Result<T> {
        debug!("GET {}", url);
        let mut request = self.client.get(url).header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = self.config.token.as_deref().filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| UpdaterError::Network {
            operation: operation.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(UpdaterError::ApiStatus {
                status: status.as_u16(),
                body: truncate_body(body.trim()),
            }
            .into());
        }

        response.json::<T>().await.with_context(|| format!("Failed to decode {operation} response"))
    }
}

impl PullRequestSource for GitHubClient {
    fn list_pull_requests<'a>(
        &'a self,
        state: &'a str,
        per_page: u32,
    ) -> BoxFuture<'a, Result<Vec<PullRequest>>> {
        Box::pin(async move {
            let (state, per_page) = normalize_listing(state, per_page);
            let url = self.repo_url(&format!(
                "pulls?state={state}&per_page={per_page}&sort=updated&direction=desc"
            ));
            self.get_json(&url, "list pull requests").await
        })
    }

    fn pull_request_commits(&self, number: u64) -> BoxFuture<'_, Result<Vec<PrCommit>>> {
        Box::pin(async move {
            let mut commits: Vec<PrCommit> = Vec::new();
            for page in 1.. {
                let url = self.repo_url(&commits_page_path(number, page));
                let batch: Vec<PrCommit> = self.get_json(&url, "list pull request commits").await?;
                let fetched = batch.len();
                commits.extend(batch);
                match next_commits_page(fetched, commits.len()) {
                    CommitPaging::More => {}
                    CommitPaging::Done => break,
                    CommitPaging::Capped => {
                        warn!(
                            "PR #{} lists {} commits, the most GitHub returns; later commits are missing",
                            number,
                            commits.len()
                        );
                        break;
                    }
                }
            }
            Ok(commits)
        })
    }
}

/// Defaults an empty state to `open` and an out-of-range page size to 30.
#[must_use]
pub fn normalize_listing(state: &str, per_page: u32) -> (&str, u32) {
    let state = if state.trim().is_empty() { "open" } else { state.trim() };
    let per_page = if (1..=100).contains(&per_page) { per_page } else { DEFAULT_PER_PAGE };
    (state, per_page)
}

fn commits_page_path(number: u64, page: u32) -> String {
    format!("pulls/{number}/commits?per_page={COMMITS_PER_PAGE}&page={page}")
}

#[derive(Debug, PartialEq, Eq)]
enum CommitPaging {
    More,
    Done,
    /// The API limit was reached; the list may be incomplete.
    Capped,
}

fn next_commits_page(fetched: usize, total: usize) -> CommitPaging {
    if total >= MAX_PR_COMMITS {
        CommitPaging::Capped
    } else if fetched < COMMITS_PER_PAGE {
        CommitPaging::Done
    } else {
        CommitPaging::More
    }
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_listing() {
        assert_eq!(normalize_listing("", 0), ("open", 30));
        assert_eq!(normalize_listing("closed", 100), ("closed", 100));
        assert_eq!(normalize_listing("all", 101), ("all", 30));
    }

    #[test]
    fn test_commit_pages() {
        assert_eq!(commits_page_path(7, 2), "pulls/7/commits?per_page=100&page=2");
        assert_eq!(next_commits_page(3, 3), CommitPaging::Done);
        assert_eq!(next_commits_page(0, 100), CommitPaging::Done);
        assert_eq!(next_commits_page(100, 200), CommitPaging::More);
        assert_eq!(next_commits_page(50, 250), CommitPaging::Capped);
        assert_eq!(next_commits_page(100, 300), CommitPaging::Capped);
    }

    #[test]
    fn test_truncate_body() {
        let long = "é".repeat(2000);
        let truncated = truncate_body(&long);
        assert!(truncated.len() <= MAX_ERROR_BODY);
        assert_eq!(truncate_body("short"), "short");
    }

    #[test]
    fn test_pull_request_json_shape() {
        let raw = r#"{
            "number": 42,
            "title": "Faster pathing",
            "state": "open",
            "created_at": "2024-01-02T03:04:05Z",
            "updated_at": "2024-01-03T03:04:05Z",
            "user": {"login": "octo"},
            "head": {"sha": "abcdef1234567"},
            "body": "ignored"
        }"#;
        let mut pr: PullRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(pr.number, 42);
        assert!(!pr.applied);

        pr.join_ledger(Some(&AppliedPrRecord {
            commits: vec!["abc".into()],
        }));
        let value = serde_json::to_value(&pr).unwrap();
        assert_eq!(value["applied"], true);
        assert_eq!(value["canRevert"], true);
        assert_eq!(value["user"]["login"], "octo");

        pr.join_ledger(Some(&AppliedPrRecord::default()));
        assert!(pr.applied);
        assert!(!pr.can_revert);
    }

    #[test]
    fn test_repo_url() {
        let client = GitHubClient::new(GithubConfig {
            api_base: "https://api.example.com/".into(),
            owner: "acme".into(),
            repo: "svc".into(),
            token: None,
            timeout_secs: 15,
        })
        .unwrap();
        assert_eq!(client.repo_url("pulls/7/commits"), "https://api.example.com/repos/acme/svc/pulls/7/commits");
    }
}
