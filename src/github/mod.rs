//! Source-control query API.
//!
//! [`SourceControl`] is the seam the correlator and scans call through;
//! [`GitHubClient`] implements it over the GitHub REST API.

mod client;

pub use client::GitHubClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Repository metadata as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMetadata {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub private: bool,
    pub default_branch: String,
}

/// A tag and the commit it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub commit_sha: String,
}

/// A commit as listed by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub sha: String,
    pub author: Option<String>,
    pub message: Option<String>,
    /// Committer date; absent on some malformed commits.
    pub committed_at: Option<DateTime<Utc>>,
}

/// A CI workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: i64,
    pub name: Option<String>,
    pub head_sha: String,
    pub head_branch: Option<String>,
    pub status: Option<String>,
    pub conclusion: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    /// Whether the run name contains `filter`, ignoring case. `None` matches all.
    pub fn matches_filter(&self, filter: Option<&str>) -> bool {
        name_matches_filter(self.name.as_deref(), filter)
    }
}

/// Case-insensitive substring match of a workflow name. `None` filter matches all.
pub fn name_matches_filter(name: Option<&str>, filter: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(f) => name.is_some_and(|n| n.to_lowercase().contains(&f.to_lowercase())),
    }
}

/// A published release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub tag_name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Read-only queries against the source-control provider.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Repository metadata; `NotFound` if the provider does not know it.
    async fn get_repository(&self, owner: &str, name: &str) -> Result<RepoMetadata>;

    /// All tags, newest first.
    async fn list_tags(&self, owner: &str, name: &str) -> Result<Vec<Tag>>;

    /// Commits on `branch`, optionally only those after `since`.
    async fn list_commits(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CommitSummary>>;

    /// Workflow runs on `branch`.
    async fn list_workflow_runs(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
    ) -> Result<Vec<WorkflowRun>>;

    /// Commits reachable from `head` but not from `base`, oldest first.
    async fn compare(
        &self,
        owner: &str,
        name: &str,
        base: &str,
        head: &str,
    ) -> Result<Vec<CommitSummary>>;

    /// The release for `tag`, or `None` if the tag has no release.
    async fn get_release_by_tag(
        &self,
        owner: &str,
        name: &str,
        tag: &str,
    ) -> Result<Option<Release>>;

    /// Repositories of an organisation.
    async fn list_org_repositories(&self, org: &str) -> Result<Vec<RepoMetadata>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(name: Option<&str>) -> WorkflowRun {
        WorkflowRun {
            id: 1,
            name: name.map(str::to_string),
            head_sha: "a".repeat(40),
            head_branch: Some("main".to_string()),
            status: Some("completed".to_string()),
            conclusion: Some("success".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn workflow_filter_is_case_insensitive_substring() {
        assert!(run(Some("Build Docker image")).matches_filter(Some("docker")));
        assert!(!run(Some("Lint")).matches_filter(Some("docker")));
        assert!(!run(None).matches_filter(Some("docker")));
        assert!(run(None).matches_filter(None));
    }
}
