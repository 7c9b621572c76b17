//! Typed GitHub webhook payloads.
//!
//! Only the fields the ingestor reads are modelled; everything else in the
//! provider payload is ignored.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::github::WorkflowRun;

/// A decoded webhook delivery, discriminated by `X-GitHub-Event`.
#[derive(Debug, Clone)]
pub enum GithubEvent {
    PullRequest(PullRequestEvent),
    WorkflowRun(WorkflowRunEvent),
    Repository(RepositoryEvent),
    /// Any other event name; accepted and ignored.
    Other(String),
}

impl GithubEvent {
    /// Decode `body` according to the event name.
    pub fn decode(event: &str, body: &[u8]) -> Result<Self> {
        let invalid = |e: serde_json::Error| Error::Validation(format!("malformed {event} payload: {e}"));
        Ok(match event {
            "pull_request" => Self::PullRequest(serde_json::from_slice(body).map_err(invalid)?),
            "workflow_run" => Self::WorkflowRun(serde_json::from_slice(body).map_err(invalid)?),
            "repository" => Self::Repository(serde_json::from_slice(body).map_err(invalid)?),
            other => Self::Other(other.to_string()),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayloadOwner {
    pub login: String,
}

/// The `repository` object every event carries.
#[derive(Debug, Clone, Deserialize)]
pub struct PayloadRepository {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    pub owner: PayloadOwner,
    #[serde(default)]
    pub private: bool,
    pub default_branch: String,
}

impl PayloadRepository {
    /// `(owner, name)`, split from `full_name` when it has both halves.
    pub fn owner_and_name(&self) -> (&str, &str) {
        self.full_name
            .split_once('/')
            .unwrap_or((self.owner.login.as_str(), self.name.as_str()))
    }

    /// Whether `branch` (bare or `refs/heads/` qualified) is the default branch.
    pub fn is_default_branch(&self, branch: &str) -> bool {
        branch.strip_prefix("refs/heads/").unwrap_or(branch) == self.default_branch
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub pull_request: PullRequest,
    pub repository: PayloadRepository,
}

impl PullRequestEvent {
    pub fn is_merge(&self) -> bool {
        self.action == "closed" && self.pull_request.merged
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    #[serde(default)]
    pub merged: bool,
    pub merge_commit_sha: Option<String>,
    pub merged_at: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub merged_by: Option<PayloadUser>,
    pub base: BranchRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayloadUser {
    pub login: String,
    pub name: Option<String>,
}

impl PayloadUser {
    /// Display name, else login.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.login)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BranchRef {
    #[serde(rename = "ref")]
    pub git_ref: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRunEvent {
    pub action: String,
    pub workflow_run: WorkflowRun,
    pub workflow: Option<Workflow>,
    pub repository: PayloadRepository,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Workflow {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryEvent {
    pub action: RepositoryAction,
    pub repository: PayloadRepository,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryAction {
    Created,
    Deleted,
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repository() -> serde_json::Value {
        serde_json::json!({
            "id": 42,
            "name": "widget",
            "full_name": "acme/widget",
            "owner": { "login": "acme" },
            "private": true,
            "default_branch": "main"
        })
    }

    #[test]
    fn unknown_events_are_not_decoded() {
        let event = GithubEvent::decode("star", b"not json").unwrap();
        assert!(matches!(event, GithubEvent::Other(ref name) if name == "star"));
    }

    #[test]
    fn malformed_known_event_is_a_validation_error() {
        let err = GithubEvent::decode("pull_request", b"{}").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn repository_actions_outside_create_and_delete_decode_as_other() {
        let body = serde_json::json!({ "action": "archived", "repository": repository() });
        let event = GithubEvent::decode("repository", body.to_string().as_bytes()).unwrap();
        let GithubEvent::Repository(event) = event else {
            panic!("expected repository event");
        };
        assert_eq!(event.action, RepositoryAction::Other);
        assert_eq!(event.repository.owner_and_name(), ("acme", "widget"));
    }

    #[test]
    fn merger_without_name_falls_back_to_login() {
        let user = PayloadUser {
            login: "octocat".to_string(),
            name: None,
        };
        assert_eq!(user.display_name(), "octocat");
    }
}
