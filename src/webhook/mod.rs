//! GitHub webhook ingestion.
//!
//! Every delivery is authenticated against the raw body before it is decoded.
//! Three events mutate the ledger:
//!
//! - `pull_request` closed+merged into the default branch records the merge
//!   commit.
//! - `workflow_run` completed on the default branch records a `dev`
//!   deployment for its head commit.
//! - `repository` created/deleted tracks or forgets a repository.
//!
//! Any other event is accepted and ignored.

pub mod events;
pub mod signature;

use axum::http::StatusCode;
use opentelemetry::KeyValue;

use crate::context::Context;
use crate::correlate::record_deployment;
use crate::error::{Error, Result};
use crate::github::name_matches_filter;
use crate::model::{
    DeploymentAttrs, DeploymentKey, Environment, NewCommit, NewRepository, Repository,
    is_full_sha,
};
use crate::scan::{record_commit, workflow_deployment_name};
use crate::telemetry::metrics;
use events::{GithubEvent, PullRequestEvent, RepositoryAction, RepositoryEvent, WorkflowRunEvent};

/// What the ingestor did with a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The ledger was written to (or already held the record).
    Recorded(String),
    /// Accepted without side effects.
    Ignored(String),
    /// The event is of a handled kind but does not qualify.
    NotApplicable,
}

impl WebhookOutcome {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Recorded(_) | Self::Ignored(_) => StatusCode::OK,
            Self::NotApplicable => StatusCode::NO_CONTENT,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Recorded(m) | Self::Ignored(m) => Some(m),
            Self::NotApplicable => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Recorded(_) => "handled",
            Self::Ignored(_) | Self::NotApplicable => "ignored",
        }
    }
}

/// Authenticate, decode and dispatch one delivery.
///
/// Signature problems are returned before anything is decoded or written.
pub async fn handle(
    ctx: &Context,
    secret: &[u8],
    event: Option<&str>,
    signature_header: Option<&str>,
    body: &[u8],
) -> Result<WebhookOutcome> {
    let event_name = event.unwrap_or("unknown");
    let result = authenticate_and_dispatch(ctx, secret, event, signature_header, body).await;

    let outcome = match &result {
        Ok(outcome) => outcome.label(),
        Err(Error::Validation(_) | Error::Signature) => "rejected",
        Err(_) => "error",
    };
    metrics::webhook_events().add(
        1,
        &[
            KeyValue::new("event", event_name.to_string()),
            KeyValue::new("outcome", outcome),
        ],
    );
    result
}

async fn authenticate_and_dispatch(
    ctx: &Context,
    secret: &[u8],
    event: Option<&str>,
    signature_header: Option<&str>,
    body: &[u8],
) -> Result<WebhookOutcome> {
    let header = signature_header
        .ok_or_else(|| Error::Validation("signature not specified".to_string()))?;
    signature::verify(secret, body, header)?;

    let Some(event) = event else {
        return Ok(WebhookOutcome::Ignored("no event type".to_string()));
    };

    match GithubEvent::decode(event, body)? {
        GithubEvent::PullRequest(e) => on_pull_request(ctx, e).await,
        GithubEvent::WorkflowRun(e) => on_workflow_run(ctx, e).await,
        GithubEvent::Repository(e) => on_repository(ctx, e).await,
        GithubEvent::Other(name) => {
            tracing::debug!(event = %name, "ignoring webhook event");
            Ok(WebhookOutcome::Ignored(format!("event {name} ignored")))
        }
    }
}

async fn tracked_repository(ctx: &Context, owner: &str, name: &str) -> Result<Repository> {
    ctx.store
        .find_repository(owner, name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("repository {owner}/{name} does not exist")))
}

async fn on_pull_request(ctx: &Context, event: PullRequestEvent) -> Result<WebhookOutcome> {
    let into_default = event
        .repository
        .is_default_branch(&event.pull_request.base.git_ref);
    if !event.is_merge() || !into_default {
        return Ok(WebhookOutcome::NotApplicable);
    }

    let pr = event.pull_request;
    let sha = pr
        .merge_commit_sha
        .ok_or_else(|| Error::Validation("merged pull request without merge_commit_sha".to_string()))?;
    if !is_full_sha(&sha) {
        return Err(Error::Validation(format!(
            "merge_commit_sha {sha:?} is not a full commit sha"
        )));
    }
    let merged_at = pr
        .merged_at
        .ok_or_else(|| Error::Validation("merged pull request without merged_at".to_string()))?;

    let (owner, name) = event.repository.owner_and_name();
    let repository = tracked_repository(ctx, owner, name).await?;

    let new = NewCommit {
        repository_id: repository.id,
        sha,
        author: pr.merged_by.as_ref().map(|u| u.display_name().to_string()),
        message: pr.title,
        committed_at: merged_at,
    };
    let commit = record_commit(ctx.store.as_ref(), new, "webhook").await?;

    tracing::info!(
        repository = %repository.full_name(),
        sha = %commit.get().sha,
        result = commit.label(),
        "merge commit recorded"
    );
    Ok(WebhookOutcome::Recorded(format!(
        "commit {} {} in {}",
        commit.get().sha,
        commit.label(),
        repository.full_name()
    )))
}

async fn on_workflow_run(ctx: &Context, event: WorkflowRunEvent) -> Result<WebhookOutcome> {
    if event.action != "completed" {
        return Ok(WebhookOutcome::NotApplicable);
    }
    let run = event.workflow_run;
    let Some(branch) = run.head_branch.as_deref() else {
        return Ok(WebhookOutcome::NotApplicable);
    };

    if !event.repository.is_default_branch(branch) {
        return Ok(WebhookOutcome::NotApplicable);
    }

    let deployment_name = workflow_deployment_name(
        run.name.as_deref(),
        event.workflow.as_ref().and_then(|w| w.name.as_deref()),
    );
    if !name_matches_filter(Some(&deployment_name), ctx.workflow_filter.as_deref()) {
        tracing::debug!(workflow = %deployment_name, "workflow run excluded by filter");
        return Ok(WebhookOutcome::NotApplicable);
    }

    let (owner, name) = event.repository.owner_and_name();
    let repository = tracked_repository(ctx, owner, name).await?;

    let commit = ctx
        .store
        .find_commit(repository.id, &run.head_sha)
        .await?
        .ok_or_else(|| {
            Error::NotFound(format!(
                "commit {} does not exist in {}",
                run.head_sha,
                repository.full_name()
            ))
        })?;

    let key = DeploymentKey {
        repository_id: repository.id,
        commit_id: commit.id,
        environment: Environment::Dev,
        name: deployment_name,
    };
    let attrs = DeploymentAttrs {
        status: run.conclusion.unwrap_or_else(|| "unknown".to_string()),
        started_at: Some(run.created_at),
        finished_at: Some(run.updated_at),
    };
    let deployment = record_deployment(ctx.store.as_ref(), key, attrs).await?;

    tracing::info!(
        repository = %repository.full_name(),
        sha = %commit.sha,
        result = deployment.label(),
        "dev deployment recorded"
    );
    Ok(WebhookOutcome::Recorded(format!(
        "dev deployment of {} {} in {}",
        commit.sha,
        deployment.label(),
        repository.full_name()
    )))
}

async fn on_repository(ctx: &Context, event: RepositoryEvent) -> Result<WebhookOutcome> {
    let (owner, name) = event.repository.owner_and_name();
    match event.action {
        RepositoryAction::Created => {
            let new = NewRepository {
                external_id: Some(event.repository.id),
                owner: owner.to_string(),
                name: name.to_string(),
                private: event.repository.private,
                default_branch: event.repository.default_branch.clone(),
            };
            match ctx.store.create_repository(new).await {
                Ok(repository) => {
                    tracing::info!(repository = %repository.full_name(), "repository tracked");
                    Ok(WebhookOutcome::Recorded(format!(
                        "repository {} created",
                        repository.full_name()
                    )))
                }
                Err(Error::Conflict(_)) => Ok(WebhookOutcome::Ignored(format!(
                    "repository {owner}/{name} already tracked"
                ))),
                Err(e) => Err(e),
            }
        }
        RepositoryAction::Deleted => {
            let Some(repository) = ctx.store.find_repository(owner, name).await? else {
                return Ok(WebhookOutcome::Ignored(format!(
                    "repository {owner}/{name} not tracked"
                )));
            };

            // Commits and deployments go with the row through ON DELETE CASCADE.
            ctx.store.delete_repository(repository.id).await?;

            tracing::info!(repository = %repository.full_name(), "repository forgotten");
            Ok(WebhookOutcome::Recorded(format!(
                "repository {} deleted",
                repository.full_name()
            )))
        }
        RepositoryAction::Other => Ok(WebhookOutcome::NotApplicable),
    }
}
