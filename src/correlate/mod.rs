//! Release correlation.
//!
//! Given a tag released to `uat` or `prod`, attach a deployment to every
//! commit the tag introduced relative to the tag before it. Per-commit work
//! runs concurrently, bounded by [`Context::concurrency`]; one commit failing
//! never aborts its siblings.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use opentelemetry::KeyValue;
use tracing::Instrument;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::model::{
    Deployment, DeploymentAttrs, DeploymentKey, Environment, FindOrCreate, Repository, Step,
};
use crate::store::LedgerStore;
use crate::telemetry::{job, metrics};

/// Status recorded for document-declared releases.
pub const RELEASE_STATUS: &str = "success";

/// One tag released to an environment at a point in time.
#[derive(Debug, Clone)]
pub struct ReleaseRequest {
    pub repository: Repository,
    pub tag: String,
    pub environment: Environment,
    /// Normalized version, used in the deployment name.
    pub version: String,
    /// Release time declared by the document.
    pub timestamp: DateTime<Utc>,
}

/// Outcome of correlating one release.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    pub created: usize,
    pub existing: usize,
    /// Commits skipped, with the reason.
    pub skipped: Vec<String>,
    /// Commits whose deployment could not be written.
    pub failed: Vec<String>,
}

impl ReleaseReport {
    pub fn recorded(&self) -> usize {
        self.created + self.existing
    }
}

/// Correlate one release. Tag-level problems skip or fail the whole release;
/// commit-level problems are collected in the report.
pub async fn correlate_release(ctx: &Context, req: &ReleaseRequest) -> Step<ReleaseReport> {
    let span = job::start_release_span(
        req.environment.as_str(),
        &req.repository.full_name(),
        &req.tag,
    );
    correlate(ctx, req).instrument(span).await
}

async fn correlate(ctx: &Context, req: &ReleaseRequest) -> Step<ReleaseReport> {
    if req.environment == Environment::Dev {
        return Step::Failed(Error::Validation(
            "releases are correlated to uat or prod only".to_string(),
        ));
    }
    let repo = &req.repository;

    let tags = match ctx.scm.list_tags(&repo.owner, &repo.name).await {
        Ok(tags) => tags,
        Err(e) => {
            tracing::warn!(error = %e, "failed to list tags");
            return Step::Failed(e);
        }
    };

    let Some(index) = tags.iter().position(|t| t.name == req.tag) else {
        tracing::warn!(tag = %req.tag, "tag not found");
        record_skip(req.environment, "tag_not_found");
        return Step::Skipped(format!("tag {} not found in {}", req.tag, repo.full_name()));
    };
    let current = &tags[index];

    let shas = match tags.get(index + 1) {
        None => vec![current.commit_sha.clone()],
        Some(previous) => {
            match ctx
                .scm
                .compare(&repo.owner, &repo.name, &previous.commit_sha, &current.commit_sha)
                .await
            {
                Ok(commits) => commits.into_iter().map(|c| c.sha).collect(),
                Err(e) => {
                    tracing::warn!(error = %e, previous = %previous.name, "failed to compare tags");
                    return Step::Failed(e);
                }
            }
        }
    };

    let finished_at = finish_time(ctx, req).await;
    let name = req.environment.release_name(&req.version);

    let outcomes: Vec<(String, Step<FindOrCreate<Deployment>>)> = stream::iter(shas)
        .map(|sha| {
            let name = name.clone();
            async move {
                let step = deploy_commit(ctx, req, &sha, name, finished_at).await;
                (sha, step)
            }
        })
        .buffer_unordered(ctx.concurrency.max(1))
        .collect()
        .await;

    let mut report = ReleaseReport::default();
    for (sha, step) in outcomes {
        match step {
            Step::Done(FindOrCreate::Created(_)) => report.created += 1,
            Step::Done(FindOrCreate::Existing(_)) => report.existing += 1,
            Step::Skipped(reason) => report.skipped.push(reason),
            Step::Failed(e) => {
                tracing::warn!(sha = %sha, error = %e, "failed to record deployment");
                report.failed.push(format!("{sha}: {e}"));
            }
        }
    }

    tracing::info!(
        created = report.created,
        existing = report.existing,
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "release correlated"
    );
    Step::Done(report)
}

async fn deploy_commit(
    ctx: &Context,
    req: &ReleaseRequest,
    sha: &str,
    name: String,
    finished_at: DateTime<Utc>,
) -> Step<FindOrCreate<Deployment>> {
    let commit = match ctx.store.find_commit(req.repository.id, sha).await {
        Ok(Some(commit)) => commit,
        Ok(None) => {
            tracing::warn!(sha = %sha, "commit not found, skipping");
            record_skip(req.environment, "commit_missing");
            return Step::Skipped(format!("commit {sha} not found"));
        }
        Err(e) => return Step::Failed(e),
    };

    let key = DeploymentKey {
        repository_id: req.repository.id,
        commit_id: commit.id,
        environment: req.environment,
        name,
    };
    let attrs = DeploymentAttrs {
        status: RELEASE_STATUS.to_string(),
        started_at: Some(commit.committed_at),
        finished_at: Some(finished_at),
    };
    record_deployment(ctx.store.as_ref(), key, attrs).await.into()
}

/// `prod` uses the document timestamp. `uat` prefers the release's
/// published time, then its created time, then the document timestamp.
async fn finish_time(ctx: &Context, req: &ReleaseRequest) -> DateTime<Utc> {
    if req.environment != Environment::Uat {
        return req.timestamp;
    }
    let repo = &req.repository;
    match ctx
        .scm
        .get_release_by_tag(&repo.owner, &repo.name, &req.tag)
        .await
    {
        Ok(Some(release)) => release
            .published_at
            .or(release.created_at)
            .unwrap_or(req.timestamp),
        Ok(None) => req.timestamp,
        Err(e) => {
            tracing::warn!(error = %e, "release lookup failed, using document timestamp");
            req.timestamp
        }
    }
}

/// Find-or-create a deployment and count the outcome.
pub async fn record_deployment(
    store: &dyn LedgerStore,
    key: DeploymentKey,
    attrs: DeploymentAttrs,
) -> Result<FindOrCreate<Deployment>> {
    let environment = key.environment;
    let result = store.find_or_create_deployment(key, attrs).await?;
    metrics::deployments_recorded().add(
        1,
        &[
            KeyValue::new("environment", environment.as_str()),
            KeyValue::new("result", result.label()),
        ],
    );
    Ok(result)
}

fn record_skip(environment: Environment, reason: &'static str) {
    metrics::correlation_skips().add(
        1,
        &[
            KeyValue::new("environment", environment.as_str()),
            KeyValue::new("reason", reason),
        ],
    );
}
