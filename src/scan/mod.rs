//! Scan orchestration.
//!
//! Entry points for the three job kinds. Every scan is idempotent: commits
//! and deployments are find-or-create, so re-running a scan converges on the
//! same ledger.
//!
//! - `dev`: resolve the repository, backfill commits on the default branch,
//!   then attach `dev` deployments for matching workflow runs.
//! - `uat` / `prod`: read the release log, parse its blocks and correlate
//!   every referenced release.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use opentelemetry::KeyValue;
use serde::Serialize;

use crate::context::Context;
use crate::correlate::{ReleaseReport, ReleaseRequest, correlate_release, record_deployment};
use crate::error::{Error, Result};
use crate::github::WorkflowRun;
use crate::model::job::JobSpec;
use crate::model::{
    Commit, Deployment, DeploymentAttrs, DeploymentKey, Environment, FindOrCreate, NewCommit,
    NewRepository, Repository, Step, is_full_sha,
};
use crate::parser::{ReleaseRef, VersionBlock, parse_version_block};
use crate::store::LedgerStore;
use crate::telemetry::metrics;

/// Receives coarse job progress, 0 to 100.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, percent: u8);
}

/// Discards progress. Used for inline scans.
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn report(&self, _percent: u8) {}
}

/// An `owner/name` repository reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Accepts `owner/name` or a repository URL such as
    /// `https://github.com/owner/name.git`.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim().trim_end_matches('/');
        let path = trimmed
            .split_once("://")
            .map_or(trimmed, |(_, rest)| rest);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let (owner, name) = match segments.as_slice() {
            [owner, name] => (*owner, *name),
            [host, owner, name] if host.contains('.') => (*owner, *name),
            _ => {
                return Err(Error::Validation(format!(
                    "repository reference must be owner/name: {raw:?}"
                )));
            }
        };
        Ok(Self {
            owner: owner.to_string(),
            name: name.trim_end_matches(".git").to_string(),
        })
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Counts from one commit backfill.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitScan {
    pub created: usize,
    pub existing: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Counts from one workflow-run correlation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkflowScan {
    pub created: usize,
    pub existing: usize,
    /// Runs excluded by the name filter or not yet completed.
    pub filtered: usize,
    /// Runs whose head commit is not in the ledger.
    pub unmatched: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DevScanReport {
    pub repository: String,
    pub commits: Option<CommitScan>,
    pub workflows: Option<WorkflowScan>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReleaseScanReport {
    pub blocks: usize,
    pub blocks_skipped: usize,
    pub references_rejected: usize,
    pub releases_correlated: usize,
    pub releases_skipped: usize,
    pub releases_failed: usize,
    pub deployments_created: usize,
    pub deployments_existing: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobReport {
    Dev(DevScanReport),
    Release(ReleaseScanReport),
}

/// Execute a job spec against the context.
pub async fn run_job(ctx: &Context, spec: &JobSpec, progress: &dyn ProgressSink) -> Result<JobReport> {
    match spec {
        JobSpec::Dev { repo_ref } => run_dev_scan(ctx, repo_ref, progress)
            .await
            .map(JobReport::Dev),
        JobSpec::Uat { doc_id } | JobSpec::Prod { doc_id } => {
            run_release_scan(ctx, spec.environment(), doc_id, progress)
                .await
                .map(JobReport::Release)
        }
    }
}

/// `dev` scan of one repository.
///
/// Resolving the repository is fatal on failure. Commit and workflow listing
/// failures are logged and leave the corresponding section empty.
pub async fn run_dev_scan(
    ctx: &Context,
    repo_ref: &str,
    progress: &dyn ProgressSink,
) -> Result<DevScanReport> {
    let repo_ref = RepoRef::parse(repo_ref)?;
    let repository = scan_repository(ctx, &repo_ref.owner, &repo_ref.name).await?;

    tracing::info!(repository = %repository.full_name(), "scanning commits");
    let commits = match scan_commits(ctx, &repository).await {
        Ok(scan) => Some(scan),
        Err(e) => {
            tracing::warn!(repository = %repository.full_name(), error = %e, "commit backfill failed");
            None
        }
    };
    progress.report(50).await;

    tracing::info!(repository = %repository.full_name(), "scanning workflow runs");
    let workflows = match scan_workflows(ctx, &repository).await {
        Ok(scan) => Some(scan),
        Err(e) => {
            tracing::warn!(repository = %repository.full_name(), error = %e, "workflow scan failed");
            None
        }
    };
    progress.report(100).await;

    Ok(DevScanReport {
        repository: repository.full_name(),
        commits,
        workflows,
    })
}

/// Find a tracked repository, creating it from provider metadata if needed.
pub async fn scan_repository(ctx: &Context, owner: &str, name: &str) -> Result<Repository> {
    if let Some(repository) = ctx.store.find_repository(owner, name).await? {
        return Ok(repository);
    }

    let meta = ctx.scm.get_repository(owner, name).await?;
    let created = ctx
        .store
        .create_repository(NewRepository {
            external_id: Some(meta.id),
            owner: owner.to_string(),
            name: name.to_string(),
            private: meta.private,
            default_branch: meta.default_branch,
        })
        .await;

    match created {
        Ok(repository) => {
            tracing::info!(repository = %repository.full_name(), "repository created");
            Ok(repository)
        }
        // A concurrent webhook or scan won the insert.
        Err(Error::Conflict(_)) => ctx
            .store
            .find_repository(owner, name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("repository {owner}/{name}"))),
        Err(e) => Err(e),
    }
}

/// Backfill commits on the default branch since the last successful scan.
pub async fn scan_commits(ctx: &Context, repository: &Repository) -> Result<CommitScan> {
    let started = Utc::now();
    let listed = ctx
        .scm
        .list_commits(
            &repository.owner,
            &repository.name,
            &repository.default_branch,
            repository.last_scanned_at,
        )
        .await?;

    let outcomes: Vec<Step<FindOrCreate<Commit>>> = stream::iter(listed)
        .map(|summary| async move {
            if !is_full_sha(&summary.sha) {
                tracing::warn!(sha = %summary.sha, "skipping commit with malformed sha");
                return Step::Skipped(format!("commit {} has a malformed sha", summary.sha));
            }
            let Some(committed_at) = summary.committed_at else {
                tracing::warn!(sha = %summary.sha, "skipping commit without committer date");
                return Step::Skipped(format!("commit {} has no date", summary.sha));
            };
            let new = NewCommit {
                repository_id: repository.id,
                sha: summary.sha,
                author: summary.author,
                message: summary.message,
                committed_at,
            };
            Step::from(record_commit(ctx.store.as_ref(), new, "scan").await)
        })
        .buffer_unordered(ctx.concurrency.max(1))
        .collect()
        .await;

    let mut scan = CommitScan::default();
    for outcome in outcomes {
        match outcome {
            Step::Done(FindOrCreate::Created(_)) => scan.created += 1,
            Step::Done(FindOrCreate::Existing(_)) => scan.existing += 1,
            Step::Skipped(_) => scan.skipped += 1,
            Step::Failed(e) => {
                tracing::warn!(error = %e, "failed to record commit");
                scan.failed += 1;
            }
        }
    }

    // Failed commits must be retried by the next incremental scan.
    if scan.failed == 0 {
        ctx.store.mark_scanned(repository.id, started).await?;
    }
    tracing::info!(
        repository = %repository.full_name(),
        created = scan.created,
        existing = scan.existing,
        skipped = scan.skipped,
        "commits scanned"
    );
    Ok(scan)
}

/// Attach `dev` deployments for completed workflow runs on the default branch.
pub async fn scan_workflows(ctx: &Context, repository: &Repository) -> Result<WorkflowScan> {
    let runs = ctx
        .scm
        .list_workflow_runs(
            &repository.owner,
            &repository.name,
            &repository.default_branch,
        )
        .await?;

    let filter = ctx.workflow_filter.as_deref();
    let (matching, excluded): (Vec<_>, Vec<_>) = runs
        .into_iter()
        .partition(|run| is_completed(run) && run.matches_filter(filter));

    let mut scan = WorkflowScan {
        filtered: excluded.len(),
        ..WorkflowScan::default()
    };

    let outcomes: Vec<Step<FindOrCreate<Deployment>>> = stream::iter(matching)
        .map(|run| async move { record_workflow_run(ctx.store.as_ref(), repository, &run).await })
        .buffer_unordered(ctx.concurrency.max(1))
        .collect()
        .await;

    for outcome in outcomes {
        match outcome {
            Step::Done(FindOrCreate::Created(_)) => scan.created += 1,
            Step::Done(FindOrCreate::Existing(_)) => scan.existing += 1,
            Step::Skipped(_) => scan.unmatched += 1,
            Step::Failed(e) => {
                tracing::warn!(error = %e, "failed to record workflow deployment");
                scan.failed += 1;
            }
        }
    }

    tracing::info!(
        repository = %repository.full_name(),
        created = scan.created,
        existing = scan.existing,
        unmatched = scan.unmatched,
        "workflow runs scanned"
    );
    Ok(scan)
}

fn is_completed(run: &WorkflowRun) -> bool {
    run.status.as_deref().is_none_or(|s| s == "completed")
}

/// Deployment name for a workflow run. Shared by scans and webhooks so both
/// channels converge on one row.
pub fn workflow_deployment_name(run_name: Option<&str>, workflow_name: Option<&str>) -> String {
    run_name
        .or(workflow_name)
        .unwrap_or("workflow")
        .to_string()
}

/// Find-or-create the `dev` deployment for a run. A head commit missing from
/// the ledger is `Skipped`.
pub async fn record_workflow_run(
    store: &dyn LedgerStore,
    repository: &Repository,
    run: &WorkflowRun,
) -> Step<FindOrCreate<Deployment>> {
    let commit = match store.find_commit(repository.id, &run.head_sha).await {
        Ok(Some(commit)) => commit,
        Ok(None) => return Step::Skipped(format!("commit {} not found", run.head_sha)),
        Err(e) => return Step::Failed(e),
    };

    let key = DeploymentKey {
        repository_id: repository.id,
        commit_id: commit.id,
        environment: Environment::Dev,
        name: workflow_deployment_name(run.name.as_deref(), None),
    };
    let attrs = DeploymentAttrs {
        status: run.conclusion.clone().unwrap_or_else(|| "unknown".to_string()),
        started_at: Some(run.created_at),
        finished_at: Some(run.updated_at),
    };
    record_deployment(store, key, attrs).await.into()
}

/// Create a commit unless stored and count the outcome by `source`.
pub async fn record_commit(
    store: &dyn LedgerStore,
    new: NewCommit,
    source: &'static str,
) -> Result<FindOrCreate<Commit>> {
    let result = store.create_commit(new).await?;
    metrics::commits_recorded().add(
        1,
        &[
            KeyValue::new("source", source),
            KeyValue::new("result", result.label()),
        ],
    );
    Ok(result)
}

/// `uat` / `prod` scan of a release log document.
///
/// A document that cannot be read, is empty, or holds no parseable block
/// fails the job. Everything below block level is soft.
pub async fn run_release_scan(
    ctx: &Context,
    environment: Environment,
    doc_id: &str,
    progress: &dyn ProgressSink,
) -> Result<ReleaseScanReport> {
    if environment == Environment::Dev {
        return Err(Error::Validation(
            "release logs are scanned for uat or prod only".to_string(),
        ));
    }

    let blocks = ctx
        .docs
        .read_blocks(doc_id)
        .await
        .map_err(|e| Error::Upstream(format!("failed to read document {doc_id}: {e}")))?;
    if blocks.is_empty() {
        return Err(Error::Upstream(format!("document {doc_id} is empty")));
    }
    progress.report(10).await;

    let mut report = ReleaseScanReport::default();
    let mut parsed: Vec<VersionBlock> = Vec::new();
    for block in &blocks {
        match parse_version_block(block) {
            Step::Done(v) => parsed.push(v),
            Step::Skipped(reason) => {
                tracing::warn!(%reason, "skipping release log block");
                report.blocks_skipped += 1;
            }
            Step::Failed(e) => {
                tracing::warn!(error = %e, "skipping release log block");
                report.blocks_skipped += 1;
            }
        }
    }
    report.blocks = parsed.len();
    if parsed.is_empty() {
        return Err(Error::Parse(format!(
            "document {doc_id} has no parseable version block"
        )));
    }
    progress.report(50).await;

    let mut releases = Vec::new();
    for block in &parsed {
        let (refs, rejected) = block.release_refs();
        for line in rejected {
            tracing::warn!(version = %block.version, line = %line, "not a release reference");
            report.references_rejected += 1;
        }
        releases.extend(
            refs.into_iter()
                .map(|r| (block.version.clone(), block.timestamp, r)),
        );
    }

    let outcomes: Vec<Step<ReleaseReport>> = stream::iter(releases)
        .map(|(version, timestamp, release)| async move {
            correlate_reference(ctx, environment, version, timestamp, &release).await
        })
        .buffer_unordered(ctx.concurrency.max(1))
        .collect()
        .await;

    for outcome in outcomes {
        match outcome {
            Step::Done(r) => {
                report.releases_correlated += 1;
                report.deployments_created += r.created;
                report.deployments_existing += r.existing;
            }
            Step::Skipped(_) => report.releases_skipped += 1,
            Step::Failed(_) => report.releases_failed += 1,
        }
    }
    progress.report(100).await;

    tracing::info!(
        environment = %environment,
        releases = report.releases_correlated,
        created = report.deployments_created,
        skipped = report.releases_skipped,
        failed = report.releases_failed,
        "release log scanned"
    );
    Ok(report)
}

async fn correlate_reference(
    ctx: &Context,
    environment: Environment,
    version: String,
    timestamp: DateTime<Utc>,
    release: &ReleaseRef,
) -> Step<ReleaseReport> {
    let repository = match ctx.store.find_repository(&release.owner, &release.repo).await {
        Ok(Some(repository)) => repository,
        Ok(None) => {
            tracing::warn!(release = %release, "repository not tracked, skipping release");
            return Step::Skipped(format!("repository {}/{} not tracked", release.owner, release.repo));
        }
        Err(e) => {
            tracing::warn!(release = %release, error = %e, "repository lookup failed");
            return Step::Failed(e);
        }
    };

    let request = ReleaseRequest {
        repository,
        tag: release.tag.clone(),
        environment,
        version,
        timestamp,
    };
    let step = correlate_release(ctx, &request).await;
    if let Step::Failed(e) = &step {
        tracing::warn!(release = %release, error = %e, "release correlation failed");
    }
    step
}
