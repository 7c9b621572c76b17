mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::*;
use shiplog_rs::error::Error;
use shiplog_rs::model::Environment;
use shiplog_rs::model::job::JobSpec;
use shiplog_rs::scan::{JobReport, NoProgress, ProgressSink, run_dev_scan, run_job, run_release_scan};
use shiplog_rs::store::{LedgerStore, MemoryStore};

#[derive(Default)]
struct RecordedProgress(Mutex<Vec<u8>>);

#[async_trait]
impl ProgressSink for RecordedProgress {
    async fn report(&self, percent: u8) {
        self.0.lock().unwrap().push(percent);
    }
}

fn dev_scm() -> FakeScm {
    let mut scm = FakeScm::default().with_repository("acme", "widget");
    scm.commits = vec![
        summary(1, Some(at(2024, 1, 4, 12, 0))),
        summary(2, Some(at(2024, 1, 4, 13, 0))),
        summary(3, None),
    ];
    scm.runs = vec![
        run(10, "Docker build", 1, "completed"),
        run(11, "Lint", 1, "completed"),
        run(12, "Docker build", 2, "in_progress"),
        run(13, "Docker build", 99, "completed"),
    ];
    scm
}

#[tokio::test]
async fn dev_scan_tracks_repository_commits_and_workflow_deployments() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(Arc::clone(&store), dev_scm(), FakeDocs(None));
    let progress = RecordedProgress::default();

    let report = run_dev_scan(&ctx, "https://github.com/acme/widget.git", &progress)
        .await
        .unwrap();

    assert_eq!(report.repository, "acme/widget");
    let commits = report.commits.expect("commit scan ran");
    assert_eq!(commits.created, 2);
    assert_eq!(commits.skipped, 1);
    let workflows = report.workflows.expect("workflow scan ran");
    assert_eq!(workflows.created, 1);
    assert_eq!(workflows.filtered, 2);
    assert_eq!(workflows.unmatched, 1);
    assert_eq!(*progress.0.lock().unwrap(), vec![50, 100]);

    let repo = store.find_repository("acme", "widget").await.unwrap().unwrap();
    assert!(repo.last_scanned_at.is_some());
    let deployments = store
        .list_deployments(repo.id, Some(Environment::Dev))
        .await
        .unwrap();
    assert_eq!(deployments.len(), 1);
    assert_eq!(deployments[0].name, "Docker build");
    assert_eq!(deployments[0].status, "success");
}

#[tokio::test]
async fn dev_rescan_is_incremental_and_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(Arc::clone(&store), dev_scm(), FakeDocs(None));

    run_dev_scan(&ctx, "acme/widget", &NoProgress).await.unwrap();
    let second = run_dev_scan(&ctx, "acme/widget", &NoProgress).await.unwrap();

    // Dated commits are older than the last scan and not listed again.
    let commits = second.commits.unwrap();
    assert_eq!(commits.created, 0);
    let workflows = second.workflows.unwrap();
    assert_eq!(workflows.created, 0);
    assert_eq!(workflows.existing, 1);

    assert_eq!(store.repository_count(), 1);
    assert_eq!(store.commit_count(), 2);
    assert_eq!(store.deployment_count(), 1);
}

#[tokio::test]
async fn dev_scan_skips_commits_with_malformed_sha() {
    let store = Arc::new(MemoryStore::new());
    let mut scm = dev_scm();
    let mut short = summary(4, Some(at(2024, 1, 4, 14, 0)));
    short.sha = "abc123".to_string();
    scm.commits.push(short);
    let ctx = context(Arc::clone(&store), scm, FakeDocs(None));

    let report = run_dev_scan(&ctx, "acme/widget", &NoProgress).await.unwrap();
    let commits = report.commits.unwrap();
    assert_eq!(commits.created, 2);
    assert_eq!(commits.skipped, 2);

    let repo = store.find_repository("acme", "widget").await.unwrap().unwrap();
    assert!(store.find_commit(repo.id, "abc123").await.unwrap().is_none());
}

#[tokio::test]
async fn dev_scan_without_filter_accepts_every_completed_run() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(Arc::clone(&store), dev_scm(), FakeDocs(None)).with_workflow_filter(None);

    let report = run_dev_scan(&ctx, "acme/widget", &NoProgress).await.unwrap();
    let workflows = report.workflows.unwrap();
    assert_eq!(workflows.created, 2);
    assert_eq!(workflows.filtered, 1);
}

#[tokio::test]
async fn dev_scan_of_unknown_repository_fails() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(Arc::clone(&store), FakeScm::default(), FakeDocs(None));

    let err = run_dev_scan(&ctx, "acme/ghost", &NoProgress)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(store.repository_count(), 0);
}

#[tokio::test]
async fn malformed_repo_ref_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(store, FakeScm::default(), FakeDocs(None));

    let err = run_dev_scan(&ctx, "not-a-repo", &NoProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
}

const RELEASE_LOG: &str = "v1.0.0 (14h50, 2024-01-05)\n\
Initial release\n\
Version\n\
https://github.com/acme/widget/releases/tag/v1.0.0\n\
github.com/acme/untracked/releases/tag/v1.0.0\n\
see the changelog";

#[tokio::test]
async fn release_scan_correlates_every_reference() {
    let store = Arc::new(MemoryStore::new());
    let repo = track(&store, "acme", "widget").await;
    commit(&store, &repo, 1).await;
    let docs = FakeDocs(Some(vec![
        RELEASE_LOG.to_string(),
        "meeting notes, no header".to_string(),
    ]));
    let ctx = context(
        Arc::clone(&store),
        FakeScm::default().with_tag("v1.0.0", 1),
        docs,
    );
    let progress = RecordedProgress::default();

    let report = run_release_scan(&ctx, Environment::Prod, "doc-1", &progress)
        .await
        .unwrap();

    assert_eq!(report.blocks, 1);
    assert_eq!(report.blocks_skipped, 1);
    assert_eq!(report.references_rejected, 1);
    assert_eq!(report.releases_correlated, 1);
    assert_eq!(report.releases_skipped, 1);
    assert_eq!(report.deployments_created, 1);
    assert_eq!(*progress.0.lock().unwrap(), vec![10, 50, 100]);

    let deployments = store.list_deployments(repo.id, None).await.unwrap();
    assert_eq!(deployments[0].name, "PROD/v1.0.0");
    assert_eq!(deployments[0].finished_at, Some(at(2024, 1, 5, 14, 50)));
}

#[tokio::test]
async fn release_scan_of_empty_document_fails() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(store, FakeScm::default(), FakeDocs(Some(Vec::new())));

    let err = run_release_scan(&ctx, Environment::Uat, "doc-1", &NoProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Upstream(_)), "got {err:?}");
}

#[tokio::test]
async fn release_scan_of_unreadable_document_fails() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(store, FakeScm::default(), FakeDocs(None));

    let err = run_release_scan(&ctx, Environment::Uat, "doc-1", &NoProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Upstream(_)), "got {err:?}");
}

#[tokio::test]
async fn release_scan_without_version_blocks_fails() {
    let store = Arc::new(MemoryStore::new());
    let docs = FakeDocs(Some(vec!["agenda".to_string(), "v1.0.0 (2024-01-05)\nno marker".to_string()]));
    let ctx = context(store, FakeScm::default(), docs);

    let err = run_release_scan(&ctx, Environment::Prod, "doc-1", &NoProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Parse(_)), "got {err:?}");
}

#[tokio::test]
async fn run_job_dispatches_on_spec() {
    let store = Arc::new(MemoryStore::new());
    let repo = track(&store, "acme", "widget").await;
    commit(&store, &repo, 1).await;
    let ctx = context(
        Arc::clone(&store),
        FakeScm::default().with_tag("v1.0.0", 1),
        FakeDocs(Some(vec![RELEASE_LOG.to_string()])),
    );

    let spec = JobSpec::Uat {
        doc_id: "doc-1".to_string(),
    };
    let report = run_job(&ctx, &spec, &NoProgress).await.unwrap();
    let JobReport::Release(report) = report else {
        panic!("expected a release report");
    };
    assert_eq!(report.deployments_created, 1);
    let deployments = store
        .list_deployments(repo.id, Some(Environment::Uat))
        .await
        .unwrap();
    assert_eq!(deployments[0].name, "UAT/v1.0.0");
}
