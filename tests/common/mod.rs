//! Fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use shiplog_rs::context::Context;
use shiplog_rs::docs::DocumentSource;
use shiplog_rs::error::{Error, Result};
use shiplog_rs::github::{
    CommitSummary, Release, RepoMetadata, SourceControl, Tag, WorkflowRun,
};
use shiplog_rs::model::{Commit, NewCommit, NewRepository, Repository};
use shiplog_rs::store::{LedgerStore, MemoryStore};

/// Deterministic 40-hex sha for `n`.
pub fn sha(n: u32) -> String {
    format!("{n:040x}")
}

pub fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

pub fn summary(n: u32, committed_at: Option<DateTime<Utc>>) -> CommitSummary {
    CommitSummary {
        sha: sha(n),
        author: Some("octo".to_string()),
        message: Some(format!("commit {n}")),
        committed_at,
    }
}

pub fn run(id: i64, name: &str, head: u32, status: &str) -> WorkflowRun {
    WorkflowRun {
        id,
        name: Some(name.to_string()),
        head_sha: sha(head),
        head_branch: Some("main".to_string()),
        status: Some(status.to_string()),
        conclusion: (status == "completed").then(|| "success".to_string()),
        created_at: at(2024, 1, 5, 10, 0),
        updated_at: at(2024, 1, 5, 10, 7),
    }
}

/// Canned source-control answers. Tags and comparisons apply to every repository.
#[derive(Default)]
pub struct FakeScm {
    pub repositories: Vec<RepoMetadata>,
    /// Newest first.
    pub tags: Vec<Tag>,
    pub commits: Vec<CommitSummary>,
    pub runs: Vec<WorkflowRun>,
    /// Keyed by `(base, head)`.
    pub comparisons: HashMap<(String, String), Vec<CommitSummary>>,
    pub releases: HashMap<String, Release>,
    pub fail_tags: bool,
}

impl FakeScm {
    pub fn with_repository(mut self, owner: &str, name: &str) -> Self {
        self.repositories.push(RepoMetadata {
            id: self.repositories.len() as i64 + 1,
            owner: owner.to_string(),
            name: name.to_string(),
            private: false,
            default_branch: "main".to_string(),
        });
        self
    }

    pub fn with_tag(mut self, name: &str, commit: u32) -> Self {
        self.tags.push(Tag {
            name: name.to_string(),
            commit_sha: sha(commit),
        });
        self
    }

    pub fn with_comparison(mut self, base: u32, head: u32, commits: &[u32]) -> Self {
        self.comparisons.insert(
            (sha(base), sha(head)),
            commits.iter().map(|n| summary(*n, None)).collect(),
        );
        self
    }
}

#[async_trait]
impl SourceControl for FakeScm {
    async fn get_repository(&self, owner: &str, name: &str) -> Result<RepoMetadata> {
        self.repositories
            .iter()
            .find(|r| r.owner == owner && r.name == name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("repository {owner}/{name}")))
    }

    async fn list_tags(&self, _owner: &str, _name: &str) -> Result<Vec<Tag>> {
        if self.fail_tags {
            return Err(Error::Upstream("tags unavailable".to_string()));
        }
        Ok(self.tags.clone())
    }

    async fn list_commits(
        &self,
        _owner: &str,
        _name: &str,
        _branch: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CommitSummary>> {
        Ok(self
            .commits
            .iter()
            .filter(|c| match (since, c.committed_at) {
                (Some(since), Some(at)) => at > since,
                _ => true,
            })
            .cloned()
            .collect())
    }

    async fn list_workflow_runs(
        &self,
        _owner: &str,
        _name: &str,
        _branch: &str,
    ) -> Result<Vec<WorkflowRun>> {
        Ok(self.runs.clone())
    }

    async fn compare(
        &self,
        _owner: &str,
        _name: &str,
        base: &str,
        head: &str,
    ) -> Result<Vec<CommitSummary>> {
        self.comparisons
            .get(&(base.to_string(), head.to_string()))
            .cloned()
            .ok_or_else(|| Error::Upstream(format!("no comparison {base}...{head}")))
    }

    async fn get_release_by_tag(
        &self,
        _owner: &str,
        _name: &str,
        tag: &str,
    ) -> Result<Option<Release>> {
        Ok(self.releases.get(tag).cloned())
    }

    async fn list_org_repositories(&self, _org: &str) -> Result<Vec<RepoMetadata>> {
        Ok(self.repositories.clone())
    }
}

/// Document source returning fixed blocks, or failing when `None`.
pub struct FakeDocs(pub Option<Vec<String>>);

#[async_trait]
impl DocumentSource for FakeDocs {
    async fn read_blocks(&self, doc_id: &str) -> Result<Vec<String>> {
        self.0
            .clone()
            .ok_or_else(|| Error::Upstream(format!("document {doc_id} unavailable")))
    }
}

pub fn context(store: Arc<MemoryStore>, scm: FakeScm, docs: FakeDocs) -> Context {
    Context::new(store, Arc::new(scm), Arc::new(docs)).with_concurrency(4)
}

pub async fn track(store: &MemoryStore, owner: &str, name: &str) -> Repository {
    store
        .create_repository(NewRepository {
            external_id: None,
            owner: owner.to_string(),
            name: name.to_string(),
            private: false,
            default_branch: "main".to_string(),
        })
        .await
        .unwrap()
}

pub async fn commit(store: &MemoryStore, repository: &Repository, n: u32) -> Commit {
    store
        .create_commit(NewCommit {
            repository_id: repository.id,
            sha: sha(n),
            author: Some("octo".to_string()),
            message: Some(format!("commit {n}")),
            committed_at: at(2024, 1, 1, 9, 0),
        })
        .await
        .unwrap()
        .into_inner()
}
