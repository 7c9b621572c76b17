//! Ledger storage contract.
//!
//! The Postgres implementation lives on [`crate::db::Db`]; [`MemoryStore`]
//! backs tests. Every create is keyed by a uniqueness constraint so that
//! concurrent ingestion paths observing the same event converge on one row.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{
    Commit, Deployment, DeploymentAttrs, DeploymentKey, Environment, FindOrCreate, NewCommit,
    NewRepository, Repository, RepositoryId,
};

/// Backend for the repository / commit / deployment ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Look up a repository by `(owner, name)`.
    async fn find_repository(&self, owner: &str, name: &str) -> Result<Option<Repository>>;

    /// Insert a repository.
    ///
    /// Returns [`crate::error::Error::Conflict`] if `(owner, name)` already exists.
    async fn create_repository(&self, new: NewRepository) -> Result<Repository>;

    /// Record the time of the last successful commit backfill.
    async fn mark_scanned(&self, id: RepositoryId, at: DateTime<Utc>) -> Result<()>;

    /// Delete the repository row. Commits and deployments cascade.
    async fn delete_repository(&self, id: RepositoryId) -> Result<()>;

    /// Look up a commit by `(repository, sha)`.
    async fn find_commit(&self, repository_id: RepositoryId, sha: &str) -> Result<Option<Commit>>;

    /// Insert a commit unless `(repository, sha)` is already stored.
    ///
    /// An existing commit is returned as-is; commits are never updated.
    async fn create_commit(&self, new: NewCommit) -> Result<FindOrCreate<Commit>>;

    /// Atomically find the deployment for `key` or create it with `attrs`.
    async fn find_or_create_deployment(
        &self,
        key: DeploymentKey,
        attrs: DeploymentAttrs,
    ) -> Result<FindOrCreate<Deployment>>;

    /// Commits of a repository, newest first.
    async fn list_commits(&self, repository_id: RepositoryId) -> Result<Vec<Commit>>;

    /// Deployments of a repository, optionally restricted to one environment.
    async fn list_deployments(
        &self,
        repository_id: RepositoryId,
        environment: Option<Environment>,
    ) -> Result<Vec<Deployment>>;
}
