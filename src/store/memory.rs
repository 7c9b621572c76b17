//! In-memory ledger store for testing.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::model::*;

use super::LedgerStore;

#[derive(Debug, Default)]
struct Tables {
    repositories: HashMap<RepositoryId, Repository>,
    commits: HashMap<(RepositoryId, String), Commit>,
    deployments: HashMap<DeploymentKey, Deployment>,
}

/// In-memory ledger store.
///
/// All writes take one lock, which makes find-or-create atomic the same way
/// the unique indexes do in Postgres. Deleting a repository cascades.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| Error::Other("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| Error::Other("lock poisoned".to_string()))
    }

    /// Total deployments across all repositories.
    pub fn deployment_count(&self) -> usize {
        self.read().map(|t| t.deployments.len()).unwrap_or(0)
    }

    /// Total commits across all repositories.
    pub fn commit_count(&self) -> usize {
        self.read().map(|t| t.commits.len()).unwrap_or(0)
    }

    /// Total repositories.
    pub fn repository_count(&self) -> usize {
        self.read().map(|t| t.repositories.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn find_repository(&self, owner: &str, name: &str) -> Result<Option<Repository>> {
        let tables = self.read()?;
        Ok(tables
            .repositories
            .values()
            .find(|r| r.owner == owner && r.name == name)
            .cloned())
    }

    async fn create_repository(&self, new: NewRepository) -> Result<Repository> {
        let mut tables = self.write()?;
        if tables
            .repositories
            .values()
            .any(|r| r.owner == new.owner && r.name == new.name)
        {
            return Err(Error::Conflict(format!(
                "repository {}/{}",
                new.owner, new.name
            )));
        }

        let repository = Repository {
            id: RepositoryId::new(),
            external_id: new.external_id,
            owner: new.owner,
            name: new.name,
            private: new.private,
            default_branch: new.default_branch,
            last_scanned_at: None,
            created_at: Utc::now(),
        };
        tables
            .repositories
            .insert(repository.id, repository.clone());
        Ok(repository)
    }

    async fn mark_scanned(&self, id: RepositoryId, at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.write()?;
        let repository = tables
            .repositories
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("repository {id}")))?;
        repository.last_scanned_at = Some(at);
        Ok(())
    }

    async fn delete_repository(&self, id: RepositoryId) -> Result<()> {
        let mut tables = self.write()?;
        tables.repositories.remove(&id);
        tables.commits.retain(|(repo, _), _| *repo != id);
        tables.deployments.retain(|key, _| key.repository_id != id);
        Ok(())
    }

    async fn find_commit(&self, repository_id: RepositoryId, sha: &str) -> Result<Option<Commit>> {
        let tables = self.read()?;
        Ok(tables
            .commits
            .get(&(repository_id, sha.to_string()))
            .cloned())
    }

    async fn create_commit(&self, new: NewCommit) -> Result<FindOrCreate<Commit>> {
        let mut tables = self.write()?;
        if !tables.repositories.contains_key(&new.repository_id) {
            return Err(Error::NotFound(format!("repository {}", new.repository_id)));
        }

        let key = (new.repository_id, new.sha.clone());
        if let Some(existing) = tables.commits.get(&key) {
            return Ok(FindOrCreate::Existing(existing.clone()));
        }

        let commit = Commit {
            id: CommitId::new(),
            repository_id: new.repository_id,
            sha: new.sha,
            author: new.author,
            message: new.message,
            committed_at: new.committed_at,
        };
        tables.commits.insert(key, commit.clone());
        Ok(FindOrCreate::Created(commit))
    }

    async fn find_or_create_deployment(
        &self,
        key: DeploymentKey,
        attrs: DeploymentAttrs,
    ) -> Result<FindOrCreate<Deployment>> {
        let mut tables = self.write()?;
        if let Some(existing) = tables.deployments.get(&key) {
            return Ok(FindOrCreate::Existing(existing.clone()));
        }
        if !tables
            .commits
            .values()
            .any(|c| c.id == key.commit_id && c.repository_id == key.repository_id)
        {
            return Err(Error::NotFound(format!("commit {}", key.commit_id)));
        }

        let deployment = Deployment {
            id: DeploymentId::new(),
            repository_id: key.repository_id,
            commit_id: key.commit_id,
            environment: key.environment,
            name: key.name.clone(),
            status: attrs.status,
            started_at: attrs.started_at,
            finished_at: attrs.finished_at,
            created_at: Utc::now(),
        };
        tables.deployments.insert(key, deployment.clone());
        Ok(FindOrCreate::Created(deployment))
    }

    async fn list_commits(&self, repository_id: RepositoryId) -> Result<Vec<Commit>> {
        let tables = self.read()?;
        let mut commits: Vec<_> = tables
            .commits
            .values()
            .filter(|c| c.repository_id == repository_id)
            .cloned()
            .collect();
        commits.sort_by(|a, b| b.committed_at.cmp(&a.committed_at));
        Ok(commits)
    }

    async fn list_deployments(
        &self,
        repository_id: RepositoryId,
        environment: Option<Environment>,
    ) -> Result<Vec<Deployment>> {
        let tables = self.read()?;
        let mut deployments: Vec<_> = tables
            .deployments
            .values()
            .filter(|d| d.repository_id == repository_id)
            .filter(|d| environment.is_none_or(|env| d.environment == env))
            .cloned()
            .collect();
        deployments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(deployments)
    }
}
