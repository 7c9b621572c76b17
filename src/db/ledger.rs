//! Ledger operations: repositories, commits and idempotent deployments.
//!
//! Uniqueness lives in the schema (see migrations). Each create is an
//! `INSERT .. ON CONFLICT DO NOTHING RETURNING`, and a miss reads the row
//! that won the race.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::*;
use crate::store::LedgerStore;

const REPOSITORY_COLUMNS: &str =
    "id, external_id, owner, name, private, default_branch, last_scanned_at, created_at";
const COMMIT_COLUMNS: &str = "id, repository_id, sha, author, message, committed_at";
const DEPLOYMENT_COLUMNS: &str =
    "id, repository_id, commit_id, environment, name, status, started_at, finished_at, created_at";

#[async_trait]
impl LedgerStore for super::Db {
    async fn find_repository(&self, owner: &str, name: &str) -> Result<Option<Repository>> {
        let row: Option<RepositoryRow> = sqlx::query_as(&format!(
            "SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE owner = $1 AND name = $2"
        ))
        .bind(owner)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn create_repository(&self, new: NewRepository) -> Result<Repository> {
        let row: Option<RepositoryRow> = sqlx::query_as(&format!(
            "INSERT INTO repositories (id, external_id, owner, name, private, default_branch, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, now())
             ON CONFLICT (owner, name) DO NOTHING
             RETURNING {REPOSITORY_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new.external_id)
        .bind(&new.owner)
        .bind(&new.name)
        .bind(new.private)
        .bind(&new.default_branch)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Into::into).ok_or_else(|| {
            Error::Conflict(format!("repository {}/{}", new.owner, new.name))
        })
    }

    async fn mark_scanned(&self, id: RepositoryId, at: DateTime<Utc>) -> Result<()> {
        let rows_affected = sqlx::query("UPDATE repositories SET last_scanned_at = $1 WHERE id = $2")
            .bind(at)
            .bind(id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows_affected == 0 {
            return Err(Error::NotFound(format!("repository {id}")));
        }
        Ok(())
    }

    async fn delete_repository(&self, id: RepositoryId) -> Result<()> {
        sqlx::query("DELETE FROM repositories WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_commit(&self, repository_id: RepositoryId, sha: &str) -> Result<Option<Commit>> {
        let row: Option<CommitRow> = sqlx::query_as(&format!(
            "SELECT {COMMIT_COLUMNS} FROM commits WHERE repository_id = $1 AND sha = $2"
        ))
        .bind(repository_id.0)
        .bind(sha)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn create_commit(&self, new: NewCommit) -> Result<FindOrCreate<Commit>> {
        let inserted: Option<CommitRow> = sqlx::query_as(&format!(
            "INSERT INTO commits (id, repository_id, sha, author, message, committed_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (repository_id, sha) DO NOTHING
             RETURNING {COMMIT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new.repository_id.0)
        .bind(&new.sha)
        .bind(&new.author)
        .bind(&new.message)
        .bind(new.committed_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| foreign_key_as_not_found(e, || format!("repository {}", new.repository_id)))?;

        if let Some(row) = inserted {
            return Ok(FindOrCreate::Created(row.into()));
        }

        // Conflict: the commit is already stored.
        let existing = self
            .find_commit(new.repository_id, &new.sha)
            .await?
            .ok_or_else(|| Error::Other(format!("commit {} vanished after conflict", new.sha)))?;
        Ok(FindOrCreate::Existing(existing))
    }

    async fn find_or_create_deployment(
        &self,
        key: DeploymentKey,
        attrs: DeploymentAttrs,
    ) -> Result<FindOrCreate<Deployment>> {
        // The unique index on (repository_id, commit_id, environment, name)
        // arbitrates concurrent writers; the loser reads the winner's row.
        let inserted: Option<DeploymentRow> = sqlx::query_as(&format!(
            "INSERT INTO deployments (id, repository_id, commit_id, environment, name, status, started_at, finished_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
             ON CONFLICT (repository_id, commit_id, environment, name) DO NOTHING
             RETURNING {DEPLOYMENT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(key.repository_id.0)
        .bind(key.commit_id.0)
        .bind(key.environment.as_str())
        .bind(&key.name)
        .bind(&attrs.status)
        .bind(attrs.started_at)
        .bind(attrs.finished_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| foreign_key_as_not_found(e, || format!("commit {}", key.commit_id)))?;

        match inserted {
            Some(row) => Ok(FindOrCreate::Created(Deployment::try_from(row)?)),
            None => {
                let row: DeploymentRow = sqlx::query_as(&format!(
                    "SELECT {DEPLOYMENT_COLUMNS} FROM deployments
                     WHERE repository_id = $1 AND commit_id = $2 AND environment = $3 AND name = $4"
                ))
                .bind(key.repository_id.0)
                .bind(key.commit_id.0)
                .bind(key.environment.as_str())
                .bind(&key.name)
                .fetch_one(&self.pool)
                .await?;
                Ok(FindOrCreate::Existing(Deployment::try_from(row)?))
            }
        }
    }

    async fn list_commits(&self, repository_id: RepositoryId) -> Result<Vec<Commit>> {
        let rows: Vec<CommitRow> = sqlx::query_as(&format!(
            "SELECT {COMMIT_COLUMNS} FROM commits WHERE repository_id = $1 ORDER BY committed_at DESC"
        ))
        .bind(repository_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_deployments(
        &self,
        repository_id: RepositoryId,
        environment: Option<Environment>,
    ) -> Result<Vec<Deployment>> {
        let rows: Vec<DeploymentRow> = sqlx::query_as(&format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM deployments
             WHERE repository_id = $1 AND ($2::text IS NULL OR environment = $2)
             ORDER BY created_at DESC"
        ))
        .bind(repository_id.0)
        .bind(environment.map(Environment::as_str))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Deployment::try_from).collect()
    }
}

/// Map a foreign-key violation to `NotFound`; the referenced row is gone.
fn foreign_key_as_not_found(e: sqlx::Error, what: impl FnOnce() -> String) -> Error {
    match &e {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => Error::NotFound(what()),
        _ => Error::Database(e),
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct RepositoryRow {
    id: Uuid,
    external_id: Option<i64>,
    owner: String,
    name: String,
    private: bool,
    default_branch: String,
    last_scanned_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<RepositoryRow> for Repository {
    fn from(row: RepositoryRow) -> Self {
        Self {
            id: RepositoryId(row.id),
            external_id: row.external_id,
            owner: row.owner,
            name: row.name,
            private: row.private,
            default_branch: row.default_branch,
            last_scanned_at: row.last_scanned_at,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CommitRow {
    id: Uuid,
    repository_id: Uuid,
    sha: String,
    author: Option<String>,
    message: Option<String>,
    committed_at: DateTime<Utc>,
}

impl From<CommitRow> for Commit {
    fn from(row: CommitRow) -> Self {
        Self {
            id: CommitId(row.id),
            repository_id: RepositoryId(row.repository_id),
            sha: row.sha,
            author: row.author,
            message: row.message,
            committed_at: row.committed_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DeploymentRow {
    id: Uuid,
    repository_id: Uuid,
    commit_id: Uuid,
    environment: String,
    name: String,
    status: String,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<DeploymentRow> for Deployment {
    type Error = Error;

    fn try_from(row: DeploymentRow) -> Result<Self> {
        Ok(Self {
            id: DeploymentId(row.id),
            repository_id: RepositoryId(row.repository_id),
            commit_id: CommitId(row.commit_id),
            environment: row.environment.parse()?,
            name: row.name,
            status: row.status,
            started_at: row.started_at,
            finished_at: row.finished_at,
            created_at: row.created_at,
        })
    }
}
