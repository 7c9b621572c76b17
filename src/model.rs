//! Core data model.
//!
//! A repository owns the commits observed on its default branch; a deployment
//! pins one of those commits to an environment under a human-readable name.
//! (repository, commit, environment, name) identifies a deployment.

pub mod job;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                // Short display: first 8 chars of UUID
                write!(f, "{}", &self.0.to_string()[..8])
            }
        }
    };
}

id_newtype!(
    /// Newtype for repository row IDs.
    RepositoryId
);
id_newtype!(
    /// Newtype for commit row IDs.
    CommitId
);
id_newtype!(
    /// Newtype for deployment row IDs.
    DeploymentId
);

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Deployment target tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Dev,
    Uat,
    Prod,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Uat => "uat",
            Environment::Prod => "prod",
        }
    }

    /// Release name for a document-declared version, e.g. `PROD/v1.2.3`.
    pub fn release_name(self, version: &str) -> String {
        format!("{}/{version}", self.as_str().to_uppercase())
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "uat" => Ok(Environment::Uat),
            "prod" => Ok(Environment::Prod),
            other => Err(Error::Parse(format!("unknown environment: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// A tracked source repository. (owner, name) is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepositoryId,
    /// Provider-side numeric id, when known.
    pub external_id: Option<i64>,
    pub owner: String,
    pub name: String,
    pub private: bool,
    pub default_branch: String,
    /// Lower bound for the next incremental commit backfill.
    pub last_scanned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Repository {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone)]
pub struct NewRepository {
    pub external_id: Option<i64>,
    pub owner: String,
    pub name: String,
    pub private: bool,
    pub default_branch: String,
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// A commit observed on a repository's default branch. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub repository_id: RepositoryId,
    pub sha: String,
    pub author: Option<String>,
    pub message: Option<String>,
    pub committed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCommit {
    pub repository_id: RepositoryId,
    pub sha: String,
    pub author: Option<String>,
    pub message: Option<String>,
    pub committed_at: DateTime<Utc>,
}

/// Whether `sha` looks like a full 40-hex commit id.
pub fn is_full_sha(sha: &str) -> bool {
    sha.len() == 40 && sha.bytes().all(|b| b.is_ascii_hexdigit())
}

// ---------------------------------------------------------------------------
// Deployment
// ---------------------------------------------------------------------------

/// A commit reaching an environment under a named run or release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub repository_id: RepositoryId,
    pub commit_id: CommitId,
    pub environment: Environment,
    pub name: String,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Uniqueness key of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeploymentKey {
    pub repository_id: RepositoryId,
    pub commit_id: CommitId,
    pub environment: Environment,
    pub name: String,
}

/// Attributes written only when the deployment is first created.
#[derive(Debug, Clone)]
pub struct DeploymentAttrs {
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Find-or-create result
// ---------------------------------------------------------------------------

/// Result of an idempotent insert.
#[derive(Debug, Clone, PartialEq)]
pub enum FindOrCreate<T> {
    /// No row existed; this call inserted it.
    Created(T),
    /// A row with the same key was already stored; it is returned untouched.
    Existing(T),
}

impl<T> FindOrCreate<T> {
    pub fn is_created(&self) -> bool {
        matches!(self, FindOrCreate::Created(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            FindOrCreate::Created(v) | FindOrCreate::Existing(v) => v,
        }
    }

    pub fn get(&self) -> &T {
        match self {
            FindOrCreate::Created(v) | FindOrCreate::Existing(v) => v,
        }
    }

    /// Metric label for this outcome.
    pub fn label(&self) -> &'static str {
        match self {
            FindOrCreate::Created(_) => "created",
            FindOrCreate::Existing(_) => "existing",
        }
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// Outcome of one soft-failing step (a parsed block, a release, a commit).
///
/// Callers decide how to aggregate; nothing is decided by logging alone.
#[derive(Debug)]
pub enum Step<T> {
    Done(T),
    Skipped(String),
    Failed(Error),
}

impl<T> Step<T> {
    pub fn done(self) -> Option<T> {
        match self {
            Step::Done(v) => Some(v),
            _ => None,
        }
    }
}

impl<T> From<crate::error::Result<T>> for Step<T> {
    fn from(r: crate::error::Result<T>) -> Self {
        match r {
            Ok(v) => Step::Done(v),
            Err(e) => Step::Failed(e),
        }
    }
}
