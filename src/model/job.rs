//! Scan job types.
//!
//! A job is one execution of the scan orchestrator, submitted to the `scans`
//! queue and tracked with coarse progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Environment;
use crate::error::Error;

/// Newtype for job IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a job scans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobSpec {
    /// Repository backfill plus workflow-run correlation, `repo_ref` = `owner/name`.
    Dev { repo_ref: String },
    /// Release log document for UAT.
    Uat { doc_id: String },
    /// Release log document for production.
    Prod { doc_id: String },
}

impl JobSpec {
    pub fn environment(&self) -> Environment {
        match self {
            JobSpec::Dev { .. } => Environment::Dev,
            JobSpec::Uat { .. } => Environment::Uat,
            JobSpec::Prod { .. } => Environment::Prod,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.environment().as_str()
    }

    /// Build a document scan spec for `uat` or `prod`.
    pub fn release_log(environment: Environment, doc_id: impl Into<String>) -> Option<Self> {
        match environment {
            Environment::Uat => Some(JobSpec::Uat {
                doc_id: doc_id.into(),
            }),
            Environment::Prod => Some(JobSpec::Prod {
                doc_id: doc_id.into(),
            }),
            Environment::Dev => None,
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Submitted, waiting for the control plane.
    Queued,
    /// Picked up and running.
    Active,
    /// Finished. Terminal.
    Completed,
    /// Aborted with a reason. Terminal.
    Failed,
}

impl JobState {
    pub fn can_transition_to(self, to: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, to),
            (Queued, Active) | (Active, Completed) | (Active, Failed) | (Active, Queued)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Queued => "queued",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(Error::Parse(format!("unknown job state: {other}"))),
        }
    }
}

/// A scan job as tracked by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: JobId,
    pub spec: JobSpec,
    pub state: JobState,
    /// 0–100.
    pub progress: u8,
    pub failed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
