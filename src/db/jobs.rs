//! Scan job operations: submit, state tracking, progress.
//!
//! A job row is inserted, enqueued on pgmq and announced with NOTIFY in one
//! transaction; the control plane then drives it through
//! `queued → active → completed | failed`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use uuid::Uuid;

use super::{Db, SCAN_QUEUE, SCAN_READY_CHANNEL, pgmq};
use crate::error::{Error, Result};
use crate::model::job::*;
use crate::scan::ProgressSink;
use crate::telemetry::metrics;

const JOB_COLUMNS: &str =
    "id, params, state, progress, failed_reason, created_at, updated_at, finished_at";

/// Submission and lookup of scan jobs, as used by the HTTP surface.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Queue a scan job.
    async fn submit(&self, spec: JobSpec) -> Result<ScanJob>;

    /// Look up a job; `NotFound` if unknown.
    async fn get(&self, id: JobId) -> Result<ScanJob>;
}

/// Validate a state transition, returning an error if disallowed.
fn validate_transition(from: JobState, to: JobState) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

impl Db {
    /// Insert a job, enqueue it and notify listeners.
    pub async fn submit_job(&self, spec: JobSpec) -> Result<ScanJob> {
        let id = JobId::new();
        let params = serde_json::to_value(&spec)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO scan_jobs (id, kind, params, state, progress, created_at, updated_at)
             VALUES ($1, $2, $3, 'queued', 0, now(), now())",
        )
        .bind(id.0)
        .bind(spec.kind())
        .bind(&params)
        .execute(&mut *tx)
        .await?;

        let msg_id = pgmq::send(&mut *tx, SCAN_QUEUE, &pgmq::job_payload(id)).await?;

        sqlx::query("UPDATE scan_jobs SET pgmq_msg_id = $1 WHERE id = $2")
            .bind(msg_id)
            .bind(id.0)
            .execute(&mut *tx)
            .await?;

        // NOTIFY is transactional, it only fires on commit.
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(SCAN_READY_CHANNEL)
            .bind(spec.kind())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(job_id = %id, kind = spec.kind(), "job queued");

        self.get_job(id).await
    }

    /// Get a job by ID.
    pub async fn get_job(&self, id: JobId) -> Result<ScanJob> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM scan_jobs WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.ok_or_else(|| Error::NotFound(format!("job {id}")))?
            .try_into()
    }

    /// Most recent jobs first, optionally filtered by state.
    pub async fn list_jobs(&self, state: Option<JobState>, limit: i64) -> Result<Vec<ScanJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM scan_jobs
             WHERE ($1::text IS NULL OR state = $1)
             ORDER BY created_at DESC
             LIMIT $2"
        ))
        .bind(state.map(|s| s.to_string()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ScanJob::try_from).collect()
    }

    /// Transition a job's state with optimistic concurrency.
    pub async fn transition_job(&self, id: JobId, from: JobState, to: JobState) -> Result<ScanJob> {
        validate_transition(from, to)?;

        let finished_at = to.is_terminal().then(Utc::now);
        let rows_affected = sqlx::query(
            "UPDATE scan_jobs SET state = $1, updated_at = now(), finished_at = COALESCE($2, finished_at)
             WHERE id = $3 AND state = $4",
        )
        .bind(to.to_string())
        .bind(finished_at)
        .bind(id.0)
        .bind(from.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        record_transition(from, to);
        self.get_job(id).await
    }

    /// Record coarse progress (0-100) on an active job.
    pub async fn set_job_progress(&self, id: JobId, percent: u8) -> Result<()> {
        sqlx::query(
            "UPDATE scan_jobs SET progress = $1, updated_at = now() WHERE id = $2 AND state = 'active'",
        )
        .bind(i32::from(percent.min(100)))
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Active → Completed, progress pinned to 100.
    pub async fn complete_job(&self, id: JobId) -> Result<ScanJob> {
        let rows_affected = sqlx::query(
            "UPDATE scan_jobs SET state = 'completed', progress = 100, updated_at = now(), finished_at = now()
             WHERE id = $1 AND state = 'active'",
        )
        .bind(id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::InvalidTransition {
                from: "active".to_string(),
                to: "completed".to_string(),
            });
        }

        record_transition(JobState::Active, JobState::Completed);
        self.get_job(id).await
    }

    /// Active → Failed with a reason.
    pub async fn fail_job(&self, id: JobId, reason: &str) -> Result<ScanJob> {
        let rows_affected = sqlx::query(
            "UPDATE scan_jobs SET state = 'failed', failed_reason = $1, updated_at = now(), finished_at = now()
             WHERE id = $2 AND state = 'active'",
        )
        .bind(reason)
        .bind(id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::InvalidTransition {
                from: "active".to_string(),
                to: "failed".to_string(),
            });
        }

        record_transition(JobState::Active, JobState::Failed);
        self.get_job(id).await
    }
}

fn record_transition(from: JobState, to: JobState) {
    metrics::job_state_transitions().add(
        1,
        &[
            KeyValue::new("from", from.to_string()),
            KeyValue::new("to", to.to_string()),
        ],
    );
}

#[async_trait]
impl JobQueue for Db {
    async fn submit(&self, spec: JobSpec) -> Result<ScanJob> {
        self.submit_job(spec).await
    }

    async fn get(&self, id: JobId) -> Result<ScanJob> {
        self.get_job(id).await
    }
}

/// Writes job progress to the `scan_jobs` row.
pub struct JobProgress {
    db: Arc<Db>,
    id: JobId,
}

impl JobProgress {
    pub fn new(db: Arc<Db>, id: JobId) -> Self {
        Self { db, id }
    }
}

#[async_trait]
impl ProgressSink for JobProgress {
    async fn report(&self, percent: u8) {
        if let Err(e) = self.db.set_job_progress(self.id, percent).await {
            tracing::warn!(job_id = %self.id, error = %e, "failed to record progress");
        }
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    params: serde_json::Value,
    state: String,
    progress: i32,
    failed_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for ScanJob {
    type Error = Error;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(ScanJob {
            id: JobId(row.id),
            spec: serde_json::from_value(row.params)?,
            state: row.state.parse()?,
            progress: row.progress.clamp(0, 100) as u8,
            failed_reason: row.failed_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
            finished_at: row.finished_at,
        })
    }
}
