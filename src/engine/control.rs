//! Control plane: listens for scan jobs, runs them, records their outcome.

use crate::context::Context;
use crate::db::jobs::JobProgress;
use crate::db::pgmq::PgmqMessage;
use crate::db::{Db, SCAN_QUEUE, SCAN_READY_CHANNEL};
use crate::error::{Error, Result};
use crate::model::job::{JobState, ScanJob};
use crate::scan::run_job;
use crate::telemetry::job::{record_state_transition, start_job_span};
use crate::telemetry::metrics;
use chrono::Utc;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{Instrument, error, info, warn};

/// Configuration for the control plane.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Visibility timeout (seconds) for pgmq reads. An active job whose row
    /// has not been touched for this long is treated as abandoned.
    pub visibility_timeout: i32,
    /// Poll interval fallback when no NOTIFY arrives.
    pub poll_interval: Duration,
    /// Maximum jobs running at once.
    pub max_concurrent: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: 900,
            poll_interval: Duration::from_secs(5),
            max_concurrent: 4,
        }
    }
}

/// The control plane loop: listen for jobs, execute, retire.
#[derive(Clone)]
pub struct ControlPlane {
    db: Arc<Db>,
    ctx: Context,
    config: ControlConfig,
    shutdown: Arc<Notify>,
    active_jobs: Arc<AtomicUsize>,
}

impl ControlPlane {
    pub fn new(db: Arc<Db>, ctx: Context, config: ControlConfig) -> Self {
        Self {
            db,
            ctx,
            config,
            shutdown: Arc::new(Notify::new()),
            active_jobs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Signal the control plane to shut down.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Number of jobs currently executing.
    pub fn active_jobs(&self) -> usize {
        self.active_jobs.load(Ordering::Relaxed)
    }

    /// Run the control plane loop until shutdown.
    pub async fn run(&self) -> Result<()> {
        let mut listener = sqlx::postgres::PgListener::connect_with(self.db.pool()).await?;
        listener.listen(SCAN_READY_CHANNEL).await?;

        info!(
            max_concurrent = self.config.max_concurrent,
            "control plane started, listening for scan jobs"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("control plane shutting down");
                    return Ok(());
                }
                notif = listener.recv() => {
                    match notif {
                        Ok(n) => info!(kind = n.payload(), "notified of new job"),
                        Err(e) => warn!("PgListener error: {e}, falling back to poll"),
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            // Notified or polling, drain what capacity allows.
            self.drain().await;
        }
    }

    /// Claim jobs until the queue is empty or capacity is reached.
    async fn drain(&self) {
        while self.active_jobs() < self.config.max_concurrent {
            match self.claim_next().await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    error!("claim error: {e}");
                    break;
                }
            }
        }
    }

    /// Read one message and start its job. Returns false when the queue is empty.
    async fn claim_next(&self) -> Result<bool> {
        let Some(msg) = self
            .db
            .read_from_queue(SCAN_QUEUE, self.config.visibility_timeout)
            .await?
        else {
            return Ok(false);
        };

        let Some(job_id) = msg.job_id() else {
            warn!(msg_id = msg.msg_id, "bad pgmq payload: missing job_id, dropping");
            self.db.delete_message(SCAN_QUEUE, msg.msg_id).await?;
            return Ok(true);
        };

        let job = match self.db.get_job(job_id).await {
            Ok(job) => job,
            Err(Error::NotFound(_)) => {
                warn!(%job_id, "message for unknown job, dropping");
                self.db.delete_message(SCAN_QUEUE, msg.msg_id).await?;
                return Ok(true);
            }
            Err(e) => return Err(e),
        };

        let span = start_job_span(job.spec.kind(), &job_id.0);
        let Some(job) = self.activate(job, &msg, &span).await? else {
            return Ok(true);
        };

        self.active_jobs.fetch_add(1, Ordering::Relaxed);
        let this = self.clone();
        let msg_id = msg.msg_id;
        tokio::spawn(
            async move {
                this.execute(job, msg_id).await;
                this.active_jobs.fetch_sub(1, Ordering::Relaxed);
            }
            .instrument(span),
        );
        Ok(true)
    }

    /// Move a claimed job to `active`, or decide it must not run now.
    async fn activate(
        &self,
        job: ScanJob,
        msg: &PgmqMessage,
        span: &tracing::Span,
    ) -> Result<Option<ScanJob>> {
        match job.state {
            JobState::Completed | JobState::Failed => {
                self.db.archive_message(SCAN_QUEUE, msg.msg_id).await?;
                Ok(None)
            }
            JobState::Active => {
                let idle = Utc::now() - job.updated_at;
                if idle.num_seconds() < i64::from(self.config.visibility_timeout) {
                    // Still running elsewhere; the message reappears later.
                    return Ok(None);
                }
                warn!(job_id = %job.id, "requeueing abandoned job");
                record_state_transition(span, "active", "queued");
                self.db
                    .transition_job(job.id, JobState::Active, JobState::Queued)
                    .await?;
                self.start(job.id, span).await
            }
            JobState::Queued => self.start(job.id, span).await,
        }
    }

    async fn start(
        &self,
        id: crate::model::job::JobId,
        span: &tracing::Span,
    ) -> Result<Option<ScanJob>> {
        match self
            .db
            .transition_job(id, JobState::Queued, JobState::Active)
            .await
        {
            Ok(job) => {
                record_state_transition(span, "queued", "active");
                Ok(Some(job))
            }
            // Another control plane claimed it first.
            Err(Error::InvalidTransition { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Run the job and retire it. Errors are recorded on the job row.
    async fn execute(&self, job: ScanJob, msg_id: i64) {
        let started = Instant::now();
        let span = tracing::Span::current();
        let progress = JobProgress::new(Arc::clone(&self.db), job.id);

        let result = run_job(&self.ctx, &job.spec, &progress).await;
        let duration_ms = started.elapsed().as_millis() as f64;

        let retired = match result {
            Ok(report) => {
                record_state_transition(&span, "active", "completed");
                info!(
                    job_id = %job.id,
                    duration_ms,
                    report = %serde_json::to_string(&report).unwrap_or_default(),
                    "job completed"
                );
                self.db.complete_job(job.id).await.map(|_| "completed")
            }
            Err(e) => {
                record_state_transition(&span, "active", "failed");
                error!(job_id = %job.id, duration_ms, error = %e, "job failed");
                self.db.fail_job(job.id, &e.to_string()).await.map(|_| "failed")
            }
        };

        match retired {
            Ok(state) => {
                metrics::job_duration_ms().record(
                    duration_ms,
                    &[
                        KeyValue::new("kind", job.spec.kind()),
                        KeyValue::new("state", state),
                    ],
                );
                if let Err(e) = self.db.archive_message(SCAN_QUEUE, msg_id).await {
                    warn!(job_id = %job.id, "archive error: {e}");
                }
            }
            Err(e) => error!(job_id = %job.id, "failed to retire job: {e}"),
        }
    }
}
