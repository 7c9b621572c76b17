//! HTTP surface: health, GitHub webhooks, and scan job submission.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ReleaseDocs;
use crate::context::Context;
use crate::db::jobs::JobQueue;
use crate::error::Error;
use crate::model::Environment;
use crate::model::job::{JobId, JobSpec, JobState, ScanJob};
use crate::webhook;

/// Shared application state.
pub struct AppState {
    pub ctx: Context,
    pub webhook_secret: SecretString,
    /// `None` when the server runs without a job host.
    pub queue: Option<Arc<dyn JobQueue>>,
    /// Organisation scanned by `POST /v1/jobs/org`.
    pub github_org: Option<String>,
    pub release_docs: ReleaseDocs,
}

impl AppState {
    pub fn new(ctx: Context, webhook_secret: SecretString) -> Self {
        Self {
            ctx,
            webhook_secret,
            queue: None,
            github_org: None,
            release_docs: ReleaseDocs::default(),
        }
    }

    fn queue(&self) -> Result<&Arc<dyn JobQueue>, ApiError> {
        self.queue.as_ref().ok_or_else(|| {
            ApiError(
                StatusCode::SERVICE_UNAVAILABLE,
                "job queue is not configured".to_string(),
            )
        })
    }
}

/// Creates the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/v1/webhooks/github", post(github_webhook))
        .route("/v1/jobs", post(submit_job))
        .route("/v1/jobs/org", post(submit_org_jobs))
        .route("/v1/jobs/{id}", get(get_job))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorResponse { error: self.1 })).into_response()
    }
}

/// Job routes: unknown ids are 404, bad input 400.
impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) | Error::Parse(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %e, "request failed");
        }
        ApiError(status, e.to_string())
    }
}

/// Webhook status mapping: a missing repository or commit is a server-side
/// failure for the delivery, so GitHub records it as failed.
fn webhook_status(e: &Error) -> StatusCode {
    match e {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Signature => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        checked_at: Utc::now(),
    })
}

async fn github_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let event = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok());
    let signature = match headers.get("X-Hub-Signature-256").map(|v| v.to_str()) {
        None => None,
        Some(Ok(s)) => Some(s),
        Some(Err(_)) => {
            return ApiError(
                StatusCode::BAD_REQUEST,
                "invalid signature format".to_string(),
            )
            .into_response();
        }
    };

    let result = webhook::handle(
        &state.ctx,
        state.webhook_secret.expose_secret().as_bytes(),
        event,
        signature,
        &body,
    )
    .await;

    match result {
        Ok(outcome) => match outcome.message() {
            Some(message) => (
                outcome.status(),
                Json(MessageResponse {
                    message: message.to_string(),
                }),
            )
                .into_response(),
            None => outcome.status().into_response(),
        },
        Err(e) => {
            let status = webhook_status(&e);
            if status.is_server_error() {
                error!(event = event.unwrap_or("unknown"), error = %e, "webhook failed");
            } else {
                warn!(event = event.unwrap_or("unknown"), error = %e, "webhook rejected");
            }
            ApiError(status, e.to_string()).into_response()
        }
    }
}

async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = match request.kind {
        Environment::Dev => JobSpec::Dev {
            repo_ref: request
                .repo_ref
                .ok_or_else(|| Error::Validation("dev jobs need repo_ref".to_string()))?,
        },
        env => {
            let doc_id = request
                .doc_id
                .or_else(|| state.release_docs.doc_id_for(env).map(str::to_string))
                .ok_or_else(|| Error::Validation(format!("no document configured for {env}")))?;
            JobSpec::release_log(env, doc_id)
                .ok_or_else(|| Error::Validation(format!("{env} is not a release log")))?
        }
    };

    let job = state.queue()?.submit(spec).await?;
    info!(job_id = %job.id, kind = job.spec.kind(), "job submitted via API");
    Ok((StatusCode::ACCEPTED, Json(JobResponse::from(&job))))
}

async fn submit_org_jobs(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let org = state
        .github_org
        .as_deref()
        .ok_or_else(|| Error::Validation("GITHUB_ORG is not configured".to_string()))?;
    let queue = state.queue()?;

    let repositories = state.ctx.scm.list_org_repositories(org).await?;
    let mut jobs = Vec::with_capacity(repositories.len());
    for repository in repositories {
        let spec = JobSpec::Dev {
            repo_ref: format!("{}/{}", repository.owner, repository.name),
        };
        jobs.push(queue.submit(spec).await?.id.0);
    }

    info!(org, queued = jobs.len(), "organisation scan submitted");
    Ok((
        StatusCode::ACCEPTED,
        Json(OrgJobsResponse {
            queued: jobs.len(),
            jobs,
        }),
    ))
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| Error::Validation(format!("invalid job id: {id}")))?;
    let job = state.queue()?.get(JobId(id)).await?;
    Ok(Json(JobResponse::from(&job)))
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubmitJobRequest {
    kind: Environment,
    repo_ref: Option<String>,
    doc_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    checked_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct OrgJobsResponse {
    queued: usize,
    jobs: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
struct JobResponse {
    id: Uuid,
    kind: &'static str,
    state: JobState,
    progress: u8,
    finished_at: Option<DateTime<Utc>>,
    failed_reason: Option<String>,
}

impl From<&ScanJob> for JobResponse {
    fn from(job: &ScanJob) -> Self {
        Self {
            id: job.id.0,
            kind: job.spec.kind(),
            state: job.state,
            progress: job.progress,
            finished_at: job.finished_at,
            failed_reason: job.failed_reason.clone(),
        }
    }
}
