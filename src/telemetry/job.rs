//! Span helpers for scan jobs and release correlation.

use tracing::Span;
use uuid::Uuid;

/// Start a span for one scan job execution.
///
/// The `job.state` field is declared empty and can be updated via
/// [`record_state_transition`].
pub fn start_job_span(kind: &str, job_id: &Uuid) -> Span {
    tracing::info_span!(
        "job.execute",
        "job.kind" = kind,
        "job.id" = %job_id,
        "job.state" = tracing::field::Empty,
    )
}

/// Start a span for correlating one release reference.
pub fn start_release_span(environment: &str, repository: &str, tag: &str) -> Span {
    tracing::info_span!(
        "release.correlate",
        "release.environment" = environment,
        "release.repository" = repository,
        "release.tag" = tag,
    )
}

/// Record a state transition on the span and emit an event scoped to it.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("job.state", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
