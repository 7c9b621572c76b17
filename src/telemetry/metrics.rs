//! Metric instrument factories for shiplog-rs.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"shiplog-rs"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for shiplog-rs instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("shiplog-rs")
}

/// Counter: GitHub webhook deliveries.
/// Labels: `event`, `outcome` ("handled" | "ignored" | "rejected" | "error").
pub fn webhook_events() -> Counter<u64> {
    meter()
        .u64_counter("shiplog.webhook.events")
        .with_description("Number of GitHub webhook deliveries")
        .build()
}

/// Counter: commits written to the ledger.
/// Labels: `source` ("scan" | "webhook" | "release"), `result` ("created" | "existing").
pub fn commits_recorded() -> Counter<u64> {
    meter()
        .u64_counter("shiplog.commits.recorded")
        .with_description("Number of commits recorded")
        .build()
}

/// Counter: deployments written to the ledger.
/// Labels: `environment`, `result` ("created" | "existing").
pub fn deployments_recorded() -> Counter<u64> {
    meter()
        .u64_counter("shiplog.deployments.recorded")
        .with_description("Number of deployments recorded")
        .build()
}

/// Counter: release references or commits skipped during correlation.
/// Labels: `environment`, `reason`.
pub fn correlation_skips() -> Counter<u64> {
    meter()
        .u64_counter("shiplog.correlation.skips")
        .with_description("Release references or commits skipped during correlation")
        .build()
}

/// Counter: scan job state transitions.
/// Labels: `from`, `to`.
pub fn job_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("shiplog.job.state_transitions")
        .with_description("Number of scan job state transitions")
        .build()
}

/// Counter: queue-level operations (create, send, read, archive, delete).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("shiplog.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Histogram: scan job duration in milliseconds.
/// Labels: `kind`, `state`.
pub fn job_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("shiplog.job.duration_ms")
        .with_description("Scan job duration in milliseconds")
        .with_unit("ms")
        .build()
}
