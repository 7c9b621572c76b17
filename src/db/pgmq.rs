//! pgmq queue operations via direct SQLx.
//!
//! Calls pgmq's SQL functions: pgmq.create, pgmq.send, pgmq.read,
//! pgmq.archive, pgmq.delete. Scan jobs travel on [`super::SCAN_QUEUE`]
//! as `{"job_id": ...}` payloads.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use sqlx::PgExecutor;

use crate::error::Result;
use crate::model::job::JobId;
use crate::telemetry::metrics;

/// A message read from a pgmq queue.
#[derive(Debug, Clone)]
pub struct PgmqMessage {
    pub msg_id: i64,
    pub read_ct: i32,
    pub enqueued_at: DateTime<Utc>,
    pub vt: DateTime<Utc>,
    pub message: serde_json::Value,
}

impl PgmqMessage {
    /// The job id carried by a scan queue message, if well-formed.
    pub fn job_id(&self) -> Option<JobId> {
        self.message
            .get("job_id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .map(JobId)
    }
}

/// Payload for a scan queue message.
pub(crate) fn job_payload(id: JobId) -> serde_json::Value {
    serde_json::json!({ "job_id": id.0 })
}

fn record(queue_name: &str, operation: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("queue", queue_name.to_string()),
            KeyValue::new("operation", operation),
        ],
    );
}

/// Send on any executor, so job submission can enqueue inside its transaction.
pub(crate) async fn send<'e>(
    executor: impl PgExecutor<'e>,
    queue_name: &str,
    payload: &serde_json::Value,
) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, 0)")
        .bind(queue_name)
        .bind(payload)
        .fetch_one(executor)
        .await?;
    record(queue_name, "send");
    Ok(row.0)
}

impl super::Db {
    /// Create a pgmq queue (idempotent).
    pub async fn create_queue(&self, queue_name: &str) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await?;
        record(queue_name, "create");
        Ok(())
    }

    /// Send a message to a pgmq queue. Returns the message ID.
    pub async fn send_to_queue(&self, queue_name: &str, payload: &serde_json::Value) -> Result<i64> {
        send(&self.pool, queue_name, payload).await
    }

    /// Read the next message from a queue (visibility timeout in seconds).
    /// Returns None if the queue is empty.
    pub async fn read_from_queue(
        &self,
        queue_name: &str,
        vt_seconds: i32,
    ) -> Result<Option<PgmqMessage>> {
        let row: Option<(i64, i32, DateTime<Utc>, DateTime<Utc>, serde_json::Value)> =
            sqlx::query_as(
                "SELECT msg_id, read_ct, enqueued_at, vt, message FROM pgmq.read($1, $2, 1)",
            )
            .bind(queue_name)
            .bind(vt_seconds)
            .fetch_optional(&self.pool)
            .await?;

        let msg = row.map(|(msg_id, read_ct, enqueued_at, vt, message)| PgmqMessage {
            msg_id,
            read_ct,
            enqueued_at,
            vt,
            message,
        });
        record(queue_name, if msg.is_some() { "read" } else { "read_empty" });
        Ok(msg)
    }

    /// Archive a message (moves to the archive table).
    pub async fn archive_message(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(queue_name)
            .bind(msg_id)
            .execute(&self.pool)
            .await?;
        record(queue_name, "archive");
        Ok(())
    }

    /// Delete a message permanently.
    pub async fn delete_message(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.delete($1, $2)")
            .bind(queue_name)
            .bind(msg_id)
            .execute(&self.pool)
            .await?;
        record(queue_name, "delete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(payload: serde_json::Value) -> PgmqMessage {
        PgmqMessage {
            msg_id: 1,
            read_ct: 1,
            enqueued_at: Utc::now(),
            vt: Utc::now(),
            message: payload,
        }
    }

    #[test]
    fn job_payload_round_trips_through_message() {
        let id = JobId::new();
        assert_eq!(message(job_payload(id)).job_id(), Some(id));
    }

    #[test]
    fn malformed_payload_has_no_job_id() {
        assert_eq!(message(serde_json::json!({ "job_id": 7 })).job_id(), None);
        assert_eq!(message(serde_json::json!({})).job_id(), None);
    }
}
