//! Error types for shiplog-rs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A repository, commit or job referenced by an event does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint rejected a create.
    #[error("already exists: {0}")]
    Conflict(String),

    /// Malformed inbound request (missing header, bad payload).
    #[error("invalid request: {0}")]
    Validation(String),

    /// Webhook signature did not match.
    #[error("signature mismatch")]
    Signature,

    /// Source-control or document API failure.
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True when the error means "the referenced entity is absent".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
