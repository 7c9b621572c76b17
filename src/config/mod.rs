//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

use crate::error::{Error, Result};
use crate::model::Environment;
use secrecy::SecretString;

const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_WORKFLOW_FILTER: &str = "docker";
const DEFAULT_SCAN_CONCURRENCY: usize = 8;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub github_token: SecretString,
    pub github_webhook_secret: SecretString,
    pub github_api_url: String,
    /// Organisation whose repositories `POST /v1/jobs/org` enqueues.
    pub github_org: Option<String>,
    pub google_docs_token: Option<SecretString>,
    pub release_docs: ReleaseDocs,
    pub listen_addr: String,
    /// Case-insensitive substring a workflow run name must contain to count
    /// as a dev deployment. `None` accepts every run.
    pub workflow_filter: Option<String>,
    /// Upper bound on concurrent outbound calls within one scan.
    pub scan_concurrency: usize,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            github_token: SecretString::from(required_var("GITHUB_TOKEN")?),
            github_webhook_secret: SecretString::from(required_var("GITHUB_WEBHOOK_SECRET")?),
            github_api_url: std::env::var("GITHUB_API_URL")
                .unwrap_or_else(|_| DEFAULT_GITHUB_API_URL.to_string()),
            github_org: optional_var("GITHUB_ORG"),
            google_docs_token: optional_var("GOOGLE_DOCS_TOKEN").map(SecretString::from),
            release_docs: ReleaseDocs {
                uat: optional_var("UAT_DOC_ID"),
                prod: optional_var("PROD_DOC_ID"),
            },
            listen_addr: std::env::var("LISTEN_ADDR")
                .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string()),
            workflow_filter: match std::env::var("WORKFLOW_FILTER") {
                Ok(v) if v.trim().is_empty() => None,
                Ok(v) => Some(v),
                Err(_) => Some(DEFAULT_WORKFLOW_FILTER.to_string()),
            },
            scan_concurrency: parse_concurrency(std::env::var("SCAN_CONCURRENCY").ok())?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Release log documents scanned for the `uat` and `prod` environments.
#[derive(Debug, Clone, Default)]
pub struct ReleaseDocs {
    pub uat: Option<String>,
    pub prod: Option<String>,
}

impl ReleaseDocs {
    /// Document id configured for an environment's release log, if any.
    pub fn doc_id_for(&self, environment: Environment) -> Option<&str> {
        match environment {
            Environment::Uat => self.uat.as_deref(),
            Environment::Prod => self.prod.as_deref(),
            Environment::Dev => None,
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    optional_var(name)
        .ok_or_else(|| Error::Config(format!("required environment variable {name} is not set or blank")))
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_concurrency(raw: Option<String>) -> Result<usize> {
    match raw {
        None => Ok(DEFAULT_SCAN_CONCURRENCY),
        Some(s) => match s.trim().parse::<usize>() {
            Ok(0) | Err(_) => Err(Error::Config(format!(
                "SCAN_CONCURRENCY must be a positive integer, got {s:?}"
            ))),
            Ok(n) => Ok(n),
        },
    }
}
