//! Collaborators threaded through every scan, correlation and webhook call.

use std::sync::Arc;

use crate::docs::DocumentSource;
use crate::github::SourceControl;
use crate::store::LedgerStore;

/// Explicit dependencies for the ingestion paths.
#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn LedgerStore>,
    pub scm: Arc<dyn SourceControl>,
    pub docs: Arc<dyn DocumentSource>,
    /// Upper bound on concurrent outbound calls within one scan or release.
    pub concurrency: usize,
    /// Case-insensitive substring a workflow run name must contain.
    pub workflow_filter: Option<String>,
}

impl Context {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        scm: Arc<dyn SourceControl>,
        docs: Arc<dyn DocumentSource>,
    ) -> Self {
        Self {
            store,
            scm,
            docs,
            concurrency: 8,
            workflow_filter: Some("docker".to_string()),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_workflow_filter(mut self, filter: Option<String>) -> Self {
        self.workflow_filter = filter;
        self
    }
}
