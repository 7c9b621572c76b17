//! Release log document source.
//!
//! The scan only needs the text of a document split into blocks;
//! [`GoogleDocsClient`] reads it from the Google Docs API.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::parser::split_blocks;

const GOOGLE_DOCS_API_URL: &str = "https://docs.googleapis.com/v1/documents";

/// A source of release log documents.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// The document's text as ordered, trimmed, non-empty blocks.
    async fn read_blocks(&self, doc_id: &str) -> Result<Vec<String>>;
}

/// Google Docs `documents.get` client using a bearer access token.
pub struct GoogleDocsClient {
    http: reqwest::Client,
    api_url: String,
    token: SecretString,
}

impl GoogleDocsClient {
    pub fn new(token: SecretString) -> Self {
        Self::with_api_url(GOOGLE_DOCS_API_URL, token)
    }

    pub fn with_api_url(api_url: impl Into<String>, token: SecretString) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }
}

#[async_trait]
impl DocumentSource for GoogleDocsClient {
    #[tracing::instrument(skip(self), name = "GoogleDocsClient::read_blocks")]
    async fn read_blocks(&self, doc_id: &str) -> Result<Vec<String>> {
        let response = self
            .http
            .get(format!("{}/{doc_id}", self.api_url))
            .bearer_auth(self.token.expose_secret())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!(
                "failed to read document {doc_id}: {status}: {body}"
            )));
        }

        let document: Document = response.json().await?;
        Ok(split_blocks(&document.text()))
    }
}

/// Stand-in used when no document credentials are configured.
pub struct Unconfigured;

#[async_trait]
impl DocumentSource for Unconfigured {
    async fn read_blocks(&self, doc_id: &str) -> Result<Vec<String>> {
        Err(Error::Config(format!(
            "GOOGLE_DOCS_TOKEN is not set, cannot read document {doc_id}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct Document {
    #[serde(default)]
    body: Option<Body>,
}

#[derive(Debug, Default, Deserialize)]
struct Body {
    #[serde(default)]
    content: Vec<StructuralElement>,
}

#[derive(Debug, Deserialize)]
struct StructuralElement {
    paragraph: Option<Paragraph>,
}

#[derive(Debug, Deserialize)]
struct Paragraph {
    #[serde(default)]
    elements: Vec<ParagraphElement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParagraphElement {
    text_run: Option<TextRun>,
}

#[derive(Debug, Deserialize)]
struct TextRun {
    content: Option<String>,
}

impl Document {
    /// Concatenated text runs of every paragraph, in document order.
    fn text(&self) -> String {
        self.body
            .iter()
            .flat_map(|b| &b.content)
            .filter_map(|e| e.paragraph.as_ref())
            .flat_map(|p| &p.elements)
            .filter_map(|e| e.text_run.as_ref()?.content.as_deref())
            .collect()
    }
}
