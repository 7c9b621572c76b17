//! GitHub REST client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url};
use reqwest::header::{HeaderMap, LINK};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{CommitSummary, Release, RepoMetadata, SourceControl, Tag, WorkflowRun};
use crate::error::{Error, Result};

const PER_PAGE: u32 = 100;

/// GitHub REST API client authenticated with a token.
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: SecretString,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, token: SecretString) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("shiplog-rs/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.http
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .header(
                "Authorization",
                format!("Bearer {}", self.token.expose_secret()),
            )
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// `api_url` extended with percent-encoded path segments.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| Error::Config(format!("invalid GitHub API url {}: {e}", self.api_url)))?;
        url.path_segments_mut()
            .map_err(|()| Error::Config(format!("GitHub API url {} cannot be a base", self.api_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// GET a single JSON document. `Ok(None)` on 404.
    async fn fetch<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>> {
        let path = url.path().to_string();
        let response = self.get(url.as_str()).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response, &path).await?;
        Ok(Some(response.json().await?))
    }

    /// GET every page of a paginated endpoint, following `Link: rel="next"`.
    ///
    /// `query` is encoded onto the first page only; `next` links already
    /// carry it. `extract` pulls the items out of one page body.
    async fn fetch_all<P, T>(
        &self,
        url: Url,
        query: &[(&str, &str)],
        extract: impl Fn(P) -> Vec<T>,
    ) -> Result<Vec<T>>
    where
        P: DeserializeOwned,
    {
        let path = url.path().to_string();
        let per_page = PER_PAGE.to_string();
        let first = self
            .get(url.as_str())
            .query(query)
            .query(&[("per_page", per_page.as_str())]);

        let mut request = Some(first);
        let mut items = Vec::new();
        while let Some(builder) = request.take() {
            let response = check_status(builder.send().await?, &path).await?;
            request = next_link(response.headers()).map(|next| self.get(&next));
            let page: P = response.json().await?;
            items.extend(extract(page));
        }
        Ok(items)
    }
}

async fn check_status(response: reqwest::Response, path: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Upstream(format!("GET {path}: {status}: {body}")))
}

/// The `rel="next"` target of a `Link` header, if any.
fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        pieces
            .any(|p| p.trim() == r#"rel="next""#)
            .then(|| target.trim_start_matches('<').trim_end_matches('>').to_string())
    })
}

#[async_trait]
impl SourceControl for GitHubClient {
    #[tracing::instrument(skip(self), name = "GitHubClient::get_repository")]
    async fn get_repository(&self, owner: &str, name: &str) -> Result<RepoMetadata> {
        let repo: Option<ApiRepository> = self.fetch(self.endpoint(&["repos", owner, name])?).await?;
        repo.map(Into::into)
            .ok_or_else(|| Error::NotFound(format!("repository {owner}/{name}")))
    }

    #[tracing::instrument(skip(self), name = "GitHubClient::list_tags")]
    async fn list_tags(&self, owner: &str, name: &str) -> Result<Vec<Tag>> {
        self.fetch_all(
            self.endpoint(&["repos", owner, name, "tags"])?,
            &[],
            |page: Vec<ApiTag>| {
                page.into_iter()
                    .map(|t| Tag {
                        name: t.name,
                        commit_sha: t.commit.sha,
                    })
                    .collect()
            },
        )
        .await
    }

    #[tracing::instrument(skip(self), name = "GitHubClient::list_commits")]
    async fn list_commits(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CommitSummary>> {
        let since = since.map(|s| s.to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
        let mut query = vec![("sha", branch)];
        if let Some(since) = since.as_deref() {
            query.push(("since", since));
        }
        self.fetch_all(
            self.endpoint(&["repos", owner, name, "commits"])?,
            &query,
            |page: Vec<ApiCommit>| page.into_iter().map(Into::into).collect(),
        )
        .await
    }

    #[tracing::instrument(skip(self), name = "GitHubClient::list_workflow_runs")]
    async fn list_workflow_runs(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
    ) -> Result<Vec<WorkflowRun>> {
        self.fetch_all(
            self.endpoint(&["repos", owner, name, "actions", "runs"])?,
            &[("branch", branch)],
            |page: ApiWorkflowRuns| page.workflow_runs,
        )
        .await
    }

    #[tracing::instrument(skip(self), name = "GitHubClient::compare")]
    async fn compare(
        &self,
        owner: &str,
        name: &str,
        base: &str,
        head: &str,
    ) -> Result<Vec<CommitSummary>> {
        let range = format!("{base}...{head}");
        self.fetch_all(
            self.endpoint(&["repos", owner, name, "compare", range.as_str()])?,
            &[],
            |page: ApiComparison| page.commits.into_iter().map(Into::into).collect(),
        )
        .await
    }

    #[tracing::instrument(skip(self), name = "GitHubClient::get_release_by_tag")]
    async fn get_release_by_tag(
        &self,
        owner: &str,
        name: &str,
        tag: &str,
    ) -> Result<Option<Release>> {
        let release: Option<ApiRelease> = self
            .fetch(self.endpoint(&["repos", owner, name, "releases", "tags", tag])?)
            .await?;
        Ok(release.map(|r| Release {
            tag_name: r.tag_name,
            created_at: r.created_at,
            published_at: r.published_at,
        }))
    }

    #[tracing::instrument(skip(self), name = "GitHubClient::list_org_repositories")]
    async fn list_org_repositories(&self, org: &str) -> Result<Vec<RepoMetadata>> {
        self.fetch_all(
            self.endpoint(&["orgs", org, "repos"])?,
            &[],
            |page: Vec<ApiRepository>| page.into_iter().map(Into::into).collect(),
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ApiOwner {
    login: String,
}

#[derive(Deserialize)]
struct ApiRepository {
    id: i64,
    name: String,
    owner: ApiOwner,
    #[serde(default)]
    private: bool,
    default_branch: String,
}

impl From<ApiRepository> for RepoMetadata {
    fn from(r: ApiRepository) -> Self {
        Self {
            id: r.id,
            owner: r.owner.login,
            name: r.name,
            private: r.private,
            default_branch: r.default_branch,
        }
    }
}

#[derive(Deserialize)]
struct ApiTagCommit {
    sha: String,
}

#[derive(Deserialize)]
struct ApiTag {
    name: String,
    commit: ApiTagCommit,
}

#[derive(Deserialize)]
struct ApiSignature {
    name: Option<String>,
    date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct ApiCommitDetail {
    author: Option<ApiSignature>,
    committer: Option<ApiSignature>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct ApiCommit {
    sha: String,
    commit: ApiCommitDetail,
}

impl From<ApiCommit> for CommitSummary {
    fn from(c: ApiCommit) -> Self {
        Self {
            sha: c.sha,
            author: c.commit.author.and_then(|a| a.name),
            message: c.commit.message,
            committed_at: c.commit.committer.and_then(|s| s.date),
        }
    }
}

#[derive(Deserialize)]
struct ApiWorkflowRuns {
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Deserialize)]
struct ApiComparison {
    #[serde(default)]
    commits: Vec<ApiCommit>,
}

#[derive(Deserialize)]
struct ApiRelease {
    tag_name: String,
    created_at: Option<DateTime<Utc>>,
    published_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn next_link_follows_rel_next() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LINK,
            HeaderValue::from_static(
                r#"<https://api.github.com/repositories/1/tags?page=2>; rel="next", <https://api.github.com/repositories/1/tags?page=5>; rel="last""#,
            ),
        );
        assert_eq!(
            next_link(&headers).as_deref(),
            Some("https://api.github.com/repositories/1/tags?page=2")
        );
    }

    #[test]
    fn last_page_has_no_next_link() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LINK,
            HeaderValue::from_static(
                r#"<https://api.github.com/repositories/1/tags?page=1>; rel="prev", <https://api.github.com/repositories/1/tags?page=1>; rel="first""#,
            ),
        );
        assert_eq!(next_link(&headers), None);
        assert_eq!(next_link(&HeaderMap::new()), None);
    }

    fn client(api_url: &str) -> GitHubClient {
        GitHubClient::new(api_url, SecretString::from("token")).unwrap()
    }

    #[test]
    fn endpoint_percent_encodes_segments() {
        let url = client("https://api.github.com")
            .endpoint(&["repos", "acme", "widget", "releases", "tags", "v1.0+build/5%"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/acme/widget/releases/tags/v1.0+build%2F5%25"
        );
    }

    #[test]
    fn endpoint_keeps_enterprise_api_prefix() {
        let url = client("https://ghe.example.com/api/v3/")
            .endpoint(&["orgs", "acme", "repos"])
            .unwrap();
        assert_eq!(url.as_str(), "https://ghe.example.com/api/v3/orgs/acme/repos");
    }

    #[test]
    fn query_values_are_encoded() {
        let request = client("https://api.github.com")
            .get("https://api.github.com/repos/acme/widget/commits")
            .query(&[("sha", "feature/a+b&c")])
            .build()
            .unwrap();
        assert_eq!(request.url().query(), Some("sha=feature%2Fa%2Bb%26c"));
    }

    #[test]
    fn commit_without_committer_date_has_no_timestamp() {
        let commit: ApiCommit = serde_json::from_value(serde_json::json!({
            "sha": "abc",
            "commit": { "author": { "name": "Ada" }, "committer": null, "message": "init" }
        }))
        .unwrap();
        let summary = CommitSummary::from(commit);
        assert_eq!(summary.author.as_deref(), Some("Ada"));
        assert_eq!(summary.committed_at, None);
    }
}
