use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{CodeMatch, GitHubError, RepoHost, Result};

const DEFAULT_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("taskweave/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// GitHubHost
// ---------------------------------------------------------------------------

/// [`RepoHost`] implementation over the GitHub REST v3 API.
#[derive(Debug, Clone)]
pub struct GitHubHost {
    client: reqwest::Client,
    base_url: String,
    token: String,
    request_timeout: Duration,
    tree_timeout: Duration,
}

impl GitHubHost {
    /// Create a host client for `https://api.github.com`.
    pub fn new(token: impl Into<String>) -> Result<Self> {
        Self::new_with_url(DEFAULT_API_BASE, token)
    }

    /// Create a host client for a custom API base (GitHub Enterprise, or a
    /// test server).
    pub fn new_with_url(base_url: &str, token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(GitHubError::MissingToken);
        }
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            request_timeout: Duration::from_secs(10),
            tree_timeout: Duration::from_secs(60),
        })
    }

    /// Override the per-request timeouts.
    pub fn with_timeouts(mut self, request: Duration, tree: Duration) -> Self {
        self.request_timeout = request;
        self.tree_timeout = tree;
        self
    }

    // -- request helpers ----------------------------------------------------

    async fn api_get(&self, path: &str, timeout: Duration) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .timeout(timeout)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(GitHubError::Api(format!(
                "{} {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
                body
            )));
        }

        Ok(resp)
    }

    /// Build the code-search query string for a keyword scoped to one
    /// repository.
    pub(crate) fn search_query(owner: &str, repo: &str, keyword: &str) -> String {
        format!(
            "{}+repo:{}/{}",
            urlencoding::encode(keyword),
            owner,
            repo
        )
    }
}

// ---------------------------------------------------------------------------
// Wire payloads
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    path: String,
    html_url: String,
}

/// Decode a GitHub contents payload. The API wraps base64 at 60 columns,
/// so embedded newlines have to be stripped before decoding.
pub(crate) fn decode_content(raw: &str) -> Result<String> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| GitHubError::Api(format!("invalid base64 content: {e}")))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

// ---------------------------------------------------------------------------
// RepoHost implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl RepoHost for GitHubHost {
    async fn get_tree(&self, owner: &str, repo: &str, branch: &str) -> Result<Vec<String>> {
        let path = format!("/repos/{owner}/{repo}/git/trees/{branch}?recursive=1");
        let resp = self.api_get(&path, self.tree_timeout).await?;
        let data: TreeResponse = resp.json().await?;

        if data.truncated {
            warn!(repo = %format!("{owner}/{repo}"), "tree listing truncated by the API");
        }

        let files: Vec<String> = data
            .tree
            .into_iter()
            .filter(|e| e.kind == "blob")
            .map(|e| e.path)
            .collect();
        debug!(repo = %format!("{owner}/{repo}"), branch, files = files.len(), "tree fetched");
        Ok(files)
    }

    async fn get_file(&self, owner: &str, repo: &str, path: &str) -> Result<Option<String>> {
        let api_path = format!("/repos/{owner}/{repo}/contents/{path}");
        let url = format!("{}{}", self.base_url, api_path);
        let resp = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .timeout(self.request_timeout)
            .send()
            .await?;

        // Optional files are allowed to be absent.
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(GitHubError::Api(format!(
                "{} {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
                body
            )));
        }

        let data: ContentResponse = resp.json().await?;
        if data.encoding != "base64" {
            return Ok(Some(data.content));
        }
        Ok(Some(decode_content(&data.content)?))
    }

    async fn search_code(&self, owner: &str, repo: &str, query: &str) -> Result<Vec<CodeMatch>> {
        let q = Self::search_query(owner, repo, query);
        let path = format!("/search/code?q={q}");
        let resp = self.api_get(&path, self.request_timeout).await?;
        let data: SearchResponse = resp.json().await?;

        Ok(data
            .items
            .into_iter()
            .map(|item| CodeMatch {
                path: item.path,
                url: item.html_url,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
