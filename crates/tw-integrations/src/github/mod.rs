pub mod client;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur when talking to the repository host.
#[derive(Debug, Error)]
pub enum GitHubError {
    /// The API returned a non-success response. Includes the HTTP status
    /// and response body when available.
    #[error("GitHub API error: {0}")]
    Api(String),

    /// No access token was provided.
    #[error("missing GitHub token — set GITHUB_TOKEN or pass it explicitly")]
    MissingToken,

    /// Failed to serialize or deserialize an API payload.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// An HTTP-level error (connection failure, DNS, TLS, timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for repository-host operations.
pub type Result<T> = std::result::Result<T, GitHubError>;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// A code-search hit: a file in the repository matching a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeMatch {
    pub path: String,
    pub url: String,
}

// ---------------------------------------------------------------------------
// RepoHost trait
// ---------------------------------------------------------------------------

/// Read-only view of a hosted repository.
///
/// Implementations must treat absent optional files (404) as `None`, not an
/// error — a missing README is a normal condition for the callers of this
/// trait.
#[async_trait]
pub trait RepoHost: Send + Sync {
    /// List every blob path in the repository tree for the given branch.
    async fn get_tree(&self, owner: &str, repo: &str, branch: &str) -> Result<Vec<String>>;

    /// Fetch the decoded content of one file. Returns `Ok(None)` when the
    /// path does not exist.
    async fn get_file(&self, owner: &str, repo: &str, path: &str) -> Result<Option<String>>;

    /// Search the repository's code for a query, returning matching files.
    async fn search_code(&self, owner: &str, repo: &str, query: &str) -> Result<Vec<CodeMatch>>;
}
