//! In-memory [`RepoHost`] for tests.
//!
//! Serves canned trees, files, and search results, and counts every call so
//! tests can assert cache-hit invariants (a cached analysis must issue zero
//! host calls).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CodeMatch, GitHubError, RepoHost, Result};

#[derive(Default)]
pub struct MockRepoHost {
    trees: Mutex<HashMap<String, Vec<String>>>,
    files: Mutex<HashMap<String, String>>,
    matches: Mutex<HashMap<String, Vec<CodeMatch>>>,
    failing_queries: Mutex<HashSet<String>>,
    tree_calls: AtomicUsize,
    file_calls: AtomicUsize,
    search_calls: AtomicUsize,
}

impl MockRepoHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve this file list for a branch.
    pub fn with_tree(self, branch: &str, files: &[&str]) -> Self {
        self.trees.lock().unwrap().insert(
            branch.to_string(),
            files.iter().map(|f| f.to_string()).collect(),
        );
        self
    }

    /// Serve this content for a file path.
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
        self
    }

    /// Serve these matches for a search query.
    pub fn with_matches(self, query: &str, matches: Vec<CodeMatch>) -> Self {
        self.matches
            .lock()
            .unwrap()
            .insert(query.to_string(), matches);
        self
    }

    /// Make searches for this query fail (rate-limit simulation).
    pub fn with_failing_query(self, query: &str) -> Self {
        self.failing_queries
            .lock()
            .unwrap()
            .insert(query.to_string());
        self
    }

    pub fn tree_calls(&self) -> usize {
        self.tree_calls.load(Ordering::SeqCst)
    }

    pub fn file_calls(&self) -> usize {
        self.file_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    /// Total host calls of any kind.
    pub fn total_calls(&self) -> usize {
        self.tree_calls() + self.file_calls() + self.search_calls()
    }
}

#[async_trait]
impl RepoHost for MockRepoHost {
    async fn get_tree(&self, _owner: &str, _repo: &str, branch: &str) -> Result<Vec<String>> {
        self.tree_calls.fetch_add(1, Ordering::SeqCst);
        self.trees
            .lock()
            .unwrap()
            .get(branch)
            .cloned()
            .ok_or_else(|| GitHubError::Api(format!("404 Not Found: no branch {branch}")))
    }

    async fn get_file(&self, _owner: &str, _repo: &str, path: &str) -> Result<Option<String>> {
        self.file_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.files.lock().unwrap().get(path).cloned())
    }

    async fn search_code(&self, _owner: &str, _repo: &str, query: &str) -> Result<Vec<CodeMatch>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_queries.lock().unwrap().contains(query) {
            return Err(GitHubError::Api("403 rate limit exceeded".to_string()));
        }
        Ok(self
            .matches
            .lock()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or_default())
    }
}
