use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::types::{RepoKey, RepositoryContext};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// ContextCache
// ---------------------------------------------------------------------------

/// File-system-backed cache of [`RepositoryContext`] documents.
///
/// Contexts are stored as individual JSON files keyed by `owner__repo`
/// under a configurable directory (defaults to
/// `~/.config/taskweave/contexts/`). A fetch bumps the access counter in
/// place; an insert overwrites the whole document. There is no TTL and no
/// eviction — the cache wins unconditionally and recomputation is an
/// explicit overwrite.
pub struct ContextCache {
    base_dir: PathBuf,
}

impl ContextCache {
    /// Create a cache with the default directory.
    pub fn default_path() -> Self {
        let base = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("taskweave")
            .join("contexts");
        Self { base_dir: base }
    }

    /// Create a cache backed by a custom directory (useful for testing).
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn ensure_dir(&self) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }

    /// Path for a given repository key. Path separators in the owner or
    /// repo name must not escape the cache directory.
    fn context_path(&self, key: &RepoKey) -> PathBuf {
        let sanitize = |s: &str| {
            s.chars()
                .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
                .collect::<String>()
        };
        self.base_dir
            .join(format!("{}__{}.json", sanitize(&key.owner), sanitize(&key.repo)))
    }

    /// Look up a cached context. On a hit the access counter is incremented
    /// and written back before the (updated) document is returned.
    pub fn fetch(&self, key: &RepoKey) -> Result<Option<RepositoryContext>, StoreError> {
        let path = self.context_path(key);
        if !path.exists() {
            debug!(repo = %key, "context cache miss");
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)?;
        let mut context: RepositoryContext = serde_json::from_str(&data)?;
        context.access_count += 1;
        write_atomic(&path, &serde_json::to_string_pretty(&context)?)?;
        debug!(repo = %key, access_count = context.access_count, "context cache hit");
        Ok(Some(context))
    }

    /// Persist a context, overwriting any previous document for the same
    /// key. Writes go to a temporary file and are renamed into place, so
    /// two analyses of the same repository racing on a cache miss leave one
    /// clean winner — never an interleaved document.
    pub fn insert(&self, context: &RepositoryContext) -> Result<(), StoreError> {
        self.ensure_dir()?;
        let path = self.context_path(&context.key);
        write_atomic(&path, &serde_json::to_string_pretty(context)?)?;
        debug!(repo = %context.key, "context cached");
        Ok(())
    }

    /// Whether a context is cached for the given key, without touching the
    /// access counter.
    pub fn contains(&self, key: &RepoKey) -> bool {
        self.context_path(key).exists()
    }
}

/// Write a whole document through a uniquely-named temporary file and an
/// atomic rename, last writer wins.
fn write_atomic(path: &Path, data: &str) -> Result<(), StoreError> {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let tmp = path.with_extension(format!(
        "tmp.{}.{}",
        std::process::id(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
