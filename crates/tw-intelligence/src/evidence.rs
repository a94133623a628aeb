//! Codebase evidence search.
//!
//! Supports or refutes the claim that a feature already exists by querying
//! the repository host per keyword. Individual query failures (rate limit,
//! network) are logged and skipped; an empty evidence list is a meaningful
//! result, not an error — it signals the feature does not exist yet.

use tracing::{debug, warn};

use tw_core::types::{Evidence, RepoKey};
use tw_integrations::github::RepoHost;

/// At most this many keywords are searched per classification.
pub const MAX_KEYWORDS: usize = 3;
/// At most this many files are kept per keyword.
pub const MAX_FILES_PER_KEYWORD: usize = 5;

/// Search the repository for files matching the extracted keywords.
pub async fn search_evidence(
    host: &dyn RepoHost,
    key: &RepoKey,
    keywords: &[String],
) -> Vec<Evidence> {
    let mut evidence = Vec::new();

    for keyword in keywords.iter().take(MAX_KEYWORDS) {
        match host.search_code(&key.owner, &key.repo, keyword).await {
            Ok(matches) => {
                debug!(repo = %key, keyword = %keyword, hits = matches.len(), "code search");
                for m in matches.into_iter().take(MAX_FILES_PER_KEYWORD) {
                    evidence.push(Evidence {
                        file: m.path,
                        keyword: keyword.clone(),
                        url: m.url,
                    });
                }
            }
            Err(e) => {
                // One failed query shrinks the evidence list; it never
                // aborts the sweep.
                warn!(repo = %key, keyword = %keyword, error = %e, "code search failed, skipping keyword");
            }
        }
    }

    evidence
}
