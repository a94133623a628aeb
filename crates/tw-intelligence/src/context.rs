//! Repository context analyzer.
//!
//! Produces the cached semantic model of a repository: one pass over the
//! file tree, README, and dependency manifests, then a single generation
//! call summarized into a [`RepositoryContext`]. The cache wins
//! unconditionally — no freshness check — and a parse failure is surfaced
//! to the caller rather than cached partially.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use tw_core::context_cache::ContextCache;
use tw_core::types::{
    ApiSurface, ModuleSummary, RepoKey, RepoMetrics, RepositoryContext, TechStack,
};
use tw_integrations::github::RepoHost;

use crate::extract::extract_json;
use crate::generate::{GenerationParams, TextGenerator};
use crate::{prompts, PipelineError};

/// Manifest files fetched to refine tech-stack detection.
const MANIFEST_FILES: &[&str] = &[
    "Cargo.toml",
    "package.json",
    "requirements.txt",
    "pyproject.toml",
    "go.mod",
    "pom.xml",
    "build.gradle",
    "Gemfile",
    "composer.json",
];

/// At most this many manifests are fetched per analysis.
const MAX_MANIFESTS: usize = 4;

/// Branches tried for the tree fetch, in order.
const BRANCH_FALLBACK: &[&str] = &["main", "master"];

// ---------------------------------------------------------------------------
// ContextAnalyzer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ContextAnalyzer {
    host: Arc<dyn RepoHost>,
    generator: Arc<dyn TextGenerator>,
    cache: Arc<ContextCache>,
    model: String,
}

/// Typed shape of the generation service's analysis payload. Every field
/// is defaulted — the service is untrusted and may omit any of them.
#[derive(Debug, Deserialize)]
struct ContextAnalysis {
    #[serde(default)]
    project_summary: String,
    #[serde(default)]
    architecture_overview: String,
    #[serde(default)]
    tech_stack: TechStack,
    #[serde(default, alias = "modules")]
    key_modules: Vec<ModuleSummary>,
    #[serde(default, alias = "api_structure")]
    api_surface: ApiSurface,
}

impl ContextAnalyzer {
    pub fn new(
        host: Arc<dyn RepoHost>,
        generator: Arc<dyn TextGenerator>,
        cache: Arc<ContextCache>,
    ) -> Self {
        Self {
            host,
            generator,
            cache,
            model: GenerationParams::default().model,
        }
    }

    /// Override the model used for analysis calls.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Analyze a repository, serving from the cache when possible.
    pub async fn analyze(&self, key: &RepoKey) -> Result<RepositoryContext, PipelineError> {
        if let Some(cached) = self.cache.fetch(key)? {
            info!(repo = %key, access_count = cached.access_count, "serving cached repository context");
            return Ok(cached);
        }

        info!(repo = %key, "cache miss, analyzing repository");

        let files = self.fetch_tree(key).await?;
        let readme = self.fetch_readme(key).await;
        let histogram = extension_histogram(&files);
        let languages = detected_languages(&histogram);
        let manifests = self.fetch_manifests(key, &files).await;

        let prompt = prompts::repository_analysis(
            key,
            &files,
            &readme,
            &languages,
            &manifests,
        );
        let params = GenerationParams::new(self.model.as_str(), 0.1, 4096);
        let output = self.generator.generate(&prompt, &params).await?;

        let value = extract_json(&output.text, "repository analysis")?;
        let analysis: ContextAnalysis = serde_json::from_value(value)
            .map_err(|e| PipelineError::Validation(format!("repository analysis: {e}")))?;

        let now = Utc::now();
        let context = RepositoryContext {
            key: key.clone(),
            project_summary: analysis.project_summary,
            architecture_overview: analysis.architecture_overview,
            tech_stack: analysis.tech_stack,
            modules: analysis.key_modules,
            api_surface: analysis.api_surface,
            metrics: RepoMetrics {
                file_count: files.len(),
                manifest_files: manifests.iter().map(|(name, _)| name.clone()).collect(),
                language_histogram: histogram,
            },
            access_count: 0,
            created_at: now,
            updated_at: now,
        };

        self.cache.insert(&context)?;
        info!(
            repo = %key,
            files = context.metrics.file_count,
            modules = context.modules.len(),
            "repository context cached"
        );
        Ok(context)
    }

    /// Fetch the file tree, trying the default branches in order.
    async fn fetch_tree(&self, key: &RepoKey) -> Result<Vec<String>, PipelineError> {
        let mut last_err = None;
        for branch in BRANCH_FALLBACK {
            match self.host.get_tree(&key.owner, &key.repo, branch).await {
                Ok(files) => return Ok(files),
                Err(e) => {
                    warn!(repo = %key, branch, error = %e, "tree fetch failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.expect("at least one branch attempted").into())
    }

    /// Fetch the README, best-effort: absence and transport errors both
    /// degrade to an empty excerpt.
    async fn fetch_readme(&self, key: &RepoKey) -> String {
        for name in ["README.md", "readme.md"] {
            match self.host.get_file(&key.owner, &key.repo, name).await {
                Ok(Some(content)) => return content,
                Ok(None) => continue,
                Err(e) => {
                    warn!(repo = %key, file = name, error = %e, "README fetch failed");
                    return String::new();
                }
            }
        }
        String::new()
    }

    /// Fetch the contents of known manifest files present in the tree,
    /// best-effort.
    async fn fetch_manifests(&self, key: &RepoKey, files: &[String]) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for path in files {
            let name = path.rsplit('/').next().unwrap_or(path);
            if !MANIFEST_FILES.contains(&name) {
                continue;
            }
            match self.host.get_file(&key.owner, &key.repo, path).await {
                Ok(Some(content)) => out.push((path.clone(), content)),
                Ok(None) => {}
                Err(e) => warn!(repo = %key, file = %path, error = %e, "manifest fetch failed"),
            }
            if out.len() >= MAX_MANIFESTS {
                break;
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Language detection
// ---------------------------------------------------------------------------

/// Count file extensions across the tree.
pub fn extension_histogram(files: &[String]) -> BTreeMap<String, usize> {
    let mut histogram = BTreeMap::new();
    for file in files {
        let name = file.rsplit('/').next().unwrap_or(file);
        if let Some((_, ext)) = name.rsplit_once('.') {
            if !ext.is_empty() {
                *histogram.entry(ext.to_ascii_lowercase()).or_insert(0) += 1;
            }
        }
    }
    histogram
}

/// Map extension counts to language names, most common first.
pub fn detected_languages(histogram: &BTreeMap<String, usize>) -> Vec<String> {
    const EXTENSION_MAP: &[(&str, &str)] = &[
        ("py", "python"),
        ("js", "javascript"),
        ("ts", "typescript"),
        ("jsx", "react"),
        ("tsx", "react"),
        ("rs", "rust"),
        ("go", "go"),
        ("java", "java"),
        ("kt", "kotlin"),
        ("rb", "ruby"),
        ("php", "php"),
        ("cs", "csharp"),
        ("cpp", "cpp"),
        ("c", "c"),
        ("swift", "swift"),
        ("dart", "dart"),
        ("vue", "vue"),
        ("sql", "sql"),
        ("sh", "bash"),
    ];

    let mut counts: Vec<(String, usize)> = Vec::new();
    for (ext, count) in histogram {
        if let Some((_, lang)) = EXTENSION_MAP.iter().find(|(e, _)| e == ext) {
            match counts.iter_mut().find(|(l, _)| l == lang) {
                Some(entry) => entry.1 += count,
                None => counts.push((lang.to_string(), *count)),
            }
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.into_iter().map(|(lang, _)| lang).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
