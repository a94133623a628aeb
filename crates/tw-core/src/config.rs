use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from `~/.taskweave/config.toml`.
///
/// **Security**: this struct never stores API keys or tokens. Credentials
/// are read from environment variables at runtime (`GEMINI_API_KEY`,
/// `GITHUB_TOKEN`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default)]
    pub github: GitHubSettings,
    #[serde(default)]
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSettings {
    /// Model identifier passed to the generation service.
    pub model: String,
    /// Request timeout for generation calls, in seconds.
    pub timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash-exp".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSettings {
    pub api_base: String,
    /// Request timeout for metadata and code-search calls, in seconds.
    pub timeout_secs: u64,
    /// Longer timeout for full-tree fetches on large repositories.
    pub tree_timeout_secs: u64,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            timeout_secs: 10,
            tree_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageSettings {
    /// Override for the context-cache and session-store base directory.
    /// Defaults to the per-user config directory when unset.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Config {
    /// Path of the user config file.
    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".taskweave")
            .join("config.toml")
    }

    /// Load the config file, falling back to defaults when it is absent or
    /// unreadable. A malformed file is an error; a missing one is not.
    pub fn load() -> Result<Self, toml::de::Error> {
        match std::fs::read_to_string(Self::config_path()) {
            Ok(raw) => toml::from_str(&raw),
            Err(_) => Ok(Self::default()),
        }
    }

    /// GitHub token from the environment, if set.
    pub fn github_token() -> Option<String> {
        std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty())
    }

    /// Generation-service API key from the environment, if set.
    pub fn generation_api_key() -> Option<String> {
        std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
    }
}
