use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::context_cache::StoreError;
use crate::types::{ClassificationResult, Plan, Session};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One append-only record of a prompt and what came of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub prompt: String,
    #[serde(default)]
    pub analysis: Option<ClassificationResult>,
    #[serde(default)]
    pub plan: Option<Plan>,
}

impl HistoryEntry {
    pub fn analysis(prompt: impl Into<String>, analysis: ClassificationResult) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            prompt: prompt.into(),
            analysis: Some(analysis),
            plan: None,
        }
    }

    pub fn plan(prompt: impl Into<String>, plan: Plan) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            prompt: prompt.into(),
            analysis: None,
            plan: Some(plan),
        }
    }
}

/// The full conversation log for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHistory {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<HistoryEntry>,
}

impl SessionHistory {
    fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            created_at: Utc::now(),
            entries: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// HistoryStore
// ---------------------------------------------------------------------------

/// File-system-backed persistence for sessions and their append-only
/// history logs.
///
/// Each session id maps to two JSON files under the base directory: the
/// current [`Session`] document and its [`SessionHistory`] log. The store
/// is the exclusive owner of conversation history. It performs no
/// per-session locking — the calling layer serializes clarification turns
/// for a given session id.
pub struct HistoryStore {
    base_dir: PathBuf,
}

impl HistoryStore {
    /// Create a store with the default directory
    /// (`~/.config/taskweave/sessions/`).
    pub fn default_path() -> Self {
        let base = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("taskweave")
            .join("sessions");
        Self { base_dir: base }
    }

    /// Create a store backed by a custom directory (useful for testing).
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn ensure_dir(&self) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }

    fn sanitize(id: &str) -> String {
        id.chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", Self::sanitize(id)))
    }

    fn history_path(&self, id: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.history.json", Self::sanitize(id)))
    }

    /// Save (or overwrite) the current session document.
    pub fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        self.ensure_dir()?;
        let path = self.session_path(&session.id);
        std::fs::write(path, serde_json::to_string_pretty(session)?)?;
        debug!(session_id = %session.id, stage = ?session.stage, "session saved");
        Ok(())
    }

    /// Load a session by id. Returns `None` if not found.
    pub fn load_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let path = self.session_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// Append one entry to a session's history log, creating the log on
    /// first use. Existing entries are never rewritten.
    pub fn append_history(&self, session_id: &str, entry: HistoryEntry) -> Result<(), StoreError> {
        self.ensure_dir()?;
        let mut history = self.history(session_id)?;
        history.entries.push(entry);
        let path = self.history_path(session_id);
        std::fs::write(path, serde_json::to_string_pretty(&history)?)?;
        debug!(
            session_id,
            entries = history.entries.len(),
            "history appended"
        );
        Ok(())
    }

    /// Read a session's history log. An absent log is an empty one, not an
    /// error.
    pub fn history(&self, session_id: &str) -> Result<SessionHistory, StoreError> {
        let path = self.history_path(session_id);
        if !path.exists() {
            return Ok(SessionHistory::new(session_id));
        }
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// List all saved sessions, most recently updated first.
    pub fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        self.ensure_dir()?;
        let mut sessions = Vec::new();
        for entry in std::fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };
            if !name.ends_with(".json") || name.ends_with(".history.json") {
                continue;
            }
            match std::fs::read_to_string(&path) {
                Ok(data) => {
                    if let Ok(session) = serde_json::from_str::<Session>(&data) {
                        sessions.push(session);
                    }
                }
                Err(_) => continue,
            }
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
