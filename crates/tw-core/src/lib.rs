pub mod config;
pub mod context_cache;
pub mod history;
pub mod types;

pub use context_cache::ContextCache;
pub use history::{HistoryEntry, HistoryStore, SessionHistory};
pub use types::{
    ApiSurface, ClarityStatus, ClassificationResult, Complexity, Evidence, MatchResult,
    MemberStatus, ModuleSummary, Plan, Question, RepoKey, RepoMetrics, RepositoryContext, Session,
    SessionStage, Subtask, TaskType, TeamMember, TechStack, ValidationError,
};
