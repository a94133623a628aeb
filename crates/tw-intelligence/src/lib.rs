pub mod classifier;
pub mod context;
pub mod evidence;
pub mod extract;
pub mod followup;
pub mod generate;
pub mod matcher;
pub mod planner;
pub mod prompts;

// Re-export the pipeline surface.
pub use classifier::TaskClassifier;
pub use context::ContextAnalyzer;
pub use extract::{extract_json, ExtractError};
pub use followup::{FollowupLedger, FollowupTicket, NotificationSink, NotifyError};
pub use generate::{
    GenerateError, GenerationOutput, GenerationParams, GeminiGenerator, MockGenerator,
    TextGenerator, UsageTracker,
};
pub use matcher::match_members;
pub use planner::PlanGenerator;

use thiserror::Error;
use tw_core::context_cache::StoreError;
use tw_integrations::github::GitHubError;

// ---------------------------------------------------------------------------
// Crate-level error type
// ---------------------------------------------------------------------------

/// Failure taxonomy for the task-intelligence pipeline.
///
/// Locally absorbed conditions (cache misses, missing README, per-keyword
/// search failures) never surface here. Everything that does surface is a
/// typed failure — the pipeline never converts one into a syntactically
/// valid but semantically empty success.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The generation service was unreachable or rejected the call.
    #[error("generation service error: {0}")]
    Generate(#[from] GenerateError),

    /// The repository host was unreachable or rejected the call.
    #[error("repository host error: {0}")]
    Host(#[from] GitHubError),

    /// Generation output could not be coerced to structured data, even
    /// after repair.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Structurally valid output that fails a semantic invariant; rejected
    /// before persistence.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Plan generation was requested for a session that was never
    /// classified.
    #[error("unknown session: {0}")]
    SessionNotFound(String),

    /// The context cache or history store failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl From<tw_core::types::ValidationError> for PipelineError {
    fn from(err: tw_core::types::ValidationError) -> Self {
        PipelineError::Validation(err.0)
    }
}
