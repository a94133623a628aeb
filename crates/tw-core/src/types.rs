use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A structurally valid document failed a semantic invariant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("validation failed: {0}")]
pub struct ValidationError(pub String);

// ---------------------------------------------------------------------------
// RepoKey
// ---------------------------------------------------------------------------

/// Identity of a repository: `(owner, repo)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoKey {
    pub owner: String,
    pub repo: String,
}

impl RepoKey {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl fmt::Display for RepoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

// ---------------------------------------------------------------------------
// Repository context
// ---------------------------------------------------------------------------

/// Detected languages, frameworks, and datastores for a repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TechStack {
    #[serde(default)]
    pub primary_language: String,
    #[serde(default)]
    pub secondary_languages: Vec<String>,
    #[serde(default)]
    pub backend_framework: Option<String>,
    #[serde(default)]
    pub frontend_framework: Option<String>,
    #[serde(default)]
    pub databases: Vec<String>,
    #[serde(default)]
    pub key_libraries: Vec<String>,
}

/// One functional module of the analyzed codebase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSummary {
    #[serde(alias = "module_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "files")]
    pub relevant_files: Vec<String>,
}

/// Detected API surface of the repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiSurface {
    #[serde(default)]
    pub has_api: bool,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub authentication: Option<String>,
}

/// Raw metrics gathered without the generation service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoMetrics {
    pub file_count: usize,
    #[serde(default)]
    pub manifest_files: Vec<String>,
    /// File-extension histogram used for coarse language detection.
    #[serde(default)]
    pub language_histogram: BTreeMap<String, usize>,
}

/// Cached semantic summary of a repository.
///
/// Immutable once cached except for `access_count` (bumped on every cache
/// hit) and `updated_at`. Recomputation overwrites the whole document; the
/// cache never merges partial results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryContext {
    pub key: RepoKey,
    pub project_summary: String,
    pub architecture_overview: String,
    pub tech_stack: TechStack,
    pub modules: Vec<ModuleSummary>,
    pub api_surface: ApiSurface,
    pub metrics: RepoMetrics,
    pub access_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RepositoryContext {
    pub fn new(key: RepoKey) -> Self {
        let now = Utc::now();
        Self {
            key,
            project_summary: String::new(),
            architecture_overview: String::new(),
            tech_stack: TechStack::default(),
            modules: Vec::new(),
            api_surface: ApiSurface::default(),
            metrics: RepoMetrics::default(),
            access_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    New,
    Update,
    Both,
}

impl TaskType {
    /// Whether this task type warrants an evidence search for existing code.
    pub fn needs_evidence(&self) -> bool {
        matches!(self, TaskType::Update | TaskType::Both)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskType::New => write!(f, "new"),
            TaskType::Update => write!(f, "update"),
            TaskType::Both => write!(f, "both"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClarityStatus {
    Clear,
    Ambiguous,
}

/// A clarifying question for the caller to answer before planning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub question: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub impact: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// A file match suggesting a feature already exists in the codebase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub file: String,
    pub keyword: String,
    pub url: String,
}

/// Outcome of the classify + clarity pipeline for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub task_type: TaskType,
    pub keywords: Vec<String>,
    pub status: ClarityStatus,
    #[serde(default)]
    pub questions: Vec<Question>,
    /// Self-reported by the generation service. Advisory telemetry only;
    /// control flow never gates on it.
    #[serde(default)]
    pub confidence_score: Option<u32>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

impl ClassificationResult {
    /// Enforce the status/questions coupling: `ambiguous` requires at least
    /// one question, `clear` requires none.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.status {
            ClarityStatus::Ambiguous if self.questions.is_empty() => Err(ValidationError(
                "ambiguous classification carries no questions".into(),
            )),
            ClarityStatus::Clear if !self.questions.is_empty() => Err(ValidationError(format!(
                "clear classification carries {} questions",
                self.questions.len()
            ))),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionStage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    Received,
    TypeDetected,
    EvidenceGathered,
    ClarityAssessed,
    AwaitingAnswers,
    PlanReady,
}

impl SessionStage {
    /// Returns `true` when a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &SessionStage) -> bool {
        matches!(
            (self, target),
            (SessionStage::Received, SessionStage::TypeDetected)
                | (SessionStage::TypeDetected, SessionStage::EvidenceGathered)
                | (SessionStage::EvidenceGathered, SessionStage::ClarityAssessed)
                | (SessionStage::ClarityAssessed, SessionStage::AwaitingAnswers)
                | (SessionStage::ClarityAssessed, SessionStage::PlanReady)
                | (SessionStage::AwaitingAnswers, SessionStage::PlanReady)
        )
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Ephemeral classification/planning context for one task, keyed by an
/// opaque session id supplied by the caller.
///
/// A session holds at most one outstanding classification; a new run
/// replaces `current` while the full history stays append-only in the
/// [`HistoryStore`](crate::history::HistoryStore).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub task: String,
    pub stage: SessionStage,
    pub current: Option<ClassificationResult>,
    pub repos: Vec<RepoKey>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, task: impl Into<String>, repos: Vec<RepoKey>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            task: task.into(),
            stage: SessionStage::Received,
            current: None,
            repos,
            created_at: now,
            updated_at: now,
        }
    }

    /// Advance the session stage, rejecting transitions the state machine
    /// does not allow.
    pub fn advance(&mut self, next: SessionStage) -> Result<(), ValidationError> {
        if !self.stage.can_transition_to(&next) {
            return Err(ValidationError(format!(
                "invalid session transition {:?} -> {:?}",
                self.stage, next
            )));
        }
        self.stage = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Replace the current classification (the previous one, if any, lives
    /// on only in the history log).
    pub fn set_classification(&mut self, result: ClassificationResult) {
        self.current = Some(result);
        self.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// One schedulable unit of work inside a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub role: String,
    #[serde(default = "Subtask::unassigned")]
    pub assigned_to: String,
    pub deadline: NaiveDate,
    pub estimated_hours: f64,
    #[serde(default)]
    pub timeline: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub files_to_create: Vec<String>,
    #[serde(default)]
    pub files_to_modify: Vec<String>,
}

impl Subtask {
    /// Sentinel used when no team member scores above zero.
    pub fn unassigned() -> String {
        "Unassigned".to_string()
    }
}

/// A decomposed, assignable execution plan for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub main_task: String,
    #[serde(default)]
    pub goal: String,
    pub task_type: TaskType,
    pub complexity: Complexity,
    #[serde(default)]
    pub estimated_duration: String,
    pub subtasks: Vec<Subtask>,
}

impl Plan {
    /// Validate the plan against the generation anchor date.
    ///
    /// Rejects: empty plans, empty subtask titles, deadlines before the
    /// anchor, non-positive effort estimates, and dependency references
    /// that do not resolve to a sibling subtask title (self-references
    /// included).
    pub fn validate(&self, anchor: NaiveDate) -> Result<(), ValidationError> {
        if self.subtasks.is_empty() {
            return Err(ValidationError("plan contains no subtasks".into()));
        }

        let titles: Vec<&str> = self.subtasks.iter().map(|s| s.title.as_str()).collect();

        for subtask in &self.subtasks {
            if subtask.title.trim().is_empty() {
                return Err(ValidationError("subtask with empty title".into()));
            }
            if subtask.deadline < anchor {
                return Err(ValidationError(format!(
                    "subtask '{}' deadline {} is before anchor date {}",
                    subtask.title, subtask.deadline, anchor
                )));
            }
            if !(subtask.estimated_hours > 0.0) {
                return Err(ValidationError(format!(
                    "subtask '{}' has non-positive estimated hours",
                    subtask.title
                )));
            }
            for dep in &subtask.dependencies {
                if dep == &subtask.title {
                    return Err(ValidationError(format!(
                        "subtask '{}' depends on itself",
                        subtask.title
                    )));
                }
                if !titles.contains(&dep.as_str()) {
                    return Err(ValidationError(format!(
                        "subtask '{}' depends on unknown subtask '{}'",
                        subtask.title, dep
                    )));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Team
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Idle,
    Busy,
    Overloaded,
}

/// A team roster entry read from the surrounding task-lifecycle system.
///
/// Availability fields (`idle_hours`, `status`) are always recomputed from
/// `current_load` and `capacity` at read time; they are never stored as the
/// source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    pub name: String,
    #[serde(default)]
    pub email: String,
    pub role: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub expertise: Vec<String>,
    #[serde(default)]
    pub current_load: f64,
    #[serde(default = "TeamMember::default_capacity")]
    pub capacity: f64,
}

impl TeamMember {
    fn default_capacity() -> f64 {
        40.0
    }

    pub fn idle_hours(&self) -> f64 {
        (self.capacity - self.current_load).max(0.0)
    }

    pub fn idle_percentage(&self) -> f64 {
        if self.capacity > 0.0 {
            self.idle_hours() / self.capacity * 100.0
        } else {
            100.0
        }
    }

    /// Idle when at least half the capacity is free, busy while any idle
    /// time remains, overloaded otherwise.
    pub fn status(&self) -> MemberStatus {
        let idle = self.idle_hours();
        if idle >= self.capacity * 0.5 {
            MemberStatus::Idle
        } else if idle > 0.0 {
            MemberStatus::Busy
        } else {
            MemberStatus::Overloaded
        }
    }
}

/// A scored candidate assignment for one subtask. Derived, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub member: TeamMember,
    pub score: u32,
    pub match_reasons: Vec<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn subtask(title: &str, deadline: NaiveDate, hours: f64) -> Subtask {
        Subtask {
            title: title.to_string(),
            description: String::new(),
            role: "Developer".to_string(),
            assigned_to: Subtask::unassigned(),
            deadline,
            estimated_hours: hours,
            timeline: String::new(),
            dependencies: Vec::new(),
            files_to_create: Vec::new(),
            files_to_modify: Vec::new(),
        }
    }

    fn plan_with(subtasks: Vec<Subtask>) -> Plan {
        Plan {
            main_task: "Test".to_string(),
            goal: String::new(),
            task_type: TaskType::New,
            complexity: Complexity::Low,
            estimated_duration: String::new(),
            subtasks,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    // -- RepoKey -------------------------------------------------------------

    #[test]
    fn repo_key_display() {
        let key = RepoKey::new("acme", "widgets");
        assert_eq!(key.to_string(), "acme/widgets");
    }

    // -- SessionStage machine ------------------------------------------------

    #[test]
    fn stage_happy_path_transitions() {
        assert!(SessionStage::Received.can_transition_to(&SessionStage::TypeDetected));
        assert!(SessionStage::TypeDetected.can_transition_to(&SessionStage::EvidenceGathered));
        assert!(SessionStage::EvidenceGathered.can_transition_to(&SessionStage::ClarityAssessed));
        assert!(SessionStage::ClarityAssessed.can_transition_to(&SessionStage::AwaitingAnswers));
        assert!(SessionStage::ClarityAssessed.can_transition_to(&SessionStage::PlanReady));
        assert!(SessionStage::AwaitingAnswers.can_transition_to(&SessionStage::PlanReady));
    }

    #[test]
    fn stage_rejects_skips_and_reversals() {
        assert!(!SessionStage::Received.can_transition_to(&SessionStage::PlanReady));
        assert!(!SessionStage::PlanReady.can_transition_to(&SessionStage::Received));
        assert!(!SessionStage::AwaitingAnswers.can_transition_to(&SessionStage::ClarityAssessed));
    }

    #[test]
    fn session_advance_enforces_machine() {
        let mut session = Session::new("s1", "Add export", vec![]);
        assert!(session.advance(SessionStage::TypeDetected).is_ok());
        assert!(session.advance(SessionStage::PlanReady).is_err());
        assert_eq!(session.stage, SessionStage::TypeDetected);
    }

    // -- ClassificationResult invariant --------------------------------------

    fn classification(status: ClarityStatus, questions: Vec<Question>) -> ClassificationResult {
        ClassificationResult {
            task_type: TaskType::New,
            keywords: vec!["export".to_string()],
            status,
            questions,
            confidence_score: Some(90),
            reasoning: String::new(),
            evidence: Vec::new(),
        }
    }

    #[test]
    fn ambiguous_requires_questions() {
        let result = classification(ClarityStatus::Ambiguous, vec![]);
        assert!(result.validate().is_err());
    }

    #[test]
    fn clear_requires_no_questions() {
        let q = Question {
            question: "Which format?".to_string(),
            explanation: String::new(),
            impact: String::new(),
            options: vec![],
        };
        let result = classification(ClarityStatus::Clear, vec![q]);
        assert!(result.validate().is_err());
    }

    #[test]
    fn matched_status_and_questions_pass() {
        assert!(classification(ClarityStatus::Clear, vec![]).validate().is_ok());
        let q = Question {
            question: "Batch or realtime?".to_string(),
            explanation: String::new(),
            impact: String::new(),
            options: vec![],
        };
        assert!(classification(ClarityStatus::Ambiguous, vec![q])
            .validate()
            .is_ok());
    }

    // -- Plan validation -----------------------------------------------------

    #[test]
    fn empty_plan_is_rejected() {
        let plan = plan_with(vec![]);
        assert!(plan.validate(day(1)).is_err());
    }

    #[test]
    fn deadline_before_anchor_is_rejected() {
        let plan = plan_with(vec![subtask("a", day(1), 4.0)]);
        assert!(plan.validate(day(2)).is_err());
        assert!(plan.validate(day(1)).is_ok());
    }

    #[test]
    fn zero_hours_is_rejected() {
        let plan = plan_with(vec![subtask("a", day(2), 0.0)]);
        assert!(plan.validate(day(1)).is_err());
    }

    #[test]
    fn dangling_dependency_is_rejected() {
        let mut a = subtask("a", day(2), 4.0);
        a.dependencies = vec!["missing".to_string()];
        let plan = plan_with(vec![a, subtask("b", day(3), 2.0)]);
        assert!(plan.validate(day(1)).is_err());
    }

    #[test]
    fn self_dependency_is_rejected() {
        let mut a = subtask("a", day(2), 4.0);
        a.dependencies = vec!["a".to_string()];
        let plan = plan_with(vec![a]);
        assert!(plan.validate(day(1)).is_err());
    }

    #[test]
    fn resolvable_dependencies_pass() {
        let mut b = subtask("b", day(3), 2.0);
        b.dependencies = vec!["a".to_string()];
        let plan = plan_with(vec![subtask("a", day(2), 4.0), b]);
        assert!(plan.validate(day(1)).is_ok());
    }

    // -- Team member availability --------------------------------------------

    fn member(load: f64, capacity: f64) -> TeamMember {
        TeamMember {
            name: "Alice".to_string(),
            email: String::new(),
            role: "Backend Developer".to_string(),
            skills: vec![],
            expertise: vec![],
            current_load: load,
            capacity,
        }
    }

    #[test]
    fn member_status_thresholds() {
        assert_eq!(member(0.0, 40.0).status(), MemberStatus::Idle);
        assert_eq!(member(20.0, 40.0).status(), MemberStatus::Idle);
        assert_eq!(member(25.0, 40.0).status(), MemberStatus::Busy);
        assert_eq!(member(40.0, 40.0).status(), MemberStatus::Overloaded);
        assert_eq!(member(60.0, 40.0).status(), MemberStatus::Overloaded);
    }

    #[test]
    fn idle_hours_never_negative() {
        assert_eq!(member(60.0, 40.0).idle_hours(), 0.0);
        assert_eq!(member(10.0, 40.0).idle_hours(), 30.0);
    }

    // -- Serde ---------------------------------------------------------------

    #[test]
    fn task_type_serde_lowercase() {
        assert_eq!(serde_json::to_string(&TaskType::New).unwrap(), "\"new\"");
        assert_eq!(serde_json::to_string(&TaskType::Both).unwrap(), "\"both\"");
        let t: TaskType = serde_json::from_str("\"update\"").unwrap();
        assert_eq!(t, TaskType::Update);
    }

    #[test]
    fn module_summary_accepts_source_field_names() {
        let json = r#"{"module_name": "reports", "description": "report pages", "files": ["src/reports.py"]}"#;
        let m: ModuleSummary = serde_json::from_str(json).unwrap();
        assert_eq!(m.name, "reports");
        assert_eq!(m.relevant_files, vec!["src/reports.py"]);
    }

    #[test]
    fn subtask_deadline_serde_roundtrip() {
        let s = subtask("a", day(15), 4.0);
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"2025-06-15\""));
        let back: Subtask = serde_json::from_str(&json).unwrap();
        assert_eq!(back.deadline, day(15));
    }
}
