//! Plan generator.
//!
//! Turns a clarified task (plus any clarification answers) into an ordered,
//! validated, assigned set of subtasks. Deadlines are computed against a
//! caller-supplied anchor date so plans stay deterministic and testable —
//! the generation service's own notion of time is never trusted. A plan
//! that fails validation is rejected before anything is persisted; an
//! empty plan is an error, never an empty success.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use tracing::info;

use tw_core::history::{HistoryEntry, HistoryStore};
use tw_core::types::{
    ClassificationResult, Complexity, Plan, RepositoryContext, SessionStage, Subtask, TaskType,
    TeamMember,
};

use crate::context::ContextAnalyzer;
use crate::extract::extract_json;
use crate::generate::{GenerationParams, TextGenerator};
use crate::matcher::match_members;
use crate::{prompts, PipelineError};

// ---------------------------------------------------------------------------
// Wire payloads
// ---------------------------------------------------------------------------

/// Estimated hours come back from the service as a number or a numeric
/// string; both are accepted and normalized.
fn de_hours<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid estimated_hours '{s}'"))),
    }
}

#[derive(Debug, Deserialize)]
struct RawSubtask {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    role: String,
    deadline: NaiveDate,
    #[serde(deserialize_with = "de_hours")]
    estimated_hours: f64,
    #[serde(default)]
    timeline: String,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    files_to_create: Vec<String>,
    #[serde(default)]
    files_to_modify: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    main_task: String,
    #[serde(default)]
    goal: String,
    #[serde(default)]
    complexity: Option<Complexity>,
    #[serde(default)]
    estimated_duration: String,
    #[serde(default)]
    subtasks: Vec<RawSubtask>,
}

// ---------------------------------------------------------------------------
// PlanGenerator
// ---------------------------------------------------------------------------

pub struct PlanGenerator {
    analyzer: ContextAnalyzer,
    generator: Arc<dyn TextGenerator>,
    store: Arc<HistoryStore>,
    model: String,
}

impl PlanGenerator {
    pub fn new(
        analyzer: ContextAnalyzer,
        generator: Arc<dyn TextGenerator>,
        store: Arc<HistoryStore>,
    ) -> Self {
        Self {
            analyzer,
            generator,
            store,
            model: GenerationParams::default().model,
        }
    }

    /// Override the model used for planning calls.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Generate, validate, and assign a plan for a previously classified
    /// session. `answers` carries the caller's clarification responses when
    /// the classification came back ambiguous.
    pub async fn generate(
        &self,
        session_id: &str,
        answers: Option<&[(String, String)]>,
        team: &[TeamMember],
        anchor: NaiveDate,
    ) -> Result<Plan, PipelineError> {
        let mut session = self
            .store
            .load_session(session_id)?
            .ok_or_else(|| PipelineError::SessionNotFound(session_id.to_string()))?;

        let classification: Option<ClassificationResult> = session.current.clone();
        let (task_type, evidence) = match &classification {
            Some(c) => (c.task_type, c.evidence.as_slice()),
            None => (TaskType::New, [].as_slice()),
        };

        info!(
            session_id,
            task = %session.task,
            %task_type,
            answers = answers.map(|a| a.len()).unwrap_or(0),
            team = team.len(),
            "generating implementation plan"
        );

        // Re-read the contexts used for classification; these are cache
        // hits in the normal flow.
        let mut contexts: Vec<RepositoryContext> = Vec::new();
        for key in &session.repos {
            contexts.push(self.analyzer.analyze(key).await?);
        }

        let prompt = prompts::plan_generation(
            &session.task,
            task_type,
            answers,
            evidence,
            &contexts,
            team,
            anchor,
        );
        let params = GenerationParams::new(self.model.as_str(), 0.6, 2048);
        let output = self.generator.generate(&prompt, &params).await?;

        let value = extract_json(&output.text, "plan generation")?;
        let raw: RawPlan = serde_json::from_value(value)
            .map_err(|e| PipelineError::Validation(format!("plan generation: {e}")))?;

        let mut plan = Plan {
            main_task: raw.main_task,
            goal: raw.goal,
            task_type,
            complexity: raw.complexity.unwrap_or(Complexity::Medium),
            estimated_duration: raw.estimated_duration,
            subtasks: raw
                .subtasks
                .into_iter()
                .map(|s| Subtask {
                    title: s.title,
                    description: s.description,
                    role: s.role,
                    assigned_to: Subtask::unassigned(),
                    deadline: s.deadline,
                    estimated_hours: s.estimated_hours,
                    timeline: s.timeline,
                    dependencies: s.dependencies,
                    files_to_create: s.files_to_create,
                    files_to_modify: s.files_to_modify,
                })
                .collect(),
        };

        plan.validate(anchor)?;

        // Deterministic assignment: best scorer per subtask, or the
        // "Unassigned" sentinel when nobody scores.
        for subtask in &mut plan.subtasks {
            let matches = match_members(subtask, team);
            if let Some(best) = matches.first() {
                subtask.assigned_to = best.member.name.clone();
            }
        }

        if session.stage != SessionStage::PlanReady {
            session.advance(SessionStage::PlanReady)?;
        }
        self.store.save_session(&session)?;
        self.store
            .append_history(session_id, HistoryEntry::plan(session.task.as_str(), plan.clone()))?;

        info!(
            session_id,
            subtasks = plan.subtasks.len(),
            complexity = ?plan.complexity,
            "plan generated"
        );
        Ok(plan)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::MockGenerator;
    use std::sync::Arc;
    use tw_core::context_cache::ContextCache;
    use tw_core::types::{ClarityStatus, Session};
    use tw_integrations::github::mock::MockRepoHost;
    use tw_integrations::github::RepoHost;

    fn harness(
        generator: MockGenerator,
    ) -> (PlanGenerator, Arc<HistoryStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ContextCache::new(dir.path().join("contexts")));
        let store = Arc::new(HistoryStore::new(dir.path().join("sessions")));
        let host: Arc<dyn RepoHost> = Arc::new(MockRepoHost::new());
        let generator: Arc<dyn TextGenerator> = Arc::new(generator);
        let analyzer = ContextAnalyzer::new(host, generator.clone(), cache);
        let planner = PlanGenerator::new(analyzer, generator, store.clone());
        (planner, store, dir)
    }

    fn anchor() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    /// Seed a session that already went through classification. No repos
    /// are attached so the planner needs no host traffic.
    fn seed_session(store: &HistoryStore, id: &str, status: ClarityStatus) {
        let mut session = Session::new(id, "Add CSV export to the reports page", vec![]);
        session.stage = match status {
            ClarityStatus::Clear => SessionStage::PlanReady,
            ClarityStatus::Ambiguous => SessionStage::AwaitingAnswers,
        };
        session.current = Some(ClassificationResult {
            task_type: TaskType::New,
            keywords: vec!["export".to_string()],
            status,
            questions: vec![],
            confidence_score: Some(90),
            reasoning: String::new(),
            evidence: vec![],
        });
        store.save_session(&session).unwrap();
    }

    fn team() -> Vec<TeamMember> {
        vec![
            TeamMember {
                name: "Alice".to_string(),
                email: String::new(),
                role: "Backend Developer".to_string(),
                skills: vec!["python".to_string(), "flask".to_string()],
                expertise: vec![],
                current_load: 0.0,
                capacity: 40.0,
            },
            TeamMember {
                name: "Bob".to_string(),
                email: String::new(),
                role: "Designer".to_string(),
                skills: vec!["figma".to_string()],
                expertise: vec![],
                current_load: 39.0,
                capacity: 40.0,
            },
        ]
    }

    const PLAN_JSON: &str = r#"{
        "main_task": "Add CSV export",
        "goal": "Users can download reports as CSV",
        "complexity": "medium",
        "estimated_duration": "3 days",
        "subtasks": [
            {
                "title": "Build export service",
                "description": "Add a python flask service that renders rows to csv",
                "role": "Backend Developer",
                "deadline": "2025-06-03",
                "estimated_hours": 6,
                "timeline": "1 day",
                "dependencies": [],
                "files_to_create": ["app/export.py"],
                "files_to_modify": []
            },
            {
                "title": "Wire export button",
                "description": "Expose the new endpoint on the reports page",
                "role": "Backend Developer",
                "deadline": "2025-06-04",
                "estimated_hours": "4",
                "timeline": "1 day",
                "dependencies": ["Build export service"],
                "files_to_create": [],
                "files_to_modify": ["app/reports.py"]
            }
        ]
    }"#;

    #[tokio::test]
    async fn plan_is_parsed_validated_and_assigned() {
        let generator = MockGenerator::new().with_text(PLAN_JSON);
        let (planner, store, _dir) = harness(generator);
        seed_session(&store, "s1", ClarityStatus::Clear);

        let plan = planner.generate("s1", None, &team(), anchor()).await.unwrap();

        assert_eq!(plan.subtasks.len(), 2);
        assert_eq!(plan.task_type, TaskType::New);
        // String hours were normalized.
        assert_eq!(plan.subtasks[1].estimated_hours, 4.0);
        // Alice matches skills + role; Bob never beats her.
        assert_eq!(plan.subtasks[0].assigned_to, "Alice");
        // The plan landed in history.
        let history = store.history("s1").unwrap();
        assert_eq!(history.entries.len(), 1);
        assert!(history.entries[0].plan.is_some());
    }

    #[tokio::test]
    async fn unknown_session_is_an_error() {
        let generator = MockGenerator::new().with_text(PLAN_JSON);
        let (planner, _store, _dir) = harness(generator);

        let err = planner.generate("missing", None, &[], anchor()).await.unwrap_err();
        assert!(matches!(err, PipelineError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn empty_plan_is_rejected() {
        let generator = MockGenerator::new()
            .with_text(r#"{"main_task": "x", "goal": "", "complexity": "low", "subtasks": []}"#);
        let (planner, store, _dir) = harness(generator);
        seed_session(&store, "s1", ClarityStatus::Clear);

        let err = planner.generate("s1", None, &[], anchor()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        // A rejected plan is never persisted.
        assert!(store.history("s1").unwrap().entries.is_empty());
    }

    #[tokio::test]
    async fn deadline_before_anchor_is_rejected() {
        let generator = MockGenerator::new().with_text(
            r#"{"main_task": "x", "subtasks": [
                {"title": "late", "deadline": "2025-05-20", "estimated_hours": 4}
            ]}"#,
        );
        let (planner, store, _dir) = harness(generator);
        seed_session(&store, "s1", ClarityStatus::Clear);

        let err = planner.generate("s1", None, &[], anchor()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn dangling_dependency_is_rejected() {
        let generator = MockGenerator::new().with_text(
            r#"{"main_task": "x", "subtasks": [
                {"title": "a", "deadline": "2025-06-03", "estimated_hours": 4, "dependencies": ["ghost step"]}
            ]}"#,
        );
        let (planner, store, _dir) = harness(generator);
        seed_session(&store, "s1", ClarityStatus::Clear);

        let err = planner.generate("s1", None, &[], anchor()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn no_scoring_member_leaves_unassigned() {
        let generator = MockGenerator::new().with_text(
            r#"{"main_task": "x", "subtasks": [
                {"title": "Migrate billing", "description": "stripe invoices", "role": "Payments Engineer",
                 "deadline": "2025-06-03", "estimated_hours": 8}
            ]}"#,
        );
        let (planner, store, _dir) = harness(generator);
        seed_session(&store, "s1", ClarityStatus::Clear);

        // Fully loaded designer: no skill, role, or idle points.
        let team = vec![TeamMember {
            name: "Dave".to_string(),
            email: String::new(),
            role: "Designer".to_string(),
            skills: vec!["figma".to_string()],
            expertise: vec![],
            current_load: 40.0,
            capacity: 40.0,
        }];

        let plan = planner.generate("s1", None, &team, anchor()).await.unwrap();
        assert_eq!(plan.subtasks[0].assigned_to, "Unassigned");
    }

    #[tokio::test]
    async fn answers_resume_an_ambiguous_session() {
        let generator = MockGenerator::new().with_text(PLAN_JSON);
        let (planner, store, _dir) = harness(generator);
        seed_session(&store, "s1", ClarityStatus::Ambiguous);

        let answers = vec![("Daily or weekly?".to_string(), "Daily".to_string())];
        let plan = planner
            .generate("s1", Some(&answers), &team(), anchor())
            .await
            .unwrap();
        assert_eq!(plan.subtasks.len(), 2);

        // The session resumed from AwaitingAnswers to PlanReady.
        let session = store.load_session("s1").unwrap().unwrap();
        assert_eq!(session.stage, SessionStage::PlanReady);
    }

    #[tokio::test]
    async fn prompt_carries_answers_and_anchor() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ContextCache::new(dir.path().join("contexts")));
        let store = Arc::new(HistoryStore::new(dir.path().join("sessions")));
        let host: Arc<dyn RepoHost> = Arc::new(MockRepoHost::new());
        // Keep a concrete handle on the mock so captured prompts stay
        // inspectable after it is shared as a trait object.
        let mock = Arc::new(MockGenerator::new().with_text(PLAN_JSON));
        let generator: Arc<dyn TextGenerator> = mock.clone();
        let analyzer = ContextAnalyzer::new(host, generator.clone(), cache);
        let planner = PlanGenerator::new(analyzer, generator, store.clone());
        seed_session(&store, "s1", ClarityStatus::Ambiguous);

        let answers = vec![("Format?".to_string(), "CSV".to_string())];
        planner
            .generate("s1", Some(&answers), &[], anchor())
            .await
            .unwrap();

        let captured = mock.captured();
        assert_eq!(captured.len(), 1);
        let (prompt, params) = &captured[0];
        assert!(prompt.contains("CURRENT DATE: 2025-06-01"));
        assert!(prompt.contains("Format?: CSV"));
        assert!((params.temperature - 0.6).abs() < f32::EPSILON);
        assert_eq!(params.max_tokens, 2048);
    }
}
