//! Task classifier & ambiguity resolver.
//!
//! Orchestrates the per-session state machine:
//! `Received → TypeDetected → EvidenceGathered → ClarityAssessed →
//! {AwaitingAnswers | PlanReady}`. Two generation calls (type detection,
//! clarity assessment) are grounded in the cached repository contexts and
//! the evidence sweep between them. Both branches of the clarity outcome
//! persist the session and append to history.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use tw_core::history::{HistoryEntry, HistoryStore};
use tw_core::types::{
    ClarityStatus, ClassificationResult, Question, RepoKey, RepositoryContext, Session,
    SessionStage, TaskType,
};
use tw_integrations::github::RepoHost;

use crate::context::ContextAnalyzer;
use crate::evidence::search_evidence;
use crate::extract::extract_json;
use crate::generate::{GenerationParams, TextGenerator};
use crate::{prompts, PipelineError};

// ---------------------------------------------------------------------------
// Wire payloads
// ---------------------------------------------------------------------------

/// First call: task type and search keywords.
#[derive(Debug, Deserialize)]
struct TypeDetection {
    task_type: TaskType,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    reasoning: String,
}

/// Second call: clear vs ambiguous, with questions when ambiguous.
#[derive(Debug, Deserialize)]
struct ClarityAssessment {
    status: ClarityStatus,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    confidence_score: Option<u32>,
    #[serde(default)]
    questions: Vec<Question>,
}

// ---------------------------------------------------------------------------
// TaskClassifier
// ---------------------------------------------------------------------------

pub struct TaskClassifier {
    analyzer: ContextAnalyzer,
    host: Arc<dyn RepoHost>,
    generator: Arc<dyn TextGenerator>,
    store: Arc<HistoryStore>,
    model: String,
}

impl TaskClassifier {
    pub fn new(
        analyzer: ContextAnalyzer,
        host: Arc<dyn RepoHost>,
        generator: Arc<dyn TextGenerator>,
        store: Arc<HistoryStore>,
    ) -> Self {
        Self {
            analyzer,
            host,
            generator,
            store,
            model: GenerationParams::default().model,
        }
    }

    /// Override the model used for classification calls.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Run the full classification pipeline for one task.
    ///
    /// Creates (or replaces) the session for `session_id`, walks it through
    /// the state machine, and returns the merged classification. An
    /// ambiguous outcome parks the session at `AwaitingAnswers` — the
    /// caller renders the questions and later resumes via the plan
    /// generator with the collected answers.
    pub async fn classify(
        &self,
        session_id: &str,
        task: &str,
        repos: &[RepoKey],
    ) -> Result<ClassificationResult, PipelineError> {
        info!(session_id, task, repos = repos.len(), "classification started");
        let mut session = Session::new(session_id, task, repos.to_vec());

        // Ground both generation calls in the cached repository contexts.
        let mut contexts: Vec<RepositoryContext> = Vec::new();
        for key in repos {
            contexts.push(self.analyzer.analyze(key).await?);
        }

        // Received -> TypeDetected. A parse failure here is fatal for the
        // request; there is no safe default task type.
        let detection = self.detect_type(task, &contexts).await?;
        session.advance(SessionStage::TypeDetected)?;
        info!(
            session_id,
            task_type = %detection.task_type,
            keywords = ?detection.keywords,
            "task type detected"
        );

        // TypeDetected -> EvidenceGathered. Only update/both tasks warrant
        // a search; for new features the evidence is empty by construction.
        let evidence = if detection.task_type.needs_evidence() && !repos.is_empty() {
            search_evidence(self.host.as_ref(), &repos[0], &detection.keywords).await
        } else {
            Vec::new()
        };
        session.advance(SessionStage::EvidenceGathered)?;
        if detection.task_type.needs_evidence() && evidence.is_empty() {
            warn!(session_id, "no existing code found for an update task");
        }

        // EvidenceGathered -> ClarityAssessed.
        let assessment = self
            .assess_clarity(task, &detection, &contexts, &evidence)
            .await?;
        session.advance(SessionStage::ClarityAssessed)?;

        let result = ClassificationResult {
            task_type: detection.task_type,
            keywords: detection.keywords,
            status: assessment.status,
            questions: assessment.questions,
            confidence_score: assessment.confidence_score,
            reasoning: assessment.reasoning,
            evidence,
        };

        // Reject ambiguous-without-questions (and clear-with-questions)
        // before anything is persisted or returned.
        result.validate()?;

        let next = match result.status {
            ClarityStatus::Ambiguous => SessionStage::AwaitingAnswers,
            ClarityStatus::Clear => SessionStage::PlanReady,
        };
        session.set_classification(result.clone());
        session.advance(next)?;

        // Both branches are persisted and logged.
        self.store.save_session(&session)?;
        self.store
            .append_history(session_id, HistoryEntry::analysis(task, result.clone()))?;

        match result.status {
            ClarityStatus::Ambiguous => info!(
                session_id,
                questions = result.questions.len(),
                "clarification required"
            ),
            ClarityStatus::Clear => info!(
                session_id,
                confidence = ?result.confidence_score,
                "task is clear, ready for planning"
            ),
        }

        Ok(result)
    }

    async fn detect_type(
        &self,
        task: &str,
        contexts: &[RepositoryContext],
    ) -> Result<TypeDetection, PipelineError> {
        let prompt = prompts::type_detection(task, contexts);
        let params = GenerationParams::new(self.model.as_str(), 0.3, 512);
        let output = self.generator.generate(&prompt, &params).await?;

        let value = extract_json(&output.text, "type detection")?;
        serde_json::from_value(value)
            .map_err(|e| PipelineError::Validation(format!("type detection: {e}")))
    }

    async fn assess_clarity(
        &self,
        task: &str,
        detection: &TypeDetection,
        contexts: &[RepositoryContext],
        evidence: &[tw_core::types::Evidence],
    ) -> Result<ClarityAssessment, PipelineError> {
        let prompt = prompts::clarity_assessment(
            task,
            detection.task_type,
            &detection.keywords,
            &detection.reasoning,
            contexts,
            evidence,
        );
        let params = GenerationParams::new(self.model.as_str(), 0.2, 512);
        let output = self.generator.generate(&prompt, &params).await?;

        let value = extract_json(&output.text, "clarity assessment")?;
        serde_json::from_value(value)
            .map_err(|e| PipelineError::Validation(format!("clarity assessment: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::MockGenerator;
    use tw_core::context_cache::ContextCache;
    use tw_integrations::github::mock::MockRepoHost;
    use tw_integrations::github::CodeMatch;

    const ANALYSIS_JSON: &str = r#"{
        "project_summary": "A reporting dashboard",
        "architecture_overview": "Flask monolith",
        "tech_stack": {"primary_language": "python", "backend_framework": "Flask", "databases": ["MongoDB"]},
        "key_modules": [{"name": "reports", "description": "report pages", "relevant_files": ["app/reports.py"]}],
        "api_surface": {"has_api": true, "endpoints": ["/reports"], "authentication": "JWT"}
    }"#;

    fn harness(
        generator: MockGenerator,
        host: MockRepoHost,
    ) -> (TaskClassifier, Arc<HistoryStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ContextCache::new(dir.path().join("contexts")));
        let store = Arc::new(HistoryStore::new(dir.path().join("sessions")));
        let host: Arc<dyn RepoHost> = Arc::new(host);
        let generator: Arc<dyn TextGenerator> = Arc::new(generator);
        let analyzer = ContextAnalyzer::new(host.clone(), generator.clone(), cache);
        let classifier = TaskClassifier::new(analyzer, host, generator, store.clone());
        (classifier, store, dir)
    }

    fn seeded_host() -> MockRepoHost {
        MockRepoHost::new()
            .with_tree("main", &["app/reports.py", "app/models.py", "requirements.txt"])
            .with_file("README.md", "# Dashboard")
            .with_file("requirements.txt", "flask\npymongo")
    }

    #[tokio::test]
    async fn clear_new_task_reaches_plan_ready() {
        let generator = MockGenerator::new()
            .with_text(ANALYSIS_JSON)
            .with_text(r#"{"task_type": "new", "keywords": ["export", "csv"], "reasoning": "no export exists"}"#)
            .with_text(r#"{"status": "clear", "reasoning": "context is sufficient", "confidence_score": 92, "questions": []}"#);
        let (classifier, store, _dir) = harness(generator, seeded_host());

        let result = classifier
            .classify("s1", "Add CSV export to the reports page", &[RepoKey::new("acme", "widgets")])
            .await
            .unwrap();

        assert_eq!(result.task_type, TaskType::New);
        assert_eq!(result.status, ClarityStatus::Clear);
        assert!(result.questions.is_empty());
        // New features skip the evidence search.
        assert!(result.evidence.is_empty());

        let session = store.load_session("s1").unwrap().unwrap();
        assert_eq!(session.stage, SessionStage::PlanReady);
        assert_eq!(store.history("s1").unwrap().entries.len(), 1);
    }

    #[tokio::test]
    async fn ambiguous_task_parks_at_awaiting_answers() {
        let generator = MockGenerator::new()
            .with_text(ANALYSIS_JSON)
            .with_text(r#"{"task_type": "update", "keywords": ["report"], "reasoning": "modifies reports"}"#)
            .with_text(r#"{"status": "ambiguous", "reasoning": "scope unclear", "confidence_score": 55,
                "questions": [{"question": "Daily or weekly reports?", "explanation": "both exist", "impact": "changes the data model", "options": ["daily", "weekly"]}]}"#);
        let host = seeded_host().with_matches(
            "report",
            vec![CodeMatch {
                path: "app/reports.py".to_string(),
                url: "https://example.com/reports".to_string(),
            }],
        );
        let (classifier, store, _dir) = harness(generator, host);

        let result = classifier
            .classify("s2", "Improve the reports", &[RepoKey::new("acme", "widgets")])
            .await
            .unwrap();

        assert_eq!(result.status, ClarityStatus::Ambiguous);
        assert_eq!(result.questions.len(), 1);
        assert_eq!(result.evidence.len(), 1);

        let session = store.load_session("s2").unwrap().unwrap();
        assert_eq!(session.stage, SessionStage::AwaitingAnswers);
        assert!(session.current.is_some());
        // The ambiguous branch is logged too.
        assert_eq!(store.history("s2").unwrap().entries.len(), 1);
    }

    #[tokio::test]
    async fn unparsable_type_detection_is_fatal() {
        let generator = MockGenerator::new()
            .with_text(ANALYSIS_JSON)
            .with_text("I could not decide on a task type, sorry!");
        let (classifier, store, _dir) = harness(generator, seeded_host());

        let err = classifier
            .classify("s3", "Do something", &[RepoKey::new("acme", "widgets")])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Extract(_)));

        // Nothing is persisted for a failed classification.
        assert!(store.load_session("s3").unwrap().is_none());
        assert!(store.history("s3").unwrap().entries.is_empty());
    }

    #[tokio::test]
    async fn ambiguous_without_questions_is_rejected() {
        let generator = MockGenerator::new()
            .with_text(ANALYSIS_JSON)
            .with_text(r#"{"task_type": "new", "keywords": [], "reasoning": ""}"#)
            .with_text(r#"{"status": "ambiguous", "reasoning": "unsure", "questions": []}"#);
        let (classifier, store, _dir) = harness(generator, seeded_host());

        let err = classifier
            .classify("s4", "Vague request", &[RepoKey::new("acme", "widgets")])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(store.load_session("s4").unwrap().is_none());
    }

    #[tokio::test]
    async fn update_task_searches_first_repo_only() {
        let generator = MockGenerator::new()
            .with_text(ANALYSIS_JSON)
            .with_text(ANALYSIS_JSON)
            .with_text(r#"{"task_type": "update", "keywords": ["export"], "reasoning": ""}"#)
            .with_text(r#"{"status": "clear", "reasoning": "", "questions": []}"#);
        let host = seeded_host().with_matches(
            "export",
            vec![CodeMatch {
                path: "app/export.py".to_string(),
                url: "https://example.com/e".to_string(),
            }],
        );
        let (classifier, _store, _dir) = harness(generator, host);

        let result = classifier
            .classify(
                "s5",
                "Update the export",
                &[RepoKey::new("acme", "widgets"), RepoKey::new("acme", "gadgets")],
            )
            .await
            .unwrap();

        assert_eq!(result.evidence.len(), 1);
        assert_eq!(result.evidence[0].file, "app/export.py");
    }

    #[tokio::test]
    async fn second_classification_replaces_current_pointer() {
        let generator = MockGenerator::new()
            .with_text(ANALYSIS_JSON)
            .with_text(r#"{"task_type": "new", "keywords": ["a"], "reasoning": "first"}"#)
            .with_text(r#"{"status": "clear", "reasoning": "first", "questions": []}"#)
            .with_text(r#"{"task_type": "new", "keywords": ["b"], "reasoning": "second"}"#)
            .with_text(r#"{"status": "clear", "reasoning": "second", "questions": []}"#);
        let (classifier, store, _dir) = harness(generator, seeded_host());
        let repos = [RepoKey::new("acme", "widgets")];

        classifier.classify("s6", "First take", &repos).await.unwrap();
        classifier.classify("s6", "Second take", &repos).await.unwrap();

        let session = store.load_session("s6").unwrap().unwrap();
        assert_eq!(session.task, "Second take");
        assert_eq!(session.current.unwrap().reasoning, "second");
        // History keeps both runs.
        assert_eq!(store.history("s6").unwrap().entries.len(), 2);
    }
}
