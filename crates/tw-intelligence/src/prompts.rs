//! Prompt builders for the pipeline's generation calls.
//!
//! Every prompt demands bare JSON (no markdown, no trailing commas) because
//! the extractor downstream still has to assume the service ignores that.
//! Truncation caps keep prompts bounded on large repositories.

use chrono::NaiveDate;
use tw_core::types::{Evidence, RepoKey, RepositoryContext, TaskType, TeamMember};

/// Maximum number of tree paths included in an analysis prompt.
pub const MAX_PROMPT_FILES: usize = 100;
/// Maximum README characters included in an analysis prompt.
pub const MAX_README_CHARS: usize = 3000;
/// Maximum characters of each manifest file included in an analysis prompt.
pub const MAX_MANIFEST_CHARS: usize = 1500;
/// Maximum evidence files echoed into classification and planning prompts.
pub const MAX_EVIDENCE_FILES: usize = 5;

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

// ---------------------------------------------------------------------------
// Repository analysis
// ---------------------------------------------------------------------------

/// Prompt for the one-shot deep repository analysis.
pub fn repository_analysis(
    key: &RepoKey,
    files: &[String],
    readme: &str,
    detected_languages: &[String],
    manifests: &[(String, String)],
) -> String {
    let file_list = files
        .iter()
        .take(MAX_PROMPT_FILES)
        .map(|f| format!("- {f}"))
        .collect::<Vec<_>>()
        .join("\n");

    let manifest_text = manifests
        .iter()
        .map(|(name, content)| {
            format!("--- {name} ---\n{}", truncate(content, MAX_MANIFEST_CHARS))
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a senior software architect. Analyze this repository and produce an accurate project context summary. Base every conclusion on the actual files listed — do not guess, and say "none" where nothing was detected.

REPOSITORY: {key}
TOTAL FILES: {total}
DETECTED LANGUAGES (from file extensions): {languages}

FILE TREE (first {cap} files):
{file_list}

DEPENDENCY MANIFESTS:
{manifest_text}

README:
{readme}

Respond with ONLY valid JSON — no markdown, no code fences, no trailing commas:
{{
  "project_summary": "one paragraph describing what this project does",
  "architecture_overview": "the architecture pattern actually observed",
  "tech_stack": {{
    "primary_language": "...",
    "secondary_languages": ["..."],
    "backend_framework": "... or null",
    "frontend_framework": "... or null",
    "databases": ["..."],
    "key_libraries": ["..."]
  }},
  "key_modules": [
    {{
      "name": "module name",
      "description": "what this module does",
      "relevant_files": ["3-5 most important file paths"]
    }}
  ],
  "api_surface": {{
    "has_api": true,
    "endpoints": ["endpoints actually found, or empty"],
    "authentication": "auth method detected or null"
  }}
}}"#,
        key = key,
        total = files.len(),
        languages = join_or_none(detected_languages),
        cap = MAX_PROMPT_FILES,
        file_list = file_list,
        manifest_text = if manifest_text.is_empty() {
            "(none found)".to_string()
        } else {
            manifest_text
        },
        readme = if readme.is_empty() {
            "(no README)"
        } else {
            truncate(readme, MAX_README_CHARS)
        },
    )
}

// ---------------------------------------------------------------------------
// Type detection
// ---------------------------------------------------------------------------

/// Prompt for classifying a task as new / update / both and extracting
/// search keywords.
pub fn type_detection(task: &str, contexts: &[RepositoryContext]) -> String {
    format!(
        r#"Analyze this task with full project context.

{context}

Task: "{task}"

Determine:
1. Is this adding a NEW feature that does not exist yet?
2. Is this UPDATING or MODIFYING an existing feature?
3. Is it BOTH (adding new and modifying existing)?

Extract keywords that might exist in the codebase (e.g. "dashboard", "payment", "login").

Return ONLY valid JSON. No markdown, no code fences, no trailing commas:
{{
  "task_type": "new" | "update" | "both",
  "keywords": ["keyword1", "keyword2"],
  "reasoning": "brief explanation"
}}"#,
        context = combined_context(contexts),
        task = task,
    )
}

// ---------------------------------------------------------------------------
// Clarity assessment
// ---------------------------------------------------------------------------

/// Prompt for deciding clear vs ambiguous and producing at most two
/// business-logic questions.
pub fn clarity_assessment(
    task: &str,
    task_type: TaskType,
    keywords: &[String],
    type_reasoning: &str,
    contexts: &[RepositoryContext],
    evidence: &[Evidence],
) -> String {
    let findings = if evidence.is_empty() {
        match task_type {
            TaskType::Update | TaskType::Both => {
                "WARNING: the task mentions existing features, but NO related code was found."
                    .to_string()
            }
            TaskType::New => "No existing code was searched (new feature).".to_string(),
        }
    } else {
        let files = evidence
            .iter()
            .take(MAX_EVIDENCE_FILES)
            .map(|e| format!("- {} (contains '{}')", e.file, e.keyword))
            .collect::<Vec<_>>()
            .join("\n");
        format!("EXISTING CODE FOUND:\n{files}")
    };

    format!(
        r#"You are a senior technical architect. Decide whether this task needs clarification given the project context below.

TASK: "{task}"
TASK TYPE: {task_type}
KEYWORDS: {keywords}
TYPE REASONING: {type_reasoning}

{context}

{findings}

RULES:
1. With this much project context, the large majority of tasks should be clear without questions.
2. Ask questions only for genuine business or functional ambiguity.
3. Never ask about technology choices, frameworks, databases, code structure, or naming — all of that is already detected or follows existing patterns.
4. At most 2 questions, and only when the answer significantly changes the implementation.

GOOD question: "Should usage tracking be real-time or batch processed?"
BAD question: "What database should we use?" (already detected)

Return ONLY valid JSON. No markdown, no code fences, no trailing commas:
{{
  "status": "clear" | "ambiguous",
  "reasoning": "why clarification is or is not needed",
  "confidence_score": 85,
  "questions": [
    {{
      "question": "business-focused question that cannot be inferred from the codebase",
      "explanation": "why this cannot be determined from existing code",
      "impact": "how the answer changes the implementation",
      "options": ["Option A", "Option B"]
    }}
  ]
}}
If status is "clear", questions MUST be an empty array."#,
        task = task,
        task_type = task_type,
        keywords = keywords.join(", "),
        type_reasoning = type_reasoning,
        context = combined_context(contexts),
        findings = findings,
    )
}

// ---------------------------------------------------------------------------
// Plan generation
// ---------------------------------------------------------------------------

/// Prompt for generating the implementation plan.
#[allow(clippy::too_many_arguments)]
pub fn plan_generation(
    task: &str,
    task_type: TaskType,
    answers: Option<&[(String, String)]>,
    evidence: &[Evidence],
    contexts: &[RepositoryContext],
    team: &[TeamMember],
    anchor: NaiveDate,
) -> String {
    let answers_text = match answers {
        Some(pairs) if !pairs.is_empty() => {
            let lines = pairs
                .iter()
                .map(|(q, a)| format!("- {q}: {a}"))
                .collect::<Vec<_>>()
                .join("\n");
            format!("\nCLARIFICATIONS PROVIDED:\n{lines}\n")
        }
        _ => String::new(),
    };

    let findings_text = if evidence.is_empty() {
        String::new()
    } else {
        let files = evidence
            .iter()
            .take(MAX_EVIDENCE_FILES)
            .map(|e| format!("- {}", e.file))
            .collect::<Vec<_>>()
            .join("\n");
        format!("\nEXISTING CODE TO MODIFY:\n{files}\n")
    };

    // Roster lines carry only what matching needs: name, role, skills.
    let team_text = if team.is_empty() {
        String::new()
    } else {
        let lines = team
            .iter()
            .map(|m| format!("- {} ({}): {}", m.name, m.role, m.skills.join(", ")))
            .collect::<Vec<_>>()
            .join("\n");
        format!("\nAVAILABLE TEAM MEMBERS:\n{lines}\n")
    };

    format!(
        r#"You are a senior software architect. Create a precise implementation plan based on the ACTUAL project analysis below.

CURRENT DATE: {anchor} — use this as the starting point for every deadline calculation. Do not use any other notion of today.

TASK: "{task}"
TASK TYPE: {task_type}
{answers_text}{findings_text}{context}{team_text}

IMPLEMENTATION RULES:
1. Use only the technologies and patterns actually detected in the project.
2. Suggest file paths that match the existing project layout.
3. Assign roles matching the detected tech stack.

SUBTASK RULES:
- Generate only the subtasks this specific task actually needs; simple tasks may need 2-3, complex tasks 6-8. Never pad to a fixed count.
- Each subtask is a meaningful, atomic piece of work.
- "dependencies" entries must be the exact titles of other subtasks in this same plan.

DEADLINE RULES:
- Deadlines are calendar dates in YYYY-MM-DD format, computed by adding days to {anchor}.
- Simple subtasks (1-4 hours): 0-1 days out. Medium (4-8 hours): 1-2 days. Complex (8+ hours): 2-5 days.
- A subtask's deadline must not be earlier than the deadlines of its dependencies.
- "estimated_hours" is a plain number (e.g. 4, 8, 16).
- "timeline" is a human-readable duration (e.g. "2 days", "4 hours").

Return ONLY valid JSON — no markdown, no code fences, no trailing commas, descriptions under 200 characters:
{{
  "main_task": "task title using the project's own terminology",
  "goal": "specific objective achievable with the detected stack",
  "complexity": "low" | "medium" | "high",
  "estimated_duration": "X days",
  "subtasks": [
    {{
      "title": "short clear title",
      "description": "implementation steps with specific file paths",
      "role": "role for this work, e.g. Senior Python Developer",
      "deadline": "YYYY-MM-DD",
      "estimated_hours": 4,
      "timeline": "1 day",
      "dependencies": ["titles of prerequisite subtasks"],
      "files_to_create": ["new files with correct extensions"],
      "files_to_modify": ["existing files from the actual project structure"]
    }}
  ]
}}"#,
        anchor = anchor,
        task = task,
        task_type = task_type,
        answers_text = answers_text,
        findings_text = findings_text,
        context = combined_context(contexts),
        team_text = team_text,
    )
}

// ---------------------------------------------------------------------------
// Context serialization
// ---------------------------------------------------------------------------

/// Serialize one cached context into prompt text.
pub fn context_summary(ctx: &RepositoryContext) -> String {
    let modules = ctx
        .modules
        .iter()
        .take(5)
        .map(|m| format!("- {}: {}", m.name, m.description))
        .collect::<Vec<_>>()
        .join("\n");

    let endpoints = ctx
        .api_surface
        .endpoints
        .iter()
        .take(5)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"--- {key} ---
Summary: {summary}
Architecture: {arch}
Primary language: {lang}
Backend: {backend} / Frontend: {frontend}
Databases: {dbs}
Total files: {files}
Key modules:
{modules}
API endpoints: {endpoints}
Authentication: {auth}"#,
        key = ctx.key,
        summary = ctx.project_summary,
        arch = ctx.architecture_overview,
        lang = ctx.tech_stack.primary_language,
        backend = ctx.tech_stack.backend_framework.as_deref().unwrap_or("none"),
        frontend = ctx.tech_stack.frontend_framework.as_deref().unwrap_or("none"),
        dbs = join_or_none(&ctx.tech_stack.databases),
        files = ctx.metrics.file_count,
        modules = if modules.is_empty() { "(none)".to_string() } else { modules },
        endpoints = if endpoints.is_empty() { "none detected".to_string() } else { endpoints },
        auth = ctx.api_surface.authentication.as_deref().unwrap_or("unknown"),
    )
}

fn combined_context(contexts: &[RepositoryContext]) -> String {
    if contexts.is_empty() {
        return "PROJECT CONTEXT: (no repository analyzed)".to_string();
    }
    let blocks = contexts
        .iter()
        .map(context_summary)
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("PROJECT CONTEXT:\n{blocks}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tw_core::types::{ModuleSummary, RepoKey};

    fn context() -> RepositoryContext {
        let mut ctx = RepositoryContext::new(RepoKey::new("acme", "widgets"));
        ctx.project_summary = "An inventory dashboard".to_string();
        ctx.tech_stack.primary_language = "python".to_string();
        ctx.tech_stack.databases = vec!["MongoDB".to_string()];
        ctx.modules.push(ModuleSummary {
            name: "reports".to_string(),
            description: "report pages".to_string(),
            relevant_files: vec!["app/reports.py".to_string()],
        });
        ctx.metrics.file_count = 42;
        ctx
    }

    #[test]
    fn analysis_prompt_caps_file_list() {
        let files: Vec<String> = (0..500).map(|i| format!("src/file_{i}.py")).collect();
        let prompt = repository_analysis(
            &RepoKey::new("acme", "widgets"),
            &files,
            "",
            &["python".to_string()],
            &[],
        );
        assert!(prompt.contains("src/file_99.py"));
        assert!(!prompt.contains("src/file_100.py"));
        assert!(prompt.contains("TOTAL FILES: 500"));
    }

    #[test]
    fn analysis_prompt_truncates_readme() {
        let readme = "r".repeat(10_000);
        let prompt = repository_analysis(
            &RepoKey::new("acme", "widgets"),
            &[],
            &readme,
            &[],
            &[],
        );
        assert!(prompt.len() < readme.len());
    }

    #[test]
    fn type_detection_embeds_task_and_context() {
        let prompt = type_detection("Add CSV export to the reports page", &[context()]);
        assert!(prompt.contains("Add CSV export"));
        assert!(prompt.contains("acme/widgets"));
        assert!(prompt.contains("reports: report pages"));
    }

    #[test]
    fn clarity_prompt_flags_missing_evidence_for_updates() {
        let prompt = clarity_assessment(
            "Update the export",
            TaskType::Update,
            &["export".to_string()],
            "mentions existing feature",
            &[context()],
            &[],
        );
        assert!(prompt.contains("NO related code was found"));
    }

    #[test]
    fn clarity_prompt_lists_evidence() {
        let evidence = vec![Evidence {
            file: "app/export.py".to_string(),
            keyword: "export".to_string(),
            url: String::new(),
        }];
        let prompt = clarity_assessment(
            "Update the export",
            TaskType::Update,
            &["export".to_string()],
            "",
            &[context()],
            &evidence,
        );
        assert!(prompt.contains("app/export.py (contains 'export')"));
    }

    #[test]
    fn plan_prompt_anchors_deadlines() {
        let anchor = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let prompt = plan_generation(
            "Add CSV export",
            TaskType::New,
            None,
            &[],
            &[context()],
            &[],
            anchor,
        );
        assert!(prompt.contains("CURRENT DATE: 2025-06-01"));
        assert!(prompt.contains("TASK TYPE: new"));
    }

    #[test]
    fn plan_prompt_includes_answers_and_roster() {
        let anchor = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let answers = vec![("Which format?".to_string(), "CSV only".to_string())];
        let team = vec![TeamMember {
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            role: "Backend Developer".to_string(),
            skills: vec!["python".to_string(), "flask".to_string()],
            expertise: vec![],
            current_load: 0.0,
            capacity: 40.0,
        }];
        let prompt = plan_generation(
            "Add CSV export",
            TaskType::New,
            Some(&answers),
            &[],
            &[],
            &team,
            anchor,
        );
        assert!(prompt.contains("Which format?: CSV only"));
        assert!(prompt.contains("Alice (Backend Developer): python, flask"));
        // The roster never leaks emails into the prompt.
        assert!(!prompt.contains("alice@example.com"));
    }
}
