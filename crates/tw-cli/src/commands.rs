use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};

use tw_core::config::Config;
use tw_core::context_cache::ContextCache;
use tw_core::history::HistoryStore;
use tw_core::types::{RepoKey, TeamMember};
use tw_integrations::github::RepoHost;
use tw_integrations::GitHubHost;
use tw_intelligence::{
    ContextAnalyzer, GeminiGenerator, PlanGenerator, TaskClassifier, TextGenerator,
};

/// Everything a pipeline command needs, wired from config and env.
struct Wiring {
    analyzer: ContextAnalyzer,
    classifier: TaskClassifier,
    planner: PlanGenerator,
}

fn wire(config: &Config) -> anyhow::Result<Wiring> {
    let github_token =
        Config::github_token().context("GITHUB_TOKEN is not set in the environment")?;
    let api_key =
        Config::generation_api_key().context("GEMINI_API_KEY is not set in the environment")?;

    let host: Arc<dyn RepoHost> = Arc::new(
        GitHubHost::new_with_url(&config.github.api_base, github_token)?.with_timeouts(
            std::time::Duration::from_secs(config.github.timeout_secs),
            std::time::Duration::from_secs(config.github.tree_timeout_secs),
        ),
    );
    let generator: Arc<dyn TextGenerator> = Arc::new(
        GeminiGenerator::new(api_key)
            .with_timeout(std::time::Duration::from_secs(config.generation.timeout_secs)),
    );

    let (cache, store) = match &config.storage.data_dir {
        Some(dir) => (
            Arc::new(ContextCache::new(dir.join("contexts"))),
            Arc::new(HistoryStore::new(dir.join("sessions"))),
        ),
        None => (
            Arc::new(ContextCache::default_path()),
            Arc::new(HistoryStore::default_path()),
        ),
    };

    let analyzer = ContextAnalyzer::new(host.clone(), generator.clone(), cache)
        .with_model(config.generation.model.as_str());
    let classifier = TaskClassifier::new(analyzer.clone(), host, generator.clone(), store.clone())
        .with_model(config.generation.model.as_str());
    let planner = PlanGenerator::new(analyzer.clone(), generator, store)
        .with_model(config.generation.model.as_str());

    Ok(Wiring {
        analyzer,
        classifier,
        planner,
    })
}

fn parse_repo(raw: &str) -> anyhow::Result<RepoKey> {
    match raw.split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() => {
            Ok(RepoKey::new(owner, repo))
        }
        _ => bail!("expected owner/repo, got '{raw}'"),
    }
}

pub async fn analyze(repo: &str) -> anyhow::Result<()> {
    let config = Config::load()?;
    let wiring = wire(&config)?;
    let key = parse_repo(repo)?;

    let context = wiring.analyzer.analyze(&key).await?;
    println!("{}", serde_json::to_string_pretty(&context)?);
    Ok(())
}

pub async fn classify(session: &str, task: &str, repos: &[String]) -> anyhow::Result<()> {
    let config = Config::load()?;
    let wiring = wire(&config)?;
    let keys = repos
        .iter()
        .map(|r| parse_repo(r))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let result = wiring.classifier.classify(session, task, &keys).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

pub async fn plan(
    session: &str,
    answers: &[String],
    team_path: Option<&Path>,
    date: Option<NaiveDate>,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let wiring = wire(&config)?;

    let answers = answers
        .iter()
        .map(|raw| match raw.split_once('=') {
            Some((q, a)) => Ok((q.to_string(), a.to_string())),
            None => bail!("expected question=answer, got '{raw}'"),
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let team: Vec<TeamMember> = match team_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading team roster {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing team roster {}", path.display()))?
        }
        None => Vec::new(),
    };

    let anchor = date.unwrap_or_else(|| Utc::now().date_naive());
    let answers_opt = (!answers.is_empty()).then_some(answers.as_slice());

    let plan = wiring
        .planner
        .generate(session, answers_opt, &team, anchor)
        .await?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

pub fn history(session: &str) -> anyhow::Result<()> {
    let config = Config::load()?;
    let store = match &config.storage.data_dir {
        Some(dir) => HistoryStore::new(dir.join("sessions")),
        None => HistoryStore::default_path(),
    };

    let history = store.history(session)?;
    println!("{}", serde_json::to_string_pretty(&history)?);
    Ok(())
}
