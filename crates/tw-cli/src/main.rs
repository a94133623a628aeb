mod commands;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

/// taskweave CLI -- turn a task description plus a repository into a
/// classified, clarified, and scheduled execution plan.
#[derive(Parser)]
#[command(name = "tw", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a repository and cache its context.
    Analyze {
        /// Repository in `owner/repo` form.
        repo: String,
    },

    /// Classify a task against one or more repositories.
    Classify {
        /// Session id to create or replace.
        #[arg(short, long)]
        session: String,
        /// The task description, in natural language.
        task: String,
        /// Repositories in `owner/repo` form.
        #[arg(short, long, required = true)]
        repo: Vec<String>,
    },

    /// Generate an implementation plan for a classified session.
    Plan {
        /// Session id previously used with `classify`.
        #[arg(short, long)]
        session: String,
        /// Clarification answers as `question=answer` pairs.
        #[arg(short, long)]
        answer: Vec<String>,
        /// Path to a JSON file with the team roster.
        #[arg(short, long)]
        team: Option<std::path::PathBuf>,
        /// Anchor date for deadline computation (defaults to today, UTC).
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Show the stored history for a session.
    History {
        /// Session id.
        session: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze { repo } => commands::analyze(&repo).await,
        Commands::Classify {
            session,
            task,
            repo,
        } => commands::classify(&session, &task, &repo).await,
        Commands::Plan {
            session,
            answer,
            team,
            date,
        } => commands::plan(&session, &answer, team.as_deref(), date).await,
        Commands::History { session } => commands::history(&session),
    }
}
