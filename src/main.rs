//! Review History - command line interface
//!
//! Inspects and maintains the review history of an AI code-review pipeline:
//! health diagnostics, per-PR history, repository statistics, historical
//! insights, and maintenance (recording, annotation, cleanup, migration).

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use review_history_core::{
    create_storage, health, migrate_file_history, types::parse_timestamp, CurrentPullRequest,
    Effectiveness, FeedbackSentiment, HistoryStore, ReviewSnapshot, StorageConfig, StorageMode,
    TransitionTrigger,
};
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, Level};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(name = "review-history")]
#[command(about = "Review history storage and historical validation", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, env = "REVIEW_HISTORY_CONFIG")]
    config: Option<PathBuf>,

    /// Override the storage mode (file, local_sql, synced_sql, remote_sql, relational)
    #[arg(long)]
    mode: Option<String>,

    /// Set log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Check backend health and migration state
    Health {
        /// Show details for passing checks
        #[arg(short, long)]
        verbose: bool,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Repository statistics
    Stats {
        #[arg(short, long)]
        repo: String,
    },

    /// Review history of one pull request
    History {
        #[arg(short, long)]
        repo: String,

        #[arg(short, long)]
        pr: u64,
    },

    /// Approval transitions of one pull request
    Transitions {
        #[arg(short, long)]
        repo: String,

        #[arg(short, long)]
        pr: u64,
    },

    /// Most recent reviews of a repository
    List {
        #[arg(short, long)]
        repo: String,

        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Approval rates per author
    Authors {
        #[arg(short, long)]
        repo: String,
    },

    /// Historical insights for a pull request about to be reviewed
    Insights {
        #[arg(short, long)]
        repo: String,

        #[arg(short, long)]
        pr: u64,

        #[arg(short, long)]
        title: String,

        #[arg(short, long)]
        author: String,

        /// Changed file path (repeatable)
        #[arg(long = "changed-file")]
        changed_files: Vec<String>,
    },

    /// Record a review snapshot (JSON from a file or stdin)
    Record {
        /// Snapshot JSON file; reads stdin when omitted
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// What triggered the review (review, mention, commit)
        #[arg(short, long, default_value = "review")]
        trigger: String,
    },

    /// Attach effectiveness feedback to a recorded review
    Annotate {
        #[arg(short, long)]
        repo: String,

        #[arg(short, long)]
        pr: u64,

        /// Timestamp of the reviewed snapshot (RFC 3339)
        #[arg(long)]
        timestamp: String,

        /// Number of suggestions the developer implemented
        #[arg(long)]
        implemented: Option<u32>,

        /// Developer sentiment (positive, neutral, negative)
        #[arg(long)]
        sentiment: Option<String>,
    },

    /// Evict all but the most recent reviews of a repository
    Cleanup {
        #[arg(short, long)]
        repo: String,

        #[arg(short, long, default_value = "100")]
        keep: usize,
    },

    /// Migrate file history into the configured SQL backend
    Migrate {
        /// File document to migrate (defaults to the configured file path)
        #[arg(long)]
        from: Option<PathBuf>,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn read_snapshot(file: Option<PathBuf>) -> anyhow::Result<ReviewSnapshot> {
    let raw = match file {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            tokio::io::stdin().read_to_string(&mut buffer).await?;
            buffer
        }
    };

    let snapshot: ReviewSnapshot =
        serde_json::from_str(&raw).context("Snapshot JSON is not a valid review snapshot")?;
    let timestamp = snapshot.timestamp;
    Ok(snapshot.with_timestamp(timestamp))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Our crates at the requested level, database drivers only when noisy
    let filter = EnvFilter::new(format!(
        "review_history={level},review_history_core={level},libsql=warn,sqlx=warn",
        level = level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr) // stdout carries JSON output
        .init();

    debug!("review-history v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = StorageConfig::load(cli.config.as_deref())?;
    if let Some(mode) = &cli.mode {
        config.mode = mode.parse::<StorageMode>()?;
    }

    let selection = create_storage(&config).await;
    if let Some(reason) = &selection.fallback_reason {
        info!("Using {} storage ({})", selection.kind, reason);
    }

    match cli.command {
        Commands::Health { verbose, json } => {
            let summary = health::run_health_checks(&selection, &config).await;
            if json {
                print_json(&summary)?;
            } else {
                health::print_health_summary(&summary, verbose);
            }
            if summary.status == health::CheckStatus::Fail {
                std::process::exit(1);
            }
        }

        Commands::Stats { repo } => {
            let store = HistoryStore::new(selection.backend, &config);
            print_json(&store.stats(&repo).await)?;
        }

        Commands::History { repo, pr } => {
            let store = HistoryStore::new(selection.backend, &config);
            print_json(&store.history(&repo, pr).await)?;
        }

        Commands::Transitions { repo, pr } => {
            let store = HistoryStore::new(selection.backend, &config);
            print_json(&store.transitions(&repo, pr).await)?;
        }

        Commands::List { repo, limit } => {
            let store = HistoryStore::new(selection.backend, &config);
            print_json(&store.recent_reviews(&repo, Some(limit)).await)?;
        }

        Commands::Authors { repo } => {
            let store = HistoryStore::new(selection.backend, &config);
            print_json(&store.author_rates(&repo).await)?;
        }

        Commands::Insights {
            repo,
            pr,
            title,
            author,
            changed_files,
        } => {
            let store = HistoryStore::new(selection.backend, &config);
            let current = CurrentPullRequest {
                number: pr,
                title,
                author,
                changed_files,
            };
            print_json(&store.insights(&repo, &current).await)?;
        }

        Commands::Record { file, trigger } => {
            let trigger: TransitionTrigger = trigger.parse()?;
            let snapshot = read_snapshot(file).await?;
            let store = HistoryStore::new(selection.backend, &config);
            let outcome = store
                .record_review(&snapshot.repository, &snapshot, trigger)
                .await;
            print_json(&outcome)?;
        }

        Commands::Annotate {
            repo,
            pr,
            timestamp,
            implemented,
            sentiment,
        } => {
            let effectiveness = Effectiveness {
                implemented_suggestions: implemented,
                developer_sentiment: sentiment
                    .as_deref()
                    .map(str::parse::<FeedbackSentiment>)
                    .transpose()?,
            };
            if effectiveness.is_empty() {
                bail!("Nothing to annotate: pass --implemented and/or --sentiment");
            }

            let timestamp = parse_timestamp(&timestamp)?;
            let store = HistoryStore::new(selection.backend, &config);
            if !store.annotate(&repo, pr, timestamp, &effectiveness).await {
                bail!("No review of {}#{} at {}", repo, pr, timestamp);
            }
            println!("Annotated {}#{}", repo, pr);
        }

        Commands::Cleanup { repo, keep } => {
            let store = HistoryStore::new(selection.backend, &config);
            let removed = store.cleanup(&repo, keep).await;
            println!("Removed {} review(s) from {}", removed, repo);
        }

        Commands::Migrate { from } => {
            if !selection.kind.is_sql() {
                bail!(
                    "Migration needs a SQL backend, but {} storage is active",
                    selection.kind
                );
            }
            let path = from.unwrap_or_else(|| config.file.path.clone());
            let report = migrate_file_history(&path, selection.backend.as_ref()).await?;
            print_json(&report)?;
        }
    }

    Ok(())
}
