//! Review History - persistence and historical validation for AI code review
//!
//! Stores every AI review of a pull request, tracks how its outcome moves
//! between reviews, and mines past reviews for context before the next one:
//! - Interchangeable backends: JSON file, libSQL (local, remote, embedded
//!   replica), PostgreSQL, and an in-memory store
//! - Factory with safe fallback and a one-shot File to SQL migration
//! - Approval transition tracking
//! - Similarity-based historical insights
//!
//! # Architecture
//!
//! - **Types**: snapshots, transitions and aggregates
//! - **Storage**: the [`StorageBackend`] trait, its backends and the factory
//! - **Tracker / Validator**: pure analysis over snapshot sequences
//! - **Store**: fail-closed facade the review pipeline calls
//!
//! # Example
//!
//! ```ignore
//! use review_history_core::{create_storage, HistoryStore, StorageConfig, TransitionTrigger};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = StorageConfig::load(None)?;
//!     let selection = create_storage(&config).await;
//!     let store = HistoryStore::new(selection.backend, &config);
//!
//!     let insights = store.insights("acme/api", &current_pr).await;
//!     // ... generate the review ...
//!     store.record_review("acme/api", &snapshot, TransitionTrigger::Review).await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod health;
pub mod storage;
pub mod store;
pub mod tracker;
pub mod types;
pub mod validator;

// Re-export commonly used types
pub use config::{StorageConfig, StorageMode};
pub use error::{ReviewHistoryError, Result};
pub use storage::factory::{create_storage, StorageSelection};
pub use storage::file::FileStorage;
pub use storage::libsql::{ConnectionMode, LibsqlStorage};
pub use storage::memory::InMemoryStorage;
pub use storage::migration::{migrate_file_history, MigrationReport};
pub use storage::postgres::PostgresStorage;
pub use storage::{BackendKind, StorageBackend};
pub use store::{HistoryStore, RecordOutcome};
pub use types::{
    ApprovalTransition, AuthorApprovalRate, Effectiveness, FeedbackSentiment, IssueCounts,
    ReviewHistory, ReviewMetrics, ReviewOutcome, ReviewSnapshot, StorageStats, TransitionTrigger,
};
pub use validator::{
    CurrentPullRequest, HistoricalValidator, Jitter, SimilarPr, ValidationInsights,
};
