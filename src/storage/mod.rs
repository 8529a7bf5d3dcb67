//! Storage layer for review history
//!
//! Every backend is a standalone type implementing [`StorageBackend`]; the
//! [`factory`] picks one from configuration and callers hold it as an
//! `Arc<dyn StorageBackend>`.

pub mod document;
pub mod factory;
pub mod file;
pub mod libsql;
pub mod memory;
pub mod migration;
pub mod postgres;
pub mod schema;
#[cfg(test)]
pub mod test_utils;

use crate::error::Result;
use crate::types::{
    ApprovalTransition, AuthorApprovalRate, Effectiveness, ReviewSnapshot, StorageStats,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Concrete backend behind a `dyn StorageBackend`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    File,
    LocalSql,
    SyncedSql,
    RemoteSql,
    Relational,
    Memory,
}

impl BackendKind {
    /// Backends that can receive a File -> SQL migration
    pub fn is_sql(&self) -> bool {
        matches!(
            self,
            BackendKind::LocalSql
                | BackendKind::SyncedSql
                | BackendKind::RemoteSql
                | BackendKind::Relational
        )
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::File => write!(f, "file"),
            BackendKind::LocalSql => write!(f, "local-sql"),
            BackendKind::SyncedSql => write!(f, "synced-sql"),
            BackendKind::RemoteSql => write!(f, "remote-sql"),
            BackendKind::Relational => write!(f, "relational"),
            BackendKind::Memory => write!(f, "memory"),
        }
    }
}

/// Storage backend trait defining all required operations
///
/// Backends are pure storage: approval transitions are detected by
/// [`crate::tracker`] and handed in by the caller.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Which backend this is
    fn kind(&self) -> BackendKind;

    /// Prepare directories, tables and indexes. Safe to call on every start.
    async fn initialize(&self) -> Result<()>;

    /// Append a snapshot. Duplicates of (repository, PR, timestamp) are rejected.
    async fn save_review(&self, repository: &str, snapshot: &ReviewSnapshot) -> Result<()>;

    /// Persist a snapshot and its derived transition as one unit
    async fn save_review_with_transition(
        &self,
        repository: &str,
        snapshot: &ReviewSnapshot,
        transition: Option<&ApprovalTransition>,
    ) -> Result<()> {
        self.save_review(repository, snapshot).await?;
        if let Some(transition) = transition {
            self.save_approval_transition(repository, transition).await?;
        }
        Ok(())
    }

    /// All snapshots of a PR, ascending by timestamp
    async fn get_review_history(&self, repository: &str, pr_number: u64)
        -> Result<Vec<ReviewSnapshot>>;

    /// Append an approval transition
    async fn save_approval_transition(
        &self,
        repository: &str,
        transition: &ApprovalTransition,
    ) -> Result<()>;

    /// Transitions of a PR, ascending by timestamp
    async fn get_approval_transitions(
        &self,
        repository: &str,
        pr_number: u64,
    ) -> Result<Vec<ApprovalTransition>>;

    /// Aggregate over the currently persisted snapshots
    async fn get_stats(&self, repository: &str) -> Result<StorageStats>;

    /// Snapshots of a repository, most recent first
    async fn get_all_reviews(&self, repository: &str, limit: Option<usize>)
        -> Result<Vec<ReviewSnapshot>>;

    /// Merge effectiveness feedback into an existing snapshot
    async fn annotate_review(
        &self,
        repository: &str,
        pr_number: u64,
        timestamp: DateTime<Utc>,
        effectiveness: &Effectiveness,
    ) -> Result<()>;

    /// Per-author approval figures
    async fn author_approval_rates(&self, repository: &str) -> Result<Vec<AuthorApprovalRate>> {
        let reviews = self.get_all_reviews(repository, None).await?;
        Ok(AuthorApprovalRate::from_snapshots(&reviews))
    }

    /// Evict down to the `keep_last` most recent snapshots, returning how many
    /// were removed. Backends with unlimited history keep everything.
    async fn cleanup(&self, _repository: &str, _keep_last: usize) -> Result<usize> {
        Ok(0)
    }

    /// Lightweight liveness probe
    async fn health_check(&self) -> bool;
}
