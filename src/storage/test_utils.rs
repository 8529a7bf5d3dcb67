//! Test utilities for storage backends
//!
//! Snapshot builders with deterministic timestamps plus a libSQL backend on
//! a temporary file.

use crate::error::Result;
use crate::storage::libsql::{ConnectionMode, LibsqlStorage};
use crate::storage::StorageBackend;
use crate::types::{ApprovalTransition, ReviewOutcome, ReviewSnapshot, TransitionTrigger};
use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

/// Fixed origin for test timestamps
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
}

/// Snapshot stamped `offset` minutes after [`base_time`]
pub fn snapshot_at(repository: &str, pr_number: u64, offset: u32, outcome: ReviewOutcome) -> ReviewSnapshot {
    ReviewSnapshot::new(
        repository,
        pr_number,
        format!("Update handler for PR {}", pr_number),
        "alice",
        outcome,
    )
    .with_timestamp(base_time() + Duration::minutes(i64::from(offset)))
    .with_review_text("Looks reasonable overall.")
}

pub fn transition_at(repository: &str, pr_number: u64, offset: u32) -> ApprovalTransition {
    ApprovalTransition {
        timestamp: base_time() + Duration::minutes(i64::from(offset)),
        repository: repository.to_string(),
        pr_number,
        from_outcome: ReviewOutcome::Merge,
        to_outcome: ReviewOutcome::DontMerge,
        trigger: TransitionTrigger::Review,
    }
}

/// Local libSQL storage in a fresh temp directory
///
/// Uses a file rather than `:memory:` so every connection sees the same schema.
/// The directory must outlive the storage.
pub async fn create_test_libsql_storage() -> Result<(LibsqlStorage, TempDir)> {
    let dir = TempDir::new()?;
    let path = dir.path().join("reviews.db");
    let storage = LibsqlStorage::new(ConnectionMode::Local(path.to_string_lossy().into_owned())).await?;
    storage.initialize().await?;
    Ok((storage, dir))
}
