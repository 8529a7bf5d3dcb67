//! One-shot transfer of a File backend document into a SQL-capable backend
//!
//! Best effort: failed records are logged and skipped, and the source
//! document is renamed to `<name>.backup` once the whole pass has run.

use crate::error::{ReviewHistoryError, Result};
use crate::storage::file::load_document;
use crate::storage::StorageBackend;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of a migration pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub source: PathBuf,
    pub repositories: usize,
    pub reviews_attempted: usize,
    pub reviews_migrated: usize,
    /// Reviews the target already held (a previous interrupted run)
    pub reviews_already_present: usize,
    pub transitions_attempted: usize,
    pub transitions_migrated: usize,
    pub transitions_already_present: usize,
    pub failed: usize,
    pub backup_path: Option<PathBuf>,
}

impl MigrationReport {
    /// Whether there was a document to migrate
    pub fn found_document(&self) -> bool {
        self.backup_path.is_some() || self.repositories > 0 || self.reviews_attempted > 0
    }

    /// `MigrationPartialFailure` when any record could not be transferred
    pub fn partial_failure(&self) -> Option<ReviewHistoryError> {
        (self.failed > 0).then(|| ReviewHistoryError::MigrationPartialFailure {
            attempted: self.reviews_attempted + self.transitions_attempted,
            failed: self.failed,
        })
    }
}

/// Path the document is moved to after migration
pub fn backup_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".backup");
    path.with_file_name(name)
}

/// Replay every review and transition in the document at `path` into `target`
///
/// A missing document is a no-op. A corrupted document is an error and is
/// left in place.
pub async fn migrate_file_history(
    path: &Path,
    target: &dyn StorageBackend,
) -> Result<MigrationReport> {
    let mut report = MigrationReport {
        source: path.to_path_buf(),
        ..MigrationReport::default()
    };

    let Some(document) = load_document(path).await? else {
        debug!("No file history at {}, nothing to migrate", path.display());
        return Ok(report);
    };

    info!(
        "Migrating file history {} into {} backend",
        path.display(),
        target.kind()
    );

    for (repository, history) in &document.repositories {
        report.repositories += 1;

        for snapshot in &history.reviews {
            report.reviews_attempted += 1;
            match target.save_review(repository, snapshot).await {
                Ok(()) => report.reviews_migrated += 1,
                Err(ReviewHistoryError::AlreadyExists(_)) => report.reviews_already_present += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!("Skipping review {}: {}", snapshot.key_string(), e);
                }
            }
        }

        for transition in &history.transitions {
            report.transitions_attempted += 1;
            match target.save_approval_transition(repository, transition).await {
                Ok(()) => report.transitions_migrated += 1,
                Err(ReviewHistoryError::AlreadyExists(_)) => {
                    report.transitions_already_present += 1
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        "Skipping transition {}#{}: {}",
                        repository, transition.pr_number, e
                    );
                }
            }
        }
    }

    let backup = backup_path_for(path);
    match tokio::fs::rename(path, &backup).await {
        Ok(()) => report.backup_path = Some(backup),
        Err(e) => warn!(
            "Migrated {} but could not rename it to {}: {}",
            path.display(),
            backup.display(),
            e
        ),
    }

    if let Some(partial) = report.partial_failure() {
        warn!("{}", partial);
    }
    info!(
        "Migration finished: {} of {} review(s) and {} of {} transition(s) transferred",
        report.reviews_migrated,
        report.reviews_attempted,
        report.transitions_migrated,
        report.transitions_attempted
    );
    Ok(report)
}
