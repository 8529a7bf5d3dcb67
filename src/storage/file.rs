//! JSON file storage backend
//!
//! Keeps a single [`HistoryDocument`] on disk. Every operation loads and
//! rewrites the whole document; writes land in a sibling temp file that is
//! renamed over the original, so readers never see a truncated document.
//!
//! The in-process mutex serializes read-modify-write cycles. Two processes
//! writing the same document concurrently can still lose an update.

use crate::config::FileConfig;
use crate::error::{ReviewHistoryError, Result};
use crate::storage::document::HistoryDocument;
use crate::storage::{BackendKind, StorageBackend};
use crate::types::{
    ApprovalTransition, Effectiveness, ReviewSnapshot, StorageStats,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// File-based storage backend
pub struct FileStorage {
    path: PathBuf,
    max_reviews: usize,
    max_transitions: usize,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(config: &FileConfig) -> Self {
        Self {
            path: config.path.clone(),
            max_reviews: config.max_reviews_per_repository.max(1),
            max_transitions: config.max_transitions_per_repository.max(1),
            lock: Mutex::new(()),
        }
    }

    /// File backend at `path` with default retention caps
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self::new(&FileConfig {
            path: path.into(),
            ..FileConfig::default()
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<HistoryDocument> {
        load_document(&self.path).await.map(Option::unwrap_or_default)
    }

    async fn store(&self, document: &HistoryDocument) -> Result<()> {
        let json = serde_json::to_vec_pretty(document)?;
        let tmp_path = temp_path_for(&self.path);

        tokio::fs::write(&tmp_path, &json).await.map_err(|e| {
            ReviewHistoryError::Database(format!(
                "Failed to write history document {}: {}",
                tmp_path.display(),
                e
            ))
        })?;

        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(ReviewHistoryError::Database(format!(
                "Failed to replace history document {}: {}",
                self.path.display(),
                e
            )));
        }
        Ok(())
    }

    /// Load, mutate and write back the document under the process lock
    async fn update<T, F>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut HistoryDocument) -> Result<T> + Send,
        T: Send,
    {
        let _guard = self.lock.lock().await;
        let mut document = self.load().await?;
        let result = mutate(&mut document)?;
        self.store(&document).await?;
        Ok(result)
    }

    async fn read<T, F>(&self, view: F) -> Result<T>
    where
        F: FnOnce(&HistoryDocument) -> T + Send,
        T: Send,
    {
        let _guard = self.lock.lock().await;
        let document = self.load().await?;
        Ok(view(&document))
    }
}

/// Read a history document, `None` when it does not exist yet
pub async fn load_document(path: &Path) -> Result<Option<HistoryDocument>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Some(HistoryDocument::default()));
    }

    let document = serde_json::from_slice(&bytes).map_err(|e| {
        ReviewHistoryError::Database(format!(
            "History document {} is corrupted: {}",
            path.display(),
            e
        ))
    })?;
    Ok(Some(document))
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "reviews.json".to_string());
    path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()))
}

#[async_trait]
impl StorageBackend for FileStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    async fn initialize(&self) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        tokio::fs::create_dir_all(&parent).await.map_err(|e| {
            ReviewHistoryError::StorageUnavailable(format!(
                "Cannot create history directory {}: {}",
                parent.display(),
                e
            ))
        })?;

        // Write probe: the directory must accept the temp file + rename cycle
        let probe = temp_path_for(&self.path);
        tokio::fs::write(&probe, b"{}").await.map_err(|e| {
            ReviewHistoryError::StorageUnavailable(format!(
                "History directory {} is not writable: {}",
                parent.display(),
                e
            ))
        })?;
        let _ = tokio::fs::remove_file(&probe).await;

        // Surface a corrupted document now rather than on the first write
        if let Err(e) = load_document(&self.path).await {
            warn!("{}", e);
            return Err(ReviewHistoryError::StorageUnavailable(e.to_string()));
        }

        info!("File storage ready: {}", self.path.display());
        Ok(())
    }

    async fn save_review(&self, repository: &str, snapshot: &ReviewSnapshot) -> Result<()> {
        self.save_review_with_transition(repository, snapshot, None).await
    }

    async fn save_review_with_transition(
        &self,
        repository: &str,
        snapshot: &ReviewSnapshot,
        transition: Option<&ApprovalTransition>,
    ) -> Result<()> {
        let (max_reviews, max_transitions) = (self.max_reviews, self.max_transitions);
        let evicted = self
            .update(|document| {
                document.repository_mut(repository).insert_review_with_transition(
                    repository,
                    snapshot.clone(),
                    transition.cloned(),
                    Some(max_reviews),
                    Some(max_transitions),
                )
            })
            .await?;

        if evicted > 0 {
            debug!(
                "Evicted {} oldest review(s) from {} (cap {})",
                evicted, repository, self.max_reviews
            );
        }
        debug!("Saved review {}", snapshot.key_string());
        Ok(())
    }

    async fn get_review_history(
        &self,
        repository: &str,
        pr_number: u64,
    ) -> Result<Vec<ReviewSnapshot>> {
        self.read(|document| {
            document
                .repository(repository)
                .map(|history| history.history_for(pr_number))
                .unwrap_or_default()
        })
        .await
    }

    async fn save_approval_transition(
        &self,
        repository: &str,
        transition: &ApprovalTransition,
    ) -> Result<()> {
        let max_transitions = self.max_transitions;
        self.update(|document| {
            document.repository_mut(repository).insert_transition(
                repository,
                transition.clone(),
                Some(max_transitions),
            )?;
            Ok(())
        })
        .await
    }

    async fn get_approval_transitions(
        &self,
        repository: &str,
        pr_number: u64,
    ) -> Result<Vec<ApprovalTransition>> {
        self.read(|document| {
            document
                .repository(repository)
                .map(|history| history.transitions_for(pr_number))
                .unwrap_or_default()
        })
        .await
    }

    async fn get_stats(&self, repository: &str) -> Result<StorageStats> {
        self.read(|document| {
            document
                .repository(repository)
                .map(|history| history.stats(repository))
                .unwrap_or_else(|| StorageStats::empty(repository))
        })
        .await
    }

    async fn get_all_reviews(
        &self,
        repository: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ReviewSnapshot>> {
        self.read(|document| {
            document
                .repository(repository)
                .map(|history| history.recent(limit))
                .unwrap_or_default()
        })
        .await
    }

    async fn annotate_review(
        &self,
        repository: &str,
        pr_number: u64,
        timestamp: DateTime<Utc>,
        effectiveness: &Effectiveness,
    ) -> Result<()> {
        self.update(|document| {
            let found = document
                .repositories
                .get_mut(repository)
                .map(|history| history.annotate(pr_number, timestamp, effectiveness))
                .unwrap_or(false);
            if found {
                Ok(())
            } else {
                Err(ReviewHistoryError::RecordNotFound(format!(
                    "{}#{} at {}",
                    repository, pr_number, timestamp
                )))
            }
        })
        .await
    }

    async fn cleanup(&self, repository: &str, keep_last: usize) -> Result<usize> {
        let removed = self
            .update(|document| {
                Ok(document
                    .repositories
                    .get_mut(repository)
                    .map(|history| history.truncate_reviews(keep_last))
                    .unwrap_or(0))
            })
            .await?;
        info!("Cleanup removed {} review(s) from {}", removed, repository);
        Ok(removed)
    }

    async fn health_check(&self) -> bool {
        match load_document(&self.path).await {
            Ok(_) => true,
            Err(e) => {
                warn!("File storage health check failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_utils::{snapshot_at, transition_at};
    use crate::types::ReviewOutcome;
    use tempfile::TempDir;

    async fn storage_in(dir: &TempDir, max_reviews: usize) -> FileStorage {
        let storage = FileStorage::new(&FileConfig {
            path: dir.path().join("history").join("reviews.json"),
            max_reviews_per_repository: max_reviews,
            max_transitions_per_repository: 500,
        });
        storage.initialize().await.expect("initialize");
        storage
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let storage = storage_in(&dir, 100).await;
        storage.initialize().await.unwrap();
        assert!(storage.health_check().await);
    }

    #[tokio::test]
    async fn test_retention_keeps_most_recent_hundred() {
        let dir = TempDir::new().unwrap();
        let storage = storage_in(&dir, 100).await;

        for i in 0..101u32 {
            storage
                .save_review("acme/api", &snapshot_at("acme/api", u64::from(i % 7), i, ReviewOutcome::Merge))
                .await
                .unwrap();
        }

        let all = storage.get_all_reviews("acme/api", None).await.unwrap();
        assert_eq!(all.len(), 100);
        // Minute offset 0 was the oldest and must be gone
        let oldest = all.last().unwrap();
        assert_eq!(oldest.timestamp, snapshot_at("acme/api", 1, 1, ReviewOutcome::Merge).timestamp);

        let stats = storage.get_stats("acme/api").await.unwrap();
        assert_eq!(stats.total_reviews, 100);
    }

    #[tokio::test]
    async fn test_document_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let storage = storage_in(&dir, 100).await;
        storage
            .save_review_with_transition(
                "acme/api",
                &snapshot_at("acme/api", 42, 1, ReviewOutcome::DontMerge),
                Some(&transition_at("acme/api", 42, 1)),
            )
            .await
            .unwrap();

        let reopened = FileStorage::at_path(storage.path());
        assert_eq!(reopened.get_review_history("acme/api", 42).await.unwrap().len(), 1);
        assert_eq!(reopened.get_approval_transitions("acme/api", 42).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let storage = storage_in(&dir, 100).await;
        storage
            .save_review("acme/api", &snapshot_at("acme/api", 1, 0, ReviewOutcome::Merge))
            .await
            .unwrap();

        let entries: Vec<_> = std::fs::read_dir(storage.path().parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["reviews.json".to_string()]);
    }

    #[tokio::test]
    async fn test_corrupted_document_fails_initialize() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reviews.json");
        std::fs::write(&path, b"{\"repositories\": [truncated").unwrap();

        let storage = FileStorage::at_path(&path);
        let err = storage.initialize().await.unwrap_err();
        assert!(matches!(err, ReviewHistoryError::StorageUnavailable(_)));
        assert!(!storage.health_check().await);
    }

    #[tokio::test]
    async fn test_cleanup_trims_to_keep_last() {
        let dir = TempDir::new().unwrap();
        let storage = storage_in(&dir, 100).await;
        for minute in 0..10 {
            storage
                .save_review("acme/api", &snapshot_at("acme/api", 3, minute, ReviewOutcome::Merge))
                .await
                .unwrap();
        }
        assert_eq!(storage.cleanup("acme/api", 4).await.unwrap(), 6);
        assert_eq!(storage.cleanup("acme/api", 4).await.unwrap(), 0);
        assert_eq!(storage.cleanup("other/repo", 4).await.unwrap(), 0);
        assert_eq!(storage.get_review_history("acme/api", 3).await.unwrap().len(), 4);
    }
}
