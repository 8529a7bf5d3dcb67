//! In-memory storage backend
//!
//! Substitute for tests and the factory's last resort when nothing on disk
//! is writable. Data lives only as long as the process.

use crate::error::{ReviewHistoryError, Result};
use crate::storage::document::HistoryDocument;
use crate::storage::{BackendKind, StorageBackend};
use crate::types::{ApprovalTransition, Effectiveness, ReviewSnapshot, StorageStats};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// Volatile backend with optional retention caps
#[derive(Default)]
pub struct InMemoryStorage {
    document: RwLock<HistoryDocument>,
    max_reviews: Option<usize>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the File backend's per-repository review cap
    pub fn with_review_cap(max_reviews: usize) -> Self {
        Self {
            document: RwLock::new(HistoryDocument::default()),
            max_reviews: Some(max_reviews),
        }
    }

    /// Seed from an existing document
    pub fn from_document(document: HistoryDocument) -> Self {
        Self {
            document: RwLock::new(document),
            max_reviews: None,
        }
    }

    pub async fn total_reviews(&self) -> usize {
        self.document.read().await.total_reviews()
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn save_review(&self, repository: &str, snapshot: &ReviewSnapshot) -> Result<()> {
        let mut document = self.document.write().await;
        document
            .repository_mut(repository)
            .insert_review(repository, snapshot.clone(), self.max_reviews)?;
        Ok(())
    }

    async fn save_review_with_transition(
        &self,
        repository: &str,
        snapshot: &ReviewSnapshot,
        transition: Option<&ApprovalTransition>,
    ) -> Result<()> {
        let mut document = self.document.write().await;
        document.repository_mut(repository).insert_review_with_transition(
            repository,
            snapshot.clone(),
            transition.cloned(),
            self.max_reviews,
            None,
        )?;
        Ok(())
    }

    async fn get_review_history(
        &self,
        repository: &str,
        pr_number: u64,
    ) -> Result<Vec<ReviewSnapshot>> {
        let document = self.document.read().await;
        Ok(document
            .repository(repository)
            .map(|history| history.history_for(pr_number))
            .unwrap_or_default())
    }

    async fn save_approval_transition(
        &self,
        repository: &str,
        transition: &ApprovalTransition,
    ) -> Result<()> {
        let mut document = self.document.write().await;
        document
            .repository_mut(repository)
            .insert_transition(repository, transition.clone(), None)?;
        Ok(())
    }

    async fn get_approval_transitions(
        &self,
        repository: &str,
        pr_number: u64,
    ) -> Result<Vec<ApprovalTransition>> {
        let document = self.document.read().await;
        Ok(document
            .repository(repository)
            .map(|history| history.transitions_for(pr_number))
            .unwrap_or_default())
    }

    async fn get_stats(&self, repository: &str) -> Result<StorageStats> {
        let document = self.document.read().await;
        Ok(document
            .repository(repository)
            .map(|history| history.stats(repository))
            .unwrap_or_else(|| StorageStats::empty(repository)))
    }

    async fn get_all_reviews(
        &self,
        repository: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ReviewSnapshot>> {
        let document = self.document.read().await;
        Ok(document
            .repository(repository)
            .map(|history| history.recent(limit))
            .unwrap_or_default())
    }

    async fn annotate_review(
        &self,
        repository: &str,
        pr_number: u64,
        timestamp: DateTime<Utc>,
        effectiveness: &Effectiveness,
    ) -> Result<()> {
        let mut document = self.document.write().await;
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
    }

    async fn cleanup(&self, repository: &str, keep_last: usize) -> Result<usize> {
        let mut document = self.document.write().await;
        Ok(document
            .repositories
            .get_mut(repository)
            .map(|history| history.truncate_reviews(keep_last))
            .unwrap_or(0))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_utils::snapshot_at;
    use crate::types::{FeedbackSentiment, ReviewOutcome};

    #[tokio::test]
    async fn test_annotate_existing_and_missing() {
        let storage = InMemoryStorage::new();
        let snapshot = snapshot_at("acme/api", 7, 0, ReviewOutcome::Merge);
        storage.save_review("acme/api", &snapshot).await.unwrap();

        let feedback = Effectiveness {
            implemented_suggestions: Some(3),
            developer_sentiment: Some(FeedbackSentiment::Positive),
        };
        storage
            .annotate_review("acme/api", 7, snapshot.timestamp, &feedback)
            .await
            .unwrap();

        let history = storage.get_review_history("acme/api", 7).await.unwrap();
        assert_eq!(history[0].effectiveness, Some(feedback));

        let missing = storage
            .annotate_review("acme/api", 8, snapshot.timestamp, &feedback)
            .await
            .unwrap_err();
        assert!(matches!(missing, ReviewHistoryError::RecordNotFound(_)));
    }

    #[tokio::test]
    async fn test_review_cap() {
        let storage = InMemoryStorage::with_review_cap(2);
        for offset in 0..5 {
            storage
                .save_review("acme/api", &snapshot_at("acme/api", 1, offset, ReviewOutcome::Merge))
                .await
                .unwrap();
        }
        assert_eq!(storage.total_reviews().await, 2);
    }
}
