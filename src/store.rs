//! Fail-closed facade over the active storage backend
//!
//! Every call is bounded by the configured operation timeout. Failures are
//! logged and resolved to a safe default so the review pipeline never
//! aborts because of storage.

use crate::config::StorageConfig;
use crate::error::{ReviewHistoryError, Result};
use crate::storage::{BackendKind, StorageBackend};
use crate::tracker::{build_review_history, detect_transition};
use crate::types::{
    ApprovalTransition, AuthorApprovalRate, Effectiveness, ReviewHistory, ReviewSnapshot,
    StorageStats, TransitionTrigger,
};
use crate::validator::{CurrentPullRequest, HistoricalValidator, ValidationInsights};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of [`HistoryStore::record_review`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordOutcome {
    pub saved: bool,
    /// Transition detected against the previous snapshot, if any
    pub transition: Option<ApprovalTransition>,
}

pub struct HistoryStore {
    backend: Arc<dyn StorageBackend>,
    validator: HistoricalValidator,
    timeout: Duration,
}

impl HistoryStore {
    pub fn new(backend: Arc<dyn StorageBackend>, config: &StorageConfig) -> Self {
        Self {
            backend,
            validator: HistoricalValidator::new(&config.validator),
            timeout: config.operation_timeout(),
        }
    }

    pub fn with_validator(mut self, validator: HistoricalValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    async fn call<T, F>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.timeout, future)
            .await
            .unwrap_or(Err(ReviewHistoryError::Timeout(self.timeout)))
    }

    fn or_default<T>(&self, operation: &str, result: Result<T>, default: T) -> T {
        match result {
            Ok(value) => value,
            Err(e) => {
                warn!("{} failed on {} storage, using default: {}", operation, self.kind(), e);
                default
            }
        }
    }

    /// Persist a new snapshot together with the transition it causes
    ///
    /// The previous snapshot is the latest one strictly before `snapshot`.
    /// If history cannot be read the snapshot is still saved without a
    /// transition.
    pub async fn record_review(
        &self,
        repository: &str,
        snapshot: &ReviewSnapshot,
        trigger: TransitionTrigger,
    ) -> RecordOutcome {
        let history = self
            .call(self.backend.get_review_history(repository, snapshot.pr_number))
            .await;
        let history = self.or_default("Loading previous review", history, Vec::new());
        let previous = history
            .iter()
            .filter(|s| s.timestamp < snapshot.timestamp)
            .max_by_key(|s| s.timestamp);

        let transition = detect_transition(previous, snapshot, trigger);
        if let Some(t) = &transition {
            debug!(
                "PR #{} outcome changed {} -> {} ({})",
                t.pr_number, t.from_outcome, t.to_outcome, t.trigger
            );
        }

        let saved = self
            .call(self.backend.save_review_with_transition(
                repository,
                snapshot,
                transition.as_ref(),
            ))
            .await;
        match saved {
            Ok(()) => RecordOutcome {
                saved: true,
                transition,
            },
            Err(e) => {
                warn!("Failed to record review {}: {}", snapshot.key_string(), e);
                RecordOutcome::default()
            }
        }
    }

    pub async fn history(&self, repository: &str, pr_number: u64) -> ReviewHistory {
        let result = self
            .call(self.backend.get_review_history(repository, pr_number))
            .await;
        let snapshots = self.or_default("Loading review history", result, Vec::new());
        build_review_history(repository, pr_number, snapshots)
    }

    pub async fn transitions(&self, repository: &str, pr_number: u64) -> Vec<ApprovalTransition> {
        let result = self
            .call(self.backend.get_approval_transitions(repository, pr_number))
            .await;
        self.or_default("Loading approval transitions", result, Vec::new())
    }

    pub async fn stats(&self, repository: &str) -> StorageStats {
        let result = self.call(self.backend.get_stats(repository)).await;
        self.or_default("Computing stats", result, StorageStats::empty(repository))
    }

    pub async fn recent_reviews(&self, repository: &str, limit: Option<usize>) -> Vec<ReviewSnapshot> {
        let result = self.call(self.backend.get_all_reviews(repository, limit)).await;
        self.or_default("Listing reviews", result, Vec::new())
    }

    pub async fn author_rates(&self, repository: &str) -> Vec<AuthorApprovalRate> {
        let result = self.call(self.backend.author_approval_rates(repository)).await;
        self.or_default("Computing author approval rates", result, Vec::new())
    }

    /// Insights for the PR about to be reviewed; cold-start insights when
    /// history is empty or unreadable
    pub async fn insights(&self, repository: &str, current: &CurrentPullRequest) -> ValidationInsights {
        let result = self
            .call(
                self.backend
                    .get_all_reviews(repository, Some(self.validator.history_limit())),
            )
            .await;
        let history = self.or_default("Loading history for insights", result, Vec::new());
        self.validator.analyze(current, &history)
    }

    /// `false` when the snapshot does not exist or the write failed
    pub async fn annotate(
        &self,
        repository: &str,
        pr_number: u64,
        timestamp: DateTime<Utc>,
        effectiveness: &Effectiveness,
    ) -> bool {
        let result = self
            .call(
                self.backend
                    .annotate_review(repository, pr_number, timestamp, effectiveness),
            )
            .await;
        self.or_default("Annotating review", result.map(|()| true), false)
    }

    pub async fn cleanup(&self, repository: &str, keep_last: usize) -> usize {
        let result = self.call(self.backend.cleanup(repository, keep_last)).await;
        self.or_default("Cleanup", result, 0)
    }

    pub async fn health(&self) -> bool {
        tokio::time::timeout(self.timeout, self.backend.health_check())
            .await
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryStorage;
    use crate::storage::test_utils::snapshot_at;
    use crate::types::{FeedbackSentiment, ReviewOutcome};
    use crate::validator::Jitter;
    use async_trait::async_trait;

    fn store(backend: Arc<dyn StorageBackend>) -> HistoryStore {
        HistoryStore::new(backend, &StorageConfig::default())
            .with_validator(HistoricalValidator::default().with_jitter(Jitter::Disabled))
    }

    /// Backend that errors or never answers
    struct BrokenStorage {
        stall: bool,
    }

    impl BrokenStorage {
        async fn fail<T>(&self) -> Result<T> {
            if self.stall {
                std::future::pending::<()>().await;
            }
            Err(ReviewHistoryError::StorageUnavailable("connection refused".to_string()))
        }
    }

    #[async_trait]
    impl StorageBackend for BrokenStorage {
        fn kind(&self) -> BackendKind {
            BackendKind::RemoteSql
        }
        async fn initialize(&self) -> Result<()> {
            self.fail().await
        }
        async fn save_review(&self, _: &str, _: &ReviewSnapshot) -> Result<()> {
            self.fail().await
        }
        async fn get_review_history(&self, _: &str, _: u64) -> Result<Vec<ReviewSnapshot>> {
            self.fail().await
        }
        async fn save_approval_transition(&self, _: &str, _: &ApprovalTransition) -> Result<()> {
            self.fail().await
        }
        async fn get_approval_transitions(&self, _: &str, _: u64) -> Result<Vec<ApprovalTransition>> {
            self.fail().await
        }
        async fn get_stats(&self, _: &str) -> Result<StorageStats> {
            self.fail().await
        }
        async fn get_all_reviews(&self, _: &str, _: Option<usize>) -> Result<Vec<ReviewSnapshot>> {
            self.fail().await
        }
        async fn annotate_review(
            &self,
            _: &str,
            _: u64,
            _: DateTime<Utc>,
            _: &Effectiveness,
        ) -> Result<()> {
            self.fail().await
        }
        async fn health_check(&self) -> bool {
            if self.stall {
                std::future::pending::<()>().await;
            }
            false
        }
    }

    #[tokio::test]
    async fn test_record_detects_transitions() {
        let store = store(Arc::new(InMemoryStorage::new()));

        let first = store
            .record_review("acme/api", &snapshot_at("acme/api", 1, 0, ReviewOutcome::DontMerge), TransitionTrigger::Review)
            .await;
        assert!(first.saved);
        assert!(first.transition.is_none());

        let second = store
            .record_review(
                "acme/api",
                &snapshot_at("acme/api", 1, 5, ReviewOutcome::Merge),
                TransitionTrigger::Commit,
            )
            .await;
        let transition = second.transition.unwrap();
        assert_eq!(transition.from_outcome, ReviewOutcome::DontMerge);
        assert_eq!(transition.trigger, TransitionTrigger::Commit);

        let unchanged = store
            .record_review("acme/api", &snapshot_at("acme/api", 1, 9, ReviewOutcome::Merge), TransitionTrigger::Review)
            .await;
        assert!(unchanged.saved);
        assert!(unchanged.transition.is_none());

        assert_eq!(store.transitions("acme/api", 1).await.len(), 1);
        let history = store.history("acme/api", 1).await;
        assert_eq!(history.snapshots.len(), 3);
        assert_eq!(history.approval_changes, 1);
    }

    #[tokio::test]
    async fn test_duplicate_record_is_not_saved() {
        let store = store(Arc::new(InMemoryStorage::new()));
        let snapshot = snapshot_at("acme/api", 1, 0, ReviewOutcome::Merge);
        assert!(store.record_review("acme/api", &snapshot, TransitionTrigger::Review).await.saved);
        assert!(!store.record_review("acme/api", &snapshot, TransitionTrigger::Review).await.saved);
        assert_eq!(store.stats("acme/api").await.total_reviews, 1);
    }

    #[tokio::test]
    async fn test_insights_and_annotation() {
        let store = store(Arc::new(InMemoryStorage::new()));
        let current = CurrentPullRequest {
            number: 50,
            title: "Update handler for retries".to_string(),
            author: "alice".to_string(),
            changed_files: Vec::new(),
        };
        assert!(store.insights("acme/api", &current).await.is_cold_start());

        let snapshot = snapshot_at("acme/api", 3, 0, ReviewOutcome::Merge);
        store.record_review("acme/api", &snapshot, TransitionTrigger::Review).await;

        let insights = store.insights("acme/api", &current).await;
        assert_eq!(insights.reviews_considered, 1);
        assert_eq!(insights.similar_prs[0].pr_number, 3);

        let feedback = Effectiveness {
            implemented_suggestions: Some(1),
            developer_sentiment: Some(FeedbackSentiment::Neutral),
        };
        assert!(store.annotate("acme/api", 3, snapshot.timestamp, &feedback).await);
        assert!(!store.annotate("acme/api", 4, snapshot.timestamp, &feedback).await);
    }

    #[tokio::test]
    async fn test_failing_backend_resolves_to_defaults() {
        let store = store(Arc::new(BrokenStorage { stall: false }));
        let snapshot = snapshot_at("acme/api", 1, 0, ReviewOutcome::Merge);

        assert_eq!(
            store.record_review("acme/api", &snapshot, TransitionTrigger::Review).await,
            RecordOutcome::default()
        );
        assert!(store.history("acme/api", 1).await.snapshots.is_empty());
        assert_eq!(store.stats("acme/api").await, StorageStats::empty("acme/api"));
        assert!(store.recent_reviews("acme/api", None).await.is_empty());
        assert!(store.author_rates("acme/api").await.is_empty());
        assert_eq!(store.cleanup("acme/api", 1).await, 0);
        assert!(!store.health().await);
    }

    #[tokio::test]
    async fn test_stalled_backend_times_out() {
        let store = store(Arc::new(BrokenStorage { stall: true }))
            .with_timeout(Duration::from_millis(50));
        let current = CurrentPullRequest {
            number: 1,
            title: "Anything".to_string(),
            author: "alice".to_string(),
            changed_files: Vec::new(),
        };

        assert!(store.insights("acme/api", &current).await.is_cold_start());
        assert!(store.transitions("acme/api", 1).await.is_empty());
        assert!(!store.health().await);
    }
}
