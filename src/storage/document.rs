//! Per-repository review document
//!
//! The JSON history file and the in-memory backend both hold one
//! [`RepositoryHistory`] per repository. Arrays are kept ascending by
//! timestamp at insertion time so retention can evict from the front.

use crate::error::{ReviewHistoryError, Result};
use crate::types::{
    format_timestamp, ApprovalTransition, Effectiveness, ReviewSnapshot, StorageStats,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current on-disk document version
pub const DOCUMENT_VERSION: u32 = 1;

/// Whole history document, keyed by repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub repositories: BTreeMap<String, RepositoryHistory>,
}

fn default_version() -> u32 {
    DOCUMENT_VERSION
}

impl Default for HistoryDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            repositories: BTreeMap::new(),
        }
    }
}

impl HistoryDocument {
    pub fn repository(&self, repository: &str) -> Option<&RepositoryHistory> {
        self.repositories.get(repository)
    }

    pub fn repository_mut(&mut self, repository: &str) -> &mut RepositoryHistory {
        self.repositories.entry(repository.to_string()).or_default()
    }

    pub fn total_reviews(&self) -> usize {
        self.repositories.values().map(|r| r.reviews.len()).sum()
    }
}

/// Reviews and transitions of one repository
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryHistory {
    #[serde(default)]
    pub reviews: Vec<ReviewSnapshot>,
    #[serde(default)]
    pub transitions: Vec<ApprovalTransition>,
}

impl RepositoryHistory {
    /// Insert in timestamp order, then evict the oldest entries beyond `cap`
    ///
    /// Returns the number of evicted snapshots.
    pub fn insert_review(
        &mut self,
        repository: &str,
        snapshot: ReviewSnapshot,
        cap: Option<usize>,
    ) -> Result<usize> {
        self.insert_review_with_transition(repository, snapshot, None, cap, None)
    }

    /// Append a transition; a second transition of the same PR at the same
    /// timestamp is rejected
    pub fn insert_transition(
        &mut self,
        repository: &str,
        mut transition: ApprovalTransition,
        cap: Option<usize>,
    ) -> Result<usize> {
        transition.repository = repository.to_string();
        self.ensure_new_transition(&transition)?;
        Ok(self.push_transition(transition, cap))
    }

    /// Insert a snapshot and its transition as one unit
    ///
    /// Both keys are checked before anything changes, so a duplicate leaves
    /// the history untouched. Stored records carry `repository`, whatever the
    /// caller's values say.
    pub fn insert_review_with_transition(
        &mut self,
        repository: &str,
        mut snapshot: ReviewSnapshot,
        transition: Option<ApprovalTransition>,
        review_cap: Option<usize>,
        transition_cap: Option<usize>,
    ) -> Result<usize> {
        snapshot.repository = repository.to_string();
        if self.reviews.iter().any(|existing| existing.same_key(&snapshot)) {
            return Err(ReviewHistoryError::AlreadyExists(snapshot.key_string()));
        }
        let transition = transition.map(|mut t| {
            t.repository = repository.to_string();
            t
        });
        if let Some(transition) = &transition {
            self.ensure_new_transition(transition)?;
        }

        // Equal timestamps keep arrival order
        let index = self
            .reviews
            .partition_point(|existing| existing.timestamp <= snapshot.timestamp);
        self.reviews.insert(index, snapshot);
        let evicted = match review_cap {
            Some(cap) => evict_front(&mut self.reviews, cap),
            None => 0,
        };

        if let Some(transition) = transition {
            self.push_transition(transition, transition_cap);
        }
        Ok(evicted)
    }

    fn ensure_new_transition(&self, transition: &ApprovalTransition) -> Result<()> {
        let duplicate = self.transitions.iter().any(|existing| {
            existing.pr_number == transition.pr_number && existing.timestamp == transition.timestamp
        });
        if duplicate {
            return Err(ReviewHistoryError::AlreadyExists(format!(
                "transition {}#{}@{}",
                transition.repository,
                transition.pr_number,
                format_timestamp(&transition.timestamp)
            )));
        }
        Ok(())
    }

    fn push_transition(&mut self, transition: ApprovalTransition, cap: Option<usize>) -> usize {
        let index = self
            .transitions
            .partition_point(|existing| existing.timestamp <= transition.timestamp);
        self.transitions.insert(index, transition);

        match cap {
            Some(cap) => evict_front(&mut self.transitions, cap),
            None => 0,
        }
    }

    /// Snapshots of one PR, ascending
    pub fn history_for(&self, pr_number: u64) -> Vec<ReviewSnapshot> {
        self.reviews
            .iter()
            .filter(|s| s.pr_number == pr_number)
            .cloned()
            .collect()
    }

    pub fn transitions_for(&self, pr_number: u64) -> Vec<ApprovalTransition> {
        self.transitions
            .iter()
            .filter(|t| t.pr_number == pr_number)
            .cloned()
            .collect()
    }

    /// Most recent first
    pub fn recent(&self, limit: Option<usize>) -> Vec<ReviewSnapshot> {
        let take = limit.unwrap_or(self.reviews.len());
        self.reviews.iter().rev().take(take).cloned().collect()
    }

    pub fn stats(&self, repository: &str) -> StorageStats {
        StorageStats::from_snapshots(repository, &self.reviews)
    }

    pub fn annotate(
        &mut self,
        pr_number: u64,
        timestamp: DateTime<Utc>,
        effectiveness: &Effectiveness,
    ) -> bool {
        match self
            .reviews
            .iter_mut()
            .find(|s| s.pr_number == pr_number && s.timestamp == timestamp)
        {
            Some(snapshot) => {
                snapshot
                    .effectiveness
                    .get_or_insert_with(Effectiveness::default)
                    .merge(effectiveness);
                true
            }
            None => false,
        }
    }

    /// Keep only the `keep_last` most recent snapshots
    pub fn truncate_reviews(&mut self, keep_last: usize) -> usize {
        evict_front(&mut self.reviews, keep_last)
    }
}

fn evict_front<T>(items: &mut Vec<T>, cap: usize) -> usize {
    if items.len() <= cap {
        return 0;
    }
    let excess = items.len() - cap;
    items.drain(..excess);
    excess
}
