//! Core data types for the review-history subsystem
//!
//! Defines the review snapshot and approval transition entities shared by
//! every storage backend, plus the derived aggregates computed from them.

use crate::error::{ReviewHistoryError, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Outcome of a single AI review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewOutcome {
    Merge,
    DontMerge,
    MergeAfterChanges,
    Unknown,
}

impl ReviewOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewOutcome::Merge => "MERGE",
            ReviewOutcome::DontMerge => "DONT_MERGE",
            ReviewOutcome::MergeAfterChanges => "MERGE_AFTER_CHANGES",
            ReviewOutcome::Unknown => "UNKNOWN",
        }
    }

    /// Only an unconditional MERGE counts as approved
    pub fn is_approved(&self) -> bool {
        matches!(self, ReviewOutcome::Merge)
    }
}

impl FromStr for ReviewOutcome {
    type Err = ReviewHistoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MERGE" => Ok(ReviewOutcome::Merge),
            "DONT_MERGE" => Ok(ReviewOutcome::DontMerge),
            "MERGE_AFTER_CHANGES" => Ok(ReviewOutcome::MergeAfterChanges),
            "UNKNOWN" => Ok(ReviewOutcome::Unknown),
            other => Err(ReviewHistoryError::InvalidOperation(format!(
                "Unknown review outcome: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ReviewOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Issue counts by severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCounts {
    #[serde(default)]
    pub high: u32,
    #[serde(default)]
    pub medium: u32,
    #[serde(default)]
    pub low: u32,
}

impl IssueCounts {
    pub fn total(&self) -> u32 {
        self.high + self.medium + self.low
    }
}

/// Metrics captured while generating a review
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewMetrics {
    #[serde(default)]
    pub processing_time_ms: u64,
    #[serde(default)]
    pub issues: IssueCounts,
    #[serde(default)]
    pub rules_applied: u32,
    #[serde(default)]
    pub patterns_detected: u32,
}

/// Developer reaction to a posted review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackSentiment {
    Positive,
    Neutral,
    Negative,
}

impl FeedbackSentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackSentiment::Positive => "positive",
            FeedbackSentiment::Neutral => "neutral",
            FeedbackSentiment::Negative => "negative",
        }
    }
}

impl FromStr for FeedbackSentiment {
    type Err = ReviewHistoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Ok(FeedbackSentiment::Positive),
            "neutral" => Ok(FeedbackSentiment::Neutral),
            "negative" => Ok(FeedbackSentiment::Negative),
            other => Err(ReviewHistoryError::InvalidOperation(format!(
                "Unknown feedback sentiment: {}",
                other
            ))),
        }
    }
}

/// Effectiveness annotation added after a review was posted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Effectiveness {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implemented_suggestions: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub developer_sentiment: Option<FeedbackSentiment>,
}

impl Effectiveness {
    /// Overlay the fields present in `update`, keeping existing values otherwise
    pub fn merge(&mut self, update: &Effectiveness) {
        if update.implemented_suggestions.is_some() {
            self.implemented_suggestions = update.implemented_suggestions;
        }
        if update.developer_sentiment.is_some() {
            self.developer_sentiment = update.developer_sentiment;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.implemented_suggestions.is_none() && self.developer_sentiment.is_none()
    }
}

/// One persisted AI review event for a pull request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSnapshot {
    pub timestamp: DateTime<Utc>,
    pub repository: String,
    pub pr_number: u64,
    pub pr_title: String,
    pub pr_author: String,
    #[serde(default)]
    pub files_changed: u32,
    pub outcome: ReviewOutcome,
    #[serde(default)]
    pub review_text: String,
    #[serde(default)]
    pub metrics: ReviewMetrics,
    #[serde(default)]
    pub triggered_by_mention: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effectiveness: Option<Effectiveness>,
}

impl ReviewSnapshot {
    /// Create a snapshot stamped with the current time
    pub fn new(
        repository: impl Into<String>,
        pr_number: u64,
        pr_title: impl Into<String>,
        pr_author: impl Into<String>,
        outcome: ReviewOutcome,
    ) -> Self {
        Self {
            timestamp: normalize_timestamp(Utc::now()),
            repository: repository.into(),
            pr_number,
            pr_title: pr_title.into(),
            pr_author: pr_author.into(),
            files_changed: 0,
            outcome,
            review_text: String::new(),
            metrics: ReviewMetrics::default(),
            triggered_by_mention: false,
            comment_id: None,
            effectiveness: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = normalize_timestamp(timestamp);
        self
    }

    pub fn with_review_text(mut self, text: impl Into<String>) -> Self {
        self.review_text = text.into();
        self
    }

    pub fn with_metrics(mut self, metrics: ReviewMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_files_changed(mut self, files_changed: u32) -> Self {
        self.files_changed = files_changed;
        self
    }

    pub fn with_comment_id(mut self, comment_id: u64) -> Self {
        self.comment_id = Some(comment_id);
        self
    }

    pub fn triggered_by_mention(mut self, mentioned: bool) -> Self {
        self.triggered_by_mention = mentioned;
        self
    }

    /// Whether this snapshot has the same identity as `other`
    pub fn same_key(&self, other: &ReviewSnapshot) -> bool {
        self.repository == other.repository
            && self.pr_number == other.pr_number
            && self.timestamp == other.timestamp
    }

    pub fn key_string(&self) -> String {
        format!(
            "{}#{}@{}",
            self.repository,
            self.pr_number,
            format_timestamp(&self.timestamp)
        )
    }
}

/// What caused a new review to be generated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionTrigger {
    /// Regular review run (PR opened or synchronized)
    Review,
    /// Review explicitly requested by mentioning the bot
    Mention,
    /// New commit pushed to the PR
    Commit,
}

impl TransitionTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionTrigger::Review => "REVIEW",
            TransitionTrigger::Mention => "MENTION",
            TransitionTrigger::Commit => "COMMIT",
        }
    }

    /// Classify a snapshot: mention-triggered reviews win over the caller's default
    pub fn for_snapshot(snapshot: &ReviewSnapshot, default: TransitionTrigger) -> Self {
        if snapshot.triggered_by_mention {
            TransitionTrigger::Mention
        } else {
            default
        }
    }
}

impl FromStr for TransitionTrigger {
    type Err = ReviewHistoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "REVIEW" => Ok(TransitionTrigger::Review),
            "MENTION" => Ok(TransitionTrigger::Mention),
            "COMMIT" => Ok(TransitionTrigger::Commit),
            other => Err(ReviewHistoryError::InvalidOperation(format!(
                "Unknown transition trigger: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for TransitionTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recorded change of outcome between two consecutive reviews of a PR
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalTransition {
    pub timestamp: DateTime<Utc>,
    pub repository: String,
    pub pr_number: u64,
    pub from_outcome: ReviewOutcome,
    pub to_outcome: ReviewOutcome,
    pub trigger: TransitionTrigger,
}

/// Per-PR aggregate computed from the persisted snapshot sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewHistory {
    pub repository: String,
    pub pr_number: u64,
    pub first_review: Option<DateTime<Utc>>,
    pub last_review: Option<DateTime<Utc>>,
    /// Ascending by timestamp, no duplicates
    pub snapshots: Vec<ReviewSnapshot>,
    pub approval_changes: usize,
    pub mention_triggered: usize,
}

/// Repository-wide aggregate, always recomputed from current backend state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    pub repository: String,
    pub total_reviews: u64,
    pub oldest_review: Option<DateTime<Utc>>,
    pub newest_review: Option<DateTime<Utc>>,
    pub approval_rate: f64,
    pub average_processing_ms: Option<f64>,
}

impl StorageStats {
    pub fn empty(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            total_reviews: 0,
            oldest_review: None,
            newest_review: None,
            approval_rate: 0.0,
            average_processing_ms: None,
        }
    }

    pub fn from_snapshots<'a>(
        repository: impl Into<String>,
        snapshots: impl IntoIterator<Item = &'a ReviewSnapshot>,
    ) -> Self {
        let mut stats = Self::empty(repository);
        let mut approved = 0u64;
        let mut processing_total = 0u128;

        for snapshot in snapshots {
            stats.total_reviews += 1;
            if snapshot.outcome.is_approved() {
                approved += 1;
            }
            processing_total += u128::from(snapshot.metrics.processing_time_ms);
            stats.oldest_review = Some(match stats.oldest_review {
                Some(oldest) if oldest <= snapshot.timestamp => oldest,
                _ => snapshot.timestamp,
            });
            stats.newest_review = Some(match stats.newest_review {
                Some(newest) if newest >= snapshot.timestamp => newest,
                _ => snapshot.timestamp,
            });
        }

        if stats.total_reviews > 0 {
            stats.approval_rate = approved as f64 / stats.total_reviews as f64;
            stats.average_processing_ms =
                Some(processing_total as f64 / stats.total_reviews as f64);
        }
        stats
    }
}

/// Historical approval figures for one author in a repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorApprovalRate {
    pub author: String,
    pub total_reviews: u64,
    pub approved_reviews: u64,
    pub approval_rate: f64,
}

impl AuthorApprovalRate {
    /// Group snapshots by author, ordered by review count then name
    pub fn from_snapshots<'a>(
        snapshots: impl IntoIterator<Item = &'a ReviewSnapshot>,
    ) -> Vec<AuthorApprovalRate> {
        let mut counts: std::collections::BTreeMap<&str, (u64, u64)> = Default::default();
        for snapshot in snapshots {
            let entry = counts.entry(snapshot.pr_author.as_str()).or_default();
            entry.0 += 1;
            if snapshot.outcome.is_approved() {
                entry.1 += 1;
            }
        }

        let mut rates: Vec<AuthorApprovalRate> = counts
            .into_iter()
            .map(|(author, (total, approved))| AuthorApprovalRate {
                author: author.to_string(),
                total_reviews: total,
                approved_reviews: approved,
                approval_rate: approved as f64 / total as f64,
            })
            .collect();
        rates.sort_by(|a, b| {
            b.total_reviews
                .cmp(&a.total_reviews)
                .then_with(|| a.author.cmp(&b.author))
        });
        rates
    }
}

/// Truncate to microseconds, the finest precision every backend keeps
pub fn normalize_timestamp(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.trunc_subsecs(6)
}

/// Fixed-width RFC 3339 text so lexical order matches chronological order
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ReviewHistoryError::Other(format!("Invalid timestamp '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot_at(minute: u32, outcome: ReviewOutcome, processing_ms: u64) -> ReviewSnapshot {
        ReviewSnapshot::new("acme/api", 1, "Add cache", "bob", outcome)
            .with_timestamp(Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap())
            .with_metrics(ReviewMetrics {
                processing_time_ms: processing_ms,
                ..Default::default()
            })
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&ReviewOutcome::MergeAfterChanges).unwrap();
        assert_eq!(json, "\"MERGE_AFTER_CHANGES\"");
        let parsed: ReviewOutcome = serde_json::from_str("\"DONT_MERGE\"").unwrap();
        assert_eq!(parsed, ReviewOutcome::DontMerge);
        assert_eq!("merge".parse::<ReviewOutcome>().unwrap(), ReviewOutcome::Merge);
        assert!("ship-it".parse::<ReviewOutcome>().is_err());
    }

    #[test]
    fn test_only_merge_is_approved() {
        assert!(ReviewOutcome::Merge.is_approved());
        assert!(!ReviewOutcome::MergeAfterChanges.is_approved());
        assert!(!ReviewOutcome::DontMerge.is_approved());
        assert!(!ReviewOutcome::Unknown.is_approved());
    }

    #[test]
    fn test_timestamp_format_is_fixed_width() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let late = early + chrono::Duration::microseconds(1500);
        let (a, b) = (format_timestamp(&early), format_timestamp(&late));
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert_eq!(parse_timestamp(&b).unwrap(), late);
    }

    #[test]
    fn test_normalize_drops_nanoseconds() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
            + chrono::Duration::nanoseconds(1_234_567);
        let normalized = normalize_timestamp(ts);
        assert_eq!(normalized.timestamp_subsec_nanos(), 1_234_000);
    }

    #[test]
    fn test_stats_empty() {
        let stats = StorageStats::from_snapshots("acme/api", std::iter::empty());
        assert_eq!(stats, StorageStats::empty("acme/api"));
        assert_eq!(stats.approval_rate, 0.0);
        assert!(stats.oldest_review.is_none());
        assert!(stats.newest_review.is_none());
    }

    #[test]
    fn test_stats_from_snapshots() {
        let snapshots = vec![
            snapshot_at(5, ReviewOutcome::DontMerge, 300),
            snapshot_at(1, ReviewOutcome::Merge, 100),
            snapshot_at(9, ReviewOutcome::Merge, 200),
            snapshot_at(3, ReviewOutcome::MergeAfterChanges, 400),
        ];
        let stats = StorageStats::from_snapshots("acme/api", &snapshots);
        assert_eq!(stats.total_reviews, 4);
        assert_eq!(stats.approval_rate, 0.5);
        assert_eq!(stats.oldest_review, Some(snapshots[1].timestamp));
        assert_eq!(stats.newest_review, Some(snapshots[2].timestamp));
        assert_eq!(stats.average_processing_ms, Some(250.0));
    }

    #[test]
    fn test_effectiveness_merge_keeps_existing_fields() {
        let mut current = Effectiveness {
            implemented_suggestions: Some(2),
            developer_sentiment: None,
        };
        current.merge(&Effectiveness {
            implemented_suggestions: None,
            developer_sentiment: Some(FeedbackSentiment::Positive),
        });
        assert_eq!(current.implemented_suggestions, Some(2));
        assert_eq!(current.developer_sentiment, Some(FeedbackSentiment::Positive));
    }

    #[test]
    fn test_author_rates_group_and_order() {
        let mut snapshots = vec![
            snapshot_at(1, ReviewOutcome::Merge, 0),
            snapshot_at(2, ReviewOutcome::DontMerge, 0),
        ];
        let mut carol = snapshot_at(3, ReviewOutcome::Merge, 0);
        carol.pr_author = "carol".to_string();
        snapshots.push(carol);

        let rates = AuthorApprovalRate::from_snapshots(&snapshots);
        assert_eq!(rates.len(), 2);
        assert_eq!(rates[0].author, "bob");
        assert_eq!(rates[0].total_reviews, 2);
        assert_eq!(rates[0].approval_rate, 0.5);
        assert_eq!(rates[1].author, "carol");
        assert_eq!(rates[1].approval_rate, 1.0);
    }
}
