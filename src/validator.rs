//! Historical validation of a pull request against past reviews
//!
//! Mines the most recent snapshots of a repository to produce
//! [`ValidationInsights`] before a new review is generated:
//!
//! - Similar PRs: +30 for the same author, +40 scaled by title-word Jaccard
//!   overlap, plus jitter in `[0, 10)` to break ties. Scores below 20 are
//!   dropped and the top 5 kept.
//! - Common issues: a fixed keyword vocabulary counted per review, promoted
//!   to high priority when most mentioning reviews reported high-severity
//!   issues.
//! - Approval patterns: author and repository approval rates.
//! - Recommendations: short templated strings for the review prompt.

use crate::config::ValidatorConfig;
use crate::types::{ReviewOutcome, ReviewSnapshot};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

const AUTHOR_WEIGHT: f64 = 30.0;
const TITLE_WEIGHT: f64 = 40.0;
const JITTER_RANGE: f64 = 10.0;
const MIN_SIMILARITY: f64 = 20.0;
const MAX_SIMILAR_PRS: usize = 5;
const MAX_COMMON_ISSUES: usize = 10;
const TOP_ISSUES_IN_RECOMMENDATIONS: usize = 3;
const LARGE_CHANGE_SET: usize = 20;
const LOW_APPROVAL_RATE: f64 = 0.5;

pub const COLD_START_RECOMMENDATION: &str =
    "No review history for this repository yet; building baseline from this review.";

static TITLE_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\w+").expect("Valid title word regex"));

/// Keyword vocabulary with default priorities
static ISSUE_PATTERNS: Lazy<Vec<(&'static str, IssuePriority, Regex)>> = Lazy::new(|| {
    [
        ("security", IssuePriority::High, r"\bsecurity\b|\bvulnerab"),
        ("memory leak", IssuePriority::High, r"\bmemory leaks?\b"),
        ("race condition", IssuePriority::High, r"\brace conditions?\b"),
        ("sql injection", IssuePriority::High, r"\bsql injection\b"),
        ("performance", IssuePriority::Medium, r"\bperformance\b"),
        ("type error", IssuePriority::Medium, r"\btype errors?\b"),
        ("error handling", IssuePriority::Medium, r"\berror handling\b"),
        ("test", IssuePriority::Medium, r"\btest"),
        ("documentation", IssuePriority::Low, r"\bdocumentation\b|\bdocs?\b"),
        ("naming", IssuePriority::Low, r"\bnaming\b"),
    ]
    .into_iter()
    .map(|(name, priority, pattern)| {
        (
            name,
            priority,
            Regex::new(pattern).expect("Valid issue keyword regex"),
        )
    })
    .collect()
});

/// Tie-breaking noise added to similarity scores
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    Disabled,
    /// Same seed, same scores
    Seeded(u64),
    Random,
}

impl Jitter {
    pub fn from_config(config: &ValidatorConfig) -> Self {
        match (config.jitter, config.jitter_seed) {
            (false, _) => Jitter::Disabled,
            (true, Some(seed)) => Jitter::Seeded(seed),
            (true, None) => Jitter::Random,
        }
    }

    fn rng(&self) -> Option<StdRng> {
        match self {
            Jitter::Disabled => None,
            Jitter::Seeded(seed) => Some(StdRng::seed_from_u64(*seed)),
            Jitter::Random => Some(StdRng::from_entropy()),
        }
    }
}

/// The pull request about to be reviewed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentPullRequest {
    pub number: u64,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub changed_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarPr {
    pub pr_number: u64,
    pub title: String,
    pub author: String,
    pub outcome: ReviewOutcome,
    pub reviewed_at: DateTime<Utc>,
    pub similarity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssuePriority {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for IssuePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssuePriority::High => write!(f, "high"),
            IssuePriority::Medium => write!(f, "medium"),
            IssuePriority::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonIssue {
    pub issue: String,
    /// Number of reviews mentioning the issue
    pub frequency: usize,
    pub priority: IssuePriority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalPatterns {
    /// `None` when the author has no reviewed PRs in the window
    pub author_approval_rate: Option<f64>,
    pub author_reviews: usize,
    pub repository_approval_rate: f64,
    /// Not derivable from snapshots alone; always `None`
    pub average_time_to_approval_hours: Option<f64>,
}

impl Default for ApprovalPatterns {
    fn default() -> Self {
        Self {
            author_approval_rate: None,
            author_reviews: 0,
            repository_approval_rate: 0.0,
            average_time_to_approval_hours: None,
        }
    }
}

/// Everything the review prompt gets from history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationInsights {
    pub similar_prs: Vec<SimilarPr>,
    pub common_issues: Vec<CommonIssue>,
    pub approval_patterns: ApprovalPatterns,
    pub recommendations: Vec<String>,
    /// Snapshots the analysis was based on
    pub reviews_considered: usize,
}

impl ValidationInsights {
    /// Insights for a repository without history
    pub fn cold_start() -> Self {
        Self {
            recommendations: vec![COLD_START_RECOMMENDATION.to_string()],
            ..Self::default()
        }
    }

    pub fn is_cold_start(&self) -> bool {
        self.reviews_considered == 0
    }
}

/// Stateless analyzer over a window of past reviews
#[derive(Debug, Clone)]
pub struct HistoricalValidator {
    history_limit: usize,
    jitter: Jitter,
}

impl Default for HistoricalValidator {
    fn default() -> Self {
        Self::new(&ValidatorConfig::default())
    }
}

impl HistoricalValidator {
    pub fn new(config: &ValidatorConfig) -> Self {
        Self {
            history_limit: config.history_limit.max(1),
            jitter: Jitter::from_config(config),
        }
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// How many recent snapshots to fetch for [`Self::analyze`]
    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Build insights for `current` from `history` (any order)
    pub fn analyze(&self, current: &CurrentPullRequest, history: &[ReviewSnapshot]) -> ValidationInsights {
        let mut window: Vec<&ReviewSnapshot> = history.iter().collect();
        window.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        window.truncate(self.history_limit);

        if window.is_empty() {
            debug!("No history for PR #{}, returning cold-start insights", current.number);
            return ValidationInsights::cold_start();
        }

        let similar_prs = self.find_similar_prs(current, &window);
        let common_issues = find_common_issues(&window);
        let approval_patterns = approval_patterns(current, &window);
        let recommendations =
            recommendations(current, &similar_prs, &common_issues, &approval_patterns);

        debug!(
            "Analyzed {} review(s) for PR #{}: {} similar, {} common issue(s)",
            window.len(),
            current.number,
            similar_prs.len(),
            common_issues.len()
        );

        ValidationInsights {
            similar_prs,
            common_issues,
            approval_patterns,
            recommendations,
            reviews_considered: window.len(),
        }
    }

    /// `window` must be sorted most recent first
    fn find_similar_prs(&self, current: &CurrentPullRequest, window: &[&ReviewSnapshot]) -> Vec<SimilarPr> {
        let mut rng = self.jitter.rng();
        let current_words = title_words(&current.title);
        let current_author = current.author.to_lowercase();

        let mut seen = HashSet::new();
        let mut similar: Vec<SimilarPr> = Vec::new();
        for snapshot in window {
            if snapshot.pr_number == current.number || !seen.insert(snapshot.pr_number) {
                continue;
            }

            let mut score = 0.0;
            if !current_author.is_empty() && snapshot.pr_author.to_lowercase() == current_author {
                score += AUTHOR_WEIGHT;
            }
            score += TITLE_WEIGHT * jaccard(&current_words, &title_words(&snapshot.pr_title));
            if let Some(rng) = rng.as_mut() {
                score += rng.gen_range(0.0..JITTER_RANGE);
            }

            if score >= MIN_SIMILARITY {
                similar.push(SimilarPr {
                    pr_number: snapshot.pr_number,
                    title: snapshot.pr_title.clone(),
                    author: snapshot.pr_author.clone(),
                    outcome: snapshot.outcome,
                    reviewed_at: snapshot.timestamp,
                    similarity: score,
                });
            }
        }

        similar.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| b.reviewed_at.cmp(&a.reviewed_at))
        });
        similar.truncate(MAX_SIMILAR_PRS);
        similar
    }
}

/// Lowercase title words longer than three characters, in any script
pub fn title_words(title: &str) -> HashSet<String> {
    let lowered = title.to_lowercase();
    TITLE_WORD
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|word| word.chars().count() > 3)
        .map(str::to_string)
        .collect()
}

/// |A ∩ B| / |A ∪ B|, zero when both are empty
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn find_common_issues(window: &[&ReviewSnapshot]) -> Vec<CommonIssue> {
    // keyword -> (mentioning reviews, of which with high-severity issues)
    let mut counts: HashMap<&'static str, (usize, usize)> = HashMap::new();

    for snapshot in window {
        let text = snapshot.review_text.to_lowercase();
        for (name, _, pattern) in ISSUE_PATTERNS.iter() {
            if pattern.is_match(&text) {
                let entry = counts.entry(*name).or_default();
                entry.0 += 1;
                if snapshot.metrics.issues.high > 0 {
                    entry.1 += 1;
                }
            }
        }
    }

    let mut issues: Vec<CommonIssue> = ISSUE_PATTERNS
        .iter()
        .filter_map(|(name, default_priority, _)| {
            let (frequency, with_high) = *counts.get(name)?;
            let priority = if with_high * 2 > frequency {
                IssuePriority::High
            } else {
                *default_priority
            };
            Some(CommonIssue {
                issue: name.to_string(),
                frequency,
                priority,
            })
        })
        .collect();

    issues.sort_by(|a, b| {
        b.frequency
            .cmp(&a.frequency)
            .then_with(|| a.priority.cmp(&b.priority))
            .then_with(|| a.issue.cmp(&b.issue))
    });
    issues.truncate(MAX_COMMON_ISSUES);
    issues
}

fn approval_patterns(current: &CurrentPullRequest, window: &[&ReviewSnapshot]) -> ApprovalPatterns {
    let approved = window.iter().filter(|s| s.outcome.is_approved()).count();

    // Latest outcome per PR for the author, so re-reviews are not overcounted
    let author = current.author.to_lowercase();
    let mut author_prs: BTreeMap<u64, ReviewOutcome> = BTreeMap::new();
    for snapshot in window {
        if snapshot.pr_author.to_lowercase() == author {
            author_prs.entry(snapshot.pr_number).or_insert(snapshot.outcome);
        }
    }
    let author_approved = author_prs.values().filter(|o| o.is_approved()).count();

    ApprovalPatterns {
        author_approval_rate: (!author_prs.is_empty())
            .then(|| author_approved as f64 / author_prs.len() as f64),
        author_reviews: author_prs.len(),
        repository_approval_rate: approved as f64 / window.len() as f64,
        average_time_to_approval_hours: None,
    }
}

fn recommendations(
    current: &CurrentPullRequest,
    similar_prs: &[SimilarPr],
    common_issues: &[CommonIssue],
    patterns: &ApprovalPatterns,
) -> Vec<String> {
    let mut out = Vec::new();

    if let Some(rate) = patterns.author_approval_rate {
        if rate < LOW_APPROVAL_RATE {
            out.push(format!(
                "{} has a {:.0}% approval rate across {} previous PR(s); check for recurring problems.",
                current.author,
                rate * 100.0,
                patterns.author_reviews
            ));
        }
    }

    for issue in common_issues.iter().take(TOP_ISSUES_IN_RECOMMENDATIONS) {
        out.push(format!(
            "Watch for {} issues ({} priority, raised in {} past review(s)).",
            issue.issue, issue.priority, issue.frequency
        ));
    }

    if !similar_prs.is_empty() {
        let approved = similar_prs.iter().filter(|pr| pr.outcome.is_approved()).count();
        let numbers: Vec<String> = similar_prs.iter().map(|pr| format!("#{}", pr.pr_number)).collect();
        out.push(format!(
            "{} similar PR(s) ({}) were reviewed before; {} of them approved.",
            similar_prs.len(),
            numbers.join(", "),
            approved
        ));
    }

    if current.changed_files.len() > LARGE_CHANGE_SET {
        out.push(format!(
            "Large change set ({} files); consider reviewing in smaller chunks.",
            current.changed_files.len()
        ));
    }

    if patterns.repository_approval_rate < LOW_APPROVAL_RATE {
        out.push(format!(
            "Repository approval rate is {:.0}%; apply the established review standards strictly.",
            patterns.repository_approval_rate * 100.0
        ));
    }

    out
}
