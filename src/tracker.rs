//! Approval transition tracking
//!
//! Pure functions over snapshot sequences. Backends only store what these
//! produce; the caller runs [`detect_transition`] before every save.

use crate::types::{ApprovalTransition, ReviewHistory, ReviewOutcome, ReviewSnapshot, TransitionTrigger};

/// Only `MERGE` counts as approved
pub fn is_approved(outcome: ReviewOutcome) -> bool {
    outcome.is_approved()
}

/// Number of times consecutive snapshots cross the approved/not-approved
/// boundary. `DONT_MERGE` to `MERGE_AFTER_CHANGES` is not a crossing.
pub fn count_approval_changes(snapshots: &[ReviewSnapshot]) -> usize {
    let mut states = snapshots.iter().map(|s| is_approved(s.outcome));
    let Some(mut approved) = states.next() else {
        return 0;
    };

    let mut changes = 0;
    for state in states {
        if state != approved {
            changes += 1;
            approved = state;
        }
    }
    changes
}

/// Transition to record when `current` follows `previous`
///
/// Any change of literal outcome is recorded, including changes that stay
/// on the same side of the approval boundary. Mention-triggered snapshots
/// are classified as `MENTION` regardless of `trigger`.
pub fn detect_transition(
    previous: Option<&ReviewSnapshot>,
    current: &ReviewSnapshot,
    trigger: TransitionTrigger,
) -> Option<ApprovalTransition> {
    let previous = previous?;
    if previous.outcome == current.outcome {
        return None;
    }

    Some(ApprovalTransition {
        timestamp: current.timestamp,
        repository: current.repository.clone(),
        pr_number: current.pr_number,
        from_outcome: previous.outcome,
        to_outcome: current.outcome,
        trigger: TransitionTrigger::for_snapshot(current, trigger),
    })
}

/// Aggregate a PR's snapshots into its [`ReviewHistory`]
///
/// Snapshots are sorted ascending and duplicates of the same timestamp are
/// collapsed to the first occurrence.
pub fn build_review_history(
    repository: &str,
    pr_number: u64,
    mut snapshots: Vec<ReviewSnapshot>,
) -> ReviewHistory {
    snapshots.sort_by_key(|s| s.timestamp);
    snapshots.dedup_by(|later, earlier| later.timestamp == earlier.timestamp);

    ReviewHistory {
        repository: repository.to_string(),
        pr_number,
        first_review: snapshots.first().map(|s| s.timestamp),
        last_review: snapshots.last().map(|s| s.timestamp),
        approval_changes: count_approval_changes(&snapshots),
        mention_triggered: snapshots.iter().filter(|s| s.triggered_by_mention).count(),
        snapshots,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_utils::snapshot_at;
    use proptest::prelude::*;
    use ReviewOutcome::*;

    fn sequence(outcomes: &[ReviewOutcome]) -> Vec<ReviewSnapshot> {
        outcomes
            .iter()
            .enumerate()
            .map(|(i, outcome)| snapshot_at("acme/api", 1, i as u32, *outcome))
            .collect()
    }

    #[test]
    fn test_only_merge_is_approved() {
        assert!(is_approved(Merge));
        assert!(!is_approved(MergeAfterChanges));
        assert!(!is_approved(DontMerge));
        assert!(!is_approved(Unknown));
    }

    #[test]
    fn test_boundary_crossings() {
        assert_eq!(count_approval_changes(&[]), 0);
        assert_eq!(count_approval_changes(&sequence(&[Merge])), 0);
        assert_eq!(count_approval_changes(&sequence(&[Merge, DontMerge, Merge])), 2);
        assert_eq!(
            count_approval_changes(&sequence(&[DontMerge, MergeAfterChanges, Unknown])),
            0
        );
        assert_eq!(
            count_approval_changes(&sequence(&[DontMerge, MergeAfterChanges, Merge, Merge])),
            1
        );
    }

    #[test]
    fn test_detect_literal_change() {
        let snapshots = sequence(&[DontMerge, MergeAfterChanges, MergeAfterChanges]);

        assert!(detect_transition(None, &snapshots[0], TransitionTrigger::Review).is_none());

        let transition =
            detect_transition(Some(&snapshots[0]), &snapshots[1], TransitionTrigger::Commit)
                .unwrap();
        assert_eq!(transition.from_outcome, DontMerge);
        assert_eq!(transition.to_outcome, MergeAfterChanges);
        assert_eq!(transition.trigger, TransitionTrigger::Commit);
        assert_eq!(transition.timestamp, snapshots[1].timestamp);

        assert!(
            detect_transition(Some(&snapshots[1]), &snapshots[2], TransitionTrigger::Review)
                .is_none()
        );
    }

    #[test]
    fn test_mention_overrides_trigger() {
        let previous = snapshot_at("acme/api", 1, 0, Merge);
        let current = snapshot_at("acme/api", 1, 1, DontMerge).triggered_by_mention(true);
        let transition =
            detect_transition(Some(&previous), &current, TransitionTrigger::Review).unwrap();
        assert_eq!(transition.trigger, TransitionTrigger::Mention);
    }

    #[test]
    fn test_build_history_sorts_and_dedups() {
        let mut snapshots = sequence(&[Merge, DontMerge, Merge]);
        snapshots[2] = snapshots[2].clone().triggered_by_mention(true);
        snapshots.reverse();
        snapshots.push(snapshots[0].clone());

        let history = build_review_history("acme/api", 1, snapshots);
        assert_eq!(history.snapshots.len(), 3);
        assert!(history.snapshots.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(history.approval_changes, 2);
        assert_eq!(history.mention_triggered, 1);
        assert_eq!(history.first_review, Some(history.snapshots[0].timestamp));
    }

    #[test]
    fn test_empty_history() {
        let history = build_review_history("acme/api", 9, Vec::new());
        assert_eq!(history.first_review, None);
        assert_eq!(history.approval_changes, 0);
    }

    fn outcome_strategy() -> impl Strategy<Value = ReviewOutcome> {
        prop_oneof![Just(Merge), Just(DontMerge), Just(MergeAfterChanges), Just(Unknown)]
    }

    proptest! {
        #[test]
        fn prop_changes_bounded_by_literal_transitions(
            outcomes in prop::collection::vec(outcome_strategy(), 0..40)
        ) {
            let snapshots = sequence(&outcomes);
            let literal = snapshots
                .windows(2)
                .filter_map(|w| detect_transition(Some(&w[0]), &w[1], TransitionTrigger::Review))
                .count();
            let crossings = count_approval_changes(&snapshots);
            prop_assert!(crossings <= literal);
            prop_assert!(crossings <= snapshots.len().saturating_sub(1));
        }

        #[test]
        fn prop_crossings_parity_matches_endpoints(
            outcomes in prop::collection::vec(outcome_strategy(), 1..40)
        ) {
            let crossings = count_approval_changes(&sequence(&outcomes));
            let first = is_approved(outcomes[0]);
            let last = is_approved(outcomes[outcomes.len() - 1]);
            prop_assert_eq!(crossings % 2 == 1, first != last);
        }
    }
}
