//! Deterministic selection of the next backlog story.

use std::cmp::Ordering;

use crate::core::types::Story;

/// Index of the next unfinished story, or `None` when every story passes.
///
/// Unfinished stories are ordered by priority (ascending), then id (ascending).
/// A missing or non-numeric priority or id sorts after every finite value;
/// stories that still tie keep their backlog order.
pub fn select_next(stories: &[Story]) -> Option<usize> {
    stories
        .iter()
        .enumerate()
        .filter(|(_, story)| !story.passes())
        .min_by(|(ia, a), (ib, b)| compare(a, b).then_with(|| ia.cmp(ib)))
        .map(|(index, _)| index)
}

/// Count of stories that have not passed yet.
pub fn remaining(stories: &[Story]) -> usize {
    stories.iter().filter(|story| !story.passes()).count()
}

fn compare(a: &Story, b: &Story) -> Ordering {
    rank(a.priority())
        .total_cmp(&rank(b.priority()))
        .then_with(|| rank(a.numeric_id()).total_cmp(&rank(b.numeric_id())))
}

fn rank(value: Option<f64>) -> f64 {
    value.unwrap_or(f64::INFINITY)
}
