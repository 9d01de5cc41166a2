//! Merging candidates from all signals into one list per source.
//!
//! Candidates for the same target collapse into one. Occurrences scoring
//! within `specificity_tie_margin` of the best are treated as tied; among
//! those the most specific relation type wins and keeps its own score.

use std::collections::BTreeMap;

use crate::candidates::{rank_and_cap, Candidate};
use crate::config::MergeConfig;

/// Tolerance for float noise when comparing against the tie margin.
const MARGIN_EPSILON: f64 = 1e-9;

pub fn merge_candidates<I>(candidates: I, config: &MergeConfig) -> Vec<Candidate>
where
    I: IntoIterator<Item = Candidate>,
{
    let mut by_target: BTreeMap<String, Vec<Candidate>> = BTreeMap::new();
    for c in candidates {
        by_target.entry(c.target_id.clone()).or_default().push(c);
    }

    let merged: Vec<Candidate> = by_target
        .into_values()
        .filter_map(|group| pick(group, config.specificity_tie_margin))
        .collect();
    let len = merged.len();
    rank_and_cap(merged, len)
}

fn pick(group: Vec<Candidate>, margin: f64) -> Option<Candidate> {
    let best = group.iter().map(|c| c.score).fold(f64::NEG_INFINITY, f64::max);
    group
        .into_iter()
        .filter(|c| best - c.score <= margin + MARGIN_EPSILON)
        .max_by(|a, b| {
            a.relation_type
                .specificity()
                .cmp(&b.relation_type.specificity())
                .then_with(|| a.score.total_cmp(&b.score))
        })
}
