//! Candidate generation from three independent signals.
//!
//! - `semantic`: embedding similarity through the similarity index
//! - `topical`: weighted metadata overlap
//! - `temporal`: creation-time proximity
//!
//! Generators fail soft: missing data or an upstream error yields no
//! candidates rather than an error.

pub mod rules;
pub mod semantic;
pub mod temporal;
pub mod topical;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use mesh_state::RelationType;

pub use rules::{AdjustmentRule, CompiledRuleSet, DomainCategory, RulePredicate, SemanticRuleSet};
pub use semantic::SemanticGenerator;
pub use temporal::{temporal_candidates, temporal_score};
pub use topical::{topical_candidates, topical_score};

/// A scored, typed link proposal from one source memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub target_id: String,
    pub relation_type: RelationType,
    pub score: f64,
}

impl Candidate {
    pub fn new(target_id: &str, relation_type: RelationType, score: f64) -> Self {
        Self {
            target_id: target_id.to_string(),
            relation_type,
            score: mesh_state::clamp_score(score),
        }
    }
}

/// Intersection size over union size; two empty sets overlap 0.
pub fn set_overlap(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Sort best first (ties by target id) and keep at most `cap`.
pub(crate) fn rank_and_cap(mut candidates: Vec<Candidate>, cap: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.target_id.cmp(&b.target_id))
    });
    candidates.truncate(cap);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn overlap_ratio() {
        assert!((set_overlap(&set(&["x", "y", "z"]), &set(&["x", "y"])) - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(set_overlap(&set(&[]), &set(&[])), 0.0);
        assert_eq!(set_overlap(&set(&["a"]), &set(&["b"])), 0.0);
    }

    #[test]
    fn rank_and_cap_is_stable() {
        let ranked = rank_and_cap(
            vec![
                Candidate::new("b", RelationType::Topical, 0.5),
                Candidate::new("a", RelationType::Topical, 0.5),
                Candidate::new("c", RelationType::Topical, 0.9),
            ],
            2,
        );
        let ids: Vec<&str> = ranked.iter().map(|c| c.target_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn candidate_scores_are_clamped() {
        assert_eq!(Candidate::new("a", RelationType::Semantic, 1.7).score, 1.0);
        assert_eq!(Candidate::new("a", RelationType::Semantic, f64::NAN).score, 0.0);
    }
}
