//! Topical candidates: weighted overlap of metadata facets.

use mesh_state::{MemoryRecord, RelationType};

use super::{rank_and_cap, set_overlap, Candidate};
use crate::config::TopicalConfig;

/// Weighted facet overlap plus a same-domain boost, capped at 1.
pub fn topical_score(a: &MemoryRecord, b: &MemoryRecord, config: &TopicalConfig) -> f64 {
    let w = &config.weights;
    let (ma, mb) = (&a.metadata, &b.metadata);
    let mut score = w.topics * set_overlap(&ma.topics, &mb.topics)
        + w.categories * set_overlap(&ma.categories, &mb.categories)
        + w.key_points * set_overlap(&ma.key_points, &mb.key_points)
        + w.searchable_terms * set_overlap(&ma.searchable_terms, &mb.searchable_terms);

    if let (Some(da), Some(db)) = (a.domain(), b.domain()) {
        if da == db {
            score += config.same_domain_boost;
        }
    }
    score.min(1.0)
}

/// Pool members whose topical score clears the threshold.
pub fn topical_candidates(
    source: &MemoryRecord,
    pool: &[MemoryRecord],
    config: &TopicalConfig,
) -> Vec<Candidate> {
    if source.metadata.is_empty() && source.url.is_none() {
        return Vec::new();
    }
    let out = pool
        .iter()
        .filter(|m| m.id != source.id && m.owner_id == source.owner_id)
        .filter_map(|m| {
            let score = topical_score(source, m, config);
            (score >= config.threshold).then(|| Candidate::new(&m.id, RelationType::Topical, score))
        })
        .collect();
    rank_and_cap(out, config.cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_state::MemoryMetadata;

    fn mem(id: &str, topics: &[&str]) -> MemoryRecord {
        MemoryRecord::new(id, "u1", id).with_metadata(MemoryMetadata::with_topics(
            topics.iter().copied(),
        ))
    }

    #[test]
    fn weighted_overlap() {
        let c = TopicalConfig::default();
        let a = mem("a", &["x", "y", "z"]);
        let b = mem("b", &["x", "y"]);
        // 0.4 * 2/3
        assert!((topical_score(&a, &b, &c) - 0.2667).abs() < 1e-3);

        let mut full_a = a.clone();
        full_a.metadata.categories = ["dev".to_string()].into();
        let mut full_b = b.clone();
        full_b.metadata.categories = ["dev".to_string()].into();
        assert!((topical_score(&full_a, &full_b, &c) - 0.5667).abs() < 1e-3);
    }

    #[test]
    fn same_domain_boost_is_capped() {
        let c = TopicalConfig::default();
        let mut a = mem("a", &["x"]).with_url("https://www.example.com/1");
        a.metadata.categories = ["c".to_string()].into();
        a.metadata.key_points = ["k".to_string()].into();
        a.metadata.searchable_terms = ["t".to_string()].into();
        let mut b = a.clone();
        b.id = "b".into();
        b.url = Some("https://example.com/2".into());
        assert_eq!(topical_score(&a, &b, &c), 1.0);
    }

    #[test]
    fn threshold_and_cap() {
        let c = TopicalConfig {
            cap: 2,
            ..TopicalConfig::default()
        };
        let source = mem("s", &["x", "y", "z"]);
        let pool = vec![
            source.clone(),
            mem("one", &["x"]),
            mem("two", &["x", "y"]),
            mem("three", &["x", "y", "z"]),
            mem("none", &["q"]),
            MemoryRecord::new("other-owner", "u2", "o")
                .with_metadata(MemoryMetadata::with_topics(["x", "y", "z"])),
        ];
        let out = topical_candidates(&source, &pool, &c);
        let ids: Vec<&str> = out.iter().map(|c| c.target_id.as_str()).collect();
        assert_eq!(ids, vec!["three", "two"]);
    }

    #[test]
    fn empty_source_yields_nothing() {
        let source = MemoryRecord::new("s", "u1", "s");
        let pool = vec![mem("a", &["x"])];
        assert!(topical_candidates(&source, &pool, &TopicalConfig::default()).is_empty());
    }
}
