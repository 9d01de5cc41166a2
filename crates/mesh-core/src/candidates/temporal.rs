//! Temporal candidates: memories captured close in time.

use chrono::Duration;

use mesh_state::{MemoryRecord, RelationType};

use super::{rank_and_cap, Candidate};
use crate::config::TemporalConfig;

/// Pairs further apart than this never score.
pub const MAX_TEMPORAL_GAP_SECS: i64 = 30 * 86_400;

/// (upper bound of |Δt| in seconds, score at the tier start, score at the bound)
const TIERS: [(i64, f64, f64); 4] = [
    (3_600, 1.0, 0.9),
    (86_400, 0.9, 0.7),
    (7 * 86_400, 0.7, 0.4),
    (MAX_TEMPORAL_GAP_SECS, 0.4, 0.1),
];

/// Score for an absolute time difference, or `None` past a month.
///
/// Within a tier the score falls linearly from the tier's start to its bound.
pub fn temporal_score(delta: Duration) -> Option<f64> {
    let secs = delta.num_seconds().abs();
    let mut start = 0i64;
    for (bound, hi, lo) in TIERS {
        if secs <= bound {
            let t = (secs - start) as f64 / (bound - start) as f64;
            return Some(hi - (hi - lo) * t);
        }
        start = bound;
    }
    None
}

/// Pool members created close enough to the source to clear the threshold.
pub fn temporal_candidates(
    source: &MemoryRecord,
    pool: &[MemoryRecord],
    config: &TemporalConfig,
) -> Vec<Candidate> {
    let out = pool
        .iter()
        .filter(|m| m.id != source.id && m.owner_id == source.owner_id)
        .filter_map(|m| {
            let score = temporal_score(m.created_at - source.created_at)?;
            (score >= config.threshold)
                .then(|| Candidate::new(&m.id, RelationType::Temporal, score))
        })
        .collect();
    rank_and_cap(out, config.cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn approx(d: Duration, expected: f64) {
        let got = temporal_score(d).unwrap();
        assert!((got - expected).abs() < 1e-9, "{d:?}: {got} != {expected}");
    }

    #[test]
    fn tier_boundaries() {
        approx(Duration::zero(), 1.0);
        approx(Duration::minutes(30), 0.95);
        approx(Duration::hours(1), 0.9);
        approx(Duration::hours(-1), 0.9);
        approx(Duration::days(1), 0.7);
        approx(Duration::days(7), 0.4);
        approx(Duration::days(30), 0.1);
        assert!(temporal_score(Duration::days(31)).is_none());
    }

    #[test]
    fn monotone_non_increasing() {
        let mut prev = 1.0;
        for h in 0..(30 * 24) {
            let s = temporal_score(Duration::hours(h)).unwrap();
            assert!(s <= prev + 1e-12);
            prev = s;
        }
    }

    #[test]
    fn threshold_and_cap() {
        let now = Utc::now();
        let source = MemoryRecord::new("s", "u1", "s").with_created_at(now);
        let pool: Vec<MemoryRecord> = [1i64, 2, 3, 30, 400, 700]
            .iter()
            .map(|h| {
                MemoryRecord::new(&format!("h{h}"), "u1", "m")
                    .with_created_at(now - Duration::hours(*h))
            })
            .collect();
        let out = temporal_candidates(&source, &pool, &TemporalConfig::default());
        let ids: Vec<&str> = out.iter().map(|c| c.target_id.as_str()).collect();
        // 700h is past the 0.2 threshold
        assert_eq!(ids, vec!["h1", "h2", "h3", "h30", "h400"]);
        assert!(out.iter().all(|c| c.relation_type == RelationType::Temporal));
    }
}
