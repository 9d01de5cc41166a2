//! Confidence-tiered acceptance of merged candidates.
//!
//! | Tier | Score band | Decision |
//! | --- | --- | --- |
//! | 1 | `>= accept_threshold` | accepted |
//! | 2 | `[heuristic_floor, accept_threshold)` | metadata heuristic |
//! | 3 | `[arbitration_floor, heuristic_floor)` | arbiter, if eligible |
//!
//! Tier 3 is only attempted when both memories are topic-rich and close in
//! time; otherwise the candidate is dropped. When the arbiter cannot answer,
//! tier-3 candidates fall back to the tier-2 heuristic. Candidates that were
//! never judged (ineligible, or past the per-source arbitration cap) remain
//! material for the top-N fallback.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use tracing::debug;

use mesh_arbiter::{
    cache_key, ArbiterError, ArbitrationCache, ArbitrationVerdict, MemorySummary,
    RelevanceArbiter,
};
use mesh_state::{MemoryRecord, RelationType};

use crate::candidates::{rank_and_cap, set_overlap, Candidate};
use crate::config::FilterConfig;
use crate::metrics::METRICS;
use crate::obs;

/// How tier 3 went for one source memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArbitrationStatus {
    #[default]
    NotNeeded,
    Completed {
        cache_hits: usize,
        called: usize,
    },
    /// The arbiter failed; uncached candidates were judged by the heuristic.
    Degraded {
        cache_hits: usize,
        reason: String,
    },
}

/// Result of filtering one source's candidates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterOutcome {
    pub accepted: Vec<Candidate>,
    pub tier1: usize,
    pub tier2_accepted: usize,
    pub tier2_rejected: usize,
    pub tier3_eligible: usize,
    pub tier3_accepted: usize,
    pub dropped: usize,
    pub used_fallback: bool,
    pub arbitration: ArbitrationStatus,
}

enum Judgement {
    Verdict(ArbitrationVerdict),
    Heuristic,
}

pub struct TieredFilter {
    config: FilterConfig,
    arbiter: Arc<dyn RelevanceArbiter>,
    cache: Arc<dyn ArbitrationCache>,
}

impl TieredFilter {
    pub fn new(
        config: FilterConfig,
        arbiter: Arc<dyn RelevanceArbiter>,
        cache: Arc<dyn ArbitrationCache>,
    ) -> Self {
        Self {
            config,
            arbiter,
            cache,
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Tier-2 score: weighted topic and category overlap plus same domain.
    pub fn heuristic_score(&self, a: &MemoryRecord, b: &MemoryRecord) -> f64 {
        let same_domain = matches!((a.domain(), b.domain()), (Some(x), Some(y)) if x == y);
        let c = &self.config;
        let score = c.heuristic_topic_weight * set_overlap(&a.metadata.topics, &b.metadata.topics)
            + c.heuristic_category_weight
                * set_overlap(&a.metadata.categories, &b.metadata.categories)
            + if same_domain { c.heuristic_domain_weight } else { 0.0 };
        score.clamp(0.0, 1.0)
    }

    /// Whether a tier-3 candidate may be sent to the arbiter.
    pub fn arbitration_eligible(&self, a: &MemoryRecord, b: &MemoryRecord) -> bool {
        let min = self.config.arbitration_min_topics;
        let gap_secs = (a.created_at - b.created_at).num_seconds().abs();
        a.metadata.topics.len() >= min
            && b.metadata.topics.len() >= min
            && gap_secs <= ChronoDuration::days(self.config.arbitration_max_age_days).num_seconds()
    }

    /// Run the tiers over `candidates`.
    ///
    /// `memories` resolves candidate ids; tier 2 and 3 candidates that
    /// cannot be resolved are rejected.
    pub async fn filter(
        &self,
        source: &MemoryRecord,
        candidates: Vec<Candidate>,
        memories: &HashMap<String, MemoryRecord>,
    ) -> FilterOutcome {
        let c = &self.config;
        let mut out = FilterOutcome::default();
        let mut accepted = Vec::new();
        let mut fallback_pool = Vec::new();
        let mut tier3: Vec<(Candidate, &MemoryRecord)> = Vec::new();

        for cand in candidates {
            if cand.score >= c.accept_threshold {
                out.tier1 += 1;
                accepted.push(cand);
                continue;
            }
            let target = memories.get(&cand.target_id);
            if cand.score >= c.heuristic_floor {
                match target {
                    Some(t) if self.heuristic_score(source, t) >= c.heuristic_accept => {
                        out.tier2_accepted += 1;
                        accepted.push(cand);
                    }
                    _ => {
                        out.tier2_rejected += 1;
                        fallback_pool.push(cand);
                    }
                }
            } else if cand.score >= c.arbitration_floor {
                match target {
                    Some(t) if self.arbitration_eligible(source, t) => tier3.push((cand, t)),
                    _ => {
                        out.dropped += 1;
                        fallback_pool.push(cand);
                    }
                }
            } else {
                out.dropped += 1;
                fallback_pool.push(cand);
            }
        }

        out.tier3_eligible = tier3.len();
        if !tier3.is_empty() {
            tier3.sort_by(|(a, _), (b, _)| {
                b.score
                    .total_cmp(&a.score)
                    .then_with(|| a.target_id.cmp(&b.target_id))
            });
            if tier3.len() > c.max_arbitrated {
                let unjudged = tier3.split_off(c.max_arbitrated);
                out.dropped += unjudged.len();
                fallback_pool.extend(unjudged.into_iter().map(|(cand, _)| cand));
            }

            let (judgements, status) = self.arbitrate(source, &tier3).await;
            for ((cand, target), judgement) in tier3.into_iter().zip(judgements) {
                if let Some(accepted_cand) = self.apply_judgement(source, cand, target, judgement) {
                    out.tier3_accepted += 1;
                    accepted.push(accepted_cand);
                }
            }
            out.arbitration = status;
        }

        let mut accepted = rank_and_cap(accepted, c.max_relations);
        if accepted.is_empty() {
            let fallback: Vec<Candidate> = fallback_pool
                .into_iter()
                .filter(|cand| cand.score >= c.fallback_min_score)
                .map(|cand| Candidate::new(&cand.target_id, RelationType::Semantic, cand.score))
                .collect();
            accepted = rank_and_cap(fallback, c.fallback_count);
            out.used_fallback = !accepted.is_empty();
        }
        out.accepted = accepted;
        out
    }

    fn apply_judgement(
        &self,
        source: &MemoryRecord,
        cand: Candidate,
        target: &MemoryRecord,
        judgement: Judgement,
    ) -> Option<Candidate> {
        match judgement {
            Judgement::Verdict(v) => {
                if !v.is_relevant
                    || !v.relevance_score.is_finite()
                    || v.relevance_score < self.config.arbitration_accept
                {
                    debug!(target_id = %cand.target_id, reasoning = %v.reasoning, "Arbiter rejected candidate");
                    return None;
                }
                let relation_type = v.relation_type().unwrap_or(cand.relation_type);
                Some(Candidate::new(
                    &cand.target_id,
                    relation_type,
                    cand.score * v.relevance_score,
                ))
            }
            Judgement::Heuristic => {
                (self.heuristic_score(source, target) >= self.config.heuristic_accept).then_some(cand)
            }
        }
    }

    /// Cached verdicts first, then one batched call for the misses.
    async fn arbitrate(
        &self,
        source: &MemoryRecord,
        tier3: &[(Candidate, &MemoryRecord)],
    ) -> (Vec<Judgement>, ArbitrationStatus) {
        let source_topics: Vec<&String> = source.metadata.topics.iter().collect();
        let keys: Vec<String> = tier3
            .iter()
            .map(|(_, t)| {
                let target_topics: Vec<&String> = t.metadata.topics.iter().collect();
                cache_key(&source.id, &t.id, &source_topics, &target_topics)
            })
            .collect();

        let mut judgements: Vec<Option<Judgement>> = keys
            .iter()
            .map(|k| self.cache.get(k).map(Judgement::Verdict))
            .collect();
        let cache_hits = judgements.iter().filter(|j| j.is_some()).count();
        METRICS.add_arbitration_cache_hits(cache_hits as u64);

        let misses: Vec<usize> = (0..tier3.len()).filter(|i| judgements[*i].is_none()).collect();
        let status = if misses.is_empty() {
            ArbitrationStatus::Completed {
                cache_hits,
                called: 0,
            }
        } else {
            let summaries: Vec<MemorySummary> = misses
                .iter()
                .map(|i| MemorySummary::from(tier3[*i].1))
                .collect();
            METRICS.add_arbitration_calls(1);
            match self.call_arbiter(source, &summaries).await {
                Ok(verdicts) => {
                    let mut verdicts = verdicts.into_iter();
                    let mut missing = 0usize;
                    for i in &misses {
                        // Only real answers are cached; a gap is non-relevant for this run.
                        let v = match verdicts.next().flatten() {
                            Some(v) => {
                                if v.relevance_score.is_finite() {
                                    self.cache.put(keys[*i].clone(), v.clone());
                                }
                                v
                            }
                            None => {
                                missing += 1;
                                ArbitrationVerdict::non_relevant("no verdict returned")
                            }
                        };
                        judgements[*i] = Some(Judgement::Verdict(v));
                    }
                    if missing > 0 {
                        debug!(source_id = %source.id, missing, "Arbiter left candidates without a verdict");
                    }
                    ArbitrationStatus::Completed {
                        cache_hits,
                        called: misses.len(),
                    }
                }
                Err(e) => {
                    METRICS.add_arbitration_failures(1);
                    obs::emit_arbitration_degraded(&source.id, &e);
                    ArbitrationStatus::Degraded {
                        cache_hits,
                        reason: e.to_string(),
                    }
                }
            }
        };

        let judgements = judgements
            .into_iter()
            .map(|j| j.unwrap_or(Judgement::Heuristic))
            .collect();
        (judgements, status)
    }

    async fn call_arbiter(
        &self,
        source: &MemoryRecord,
        candidates: &[MemorySummary],
    ) -> Result<Vec<Option<ArbitrationVerdict>>, ArbiterError> {
        let timeout_ms = self.config.arbitration_timeout_ms;
        let source_summary = MemorySummary::from(source);
        match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.arbiter.evaluate_batch(&source_summary, candidates),
        )
        .await
        {
            Err(_) => Err(ArbiterError::Timeout { timeout_ms }),
            Ok(result) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use mesh_arbiter::{ArbiterResult, InMemoryArbitrationCache, UnavailableArbiter};
    use mesh_state::MemoryMetadata;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedArbiter {
        verdict: ArbitrationVerdict,
        calls: AtomicUsize,
        delay: Option<Duration>,
        /// Leading calls answered with no verdicts at all.
        silent_calls: usize,
    }

    impl ScriptedArbiter {
        fn relevant(score: f64, kind: &str) -> Self {
            Self {
                verdict: ArbitrationVerdict {
                    is_relevant: true,
                    relevance_score: score,
                    relationship_type: kind.to_string(),
                    reasoning: "related".into(),
                },
                calls: AtomicUsize::new(0),
                delay: None,
                silent_calls: 0,
            }
        }

        fn rejecting() -> Self {
            let mut a = Self::relevant(0.0, "none");
            a.verdict = ArbitrationVerdict::non_relevant("unrelated");
            a
        }
    }

    #[async_trait]
    impl RelevanceArbiter for ScriptedArbiter {
        async fn evaluate_batch(
            &self,
            _source: &MemorySummary,
            candidates: &[MemorySummary],
        ) -> ArbiterResult<Vec<Option<ArbitrationVerdict>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            if call < self.silent_calls {
                return Ok(Vec::new());
            }
            Ok(vec![Some(self.verdict.clone()); candidates.len()])
        }
    }

    fn mem(id: &str, topics: &[&str], age_days: i64) -> MemoryRecord {
        MemoryRecord::new(id, "u1", id)
            .with_created_at(Utc::now() - ChronoDuration::days(age_days))
            .with_metadata(MemoryMetadata::with_topics(topics.iter().copied()))
    }

    fn lookup(memories: &[MemoryRecord]) -> HashMap<String, MemoryRecord> {
        memories.iter().map(|m| (m.id.clone(), m.clone())).collect()
    }

    fn filter_with(arbiter: Arc<dyn RelevanceArbiter>) -> TieredFilter {
        TieredFilter::new(
            FilterConfig::default(),
            arbiter,
            Arc::new(InMemoryArbitrationCache::default()),
        )
    }

    #[tokio::test]
    async fn tier1_accepts_without_lookup() {
        let f = filter_with(Arc::new(UnavailableArbiter));
        let src = mem("s", &[], 0);
        let out = f
            .filter(&src, vec![Candidate::new("x", RelationType::Topical, 0.75)], &HashMap::new())
            .await;
        assert_eq!(out.tier1, 1);
        assert_eq!(out.accepted[0].target_id, "x");
        assert_eq!(out.arbitration, ArbitrationStatus::NotNeeded);
    }

    #[tokio::test]
    async fn tier2_uses_heuristic() {
        let f = filter_with(Arc::new(UnavailableArbiter));
        let src = mem("s", &["a", "b"], 0);
        let good = mem("good", &["a", "b"], 0);
        let bad = mem("bad", &["z"], 0);
        let out = f
            .filter(
                &src,
                vec![
                    Candidate::new("good", RelationType::Semantic, 0.6),
                    Candidate::new("bad", RelationType::Semantic, 0.6),
                ],
                &lookup(&[good, bad]),
            )
            .await;
        assert_eq!(out.tier2_accepted, 1);
        assert_eq!(out.tier2_rejected, 1);
        assert_eq!(out.accepted.len(), 1);
        assert_eq!(out.accepted[0].target_id, "good");
        assert!(!out.used_fallback);
    }

    #[tokio::test]
    async fn tier3_arbitrated_and_cached() {
        let arbiter = Arc::new(ScriptedArbiter::relevant(0.5, "topical"));
        let f = filter_with(arbiter.clone());
        let src = mem("s", &["a", "b", "c"], 0);
        let t = mem("t", &["a", "d", "e"], 2);
        let memories = lookup(&[t]);
        let cands = vec![Candidate::new("t", RelationType::Semantic, 0.45)];

        let out = f.filter(&src, cands.clone(), &memories).await;
        assert_eq!(out.tier3_accepted, 1);
        assert_eq!(out.accepted[0].relation_type, RelationType::Topical);
        assert!((out.accepted[0].score - 0.225).abs() < 1e-9);
        assert_eq!(
            out.arbitration,
            ArbitrationStatus::Completed {
                cache_hits: 0,
                called: 1
            }
        );

        let again = f.filter(&src, cands, &memories).await;
        assert_eq!(arbiter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            again.arbitration,
            ArbitrationStatus::Completed {
                cache_hits: 1,
                called: 0
            }
        );
    }

    #[tokio::test]
    async fn tier3_requires_topics_and_recency() {
        let arbiter = Arc::new(ScriptedArbiter::relevant(1.0, "semantic"));
        let f = filter_with(arbiter.clone());
        let src = mem("s", &["a", "b", "c"], 0);
        let thin = mem("thin", &["a", "b"], 1);
        let old = mem("old", &["a", "b", "c"], 10);
        let out = f
            .filter(
                &src,
                vec![
                    Candidate::new("thin", RelationType::Semantic, 0.45),
                    Candidate::new("old", RelationType::Semantic, 0.42),
                ],
                &lookup(&[thin, old]),
            )
            .await;
        assert_eq!(out.tier3_eligible, 0);
        assert_eq!(arbiter.calls.load(Ordering::SeqCst), 0);
        // Ineligible tier-3 candidates are still fallback material.
        assert!(out.used_fallback);
        assert_eq!(out.accepted.len(), 2);
        assert!(out
            .accepted
            .iter()
            .all(|c| c.relation_type == RelationType::Semantic));
    }

    #[tokio::test]
    async fn arbitration_capped_per_source() {
        let arbiter = Arc::new(ScriptedArbiter::relevant(1.0, "none"));
        let f = filter_with(arbiter);
        let src = mem("s", &["a", "b", "c"], 0);
        let targets: Vec<MemoryRecord> =
            (0..5).map(|i| mem(&format!("t{i}"), &["a", "b", "c"], 1)).collect();
        let cands = (0..5)
            .map(|i| Candidate::new(&format!("t{i}"), RelationType::Temporal, 0.40 + i as f64 * 0.01))
            .collect();
        let out = f.filter(&src, cands, &lookup(&targets)).await;
        assert_eq!(out.tier3_eligible, 5);
        assert_eq!(out.tier3_accepted, 3);
        assert_eq!(out.dropped, 2);
        let ids: Vec<&str> = out.accepted.iter().map(|c| c.target_id.as_str()).collect();
        assert_eq!(ids, vec!["t4", "t3", "t2"]);
        // "none" keeps the candidate's own type
        assert!(out.accepted.iter().all(|c| c.relation_type == RelationType::Temporal));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_arbiter_times_out_and_degrades() {
        let mut slow = ScriptedArbiter::relevant(1.0, "semantic");
        slow.delay = Some(Duration::from_secs(60));
        let f = filter_with(Arc::new(slow));
        let src = mem("s", &["a", "b", "c"], 0);
        let t = mem("t", &["a", "b", "c"], 1);
        let out = f
            .filter(&src, vec![Candidate::new("t", RelationType::Semantic, 0.45)], &lookup(&[t]))
            .await;
        assert!(matches!(out.arbitration, ArbitrationStatus::Degraded { .. }));
        // Heuristic 0.6 * 1.0 clears 0.3.
        assert_eq!(out.tier3_accepted, 1);
        assert!((out.accepted[0].score - 0.45).abs() < 1e-9);
    }

    #[tokio::test]
    async fn results_capped_at_max_relations() {
        let f = filter_with(Arc::new(UnavailableArbiter));
        let src = mem("s", &[], 0);
        let cands = (0..12)
            .map(|i| Candidate::new(&format!("m{i:02}"), RelationType::Semantic, 0.71 + i as f64 * 0.01))
            .collect();
        let out = f.filter(&src, cands, &HashMap::new()).await;
        assert_eq!(out.accepted.len(), 8);
        assert_eq!(out.accepted[0].target_id, "m11");
    }

    #[tokio::test]
    async fn capped_candidates_stay_in_fallback() {
        let arbiter = Arc::new(ScriptedArbiter::rejecting());
        let f = filter_with(arbiter.clone());
        let src = mem("s", &["a", "b", "c"], 0);
        let targets: Vec<MemoryRecord> =
            (0..4).map(|i| mem(&format!("c{i}"), &["a", "b", "c"], 1)).collect();
        let cands = (0..4)
            .map(|i| Candidate::new(&format!("c{i}"), RelationType::Topical, 0.45 - i as f64 * 0.01))
            .collect();

        let out = f.filter(&src, cands, &lookup(&targets)).await;
        assert_eq!(arbiter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(out.tier3_eligible, 4);
        assert_eq!(out.tier3_accepted, 0);
        assert_eq!(out.dropped, 1);
        assert!(out.used_fallback);
        assert_eq!(out.accepted.len(), 1);
        assert_eq!(out.accepted[0].target_id, "c3");
        assert_eq!(out.accepted[0].relation_type, RelationType::Semantic);
        assert!((out.accepted[0].score - 0.42).abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_verdicts_are_not_cached() {
        let mut arbiter = ScriptedArbiter::relevant(0.8, "topical");
        arbiter.silent_calls = 1;
        let arbiter = Arc::new(arbiter);
        let f = filter_with(arbiter.clone());
        let src = mem("s", &["a", "b", "c"], 0);
        let t = mem("t", &["a", "b", "c"], 1);
        let memories = lookup(&[t]);
        let cands = vec![Candidate::new("t", RelationType::Semantic, 0.45)];

        let first = f.filter(&src, cands.clone(), &memories).await;
        assert_eq!(first.tier3_accepted, 0);

        let second = f.filter(&src, cands, &memories).await;
        assert_eq!(arbiter.calls.load(Ordering::SeqCst), 2);
        assert_eq!(second.tier3_accepted, 1);
        assert_eq!(
            second.arbitration,
            ArbitrationStatus::Completed {
                cache_hits: 0,
                called: 1
            }
        );
    }

    #[tokio::test]
    async fn non_finite_relevance_is_rejected() {
        let arbiter = Arc::new(ScriptedArbiter::relevant(f64::NAN, "semantic"));
        let f = filter_with(arbiter);
        let src = mem("s", &["a", "b", "c"], 0);
        let t = mem("t", &["a", "b", "c"], 1);
        let out = f
            .filter(&src, vec![Candidate::new("t", RelationType::Semantic, 0.45)], &lookup(&[t]))
            .await;
        assert_eq!(out.tier3_accepted, 0);
        assert!(out.accepted.is_empty());
    }
}
