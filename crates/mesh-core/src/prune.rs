//! Graph post-processing: mutual k-nearest-neighbour pruning, degree caps
//! and minimum-degree backfill.
//!
//! All functions work on undirected edges. Orderings are total (weighted
//! score, then canonical pair), so output never depends on input order.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use mesh_state::RelationType;

use crate::config::AssemblyConfig;

/// A scored mesh edge. Direction is irrelevant after [`dedup_undirected`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEdge {
    pub source: String,
    pub target: String,
    pub relation_type: RelationType,
    pub score: f64,
}

impl ScoredEdge {
    pub fn new(source: &str, target: &str, relation_type: RelationType, score: f64) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            relation_type,
            score: mesh_state::clamp_score(score),
        }
    }

    /// The endpoints, smaller id first.
    pub fn canonical_key(&self) -> (&str, &str) {
        if self.source <= self.target {
            (&self.source, &self.target)
        } else {
            (&self.target, &self.source)
        }
    }

    pub fn other(&self, node: &str) -> &str {
        if self.source == node {
            &self.target
        } else {
            &self.source
        }
    }

    pub fn touches(&self, node: &str) -> bool {
        self.source == node || self.target == node
    }
}

/// Raw score plus the per-type bonus.
pub fn weighted_score(edge: &ScoredEdge, config: &AssemblyConfig) -> f64 {
    edge.score
        + match edge.relation_type {
            RelationType::Semantic => config.semantic_bonus,
            RelationType::Topical => config.topical_bonus,
            RelationType::Temporal => 0.0,
        }
}

fn by_weight_desc(a: &ScoredEdge, b: &ScoredEdge, config: &AssemblyConfig) -> Ordering {
    weighted_score(b, config)
        .total_cmp(&weighted_score(a, config))
        .then_with(|| a.canonical_key().cmp(&b.canonical_key()))
}

/// One edge per unordered pair, keeping the highest score. Self-loops are dropped.
pub fn dedup_undirected(edges: impl IntoIterator<Item = ScoredEdge>) -> Vec<ScoredEdge> {
    let mut best: BTreeMap<(String, String), ScoredEdge> = BTreeMap::new();
    for edge in edges {
        if edge.source == edge.target {
            continue;
        }
        let (a, b) = edge.canonical_key();
        let key = (a.to_string(), b.to_string());
        match best.get(&key) {
            Some(existing)
                if existing.score > edge.score
                    || (existing.score == edge.score
                        && !edge.relation_type.is_more_specific_than(existing.relation_type)) => {}
            _ => {
                best.insert(key, edge);
            }
        }
    }
    best.into_values().collect()
}

/// Keep (u, v) only if each endpoint is among the other's `k` best neighbours.
pub fn mutual_knn(edges: &[ScoredEdge], k: usize, config: &AssemblyConfig) -> Vec<ScoredEdge> {
    let mut sorted: Vec<&ScoredEdge> = edges.iter().collect();
    sorted.sort_by(|a, b| by_weight_desc(a, b, config));

    let mut top_k: HashMap<&str, HashSet<&str>> = HashMap::new();
    for edge in &sorted {
        for (node, other) in [
            (edge.source.as_str(), edge.target.as_str()),
            (edge.target.as_str(), edge.source.as_str()),
        ] {
            let entry = top_k.entry(node).or_default();
            if entry.len() < k {
                entry.insert(other);
            }
        }
    }

    let mutual = |u: &str, v: &str| top_k.get(u).is_some_and(|s| s.contains(v));
    sorted
        .into_iter()
        .filter(|e| mutual(&e.source, &e.target) && mutual(&e.target, &e.source))
        .cloned()
        .collect()
}

/// Greedily keep edges, best first, while both endpoints are under `cap`.
pub fn apply_degree_cap(edges: &[ScoredEdge], cap: usize, config: &AssemblyConfig) -> Vec<ScoredEdge> {
    let mut sorted: Vec<&ScoredEdge> = edges.iter().collect();
    sorted.sort_by(|a, b| by_weight_desc(a, b, config));

    let mut degree: HashMap<&str, usize> = HashMap::new();
    let mut kept = Vec::new();
    for edge in sorted {
        let du = degree.get(edge.source.as_str()).copied().unwrap_or(0);
        let dv = degree.get(edge.target.as_str()).copied().unwrap_or(0);
        if du >= cap || dv >= cap {
            continue;
        }
        *degree.entry(&edge.source).or_default() += 1;
        *degree.entry(&edge.target).or_default() += 1;
        kept.push(edge.clone());
    }
    kept
}

/// Edges at or above `threshold` (raw score).
pub fn threshold_edges(edges: &[ScoredEdge], threshold: f64) -> Vec<ScoredEdge> {
    edges.iter().filter(|e| e.score >= threshold).cloned().collect()
}

/// Threshold, mutual k-NN, then the degree cap.
pub fn prune(edges: &[ScoredEdge], threshold: f64, config: &AssemblyConfig) -> Vec<ScoredEdge> {
    let pool = threshold_edges(edges, threshold);
    let mutual = mutual_knn(&pool, config.k, config);
    apply_degree_cap(&mutual, config.degree_cap(), config)
}

/// Re-add pool edges for nodes below `floor`, best first, never pushing
/// either endpoint past `cap`.
pub fn backfill_min_degree(
    kept: Vec<ScoredEdge>,
    pool: &[ScoredEdge],
    floor: usize,
    cap: usize,
    config: &AssemblyConfig,
) -> Vec<ScoredEdge> {
    let mut present: HashSet<(String, String)> = kept
        .iter()
        .map(|e| {
            let (a, b) = e.canonical_key();
            (a.to_string(), b.to_string())
        })
        .collect();
    let mut degree: HashMap<String, usize> = HashMap::new();
    for e in &kept {
        *degree.entry(e.source.clone()).or_default() += 1;
        *degree.entry(e.target.clone()).or_default() += 1;
    }

    let nodes: BTreeSet<&str> = pool
        .iter()
        .flat_map(|e| [e.source.as_str(), e.target.as_str()])
        .collect();

    let mut sorted_pool: Vec<&ScoredEdge> = pool.iter().collect();
    sorted_pool.sort_by(|a, b| by_weight_desc(a, b, config));

    let mut out = kept;
    for node in nodes {
        for edge in sorted_pool.iter().filter(|e| e.touches(node)) {
            let own = degree.get(node).copied().unwrap_or(0);
            if own >= floor || own >= cap {
                break;
            }
            let other = edge.other(node);
            let (a, b) = edge.canonical_key();
            let key = (a.to_string(), b.to_string());
            if present.contains(&key) || degree.get(other).copied().unwrap_or(0) >= cap {
                continue;
            }
            present.insert(key);
            *degree.entry(node.to_string()).or_default() += 1;
            *degree.entry(other.to_string()).or_default() += 1;
            out.push((*edge).clone());
        }
    }
    out
}

/// Degree of every node appearing in `edges`.
pub fn degrees(edges: &[ScoredEdge]) -> HashMap<&str, usize> {
    let mut degree = HashMap::new();
    for e in edges {
        *degree.entry(e.source.as_str()).or_default() += 1;
        *degree.entry(e.target.as_str()).or_default() += 1;
    }
    degree
}
