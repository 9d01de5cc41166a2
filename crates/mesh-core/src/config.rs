//! Engine configuration.
//!
//! Every threshold the pipeline uses is a named constant below and a field
//! of [`MeshConfig`]. Configs load from JSON (missing fields take their
//! defaults) and accept `MESH_*` environment overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::candidates::rules::SemanticRuleSet;
use crate::error::{MeshError, MeshResult};

// ---------------------------------------------------------------------------
// Candidate generation
// ---------------------------------------------------------------------------

/// Minimum (adjusted) cosine similarity for a semantic candidate.
pub const SEMANTIC_THRESHOLD: f64 = 0.3;
pub const SEMANTIC_CAP: usize = 12;
/// Neighbours requested from the similarity index before adjustment.
pub const SEMANTIC_SEARCH_K: usize = 24;

pub const TOPICAL_THRESHOLD: f64 = 0.25;
pub const TOPICAL_CAP: usize = 8;
pub const TOPIC_WEIGHT: f64 = 0.4;
pub const CATEGORY_WEIGHT: f64 = 0.3;
pub const KEY_POINT_WEIGHT: f64 = 0.2;
pub const SEARCHABLE_TERM_WEIGHT: f64 = 0.1;
pub const TOPICAL_SAME_DOMAIN_BOOST: f64 = 0.1;

pub const TEMPORAL_THRESHOLD: f64 = 0.2;
pub const TEMPORAL_CAP: usize = 5;

/// Memories of the same owner scanned for topical and temporal candidates.
pub const CANDIDATE_POOL: usize = 500;

// ---------------------------------------------------------------------------
// Merge, filter, write
// ---------------------------------------------------------------------------

/// Scores within this distance of the best one count as tied.
pub const SPECIFICITY_TIE_MARGIN: f64 = 0.1;

pub const ACCEPT_THRESHOLD: f64 = 0.7;
pub const HEURISTIC_TIER_FLOOR: f64 = 0.5;
pub const ARBITRATION_TIER_FLOOR: f64 = 0.4;
pub const HEURISTIC_ACCEPT: f64 = 0.3;
pub const HEURISTIC_TOPIC_WEIGHT: f64 = 0.6;
pub const HEURISTIC_CATEGORY_WEIGHT: f64 = 0.3;
pub const HEURISTIC_DOMAIN_WEIGHT: f64 = 0.1;
pub const ARBITRATION_MIN_TOPICS: usize = 3;
pub const ARBITRATION_MAX_AGE_DAYS: i64 = 7;
pub const MAX_ARBITRATED: usize = 3;
pub const ARBITRATION_ACCEPT: f64 = 0.3;
pub const ARBITRATION_TIMEOUT_MS: u64 = 10_000;
pub const MAX_RELATIONS_PER_SOURCE: usize = 8;
pub const FALLBACK_COUNT: usize = 3;
pub const FALLBACK_MIN_SCORE: f64 = 0.3;

/// An existing row is overwritten only when the new score beats it by this much.
pub const UPDATE_MARGIN: f64 = 0.05;

// ---------------------------------------------------------------------------
// Maintenance
// ---------------------------------------------------------------------------

pub const PRUNE_MIN_SCORE: f64 = 0.3;
pub const PRUNE_STALE_SCORE: f64 = 0.4;
pub const PRUNE_STALE_AFTER_DAYS: i64 = 30;
pub const MAX_STORED_PER_SOURCE: usize = 10;

// ---------------------------------------------------------------------------
// Mesh assembly
// ---------------------------------------------------------------------------

pub const DEFAULT_MESH_LIMIT: usize = 50;
pub const MAX_MESH_NODES: usize = 200;
pub const MESH_SIMILARITY_THRESHOLD: f64 = 0.3;
pub const MUTUAL_K: usize = 3;
pub const SEMANTIC_TYPE_BONUS: f64 = 0.05;
pub const TOPICAL_TYPE_BONUS: f64 = 0.02;
pub const MIN_DEGREE: usize = 2;
/// Projected distance at which a proximity edge scores 0.5.
pub const PROXIMITY_SCALE: f64 = 150.0;
pub const SAME_SOURCE_TYPE_BOOST: f64 = 0.05;
pub const SAME_DOMAIN_BOOST: f64 = 0.1;
pub const RECENT_BOOST: f64 = 0.05;
pub const RECENT_WINDOW_HOURS: i64 = 24;
/// Traversal in `get_cluster` follows relations scoring strictly above this.
pub const CLUSTER_TRAVERSAL_MIN_SCORE: f64 = 0.3;

pub const LAYOUT_BOUND: f64 = 500.0;
pub const LAYOUT_DIMENSIONS: usize = 2;
pub const GRID_JITTER_FRACTION: f64 = 0.2;
pub const FORCE_ITERATIONS: usize = 150;
/// Half-height of the force layout box as a fraction of its half-width.
pub const FORCE_ASPECT: f64 = 0.6;

pub const DBSCAN_EPSILON: f64 = 120.0;
pub const DBSCAN_MIN_POINTS: usize = 2;

// ---------------------------------------------------------------------------
// Config tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    pub threshold: f64,
    pub cap: usize,
    pub search_k: usize,
    pub rules: SemanticRuleSet,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            threshold: SEMANTIC_THRESHOLD,
            cap: SEMANTIC_CAP,
            search_k: SEMANTIC_SEARCH_K,
            rules: SemanticRuleSet::standard(),
        }
    }
}

/// Facet weights for the topical score. They should sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FacetWeights {
    pub topics: f64,
    pub categories: f64,
    pub key_points: f64,
    pub searchable_terms: f64,
}

impl Default for FacetWeights {
    fn default() -> Self {
        Self {
            topics: TOPIC_WEIGHT,
            categories: CATEGORY_WEIGHT,
            key_points: KEY_POINT_WEIGHT,
            searchable_terms: SEARCHABLE_TERM_WEIGHT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicalConfig {
    pub threshold: f64,
    pub cap: usize,
    pub weights: FacetWeights,
    pub same_domain_boost: f64,
}

impl Default for TopicalConfig {
    fn default() -> Self {
        Self {
            threshold: TOPICAL_THRESHOLD,
            cap: TOPICAL_CAP,
            weights: FacetWeights::default(),
            same_domain_boost: TOPICAL_SAME_DOMAIN_BOOST,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalConfig {
    pub threshold: f64,
    pub cap: usize,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            threshold: TEMPORAL_THRESHOLD,
            cap: TEMPORAL_CAP,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub specificity_tie_margin: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            specificity_tie_margin: SPECIFICITY_TIE_MARGIN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Tier 1 lower bound.
    pub accept_threshold: f64,
    /// Tier 2 lower bound.
    pub heuristic_floor: f64,
    /// Tier 3 lower bound; anything below is dropped.
    pub arbitration_floor: f64,
    pub heuristic_accept: f64,
    pub heuristic_topic_weight: f64,
    pub heuristic_category_weight: f64,
    pub heuristic_domain_weight: f64,
    pub arbitration_min_topics: usize,
    pub arbitration_max_age_days: i64,
    pub max_arbitrated: usize,
    pub arbitration_accept: f64,
    pub arbitration_timeout_ms: u64,
    pub max_relations: usize,
    pub fallback_count: usize,
    pub fallback_min_score: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            accept_threshold: ACCEPT_THRESHOLD,
            heuristic_floor: HEURISTIC_TIER_FLOOR,
            arbitration_floor: ARBITRATION_TIER_FLOOR,
            heuristic_accept: HEURISTIC_ACCEPT,
            heuristic_topic_weight: HEURISTIC_TOPIC_WEIGHT,
            heuristic_category_weight: HEURISTIC_CATEGORY_WEIGHT,
            heuristic_domain_weight: HEURISTIC_DOMAIN_WEIGHT,
            arbitration_min_topics: ARBITRATION_MIN_TOPICS,
            arbitration_max_age_days: ARBITRATION_MAX_AGE_DAYS,
            max_arbitrated: MAX_ARBITRATED,
            arbitration_accept: ARBITRATION_ACCEPT,
            arbitration_timeout_ms: ARBITRATION_TIMEOUT_MS,
            max_relations: MAX_RELATIONS_PER_SOURCE,
            fallback_count: FALLBACK_COUNT,
            fallback_min_score: FALLBACK_MIN_SCORE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    pub update_margin: f64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            update_margin: UPDATE_MARGIN,
        }
    }
}

/// Maintenance steps, applied in field order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenancePolicy {
    /// Step 1: delete rows scoring below this.
    pub min_score: f64,
    /// Step 2: delete rows older than `stale_after_days` scoring below this.
    pub stale_score: f64,
    pub stale_after_days: i64,
    /// Step 3: keep at most this many rows per source.
    pub max_per_source: usize,
}

impl Default for MaintenancePolicy {
    fn default() -> Self {
        Self {
            min_score: PRUNE_MIN_SCORE,
            stale_score: PRUNE_STALE_SCORE,
            stale_after_days: PRUNE_STALE_AFTER_DAYS,
            max_per_source: MAX_STORED_PER_SOURCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    pub default_limit: usize,
    pub max_nodes: usize,
    pub similarity_threshold: f64,
    pub k: usize,
    pub semantic_bonus: f64,
    pub topical_bonus: f64,
    pub min_degree: usize,
    pub proximity_scale: f64,
    pub same_source_type_boost: f64,
    pub same_domain_boost: f64,
    pub recent_boost: f64,
    pub recent_window_hours: i64,
    pub traversal_min_score: f64,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_MESH_LIMIT,
            max_nodes: MAX_MESH_NODES,
            similarity_threshold: MESH_SIMILARITY_THRESHOLD,
            k: MUTUAL_K,
            semantic_bonus: SEMANTIC_TYPE_BONUS,
            topical_bonus: TOPICAL_TYPE_BONUS,
            min_degree: MIN_DEGREE,
            proximity_scale: PROXIMITY_SCALE,
            same_source_type_boost: SAME_SOURCE_TYPE_BOOST,
            same_domain_boost: SAME_DOMAIN_BOOST,
            recent_boost: RECENT_BOOST,
            recent_window_hours: RECENT_WINDOW_HOURS,
            traversal_min_score: CLUSTER_TRAVERSAL_MIN_SCORE,
        }
    }
}

impl AssemblyConfig {
    /// Final per-node degree cap: `k + 1`, kept within [2, 5].
    pub fn degree_cap(&self) -> usize {
        (self.k + 1).clamp(2, 5)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Coordinates are normalised into `[-bound, bound]`.
    pub bound: f64,
    /// 2 or 3.
    pub dimensions: usize,
    pub jitter_fraction: f64,
    pub force_iterations: usize,
    pub force_aspect: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            bound: LAYOUT_BOUND,
            dimensions: LAYOUT_DIMENSIONS,
            jitter_fraction: GRID_JITTER_FRACTION,
            force_iterations: FORCE_ITERATIONS,
            force_aspect: FORCE_ASPECT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub epsilon: f64,
    pub min_points: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            epsilon: DBSCAN_EPSILON,
            min_points: DBSCAN_MIN_POINTS,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub semantic: SemanticConfig,
    pub topical: TopicalConfig,
    pub temporal: TemporalConfig,
    pub merge: MergeConfig,
    pub filter: FilterConfig,
    pub writer: WriterConfig,
    pub maintenance: MaintenancePolicy,
    pub assembly: AssemblyConfig,
    pub layout: LayoutConfig,
    pub cluster: ClusterConfig,
    pub candidate_pool: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            semantic: SemanticConfig::default(),
            topical: TopicalConfig::default(),
            temporal: TemporalConfig::default(),
            merge: MergeConfig::default(),
            filter: FilterConfig::default(),
            writer: WriterConfig::default(),
            maintenance: MaintenancePolicy::default(),
            assembly: AssemblyConfig::default(),
            layout: LayoutConfig::default(),
            cluster: ClusterConfig::default(),
            candidate_pool: CANDIDATE_POOL,
        }
    }
}

impl MeshConfig {
    /// Load a JSON config file; absent fields keep their defaults.
    pub fn from_json_file(path: &Path) -> MeshResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| MeshError::Config(format!("reading {}: {e}", path.display())))?;
        let config: MeshConfig = serde_json::from_str(&raw)
            .map_err(|e| MeshError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with `MESH_*` environment overrides applied.
    pub fn from_env() -> MeshResult<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, which maps a `MESH_*` name to its value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> MeshResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> MeshResult<T> {
            raw.trim()
                .parse()
                .map_err(|_| MeshError::Config(format!("{key}: cannot parse '{raw}'")))
        }

        macro_rules! apply {
            ($key:literal => $field:expr) => {
                if let Some(raw) = lookup($key) {
                    $field = parse($key, raw)?;
                }
            };
        }

        apply!("MESH_SEMANTIC_THRESHOLD" => self.semantic.threshold);
        apply!("MESH_TOPICAL_THRESHOLD" => self.topical.threshold);
        apply!("MESH_TEMPORAL_THRESHOLD" => self.temporal.threshold);
        apply!("MESH_TIE_MARGIN" => self.merge.specificity_tie_margin);
        apply!("MESH_ACCEPT_THRESHOLD" => self.filter.accept_threshold);
        apply!("MESH_MAX_RELATIONS" => self.filter.max_relations);
        apply!("MESH_ARBITRATION_TIMEOUT_MS" => self.filter.arbitration_timeout_ms);
        apply!("MESH_MAX_ARBITRATED" => self.filter.max_arbitrated);
        apply!("MESH_UPDATE_MARGIN" => self.writer.update_margin);
        apply!("MESH_MAX_STORED_PER_SOURCE" => self.maintenance.max_per_source);
        apply!("MESH_K" => self.assembly.k);
        apply!("MESH_MAX_NODES" => self.assembly.max_nodes);
        apply!("MESH_MIN_DEGREE" => self.assembly.min_degree);
        apply!("MESH_LAYOUT_DIMENSIONS" => self.layout.dimensions);
        apply!("MESH_DBSCAN_EPSILON" => self.cluster.epsilon);
        apply!("MESH_DBSCAN_MIN_POINTS" => self.cluster.min_points);
        apply!("MESH_CANDIDATE_POOL" => self.candidate_pool);
        Ok(())
    }

    /// Reject configurations the pipeline cannot honour.
    pub fn validate(&self) -> MeshResult<()> {
        let unit = [
            ("semantic.threshold", self.semantic.threshold),
            ("topical.threshold", self.topical.threshold),
            ("temporal.threshold", self.temporal.threshold),
            ("filter.accept_threshold", self.filter.accept_threshold),
            ("filter.heuristic_floor", self.filter.heuristic_floor),
            ("filter.arbitration_floor", self.filter.arbitration_floor),
            ("filter.heuristic_accept", self.filter.heuristic_accept),
            ("filter.arbitration_accept", self.filter.arbitration_accept),
            ("filter.fallback_min_score", self.filter.fallback_min_score),
            ("maintenance.min_score", self.maintenance.min_score),
            ("maintenance.stale_score", self.maintenance.stale_score),
            ("assembly.similarity_threshold", self.assembly.similarity_threshold),
            ("assembly.traversal_min_score", self.assembly.traversal_min_score),
            ("merge.specificity_tie_margin", self.merge.specificity_tie_margin),
            ("writer.update_margin", self.writer.update_margin),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(MeshError::Config(format!("{name} must be in [0, 1], got {value}")));
            }
        }

        let f = &self.filter;
        if !(f.arbitration_floor <= f.heuristic_floor && f.heuristic_floor <= f.accept_threshold) {
            return Err(MeshError::Config(format!(
                "tier bounds must be ordered: arbitration {} <= heuristic {} <= accept {}",
                f.arbitration_floor, f.heuristic_floor, f.accept_threshold
            )));
        }
        if self.assembly.k == 0 {
            return Err(MeshError::Config("assembly.k must be at least 1".into()));
        }
        if self.assembly.max_nodes == 0 {
            return Err(MeshError::Config("assembly.max_nodes must be at least 1".into()));
        }
        if !(self.assembly.proximity_scale > 0.0) {
            return Err(MeshError::Config("assembly.proximity_scale must be positive".into()));
        }
        if !matches!(self.layout.dimensions, 2 | 3) {
            return Err(MeshError::Config(format!(
                "layout.dimensions must be 2 or 3, got {}",
                self.layout.dimensions
            )));
        }
        if !(self.layout.bound > 0.0) || !(self.cluster.epsilon > 0.0) {
            return Err(MeshError::Config(
                "layout.bound and cluster.epsilon must be positive".into(),
            ));
        }
        if self.cluster.min_points == 0 {
            return Err(MeshError::Config("cluster.min_points must be at least 1".into()));
        }
        self.semantic.rules.compile()?;
        Ok(())
    }
}
