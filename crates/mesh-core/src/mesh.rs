//! Per-request mesh assembly.
//!
//! Loads a bounded set of an owner's memories, picks an edge source (stored
//! relations, or proximity recomputed from projected embeddings), prunes to
//! a bounded-degree graph, backfills under-connected nodes, then lays out
//! and clusters the result.
//!
//! The assembly itself is synchronous CPU work; only the loading steps
//! await.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use mesh_state::{MemoryCatalog, MemoryRecord, RelationStore, RelationType};

use crate::cluster::{build_clusters, dbscan, Cluster};
use crate::config::{AssemblyConfig, ClusterConfig, LayoutConfig};
use crate::error::{MeshError, MeshResult};
use crate::layout::{compute_layout, LayoutMethod, LayoutResult, Position};
use crate::metrics::METRICS;
use crate::obs;
use crate::prune::{backfill_min_degree, dedup_undirected, prune, threshold_edges, ScoredEdge};
use crate::similarity::{EmbeddingFacet, SimilarityIndex};

/// Mesh edges are pruned, undirected scored edges.
pub type MeshEdge = ScoredEdge;

/// Where a mesh's edges came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeSource {
    /// Persisted relations among the loaded memories.
    Stored,
    /// Recomputed from projected embedding distances.
    Proximity,
    /// Neither was available.
    None,
}

impl EdgeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeSource::Stored => "stored",
            EdgeSource::Proximity => "proximity",
            EdgeSource::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshNode {
    pub id: String,
    pub label: String,
    pub source_type: String,
    pub position: Position,
    /// Whether `position` came from this node's own embedding.
    pub embedding_based: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshMetadata {
    pub node_count: usize,
    pub edge_count: usize,
    pub average_degree: f64,
    pub layout_method: LayoutMethod,
    pub edge_source: EdgeSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMesh {
    pub nodes: Vec<MeshNode>,
    pub edges: Vec<MeshEdge>,
    pub clusters: Vec<Cluster>,
    pub metadata: MeshMetadata,
}

/// Proximity score for two projected points, before boosts.
pub fn proximity_score(distance: f64, scale: f64) -> f64 {
    let r = distance / scale;
    1.0 / (1.0 + r * r)
}

fn distance(a: &Position, b: &Position) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2) + (a.z - b.z).powi(2)).sqrt()
}

/// Contextual boost for a pair of memories.
pub fn context_boost(a: &MemoryRecord, b: &MemoryRecord, config: &AssemblyConfig) -> f64 {
    let mut boost = 0.0;
    if a.source_type == b.source_type {
        boost += config.same_source_type_boost;
    }
    if matches!((a.domain(), b.domain()), (Some(x), Some(y)) if x == y) {
        boost += config.same_domain_boost;
    }
    let gap = (a.created_at - b.created_at).num_seconds().abs();
    if gap <= Duration::hours(config.recent_window_hours).num_seconds() {
        boost += config.recent_boost;
    }
    boost
}

/// Proximity edges between every pair of embedding-placed nodes.
fn proximity_edges(
    memories: &[MemoryRecord],
    layout: &LayoutResult,
    config: &AssemblyConfig,
) -> Vec<ScoredEdge> {
    let placed: Vec<usize> = (0..memories.len())
        .filter(|i| layout.embedding_based[*i])
        .collect();
    let mut edges = Vec::new();
    for (n, &i) in placed.iter().enumerate() {
        for &j in &placed[n + 1..] {
            let d = distance(&layout.positions[i], &layout.positions[j]);
            let score = proximity_score(d, config.proximity_scale)
                + context_boost(&memories[i], &memories[j], config);
            edges.push(ScoredEdge::new(
                &memories[i].id,
                &memories[j].id,
                RelationType::Semantic,
                score.min(1.0),
            ));
        }
    }
    edges
}

/// Configuration for [`build_mesh`].
#[derive(Debug, Clone, Default)]
pub struct MeshSettings {
    pub assembly: AssemblyConfig,
    pub layout: LayoutConfig,
    pub cluster: ClusterConfig,
}

/// Assemble a mesh from already-loaded inputs.
///
/// `vectors[i]` is the embedding of `memories[i]`; `stored` are persisted
/// edges among `memories` (possibly empty).
pub fn build_mesh(
    memories: &[MemoryRecord],
    vectors: &[Option<Vec<f32>>],
    stored: Vec<ScoredEdge>,
    threshold: f64,
    settings: &MeshSettings,
) -> MemoryMesh {
    let cfg = &settings.assembly;
    let ids: Vec<&str> = memories.iter().map(|m| m.id.as_str()).collect();

    // Projection and grid ignore edges, so this first pass is final unless
    // the layout falls through to force-directed.
    let initial = compute_layout(&ids, vectors, &[], &settings.layout);

    let (raw, edge_source) = if !stored.is_empty() {
        (stored, EdgeSource::Stored)
    } else if initial.method == LayoutMethod::Projection {
        (proximity_edges(memories, &initial, cfg), EdgeSource::Proximity)
    } else {
        (Vec::new(), EdgeSource::None)
    };

    let deduped = dedup_undirected(raw);
    let pool = threshold_edges(&deduped, threshold);
    let pruned = prune(&deduped, threshold, cfg);
    let edges = backfill_min_degree(pruned, &pool, cfg.min_degree, cfg.degree_cap(), cfg);
    debug!(
        candidates = deduped.len(),
        pool = pool.len(),
        kept = edges.len(),
        "Pruned mesh edges"
    );

    let layout = if initial.method == LayoutMethod::ForceDirected {
        compute_layout(&ids, vectors, &edges, &settings.layout)
    } else {
        initial
    };

    let assignment = dbscan(&layout.positions, &settings.cluster);
    let topics: Vec<Vec<String>> = memories
        .iter()
        .map(|m| m.metadata.topics.iter().cloned().collect())
        .collect();
    let clusters = build_clusters(&ids, &layout.positions, &assignment, &topics);

    let nodes: Vec<MeshNode> = memories
        .iter()
        .enumerate()
        .map(|(i, m)| MeshNode {
            id: m.id.clone(),
            label: m.label().to_string(),
            source_type: m.source_type.clone(),
            position: layout.positions[i],
            embedding_based: layout.embedding_based[i],
            cluster_id: assignment[i],
        })
        .collect();

    let average_degree = if nodes.is_empty() {
        0.0
    } else {
        2.0 * edges.len() as f64 / nodes.len() as f64
    };
    MemoryMesh {
        metadata: MeshMetadata {
            node_count: nodes.len(),
            edge_count: edges.len(),
            average_degree,
            layout_method: layout.method,
            edge_source,
        },
        nodes,
        edges,
        clusters,
    }
}

/// Loads inputs for [`build_mesh`] from the engine's collaborators.
pub struct MeshAssembler {
    catalog: Arc<dyn MemoryCatalog>,
    relations: Arc<dyn RelationStore>,
    index: Arc<dyn SimilarityIndex>,
    settings: MeshSettings,
}

impl MeshAssembler {
    pub fn new(
        catalog: Arc<dyn MemoryCatalog>,
        relations: Arc<dyn RelationStore>,
        index: Arc<dyn SimilarityIndex>,
        settings: MeshSettings,
    ) -> Self {
        Self {
            catalog,
            relations,
            index,
            settings,
        }
    }

    pub fn settings(&self) -> &MeshSettings {
        &self.settings
    }

    /// Assemble the mesh for `owner_id`.
    ///
    /// `limit` defaults to the configured default and is capped at
    /// `max_nodes`; `threshold` defaults to the configured similarity
    /// threshold.
    #[instrument(skip(self))]
    pub async fn assemble(
        &self,
        owner_id: &str,
        limit: Option<usize>,
        threshold: Option<f64>,
    ) -> MeshResult<MemoryMesh> {
        let cfg = &self.settings.assembly;
        let limit = limit.unwrap_or(cfg.default_limit);
        if limit == 0 {
            return Err(MeshError::InvalidArgument("limit must be positive".into()));
        }
        let threshold = threshold.unwrap_or(cfg.similarity_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(MeshError::InvalidArgument(format!(
                "similarity threshold {threshold} outside [0, 1]"
            )));
        }
        let limit = limit.min(cfg.max_nodes);

        let memories = self.catalog.list_for_owner(owner_id, Some(limit)).await?;
        let mut vectors = Vec::with_capacity(memories.len());
        for m in &memories {
            let v = match self.index.embedding(&m.id, EmbeddingFacet::Content).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(memory_id = %m.id, error = %e, "Embedding lookup failed; placing without it");
                    None
                }
            };
            vectors.push(v);
        }

        let stored = match self.relations.list_for_owner(owner_id).await {
            Ok(rows) => {
                let loaded: HashSet<&str> = memories.iter().map(|m| m.id.as_str()).collect();
                rows.into_iter()
                    .filter(|r| loaded.contains(r.source_id.as_str()) && loaded.contains(r.target_id.as_str()))
                    .map(|r| ScoredEdge::new(&r.source_id, &r.target_id, r.relation_type, r.score))
                    .collect()
            }
            Err(e) => {
                warn!(owner_id, error = %e, "Relation lookup failed; recomputing edges");
                Vec::new()
            }
        };

        let mesh = build_mesh(&memories, &vectors, stored, threshold, &self.settings);
        METRICS.add_meshes_assembled(1);
        obs::emit_mesh_assembled(
            owner_id,
            mesh.metadata.node_count,
            mesh.metadata.edge_count,
            mesh.metadata.layout_method.as_str(),
            mesh.metadata.edge_source.as_str(),
        );
        Ok(mesh)
    }
}

/// Degree of each node id in a mesh.
pub fn node_degrees(mesh: &MemoryMesh) -> HashMap<String, usize> {
    let mut degree: HashMap<String, usize> = mesh.nodes.iter().map(|n| (n.id.clone(), 0)).collect();
    for e in &mesh.edges {
        *degree.entry(e.source.clone()).or_default() += 1;
        *degree.entry(e.target.clone()).or_default() += 1;
    }
    degree
}
