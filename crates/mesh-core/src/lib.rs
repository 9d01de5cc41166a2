//! Mesh Core Library
//!
//! Relationship-graph engine for the memory mesh. Turns independently
//! captured memories into a bounded-degree relation graph with a
//! reproducible layout and density clusters.
//!
//! ## Pipeline
//!
//! - `candidates`: semantic, topical and temporal candidate generation
//! - `merge`: one candidate per target, specificity-aware
//! - `filter`: confidence tiers with cached, time-bounded arbitration
//! - `writer`: idempotent, conflict-tolerant relation upserts
//! - `maintenance`: periodic low-score, stale and excess cleanup
//!
//! ## Mesh assembly
//!
//! - `prune`: mutual k-NN, degree caps and minimum-degree backfill
//! - `layout`: projection, grid or force-directed placement
//! - `cluster`: DBSCAN over laid-out nodes
//! - `mesh` / `traversal`: per-request mesh and cluster expansion
//!
//! [`MeshEngine`] wires all of it to the storage, similarity and arbiter
//! collaborators.

pub mod candidates;
pub mod cluster;
pub mod config;
pub mod engine;
mod error;
pub mod filter;
pub mod layout;
pub mod maintenance;
pub mod merge;
pub mod mesh;
pub mod metrics;
pub mod obs;
pub mod prune;
pub mod similarity;
pub mod telemetry;
pub mod traversal;
pub mod writer;

pub use candidates::{Candidate, SemanticGenerator, SemanticRuleSet};
pub use cluster::Cluster;
pub use config::MeshConfig;
pub use engine::{spawn_maintenance, CandidateCounts, MeshEngine, OwnerReport, ProcessReport};
pub use error::{MeshError, MeshResult};
pub use filter::{ArbitrationStatus, FilterOutcome, TieredFilter};
pub use layout::{LayoutMethod, Position};
pub use maintenance::{run_maintenance, MaintenanceReport};
pub use merge::merge_candidates;
pub use mesh::{EdgeSource, MemoryMesh, MeshEdge, MeshMetadata, MeshNode};
pub use prune::ScoredEdge;
pub use similarity::{
    cosine_similarity, EmbeddingFacet, InMemorySimilarityIndex, SearchFilter, SearchHit,
    SimilarityIndex,
};
pub use telemetry::init_tracing;
pub use traversal::{ClusterMember, MemoryCluster};
pub use writer::{RelationWriter, UpsertOutcome};

pub use mesh_arbiter::{
    spawn_cache_sweeper, ArbitrationCache, HttpArbiter, InMemoryArbitrationCache,
    RelevanceArbiter, UnavailableArbiter,
};
pub use mesh_state::{
    MemoryCatalog, MemoryMetadata, MemoryRecord, RelationRecord, RelationStore, RelationType,
};
