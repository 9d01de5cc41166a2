//! Engine facade: owns the collaborators and runs each operation end to end.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use mesh_arbiter::{ArbitrationCache, RelevanceArbiter};
use mesh_state::{MemoryCatalog, MemoryRecord, RelationStore, RelationType, StorageResult};

use crate::candidates::temporal::MAX_TEMPORAL_GAP_SECS;
use crate::candidates::{temporal_candidates, topical_candidates, Candidate, SemanticGenerator};
use crate::config::MeshConfig;
use crate::error::{MeshError, MeshResult};
use crate::filter::{ArbitrationStatus, TieredFilter};
use crate::maintenance::{run_maintenance, MaintenanceReport};
use crate::merge::merge_candidates;
use crate::mesh::{MemoryMesh, MeshAssembler, MeshSettings};
use crate::metrics::METRICS;
use crate::obs;
use crate::similarity::SimilarityIndex;
use crate::traversal::{get_cluster, MemoryCluster};
use crate::writer::{RelationWriter, UpsertOutcome};

/// Memories processed at once by [`MeshEngine::process_owner`].
const OWNER_CONCURRENCY: usize = 8;

/// Candidate counts per relation type, before merging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCounts {
    pub semantic: usize,
    pub topical: usize,
    pub temporal: usize,
}

/// What `process_memory` did for one source memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessReport {
    pub memory_id: String,
    pub candidates: CandidateCounts,
    pub merged: usize,
    pub accepted: usize,
    pub used_fallback: bool,
    pub arbitration: ArbitrationStatus,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub conflicted: usize,
    /// Accepted relations whose write failed; the rest were still written.
    pub write_failures: usize,
}

impl ProcessReport {
    fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
            UpsertOutcome::Conflicted => self.conflicted += 1,
        }
    }
}

/// Per-memory results of `process_owner`.
#[derive(Debug, Default, Serialize)]
pub struct OwnerReport {
    pub processed: Vec<ProcessReport>,
    /// `(memory_id, error)` for every memory that failed.
    pub failed: Vec<(String, String)>,
}

pub struct MeshEngine {
    catalog: Arc<dyn MemoryCatalog>,
    relations: Arc<dyn RelationStore>,
    index: Arc<dyn SimilarityIndex>,
    semantic: SemanticGenerator,
    filter: TieredFilter,
    writer: RelationWriter,
    assembler: MeshAssembler,
    config: MeshConfig,
}

impl MeshEngine {
    /// Build an engine; fails if `config` does not validate.
    pub fn new(
        config: MeshConfig,
        catalog: Arc<dyn MemoryCatalog>,
        relations: Arc<dyn RelationStore>,
        index: Arc<dyn SimilarityIndex>,
        arbiter: Arc<dyn RelevanceArbiter>,
        cache: Arc<dyn ArbitrationCache>,
    ) -> MeshResult<Self> {
        config.validate()?;
        let semantic = SemanticGenerator::new(config.semantic.clone())?;
        let filter = TieredFilter::new(config.filter.clone(), arbiter, cache);
        let writer = RelationWriter::new(relations.clone(), config.writer.clone());
        let assembler = MeshAssembler::new(
            catalog.clone(),
            relations.clone(),
            index.clone(),
            MeshSettings {
                assembly: config.assembly.clone(),
                layout: config.layout.clone(),
                cluster: config.cluster.clone(),
            },
        );
        Ok(Self {
            catalog,
            relations,
            index,
            semantic,
            filter,
            writer,
            assembler,
            config,
        })
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    /// Generate, merge, filter and persist relations from one memory.
    pub async fn process_memory(&self, memory_id: &str, owner_id: &str) -> MeshResult<ProcessReport> {
        self.process_inner(memory_id, owner_id)
            .instrument(obs::memory_span(memory_id, owner_id))
            .await
    }

    async fn process_inner(&self, memory_id: &str, owner_id: &str) -> MeshResult<ProcessReport> {
        let source = self
            .catalog
            .get(memory_id)
            .await?
            .ok_or_else(|| MeshError::MemoryNotFound {
                memory_id: memory_id.to_string(),
            })?;
        if source.owner_id != owner_id {
            return Err(MeshError::OwnerMismatch {
                memory_id: memory_id.to_string(),
                owner_id: owner_id.to_string(),
            });
        }

        // Topical matches come from the newest memories; temporal ones from a
        // window around the source, however old it is.
        let recent = or_empty(
            self.catalog
                .list_for_owner(owner_id, Some(self.config.candidate_pool))
                .await,
            "Topical pool unavailable",
        );
        let gap = ChronoDuration::seconds(MAX_TEMPORAL_GAP_SECS);
        let nearby = or_empty(
            self.catalog
                .list_created_between(owner_id, source.created_at - gap, source.created_at + gap)
                .await,
            "Temporal pool unavailable",
        );

        let semantic = self
            .semantic
            .generate(&source, self.index.as_ref(), self.catalog.as_ref())
            .await;
        let topical = topical_candidates(&source, &recent, &self.config.topical);
        let temporal = temporal_candidates(&source, &nearby, &self.config.temporal);

        let mut report = ProcessReport {
            memory_id: memory_id.to_string(),
            candidates: CandidateCounts {
                semantic: semantic.len(),
                topical: topical.len(),
                temporal: temporal.len(),
            },
            ..ProcessReport::default()
        };
        let merged = merge_candidates(
            semantic.into_iter().chain(topical).chain(temporal),
            &self.config.merge,
        );
        report.merged = merged.len();
        debug!(candidates = ?report.candidates, merged = merged.len(), "Candidates merged");

        let memories = self.resolve_targets(&merged, recent.into_iter().chain(nearby)).await;
        let outcome = self.filter.filter(&source, merged, &memories).await;
        report.accepted = outcome.accepted.len();
        report.used_fallback = outcome.used_fallback;
        report.arbitration = outcome.arbitration;

        for candidate in &outcome.accepted {
            match self.writer.upsert(owner_id, memory_id, candidate).await {
                Ok(written) => report.record(written),
                Err(e) => {
                    report.write_failures += 1;
                    METRICS.add_relation_write_failures(1);
                    obs::emit_relation_write_failed(memory_id, &candidate.target_id, &e);
                }
            }
        }

        METRICS.add_memories_processed(1);
        obs::emit_memory_processed(
            memory_id,
            report.merged,
            report.accepted,
            report.inserted,
        );
        Ok(report)
    }

    /// Memory records for every merged target: the pools plus catalog lookups
    /// for semantic hits outside them.
    async fn resolve_targets(
        &self,
        merged: &[Candidate],
        pool: impl Iterator<Item = MemoryRecord>,
    ) -> HashMap<String, MemoryRecord> {
        let mut memories: HashMap<String, MemoryRecord> =
            pool.map(|m| (m.id.clone(), m)).collect();
        for c in merged {
            if memories.contains_key(&c.target_id) || c.relation_type != RelationType::Semantic {
                continue;
            }
            match self.catalog.get(&c.target_id).await {
                Ok(Some(m)) => {
                    memories.insert(m.id.clone(), m);
                }
                Ok(None) => {}
                Err(e) => warn!(memory_id = %c.target_id, error = %e, "Target lookup failed"),
            }
        }
        memories
    }

    /// Process every memory of `owner_id`. One memory failing never stops
    /// the others.
    pub async fn process_owner(&self, owner_id: &str) -> MeshResult<OwnerReport> {
        let memories = self.catalog.list_for_owner(owner_id, None).await?;
        let results: Vec<(String, MeshResult<ProcessReport>)> = stream::iter(memories)
            .map(|m| async move {
                let result = self.process_memory(&m.id, owner_id).await;
                (m.id, result)
            })
            .buffer_unordered(OWNER_CONCURRENCY)
            .collect()
            .await;

        let mut report = OwnerReport::default();
        for (memory_id, result) in results {
            match result {
                Ok(r) => report.processed.push(r),
                Err(e) => {
                    obs::emit_memory_failed(&memory_id, &e);
                    report.failed.push((memory_id, e.to_string()));
                }
            }
        }
        report.processed.sort_by(|a, b| a.memory_id.cmp(&b.memory_id));
        report.failed.sort();
        info!(
            owner_id,
            processed = report.processed.len(),
            failed = report.failed.len(),
            "Owner processed"
        );
        Ok(report)
    }

    pub async fn get_mesh(
        &self,
        owner_id: &str,
        limit: Option<usize>,
        similarity_threshold: Option<f64>,
    ) -> MeshResult<MemoryMesh> {
        self.assembler.assemble(owner_id, limit, similarity_threshold).await
    }

    pub async fn get_cluster(
        &self,
        owner_id: &str,
        center_id: &str,
        depth: usize,
    ) -> MeshResult<MemoryCluster> {
        get_cluster(
            self.catalog.as_ref(),
            self.relations.as_ref(),
            owner_id,
            center_id,
            depth,
            self.config.assembly.traversal_min_score,
        )
        .await
    }

    pub async fn run_maintenance(&self) -> MaintenanceReport {
        run_maintenance(self.relations.as_ref(), &self.config.maintenance).await
    }
}

fn or_empty(listed: StorageResult<Vec<MemoryRecord>>, what: &str) -> Vec<MemoryRecord> {
    listed.unwrap_or_else(|e| {
        warn!(error = %e, "{what}");
        Vec::new()
    })
}

/// Run maintenance every `interval` until the handle is aborted.
///
/// The first pass runs one full interval after spawning.
pub fn spawn_maintenance(engine: Arc<MeshEngine>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let report = engine.run_maintenance().await;
            debug!(removed = report.total_removed(), failures = report.failures.len(), "Maintenance tick");
            METRICS.flush();
        }
    })
}
