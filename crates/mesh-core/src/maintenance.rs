//! Periodic cleanup of low-value relations.
//!
//! Steps run in order and independently:
//! 1. Delete rows scoring below `min_score`
//! 2. Delete rows older than `stale_after_days` scoring below `stale_score`
//! 3. Trim each source to its `max_per_source` best rows
//!
//! A failing step is logged and recorded in the report; the remaining steps
//! still run and the next scheduled pass retries.

use std::time::Instant;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use mesh_state::{RelationFilter, RelationKey, RelationStore, StorageResult};

use crate::config::MaintenancePolicy;
use crate::metrics::METRICS;
use crate::obs;

/// Result of one maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub removed_low_score: usize,
    pub removed_stale: usize,
    pub removed_excess: usize,
    /// `step: error` for every step that failed.
    pub failures: Vec<String>,
}

impl MaintenanceReport {
    pub fn total_removed(&self) -> usize {
        self.removed_low_score + self.removed_stale + self.removed_excess
    }
}

/// Run all maintenance steps against `store`.
#[instrument(skip_all)]
pub async fn run_maintenance(
    store: &dyn RelationStore,
    policy: &MaintenancePolicy,
) -> MaintenanceReport {
    let started = Instant::now();
    let mut report = MaintenanceReport::default();

    match store
        .delete_where(&RelationFilter::score_below(policy.min_score))
        .await
    {
        Ok(n) => report.removed_low_score = n,
        Err(e) => record_failure(&mut report, "low_score", &e),
    }

    let cutoff = Utc::now() - Duration::days(policy.stale_after_days);
    match store
        .delete_where(&RelationFilter::score_below(policy.stale_score).created_before(cutoff))
        .await
    {
        Ok(n) => report.removed_stale = n,
        Err(e) => record_failure(&mut report, "stale", &e),
    }

    match trim_sources(store, policy.max_per_source).await {
        Ok(n) => report.removed_excess = n,
        Err(e) => record_failure(&mut report, "excess", &e),
    }

    METRICS.add_relations_pruned(report.total_removed() as u64);
    obs::emit_maintenance_finished(
        report.total_removed(),
        report.failures.len(),
        started.elapsed().as_millis() as u64,
    );
    report
}

fn record_failure(report: &mut MaintenanceReport, step: &str, error: &dyn std::fmt::Display) {
    obs::emit_maintenance_step_failed(step, error);
    report.failures.push(format!("{step}: {error}"));
}

async fn trim_sources(store: &dyn RelationStore, max_per_source: usize) -> StorageResult<usize> {
    let mut removed = 0;
    for (source_id, count) in store.count_by_source().await? {
        if count <= max_per_source {
            continue;
        }
        // list_from_source is best first; everything past the cap goes.
        let excess: Vec<RelationKey> = store
            .list_from_source(&source_id)
            .await?
            .iter()
            .skip(max_per_source)
            .map(|r| r.key())
            .collect();
        debug!(source_id = %source_id, count, excess = excess.len(), "Trimming source");
        removed += store.delete_keys(&excess).await?;
    }
    Ok(removed)
}
