//! Memory mesh background service.
//!
//! Connects to SurrealDB from the environment, then runs relation
//! maintenance every `MESH_MAINTENANCE_INTERVAL_SECS` (default 3600) and
//! sweeps the arbitration cache every `MESH_CACHE_SWEEP_SECS` (default 600)
//! until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, Level};

use mesh_arbiter::{
    spawn_cache_sweeper, ArbitrationCache, HttpArbiter, InMemoryArbitrationCache,
    RelevanceArbiter, UnavailableArbiter,
};
use mesh_core::{spawn_maintenance, InMemorySimilarityIndex, MeshConfig, MeshEngine};
use mesh_state::{SurrealHandle, SurrealMemoryCatalog, SurrealRelationStore};

const DEFAULT_MAINTENANCE_SECS: u64 = 3600;
const DEFAULT_CACHE_SWEEP_SECS: u64 = 600;

/// Positive seconds from `key`, or `default` when unset.
fn interval_from<F>(lookup: F, key: &str, default: u64) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let secs = match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("{key}: cannot parse '{raw}'"))?,
        None => default,
    };
    anyhow::ensure!(secs > 0, "{key} must be positive");
    Ok(Duration::from_secs(secs))
}

#[tokio::main]
async fn main() -> Result<()> {
    let json = std::env::var("MESH_LOG_JSON").is_ok_and(|v| v == "1" || v == "true");
    mesh_core::init_tracing(json, Level::INFO);

    let env = |key: &str| std::env::var(key).ok();
    let maintenance_every = interval_from(env, "MESH_MAINTENANCE_INTERVAL_SECS", DEFAULT_MAINTENANCE_SECS)?;
    let sweep_every = interval_from(env, "MESH_CACHE_SWEEP_SECS", DEFAULT_CACHE_SWEEP_SECS)?;
    let config = MeshConfig::from_env()?;

    let handle = Arc::new(
        SurrealHandle::setup_from_env()
            .await
            .context("Failed to connect to the mesh database")?,
    );
    let arbiter: Arc<dyn RelevanceArbiter> = match HttpArbiter::from_env()? {
        Some(a) => Arc::new(a),
        None => Arc::new(UnavailableArbiter),
    };
    let cache: Arc<dyn ArbitrationCache> = Arc::new(InMemoryArbitrationCache::default());

    let engine = Arc::new(MeshEngine::new(
        config,
        Arc::new(SurrealMemoryCatalog::new(handle.clone())),
        Arc::new(SurrealRelationStore::new(handle)),
        Arc::new(InMemorySimilarityIndex::new()),
        arbiter,
        cache.clone(),
    )?);

    info!(
        maintenance_secs = maintenance_every.as_secs(),
        sweep_secs = sweep_every.as_secs(),
        "meshd started"
    );
    let maintenance = spawn_maintenance(engine, maintenance_every);
    let sweeper = spawn_cache_sweeper(cache, sweep_every);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    maintenance.abort();
    sweeper.abort();
    mesh_core::metrics::METRICS.flush();
    Ok(())
}
