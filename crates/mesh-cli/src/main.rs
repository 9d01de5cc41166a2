//! Memory Mesh CLI
//!
//! The `mesh` command runs the relationship-graph engine over a dataset
//! file or a SurrealDB instance and prints JSON results.
//!
//! ## Commands
//!
//! - `process`: compute relations for one memory or every memory of an owner
//! - `mesh`: assemble the mesh (nodes, edges, clusters) for an owner
//! - `cluster`: expand around one memory along strong relations
//! - `maintain`: run one relation maintenance pass
//!
//! ## Dataset format
//!
//! ```json
//! {
//!   "memories": [{ "id": "m1", "owner_id": "u1", "title": "...", "created_at": "..." }],
//!   "embeddings": { "m1": [0.1, 0.2, 0.3] }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{info, Level};

use mesh_arbiter::{HttpArbiter, InMemoryArbitrationCache, RelevanceArbiter, UnavailableArbiter};
use mesh_core::{EmbeddingFacet, InMemorySimilarityIndex, MeshConfig, MeshEngine};
use mesh_state::{
    InMemoryCatalog, InMemoryRelationStore, MemoryCatalog, MemoryRecord, RelationStore,
    SurrealHandle, SurrealMemoryCatalog, SurrealRelationStore,
};

#[derive(Parser)]
#[command(name = "mesh")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Memory mesh relationship-graph engine", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Engine configuration file (JSON); MESH_* variables override it
    #[arg(long, global = true, env = "MESH_CONFIG")]
    config: Option<PathBuf>,

    /// Dataset file with memories and embeddings
    #[arg(long, global = true)]
    dataset: Option<PathBuf>,

    /// Persist memories and relations in SurrealDB (SURREALDB_* variables)
    #[arg(long, global = true)]
    surreal: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute and store relations
    Process {
        /// Owner whose memories are processed
        #[arg(short, long)]
        owner: String,

        /// Single memory to process (default: every memory of the owner)
        #[arg(short, long)]
        memory: Option<String>,
    },

    /// Assemble the mesh for an owner
    Mesh {
        #[arg(short, long)]
        owner: String,

        /// Maximum number of memories (capped by the configured maximum)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Minimum edge score kept before pruning
        #[arg(short, long)]
        threshold: Option<f64>,
    },

    /// Expand the cluster around one memory
    Cluster {
        #[arg(short, long)]
        owner: String,

        /// Memory at the centre of the cluster
        #[arg(short, long)]
        center: String,

        /// Maximum hops from the centre
        #[arg(short, long, default_value = "2")]
        depth: usize,
    },

    /// Run one maintenance pass over stored relations
    Maintain,
}

/// Memories and their content embeddings, as read from `--dataset`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Dataset {
    memories: Vec<MemoryRecord>,
    #[serde(default)]
    embeddings: BTreeMap<String, Vec<f32>>,
}

impl Dataset {
    fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dataset {}", path.display()))?;
        let dataset: Dataset = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse dataset {}", path.display()))?;
        Ok(dataset)
    }

    fn similarity_index(&self) -> InMemorySimilarityIndex {
        let index = InMemorySimilarityIndex::new();
        for m in &self.memories {
            if let Some(v) = self.embeddings.get(&m.id) {
                index.insert(&m.id, &m.owner_id, EmbeddingFacet::Content, v.clone());
            }
        }
        index
    }
}

fn load_config(path: Option<&Path>) -> Result<MeshConfig> {
    let mut config = match path {
        Some(p) => MeshConfig::from_json_file(p)?,
        None => MeshConfig::default(),
    };
    config.apply_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

fn arbiter_from_env() -> Result<Arc<dyn RelevanceArbiter>> {
    match HttpArbiter::from_env().context("Invalid arbiter configuration")? {
        Some(arbiter) => {
            info!(endpoint = %arbiter.config().endpoint, "Using HTTP arbiter");
            Ok(Arc::new(arbiter))
        }
        None => {
            info!("MESH_ARBITER_ENDPOINT not set; tier-3 candidates use the heuristic");
            Ok(Arc::new(UnavailableArbiter))
        }
    }
}

/// Engine over in-memory collaborators seeded from `dataset`.
fn build_memory_engine(
    config: MeshConfig,
    dataset: Dataset,
    arbiter: Arc<dyn RelevanceArbiter>,
) -> Result<MeshEngine> {
    let index = Arc::new(dataset.similarity_index());
    let catalog = Arc::new(InMemoryCatalog::from_records(dataset.memories));
    Ok(MeshEngine::new(
        config,
        catalog,
        Arc::new(InMemoryRelationStore::new()),
        index,
        arbiter,
        Arc::new(InMemoryArbitrationCache::default()),
    )?)
}

/// Engine over SurrealDB, mirroring `dataset` memories into the catalog.
async fn build_surreal_engine(
    config: MeshConfig,
    handle: Arc<SurrealHandle>,
    dataset: Dataset,
    arbiter: Arc<dyn RelevanceArbiter>,
) -> Result<MeshEngine> {
    let catalog = SurrealMemoryCatalog::new(handle.clone());
    for m in &dataset.memories {
        catalog
            .save(m)
            .await
            .with_context(|| format!("Failed to save memory {}", m.id))?;
    }
    let catalog: Arc<dyn MemoryCatalog> = Arc::new(catalog);
    let relations: Arc<dyn RelationStore> = Arc::new(SurrealRelationStore::new(handle));
    Ok(MeshEngine::new(
        config,
        catalog,
        relations,
        Arc::new(dataset.similarity_index()),
        arbiter,
        Arc::new(InMemoryArbitrationCache::default()),
    )?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_process(engine: &MeshEngine, owner: &str, memory: Option<&str>) -> Result<serde_json::Value> {
    let value = match memory {
        Some(id) => serde_json::to_value(engine.process_memory(id, owner).await?)?,
        None => serde_json::to_value(engine.process_owner(owner).await?)?,
    };
    mesh_core::metrics::METRICS.flush();
    Ok(value)
}

async fn cmd_mesh(
    engine: &MeshEngine,
    owner: &str,
    limit: Option<usize>,
    threshold: Option<f64>,
) -> Result<serde_json::Value> {
    let mesh = engine.get_mesh(owner, limit, threshold).await?;
    Ok(serde_json::to_value(mesh)?)
}

async fn cmd_cluster(engine: &MeshEngine, owner: &str, center: &str, depth: usize) -> Result<serde_json::Value> {
    let cluster = engine.get_cluster(owner, center, depth).await?;
    Ok(serde_json::to_value(cluster)?)
}

async fn cmd_maintain(engine: &MeshEngine) -> Result<serde_json::Value> {
    let report = engine.run_maintenance().await;
    Ok(serde_json::to_value(report)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    mesh_core::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;
    let dataset = match cli.dataset.as_deref() {
        Some(p) => Dataset::load(p)?,
        None if cli.surreal => Dataset::default(),
        None => bail!("--dataset is required unless --surreal is given"),
    };
    let arbiter = arbiter_from_env()?;

    let engine = if cli.surreal {
        let handle = SurrealHandle::setup_from_env()
            .await
            .context("Failed to connect to the mesh database")?;
        build_surreal_engine(config, Arc::new(handle), dataset, arbiter).await?
    } else {
        build_memory_engine(config, dataset, arbiter)?
    };

    let output = match cli.command {
        Commands::Process { owner, memory } => cmd_process(&engine, &owner, memory.as_deref()).await?,
        Commands::Mesh {
            owner,
            limit,
            threshold,
        } => cmd_mesh(&engine, &owner, limit, threshold).await?,
        Commands::Cluster {
            owner,
            center,
            depth,
        } => cmd_cluster(&engine, &owner, &center, depth).await?,
        Commands::Maintain => cmd_maintain(&engine).await?,
    };
    print_json(&output)
}
