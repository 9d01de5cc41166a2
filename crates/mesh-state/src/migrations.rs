//! SurrealDB schema migrations and initialization
//!
//! Sets up the `relations` and `memories` tables with the constraints the
//! storage traits rely on. Every statement uses `IF NOT EXISTS`, so running
//! the migrations on every connection is safe.

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all memory-mesh tables in SurrealDB.
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing memory-mesh SurrealDB schema");

    init_relations_table(db).await?;
    init_memories_table(db).await?;

    info!("memory-mesh schema initialization complete");
    Ok(())
}

/// Initialize the `relations` table
///
/// Schema:
/// ```text
/// TABLE relations {
///   source_id:      STRING
///   target_id:      STRING
///   owner_id:       STRING (indexed)
///   relation_type:  STRING (semantic | topical | temporal)
///   score:          FLOAT  (0.0 ..= 1.0)
///   created_at:     DATETIME
///   updated_at:     DATETIME
/// }
/// ```
///
/// Constraints:
/// - `(source_id, target_id)` is unique. Concurrent writers racing on the same
///   pair get a uniqueness error, which the store surfaces as `Conflict`.
async fn init_relations_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing relations table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS relations SCHEMAFULL;
        DEFINE FIELD IF NOT EXISTS source_id ON relations TYPE string;
        DEFINE FIELD IF NOT EXISTS target_id ON relations TYPE string;
        DEFINE FIELD IF NOT EXISTS owner_id ON relations TYPE string;
        DEFINE FIELD IF NOT EXISTS relation_type ON relations TYPE string
            ASSERT $value IN ["semantic", "topical", "temporal"];
        DEFINE FIELD IF NOT EXISTS score ON relations TYPE float
            ASSERT $value >= 0 AND $value <= 1;
        DEFINE FIELD IF NOT EXISTS created_at ON relations TYPE datetime;
        DEFINE FIELD IF NOT EXISTS updated_at ON relations TYPE datetime;

        -- One row per ordered pair
        DEFINE INDEX IF NOT EXISTS idx_relation_pair ON relations FIELDS source_id, target_id UNIQUE;

        DEFINE INDEX IF NOT EXISTS idx_relation_source ON relations FIELDS source_id;
        DEFINE INDEX IF NOT EXISTS idx_relation_owner ON relations FIELDS owner_id;
    "#;

    db.query(sql)
        .await
        .map_err(|e| crate::StateError::SchemaSetup(e.to_string()))?
        .check()
        .map_err(|e| crate::StateError::SchemaSetup(e.to_string()))?;
    info!("✓ relations table initialized");
    Ok(())
}

/// Initialize the `memories` table (catalog mirror for the engine)
///
/// Constraints:
/// - `memory_id` is unique
async fn init_memories_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing memories table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS memories SCHEMAFULL;
        DEFINE FIELD IF NOT EXISTS memory_id ON memories TYPE string;
        DEFINE FIELD IF NOT EXISTS owner_id ON memories TYPE string;
        DEFINE FIELD IF NOT EXISTS title ON memories TYPE string;
        DEFINE FIELD IF NOT EXISTS summary ON memories TYPE string;
        DEFINE FIELD IF NOT EXISTS content ON memories TYPE string;
        DEFINE FIELD IF NOT EXISTS url ON memories TYPE option<string>;
        DEFINE FIELD IF NOT EXISTS source_type ON memories TYPE string;
        DEFINE FIELD IF NOT EXISTS created_at ON memories TYPE datetime;
        DEFINE FIELD IF NOT EXISTS metadata ON memories FLEXIBLE TYPE object;

        DEFINE INDEX IF NOT EXISTS idx_memory_id ON memories FIELDS memory_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_memory_owner ON memories FIELDS owner_id;
    "#;

    db.query(sql)
        .await
        .map_err(|e| crate::StateError::SchemaSetup(e.to_string()))?
        .check()
        .map_err(|e| crate::StateError::SchemaSetup(e.to_string()))?;
    info!("✓ memories table initialized");
    Ok(())
}
