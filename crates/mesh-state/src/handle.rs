//! SurrealDB Handle - Connection and Operations
//!
//! Manages the connection and provides the row-level operations behind
//! `SurrealRelationStore` and `SurrealMemoryCatalog`:
//! - relation insert / conditional update / lookup / bulk delete
//! - memory save / lookup / owner listing
//!
//! Supports both local (in-memory) and cloud (WebSocket) connections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::sql::Datetime as SurrealDatetime;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::{StateError, StorageError};
use crate::migrations;
use crate::schema::{
    clamp_score, MemoryMetadata, MemoryRecord, RelationKey, RelationRecord, RelationType,
};
use crate::storage_traits::{RelationFilter, StorageResult};
use crate::Result;

const DEFAULT_NAMESPACE: &str = "mesh";
const DEFAULT_DATABASE: &str = "main";

/// Remote database settings read by [`SurrealHandle::setup_from_env`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudConfig {
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub namespace: String,
    pub database: String,
    /// Sign in as a root user rather than a database user.
    pub is_root: bool,
}

impl CloudConfig {
    /// Remote settings from `SURREALDB_*`, or `None` when no endpoint is set.
    ///
    /// `SURREALDB_ENDPOINT` requires `SURREALDB_USERNAME` and
    /// `SURREALDB_PASSWORD`; `SURREALDB_NAMESPACE`, `SURREALDB_DATABASE` and
    /// `SURREALDB_ROOT` are optional.
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Option<Self>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(endpoint) = lookup("SURREALDB_ENDPOINT") else {
            return Ok(None);
        };
        let required = |key: &str| {
            lookup(key).ok_or_else(|| {
                StateError::Connection(format!("{key} is required with SURREALDB_ENDPOINT"))
            })
        };
        Ok(Some(Self {
            username: required("SURREALDB_USERNAME")?,
            password: required("SURREALDB_PASSWORD")?,
            namespace: lookup("SURREALDB_NAMESPACE").unwrap_or_else(|| DEFAULT_NAMESPACE.into()),
            database: lookup("SURREALDB_DATABASE").unwrap_or_else(|| DEFAULT_DATABASE.into()),
            is_root: lookup("SURREALDB_ROOT").is_some_and(|v| v.eq_ignore_ascii_case("true")),
            endpoint,
        }))
    }
}

/// SurrealDB connection handle for the memory mesh
#[derive(Clone)]
pub struct SurrealHandle {
    db: Surreal<Any>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbRelationRecord {
    source_id: String,
    target_id: String,
    owner_id: String,
    relation_type: String,
    score: f64,
    created_at: SurrealDatetime,
    updated_at: SurrealDatetime,
}

impl DbRelationRecord {
    fn from_record(record: &RelationRecord) -> Self {
        Self {
            source_id: record.source_id.clone(),
            target_id: record.target_id.clone(),
            owner_id: record.owner_id.clone(),
            relation_type: record.relation_type.as_str().to_string(),
            score: clamp_score(record.score),
            created_at: SurrealDatetime::from(record.created_at),
            updated_at: SurrealDatetime::from(record.updated_at),
        }
    }

    fn into_relation_record(self) -> StorageResult<RelationRecord> {
        let relation_type = self
            .relation_type
            .parse::<RelationType>()
            .map_err(StorageError::Backend)?;
        Ok(RelationRecord {
            source_id: self.source_id,
            target_id: self.target_id,
            owner_id: self.owner_id,
            relation_type,
            score: self.score,
            created_at: DateTime::<Utc>::from(self.created_at),
            updated_at: DateTime::<Utc>::from(self.updated_at),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbMemoryRecord {
    memory_id: String,
    owner_id: String,
    title: String,
    summary: String,
    content: String,
    url: Option<String>,
    source_type: String,
    created_at: SurrealDatetime,
    metadata: MemoryMetadata,
}

impl DbMemoryRecord {
    fn from_record(record: &MemoryRecord) -> Self {
        Self {
            memory_id: record.id.clone(),
            owner_id: record.owner_id.clone(),
            title: record.title.clone(),
            summary: record.summary.clone(),
            content: record.content.clone(),
            url: record.url.clone(),
            source_type: record.source_type.clone(),
            created_at: SurrealDatetime::from(record.created_at),
            metadata: record.metadata.clone(),
        }
    }

    fn into_memory_record(self) -> MemoryRecord {
        MemoryRecord {
            id: self.memory_id,
            owner_id: self.owner_id,
            title: self.title,
            summary: self.summary,
            content: self.content,
            url: self.url,
            source_type: self.source_type,
            created_at: DateTime::<Utc>::from(self.created_at),
            metadata: self.metadata,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SourceCount {
    source_id: String,
    n: i64,
}

/// Unique-index violations surface as "Database index `...` already contains ...".
fn is_unique_violation(message: &str) -> bool {
    message.contains("already contains")
}

fn backend(err: surrealdb::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

async fn open(url: &str) -> Result<Surreal<Any>> {
    surrealdb::engine::any::connect(url)
        .await
        .map_err(|e| StateError::Connection(format!("{url}: {e}")))
}

impl SurrealHandle {
    /// In-memory database with the schema applied.
    pub async fn setup_db() -> Result<Self> {
        Self::connect_url("mem://").await
    }

    /// Connect to `mem://`, `surrealkv://path` or `ws://host` without signing in.
    #[instrument]
    pub async fn connect_url(url: &str) -> Result<Self> {
        let db = open(url).await?;
        Self::select_and_migrate(db, DEFAULT_NAMESPACE, DEFAULT_DATABASE).await
    }

    /// Connect to a remote endpoint and sign in.
    #[instrument(skip(config), fields(endpoint = %config.endpoint, root = config.is_root))]
    pub async fn setup_cloud(config: &CloudConfig) -> Result<Self> {
        let db = open(&config.endpoint).await?;
        let signed_in = if config.is_root {
            db.signin(Root {
                username: &config.username,
                password: &config.password,
            })
            .await
            .map(|_| ())
        } else {
            db.signin(Database {
                namespace: &config.namespace,
                database: &config.database,
                username: &config.username,
                password: &config.password,
            })
            .await
            .map(|_| ())
        };
        signed_in.map_err(|e| StateError::Connection(format!("sign-in failed: {e}")))?;
        Self::select_and_migrate(db, &config.namespace, &config.database).await
    }

    /// Remote endpoint when `SURREALDB_ENDPOINT` is set, else `SURREALDB_URL`,
    /// else in-memory.
    pub async fn setup_from_env() -> Result<Self> {
        if let Some(config) = CloudConfig::from_env()? {
            return Self::setup_cloud(&config).await;
        }
        let url = std::env::var("SURREALDB_URL").unwrap_or_else(|_| "mem://".to_string());
        Self::connect_url(&url).await
    }

    async fn select_and_migrate(db: Surreal<Any>, namespace: &str, database: &str) -> Result<Self> {
        db.use_ns(namespace)
            .use_db(database)
            .await
            .map_err(|e| StateError::Connection(format!("{namespace}/{database}: {e}")))?;
        migrations::init_schema(&db).await?;
        info!(namespace, database, "Mesh database ready");
        Ok(SurrealHandle { db })
    }

    // ========== Relation Operations ==========

    /// Insert a relation row; a duplicate pair becomes `StorageError::Conflict`.
    #[instrument(skip(self, record), fields(key = %record.key()))]
    pub async fn relation_insert(&self, record: &RelationRecord) -> StorageResult<()> {
        debug!("Inserting relation");

        let row = DbRelationRecord::from_record(record);
        let created: std::result::Result<Option<DbRelationRecord>, surrealdb::Error> =
            self.db.create("relations").content(row).await;

        match created {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(StorageError::Backend(
                "create returned no relation row".to_string(),
            )),
            Err(e) if is_unique_violation(&e.to_string()) => Err(StorageError::Conflict {
                source_id: record.source_id.clone(),
                target_id: record.target_id.clone(),
            }),
            Err(e) => Err(backend(e)),
        }
    }

    /// Overwrite type and score of an existing relation row.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn relation_update(
        &self,
        key: &RelationKey,
        relation_type: RelationType,
        score: f64,
    ) -> StorageResult<()> {
        let mut result = self
            .db
            .query(
                "UPDATE relations SET relation_type = $relation_type, score = $score, \
                 updated_at = time::now() \
                 WHERE source_id = $source_id AND target_id = $target_id RETURN AFTER",
            )
            .bind(("relation_type", relation_type.as_str().to_string()))
            .bind(("score", clamp_score(score)))
            .bind(("source_id", key.source_id.clone()))
            .bind(("target_id", key.target_id.clone()))
            .await
            .map_err(backend)?;

        let updated: Vec<DbRelationRecord> = result.take(0).map_err(backend)?;
        if updated.is_empty() {
            return Err(StorageError::RelationNotFound {
                source_id: key.source_id.clone(),
                target_id: key.target_id.clone(),
            });
        }
        Ok(())
    }

    /// Fetch the relation row for an ordered pair.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn relation_get(&self, key: &RelationKey) -> StorageResult<Option<RelationRecord>> {
        let mut result = self
            .db
            .query("SELECT * FROM relations WHERE source_id = $source_id AND target_id = $target_id")
            .bind(("source_id", key.source_id.clone()))
            .bind(("target_id", key.target_id.clone()))
            .await
            .map_err(backend)?;

        let rows: Vec<DbRelationRecord> = result.take(0).map_err(backend)?;
        rows.into_iter()
            .next()
            .map(DbRelationRecord::into_relation_record)
            .transpose()
    }

    /// Relation rows leaving `source_id`, highest score first.
    #[instrument(skip(self))]
    pub async fn relations_from_source(&self, source_id: &str) -> StorageResult<Vec<RelationRecord>> {
        let mut result = self
            .db
            .query(
                "SELECT * FROM relations WHERE source_id = $source_id \
                 ORDER BY score DESC, target_id ASC",
            )
            .bind(("source_id", source_id.to_string()))
            .await
            .map_err(backend)?;

        let rows: Vec<DbRelationRecord> = result.take(0).map_err(backend)?;
        rows.into_iter()
            .map(DbRelationRecord::into_relation_record)
            .collect()
    }

    /// Relation rows owned by `owner_id`.
    #[instrument(skip(self))]
    pub async fn relations_for_owner(&self, owner_id: &str) -> StorageResult<Vec<RelationRecord>> {
        let mut result = self
            .db
            .query(
                "SELECT * FROM relations WHERE owner_id = $owner_id \
                 ORDER BY source_id ASC, target_id ASC",
            )
            .bind(("owner_id", owner_id.to_string()))
            .await
            .map_err(backend)?;

        let rows: Vec<DbRelationRecord> = result.take(0).map_err(backend)?;
        rows.into_iter()
            .map(DbRelationRecord::into_relation_record)
            .collect()
    }

    /// Delete relation rows matching every set field of `filter`.
    #[instrument(skip(self))]
    pub async fn relations_delete_where(&self, filter: &RelationFilter) -> StorageResult<usize> {
        if filter.is_unconstrained() {
            return Ok(0);
        }

        let mut clauses = Vec::new();
        if filter.owner_id.is_some() {
            clauses.push("owner_id = $owner_id");
        }
        if filter.source_id.is_some() {
            clauses.push("source_id = $source_id");
        }
        if filter.score_below.is_some() {
            clauses.push("score < $score_below");
        }
        if filter.created_before.is_some() {
            clauses.push("created_at < $created_before");
        }
        let sql = format!(
            "DELETE relations WHERE {} RETURN BEFORE",
            clauses.join(" AND ")
        );

        let mut query = self.db.query(sql);
        if let Some(ref owner) = filter.owner_id {
            query = query.bind(("owner_id", owner.clone()));
        }
        if let Some(ref source) = filter.source_id {
            query = query.bind(("source_id", source.clone()));
        }
        if let Some(threshold) = filter.score_below {
            query = query.bind(("score_below", threshold));
        }
        if let Some(cutoff) = filter.created_before {
            query = query.bind(("created_before", SurrealDatetime::from(cutoff)));
        }

        let mut result = query.await.map_err(backend)?;
        let removed: Vec<DbRelationRecord> = result.take(0).map_err(backend)?;
        debug!(removed = removed.len(), "Deleted relations by filter");
        Ok(removed.len())
    }

    /// Delete the given pairs.
    #[instrument(skip(self, keys), fields(count = keys.len()))]
    pub async fn relations_delete_keys(&self, keys: &[RelationKey]) -> StorageResult<usize> {
        let mut removed = 0;
        for key in keys {
            let mut result = self
                .db
                .query(
                    "DELETE relations WHERE source_id = $source_id AND target_id = $target_id \
                     RETURN BEFORE",
                )
                .bind(("source_id", key.source_id.clone()))
                .bind(("target_id", key.target_id.clone()))
                .await
                .map_err(backend)?;
            let rows: Vec<DbRelationRecord> = result.take(0).map_err(backend)?;
            removed += rows.len();
        }
        Ok(removed)
    }

    /// Row count per source id.
    #[instrument(skip(self))]
    pub async fn relation_counts_by_source(&self) -> StorageResult<Vec<(String, usize)>> {
        let mut result = self
            .db
            .query("SELECT source_id, count() AS n FROM relations GROUP BY source_id")
            .await
            .map_err(backend)?;

        let rows: Vec<SourceCount> = result.take(0).map_err(backend)?;
        let mut counts: Vec<(String, usize)> = rows
            .into_iter()
            .map(|r| (r.source_id, usize::try_from(r.n).unwrap_or(0)))
            .collect();
        counts.sort();
        Ok(counts)
    }

    // ========== Memory Operations ==========

    /// Save (or replace) a memory record.
    #[instrument(skip(self, record), fields(memory_id = %record.id))]
    pub async fn save_memory(&self, record: &MemoryRecord) -> StorageResult<()> {
        debug!("Saving memory");

        let row = DbMemoryRecord::from_record(record);
        self.db
            .query("DELETE memories WHERE memory_id = $memory_id; CREATE memories CONTENT $row")
            .bind(("memory_id", record.id.clone()))
            .bind(("row", row))
            .await
            .map_err(backend)?
            .check()
            .map_err(backend)?;
        Ok(())
    }

    /// Get a memory by id.
    #[instrument(skip(self))]
    pub async fn get_memory(&self, memory_id: &str) -> StorageResult<Option<MemoryRecord>> {
        let mut result = self
            .db
            .query("SELECT * FROM memories WHERE memory_id = $memory_id")
            .bind(("memory_id", memory_id.to_string()))
            .await
            .map_err(backend)?;

        let rows: Vec<DbMemoryRecord> = result.take(0).map_err(backend)?;
        Ok(rows.into_iter().next().map(DbMemoryRecord::into_memory_record))
    }

    /// Memories of one owner, newest first.
    #[instrument(skip(self))]
    pub async fn memories_for_owner(
        &self,
        owner_id: &str,
        limit: Option<usize>,
    ) -> StorageResult<Vec<MemoryRecord>> {
        let sql = match limit {
            Some(n) => format!(
                "SELECT * FROM memories WHERE owner_id = $owner_id \
                 ORDER BY created_at DESC, memory_id ASC LIMIT {n}"
            ),
            None => "SELECT * FROM memories WHERE owner_id = $owner_id \
                     ORDER BY created_at DESC, memory_id ASC"
                .to_string(),
        };

        let mut result = self
            .db
            .query(sql)
            .bind(("owner_id", owner_id.to_string()))
            .await
            .map_err(backend)?;

        let rows: Vec<DbMemoryRecord> = result.take(0).map_err(backend)?;
        Ok(rows
            .into_iter()
            .map(DbMemoryRecord::into_memory_record)
            .collect())
    }

    /// Memories of one owner created within `[from, to]`, newest first.
    #[instrument(skip(self))]
    pub async fn memories_created_between(
        &self,
        owner_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<Vec<MemoryRecord>> {
        let mut result = self
            .db
            .query(
                "SELECT * FROM memories WHERE owner_id = $owner_id \
                 AND created_at >= $from AND created_at <= $to \
                 ORDER BY created_at DESC, memory_id ASC",
            )
            .bind(("owner_id", owner_id.to_string()))
            .bind(("from", SurrealDatetime::from(from)))
            .bind(("to", SurrealDatetime::from(to)))
            .await
            .map_err(backend)?;

        let rows: Vec<DbMemoryRecord> = result.take(0).map_err(backend)?;
        Ok(rows
            .into_iter()
            .map(DbMemoryRecord::into_memory_record)
            .collect())
    }
}
