//! Storage trait definitions for the memory mesh
//!
//! These traits define the persistence seams the engine depends on:
//! - `RelationStore`: relation rows, unique on the ordered `(source, target)` pair
//! - `MemoryCatalog`: read-only access to captured memories
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! via the `fakes` module; SurrealDB implementations live in `surreal_store`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::schema::{MemoryRecord, RelationKey, RelationRecord, RelationType};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// RelationStore
// ---------------------------------------------------------------------------

/// Predicate for bulk deletes. Every field that is set must match.
///
/// An empty filter matches nothing; callers must constrain at least one field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationFilter {
    pub owner_id: Option<String>,
    pub source_id: Option<String>,
    /// Matches rows with `score < score_below`.
    pub score_below: Option<f64>,
    /// Matches rows with `created_at < created_before`.
    pub created_before: Option<DateTime<Utc>>,
}

impl RelationFilter {
    pub fn score_below(threshold: f64) -> Self {
        Self {
            score_below: Some(threshold),
            ..Self::default()
        }
    }

    pub fn with_owner(mut self, owner_id: &str) -> Self {
        self.owner_id = Some(owner_id.to_string());
        self
    }

    pub fn with_source(mut self, source_id: &str) -> Self {
        self.source_id = Some(source_id.to_string());
        self
    }

    pub fn created_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.created_before = Some(cutoff);
        self
    }

    /// Whether the filter constrains anything at all.
    pub fn is_unconstrained(&self) -> bool {
        self.owner_id.is_none()
            && self.source_id.is_none()
            && self.score_below.is_none()
            && self.created_before.is_none()
    }

    /// Evaluate the filter against a row.
    pub fn matches(&self, record: &RelationRecord) -> bool {
        if self.is_unconstrained() {
            return false;
        }
        if let Some(ref owner) = self.owner_id {
            if &record.owner_id != owner {
                return false;
            }
        }
        if let Some(ref source) = self.source_id {
            if &record.source_id != source {
                return false;
            }
        }
        if let Some(threshold) = self.score_below {
            if record.score >= threshold {
                return false;
            }
        }
        if let Some(cutoff) = self.created_before {
            if record.created_at >= cutoff {
                return false;
            }
        }
        true
    }
}

/// Persistence for relation rows.
///
/// Guarantees:
/// - At most one row per ordered `(source_id, target_id)` pair.
/// - `insert` on an existing pair fails with `StorageError::Conflict` and
///   leaves the existing row untouched.
/// - `update` replaces type and score of an existing row; it never creates one.
#[async_trait]
pub trait RelationStore: Send + Sync {
    /// Insert a new row. Fails with `Conflict` if the pair already exists.
    async fn insert(&self, record: RelationRecord) -> StorageResult<()>;

    /// Overwrite type and score of an existing row.
    async fn update(
        &self,
        key: &RelationKey,
        relation_type: RelationType,
        score: f64,
    ) -> StorageResult<()>;

    /// Look up the row for an ordered pair.
    async fn find_by_key(&self, key: &RelationKey) -> StorageResult<Option<RelationRecord>>;

    /// All rows whose source is `source_id`, highest score first.
    async fn list_from_source(&self, source_id: &str) -> StorageResult<Vec<RelationRecord>>;

    /// All rows owned by `owner_id`.
    async fn list_for_owner(&self, owner_id: &str) -> StorageResult<Vec<RelationRecord>>;

    /// Delete every row matching `filter`; returns the number removed.
    async fn delete_where(&self, filter: &RelationFilter) -> StorageResult<usize>;

    /// Delete the given pairs; missing pairs are ignored. Returns the number removed.
    async fn delete_keys(&self, keys: &[RelationKey]) -> StorageResult<usize>;

    /// Number of rows per source id.
    async fn count_by_source(&self) -> StorageResult<Vec<(String, usize)>>;
}

// ---------------------------------------------------------------------------
// MemoryCatalog
// ---------------------------------------------------------------------------

/// Read-only access to memory records produced by the ingestion pipeline.
#[async_trait]
pub trait MemoryCatalog: Send + Sync {
    /// Fetch one memory; `Ok(None)` if it does not exist.
    async fn get(&self, memory_id: &str) -> StorageResult<Option<MemoryRecord>>;

    /// Memories of one owner, newest first, optionally limited.
    async fn list_for_owner(
        &self,
        owner_id: &str,
        limit: Option<usize>,
    ) -> StorageResult<Vec<MemoryRecord>>;

    /// Memories of one owner created within `[from, to]` inclusive, newest first.
    async fn list_created_between(
        &self,
        owner_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<Vec<MemoryRecord>>;
}
