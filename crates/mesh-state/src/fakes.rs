//! In-memory implementations of the storage traits
//!
//! `InMemoryRelationStore` and `InMemoryCatalog` satisfy the trait contracts
//! without any external dependencies. They back the tests and the CLI's
//! dataset mode.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::schema::{clamp_score, MemoryRecord, RelationKey, RelationRecord, RelationType};
use crate::storage_traits::*;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// InMemoryRelationStore
// ---------------------------------------------------------------------------

/// Relation rows in a `HashMap<RelationKey, RelationRecord>`.
///
/// The map key enforces the unique-pair contract the same way the database
/// index does: a second insert for a pair is a `Conflict`.
#[derive(Debug, Default)]
pub struct InMemoryRelationStore {
    rows: Mutex<HashMap<RelationKey, RelationRecord>>,
}

impl InMemoryRelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        lock(&self.rows).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.rows).is_empty()
    }

    /// Snapshot of every row, sorted by key.
    pub fn all(&self) -> Vec<RelationRecord> {
        let mut rows: Vec<RelationRecord> = lock(&self.rows).values().cloned().collect();
        rows.sort_by(|a, b| a.key().cmp(&b.key()));
        rows
    }
}

#[async_trait]
impl RelationStore for InMemoryRelationStore {
    async fn insert(&self, record: RelationRecord) -> StorageResult<()> {
        let mut rows = lock(&self.rows);
        let key = record.key();
        if rows.contains_key(&key) {
            return Err(StorageError::Conflict {
                source_id: key.source_id,
                target_id: key.target_id,
            });
        }
        rows.insert(key, record);
        Ok(())
    }

    async fn update(
        &self,
        key: &RelationKey,
        relation_type: RelationType,
        score: f64,
    ) -> StorageResult<()> {
        let mut rows = lock(&self.rows);
        let row = rows
            .get_mut(key)
            .ok_or_else(|| StorageError::RelationNotFound {
                source_id: key.source_id.clone(),
                target_id: key.target_id.clone(),
            })?;
        row.relation_type = relation_type;
        row.score = clamp_score(score);
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn find_by_key(&self, key: &RelationKey) -> StorageResult<Option<RelationRecord>> {
        Ok(lock(&self.rows).get(key).cloned())
    }

    async fn list_from_source(&self, source_id: &str) -> StorageResult<Vec<RelationRecord>> {
        let mut rows: Vec<RelationRecord> = lock(&self.rows)
            .values()
            .filter(|r| r.source_id == source_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.target_id.cmp(&b.target_id))
        });
        Ok(rows)
    }

    async fn list_for_owner(&self, owner_id: &str) -> StorageResult<Vec<RelationRecord>> {
        let mut rows: Vec<RelationRecord> = lock(&self.rows)
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(rows)
    }

    async fn delete_where(&self, filter: &RelationFilter) -> StorageResult<usize> {
        let mut rows = lock(&self.rows);
        let before = rows.len();
        rows.retain(|_, r| !filter.matches(r));
        Ok(before - rows.len())
    }

    async fn delete_keys(&self, keys: &[RelationKey]) -> StorageResult<usize> {
        let mut rows = lock(&self.rows);
        Ok(keys.iter().filter(|k| rows.remove(*k).is_some()).count())
    }

    async fn count_by_source(&self) -> StorageResult<Vec<(String, usize)>> {
        let rows = lock(&self.rows);
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for r in rows.values() {
            *counts.entry(r.source_id.as_str()).or_default() += 1;
        }
        let mut out: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(id, n)| (id.to_string(), n))
            .collect();
        out.sort();
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// InMemoryCatalog
// ---------------------------------------------------------------------------

/// Memory records in a `HashMap<memory_id, MemoryRecord>`.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    memories: Mutex<HashMap<String, MemoryRecord>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog pre-populated with `memories`.
    pub fn from_records<I: IntoIterator<Item = MemoryRecord>>(memories: I) -> Self {
        let catalog = Self::new();
        for m in memories {
            catalog.put(m);
        }
        catalog
    }

    /// Add or replace a memory (ingestion stand-in).
    pub fn put(&self, memory: MemoryRecord) {
        lock(&self.memories).insert(memory.id.clone(), memory);
    }

    pub fn len(&self) -> usize {
        lock(&self.memories).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.memories).is_empty()
    }
}

#[async_trait]
impl MemoryCatalog for InMemoryCatalog {
    async fn get(&self, memory_id: &str) -> StorageResult<Option<MemoryRecord>> {
        Ok(lock(&self.memories).get(memory_id).cloned())
    }

    async fn list_for_owner(
        &self,
        owner_id: &str,
        limit: Option<usize>,
    ) -> StorageResult<Vec<MemoryRecord>> {
        let mut memories: Vec<MemoryRecord> = lock(&self.memories)
            .values()
            .filter(|m| m.owner_id == owner_id)
            .cloned()
            .collect();
        // Newest first, id for deterministic tie-breaking.
        memories.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(limit) = limit {
            memories.truncate(limit);
        }
        Ok(memories)
    }

    async fn list_created_between(
        &self,
        owner_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<Vec<MemoryRecord>> {
        let mut memories = self.list_for_owner(owner_id, None).await?;
        memories.retain(|m| m.created_at >= from && m.created_at <= to);
        Ok(memories)
    }
}
