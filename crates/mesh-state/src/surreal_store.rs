//! SurrealDB-backed implementations of the storage traits.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::schema::{MemoryRecord, RelationKey, RelationRecord, RelationType};
use crate::storage_traits::{MemoryCatalog, RelationFilter, RelationStore, StorageResult};
use crate::SurrealHandle;

/// SurrealDB-backed implementation of [`RelationStore`].
#[derive(Clone)]
pub struct SurrealRelationStore {
    handle: Arc<SurrealHandle>,
}

impl SurrealRelationStore {
    pub fn new(handle: Arc<SurrealHandle>) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl RelationStore for SurrealRelationStore {
    async fn insert(&self, record: RelationRecord) -> StorageResult<()> {
        self.handle.relation_insert(&record).await
    }

    async fn update(
        &self,
        key: &RelationKey,
        relation_type: RelationType,
        score: f64,
    ) -> StorageResult<()> {
        self.handle.relation_update(key, relation_type, score).await
    }

    async fn find_by_key(&self, key: &RelationKey) -> StorageResult<Option<RelationRecord>> {
        self.handle.relation_get(key).await
    }

    async fn list_from_source(&self, source_id: &str) -> StorageResult<Vec<RelationRecord>> {
        self.handle.relations_from_source(source_id).await
    }

    async fn list_for_owner(&self, owner_id: &str) -> StorageResult<Vec<RelationRecord>> {
        self.handle.relations_for_owner(owner_id).await
    }

    async fn delete_where(&self, filter: &RelationFilter) -> StorageResult<usize> {
        self.handle.relations_delete_where(filter).await
    }

    async fn delete_keys(&self, keys: &[RelationKey]) -> StorageResult<usize> {
        self.handle.relations_delete_keys(keys).await
    }

    async fn count_by_source(&self) -> StorageResult<Vec<(String, usize)>> {
        self.handle.relation_counts_by_source().await
    }
}

/// SurrealDB-backed implementation of [`MemoryCatalog`].
#[derive(Clone)]
pub struct SurrealMemoryCatalog {
    handle: Arc<SurrealHandle>,
}

impl SurrealMemoryCatalog {
    pub fn new(handle: Arc<SurrealHandle>) -> Self {
        Self { handle }
    }

    /// Mirror a memory into the catalog table.
    pub async fn save(&self, memory: &MemoryRecord) -> StorageResult<()> {
        self.handle.save_memory(memory).await
    }
}

#[async_trait]
impl MemoryCatalog for SurrealMemoryCatalog {
    async fn get(&self, memory_id: &str) -> StorageResult<Option<MemoryRecord>> {
        self.handle.get_memory(memory_id).await
    }

    async fn list_for_owner(
        &self,
        owner_id: &str,
        limit: Option<usize>,
    ) -> StorageResult<Vec<MemoryRecord>> {
        self.handle.memories_for_owner(owner_id, limit).await
    }

    async fn list_created_between(
        &self,
        owner_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<Vec<MemoryRecord>> {
        self.handle.memories_created_between(owner_id, from, to).await
    }
}
