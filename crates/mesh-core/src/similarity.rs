//! Similarity-index seam.
//!
//! The engine never computes embeddings. It asks an external index for the
//! stored vector of a memory and for nearest neighbours of a vector.
//! [`InMemorySimilarityIndex`] is a brute-force cosine implementation for
//! tests and dataset runs.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MeshResult;

/// Which text an embedding was computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingFacet {
    #[default]
    Content,
    Summary,
    Title,
}

/// Restricts a nearest-neighbour search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchFilter {
    pub owner_id: String,
    pub facet: EmbeddingFacet,
    /// Memory ids never returned.
    pub exclude: Vec<String>,
}

impl SearchFilter {
    pub fn for_owner(owner_id: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            facet: EmbeddingFacet::Content,
            exclude: Vec::new(),
        }
    }

    pub fn excluding(mut self, memory_id: &str) -> Self {
        self.exclude.push(memory_id.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub memory_id: String,
    /// Similarity in [0, 1].
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Up to `k` nearest neighbours of `vector`, best first.
    async fn search(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        k: usize,
    ) -> MeshResult<Vec<SearchHit>>;

    /// Stored vector for a memory, if any.
    async fn embedding(
        &self,
        memory_id: &str,
        facet: EmbeddingFacet,
    ) -> MeshResult<Option<Vec<f32>>>;
}

/// Cosine similarity clamped to [0, 1]. Zero-length or mismatched vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na.sqrt() * nb.sqrt())).clamp(0.0, 1.0)
}

#[derive(Debug, Clone)]
struct StoredVector {
    owner_id: String,
    vector: Vec<f32>,
}

type VectorMap = HashMap<(String, EmbeddingFacet), StoredVector>;

/// Brute-force index over a `RwLock<HashMap>`.
#[derive(Debug, Default)]
pub struct InMemorySimilarityIndex {
    vectors: RwLock<VectorMap>,
}

impl InMemorySimilarityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, VectorMap> {
        self.vectors.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, VectorMap> {
        self.vectors.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, memory_id: &str, owner_id: &str, facet: EmbeddingFacet, vector: Vec<f32>) {
        self.write().insert(
            (memory_id.to_string(), facet),
            StoredVector {
                owner_id: owner_id.to_string(),
                vector,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[async_trait]
impl SimilarityIndex for InMemorySimilarityIndex {
    async fn search(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        k: usize,
    ) -> MeshResult<Vec<SearchHit>> {
        let vectors = self.read();
        let mut hits: Vec<SearchHit> = vectors
            .iter()
            .filter(|((id, facet), stored)| {
                *facet == filter.facet
                    && stored.owner_id == filter.owner_id
                    && !filter.exclude.contains(id)
            })
            .map(|((id, _), stored)| SearchHit {
                memory_id: id.clone(),
                score: cosine_similarity(vector, &stored.vector),
                vector: Some(stored.vector.clone()),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.memory_id.cmp(&b.memory_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn embedding(
        &self,
        memory_id: &str,
        facet: EmbeddingFacet,
    ) -> MeshResult<Option<Vec<f32>>> {
        Ok(self
            .read()
            .get(&(memory_id.to_string(), facet))
            .map(|s| s.vector.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_edge_cases() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn search_scopes_to_owner_and_excludes() {
        let index = InMemorySimilarityIndex::new();
        index.insert("a", "u1", EmbeddingFacet::Content, vec![1.0, 0.0]);
        index.insert("b", "u1", EmbeddingFacet::Content, vec![0.8, 0.6]);
        index.insert("c", "u1", EmbeddingFacet::Content, vec![0.0, 1.0]);
        index.insert("d", "u2", EmbeddingFacet::Content, vec![1.0, 0.0]);
        index.insert("e", "u1", EmbeddingFacet::Title, vec![1.0, 0.0]);

        let hits = index
            .search(&[1.0, 0.0], &SearchFilter::for_owner("u1").excluding("a"), 10)
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.memory_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!((hits[0].score - 0.8).abs() < 1e-6);

        let top1 = index
            .search(&[1.0, 0.0], &SearchFilter::for_owner("u1"), 1)
            .await
            .unwrap();
        assert_eq!(top1[0].memory_id, "a");
    }

    #[tokio::test]
    async fn embedding_lookup_by_facet() {
        let index = InMemorySimilarityIndex::new();
        index.insert("a", "u1", EmbeddingFacet::Summary, vec![0.5]);
        assert!(index
            .embedding("a", EmbeddingFacet::Content)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            index.embedding("a", EmbeddingFacet::Summary).await.unwrap(),
            Some(vec![0.5])
        );
    }
}
