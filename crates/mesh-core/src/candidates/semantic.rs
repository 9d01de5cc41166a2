//! Semantic candidates: nearest neighbours of the source's content embedding.

use tracing::{debug, warn};

use mesh_state::{MemoryCatalog, MemoryRecord, RelationType};

use super::rules::CompiledRuleSet;
use super::{rank_and_cap, Candidate};
use crate::config::SemanticConfig;
use crate::error::MeshResult;
use crate::similarity::{EmbeddingFacet, SearchFilter, SimilarityIndex};

/// Semantic generator with its adjustment rules compiled once.
#[derive(Debug, Clone)]
pub struct SemanticGenerator {
    config: SemanticConfig,
    rules: CompiledRuleSet,
}

impl SemanticGenerator {
    pub fn new(config: SemanticConfig) -> MeshResult<Self> {
        let rules = config.rules.compile()?;
        Ok(Self { config, rules })
    }

    pub fn rules(&self) -> &CompiledRuleSet {
        &self.rules
    }

    /// Neighbours of `source` scoring at least the threshold after adjustment.
    ///
    /// Returns nothing if the source has no content embedding or the index
    /// fails. Hits whose memory cannot be loaded, or that belong to another
    /// owner, are skipped.
    pub async fn generate(
        &self,
        source: &MemoryRecord,
        index: &dyn SimilarityIndex,
        catalog: &dyn MemoryCatalog,
    ) -> Vec<Candidate> {
        let vector = match index.embedding(&source.id, EmbeddingFacet::Content).await {
            Ok(Some(v)) => v,
            Ok(None) => {
                debug!(memory_id = %source.id, "No content embedding; skipping semantic candidates");
                return Vec::new();
            }
            Err(e) => {
                warn!(memory_id = %source.id, error = %e, "Embedding lookup failed");
                return Vec::new();
            }
        };

        let filter = SearchFilter::for_owner(&source.owner_id).excluding(&source.id);
        let hits = match index.search(&vector, &filter, self.config.search_k).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(memory_id = %source.id, error = %e, "Similarity search failed");
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        for hit in hits {
            if hit.memory_id == source.id || hit.score < self.config.threshold {
                continue;
            }
            let candidate = match catalog.get(&hit.memory_id).await {
                Ok(Some(m)) if m.owner_id == source.owner_id => m,
                Ok(_) => continue,
                Err(e) => {
                    warn!(memory_id = %hit.memory_id, error = %e, "Catalog lookup failed");
                    continue;
                }
            };
            let adjusted = self.rules.apply(source, &candidate, hit.score);
            if adjusted >= self.config.threshold {
                out.push(Candidate::new(&hit.memory_id, RelationType::Semantic, adjusted));
            }
        }
        rank_and_cap(out, self.config.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::rules::SemanticRuleSet;
    use crate::error::MeshError;
    use crate::similarity::{InMemorySimilarityIndex, SearchHit};
    use async_trait::async_trait;
    use mesh_state::InMemoryCatalog;

    struct BrokenIndex;

    #[async_trait]
    impl SimilarityIndex for BrokenIndex {
        async fn search(&self, _: &[f32], _: &SearchFilter, _: usize) -> MeshResult<Vec<SearchHit>> {
            Err(MeshError::Upstream("index down".into()))
        }
        async fn embedding(&self, _: &str, _: EmbeddingFacet) -> MeshResult<Option<Vec<f32>>> {
            Ok(Some(vec![1.0, 0.0]))
        }
    }

    fn setup() -> (InMemorySimilarityIndex, InMemoryCatalog) {
        let index = InMemorySimilarityIndex::new();
        let catalog = InMemoryCatalog::new();
        for (id, owner, url, v) in [
            ("src", "u1", "https://github.com/a", vec![1.0, 0.0]),
            ("near", "u1", "https://example.com/x", vec![0.9, 0.1]),
            ("video", "u1", "https://youtube.com/watch", vec![0.95, 0.05]),
            ("far", "u1", "https://example.com/y", vec![0.1, 1.0]),
            ("foreign", "u2", "https://example.com/z", vec![1.0, 0.0]),
        ] {
            index.insert(id, owner, EmbeddingFacet::Content, v);
            catalog.put(MemoryRecord::new(id, owner, id).with_url(url));
        }
        (index, catalog)
    }

    #[tokio::test]
    async fn finds_neighbours_and_applies_rules() {
        let (index, catalog) = setup();
        let gen = SemanticGenerator::new(SemanticConfig::default()).unwrap();
        let source = catalog.get("src").await.unwrap().unwrap();

        let out = gen.generate(&source, &index, &catalog).await;
        let ids: Vec<&str> = out.iter().map(|c| c.target_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "video"]);
        // ~0.9986 minus the developer/entertainment penalty
        assert!((out[1].score - 0.5986).abs() < 1e-3);
        assert!(out.iter().all(|c| c.relation_type == RelationType::Semantic));
    }

    #[tokio::test]
    async fn no_rules_no_penalty() {
        let (index, catalog) = setup();
        let config = SemanticConfig {
            rules: SemanticRuleSet::empty(),
            ..SemanticConfig::default()
        };
        let gen = SemanticGenerator::new(config).unwrap();
        let source = catalog.get("src").await.unwrap().unwrap();
        let out = gen.generate(&source, &index, &catalog).await;
        assert_eq!(out[0].target_id, "video");
    }

    #[tokio::test]
    async fn fails_soft() {
        let (_, catalog) = setup();
        let gen = SemanticGenerator::new(SemanticConfig::default()).unwrap();
        let source = catalog.get("src").await.unwrap().unwrap();
        assert!(gen.generate(&source, &BrokenIndex, &catalog).await.is_empty());

        let empty = InMemorySimilarityIndex::new();
        assert!(gen.generate(&source, &empty, &catalog).await.is_empty());
    }
}
