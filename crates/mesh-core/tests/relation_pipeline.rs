//! End-to-end tests for relation computation, upserts and maintenance.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::future::join_all;

use mesh_core::candidates::Candidate;
use mesh_core::config::{FilterConfig, MaintenancePolicy};
use mesh_core::{
    run_maintenance, EmbeddingFacet, InMemoryArbitrationCache, InMemorySimilarityIndex,
    MeshConfig, MeshEngine, TieredFilter, UnavailableArbiter,
};
use mesh_state::{
    InMemoryCatalog, InMemoryRelationStore, MemoryMetadata, MemoryRecord, RelationRecord,
    RelationStore, RelationType,
};

fn with_topics(id: &str, topics: &[&str]) -> MemoryRecord {
    MemoryRecord::new(id, "u1", id).with_metadata(MemoryMetadata::with_topics(topics.iter().copied()))
}

fn engine(
    memories: Vec<MemoryRecord>,
    index: Arc<InMemorySimilarityIndex>,
    store: Arc<InMemoryRelationStore>,
) -> MeshEngine {
    MeshEngine::new(
        MeshConfig::default(),
        Arc::new(InMemoryCatalog::from_records(memories)),
        store,
        index,
        Arc::new(UnavailableArbiter),
        Arc::new(InMemoryArbitrationCache::default()),
    )
    .unwrap()
}

/// A with topics [x, y, z], B with [x, y] an hour later, semantic 0.8.
fn example_one() -> (Vec<MemoryRecord>, Arc<InMemorySimilarityIndex>) {
    let t = Utc::now() - Duration::days(1);
    let memories = vec![
        with_topics("A", &["x", "y", "z"]).with_created_at(t),
        with_topics("B", &["x", "y"]).with_created_at(t + Duration::hours(1)),
    ];
    let index = Arc::new(InMemorySimilarityIndex::new());
    index.insert("A", "u1", EmbeddingFacet::Content, vec![1.0, 0.0]);
    // cosine([1, 0], [4, 3]) = 0.8
    index.insert("B", "u1", EmbeddingFacet::Content, vec![4.0, 3.0]);
    (memories, index)
}

#[tokio::test]
async fn test_close_scores_store_the_most_specific_type() {
    let (memories, index) = example_one();
    let store = Arc::new(InMemoryRelationStore::new());
    let engine = engine(memories, index, store.clone());

    let report = engine.process_memory("A", "u1").await.unwrap();
    assert_eq!(report.candidates.semantic, 1);
    assert_eq!(report.candidates.topical, 1);
    assert_eq!(report.candidates.temporal, 1);
    assert_eq!(report.merged, 1);
    assert_eq!(report.inserted, 1);

    let rows = store.all();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].target_id, "B");
    assert_eq!(rows[0].relation_type, RelationType::Semantic);
    assert!((rows[0].score - 0.8).abs() < 1e-9);
}

#[tokio::test]
async fn test_sequential_processing_is_idempotent() {
    let (memories, index) = example_one();
    let store = Arc::new(InMemoryRelationStore::new());
    let engine = engine(memories, index, store.clone());

    let first = engine.process_memory("A", "u1").await.unwrap();
    let before = store.all();
    let second = engine.process_memory("A", "u1").await.unwrap();

    assert_eq!(first.inserted, 1);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.unchanged, second.accepted);
    let after = store.all();
    assert_eq!(before.len(), after.len());
    assert_eq!(before[0].score, after[0].score);
}

#[tokio::test]
async fn test_concurrent_processing_leaves_one_row_per_pair() {
    let t = Utc::now() - Duration::hours(5);
    let memories: Vec<MemoryRecord> = (0..6)
        .map(|i| {
            with_topics(&format!("m{i}"), &["rust", "async", "tokio"])
                .with_created_at(t + Duration::minutes(i * 10))
        })
        .collect();
    let store = Arc::new(InMemoryRelationStore::new());
    let engine = engine(memories, Arc::new(InMemorySimilarityIndex::new()), store.clone());

    let runs = (0..8).map(|_| engine.process_memory("m0", "u1"));
    let reports: Vec<_> = join_all(runs).await.into_iter().map(Result::unwrap).collect();

    let rows = store.all();
    let inserted: usize = reports.iter().map(|r| r.inserted).sum();
    assert_eq!(inserted, rows.len());
    assert!(reports.iter().all(|r| r.inserted + r.updated + r.unchanged + r.conflicted == r.accepted));

    // Both directions at once: each ordered pair still has exactly one row.
    let both = ["m1", "m2"].map(|id| engine.process_memory(id, "u1"));
    for r in join_all(both).await {
        r.unwrap();
    }
    let mut keys: Vec<_> = store.all().iter().map(|r| r.key()).collect();
    let total = keys.len();
    keys.dedup();
    assert_eq!(keys.len(), total);
    assert!(store.all().iter().all(|r| (0.0..=1.0).contains(&r.score)));
}

#[tokio::test]
async fn test_unavailable_arbiter_defers_to_heuristic() {
    let filter = TieredFilter::new(
        FilterConfig::default(),
        Arc::new(UnavailableArbiter),
        Arc::new(InMemoryArbitrationCache::default()),
    );
    let t = Utc::now() - Duration::days(3);
    let source = with_topics("S", &["a", "b", "c"]).with_created_at(t);
    let close = with_topics("close", &["a", "b", "c", "d"]).with_created_at(t + Duration::days(2));
    let far = with_topics("far", &["a", "e", "f"]).with_created_at(t + Duration::days(2));
    let memories: HashMap<String, MemoryRecord> = [close.clone(), far.clone()]
        .into_iter()
        .map(|m| (m.id.clone(), m))
        .collect();

    assert!(filter.arbitration_eligible(&source, &close));
    assert!(filter.heuristic_score(&source, &close) >= 0.3);
    assert!(filter.heuristic_score(&source, &far) < 0.3);

    let out = filter
        .filter(
            &source,
            vec![Candidate::new("close", RelationType::Topical, 0.45)],
            &memories,
        )
        .await;
    assert_eq!(out.accepted.len(), 1);
    assert_eq!(out.accepted[0].relation_type, RelationType::Topical);
    assert!(!out.used_fallback);

    let out = filter
        .filter(
            &source,
            vec![Candidate::new("far", RelationType::Topical, 0.45)],
            &memories,
        )
        .await;
    assert!(out.accepted.is_empty());
    assert!(!out.used_fallback);
}

#[tokio::test]
async fn test_maintenance_keeps_top_ten_above_floor() {
    let store = InMemoryRelationStore::new();
    for i in 0..15 {
        let score = 0.2 + i as f64 * 0.05;
        store
            .insert(RelationRecord::new("u1", "hub", &format!("t{i:02}"), RelationType::Topical, score))
            .await
            .unwrap();
    }

    let report = run_maintenance(&store, &MaintenancePolicy::default()).await;
    assert_eq!(report.removed_low_score, 2);
    assert_eq!(report.removed_excess, 3);
    assert!(report.failures.is_empty());

    let left = store.list_from_source("hub").await.unwrap();
    assert_eq!(left.len(), 10);
    let targets: Vec<&str> = left.iter().map(|r| r.target_id.as_str()).collect();
    assert_eq!(targets[0], "t14");
    assert_eq!(targets[9], "t05");
    assert!(left.iter().all(|r| r.score >= 0.3));
}

#[tokio::test]
async fn test_owner_run_scores_stay_in_unit_range() {
    let t = Utc::now() - Duration::days(2);
    let index = Arc::new(InMemorySimilarityIndex::new());
    let memories: Vec<MemoryRecord> = (0..10)
        .map(|i| {
            let id = format!("m{i}");
            index.insert(
                &id,
                "u1",
                EmbeddingFacet::Content,
                vec![1.0, i as f32 * 0.1, (i % 3) as f32],
            );
            with_topics(&id, &["rust", if i % 2 == 0 { "wasm" } else { "cli" }])
                .with_url(&format!("https://docs.rs/crate{i}"))
                .with_created_at(t + Duration::hours(i))
        })
        .collect();
    let store = Arc::new(InMemoryRelationStore::new());
    let engine = engine(memories, index, store.clone());

    let report = engine.process_owner("u1").await.unwrap();
    assert_eq!(report.processed.len(), 10);
    assert!(report.failed.is_empty());
    assert!(!store.is_empty());
    assert!(store.all().iter().all(|r| (0.0..=1.0).contains(&r.score)));
    assert!(report.processed.iter().all(|r| r.accepted <= 8));
}
