//! Trait contract tests for RelationStore and MemoryCatalog.
//!
//! Every contract is written once against `&dyn RelationStore` and run against
//! both the in-memory fake and SurrealDB (`mem://`). Any conforming
//! implementation must pass these.

use std::sync::Arc;

use chrono::{Duration, Utc};
use mesh_state::{
    InMemoryCatalog, InMemoryRelationStore, MemoryCatalog, MemoryMetadata, MemoryRecord,
    RelationFilter, RelationKey, RelationRecord, RelationStore, RelationType, StorageError,
    SurrealHandle, SurrealMemoryCatalog, SurrealRelationStore,
};

fn rel(source: &str, target: &str, kind: RelationType, score: f64) -> RelationRecord {
    RelationRecord::new("owner-1", source, target, kind, score)
}

async fn surreal_store() -> SurrealRelationStore {
    let handle = Arc::new(SurrealHandle::setup_db().await.unwrap());
    SurrealRelationStore::new(handle)
}

// ===========================================================================
// Contracts
// ===========================================================================

async fn contract_insert_then_find(store: &dyn RelationStore) {
    store
        .insert(rel("a", "b", RelationType::Semantic, 0.8))
        .await
        .unwrap();

    let found = store
        .find_by_key(&RelationKey::new("a", "b"))
        .await
        .unwrap()
        .expect("row should exist");
    assert_eq!(found.relation_type, RelationType::Semantic);
    assert!((found.score - 0.8).abs() < 1e-9);

    // Direction matters: b -> a is a different row.
    assert!(store
        .find_by_key(&RelationKey::new("b", "a"))
        .await
        .unwrap()
        .is_none());
}

async fn contract_duplicate_insert_conflicts(store: &dyn RelationStore) {
    store
        .insert(rel("a", "b", RelationType::Topical, 0.5))
        .await
        .unwrap();
    let err = store
        .insert(rel("a", "b", RelationType::Semantic, 0.9))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict { .. }), "got {err:?}");

    // The original row is untouched.
    let row = store
        .find_by_key(&RelationKey::new("a", "b"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.relation_type, RelationType::Topical);
    assert_eq!(store.list_from_source("a").await.unwrap().len(), 1);
}

async fn contract_update_existing_only(store: &dyn RelationStore) {
    let key = RelationKey::new("a", "b");
    let err = store
        .update(&key, RelationType::Semantic, 0.9)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::RelationNotFound { .. }));

    store
        .insert(rel("a", "b", RelationType::Temporal, 0.4))
        .await
        .unwrap();
    store
        .update(&key, RelationType::Semantic, 0.9)
        .await
        .unwrap();
    let row = store.find_by_key(&key).await.unwrap().unwrap();
    assert_eq!(row.relation_type, RelationType::Semantic);
    assert!((row.score - 0.9).abs() < 1e-9);
}

async fn contract_list_from_source_sorted(store: &dyn RelationStore) {
    store
        .insert(rel("a", "b", RelationType::Topical, 0.4))
        .await
        .unwrap();
    store
        .insert(rel("a", "c", RelationType::Topical, 0.9))
        .await
        .unwrap();
    store
        .insert(rel("x", "a", RelationType::Topical, 0.7))
        .await
        .unwrap();

    let rows = store.list_from_source("a").await.unwrap();
    let targets: Vec<&str> = rows.iter().map(|r| r.target_id.as_str()).collect();
    assert_eq!(targets, vec!["c", "b"]);

    assert_eq!(store.list_for_owner("owner-1").await.unwrap().len(), 3);
    assert!(store.list_for_owner("someone-else").await.unwrap().is_empty());
}

async fn contract_delete_where(store: &dyn RelationStore) {
    let old = Utc::now() - Duration::days(45);
    store
        .insert(rel("a", "b", RelationType::Topical, 0.2))
        .await
        .unwrap();
    store
        .insert(rel("a", "c", RelationType::Topical, 0.35).with_created_at(old))
        .await
        .unwrap();
    store
        .insert(rel("a", "d", RelationType::Topical, 0.35))
        .await
        .unwrap();
    store
        .insert(rel("a", "e", RelationType::Semantic, 0.9).with_created_at(old))
        .await
        .unwrap();

    // An unconstrained filter never deletes anything.
    assert_eq!(store.delete_where(&RelationFilter::default()).await.unwrap(), 0);

    let removed = store
        .delete_where(&RelationFilter::score_below(0.3))
        .await
        .unwrap();
    assert_eq!(removed, 1);

    let cutoff = Utc::now() - Duration::days(30);
    let removed = store
        .delete_where(&RelationFilter::score_below(0.4).created_before(cutoff))
        .await
        .unwrap();
    assert_eq!(removed, 1);

    let remaining: Vec<String> = store
        .list_from_source("a")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.target_id)
        .collect();
    assert_eq!(remaining, vec!["e".to_string(), "d".to_string()]);
}

async fn contract_delete_keys_and_counts(store: &dyn RelationStore) {
    for t in ["b", "c", "d"] {
        store
            .insert(rel("a", t, RelationType::Topical, 0.5))
            .await
            .unwrap();
    }
    store
        .insert(rel("z", "a", RelationType::Topical, 0.5))
        .await
        .unwrap();

    let counts = store.count_by_source().await.unwrap();
    assert_eq!(counts, vec![("a".to_string(), 3), ("z".to_string(), 1)]);

    let removed = store
        .delete_keys(&[RelationKey::new("a", "b"), RelationKey::new("a", "missing")])
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(store.list_from_source("a").await.unwrap().len(), 2);
}

// ===========================================================================
// In-memory fake
// ===========================================================================

#[tokio::test]
async fn fake_insert_then_find() {
    contract_insert_then_find(&InMemoryRelationStore::new()).await;
}

#[tokio::test]
async fn fake_duplicate_insert_conflicts() {
    contract_duplicate_insert_conflicts(&InMemoryRelationStore::new()).await;
}

#[tokio::test]
async fn fake_update_existing_only() {
    contract_update_existing_only(&InMemoryRelationStore::new()).await;
}

#[tokio::test]
async fn fake_list_from_source_sorted() {
    contract_list_from_source_sorted(&InMemoryRelationStore::new()).await;
}

#[tokio::test]
async fn fake_delete_where() {
    contract_delete_where(&InMemoryRelationStore::new()).await;
}

#[tokio::test]
async fn fake_delete_keys_and_counts() {
    contract_delete_keys_and_counts(&InMemoryRelationStore::new()).await;
}

// ===========================================================================
// SurrealDB (mem://)
// ===========================================================================

#[tokio::test]
async fn surreal_insert_then_find() {
    contract_insert_then_find(&surreal_store().await).await;
}

#[tokio::test]
async fn surreal_duplicate_insert_conflicts() {
    contract_duplicate_insert_conflicts(&surreal_store().await).await;
}

#[tokio::test]
async fn surreal_update_existing_only() {
    contract_update_existing_only(&surreal_store().await).await;
}

#[tokio::test]
async fn surreal_list_from_source_sorted() {
    contract_list_from_source_sorted(&surreal_store().await).await;
}

#[tokio::test]
async fn surreal_delete_where() {
    contract_delete_where(&surreal_store().await).await;
}

#[tokio::test]
async fn surreal_delete_keys_and_counts() {
    contract_delete_keys_and_counts(&surreal_store().await).await;
}

#[tokio::test]
async fn surreal_schema_init_is_idempotent() {
    let handle = SurrealHandle::setup_db().await.unwrap();
    // Re-running against the same connection URL scheme must not fail.
    let again = SurrealHandle::connect_url("mem://").await;
    assert!(again.is_ok());
    drop(handle);
}

// ===========================================================================
// MemoryCatalog
// ===========================================================================

fn memory(id: &str, owner: &str, age_h: i64) -> MemoryRecord {
    MemoryRecord::new(id, owner, &format!("title {id}"))
        .with_created_at(Utc::now() - Duration::hours(age_h))
        .with_metadata(MemoryMetadata::with_topics(["rust", "graphs"]))
}

async fn contract_catalog(catalog: &dyn MemoryCatalog) {
    let listed = catalog.list_for_owner("u1", None).await.unwrap();
    let ids: Vec<&str> = listed.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2", "m3"]);

    let limited = catalog.list_for_owner("u1", Some(2)).await.unwrap();
    assert_eq!(limited.len(), 2);

    let m = catalog.get("m2").await.unwrap().unwrap();
    assert_eq!(m.metadata.topics.len(), 2);
    assert!(catalog.get("nope").await.unwrap().is_none());

    let now = Utc::now();
    let window = catalog
        .list_created_between("u1", now - Duration::minutes(150), now - Duration::minutes(30))
        .await
        .unwrap();
    let ids: Vec<&str> = window.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2"]);
    assert!(catalog
        .list_created_between("u2", now - Duration::hours(5), now - Duration::hours(4))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn fake_catalog_contract() {
    let catalog = InMemoryCatalog::from_records([
        memory("m1", "u1", 1),
        memory("m2", "u1", 2),
        memory("m3", "u1", 3),
        memory("other", "u2", 0),
    ]);
    contract_catalog(&catalog).await;
}

#[tokio::test]
async fn surreal_catalog_contract() {
    let handle = Arc::new(SurrealHandle::setup_db().await.unwrap());
    let catalog = SurrealMemoryCatalog::new(handle);
    for m in [
        memory("m1", "u1", 1),
        memory("m2", "u1", 2),
        memory("m3", "u1", 3),
        memory("other", "u2", 0),
    ] {
        catalog.save(&m).await.unwrap();
    }
    // Saving twice replaces rather than duplicates.
    catalog.save(&memory("m2", "u1", 2)).await.unwrap();
    contract_catalog(&catalog).await;
}
