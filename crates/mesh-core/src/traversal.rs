//! Breadth-first expansion around one memory.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use mesh_state::{MemoryCatalog, MemoryRecord, RelationRecord, RelationStore};

use crate::error::{MeshError, MeshResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMember {
    pub memory: MemoryRecord,
    /// Hops from the centre; the centre itself is 0.
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryCluster {
    pub center_memory_id: String,
    pub cluster_size: usize,
    /// The requested depth bound.
    pub max_depth: usize,
    /// In visit order, centre first.
    pub memories: Vec<ClusterMember>,
}

/// Undirected adjacency over relations scoring above `min_score`.
fn adjacency(rows: &[RelationRecord], min_score: f64) -> BTreeMap<&str, BTreeSet<&str>> {
    let mut adj: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for r in rows.iter().filter(|r| r.score > min_score) {
        adj.entry(&r.source_id).or_default().insert(&r.target_id);
        adj.entry(&r.target_id).or_default().insert(&r.source_id);
    }
    adj
}

/// Ids reachable from `center` within `depth` hops, with their depth.
///
/// Each id is visited once, so cycles terminate.
pub fn bfs_levels<'a>(
    adj: &BTreeMap<&'a str, BTreeSet<&'a str>>,
    center: &'a str,
    depth: usize,
) -> Vec<(&'a str, usize)> {
    let mut visited: HashSet<&str> = HashSet::from([center]);
    let mut order = vec![(center, 0)];
    let mut queue = VecDeque::from([(center, 0)]);
    while let Some((node, d)) = queue.pop_front() {
        if d >= depth {
            continue;
        }
        for &next in adj.get(node).into_iter().flatten() {
            if visited.insert(next) {
                order.push((next, d + 1));
                queue.push_back((next, d + 1));
            }
        }
    }
    order
}

/// Expand from `center_id` over the owner's relations in both directions.
#[instrument(skip(catalog, relations))]
pub async fn get_cluster(
    catalog: &dyn MemoryCatalog,
    relations: &dyn RelationStore,
    owner_id: &str,
    center_id: &str,
    depth: usize,
    min_score: f64,
) -> MeshResult<MemoryCluster> {
    let center = catalog
        .get(center_id)
        .await?
        .ok_or_else(|| MeshError::MemoryNotFound {
            memory_id: center_id.to_string(),
        })?;
    if center.owner_id != owner_id {
        return Err(MeshError::OwnerMismatch {
            memory_id: center_id.to_string(),
            owner_id: owner_id.to_string(),
        });
    }

    let rows = relations.list_for_owner(owner_id).await?;
    let adj = adjacency(&rows, min_score);
    let levels = bfs_levels(&adj, center_id, depth);

    let mut memories = vec![ClusterMember {
        memory: center,
        depth: 0,
    }];
    for (id, d) in levels.into_iter().skip(1) {
        match catalog.get(id).await? {
            Some(m) if m.owner_id == owner_id => memories.push(ClusterMember { memory: m, depth: d }),
            _ => debug!(memory_id = id, "Skipping unresolvable cluster member"),
        }
    }

    Ok(MemoryCluster {
        center_memory_id: center_id.to_string(),
        cluster_size: memories.len(),
        max_depth: depth,
        memories,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_state::{InMemoryCatalog, InMemoryRelationStore, RelationType};

    fn rel(a: &str, b: &str, score: f64) -> RelationRecord {
        RelationRecord::new("u1", a, b, RelationType::Topical, score)
    }

    #[test]
    fn levels_respect_depth_and_threshold() {
        let rows = vec![rel("a", "b", 0.9), rel("b", "c", 0.9), rel("c", "d", 0.9), rel("a", "x", 0.3)];
        let adj = adjacency(&rows, 0.3);
        assert_eq!(bfs_levels(&adj, "a", 0), vec![("a", 0)]);
        assert_eq!(bfs_levels(&adj, "a", 2), vec![("a", 0), ("b", 1), ("c", 2)]);
    }

    #[test]
    fn reverse_edges_are_followed() {
        let rows = vec![rel("b", "a", 0.9)];
        let adj = adjacency(&rows, 0.3);
        assert_eq!(bfs_levels(&adj, "a", 1), vec![("a", 0), ("b", 1)]);
    }

    #[tokio::test]
    async fn cycle_terminates_with_each_memory_once() {
        let catalog = InMemoryCatalog::from_records(
            ["a", "b", "c"].map(|id| MemoryRecord::new(id, "u1", id)),
        );
        let store = InMemoryRelationStore::new();
        for (s, t) in [("a", "b"), ("b", "c"), ("c", "a")] {
            store.insert(rel(s, t, 0.8)).await.unwrap();
        }
        let cluster = get_cluster(&catalog, &store, "u1", "a", 10, 0.3).await.unwrap();
        assert_eq!(cluster.cluster_size, 3);
        let ids: Vec<&str> = cluster.memories.iter().map(|m| m.memory.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn unknown_and_foreign_centres_error() {
        let catalog = InMemoryCatalog::from_records([MemoryRecord::new("a", "u2", "a")]);
        let store = InMemoryRelationStore::new();
        assert!(matches!(
            get_cluster(&catalog, &store, "u1", "missing", 1, 0.3).await,
            Err(MeshError::MemoryNotFound { .. })
        ));
        assert!(matches!(
            get_cluster(&catalog, &store, "u1", "a", 1, 0.3).await,
            Err(MeshError::OwnerMismatch { .. })
        ));
    }
}
