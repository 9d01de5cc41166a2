//! Density clustering of laid-out mesh nodes.
//!
//! DBSCAN over (x, y): a node with at least `min_points` neighbours within
//! `epsilon` is a core point; clusters grow from core points through their
//! neighbours, and only core points extend a cluster further. Nodes reached
//! by no core point stay unclustered.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::ClusterConfig;
use crate::layout::Position;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: usize,
    pub members: Vec<String>,
    pub centroid: Position,
    /// Most frequent member topic; `None` when no member has topics.
    pub label: Option<String>,
}

fn neighbours(positions: &[Position], i: usize, epsilon: f64) -> Vec<usize> {
    let p = positions[i];
    positions
        .iter()
        .enumerate()
        .filter(|(j, q)| *j != i && ((p.x - q.x).powi(2) + (p.y - q.y).powi(2)).sqrt() <= epsilon)
        .map(|(j, _)| j)
        .collect()
}

/// Cluster assignment per node (`None` = noise) in input order.
pub fn dbscan(positions: &[Position], config: &ClusterConfig) -> Vec<Option<usize>> {
    let n = positions.len();
    let mut assignment: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut next_id = 0;

    for start in 0..n {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        let seeds = neighbours(positions, start, config.epsilon);
        if seeds.len() < config.min_points {
            continue;
        }

        let id = next_id;
        next_id += 1;
        assignment[start] = Some(id);
        let mut queue: VecDeque<usize> = seeds.into();
        while let Some(j) = queue.pop_front() {
            if assignment[j].is_none() {
                assignment[j] = Some(id);
            }
            if visited[j] {
                continue;
            }
            visited[j] = true;
            let more = neighbours(positions, j, config.epsilon);
            if more.len() >= config.min_points {
                queue.extend(more.into_iter().filter(|k| !visited[*k] || assignment[*k].is_none()));
            }
        }
    }
    assignment
}

/// Build labelled clusters from a [`dbscan`] assignment.
///
/// `topics[i]` are the topics of node `i`.
pub fn build_clusters(
    ids: &[&str],
    positions: &[Position],
    assignment: &[Option<usize>],
    topics: &[Vec<String>],
) -> Vec<Cluster> {
    let mut grouped: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, a) in assignment.iter().enumerate() {
        if let Some(id) = a {
            grouped.entry(*id).or_default().push(i);
        }
    }

    grouped
        .into_iter()
        .map(|(id, members)| {
            let count = members.len() as f64;
            let mut centroid = Position::default();
            let mut freq: BTreeMap<&str, usize> = BTreeMap::new();
            for &m in &members {
                centroid.x += positions[m].x / count;
                centroid.y += positions[m].y / count;
                centroid.z += positions[m].z / count;
                for t in topics.get(m).into_iter().flatten() {
                    *freq.entry(t.as_str()).or_default() += 1;
                }
            }
            // BTreeMap iterates in key order, so the first max wins ties.
            let label = freq
                .iter()
                .fold(None::<(&str, usize)>, |best, (t, c)| match best {
                    Some((_, bc)) if bc >= *c => best,
                    _ => Some((*t, *c)),
                })
                .map(|(t, _)| t.to_string());
            Cluster {
                id,
                members: members.iter().map(|m| ids[*m].to_string()).collect(),
                centroid,
                label,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: f64, y: f64) -> Position {
        Position { x, y, z: 0.0 }
    }

    #[test]
    fn two_dense_groups_and_noise() {
        let config = ClusterConfig::default();
        let positions = vec![
            at(0.0, 0.0),
            at(10.0, 0.0),
            at(0.0, 10.0),
            at(400.0, 400.0),
            at(410.0, 400.0),
            at(400.0, 410.0),
            at(-450.0, 300.0),
        ];
        let a = dbscan(&positions, &config);
        assert!(a[0].is_some() && a[0] == a[1] && a[1] == a[2]);
        assert!(a[3].is_some() && a[3] == a[4] && a[4] == a[5]);
        assert_ne!(a[0], a[3]);
        assert_eq!(a[6], None);
    }

    #[test]
    fn border_points_join_but_do_not_extend() {
        let config = ClusterConfig {
            epsilon: 10.0,
            min_points: 2,
        };
        // Only b is core; a and c join through it, d is out of reach.
        let positions = vec![at(0.0, 0.0), at(10.0, 0.0), at(20.0, 0.0), at(35.0, 0.0)];
        let a = dbscan(&positions, &config);
        assert_eq!(a[0], a[1]);
        assert_eq!(a[1], a[2]);
        assert_eq!(a[3], None);
    }

    #[test]
    fn sparse_points_are_noise() {
        let config = ClusterConfig::default();
        let positions = vec![at(-400.0, 0.0), at(0.0, 0.0), at(400.0, 0.0)];
        assert!(dbscan(&positions, &config).iter().all(Option::is_none));
    }

    #[test]
    fn labels_use_most_frequent_topic_then_name() {
        let positions = vec![at(0.0, 0.0), at(2.0, 0.0), at(4.0, 0.0)];
        let assignment = vec![Some(0), Some(0), Some(0)];
        let topics = vec![
            vec!["rust".to_string(), "async".to_string()],
            vec!["async".to_string(), "rust".to_string()],
            vec!["tokio".to_string()],
        ];
        let clusters = build_clusters(&["a", "b", "c"], &positions, &assignment, &topics);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].label.as_deref(), Some("async"));
        assert!((clusters[0].centroid.x - 2.0).abs() < 1e-9);
        assert_eq!(clusters[0].members, vec!["a", "b", "c"]);
    }
}
