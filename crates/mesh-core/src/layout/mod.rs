//! Node placement for assembled meshes.
//!
//! Three methods, picked by how many nodes carry an embedding:
//!
//! | embedded nodes | method |
//! |---|---|
//! | 3 or more | [`LayoutMethod::Projection`]; the rest go on the grid |
//! | 1 or 2 | [`LayoutMethod::Grid`] for every node |
//! | none | [`LayoutMethod::ForceDirected`] over the mesh edges |
//!
//! Every method is a pure function of node ids, vectors and edges.

mod force;
mod grid;
mod projection;

use serde::{Deserialize, Serialize};

use crate::config::LayoutConfig;
use crate::prune::ScoredEdge;

pub use force::force_positions;
pub use grid::grid_positions;
pub use projection::{project, seed_for};

/// Minimum embedded nodes for a projection layout.
pub const MIN_PROJECTED_NODES: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    /// Always 0 for two-dimensional layouts.
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutMethod {
    Projection,
    Grid,
    ForceDirected,
}

impl LayoutMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutMethod::Projection => "projection",
            LayoutMethod::Grid => "grid",
            LayoutMethod::ForceDirected => "force_directed",
        }
    }
}

impl std::fmt::Display for LayoutMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutResult {
    /// One per input id, same order.
    pub positions: Vec<Position>,
    /// Whether each position came from the node's own embedding.
    pub embedding_based: Vec<bool>,
    pub method: LayoutMethod,
}

/// Place `ids`. `vectors[i]` is the embedding for `ids[i]`, if any.
pub fn compute_layout(
    ids: &[&str],
    vectors: &[Option<Vec<f32>>],
    edges: &[ScoredEdge],
    config: &LayoutConfig,
) -> LayoutResult {
    let n = ids.len();
    let embedded: Vec<usize> = (0..n)
        .filter(|i| vectors.get(*i).is_some_and(|v| v.as_ref().is_some_and(|v| !v.is_empty())))
        .collect();

    if embedded.len() >= MIN_PROJECTED_NODES {
        let dim = embedded
            .iter()
            .filter_map(|i| vectors[*i].as_ref().map(Vec::len))
            .max()
            .unwrap_or(0);
        let proj_ids: Vec<&str> = embedded.iter().map(|i| ids[*i]).collect();
        let padded: Vec<Vec<f32>> = embedded
            .iter()
            .map(|i| {
                let mut v = vectors[*i].clone().unwrap_or_default();
                v.resize(dim, 0.0);
                v
            })
            .collect();
        let refs: Vec<&[f32]> = padded.iter().map(Vec::as_slice).collect();
        let projected = project(&proj_ids, &refs, config.dimensions, config.bound);

        let mut positions = vec![Position::default(); n];
        let mut embedding_based = vec![false; n];
        for (slot, pos) in embedded.iter().zip(projected) {
            positions[*slot] = pos;
            embedding_based[*slot] = true;
        }

        let rest: Vec<usize> = (0..n).filter(|i| !embedding_based[*i]).collect();
        if !rest.is_empty() {
            let rest_ids: Vec<&str> = rest.iter().map(|i| ids[*i]).collect();
            let placed = grid_positions(&rest_ids, config.bound, config.jitter_fraction, config.dimensions);
            for (slot, pos) in rest.iter().zip(placed) {
                positions[*slot] = pos;
            }
        }
        return LayoutResult {
            positions,
            embedding_based,
            method: LayoutMethod::Projection,
        };
    }

    if !embedded.is_empty() {
        return LayoutResult {
            positions: grid_positions(ids, config.bound, config.jitter_fraction, config.dimensions),
            embedding_based: vec![false; n],
            method: LayoutMethod::Grid,
        };
    }

    LayoutResult {
        positions: force_positions(ids, edges, config),
        embedding_based: vec![false; n],
        method: LayoutMethod::ForceDirected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vecs(n: usize, embedded: usize) -> Vec<Option<Vec<f32>>> {
        (0..n)
            .map(|i| (i < embedded).then(|| vec![i as f32, 1.0 - i as f32 * 0.1, (i * i) as f32]))
            .collect()
    }

    #[test]
    fn method_follows_embedding_count() {
        let config = LayoutConfig::default();
        let ids = ["a", "b", "c", "d"];
        assert_eq!(compute_layout(&ids, &vecs(4, 4), &[], &config).method, LayoutMethod::Projection);
        assert_eq!(compute_layout(&ids, &vecs(4, 3), &[], &config).method, LayoutMethod::Projection);
        assert_eq!(compute_layout(&ids, &vecs(4, 2), &[], &config).method, LayoutMethod::Grid);
        assert_eq!(compute_layout(&ids, &vecs(4, 0), &[], &config).method, LayoutMethod::ForceDirected);
    }

    #[test]
    fn mixed_projection_flags_only_embedded_nodes() {
        let config = LayoutConfig::default();
        let ids = ["a", "b", "c", "d"];
        let out = compute_layout(&ids, &vecs(4, 3), &[], &config);
        assert_eq!(out.embedding_based, vec![true, true, true, false]);
        assert_eq!(out.positions.len(), 4);
        assert!(out
            .positions
            .iter()
            .all(|p| p.x.abs() <= config.bound && p.y.abs() <= config.bound));
    }

    #[test]
    fn three_dimensions_fill_z() {
        let config = LayoutConfig {
            dimensions: 3,
            ..LayoutConfig::default()
        };
        let ids = ["a", "b", "c", "d"];
        let corners = vec![
            Some(vec![1.0, 0.0, 0.0]),
            Some(vec![0.0, 1.0, 0.0]),
            Some(vec![0.0, 0.0, 1.0]),
            Some(vec![0.0, 0.0, 0.0]),
        ];
        let out = compute_layout(&ids, &corners, &[], &config);
        assert!(out.positions.iter().any(|p| p.z != 0.0));
    }

    #[test]
    fn empty_input() {
        let out = compute_layout(&[], &[], &[], &LayoutConfig::default());
        assert!(out.positions.is_empty());
        assert_eq!(out.method, LayoutMethod::ForceDirected);
    }
}
