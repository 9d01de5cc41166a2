//! Deterministic grid placement with hash-derived jitter.

use sha2::{Digest, Sha256};

use super::Position;

/// Two or three values in [-1, 1] derived from `id`.
pub(crate) fn hash_unit(id: &str) -> [f64; 3] {
    let digest = Sha256::digest(id.as_bytes());
    let mut out = [0.0; 3];
    for (i, chunk) in digest.chunks_exact(4).take(3).enumerate() {
        let v = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        out[i] = (v as f64 / u32::MAX as f64) * 2.0 - 1.0;
    }
    out
}

/// Place `ids` row-major on a `ceil(sqrt(n))` grid spanning `[-bound, bound]`.
///
/// Each node is nudged by up to `jitter_fraction` of a cell, derived from
/// its id, so placement is stable across calls.
pub fn grid_positions(ids: &[&str], bound: f64, jitter_fraction: f64, dimensions: usize) -> Vec<Position> {
    let n = ids.len();
    if n == 0 {
        return Vec::new();
    }
    let grid = (n as f64).sqrt().ceil() as usize;
    let spacing = 2.0 * bound / grid as f64;
    let jitter = spacing * jitter_fraction;

    ids.iter()
        .enumerate()
        .map(|(i, id)| {
            let (row, col) = (i / grid, i % grid);
            let [jx, jy, jz] = hash_unit(id);
            Position {
                x: (-bound + spacing * (col as f64 + 0.5) + jx * jitter).clamp(-bound, bound),
                y: (-bound + spacing * (row as f64 + 0.5) + jy * jitter).clamp(-bound, bound),
                z: if dimensions == 3 { jz * jitter } else { 0.0 },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_and_in_bounds() {
        let ids = ["a", "b", "c", "d", "e"];
        let first = grid_positions(&ids, 100.0, 0.2, 2);
        let second = grid_positions(&ids, 100.0, 0.2, 2);
        assert_eq!(first, second);
        assert!(first.iter().all(|p| p.x.abs() <= 100.0 && p.y.abs() <= 100.0 && p.z == 0.0));
    }

    #[test]
    fn grid_is_ceil_sqrt_wide() {
        let ids = ["a", "b", "c", "d", "e"];
        let pos = grid_positions(&ids, 100.0, 0.0, 2);
        // 3 columns: a, b, c on row 0; d, e on row 1
        assert_eq!(pos[0].y, pos[2].y);
        assert!(pos[3].y > pos[0].y);
        assert_eq!(pos[0].x, pos[3].x);
    }

    #[test]
    fn hash_unit_range() {
        for id in ["", "x", "a-much-longer-identifier"] {
            assert!(hash_unit(id).iter().all(|v| (-1.0..=1.0).contains(v)));
        }
    }
}
