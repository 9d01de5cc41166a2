//! Deterministic linear projection of embeddings.
//!
//! Principal axes are found by power iteration on the centred data, started
//! from vectors drawn from a PRNG seeded with a hash of the sorted id set.
//! The same ids and vectors always give the same coordinates.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use super::Position;

const POWER_ITERATIONS: usize = 100;
const CONVERGED: f64 = 1e-10;

/// PRNG seed for an id set; independent of input order.
pub fn seed_for(ids: &[&str]) -> u64 {
    let mut sorted: Vec<&str> = ids.to_vec();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    for id in sorted {
        hasher.update(id.as_bytes());
        hasher.update([b'\n']);
    }
    let digest = hasher.finalize();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(seed)
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn normalise(v: &mut [f64]) -> f64 {
    let norm = dot(v, v).sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    norm
}

/// Project `vectors` (one per id, equal length) to `dimensions` axes,
/// scaled uniformly so the largest coordinate magnitude is `bound`.
pub fn project(ids: &[&str], vectors: &[&[f32]], dimensions: usize, bound: f64) -> Vec<Position> {
    let n = ids.len().min(vectors.len());
    if n == 0 {
        return Vec::new();
    }
    let d = vectors[0].len();

    // Work in sorted-id order so the result does not depend on input order.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|a, b| ids[*a].cmp(ids[*b]));

    let mut data: Vec<Vec<f64>> = order
        .iter()
        .map(|i| {
            let mut row: Vec<f64> = vectors[*i].iter().map(|x| f64::from(*x)).collect();
            row.resize(d, 0.0);
            row
        })
        .collect();
    let mut mean = vec![0.0; d];
    for row in &data {
        for (m, x) in mean.iter_mut().zip(row) {
            *m += x;
        }
    }
    mean.iter_mut().for_each(|m| *m /= n as f64);
    for row in &mut data {
        for (x, m) in row.iter_mut().zip(&mean) {
            *x -= m;
        }
    }

    let mut rng = StdRng::seed_from_u64(seed_for(&ids[..n]));
    let mut axes: Vec<Vec<f64>> = Vec::with_capacity(dimensions);
    for _ in 0..dimensions {
        let mut v: Vec<f64> = (0..d).map(|_| rng.random_range(-1.0..1.0)).collect();
        let mut found = normalise(&mut v) > 0.0;
        for _ in 0..POWER_ITERATIONS {
            if !found {
                break;
            }
            // w = Xᵀ (X v)
            let scores: Vec<f64> = data.iter().map(|row| dot(row, &v)).collect();
            let mut w = vec![0.0; d];
            for (row, s) in data.iter().zip(&scores) {
                for (wi, xi) in w.iter_mut().zip(row) {
                    *wi += s * xi;
                }
            }
            for axis in &axes {
                let p = dot(&w, axis);
                for (wi, ai) in w.iter_mut().zip(axis) {
                    *wi -= p * ai;
                }
            }
            if normalise(&mut w) <= CONVERGED {
                found = false;
                break;
            }
            let delta: f64 = w.iter().zip(&v).map(|(a, b)| (a - b).abs()).sum();
            v = w;
            if delta < CONVERGED {
                break;
            }
        }
        if !found {
            v = vec![0.0; d];
        }
        axes.push(v);
    }

    let coords: Vec<[f64; 3]> = data
        .iter()
        .map(|row| {
            let mut c = [0.0; 3];
            for (slot, axis) in c.iter_mut().zip(&axes) {
                *slot = dot(row, axis);
            }
            c
        })
        .collect();

    let max = coords
        .iter()
        .flat_map(|c| c.iter().map(|v| v.abs()))
        .fold(0.0, f64::max);
    let scale = if max > 1e-12 { bound / max } else { 0.0 };

    let mut out = vec![Position::default(); n];
    for (sorted_idx, original) in order.iter().enumerate() {
        let c = coords[sorted_idx];
        out[*original] = Position {
            x: c[0] * scale,
            y: c[1] * scale,
            z: if dimensions == 3 { c[2] * scale } else { 0.0 },
        };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Vec<&'static str>, Vec<Vec<f32>>) {
        (
            vec!["m1", "m2", "m3", "m4"],
            vec![
                vec![1.0, 0.0, 0.0, 0.2],
                vec![0.9, 0.1, 0.0, 0.1],
                vec![0.0, 1.0, 0.3, 0.0],
                vec![0.0, 0.2, 1.0, 0.0],
            ],
        )
    }

    #[test]
    fn seed_ignores_order() {
        assert_eq!(seed_for(&["a", "b", "c"]), seed_for(&["c", "a", "b"]));
        assert_ne!(seed_for(&["a", "b"]), seed_for(&["a", "b", "c"]));
    }

    #[test]
    fn deterministic_and_bounded() {
        let (ids, vecs) = sample();
        let refs: Vec<&[f32]> = vecs.iter().map(Vec::as_slice).collect();
        let a = project(&ids, &refs, 2, 500.0);
        let b = project(&ids, &refs, 2, 500.0);
        assert_eq!(a, b);
        let max = a.iter().map(|p| p.x.abs().max(p.y.abs())).fold(0.0, f64::max);
        assert!((max - 500.0).abs() < 1e-6);
        assert!(a.iter().all(|p| p.z == 0.0));
    }

    #[test]
    fn input_order_does_not_matter() {
        let (ids, vecs) = sample();
        let refs: Vec<&[f32]> = vecs.iter().map(Vec::as_slice).collect();
        let forward = project(&ids, &refs, 3, 100.0);

        let rev_ids: Vec<&str> = ids.iter().rev().copied().collect();
        let rev_refs: Vec<&[f32]> = refs.iter().rev().copied().collect();
        let backward = project(&rev_ids, &rev_refs, 3, 100.0);
        for (i, p) in forward.iter().enumerate() {
            assert_eq!(*p, backward[ids.len() - 1 - i]);
        }
    }

    #[test]
    fn similar_vectors_land_close() {
        let (ids, vecs) = sample();
        let refs: Vec<&[f32]> = vecs.iter().map(Vec::as_slice).collect();
        let p = project(&ids, &refs, 2, 100.0);
        let dist = |a: &Position, b: &Position| ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt();
        assert!(dist(&p[0], &p[1]) < dist(&p[0], &p[3]));
    }

    #[test]
    fn identical_vectors_collapse_to_origin() {
        let v = vec![0.5f32, 0.5];
        let refs: Vec<&[f32]> = vec![v.as_slice(); 3];
        let p = project(&["a", "b", "c"], &refs, 2, 100.0);
        assert!(p.iter().all(|p| *p == Position::default()));
    }
}
