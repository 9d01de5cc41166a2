//! Force-directed layout for meshes without embeddings.
//!
//! Starts from the grid placement and runs a fixed number of iterations:
//! capped inverse-distance repulsion between all pairs, capped
//! distance-squared attraction along edges, a step limit that decays to
//! zero over the budget, and a rectangular clamp every iteration.

use std::collections::HashMap;

use super::grid::grid_positions;
use super::Position;
use crate::config::LayoutConfig;
use crate::prune::ScoredEdge;

const MIN_DISTANCE: f64 = 1e-3;

pub fn force_positions(ids: &[&str], edges: &[ScoredEdge], config: &LayoutConfig) -> Vec<Position> {
    let n = ids.len();
    let mut pos = grid_positions(ids, config.bound, config.jitter_fraction, 2);
    if n < 2 {
        return pos;
    }

    let half_w = config.bound;
    let half_h = config.bound * config.force_aspect;
    for p in &mut pos {
        p.y = p.y.clamp(-half_h, half_h);
    }

    let index: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let links: Vec<(usize, usize, f64)> = edges
        .iter()
        .filter_map(|e| {
            let a = *index.get(e.source.as_str())?;
            let b = *index.get(e.target.as_str())?;
            (a != b).then_some((a, b, e.score.max(0.05)))
        })
        .collect();

    // Ideal edge length for this many nodes in this box.
    let ideal = ((4.0 * half_w * half_h) / n as f64).sqrt();
    let max_force = ideal;
    let iterations = config.force_iterations.max(1);
    let initial_step = half_w * 0.1;

    for iter in 0..iterations {
        let mut disp = vec![(0.0f64, 0.0f64); n];

        for i in 0..n {
            for j in (i + 1)..n {
                let (dx, dy) = (pos[i].x - pos[j].x, pos[i].y - pos[j].y);
                let dist = (dx * dx + dy * dy).sqrt().max(MIN_DISTANCE);
                let f = (ideal * ideal / dist).min(max_force);
                let (fx, fy) = (dx / dist * f, dy / dist * f);
                disp[i].0 += fx;
                disp[i].1 += fy;
                disp[j].0 -= fx;
                disp[j].1 -= fy;
            }
        }

        for &(a, b, weight) in &links {
            let (dx, dy) = (pos[a].x - pos[b].x, pos[a].y - pos[b].y);
            let dist = (dx * dx + dy * dy).sqrt().max(MIN_DISTANCE);
            let f = (dist * dist / ideal * weight).min(max_force);
            let (fx, fy) = (dx / dist * f, dy / dist * f);
            disp[a].0 -= fx;
            disp[a].1 -= fy;
            disp[b].0 += fx;
            disp[b].1 += fy;
        }

        let step = initial_step * (1.0 - iter as f64 / iterations as f64);
        for (p, (dx, dy)) in pos.iter_mut().zip(&disp) {
            let len = (dx * dx + dy * dy).sqrt();
            if len > 0.0 {
                let moved = len.min(step);
                p.x += dx / len * moved;
                p.y += dy / len * moved;
            }
            p.x = p.x.clamp(-half_w, half_w);
            p.y = p.y.clamp(-half_h, half_h);
        }
    }
    pos
}
