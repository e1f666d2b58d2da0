//! CPU force accumulation
//!
//! Below `parallel_threshold` nodes the pass visits each unordered pair once
//! and applies the force to both ends. Above it, rayon computes each node's
//! total independently over a shared read-only position buffer. Both paths
//! are deterministic for a given input.

use rayon::prelude::*;

use super::{Adjacency, ForceBackend, attraction, repulsion};
use crate::config::{DEFAULT_PARALLEL_THRESHOLD, ForceModel, ForceParams};
use crate::error::Result;
use crate::geometry::Vec2;
use crate::graph::LevelEdge;

#[derive(Debug, Clone)]
pub struct CpuBackend {
    pub parallel_threshold: usize,
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self {
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

impl CpuBackend {
    pub fn new(parallel_threshold: usize) -> Self {
        Self { parallel_threshold }
    }

    fn accumulate_sequential(
        positions: &[Vec2],
        edges: &[LevelEdge],
        params: &ForceParams,
        temperature: f32,
        forces: &mut [Vec2],
    ) {
        forces.fill(Vec2::ZERO);
        let n = positions.len();

        for i in 0..n {
            for j in (i + 1)..n {
                if let Some(f) = repulsion(positions[i], positions[j], params, temperature) {
                    forces[i] += f;
                    forces[j] -= f;
                }
            }
        }

        for e in edges {
            if let Some(f) = attraction(positions[e.a], positions[e.b], params) {
                forces[e.a] += f;
                forces[e.b] -= f;
            }
        }
    }

    fn accumulate_parallel(
        positions: &[Vec2],
        edges: &[LevelEdge],
        params: &ForceParams,
        temperature: f32,
        forces: &mut [Vec2],
    ) {
        let adjacency = Adjacency::from_edges(positions.len(), edges);

        forces.par_iter_mut().enumerate().for_each(|(i, force)| {
            let p = positions[i];
            let mut total = Vec2::ZERO;
            for (j, &q) in positions.iter().enumerate() {
                if j == i {
                    continue;
                }
                if let Some(f) = repulsion(p, q, params, temperature) {
                    total += f;
                }
            }
            for &j in adjacency.neighbors(i) {
                if let Some(f) = attraction(p, positions[j as usize], params) {
                    total += f;
                }
            }
            *force = total;
        });
    }
}

impl ForceBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn accumulate(
        &mut self,
        positions: &[Vec2],
        edges: &[LevelEdge],
        params: &ForceParams,
        temperature: f32,
        forces: &mut [Vec2],
    ) -> Result<()> {
        if positions.len() >= self.parallel_threshold {
            Self::accumulate_parallel(positions, edges, params, temperature, forces);
        } else {
            Self::accumulate_sequential(positions, edges, params, temperature, forces);
        }

        if params.model == ForceModel::Simple && params.center_strength > 0.0 {
            for (force, &p) in forces.iter_mut().zip(positions) {
                *force -= p * params.center_strength;
            }
        }
        Ok(())
    }
}
