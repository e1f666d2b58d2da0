//! Force kernel: one simulation step over one level
//!
//! A step runs in two passes. The accumulation pass reads the start-of-step
//! positions and writes a separate force buffer; the integration pass then
//! updates velocities and positions from that buffer. Accumulation is
//! delegated to a [`ForceBackend`] so the O(n²) pass can run on rayon or on
//! the GPU without changing the integration rules.
//!
//! # Forces
//!
//! - **Repulsion**: every unordered pair. Inverse-square below
//!   `min_distance_to_repel`, a weak inverse-cube field beyond it. Scaled by
//!   temperature in the multilevel model.
//! - **Attraction**: per edge. Linear (`A·d`) in the simple model,
//!   logarithmic (`A·ln(d/L + 1)`) in the multilevel model.
//! - **Centering**: simple model only, a pull toward the origin.
//!
//! Pairs closer than `epsilon` contribute nothing; there is no fallback
//! direction, so coincident nodes can never inject NaN.

pub mod collision;
mod cpu;

pub use cpu::CpuBackend;

use crate::config::{ForceModel, ForceParams};
use crate::error::Result;
use crate::geometry::Vec2;
use crate::graph::LevelEdge;
use crate::hierarchy::Level;

/// Execution strategy for the accumulation pass.
///
/// Implementations must overwrite `forces` entirely and must read only
/// `positions`, never the buffers being written.
pub trait ForceBackend: Send {
    /// Short name for diagnostics
    fn name(&self) -> &'static str;

    /// Fill `forces[i]` with the net force on node `i`.
    fn accumulate(
        &mut self,
        positions: &[Vec2],
        edges: &[LevelEdge],
        params: &ForceParams,
        temperature: f32,
        forces: &mut [Vec2],
    ) -> Result<()>;
}

/// Repulsion on the node at `a` from the node at `b`.
///
/// `None` when the two are within `epsilon` (direction undefined).
/// `repulsion(a, b, ..)` is the exact negation of `repulsion(b, a, ..)`.
#[inline]
pub fn repulsion(a: Vec2, b: Vec2, params: &ForceParams, temperature: f32) -> Option<Vec2> {
    let delta = a - b;
    let d = delta.length();
    // Negated comparison also rejects NaN distances
    if !(d >= params.epsilon) {
        return None;
    }
    let mut magnitude = if d < params.min_distance_to_repel {
        params.repulsion_strength / (d * d)
    } else {
        params.repulsion_strength / (d * d * d * params.far_field_scale)
    };
    if params.model == ForceModel::Multilevel {
        magnitude *= temperature;
    }
    Some(delta * (magnitude / d))
}

/// Spring force on the node at `a` toward its neighbour at `b`.
///
/// `None` when the endpoints coincide.
#[inline]
pub fn attraction(a: Vec2, b: Vec2, params: &ForceParams) -> Option<Vec2> {
    let delta = b - a;
    let d = delta.length();
    if !(d >= params.epsilon) {
        return None;
    }
    let magnitude = match params.model {
        ForceModel::Simple => params.attraction_strength * d,
        ForceModel::Multilevel => params.attraction_strength * (d / params.ideal_length).ln_1p(),
    };
    Some(delta * (magnitude / d))
}

/// Compressed adjacency: the neighbours of `i` are
/// `neighbors[offsets[i]..offsets[i + 1]]`, each undirected edge listed twice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Adjacency {
    pub offsets: Vec<u32>,
    pub neighbors: Vec<u32>,
}

impl Adjacency {
    pub fn from_edges(node_count: usize, edges: &[LevelEdge]) -> Self {
        let mut degree = vec![0u32; node_count];
        for e in edges {
            degree[e.a] += 1;
            degree[e.b] += 1;
        }

        let mut offsets = Vec::with_capacity(node_count + 1);
        let mut total = 0u32;
        offsets.push(0);
        for d in &degree {
            total += d;
            offsets.push(total);
        }

        let mut cursor: Vec<u32> = offsets[..node_count].to_vec();
        let mut neighbors = vec![0u32; total as usize];
        for e in edges {
            neighbors[cursor[e.a] as usize] = e.b as u32;
            cursor[e.a] += 1;
            neighbors[cursor[e.b] as usize] = e.a as u32;
            cursor[e.b] += 1;
        }

        Self { offsets, neighbors }
    }

    pub fn neighbors(&self, node: usize) -> &[u32] {
        let start = self.offsets[node] as usize;
        let end = self.offsets[node + 1] as usize;
        &self.neighbors[start..end]
    }
}

/// Advance `level` by one step on the CPU backend.
///
/// Zero or one node is a no-op.
pub fn step(level: &mut Level, params: &ForceParams, temperature: f32, dt: f32) {
    step_with(&mut CpuBackend::default(), level, params, temperature, dt);
}

/// Advance `level` by one step, accumulating forces on `backend`.
///
/// A backend failure leaves the level untouched.
pub fn step_with(
    backend: &mut dyn ForceBackend,
    level: &mut Level,
    params: &ForceParams,
    temperature: f32,
    dt: f32,
) {
    if level.node_count() < 2 {
        return;
    }

    let Level {
        positions,
        velocities,
        forces,
        edges,
        ..
    } = level;

    if let Err(err) = backend.accumulate(positions, edges, params, temperature, forces) {
        tracing::warn!(backend = backend.name(), %err, "force accumulation failed, skipping step");
        return;
    }

    integrate(positions, velocities, forces, params, temperature, dt);
}

/// `v = (v + F·dt)·damping`, speed-limited, then `p += v·dt` with the
/// multilevel displacement clamp.
fn integrate(
    positions: &mut [Vec2],
    velocities: &mut [Vec2],
    forces: &[Vec2],
    params: &ForceParams,
    temperature: f32,
    dt: f32,
) {
    let max_displacement = temperature * params.max_displacement_scale;

    for ((position, velocity), &force) in positions
        .iter_mut()
        .zip(velocities.iter_mut())
        .zip(forces)
    {
        if !force.is_finite() {
            continue;
        }
        let v = ((*velocity + force * dt) * params.damping).clamp_length(params.max_velocity);
        let mut displacement = v * dt;
        if params.model == ForceModel::Multilevel {
            displacement = displacement.clamp_length(max_displacement);
        }
        *velocity = v;
        *position += displacement;
    }
}
