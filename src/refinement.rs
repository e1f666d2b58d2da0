//! Coarse-to-fine refinement
//!
//! The controller owns the hierarchy for one run. It starts on the coarsest
//! level at the start temperature, steps the active level once per tick and
//! cools. When the temperature drops below the refine threshold the level is
//! done: its positions are prolonged onto the next finer level and the
//! schedule restarts, until level 0 converges.

use std::collections::HashMap;

use rand::rngs::StdRng;
use serde::Serialize;

use crate::config::{ForceParams, RefinementConfig};
use crate::geometry::Vec2;
use crate::hierarchy::{Hierarchy, jitter_offset};
use crate::kernel::{self, ForceBackend};

/// Where the controller is in the coarse-to-fine pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RefinementState {
    /// Level `level` is being simulated; the coarsest phase is
    /// `Refining { level: N - 1 }`.
    Refining { level: usize },
    /// Level 0 has settled.
    Converged,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    Stepped,
    LevelChanged { from: usize, to: usize },
    /// Level 0 just converged. Returned once.
    Converged,
    /// Ticked after convergence; nothing happened.
    Idle,
}

#[derive(Debug)]
pub struct RefinementController {
    hierarchy: Hierarchy,
    schedule: RefinementConfig,
    state: RefinementState,
    temperature: f32,
    ticks_on_level: u64,
    rng: StdRng,
}

impl RefinementController {
    /// Start on the coarsest level of `hierarchy`.
    ///
    /// Nodes of the starting level that coincide with an earlier node are
    /// jittered apart first, so repulsion has a direction on the first step.
    pub fn new(
        mut hierarchy: Hierarchy,
        schedule: RefinementConfig,
        epsilon: f32,
        mut rng: StdRng,
    ) -> Self {
        let start = hierarchy.coarsest_index();
        if let Some(level) = hierarchy.level_mut(start) {
            let moved =
                separate_coincident(&mut level.positions, epsilon, schedule.jitter, &mut rng);
            if moved > 0 {
                tracing::debug!(level = start, moved, "jittered coincident nodes");
            }
        }

        Self {
            temperature: schedule.start_temperature,
            state: RefinementState::Refining { level: start },
            ticks_on_level: 0,
            hierarchy,
            schedule,
            rng,
        }
    }

    pub fn state(&self) -> RefinementState {
        self.state
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    /// Index of the level being simulated, `None` once converged
    pub fn active_level(&self) -> Option<usize> {
        match self.state {
            RefinementState::Refining { level } => Some(level),
            RefinementState::Converged => None,
        }
    }

    pub fn is_converged(&self) -> bool {
        self.state == RefinementState::Converged
    }

    /// Current level-0 positions (final once converged)
    pub fn finest_positions(&self) -> &[Vec2] {
        &self.hierarchy.finest().positions
    }

    /// Step the active level once, cool, and advance the state machine.
    pub fn tick(
        &mut self,
        backend: &mut dyn ForceBackend,
        params: &ForceParams,
        dt: f32,
    ) -> StepResult {
        let RefinementState::Refining { level } = self.state else {
            return StepResult::Idle;
        };

        if let Some(active) = self.hierarchy.level_mut(level) {
            kernel::step_with(backend, active, params, self.temperature, dt);
        }
        self.ticks_on_level += 1;
        self.temperature =
            (self.temperature * self.schedule.cooling_factor).max(self.schedule.min_temperature);

        if self.temperature >= self.schedule.refine_threshold {
            return StepResult::Stepped;
        }

        tracing::debug!(level, ticks = self.ticks_on_level, "level converged");
        self.ticks_on_level = 0;

        if level == 0 {
            self.state = RefinementState::Converged;
            return StepResult::Converged;
        }

        self.hierarchy.prolong(level, self.schedule.jitter, &mut self.rng);
        self.state = RefinementState::Refining { level: level - 1 };
        self.temperature = self.schedule.start_temperature;
        StepResult::LevelChanged {
            from: level,
            to: level - 1,
        }
    }
}

/// Move every node that lies within `epsilon` of an earlier node by a
/// random offset in `[-jitter, jitter]²`. Returns the number moved.
///
/// Uses a uniform grid with cell size `epsilon`, so only the 3×3 block
/// around a node is searched.
pub fn separate_coincident(
    positions: &mut [Vec2],
    epsilon: f32,
    jitter: f32,
    rng: &mut StdRng,
) -> usize {
    if positions.len() < 2 || !(epsilon > 0.0) {
        return 0;
    }
    let bound = jitter.max(epsilon * 16.0);
    let cell_of = |p: Vec2| ((p.x / epsilon).floor() as i64, (p.y / epsilon).floor() as i64);

    let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::with_capacity(positions.len());
    let mut moved = 0;

    for i in 0..positions.len() {
        let mut attempts = 0;
        while attempts < 8 && crowded(&grid, positions, i, epsilon, cell_of(positions[i])) {
            positions[i] += jitter_offset(bound, rng);
            attempts += 1;
        }
        if attempts > 0 {
            moved += 1;
        }
        grid.entry(cell_of(positions[i])).or_default().push(i);
    }
    moved
}

fn crowded(
    grid: &HashMap<(i64, i64), Vec<usize>>,
    positions: &[Vec2],
    i: usize,
    epsilon: f32,
    (cx, cy): (i64, i64),
) -> bool {
    let p = positions[i];
    for dx in -1..=1 {
        for dy in -1..=1 {
            let Some(bucket) = grid.get(&(cx + dx, cy + dy)) else {
                continue;
            };
            if bucket.iter().any(|&j| positions[j].distance(p) < epsilon) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::config::HierarchyConfig;
    use crate::graph::LevelEdge;
    use crate::kernel::CpuBackend;

    fn ring(n: usize) -> Vec<LevelEdge> {
        (0..n)
            .map(|i| {
                let j = (i + 1) % n;
                LevelEdge {
                    a: i.min(j),
                    b: i.max(j),
                    weight: 1.0,
                }
            })
            .collect()
    }

    fn controller(n: usize, min_coarse_size: usize) -> RefinementController {
        let mut rng = StdRng::seed_from_u64(42);
        let config = HierarchyConfig {
            min_coarse_size,
            ..HierarchyConfig::default()
        };
        let hierarchy = Hierarchy::build(&vec![Vec2::ZERO; n], &ring(n), &config, &mut rng);
        RefinementController::new(hierarchy, RefinementConfig::default(), 1e-4, rng)
    }

    #[test]
    fn starts_on_coarsest_level_at_start_temperature() {
        let c = controller(10, 2);
        let coarsest = c.hierarchy().coarsest_index();
        assert!(coarsest > 0);
        assert_eq!(c.state(), RefinementState::Refining { level: coarsest });
        assert_eq!(c.temperature(), RefinementConfig::default().start_temperature);
    }

    #[test]
    fn walks_every_level_down_to_converged() {
        let mut c = controller(10, 2);
        let mut backend = CpuBackend::default();
        let params = ForceParams::default();
        let mut expected = c.hierarchy().coarsest_index();
        let mut transitions = Vec::new();

        for _ in 0..10_000 {
            match c.tick(&mut backend, &params, 1.0) {
                StepResult::Stepped => {}
                StepResult::LevelChanged { from, to } => {
                    assert_eq!(from, expected);
                    assert_eq!(to, from - 1);
                    assert_eq!(c.temperature(), RefinementConfig::default().start_temperature);
                    transitions.push(to);
                    expected = to;
                }
                StepResult::Converged => break,
                StepResult::Idle => unreachable!("idle before convergence"),
            }
        }

        assert!(c.is_converged());
        assert_eq!(transitions.last(), Some(&0));
        assert_eq!(c.tick(&mut backend, &params, 1.0), StepResult::Idle);
        assert!(c.finest_positions().iter().all(|p| p.is_finite()));
    }

    #[test]
    fn level_converges_after_fixed_number_of_ticks() {
        // 0.99^k < 0.1 first holds at k = 230
        let mut c = controller(4, 4);
        assert_eq!(c.hierarchy().len(), 1);
        let mut backend = CpuBackend::default();
        let params = ForceParams::default();

        let mut ticks = 0;
        while c.tick(&mut backend, &params, 1.0) != StepResult::Converged {
            ticks += 1;
            assert!(ticks < 1000);
        }
        assert_eq!(ticks + 1, 230);
    }

    #[test]
    fn coincident_nodes_are_jittered_apart() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut positions = vec![Vec2::ZERO; 5];
        positions.push(Vec2::new(100.0, 100.0));

        let moved = separate_coincident(&mut positions, 1e-4, 5.0, &mut rng);
        assert_eq!(moved, 4);
        assert_eq!(positions[0], Vec2::ZERO);
        assert_eq!(positions[5], Vec2::new(100.0, 100.0));
        for i in 0..positions.len() {
            for j in (i + 1)..positions.len() {
                assert!(positions[i].distance(positions[j]) >= 1e-4);
            }
            assert!(positions[i].x.abs() <= 100.0);
        }
    }

    #[test]
    fn distinct_nodes_are_left_alone() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut positions = vec![Vec2::new(0.0, 0.0), Vec2::new(0.001, 0.0), Vec2::new(-3.0, 7.0)];
        let before = positions.clone();
        assert_eq!(separate_coincident(&mut positions, 1e-4, 5.0, &mut rng), 0);
        assert_eq!(positions, before);
    }
}
