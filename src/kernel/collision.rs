//! Spring-to-target simulation with circular colliders
//!
//! Used for very small graphs where the multilevel machinery is overkill:
//! every node is pulled toward a target by a damped spring, and nodes whose
//! colliders overlap are pushed apart. The simulation has no terminal state.

use crate::config::CollisionParams;
use crate::geometry::Vec2;

/// Fraction of the approach speed kept after a contact
pub const RESTITUTION: f32 = 0.5;

/// Correction for the first node of an overlapping pair; the second node
/// receives the negation of both fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub correction: Vec2,
    pub impulse: Vec2,
}

/// Resolve one pair of equal-mass colliders.
///
/// Returns `None` when the colliders do not overlap or the centres coincide.
/// Each node is moved back by half the overlap. The velocity impulse is only
/// applied while the nodes approach each other.
pub fn resolve_pair(
    pa: Vec2,
    va: Vec2,
    pb: Vec2,
    vb: Vec2,
    params: &CollisionParams,
    epsilon: f32,
) -> Option<Contact> {
    let delta = pb - pa;
    let d = delta.length();
    let reach = 2.0 * params.collider_radius;
    if d >= reach || !(d >= epsilon) {
        return None;
    }

    let normal = delta / d;
    let correction = normal * (-(reach - d) * 0.5);

    let approach = (vb - va).dot(normal);
    let impulse = if approach < 0.0 {
        let j = -(1.0 + RESTITUTION) * approach * 0.5 * params.response_strength;
        normal * -j
    } else {
        Vec2::ZERO
    };

    Some(Contact { correction, impulse })
}

#[derive(Debug, Clone)]
pub struct CollisionSim {
    pub positions: Vec<Vec2>,
    pub velocities: Vec<Vec2>,
    pub targets: Vec<Vec2>,
    params: CollisionParams,
    epsilon: f32,
}

impl CollisionSim {
    pub fn new(
        positions: Vec<Vec2>,
        targets: Vec<Vec2>,
        params: CollisionParams,
        epsilon: f32,
    ) -> Self {
        let n = positions.len();
        debug_assert_eq!(targets.len(), n);
        Self {
            positions,
            velocities: vec![Vec2::ZERO; n],
            targets,
            params,
            epsilon,
        }
    }

    pub fn node_count(&self) -> usize {
        self.positions.len()
    }

    pub fn params(&self) -> &CollisionParams {
        &self.params
    }

    /// Spring integration followed by one contact pass.
    ///
    /// Pairs are resolved in index order, each against the state left by the
    /// previous contact, so every overlapping pair ends its own resolution
    /// exactly one collider diameter apart.
    pub fn step(&mut self, dt: f32) {
        let CollisionParams {
            stiffness, damping, ..
        } = self.params;

        for ((p, v), &target) in self
            .positions
            .iter_mut()
            .zip(self.velocities.iter_mut())
            .zip(&self.targets)
        {
            let accel = (target - *p) * stiffness - *v * damping;
            *v += accel * dt;
            *p += *v * dt;
        }

        let n = self.node_count();
        let mut contacts = 0usize;
        for i in 0..n {
            for j in (i + 1)..n {
                let Some(contact) = resolve_pair(
                    self.positions[i],
                    self.velocities[i],
                    self.positions[j],
                    self.velocities[j],
                    &self.params,
                    self.epsilon,
                ) else {
                    continue;
                };
                contacts += 1;
                self.positions[i] += contact.correction;
                self.positions[j] -= contact.correction;
                self.velocities[i] += contact.impulse;
                self.velocities[j] -= contact.impulse;
            }
        }

        if contacts > 0 {
            tracing::trace!(contacts, "resolved collisions");
        }
    }
}
