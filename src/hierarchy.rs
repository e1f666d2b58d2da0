//! Multilevel coarsening by heavy-edge matching
//!
//! Level 0 has one entry per snapshot node. Each coarsening pass pairs every
//! node with at most one unmatched neighbour, preferring the neighbour that
//! shares the most neighbours with it, and merges each pair into a supernode
//! of the next level. Construction stops once a pass stops paying for itself.

use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::config::HierarchyConfig;
use crate::geometry::Vec2;
use crate::graph::LevelEdge;

/// The finer-level nodes a supernode stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Children {
    Single(usize),
    Pair(usize, usize),
}

impl Children {
    pub fn len(&self) -> usize {
        match self {
            Children::Single(_) => 1,
            Children::Pair(..) => 2,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> {
        let (first, second) = match *self {
            Children::Single(c) => (c, None),
            Children::Pair(a, b) => (a, Some(b)),
        };
        std::iter::once(first).chain(second)
    }
}

/// One level of the hierarchy and the simulation buffers that go with it.
#[derive(Debug, Clone, Default)]
pub struct Level {
    /// Child record per node, indices into the next finer level; empty on level 0
    pub children: Vec<Children>,
    pub edges: Vec<LevelEdge>,
    pub positions: Vec<Vec2>,
    pub velocities: Vec<Vec2>,
    /// Scratch buffer for the force pass
    pub forces: Vec<Vec2>,
}

impl Level {
    /// A level with `node_count` nodes at the origin.
    pub fn new(node_count: usize, edges: Vec<LevelEdge>, children: Vec<Children>) -> Self {
        Self {
            children,
            edges,
            positions: vec![Vec2::ZERO; node_count],
            velocities: vec![Vec2::ZERO; node_count],
            forces: vec![Vec2::ZERO; node_count],
        }
    }

    /// A standalone level with the given positions, useful outside a hierarchy.
    pub fn with_positions(positions: Vec<Vec2>, edges: Vec<LevelEdge>) -> Self {
        let n = positions.len();
        Self {
            children: Vec::new(),
            edges,
            positions,
            velocities: vec![Vec2::ZERO; n],
            forces: vec![Vec2::ZERO; n],
        }
    }

    pub fn node_count(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Zero velocities and forces, keeping positions.
    pub fn reset_motion(&mut self) {
        self.velocities.fill(Vec2::ZERO);
        self.forces.fill(Vec2::ZERO);
    }
}

/// Ordered chain of levels, index 0 finest.
///
/// Never empty: an empty graph produces a single empty level.
#[derive(Debug, Clone)]
pub struct Hierarchy {
    levels: Vec<Level>,
}

impl Hierarchy {
    /// Coarsen from level-0 positions and edges, then seed every coarse level
    /// with the centroid of its children.
    pub fn build(
        positions: &[Vec2],
        edges: &[LevelEdge],
        config: &HierarchyConfig,
        rng: &mut StdRng,
    ) -> Self {
        let mut hierarchy = build_hierarchy(positions.len(), edges, config, rng);
        hierarchy.levels[0].positions.copy_from_slice(positions);
        hierarchy.restrict_positions();
        hierarchy
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Whether the hierarchy has no levels
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn level_mut(&mut self, index: usize) -> Option<&mut Level> {
        self.levels.get_mut(index)
    }

    pub fn finest(&self) -> &Level {
        &self.levels[0]
    }

    pub fn coarsest_index(&self) -> usize {
        self.levels.len() - 1
    }

    /// Node count of level 0
    pub fn node_count(&self) -> usize {
        self.levels[0].node_count()
    }

    /// Node count per level, finest first
    pub fn level_sizes(&self) -> Vec<usize> {
        self.levels.iter().map(Level::node_count).collect()
    }

    /// Set each coarse position to the centroid of its children, finest first.
    pub fn restrict_positions(&mut self) {
        for k in 1..self.levels.len() {
            let (fine, coarse) = self.levels.split_at_mut(k);
            let fine = &fine[k - 1];
            let coarse = &mut coarse[0];
            for (pos, children) in coarse.positions.iter_mut().zip(&coarse.children) {
                let sum = children
                    .iter()
                    .fold(Vec2::ZERO, |acc, c| acc + fine.positions[c]);
                *pos = sum / children.len() as f32;
            }
        }
    }

    /// Project level `coarse` onto level `coarse - 1`.
    ///
    /// Single children inherit the parent position. Both members of a pair
    /// get the parent position plus an independent offset in
    /// `[-jitter, jitter]²` so repulsion has a direction to work with.
    /// The finer level's motion state is reset.
    pub fn prolong(&mut self, coarse: usize, jitter: f32, rng: &mut StdRng) {
        if coarse == 0 || coarse >= self.levels.len() {
            return;
        }
        let (fine, rest) = self.levels.split_at_mut(coarse);
        let fine = &mut fine[coarse - 1];
        let parent = &rest[0];

        for (&pos, children) in parent.positions.iter().zip(&parent.children) {
            match *children {
                Children::Single(c) => fine.positions[c] = pos,
                Children::Pair(a, b) => {
                    fine.positions[a] = pos + jitter_offset(jitter, rng);
                    fine.positions[b] = pos + jitter_offset(jitter, rng);
                }
            }
        }
        fine.reset_motion();
    }
}

impl fmt::Display for Hierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, level) in self.levels.iter().enumerate() {
            let merged = level
                .children
                .iter()
                .filter(|c| matches!(c, Children::Pair(..)))
                .count();
            writeln!(
                f,
                "level {k}: {} nodes, {} edges, {merged} merged",
                level.node_count(),
                level.edges.len()
            )?;
        }
        Ok(())
    }
}

/// Uniform offset in `[-bound, bound]²`
pub(crate) fn jitter_offset(bound: f32, rng: &mut StdRng) -> Vec2 {
    if bound > 0.0 {
        Vec2::new(
            rng.random_range(-bound..=bound),
            rng.random_range(-bound..=bound),
        )
    } else {
        Vec2::ZERO
    }
}

/// Build the level chain for `node_count` nodes.
///
/// Positions are left at the origin; [`Hierarchy::build`] fills them in.
/// Stops when a pass keeps at least `coarsening_ratio` of the nodes, when
/// `max_levels` levels exist, or when a level has at most `min_coarse_size`
/// nodes.
pub fn build_hierarchy(
    node_count: usize,
    edges: &[LevelEdge],
    config: &HierarchyConfig,
    rng: &mut StdRng,
) -> Hierarchy {
    let mut levels = vec![Level::new(node_count, edges.to_vec(), Vec::new())];
    let max_levels = config.max_levels.max(1);

    while levels.len() < max_levels {
        let current = &levels[levels.len() - 1];
        let n = current.node_count();
        if n <= config.min_coarse_size || n == 0 {
            break;
        }

        let children = match_nodes(n, &current.edges, rng);
        let m = children.len();
        if m >= n || m as f32 >= config.coarsening_ratio * n as f32 {
            tracing::debug!(
                level = levels.len(),
                from = n,
                to = m,
                "coarsening ineffective, stopping"
            );
            break;
        }

        let coarse_edges = project_edges(n, &current.edges, &children);
        tracing::trace!(level = levels.len(), nodes = m, edges = coarse_edges.len(), "coarsened");
        levels.push(Level::new(m, coarse_edges, children));
    }

    Hierarchy { levels }
}

/// Sorted, deduplicated neighbour lists with edge weights
fn adjacency(n: usize, edges: &[LevelEdge]) -> Vec<Vec<(usize, f32)>> {
    let mut adj: Vec<Vec<(usize, f32)>> = vec![Vec::new(); n];
    for e in edges {
        adj[e.a].push((e.b, e.weight));
        adj[e.b].push((e.a, e.weight));
    }
    for list in &mut adj {
        list.sort_by_key(|&(v, _)| v);
        list.dedup_by_key(|&mut (v, _)| v);
    }
    adj
}

/// Size of the intersection of two sorted neighbour lists
fn common_neighbors(a: &[(usize, f32)], b: &[(usize, f32)]) -> usize {
    let (mut i, mut j, mut count) = (0, 0, 0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                count += 1;
                i += 1;
                j += 1;
            }
        }
    }
    count
}

/// One heavy-edge matching pass. Returns the child record of each supernode.
fn match_nodes(n: usize, edges: &[LevelEdge], rng: &mut StdRng) -> Vec<Children> {
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);
    match_in_order(&order, edges)
}

/// Greedy matching visiting nodes in `order`.
fn match_in_order(order: &[usize], edges: &[LevelEdge]) -> Vec<Children> {
    let n = order.len();
    let adj = adjacency(n, edges);

    let mut matched = vec![false; n];
    let mut children = Vec::with_capacity(n / 2 + 1);

    for &u in order {
        if matched[u] {
            continue;
        }
        matched[u] = true;

        // Neighbour lists are sorted, so a strict comparison keeps the
        // lowest index among equal scores.
        let mut best: Option<(usize, f32)> = None;
        for &(v, weight) in &adj[u] {
            if matched[v] {
                continue;
            }
            let score = (common_neighbors(&adj[u], &adj[v]) + 1) as f32 * weight;
            if best.is_none_or(|(_, s)| score > s) {
                best = Some((v, score));
            }
        }

        match best {
            Some((v, _)) => {
                matched[v] = true;
                children.push(Children::Pair(u, v));
            }
            None => children.push(Children::Single(u)),
        }
    }

    children
}

/// Map fine edges onto supernodes, dropping collapsed and duplicate edges.
fn project_edges(n: usize, edges: &[LevelEdge], children: &[Children]) -> Vec<LevelEdge> {
    let mut parent = vec![0usize; n];
    for (s, c) in children.iter().enumerate() {
        for child in c.iter() {
            parent[child] = s;
        }
    }

    let mut unique: BTreeMap<(usize, usize), f32> = BTreeMap::new();
    for e in edges {
        let (pa, pb) = (parent[e.a], parent[e.b]);
        if pa == pb {
            continue;
        }
        let slot = unique.entry((pa.min(pb), pa.max(pb))).or_insert(e.weight);
        *slot = slot.max(e.weight);
    }

    unique
        .into_iter()
        .map(|((a, b), weight)| LevelEdge { a, b, weight })
        .collect()
}
