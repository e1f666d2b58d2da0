//! Host-facing graph types and the per-Initialize graph snapshot
//!
//! The host hands the engine its nodes and edges through [`GraphSource`] and
//! receives positions back through [`PositionSink`]. Everything in between is
//! plain data owned by the engine.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::geometry::{Plane, Point3, Vec2};

/// Stable host identifier of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node as the host describes it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostNode {
    pub id: NodeId,
    /// Initial position; the plane's pinned axis is carried through untouched
    #[serde(default)]
    pub position: Point3,
}

impl HostNode {
    pub fn new(id: u64, x: f32, y: f32, z: f32) -> Self {
        Self {
            id: NodeId(id),
            position: Point3::new(x, y, z),
        }
    }
}

/// An edge as the host describes it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostEdge {
    pub source: NodeId,
    pub target: NodeId,
    /// Matching weight; heavier edges are preferred when coarsening
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f32>,
    /// Free-form type tag, ignored by the layout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl HostEdge {
    pub fn new(source: u64, target: u64) -> Self {
        Self {
            source: NodeId(source),
            target: NodeId(target),
            weight: None,
            kind: None,
        }
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// One write-back record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodePosition {
    pub id: NodeId,
    pub position: Point3,
}

/// Where the engine reads the graph from at Initialize
pub trait GraphSource {
    /// Nodes in host order
    fn nodes(&self) -> Vec<HostNode>;

    /// Edges; ids must name entries from [`GraphSource::nodes`]
    fn edges(&self) -> Vec<HostEdge>;
}

/// Where the engine writes final (or per-tick) positions
pub trait PositionSink {
    /// Receive one batch covering every node of the current snapshot
    fn write_back(&mut self, batch: &[NodePosition]);
}

impl<F> PositionSink for F
where
    F: FnMut(&[NodePosition]),
{
    fn write_back(&mut self, batch: &[NodePosition]) {
        self(batch)
    }
}

/// A sink that keeps the latest batch
#[derive(Debug, Clone, Default)]
pub struct PositionBuffer {
    positions: Vec<NodePosition>,
    batches: usize,
}

impl PositionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Positions from the most recent write-back
    pub fn positions(&self) -> &[NodePosition] {
        &self.positions
    }

    /// Number of write-backs received so far
    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn get(&self, id: NodeId) -> Option<Point3> {
        self.positions
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.position)
    }
}

impl PositionSink for PositionBuffer {
    fn write_back(&mut self, batch: &[NodePosition]) {
        self.positions.clear();
        self.positions.extend_from_slice(batch);
        self.batches += 1;
    }
}

/// Serializable graph, the CLI's input format
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphData {
    pub nodes: Vec<HostNode>,
    #[serde(default)]
    pub edges: Vec<HostEdge>,
}

impl GraphData {
    /// Read a graph from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Nodes `0..n` at the origin joined in a cycle
    pub fn ring(n: u64) -> Self {
        let nodes = (0..n).map(|i| HostNode::new(i, 0.0, 0.0, 0.0)).collect();
        let edges = if n < 2 {
            Vec::new()
        } else {
            (0..n).map(|i| HostEdge::new(i, (i + 1) % n)).collect()
        };
        Self { nodes, edges }
    }
}

impl GraphSource for GraphData {
    fn nodes(&self) -> Vec<HostNode> {
        self.nodes.clone()
    }

    fn edges(&self) -> Vec<HostEdge> {
        self.edges.clone()
    }
}

/// A deduplicated undirected edge in level-local indices, `a < b`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelEdge {
    pub a: usize,
    pub b: usize,
    pub weight: f32,
}

/// The graph as read at Initialize, resolved to dense indices.
///
/// Index `i` of every array refers to the same node. Velocities live in the
/// levels, which own the mutable simulation state.
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    pub ids: Vec<NodeId>,
    pub positions: Vec<Vec2>,
    /// The coordinate on the plane's pinned axis, per node
    pub pinned: Vec<f32>,
    pub edges: Vec<LevelEdge>,
    /// Edges dropped because an endpoint id was unknown
    pub dropped_edges: usize,
    /// Node entries dropped because their id was already taken
    pub duplicate_nodes: usize,
}

impl GraphSnapshot {
    /// Read the host graph once and resolve ids.
    ///
    /// Malformed input never fails: unknown edge endpoints, duplicate ids and
    /// non-finite positions are dropped or reset with a warning.
    pub fn capture<S: GraphSource + ?Sized>(source: &S, plane: Plane) -> Self {
        let host_nodes = source.nodes();
        let host_edges = source.edges();

        let mut snapshot = GraphSnapshot::default();
        let mut index_of: HashMap<NodeId, usize> = HashMap::with_capacity(host_nodes.len());

        for node in &host_nodes {
            if index_of.contains_key(&node.id) {
                tracing::warn!(id = %node.id, "duplicate node id, keeping the first entry");
                snapshot.duplicate_nodes += 1;
                continue;
            }
            let (mut position, pinned) = plane.project(node.position);
            if !position.is_finite() {
                tracing::warn!(id = %node.id, "non-finite node position, placing at origin");
                position = Vec2::ZERO;
            }
            index_of.insert(node.id, snapshot.ids.len());
            snapshot.ids.push(node.id);
            snapshot.positions.push(position);
            snapshot.pinned.push(if pinned.is_finite() { pinned } else { 0.0 });
        }

        // BTreeMap keeps the projected edge order independent of host order
        let mut unique: BTreeMap<(usize, usize), f32> = BTreeMap::new();
        for edge in &host_edges {
            let (Some(&a), Some(&b)) = (index_of.get(&edge.source), index_of.get(&edge.target))
            else {
                tracing::warn!(
                    source = %edge.source,
                    target = %edge.target,
                    "edge references an unknown node, dropping it"
                );
                snapshot.dropped_edges += 1;
                continue;
            };
            if a == b {
                continue;
            }
            let weight = edge
                .weight
                .filter(|w| w.is_finite() && *w > 0.0)
                .unwrap_or(1.0);
            let key = (a.min(b), a.max(b));
            let slot = unique.entry(key).or_insert(weight);
            *slot = slot.max(weight);
        }
        snapshot.edges = unique
            .into_iter()
            .map(|((a, b), weight)| LevelEdge { a, b, weight })
            .collect();

        snapshot
    }

    pub fn node_count(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Lift level-0 positions back into host space.
    pub fn write_back_batch(
        &self,
        positions: &[Vec2],
        plane: Plane,
        pinned_override: Option<f32>,
    ) -> Vec<NodePosition> {
        self.ids
            .iter()
            .zip(positions)
            .zip(&self.pinned)
            .map(|((&id, &p), &pinned)| NodePosition {
                id,
                position: plane.lift(p, pinned_override.unwrap_or(pinned)),
            })
            .collect()
    }
}
