//! multilevel-layout - Multilevel force-directed graph layout.
//!
//! Given nodes and (optionally weighted) edges read from a host, the engine
//! coarsens the graph by heavy-edge matching, lays out the coarsest level
//! with a temperature-annealed force simulation, and refines level by level
//! back to the original nodes. Small graphs can instead run a
//! spring-to-target simulation with collisions.
//!
//! The host plugs in through two traits: [`GraphSource`] supplies nodes and
//! edges at [`LayoutEngine::initialize`], and [`PositionSink`] receives the
//! final positions. Everything else is driven through [`LayoutEngine::tick`].
//!
//! ```rust,ignore
//! use multilevel_layout::{GraphData, LayoutConfig, LayoutEngine, PositionBuffer};
//!
//! let config = LayoutConfig::default();
//! let engine = LayoutEngine::new(config, GraphData::ring(10), PositionBuffer::new())?;
//! engine.initialize();
//! engine.run_to_convergence(100_000);
//! let positions = engine.shutdown();
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod geometry;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod graph;
pub mod hierarchy;
pub mod kernel;
pub mod refinement;

pub use config::{LayoutConfig, LayoutMode};
pub use engine::{EngineStatus, LayoutEngine, TickOutcome};
pub use error::{LayoutError, Result};
pub use geometry::{Plane, Point3, Vec2};
pub use graph::{
    GraphData, GraphSource, HostEdge, HostNode, NodeId, NodePosition, PositionBuffer, PositionSink,
};
pub use hierarchy::{Hierarchy, build_hierarchy};
pub use refinement::{RefinementController, RefinementState};
