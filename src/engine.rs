//! Layout engine: lifecycle, ticking and write-back
//!
//! The engine is shared by reference between the host's driver and its
//! control flow. All mutable run state sits behind one mutex that a tick only
//! ever `try_lock`s: a tick arriving while a step is in flight is dropped and
//! counted, never queued. `clear` takes the same lock blocking, so it waits
//! for the in-flight step and then releases every level buffer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, TryLockError};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;

use crate::config::{
    Backend, DriverConfig, ForceParams, HierarchyConfig, LayoutConfig, LayoutMode, SpringTarget,
};
use crate::error::Result;
use crate::geometry::Vec2;
use crate::graph::{GraphSnapshot, GraphSource, NodePosition, PositionSink};
use crate::hierarchy::Hierarchy;
use crate::kernel::collision::CollisionSim;
use crate::kernel::{CpuBackend, ForceBackend};
use crate::refinement::{RefinementController, RefinementState, StepResult, separate_coincident};

/// What a call to [`LayoutEngine::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not initialized, cleared, or already converged
    Inactive,
    /// The tick interval has not elapsed yet
    Waiting,
    Stepped,
    LevelChanged { from: usize, to: usize },
    /// Level 0 converged and positions were written back
    Converged,
    /// Another step was in flight
    Dropped,
}

/// Diagnostic snapshot, cheap to read at any time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStatus {
    pub active: bool,
    pub mode: Option<LayoutMode>,
    pub state: Option<RefinementState>,
    pub active_level: Option<usize>,
    /// Node count per hierarchy level, finest first
    pub level_sizes: Vec<usize>,
    pub temperature: Option<f32>,
    pub node_count: usize,
    pub edge_count: usize,
    pub ticks: u64,
    pub dropped_ticks: u64,
    pub dropped_edges: usize,
}

/// Per-Initialize simulation state; dropping it releases every buffer.
enum Run {
    Refine {
        snapshot: GraphSnapshot,
        controller: RefinementController,
        params: ForceParams,
        mode: LayoutMode,
    },
    Collide {
        snapshot: GraphSnapshot,
        sim: CollisionSim,
    },
}

impl Run {
    fn mode(&self) -> LayoutMode {
        match self {
            Run::Refine { mode, .. } => *mode,
            Run::Collide { .. } => LayoutMode::Collision,
        }
    }

    fn snapshot(&self) -> &GraphSnapshot {
        match self {
            Run::Refine { snapshot, .. } | Run::Collide { snapshot, .. } => snapshot,
        }
    }
}

struct Core<W> {
    sink: W,
    backend: Box<dyn ForceBackend>,
    run: Option<Run>,
    /// Wall-clock time not yet consumed by a step
    elapsed: f32,
    ticks: u64,
}

pub struct LayoutEngine<S, W> {
    config: LayoutConfig,
    source: S,
    core: Mutex<Core<W>>,
    active: AtomicBool,
    dropped_ticks: AtomicU64,
    status: RwLock<EngineStatus>,
}

impl<S: GraphSource, W: PositionSink> LayoutEngine<S, W> {
    /// Create an idle engine. Nothing is read from `source` until
    /// [`initialize`](Self::initialize).
    pub fn new(config: LayoutConfig, source: S, sink: W) -> Result<Self> {
        config.validate()?;
        let backend = make_backend(&config.driver);
        tracing::debug!(backend = backend.name(), mode = ?config.mode, "layout engine created");

        Ok(Self {
            core: Mutex::new(Core {
                sink,
                backend,
                run: None,
                elapsed: 0.0,
                ticks: 0,
            }),
            config,
            source,
            active: AtomicBool::new(false),
            dropped_ticks: AtomicU64::new(0),
            status: RwLock::new(EngineStatus::default()),
        })
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Read the graph, rebuild the hierarchy and start ticking.
    ///
    /// Any previous run is released first. An empty graph leaves the engine
    /// inactive.
    pub fn initialize(&self) {
        let mut core = self.lock_core();
        core.run = None;
        core.elapsed = 0.0;
        core.ticks = 0;

        let snapshot = GraphSnapshot::capture(&self.source, self.config.plane);
        if snapshot.is_empty() {
            tracing::info!("graph has no nodes, nothing to lay out");
            self.active.store(false, Ordering::SeqCst);
            self.publish(&core);
            return;
        }

        let run = self.start_run(snapshot);
        tracing::info!(
            mode = ?run.mode(),
            nodes = run.snapshot().node_count(),
            edges = run.snapshot().edges.len(),
            "layout initialized"
        );
        core.run = Some(run);
        self.active.store(true, Ordering::SeqCst);
        self.publish(&core);
    }

    fn start_run(&self, snapshot: GraphSnapshot) -> Run {
        let config = &self.config;
        let mut rng = StdRng::seed_from_u64(config.driver.seed);
        let mode = config.resolve_mode(snapshot.node_count());

        match mode {
            LayoutMode::Collision => {
                let mut positions = snapshot.positions.clone();
                separate_coincident(
                    &mut positions,
                    config.force.epsilon,
                    config.refinement.jitter,
                    &mut rng,
                );
                let targets = match config.collision.target {
                    SpringTarget::Origin => vec![Vec2::ZERO; positions.len()],
                    SpringTarget::Initial => snapshot.positions.clone(),
                };
                let sim = CollisionSim::new(
                    positions,
                    targets,
                    config.collision.clone(),
                    config.force.epsilon,
                );
                Run::Collide { snapshot, sim }
            }
            LayoutMode::Simple => {
                let single = HierarchyConfig {
                    max_levels: 1,
                    ..config.hierarchy.clone()
                };
                let params = config.simple.to_force_params();
                let hierarchy =
                    Hierarchy::build(&snapshot.positions, &snapshot.edges, &single, &mut rng);
                let controller = RefinementController::new(
                    hierarchy,
                    config.refinement.clone(),
                    params.epsilon,
                    rng,
                );
                Run::Refine {
                    snapshot,
                    controller,
                    params,
                    mode,
                }
            }
            LayoutMode::Multilevel | LayoutMode::Auto => {
                let params = config.force.clone();
                let hierarchy = Hierarchy::build(
                    &snapshot.positions,
                    &snapshot.edges,
                    &config.hierarchy,
                    &mut rng,
                );
                tracing::debug!(levels = ?hierarchy.level_sizes(), "hierarchy built");
                let controller = RefinementController::new(
                    hierarchy,
                    config.refinement.clone(),
                    params.epsilon,
                    rng,
                );
                Run::Refine {
                    snapshot,
                    controller,
                    params,
                    mode: LayoutMode::Multilevel,
                }
            }
        }
    }

    /// Advance one step if at least one tick interval of wall-clock time has
    /// accumulated. `dt` is the time since the previous call, in seconds.
    pub fn tick(&self, dt: f32) -> TickOutcome {
        self.advance(Some(dt))
    }

    /// Advance one step regardless of the tick interval.
    pub fn step(&self) -> TickOutcome {
        self.advance(None)
    }

    fn advance(&self, dt: Option<f32>) -> TickOutcome {
        if !self.is_active() {
            return TickOutcome::Inactive;
        }

        let mut core = match self.core.try_lock() {
            Ok(core) => core,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                let dropped = self.dropped_ticks.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(dropped, "step in flight, dropping tick");
                if let Ok(mut status) = self.status.try_write() {
                    status.dropped_ticks = dropped;
                }
                return TickOutcome::Dropped;
            }
        };

        if let Some(dt) = dt {
            let interval = self.config.driver.tick_interval;
            if dt.is_finite() && dt > 0.0 {
                core.elapsed += dt;
            }
            if core.elapsed < interval {
                return TickOutcome::Waiting;
            }
            // One step per tick; a long stall does not trigger catch-up steps
            core.elapsed = (core.elapsed - interval).min(interval);
        }

        let outcome = self.step_locked(&mut core);
        self.publish(&core);
        outcome
    }

    fn step_locked(&self, core: &mut Core<W>) -> TickOutcome {
        let time_step = self.config.driver.time_step;
        let Core {
            sink,
            backend,
            run,
            ticks,
            ..
        } = core;
        let Some(run) = run.as_mut() else {
            self.active.store(false, Ordering::SeqCst);
            return TickOutcome::Inactive;
        };
        *ticks += 1;

        match run {
            Run::Collide { snapshot, sim } => {
                sim.step(time_step);
                let batch = snapshot.write_back_batch(
                    &sim.positions,
                    self.config.plane,
                    self.config.pinned_value,
                );
                sink.write_back(&batch);
                TickOutcome::Stepped
            }
            Run::Refine {
                snapshot,
                controller,
                params,
                ..
            } => match controller.tick(&mut **backend, params, time_step) {
                StepResult::Stepped => TickOutcome::Stepped,
                StepResult::LevelChanged { from, to } => {
                    tracing::debug!(from, to, "refining next level");
                    TickOutcome::LevelChanged { from, to }
                }
                StepResult::Converged => {
                    let batch = snapshot.write_back_batch(
                        controller.finest_positions(),
                        self.config.plane,
                        self.config.pinned_value,
                    );
                    sink.write_back(&batch);
                    self.active.store(false, Ordering::SeqCst);
                    tracing::info!(ticks = *ticks, nodes = batch.len(), "layout converged");
                    TickOutcome::Converged
                }
                StepResult::Idle => {
                    self.active.store(false, Ordering::SeqCst);
                    TickOutcome::Inactive
                }
            },
        }
    }

    /// Step back-to-back until the engine deactivates or `max_ticks` steps
    /// have run. Returns the number of steps taken.
    pub fn run_to_convergence(&self, max_ticks: usize) -> usize {
        let mut taken = 0;
        while taken < max_ticks {
            match self.step() {
                TickOutcome::Inactive => break,
                TickOutcome::Converged => {
                    taken += 1;
                    break;
                }
                _ => taken += 1,
            }
        }
        taken
    }

    /// Stop ticking and release the hierarchy, waiting for an in-flight step.
    pub fn clear(&self) {
        self.active.store(false, Ordering::SeqCst);
        let mut core = self.lock_core();
        let released = core.run.take().is_some();
        core.elapsed = 0.0;
        if released {
            tracing::info!("layout cleared");
        }
        self.publish(&core);
    }

    /// Clear and hand the sink back.
    pub fn shutdown(self) -> W {
        self.clear();
        self.core
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .sink
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> EngineStatus {
        let mut status = self
            .status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        status.active = self.is_active();
        status.dropped_ticks = self.dropped_ticks.load(Ordering::Relaxed);
        status
    }

    pub fn dropped_ticks(&self) -> u64 {
        self.dropped_ticks.load(Ordering::Relaxed)
    }

    /// Node positions as they stand, lifted into host space.
    ///
    /// In multilevel mode these are the level-0 positions, which only move
    /// once refinement has reached level 0. Empty when no run is active.
    pub fn current_positions(&self) -> Vec<NodePosition> {
        let core = self.lock_core();
        let Some(run) = &core.run else {
            return Vec::new();
        };
        let positions = match run {
            Run::Refine { controller, .. } => controller.finest_positions(),
            Run::Collide { sim, .. } => sim.positions.as_slice(),
        };
        run.snapshot()
            .write_back_batch(positions, self.config.plane, self.config.pinned_value)
    }

    /// Run `f` against the sink, waiting for any in-flight step.
    pub fn with_sink<R>(&self, f: impl FnOnce(&W) -> R) -> R {
        f(&self.lock_core().sink)
    }

    fn lock_core(&self) -> MutexGuard<'_, Core<W>> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, core: &Core<W>) {
        let mut status = EngineStatus {
            active: self.is_active(),
            ticks: core.ticks,
            dropped_ticks: self.dropped_ticks.load(Ordering::Relaxed),
            ..EngineStatus::default()
        };

        if let Some(run) = &core.run {
            let snapshot = run.snapshot();
            status.mode = Some(run.mode());
            status.node_count = snapshot.node_count();
            status.edge_count = snapshot.edges.len();
            status.dropped_edges = snapshot.dropped_edges;
            if let Run::Refine { controller, .. } = run {
                status.state = Some(controller.state());
                status.active_level = controller.active_level();
                status.level_sizes = controller.hierarchy().level_sizes();
                status.temperature = Some(controller.temperature());
            }
        }

        *self.status.write().unwrap_or_else(PoisonError::into_inner) = status;
    }
}

/// Pick the force backend, falling back to the CPU when the GPU is unusable.
fn make_backend(driver: &DriverConfig) -> Box<dyn ForceBackend> {
    let cpu = CpuBackend::new(driver.parallel_threshold);
    match driver.backend {
        Backend::Cpu => Box::new(cpu),
        #[cfg(feature = "gpu")]
        Backend::Gpu => match crate::gpu::GpuBackend::new() {
            Ok(gpu) => Box::new(gpu),
            Err(err) => {
                tracing::warn!(%err, "GPU backend unavailable, using CPU");
                Box::new(cpu)
            }
        },
        #[cfg(not(feature = "gpu"))]
        Backend::Gpu => {
            tracing::warn!("built without the `gpu` feature, using CPU");
            Box::new(cpu)
        }
    }
}
