//! Engine configuration
//!
//! Every tunable has a `DEFAULT_*` constant and every section implements
//! `Default`, so a configuration file only needs the values it changes.
//! The coarsening ratio, far-field scale and jitter bound are empirical
//! knobs, not invariants.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LayoutError, Result};
use crate::geometry::Plane;

// =============================================================================
// Default Constants
// =============================================================================

/// Default repulsion strength between every pair of nodes
pub const DEFAULT_REPULSION_STRENGTH: f32 = 100_000.0;

/// Default distance below which repulsion switches to the inverse-square regime
pub const DEFAULT_MIN_DISTANCE_TO_REPEL: f32 = 10.0;

/// Default scale of the inverse-cube far-field regime (continuous at d = 10)
pub const DEFAULT_FAR_FIELD_SCALE: f32 = 0.1;

/// Default spring strength for the logarithmic multilevel springs
pub const DEFAULT_ATTRACTION_STRENGTH: f32 = 2.0;

/// Default ideal edge length
pub const DEFAULT_IDEAL_LENGTH: f32 = 50.0;

/// Default velocity damping factor (0-1, applied each step)
pub const DEFAULT_DAMPING: f32 = 0.8;

/// Default displacement clamp at temperature 1.0
pub const DEFAULT_MAX_DISPLACEMENT_SCALE: f32 = 20.0;

/// Default maximum speed (prevents numerical explosion)
pub const DEFAULT_MAX_VELOCITY: f32 = 100.0;

/// Default distance below which two positions count as coincident
pub const DEFAULT_EPSILON: f32 = 1e-4;

/// Default spring strength for the simple linear-spring variant
pub const DEFAULT_SIMPLE_ATTRACTION_STRENGTH: f32 = 0.1;

/// Default pull toward the origin for the simple variant
pub const DEFAULT_CENTER_STRENGTH: f32 = 0.001;

/// Default cap on hierarchy depth
pub const DEFAULT_MAX_LEVELS: usize = 20;

/// Default level size at which coarsening stops
pub const DEFAULT_MIN_COARSE_SIZE: usize = 10;

/// Default threshold for an effective coarsening pass (next/current node count)
pub const DEFAULT_COARSENING_RATIO: f32 = 0.9;

/// Default temperature on Initialize and after each level transition
pub const DEFAULT_START_TEMPERATURE: f32 = 1.0;

/// Default multiplicative cooling per tick
pub const DEFAULT_COOLING_FACTOR: f32 = 0.99;

/// Default temperature floor
pub const DEFAULT_MIN_TEMPERATURE: f32 = 0.01;

/// Default temperature below which the active level counts as converged
pub const DEFAULT_REFINE_THRESHOLD: f32 = 0.1;

/// Default half-width of the prolongation jitter box
pub const DEFAULT_JITTER: f32 = 5.0;

/// Default spring stiffness toward the collision-mode target
pub const DEFAULT_STIFFNESS: f32 = 0.05;

/// Default velocity damping of the collision-mode spring
pub const DEFAULT_SPRING_DAMPING: f32 = 0.3;

/// Default collider radius per node
pub const DEFAULT_COLLIDER_RADIUS: f32 = 10.0;

/// Default scale of the collision impulse
pub const DEFAULT_RESPONSE_STRENGTH: f32 = 1.0;

/// Default wall-clock interval between simulation steps (60 Hz)
pub const DEFAULT_TICK_INTERVAL: f32 = 1.0 / 60.0;

/// Default integration time step per simulation step
pub const DEFAULT_TIME_STEP: f32 = 1.0;

/// Default seed for matching order and jitter
pub const DEFAULT_SEED: u64 = 0x5eed;

/// Default node count from which the CPU backend goes parallel
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 256;

/// Default node count up to which `auto` mode picks the collision simulation
pub const DEFAULT_AUTO_COLLISION_MAX_NODES: usize = 16;

// =============================================================================
// Sections
// =============================================================================

/// Which force law the kernel applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForceModel {
    /// Linear springs, constant repulsion, centering force, no displacement clamp.
    Simple,
    /// Logarithmic springs, temperature-scaled repulsion, displacement clamp.
    #[default]
    Multilevel,
}

/// Parameters of the force kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceParams {
    pub model: ForceModel,
    pub repulsion_strength: f32,
    pub min_distance_to_repel: f32,
    pub far_field_scale: f32,
    pub attraction_strength: f32,
    pub ideal_length: f32,
    pub damping: f32,
    pub max_displacement_scale: f32,
    pub max_velocity: f32,
    /// Spring-to-origin strength, simple model only
    pub center_strength: f32,
    pub epsilon: f32,
}

impl Default for ForceParams {
    fn default() -> Self {
        Self {
            model: ForceModel::Multilevel,
            repulsion_strength: DEFAULT_REPULSION_STRENGTH,
            min_distance_to_repel: DEFAULT_MIN_DISTANCE_TO_REPEL,
            far_field_scale: DEFAULT_FAR_FIELD_SCALE,
            attraction_strength: DEFAULT_ATTRACTION_STRENGTH,
            ideal_length: DEFAULT_IDEAL_LENGTH,
            damping: DEFAULT_DAMPING,
            max_displacement_scale: DEFAULT_MAX_DISPLACEMENT_SCALE,
            max_velocity: DEFAULT_MAX_VELOCITY,
            center_strength: 0.0,
            epsilon: DEFAULT_EPSILON,
        }
    }
}

/// Parameters of the single-level linear-spring variant.
///
/// Kept apart from [`ForceParams`] because linear springs need a much weaker
/// constant than the logarithmic ones to integrate stably.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimpleParams {
    pub repulsion_strength: f32,
    pub min_distance_to_repel: f32,
    pub far_field_scale: f32,
    pub attraction_strength: f32,
    pub center_strength: f32,
    pub damping: f32,
    pub max_velocity: f32,
}

impl Default for SimpleParams {
    fn default() -> Self {
        Self {
            repulsion_strength: DEFAULT_REPULSION_STRENGTH,
            min_distance_to_repel: DEFAULT_MIN_DISTANCE_TO_REPEL,
            far_field_scale: DEFAULT_FAR_FIELD_SCALE,
            attraction_strength: DEFAULT_SIMPLE_ATTRACTION_STRENGTH,
            center_strength: DEFAULT_CENTER_STRENGTH,
            damping: DEFAULT_DAMPING,
            max_velocity: DEFAULT_MAX_VELOCITY,
        }
    }
}

impl SimpleParams {
    /// Kernel parameters for the simple model.
    pub fn to_force_params(&self) -> ForceParams {
        ForceParams {
            model: ForceModel::Simple,
            repulsion_strength: self.repulsion_strength,
            min_distance_to_repel: self.min_distance_to_repel,
            far_field_scale: self.far_field_scale,
            attraction_strength: self.attraction_strength,
            center_strength: self.center_strength,
            damping: self.damping,
            max_velocity: self.max_velocity,
            ..ForceParams::default()
        }
    }
}

/// Parameters of the coarsening pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyConfig {
    pub max_levels: usize,
    pub min_coarse_size: usize,
    /// A pass that keeps at least this fraction of nodes ends construction
    pub coarsening_ratio: f32,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            max_levels: DEFAULT_MAX_LEVELS,
            min_coarse_size: DEFAULT_MIN_COARSE_SIZE,
            coarsening_ratio: DEFAULT_COARSENING_RATIO,
        }
    }
}

/// Annealing schedule and prolongation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    pub start_temperature: f32,
    pub cooling_factor: f32,
    pub min_temperature: f32,
    pub refine_threshold: f32,
    pub jitter: f32,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            start_temperature: DEFAULT_START_TEMPERATURE,
            cooling_factor: DEFAULT_COOLING_FACTOR,
            min_temperature: DEFAULT_MIN_TEMPERATURE,
            refine_threshold: DEFAULT_REFINE_THRESHOLD,
            jitter: DEFAULT_JITTER,
        }
    }
}

/// Where the collision-mode spring pulls each node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpringTarget {
    #[default]
    Origin,
    /// The position the node had at Initialize
    Initial,
}

/// Parameters of the collision/spring micro-simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionParams {
    pub stiffness: f32,
    pub damping: f32,
    pub collider_radius: f32,
    pub response_strength: f32,
    pub target: SpringTarget,
}

impl Default for CollisionParams {
    fn default() -> Self {
        Self {
            stiffness: DEFAULT_STIFFNESS,
            damping: DEFAULT_SPRING_DAMPING,
            collider_radius: DEFAULT_COLLIDER_RADIUS,
            response_strength: DEFAULT_RESPONSE_STRENGTH,
            target: SpringTarget::Origin,
        }
    }
}

/// Execution backend for force accumulation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Cpu,
    /// wgpu compute shader; requires the `gpu` feature, falls back to CPU otherwise
    Gpu,
}

/// Simulation driver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Seconds of wall-clock time between steps
    pub tick_interval: f32,
    /// Integration step handed to the kernel
    pub time_step: f32,
    pub seed: u64,
    pub backend: Backend,
    pub parallel_threshold: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            time_step: DEFAULT_TIME_STEP,
            seed: DEFAULT_SEED,
            backend: Backend::Cpu,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

/// Which simulation the engine runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutMode {
    /// Coarsen, then refine level by level
    #[default]
    Multilevel,
    /// One level, linear springs
    Simple,
    /// Spring-to-target plus collisions, never converges
    Collision,
    /// Collision for small graphs, multilevel otherwise
    Auto,
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub mode: LayoutMode,
    pub auto_collision_max_nodes: usize,
    pub plane: Plane,
    /// Overrides each node's own pinned coordinate on write-back
    pub pinned_value: Option<f32>,
    pub force: ForceParams,
    pub simple: SimpleParams,
    pub hierarchy: HierarchyConfig,
    pub refinement: RefinementConfig,
    pub collision: CollisionParams,
    pub driver: DriverConfig,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            mode: LayoutMode::default(),
            auto_collision_max_nodes: DEFAULT_AUTO_COLLISION_MAX_NODES,
            plane: Plane::default(),
            pinned_value: None,
            force: ForceParams::default(),
            simple: SimpleParams::default(),
            hierarchy: HierarchyConfig::default(),
            refinement: RefinementConfig::default(),
            collision: CollisionParams::default(),
            driver: DriverConfig::default(),
        }
    }
}

impl LayoutConfig {
    /// Load a configuration file, choosing the parser from the extension.
    ///
    /// Supports `.yaml`/`.yml` and `.json`. The result is validated.
    pub fn load(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| LayoutError::UnknownExtension(path.display().to_string()))?;

        let text = std::fs::read_to_string(path)?;
        let config: LayoutConfig = match ext.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&text)?,
            "json" => serde_json::from_str(&text)?,
            other => return Err(LayoutError::UnsupportedFormat(other.to_string())),
        };
        config.validate()?;
        Ok(config)
    }

    /// Pick the concrete mode for a graph of `node_count` nodes.
    pub fn resolve_mode(&self, node_count: usize) -> LayoutMode {
        match self.mode {
            LayoutMode::Auto if node_count <= self.auto_collision_max_nodes => {
                LayoutMode::Collision
            }
            LayoutMode::Auto => LayoutMode::Multilevel,
            mode => mode,
        }
    }

    /// Reject values that would stall the annealing schedule or blow up integration.
    pub fn validate(&self) -> Result<()> {
        let r = &self.refinement;
        if !(r.cooling_factor > 0.0 && r.cooling_factor < 1.0) {
            return invalid(format!(
                "refinement.cooling_factor must be in (0, 1), got {}",
                r.cooling_factor
            ));
        }
        if !(r.min_temperature >= 0.0 && r.min_temperature < r.refine_threshold) {
            return invalid(format!(
                "refinement.min_temperature ({}) must lie in [0, refine_threshold ({}))",
                r.min_temperature, r.refine_threshold
            ));
        }
        if !(r.start_temperature > 0.0 && r.start_temperature.is_finite()) {
            return invalid(format!(
                "refinement.start_temperature must be positive, got {}",
                r.start_temperature
            ));
        }
        if !(r.jitter >= 0.0 && r.jitter.is_finite()) {
            return invalid(format!(
                "refinement.jitter must be non-negative, got {}",
                r.jitter
            ));
        }

        let h = &self.hierarchy;
        if h.max_levels == 0 {
            return invalid("hierarchy.max_levels must be at least 1".to_string());
        }
        if !(h.coarsening_ratio > 0.0 && h.coarsening_ratio <= 1.0) {
            return invalid(format!(
                "hierarchy.coarsening_ratio must be in (0, 1], got {}",
                h.coarsening_ratio
            ));
        }

        let simple = self.simple.to_force_params();
        for (name, f) in [("force", &self.force), ("simple", &simple)] {
            if !(f.damping >= 0.0 && f.damping <= 1.0) {
                return invalid(format!("{name}.damping must be in [0, 1], got {}", f.damping));
            }
            if !(f.epsilon > 0.0) {
                return invalid(format!("{name}.epsilon must be positive, got {}", f.epsilon));
            }
            if !(f.ideal_length > 0.0) {
                return invalid(format!(
                    "{name}.ideal_length must be positive, got {}",
                    f.ideal_length
                ));
            }
            if !(f.far_field_scale > 0.0) {
                return invalid(format!(
                    "{name}.far_field_scale must be positive, got {}",
                    f.far_field_scale
                ));
            }
            if !(f.max_velocity > 0.0) {
                return invalid(format!(
                    "{name}.max_velocity must be positive, got {}",
                    f.max_velocity
                ));
            }
        }

        let d = &self.driver;
        if !(d.tick_interval > 0.0 && d.tick_interval.is_finite()) {
            return invalid(format!(
                "driver.tick_interval must be positive, got {}",
                d.tick_interval
            ));
        }
        if !(d.time_step > 0.0 && d.time_step.is_finite()) {
            return invalid(format!(
                "driver.time_step must be positive, got {}",
                d.time_step
            ));
        }

        if !(self.collision.collider_radius >= 0.0) {
            return invalid(format!(
                "collision.collider_radius must be non-negative, got {}",
                self.collision.collider_radius
            ));
        }

        Ok(())
    }
}

fn invalid(message: String) -> Result<()> {
    Err(LayoutError::InvalidConfig(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = LayoutConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.simple.to_force_params().model, ForceModel::Simple);
        assert_eq!(config.force.model, ForceModel::Multilevel);
        assert_eq!(config.auto_collision_max_nodes, DEFAULT_AUTO_COLLISION_MAX_NODES);
    }

    #[test]
    fn far_field_is_continuous_at_default_threshold() {
        let p = ForceParams::default();
        let d = p.min_distance_to_repel;
        let near = p.repulsion_strength / (d * d);
        let far = p.repulsion_strength / (d * d * d * p.far_field_scale);
        assert!((near - far).abs() / near < 1e-5);
    }

    #[test]
    fn rejects_non_converging_schedule() {
        let mut config = LayoutConfig::default();
        config.refinement.min_temperature = 0.2;
        config.refinement.refine_threshold = 0.1;
        assert!(matches!(
            config.validate(),
            Err(LayoutError::InvalidConfig(_))
        ));

        let mut config = LayoutConfig::default();
        config.refinement.cooling_factor = 1.0;
        assert!(config.validate().is_err());

        let mut config = LayoutConfig::default();
        config.driver.tick_interval = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn auto_mode_picks_collision_for_small_graphs() {
        let mut config = LayoutConfig::default();
        config.mode = LayoutMode::Auto;
        assert_eq!(config.resolve_mode(3), LayoutMode::Collision);
        assert_eq!(config.resolve_mode(500), LayoutMode::Multilevel);

        config.mode = LayoutMode::Simple;
        assert_eq!(config.resolve_mode(3), LayoutMode::Simple);
    }

    #[test]
    fn loads_partial_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();

        let yaml = dir.path().join("layout.yaml");
        std::fs::write(
            &yaml,
            "mode: collision\nplane: xz\nrefinement:\n  jitter: 2.5\ndriver:\n  seed: 7\n",
        )
        .unwrap();
        let config = LayoutConfig::load(&yaml).unwrap();
        assert_eq!(config.mode, LayoutMode::Collision);
        assert_eq!(config.plane, Plane::Xz);
        assert_eq!(config.refinement.jitter, 2.5);
        assert_eq!(config.refinement.cooling_factor, DEFAULT_COOLING_FACTOR);
        assert_eq!(config.driver.seed, 7);

        let json = dir.path().join("layout.json");
        std::fs::write(&json, r#"{"hierarchy": {"min_coarse_size": 2}}"#).unwrap();
        let config = LayoutConfig::load(&json).unwrap();
        assert_eq!(config.hierarchy.min_coarse_size, 2);
        assert_eq!(config.hierarchy.max_levels, DEFAULT_MAX_LEVELS);
    }

    #[test]
    fn load_rejects_unknown_formats() {
        let dir = tempfile::tempdir().unwrap();
        let toml = dir.path().join("layout.toml");
        std::fs::write(&toml, "mode = 'simple'").unwrap();
        assert!(matches!(
            LayoutConfig::load(&toml),
            Err(LayoutError::UnsupportedFormat(_))
        ));

        let bare = dir.path().join("layout");
        std::fs::write(&bare, "").unwrap();
        assert!(matches!(
            LayoutConfig::load(&bare),
            Err(LayoutError::UnknownExtension(_))
        ));
    }
}
