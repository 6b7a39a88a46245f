// src/config.rs
//
// =============================================================================
// SPORELAB: CONFIGURATION TREE (v 0.1 )
// =============================================================================
//
// The Settings Authority.
// One typed tree covering pendulum parameters, cost selection, tree factors,
// merge thresholds (one per call-site category), optimization bounds, the
// spawn region and picker tuning. Loadable from a JSON file; every section
// has defaults so a bare `Config::default()` is a runnable system.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::math::{dist_sq, State2};

// ============================================================================
// 1. PENDULUM & COST
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendulumConfig {
    pub gravity: f64,
    pub length: f64,
    pub mass: f64,
    pub damping: f64,
    /// Control bound: u lies in [-max_control, +max_control].
    pub max_control: f64,
}

impl Default for PendulumConfig {
    fn default() -> Self {
        Self {
            gravity: 9.81,
            length: 2.0,
            mass: 1.0,
            damping: 0.1,
            max_control: 1.0,
        }
    }
}

/// The scalar cost landscape. A closed enum: cost must stay deterministic,
/// so arbitrary runtime callbacks are not representable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CostFunction {
    /// Squared Euclidean distance to the goal state.
    #[default]
    QuadraticDistance,
}

impl CostFunction {
    pub fn evaluate(&self, state: State2, goal: State2) -> f64 {
        match self {
            CostFunction::QuadraticDistance => dist_sq(state, goal),
        }
    }
}

// ============================================================================
// 2. EVOLUTION & OPTIMIZER
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionConfig {
    /// Nominal dt handed to freshly created spores.
    pub dt: f64,
    /// Goal state in the phase plane.
    pub goal_position: State2,
    /// Merge tolerance for trajectory intersection during evolution.
    pub trajectory_merge_tolerance: f64,
    /// Safety bound on evolution steps per activated candidate.
    pub max_steps_per_candidate: usize,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            dt: 0.1,
            goal_position: [std::f64::consts::PI, 0.0],
            trajectory_merge_tolerance: 0.05,
            max_steps_per_candidate: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Bounds on the step duration searched per spore.
    pub dt_min: f64,
    pub dt_max: f64,
    /// Grid resolution of the coarse (control x dt) sweep.
    pub control_samples: usize,
    pub dt_samples: usize,
    /// Refinement passes after the coarse sweep.
    pub refine_iterations: usize,
    /// Below this cost improvement the step is considered useless and
    /// dt* snaps to 0 (the death signal).
    pub improvement_tolerance: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            dt_min: 0.001,
            dt_max: 0.2,
            control_samples: 21,
            dt_samples: 20,
            refine_iterations: 24,
            improvement_tolerance: 1e-9,
        }
    }
}

// ============================================================================
// 3. TREE & PAIR OPTIMIZATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Grandchild |dt| = parent |dt| * this factor (unless overridden).
    pub dt_grandchildren_factor: f64,
    /// Merge tolerance for close grandchildren inside one tree.
    pub grandchild_merge_threshold: f64,
    /// Default expansion depth (1 = children only, 2 = full fan).
    pub depth: u8,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            dt_grandchildren_factor: 0.2,
            grandchild_merge_threshold: 1e-3,
            depth: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaOptimizationConfig {
    /// Pair meeting distance each grandchild pair must satisfy.
    pub constraint_distance: f64,
    /// Box bounds on every entry of the 12-dim dt vector. The upper bound
    /// is additionally capped by the dt manager's current dt at call time.
    pub dt_lo: f64,
    pub dt_hi: f64,
    pub max_iterations: usize,
}

impl Default for AreaOptimizationConfig {
    fn default() -> Self {
        Self {
            constraint_distance: 1e-3,
            dt_lo: 0.001,
            dt_hi: 0.2,
            max_iterations: 1500,
        }
    }
}

// ============================================================================
// 4. SPAWN, BUFFER, PICKER, DT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnConfig {
    /// Axis-aligned spawn rectangle, phase-plane coordinates.
    pub min_corner: State2,
    pub max_corner: State2,
    /// Poisson-disk radius for candidate generation.
    pub min_radius: f64,
    /// Fixed RNG seed for reproducible candidate fields; None = entropy.
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            min_corner: [-1.0, -1.0],
            max_corner: [1.0, 1.0],
            min_radius: 0.3,
            rng_seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Epsilon-collapse threshold for ghost -> buffer deduplication.
    pub distance_threshold: f64,
    /// Where the real-graph snapshot lands after each materialization.
    pub snapshot_path: String,
    /// Optional buffer-graph export emitted before the buffer is wiped.
    pub buffer_export_path: Option<String>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            distance_threshold: 1.5e-3,
            snapshot_path: "buffer/real_graph_latest.json".into(),
            buffer_export_path: Some("buffer/buffer_graph_latest.json".into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickerConfig {
    /// Spores closer than this to the look point count as "close".
    pub distance_threshold: f64,
    pub verbose: bool,
}

impl Default for PickerConfig {
    fn default() -> Self {
        Self {
            distance_threshold: 0.05,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DtConfig {
    pub initial_dt: f64,
}

impl Default for DtConfig {
    fn default() -> Self {
        Self { initial_dt: 0.05 }
    }
}

// ============================================================================
// 5. THE ROOT
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pendulum: PendulumConfig,
    #[serde(default)]
    pub cost: CostFunction,
    #[serde(default)]
    pub evolution: EvolutionConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub tree: TreeConfig,
    #[serde(default)]
    pub area_optimization: AreaOptimizationConfig,
    #[serde(default)]
    pub spawn: SpawnConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub picker: PickerConfig,
    #[serde(default)]
    pub dt: DtConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.pendulum.max_control > 0.0, "max_control must be positive");
        anyhow::ensure!(self.pendulum.length > 0.0, "pendulum length must be positive");
        anyhow::ensure!(
            self.optimizer.dt_min > 0.0 && self.optimizer.dt_min < self.optimizer.dt_max,
            "optimizer dt bounds must satisfy 0 < dt_min < dt_max"
        );
        anyhow::ensure!(
            self.area_optimization.dt_lo > 0.0
                && self.area_optimization.dt_lo < self.area_optimization.dt_hi,
            "area optimization dt bounds must satisfy 0 < dt_lo < dt_hi"
        );
        anyhow::ensure!(
            self.spawn.min_corner[0] < self.spawn.max_corner[0]
                && self.spawn.min_corner[1] < self.spawn.max_corner[1],
            "spawn region must have positive extent"
        );
        Ok(())
    }
}
