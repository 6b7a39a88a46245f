// src/optimizer.rs
//
// =============================================================================
// SPORELAB: OPTIMAL STEP SELECTOR (v 0.1 )
// =============================================================================
//
// The Step Chooser.
// For one spore, pick the (control, dt) pair that most reduces cost after a
// single dynamics step, subject to u in [-u_max, u_max] and dt in
// [dt_min, dt_max]. The routine is a deterministic bounded search: a coarse
// (control x dt) sweep followed by shrinking coordinate refinement. No
// global-optimum claim; determinism and monotone improvement are the
// contract the evolution loop's termination argument needs.
//
// A best step that fails to improve cost within tolerance snaps dt to 0,
// which downstream reads as the death signal.

use crate::config::OptimizerConfig;
use crate::pendulum::PendulumSystem;
use crate::spore::Spore;

// ============================================================================
// 1. RESULT
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct OptimalStep {
    pub control: f64,
    /// 0.0 means "no useful step exists from here".
    pub dt: f64,
    pub predicted_cost: f64,
    pub improvement: f64,
}

// ============================================================================
// 2. THE OPTIMIZER
// ============================================================================

#[derive(Debug, Clone)]
pub struct SporeOptimizer {
    config: OptimizerConfig,
}

impl SporeOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn find_optimal_step(&self, pendulum: &PendulumSystem, spore: &Spore) -> OptimalStep {
        let (u_min, u_max) = pendulum.control_bounds();
        let cfg = &self.config;
        let current_cost = spore.cost;

        let evaluate = |control: f64, dt: f64| -> f64 {
            let next = pendulum.step(spore.state_2d, control, dt);
            spore.evaluate_cost(next)
        };

        // --- Coarse sweep -------------------------------------------------
        let mut best_control = 0.0;
        let mut best_dt = cfg.dt_min;
        let mut best_cost = f64::INFINITY;

        let control_steps = cfg.control_samples.max(2);
        let dt_steps = cfg.dt_samples.max(2);
        let control_pitch = (u_max - u_min) / (control_steps - 1) as f64;
        let dt_pitch = (cfg.dt_max - cfg.dt_min) / (dt_steps - 1) as f64;

        for ci in 0..control_steps {
            let control = u_min + control_pitch * ci as f64;
            for di in 0..dt_steps {
                let dt = cfg.dt_min + dt_pitch * di as f64;
                let cost = evaluate(control, dt);
                if cost < best_cost {
                    best_cost = cost;
                    best_control = control;
                    best_dt = dt;
                }
            }
        }

        // --- Coordinate refinement ---------------------------------------
        // Alternate shrinking probes on each axis; step sizes halve, so the
        // search stays inside one coarse cell and converges fast.
        let mut control_step = control_pitch;
        let mut dt_step = dt_pitch;
        for _ in 0..cfg.refine_iterations {
            let mut moved = false;

            for candidate in [best_control - control_step, best_control + control_step] {
                let control = candidate.clamp(u_min, u_max);
                let cost = evaluate(control, best_dt);
                if cost < best_cost {
                    best_cost = cost;
                    best_control = control;
                    moved = true;
                }
            }
            for candidate in [best_dt - dt_step, best_dt + dt_step] {
                let dt = candidate.clamp(cfg.dt_min, cfg.dt_max);
                let cost = evaluate(best_control, dt);
                if cost < best_cost {
                    best_cost = cost;
                    best_dt = dt;
                    moved = true;
                }
            }

            if !moved {
                control_step *= 0.5;
                dt_step *= 0.5;
                if control_step < 1e-6 && dt_step < 1e-9 {
                    break;
                }
            }
        }

        // --- Degenerate step detection ------------------------------------
        let improvement = current_cost - best_cost;
        if improvement <= cfg.improvement_tolerance {
            log::debug!(
                "spore {}: no improving step (best delta {:.3e}) -> dt snapped to 0",
                spore.id,
                improvement
            );
            return OptimalStep {
                control: best_control,
                dt: 0.0,
                predicted_cost: current_cost,
                improvement: 0.0,
            };
        }

        OptimalStep {
            control: best_control,
            dt: best_dt,
            predicted_cost: best_cost,
            improvement,
        }
    }
}
