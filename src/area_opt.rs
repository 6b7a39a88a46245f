// src/area_opt.rs
//
// =============================================================================
// SPORELAB: PAIR OPTIMIZER (v 0.1 )
// =============================================================================
//
// The Area Maximizer.
// Works on a sorted, paired tree: adjust the 12 dt magnitudes (4 children +
// 8 grandchildren) so that each of the 4 grandchild pairs meets within the
// constraint distance, while the quadrilateral spanned by the 4 pair
// midpoints keeps as much area as possible.
//
// The constrained solve is an exterior-penalty descent: the meeting
// constraints enter as quadratic penalties whose weight escalates over a
// few stages, and each stage runs bounded coordinate descent with shrinking
// probes. Deterministic, iteration-capped, and every returned vector is
// clamped into [dt_lo, min(dt_hi, current dt)] before it leaves.
//
// Numerical failure is soft: the routine returns None and puts the tree
// back exactly as it found it.

use crate::config::AreaOptimizationConfig;
use crate::error::PlannerError;
use crate::math::polygon_area;
use crate::pendulum::PendulumSystem;
use crate::tree::{SporeTree, DT_VECTOR_LEN};

// Penalty escalation schedule for the meeting constraints.
const PENALTY_STAGES: [f64; 3] = [1e3, 1e5, 1e7];

// ============================================================================
// 1. RESULT
// ============================================================================

#[derive(Debug, Clone)]
pub struct AreaOptimizationResult {
    pub success: bool,
    pub original_area: f64,
    pub optimized_area: f64,
    pub improvement: f64,
    pub improvement_percent: f64,
    /// Meeting distance of each sorted pair at the returned vector.
    pub pair_distances: [f64; 4],
    /// max(0, distance - constraint) over the pairs.
    pub max_constraint_violation: f64,
    pub optimized_dt_vector: [f64; DT_VECTOR_LEN],
    pub evaluations: usize,
}

// ============================================================================
// 2. THE OPTIMIZER
// ============================================================================

pub struct PairOptimizer {
    config: AreaOptimizationConfig,
}

impl PairOptimizer {
    pub fn new(config: AreaOptimizationConfig) -> Self {
        Self { config }
    }

    /// Runs the constrained area optimization on `tree`.
    ///
    /// On success the tree is left with the optimized vector applied and the
    /// diagnostics describe it. On soft failure (no feasible point found, or
    /// degenerate bounds) the tree is restored and None is returned.
    ///
    /// `current_dt` caps the upper box bound; the result never exceeds it.
    pub fn optimize(
        &self,
        tree: &mut SporeTree,
        pendulum: &PendulumSystem,
        current_dt: f64,
    ) -> Result<Option<AreaOptimizationResult>, PlannerError> {
        if !tree.is_sorted() {
            return Err(PlannerError::TreeStage("sorting before pair optimization"));
        }

        let dt_lo = self.config.dt_lo;
        let dt_hi = self.config.dt_hi.min(current_dt);
        if dt_hi <= dt_lo {
            log::warn!(
                "pair optimization skipped: empty dt box [{dt_lo:.4}, {dt_hi:.4}]"
            );
            return Ok(None);
        }

        let eps = self.config.constraint_distance;
        let original = tree.dt_vector()?;
        let mut x: [f64; DT_VECTOR_LEN] = original;
        for v in x.iter_mut() {
            *v = v.clamp(dt_lo, dt_hi);
        }

        let mut evaluations = 0usize;

        // Single merit evaluation: apply the vector, read area + distances.
        let measure = |tree: &mut SporeTree,
                       vector: &[f64; DT_VECTOR_LEN],
                       evals: &mut usize|
         -> Result<(f64, [f64; 4]), PlannerError> {
            *evals += 1;
            tree.apply_dt_vector(pendulum, vector, true)?;
            let means = tree.mean_points.expect("means recomputed");
            let area = polygon_area(&means);
            let distances = tree.pair_distances()?;
            Ok((area, distances))
        };

        let (original_area, original_distances) = measure(tree, &x, &mut evaluations)?;

        let merit = |area: f64, distances: &[f64; 4], mu: f64| -> f64 {
            let mut penalty = 0.0;
            for &d in distances {
                let violation = (d - eps).max(0.0);
                penalty += violation * violation;
            }
            -area + mu * penalty
        };

        // --- Penalty descent ---------------------------------------------
        let mut best_x = x;
        let (mut best_area, mut best_distances) = (original_area, original_distances);

        for &mu in PENALTY_STAGES.iter() {
            let mut step = (dt_hi - dt_lo) * 0.25;
            let mut current_merit = merit(best_area, &best_distances, mu);

            while evaluations < self.config.max_iterations && step > 1e-7 {
                let mut moved = false;

                for coord in 0..DT_VECTOR_LEN {
                    for direction in [-1.0, 1.0] {
                        if evaluations >= self.config.max_iterations {
                            break;
                        }
                        let mut probe = best_x;
                        probe[coord] = (probe[coord] + direction * step).clamp(dt_lo, dt_hi);
                        if (probe[coord] - best_x[coord]).abs() < 1e-12 {
                            continue;
                        }
                        let (area, distances) = measure(tree, &probe, &mut evaluations)?;
                        let probe_merit = merit(area, &distances, mu);
                        if probe_merit < current_merit {
                            current_merit = probe_merit;
                            best_x = probe;
                            best_area = area;
                            best_distances = distances;
                            moved = true;
                        }
                    }
                }

                if !moved {
                    step *= 0.5;
                }
            }

            if evaluations >= self.config.max_iterations {
                break;
            }
        }

        // --- Feasibility verdict ------------------------------------------
        let max_violation = best_distances
            .iter()
            .map(|&d| (d - eps).max(0.0))
            .fold(0.0, f64::max);

        let original_feasible = original_distances.iter().all(|&d| d <= eps);
        let optimized_feasible = max_violation <= 0.0;

        // Prefer the feasible vector with the larger area; with only the
        // optimized one feasible it wins outright.
        let (chosen, chosen_area, chosen_distances) = match (optimized_feasible, original_feasible)
        {
            (true, true) if original_area > best_area => {
                (original, original_area, original_distances)
            }
            (true, _) => (best_x, best_area, best_distances),
            (false, true) => (original, original_area, original_distances),
            (false, false) => {
                log::warn!(
                    "pair optimization failed: max violation {max_violation:.3e} after {evaluations} evaluations"
                );
                tree.apply_dt_vector(pendulum, &original, true)?;
                return Ok(None);
            }
        };

        // Clamp is structural: nothing above dt_hi may escape.
        let mut final_vector = chosen;
        for v in final_vector.iter_mut() {
            *v = v.clamp(dt_lo, dt_hi);
        }
        tree.apply_dt_vector(pendulum, &final_vector, true)?;

        let improvement = chosen_area - original_area;
        let result = AreaOptimizationResult {
            success: true,
            original_area,
            optimized_area: chosen_area,
            improvement,
            improvement_percent: if original_area.abs() > 1e-12 {
                improvement / original_area * 100.0
            } else {
                0.0
            },
            pair_distances: chosen_distances,
            max_constraint_violation: chosen_distances
                .iter()
                .map(|&d| (d - eps).max(0.0))
                .fold(0.0, f64::max),
            optimized_dt_vector: final_vector,
            evaluations,
        };

        log::info!(
            "pair optimization: area {:.3e} -> {:.3e} ({} evals, max violation {:.2e})",
            result.original_area,
            result.optimized_area,
            result.evaluations,
            result.max_constraint_violation
        );
        Ok(Some(result))
    }
}
