// src/spore.rs
//
// =============================================================================
// SPORELAB: SPORE LOGIC (v 0.1 )
// =============================================================================
//
// One sampled state in the phase plane plus its bookkeeping: cost under the
// configured landscape, the cached optimal (control, dt) step, and the
// role/lifecycle tags that replace ad-hoc boolean painting. Color selection
// is a pure function of (role, lifecycle, alive) so the visual layer never
// needs to inspect anything else.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::CostFunction;
use crate::ids::SporeId;
use crate::math::State2;
use crate::pendulum::PendulumSystem;

// ============================================================================
// 1. ROLE & LIFECYCLE
// ============================================================================

/// What the spore *is* in the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SporeRole {
    Normal,
    Goal,
    Ghost,
    Candidate,
}

/// Where the spore is in its evolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Evolving,
    /// Evolution stopped. `merged` records whether completion came from a
    /// trajectory-merge redirect rather than exhaustion.
    Completed { merged: bool },
}

/// Stable color keys for the external visual layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorKey {
    Goal,
    Candidate,
    Ghost,
    Completed,
    Merged,
    Dead,
    Default,
}

// ============================================================================
// 2. THE SPORE
// ============================================================================

#[derive(Debug, Clone)]
pub struct Spore {
    pub id: SporeId,
    pub state_2d: State2,
    pub goal_2d: State2,
    pub cost: f64,
    /// Cached optimizer result. `optimal_dt == 0` means no useful step
    /// exists from here; `check_death` turns that into `alive = false`.
    pub optimal_control: f64,
    pub optimal_dt: f64,
    pub alive: bool,
    pub lifecycle: Lifecycle,
    pub role: SporeRole,
    /// Nominal step length the spore was created with.
    pub dt_nominal: f64,
    cost_function: CostFunction,
}

impl Spore {
    pub fn new(
        id: SporeId,
        dt_nominal: f64,
        goal_2d: State2,
        initial_2d: State2,
        cost_function: CostFunction,
    ) -> Self {
        let cost = cost_function.evaluate(initial_2d, goal_2d);
        Self {
            id,
            state_2d: initial_2d,
            goal_2d,
            cost,
            optimal_control: 0.0,
            optimal_dt: dt_nominal,
            alive: true,
            lifecycle: Lifecycle::Evolving,
            role: SporeRole::Normal,
            dt_nominal,
            cost_function,
        }
    }

    pub fn with_role(mut self, role: SporeRole) -> Self {
        self.role = role;
        self
    }

    // ========================================================================
    // 3. EVOLUTION
    // ========================================================================

    /// Advances the spore by one dynamics step and refreshes its cost.
    pub fn evolve(&mut self, pendulum: &PendulumSystem, control: f64, dt: f64) -> State2 {
        self.state_2d = pendulum.step(self.state_2d, control, dt);
        self.cost = self.cost_function.evaluate(self.state_2d, self.goal_2d);
        self.state_2d
    }

    /// Re-evaluates cost at an explicitly set position (used when a clone
    /// lands on a freshly integrated state).
    pub fn set_state(&mut self, state: State2) {
        self.state_2d = state;
        self.cost = self.cost_function.evaluate(state, self.goal_2d);
    }

    pub fn evaluate_cost(&self, state: State2) -> f64 {
        self.cost_function.evaluate(state, self.goal_2d)
    }

    /// Death check: a non-goal spore with a zero optimal dt has no useful
    /// step left. Never an error, only a signal.
    pub fn check_death(&mut self) {
        if self.optimal_dt == 0.0 && self.role != SporeRole::Goal {
            self.alive = false;
        }
    }

    pub fn mark_completed(&mut self, merged: bool) {
        self.lifecycle = Lifecycle::Completed { merged };
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Completed { .. })
    }

    /// Evolvable iff alive, not completed, and not the goal.
    pub fn can_evolve(&self) -> bool {
        self.alive && !self.is_completed() && self.role != SporeRole::Goal
    }

    // ========================================================================
    // 4. CONTROL SAMPLING (ghost prediction support)
    // ========================================================================

    /// Candidate controls in [-u_max, u_max].
    pub fn sample_controls<R: Rng>(
        &self,
        pendulum: &PendulumSystem,
        n: usize,
        method: ControlSampling,
        rng: &mut R,
    ) -> Vec<f64> {
        let (u_min, u_max) = pendulum.control_bounds();
        match method {
            ControlSampling::Uniform => (0..n).map(|_| rng.gen_range(u_min..=u_max)).collect(),
            ControlSampling::Mesh => {
                if n <= 1 {
                    return vec![0.0];
                }
                let step = (u_max - u_min) / (n - 1) as f64;
                (0..n).map(|i| u_min + step * i as f64).collect()
            }
        }
    }

    /// Next states for a batch of controls, all from the current state.
    pub fn simulate_controls(
        &self,
        pendulum: &PendulumSystem,
        controls: &[f64],
        dt: f64,
    ) -> Vec<State2> {
        controls
            .iter()
            .map(|&u| pendulum.step(self.state_2d, u, dt))
            .collect()
    }

    // ========================================================================
    // 5. COLOR (pure function of role + lifecycle + alive)
    // ========================================================================

    pub fn color_key(&self) -> ColorKey {
        match (self.role, self.lifecycle, self.alive) {
            (SporeRole::Goal, _, _) => ColorKey::Goal,
            (SporeRole::Candidate, _, _) => ColorKey::Candidate,
            (SporeRole::Ghost, _, _) => ColorKey::Ghost,
            (_, Lifecycle::Completed { merged: true }, _) => ColorKey::Merged,
            (_, Lifecycle::Completed { merged: false }, _) => ColorKey::Completed,
            (_, _, false) => ColorKey::Dead,
            (_, _, true) => ColorKey::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSampling {
    Uniform,
    Mesh,
}
