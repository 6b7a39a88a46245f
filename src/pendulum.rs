// src/pendulum.rs
//
// =============================================================================
// SPORELAB: PENDULUM DYNAMICS (v 0.1 )
// =============================================================================
//
// The Physics Core.
// Single-link damped pendulum with scalar torque input. The planner never
// integrates the nonlinear system directly: it linearizes around the current
// state, discretizes via the augmented matrix exponential, and takes one
// exact step of the linearized map. Both expensive stages are memoized.
//
// Cache keys (fixed by contract):
// - Linearization: theta rounded to 1e-6.
// - Discretization: (bits of A, bits of B, dt rounded to 1e-8).

use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::PendulumConfig;
use crate::math::{expm_augmented, rounded_key, Mat2, State2};

const THETA_PRECISION: f64 = 1e-6;
const DT_PRECISION: f64 = 1e-8;

type DiscretizationKey = ([u64; 4], [u64; 2], i64);

// ============================================================================
// 1. THE SYSTEM
// ============================================================================

/// Immutable pendulum parameters plus interior memo caches.
#[derive(Debug)]
pub struct PendulumSystem {
    pub gravity: f64,
    pub length: f64,
    pub mass: f64,
    pub damping: f64,
    pub max_control: f64,

    linearization_cache: Mutex<HashMap<i64, (Mat2, State2)>>,
    discretization_cache: Mutex<HashMap<DiscretizationKey, (Mat2, State2)>>,
}

impl PendulumSystem {
    pub fn new(config: &PendulumConfig) -> Self {
        Self {
            gravity: config.gravity,
            length: config.length,
            mass: config.mass,
            damping: config.damping,
            max_control: config.max_control,
            linearization_cache: Mutex::new(HashMap::new()),
            discretization_cache: Mutex::new(HashMap::new()),
        }
    }

    /// (u_min, u_max) — the admissible control interval.
    pub fn control_bounds(&self) -> (f64, f64) {
        (-self.max_control, self.max_control)
    }

    // ========================================================================
    // 2. LINEARIZATION
    // ========================================================================

    /// Continuous-time (A, B) of the pendulum linearized at `state`.
    ///
    /// A = [[0, 1], [-(g/l) cos(theta), -d]],  B = [0, 1].
    pub fn linearize(&self, state: State2) -> (Mat2, State2) {
        let theta = state[0];
        let key = rounded_key(theta, THETA_PRECISION);

        if let Some(&cached) = self.linearization_cache.lock().unwrap().get(&key) {
            return cached;
        }

        let a = Mat2::new(
            0.0,
            1.0,
            -self.gravity / self.length * theta.cos(),
            -self.damping,
        );
        let b = [0.0, 1.0];

        self.linearization_cache.lock().unwrap().insert(key, (a, b));
        (a, b)
    }

    // ========================================================================
    // 3. DISCRETIZATION
    // ========================================================================

    /// Discrete (A_d, B_d) for step length `dt`, via exp([[A,B],[0,0]] dt).
    /// Negative dt yields the exact backward-time map.
    pub fn discretize(&self, a: Mat2, b: State2, dt: f64) -> (Mat2, State2) {
        let key = (
            a.bits(),
            [b[0].to_bits(), b[1].to_bits()],
            rounded_key(dt, DT_PRECISION),
        );

        if let Some(&cached) = self.discretization_cache.lock().unwrap().get(&key) {
            return cached;
        }

        let result = expm_augmented(a, b, dt);
        self.discretization_cache.lock().unwrap().insert(key, result);
        result
    }

    // ========================================================================
    // 4. STEPPING
    // ========================================================================

    /// One step of the linearized-then-discretized dynamics:
    /// state' = A_d * state + B_d * u.
    pub fn step(&self, state: State2, control: f64, dt: f64) -> State2 {
        let (a, b) = self.linearize(state);
        let (a_d, b_d) = self.discretize(a, b, dt);
        let drift = a_d.mul_vec(state);
        [drift[0] + b_d[0] * control, drift[1] + b_d[1] * control]
    }

    /// (linearization entries, discretization entries) — cache telemetry.
    pub fn cache_sizes(&self) -> (usize, usize) {
        (
            self.linearization_cache.lock().unwrap().len(),
            self.discretization_cache.lock().unwrap().len(),
        )
    }
}
