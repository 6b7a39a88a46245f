// src/spawn.rs
//
// =============================================================================
// SPORELAB: SPAWN AREA (v 0.1 )
// =============================================================================
//
// The Seeding Ground.
// A rectangular region of the phase plane that candidate spores are drawn
// from: either one uniform point, or a blue-noise set via Bridson's
// Poisson-disk sampling so candidates keep a minimum mutual distance.

use rand::Rng;

use crate::config::SpawnConfig;
use crate::math::{dist, State2};

// Bridson: attempts per active point before it retires.
const POISSON_ATTEMPTS: usize = 30;

#[derive(Debug, Clone)]
pub struct SpawnArea {
    pub min_corner: State2,
    pub max_corner: State2,
}

impl SpawnArea {
    pub fn new(config: &SpawnConfig) -> Self {
        Self {
            min_corner: config.min_corner,
            max_corner: config.max_corner,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_corner[0] - self.min_corner[0]
    }

    pub fn height(&self) -> f64 {
        self.max_corner[1] - self.min_corner[1]
    }

    pub fn contains(&self, p: State2) -> bool {
        p[0] >= self.min_corner[0]
            && p[0] <= self.max_corner[0]
            && p[1] >= self.min_corner[1]
            && p[1] <= self.max_corner[1]
    }

    /// One uniform point inside the rectangle.
    pub fn sample_random_point<R: Rng>(&self, rng: &mut R) -> State2 {
        [
            rng.gen_range(self.min_corner[0]..=self.max_corner[0]),
            rng.gen_range(self.min_corner[1]..=self.max_corner[1]),
        ]
    }

    /// Poisson-disk sample set with minimum mutual distance `min_radius`
    /// (Bridson's algorithm). A radius larger than the region itself yields
    /// an empty set rather than an error.
    pub fn sample_poisson_disk<R: Rng>(&self, rng: &mut R, min_radius: f64) -> Vec<State2> {
        let diagonal = (self.width() * self.width() + self.height() * self.height()).sqrt();
        if min_radius <= 0.0 || min_radius > diagonal {
            return Vec::new();
        }

        // Background grid with cell size r / sqrt(2): at most one sample per cell.
        let cell = min_radius / std::f64::consts::SQRT_2;
        let grid_w = (self.width() / cell).ceil() as usize + 1;
        let grid_h = (self.height() / cell).ceil() as usize + 1;
        let mut grid: Vec<Option<usize>> = vec![None; grid_w * grid_h];

        let cell_of = |p: State2| -> (usize, usize) {
            let gx = ((p[0] - self.min_corner[0]) / cell) as usize;
            let gy = ((p[1] - self.min_corner[1]) / cell) as usize;
            (gx.min(grid_w - 1), gy.min(grid_h - 1))
        };

        let mut samples: Vec<State2> = Vec::new();
        let mut active: Vec<usize> = Vec::new();

        let first = self.sample_random_point(rng);
        let (gx, gy) = cell_of(first);
        grid[gy * grid_w + gx] = Some(0);
        samples.push(first);
        active.push(0);

        while !active.is_empty() {
            let slot = rng.gen_range(0..active.len());
            let base = samples[active[slot]];
            let mut placed = false;

            for _ in 0..POISSON_ATTEMPTS {
                // Annulus [r, 2r] around the active sample.
                let angle = rng.gen_range(0.0..std::f64::consts::TAU);
                let radius = min_radius * (1.0 + rng.gen_range(0.0..1.0));
                let candidate = [
                    base[0] + radius * angle.cos(),
                    base[1] + radius * angle.sin(),
                ];
                if !self.contains(candidate) {
                    continue;
                }

                let (cx, cy) = cell_of(candidate);
                let mut too_close = false;
                let x_lo = cx.saturating_sub(2);
                let y_lo = cy.saturating_sub(2);
                'scan: for ny in y_lo..=(cy + 2).min(grid_h - 1) {
                    for nx in x_lo..=(cx + 2).min(grid_w - 1) {
                        if let Some(existing) = grid[ny * grid_w + nx] {
                            if dist(samples[existing], candidate) < min_radius {
                                too_close = true;
                                break 'scan;
                            }
                        }
                    }
                }
                if too_close {
                    continue;
                }

                let index = samples.len();
                grid[cy * grid_w + cx] = Some(index);
                samples.push(candidate);
                active.push(index);
                placed = true;
                break;
            }

            if !placed {
                active.swap_remove(slot);
            }
        }

        samples
    }
}
