// src/tree.rs
//
// =============================================================================
// SPORELAB: SPORE TREE (v 0.1 )
// =============================================================================
//
// The Local Fan.
// A fixed-shape depth-2 expansion around a root state: 4 children driven by
// the control pattern (forward*u_max, backward*u_max, forward*u_min,
// backward*u_min), then 2 grandchildren per child carrying the NEGATED
// parent control (the time-reverse pairing principle), one forward and one
// backward in time.
//
// Staged protocol: create_children -> create_grandchildren ->
// sort_and_pair_grandchildren -> calculate_mean_points. The sorted pairing
// step carries a hard invariant: every adjacent pair must mix two different
// parents, and a violation aborts rather than degrades.

use crate::error::PlannerError;
use crate::math::{angle_from, dist, midpoint, State2};
use crate::pendulum::PendulumSystem;

pub const CHILD_COUNT: usize = 4;
pub const GRANDCHILD_COUNT: usize = 8;
pub const DT_VECTOR_LEN: usize = 12;

// ============================================================================
// 1. NODE RECORDS
// ============================================================================

/// Expansion slot names, in fixed index order.
pub const CHILD_NAMES: [&str; CHILD_COUNT] = ["forw_max", "back_max", "forw_min", "back_min"];

#[derive(Debug, Clone)]
pub struct ChildNode {
    pub position: State2,
    pub control: f64,
    /// Signed dt: positive = forward in time, negative = backward.
    pub dt: f64,
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct Grandchild {
    pub position: State2,
    pub control: f64,
    pub dt: f64,
    pub dt_abs: f64,
    pub parent_idx: usize,
    pub local_idx: usize,
    pub global_idx: usize,
    /// Provenance when two close grandchildren were collapsed into one.
    pub merged_from: Option<[usize; 2]>,
}

#[derive(Debug, Clone)]
pub struct GrandchildMerge {
    pub kept: usize,
    pub removed: usize,
    pub distance: f64,
    pub merged_position: State2,
}

#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    pub merged_pairs: Vec<GrandchildMerge>,
    pub remaining: usize,
}

// ============================================================================
// 2. THE TREE
// ============================================================================

pub struct SporeTree {
    pub root: State2,
    pub children: Vec<ChildNode>,
    pub grandchildren: Vec<Grandchild>,
    /// Permutation into `grandchildren` fixed by sort_and_pair.
    pub sorted_order: Vec<usize>,
    pub mean_points: Option<[State2; 4]>,
    /// For each grandchild global index: global indices of all grandchildren
    /// from other parents (its legal pairing candidates), sorted.
    pub pairing_candidate_map: Vec<(usize, Vec<usize>)>,

    children_created: bool,
    grandchildren_created: bool,
    grandchildren_sorted: bool,
    grandchildren_modified: bool,
}

impl SporeTree {
    pub fn new(root: State2) -> Self {
        Self {
            root,
            children: Vec::new(),
            grandchildren: Vec::new(),
            sorted_order: Vec::new(),
            mean_points: None,
            pairing_candidate_map: Vec::new(),
            children_created: false,
            grandchildren_created: false,
            grandchildren_sorted: false,
            grandchildren_modified: false,
        }
    }

    /// Builds a full depth-2 tree with uniform dt magnitudes.
    pub fn with_auto_layout(
        root: State2,
        pendulum: &PendulumSystem,
        dt_base: f64,
        grandchild_factor: f64,
    ) -> Result<Self, PlannerError> {
        let mut tree = Self::new(root);
        tree.create_children(pendulum, &[dt_base; CHILD_COUNT]);
        let dt_gc = [dt_base * grandchild_factor; GRANDCHILD_COUNT];
        tree.create_grandchildren(pendulum, &dt_gc)?;
        Ok(tree)
    }

    pub fn is_sorted(&self) -> bool {
        self.grandchildren_sorted
    }

    pub fn was_merged(&self) -> bool {
        self.grandchildren_modified
    }

    // ========================================================================
    // 3. CHILDREN
    // ========================================================================

    /// Creates the 4 children. Index order is fixed:
    /// (forward*u_max, backward*u_max, forward*u_min, backward*u_min).
    pub fn create_children(&mut self, pendulum: &PendulumSystem, dt_children: &[f64; CHILD_COUNT]) {
        if self.children_created {
            log::debug!("children already created, rebuilding");
        }

        let (u_min, u_max) = pendulum.control_bounds();
        let controls = [u_max, u_max, u_min, u_min];
        let dt_signs = [1.0, -1.0, 1.0, -1.0];

        self.children.clear();
        for i in 0..CHILD_COUNT {
            let signed_dt = dt_children[i].abs() * dt_signs[i];
            let position = pendulum.step(self.root, controls[i], signed_dt);
            self.children.push(ChildNode {
                position,
                control: controls[i],
                dt: signed_dt,
                index: i,
            });
        }

        self.children_created = true;
        self.grandchildren_created = false;
        self.grandchildren_sorted = false;
        self.mean_points = None;
    }

    // ========================================================================
    // 4. GRANDCHILDREN
    // ========================================================================

    /// Creates 8 grandchildren, 2 per child: control is the parent's control
    /// negated, the first runs forward (+dt) and the second backward (-dt).
    pub fn create_grandchildren(
        &mut self,
        pendulum: &PendulumSystem,
        dt_grandchildren: &[f64; GRANDCHILD_COUNT],
    ) -> Result<(), PlannerError> {
        if !self.children_created {
            return Err(PlannerError::TreeStage("children before grandchildren"));
        }

        self.grandchildren.clear();
        let mut global_idx = 0;
        for parent in &self.children {
            let reversed_control = -parent.control;
            for local_idx in 0..2 {
                let dt_abs = dt_grandchildren[global_idx].abs();
                let signed_dt = if local_idx == 0 { dt_abs } else { -dt_abs };
                let position = pendulum.step(parent.position, reversed_control, signed_dt);
                self.grandchildren.push(Grandchild {
                    position,
                    control: reversed_control,
                    dt: signed_dt,
                    dt_abs,
                    parent_idx: parent.index,
                    local_idx,
                    global_idx,
                    merged_from: None,
                });
                global_idx += 1;
            }
        }

        self.grandchildren_created = true;
        self.grandchildren_sorted = false;
        self.mean_points = None;
        self.rebuild_pairing_candidate_map();
        Ok(())
    }

    /// Grandchild dt magnitudes derived from the parents: |dt_child| * factor.
    pub fn derived_grandchild_dts(&self, factor: f64) -> [f64; GRANDCHILD_COUNT] {
        let mut out = [0.0; GRANDCHILD_COUNT];
        for (i, child) in self.children.iter().enumerate() {
            let dt = child.dt.abs() * factor;
            out[2 * i] = dt;
            out[2 * i + 1] = dt;
        }
        out
    }

    /// For each grandchild, the global indices of grandchildren belonging to
    /// other parents — the only legal pairing partners.
    fn rebuild_pairing_candidate_map(&mut self) {
        self.pairing_candidate_map.clear();
        for gc in &self.grandchildren {
            let mut candidates: Vec<usize> = self
                .grandchildren
                .iter()
                .filter(|other| other.parent_idx != gc.parent_idx)
                .map(|other| other.global_idx)
                .collect();
            candidates.sort_unstable();
            self.pairing_candidate_map.push((gc.global_idx, candidates));
        }
    }

    // ========================================================================
    // 5. CLOSE-GRANDCHILD MERGE
    // ========================================================================

    /// Collapses any two grandchildren within `threshold` of each other:
    /// midpoint position, averaged |dt|, provenance retained. Each grandchild
    /// merges at most once.
    pub fn merge_close_grandchildren(&mut self, threshold: f64) -> MergeReport {
        let mut report = MergeReport::default();
        if !self.grandchildren_created || self.grandchildren_modified {
            report.remaining = self.grandchildren.len();
            return report;
        }

        let mut to_remove: Vec<usize> = Vec::new();
        for i in 0..self.grandchildren.len() {
            if to_remove.contains(&i) {
                continue;
            }
            for j in (i + 1)..self.grandchildren.len() {
                if to_remove.contains(&j) {
                    continue;
                }
                let distance = dist(self.grandchildren[i].position, self.grandchildren[j].position);
                if distance < threshold {
                    let (gi, gj) = (
                        self.grandchildren[i].global_idx,
                        self.grandchildren[j].global_idx,
                    );
                    let merged_position =
                        midpoint(self.grandchildren[i].position, self.grandchildren[j].position);
                    let merged_dt =
                        (self.grandchildren[i].dt.abs() + self.grandchildren[j].dt.abs()) * 0.5;

                    let kept = &mut self.grandchildren[i];
                    kept.position = merged_position;
                    kept.dt = merged_dt;
                    kept.dt_abs = merged_dt;
                    kept.merged_from = Some([gi, gj]);

                    to_remove.push(j);
                    report.merged_pairs.push(GrandchildMerge {
                        kept: gi,
                        removed: gj,
                        distance,
                        merged_position,
                    });
                    log::info!(
                        "merged grandchildren {gi} and {gj} (distance {distance:.2e})"
                    );
                    break;
                }
            }
        }

        to_remove.sort_unstable();
        for idx in to_remove.into_iter().rev() {
            self.grandchildren.remove(idx);
        }

        if !report.merged_pairs.is_empty() {
            self.grandchildren_modified = true;
            self.grandchildren_sorted = false;
        }
        report.remaining = self.grandchildren.len();
        report
    }

    // ========================================================================
    // 6. SORT & PAIR (hard invariant)
    // ========================================================================

    /// Sorts the grandchildren clockwise-from-CCW around the root, rolls so
    /// a parent-0 grandchild leads (shifting once more if the second slot is
    /// also parent 0), and then REQUIRES each adjacent pair (2k, 2k+1) to
    /// come from two different parents.
    pub fn sort_and_pair_grandchildren(&mut self) -> Result<&[usize], PlannerError> {
        if !self.grandchildren_created {
            return Err(PlannerError::TreeStage("grandchildren before sorting"));
        }
        if self.grandchildren.len() < GRANDCHILD_COUNT {
            return Err(PlannerError::PairingUnderfull {
                found: self.grandchildren.len(),
                needed: GRANDCHILD_COUNT,
            });
        }

        // Descending angle = counterclockwise traversal order.
        let mut order: Vec<usize> = (0..self.grandchildren.len()).collect();
        order.sort_by(|&a, &b| {
            let angle_a = angle_from(self.root, self.grandchildren[a].position);
            let angle_b = angle_from(self.root, self.grandchildren[b].position);
            angle_b.partial_cmp(&angle_a).unwrap_or(std::cmp::Ordering::Equal)
        });

        // Roll so the first parent-0 grandchild sits at slot 0.
        if let Some(offset) = order
            .iter()
            .position(|&i| self.grandchildren[i].parent_idx == 0)
        {
            order.rotate_left(offset);
        }
        // If slot 1 is also parent 0 the pair would self-collide; shift by one.
        if self.grandchildren[order[1]].parent_idx == 0 {
            order.rotate_right(1);
        }

        for pair in 0..CHILD_COUNT {
            let first = self.grandchildren[order[2 * pair]].parent_idx;
            let second = self.grandchildren[order[2 * pair + 1]].parent_idx;
            if first == second {
                return Err(PlannerError::PairingInvariant {
                    pair,
                    parent: first,
                });
            }
        }

        self.sorted_order = order;
        self.grandchildren_sorted = true;
        Ok(&self.sorted_order)
    }

    /// Grandchild records in sorted order.
    pub fn sorted_grandchildren(&self) -> Vec<&Grandchild> {
        self.sorted_order
            .iter()
            .map(|&i| &self.grandchildren[i])
            .collect()
    }

    // ========================================================================
    // 7. MEAN POINTS
    // ========================================================================

    /// Midpoints of the 4 sorted pairs — the quadrilateral the pair
    /// optimizer works on.
    pub fn calculate_mean_points(&mut self) -> Result<[State2; 4], PlannerError> {
        if !self.grandchildren_sorted {
            return Err(PlannerError::TreeStage("sorting before mean points"));
        }
        let mut means = [[0.0; 2]; 4];
        for pair in 0..CHILD_COUNT {
            let a = &self.grandchildren[self.sorted_order[2 * pair]];
            let b = &self.grandchildren[self.sorted_order[2 * pair + 1]];
            means[pair] = midpoint(a.position, b.position);
        }
        self.mean_points = Some(means);
        Ok(means)
    }

    /// Distance between the two grandchildren of each sorted pair.
    pub fn pair_distances(&self) -> Result<[f64; 4], PlannerError> {
        if !self.grandchildren_sorted {
            return Err(PlannerError::TreeStage("sorting before pair distances"));
        }
        let mut out = [0.0; 4];
        for pair in 0..CHILD_COUNT {
            let a = &self.grandchildren[self.sorted_order[2 * pair]];
            let b = &self.grandchildren[self.sorted_order[2 * pair + 1]];
            out[pair] = dist(a.position, b.position);
        }
        Ok(out)
    }

    // ========================================================================
    // 8. IN-PLACE UPDATE (optimizer inner loop)
    // ========================================================================

    /// Recomputes every child and grandchild state from new dt magnitudes,
    /// preserving the stored signs and any sorted order. Cheap enough to sit
    /// inside the pair optimizer's objective evaluation. Mean points can
    /// only be refreshed once the tree is sorted.
    pub fn update_positions(
        &mut self,
        pendulum: &PendulumSystem,
        dt_children: &[f64; CHILD_COUNT],
        dt_grandchildren: &[f64; GRANDCHILD_COUNT],
        recompute_means: bool,
    ) -> Result<(), PlannerError> {
        if !self.grandchildren_created {
            return Err(PlannerError::TreeStage("grandchildren before position updates"));
        }

        for i in 0..CHILD_COUNT {
            let sign = if self.children[i].dt > 0.0 { 1.0 } else { -1.0 };
            let signed_dt = dt_children[i].abs() * sign;
            self.children[i].dt = signed_dt;
            self.children[i].position =
                pendulum.step(self.root, self.children[i].control, signed_dt);
        }

        for gc in &mut self.grandchildren {
            let sign = if gc.dt > 0.0 { 1.0 } else { -1.0 };
            let dt_abs = dt_grandchildren[gc.global_idx].abs();
            let signed_dt = dt_abs * sign;
            gc.dt = signed_dt;
            gc.dt_abs = dt_abs;
            gc.position = pendulum.step(
                self.children[gc.parent_idx].position,
                gc.control,
                signed_dt,
            );
        }

        if recompute_means {
            self.calculate_mean_points()?;
        }
        Ok(())
    }

    /// The tree's current dt magnitudes as the 12-vector the pair optimizer
    /// starts from: 4 child entries then 8 grandchild entries.
    pub fn dt_vector(&self) -> Result<[f64; DT_VECTOR_LEN], PlannerError> {
        if !self.grandchildren_created {
            return Err(PlannerError::TreeStage("grandchildren before dt vector"));
        }
        let mut out = [0.0; DT_VECTOR_LEN];
        for (i, child) in self.children.iter().enumerate() {
            out[i] = child.dt.abs();
        }
        for gc in &self.grandchildren {
            out[CHILD_COUNT + gc.global_idx] = gc.dt.abs();
        }
        Ok(out)
    }

    /// Applies a 12-vector of magnitudes (children then grandchildren).
    pub fn apply_dt_vector(
        &mut self,
        pendulum: &PendulumSystem,
        vector: &[f64],
        recompute_means: bool,
    ) -> Result<(), PlannerError> {
        if vector.len() != DT_VECTOR_LEN {
            return Err(PlannerError::DtVectorDimension { got: vector.len() });
        }
        let mut dt_children = [0.0; CHILD_COUNT];
        dt_children.copy_from_slice(&vector[..CHILD_COUNT]);
        let mut dt_gc = [0.0; GRANDCHILD_COUNT];
        dt_gc.copy_from_slice(&vector[CHILD_COUNT..]);
        self.update_positions(pendulum, &dt_children, &dt_gc, recompute_means)
    }
}
