// src/picker.rs
//
// =============================================================================
// SPORELAB: PICKER (v 0.1 )
// =============================================================================
//
// The Neighborhood Reporter.
// Watches the camera's look point, corrects it through the zoom transform
// into world space, and answers: which real spore is closest, which are
// within the threshold, and what does the closest spore's 1- and 2-hop
// neighborhood look like — per-step signed dt, controls, time direction and
// display-id paths.
//
// Nearest queries run on a KD-tree over the spore positions. The picker
// also keeps a cached copy of the latest materialized snapshot JSON,
// refreshed when the file's mtime moves, for consumers that read metadata
// the in-memory graph does not store.
//
// The picker never mutates planner state; consumers read its snapshot.

use kdtree::distance::squared_euclidean;
use kdtree::KdTree;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::config::PickerConfig;
use crate::ids::SporeId;
use crate::manager::SporeManager;
use crate::math::{dist, State2};
use crate::snapshot::GraphSnapshot;

// ============================================================================
// 1. INPUT TYPES
// ============================================================================

/// Read-only zoom parameters supplied by the camera subsystem.
#[derive(Debug, Clone, Copy)]
pub struct ZoomTransform {
    pub origin: State2,
    pub scale: f64,
}

impl Default for ZoomTransform {
    fn default() -> Self {
        Self {
            origin: [0.0, 0.0],
            scale: 1.0,
        }
    }
}

impl ZoomTransform {
    /// World-space correction: (raw - origin) / scale.
    pub fn correct(&self, raw: State2) -> State2 {
        [
            (raw[0] - self.origin[0]) / self.scale,
            (raw[1] - self.origin[1]) / self.scale,
        ]
    }
}

// ============================================================================
// 2. REPORT TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeDirection {
    Forward,
    Backward,
    Mixed,
    Unknown,
}

impl TimeDirection {
    fn of_dt(dt: Option<f64>) -> Self {
        match dt {
            Some(v) if v > 0.0 => TimeDirection::Forward,
            Some(v) if v < 0.0 => TimeDirection::Backward,
            _ => TimeDirection::Unknown,
        }
    }

    fn combine(self, other: Self) -> Self {
        match (self, other) {
            (TimeDirection::Unknown, _) | (_, TimeDirection::Unknown) => TimeDirection::Unknown,
            (a, b) if a == b => a,
            _ => TimeDirection::Mixed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CloseSpore {
    pub id: SporeId,
    pub position: State2,
    pub distance: f64,
}

#[derive(Debug, Clone)]
pub struct NeighborInfo {
    pub target: SporeId,
    /// Node path from the closest spore to the target, inclusive.
    pub path: Vec<SporeId>,
    /// The same path in display ids (1-based roster indices).
    pub display_path: Vec<String>,
    /// Present on 2-hop routes only.
    pub intermediate: Option<SporeId>,
    pub time_direction: TimeDirection,
    /// Signed dt per step, walking the path.
    pub dt_sequence: Vec<Option<f64>>,
    pub control_sequence: Vec<Option<f64>>,
}

/// The structured result consumers read. No callbacks out of the picker.
#[derive(Debug, Clone, Default)]
pub struct PickerReport {
    pub look_point: State2,
    pub total_spores: usize,
    pub closest: Option<CloseSpore>,
    pub close_spores: Vec<CloseSpore>,
    pub neighbors_1: Vec<NeighborInfo>,
    pub neighbors_2: Vec<NeighborInfo>,
}

// ============================================================================
// 3. THE PICKER
// ============================================================================

pub struct PickerManager {
    pub distance_threshold: f64,
    pub verbose: bool,

    last_look_point: Option<State2>,
    report: Option<PickerReport>,

    snapshot_path: Option<PathBuf>,
    cached_snapshot: Option<GraphSnapshot>,
    cached_mtime: Option<SystemTime>,
}

impl PickerManager {
    pub fn new(config: &PickerConfig, snapshot_path: Option<PathBuf>) -> Self {
        Self {
            distance_threshold: config.distance_threshold,
            verbose: config.verbose,
            last_look_point: None,
            report: None,
            snapshot_path,
            cached_snapshot: None,
            cached_mtime: None,
        }
    }

    pub fn set_distance_threshold(&mut self, threshold: f64) {
        self.distance_threshold = threshold;
        log::info!("picker threshold: {threshold}");
    }

    pub fn set_verbose_output(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn toggle_verbose_output(&mut self) {
        self.verbose = !self.verbose;
    }

    pub fn last_look_point(&self) -> Option<State2> {
        self.last_look_point
    }

    pub fn report(&self) -> Option<&PickerReport> {
        self.report.as_ref()
    }

    // ========================================================================
    // 4. LOOK-POINT EVENTS
    // ========================================================================

    /// Raw look-point change: correct to world space, ignore sub-1e-6
    /// jitter, refresh the JSON cache, rebuild the report.
    pub fn on_look_point_changed(
        &mut self,
        raw: State2,
        transform: &ZoomTransform,
        manager: &SporeManager,
    ) -> bool {
        let corrected = transform.correct(raw);
        if let Some(last) = self.last_look_point {
            if (last[0] - corrected[0]).abs() <= 1e-6 && (last[1] - corrected[1]).abs() <= 1e-6 {
                return false;
            }
        }
        self.last_look_point = Some(corrected);
        self.reload_snapshot_if_stale();
        self.update(corrected, manager);
        true
    }

    /// Rebuilds the report at the remembered look point.
    pub fn force_update(&mut self, manager: &SporeManager) {
        if let Some(look) = self.last_look_point {
            self.reload_snapshot_if_stale();
            self.update(look, manager);
        }
    }

    fn update(&mut self, look: State2, manager: &SporeManager) {
        let mut report = PickerReport {
            look_point: look,
            ..Default::default()
        };

        // KD-tree over every real spore.
        let mut tree: KdTree<f64, SporeId, [f64; 2]> = KdTree::new(2);
        let mut all: Vec<CloseSpore> = Vec::new();
        for spore in manager.graph.spores() {
            if tree.add(spore.state_2d, spore.id).is_err() {
                log::error!("kdtree insert failed for spore {}", spore.id);
                continue;
            }
            all.push(CloseSpore {
                id: spore.id,
                position: spore.state_2d,
                distance: dist(spore.state_2d, look),
            });
        }
        report.total_spores = all.len();

        if all.is_empty() {
            // Absence is soft: an empty report.
            self.report = Some(report);
            return;
        }

        let closest_id = tree
            .nearest(&look, 1, &squared_euclidean)
            .ok()
            .and_then(|hits| hits.first().map(|hit| *hit.1));
        report.closest = closest_id
            .and_then(|id| all.iter().find(|c| c.id == id))
            .cloned();

        let mut close: Vec<CloseSpore> = all
            .iter()
            .filter(|c| c.distance < self.distance_threshold)
            .cloned()
            .collect();
        close.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap());
        report.close_spores = close;

        if let Some(ref closest) = report.closest {
            report.neighbors_1 = self.direct_neighbors(closest.id, manager);
            report.neighbors_2 = self.two_hop_neighbors(closest.id, manager);
            if self.verbose {
                log::info!(
                    "picker: look=({:.4}, {:.4}) closest={} dist={:.4} hop1={} hop2={}",
                    look[0],
                    look[1],
                    closest.id,
                    closest.distance,
                    report.neighbors_1.len(),
                    report.neighbors_2.len()
                );
            }
        }

        self.report = Some(report);
    }

    // ========================================================================
    // 5. NEIGHBORHOODS
    // ========================================================================

    /// One traversal step: the signed dt and control seen when walking from
    /// `from` to `to`. Walking against the stored edge negates dt.
    fn step_metadata(
        &self,
        from: SporeId,
        to: SporeId,
        manager: &SporeManager,
    ) -> (Option<f64>, Option<f64>) {
        if let Some(link) = manager.graph.edges_between(from, to).first() {
            return (Some(link.dt), Some(link.control));
        }
        if let Some(link) = manager.graph.edges_between(to, from).first() {
            return (Some(-link.dt), Some(link.control));
        }
        (None, None)
    }

    fn neighbor_entry(
        &self,
        path: Vec<SporeId>,
        manager: &SporeManager,
    ) -> NeighborInfo {
        let mut dt_sequence = Vec::new();
        let mut control_sequence = Vec::new();
        let mut direction: Option<TimeDirection> = None;

        for pair in path.windows(2) {
            let (dt, control) = self.step_metadata(pair[0], pair[1], manager);
            let step_dir = TimeDirection::of_dt(dt);
            direction = Some(match direction {
                Some(d) => d.combine(step_dir),
                None => step_dir,
            });
            dt_sequence.push(dt);
            control_sequence.push(control);
        }

        let display_path = path
            .iter()
            .map(|&id| {
                manager
                    .display_id(id)
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| id.to_string())
            })
            .collect();

        NeighborInfo {
            target: *path.last().expect("non-empty path"),
            intermediate: if path.len() == 3 { Some(path[1]) } else { None },
            time_direction: direction.unwrap_or(TimeDirection::Unknown),
            dt_sequence,
            control_sequence,
            display_path,
            path,
        }
    }

    /// Adjacent spores in either graph direction.
    fn direct_neighbors(&self, id: SporeId, manager: &SporeManager) -> Vec<NeighborInfo> {
        let mut out = Vec::new();
        for child in manager.graph.get_children(id) {
            out.push(self.neighbor_entry(vec![id, child], manager));
        }
        for parent in manager.graph.get_parents(id) {
            out.push(self.neighbor_entry(vec![id, parent], manager));
        }
        out
    }

    /// Routes of length 2 through one intermediate spore, never returning
    /// to the start.
    fn two_hop_neighbors(&self, id: SporeId, manager: &SporeManager) -> Vec<NeighborInfo> {
        let mut out = Vec::new();
        let mut firsts: Vec<SporeId> = manager.graph.get_children(id);
        firsts.extend(manager.graph.get_parents(id));
        firsts.sort();
        firsts.dedup();

        for middle in firsts {
            let mut seconds: Vec<SporeId> = manager.graph.get_children(middle);
            seconds.extend(manager.graph.get_parents(middle));
            seconds.sort();
            seconds.dedup();
            for target in seconds {
                if target == id || target == middle {
                    continue;
                }
                out.push(self.neighbor_entry(vec![id, middle, target], manager));
            }
        }
        out
    }

    // ========================================================================
    // 6. SNAPSHOT CACHE
    // ========================================================================

    /// Reloads the materialized snapshot JSON when its mtime moved.
    fn reload_snapshot_if_stale(&mut self) {
        let Some(path) = self.snapshot_path.clone() else {
            return;
        };
        let Ok(meta) = std::fs::metadata(&path) else {
            return;
        };
        let Ok(mtime) = meta.modified() else {
            return;
        };
        if self.cached_mtime == Some(mtime) {
            return;
        }
        match GraphSnapshot::load(&path) {
            Ok(snapshot) => {
                log::debug!(
                    "picker snapshot cache refreshed: {} spores",
                    snapshot.statistics.total_spores
                );
                self.cached_snapshot = Some(snapshot);
                self.cached_mtime = Some(mtime);
            }
            Err(e) => log::error!("picker snapshot reload failed: {e:#}"),
        }
    }

    pub fn cached_snapshot(&self) -> Option<&GraphSnapshot> {
        self.cached_snapshot.as_ref()
    }

    /// Verifies the cached snapshot agrees with the live graph on node
    /// positions within `tolerance`.
    pub fn snapshot_consistent(&self, manager: &SporeManager, tolerance: f64) -> bool {
        let Some(snapshot) = &self.cached_snapshot else {
            return true;
        };
        for record in &snapshot.spores {
            let Ok(raw) = record.spore_id.parse::<u64>() else {
                return false;
            };
            let Some(spore) = manager.graph.spore(SporeId(raw)) else {
                return false;
            };
            if dist(spore.state_2d, record.position) > tolerance {
                return false;
            }
        }
        true
    }
}
