// src/session.rs
//
// =============================================================================
// SPORELAB: SESSION & COMMAND DISPATCH (v 0.1 )
// =============================================================================
//
// The Wiring Center.
// Owns every manager, routes dt changes into the prediction rescale, and
// exposes the stable command surface consumed by input collaborators:
//
//   spore.new_from_last, spore.activate_random_candidate,
//   spore.evolve_all_candidates, spore.generate_candidates,
//   spore.random_in_spawn, tree.set_depth, tree.toggle_mode,
//   tree.apply_optimal_pairs, merge.buffer_and_materialize,
//   group.undo_last, graph.clear_all, picker.force_update,
//   picker.set_threshold, dt.reset, dt.stats, graph.stats
//
// Commands are idempotent on repeated invocation with identical state.

use anyhow::{anyhow, Result};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use crate::area_opt::{AreaOptimizationResult, PairOptimizer};
use crate::buffer_merge::{BufferMergeManager, MaterializeStats};
use crate::config::Config;
use crate::dt::{DtChange, DtManager};
use crate::ids::IdManager;
use crate::manager::SporeManager;
use crate::math::State2;
use crate::optimizer::SporeOptimizer;
use crate::pendulum::PendulumSystem;
use crate::picker::{PickerManager, ZoomTransform};
use crate::prediction::PredictionManager;
use crate::snapshot::FileSnapshotSink;
use crate::visual::VisualRegistry;

// ============================================================================
// 1. COMMANDS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SporeNewFromLast,
    SporeActivateRandomCandidate,
    SporeEvolveAllCandidates,
    SporeGenerateCandidates,
    SporeRandomInSpawn,
    TreeSetDepth(u8),
    TreeToggleMode,
    TreeApplyOptimalPairs,
    MergeBufferAndMaterialize,
    GroupUndoLast,
    GraphClearAll,
    GraphStats,
    PickerForceUpdate,
    PickerSetThreshold(f64),
    DtReset,
    DtStats,
}

impl Command {
    /// Parses "name" or "name arg" forms, e.g. "tree.set_depth 2".
    pub fn parse(input: &str) -> Result<Command> {
        let mut parts = input.split_whitespace();
        let name = parts.next().ok_or_else(|| anyhow!("empty command"))?;
        let arg = parts.next();

        let cmd = match name {
            "spore.new_from_last" => Command::SporeNewFromLast,
            "spore.activate_random_candidate" => Command::SporeActivateRandomCandidate,
            "spore.evolve_all_candidates" => Command::SporeEvolveAllCandidates,
            "spore.generate_candidates" => Command::SporeGenerateCandidates,
            "spore.random_in_spawn" => Command::SporeRandomInSpawn,
            "tree.set_depth" => {
                let depth: u8 = arg
                    .ok_or_else(|| anyhow!("tree.set_depth needs a depth"))?
                    .parse()?;
                Command::TreeSetDepth(depth)
            }
            "tree.toggle_mode" => Command::TreeToggleMode,
            "tree.apply_optimal_pairs" => Command::TreeApplyOptimalPairs,
            "merge.buffer_and_materialize" => Command::MergeBufferAndMaterialize,
            "group.undo_last" => Command::GroupUndoLast,
            "graph.clear_all" => Command::GraphClearAll,
            "graph.stats" => Command::GraphStats,
            "picker.force_update" => Command::PickerForceUpdate,
            "picker.set_threshold" => {
                let threshold: f64 = arg
                    .ok_or_else(|| anyhow!("picker.set_threshold needs a value"))?
                    .parse()?;
                Command::PickerSetThreshold(threshold)
            }
            "dt.reset" => Command::DtReset,
            "dt.stats" => Command::DtStats,
            other => return Err(anyhow!("unknown command: {other}")),
        };
        Ok(cmd)
    }
}

// ============================================================================
// 2. THE SESSION
// ============================================================================

pub struct Session {
    pub config: Config,
    pub pendulum: Arc<PendulumSystem>,
    pub dt_manager: DtManager,
    pub spore_manager: SporeManager,
    pub prediction: PredictionManager,
    pub buffer_merge: BufferMergeManager,
    pub picker: PickerManager,
    pub pair_optimizer: PairOptimizer,
    pub zoom: ZoomTransform,
    sink: FileSnapshotSink,
    visual: Rc<RefCell<VisualRegistry>>,
    /// dt observer mailbox; drained after every synchronous dispatch.
    dt_events: Rc<RefCell<Vec<DtChange>>>,
}

impl Session {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let pendulum = Arc::new(PendulumSystem::new(&config.pendulum));
        let ids = Rc::new(RefCell::new(IdManager::new()));
        let visual = Rc::new(RefCell::new(VisualRegistry::new()));

        let spore_manager = SporeManager::new(
            pendulum.clone(),
            SporeOptimizer::new(config.optimizer.clone()),
            config.cost,
            config.evolution.clone(),
            &config.spawn,
            ids.clone(),
            visual.clone(),
        );

        let prediction = PredictionManager::new(
            pendulum.clone(),
            config.tree.clone(),
            ids.clone(),
            visual.clone(),
        );

        let mut dt_manager = DtManager::new(config.dt.initial_dt);
        let dt_events: Rc<RefCell<Vec<DtChange>>> = Rc::new(RefCell::new(Vec::new()));
        let mailbox = dt_events.clone();
        dt_manager.subscribe(Box::new(move |change: &DtChange| {
            mailbox.borrow_mut().push(*change);
        }));

        let picker = PickerManager::new(
            &config.picker,
            Some(PathBuf::from(&config.buffer.snapshot_path)),
        );

        let sink = FileSnapshotSink::new(
            PathBuf::from(&config.buffer.snapshot_path),
            config.buffer.buffer_export_path.as_ref().map(PathBuf::from),
        );

        Ok(Self {
            buffer_merge: BufferMergeManager::new(config.buffer.distance_threshold),
            pair_optimizer: PairOptimizer::new(config.area_optimization.clone()),
            zoom: ZoomTransform::default(),
            config,
            pendulum,
            dt_manager,
            spore_manager,
            prediction,
            picker,
            sink,
            visual,
            dt_events,
        })
    }

    pub fn visual(&self) -> Rc<RefCell<VisualRegistry>> {
        self.visual.clone()
    }

    // ========================================================================
    // 3. TICK INPUTS
    // ========================================================================

    /// Cursor moved: rebuild the ghost preview at the new state.
    pub fn update_cursor(&mut self, cursor: State2) -> Result<()> {
        self.prediction
            .update_predictions(cursor, self.dt_manager.current_dt())
    }

    /// Look point moved (raw camera coordinates).
    pub fn update_look_point(&mut self, raw: State2) -> bool {
        self.picker
            .on_look_point_changed(raw, &self.zoom, &self.spore_manager)
    }

    /// Changes the base dt and synchronously services the observers
    /// (prediction rescale included).
    pub fn set_dt(&mut self, new_dt: f64) -> Result<()> {
        self.dt_manager.set(new_dt);
        self.drain_dt_events()
    }

    fn drain_dt_events(&mut self) -> Result<()> {
        let events: Vec<DtChange> = self.dt_events.borrow_mut().drain(..).collect();
        for change in events {
            self.prediction.on_dt_changed(change.new)?;
        }
        Ok(())
    }

    // ========================================================================
    // 4. HIGH-LEVEL OPERATIONS
    // ========================================================================

    /// Sorts and pairs the current ghost tree, runs the pair optimizer, and
    /// installs the resulting 12-vector for subsequent ghost rebuilds.
    /// Returns None when no optimization applies (no tree, depth 1, or a
    /// soft solver failure).
    pub fn apply_optimal_pairs(&mut self) -> Result<Option<AreaOptimizationResult>> {
        if self.prediction.tree_depth < 2 {
            log::warn!("pair optimization unavailable at tree depth 1");
            return Ok(None);
        }
        let current_dt = self.dt_manager.current_dt();

        let result = {
            let Some(tree) = self.prediction.tree.as_mut() else {
                log::warn!("no ghost tree under the cursor");
                return Ok(None);
            };
            if tree.grandchildren.is_empty() {
                log::warn!("ghost tree has no grandchildren to pair");
                return Ok(None);
            }
            tree.sort_and_pair_grandchildren()?;
            tree.calculate_mean_points()?;
            self.pair_optimizer.optimize(tree, &self.pendulum, current_dt)?
        };

        if let Some(ref r) = result {
            self.prediction
                .set_dt_vector(Some(r.optimized_dt_vector), current_dt);
            self.prediction.rebuild_ghost_tree(current_dt)?;
        }
        Ok(result)
    }

    /// Commits the ghost tree: epsilon-collapse into the buffer graph, then
    /// materialize into the real graph as one undo group.
    pub fn merge_buffer_and_materialize(&mut self) -> Result<Option<MaterializeStats>> {
        let Some(tree) = self.prediction.tree.take() else {
            log::warn!("nothing to commit: no ghost tree");
            return Ok(None);
        };

        self.buffer_merge.merge_ghost_tree(&tree)?;
        let stats = self
            .buffer_merge
            .materialize(&mut self.spore_manager, &mut self.sink)?;
        self.prediction.clear_predictions();
        self.picker.force_update(&self.spore_manager);
        Ok(stats)
    }

    // ========================================================================
    // 5. COMMAND EXECUTION
    // ========================================================================

    pub fn execute(&mut self, command: Command) -> Result<String> {
        match command {
            Command::SporeNewFromLast => Ok(match self.spore_manager.generate_new_spore() {
                Some(id) => format!("evolved to spore {id}"),
                None => "no evolvable spore".into(),
            }),
            Command::SporeActivateRandomCandidate => {
                Ok(match self.spore_manager.activate_random_candidate() {
                    Some(id) => format!("candidate activated as spore {id}"),
                    None => "no candidates".into(),
                })
            }
            Command::SporeEvolveAllCandidates => {
                let (candidates, steps) = self.spore_manager.evolve_all_candidates_to_completion();
                Ok(format!("{candidates} candidates evolved in {steps} steps"))
            }
            Command::SporeGenerateCandidates => {
                let n = self.spore_manager.generate_candidate_spores();
                Ok(format!("{n} candidates generated"))
            }
            Command::SporeRandomInSpawn => {
                let id = self.spore_manager.generate_random_spore_in_spawn_area();
                Ok(format!("random spore {id} created"))
            }
            Command::TreeSetDepth(depth) => {
                self.prediction.set_tree_depth(depth);
                Ok(format!("tree depth {}", self.prediction.tree_depth))
            }
            Command::TreeToggleMode => {
                self.prediction.toggle_creation_mode();
                Ok(format!("creation mode {:?}", self.prediction.creation_mode))
            }
            Command::TreeApplyOptimalPairs => Ok(match self.apply_optimal_pairs()? {
                Some(r) => format!(
                    "pair optimization: area {:.3e} -> {:.3e}",
                    r.original_area, r.optimized_area
                ),
                None => "no optimization applied".into(),
            }),
            Command::MergeBufferAndMaterialize => {
                Ok(match self.merge_buffer_and_materialize()? {
                    Some(stats) => format!(
                        "materialized {} spores, {} links",
                        stats.spores_created, stats.links_created
                    ),
                    None => "nothing to materialize".into(),
                })
            }
            Command::GroupUndoLast => Ok(if self.spore_manager.undo_last_group() {
                "last group undone".into()
            } else {
                "no history".into()
            }),
            Command::GraphClearAll => {
                self.spore_manager.clear_all();
                self.prediction.clear_predictions();
                self.buffer_merge.clear_buffer_graph();
                Ok("all graphs cleared".into())
            }
            Command::GraphStats => {
                let stats = self.spore_manager.graph.stats();
                Ok(serde_json::to_string(&stats)?)
            }
            Command::PickerForceUpdate => {
                self.picker.force_update(&self.spore_manager);
                Ok("picker updated".into())
            }
            Command::PickerSetThreshold(threshold) => {
                self.picker.set_distance_threshold(threshold);
                Ok(format!("picker threshold {threshold}"))
            }
            Command::DtReset => {
                self.dt_manager.reset();
                self.drain_dt_events()?;
                Ok(format!("dt reset to {}", self.dt_manager.current_dt()))
            }
            Command::DtStats => Ok(serde_json::to_string(&self.dt_manager.stats())?),
        }
    }
}
