// src/prediction.rs
//
// =============================================================================
// SPORELAB: PREDICTION MANAGER (v 0.1 )
// =============================================================================
//
// The Ghost Mirror.
// Maintains an ephemeral ghost graph showing exactly what a commit at the
// current cursor state would produce. Every cursor move wipes the previous
// ghosts, rebuilds the tree at the new root, reapplies the cached
// pair-optimized dt vector if one exists, and emits one ghost spore per
// tree node plus one typed ghost link per directed edge.
//
// Link rules (fixed contract):
// - type follows the control sign (u > 0 -> ghost_max, u < 0 -> ghost_min),
// - arrow direction follows the dt sign (positive: parent -> child,
//   negative: child -> parent).

use anyhow::Result;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::config::TreeConfig;
use crate::graph::{GraphKind, Link, LinkType, SporeGraph};
use crate::ids::{IdManager, SporeId};
use crate::math::State2;
use crate::pendulum::PendulumSystem;
use crate::spore::{Spore, SporeRole};
use crate::tree::{SporeTree, DT_VECTOR_LEN};
use crate::visual::{VisualKind, VisualRegistry};

// ============================================================================
// 1. SLOTS & MODE
// ============================================================================

/// Which tree node a ghost spore mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeSlot {
    Root,
    Child(usize),
    Grandchild(usize),
}

impl TreeSlot {
    pub fn key(&self) -> String {
        match self {
            TreeSlot::Root => "tree_ghost_root".into(),
            TreeSlot::Child(i) => format!("tree_ghost_child_{i}"),
            TreeSlot::Grandchild(i) => format!("tree_ghost_grandchild_{i}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationMode {
    Spores,
    Tree,
}

// ============================================================================
// 2. THE MANAGER
// ============================================================================

pub struct PredictionManager {
    pendulum: Arc<PendulumSystem>,
    tree_config: TreeConfig,

    pub ghost_graph: SporeGraph,
    /// The last-built ghost tree logic; buffer merge consumes this.
    pub tree: Option<SporeTree>,
    /// Ghost spore id per tree slot, in creation order.
    pub slots: Vec<(TreeSlot, SporeId)>,

    pub creation_mode: CreationMode,
    pub tree_depth: u8,
    /// Cached pair-optimized magnitudes, reapplied on every rebuild.
    pub ghost_tree_dt_vector: Option<[f64; DT_VECTOR_LEN]>,
    /// The dt the cached vector was produced at; rescaling divides by it.
    pub ghost_dt_baseline: Option<f64>,

    cursor: Option<State2>,
    ids: Rc<RefCell<IdManager>>,
    visual: Rc<RefCell<VisualRegistry>>,
}

impl PredictionManager {
    pub fn new(
        pendulum: Arc<PendulumSystem>,
        tree_config: TreeConfig,
        ids: Rc<RefCell<IdManager>>,
        visual: Rc<RefCell<VisualRegistry>>,
    ) -> Self {
        let tree_depth = tree_config.depth;
        Self {
            pendulum,
            tree_config,
            ghost_graph: SporeGraph::new(GraphKind::Ghost),
            tree: None,
            slots: Vec::new(),
            creation_mode: CreationMode::Tree,
            tree_depth,
            ghost_tree_dt_vector: None,
            ghost_dt_baseline: None,
            cursor: None,
            ids,
            visual,
        }
    }

    pub fn set_tree_depth(&mut self, depth: u8) {
        self.tree_depth = depth.clamp(1, 2);
        log::info!("tree depth: {}", self.tree_depth);
    }

    pub fn toggle_creation_mode(&mut self) {
        self.creation_mode = match self.creation_mode {
            CreationMode::Spores => CreationMode::Tree,
            CreationMode::Tree => CreationMode::Spores,
        };
        log::info!("creation mode: {:?}", self.creation_mode);
    }

    pub fn cursor(&self) -> Option<State2> {
        self.cursor
    }

    /// Installs a pair-optimized vector; `baseline` is the dt it was
    /// computed at (used by rescaling). The whole vector replaces the
    /// previous one or nothing does.
    pub fn set_dt_vector(&mut self, vector: Option<[f64; DT_VECTOR_LEN]>, baseline: f64) {
        self.ghost_tree_dt_vector = vector;
        self.ghost_dt_baseline = vector.map(|_| baseline);
    }

    // ========================================================================
    // 3. REBUILD ON CURSOR MOVE
    // ========================================================================

    /// Full ghost refresh at the cursor state with the current base dt.
    pub fn update_predictions(&mut self, cursor: State2, current_dt: f64) -> Result<()> {
        self.clear_predictions();
        self.cursor = Some(cursor);

        match self.creation_mode {
            CreationMode::Spores => self.build_spore_preview(cursor, current_dt),
            CreationMode::Tree => self.build_tree_preview(cursor, current_dt)?,
        }
        Ok(())
    }

    /// Rebuilds at the remembered cursor (dt changes, vector updates).
    pub fn rebuild_ghost_tree(&mut self, current_dt: f64) -> Result<()> {
        if let Some(cursor) = self.cursor {
            self.update_predictions(cursor, current_dt)?;
        }
        Ok(())
    }

    /// Spores mode: a fan of single-step previews over the control mesh.
    fn build_spore_preview(&mut self, cursor: State2, current_dt: f64) {
        let (u_min, u_max) = self.pendulum.control_bounds();
        let controls = [u_max, u_min, 0.0];
        let root_id = self.make_ghost(TreeSlot::Root, cursor);

        for (i, &control) in controls.iter().enumerate() {
            let state = self.pendulum.step(cursor, control, current_dt);
            let ghost_id = self.make_ghost(TreeSlot::Child(i), state);
            let link_type = if control > 0.0 {
                LinkType::GhostMax
            } else {
                LinkType::GhostMin
            };
            let link_id = self.ids.borrow_mut().alloc_link_id();
            let link = Link::new(link_id, link_type, current_dt, control);
            if let Err(e) = self.ghost_graph.add_edge(root_id, ghost_id, link) {
                log::error!("ghost preview link rejected: {e}");
            }
        }
    }

    /// Tree mode: mirror the full 1+4+8 structure.
    fn build_tree_preview(&mut self, cursor: State2, current_dt: f64) -> Result<()> {
        let mut tree = SporeTree::new(cursor);
        tree.create_children(&self.pendulum, &[current_dt; 4]);
        if self.tree_depth >= 2 {
            let dt_gc = tree.derived_grandchild_dts(self.tree_config.dt_grandchildren_factor);
            tree.create_grandchildren(&self.pendulum, &dt_gc)?;

            // A cached optimized vector overrides the default layout,
            // magnitudes only; stored signs survive.
            if let Some(vector) = self.ghost_tree_dt_vector {
                tree.apply_dt_vector(&self.pendulum, &vector, false)?;
            }
        }

        // Ghost spores: root, children, grandchildren, in that order.
        let root_id = self.make_ghost(TreeSlot::Root, tree.root);
        let mut child_ids = Vec::with_capacity(tree.children.len());
        for child in &tree.children {
            child_ids.push(self.make_ghost(TreeSlot::Child(child.index), child.position));
        }
        let mut gc_ids = Vec::with_capacity(tree.grandchildren.len());
        for gc in &tree.grandchildren {
            gc_ids.push(self.make_ghost(TreeSlot::Grandchild(gc.global_idx), gc.position));
        }

        // Ghost links, typed by control sign, directed by dt sign.
        for (i, child) in tree.children.iter().enumerate() {
            self.ghost_link(root_id, child_ids[i], child.control, child.dt);
        }
        if self.tree_depth >= 2 {
            for (i, gc) in tree.grandchildren.iter().enumerate() {
                self.ghost_link(child_ids[gc.parent_idx], gc_ids[i], gc.control, gc.dt);
            }
        }

        self.tree = Some(tree);
        Ok(())
    }

    fn make_ghost(&mut self, slot: TreeSlot, position: State2) -> SporeId {
        let id = self.ids.borrow_mut().alloc_spore_id();
        // Ghosts carry their own position as goal: their cost is irrelevant
        // and must not depend on the planner's goal configuration.
        let ghost = Spore::new(id, 0.0, position, position, Default::default())
            .with_role(SporeRole::Ghost);
        self.ghost_graph.add_spore(ghost);
        self.slots.push((slot, id));
        self.visual
            .borrow_mut()
            .register(slot.key(), VisualKind::GhostSpore);
        id
    }

    fn ghost_link(&mut self, upper: SporeId, lower: SporeId, control: f64, dt: f64) {
        let link_type = if control > 0.0 {
            LinkType::GhostMax
        } else {
            LinkType::GhostMin
        };
        // Positive dt points down the tree, negative dt reverses the arrow.
        let (parent, child) = if dt > 0.0 { (upper, lower) } else { (lower, upper) };
        let link_id = self.ids.borrow_mut().alloc_link_id();
        let link = Link::new(link_id, link_type, dt, control);
        if let Err(e) = self.ghost_graph.add_edge(parent, child, link) {
            log::error!("ghost link rejected: {e}");
        }
        self.visual
            .borrow_mut()
            .register(format!("ghost_link_{parent}_{child}"), VisualKind::GhostLink);
    }

    // ========================================================================
    // 4. DT RESCALING
    // ========================================================================

    /// dt manager changed: scale the cached vector by new/baseline, move the
    /// baseline, rebuild, refresh link clamps.
    pub fn on_dt_changed(&mut self, new_dt: f64) -> Result<()> {
        if let (Some(mut vector), Some(baseline)) =
            (self.ghost_tree_dt_vector, self.ghost_dt_baseline)
        {
            if baseline > 0.0 {
                let scale = new_dt / baseline;
                for v in vector.iter_mut() {
                    *v *= scale;
                }
                self.ghost_tree_dt_vector = Some(vector);
                self.ghost_dt_baseline = Some(new_dt);
                log::debug!("ghost dt vector rescaled by {scale:.4}");
            }
        }
        self.rebuild_ghost_tree(new_dt)?;
        self.update_links_max_length(Some(new_dt));
        Ok(())
    }

    /// Refreshes the visual clamp on every ghost link. None removes it.
    pub fn update_links_max_length(&mut self, max_length: Option<f64>) {
        let clamp = max_length.unwrap_or(f64::INFINITY);
        let keys: Vec<_> = self
            .ghost_graph
            .edges()
            .iter()
            .map(|(p, c, l)| (*p, *c, l.link_type))
            .collect();
        for (p, c, link_type) in keys {
            if let Some(link) = self.ghost_graph.edge_mut(p, c, link_type) {
                link.max_length = clamp;
            }
        }
    }

    // ========================================================================
    // 5. TEARDOWN
    // ========================================================================

    /// Destroys all ghost spores, links and their visual registrations.
    pub fn clear_predictions(&mut self) {
        let mut visual = self.visual.borrow_mut();
        for (slot, _) in &self.slots {
            visual.unregister(&slot.key());
        }
        visual.unregister_matching(|key, kind| {
            kind == VisualKind::GhostLink && key.starts_with("ghost_link_")
        });
        drop(visual);

        self.ghost_graph.clear();
        self.slots.clear();
        self.tree = None;
    }

    pub fn ghost_stats(&self) -> crate::graph::GraphStats {
        self.ghost_graph.stats()
    }
}
