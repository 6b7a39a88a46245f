// src/buffer_merge.rs
//
// =============================================================================
// SPORELAB: BUFFER MERGE & MATERIALIZATION (v 0.1 )
// =============================================================================
//
// The Commit Pipeline.
// Compresses a ghost tree into a canonical deduplicated buffer graph, then
// promotes the buffer into the shared real graph.
//
// Merge pass (strict order: root -> children 0..3 -> grandchildren 0..7):
// every ghost node either founds a new buffer spore or, when it lands
// within the distance threshold of an existing one, collapses onto it.
// Both directions of the ghost<->buffer correspondence are maintained and
// must stay consistent. Links are keyed (parent, child, type); duplicate
// keys count as merged links and are skipped.
//
// Materialization instantiates one real spore per buffer spore (root
// becomes the goal iff no goal exists yet), one real_max/real_min link per
// buffer link carrying control and signed dt for the picker, pushes the
// whole batch as a single undo group, emits snapshots through the observer
// sink, and wipes the buffer.

use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;

use crate::error::PlannerError;
use crate::graph::{Link, LinkType};
use crate::ids::{CreatedGroup, SporeId};
use crate::manager::SporeManager;
use crate::math::{dist, State2};
use crate::snapshot::{GraphSnapshot, SnapshotSink};
use crate::spore::SporeRole;
use crate::tree::SporeTree;
use crate::visual::VisualKind;

// ============================================================================
// 1. BUFFER RECORDS
// ============================================================================

#[derive(Debug, Clone)]
pub struct BufferSpore {
    pub key: String,
    pub position: State2,
    /// Signed dt inherited from the ghost node (0 for the root).
    pub dt: f64,
}

#[derive(Debug, Clone)]
pub struct BufferLink {
    pub parent: String,
    pub child: String,
    pub link_type: LinkType,
    pub control: f64,
    pub dt: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeStats {
    pub total_processed: usize,
    pub added_to_buffer: usize,
    pub merged_to_existing: usize,
    pub total_links: usize,
    pub merged_links: usize,
    pub processing_order: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MaterializeStats {
    pub spores_created: usize,
    pub links_created: usize,
}

// ============================================================================
// 2. THE MANAGER
// ============================================================================

pub struct BufferMergeManager {
    pub distance_threshold: f64,

    spores: Vec<BufferSpore>,
    links: Vec<BufferLink>,
    ghost_to_buffer: HashMap<String, String>,
    buffer_to_ghosts: HashMap<String, Vec<String>>,
    stats: MergeStats,
    materialization_counter: usize,
}

impl BufferMergeManager {
    pub fn new(distance_threshold: f64) -> Self {
        Self {
            distance_threshold,
            spores: Vec::new(),
            links: Vec::new(),
            ghost_to_buffer: HashMap::new(),
            buffer_to_ghosts: HashMap::new(),
            stats: MergeStats::default(),
            materialization_counter: 0,
        }
    }

    pub fn buffer_spore_count(&self) -> usize {
        self.spores.len()
    }

    pub fn buffer_link_count(&self) -> usize {
        self.links.len()
    }

    pub fn has_buffer_data(&self) -> bool {
        !self.spores.is_empty()
    }

    pub fn stats(&self) -> &MergeStats {
        &self.stats
    }

    /// (ghost -> buffer, buffer -> ghosts) correspondence maps.
    pub fn correspondence(&self) -> (&HashMap<String, String>, &HashMap<String, Vec<String>>) {
        (&self.ghost_to_buffer, &self.buffer_to_ghosts)
    }

    // ========================================================================
    // 3. MERGE PASS
    // ========================================================================

    /// Collapses `tree` into the buffer graph. Any previous buffer content
    /// is discarded first.
    pub fn merge_ghost_tree(&mut self, tree: &SporeTree) -> Result<MergeStats, PlannerError> {
        self.reset();
        log::info!(
            "buffer merge: {} children, {} grandchildren, threshold {:.2e}",
            tree.children.len(),
            tree.grandchildren.len(),
            self.distance_threshold
        );

        // Root first: always founds the buffer.
        self.add_buffer_spore("buffer_root", "ghost_root", tree.root, 0.0);
        self.stats.total_processed += 1;
        self.stats
            .processing_order
            .push("root(ghost_root->buffer_root)".into());

        // Children in index order.
        for (i, child) in tree.children.iter().enumerate() {
            let ghost_id = format!("ghost_child_{i}");
            let buffer_id = format!("buffer_child_{i}");
            self.absorb(&ghost_id, &buffer_id, child.position, child.dt);
        }

        // Grandchildren in index order.
        for (i, gc) in tree.grandchildren.iter().enumerate() {
            let ghost_id = format!("ghost_grandchild_{i}");
            let buffer_id = format!("buffer_grandchild_{i}");
            self.absorb(&ghost_id, &buffer_id, gc.position, gc.dt);
        }

        self.process_links(tree)?;
        log::info!(
            "buffer merge done: {} spores ({} merged), {} links ({} merged)",
            self.spores.len(),
            self.stats.merged_to_existing,
            self.links.len(),
            self.stats.merged_links
        );
        Ok(self.stats.clone())
    }

    /// One ghost node: map onto the closest buffer spore when inside the
    /// threshold, otherwise found a new one.
    fn absorb(&mut self, ghost_id: &str, new_buffer_id: &str, position: State2, dt: f64) {
        self.stats.total_processed += 1;

        let closest = self
            .spores
            .iter()
            .map(|b| (b.key.clone(), dist(position, b.position)))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        match closest {
            Some((buffer_id, distance)) if distance < self.distance_threshold => {
                self.map_ghost(ghost_id, &buffer_id);
                self.stats.merged_to_existing += 1;
                self.stats
                    .processing_order
                    .push(format!("{ghost_id}->{buffer_id} (d={distance:.2e})"));
                log::debug!("ghost {ghost_id} merged onto {buffer_id} at {distance:.2e}");
            }
            _ => {
                self.add_buffer_spore(new_buffer_id, ghost_id, position, dt);
                self.stats
                    .processing_order
                    .push(format!("{ghost_id}->{new_buffer_id}"));
            }
        }
    }

    fn add_buffer_spore(&mut self, buffer_id: &str, ghost_id: &str, position: State2, dt: f64) {
        self.spores.push(BufferSpore {
            key: buffer_id.to_string(),
            position,
            dt,
        });
        self.map_ghost(ghost_id, buffer_id);
        self.stats.added_to_buffer += 1;
    }

    fn map_ghost(&mut self, ghost_id: &str, buffer_id: &str) {
        self.ghost_to_buffer
            .insert(ghost_id.to_string(), buffer_id.to_string());
        self.buffer_to_ghosts
            .entry(buffer_id.to_string())
            .or_default()
            .push(ghost_id.to_string());
    }

    fn buffer_of(&self, ghost_id: &str) -> Result<&str, PlannerError> {
        self.ghost_to_buffer
            .get(ghost_id)
            .map(String::as_str)
            .ok_or_else(|| PlannerError::UnmappedGhost(ghost_id.to_string()))
    }

    // ========================================================================
    // 4. LINK PASS
    // ========================================================================

    fn process_links(&mut self, tree: &SporeTree) -> Result<(), PlannerError> {
        // Root <-> children.
        for (i, child) in tree.children.iter().enumerate() {
            let child_buffer = self.buffer_of(&format!("ghost_child_{i}"))?.to_string();
            self.push_link("buffer_root", &child_buffer, child.control, child.dt);
        }

        // Children <-> grandchildren.
        for (i, gc) in tree.grandchildren.iter().enumerate() {
            let gc_buffer = self
                .buffer_of(&format!("ghost_grandchild_{i}"))?
                .to_string();
            let parent_buffer = self
                .buffer_of(&format!("ghost_child_{}", gc.parent_idx))?
                .to_string();
            self.push_link(&parent_buffer, &gc_buffer, gc.control, gc.dt);
        }
        Ok(())
    }

    /// Classifies by control sign, orients by dt sign, and drops duplicate
    /// (parent, child, type) keys as merged links.
    fn push_link(&mut self, upper: &str, lower: &str, control: f64, dt: f64) {
        let link_type = if control > 0.0 {
            LinkType::BufferMax
        } else {
            LinkType::BufferMin
        };
        let (parent, child) = if dt > 0.0 { (upper, lower) } else { (lower, upper) };

        let exists = self
            .links
            .iter()
            .any(|l| l.parent == parent && l.child == child && l.link_type == link_type);
        if exists {
            self.stats.merged_links += 1;
            log::debug!("duplicate buffer link {parent} -> {child} skipped");
            return;
        }

        self.links.push(BufferLink {
            parent: parent.to_string(),
            child: child.to_string(),
            link_type,
            control,
            dt,
        });
        self.stats.total_links += 1;
    }

    // ========================================================================
    // 5. MATERIALIZATION
    // ========================================================================

    /// Promotes the buffer into the real graph. Returns None with an empty
    /// buffer. On success the created spores and links form one undo group,
    /// snapshots go through `sink`, and the buffer is wiped.
    pub fn materialize(
        &mut self,
        manager: &mut SporeManager,
        sink: &mut dyn SnapshotSink,
    ) -> Result<Option<MaterializeStats>> {
        if self.spores.is_empty() {
            log::warn!("materialize requested with empty buffer");
            return Ok(None);
        }

        self.materialization_counter += 1;
        let counter = self.materialization_counter;
        log::info!("🎨 materialization #{counter}: {} buffer spores", self.spores.len());

        sink.emit_buffer_graph(&self.export_buffer_graph());

        let mut stats = MaterializeStats::default();
        let mut group = CreatedGroup::default();
        let mut real_map: HashMap<String, SporeId> = HashMap::new();

        // Spores first, in buffer insertion order: the committed subtree's
        // root is always materialized before its descendants.
        for buffer_spore in self.spores.clone() {
            let is_goal = buffer_spore.key == "buffer_root" && !manager.has_goal();
            let role = if is_goal {
                SporeRole::Goal
            } else {
                SporeRole::Normal
            };
            let id = manager.create_spore(buffer_spore.position, role);
            manager.visual_register(
                format!("real_{}_m{counter}", buffer_spore.key),
                VisualKind::Spore,
            );
            real_map.insert(buffer_spore.key.clone(), id);
            group.spores.push(id);
            stats.spores_created += 1;
        }

        // Then links, carrying control and signed dt for the picker.
        for buffer_link in self.links.clone() {
            let parent = *real_map
                .get(&buffer_link.parent)
                .ok_or_else(|| PlannerError::UnmappedGhost(buffer_link.parent.clone()))?;
            let child = *real_map
                .get(&buffer_link.child)
                .ok_or_else(|| PlannerError::UnmappedGhost(buffer_link.child.clone()))?;

            let link_type = match buffer_link.link_type {
                LinkType::BufferMax => LinkType::RealMax,
                LinkType::BufferMin => LinkType::RealMin,
                other => other,
            };
            let link_id = manager.ids().borrow_mut().alloc_link_id();
            let link = Link::new(link_id, link_type, buffer_link.dt, buffer_link.control);
            manager.graph.add_edge(parent, child, link)?;
            manager.visual_register(
                format!(
                    "real_link_{}_to_{}_m{counter}",
                    buffer_link.parent, buffer_link.child
                ),
                VisualKind::Link,
            );
            group.links.push(link_id);
            stats.links_created += 1;
        }

        manager.push_group(group);
        sink.emit_real_graph(&GraphSnapshot::from_graph(&manager.graph));
        self.clear_buffer_graph();

        log::info!(
            "materialized: {} spores, {} links",
            stats.spores_created,
            stats.links_created
        );
        Ok(Some(stats))
    }

    // ========================================================================
    // 6. EXPORT & WIPE
    // ========================================================================

    fn export_buffer_graph(&self) -> serde_json::Value {
        json!({
            "statistics": {
                "total_spores": self.spores.len(),
                "total_links": self.links.len(),
                "merged_to_existing": self.stats.merged_to_existing,
            },
            "spores": self.spores.iter().map(|s| json!({
                "buffer_id": s.key,
                "position": s.position,
                "dt": s.dt,
                "ghosts": self.buffer_to_ghosts.get(&s.key).cloned().unwrap_or_default(),
            })).collect::<Vec<_>>(),
            "links": self.links.iter().map(|l| json!({
                "parent_id": l.parent,
                "child_id": l.child,
                "link_type": l.link_type.as_str(),
                "control": l.control,
                "dt": l.dt.abs(),
                "dt_sign": if l.dt >= 0.0 { 1 } else { -1 },
            })).collect::<Vec<_>>(),
        })
    }

    pub fn clear_buffer_graph(&mut self) {
        self.spores.clear();
        self.links.clear();
        self.ghost_to_buffer.clear();
        self.buffer_to_ghosts.clear();
    }

    fn reset(&mut self) {
        self.clear_buffer_graph();
        self.stats = MergeStats::default();
    }
}
