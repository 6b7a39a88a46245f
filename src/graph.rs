// src/graph.rs
//
// =============================================================================
// SPORELAB: SPORE GRAPH (v 0.1 )
// =============================================================================
//
// The Structure Store.
// A typed directed multigraph of spores connected by links, keyed by
// (parent, child, link_type). Two live instances coexist: the real graph
// owned by the Spore Manager and the ghost graph owned by the Prediction
// Manager; buffer merge builds a third, short-lived one per commit.
//
// Backed by petgraph's StableDiGraph (indices survive removals) with
// side maps from spore/link ids to graph indices.

use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::PlannerError;
use crate::ids::{IdManager, LinkId, SporeId};
use crate::spore::Spore;

// ============================================================================
// 1. LINK TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Default,
    GhostMax,
    GhostMin,
    BufferMax,
    BufferMin,
    RealMax,
    RealMin,
    Angel,
    MergedMax,
    MergedMin,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Default => "default",
            LinkType::GhostMax => "ghost_max",
            LinkType::GhostMin => "ghost_min",
            LinkType::BufferMax => "buffer_max",
            LinkType::BufferMin => "buffer_min",
            LinkType::RealMax => "real_max",
            LinkType::RealMin => "real_min",
            LinkType::Angel => "angel",
            LinkType::MergedMax => "merged_max",
            LinkType::MergedMin => "merged_min",
        }
    }
}

/// A directed typed edge. The dt is signed (time direction); max_length is
/// a visual clamp with no semantic effect.
#[derive(Debug, Clone)]
pub struct Link {
    pub id: LinkId,
    pub link_type: LinkType,
    pub dt: f64,
    pub control: f64,
    pub max_length: f64,
}

impl Link {
    pub fn new(id: LinkId, link_type: LinkType, dt: f64, control: f64) -> Self {
        Self {
            id,
            link_type,
            dt,
            control,
            max_length: f64::INFINITY,
        }
    }
}

pub type EdgeKey = (SporeId, SporeId, LinkType);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphKind {
    Real,
    Ghost,
    Buffer,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub link_types: HashMap<String, usize>,
}

// ============================================================================
// 2. THE GRAPH
// ============================================================================

pub struct SporeGraph {
    pub kind: GraphKind,
    graph: StableDiGraph<Spore, Link>,
    id_map: HashMap<SporeId, NodeIndex>,
    edge_map: HashMap<EdgeKey, EdgeIndex>,
    link_map: HashMap<LinkId, EdgeIndex>,
}

impl SporeGraph {
    pub fn new(kind: GraphKind) -> Self {
        Self {
            kind,
            graph: StableDiGraph::new(),
            id_map: HashMap::new(),
            edge_map: HashMap::new(),
            link_map: HashMap::new(),
        }
    }

    // ========================================================================
    // 3. SPORES
    // ========================================================================

    /// Registers a spore. Idempotent: a spore whose id is already present
    /// is left untouched.
    pub fn add_spore(&mut self, spore: Spore) -> NodeIndex {
        if let Some(&idx) = self.id_map.get(&spore.id) {
            return idx;
        }
        let id = spore.id;
        let idx = self.graph.add_node(spore);
        self.id_map.insert(id, idx);
        idx
    }

    pub fn contains(&self, id: SporeId) -> bool {
        self.id_map.contains_key(&id)
    }

    pub fn spore(&self, id: SporeId) -> Option<&Spore> {
        self.id_map.get(&id).map(|&idx| &self.graph[idx])
    }

    pub fn spore_mut(&mut self, id: SporeId) -> Option<&mut Spore> {
        let idx = *self.id_map.get(&id)?;
        Some(&mut self.graph[idx])
    }

    /// Removes a spore together with every incident link.
    pub fn remove_spore(&mut self, id: SporeId) -> Option<Spore> {
        let idx = self.id_map.remove(&id)?;
        // Incident edges disappear with the node; purge their key entries.
        self.edge_map.retain(|(p, c, _), _| *p != id && *c != id);
        let mut dead_links: Vec<LinkId> = Vec::new();
        for (&link_id, &edge) in self.link_map.iter() {
            let touches = match self.graph.edge_endpoints(edge) {
                Some((a, b)) => a == idx || b == idx,
                None => true,
            };
            if touches {
                dead_links.push(link_id);
            }
        }
        for link_id in dead_links {
            self.link_map.remove(&link_id);
        }
        self.graph.remove_node(idx)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn spore_ids(&self) -> Vec<SporeId> {
        let mut ids: Vec<SporeId> = self.id_map.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn spores(&self) -> impl Iterator<Item = &Spore> {
        self.graph.node_weights()
    }

    // ========================================================================
    // 4. EDGES
    // ========================================================================

    /// Adds a typed edge between two registered spores. An existing edge
    /// with the same (parent, child, type) key is replaced with a warning.
    pub fn add_edge(
        &mut self,
        parent: SporeId,
        child: SporeId,
        link: Link,
    ) -> Result<LinkId, PlannerError> {
        let p_idx = *self
            .id_map
            .get(&parent)
            .ok_or(PlannerError::MissingSpore(parent))?;
        let c_idx = *self
            .id_map
            .get(&child)
            .ok_or(PlannerError::MissingSpore(child))?;

        let key = (parent, child, link.link_type);
        if let Some(old_edge) = self.edge_map.remove(&key) {
            log::warn!(
                "replacing existing edge {} -> {} ({})",
                parent,
                child,
                link.link_type.as_str()
            );
            if let Some(old) = self.graph.remove_edge(old_edge) {
                self.link_map.remove(&old.id);
            }
        }

        let link_id = link.id;
        let edge = self.graph.add_edge(p_idx, c_idx, link);
        self.edge_map.insert(key, edge);
        self.link_map.insert(link_id, edge);
        Ok(link_id)
    }

    /// Registers both endpoint spores if absent, then adds the edge.
    pub fn add_edge_with_spores(
        &mut self,
        parent: Spore,
        child: Spore,
        link: Link,
    ) -> Result<LinkId, PlannerError> {
        let p = parent.id;
        let c = child.id;
        self.add_spore(parent);
        self.add_spore(child);
        self.add_edge(p, c, link)
    }

    /// Removes every typed edge between the pair. Returns how many went.
    pub fn remove_edge(&mut self, parent: SporeId, child: SporeId) -> usize {
        let keys: Vec<EdgeKey> = self
            .edge_map
            .keys()
            .filter(|(p, c, _)| *p == parent && *c == child)
            .copied()
            .collect();
        for key in &keys {
            if let Some(edge) = self.edge_map.remove(key) {
                if let Some(link) = self.graph.remove_edge(edge) {
                    self.link_map.remove(&link.id);
                }
            }
        }
        keys.len()
    }

    pub fn remove_link(&mut self, link_id: LinkId) -> bool {
        let Some(edge) = self.link_map.remove(&link_id) else {
            return false;
        };
        self.edge_map.retain(|_, &mut e| e != edge);
        self.graph.remove_edge(edge).is_some()
    }

    pub fn edge(&self, parent: SporeId, child: SporeId, link_type: LinkType) -> Option<&Link> {
        let idx = self.edge_map.get(&(parent, child, link_type))?;
        self.graph.edge_weight(*idx)
    }

    pub fn edge_mut(
        &mut self,
        parent: SporeId,
        child: SporeId,
        link_type: LinkType,
    ) -> Option<&mut Link> {
        let idx = *self.edge_map.get(&(parent, child, link_type))?;
        self.graph.edge_weight_mut(idx)
    }

    pub fn has_edge(&self, parent: SporeId, child: SporeId, link_type: LinkType) -> bool {
        self.edge_map.contains_key(&(parent, child, link_type))
    }

    /// All typed links from `parent` to `child`, any type.
    pub fn edges_between(&self, parent: SporeId, child: SporeId) -> Vec<&Link> {
        self.edge_map
            .iter()
            .filter(|((p, c, _), _)| *p == parent && *c == child)
            .filter_map(|(_, &e)| self.graph.edge_weight(e))
            .collect()
    }

    pub fn get_children(&self, id: SporeId) -> Vec<SporeId> {
        let Some(&idx) = self.id_map.get(&id) else {
            return Vec::new();
        };
        let mut out: Vec<SporeId> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|n| self.graph[n].id)
            .collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn get_parents(&self, id: SporeId) -> Vec<SporeId> {
        let Some(&idx) = self.id_map.get(&id) else {
            return Vec::new();
        };
        let mut out: Vec<SporeId> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|n| self.graph[n].id)
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Every edge as (parent, child, link), sorted for stable iteration.
    pub fn edges(&self) -> Vec<(SporeId, SporeId, &Link)> {
        let mut out: Vec<(SporeId, SporeId, &Link)> = self
            .graph
            .edge_references()
            .map(|e| {
                (
                    self.graph[e.source()].id,
                    self.graph[e.target()].id,
                    e.weight(),
                )
            })
            .collect();
        out.sort_by_key(|(p, c, l)| (*p, *c, l.id));
        out
    }

    // ========================================================================
    // 5. STRUCTURE COPY (ghost -> real promotion)
    // ========================================================================

    /// Copies the edge structure of `other`, translating each endpoint
    /// through `resolver`. Edges whose endpoints do not resolve (or that
    /// already exist as a default link) are skipped. Returns how many
    /// default links were added.
    pub fn copy_structure_from<F>(
        &mut self,
        other: &SporeGraph,
        resolver: F,
        ids: &mut IdManager,
    ) -> usize
    where
        F: Fn(SporeId) -> Option<SporeId>,
    {
        let mut created = 0;
        let mut skipped = 0;

        for (ghost_parent, ghost_child, link) in other.edges() {
            let (Some(real_parent), Some(real_child)) =
                (resolver(ghost_parent), resolver(ghost_child))
            else {
                skipped += 1;
                continue;
            };
            if !self.contains(real_parent) || !self.contains(real_child) {
                skipped += 1;
                continue;
            }
            if self.has_edge(real_parent, real_child, LinkType::Default) {
                skipped += 1;
                continue;
            }
            let copy = Link::new(ids.alloc_link_id(), LinkType::Default, link.dt, link.control);
            if self.add_edge(real_parent, real_child, copy).is_ok() {
                created += 1;
            }
        }

        log::info!(
            "structure copy: {} links created, {} skipped",
            created,
            skipped
        );
        created
    }

    // ========================================================================
    // 6. MAINTENANCE & STATS
    // ========================================================================

    pub fn clear(&mut self) {
        self.graph.clear();
        self.id_map.clear();
        self.edge_map.clear();
        self.link_map.clear();
    }

    pub fn stats(&self) -> GraphStats {
        let mut link_types: HashMap<String, usize> = HashMap::new();
        for link in self.graph.edge_weights() {
            *link_types.entry(link.link_type.as_str().to_string()).or_insert(0) += 1;
        }
        GraphStats {
            nodes: self.graph.node_count(),
            edges: self.graph.edge_count(),
            link_types,
        }
    }
}
