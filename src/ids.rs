// src/ids.rs
//
// =============================================================================
// SPORELAB: ID MANAGER & GROUP HISTORY (v 0.1 )
// =============================================================================
//
// The Registrar.
// Monotonic integer allocation for spores and links (ids are never reused),
// plus the undo stack: every materialization pushes the ids it created as
// one group, and `undo_last` pops exactly that group.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// 1. ID NEWTYPES
// ============================================================================

/// Stable integer spore id. The type boundary is the enforcement: the graph
/// cannot be keyed by anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SporeId(pub u64);

impl fmt::Display for SporeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// 2. CREATED GROUPS
// ============================================================================

/// One undoable unit of creation (e.g. a whole materialized subtree).
#[derive(Debug, Clone, Default)]
pub struct CreatedGroup {
    pub spores: Vec<SporeId>,
    pub links: Vec<LinkId>,
}

impl CreatedGroup {
    pub fn is_empty(&self) -> bool {
        self.spores.is_empty() && self.links.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupHistoryStats {
    pub groups: usize,
    pub total_spores: usize,
    pub total_links: usize,
    pub group_sizes: Vec<(usize, usize)>,
}

// ============================================================================
// 3. THE MANAGER
// ============================================================================

#[derive(Debug, Default)]
pub struct IdManager {
    next_spore: u64,
    next_link: u64,
    groups: Vec<CreatedGroup>,
}

impl IdManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_spore_id(&mut self) -> SporeId {
        let id = SporeId(self.next_spore);
        self.next_spore += 1;
        id
    }

    pub fn alloc_link_id(&mut self) -> LinkId {
        let id = LinkId(self.next_link);
        self.next_link += 1;
        id
    }

    /// Records a creation group on the undo stack.
    pub fn push_group(&mut self, group: CreatedGroup) {
        if group.is_empty() {
            log::debug!("ignoring empty creation group");
            return;
        }
        self.groups.push(group);
    }

    /// Pops the most recent group. Returns None when there is no history;
    /// the ids inside remain retired forever.
    pub fn undo_last(&mut self) -> Option<CreatedGroup> {
        self.groups.pop()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn group_stats(&self) -> GroupHistoryStats {
        GroupHistoryStats {
            groups: self.groups.len(),
            total_spores: self.groups.iter().map(|g| g.spores.len()).sum(),
            total_links: self.groups.iter().map(|g| g.links.len()).sum(),
            group_sizes: self
                .groups
                .iter()
                .map(|g| (g.spores.len(), g.links.len()))
                .collect(),
        }
    }

    /// Drops all history (clear_all path). Counters keep running: ids are
    /// never reused even across a full wipe.
    pub fn clear_history(&mut self) {
        self.groups.clear();
    }
}
