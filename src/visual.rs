// src/visual.rs
//
// =============================================================================
// SPORELAB: VISUAL REGISTRATION TABLE (v 0.1 )
// =============================================================================
//
// Rendering, cameras and zoom live outside the core. What the core owes them
// is a registration table: every spore/link that should exist on screen is
// registered under a stable key, and destruction deregisters it. Writes are
// idempotent by key, so replays cost nothing.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualKind {
    Spore,
    Link,
    GhostSpore,
    GhostLink,
    Candidate,
    Preview,
}

impl VisualKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisualKind::Spore => "spore",
            VisualKind::Link => "link",
            VisualKind::GhostSpore => "ghost_spore",
            VisualKind::GhostLink => "ghost_link",
            VisualKind::Candidate => "candidate",
            VisualKind::Preview => "preview",
        }
    }
}

/// The external table of visual registrations, keyed by stable strings.
#[derive(Debug, Default)]
pub struct VisualRegistry {
    entries: BTreeMap<String, VisualKind>,
}

impl VisualRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a key. Re-registering an existing key is a no-op.
    pub fn register(&mut self, key: impl Into<String>, kind: VisualKind) {
        self.entries.entry(key.into()).or_insert(kind);
    }

    pub fn unregister(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drops every key matching the predicate; returns how many went.
    pub fn unregister_matching<F: Fn(&str, VisualKind) -> bool>(&mut self, pred: F) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, v| !pred(k, *v));
        before - self.entries.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count_of(&self, kind: VisualKind) -> usize {
        self.entries.values().filter(|&&v| v == kind).count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
