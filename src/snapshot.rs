// src/snapshot.rs
//
// =============================================================================
// SPORELAB: GRAPH SNAPSHOTS (v 0.1 )
// =============================================================================
//
// The Paper Trail.
// One JSON document per materialization describing the real graph: spores
// with per-direction link metadata, links with control / |dt| / dt sign.
// Emission is an observer on buffer merge so the pipeline stays testable
// without a filesystem; the file sink logs and continues on I/O failure
// (snapshots are diagnostics, not part of the correctness contract).

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::graph::SporeGraph;
use crate::spore::SporeRole;

pub const SNAPSHOT_VERSION: &str = "sporelab_graph_v1";

// ============================================================================
// 1. SCHEMA
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub export_time: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotStatistics {
    pub total_spores: usize,
    pub total_links: usize,
    pub goal_spores: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkStub {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_spore_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_spore_id: Option<String>,
    pub control: f64,
    pub dt: f64,
    pub dt_sign: i8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SporeRecord {
    pub spore_id: String,
    pub index: usize,
    pub position: [f64; 2],
    #[serde(rename = "type")]
    pub spore_type: String,
    pub in_links: Vec<LinkStub>,
    pub out_links: Vec<LinkStub>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRecord {
    pub link_id: String,
    pub from_spore_id: String,
    pub to_spore_id: String,
    pub control: f64,
    /// |dt| — the sign travels separately in `dt_sign`.
    pub dt: f64,
    pub dt_sign: i8,
    pub raw_dt: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub metadata: SnapshotMetadata,
    pub statistics: SnapshotStatistics,
    pub spores: Vec<SporeRecord>,
    pub links: Vec<LinkRecord>,
}

impl GraphSnapshot {
    /// Captures the graph in a stable order (sorted spore ids).
    pub fn from_graph(graph: &SporeGraph) -> Self {
        let ids = graph.spore_ids();
        let mut spores: Vec<SporeRecord> = ids
            .iter()
            .enumerate()
            .map(|(index, &id)| {
                let spore = graph.spore(id).expect("listed id present");
                SporeRecord {
                    spore_id: id.to_string(),
                    index,
                    position: spore.state_2d,
                    spore_type: if spore.role == SporeRole::Goal {
                        "goal".into()
                    } else {
                        "normal".into()
                    },
                    in_links: Vec::new(),
                    out_links: Vec::new(),
                }
            })
            .collect();

        let index_map: std::collections::HashMap<String, usize> = spores
            .iter()
            .enumerate()
            .map(|(i, s)| (s.spore_id.clone(), i))
            .collect();

        let mut links = Vec::new();
        for (parent, child, link) in graph.edges() {
            let parent_key = parent.to_string();
            let child_key = child.to_string();
            let dt_sign: i8 = if link.dt >= 0.0 { 1 } else { -1 };

            links.push(LinkRecord {
                link_id: format!("link_{}_to_{}", parent_key, child_key),
                from_spore_id: parent_key.clone(),
                to_spore_id: child_key.clone(),
                control: link.control,
                dt: link.dt.abs(),
                dt_sign,
                raw_dt: link.dt,
            });

            if let Some(&pi) = index_map.get(&parent_key) {
                spores[pi].out_links.push(LinkStub {
                    from_spore_id: None,
                    to_spore_id: Some(child_key.clone()),
                    control: link.control,
                    dt: link.dt.abs(),
                    dt_sign,
                });
            }
            if let Some(&ci) = index_map.get(&child_key) {
                spores[ci].in_links.push(LinkStub {
                    from_spore_id: Some(parent_key.clone()),
                    to_spore_id: None,
                    control: link.control,
                    dt: link.dt.abs(),
                    dt_sign,
                });
            }
        }

        let goal_spores = spores.iter().filter(|s| s.spore_type == "goal").count();
        GraphSnapshot {
            metadata: SnapshotMetadata {
                export_time: Utc::now().to_rfc3339(),
                version: SNAPSHOT_VERSION.into(),
            },
            statistics: SnapshotStatistics {
                total_spores: spores.len(),
                total_links: links.len(),
                goal_spores,
            },
            spores,
            links,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading snapshot {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing snapshot {}", path.display()))
    }
}

// ============================================================================
// 2. SINKS (observer on buffer merge)
// ============================================================================

pub trait SnapshotSink {
    fn emit_real_graph(&mut self, snapshot: &GraphSnapshot);
    fn emit_buffer_graph(&mut self, export: &serde_json::Value);
}

/// Writes snapshots to configured paths; failures are logged, never raised.
pub struct FileSnapshotSink {
    pub real_graph_path: PathBuf,
    pub buffer_graph_path: Option<PathBuf>,
}

impl FileSnapshotSink {
    pub fn new(real_graph_path: impl Into<PathBuf>, buffer_graph_path: Option<PathBuf>) -> Self {
        Self {
            real_graph_path: real_graph_path.into(),
            buffer_graph_path,
        }
    }

    fn write_file(path: &Path, payload: &str) {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::error!("snapshot dir {} not created: {e}", parent.display());
                return;
            }
        }
        match std::fs::write(path, payload) {
            Ok(()) => log::info!("snapshot written: {}", path.display()),
            Err(e) => log::error!("snapshot write {} failed: {e}", path.display()),
        }
    }
}

impl SnapshotSink for FileSnapshotSink {
    fn emit_real_graph(&mut self, snapshot: &GraphSnapshot) {
        match serde_json::to_string_pretty(snapshot) {
            Ok(payload) => Self::write_file(&self.real_graph_path, &payload),
            Err(e) => log::error!("snapshot serialization failed: {e}"),
        }
    }

    fn emit_buffer_graph(&mut self, export: &serde_json::Value) {
        let Some(path) = self.buffer_graph_path.clone() else {
            return;
        };
        match serde_json::to_string_pretty(export) {
            Ok(payload) => Self::write_file(&path, &payload),
            Err(e) => log::error!("buffer export serialization failed: {e}"),
        }
    }
}

/// Captures emissions in memory; the unit tests' sink.
#[derive(Default)]
pub struct MemorySnapshotSink {
    pub real_graphs: Vec<GraphSnapshot>,
    pub buffer_graphs: Vec<serde_json::Value>,
}

impl SnapshotSink for MemorySnapshotSink {
    fn emit_real_graph(&mut self, snapshot: &GraphSnapshot) {
        self.real_graphs.push(snapshot.clone());
    }

    fn emit_buffer_graph(&mut self, export: &serde_json::Value) {
        self.buffer_graphs.push(export.clone());
    }
}
