use std::path::PathBuf;

use sporelab::config::{Config, CostFunction};
use sporelab::graph::{GraphKind, Link, LinkType, SporeGraph};
use sporelab::ids::IdManager;
use sporelab::snapshot::{FileSnapshotSink, GraphSnapshot, SnapshotSink};
use sporelab::spore::{Spore, SporeRole};

fn sample_graph() -> SporeGraph {
    let mut ids = IdManager::new();
    let mut graph = SporeGraph::new(GraphKind::Real);

    let goal = Spore::new(
        ids.alloc_spore_id(),
        0.05,
        [std::f64::consts::PI, 0.0],
        [0.0, 0.0],
        CostFunction::QuadraticDistance,
    )
    .with_role(SporeRole::Goal);
    let child = Spore::new(
        ids.alloc_spore_id(),
        0.05,
        [std::f64::consts::PI, 0.0],
        [0.00125, 0.0499],
        CostFunction::QuadraticDistance,
    );
    let (goal_id, child_id) = (goal.id, child.id);
    graph.add_spore(goal);
    graph.add_spore(child);
    graph
        .add_edge(
            goal_id,
            child_id,
            Link::new(ids.alloc_link_id(), LinkType::RealMax, -0.05, 1.0),
        )
        .expect("edge adds");
    graph
}

#[test]
fn snapshot_captures_spores_and_links() {
    let graph = sample_graph();
    let snapshot = GraphSnapshot::from_graph(&graph);

    assert_eq!(snapshot.statistics.total_spores, 2);
    assert_eq!(snapshot.statistics.total_links, 1);
    assert_eq!(snapshot.statistics.goal_spores, 1);
    assert_eq!(snapshot.spores.len(), 2);
    assert_eq!(snapshot.links.len(), 1);

    // Indices follow the sorted-id order.
    assert_eq!(snapshot.spores[0].index, 0);
    assert_eq!(snapshot.spores[1].index, 1);
    assert_eq!(snapshot.spores[0].spore_type, "goal");
    assert_eq!(snapshot.spores[1].spore_type, "normal");

    // dt splits into magnitude + sign, with the raw value preserved.
    let link = &snapshot.links[0];
    assert_eq!(link.dt, 0.05);
    assert_eq!(link.dt_sign, -1);
    assert_eq!(link.raw_dt, -0.05);
    assert_eq!(link.control, 1.0);

    // Per-spore link views mirror the edge.
    assert_eq!(snapshot.spores[0].out_links.len(), 1);
    assert_eq!(snapshot.spores[0].in_links.len(), 0);
    assert_eq!(snapshot.spores[1].in_links.len(), 1);
    assert_eq!(
        snapshot.spores[1].in_links[0].from_spore_id.as_deref(),
        Some(snapshot.spores[0].spore_id.as_str())
    );
}

#[test]
fn snapshot_round_trips_through_the_file_sink() {
    let graph = sample_graph();
    let snapshot = GraphSnapshot::from_graph(&graph);

    let dir = std::env::temp_dir().join(format!("sporelab_snap_{}", std::process::id()));
    let path = dir.join("real_graph_latest.json");
    let mut sink = FileSnapshotSink::new(path.clone(), None);
    sink.emit_real_graph(&snapshot);

    let loaded = GraphSnapshot::load(&path).expect("snapshot loads back");
    assert_eq!(loaded.statistics.total_spores, 2);
    assert_eq!(loaded.statistics.total_links, 1);
    assert_eq!(loaded.spores[0].position, snapshot.spores[0].position);
    assert_eq!(loaded.metadata.version, snapshot.metadata.version);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn file_sink_failure_is_soft() {
    // An unwritable path must log and continue, never panic.
    let graph = sample_graph();
    let snapshot = GraphSnapshot::from_graph(&graph);
    let mut sink = FileSnapshotSink::new(PathBuf::from("/proc/sporelab/denied.json"), None);
    sink.emit_real_graph(&snapshot);
}

#[test]
fn default_config_is_valid_and_loadable() {
    let config = Config::default();
    config.validate().expect("defaults validate");

    let dir = std::env::temp_dir().join(format!("sporelab_cfg_{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir");
    let path = dir.join("config.json");
    let payload = serde_json::to_string_pretty(&config).expect("serializes");
    std::fs::write(&path, payload).expect("writes");

    let loaded = Config::load(&path).expect("loads back");
    assert_eq!(loaded.pendulum.gravity, config.pendulum.gravity);
    assert_eq!(loaded.buffer.distance_threshold, 1.5e-3);
    assert_eq!(loaded.tree.dt_grandchildren_factor, 0.2);
    assert_eq!(loaded.evolution.trajectory_merge_tolerance, 0.05);

    // A partial file falls back to defaults per section.
    let partial = dir.join("partial.json");
    std::fs::write(&partial, r#"{"pendulum": {"gravity": 1.62, "length": 2.0, "mass": 1.0, "damping": 0.1, "max_control": 1.0}}"#)
        .expect("writes");
    let partial_cfg = Config::load(&partial).expect("partial loads");
    assert_eq!(partial_cfg.pendulum.gravity, 1.62);
    assert_eq!(partial_cfg.picker.distance_threshold, 0.05);

    std::fs::remove_dir_all(&dir).ok();
}
