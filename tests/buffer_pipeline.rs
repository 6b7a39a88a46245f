use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use sporelab::buffer_merge::BufferMergeManager;
use sporelab::config::Config;
use sporelab::graph::LinkType;
use sporelab::ids::IdManager;
use sporelab::manager::SporeManager;
use sporelab::optimizer::SporeOptimizer;
use sporelab::pendulum::PendulumSystem;
use sporelab::snapshot::MemorySnapshotSink;
use sporelab::spore::SporeRole;
use sporelab::tree::SporeTree;
use sporelab::visual::VisualRegistry;

fn fresh_manager() -> SporeManager {
    let mut config = Config::default();
    config.spawn.rng_seed = Some(99);
    let pendulum = Arc::new(PendulumSystem::new(&config.pendulum));
    SporeManager::new(
        pendulum,
        SporeOptimizer::new(config.optimizer.clone()),
        config.cost,
        config.evolution.clone(),
        &config.spawn,
        Rc::new(RefCell::new(IdManager::new())),
        Rc::new(RefCell::new(VisualRegistry::new())),
    )
}

fn ghost_tree() -> SporeTree {
    let pendulum = PendulumSystem::new(&Config::default().pendulum);
    SporeTree::with_auto_layout([0.0, 0.0], &pendulum, 0.05, 0.2).expect("tree builds")
}

fn assert_maps_consistent(merge: &BufferMergeManager) {
    let (ghost_to_buffer, buffer_to_ghosts) = merge.correspondence();
    for (ghost, buffer) in ghost_to_buffer {
        let back = buffer_to_ghosts
            .get(buffer)
            .unwrap_or_else(|| panic!("buffer {buffer} missing from reverse map"));
        assert!(back.contains(ghost), "{ghost} lost from {buffer}");
    }
    for (buffer, ghosts) in buffer_to_ghosts {
        for ghost in ghosts {
            assert_eq!(
                ghost_to_buffer.get(ghost),
                Some(buffer),
                "{ghost} does not map back to {buffer}"
            );
        }
    }
}

#[test]
fn distinct_tree_merges_one_to_one() {
    let tree = ghost_tree();
    let mut merge = BufferMergeManager::new(1e-6);
    let stats = merge.merge_ghost_tree(&tree).expect("merge succeeds");

    // 1 root + 4 children + 8 grandchildren, all pairwise farther than eps.
    assert_eq!(merge.buffer_spore_count(), 13);
    assert_eq!(stats.total_processed, 13);
    assert_eq!(stats.added_to_buffer, 13);
    assert_eq!(stats.merged_to_existing, 0);
    assert_eq!(stats.merged_links, 0);
    assert_eq!(merge.buffer_link_count(), 12, "4 root links + 8 child links");
    assert_maps_consistent(&merge);
}

#[test]
fn processing_follows_root_children_grandchildren_order() {
    let tree = ghost_tree();
    let mut merge = BufferMergeManager::new(1e-6);
    let stats = merge.merge_ghost_tree(&tree).expect("merge succeeds");

    assert_eq!(stats.processing_order.len(), 13);
    assert!(stats.processing_order[0].starts_with("root("));
    for entry in &stats.processing_order[1..5] {
        assert!(entry.starts_with("ghost_child_"), "unexpected: {entry}");
    }
    for entry in &stats.processing_order[5..] {
        assert!(entry.starts_with("ghost_grandchild_"), "unexpected: {entry}");
    }
}

#[test]
fn large_threshold_collapses_ghosts_consistently() {
    let tree = ghost_tree();
    let mut merge = BufferMergeManager::new(0.05);
    let stats = merge.merge_ghost_tree(&tree).expect("merge succeeds");

    assert_eq!(stats.total_processed, 13);
    assert!(merge.buffer_spore_count() < 13, "something must collapse");
    assert_eq!(
        stats.added_to_buffer + stats.merged_to_existing,
        stats.total_processed
    );
    assert_maps_consistent(&merge);

    // At least one buffer spore absorbs several ghosts.
    let (_, buffer_to_ghosts) = merge.correspondence();
    assert!(buffer_to_ghosts.values().any(|ghosts| ghosts.len() >= 2));
}

#[test]
fn materialization_promotes_every_buffer_spore() {
    let tree = ghost_tree();
    let mut merge = BufferMergeManager::new(1e-6);
    merge.merge_ghost_tree(&tree).expect("merge succeeds");
    let buffer_spores = merge.buffer_spore_count();
    let buffer_links = merge.buffer_link_count();

    let mut manager = fresh_manager();
    let mut sink = MemorySnapshotSink::default();
    let stats = merge
        .materialize(&mut manager, &mut sink)
        .expect("materialization runs")
        .expect("buffer was non-empty");

    assert_eq!(stats.spores_created, buffer_spores);
    assert_eq!(stats.links_created, buffer_links);
    assert_eq!(manager.graph.node_count(), buffer_spores);
    assert_eq!(manager.graph.edge_count(), buffer_links);

    // The buffer is wiped after a successful commit.
    assert!(!merge.has_buffer_data());

    // Snapshots went through the observer, not the filesystem.
    assert_eq!(sink.real_graphs.len(), 1);
    assert_eq!(sink.buffer_graphs.len(), 1);
    assert_eq!(sink.real_graphs[0].statistics.total_spores, buffer_spores);
    assert_eq!(sink.real_graphs[0].statistics.goal_spores, 1);
}

#[test]
fn materialized_root_becomes_goal_only_once() {
    let tree = ghost_tree();
    let mut manager = fresh_manager();
    let mut sink = MemorySnapshotSink::default();

    let mut merge = BufferMergeManager::new(1e-6);
    merge.merge_ghost_tree(&tree).expect("merge succeeds");
    merge
        .materialize(&mut manager, &mut sink)
        .expect("materialization runs");

    let goals = manager
        .graph
        .spores()
        .filter(|s| s.role == SporeRole::Goal)
        .count();
    assert_eq!(goals, 1, "first materialized root is the goal");

    // A second commit keeps a single goal.
    let second = SporeTree::with_auto_layout(
        [0.5, 0.1],
        &PendulumSystem::new(&Config::default().pendulum),
        0.05,
        0.2,
    )
    .expect("tree builds");
    merge.merge_ghost_tree(&second).expect("merge succeeds");
    merge
        .materialize(&mut manager, &mut sink)
        .expect("materialization runs");

    let goals = manager
        .graph
        .spores()
        .filter(|s| s.role == SporeRole::Goal)
        .count();
    assert_eq!(goals, 1, "goal is never duplicated");
}

#[test]
fn materialized_subtree_is_connected_through_real_links() {
    let tree = ghost_tree();
    let mut merge = BufferMergeManager::new(1e-6);
    merge.merge_ghost_tree(&tree).expect("merge succeeds");

    let mut manager = fresh_manager();
    let mut sink = MemorySnapshotSink::default();
    merge
        .materialize(&mut manager, &mut sink)
        .expect("materialization runs");

    // Undirected reachability from the root over real_max/real_min links.
    let ids = manager.graph.spore_ids();
    let root = *ids.first().expect("root exists");
    let mut seen = vec![root];
    let mut frontier = vec![root];
    while let Some(current) = frontier.pop() {
        let mut next = manager.graph.get_children(current);
        next.extend(manager.graph.get_parents(current));
        for n in next {
            let typed = manager
                .graph
                .edges_between(current, n)
                .iter()
                .chain(manager.graph.edges_between(n, current).iter())
                .any(|l| matches!(l.link_type, LinkType::RealMax | LinkType::RealMin));
            if typed && !seen.contains(&n) {
                seen.push(n);
                frontier.push(n);
            }
        }
    }
    assert_eq!(seen.len(), ids.len(), "every materialized spore is reachable");
}

#[test]
fn undo_removes_exactly_the_materialized_group() {
    let tree = ghost_tree();
    let mut merge = BufferMergeManager::new(1e-6);
    merge.merge_ghost_tree(&tree).expect("merge succeeds");

    let mut manager = fresh_manager();
    let mut sink = MemorySnapshotSink::default();
    let stats = merge
        .materialize(&mut manager, &mut sink)
        .expect("materialization runs")
        .expect("buffer was non-empty");

    let before = manager.graph.node_count();
    assert!(manager.undo_last_group());
    assert_eq!(
        manager.graph.node_count(),
        before - stats.spores_created,
        "spore count drops by exactly the group size"
    );
    assert_eq!(manager.graph.edge_count(), 0, "no dangling links");

    // History is spent.
    assert!(!manager.undo_last_group());
}

#[test]
fn empty_buffer_materialization_is_a_soft_no() {
    let mut merge = BufferMergeManager::new(1e-6);
    let mut manager = fresh_manager();
    let mut sink = MemorySnapshotSink::default();
    let outcome = merge
        .materialize(&mut manager, &mut sink)
        .expect("no hard error");
    assert!(outcome.is_none());
    assert_eq!(manager.graph.node_count(), 0);
}

#[test]
fn buffer_link_types_follow_control_sign() {
    let tree = ghost_tree();
    let mut merge = BufferMergeManager::new(1e-6);
    merge.merge_ghost_tree(&tree).expect("merge succeeds");

    let mut manager = fresh_manager();
    let mut sink = MemorySnapshotSink::default();
    merge
        .materialize(&mut manager, &mut sink)
        .expect("materialization runs");

    for (_, _, link) in manager.graph.edges() {
        match link.link_type {
            LinkType::RealMax => assert!(link.control > 0.0),
            LinkType::RealMin => assert!(link.control < 0.0),
            other => panic!("unexpected link type {other:?}"),
        }
    }
}
