use sporelab::config::CostFunction;
use sporelab::error::PlannerError;
use sporelab::graph::{GraphKind, Link, LinkType, SporeGraph};
use sporelab::ids::{IdManager, SporeId};
use sporelab::spore::Spore;

fn spore_at(ids: &mut IdManager, position: [f64; 2]) -> Spore {
    Spore::new(
        ids.alloc_spore_id(),
        0.1,
        [std::f64::consts::PI, 0.0],
        position,
        CostFunction::QuadraticDistance,
    )
}

#[test]
fn add_spore_is_idempotent() {
    let mut ids = IdManager::new();
    let mut graph = SporeGraph::new(GraphKind::Real);
    let spore = spore_at(&mut ids, [0.1, 0.2]);
    let id = spore.id;

    graph.add_spore(spore.clone());
    graph.add_spore(spore);
    assert_eq!(graph.node_count(), 1);
    assert!(graph.contains(id));
}

#[test]
fn edges_require_registered_endpoints() {
    let mut ids = IdManager::new();
    let mut graph = SporeGraph::new(GraphKind::Real);
    let a = spore_at(&mut ids, [0.0, 0.0]);
    let a_id = a.id;
    graph.add_spore(a);

    let missing = SporeId(9999);
    let link = Link::new(ids.alloc_link_id(), LinkType::Default, 0.05, 1.0);
    let result = graph.add_edge(a_id, missing, link);
    assert!(matches!(result, Err(PlannerError::MissingSpore(id)) if id == missing));
}

#[test]
fn same_key_edge_is_replaced_not_duplicated() {
    let mut ids = IdManager::new();
    let mut graph = SporeGraph::new(GraphKind::Real);
    let a = spore_at(&mut ids, [0.0, 0.0]);
    let b = spore_at(&mut ids, [0.1, 0.0]);
    let (a_id, b_id) = (a.id, b.id);
    graph.add_spore(a);
    graph.add_spore(b);

    let first = Link::new(ids.alloc_link_id(), LinkType::RealMax, 0.05, 1.0);
    let second = Link::new(ids.alloc_link_id(), LinkType::RealMax, -0.02, 1.0);
    graph.add_edge(a_id, b_id, first).unwrap();
    graph.add_edge(a_id, b_id, second).unwrap();

    assert_eq!(graph.edge_count(), 1, "same (parent, child, type) replaces");
    let link = graph.edge(a_id, b_id, LinkType::RealMax).unwrap();
    assert_eq!(link.dt, -0.02);

    // A different type on the same pair is a separate edge (multigraph).
    let third = Link::new(ids.alloc_link_id(), LinkType::RealMin, 0.05, -1.0);
    graph.add_edge(a_id, b_id, third).unwrap();
    assert_eq!(graph.edge_count(), 2);
    assert_eq!(graph.edges_between(a_id, b_id).len(), 2);
}

#[test]
fn remove_edge_clears_both_adjacency_sides() {
    let mut ids = IdManager::new();
    let mut graph = SporeGraph::new(GraphKind::Real);
    let a = spore_at(&mut ids, [0.0, 0.0]);
    let b = spore_at(&mut ids, [0.1, 0.0]);
    let (a_id, b_id) = (a.id, b.id);
    graph.add_spore(a);
    graph.add_spore(b);
    graph
        .add_edge(
            a_id,
            b_id,
            Link::new(ids.alloc_link_id(), LinkType::Default, 0.05, 1.0),
        )
        .unwrap();

    assert_eq!(graph.get_children(a_id), vec![b_id]);
    assert_eq!(graph.get_parents(b_id), vec![a_id]);

    let removed = graph.remove_edge(a_id, b_id);
    assert_eq!(removed, 1);
    assert!(graph.get_children(a_id).is_empty());
    assert!(graph.get_parents(b_id).is_empty());
    assert_eq!(graph.edge_count(), 0);
}

#[test]
fn removing_a_spore_drops_incident_links() {
    let mut ids = IdManager::new();
    let mut graph = SporeGraph::new(GraphKind::Real);
    let a = spore_at(&mut ids, [0.0, 0.0]);
    let b = spore_at(&mut ids, [0.1, 0.0]);
    let c = spore_at(&mut ids, [0.2, 0.0]);
    let (a_id, b_id, c_id) = (a.id, b.id, c.id);
    graph.add_spore(a);
    graph.add_spore(b);
    graph.add_spore(c);
    graph
        .add_edge(
            a_id,
            b_id,
            Link::new(ids.alloc_link_id(), LinkType::Default, 0.05, 1.0),
        )
        .unwrap();
    graph
        .add_edge(
            b_id,
            c_id,
            Link::new(ids.alloc_link_id(), LinkType::Default, 0.05, 1.0),
        )
        .unwrap();

    graph.remove_spore(b_id);
    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edge_count(), 0, "no dangling link references remain");
    assert!(graph.get_children(a_id).is_empty());
    assert!(graph.get_parents(c_id).is_empty());
}

#[test]
fn copy_structure_resolves_through_the_mapping() {
    let mut ids = IdManager::new();

    // Ghost graph: g_root -> g_child.
    let mut ghost = SporeGraph::new(GraphKind::Ghost);
    let g_root = spore_at(&mut ids, [0.0, 0.0]);
    let g_child = spore_at(&mut ids, [0.1, 0.0]);
    let (g_root_id, g_child_id) = (g_root.id, g_child.id);
    ghost.add_spore(g_root);
    ghost.add_spore(g_child);
    ghost
        .add_edge(
            g_root_id,
            g_child_id,
            Link::new(ids.alloc_link_id(), LinkType::GhostMax, 0.05, 1.0),
        )
        .unwrap();

    // Real graph with counterpart spores.
    let mut real = SporeGraph::new(GraphKind::Real);
    let r_root = spore_at(&mut ids, [0.0, 0.0]);
    let r_child = spore_at(&mut ids, [0.1, 0.0]);
    let (r_root_id, r_child_id) = (r_root.id, r_child.id);
    real.add_spore(r_root);
    real.add_spore(r_child);

    let resolver = move |ghost_id: SporeId| -> Option<SporeId> {
        if ghost_id == g_root_id {
            Some(r_root_id)
        } else if ghost_id == g_child_id {
            Some(r_child_id)
        } else {
            None
        }
    };

    let created = real.copy_structure_from(&ghost, &resolver, &mut ids);
    assert_eq!(created, 1);
    assert!(real.edge(r_root_id, r_child_id, LinkType::Default).is_some());

    // Promotion is idempotent: existing default links are skipped.
    let created_again = real.copy_structure_from(&ghost, &resolver, &mut ids);
    assert_eq!(created_again, 0);
    assert_eq!(real.edge_count(), 1);
}

#[test]
fn copy_structure_skips_unresolved_endpoints() {
    let mut ids = IdManager::new();
    let mut ghost = SporeGraph::new(GraphKind::Ghost);
    let g_a = spore_at(&mut ids, [0.0, 0.0]);
    let g_b = spore_at(&mut ids, [0.1, 0.0]);
    let (g_a_id, g_b_id) = (g_a.id, g_b.id);
    ghost.add_spore(g_a);
    ghost.add_spore(g_b);
    ghost
        .add_edge(
            g_a_id,
            g_b_id,
            Link::new(ids.alloc_link_id(), LinkType::GhostMin, 0.05, -1.0),
        )
        .unwrap();

    let mut real = SporeGraph::new(GraphKind::Real);
    let created = real.copy_structure_from(&ghost, |_| None, &mut ids);
    assert_eq!(created, 0);
    assert_eq!(real.edge_count(), 0);
}

#[test]
fn stats_histogram_counts_link_types() {
    let mut ids = IdManager::new();
    let mut graph = SporeGraph::new(GraphKind::Real);
    let a = spore_at(&mut ids, [0.0, 0.0]);
    let b = spore_at(&mut ids, [0.1, 0.0]);
    let c = spore_at(&mut ids, [0.2, 0.0]);
    let (a_id, b_id, c_id) = (a.id, b.id, c.id);
    graph.add_spore(a);
    graph.add_spore(b);
    graph.add_spore(c);
    graph
        .add_edge(
            a_id,
            b_id,
            Link::new(ids.alloc_link_id(), LinkType::RealMax, 0.05, 1.0),
        )
        .unwrap();
    graph
        .add_edge(
            a_id,
            c_id,
            Link::new(ids.alloc_link_id(), LinkType::RealMin, 0.05, -1.0),
        )
        .unwrap();
    graph
        .add_edge(
            b_id,
            c_id,
            Link::new(ids.alloc_link_id(), LinkType::RealMin, -0.01, -1.0),
        )
        .unwrap();

    let stats = graph.stats();
    assert_eq!(stats.nodes, 3);
    assert_eq!(stats.edges, 3);
    assert_eq!(stats.link_types.get("real_max"), Some(&1));
    assert_eq!(stats.link_types.get("real_min"), Some(&2));
}

#[test]
fn spore_ids_are_monotonic_and_never_reused() {
    let mut ids = IdManager::new();
    let first = ids.alloc_spore_id();
    let second = ids.alloc_spore_id();
    assert!(second > first);

    // Undo does not recycle: allocation continues past popped groups.
    ids.push_group(sporelab::ids::CreatedGroup {
        spores: vec![second],
        links: vec![],
    });
    ids.undo_last();
    let third = ids.alloc_spore_id();
    assert!(third > second);
}
