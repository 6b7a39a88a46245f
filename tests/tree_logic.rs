use sporelab::config::PendulumConfig;
use sporelab::error::PlannerError;
use sporelab::pendulum::PendulumSystem;
use sporelab::tree::SporeTree;

fn default_pendulum() -> PendulumSystem {
    PendulumSystem::new(&PendulumConfig::default())
}

#[test]
fn children_follow_the_fixed_control_and_sign_pattern() {
    let pendulum = default_pendulum();
    let mut tree = SporeTree::new([0.0, 0.0]);
    tree.create_children(&pendulum, &[0.05; 4]);

    assert_eq!(tree.children.len(), 4);
    let controls: Vec<f64> = tree.children.iter().map(|c| c.control).collect();
    assert_eq!(controls, vec![1.0, 1.0, -1.0, -1.0]);

    let dt_signs: Vec<f64> = tree.children.iter().map(|c| c.dt.signum()).collect();
    assert_eq!(dt_signs, vec![1.0, -1.0, 1.0, -1.0]);
}

#[test]
fn grandchildren_reverse_the_parent_control() {
    let pendulum = default_pendulum();
    let tree =
        SporeTree::with_auto_layout([0.0, 0.0], &pendulum, 0.05, 0.2).expect("tree builds");

    assert_eq!(tree.grandchildren.len(), 8);
    for gc in &tree.grandchildren {
        let parent = &tree.children[gc.parent_idx];
        assert_eq!(gc.control, -parent.control, "reversal principle");
        assert!(
            gc.dt.abs() <= parent.dt.abs() * 0.2 + 1e-12,
            "grandchild dt bounded by parent dt * factor"
        );
        // First grandchild runs forward, second backward.
        if gc.local_idx == 0 {
            assert!(gc.dt > 0.0);
        } else {
            assert!(gc.dt < 0.0);
        }
    }
}

#[test]
fn pairing_candidates_exclude_the_own_parent() {
    let pendulum = default_pendulum();
    let tree =
        SporeTree::with_auto_layout([0.0, 0.0], &pendulum, 0.05, 0.2).expect("tree builds");

    assert_eq!(tree.pairing_candidate_map.len(), 8);
    for (gc_id, candidates) in &tree.pairing_candidate_map {
        let own_parent = tree.grandchildren[*gc_id].parent_idx;
        assert_eq!(candidates.len(), 6, "two grandchildren per other parent");
        for &candidate in candidates {
            assert_ne!(tree.grandchildren[candidate].parent_idx, own_parent);
        }
    }
}

#[test]
fn sort_and_pair_produces_distinct_parent_pairs() {
    // Scenario: depth-2 tree at the origin, dt = 0.05, factor = 0.2.
    let pendulum = default_pendulum();
    let mut tree =
        SporeTree::with_auto_layout([0.0, 0.0], &pendulum, 0.05, 0.2).expect("tree builds");

    let order = tree.sort_and_pair_grandchildren().expect("pairing holds");
    assert_eq!(order.len(), 8);

    let sorted = tree.sorted_grandchildren();
    for pair in 0..4 {
        assert_ne!(
            sorted[2 * pair].parent_idx,
            sorted[2 * pair + 1].parent_idx,
            "pair {pair} must mix two parents"
        );
    }
    // The roll puts a parent-0 grandchild at slot 0 or 1.
    assert!(sorted[0].parent_idx == 0 || sorted[1].parent_idx == 0);
}

#[test]
fn mean_points_are_pair_midpoints() {
    let pendulum = default_pendulum();
    let mut tree =
        SporeTree::with_auto_layout([0.0, 0.0], &pendulum, 0.05, 0.2).expect("tree builds");
    tree.sort_and_pair_grandchildren().expect("pairing holds");
    let means = tree.calculate_mean_points().expect("means computable");

    let sorted = tree.sorted_grandchildren();
    for pair in 0..4 {
        let a = sorted[2 * pair].position;
        let b = sorted[2 * pair + 1].position;
        assert!((means[pair][0] - (a[0] + b[0]) * 0.5).abs() < 1e-12);
        assert!((means[pair][1] - (a[1] + b[1]) * 0.5).abs() < 1e-12);
    }
}

#[test]
fn depth_one_tree_has_no_grandchildren() {
    let pendulum = default_pendulum();
    let mut tree = SporeTree::new([0.2, -0.1]);
    tree.create_children(&pendulum, &[0.05; 4]);

    assert_eq!(tree.children.len(), 4);
    assert!(tree.grandchildren.is_empty());
    // Pair optimization has nothing to work on.
    assert!(matches!(
        tree.dt_vector(),
        Err(PlannerError::TreeStage(_))
    ));
    assert!(matches!(
        tree.sort_and_pair_grandchildren(),
        Err(PlannerError::TreeStage(_))
    ));
}

#[test]
fn grandchild_stage_requires_children_first() {
    let pendulum = default_pendulum();
    let mut tree = SporeTree::new([0.0, 0.0]);
    let result = tree.create_grandchildren(&pendulum, &[0.01; 8]);
    assert!(matches!(result, Err(PlannerError::TreeStage(_))));
}

#[test]
fn close_grandchildren_merge_with_provenance() {
    let pendulum = default_pendulum();
    let mut tree =
        SporeTree::with_auto_layout([0.0, 0.0], &pendulum, 0.05, 0.2).expect("tree builds");

    // A huge threshold forces merges.
    let report = tree.merge_close_grandchildren(10.0);
    assert!(!report.merged_pairs.is_empty());
    assert_eq!(report.remaining, tree.grandchildren.len());
    assert!(report.remaining < 8);

    let merged = tree
        .grandchildren
        .iter()
        .find(|gc| gc.merged_from.is_some())
        .expect("at least one merged grandchild");
    let [first, second] = merged.merged_from.unwrap();
    assert_ne!(first, second);

    // An underfull tree must refuse to pair rather than degrade.
    assert!(matches!(
        tree.sort_and_pair_grandchildren(),
        Err(PlannerError::PairingUnderfull { .. })
    ));
}

#[test]
fn merge_with_tiny_threshold_keeps_all_grandchildren() {
    let pendulum = default_pendulum();
    let mut tree =
        SporeTree::with_auto_layout([0.0, 0.0], &pendulum, 0.05, 0.2).expect("tree builds");
    let report = tree.merge_close_grandchildren(1e-9);
    assert!(report.merged_pairs.is_empty());
    assert_eq!(report.remaining, 8);
}

#[test]
fn update_positions_preserves_signs_and_order() {
    let pendulum = default_pendulum();
    let mut tree =
        SporeTree::with_auto_layout([0.0, 0.0], &pendulum, 0.05, 0.2).expect("tree builds");
    tree.sort_and_pair_grandchildren().expect("pairing holds");
    tree.calculate_mean_points().expect("means computable");

    let signs_before: Vec<f64> = tree.children.iter().map(|c| c.dt.signum()).collect();
    let order_before = tree.sorted_order.clone();

    tree.update_positions(&pendulum, &[0.03; 4], &[0.008; 8], true)
        .expect("update succeeds");

    let signs_after: Vec<f64> = tree.children.iter().map(|c| c.dt.signum()).collect();
    assert_eq!(signs_before, signs_after);
    assert_eq!(order_before, tree.sorted_order);
    for child in &tree.children {
        assert!((child.dt.abs() - 0.03).abs() < 1e-12);
    }
    for gc in &tree.grandchildren {
        assert!((gc.dt.abs() - 0.008).abs() < 1e-12);
    }
}

#[test]
fn dt_vector_round_trips_through_apply() {
    let pendulum = default_pendulum();
    let mut tree =
        SporeTree::with_auto_layout([0.1, 0.0], &pendulum, 0.05, 0.2).expect("tree builds");

    let vector = tree.dt_vector().expect("vector available");
    assert_eq!(vector.len(), 12);
    tree.apply_dt_vector(&pendulum, &vector, false)
        .expect("identical vector reapplies");
    let again = tree.dt_vector().expect("vector available");
    assert_eq!(vector, again);

    // Wrong dimensionality is a hard error.
    assert!(matches!(
        tree.apply_dt_vector(&pendulum, &[0.05; 11], false),
        Err(PlannerError::DtVectorDimension { got: 11 })
    ));
}
