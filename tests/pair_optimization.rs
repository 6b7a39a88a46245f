use sporelab::area_opt::PairOptimizer;
use sporelab::config::{AreaOptimizationConfig, Config, PendulumConfig};
use sporelab::error::PlannerError;
use sporelab::pendulum::PendulumSystem;
use sporelab::tree::SporeTree;

fn default_pendulum() -> PendulumSystem {
    PendulumSystem::new(&PendulumConfig::default())
}

fn sorted_tree(pendulum: &PendulumSystem) -> SporeTree {
    let mut tree =
        SporeTree::with_auto_layout([0.0, 0.0], pendulum, 0.05, 0.2).expect("tree builds");
    tree.sort_and_pair_grandchildren().expect("pairing holds");
    tree.calculate_mean_points().expect("means computable");
    tree
}

#[test]
fn optimizer_requires_a_sorted_tree() {
    let pendulum = default_pendulum();
    let mut tree =
        SporeTree::with_auto_layout([0.0, 0.0], &pendulum, 0.05, 0.2).expect("tree builds");

    let optimizer = PairOptimizer::new(AreaOptimizationConfig::default());
    let result = optimizer.optimize(&mut tree, &pendulum, 0.05);
    assert!(matches!(result, Err(PlannerError::TreeStage(_))));
}

#[test]
fn successful_result_respects_dimension_and_bounds() {
    let pendulum = default_pendulum();
    let mut tree = sorted_tree(&pendulum);
    let config = AreaOptimizationConfig::default();
    let current_dt = 0.05;

    let optimizer = PairOptimizer::new(config.clone());
    let outcome = optimizer
        .optimize(&mut tree, &pendulum, current_dt)
        .expect("no hard error");

    match outcome {
        Some(result) => {
            assert!(result.success);
            assert_eq!(result.optimized_dt_vector.len(), 12);

            let dt_hi = config.dt_hi.min(current_dt);
            for &v in &result.optimized_dt_vector {
                assert!(v >= config.dt_lo - 1e-12, "entry {v} below dt_lo");
                assert!(v <= dt_hi + 1e-12, "entry {v} above dt_hi cap");
            }

            // Success means the meeting constraints hold at the returned
            // vector, and the bookkeeping agrees with itself.
            assert!(result.max_constraint_violation <= 1e-12);
            for &d in &result.pair_distances {
                assert!(d <= config.constraint_distance + 1e-12);
            }
            assert!(
                (result.improvement - (result.optimized_area - result.original_area)).abs()
                    < 1e-12
            );
            assert!(result.evaluations <= config.max_iterations);

            // The tree carries the optimized vector afterwards.
            let applied = tree.dt_vector().expect("vector available");
            assert_eq!(applied, result.optimized_dt_vector);
        }
        None => {
            // Soft failure restores the original layout.
            let vector = tree.dt_vector().expect("vector available");
            for &v in &vector {
                assert!(v > 0.0);
            }
        }
    }
}

#[test]
fn optimization_is_deterministic() {
    let pendulum = default_pendulum();
    let optimizer = PairOptimizer::new(AreaOptimizationConfig::default());

    let mut first_tree = sorted_tree(&pendulum);
    let first = optimizer
        .optimize(&mut first_tree, &pendulum, 0.05)
        .expect("no hard error");

    let mut second_tree = sorted_tree(&pendulum);
    let second = optimizer
        .optimize(&mut second_tree, &pendulum, 0.05)
        .expect("no hard error");

    match (first, second) {
        (Some(a), Some(b)) => {
            assert_eq!(a.optimized_dt_vector, b.optimized_dt_vector);
            assert_eq!(a.optimized_area, b.optimized_area);
            assert_eq!(a.evaluations, b.evaluations);
        }
        (None, None) => {}
        _ => panic!("identical input produced different outcomes"),
    }
}

#[test]
fn degenerate_dt_box_is_a_soft_failure() {
    let pendulum = default_pendulum();
    let mut tree = sorted_tree(&pendulum);

    // current_dt below dt_lo empties the box.
    let optimizer = PairOptimizer::new(AreaOptimizationConfig::default());
    let outcome = optimizer
        .optimize(&mut tree, &pendulum, 1e-5)
        .expect("no hard error");
    assert!(outcome.is_none());
}

#[test]
fn loose_constraint_accepts_the_initial_layout() {
    let pendulum = default_pendulum();
    let mut tree = sorted_tree(&pendulum);

    // With a huge epsilon every pair already "meets"; the optimizer's
    // verdict must then report a feasible vector with at least the
    // original area.
    let config = AreaOptimizationConfig {
        constraint_distance: 10.0,
        ..AreaOptimizationConfig::default()
    };
    let optimizer = PairOptimizer::new(config);
    let result = optimizer
        .optimize(&mut tree, &pendulum, 0.05)
        .expect("no hard error")
        .expect("trivially feasible problem succeeds");

    assert!(result.success);
    assert!(result.optimized_area >= result.original_area - 1e-15);
    assert!(result.max_constraint_violation == 0.0);
}
