mod common;

use common::{quadratic_solver, uniform_context, ScriptedSolver};
use sipdd_algo::{evaluate_lower_bound, DualEvaluator, EvalError, Skip, SubgradientAscent};
use sipdd_core::{NodeId, SipConfig, INFINITE_BOUND};
use sipdd_solver_common::{StartSource, SubproblemOutcome, SubproblemRequest};

/// Common integer `x = 5` is optimal for targets 1, 5, 9 at weight 1/3 each.
const PRIMAL_OPTIMUM: f64 = 32.0 / 3.0;

fn dual_config() -> SipConfig {
    let mut config = SipConfig::default();
    config.dual.enabled = true;
    config
}

#[test]
fn test_run_improves_and_stays_below_primal_optimum() {
    let mut ctx = uniform_context(dual_config(), 3);
    let mut nodes = ctx.new_arena();
    let mut solver = quadratic_solver(vec![1.0, 5.0, 9.0]);
    let mut bundle = SubgradientAscent::with_defaults().with_max_steps(20);

    let run = DualEvaluator::new(&mut solver, &mut bundle)
        .run(&mut ctx, &mut nodes, NodeId::ROOT)
        .unwrap();

    assert!(run.bound > 0.0, "bound {} did not improve on the zero multipliers", run.bound);
    assert!(run.bound <= PRIMAL_OPTIMUM + 1e-9);
    assert!(run.iterations >= 2);
    assert_eq!(run.leaf, run.branch.is_none());
    let root = &nodes[NodeId::ROOT];
    assert_eq!(root.multipliers.len(), ctx.n_multipliers());
    assert_eq!(root.multipliers, root.best_multipliers);
    assert!(run.best_weight > 0.0);
}

#[test]
fn test_subgradient_matches_linking_residuals() {
    let mut ctx = uniform_context(dual_config(), 3);
    let mut nodes = ctx.new_arena();
    let mut solver = quadratic_solver(vec![1.0, 5.0, 9.0]);
    let mut bundle = SubgradientAscent::with_defaults();

    let report = DualEvaluator::new(&mut solver, &mut bundle)
        .evaluate(&mut ctx, &mut nodes, NodeId::ROOT)
        .unwrap();

    // consecutive relations: x0 - x1 and x1 - x2
    assert_eq!(report.subgradient, vec![-4.0, -4.0]);
    assert_eq!(report.objective, 0.0);
    assert!(report.increased);
    assert_eq!(report.violations, 1);
    assert_eq!(ctx.dual.iteration, 1);
    assert_eq!(nodes[NodeId::ROOT].bound, 0.0);
}

#[test]
fn test_first_evaluation_reuses_lower_bound_solutions() {
    let mut ctx = uniform_context(dual_config(), 3);
    let mut nodes = ctx.new_arena();
    let mut solver = quadratic_solver(vec![1.0, 5.0, 9.0]);
    evaluate_lower_bound(&mut ctx, &mut nodes, NodeId::ROOT, &mut solver).unwrap();
    solver.calls.clear();
    let mut bundle = SubgradientAscent::with_defaults();

    let report = {
        let mut dual = DualEvaluator::new(&mut solver, &mut bundle);
        dual.evaluate(&mut ctx, &mut nodes, NodeId::ROOT).unwrap()
    };

    assert_eq!(report.problems_solved, 0);
    assert!(solver.calls.is_empty());
    assert!(!report.increased);
}

#[test]
fn test_later_iterations_start_from_previous_solutions() {
    let mut ctx = uniform_context(dual_config(), 3);
    let mut nodes = ctx.new_arena();
    let mut solver = quadratic_solver(vec![1.0, 5.0, 9.0]);
    let mut bundle = SubgradientAscent::with_defaults();
    {
        let mut dual = DualEvaluator::new(&mut solver, &mut bundle);
        dual.evaluate(&mut ctx, &mut nodes, NodeId::ROOT).unwrap();
        dual.evaluate(&mut ctx, &mut nodes, NodeId::ROOT).unwrap();
    }

    let second = &solver.calls[3..];
    assert_eq!(second.len(), 3);
    for call in second {
        let first = &call.starts[0];
        assert_eq!(first.source, StartSource::PreviousIteration);
        assert_eq!(call.cost_shift.as_deref(), Some(&[0.0][..]));
    }
    assert_eq!(ctx.dual.iteration, 2);
}

#[test]
fn test_infeasibility_retried_then_accepted() {
    let mut ctx = uniform_context(dual_config(), 2);
    let mut nodes = ctx.new_arena();
    let mut solver = ScriptedSolver::new(|r: &SubproblemRequest<'_>| match r.scenario {
        1 => SubproblemOutcome::infeasible(),
        _ => SubproblemOutcome::optimal(1.0, vec![0.0]),
    });
    let mut bundle = SubgradientAscent::with_defaults();
    let mut dual = DualEvaluator::new(&mut solver, &mut bundle);

    for attempt in 1..=3 {
        match dual.evaluate(&mut ctx, &mut nodes, NodeId::ROOT) {
            Err(EvalError::Retryable { scenario, attempt: a }) => {
                assert_eq!(scenario, 1);
                assert_eq!(a, attempt);
            }
            other => panic!("expected a retry, got {other:?}"),
        }
        assert_eq!(ctx.dual.iteration, 0);
        // the partial attempt is discarded
        assert!(nodes[NodeId::ROOT].scenarios[0].solution.is_none());
    }

    let report = dual.evaluate(&mut ctx, &mut nodes, NodeId::ROOT).unwrap();
    assert_eq!(report.skip, Skip::NoSolution);
    assert_eq!(report.bound, INFINITE_BOUND);
    assert!(nodes[NodeId::ROOT].leaf);
    assert_eq!(ctx.dual.iteration, 1);
    assert_eq!(ctx.dual.retries, 0);
}

#[test]
fn test_run_marks_infeasible_node_leaf() {
    let mut ctx = uniform_context(dual_config(), 2);
    let mut nodes = ctx.new_arena();
    let mut solver = ScriptedSolver::new(|_: &SubproblemRequest<'_>| {
        SubproblemOutcome::infeasible_time_limit()
    });
    let mut bundle = SubgradientAscent::with_defaults();

    let run = DualEvaluator::new(&mut solver, &mut bundle)
        .run(&mut ctx, &mut nodes, NodeId::ROOT)
        .unwrap();

    assert_eq!(run.last.skip, Skip::TimeLimitInfeasible);
    assert_eq!(run.iterations, 1);
    assert!(run.leaf);
    assert!(run.branch.is_none());
}

#[test]
fn test_total_iteration_limit() {
    let mut config = dual_config();
    config.dual.total_iteration_limit = 2;
    config.dual.iteration_slack = 0;
    let mut ctx = uniform_context(config, 2);
    let mut nodes = ctx.new_arena();
    let mut solver = quadratic_solver(vec![1.0, 3.0]);
    let mut bundle = SubgradientAscent::with_defaults();
    let mut dual = DualEvaluator::new(&mut solver, &mut bundle);

    for _ in 0..3 {
        dual.evaluate(&mut ctx, &mut nodes, NodeId::ROOT).unwrap();
    }
    let err = dual.evaluate(&mut ctx, &mut nodes, NodeId::ROOT).unwrap_err();
    assert!(matches!(err, EvalError::IterationLimit { iterations: 3, limit: 2 }));
}

#[test]
fn test_cancelled_evaluation() {
    let mut ctx = uniform_context(dual_config(), 2);
    let mut nodes = ctx.new_arena();
    ctx.cancel.cancel();
    let mut solver = quadratic_solver(vec![1.0, 3.0]);
    let mut bundle = SubgradientAscent::with_defaults();

    let run = DualEvaluator::new(&mut solver, &mut bundle)
        .run(&mut ctx, &mut nodes, NodeId::ROOT)
        .unwrap();

    assert_eq!(run.last.skip, Skip::Cancelled);
    assert!(run.branch.is_none());
    assert_eq!(run.iterations, 1);
}

#[test]
fn test_non_improving_step_keeps_best_multipliers() {
    let mut ctx = uniform_context(dual_config(), 3);
    let mut nodes = ctx.new_arena();
    let mut solver = quadratic_solver(vec![1.0, 5.0, 9.0]);
    let mut bundle = SubgradientAscent::with_defaults();
    let mut dual = DualEvaluator::new(&mut solver, &mut bundle);

    let first = dual.evaluate(&mut ctx, &mut nodes, NodeId::ROOT).unwrap();
    assert!(first.increased);
    let weight = nodes[NodeId::ROOT].best_weight;
    let best_point = ctx.dual.best_point.clone();

    // pulls scenario 0 down to 0 and scenario 1 to the top of the box: dual value about -21.3
    nodes[NodeId::ROOT].multipliers = vec![3.0, 0.0];
    let second = dual.evaluate(&mut ctx, &mut nodes, NodeId::ROOT).unwrap();

    assert!(!second.increased);
    assert!(second.objective > 20.0);
    let root = &nodes[NodeId::ROOT];
    assert_eq!(root.bound, 0.0);
    assert_eq!(root.best_multipliers, vec![0.0, 0.0]);
    assert_eq!(root.multipliers, vec![3.0, 0.0]);
    assert_eq!(root.best_weight, weight);
    assert_eq!(ctx.dual.best_point, best_point);
    assert_eq!(ctx.dual.best_value, 0.0);
}

#[test]
fn test_agreement_without_improvement_restores_best_point() {
    let mut ctx = uniform_context(dual_config(), 3);
    let mut nodes = ctx.new_arena();
    let mut solver = quadratic_solver(vec![1.0, 5.0, 9.0]);
    let mut bundle = SubgradientAscent::with_defaults();
    let mut dual = DualEvaluator::new(&mut solver, &mut bundle);
    dual.evaluate(&mut ctx, &mut nodes, NodeId::ROOT).unwrap();

    // every scenario lands on x = 5 with value 32/3, below a bound already known
    nodes[NodeId::ROOT].bound = 20.0;
    nodes[NodeId::ROOT].multipliers = vec![-8.0 / 3.0, -8.0 / 3.0];
    let report = dual.evaluate(&mut ctx, &mut nodes, NodeId::ROOT).unwrap();

    assert!(!report.increased);
    assert!((report.objective + PRIMAL_OPTIMUM).abs() < 1e-9);
    // the cached disagreeing solutions replace the agreeing ones
    assert_eq!(report.violations, 1);
    assert_eq!(report.dispersion_norm, 8.0);
    assert_eq!(report.subgradient, vec![-4.0, -4.0]);
    let root = &nodes[NodeId::ROOT];
    let restored: Vec<f64> = root
        .scenarios
        .iter()
        .map(|s| s.solution.as_ref().unwrap()[0])
        .collect();
    assert_eq!(restored, vec![1.0, 5.0, 9.0]);
    assert_eq!(root.bound, 20.0);
    assert!(!ctx.dual.use_lb_profile);
}
