mod common;

use common::{quadratic_solver, uniform_context, ScriptedSolver};
use sipdd_algo::evaluate_lower_bound;
use sipdd_core::{NodeId, SipConfig, Tightening, WarmStartMode};
use sipdd_solver_common::{StartSource, SubproblemOutcome, SubproblemRequest};

fn config(mode: WarmStartMode) -> SipConfig {
    let mut config = SipConfig::default();
    config.bounding.warm_start = mode;
    config
}

#[test]
fn test_father_starts_repaired_into_child_range() {
    let mut ctx = uniform_context(config(WarmStartMode::FatherAndSiblingsWithBound), 3);
    let mut nodes = ctx.new_arena();
    let mut solver = quadratic_solver(vec![1.0, 5.0, 9.0]);
    evaluate_lower_bound(&mut ctx, &mut nodes, NodeId::ROOT, &mut solver).unwrap();
    let child = nodes
        .add_child(NodeId::ROOT, Tightening { var: 0, lower: 0.0, upper: 5.0 })
        .unwrap();
    solver.calls.clear();

    evaluate_lower_bound(&mut ctx, &mut nodes, child, &mut solver).unwrap();

    let call = &solver.calls[0];
    assert_eq!(call.scenario, 2);
    // 9 is clamped to 5 and then collapses with the existing 5
    let values: Vec<Vec<f64>> = call.starts.iter().map(|c| c.values.clone()).collect();
    assert_eq!(values, vec![vec![1.0], vec![5.0]]);
    assert!(call.starts.iter().all(|c| c.source == StartSource::Father));
    assert_eq!(call.objective_lower_bound, Some(0.0));
}

#[test]
fn test_siblings_offered_at_the_root() {
    let mut ctx = uniform_context(config(WarmStartMode::FatherAndSiblings), 3);
    let mut nodes = ctx.new_arena();
    let mut solver = quadratic_solver(vec![1.0, 5.0, 9.0]);

    evaluate_lower_bound(&mut ctx, &mut nodes, NodeId::ROOT, &mut solver).unwrap();

    assert!(solver.calls[0].starts.is_empty());
    assert_eq!(solver.calls[1].starts.len(), 1);
    assert_eq!(solver.calls[2].starts.len(), 2);
    assert!(solver.calls[2]
        .starts
        .iter()
        .all(|c| c.source == StartSource::Sibling));
    // no bound inheritance in this mode, nor at the root in any mode
    assert!(solver.calls.iter().all(|c| c.objective_lower_bound.is_none()));
}

#[test]
fn test_previous_scenario_only() {
    let mut ctx = uniform_context(config(WarmStartMode::PreviousScenario), 3);
    let mut nodes = ctx.new_arena();
    let mut solver = quadratic_solver(vec![1.0, 5.0, 9.0]);

    evaluate_lower_bound(&mut ctx, &mut nodes, NodeId::ROOT, &mut solver).unwrap();

    assert!(solver.calls[0].starts.is_empty());
    assert_eq!(solver.calls[1].starts[0].values, vec![1.0]);
    assert_eq!(solver.calls[2].starts.len(), 1);
    assert_eq!(solver.calls[2].starts[0].values, vec![5.0]);
    assert_eq!(solver.calls[2].starts[0].source, StartSource::PreviousScenario);
}

#[test]
fn test_start_value_control_follows_mode() {
    let mut ctx = uniform_context(config(WarmStartMode::Off), 2);
    let mut nodes = ctx.new_arena();
    let mut solver = quadratic_solver(vec![1.0, 2.0]);
    evaluate_lower_bound(&mut ctx, &mut nodes, NodeId::ROOT, &mut solver).unwrap();
    assert_eq!(solver.start_control, vec![false, false]);
    assert!(nodes[NodeId::ROOT].scenarios[0].integer_start.is_none());

    let mut ctx = uniform_context(config(WarmStartMode::Advanced), 2);
    let mut nodes = ctx.new_arena();
    let mut solver = quadratic_solver(vec![1.0, 2.0]);
    evaluate_lower_bound(&mut ctx, &mut nodes, NodeId::ROOT, &mut solver).unwrap();
    assert_eq!(solver.start_control, vec![true, true]);
    assert!(solver.calls.iter().all(|c| c.starts.is_empty()));
}

#[test]
fn test_inherited_first_position_still_sets_control() {
    let mut ctx = uniform_context(config(WarmStartMode::FatherAndSiblingsWithBound), 2);
    let mut nodes = ctx.new_arena();
    let mut solver = quadratic_solver(vec![1.0, 9.0]);
    evaluate_lower_bound(&mut ctx, &mut nodes, NodeId::ROOT, &mut solver).unwrap();
    // keeps every root solution
    let child = nodes
        .add_child(NodeId::ROOT, Tightening { var: 0, lower: 0.0, upper: 10.0 })
        .unwrap();
    solver.calls.clear();
    solver.start_control.clear();

    evaluate_lower_bound(&mut ctx, &mut nodes, child, &mut solver).unwrap();

    assert!(solver.calls.is_empty());
    assert_eq!(solver.start_control, vec![true]);
}

#[test]
fn test_no_bound_inherited_under_dual_bounding() {
    let mut config = config(WarmStartMode::FatherAndSiblingsWithBound);
    config.dual.enabled = true;
    let mut ctx = uniform_context(config, 3);
    let mut nodes = ctx.new_arena();
    let mut solver = quadratic_solver(vec![1.0, 5.0, 9.0]);
    evaluate_lower_bound(&mut ctx, &mut nodes, NodeId::ROOT, &mut solver).unwrap();
    let child = nodes
        .add_child(NodeId::ROOT, Tightening { var: 0, lower: 0.0, upper: 3.0 })
        .unwrap();
    nodes[child].multipliers = vec![7.0, -7.0];
    solver.calls.clear();

    evaluate_lower_bound(&mut ctx, &mut nodes, child, &mut solver).unwrap();

    assert!(!solver.calls.is_empty());
    for call in &solver.calls {
        assert!(call.cost_shift.is_some());
        // the shifted objective can fall far below the father's scenario bound
        assert_eq!(call.objective_lower_bound, None);
    }
}

#[test]
fn test_control_set_at_first_position_after_reordering() {
    let mut ctx = uniform_context(config(WarmStartMode::FatherAndSiblingsWithBound), 2);
    let mut nodes = ctx.new_arena();
    let mut solver = ScriptedSolver::new(|r: &SubproblemRequest<'_>| {
        if r.scenario == 0 {
            SubproblemOutcome::optimal(1.0, vec![8.0_f64.min(r.bounds[0].1)])
        } else {
            SubproblemOutcome::optimal(2.0, vec![0.0])
        }
    });
    evaluate_lower_bound(&mut ctx, &mut nodes, NodeId::ROOT, &mut solver).unwrap();
    assert_eq!(ctx.order.as_slice(), &[1, 0]);

    // scenario 1 leads the order and keeps its solution, scenario 0 is re-solved
    let child = nodes
        .add_child(NodeId::ROOT, Tightening { var: 0, lower: 0.0, upper: 5.0 })
        .unwrap();
    solver.calls.clear();
    solver.start_control.clear();

    evaluate_lower_bound(&mut ctx, &mut nodes, child, &mut solver).unwrap();

    assert_eq!(solver.scenarios_solved(), vec![0]);
    assert_eq!(solver.start_control, vec![true, true]);
}
