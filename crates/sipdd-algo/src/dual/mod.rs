//! Lagrangian dual bounding of one node.
//!
//! The nonanticipativity relations linking the scenario copies of the first
//! stage are dualised with one multiplier each. For fixed multipliers every
//! scenario problem is solved with its first-stage costs shifted by the
//! linking terms; the probability-weighted optimal values form the dual
//! function, a valid lower bound for any multiplier vector.
//!
//! [`DualEvaluator::evaluate`] computes the dual function at the node's
//! current multipliers. [`DualEvaluator::run`] hands the negated value and
//! subgradient to a [`BundleOptimizer`] until it signals stop.

pub mod subgradient;

pub use subgradient::{SubgradientAscent, SubgradientConfig};

use serde::{Deserialize, Serialize};
use sipdd_core::numeric::{gap_percent, is_huge};
use sipdd_core::{BoundingStep, BranchDecision, NodeArena, NodeId, SipError, INFINITE_BOUND};
use sipdd_solver_common::{
    BundleOptimizer, DualPoint, ParamProfile, Relaxation, SolveStatus, SubproblemRequest,
    SubproblemSolver,
};
use web_time::Instant;

use crate::arena::ScratchArena;
use crate::branching::select_branch;
use crate::context::{BestPoint, EvalContext};
use crate::disposition::{skip_upper_bound, Skip};
use crate::envelope::Envelope;
use crate::error::{EvalError, EvalResult};
use crate::scenario_solve::{check_box, clean_first_stage, rounded_integers, solve_with_second_pass};
use crate::warm_start;

/// Result of one dual function evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DualReport {
    pub node: NodeId,
    /// Negated dual value, as handed to the bundle optimizer.
    pub objective: f64,
    /// Node bound after the evaluation.
    pub bound: f64,
    /// Residual of every linking relation.
    pub subgradient: Vec<f64>,
    /// Per-variable spread of the scenario solutions.
    pub spreads: Vec<f64>,
    pub violations: usize,
    pub dispersion_norm: f64,
    /// The dual value improved the node bound.
    pub increased: bool,
    pub skip: Skip,
    pub mean_gap: f64,
    pub problems_solved: usize,
    pub elapsed_ms: u64,
}

/// Result of a complete dual bounding run at one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DualRun {
    pub node: NodeId,
    pub bound: f64,
    /// Evaluations that completed without a retry.
    pub iterations: usize,
    pub best_weight: f64,
    pub leaf: bool,
    pub branch: Option<BranchDecision>,
    pub last: DualReport,
    pub elapsed_ms: u64,
}

/// Dual bounding with a scenario solver and a bundle optimizer.
pub struct DualEvaluator<'a, S: ?Sized, B: ?Sized> {
    solver: &'a mut S,
    bundle: &'a mut B,
}

impl<'a, S, B> DualEvaluator<'a, S, B>
where
    S: SubproblemSolver + ?Sized,
    B: BundleOptimizer + ?Sized,
{
    pub fn new(solver: &'a mut S, bundle: &'a mut B) -> Self {
        Self { solver, bundle }
    }

    /// Evaluate the dual function at the node's current multipliers.
    ///
    /// Returns [`EvalError::Retryable`] when a scenario turned infeasible
    /// and retries remain. Slots solved during the failed attempt are
    /// released, so the retry solves them again.
    /// Only completed evaluations count as dual iterations.
    pub fn evaluate(
        &mut self,
        ctx: &mut EvalContext,
        nodes: &mut NodeArena,
        node_id: NodeId,
    ) -> EvalResult<DualReport> {
        if nodes.get(node_id).is_none() {
            return Err(SipError::UnknownNode(node_id.index()).into());
        }
        let limit = ctx.config.dual.total_iteration_limit + ctx.config.dual.iteration_slack;
        if ctx.dual.iteration > limit {
            return Err(EvalError::IterationLimit {
                iterations: ctx.dual.iteration,
                limit,
            });
        }
        let result = self.evaluate_at_multipliers(ctx, nodes, node_id);
        if !result.as_ref().is_err_and(EvalError::is_retryable) {
            ctx.dual.iteration += 1;
        }
        result
    }

    fn evaluate_at_multipliers(
        &mut self,
        ctx: &mut EvalContext,
        nodes: &mut NodeArena,
        node_id: NodeId,
    ) -> EvalResult<DualReport> {
        let start = Instant::now();
        let first = ctx.dual.iteration == 0;
        let scratch = ScratchArena::new();
        let accuracy = ctx.accuracy();
        let n_scenarios = ctx.n_scenarios();
        let profile = if ctx.dual.use_lb_profile {
            ParamProfile::LowerBound
        } else {
            ParamProfile::Dual
        };
        let bounds = nodes.effective_box(node_id, &ctx.model);
        let relaxation = ctx.relaxation(node_id);

        let node = &mut nodes[node_id];
        node.step = BoundingStep::Dual;
        node.solved = true;
        node.branch = None;
        if !(ctx.config.dual.inherit_solutions && first) {
            node.release_solutions();
        }
        let multipliers = node.multipliers.clone();

        let mut envelope = Envelope::new_in(&scratch, ctx.n_first());
        let mut running = 0.0;
        let mut upper = 0.0;
        let mut mean_gap = 0.0;
        let mut solved = 0;
        let mut solved_here = scratch.alloc_vec::<usize>();

        for position in 0..n_scenarios {
            let scenario = ctx.order.scenario(position);
            let p = ctx.scenarios.probability(scenario);

            if ctx.cancel.is_cancelled() {
                tracing::info!(node = %node_id, position, "dual evaluation cancelled");
                let mut report = self.empty_report(ctx, nodes, node_id, Skip::Cancelled, start);
                report.objective = -running;
                report.problems_solved = solved;
                return Ok(report);
            }

            let slot = &nodes[node_id].scenarios[scenario];
            if let Some(handle) = &slot.solution {
                running = add_weighted(running, p, slot.bound);
                upper += p * slot.objective;
                mean_gap += p * gap_percent(slot.objective, slot.bound);
                envelope.include(handle);
                continue;
            }

            solved += 1;
            let warm = warm_start::prepare(ctx, &scratch, nodes, node_id, position, &mut *self.solver)?;
            let shift = ctx.linking.objective_shift(scenario, &multipliers, p);
            let request = SubproblemRequest {
                scenario,
                bounds: &bounds,
                cost_shift: Some(&shift),
                relaxation,
                starts: &warm.candidates,
                objective_lower_bound: warm.objective_lower_bound,
                profile,
            };
            let outcome = solve_with_second_pass(&mut *self.solver, &request, ctx.config.bounding.second_pass)
                .inspect_err(|e| {
                    tracing::error!(node = %node_id, scenario, error = %e, "dual scenario solve failed");
                })?;

            match outcome.status {
                SolveStatus::InfeasibleTimeLimit => {
                    tracing::warn!(node = %node_id, scenario, "infeasibility detected at time limit");
                    let mut report = self.empty_report(ctx, nodes, node_id, Skip::TimeLimitInfeasible, start);
                    mark_infeasible(nodes, node_id, &mut report);
                    return Ok(report);
                }
                SolveStatus::Infeasible => {
                    let allowed = if first {
                        ctx.config.dual.max_retries_initial
                    } else {
                        ctx.config.dual.max_retries_iterating
                    };
                    if ctx.dual.retries < allowed {
                        ctx.dual.retries += 1;
                        let node = &mut nodes[node_id];
                        for &s in &solved_here {
                            node.scenarios[s].release();
                        }
                        tracing::warn!(
                            node = %node_id,
                            scenario,
                            attempt = ctx.dual.retries,
                            "scenario infeasible under current multipliers, retrying"
                        );
                        return Err(EvalError::Retryable {
                            scenario,
                            attempt: ctx.dual.retries,
                        });
                    }
                    ctx.dual.retries = 0;
                    tracing::info!(node = %node_id, scenario, "scenario infeasible, node bound set to infinity");
                    let mut report = self.empty_report(ctx, nodes, node_id, Skip::NoSolution, start);
                    mark_infeasible(nodes, node_id, &mut report);
                    return Ok(report);
                }
                SolveStatus::NoSolution => {
                    let bound = if relaxation == Relaxation::Full {
                        INFINITE_BOUND
                    } else {
                        outcome.best_bound
                    };
                    let slot = &mut nodes[node_id].scenarios[scenario];
                    slot.release();
                    slot.objective = INFINITE_BOUND;
                    slot.bound = bound;
                    slot.bound_without_penalty = bound;
                    slot.optimal = false;
                    running = add_weighted(running, p, bound);
                    upper = INFINITE_BOUND;
                    solved_here.push(scenario);
                    tracing::debug!(node = %node_id, scenario, bound, "no dual solution within limits");
                }
                SolveStatus::Optimal | SolveStatus::Suboptimal => {
                    let optimal = outcome.status.is_optimal();
                    let objective = outcome.objective;
                    let mut best_bound = if optimal {
                        objective
                    } else if relaxation == Relaxation::Full {
                        INFINITE_BOUND
                    } else {
                        outcome.best_bound
                    };
                    if !optimal && is_huge(best_bound) {
                        best_bound = objective;
                    }
                    let value = best_bound.min(objective);
                    let gap = gap_percent(objective, best_bound);
                    mean_gap += p * gap;
                    running = add_weighted(running, p, value);
                    upper += p * objective;

                    let mut x = outcome.first_stage;
                    clean_first_stage(&ctx.model, &mut x, accuracy);
                    check_box(scenario, &x, &bounds);
                    let without_penalty = if value == INFINITE_BOUND {
                        value
                    } else {
                        value - ctx.linking.penalty(scenario, &x, &multipliers, p)
                    };
                    ctx.record_wait_and_see(scenario, without_penalty);
                    let integers = (!outcome.integer_values.is_empty())
                        .then(|| rounded_integers(&outcome.integer_values));
                    ctx.dual.integer_starts[scenario].clone_from(&integers);

                    let (handle, reused) = ctx.pool.intern(x);
                    envelope.include(&handle);
                    let slot = &mut nodes[node_id].scenarios[scenario];
                    slot.solution = Some(handle);
                    slot.inherited = false;
                    slot.origin = Some(node_id);
                    slot.objective = objective;
                    slot.bound = without_penalty;
                    slot.bound_without_penalty = without_penalty;
                    slot.solved = true;
                    slot.optimal = optimal;
                    solved_here.push(scenario);
                    if ctx.config.bounding.warm_start.is_enabled() && integers.is_some() {
                        slot.integer_start = integers;
                    }
                    tracing::debug!(
                        node = %node_id,
                        scenario,
                        objective,
                        value,
                        without_penalty,
                        gap,
                        shared = reused,
                        "dual scenario solved"
                    );
                }
            }
        }

        let (mut violations, mut norm) = envelope.measure(accuracy);
        let increased = running > nodes[node_id].bound;
        if increased {
            let weight = self.bundle.last_weight();
            let node = &mut nodes[node_id];
            tracing::debug!(
                node = %node_id,
                bound = running,
                previous = node.bound,
                weight,
                "dual step increased the bound"
            );
            ctx.dual.use_lb_profile = false;
            node.best_multipliers.clone_from(&multipliers);
            node.best_weight = if weight < 0.0 {
                ctx.config.dual.fallback_weight
            } else {
                weight
            };
            node.bound = running;
            node.violations = violations;
            ctx.dual.best_point = Some(BestPoint {
                solutions: node.scenarios.iter().map(|s| s.solution.clone()).collect(),
                objectives: node.scenarios.iter().map(|s| s.objective).collect(),
                bounds: node.scenarios.iter().map(|s| s.bound).collect(),
            });
        } else {
            tracing::debug!(
                node = %node_id,
                value = running,
                bound = nodes[node_id].bound,
                upper,
                "dual step did not increase the bound"
            );
        }

        let mut skip = skip_upper_bound(ctx, &nodes[node_id]);
        if violations > 0 && matches!(skip, Skip::NoSolution | Skip::Dominated) {
            envelope.saturate();
        } else if violations == 0 && skip == Skip::Optimal {
            skip = if nodes[node_id].bound < ctx.search.best_value {
                Skip::EvaluateNodeSolution
            } else {
                Skip::None
            };
        }

        // agreeing scenarios with a worse value would report a zero subgradient
        if violations == 0 && !increased && !nodes[node_id].multipliers_all_zero() {
            if let Some(best) = ctx.dual.best_point.as_ref() {
                if mean_gap != 0.0 {
                    ctx.dual.use_lb_profile = true;
                }
                if upper <= nodes[node_id].bound {
                    tracing::debug!(node = %node_id, "restoring first stages of the best dual point");
                    let node = &mut nodes[node_id];
                    envelope = Envelope::new_in(&scratch, ctx.n_first());
                    for (slot, solution) in node.scenarios.iter_mut().zip(&best.solutions) {
                        if let Some(handle) = solution {
                            slot.solution = Some(handle.clone());
                            slot.solved = true;
                            envelope.include(handle);
                        }
                    }
                    (violations, norm) = envelope.measure(accuracy);
                }
            }
        }

        let node = &mut nodes[node_id];
        node.violations = violations;
        node.dispersion_norm = norm;
        ctx.dual.objective_increased = ctx.dual.best_value < running;
        ctx.dual.best_value = ctx.dual.best_value.max(running);
        ctx.dual.max_mean_gap = ctx.dual.max_mean_gap.max(mean_gap);

        let mut most_frequent = None;
        let mut count = ctx.config.dual.most_frequent_min_count;
        for scenario in 0..n_scenarios {
            let c = node.identical_count(scenario);
            if c > count {
                count = c;
                most_frequent = Some(scenario);
            }
        }
        ctx.dual.most_frequent = most_frequent;
        ctx.dual.retries = 0;

        let solutions: Vec<Option<&[f64]>> = node
            .scenarios
            .iter()
            .map(|s| s.solution.as_deref().map(|x| x.values()))
            .collect();
        let subgradient = ctx.linking.subgradient(&solutions);

        let report = DualReport {
            node: node_id,
            objective: -running,
            bound: node.bound,
            subgradient,
            spreads: envelope.spreads(),
            violations,
            dispersion_norm: norm,
            increased,
            skip,
            mean_gap,
            problems_solved: solved,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        tracing::debug!(
            node = %node_id,
            iteration = ctx.dual.iteration,
            value = running,
            violations,
            dispersion = norm,
            skip = %skip,
            "dual function evaluated"
        );
        Ok(report)
    }

    /// Maximise the dual function at `node_id` with the bundle optimizer,
    /// then leave the node with its best multipliers and a branching decision.
    pub fn run(&mut self, ctx: &mut EvalContext, nodes: &mut NodeArena, node_id: NodeId) -> EvalResult<DualRun> {
        let start = Instant::now();
        ctx.dual.start_node();
        let limit = ctx.config.dual.node_iteration_limit;
        let mut iterations = 0;
        let mut last = None;

        while iterations < limit {
            let report = match self.evaluate(ctx, nodes, node_id) {
                Ok(report) => report,
                Err(e) if e.is_retryable() => {
                    tracing::debug!(node = %node_id, error = %e, "retrying dual evaluation");
                    continue;
                }
                Err(e) => return Err(e),
            };
            iterations += 1;

            let finished = matches!(report.skip, Skip::Cancelled | Skip::Dominated)
                || report.bound == INFINITE_BOUND;
            let stop = finished || {
                let gradient: Vec<f64> = report.subgradient.iter().map(|g| -g).collect();
                let step = self.bundle.step(&DualPoint {
                    multipliers: &nodes[node_id].multipliers,
                    value: report.objective,
                    gradient: &gradient,
                })?;
                if !step.stop {
                    nodes[node_id].multipliers = step.multipliers;
                }
                step.stop
            };
            last = Some(report);
            if stop {
                break;
            }
        }

        let Some(last) = last else {
            return Err(EvalError::IterationLimit { iterations, limit });
        };
        let null_dispersion = ctx.config.bounding.null_dispersion;
        let node = &mut nodes[node_id];
        if ctx.dual.best_value > -INFINITE_BOUND {
            node.multipliers.clone_from(&node.best_multipliers);
        }
        if matches!(last.skip, Skip::Dominated | Skip::NoSolution | Skip::TimeLimitInfeasible)
            || last.dispersion_norm < null_dispersion
        {
            node.leaf = true;
        }
        let branch = if last.skip == Skip::Cancelled || node.leaf {
            None
        } else {
            select_branch(ctx, nodes, node_id, &last.spreads)
        };

        let node = &nodes[node_id];
        tracing::info!(
            node = %node_id,
            bound = node.bound,
            iterations,
            optimizer = self.bundle.name(),
            "dual bounding finished"
        );
        Ok(DualRun {
            node: node_id,
            bound: node.bound,
            iterations,
            best_weight: node.best_weight,
            leaf: node.leaf,
            branch,
            last,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn empty_report(
        &self,
        ctx: &EvalContext,
        nodes: &NodeArena,
        node_id: NodeId,
        skip: Skip,
        start: Instant,
    ) -> DualReport {
        let node = &nodes[node_id];
        DualReport {
            node: node_id,
            objective: -INFINITE_BOUND,
            bound: node.bound,
            subgradient: vec![0.0; ctx.n_multipliers()],
            spreads: Vec::new(),
            violations: node.violations,
            dispersion_norm: node.dispersion_norm,
            increased: false,
            skip,
            mean_gap: 0.0,
            problems_solved: 0,
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    }
}

fn add_weighted(running: f64, probability: f64, bound: f64) -> f64 {
    if bound == INFINITE_BOUND {
        INFINITE_BOUND
    } else {
        running + probability * bound
    }
}

fn mark_infeasible(nodes: &mut NodeArena, node_id: NodeId, report: &mut DualReport) {
    let node = &mut nodes[node_id];
    node.bound = INFINITE_BOUND;
    node.leaf = true;
    report.bound = INFINITE_BOUND;
}
