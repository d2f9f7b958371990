//! Scenario lower-bound evaluation of one node.
//!
//! Every scenario problem is solved within the node's box, in bounding
//! order. The probability-weighted bounds give the node bound, the weighted
//! objectives a candidate incumbent value, and the min/max envelope of the
//! first-stage solutions tells whether the scenarios already agree.
//!
//! Because the father's per-scenario bounds stay valid for the child, the
//! remaining scenarios can be bounded by the father's values. As soon as the
//! scenarios solved so far plus that remainder exceed the incumbent the node
//! is cut off without solving the rest.

use serde::{Deserialize, Serialize};
use sipdd_core::numeric::{gap_percent, is_huge};
use sipdd_core::{BoundingStep, NodeArena, NodeId, SipError, INFINITE_BOUND};
use sipdd_solver_common::{
    ParamProfile, Relaxation, SolveStatus, SubproblemRequest, SubproblemSolver,
};
use web_time::Instant;

use crate::arena::ScratchArena;
use crate::branching::select_branch;
use crate::context::EvalContext;
use crate::disposition::{skip_upper_bound, update_optimal_node, Skip};
use crate::envelope::Envelope;
use crate::error::EvalResult;
use crate::ordering::order_scenarios;
use crate::scenario_solve::{check_box, clean_first_stage, rounded_integers, solve_with_second_pass};
use crate::warm_start;

/// Relative tolerance of the premature cutoff test.
const CUTOFF_EPS: f64 = 2e-15;

/// Relative decrease against the father's bound that is reported.
const MONOTONE_TOL: f64 = 1e-6;

/// Summary of one node evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    pub node: NodeId,
    pub bound: f64,
    pub skip: Skip,
    pub leaf: bool,
    pub violations: usize,
    pub dispersion_norm: f64,
    /// Expected objective of the scenario solutions.
    pub incumbent: f64,
    /// Probability-weighted MIP gap in percent.
    pub mean_gap: f64,
    /// Scenario problems solved (not inherited) in this pass.
    pub problems_solved: usize,
    /// Position of the first scenario skipped by premature cutoff.
    pub cutoff_at: Option<usize>,
    pub elapsed_ms: u64,
}

impl NodeReport {
    /// False after cancellation: only the fully processed scenarios are meaningful.
    pub fn is_trustworthy(&self) -> bool {
        self.skip != Skip::Cancelled
    }
}

/// Running aggregates of one pass over the scenarios.
struct Pass<'s> {
    node: NodeId,
    bounds: Vec<(f64, f64)>,
    relaxation: Relaxation,
    shift_objective: bool,
    running: f64,
    incumbent: f64,
    mean_gap: f64,
    all_optimal: bool,
    solved: usize,
    envelope: Envelope<'s>,
}

impl<'s> Pass<'s> {
    fn accumulate(&mut self, probability: f64, bound: f64, objective: f64) {
        if bound == INFINITE_BOUND {
            self.running = INFINITE_BOUND;
        } else {
            self.running += probability * bound;
        }
        self.incumbent += probability * objective;
    }

    /// Solve the scenario at `position`. Returns a verdict when the node
    /// turned out infeasible.
    fn solve_scenario<S: SubproblemSolver + ?Sized>(
        &mut self,
        ctx: &mut EvalContext,
        scratch: &ScratchArena,
        nodes: &mut NodeArena,
        position: usize,
        solver: &mut S,
    ) -> EvalResult<Option<Skip>> {
        let scenario = ctx.order.scenario(position);
        let p = ctx.scenarios.probability(scenario);
        let accuracy = ctx.accuracy();

        let warm = warm_start::prepare(ctx, scratch, nodes, self.node, position, solver)?;
        let shift = self
            .shift_objective
            .then(|| ctx.linking.objective_shift(scenario, &nodes[self.node].multipliers, p));
        let request = SubproblemRequest {
            scenario,
            bounds: &self.bounds,
            cost_shift: shift.as_deref(),
            relaxation: self.relaxation,
            starts: &warm.candidates,
            objective_lower_bound: warm.objective_lower_bound,
            profile: ParamProfile::LowerBound,
        };
        let outcome = solve_with_second_pass(solver, &request, ctx.config.bounding.second_pass)
            .inspect_err(|e| {
                tracing::error!(node = %self.node, scenario, error = %e, "scenario solve failed");
            })?;

        match outcome.status {
            SolveStatus::Infeasible | SolveStatus::InfeasibleTimeLimit => {
                tracing::info!(node = %self.node, scenario, status = %outcome.status, "scenario infeasible");
                let node = &mut nodes[self.node];
                node.bound = INFINITE_BOUND;
                node.leaf = true;
                for &s in &ctx.order.as_slice()[position..] {
                    node.scenarios[s].release();
                }
                self.running = INFINITE_BOUND;
                let skip = if outcome.status == SolveStatus::InfeasibleTimeLimit {
                    Skip::TimeLimitInfeasible
                } else {
                    Skip::NoSolution
                };
                return Ok(Some(skip));
            }
            SolveStatus::NoSolution => {
                let bound = if self.relaxation == Relaxation::Full {
                    INFINITE_BOUND
                } else {
                    outcome.best_bound
                };
                let slot = &mut nodes[self.node].scenarios[scenario];
                slot.release();
                slot.objective = INFINITE_BOUND;
                slot.bound = bound;
                slot.bound_without_penalty = bound;
                slot.optimal = false;
                self.all_optimal = false;
                ctx.record_wait_and_see(scenario, bound);
                self.accumulate(p, bound, INFINITE_BOUND);
                tracing::debug!(node = %self.node, scenario, bound, "no solution within limits");
            }
            SolveStatus::Optimal | SolveStatus::Suboptimal => {
                let optimal = outcome.status.is_optimal();
                let objective = outcome.objective;
                let mut best_bound = if optimal {
                    objective
                } else if self.relaxation == Relaxation::Full {
                    INFINITE_BOUND
                } else {
                    outcome.best_bound
                };
                if !optimal && is_huge(best_bound) {
                    best_bound = objective;
                }
                let bound = best_bound.min(objective);
                let gap = gap_percent(objective, best_bound);
                self.mean_gap += p * gap;
                self.all_optimal &= optimal;

                let mut x = outcome.first_stage;
                clean_first_stage(&ctx.model, &mut x, accuracy);
                check_box(scenario, &x, &self.bounds);

                let without_penalty = if ctx.config.dual.enabled && bound != INFINITE_BOUND {
                    let penalty = ctx
                        .linking
                        .penalty(scenario, &x, &nodes[self.node].multipliers, p);
                    (bound - penalty).min(bound)
                } else {
                    bound
                };
                ctx.record_wait_and_see(scenario, without_penalty);

                let (handle, reused) = ctx.pool.intern(x);
                self.envelope.include(&handle);

                let slot = &mut nodes[self.node].scenarios[scenario];
                slot.solution = Some(handle);
                slot.inherited = false;
                slot.origin = Some(self.node);
                slot.objective = objective;
                slot.bound = bound;
                slot.bound_without_penalty = without_penalty;
                slot.solved = true;
                slot.optimal = optimal;
                if ctx.config.bounding.warm_start.is_enabled() && !outcome.integer_values.is_empty() {
                    slot.integer_start = Some(rounded_integers(&outcome.integer_values));
                }
                self.accumulate(p, bound, objective);
                tracing::debug!(
                    node = %self.node,
                    scenario,
                    objective,
                    bound,
                    gap,
                    shared = reused,
                    "scenario bounded"
                );
            }
        }
        Ok(None)
    }
}

/// Bound on the scenarios not yet processed, or `-inf` when premature
/// cutoff cannot be used at this node.
fn rest_bound(ctx: &EvalContext, nodes: &NodeArena, node_id: NodeId) -> f64 {
    let node = &nodes[node_id];
    let Some(father) = node.father else {
        return -INFINITE_BOUND;
    };
    let father = &nodes[father];
    if father.step == BoundingStep::Dual {
        return -INFINITE_BOUND;
    }
    if !ctx.config.dual.enabled {
        return father.bound;
    }
    let without_penalty: f64 = node
        .scenarios
        .iter()
        .zip(ctx.scenarios.probabilities())
        .map(|(slot, p)| p * slot.bound_without_penalty)
        .sum();
    (without_penalty - ctx.accuracy()).min(father.bound)
}

/// Compute the scenario lower bound of `node_id` and decide its disposition.
///
/// On return the node carries its bound, leaf flag, dispersion data and,
/// unless it is a leaf, a branching decision. Infeasibility, cutoff and
/// cancellation are reported through [`NodeReport::skip`]; only solver
/// failures are errors.
pub fn evaluate_lower_bound<S: SubproblemSolver + ?Sized>(
    ctx: &mut EvalContext,
    nodes: &mut NodeArena,
    node_id: NodeId,
    solver: &mut S,
) -> EvalResult<NodeReport> {
    if nodes.get(node_id).is_none() {
        return Err(SipError::UnknownNode(node_id.index()).into());
    }
    let start = Instant::now();
    let scratch = ScratchArena::new();
    let n_scenarios = ctx.n_scenarios();
    let accuracy = ctx.accuracy();

    let node = &mut nodes[node_id];
    node.solved = true;
    node.step = BoundingStep::Primal;
    node.branch = None;
    let shift_objective = ctx.config.dual.enabled && !node.multipliers_all_zero();

    let mut pass = Pass {
        node: node_id,
        bounds: nodes.effective_box(node_id, &ctx.model),
        relaxation: ctx.relaxation(node_id),
        shift_objective,
        running: 0.0,
        incumbent: 0.0,
        mean_gap: 0.0,
        all_optimal: true,
        solved: 0,
        envelope: Envelope::new_in(&scratch, ctx.n_first()),
    };
    let mut rest = rest_bound(ctx, nodes, node_id);
    let cutoff_factor = if ctx.search.best_value < 0.0 {
        1.0 - CUTOFF_EPS
    } else {
        1.0 + CUTOFF_EPS
    };

    for position in 0..n_scenarios {
        let scenario = ctx.order.scenario(position);
        let p = ctx.scenarios.probability(scenario);
        if rest.is_finite() {
            let father_bound = nodes[node_id].scenarios[scenario].bound;
            rest = if father_bound.is_finite() {
                rest - p * father_bound
            } else {
                -INFINITE_BOUND
            };
        }

        if ctx.cancel.is_cancelled() {
            tracing::info!(node = %node_id, position, "evaluation cancelled");
            return Ok(report(nodes, &pass, Skip::Cancelled, None, start));
        }

        let slot = &nodes[node_id].scenarios[scenario];
        if slot.inherited && slot.solution.is_some() {
            // first position, not scenario 0: the order may have moved it
            if position == 0 {
                warm_start::prepare(ctx, &scratch, nodes, node_id, position, solver)?;
            }
            let slot = &nodes[node_id].scenarios[scenario];
            pass.mean_gap += p * gap_percent(slot.objective, slot.bound);
            pass.all_optimal &= slot.optimal;
            let (bound, objective) = (slot.bound, slot.objective);
            if let Some(handle) = &slot.solution {
                pass.envelope.include(handle);
            }
            pass.accumulate(p, bound, objective);
            tracing::trace!(node = %node_id, scenario, bound, "inherited solution");
        } else {
            pass.solved += 1;
            ctx.search.problems_solved += 1;
            if let Some(skip) = pass.solve_scenario(ctx, &scratch, nodes, position, solver)? {
                return Ok(report(nodes, &pass, skip, None, start));
            }
        }

        if ctx.config.bounding.premature_cutoff
            && rest > -INFINITE_BOUND
            && position + 1 < n_scenarios
            && pass.running + rest > ctx.search.best_value * cutoff_factor
        {
            let node = &mut nodes[node_id];
            node.bound = pass.running + rest;
            node.leaf = true;
            ctx.search.cutoff_count += 1;
            tracing::debug!(
                node = %node_id,
                position,
                bound = node.bound,
                incumbent = ctx.search.best_value,
                "premature cutoff"
            );
            let skip = Skip::Dominated;
            return Ok(report(nodes, &pass, skip, Some(position + 1), start));
        }
    }

    if !ctx.order.is_sorted() {
        order_scenarios(ctx, &nodes[node_id]);
    }

    let node = &mut nodes[node_id];
    if pass.running >= node.bound {
        node.bound = pass.running;
    } else if ((pass.running - node.bound) / (pass.running.abs() + 1e-12)).abs() > MONOTONE_TOL {
        tracing::warn!(
            node = %node_id,
            computed = pass.running,
            father = node.bound,
            "node bound below father bound; keeping father bound"
        );
    }

    let mut skip = skip_upper_bound(ctx, &nodes[node_id]);
    let (violations, norm) = pass.envelope.measure(accuracy);
    let node = &mut nodes[node_id];
    node.violations = violations;
    node.dispersion_norm = norm;
    let bound = node.bound;
    let best = ctx.search.best_value;

    if !skip.is_none() {
        if violations == 0 {
            nodes[node_id].leaf = true;
            if update_optimal_node(ctx, node_id, bound, true) && bound < best {
                ctx.search.heuristic_value = bound;
                skip = Skip::EvaluateNodeSolution;
            }
        } else {
            pass.envelope.saturate();
        }
    } else {
        if bound < best + accuracy && pass.incumbent > best + accuracy {
            tracing::info!(
                node = %node_id,
                mean_gap = pass.mean_gap,
                incumbent = pass.incumbent,
                "node kept only by scenario gaps"
            );
            ctx.search.best_bound_hit = true;
        }
        ctx.search.max_mean_gap = ctx.search.max_mean_gap.max(pass.mean_gap);

        if violations == 0 {
            nodes[node_id].leaf = true;
            if update_optimal_node(ctx, node_id, bound, false) && pass.incumbent < best {
                ctx.search.heuristic_value = pass.incumbent;
                skip = Skip::EvaluateNodeSolution;
            }
            if pass.relaxation != Relaxation::Full {
                skip = settle_common_solution(ctx, &scratch, nodes, &pass, skip, solver)?;
            }
        }
        if pass.solved == 0 {
            skip = Skip::NoSolution;
        }
    }

    let node = &mut nodes[node_id];
    if node.dispersion_norm < ctx.config.bounding.null_dispersion {
        node.leaf = true;
    }
    if !node.leaf {
        let spreads = pass.envelope.spreads();
        select_branch(ctx, nodes, node_id, &spreads);
    }

    let out = report(nodes, &pass, skip, None, start);
    tracing::debug!(
        node = %node_id,
        bound = out.bound,
        violations = out.violations,
        dispersion = out.dispersion_norm,
        skip = %out.skip,
        "lower bound evaluated"
    );
    Ok(out)
}

/// All scenarios agree on the first stage: decide whether the common
/// solution becomes the incumbent right away.
fn settle_common_solution<S: SubproblemSolver + ?Sized>(
    ctx: &mut EvalContext,
    scratch: &ScratchArena,
    nodes: &mut NodeArena,
    pass: &Pass<'_>,
    mut skip: Skip,
    solver: &mut S,
) -> EvalResult<Skip> {
    let node_id = pass.node;
    let dual_mode = ctx.config.dual.enabled;
    nodes[node_id].dispersion_norm = 0.0;
    ctx.search.heuristic_value = pass.incumbent;
    if pass.all_optimal {
        ctx.search.heuristic_value = nodes[node_id].bound;
        nodes[node_id].leaf = true;
        if !ctx.config.risk.is_active() {
            nodes[node_id].bound = pass.incumbent;
        }
    }
    if !dual_mode {
        skip = Skip::EvaluateNodeSolution;
    }
    if ctx.search.heuristic_value >= ctx.search.best_value || skip != Skip::EvaluateNodeSolution {
        return Ok(skip);
    }
    if !nodes[node_id].multipliers_all_zero() {
        // scenario objectives contain the Lagrangian term
        return Ok(Skip::None);
    }
    verify_and_install(ctx, scratch, nodes, pass, solver)
}

/// Re-solve inherited scenarios to confirm the common first stage, then
/// install the node's solution as the incumbent.
fn verify_and_install<S: SubproblemSolver + ?Sized>(
    ctx: &mut EvalContext,
    scratch: &ScratchArena,
    nodes: &mut NodeArena,
    pass: &Pass<'_>,
    solver: &mut S,
) -> EvalResult<Skip> {
    let node_id = pass.node;
    let accuracy = ctx.accuracy();
    for scenario in 0..ctx.n_scenarios() {
        let slot = &nodes[node_id].scenarios[scenario];
        if slot.origin.map_or(true, |origin| origin == node_id) {
            continue;
        }
        let position = ctx.order.position_of(scenario).unwrap_or(scenario);
        tracing::debug!(node = %node_id, scenario, origin = ?slot.origin, "re-solving inherited scenario");
        let warm = warm_start::prepare(ctx, scratch, nodes, node_id, position, solver)?;
        let request = SubproblemRequest {
            scenario,
            bounds: &pass.bounds,
            cost_shift: None,
            relaxation: pass.relaxation,
            starts: &warm.candidates,
            objective_lower_bound: warm.objective_lower_bound,
            profile: ParamProfile::LowerBound,
        };
        let outcome = solve_with_second_pass(solver, &request, ctx.config.bounding.second_pass)?;
        let node = &mut nodes[node_id];
        match outcome.status {
            SolveStatus::Infeasible | SolveStatus::InfeasibleTimeLimit => {
                node.bound = INFINITE_BOUND;
                return Ok(if outcome.status == SolveStatus::InfeasibleTimeLimit {
                    Skip::TimeLimitInfeasible
                } else {
                    Skip::NoSolution
                });
            }
            SolveStatus::NoSolution => {
                tracing::warn!(node = %node_id, scenario, "no solution when re-solving inherited scenario");
                return Ok(Skip::EvaluateNodeSolution);
            }
            SolveStatus::Optimal | SolveStatus::Suboptimal => {
                let mut x = outcome.first_stage;
                clean_first_stage(&ctx.model, &mut x, accuracy);
                let slot = &mut node.scenarios[scenario];
                let matches = slot
                    .solution
                    .as_ref()
                    .is_some_and(|h| h.approx_eq(&x, accuracy));
                if !matches {
                    tracing::warn!(
                        node = %node_id,
                        scenario,
                        "re-solved first stage differs from inherited solution"
                    );
                    return Ok(Skip::EvaluateNodeSolution);
                }
                let best_bound = if outcome.status.is_optimal() {
                    outcome.objective
                } else {
                    outcome.best_bound
                };
                slot.objective = outcome.objective;
                slot.bound = best_bound.min(outcome.objective);
            }
        }
    }

    let node = &nodes[node_id];
    let solution = node.scenarios[0].solution.clone();
    let objectives = node.scenarios.iter().map(|s| s.objective).collect();
    tracing::info!(node = %node_id, value = pass.incumbent, "new incumbent from node solution");
    ctx.install_incumbent(pass.incumbent, solution, objectives);
    Ok(Skip::Settled)
}

fn report(
    nodes: &NodeArena,
    pass: &Pass<'_>,
    skip: Skip,
    cutoff_at: Option<usize>,
    start: Instant,
) -> NodeReport {
    let node = &nodes[pass.node];
    NodeReport {
        node: pass.node,
        bound: node.bound,
        skip,
        leaf: node.leaf,
        violations: node.violations,
        dispersion_norm: node.dispersion_norm,
        incumbent: pass.incumbent,
        mean_gap: pass.mean_gap,
        problems_solved: pass.solved,
        cutoff_at,
        elapsed_ms: start.elapsed().as_millis() as u64,
    }
}
