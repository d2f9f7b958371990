//! Choice of the branching variable and split value.
//!
//! The selector looks at the spread `max - min` of every first-stage
//! variable over the scenario solutions of a node. Variables whose spread
//! comes close to the largest one are candidates; among them the split that
//! divides the scenario values most evenly wins in the balanced regime,
//! the most uneven one in the aggressive regime. The split value itself is
//! the midpoint, the weighted mean, or a blend of both, moved to a
//! half-integer for discrete variables and shifted so that it never cuts
//! between a scenario value and the boundary.
//!
//! Risk models with an auxiliary variable (worst case, TVaR) force or
//! suppress branching on that variable in some nodes and push its split
//! towards the top of its range.

use sipdd_core::{
    BranchDecision, BranchStrategy, EqualSplit, Node, NodeArena, NodeId, RiskModel, INFINITE_BOUND,
};

use crate::context::EvalContext;

/// Initial value of the imbalance trackers.
const BIG_DIFF: i64 = 1_000_000_000;

/// Per-variable access to the scenario solutions of one node.
struct SolutionView<'a> {
    node: &'a Node,
    probabilities: &'a [f64],
}

impl<'a> SolutionView<'a> {
    fn values(&self, var: usize) -> impl Iterator<Item = f64> + '_ {
        self.node
            .scenarios
            .iter()
            .filter_map(move |slot| slot.solution.as_ref().map(|x| x[var]))
    }

    /// Smallest and largest scenario value, `None` without solutions.
    fn range(&self, var: usize) -> Option<(f64, f64)> {
        self.values(var).fold(None, |acc, x| match acc {
            None => Some((x, x)),
            Some((lo, hi)) => Some((lo.min(x), hi.max(x))),
        })
    }

    fn mean(&self, var: usize) -> f64 {
        self.node
            .scenarios
            .iter()
            .zip(self.probabilities)
            .filter_map(|(slot, p)| slot.solution.as_ref().map(|x| p * x[var]))
            .sum()
    }
}

/// Decide how to split `node_id` from the per-variable `spreads`.
///
/// Sets `branch` of the node (and the leaf flag when nothing can be split)
/// and returns the decision. Leaves get no decision.
pub fn select_branch(
    ctx: &EvalContext,
    nodes: &mut NodeArena,
    node_id: NodeId,
    spreads: &[f64],
) -> Option<BranchDecision> {
    if nodes[node_id].leaf {
        nodes[node_id].branch = None;
        return None;
    }
    let (decision, weight) = Selector::new(ctx, nodes, node_id, spreads).choose();
    let node = &mut nodes[node_id];
    if let Some(w) = weight {
        node.best_weight = w;
    }
    match decision {
        Some(d) => tracing::debug!(node = %node_id, var = d.var, value = d.value, "branching decision"),
        None => {
            tracing::debug!(node = %node_id, "no variable left to split");
            node.leaf = true;
        }
    }
    node.branch = decision;
    decision
}

struct Selector<'a> {
    ctx: &'a EvalContext,
    node_id: NodeId,
    node: &'a Node,
    view: SolutionView<'a>,
    spread: Vec<f64>,
    bounds: Vec<(f64, f64)>,
    aux: Option<usize>,
}

impl<'a> Selector<'a> {
    fn new(ctx: &'a EvalContext, nodes: &'a NodeArena, node_id: NodeId, spreads: &[f64]) -> Self {
        let node = &nodes[node_id];
        Self {
            ctx,
            node_id,
            node,
            view: SolutionView {
                node,
                probabilities: ctx.scenarios.probabilities(),
            },
            spread: spreads.to_vec(),
            bounds: nodes.effective_box(node_id, &ctx.model),
            aux: ctx.aux_var(),
        }
    }

    fn decision(&self, var: usize, value: f64) -> BranchDecision {
        BranchDecision {
            var,
            value,
            down_first: self.ctx.config.branching.direction < 0,
        }
    }

    fn is_discrete(&self, var: usize) -> bool {
        self.ctx.model.kind(var).is_discrete()
    }

    fn is_worst_case_aux(&self, var: usize) -> bool {
        self.ctx.config.risk.model == RiskModel::WorstCase && self.aux == Some(var)
    }

    /// Scenario range of `var`, or its box when no scenario has a solution.
    fn range(&self, var: usize) -> (f64, f64) {
        self.view.range(var).unwrap_or(self.bounds[var])
    }

    fn snap(&self, var: usize, value: f64) -> f64 {
        if self.is_discrete(var) {
            (value + self.ctx.config.branching.tuning.snap_eps).floor() + 0.5
        } else {
            value
        }
    }

    /// Returns the decision and, for TVaR under dual bounding, a new bundle weight.
    fn choose(mut self) -> (Option<BranchDecision>, Option<f64>) {
        let mut weight = None;
        if let Some(aux) = self.aux {
            let (forced, w) = self.risk_rules(aux);
            weight = w;
            if forced.is_some() {
                return (forced, weight);
            }
        }
        self.exclude_fixed();

        let factor = self.group_factor();
        let candidates = self.candidates(factor);
        let chosen = match candidates.len() {
            0 => self.widest_box(),
            1 => Some(candidates[0]),
            _ => Some(self.compare(&candidates, factor)),
        };
        let Some(var) = chosen else {
            return (None, weight);
        };
        let value = self.split_value(var);
        (Some(self.decision(var, value)), weight)
    }

    /// Special handling of the risk model's auxiliary variable.
    fn risk_rules(&mut self, aux: usize) -> (Option<BranchDecision>, Option<f64>) {
        let ctx = self.ctx;
        let risk = &ctx.config.risk;
        let t = &ctx.config.branching.tuning;
        let index = self.node_id.index();
        let depth = self.node.depth;
        let mut weight = None;

        if !risk.branch_aux {
            self.spread[aux] = -INFINITE_BOUND;
        }
        if ctx.config.dual.enabled && risk.model == RiskModel::Tvar {
            let scale = if ctx.config.dual.periodic {
                (depth == t.tvar_weight_periodic_depth).then_some(t.tvar_weight_periodic_scale)
            } else {
                self.node.is_root().then_some(t.tvar_weight_root_scale)
            };
            if let Some(scale) = scale {
                weight = Some(ctx.dual.initial_weight.max(scale * self.spread[aux]));
            }
        }

        if self.node.is_root() && risk.model == RiskModel::WorstCase {
            self.spread[aux] = 0.0;
        } else if risk.branch_aux && risk.model == RiskModel::Tvar {
            let width = ctx.model.upper(aux) - ctx.model.lower(aux);
            let head = index < t.tvar_head_nodes
                && self.spread[aux] > t.tvar_head_min_spread.max(t.tvar_head_rel_spread * width);
            let window = (depth > 6 && depth < 9) || depth % 10 < 2;
            let deep = window
                && self.spread[aux] > t.tvar_depth_min_spread.max(t.tvar_depth_rel_spread * width);
            if head || deep {
                let (lower, upper) = self.bounds[aux];
                let (lo, hi) = self.range(aux);
                let low = lo.max(lower);
                let high = (hi + t.tvar_step).min(upper);
                let value = t.tvar_low_weight * low + t.tvar_high_weight * high;
                return (Some(self.decision(aux, value)), weight);
            }
            // no incumbent yet: split the original variables first
            if ctx.search.best_value == INFINITE_BOUND && index < aux * 10 {
                let widest = self.spread[..aux].iter().copied().fold(-INFINITE_BOUND, f64::max);
                if widest > 2.0 * ctx.config.bounding.null_dispersion {
                    self.spread[aux] = 0.0;
                }
            }
        } else if risk.branch_aux
            && risk.model == RiskModel::WorstCase
            && (depth == t.worst_case_depth || depth % t.worst_case_period == 0)
        {
            let (lo, hi) = self.range(aux);
            if hi - lo > t.worst_case_rel_gap * hi.abs() {
                let mut value = hi - t.worst_case_top_shift * hi.abs();
                if value < lo + ctx.config.branching.branch_eps {
                    value = 0.5 * (lo + hi);
                }
                return (Some(self.decision(aux, value)), weight);
            }
        }
        (None, weight)
    }

    /// Variables whose box at this node leaves nothing to split.
    fn exclude_fixed(&mut self) {
        let eps = self.ctx.config.branching.branch_eps;
        for var in 0..self.spread.len() {
            let (lo, up) = self.bounds[var];
            let fixed = if self.is_discrete(var) {
                up <= lo
            } else {
                up - lo <= eps
            };
            if fixed {
                self.spread[var] = -INFINITE_BOUND;
            }
        }
    }

    fn group_factor(&self) -> f64 {
        let cfg = &self.ctx.config.branching;
        let t = &cfg.tuning;
        if !cfg.bound_strategy {
            t.group_factor_default
        } else if self.node_id.index() % t.boundstrat_period < t.boundstrat_early_window {
            t.group_factor_boundstrat_early
        } else {
            t.group_factor_boundstrat_late
        }
    }

    fn candidates(&self, factor: f64) -> Vec<usize> {
        let cfg = &self.ctx.config.branching;
        let null_dispersion = self.ctx.config.bounding.null_dispersion;
        let n = self.spread.len();
        let mut candidates = Vec::new();
        let mut top_priority = None;

        if cfg.priority_order {
            let t = &cfg.tuning;
            for var in 0..n {
                let rank = self.ctx.model.priority(var);
                let decay = (-t.decay_order_scale * f64::from(rank)).exp() + t.decay_order_offset;
                if self.spread[var] > null_dispersion.max(decay * self.node.dispersion_norm) {
                    top_priority = top_priority.max(Some(rank));
                }
            }
            if let Some(rank) = top_priority {
                let group = (0..n).filter(|&j| self.ctx.model.priority(j) == rank);
                let h = factor * group.clone().map(|j| self.spread[j]).fold(0.0, f64::max);
                if h > 0.0 {
                    candidates.extend(group.filter(|&j| self.spread[j] > h));
                }
            }
        }

        if candidates.is_empty() || top_priority == Some(1) {
            candidates.clear();
            if cfg.int_first {
                candidates = self.above_threshold(factor, |j| self.is_discrete(j));
            }
            if candidates.is_empty() {
                candidates = self.above_threshold(factor, |_| true);
            }
        }
        candidates
    }

    /// Variables passing `filter` whose spread is within `factor` of the largest one.
    fn above_threshold(&self, factor: f64, filter: impl Fn(usize) -> bool) -> Vec<usize> {
        let null_dispersion = self.ctx.config.bounding.null_dispersion;
        let n = self.spread.len();
        let top = (0..n)
            .filter(|&j| filter(j) && self.spread[j] > null_dispersion)
            .map(|j| self.spread[j])
            .fold(0.0, f64::max);
        if top < null_dispersion {
            return Vec::new();
        }
        let h = top * factor;
        (0..n).filter(|&j| filter(j) && self.spread[j] > h).collect()
    }

    /// Balanced nodes prefer even splits, all others uneven ones.
    fn balanced_regime(&self) -> bool {
        let t = &self.ctx.config.branching.tuning;
        let index = self.node_id.index();
        match self.ctx.config.branching.equal_split {
            EqualSplit::Always => true,
            EqualSplit::Off => false,
            EqualSplit::Windowed => {
                index < t.balanced_head_nodes
                    || (index > t.window_start_node && index % t.window_period >= t.window_min_residue)
            }
        }
    }

    fn tentative_value(&self, var: usize) -> f64 {
        let cfg = &self.ctx.config.branching;
        let t = &cfg.tuning;
        let (lo, hi) = self.range(var);
        let mid = 0.5 * (lo + hi);
        let value = match cfg.strategy {
            BranchStrategy::Midpoint => mid,
            _ if self.is_worst_case_aux(var) => {
                let v = hi - cfg.branch_eps.max(t.worst_case_candidate_shift) * hi.abs();
                if v < lo + cfg.branch_eps {
                    mid
                } else {
                    v
                }
            }
            BranchStrategy::WeightedMean => self.view.mean(var),
            BranchStrategy::Blended => {
                t.blend_mean_weight * self.view.mean(var) + t.blend_mid_weight * (lo + hi)
            }
        };
        self.snap(var, value)
    }

    /// Pick among several candidates by how they divide the scenarios.
    fn compare(&self, candidates: &[usize], factor: f64) -> usize {
        let t = &self.ctx.config.branching.tuning;
        let balanced = self.balanced_regime();
        let mut current = candidates[0];
        let mut min_diff = BIG_DIFF;
        let mut max_diff = -BIG_DIFF;
        let mut max_dist = -1.0_f64;

        for &var in candidates {
            let value = self.tentative_value(var);
            let (mut below, mut above) = (0_i64, 0_i64);
            let (mut dist_below, mut dist_above) = (0.0, 0.0);
            for x in self.view.values(var) {
                if x <= value {
                    below += 1;
                    dist_below += (value - x) * (value - x);
                } else {
                    above += 1;
                    dist_above += (x - value) * (x - value);
                }
            }
            let diff = (below - above).abs();
            let dist = f64::min(dist_below, dist_above) + 0.5 * (dist_below + dist_above);
            let wider = self.spread[var] > self.spread[current];

            if balanced && !self.is_worst_case_aux(var) {
                let accept = (diff < min_diff && dist > t.balanced_accept_dist * max_dist)
                    || (diff <= min_diff && wider && dist > t.balanced_tie_dist * max_dist)
                    || (diff < min_diff + t.balanced_slack_diff
                        && self.spread[var] > factor * self.spread[current]
                        && dist > max_dist + t.balanced_slack_dist);
                if accept {
                    max_dist = if diff < min_diff { dist } else { max_dist.max(dist) };
                    min_diff = min_diff.min(diff);
                    current = var;
                }
            } else if above > 0
                && below > 0
                && (diff > max_diff
                    || (diff == max_diff && wider)
                    || (diff > max_diff - t.aggressive_slack_diff && dist > max_dist))
            {
                max_dist = if diff > max_diff { dist } else { max_dist.max(dist) };
                max_diff = max_diff.max(diff);
                current = var;
            }
            tracing::trace!(node = %self.node_id, var, value, diff, dist, "branch candidate");
        }
        current
    }

    /// Variable with the widest box, `None` when every box is closed.
    fn widest_box(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (var, (lo, up)) in self.bounds.iter().enumerate() {
            let width = up - lo;
            if best.map_or(true, |(_, w)| width > w) {
                best = Some((var, width));
            }
        }
        best.filter(|&(var, width)| {
            width > 0.0 && (self.is_discrete(var) || width > self.ctx.config.branching.branch_eps)
        })
        .map(|(var, _)| var)
    }

    fn split_value(&self, var: usize) -> f64 {
        let cfg = &self.ctx.config.branching;
        let t = &cfg.tuning;
        let eps = cfg.branch_eps;
        let worst_case = self.is_worst_case_aux(var);
        let (lo, hi) = self.range(var);
        let mid = 0.5 * (lo + hi);

        let mut value = if worst_case {
            (hi - self.ctx.accuracy() * hi.abs()).max(mid)
        } else {
            match cfg.strategy {
                BranchStrategy::Midpoint => mid,
                BranchStrategy::WeightedMean => self.view.mean(var),
                BranchStrategy::Blended if self.node.dispersion_norm < t.small_dispersion => mid,
                BranchStrategy::Blended => {
                    t.blend_mean_weight * self.view.mean(var) + t.blend_mid_weight * (lo + hi)
                }
            }
        };
        value = self.snap(var, value);

        // keep scenario values on the boundary in one child
        let mut below_max = -INFINITE_BOUND;
        let mut above_min = INFINITE_BOUND;
        for x in self.view.values(var) {
            if x <= value {
                below_max = below_max.max(x);
            } else {
                above_min = above_min.min(x);
            }
        }
        if above_min < value + eps && below_max < value - eps - t.shift_eps {
            value = above_min - eps - t.shift_eps;
        }

        if worst_case {
            let (_, upper) = self.bounds[var];
            for x in self.view.values(var) {
                if value < x && x < upper - t.worst_case_endgame_eps * eps {
                    value = x;
                }
            }
            if let Some(tightening) = self.node.tightening.filter(|tt| tt.var == var) {
                if tightening.upper - tightening.lower > 2.0 * eps {
                    value = value.max(tightening.lower + eps).min(tightening.upper - eps);
                } else {
                    value = 0.5 * (tightening.lower + tightening.upper);
                }
            }
        }
        value
    }
}
