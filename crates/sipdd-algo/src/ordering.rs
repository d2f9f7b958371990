//! One-time scenario ordering after the root node has been bounded.
//!
//! Scenarios with the largest weighted bound contribution are bounded first
//! in every later node, so the premature cutoff fires as early as possible.
//! Under a risk model the auxiliary variable's original bounds are derived
//! from the root's wait-and-see bounds at the same time.

use std::cmp::Ordering;

use sipdd_core::{Node, RiskModel, INFINITE_BOUND};

use crate::context::EvalContext;

/// Sort the bounding order by descending `p[s] * bound[s]` of `root` and
/// fix the risk variable's bounds. Runs once per search.
pub fn order_scenarios(ctx: &mut EvalContext, root: &Node) {
    if ctx.order.is_sorted() {
        return;
    }
    let contribution: Vec<f64> = root
        .scenarios
        .iter()
        .zip(ctx.scenarios.probabilities())
        .map(|(slot, p)| p * slot.bound)
        .collect();
    let mut order = ctx.order.as_slice().to_vec();
    order.sort_by(|&a, &b| {
        contribution[b]
            .partial_cmp(&contribution[a])
            .unwrap_or(Ordering::Equal)
    });
    tracing::debug!(?order, "scenario bounding order");
    ctx.order.install(order);

    match ctx.config.risk.model {
        RiskModel::WorstCase => bound_worst_case_var(ctx, root),
        RiskModel::Tvar => bound_tvar_var(ctx, root),
        RiskModel::None | RiskModel::Other => {}
    }
}

/// Wait-and-see bound of each scenario minus its weighted risk term.
fn risk_free_bounds(ctx: &EvalContext, root: &Node, aux: usize) -> Vec<f64> {
    let weight = ctx.config.risk.effective_weight();
    root.scenarios
        .iter()
        .zip(&ctx.wait_and_see)
        .map(|(slot, ws)| {
            let risk = slot.solution.as_ref().map_or(0.0, |x| x[aux]);
            ws - weight * risk
        })
        .collect()
}

fn bound_worst_case_var(ctx: &mut EvalContext, root: &Node) {
    let Some(aux) = ctx.aux_var() else { return };
    let lower = risk_free_bounds(ctx, root, aux)
        .into_iter()
        .fold(-INFINITE_BOUND, f64::max);
    let upper = ctx.model.upper(aux);
    if let Err(e) = ctx.model.set_bounds(aux, lower, upper) {
        tracing::warn!(error = %e, lower, "worst-case variable bound not applied");
    } else {
        tracing::debug!(lower, "worst-case variable lower bound");
    }
}

fn bound_tvar_var(ctx: &mut EvalContext, root: &Node) {
    let Some(aux) = ctx.aux_var() else { return };
    let values = risk_free_bounds(ctx, root, aux);
    let mut ranked: Vec<usize> = (0..values.len()).collect();
    ranked.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(Ordering::Equal));

    let level = ctx.config.risk.level;
    let mut mass = ctx.scenarios.probability(ranked[0]);
    let mut quantile = 0;
    while mass < level && quantile + 1 < ranked.len() {
        quantile += 1;
        mass += ctx.scenarios.probability(ranked[quantile]);
    }
    let at_level = values[ranked[quantile]];
    let top = values[ranked[ranked.len() - 1]];
    let lower = at_level - 1.0;
    let upper = top + (0.1 * top.abs()).max(1.0);
    if let Err(e) = ctx.model.set_bounds(aux, lower, upper) {
        tracing::warn!(error = %e, lower, upper, "TVaR variable bounds not applied");
    } else {
        tracing::debug!(lower, upper, "TVaR variable bounds");
    }

    let scaled = 0.025 * at_level.abs();
    if ctx.config.dual.enabled && ctx.dual.initial_weight < scaled {
        tracing::debug!(weight = scaled, "raising initial bundle weight");
        ctx.dual.initial_weight = scaled;
    }
}
