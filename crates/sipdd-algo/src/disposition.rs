//! What the driver should do with a node after it has been bounded.

use std::fmt;

use serde::{Deserialize, Serialize};
use sipdd_core::{Node, NodeId};

use crate::context::EvalContext;

/// Verdict attached to an evaluated node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Skip {
    /// Keep bounding or branching as usual.
    #[default]
    None,
    /// No scenario has a solution at this node.
    NoSolution,
    /// The bound cannot improve on the incumbent.
    Dominated,
    /// The bound equals the incumbent value.
    Optimal,
    /// Upper bounding is unnecessary: the node's common solution was
    /// already installed as the incumbent.
    Settled,
    /// The node's solution may improve the incumbent and should be evaluated.
    EvaluateNodeSolution,
    /// A scenario was infeasible within the solver's time limit.
    TimeLimitInfeasible,
    /// Cancellation was requested; the aggregate is not trustworthy.
    Cancelled,
}

impl Skip {
    pub fn is_none(self) -> bool {
        self == Skip::None
    }

    /// Integer code used by drivers that log or persist the verdict.
    pub fn code(self) -> i32 {
        match self {
            Skip::None => 0,
            Skip::NoSolution => 1,
            Skip::Dominated => 2,
            Skip::Optimal => 3,
            Skip::Settled => 4,
            Skip::EvaluateNodeSolution => -1,
            Skip::TimeLimitInfeasible => -2,
            Skip::Cancelled => -3,
        }
    }
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Skip::None => "none",
            Skip::NoSolution => "no_solution",
            Skip::Dominated => "dominated",
            Skip::Optimal => "optimal",
            Skip::Settled => "settled",
            Skip::EvaluateNodeSolution => "evaluate_node_solution",
            Skip::TimeLimitInfeasible => "time_limit_infeasible",
            Skip::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Compare a node's bound against the incumbent and the best optimal node.
pub fn skip_upper_bound(ctx: &EvalContext, node: &Node) -> Skip {
    let search = &ctx.search;
    let best = search.best_value;
    let bound = node.bound;
    let accuracy = ctx.accuracy();
    let factor = if best < 0.0 { 1.0 - accuracy } else { 1.0 + accuracy };

    let dominated = match search.optimal_node {
        None => bound > best * factor + search.correct_bounding,
        Some(_) => bound > best + search.correct_bounding || bound > search.optimal_node_bound,
    };
    if dominated {
        return Skip::Dominated;
    }
    if (best - bound).abs() / (best.abs() + 3e-16) < 5e-16 {
        return Skip::Optimal;
    }
    if node.scenarios.iter().any(|slot| slot.solved) {
        Skip::None
    } else {
        Skip::NoSolution
    }
}

/// Record `node` as the optimal node when its zero-dispersion bound beats
/// the one on record. Returns whether it was recorded.
pub(crate) fn update_optimal_node(ctx: &mut EvalContext, id: NodeId, bound: f64, check_incumbent: bool) -> bool {
    const EPS: f64 = 2e-15;
    let best = ctx.search.best_value;
    let (factor, nfactor) = if best < 0.0 {
        (1.0 - EPS, 1.0 + EPS)
    } else {
        (1.0 + EPS, 1.0 - EPS)
    };
    let accept = match ctx.search.optimal_node {
        None => bound <= best * factor,
        Some(_) => {
            bound < ctx.search.optimal_node_bound * nfactor
                && (!check_incumbent || bound <= best * nfactor)
        }
    };
    if accept {
        tracing::debug!(node = %id, bound, "optimal node updated");
        ctx.search.optimal_node = Some(id);
        ctx.search.optimal_node_bound = bound;
    }
    accept
}
