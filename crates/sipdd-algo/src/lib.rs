//! # sipdd-algo: node evaluation for scenario-decomposed stochastic MIP
//!
//! A branch-and-bound driver calls into this crate once per node. The node
//! is bounded by solving every scenario subproblem within the node's box,
//! either with the original objectives or with Lagrangian-shifted ones, and
//! the dispersion of the scenario first stages decides how to split it.
//!
//! | Entry point | Role |
//! |-------------|------|
//! | [`evaluate_lower_bound`] | scenario lower bound with premature cutoff |
//! | [`DualEvaluator`] | Lagrangian dual bound driven by a [`BundleOptimizer`](sipdd_solver_common::BundleOptimizer) |
//! | [`select_branch`] | branching variable and split value from the scenario spreads |
//! | [`warm_start::prepare`] | start candidates and inherited bounds before each solve |
//! | [`order_scenarios`] | one-time bounding order after the root |
//!
//! ### State
//!
//! All state shared between evaluations lives in an [`EvalContext`] (model,
//! configuration, incumbent, dual bookkeeping) and a
//! [`NodeArena`](sipdd_core::NodeArena). Per-call buffers are bump-allocated
//! in a [`ScratchArena`] and freed when the call returns.
//!
//! ### Errors
//!
//! Infeasibility, cutoff and cancellation are outcomes, reported through
//! [`Skip`] and the node fields. Only collaborator failures and exhausted
//! budgets are [`EvalError`]s; [`EvalError::Retryable`] asks the caller to
//! repeat a dual evaluation.
//!
//! ## Example
//!
//! ```ignore
//! use sipdd_algo::{evaluate_lower_bound, EvalContext};
//! use sipdd_core::{NodeId, SipConfig};
//!
//! let mut ctx = EvalContext::new(SipConfig::load()?, model, scenarios)?;
//! let mut nodes = ctx.new_arena();
//! let report = evaluate_lower_bound(&mut ctx, &mut nodes, NodeId::ROOT, &mut solver)?;
//! println!("root bound {} ({})", report.bound, report.skip);
//! ```

pub mod arena;
pub mod branching;
pub mod context;
pub mod disposition;
pub mod dual;
pub mod envelope;
pub mod error;
pub mod lower_bound;
pub mod ordering;
mod scenario_solve;
pub mod warm_start;

pub use arena::ScratchArena;
pub use branching::select_branch;
pub use context::{BestPoint, CancelToken, DualState, EvalContext, ScenarioOrder, SearchState};
pub use disposition::{skip_upper_bound, Skip};
pub use dual::{DualEvaluator, DualReport, DualRun, SubgradientAscent, SubgradientConfig};
pub use envelope::Envelope;
pub use error::{EvalError, EvalResult};
pub use lower_bound::{evaluate_lower_bound, NodeReport};
pub use ordering::order_scenarios;
pub use warm_start::WarmStart;
