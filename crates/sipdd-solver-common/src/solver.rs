//! Collaborator traits: scenario subproblem solver and bundle optimizer.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sipdd_solver_common::{SubproblemSolver, SubproblemRequest, SubproblemOutcome, SolverResult};
//!
//! struct HighsScenarios { /* one model per scenario */ }
//!
//! impl SubproblemSolver for HighsScenarios {
//!     fn name(&self) -> &str { "highs" }
//!     fn set_use_start_values(&mut self, on: bool) -> SolverResult<()> { Ok(()) }
//!     fn integer_position(&self, var: usize) -> Option<usize> { Some(var) }
//!     fn solve(&mut self, request: &SubproblemRequest<'_>) -> SolverResult<SubproblemOutcome> {
//!         // apply bounds, cost shift, starts; run the MIP
//!     }
//! }
//! ```

use crate::error::SolverResult;
use crate::problem::{ParamProfile, SubproblemOutcome, SubproblemRequest};

/// Solves one scenario's mixed-integer problem.
///
/// Calls are strictly sequential; implementations may keep state between
/// them (e.g. the last solution for an advanced start).
pub trait SubproblemSolver {
    /// The solver name (e.g., "highs").
    fn name(&self) -> &str;

    /// Toggle whether submitted start values are used.
    fn set_use_start_values(&mut self, enabled: bool) -> SolverResult<()>;

    /// Position of a first-stage variable within
    /// [`SubproblemOutcome::integer_values`], `None` when it is continuous.
    fn integer_position(&self, first_stage_var: usize) -> Option<usize>;

    /// Solve one scenario.
    fn solve(&mut self, request: &SubproblemRequest<'_>) -> SolverResult<SubproblemOutcome>;

    /// Relative gap the given profile aims for.
    fn target_gap(&self, _profile: ParamProfile) -> f64 {
        0.0
    }
}

/// Point handed to the bundle optimizer; the optimizer minimises, so
/// `value` is the negated dual value and `gradient` the negated subgradient.
#[derive(Debug, Clone, Copy)]
pub struct DualPoint<'a> {
    pub multipliers: &'a [f64],
    pub value: f64,
    pub gradient: &'a [f64],
}

/// Proposal returned by the bundle optimizer.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleStep {
    pub multipliers: Vec<f64>,
    pub weight: f64,
    pub stop: bool,
}

/// External nonsmooth optimizer driving the dual multipliers.
pub trait BundleOptimizer {
    fn name(&self) -> &str;

    /// Consume the evaluation at the current point and propose the next one.
    fn step(&mut self, point: &DualPoint<'_>) -> SolverResult<BundleStep>;

    /// Weight of the most recent step; may be negative when undefined.
    fn last_weight(&self) -> f64;
}
