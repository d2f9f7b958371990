//! Collaborator contracts for sipdd node evaluation.
//!
//! The node-evaluation engine never talks to a concrete MIP solver or
//! nonsmooth optimizer. It calls the traits defined here:
//!
//! | Trait | Called by | Purpose |
//! |-------|-----------|---------|
//! | [`SubproblemSolver`] | lower-bound and dual evaluators | solve one scenario MIP within a box, with starts |
//! | [`BundleOptimizer`] | dual evaluator | propose the next multiplier vector from a dual value and subgradient |
//!
//! Failures are reported as [`SolverError`]; only these unwind a node
//! evaluation. Expected outcomes such as infeasibility are a [`SolveStatus`].

pub mod error;
pub mod logging;
pub mod problem;
pub mod solver;
pub mod status;

pub use error::{ExitCode, SolverError, SolverResult};
pub use logging::init_tracing;
pub use problem::{
    ParamProfile, Relaxation, StartCandidate, StartSource, SubproblemOutcome, SubproblemRequest,
};
pub use solver::{BundleOptimizer, BundleStep, DualPoint, SubproblemSolver};
pub use status::SolveStatus;
