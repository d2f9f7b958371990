//! Outcome classification of a scenario solve.

use serde::{Deserialize, Serialize};

/// Status of one scenario subproblem solve.
///
/// Invocation errors are not a status; they are reported as
/// [`SolverError`](crate::SolverError).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    /// Proven optimal.
    Optimal,
    /// A solution with a remaining gap (time or node limit hit).
    Suboptimal,
    /// Proven infeasible.
    Infeasible,
    /// Infeasibility detected when the time limit was reached.
    InfeasibleTimeLimit,
    /// No solution found within the limits; only a bound is available.
    NoSolution,
}

impl SolveStatus {
    pub fn is_optimal(&self) -> bool {
        matches!(self, SolveStatus::Optimal)
    }

    /// A first-stage solution accompanies this status.
    pub fn has_solution(&self) -> bool {
        matches!(self, SolveStatus::Optimal | SolveStatus::Suboptimal)
    }

    pub fn is_infeasible(&self) -> bool {
        matches!(self, SolveStatus::Infeasible | SolveStatus::InfeasibleTimeLimit)
    }
}

impl std::fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolveStatus::Optimal => write!(f, "optimal"),
            SolveStatus::Suboptimal => write!(f, "suboptimal"),
            SolveStatus::Infeasible => write!(f, "infeasible"),
            SolveStatus::InfeasibleTimeLimit => write!(f, "infeasible_time_limit"),
            SolveStatus::NoSolution => write!(f, "no_solution"),
        }
    }
}
