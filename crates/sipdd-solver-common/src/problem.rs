//! Request and outcome of a scenario subproblem solve.

use serde::{Deserialize, Serialize};

use crate::status::SolveStatus;

/// Parameter profile the solver should apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamProfile {
    /// Lower-bound evaluation.
    LowerBound,
    /// Second pass of a lower-bound solve that stopped above target gap.
    LowerBoundSecond,
    /// Lagrangian dual evaluation.
    Dual,
    /// Second pass of a dual solve.
    DualSecond,
}

impl ParamProfile {
    pub fn second_pass(self) -> Self {
        match self {
            ParamProfile::LowerBound | ParamProfile::LowerBoundSecond => {
                ParamProfile::LowerBoundSecond
            }
            ParamProfile::Dual | ParamProfile::DualSecond => ParamProfile::DualSecond,
        }
    }
}

/// Relaxation in effect for one solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relaxation {
    #[default]
    None,
    /// Discrete first-stage variables are continuous.
    FirstStage,
    /// Linear relaxation; no usable MIP best bound.
    Full,
}

/// Where a warm-start candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartSource {
    Father,
    Sibling,
    PreviousScenario,
    PreviousIteration,
    MostFrequent,
}

/// One start vector over the scenario's integer variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartCandidate {
    pub source: StartSource,
    pub values: Vec<f64>,
}

/// Everything the solver needs for one scenario solve.
#[derive(Debug, Clone, Copy)]
pub struct SubproblemRequest<'a> {
    pub scenario: usize,
    /// Effective first-stage box `(lower, upper)` at the node.
    pub bounds: &'a [(f64, f64)],
    /// Lagrangian shift added to the first-stage cost coefficients.
    pub cost_shift: Option<&'a [f64]>,
    pub relaxation: Relaxation,
    pub starts: &'a [StartCandidate],
    /// Known lower bound on the scenario objective.
    pub objective_lower_bound: Option<f64>,
    pub profile: ParamProfile,
}

/// Result of a scenario solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubproblemOutcome {
    pub status: SolveStatus,
    /// Objective of the returned solution (`+inf` without one).
    pub objective: f64,
    /// Best remaining bound reported by the solver.
    pub best_bound: f64,
    /// Relative MIP gap of the returned solution.
    pub mip_gap: f64,
    /// First-stage part of the solution.
    pub first_stage: Vec<f64>,
    /// Values of all integer variables of the scenario problem.
    pub integer_values: Vec<f64>,
}

impl SubproblemOutcome {
    pub fn optimal(objective: f64, first_stage: Vec<f64>) -> Self {
        Self {
            status: SolveStatus::Optimal,
            objective,
            best_bound: objective,
            mip_gap: 0.0,
            first_stage,
            integer_values: Vec::new(),
        }
    }

    pub fn suboptimal(objective: f64, best_bound: f64, first_stage: Vec<f64>) -> Self {
        Self {
            status: SolveStatus::Suboptimal,
            objective,
            best_bound,
            mip_gap: (objective - best_bound).abs() / (objective.abs() + 1e-10),
            first_stage,
            integer_values: Vec::new(),
        }
    }

    pub fn infeasible() -> Self {
        Self::without_solution(SolveStatus::Infeasible, f64::INFINITY)
    }

    pub fn infeasible_time_limit() -> Self {
        Self::without_solution(SolveStatus::InfeasibleTimeLimit, f64::INFINITY)
    }

    pub fn no_solution(best_bound: f64) -> Self {
        Self::without_solution(SolveStatus::NoSolution, best_bound)
    }

    fn without_solution(status: SolveStatus, best_bound: f64) -> Self {
        Self {
            status,
            objective: f64::INFINITY,
            best_bound,
            mip_gap: f64::INFINITY,
            first_stage: Vec::new(),
            integer_values: Vec::new(),
        }
    }

    pub fn with_integer_values(mut self, values: Vec<f64>) -> Self {
        self.integer_values = values;
        self
    }
}
