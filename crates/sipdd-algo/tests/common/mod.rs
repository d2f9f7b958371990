//! Shared fixtures for the evaluator integration tests.

#![allow(dead_code)]

use sipdd_algo::EvalContext;
use sipdd_core::{FirstStageModel, FirstStageVar, ScenarioSet, SipConfig, VarKind};
use sipdd_solver_common::{
    ParamProfile, SolverError, SolverResult, StartCandidate, SubproblemOutcome, SubproblemRequest,
    SubproblemSolver,
};

/// What the solver saw in one call.
#[derive(Debug, Clone)]
pub struct Call {
    pub scenario: usize,
    pub bounds: Vec<(f64, f64)>,
    pub cost_shift: Option<Vec<f64>>,
    pub starts: Vec<StartCandidate>,
    pub objective_lower_bound: Option<f64>,
    pub profile: ParamProfile,
}

/// Solver answering from a closure and recording every request.
pub struct ScriptedSolver<F> {
    respond: F,
    pub calls: Vec<Call>,
    pub start_control: Vec<bool>,
    /// Scenario whose solve fails with an invocation error.
    pub fail_on: Option<usize>,
}

impl<F> ScriptedSolver<F>
where
    F: FnMut(&SubproblemRequest<'_>) -> SubproblemOutcome,
{
    pub fn new(respond: F) -> Self {
        Self {
            respond,
            calls: Vec::new(),
            start_control: Vec::new(),
            fail_on: None,
        }
    }

    pub fn scenarios_solved(&self) -> Vec<usize> {
        self.calls.iter().map(|c| c.scenario).collect()
    }
}

impl<F> SubproblemSolver for ScriptedSolver<F>
where
    F: FnMut(&SubproblemRequest<'_>) -> SubproblemOutcome,
{
    fn name(&self) -> &str {
        "scripted"
    }

    fn set_use_start_values(&mut self, enabled: bool) -> SolverResult<()> {
        self.start_control.push(enabled);
        Ok(())
    }

    fn integer_position(&self, var: usize) -> Option<usize> {
        Some(var)
    }

    fn solve(&mut self, request: &SubproblemRequest<'_>) -> SolverResult<SubproblemOutcome> {
        self.calls.push(Call {
            scenario: request.scenario,
            bounds: request.bounds.to_vec(),
            cost_shift: request.cost_shift.map(<[f64]>::to_vec),
            starts: request.starts.to_vec(),
            objective_lower_bound: request.objective_lower_bound,
            profile: request.profile,
        });
        if self.fail_on == Some(request.scenario) {
            return Err(SolverError::Invocation {
                scenario: request.scenario,
                code: 1217,
                message: "no solution exists".into(),
            });
        }
        Ok((self.respond)(request))
    }
}

/// Scenario `s` minimises `(x - target[s])^2 + shift * x` over the integers
/// of the node box, so the scenarios disagree exactly when their targets do.
pub fn quadratic_solver(
    targets: Vec<f64>,
) -> ScriptedSolver<impl FnMut(&SubproblemRequest<'_>) -> SubproblemOutcome> {
    ScriptedSolver::new(move |request: &SubproblemRequest<'_>| {
        let target = targets[request.scenario];
        let shift = request.cost_shift.map_or(0.0, |c| c[0]);
        let (lo, up) = request.bounds[0];
        let mut best = (f64::INFINITY, lo);
        let mut x = lo.ceil();
        while x <= up {
            let value = (x - target) * (x - target) + shift * x;
            if value < best.0 {
                best = (value, x);
            }
            x += 1.0;
        }
        if best.0 == f64::INFINITY {
            return SubproblemOutcome::infeasible();
        }
        SubproblemOutcome::optimal(best.0, vec![best.1]).with_integer_values(vec![best.1])
    })
}

/// One integer first-stage variable in `[0, 10]`.
pub fn integer_model() -> FirstStageModel {
    FirstStageModel::new(vec![FirstStageVar::new("x", VarKind::Integer, 0.0, 10.0)]).unwrap()
}

pub fn context(config: SipConfig, probabilities: Vec<f64>) -> EvalContext {
    let scenarios = ScenarioSet::new(probabilities, 1e-11).unwrap();
    EvalContext::new(config, integer_model(), scenarios).unwrap()
}

pub fn uniform_context(config: SipConfig, n: usize) -> EvalContext {
    EvalContext::new(config, integer_model(), ScenarioSet::uniform(n).unwrap()).unwrap()
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() <= 1e-9 * (1.0 + expected.abs()),
        "expected {expected}, got {actual}"
    );
}
