//! One scenario solve: optional second pass and result clean-up.

use sipdd_core::FirstStageModel;
use sipdd_solver_common::{SolverResult, SubproblemOutcome, SubproblemRequest, SubproblemSolver};
use web_time::Instant;

/// Solve `request`, re-solving with the second-pass profile when the first
/// result stopped above that profile's target gap.
pub(crate) fn solve_with_second_pass<S: SubproblemSolver + ?Sized>(
    solver: &mut S,
    request: &SubproblemRequest<'_>,
    second_pass: bool,
) -> SolverResult<SubproblemOutcome> {
    let start = Instant::now();
    let mut outcome = solver.solve(request)?;

    if second_pass && outcome.status.has_solution() && !outcome.status.is_optimal() {
        let profile = request.profile.second_pass();
        let target = solver.target_gap(profile);
        if outcome.mip_gap > target {
            tracing::debug!(
                scenario = request.scenario,
                gap = outcome.mip_gap,
                target,
                "second pass"
            );
            let retry = SubproblemRequest { profile, ..*request };
            outcome = solver.solve(&retry)?;
        }
    }

    tracing::trace!(
        scenario = request.scenario,
        status = %outcome.status,
        objective = outcome.objective,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "scenario solved"
    );
    Ok(outcome)
}

/// Snap tiny components to zero and round discrete components.
pub(crate) fn clean_first_stage(model: &FirstStageModel, x: &mut [f64], accuracy: f64) {
    for (j, v) in x.iter_mut().enumerate() {
        if v.abs() < accuracy {
            *v = 0.0;
        }
        if model.kind(j).is_discrete() {
            *v = (*v + 0.1).floor();
        }
    }
}

/// Warn when a solution leaves the box it was solved in.
pub(crate) fn check_box(scenario: usize, x: &[f64], bounds: &[(f64, f64)]) {
    for (j, (v, (lo, up))) in x.iter().zip(bounds).enumerate() {
        let below = *v < *lo && (lo - v) / (lo.abs() + 1e-9) > 1e-10;
        let above = *v > *up && (v - up) / (up.abs() + 1e-9) > 1e-10;
        if below || above {
            tracing::warn!(
                scenario,
                var = j,
                value = *v,
                lower = *lo,
                upper = *up,
                "first-stage value outside node bounds"
            );
        }
    }
}

/// Integer values rounded the same way as the first stage.
pub(crate) fn rounded_integers(values: &[f64]) -> Vec<f64> {
    values.iter().map(|v| (v + 0.1).floor()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipdd_core::{FirstStageVar, VarKind};
    use sipdd_solver_common::{ParamProfile, Relaxation, SolverError};

    struct TwoPass {
        calls: Vec<ParamProfile>,
    }

    impl SubproblemSolver for TwoPass {
        fn name(&self) -> &str {
            "two-pass"
        }

        fn set_use_start_values(&mut self, _enabled: bool) -> SolverResult<()> {
            Ok(())
        }

        fn integer_position(&self, var: usize) -> Option<usize> {
            Some(var)
        }

        fn solve(&mut self, request: &SubproblemRequest<'_>) -> SolverResult<SubproblemOutcome> {
            self.calls.push(request.profile);
            match request.profile {
                ParamProfile::LowerBound => Ok(SubproblemOutcome::suboptimal(10.0, 8.0, vec![1.0])),
                ParamProfile::LowerBoundSecond => Ok(SubproblemOutcome::optimal(9.0, vec![1.0])),
                _ => Err(SolverError::StartValues("unexpected profile".into())),
            }
        }

        fn target_gap(&self, _profile: ParamProfile) -> f64 {
            0.01
        }
    }

    fn request(bounds: &[(f64, f64)]) -> SubproblemRequest<'_> {
        SubproblemRequest {
            scenario: 0,
            bounds,
            cost_shift: None,
            relaxation: Relaxation::None,
            starts: &[],
            objective_lower_bound: None,
            profile: ParamProfile::LowerBound,
        }
    }

    #[test]
    fn test_second_pass_runs_above_target_gap() {
        let mut solver = TwoPass { calls: Vec::new() };
        let bounds = [(0.0, 5.0)];
        let out = solve_with_second_pass(&mut solver, &request(&bounds), true).unwrap();
        assert_eq!(out.objective, 9.0);
        assert_eq!(
            solver.calls,
            vec![ParamProfile::LowerBound, ParamProfile::LowerBoundSecond]
        );
    }

    #[test]
    fn test_second_pass_disabled() {
        let mut solver = TwoPass { calls: Vec::new() };
        let bounds = [(0.0, 5.0)];
        let out = solve_with_second_pass(&mut solver, &request(&bounds), false).unwrap();
        assert_eq!(out.objective, 10.0);
        assert_eq!(solver.calls.len(), 1);
    }

    #[test]
    fn test_clean_first_stage() {
        let model = FirstStageModel::new(vec![
            FirstStageVar::new("y", VarKind::Integer, 0.0, 10.0),
            FirstStageVar::new("z", VarKind::Continuous, -1.0, 1.0),
        ])
        .unwrap();
        let mut x = [4.9999, 1e-13];
        clean_first_stage(&model, &mut x, 1e-11);
        assert_eq!(x, [5.0, 0.0]);
    }
}
