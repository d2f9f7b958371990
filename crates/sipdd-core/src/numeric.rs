//! Floating-point helpers shared by every bounding routine.

/// Bound value used for "no finite bound" (infeasible nodes, unsolved scenarios).
pub const INFINITE_BOUND: f64 = f64::INFINITY;

/// Magnitude from which a solver-reported value is treated as "no bound".
pub const HUGE_VALUE: f64 = 1e75;

/// Relative equality: `|a - b| <= accuracy * 0.5 * (|a| + |b|)`.
///
/// Two exact zeros compare equal; any nonzero difference against zero does not.
#[inline]
pub fn approx_eq(a: f64, b: f64, accuracy: f64) -> bool {
    (a - b).abs() <= accuracy * 0.5 * (a.abs() + b.abs())
}

/// True for infinities, NaN and solver sentinels beyond [`HUGE_VALUE`].
#[inline]
pub fn is_huge(x: f64) -> bool {
    !x.is_finite() || x.abs() >= HUGE_VALUE
}

/// Relative MIP gap in percent, as reported in scenario logs.
#[inline]
pub fn gap_percent(objective: f64, bound: f64) -> f64 {
    100.0 * (objective - bound) / (objective.abs() + 1e-4)
}

/// Tolerance factor applied to an incumbent value before comparing a bound
/// against it. Bounds must exceed `incumbent * factor` to prune.
#[inline]
pub fn prune_factor(incumbent: f64, eps: f64) -> f64 {
    if incumbent < 0.0 {
        1.0 - eps
    } else {
        1.0 + eps
    }
}

/// Counterpart of [`prune_factor`] used when accepting a bound as an improvement.
#[inline]
pub fn accept_factor(incumbent: f64, eps: f64) -> f64 {
    if incumbent < 0.0 {
        1.0 + eps
    } else {
        1.0 - eps
    }
}
