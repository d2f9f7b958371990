//! Per-variable min/max envelope of the scenario solutions at a node.

use bumpalo::collections::Vec as BumpVec;
use sipdd_core::approx_eq;

use crate::arena::ScratchArena;

/// Dispersion data collected while scenarios are processed.
pub struct Envelope<'a> {
    min: BumpVec<'a, f64>,
    max: BumpVec<'a, f64>,
}

impl<'a> Envelope<'a> {
    pub fn new_in(scratch: &'a ScratchArena, n_first: usize) -> Self {
        Self {
            min: scratch.filled_vec(n_first, f64::INFINITY),
            max: scratch.filled_vec(n_first, f64::NEG_INFINITY),
        }
    }

    pub fn include(&mut self, x: &[f64]) {
        for ((lo, hi), v) in self.min.iter_mut().zip(self.max.iter_mut()).zip(x) {
            *lo = lo.min(*v);
            *hi = hi.max(*v);
        }
    }

    pub fn min(&self, var: usize) -> f64 {
        self.min[var]
    }

    pub fn max(&self, var: usize) -> f64 {
        self.max[var]
    }

    /// `max - min` per variable; `-inf` where no scenario contributed.
    pub fn spreads(&self) -> Vec<f64> {
        self.min.iter().zip(self.max.iter()).map(|(lo, hi)| hi - lo).collect()
    }

    /// Number of variables whose scenario values differ and the largest spread.
    pub fn measure(&self, accuracy: f64) -> (usize, f64) {
        let mut violations = 0;
        let mut norm: f64 = 0.0;
        for (lo, hi) in self.min.iter().zip(self.max.iter()) {
            if !approx_eq(*hi, *lo, accuracy) {
                violations += 1;
                norm = norm.max(hi - lo);
            }
        }
        (violations, norm)
    }

    /// Widen every variable to an infinite spread.
    pub fn saturate(&mut self) {
        self.min.iter_mut().for_each(|v| *v = f64::NEG_INFINITY);
        self.max.iter_mut().for_each(|v| *v = f64::INFINITY);
    }
}
