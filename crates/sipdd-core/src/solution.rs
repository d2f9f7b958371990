//! Content-addressed interning of first-stage solutions.
//!
//! Scenario subproblems frequently return the same first-stage vector. The
//! [`SolutionPool`] hands out one [`SolutionHandle`] per distinct vector so
//! that node slots share storage and identical solutions can be detected by
//! pointer identity. The pool only keeps weak references; a solution is
//! released as soon as the last node slot holding it is dropped.
//!
//! Lookup hashes a rounded copy of the vector and then verifies every
//! component with [`approx_eq`](crate::numeric::approx_eq), so two vectors
//! share a handle only when they are equal within the configured accuracy.

use std::ops::Deref;
use std::rc::{Rc, Weak};

use hashbrown::HashMap;

use crate::numeric::approx_eq;

/// Immutable first-stage vector of one scenario solve.
#[derive(Debug, Clone, PartialEq)]
pub struct FirstStageSolution {
    values: Vec<f64>,
}

impl FirstStageSolution {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Component-wise equality within `accuracy`.
    pub fn approx_eq(&self, other: &[f64], accuracy: f64) -> bool {
        self.values.len() == other.len()
            && self
                .values
                .iter()
                .zip(other)
                .all(|(a, b)| approx_eq(*a, *b, accuracy))
    }
}

impl Deref for FirstStageSolution {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.values
    }
}

/// Shared handle to an interned solution.
pub type SolutionHandle = Rc<FirstStageSolution>;

/// Significant decimal digits kept in the hash key.
const KEY_DIGITS: i32 = 8;

/// Components allowed to sit on a cell boundary before lookup scans the
/// whole table instead of enumerating neighbour cells.
const MAX_AMBIGUOUS: usize = 4;

fn component_code(x: f64) -> i64 {
    if x == 0.0 || !x.is_finite() {
        return 0;
    }
    let exponent = x.abs().log10().floor() as i32;
    let scale = 10f64.powi(KEY_DIGITS - 1 - exponent);
    ((x * scale).round() as i64).wrapping_mul(64) ^ i64::from(exponent)
}

fn canonical_key(values: &[f64]) -> Vec<i64> {
    values.iter().map(|&x| component_code(x)).collect()
}

/// Codes of every cell a value equal to `x` within `accuracy` can fall into.
fn component_codes(x: f64, accuracy: f64) -> Vec<i64> {
    let reach = 2.0 * accuracy * x.abs();
    let mut codes = Vec::with_capacity(2);
    for y in [x - reach, x, x + reach] {
        let code = component_code(y);
        if !codes.contains(&code) {
            codes.push(code);
        }
    }
    codes
}

/// Keys under which a vector equal to `values` may have been stored, or
/// `None` when too many components are ambiguous to enumerate.
fn neighbour_keys(values: &[f64], accuracy: f64) -> Option<Vec<Vec<i64>>> {
    let codes: Vec<Vec<i64>> = values.iter().map(|&x| component_codes(x, accuracy)).collect();
    if codes.iter().filter(|c| c.len() > 1).count() > MAX_AMBIGUOUS {
        return None;
    }
    let mut keys = vec![Vec::with_capacity(values.len())];
    for options in &codes {
        keys = keys
            .into_iter()
            .flat_map(|key| {
                options.iter().map(move |&code| {
                    let mut next = key.clone();
                    next.push(code);
                    next
                })
            })
            .collect();
    }
    Some(keys)
}

/// Interning table for first-stage solutions.
#[derive(Debug)]
pub struct SolutionPool {
    accuracy: f64,
    table: HashMap<Vec<i64>, Vec<Weak<FirstStageSolution>>>,
}

impl SolutionPool {
    pub fn new(accuracy: f64) -> Self {
        Self {
            accuracy,
            table: HashMap::new(),
        }
    }

    /// Existing handle for a vector equal to `values`, if one is alive.
    ///
    /// Equal vectors can round into adjacent key cells, so every cell within
    /// the accuracy of `values` is searched.
    pub fn find(&self, values: &[f64]) -> Option<SolutionHandle> {
        let matching = |bucket: &Vec<Weak<FirstStageSolution>>| {
            bucket
                .iter()
                .filter_map(Weak::upgrade)
                .find(|s| s.approx_eq(values, self.accuracy))
        };
        match neighbour_keys(values, self.accuracy) {
            Some(keys) => keys.iter().filter_map(|k| self.table.get(k)).find_map(matching),
            None => self.table.values().find_map(matching),
        }
    }

    /// Return the shared handle for `values`, creating it when no equal
    /// solution is alive. The flag is `true` when an existing handle was reused.
    pub fn intern(&mut self, values: Vec<f64>) -> (SolutionHandle, bool) {
        if let Some(existing) = self.find(&values) {
            return (existing, true);
        }
        let bucket = self.table.entry(canonical_key(&values)).or_default();
        bucket.retain(|w| w.strong_count() > 0);
        let handle = Rc::new(FirstStageSolution::new(values));
        bucket.push(Rc::downgrade(&handle));
        (handle, false)
    }

    /// Number of distinct solutions still referenced somewhere.
    pub fn live_count(&self) -> usize {
        self.table
            .values()
            .flat_map(|bucket| bucket.iter())
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Drop table entries whose solutions have been released.
    pub fn purge(&mut self) {
        self.table.retain(|_, bucket| {
            bucket.retain(|w| w.strong_count() > 0);
            !bucket.is_empty()
        });
    }
}
