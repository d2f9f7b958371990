//! Nonanticipativity linking matrix.
//!
//! The linking relations `Σ_s A_s x_s = 0` tie the first-stage copies of all
//! scenarios together. Row `s * n_first + i` of the stored matrix holds the
//! coefficients of variable `i` in scenario `s`; columns are the multiplier
//! (relation) indices.
//!
//! Dualising the relations with multipliers `λ` turns scenario `s`'s
//! objective into `p_s f_s(x) + λᵀ A_s x`. Divided by `p_s` this is a shift
//! of the first-stage cost by `A_sᵀ λ / p_s`, see [`objective_shift`].
//!
//! [`objective_shift`]: NonanticipativityMatrix::objective_shift

use serde::{Deserialize, Serialize};
use sprs::{CsMat, TriMat};

use crate::error::{SipError, SipResult};

/// Shape of the linking relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonanticipativityKind {
    /// `x_s - x_{s+1} = 0` for consecutive scenarios.
    #[default]
    Consecutive,
    /// `x_0 - x_s = 0` for every later scenario.
    AgainstFirst,
}

/// Sparse linking matrix, CSR by (scenario, variable) row.
#[derive(Debug, Clone)]
pub struct NonanticipativityMatrix {
    n_scenarios: usize,
    n_first: usize,
    matrix: CsMat<f64>,
}

impl NonanticipativityMatrix {
    pub fn new(kind: NonanticipativityKind, n_scenarios: usize, n_first: usize) -> Self {
        let n_relations = n_scenarios.saturating_sub(1) * n_first;
        let mut triplets = TriMat::new((n_scenarios * n_first, n_relations));
        for s in 0..n_scenarios.saturating_sub(1) {
            for i in 0..n_first {
                let col = s * n_first + i;
                let (a, b) = match kind {
                    NonanticipativityKind::Consecutive => (s, s + 1),
                    NonanticipativityKind::AgainstFirst => (0, s + 1),
                };
                triplets.add_triplet(a * n_first + i, col, 1.0);
                triplets.add_triplet(b * n_first + i, col, -1.0);
            }
        }
        Self {
            n_scenarios,
            n_first,
            matrix: triplets.to_csr(),
        }
    }

    /// Build from explicit `(scenario, variable, relation, coefficient)` entries.
    pub fn from_entries(
        n_scenarios: usize,
        n_first: usize,
        n_relations: usize,
        entries: &[(usize, usize, usize, f64)],
    ) -> SipResult<Self> {
        let mut triplets = TriMat::new((n_scenarios * n_first, n_relations));
        for &(s, i, k, a) in entries {
            if s >= n_scenarios || i >= n_first || k >= n_relations {
                return Err(SipError::Validation(format!(
                    "linking entry ({}, {}, {}) out of range",
                    s, i, k
                )));
            }
            triplets.add_triplet(s * n_first + i, k, a);
        }
        Ok(Self {
            n_scenarios,
            n_first,
            matrix: triplets.to_csr(),
        })
    }

    /// Number of linking relations (dual multipliers).
    pub fn n_relations(&self) -> usize {
        self.matrix.cols()
    }

    pub fn n_scenarios(&self) -> usize {
        self.n_scenarios
    }

    /// Coefficient of variable `var` of scenario `scenario` in relation `relation`.
    pub fn coefficient(&self, scenario: usize, var: usize, relation: usize) -> f64 {
        self.matrix
            .get(scenario * self.n_first + var, relation)
            .copied()
            .unwrap_or(0.0)
    }

    /// First-stage cost shift of one scenario for the given multipliers.
    pub fn objective_shift(&self, scenario: usize, multipliers: &[f64], probability: f64) -> Vec<f64> {
        (0..self.n_first)
            .map(|i| {
                self.matrix
                    .outer_view(scenario * self.n_first + i)
                    .map(|row| row.iter().map(|(k, a)| a * multipliers[k]).sum::<f64>())
                    .unwrap_or(0.0)
                    / probability
            })
            .collect()
    }

    /// Lagrangian term contained in a scenario objective for first-stage values `x`.
    pub fn penalty(&self, scenario: usize, x: &[f64], multipliers: &[f64], probability: f64) -> f64 {
        self.objective_shift(scenario, multipliers, probability)
            .iter()
            .zip(x)
            .map(|(c, v)| c * v)
            .sum()
    }

    /// Residual of every linking relation for per-scenario first-stage values.
    /// Scenarios without a solution contribute nothing.
    pub fn subgradient(&self, solutions: &[Option<&[f64]>]) -> Vec<f64> {
        let mut g = vec![0.0; self.n_relations()];
        for (s, x) in solutions.iter().enumerate() {
            let Some(x) = x else { continue };
            for (i, v) in x.iter().enumerate().take(self.n_first) {
                if let Some(row) = self.matrix.outer_view(s * self.n_first + i) {
                    for (k, a) in row.iter() {
                        g[k] += a * v;
                    }
                }
            }
        }
        g
    }
}
