//! Diminishing-step subgradient method as a reference [`BundleOptimizer`].
//!
//! It keeps no bundle: every step moves the multipliers against the
//! normalised gradient of the (negated) dual function with step length
//! `initial_step / k`. That is enough to drive the dual evaluator in tests
//! and small runs without an external nonsmooth solver.

use sipdd_solver_common::{BundleOptimizer, BundleStep, DualPoint, SolverError, SolverResult};

/// Settings of [`SubgradientAscent`].
#[derive(Debug, Clone)]
pub struct SubgradientConfig {
    /// Length of the first step.
    pub initial_step: f64,
    /// Gradient norm at which the method stops.
    pub tolerance: f64,
    /// Steps after which the method stops.
    pub max_steps: usize,
}

impl Default for SubgradientConfig {
    fn default() -> Self {
        Self {
            initial_step: 1.0,
            tolerance: 1e-9,
            max_steps: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubgradientAscent {
    config: SubgradientConfig,
    steps: usize,
    weight: f64,
}

impl SubgradientAscent {
    pub fn new(config: SubgradientConfig) -> Self {
        Self {
            config,
            steps: 0,
            weight: -1.0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(SubgradientConfig::default())
    }

    /// Set the length of the first step.
    pub fn with_initial_step(mut self, step: f64) -> Self {
        self.config.initial_step = step;
        self
    }

    pub fn with_max_steps(mut self, steps: usize) -> Self {
        self.config.max_steps = steps;
        self
    }

    /// Steps taken so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    fn hold(&self, point: &DualPoint<'_>) -> BundleStep {
        BundleStep {
            multipliers: point.multipliers.to_vec(),
            weight: self.weight,
            stop: true,
        }
    }
}

impl BundleOptimizer for SubgradientAscent {
    fn name(&self) -> &str {
        "subgradient"
    }

    fn step(&mut self, point: &DualPoint<'_>) -> SolverResult<BundleStep> {
        if point.gradient.len() != point.multipliers.len() {
            return Err(SolverError::Bundle(format!(
                "gradient has {} entries for {} multipliers",
                point.gradient.len(),
                point.multipliers.len()
            )));
        }
        if !point.value.is_finite() {
            return Ok(self.hold(point));
        }
        let norm = point.gradient.iter().map(|g| g * g).sum::<f64>().sqrt();
        if norm <= self.config.tolerance || self.steps >= self.config.max_steps {
            return Ok(self.hold(point));
        }

        self.steps += 1;
        let length = self.config.initial_step / self.steps as f64;
        self.weight = 1.0 / length;
        let multipliers = point
            .multipliers
            .iter()
            .zip(point.gradient)
            .map(|(lambda, g)| lambda - length * g / norm)
            .collect();
        tracing::trace!(step = self.steps, length, norm, value = point.value, "subgradient step");
        Ok(BundleStep {
            multipliers,
            weight: self.weight,
            stop: false,
        })
    }

    fn last_weight(&self) -> f64 {
        self.weight
    }
}
