//! First-stage variables and the scenario set.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{SipError, SipResult};

/// Probabilities below this value (after rescaling) are rejected.
pub const MIN_PROBABILITY: f64 = 1e-12;

/// Domain of a first-stage variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarKind {
    Binary,
    Integer,
    SemiInteger,
    SemiContinuous,
    Continuous,
}

impl VarKind {
    /// Binary, integer and semi-integer variables take integral values.
    pub fn is_discrete(&self) -> bool {
        matches!(self, VarKind::Binary | VarKind::Integer | VarKind::SemiInteger)
    }
}

/// A decision fixed before the scenario is revealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirstStageVar {
    pub name: String,
    pub kind: VarKind,
    pub lower: f64,
    pub upper: f64,
    /// Branching priority; larger ranks are branched first in priority-order mode.
    #[serde(default)]
    pub priority: Option<u32>,
}

impl FirstStageVar {
    pub fn new(name: impl Into<String>, kind: VarKind, lower: f64, upper: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            lower,
            upper,
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// The first-stage part shared by all scenario subproblems.
///
/// The bounds held here are the "original" bounds that every node's
/// effective box is intersected with. They may be tightened once after the
/// root evaluation (risk auxiliary variable), never loosened.
#[derive(Debug, Clone, PartialEq)]
pub struct FirstStageModel {
    vars: Vec<FirstStageVar>,
}

impl FirstStageModel {
    pub fn new(vars: Vec<FirstStageVar>) -> SipResult<Self> {
        if vars.is_empty() {
            return Err(SipError::Validation(
                "at least one first-stage variable is required".into(),
            ));
        }
        for (i, v) in vars.iter().enumerate() {
            if v.lower.is_nan() || v.upper.is_nan() || v.lower > v.upper {
                return Err(SipError::Validation(format!(
                    "first-stage variable {} ({}) has empty domain [{}, {}]",
                    i, v.name, v.lower, v.upper
                )));
            }
        }
        Ok(Self { vars })
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn var(&self, index: usize) -> &FirstStageVar {
        &self.vars[index]
    }

    pub fn vars(&self) -> &[FirstStageVar] {
        &self.vars
    }

    pub fn kind(&self, index: usize) -> VarKind {
        self.vars[index].kind
    }

    pub fn lower(&self, index: usize) -> f64 {
        self.vars[index].lower
    }

    pub fn upper(&self, index: usize) -> f64 {
        self.vars[index].upper
    }

    /// Priority rank, `0` when the variable carries none.
    pub fn priority(&self, index: usize) -> u32 {
        self.vars[index].priority.unwrap_or(0)
    }

    pub fn has_priorities(&self) -> bool {
        self.vars.iter().any(|v| v.priority.is_some())
    }

    /// Index of the last first-stage variable (risk auxiliary slot).
    pub fn last_index(&self) -> usize {
        self.vars.len() - 1
    }

    /// Replace the original bounds of one variable.
    pub fn set_bounds(&mut self, index: usize, lower: f64, upper: f64) -> SipResult<()> {
        if lower > upper {
            return Err(SipError::Validation(format!(
                "refusing empty bounds [{}, {}] for variable {}",
                lower, upper, self.vars[index].name
            )));
        }
        self.vars[index].lower = lower;
        self.vars[index].upper = upper;
        Ok(())
    }
}

/// Scenario probabilities.
///
/// Probabilities are rescaled on construction when their sum deviates from
/// one by more than `accuracy`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioSet {
    probabilities: Vec<f64>,
}

impl ScenarioSet {
    pub fn new(mut probabilities: Vec<f64>, accuracy: f64) -> SipResult<Self> {
        if probabilities.is_empty() {
            return Err(SipError::Validation("scenario set is empty".into()));
        }
        if let Some(p) = probabilities.iter().find(|p| !p.is_finite() || **p < 0.0) {
            return Err(SipError::Validation(format!("invalid probability {}", p)));
        }
        let sum: f64 = probabilities.iter().sum();
        if sum <= 0.0 {
            return Err(SipError::Validation(
                "scenario probabilities sum to zero".into(),
            ));
        }
        if (1.0 - sum).abs() > accuracy {
            warn!(sum, "scenario probabilities do not sum to 1, rescaling");
            for p in probabilities.iter_mut() {
                *p /= sum;
            }
        }
        if let Some((s, p)) = probabilities
            .iter()
            .enumerate()
            .find(|(_, p)| **p < MIN_PROBABILITY)
        {
            return Err(SipError::Validation(format!(
                "probability {} of scenario {} is below {}",
                p, s, MIN_PROBABILITY
            )));
        }
        Ok(Self { probabilities })
    }

    /// Equiprobable scenarios.
    pub fn uniform(count: usize) -> SipResult<Self> {
        if count == 0 {
            return Err(SipError::Validation("scenario set is empty".into()));
        }
        Self::new(vec![1.0 / count as f64; count], 1e-12)
    }

    pub fn len(&self) -> usize {
        self.probabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }

    pub fn probability(&self, scenario: usize) -> f64 {
        self.probabilities[scenario]
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probabilities_rescaled_not_rejected() {
        let set = ScenarioSet::new(vec![1.0, 1.0, 2.0], 1e-11).unwrap();
        let sum: f64 = set.probabilities().iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert!((set.probability(2) - 0.5).abs() < 1e-15);
    }

    #[test]
    fn test_probabilities_within_tolerance_kept() {
        let set = ScenarioSet::new(vec![0.2, 0.3, 0.5], 1e-11).unwrap();
        assert_eq!(set.probabilities(), &[0.2, 0.3, 0.5]);
    }

    #[test]
    fn test_tiny_probability_rejected() {
        let err = ScenarioSet::new(vec![1.0, 1e-14], 1e-11).unwrap_err();
        assert!(matches!(err, SipError::Validation(_)));
    }

    #[test]
    fn test_empty_domain_rejected() {
        let vars = vec![FirstStageVar::new("x", VarKind::Integer, 3.0, 1.0)];
        assert!(FirstStageModel::new(vars).is_err());
    }

    #[test]
    fn test_discrete_kinds() {
        assert!(VarKind::Binary.is_discrete());
        assert!(VarKind::SemiInteger.is_discrete());
        assert!(!VarKind::SemiContinuous.is_discrete());
        assert!(!VarKind::Continuous.is_discrete());
    }
}
