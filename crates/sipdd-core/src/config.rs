//! Configuration for node evaluation.
//!
//! [`SipConfig`] gathers every knob consulted by the bounding, branching,
//! warm-start and dual routines. It is stored as TOML in
//! `~/.sipdd/config.toml` and supports partial files where unspecified values
//! use the defaults below.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{SipError, SipResult};
use crate::nonant::NonanticipativityKind;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SipConfig {
    pub bounding: BoundingConfig,
    pub branching: BranchingConfig,
    pub risk: RiskConfig,
    pub dual: DualConfig,
}

/// Scenario lower-bound settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundingConfig {
    /// Relative accuracy used for equality tests and noise snapping.
    pub accuracy: f64,

    /// Dispersion below which the scenario solutions are considered identical.
    pub null_dispersion: f64,

    /// Relaxation applied to scenario subproblems.
    pub relax: RelaxLevel,

    /// Node period for [`RelaxLevel::Periodic`]: every `relax_period`-th node is
    /// solved unrelaxed, all others as LP.
    pub relax_period: u32,

    /// Stop the scenario loop once the partial bound proves the node dominated.
    pub premature_cutoff: bool,

    /// Start-value propagation mode.
    pub warm_start: WarmStartMode,

    /// Re-solve with the second parameter profile when the first solve stops
    /// above the target gap.
    pub second_pass: bool,
}

impl Default for BoundingConfig {
    fn default() -> Self {
        Self {
            accuracy: 1e-11,
            null_dispersion: 1e-8,
            relax: RelaxLevel::None,
            relax_period: 3,
            premature_cutoff: true,
            warm_start: WarmStartMode::FatherAndSiblingsWithBound,
            second_pass: false,
        }
    }
}

/// Relaxation of the scenario subproblems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelaxLevel {
    /// Solve the scenario MIPs as they are.
    #[default]
    None,
    /// Discrete first-stage variables are treated as continuous.
    FirstStage,
    /// Linear relaxation of the whole scenario problem.
    Full,
    /// Full relaxation except at every `relax_period`-th node.
    Periodic,
}

/// Start-value propagation between nodes and scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmStartMode {
    /// No starting values.
    Off,
    /// The father node's solution of the same scenario.
    Father,
    /// Whatever the solver kept from its previous solve, plus bound inheritance.
    Advanced,
    /// The previous scenario's solution in this node.
    PreviousScenario,
    /// Father solutions of all scenarios plus scenarios already solved here.
    FatherAndSiblings,
    /// [`PreviousScenario`](Self::PreviousScenario) plus bound inheritance.
    PreviousScenarioWithBound,
    /// [`FatherAndSiblings`](Self::FatherAndSiblings) plus bound inheritance.
    #[default]
    FatherAndSiblingsWithBound,
}

impl WarmStartMode {
    /// Mode from its numeric code `0..=6`.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Off,
            1 => Self::Father,
            2 => Self::Advanced,
            3 => Self::PreviousScenario,
            4 => Self::FatherAndSiblings,
            5 => Self::PreviousScenarioWithBound,
            6 => Self::FatherAndSiblingsWithBound,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Father => 1,
            Self::Advanced => 2,
            Self::PreviousScenario => 3,
            Self::FatherAndSiblings => 4,
            Self::PreviousScenarioWithBound => 5,
            Self::FatherAndSiblingsWithBound => 6,
        }
    }

    pub fn is_enabled(self) -> bool {
        self != Self::Off
    }

    /// Modes passing the father's scenario bound to the solver.
    pub fn inherits_bound(self) -> bool {
        matches!(
            self,
            Self::Advanced | Self::PreviousScenarioWithBound | Self::FatherAndSiblingsWithBound
        )
    }
}

/// Branching settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchingConfig {
    pub strategy: BranchStrategy,

    /// `-1` explores the lower child first, `1` the upper child.
    pub direction: i8,

    pub equal_split: EqualSplit,

    /// Prefer discrete variables when any of them shows dispersion.
    pub int_first: bool,

    /// Honour the variables' priority ranks.
    pub priority_order: bool,

    /// Width under which a continuous variable counts as fixed.
    pub branch_eps: f64,

    /// Use the tighter candidate-group factors of the bound-driven strategy.
    pub bound_strategy: bool,

    pub tuning: BranchingConstants,
}

impl Default for BranchingConfig {
    fn default() -> Self {
        Self {
            strategy: BranchStrategy::Blended,
            direction: 1,
            equal_split: EqualSplit::Windowed,
            int_first: false,
            priority_order: false,
            branch_eps: 1e-12,
            bound_strategy: true,
            tuning: BranchingConstants::default(),
        }
    }
}

/// Tentative split value of a candidate variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStrategy {
    /// Midpoint of the scenario minimum and maximum.
    Midpoint,
    /// Probability-weighted mean of the scenario values.
    WeightedMean,
    /// Blend of mean and midpoint.
    #[default]
    Blended,
}

/// Which candidate comparison regime is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EqualSplit {
    /// Always prefer balanced splits.
    Always,
    /// Balanced splits in the configured node windows, aggressive otherwise.
    #[default]
    Windowed,
    /// Always prefer unbalanced splits.
    Off,
}

/// Empirically tuned constants of the branching heuristic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchingConstants {
    pub balanced_accept_dist: f64,
    pub balanced_tie_dist: f64,
    pub balanced_slack_diff: i64,
    pub balanced_slack_dist: f64,
    pub aggressive_slack_diff: i64,
    pub decay_order_scale: f64,
    pub decay_order_offset: f64,
    pub group_factor_boundstrat_early: f64,
    pub group_factor_boundstrat_late: f64,
    pub group_factor_default: f64,
    pub boundstrat_period: usize,
    pub boundstrat_early_window: usize,
    pub balanced_head_nodes: usize,
    pub window_start_node: usize,
    pub window_period: usize,
    pub window_min_residue: usize,
    pub blend_mean_weight: f64,
    pub blend_mid_weight: f64,
    pub snap_eps: f64,
    pub shift_eps: f64,
    pub small_dispersion: f64,
    pub tvar_head_nodes: usize,
    pub tvar_head_min_spread: f64,
    pub tvar_head_rel_spread: f64,
    pub tvar_depth_min_spread: f64,
    pub tvar_depth_rel_spread: f64,
    pub tvar_low_weight: f64,
    pub tvar_high_weight: f64,
    pub tvar_step: f64,
    pub worst_case_depth: usize,
    pub worst_case_period: usize,
    pub worst_case_rel_gap: f64,
    pub worst_case_top_shift: f64,
    pub worst_case_candidate_shift: f64,
    pub worst_case_endgame_eps: f64,
    pub tvar_weight_root_scale: f64,
    pub tvar_weight_periodic_scale: f64,
    pub tvar_weight_periodic_depth: usize,
}

impl Default for BranchingConstants {
    fn default() -> Self {
        Self {
            balanced_accept_dist: 0.8,
            balanced_tie_dist: 0.9,
            balanced_slack_diff: 3,
            balanced_slack_dist: 0.1,
            aggressive_slack_diff: 4,
            decay_order_scale: 0.5,
            decay_order_offset: 0.5,
            group_factor_boundstrat_early: 0.999,
            group_factor_boundstrat_late: 0.95,
            group_factor_default: 0.9999,
            boundstrat_period: 20,
            boundstrat_early_window: 9,
            balanced_head_nodes: 13,
            window_start_node: 25,
            window_period: 10,
            window_min_residue: 6,
            blend_mean_weight: 0.25,
            blend_mid_weight: 0.375,
            snap_eps: 1e-6,
            shift_eps: 1e-14,
            small_dispersion: 1e-4,
            tvar_head_nodes: 32,
            tvar_head_min_spread: 0.99,
            tvar_head_rel_spread: 0.01,
            tvar_depth_min_spread: 0.05,
            tvar_depth_rel_spread: 1e-4,
            tvar_low_weight: 0.48,
            tvar_high_weight: 0.52,
            tvar_step: 0.1,
            worst_case_depth: 3,
            worst_case_period: 5,
            worst_case_rel_gap: 1e-7,
            worst_case_top_shift: 1e-12,
            worst_case_candidate_shift: 1e-7,
            worst_case_endgame_eps: 0.2,
            tvar_weight_root_scale: 0.05,
            tvar_weight_periodic_scale: 0.8,
            tvar_weight_periodic_depth: 5,
        }
    }
}

/// Risk model whose auxiliary variable perturbs bounding and branching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskModel {
    /// Plain expectation.
    #[default]
    None,
    /// Worst-case cost, auxiliary variable bounds all scenario costs.
    WorstCase,
    /// Tail value-at-risk, auxiliary variable is the value-at-risk.
    Tvar,
    /// Any other risk measure without an auxiliary variable.
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub model: RiskModel,

    /// Pure risk model (no expectation term).
    pub pure: bool,

    /// Probability level of tail measures.
    pub level: f64,

    /// Weight of the risk term in mean-risk models.
    pub weight: f64,

    /// Allow branching on the auxiliary variable.
    pub branch_aux: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            model: RiskModel::None,
            pure: false,
            level: 0.1,
            weight: 1.0,
            branch_aux: true,
        }
    }
}

impl RiskConfig {
    /// Risk models that append an auxiliary variable as last first-stage variable.
    pub fn has_aux_var(&self) -> bool {
        matches!(self.model, RiskModel::WorstCase | RiskModel::Tvar)
    }

    pub fn is_active(&self) -> bool {
        self.model != RiskModel::None
    }

    /// Weight applied to the auxiliary variable when adjusting its bounds.
    pub fn effective_weight(&self) -> f64 {
        if self.pure {
            0.0
        } else {
            self.weight
        }
    }
}

/// Lagrangian dual settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DualConfig {
    /// Use dual bounding in addition to the scenario lower bound.
    pub enabled: bool,

    /// Dual bounding runs only at selected depths instead of at every node.
    pub periodic: bool,

    pub nonanticipativity: NonanticipativityKind,

    /// Limit on dual evaluations per run.
    pub total_iteration_limit: usize,

    /// Additional evaluations tolerated beyond the limit before erroring.
    pub iteration_slack: usize,

    /// Retries of transient infeasibility before the first dual iteration.
    pub max_retries_initial: u32,

    /// Retries of transient infeasibility during dual iterations.
    pub max_retries_iterating: u32,

    /// Keep inherited solutions on the first evaluation at a node.
    pub inherit_solutions: bool,

    /// Initial bundle weight.
    pub initial_weight: f64,

    /// Weight stored when the optimizer reports a negative one.
    pub fallback_weight: f64,

    /// A solution shared by more scenarios than this becomes a warm start for all.
    pub most_frequent_min_count: usize,

    /// Iterations of the bundle loop at one node.
    pub node_iteration_limit: usize,
}

impl Default for DualConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            periodic: false,
            nonanticipativity: NonanticipativityKind::Consecutive,
            total_iteration_limit: 1000,
            iteration_slack: 100,
            max_retries_initial: 3,
            max_retries_iterating: 6,
            inherit_solutions: true,
            initial_weight: 1.0,
            fallback_weight: 0.1,
            most_frequent_min_count: 2,
            node_iteration_limit: 25,
        }
    }
}

impl SipConfig {
    /// Get the default config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".sipdd"))
    }

    /// Get the default config file path.
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|d| d.join("config.toml"))
    }

    /// Load configuration from the default location.
    ///
    /// Returns default config if file doesn't exist.
    pub fn load() -> SipResult<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &PathBuf) -> SipResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> SipResult<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject settings no evaluation can work with.
    pub fn validate(&self) -> SipResult<()> {
        let b = &self.bounding;
        if !(b.accuracy > 0.0) {
            return Err(SipError::Config(format!("accuracy must be positive, got {}", b.accuracy)));
        }
        if !(b.null_dispersion >= 0.0) {
            return Err(SipError::Config(format!(
                "null_dispersion must be non-negative, got {}",
                b.null_dispersion
            )));
        }
        if b.relax == RelaxLevel::Periodic && b.relax_period < 3 {
            return Err(SipError::Config(format!(
                "relax_period must be at least 3, got {}",
                b.relax_period
            )));
        }
        if !(self.branching.branch_eps >= 0.0) {
            return Err(SipError::Config("branch_eps must be non-negative".into()));
        }
        // a width that still counts as splittable must show up as dispersion
        if self.branching.branch_eps > b.null_dispersion {
            return Err(SipError::Config(format!(
                "branch_eps {} exceeds null_dispersion {}",
                self.branching.branch_eps, b.null_dispersion
            )));
        }
        if !(0.0..=1.0).contains(&self.risk.level) {
            return Err(SipError::Config(format!(
                "risk level must lie in [0, 1], got {}",
                self.risk.level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = SipConfig::default();
        assert_eq!(config.bounding.accuracy, 1e-11);
        assert!(config.bounding.premature_cutoff);
        assert_eq!(config.branching.tuning.balanced_accept_dist, 0.8);
        assert_eq!(config.dual.max_retries_initial, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_parsing() {
        let toml = r#"
            [bounding]
            warm_start = "previous_scenario"
            relax = "first_stage"

            [branching.tuning]
            balanced_head_nodes = 20

            [risk]
            model = "tvar"
        "#;

        let config: SipConfig = toml::from_str(toml).unwrap();

        assert_eq!(config.bounding.warm_start, WarmStartMode::PreviousScenario);
        assert_eq!(config.bounding.relax, RelaxLevel::FirstStage);
        assert_eq!(config.branching.tuning.balanced_head_nodes, 20);
        assert_eq!(config.risk.model, RiskModel::Tvar);

        assert_eq!(config.branching.tuning.window_start_node, 25);
        assert_eq!(config.bounding.null_dispersion, 1e-8);
    }

    #[test]
    fn test_save_and_load() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();

        let mut config = SipConfig::default();
        config.branching.int_first = true;
        config.dual.enabled = true;
        config.save_to(&path).unwrap();

        let loaded = SipConfig::load_from(&path).unwrap();
        assert!(loaded.branching.int_first);
        assert!(loaded.dual.enabled);
    }

    #[test]
    fn test_invalid_period_rejected() {
        let mut config = SipConfig::default();
        config.bounding.relax = RelaxLevel::Periodic;
        config.bounding.relax_period = 1;
        assert!(matches!(config.validate(), Err(SipError::Config(_))));
    }

    #[test]
    fn test_branch_eps_above_null_dispersion_rejected() {
        let mut config = SipConfig::default();
        config.branching.branch_eps = 1e-3;
        assert!(matches!(config.validate(), Err(SipError::Config(_))));
        config.bounding.null_dispersion = 1e-3;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_warm_start_codes() {
        for code in 0..=6u8 {
            assert_eq!(WarmStartMode::from_code(code).unwrap().code(), code);
        }
        assert!(WarmStartMode::from_code(7).is_none());
        assert!(WarmStartMode::Advanced.inherits_bound());
        assert!(!WarmStartMode::FatherAndSiblings.inherits_bound());
    }
}
