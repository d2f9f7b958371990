//! Search-wide state threaded through every evaluation call.
//!
//! One [`EvalContext`] exists per branch-and-bound run. It owns the model,
//! configuration, incumbent information and the dual bookkeeping that
//! survives between evaluations, so primal and dual evaluations can
//! alternate on the same nodes without hidden global state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sipdd_core::{
    FirstStageModel, NodeArena, NodeId, NonanticipativityMatrix, RelaxLevel, ScenarioSet, SipConfig,
    SipError, SipResult, SolutionHandle, SolutionPool, INFINITE_BOUND,
};
use sipdd_solver_common::Relaxation;

/// Cooperative cancellation flag, polled before every scenario solve.
///
/// Clones share the flag, so a signal handler or another thread can hold one.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Order in which scenarios are bounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioOrder {
    order: Vec<usize>,
    sorted: bool,
}

impl ScenarioOrder {
    pub fn identity(n: usize) -> Self {
        Self {
            order: (0..n).collect(),
            sorted: false,
        }
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.order
    }

    /// Scenario processed at `position`.
    pub fn scenario(&self, position: usize) -> usize {
        self.order[position]
    }

    pub fn position_of(&self, scenario: usize) -> Option<usize> {
        self.order.iter().position(|&s| s == scenario)
    }

    /// The one-time reordering has been applied.
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub(crate) fn install(&mut self, order: Vec<usize>) {
        debug_assert_eq!(order.len(), self.order.len());
        self.order = order;
        self.sorted = true;
    }
}

/// Incumbent and pruning information of the whole search.
#[derive(Debug, Clone)]
pub struct SearchState {
    /// Objective of the best known feasible solution.
    pub best_value: f64,
    /// First-stage part of the incumbent.
    pub best_solution: Option<SolutionHandle>,
    /// Scenario objectives of the incumbent.
    pub best_scenario_objectives: Vec<f64>,
    /// Leaf with zero dispersion whose bound is the best proven so far.
    pub optimal_node: Option<NodeId>,
    pub optimal_node_bound: f64,
    /// Slack added to the incumbent when testing dominance.
    pub correct_bounding: f64,
    /// Candidate objective suggested by the last evaluation.
    pub heuristic_value: f64,
    /// Nodes pruned by premature cutoff.
    pub cutoff_count: usize,
    /// A node survived only because of scenario MIP gaps.
    pub best_bound_hit: bool,
    /// Largest mean MIP gap seen in a lower-bound pass.
    pub max_mean_gap: f64,
    /// Scenario subproblems solved in lower-bound passes.
    pub problems_solved: usize,
}

impl SearchState {
    pub fn new(n_scenarios: usize) -> Self {
        Self {
            best_value: INFINITE_BOUND,
            best_solution: None,
            best_scenario_objectives: vec![INFINITE_BOUND; n_scenarios],
            optimal_node: None,
            optimal_node_bound: INFINITE_BOUND,
            correct_bounding: 0.0,
            heuristic_value: INFINITE_BOUND,
            cutoff_count: 0,
            best_bound_hit: false,
            max_mean_gap: 0.0,
            problems_solved: 0,
        }
    }
}

/// First-stage solutions and values of the best dual point.
#[derive(Debug, Clone, PartialEq)]
pub struct BestPoint {
    pub solutions: Vec<Option<SolutionHandle>>,
    pub objectives: Vec<f64>,
    pub bounds: Vec<f64>,
}

/// Dual bookkeeping carried across evaluations.
#[derive(Debug, Clone)]
pub struct DualState {
    /// Dual evaluations performed at the current node.
    pub iteration: usize,
    /// Consecutive retries after transient infeasibility.
    pub retries: u32,
    /// Scenario whose solution was shared by most scenarios last time.
    pub most_frequent: Option<usize>,
    pub best_point: Option<BestPoint>,
    /// Switch the scenario solves to the lower-bound profile.
    pub use_lb_profile: bool,
    /// Best dual value seen at the current node.
    pub best_value: f64,
    pub objective_increased: bool,
    pub max_mean_gap: f64,
    /// Integer values of each scenario's last dual solve.
    pub integer_starts: Vec<Option<Vec<f64>>>,
    /// Bundle weight the optimizer should start from.
    pub initial_weight: f64,
}

impl DualState {
    pub fn new(n_scenarios: usize, initial_weight: f64) -> Self {
        Self {
            iteration: 0,
            retries: 0,
            most_frequent: None,
            best_point: None,
            use_lb_profile: false,
            best_value: -INFINITE_BOUND,
            objective_increased: false,
            max_mean_gap: 0.0,
            integer_starts: vec![None; n_scenarios],
            initial_weight,
        }
    }

    /// Forget the per-node part before bounding a new node.
    pub fn start_node(&mut self) {
        self.iteration = 0;
        self.most_frequent = None;
        self.best_value = -INFINITE_BOUND;
        self.best_point = None;
        self.retries = 0;
        self.objective_increased = false;
    }
}

/// Everything an evaluation needs besides the node arena and the collaborators.
#[derive(Debug)]
pub struct EvalContext {
    pub config: SipConfig,
    pub model: FirstStageModel,
    pub scenarios: ScenarioSet,
    pub order: ScenarioOrder,
    pub search: SearchState,
    pub pool: SolutionPool,
    pub cancel: CancelToken,
    /// Linking relations dualised in Lagrangian bounding.
    pub linking: NonanticipativityMatrix,
    /// Wait-and-see bound of each scenario, recorded at its first solve.
    pub wait_and_see: Vec<f64>,
    pub dual: DualState,
}

impl EvalContext {
    pub fn new(config: SipConfig, model: FirstStageModel, scenarios: ScenarioSet) -> SipResult<Self> {
        config.validate()?;
        if config.risk.has_aux_var() && model.len() < 2 {
            return Err(SipError::Validation(
                "risk model needs an auxiliary first-stage variable in last position".into(),
            ));
        }
        let n = scenarios.len();
        Ok(Self {
            pool: SolutionPool::new(config.bounding.accuracy),
            order: ScenarioOrder::identity(n),
            search: SearchState::new(n),
            wait_and_see: vec![-INFINITE_BOUND; n],
            dual: DualState::new(n, config.dual.initial_weight),
            cancel: CancelToken::new(),
            linking: NonanticipativityMatrix::new(config.dual.nonanticipativity, n, model.len()),
            config,
            model,
            scenarios,
        })
    }

    pub fn n_scenarios(&self) -> usize {
        self.scenarios.len()
    }

    pub fn n_first(&self) -> usize {
        self.model.len()
    }

    /// Number of dual multipliers, one per linking relation.
    pub fn n_multipliers(&self) -> usize {
        self.linking.n_relations()
    }

    /// Empty node arena sized for this run.
    pub fn new_arena(&self) -> NodeArena {
        NodeArena::new(self.n_scenarios(), self.n_multipliers())
    }

    pub fn accuracy(&self) -> f64 {
        self.config.bounding.accuracy
    }

    /// Relaxation applied to the scenario problems at `node`.
    pub fn relaxation(&self, node: NodeId) -> Relaxation {
        match self.config.bounding.relax {
            RelaxLevel::None => Relaxation::None,
            RelaxLevel::FirstStage => Relaxation::FirstStage,
            RelaxLevel::Full => Relaxation::Full,
            RelaxLevel::Periodic => {
                if node.index() % self.config.bounding.relax_period as usize != 0 {
                    Relaxation::Full
                } else {
                    Relaxation::None
                }
            }
        }
    }

    /// Index of the risk model's auxiliary variable.
    pub fn aux_var(&self) -> Option<usize> {
        self.config
            .risk
            .has_aux_var()
            .then(|| self.model.last_index())
    }

    /// Store the scenario's wait-and-see bound unless already known.
    pub fn record_wait_and_see(&mut self, scenario: usize, bound: f64) {
        if self.wait_and_see[scenario] == -INFINITE_BOUND {
            self.wait_and_see[scenario] = bound;
        }
    }

    /// Install a new incumbent found while evaluating a node.
    pub fn install_incumbent(&mut self, value: f64, solution: Option<SolutionHandle>, objectives: Vec<f64>) {
        self.search.best_value = value;
        self.search.best_solution = solution;
        self.search.best_scenario_objectives = objectives;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipdd_core::{FirstStageVar, VarKind};

    fn ctx(config: SipConfig) -> EvalContext {
        let model = FirstStageModel::new(vec![FirstStageVar::new("x", VarKind::Integer, 0.0, 5.0)]).unwrap();
        EvalContext::new(config, model, ScenarioSet::uniform(3).unwrap()).unwrap()
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let handle = token.clone();
        handle.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn test_periodic_relaxation() {
        let mut config = SipConfig::default();
        config.bounding.relax = RelaxLevel::Periodic;
        config.bounding.relax_period = 4;
        let c = ctx(config);
        assert_eq!(c.relaxation(NodeId(0)), Relaxation::None);
        assert_eq!(c.relaxation(NodeId(3)), Relaxation::Full);
        assert_eq!(c.relaxation(NodeId(8)), Relaxation::None);
    }

    #[test]
    fn test_wait_and_see_recorded_once() {
        let mut c = ctx(SipConfig::default());
        c.record_wait_and_see(1, 4.0);
        c.record_wait_and_see(1, 9.0);
        assert_eq!(c.wait_and_see[1], 4.0);
    }

    #[test]
    fn test_risk_model_needs_aux_var() {
        let mut config = SipConfig::default();
        config.risk.model = sipdd_core::RiskModel::WorstCase;
        let model = FirstStageModel::new(vec![FirstStageVar::new("x", VarKind::Integer, 0.0, 5.0)]).unwrap();
        assert!(EvalContext::new(config, model, ScenarioSet::uniform(2).unwrap()).is_err());
    }
}
