//! Branch-and-bound nodes stored in an index arena.
//!
//! Each node records only the single box tightening it introduces relative
//! to its father. Effective bounds are derived on demand by walking the
//! father chain and intersecting with the model's original bounds, so the
//! tree needs nothing but parent indices.

use std::fmt;
use std::ops::{Index, IndexMut};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{SipError, SipResult};
use crate::model::FirstStageModel;
use crate::numeric::INFINITE_BOUND;
use crate::solution::SolutionHandle;

/// Position of a node in the [`NodeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0
    }

    pub fn is_root(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Box restriction a node adds on one first-stage variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tightening {
    pub var: usize,
    pub lower: f64,
    pub upper: f64,
}

/// Split chosen by the branching selector for the driver to act on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BranchDecision {
    pub var: usize,
    pub value: f64,
    /// Whether the driver should explore the `x <= value` child first.
    pub down_first: bool,
}

/// Which bounding procedure produced the node's current bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundingStep {
    #[default]
    Primal,
    Dual,
}

/// Per-scenario cache held by a node.
#[derive(Debug, Clone)]
pub struct ScenarioSlot {
    /// First-stage part of the scenario solution, shared across slots.
    pub solution: Option<SolutionHandle>,
    /// Solution was carried over from the father and not resolved here.
    pub inherited: bool,
    /// Node where the solution was computed.
    pub origin: Option<NodeId>,
    /// Objective of the scenario solution.
    pub objective: f64,
    /// Scenario lower bound (includes the Lagrangian penalty in dual mode).
    pub bound: f64,
    /// Scenario lower bound with the Lagrangian penalty removed.
    pub bound_without_penalty: f64,
    /// A first-stage solution is available for this scenario.
    pub solved: bool,
    /// The solver proved optimality for this scenario.
    pub optimal: bool,
    /// Integer values of the full scenario solution, used as warm start.
    pub integer_start: Option<Vec<f64>>,
}

impl Default for ScenarioSlot {
    fn default() -> Self {
        Self {
            solution: None,
            inherited: false,
            origin: None,
            objective: INFINITE_BOUND,
            bound: -INFINITE_BOUND,
            bound_without_penalty: -INFINITE_BOUND,
            solved: false,
            optimal: false,
            integer_start: None,
        }
    }
}

impl ScenarioSlot {
    /// Forget the solution but keep bound information.
    pub fn release(&mut self) {
        self.solution = None;
        self.inherited = false;
        self.origin = None;
        self.solved = false;
    }
}

/// A branch-and-bound node.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub father: Option<NodeId>,
    pub depth: usize,
    pub tightening: Option<Tightening>,
    pub solved: bool,
    pub leaf: bool,
    pub bound: f64,
    pub dispersion_norm: f64,
    pub violations: usize,
    pub branch: Option<BranchDecision>,
    pub step: BoundingStep,
    pub scenarios: Vec<ScenarioSlot>,
    pub multipliers: Vec<f64>,
    pub best_multipliers: Vec<f64>,
    pub best_weight: f64,
}

impl Node {
    fn empty(id: NodeId, n_scenarios: usize, n_multipliers: usize) -> Self {
        Self {
            id,
            father: None,
            depth: 0,
            tightening: None,
            solved: false,
            leaf: false,
            bound: -INFINITE_BOUND,
            dispersion_norm: 0.0,
            violations: 0,
            branch: None,
            step: BoundingStep::Primal,
            scenarios: vec![ScenarioSlot::default(); n_scenarios],
            multipliers: vec![0.0; n_multipliers],
            best_multipliers: vec![0.0; n_multipliers],
            best_weight: 0.0,
        }
    }

    pub fn is_root(&self) -> bool {
        self.father.is_none()
    }

    /// Number of slots of this node holding the same solution as `scenario`.
    pub fn identical_count(&self, scenario: usize) -> usize {
        match &self.scenarios[scenario].solution {
            Some(handle) => self
                .scenarios
                .iter()
                .filter(|slot| {
                    slot.solution
                        .as_ref()
                        .is_some_and(|other| Rc::ptr_eq(handle, other))
                })
                .count(),
            None => 0,
        }
    }

    pub fn multipliers_all_zero(&self) -> bool {
        self.multipliers.iter().all(|m| *m == 0.0)
    }

    pub fn release_solutions(&mut self) {
        for slot in &mut self.scenarios {
            slot.release();
        }
    }
}

/// Arena owning every node of one search.
#[derive(Debug, Clone)]
pub struct NodeArena {
    nodes: Vec<Node>,
    n_scenarios: usize,
    n_multipliers: usize,
}

impl NodeArena {
    /// Arena containing only the root node.
    pub fn new(n_scenarios: usize, n_multipliers: usize) -> Self {
        Self {
            nodes: vec![Node::empty(NodeId::ROOT, n_scenarios, n_multipliers)],
            n_scenarios,
            n_multipliers,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    /// Create a child carrying one tightening and the father's reusable data.
    ///
    /// The child starts from the father's bound and per-scenario bounds. A
    /// father solution whose value of the tightened variable lies inside the
    /// new range stays valid and is shared as an inherited solution.
    pub fn add_child(&mut self, father: NodeId, tightening: Tightening) -> SipResult<NodeId> {
        let parent = self
            .nodes
            .get(father.0)
            .ok_or(SipError::UnknownNode(father.0))?;
        if tightening.lower > tightening.upper {
            return Err(SipError::Validation(format!(
                "tightening of variable {} is empty: [{}, {}]",
                tightening.var, tightening.lower, tightening.upper
            )));
        }
        let id = NodeId(self.nodes.len());
        let mut child = Node::empty(id, self.n_scenarios, self.n_multipliers);
        child.father = Some(father);
        child.depth = parent.depth + 1;
        child.tightening = Some(tightening);
        child.bound = parent.bound;
        child.multipliers = parent.best_multipliers.clone();
        child.best_multipliers = parent.best_multipliers.clone();
        child.best_weight = parent.best_weight;

        for (slot, from) in child.scenarios.iter_mut().zip(&parent.scenarios) {
            slot.bound = from.bound;
            slot.bound_without_penalty = from.bound_without_penalty;
            slot.integer_start = from.integer_start.clone();
            let Some(handle) = &from.solution else {
                continue;
            };
            let v = handle[tightening.var];
            if v >= tightening.lower && v <= tightening.upper {
                slot.solution = Some(Rc::clone(handle));
                slot.inherited = true;
                slot.origin = from.origin.or(Some(father));
                slot.objective = from.objective;
                slot.optimal = from.optimal;
                slot.solved = true;
            }
        }
        self.nodes.push(child);
        Ok(id)
    }

    /// The node itself followed by its ancestors up to the root.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            arena: self,
            next: Some(id),
        }
    }

    /// Bounds of `var` at `id`: original bounds intersected with every
    /// tightening on the father chain.
    pub fn effective_bounds(&self, id: NodeId, var: usize, model: &FirstStageModel) -> (f64, f64) {
        let mut lower = model.lower(var);
        let mut upper = model.upper(var);
        for node in self.ancestors(id) {
            if let Some(t) = node.tightening.filter(|t| t.var == var) {
                lower = lower.max(t.lower);
                upper = upper.min(t.upper);
            }
        }
        (lower, upper)
    }

    /// Effective bounds of all first-stage variables, one chain walk.
    pub fn effective_box(&self, id: NodeId, model: &FirstStageModel) -> Vec<(f64, f64)> {
        let mut bounds: Vec<(f64, f64)> = (0..model.len())
            .map(|j| (model.lower(j), model.upper(j)))
            .collect();
        for node in self.ancestors(id) {
            if let Some(t) = node.tightening {
                let b = &mut bounds[t.var];
                b.0 = b.0.max(t.lower);
                b.1 = b.1.min(t.upper);
            }
        }
        bounds
    }
}

impl Index<NodeId> for NodeArena {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }
}

impl IndexMut<NodeId> for NodeArena {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }
}

/// Iterator over a node and its ancestors.
pub struct Ancestors<'a> {
    arena: &'a NodeArena,
    next: Option<NodeId>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<&'a Node> {
        let node = self.arena.get(self.next?)?;
        self.next = node.father;
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FirstStageVar, VarKind};
    use crate::solution::SolutionPool;

    fn model() -> FirstStageModel {
        FirstStageModel::new(vec![
            FirstStageVar::new("x", VarKind::Integer, 0.0, 10.0),
            FirstStageVar::new("y", VarKind::Continuous, -1.0, 1.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_effective_bounds_walk_chain() {
        let m = model();
        let mut arena = NodeArena::new(2, 0);
        let a = arena
            .add_child(NodeId::ROOT, Tightening { var: 0, lower: 0.0, upper: 4.0 })
            .unwrap();
        let b = arena
            .add_child(a, Tightening { var: 1, lower: 0.25, upper: 1.0 })
            .unwrap();
        let c = arena
            .add_child(b, Tightening { var: 0, lower: 2.0, upper: 10.0 })
            .unwrap();

        assert_eq!(arena.effective_bounds(c, 0, &m), (2.0, 4.0));
        assert_eq!(arena.effective_bounds(c, 1, &m), (0.25, 1.0));
        assert_eq!(arena.effective_box(c, &m), vec![(2.0, 4.0), (0.25, 1.0)]);
        assert_eq!(arena[c].depth, 3);
        assert_eq!(arena.ancestors(c).count(), 4);
    }

    #[test]
    fn test_child_inherits_solutions_inside_new_range() {
        let mut pool = SolutionPool::new(1e-11);
        let mut arena = NodeArena::new(3, 0);
        let (low, _) = pool.intern(vec![1.0, 0.0]);
        let (high, _) = pool.intern(vec![7.0, 0.0]);
        {
            let root = &mut arena[NodeId::ROOT];
            root.bound = 12.0;
            for (s, h) in [&low, &high, &low].into_iter().enumerate() {
                let slot = &mut root.scenarios[s];
                slot.solution = Some(Rc::clone(h));
                slot.solved = true;
                slot.objective = 10.0 + s as f64;
                slot.bound = 9.0 + s as f64;
            }
        }
        let child = arena
            .add_child(NodeId::ROOT, Tightening { var: 0, lower: 0.0, upper: 1.0 })
            .unwrap();
        let node = &arena[child];
        assert_eq!(node.bound, 12.0);
        assert!(node.scenarios[0].inherited);
        assert!(!node.scenarios[1].inherited);
        assert!(node.scenarios[1].solution.is_none());
        assert_eq!(node.scenarios[1].bound, 10.0);
        assert_eq!(node.scenarios[2].origin, Some(NodeId::ROOT));
        assert_eq!(node.identical_count(0), 2);
    }

    #[test]
    fn test_unknown_father_rejected() {
        let mut arena = NodeArena::new(1, 0);
        let err = arena
            .add_child(NodeId(5), Tightening { var: 0, lower: 0.0, upper: 1.0 })
            .unwrap_err();
        assert!(matches!(err, SipError::UnknownNode(5)));
    }
}
