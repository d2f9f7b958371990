//! # sipdd-core: data model for scenario-decomposed stochastic MIP
//!
//! Two-stage stochastic programs are solved by branching on the first-stage
//! variables and bounding every node with scenario decomposition. This crate
//! holds the state those routines share:
//!
//! | Type | Role |
//! |------|------|
//! | [`ScenarioSet`] | scenario probabilities, rescaled to sum to one |
//! | [`FirstStageModel`] | first-stage variable kinds, original bounds, priorities |
//! | [`NodeArena`] | branch-and-bound nodes with parent indices and per-scenario caches |
//! | [`SolutionPool`] | content-addressed interning of first-stage solutions |
//! | [`NonanticipativityMatrix`] | sparse linking relations dualised in Lagrangian bounding |
//! | [`SipConfig`] | TOML configuration of bounding, branching, risk and dual settings |
//!
//! The evaluation routines themselves live in `sipdd-algo`; the solver and
//! bundle collaborator contracts in `sipdd-solver-common`.

pub mod config;
pub mod error;
pub mod model;
pub mod node;
pub mod nonant;
pub mod numeric;
pub mod solution;

pub use config::{
    BoundingConfig, BranchStrategy, BranchingConfig, BranchingConstants, DualConfig, EqualSplit,
    RelaxLevel, RiskConfig, RiskModel, SipConfig, WarmStartMode,
};
pub use error::{SipError, SipResult};
pub use model::{FirstStageModel, FirstStageVar, ScenarioSet, VarKind};
pub use node::{BoundingStep, BranchDecision, Node, NodeArena, NodeId, ScenarioSlot, Tightening};
pub use nonant::{NonanticipativityKind, NonanticipativityMatrix};
pub use numeric::{approx_eq, INFINITE_BOUND};
pub use solution::{FirstStageSolution, SolutionHandle, SolutionPool};
