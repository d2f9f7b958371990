//! Outcome classes of a node evaluation.
//!
//! Expected conditions (infeasibility, cutoff, cancellation) are not errors;
//! they are recorded in the node and in the evaluation report. An `Err` is
//! returned only when the evaluation could not be completed:
//!
//! * [`EvalError::Retryable`]: dual infeasibility that may vanish for another
//!   attempt; the caller retries the evaluation.
//! * everything else is fatal for the node.

use sipdd_core::SipError;
use sipdd_solver_common::{ExitCode, SolverError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    /// Scenario infeasible under the current multipliers; retry permitted.
    #[error("scenario {scenario} infeasible in dual evaluation (attempt {attempt})")]
    Retryable { scenario: usize, attempt: u32 },

    /// A collaborator failed.
    #[error("solver error: {0}")]
    Solver(#[from] SolverError),

    /// The dual loop exceeded its iteration budget.
    #[error("dual iteration limit exceeded ({iterations} > {limit})")]
    IterationLimit { iterations: usize, limit: usize },

    /// Inconsistent data model (unknown node, bad layout).
    #[error("model error: {0}")]
    Model(#[from] SipError),
}

impl EvalError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EvalError::Retryable { .. })
    }

    /// Non-zero status reported to the caller.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            EvalError::Solver(e) => e.exit_code(),
            EvalError::Retryable { .. } => ExitCode::SolverError,
            EvalError::IterationLimit { .. } => ExitCode::Limit,
            EvalError::Model(_) => ExitCode::InvalidInput,
        }
    }
}

pub type EvalResult<T> = Result<T, EvalError>;
