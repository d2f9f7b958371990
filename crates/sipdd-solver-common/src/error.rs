//! Error types and status codes for collaborator failures.

use thiserror::Error;

/// Status codes reported to the caller of a failed node evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success (check the node fields for the outcome)
    Success = 0,
    /// Invalid input (bad layout, malformed start values)
    InvalidInput = 1,
    /// Solver error (license, numerical failure, crash)
    SolverError = 2,
    /// Iteration or time budget exhausted
    Limit = 3,
}

impl ExitCode {
    /// Convert from raw status code to ExitCode enum.
    pub fn from_raw(code: i32) -> Self {
        match code {
            0 => ExitCode::Success,
            1 => ExitCode::InvalidInput,
            3 => ExitCode::Limit,
            _ => ExitCode::SolverError,
        }
    }

    /// Check if this exit code indicates success.
    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }
}

/// Errors raised by the subproblem solver or bundle optimizer.
#[derive(Debug, Error)]
pub enum SolverError {
    /// The solver call itself failed.
    #[error("solver failed on scenario {scenario} with status {code}: {message}")]
    Invocation {
        scenario: usize,
        code: i32,
        message: String,
    },

    /// The "use start values" control could not be set.
    #[error("could not set start-value control: {0}")]
    StartValues(String),

    /// A branched first-stage variable is missing from the integer layout.
    #[error("first-stage variable {0} has no position among the integer variables")]
    Layout(usize),

    /// The bundle optimizer failed to produce a step.
    #[error("bundle optimizer failed: {0}")]
    Bundle(String),

    /// Implementor-specific failure.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl SolverError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            SolverError::Layout(_) | SolverError::StartValues(_) => ExitCode::InvalidInput,
            SolverError::Invocation { code, .. } if *code != 0 => ExitCode::from_raw(*code),
            _ => ExitCode::SolverError,
        }
    }
}

/// Result type alias for collaborator operations.
pub type SolverResult<T> = Result<T, SolverError>;
