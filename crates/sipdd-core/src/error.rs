//! Errors raised while building the data model or loading configuration.
//!
//! [`SipError`] covers scenario sets, first-stage variables, the node arena
//! and the TOML configuration. Evaluation and solver failures have their own
//! error types in the downstream crates; they wrap `SipError` where a model
//! inconsistency surfaces during evaluation.
//!
//! # Example
//!
//! ```ignore
//! use sipdd_core::{SipResult, ScenarioSet};
//!
//! fn load(probs: Vec<f64>) -> SipResult<ScenarioSet> {
//!     let scenarios = ScenarioSet::new(probs, 1e-11)?;
//!     Ok(scenarios)
//! }
//! ```

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SipError {
    /// Config file could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed config file
    #[error("Parse error: {0}")]
    Parse(String),

    /// Scenario probabilities, variable bounds or tightenings that make no sense
    #[error("Validation error: {0}")]
    Validation(String),

    /// Settings no evaluation can work with
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reference to a node that is not in the arena
    #[error("Unknown node: {0}")]
    UnknownNode(usize),
}

pub type SipResult<T> = Result<T, SipError>;

impl From<toml::de::Error> for SipError {
    fn from(err: toml::de::Error) -> Self {
        SipError::Parse(err.to_string())
    }
}

impl From<toml::ser::Error> for SipError {
    fn from(err: toml::ser::Error) -> Self {
        SipError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message() {
        let err = SipError::Validation("probability below minimum".into());
        assert_eq!(err.to_string(), "Validation error: probability below minimum");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "config.toml");
        let sip_err: SipError = io_err.into();
        assert!(matches!(sip_err, SipError::Io(_)));
    }

    #[test]
    fn test_broken_toml_is_a_parse_error() {
        let err = toml::from_str::<toml::Value>("= broken").unwrap_err();
        let sip_err: SipError = err.into();
        assert!(matches!(sip_err, SipError::Parse(_)));
    }

    #[test]
    fn test_unknown_node_propagates() {
        fn lookup() -> SipResult<()> {
            Err(SipError::UnknownNode(7))
        }

        fn evaluate() -> SipResult<()> {
            lookup()?;
            Ok(())
        }

        assert_eq!(evaluate().unwrap_err().to_string(), "Unknown node: 7");
    }
}
