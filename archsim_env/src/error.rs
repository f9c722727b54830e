//! Error types for the oracle boundary.

use thiserror::Error;

/// Errors that can be returned by a [`crate::ScoringOracle`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OracleError {
    /// The oracle capability has not been initialised yet (startup).
    #[error("Oracle not initialised")]
    Unavailable,

    /// `evaluate` was called for a design that was never saved.
    #[error("Design not found: {0}")]
    UnknownDesign(String),

    /// The saved design references a scenario the oracle does not know.
    #[error("Scenario not found: {0}")]
    UnknownScenario(String),

    /// The oracle refused the request (bad payload, invalid id, ...).
    #[error("Oracle rejected request: {0}")]
    Rejected(String),

    /// Transport failure between the core and the oracle.
    #[error("Oracle transport error: {0}")]
    Transport(String),
}

impl OracleError {
    /// Creates a rejection error.
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// Creates a transport error.
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Returns true for the expected "not ready yet" condition.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}
