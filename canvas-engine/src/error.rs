//! Error types for engine operations.

use thiserror::Error;

use crate::warning::ValidationWarning;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Element not found in the element model.
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// Invalid element or mutation operation.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Engine configuration is inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Model serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The live document rejected an operation.
    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    /// The batch carried at least one error-severity warning and was not applied.
    #[error("Validation failed with {} error(s)", count_errors(.warnings))]
    ValidationFailed {
        /// Every warning produced for the rejected batch.
        warnings: Vec<ValidationWarning>,
    },
}

fn count_errors(warnings: &[ValidationWarning]) -> usize {
    warnings.iter().filter(|w| w.is_error()).count()
}

/// Errors raised by a [`LiveDocument`](crate::document::LiveDocument) while
/// applying primitive operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocumentError {
    /// The target selector matched no node.
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    /// The node handle no longer refers to a node in the document.
    #[error("Node detached: {0}")]
    Detached(String),

    /// The requested insert position is impossible for the target.
    #[error("Invalid position {position} for target {target}")]
    InvalidPosition {
        /// Insert position.
        position: String,
        /// Target selector.
        target: String,
    },
}
