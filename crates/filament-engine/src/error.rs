//! Error types for the engine
//!
//! Only registration-time problems are fatal. Unresolved connections are
//! dropped and recorded on the [`WarningTracker`](crate::WarningTracker);
//! hitting the update-loop iteration cap is an expected, silent stopping
//! condition rather than an error.

use thiserror::Error;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur in the engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// A node type was registered twice under the same name
    #[error("Node type already registered: {0}")]
    DuplicateType(String),

    /// A graph references a type that was never registered
    #[error("Unknown node type: {0}")]
    UnknownType(String),

    /// Instantiation referenced a component the library doesn't contain
    #[error("Unknown component: {0}")]
    UnknownComponent(String),
}
