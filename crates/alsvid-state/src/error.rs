//! Error types for the state crate.

use thiserror::Error;

/// Errors that can occur while loading, saving or navigating device state.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StateError {
    /// No state path given and the environment variable is unset.
    #[error(
        "no state path provided; pass one explicitly or set the {0} environment variable"
    )]
    MissingStatePath(&'static str),

    /// Filesystem error while reading or writing state files.
    #[error("state I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// State file could not be parsed or serialized.
    #[error("state serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A qubit name was not found in the machine.
    #[error("unknown qubit: {0}")]
    UnknownQubit(String),

    /// A qubit pair name was not found in the machine.
    #[error("unknown qubit pair: {0}")]
    UnknownPair(String),

    /// A flux point was requested for an incompatible target.
    #[error("invalid flux target: {0}")]
    FluxTarget(String),

    /// An operation references a flux element the qubit does not have.
    #[error("qubit {0} has no flux element")]
    MissingFluxElement(String),

    /// A pulse operation was not found on an element.
    #[error("element {element} has no operation named {operation}")]
    UnknownOperation { element: String, operation: String },
}

/// Result type for state operations.
pub type StateResult<T> = Result<T, StateError>;
