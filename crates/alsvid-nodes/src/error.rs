//! Error types for the node framework.

use thiserror::Error;

/// Errors from parameter validation, run orchestration and analysis.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NodeError {
    /// A parameter failed a guard (range, divisibility, missing field).
    #[error("invalid parameter: {0}")]
    Parameter(String),

    /// No registered node under this name.
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// Analysis could not produce a usable result.
    #[error("analysis failed: {0}")]
    Analysis(String),

    /// The calibration graph has a dependency cycle.
    #[error("calibration graph has a cycle through {0}")]
    GraphCycle(String),

    /// A graph edge references an unknown node id.
    #[error("graph edge references unknown node: {0}")]
    GraphEdge(String),

    /// Run-record persistence failure.
    #[error("run store error: {0}")]
    Store(String),

    #[error(transparent)]
    State(#[from] alsvid_state::StateError),

    #[error(transparent)]
    Seq(#[from] alsvid_seq::SeqError),

    #[error(transparent)]
    Exec(#[from] alsvid_exec::ExecError),

    #[error(transparent)]
    Fit(#[from] alsvid_fit::FitError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for node operations.
pub type NodeResult<T> = Result<T, NodeError>;
