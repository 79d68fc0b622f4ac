//! Error types for the fitting crate.

use thiserror::Error;

/// Errors from dataset assembly and curve fitting.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FitError {
    /// A variable name was not found in the dataset.
    #[error("dataset has no variable {0}")]
    UnknownVariable(String),

    /// A dimension name was not found in the dataset.
    #[error("dataset has no dimension {0}")]
    UnknownDim(String),

    /// A coordinate label was not found along a dimension.
    #[error("no coordinate {label} along {dim}")]
    UnknownLabel { dim: String, label: String },

    /// Fetched arrays do not stack into the declared axes.
    #[error("cannot assemble {name}: shape {got:?} does not match axes {want:?}")]
    AssemblyShape {
        name: String,
        got: Vec<usize>,
        want: Vec<usize>,
    },

    /// A per-qubit stream index has no matching qubit.
    #[error("stream {0} indexes past the qubit list")]
    StreamIndex(String),

    /// A numbered stream group does not cover every qubit exactly once.
    #[error("stream group {name} has {got} member(s) for {want} qubit(s)")]
    StreamCount {
        name: String,
        got: usize,
        want: usize,
    },

    /// Too few points for the requested fit.
    #[error("not enough data points: {got} for {needed} parameters")]
    TooFewPoints { got: usize, needed: usize },

    /// The solver did not converge within its iteration budget.
    #[error("fit did not converge after {0} iterations")]
    NoConvergence(usize),

    /// The normal equations were singular.
    #[error("singular system in {0}")]
    Singular(&'static str),
}

/// Result type for fitting operations.
pub type FitResult<T> = Result<T, FitError>;
