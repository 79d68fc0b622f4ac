//! Error types for the sequence crate.

use thiserror::Error;

/// Errors raised while building or validating pulse programs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SeqError {
    /// A sweep axis was declared with no values.
    #[error("sweep axis {0} has no values")]
    EmptySweep(String),

    /// Two pipelines save under the same name.
    #[error("duplicate stream save name: {0}")]
    DuplicateSave(String),

    /// A pipeline references a stream that was never declared.
    #[error("pipeline reads undeclared stream: {0}")]
    UnknownStream(String),

    /// A buffer chain does not match the sweep axes it covers.
    #[error("stream {stream}: buffer length {buffer} does not match sweep axis {axis} ({len})")]
    BufferMismatch {
        stream: String,
        buffer: usize,
        axis: String,
        len: usize,
    },

    /// A pulse duration or sweep value is not representable on hardware.
    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    /// Clifford bookkeeping failed (an inverse or composition fell outside
    /// the group).
    #[error("clifford group error: {0}")]
    Clifford(String),
}

/// Result type for sequence operations.
pub type SeqResult<T> = Result<T, SeqError>;
