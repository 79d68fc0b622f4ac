//! Error types for the execution crate.

use thiserror::Error;

/// Errors surfaced to calibration nodes by the execution layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecError {
    /// Network or protocol failure talking to the orchestration service.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service rejected the request with a non-success status.
    #[error("service error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The machine stayed busy past the session queue timeout.
    #[error("timed out after {0}s waiting for the machine to become free")]
    SessionQueueTimeout(u64),

    /// The service refused the submitted program.
    #[error("submission rejected: {0}")]
    SubmissionRejected(String),

    /// The controller configuration was rejected at open time.
    #[error("configuration rejected: {0}")]
    ConfigRejected(String),

    /// The job ended in a failure state.
    #[error("job failed: {0}")]
    JobFailed(String),

    /// The job was cancelled before completing.
    #[error("job cancelled")]
    JobCancelled,

    /// The job did not reach a terminal state within the wait timeout.
    #[error("timed out waiting for job {0}")]
    WaitTimeout(String),

    /// A named result handle does not exist on this job.
    #[error("no result handle named {0}")]
    HandleNotFound(String),

    /// A fetched array does not match the shape its pipeline declares.
    #[error("result {name}: payload has {got} values, shape {shape:?} wants {want}")]
    ShapeMismatch {
        name: String,
        got: usize,
        want: usize,
        shape: Vec<usize>,
    },

    /// Payload decoding failure.
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// The program failed validation before submission.
    #[error(transparent)]
    Program(#[from] alsvid_seq::SeqError),
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;
