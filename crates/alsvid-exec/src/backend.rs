//! Backend trait and result-handle contract.
//!
//! The [`Backend`] trait defines the lifecycle every execution target
//! implements:
//!
//! ```text
//!   submit() ──→ status() ──→ handles() ──→ fetch()
//!    (async)      (async)       (async)     (async)
//! ```
//!
//! # Contract
//!
//! - `submit()` MUST validate the program and return a job in `Queued`.
//! - `handles()` MAY be called while the job is still running; handles
//!   report liveness through `is_processing()` so callers can stream
//!   partial progress.
//! - `wait()` has a default implementation (500 ms poll, caller-supplied
//!   timeout).
//! - Cancelling a terminal job is a no-op, not an error.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use ndarray::ArrayD;
use tokio::time::sleep;

use alsvid_seq::Program;
use alsvid_state::ControllerConfig;

use crate::error::{ExecError, ExecResult};
use crate::job::{JobId, JobStatus};

/// Poll period of the provided wait loop.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Trait for execution backends.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Name of this backend, used in run records.
    fn name(&self) -> &str;

    /// Submit a program together with the rendered controller config.
    ///
    /// Returns a job ID in `Queued` status.
    async fn submit(&self, program: &Program, config: &ControllerConfig) -> ExecResult<JobId>;

    /// Current status of a job.
    async fn status(&self, job: &JobId) -> ExecResult<JobStatus>;

    /// Result handles of a job.
    async fn handles(&self, job: &JobId) -> ExecResult<Box<dyn ResultHandles>>;

    /// Cancel a running job.
    async fn cancel(&self, job: &JobId) -> ExecResult<()>;

    /// Live value of a progress counter stream, if the backend tracks it.
    async fn progress(&self, job: &JobId, counter: &str) -> ExecResult<Option<u64>>;

    /// Release any session held for a job.
    ///
    /// Best-effort: failures are logged by the implementation, never
    /// returned. Default is a no-op for backends without sessions.
    async fn release(&self, _job: &JobId) {}

    /// Wait for a job to reach a terminal state.
    ///
    /// Default implementation polls every 500 ms up to `timeout`.
    async fn wait(&self, job: &JobId, timeout: Duration) -> ExecResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.status(job).await? {
                JobStatus::Completed => return Ok(()),
                JobStatus::Failed(msg) => return Err(ExecError::JobFailed(msg)),
                JobStatus::Cancelled => return Err(ExecError::JobCancelled),
                JobStatus::Queued | JobStatus::Running => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(ExecError::WaitTimeout(job.to_string()));
                    }
                    sleep(POLL_INTERVAL).await;
                }
            }
        }
    }
}

/// The named results of one job.
///
/// Implementations differ in where the data lives: the local service client
/// fetches on demand, the cloud shim serves a stored eager response, the
/// simulator synthesizes placeholder arrays.
#[async_trait]
pub trait ResultHandles: Send + Sync {
    /// Names of the available handles, in declaration order.
    fn keys(&self) -> Vec<String>;

    /// Borrow one handle by name.
    fn get(&self, name: &str) -> ExecResult<Box<dyn ResultHandle>>;

    /// Whether the job is still filling its streams.
    ///
    /// Live-progress loops run while this is true.
    async fn is_processing(&self) -> ExecResult<bool>;

    /// Block until every stream has its final values.
    async fn wait_for_all_values(&self) -> ExecResult<()>;
}

/// One named result stream.
#[async_trait]
pub trait ResultHandle: Send + Sync + std::fmt::Debug {
    /// Name of this handle.
    fn name(&self) -> &str;

    /// Fetch the current array, shaped by the stream pipeline.
    async fn fetch(&self) -> ExecResult<ArrayD<f64>>;

    /// Completed outer iterations, when the backend reports them.
    async fn count_so_far(&self) -> ExecResult<Option<u64>>;
}

/// Fetch every handle into a name-keyed map.
pub async fn fetch_all(handles: &dyn ResultHandles) -> ExecResult<BTreeMap<String, ArrayD<f64>>> {
    let mut out = BTreeMap::new();
    for key in handles.keys() {
        let handle = handles.get(&key)?;
        out.insert(key, handle.fetch().await?);
    }
    Ok(out)
}
