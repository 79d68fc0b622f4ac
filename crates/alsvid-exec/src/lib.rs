//! Alsvid execution layer
//!
//! One [`Backend`] trait, three implementations:
//!
//! - [`QopBackend`] drives the local orchestration service over HTTP with
//!   machine sessions and a polling job lifecycle;
//! - [`CloudBackend`] routes through the cloud proxy, whose single eager
//!   call is normalized back into the polling interface by the shim in
//!   [`cloud`];
//! - [`SimulatorBackend`] renders programs offline and synthesizes
//!   placeholder results so nodes run end to end without hardware.
//!
//! Selection between local and cloud follows the `cloud` flag of the
//! persisted network block.

pub mod backend;
pub mod cloud;
pub mod error;
pub mod job;
pub mod qop;
pub mod simulator;
pub mod wire;

use std::time::Duration;

use alsvid_state::Network;

pub use backend::{Backend, POLL_INTERVAL, ResultHandle, ResultHandles, fetch_all};
pub use cloud::{CloudBackend, CloudClient, CloudJob, CloudResultHandles};
pub use error::{ExecError, ExecResult};
pub use job::{Job, JobId, JobStatus};
pub use qop::{QopBackend, QopClient};
pub use simulator::{SimulatedSamples, SimulatorBackend};
pub use wire::ArrayPayload;

/// Pick the backend the network block asks for.
///
/// `timeout` bounds the session queue on the local path and the execute
/// options on the cloud path.
pub fn backend_from_network(
    network: &Network,
    timeout: Duration,
) -> ExecResult<Box<dyn Backend>> {
    if network.cloud {
        Ok(Box::new(CloudBackend::from_network(network, Some(timeout))?))
    } else {
        Ok(Box::new(QopBackend::from_network(network, timeout)?))
    }
}
