//! Alsvid device state
//!
//! This crate holds the persisted hardware record that every calibration node
//! reads and updates: transmons with their drive, flux and readout elements,
//! transmon pairs with couplers and two-qubit gate parameters, and the
//! network block describing how to reach the orchestration service.
//!
//! The state round-trips through two JSON files: `state.json` carries the
//! qubit tree, `wiring.json` carries the wiring blob and the network block.
//! Nodes mutate the in-memory [`Machine`] and persist it back at the end of a
//! run; the delta between the before/after snapshots is what gets recorded as
//! the node's state update (see [`diff_state`]).
//!
//! # Example
//!
//! ```ignore
//! use alsvid_state::Machine;
//!
//! let mut machine = Machine::load_default()?;
//! for qubit in machine.active_qubits() {
//!     println!("{}: f01 = {:.6} GHz", qubit.name, qubit.f_01_hz / 1e9);
//! }
//! ```

pub mod config;
pub mod elements;
pub mod error;
pub mod machine;
pub mod pulses;
pub mod tracked;
pub mod transmon;

pub use config::{ControllerConfig, ElementConfig, SAMPLE_RATE_HZ};
pub use elements::{FluxElement, InputChannel, OutputChannel, ReadoutResonator, XyDrive};
pub use error::{StateError, StateResult};
pub use machine::{FluxPoint, FluxSettings, FluxTarget, Machine, Network};
pub use pulses::{DragPulse, PulseOp, ReadoutPulse, SquarePulse};
pub use tracked::{StateUpdate, diff_state, snapshot};
pub use transmon::{Coupler, CzGate, Transmon, TransmonPair};

/// Environment variable pointing at the state directory.
pub const STATE_PATH_ENV: &str = "ALSVID_STATE_PATH";
