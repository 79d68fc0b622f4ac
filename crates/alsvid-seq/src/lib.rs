//! Alsvid pulse-sequence IR
//!
//! Calibration nodes build a [`Program`]: a tree of play/measure/sweep
//! instructions plus the stream pipelines shaping what the backend returns.
//! This crate also samples the calibrated pulse records into waveforms (for
//! the controller configuration and the simulator) and carries the
//! XZ-native Clifford machinery used by randomized benchmarking.

pub mod clifford;
pub mod error;
pub mod program;
pub mod streams;
pub mod waveform;

pub use clifford::{CliffordGroup, RbSequence, XzGate};
pub use error::{SeqError, SeqResult};
pub use program::{AmpMatrix, AmpScale, Instr, Param, Program, SweepAxis};
pub use streams::{Pipeline, StreamDecl, StreamKind, StreamOp};
pub use waveform::{Waveform, sample};
