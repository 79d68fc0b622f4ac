//! Hardware elements: drive lines, flux lines, readout resonators.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};
use crate::pulses::PulseOp;

/// An analog output channel on a controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputChannel {
    /// Controller identifier (e.g. "con1").
    pub controller: String,
    /// Port number on the controller.
    pub port: u8,
}

/// An analog input channel with its calibrated offset and gain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputChannel {
    /// Controller identifier.
    pub controller: String,
    /// Port number on the controller.
    pub port: u8,
    /// DC offset to subtract, in volts. `None` means never calibrated.
    #[serde(default)]
    pub offset: Option<f64>,
    /// Variable input gain in dB.
    #[serde(default)]
    pub gain_db: Option<i8>,
}

/// Microwave drive element of a transmon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XyDrive {
    pub channel: OutputChannel,
    /// Intermediate frequency of the digital oscillator, Hz.
    pub intermediate_frequency_hz: f64,
    /// Calibrated drive operations ("x180", "x90", "-x90", "y90", "y180",
    /// "saturation", ...).
    pub operations: BTreeMap<String, PulseOp>,
}

impl XyDrive {
    /// Look up an operation by name.
    pub fn operation(&self, name: &str) -> StateResult<&PulseOp> {
        self.operations
            .get(name)
            .ok_or_else(|| StateError::UnknownOperation {
                element: "xy".into(),
                operation: name.into(),
            })
    }

    /// Look up an operation mutably.
    pub fn operation_mut(&mut self, name: &str) -> StateResult<&mut PulseOp> {
        self.operations
            .get_mut(name)
            .ok_or_else(|| StateError::UnknownOperation {
                element: "xy".into(),
                operation: name.into(),
            })
    }
}

/// DC flux-bias element of a flux-tunable transmon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluxElement {
    pub channel: OutputChannel,
    /// Bias at the joint sweet spot, volts.
    pub joint_offset: f64,
    /// Bias at the independent sweet spot, volts.
    pub independent_offset: f64,
    /// Bias parking the qubit at its minimum frequency, volts.
    pub min_offset: f64,
    /// Free-form operating point used by arbitrary-bias experiments.
    #[serde(default)]
    pub arbitrary_offset: f64,
    /// Time for the bias line to settle after a step, nanoseconds.
    pub settle_time_ns: u32,
    /// Flux pulse operations ("const").
    #[serde(default)]
    pub operations: BTreeMap<String, PulseOp>,
}

impl FluxElement {
    /// Look up a flux operation by name.
    pub fn operation(&self, name: &str) -> StateResult<&PulseOp> {
        self.operations
            .get(name)
            .ok_or_else(|| StateError::UnknownOperation {
                element: "z".into(),
                operation: name.into(),
            })
    }
}

/// Readout resonator element: one output, two demodulated inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadoutResonator {
    pub output: OutputChannel,
    pub input_i: InputChannel,
    pub input_q: InputChannel,
    /// Intermediate frequency of the readout oscillator, Hz.
    pub intermediate_frequency_hz: f64,
    /// Acquisition delay compensating propagation and processing, ns.
    pub time_of_flight_ns: u32,
    /// Time for the resonator to deplete after a measurement, ns.
    pub depletion_time_ns: u32,
    /// Readout operations ("readout").
    pub operations: BTreeMap<String, PulseOp>,
}

impl ReadoutResonator {
    /// Look up a readout operation by name.
    pub fn operation(&self, name: &str) -> StateResult<&PulseOp> {
        self.operations
            .get(name)
            .ok_or_else(|| StateError::UnknownOperation {
                element: "resonator".into(),
                operation: name.into(),
            })
    }

    /// Look up a readout operation mutably.
    pub fn operation_mut(&mut self, name: &str) -> StateResult<&mut PulseOp> {
        self.operations
            .get_mut(name)
            .ok_or_else(|| StateError::UnknownOperation {
                element: "resonator".into(),
                operation: name.into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pulses::ReadoutPulse;

    fn resonator() -> ReadoutResonator {
        let mut operations = BTreeMap::new();
        operations.insert(
            "readout".to_string(),
            PulseOp::Readout(ReadoutPulse {
                amplitude: 0.05,
                length_ns: 1000,
                rotation_angle: 0.0,
                threshold: 1e-4,
            }),
        );
        ReadoutResonator {
            output: OutputChannel {
                controller: "con1".into(),
                port: 1,
            },
            input_i: InputChannel {
                controller: "con1".into(),
                port: 1,
                offset: None,
                gain_db: None,
            },
            input_q: InputChannel {
                controller: "con1".into(),
                port: 2,
                offset: None,
                gain_db: None,
            },
            intermediate_frequency_hz: 50e6,
            time_of_flight_ns: 24,
            depletion_time_ns: 4000,
            operations,
        }
    }

    #[test]
    fn test_operation_lookup() {
        let rr = resonator();
        assert!(rr.operation("readout").is_ok());
        let err = rr.operation("missing").unwrap_err();
        assert!(matches!(err, StateError::UnknownOperation { .. }));
    }
}
