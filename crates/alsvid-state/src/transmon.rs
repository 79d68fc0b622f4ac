//! Transmon and transmon-pair records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::elements::{FluxElement, OutputChannel, ReadoutResonator, XyDrive};
use crate::pulses::PulseOp;

/// A single flux-tunable transmon with its drive, flux and readout elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transmon {
    /// Qubit name, matching its key in the machine map.
    pub name: String,
    /// Microwave drive element.
    pub xy: XyDrive,
    /// Flux-bias element. Fixed-frequency qubits have none.
    #[serde(default)]
    pub z: Option<FluxElement>,
    /// Readout resonator element.
    pub resonator: ReadoutResonator,
    /// 0-1 transition frequency, Hz.
    pub f_01_hz: f64,
    /// Anharmonicity, Hz (negative).
    pub anharmonicity_hz: f64,
    /// Quadratic coefficient of the frequency-vs-flux curve, Hz/V^2.
    #[serde(default)]
    pub freq_vs_flux_01_quad_term: f64,
    /// Passive reset wait time, nanoseconds.
    pub thermalization_time_ns: u32,
    /// Relaxation time, microseconds.
    #[serde(default)]
    pub t1_us: Option<f64>,
    /// Ramsey dephasing time, microseconds.
    #[serde(default)]
    pub t2ramsey_us: Option<f64>,
    /// Hahn-echo dephasing time, microseconds.
    #[serde(default)]
    pub t2echo_us: Option<f64>,
    /// Position in the chip layout, "column,row".
    #[serde(default)]
    pub grid_location: String,
}

impl Transmon {
    /// Element id of the drive line.
    pub fn xy_element(&self) -> String {
        format!("{}.xy", self.name)
    }

    /// Element id of the flux line.
    pub fn z_element(&self) -> String {
        format!("{}.z", self.name)
    }

    /// Element id of the readout resonator.
    pub fn resonator_element(&self) -> String {
        format!("{}.resonator", self.name)
    }
}

/// A pair of coupled transmons with an optional tunable coupler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmonPair {
    /// Pair name, matching its key in the machine map.
    pub name: String,
    /// Name of the control qubit.
    pub qubit_control: String,
    /// Name of the target qubit.
    pub qubit_target: String,
    /// Tunable coupler between the two qubits, if wired.
    #[serde(default)]
    pub coupler: Option<Coupler>,
    /// Control-qubit flux bias at the pair's mutual operating point, volts.
    #[serde(default)]
    pub mutual_flux_bias: f64,
    /// Calibrated CZ gate, once the chevron node has run.
    #[serde(default)]
    pub cz: Option<CzGate>,
}

impl TransmonPair {
    /// Element id of the coupler flux line.
    pub fn coupler_element(&self) -> String {
        format!("{}.coupler", self.name)
    }
}

/// Tunable coupler flux element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coupler {
    pub channel: OutputChannel,
    /// Bias that switches the effective coupling off, volts.
    pub decouple_offset: f64,
    /// Flux pulse operations ("const").
    #[serde(default)]
    pub operations: BTreeMap<String, PulseOp>,
}

/// Calibrated controlled-Z gate parameters for a pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CzGate {
    /// Coupler flux pulse amplitude, volts.
    pub flux_amplitude: f64,
    /// Gate length, nanoseconds.
    pub length_ns: u32,
    /// Single-qubit phase correction on the control, radians.
    #[serde(default)]
    pub phase_correction_control: f64,
    /// Single-qubit phase correction on the target, radians.
    #[serde(default)]
    pub phase_correction_target: f64,
    /// Extracted two-photon coupling strength, Hz.
    #[serde(default)]
    pub coupling_j2_hz: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_ids() {
        let pair = TransmonPair {
            name: "coupler_q1_q2".into(),
            qubit_control: "q1".into(),
            qubit_target: "q2".into(),
            coupler: None,
            mutual_flux_bias: 0.0,
            cz: None,
        };
        assert_eq!(pair.coupler_element(), "coupler_q1_q2.coupler");
    }
}
