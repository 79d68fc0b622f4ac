//! Controller-configuration generation.
//!
//! Every program shipped to the orchestration service travels together with a
//! rendering of the device state: which element sits on which controller
//! channel, its oscillator frequency, and the calibrated operations it can
//! play. The service compiles the program against this record, so it must be
//! regenerated after every tracked override.

use std::collections::BTreeMap;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::elements::{InputChannel, OutputChannel};
use crate::machine::Machine;
use crate::pulses::PulseOp;

/// Sampling rate of the controller DACs, samples per second.
pub const SAMPLE_RATE_HZ: f64 = 1e9;

/// One addressable element of the rendered configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementConfig {
    /// Analog output driving this element.
    pub output: OutputChannel,
    /// Analog inputs for demodulation (readout elements only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<InputChannel>,
    /// Digital oscillator frequency, Hz. Zero for DC flux lines.
    pub intermediate_frequency_hz: f64,
    /// Acquisition delay, ns (readout elements only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_of_flight_ns: Option<u32>,
    /// Calibrated operations playable on this element.
    pub operations: BTreeMap<String, PulseOp>,
}

/// The full configuration shipped alongside a program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Controllers referenced by at least one element.
    pub controllers: Vec<String>,
    /// Elements keyed by id ("q1.xy", "q1.resonator", "pair.coupler").
    pub elements: BTreeMap<String, ElementConfig>,
}

impl ControllerConfig {
    /// Look up an element by id.
    pub fn element(&self, id: &str) -> Option<&ElementConfig> {
        self.elements.get(id)
    }

    /// Total number of samples an operation occupies at the DAC rate.
    pub fn operation_samples(op: &PulseOp) -> usize {
        (op.length_ns() as f64 * SAMPLE_RATE_HZ / 1e9) as usize
    }
}

impl Machine {
    /// Render the current state into the configuration shipped with programs.
    pub fn generate_config(&self) -> ControllerConfig {
        let mut elements = BTreeMap::new();
        let mut controllers: FxHashSet<String> = FxHashSet::default();

        for qubit in self.qubits.values() {
            controllers.insert(qubit.xy.channel.controller.clone());
            elements.insert(
                qubit.xy_element(),
                ElementConfig {
                    output: qubit.xy.channel.clone(),
                    inputs: Vec::new(),
                    intermediate_frequency_hz: qubit.xy.intermediate_frequency_hz,
                    time_of_flight_ns: None,
                    operations: qubit.xy.operations.clone(),
                },
            );

            if let Some(z) = &qubit.z {
                controllers.insert(z.channel.controller.clone());
                elements.insert(
                    qubit.z_element(),
                    ElementConfig {
                        output: z.channel.clone(),
                        inputs: Vec::new(),
                        intermediate_frequency_hz: 0.0,
                        time_of_flight_ns: None,
                        operations: z.operations.clone(),
                    },
                );
            }

            let rr = &qubit.resonator;
            controllers.insert(rr.output.controller.clone());
            elements.insert(
                qubit.resonator_element(),
                ElementConfig {
                    output: rr.output.clone(),
                    inputs: vec![rr.input_i.clone(), rr.input_q.clone()],
                    intermediate_frequency_hz: rr.intermediate_frequency_hz,
                    time_of_flight_ns: Some(rr.time_of_flight_ns),
                    operations: rr.operations.clone(),
                },
            );
        }

        for pair in self.qubit_pairs.values() {
            if let Some(coupler) = &pair.coupler {
                controllers.insert(coupler.channel.controller.clone());
                elements.insert(
                    pair.coupler_element(),
                    ElementConfig {
                        output: coupler.channel.clone(),
                        inputs: Vec::new(),
                        intermediate_frequency_hz: 0.0,
                        time_of_flight_ns: None,
                        operations: coupler.operations.clone(),
                    },
                );
            }
        }

        let mut controllers: Vec<String> = controllers.into_iter().collect();
        controllers.sort();
        ControllerConfig {
            controllers,
            elements,
        }
    }
}
