//! Time of flight and analog input offsets.
//!
//! Raw ADC capture of the readout pulse: the rising edge of the averaged
//! trace envelope gives the acquisition delay (propagation plus processing,
//! rounded to the 4 ns clock), and the trace means give the residual DC
//! offsets of the analog inputs. Readout parameters are overridden for the
//! duration of the run so the capture uses a known pulse.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;

use alsvid_fit::{Dataset, rising_edge_delay_ns};
use alsvid_seq::{Instr, Param, Pipeline, Program, StreamDecl, StreamOp};
use alsvid_state::Machine;

use crate::error::{NodeError, NodeResult};
use crate::node::{CalibrationNode, FitRecord, NodeAnalysis};
use crate::params::NodeParams;

/// Smoothing window of the edge detector, samples.
const SMOOTHING_WINDOW: usize = 11;

/// Raw-ADC time-of-flight calibration.
pub struct TimeOfFlight;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct TofExtras {
    time_of_flight_in_ns: u32,
    intermediate_frequency_in_mhz: f64,
    readout_amplitude_in_v: f64,
    readout_length_in_ns: Option<u32>,
}

impl Default for TofExtras {
    fn default() -> Self {
        Self {
            time_of_flight_in_ns: 24,
            intermediate_frequency_in_mhz: 50.0,
            readout_amplitude_in_v: 0.1,
            readout_length_in_ns: None,
        }
    }
}

impl TofExtras {
    /// The common capture window: the explicit override, or the longest
    /// stored readout among the targets.
    fn window_ns(&self, machine: &Machine, params: &NodeParams) -> NodeResult<u32> {
        if let Some(len) = self.readout_length_in_ns {
            return Ok(len);
        }
        let qubits = machine.select_qubits(params.qubits.as_deref())?;
        qubits
            .iter()
            .map(|q| q.resonator.operation("readout").map(|op| op.length_ns()))
            .try_fold(0u32, |acc, len| Ok(acc.max(len?)))
    }
}

impl CalibrationNode for TimeOfFlight {
    fn name(&self) -> &'static str {
        "time_of_flight"
    }

    fn describe(&self) -> &'static str {
        "Raw ADC capture: acquisition delay and analog input offsets"
    }

    fn targets(&self, machine: &Machine, params: &NodeParams) -> NodeResult<Vec<String>> {
        params.target_qubits(machine)
    }

    fn prepare(&self, machine: &mut Machine, params: &NodeParams) -> NodeResult<()> {
        let extras: TofExtras = params.extras()?;
        let window = extras.window_ns(machine, params)?;
        let names = params.target_qubits(machine)?;
        for name in names {
            let qubit = machine.qubit_mut(&name)?;
            let rr = &mut qubit.resonator;
            rr.time_of_flight_ns = extras.time_of_flight_in_ns;
            rr.intermediate_frequency_hz = extras.intermediate_frequency_in_mhz * 1e6;
            if let Some(readout) = rr.operation_mut("readout")?.as_readout_mut() {
                readout.amplitude = extras.readout_amplitude_in_v;
                readout.length_ns = window;
            }
        }
        Ok(())
    }

    fn axes(
        &self,
        machine: &Machine,
        params: &NodeParams,
    ) -> NodeResult<Vec<(String, Vec<f64>)>> {
        let extras: TofExtras = params.extras()?;
        let window = extras.window_ns(machine, params)?;
        Ok(vec![(
            "time".to_string(),
            (0..window).map(|t| t as f64).collect(),
        )])
    }

    fn build(&self, machine: &Machine, params: &NodeParams) -> NodeResult<Program> {
        let qubits = machine.select_qubits(params.qubits.as_deref())?;

        let mut program = Program::new("time_of_flight", params.num_averages);
        for (i, qubit) in qubits.iter().enumerate() {
            let stream = format!("adc_{}", qubit.name);
            program.streams.push(StreamDecl::adc(&stream));
            let rr = qubit.resonator_element();

            program.body.push(Instr::ResetPhase {
                element: rr.clone(),
            });
            program.body.push(Instr::MeasureRaw {
                element: rr.clone(),
                operation: "readout".into(),
                stream: stream.clone(),
            });
            program.body.push(Instr::Wait {
                elements: vec![rr],
                duration_ns: Param::value(qubit.resonator.depletion_time_ns as f64),
            });
            if !params.multiplexed {
                program.body.push(Instr::Align { elements: vec![] });
            }

            // Averaged traces for the fit, one unaveraged capture on top.
            program.pipelines.push(Pipeline::new(
                &stream,
                vec![StreamOp::Input1, StreamOp::Average],
                format!("adcI{}", i + 1),
            ));
            program.pipelines.push(Pipeline::new(
                &stream,
                vec![StreamOp::Input2, StreamOp::Average],
                format!("adcQ{}", i + 1),
            ));
            program.pipelines.push(Pipeline::new(
                &stream,
                vec![StreamOp::Input1, StreamOp::SaveLast],
                format!("adc_single_runI{}", i + 1),
            ));
            program.pipelines.push(Pipeline::new(
                &stream,
                vec![StreamOp::Input2, StreamOp::SaveLast],
                format!("adc_single_runQ{}", i + 1),
            ));
        }
        Ok(program)
    }

    fn analyze(
        &self,
        ds: &Dataset,
        _machine: &Machine,
        params: &NodeParams,
    ) -> NodeResult<NodeAnalysis> {
        let extras: TofExtras = params.extras()?;
        let labels = match ds.coord("qubit")? {
            alsvid_fit::Coord::Labels(l) => l.clone(),
            _ => return Err(NodeError::Analysis("qubit axis has no labels".into())),
        };

        let mut analysis = NodeAnalysis::default();
        for label in &labels {
            let per_qubit = ds.sel_qubit(label)?;
            let i_trace = per_qubit.values_1d("adcI")?;
            let q_trace = per_qubit.values_1d("adcQ")?;

            let offset_i = i_trace.iter().sum::<f64>() / i_trace.len().max(1) as f64;
            let offset_q = q_trace.iter().sum::<f64>() / q_trace.len().max(1) as f64;
            let envelope: Vec<f64> = i_trace
                .iter()
                .zip(&q_trace)
                .map(|(&i, &q)| ((i - offset_i).powi(2) + (q - offset_q).powi(2)).sqrt())
                .collect();

            let Some(delay) = rising_edge_delay_ns(&envelope, SMOOTHING_WINDOW) else {
                analysis.insert(label.clone(), FitRecord::failed("no pulse edge in trace"));
                continue;
            };
            debug!(qubit = %label, delay, "detected rising edge");

            let mut values = BTreeMap::new();
            values.insert("delay_to_add_ns".to_string(), delay as f64);
            values.insert(
                "time_of_flight_ns".to_string(),
                (extras.time_of_flight_in_ns + delay) as f64,
            );
            values.insert("offset_i_v".to_string(), offset_i);
            values.insert("offset_q_v".to_string(), offset_q);
            analysis.insert(label.clone(), FitRecord::successful(values));
        }
        Ok(analysis)
    }

    fn apply(&self, machine: &mut Machine, analysis: &NodeAnalysis) -> NodeResult<()> {
        // Input offsets are per controller: average the per-qubit estimates
        // of every controller before adding them once.
        let mut per_controller: BTreeMap<String, Vec<(f64, f64)>> = BTreeMap::new();
        for (name, record) in &analysis.fit_results {
            if !record.outcome.is_successful() {
                continue;
            }
            if let Some(tof) = record.value("time_of_flight_ns") {
                let qubit = machine.qubit_mut(name)?;
                qubit.resonator.time_of_flight_ns = tof as u32;
            }
            let qubit = machine.qubit(name)?;
            if let (Some(i), Some(q)) = (record.value("offset_i_v"), record.value("offset_q_v")) {
                per_controller
                    .entry(qubit.resonator.input_i.controller.clone())
                    .or_default()
                    .push((i, q));
            }
        }

        let means: BTreeMap<String, (f64, f64)> = per_controller
            .into_iter()
            .map(|(controller, offsets)| {
                let n = offsets.len() as f64;
                let (si, sq) = offsets
                    .iter()
                    .fold((0.0, 0.0), |(a, b), (i, q)| (a + i, b + q));
                (controller, (si / n, sq / n))
            })
            .collect();

        for qubit in machine.qubits.values_mut() {
            if let Some((mean_i, mean_q)) = means.get(&qubit.resonator.input_i.controller) {
                let input_i = &mut qubit.resonator.input_i;
                input_i.offset = Some(input_i.offset.unwrap_or(0.0) + mean_i);
                let input_q = &mut qubit.resonator.input_q;
                input_q.offset = Some(input_q.offset.unwrap_or(0.0) + mean_q);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_machine;
    use ndarray::ArrayD;
    use std::collections::BTreeMap as Map;

    #[test]
    fn test_prepare_overrides_readout() {
        let mut machine = test_machine();
        let mut p = NodeParams::default();
        p.set_extra("readout_length_in_ns", serde_json::json!(600));
        TimeOfFlight.prepare(&mut machine, &p).unwrap();
        let rr = &machine.qubit("q1").unwrap().resonator;
        assert_eq!(rr.time_of_flight_ns, 24);
        assert!((rr.intermediate_frequency_hz - 50e6).abs() < 1e-6);
        let readout = rr.operation("readout").unwrap().as_readout().unwrap();
        assert_eq!(readout.length_ns, 600);
        assert!((readout.amplitude - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_build_declares_adc_pipelines() {
        let machine = test_machine();
        let program = TimeOfFlight.build(&machine, &NodeParams::default()).unwrap();
        program.validate().unwrap();
        // Four pipelines per qubit.
        assert_eq!(program.pipelines.len(), 8);
        assert!(program.pipelines.iter().any(|p| p.save_as == "adcQ2"));
    }

    #[test]
    fn test_analyze_finds_edge_and_offsets() {
        let machine = test_machine();
        let p = NodeParams::default();
        let axes = TimeOfFlight.axes(&machine, &p).unwrap();
        let window = axes[0].1.len();

        let mut results: Map<String, ArrayD<f64>> = Map::new();
        for i in 0..2 {
            // Flat offset before the edge at 200 ns, oscillation after.
            let edge = 200;
            let make = |phase: f64, dc: f64| -> ArrayD<f64> {
                let data: Vec<f64> = (0..window)
                    .map(|t| {
                        if t < edge {
                            dc
                        } else {
                            dc + 0.1 * ((t as f64) * 0.3 + phase).sin()
                        }
                    })
                    .collect();
                ArrayD::from_shape_vec(vec![window], data).unwrap()
            };
            results.insert(format!("adcI{}", i + 1), make(0.0, 0.002));
            results.insert(format!("adcQ{}", i + 1), make(1.0, -0.001));
            results.insert(format!("adc_single_runI{}", i + 1), make(0.0, 0.002));
            results.insert(format!("adc_single_runQ{}", i + 1), make(1.0, -0.001));
        }
        let ds = Dataset::assemble(&results, &["q1".into(), "q2".into()], &axes).unwrap();

        let analysis = TimeOfFlight.analyze(&ds, &machine, &p).unwrap();
        let record = analysis.record("q1").unwrap();
        assert!(record.outcome.is_successful());
        let delay = record.value("delay_to_add_ns").unwrap();
        assert_eq!(delay as u32 % 4, 0);
        assert!((150.0..=250.0).contains(&delay), "delay = {delay}");
        assert!((record.value("offset_i_v").unwrap() - 0.002).abs() < 5e-3);
    }

    #[test]
    fn test_apply_updates_tof_and_offsets() {
        let mut machine = test_machine();
        let mut analysis = NodeAnalysis::default();
        for name in ["q1", "q2"] {
            let mut values = Map::new();
            values.insert("time_of_flight_ns".to_string(), 36.0);
            values.insert("offset_i_v".to_string(), 0.004);
            values.insert("offset_q_v".to_string(), -0.002);
            analysis.insert(name, FitRecord::successful(values));
        }
        TimeOfFlight.apply(&mut machine, &analysis).unwrap();
        let rr = &machine.qubit("q1").unwrap().resonator;
        assert_eq!(rr.time_of_flight_ns, 36);
        assert!((rr.input_i.offset.unwrap() - 0.004).abs() < 1e-12);
        assert!((rr.input_q.offset.unwrap() + 0.002).abs() < 1e-12);
    }
}
