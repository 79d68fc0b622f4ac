//! Virtual-Z Ramsey.
//!
//! `x90 – idle – frame-rotated x90` with the second pulse dephased by
//! `±detuning * idle_time`, so the drive frequency never moves. Sweeping
//! both detuning signs separates the programmed detuning from the real
//! qubit offset: the fitted oscillation frequencies are
//! `f(±) = detuning ± offset`, giving the frequency correction as half
//! their difference. The decay envelope gives T2*.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use serde::Deserialize;

use alsvid_fit::{Dataset, OscillationDecayExp, fit_along};
use alsvid_seq::{Instr, Param, Program, StreamDecl, SweepAxis};
use alsvid_state::{FluxTarget, Machine};

use crate::error::{NodeError, NodeResult};
use crate::node::{
    CalibrationNode, FitRecord, NodeAnalysis, align_qubit, flux_prelude, measure_state,
    reset_instr, state_pipeline,
};
use crate::params::NodeParams;

/// Ramsey interferometry with virtual-Z detuning.
pub struct Ramsey;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct RamseyExtras {
    frequency_detuning_in_mhz: f64,
    min_wait_time_in_ns: f64,
    max_wait_time_in_ns: f64,
    wait_time_step_in_ns: f64,
}

impl Default for RamseyExtras {
    fn default() -> Self {
        Self {
            frequency_detuning_in_mhz: 1.0,
            min_wait_time_in_ns: 16.0,
            max_wait_time_in_ns: 20_000.0,
            wait_time_step_in_ns: 200.0,
        }
    }
}

impl RamseyExtras {
    fn idle_times(&self, params: &NodeParams) -> NodeResult<Vec<f64>> {
        let axis = SweepAxis::arange(
            "idle_time",
            self.min_wait_time_in_ns,
            self.max_wait_time_in_ns,
            self.wait_time_step_in_ns,
        );
        params.require_clock_aligned("idle times", &axis.values)?;
        Ok(axis.values)
    }
}

impl CalibrationNode for Ramsey {
    fn name(&self) -> &'static str {
        "ramsey"
    }

    fn describe(&self) -> &'static str {
        "Virtual-Z Ramsey: qubit frequency correction and T2*"
    }

    fn targets(&self, machine: &Machine, params: &NodeParams) -> NodeResult<Vec<String>> {
        params.target_qubits(machine)
    }

    fn axes(
        &self,
        _machine: &Machine,
        params: &NodeParams,
    ) -> NodeResult<Vec<(String, Vec<f64>)>> {
        let extras: RamseyExtras = params.extras()?;
        Ok(vec![
            ("sign".to_string(), vec![-1.0, 1.0]),
            ("idle_time".to_string(), extras.idle_times(params)?),
        ])
    }

    fn build(&self, machine: &Machine, params: &NodeParams) -> NodeResult<Program> {
        let extras: RamseyExtras = params.extras()?;
        let idle_times = extras.idle_times(params)?;
        let detuning_hz = extras.frequency_detuning_in_mhz * 1e6;
        let qubits = machine.select_qubits(params.qubits.as_deref())?;

        let mut program = Program::new("ramsey", params.num_averages);
        for (i, qubit) in qubits.iter().enumerate() {
            let stream = format!("state_{}", qubit.name);
            program.streams.push(StreamDecl::scalar(&stream));

            let xy = qubit.xy_element();
            let body = vec![
                reset_instr(qubit, params.reset),
                align_qubit(qubit),
                Instr::Play {
                    element: xy.clone(),
                    operation: "x90".into(),
                    amp_scale: None,
                    duration_ns: None,
                },
                Instr::Wait {
                    elements: vec![xy.clone()],
                    duration_ns: Param::axis("idle_time"),
                },
                // The accumulated virtual detuning phase.
                Instr::FrameRotation {
                    element: xy.clone(),
                    angle: Param::Product {
                        axes: vec!["sign".into(), "idle_time".into()],
                        factor: 2.0 * PI * detuning_hz * 1e-9,
                    },
                },
                Instr::Play {
                    element: xy.clone(),
                    operation: "x90".into(),
                    amp_scale: None,
                    duration_ns: None,
                },
                align_qubit(qubit),
                measure_state(qubit, &stream),
                Instr::ResetPhase { element: xy },
            ];

            let mut block = flux_prelude(machine, params.flux_point, FluxTarget::Qubit(&qubit.name))?;
            block.push(Instr::Sweep {
                axis: SweepAxis::list("sign", vec![-1.0, 1.0]),
                body: vec![Instr::Sweep {
                    axis: SweepAxis::list("idle_time", idle_times.clone()),
                    body,
                }],
            });
            if !params.multiplexed {
                block.push(Instr::Align { elements: vec![] });
            }
            program.body.extend(block);

            program.pipelines.push(state_pipeline(
                &stream,
                &[idle_times.len(), 2],
                format!("state{}", i + 1),
            ));
        }
        Ok(program)
    }

    fn analyze(
        &self,
        ds: &Dataset,
        _machine: &Machine,
        _params: &NodeParams,
    ) -> NodeResult<NodeAnalysis> {
        // One oscillation fit per (qubit, sign).
        let fitted = fit_along(ds, "state", "idle_time", &OscillationDecayExp)?;
        let freq = fitted.var("f")?;
        let decay = fitted.var("decay")?;

        let labels = match ds.coord("qubit")? {
            alsvid_fit::Coord::Labels(l) => l.clone(),
            _ => return Err(NodeError::Analysis("qubit axis has no labels".into())),
        };

        let mut analysis = NodeAnalysis::default();
        for (i, label) in labels.iter().enumerate() {
            let f_minus = freq[[i, 0]].abs();
            let f_plus = freq[[i, 1]].abs();
            let decays = [decay[[i, 0]], decay[[i, 1]]];
            if !f_minus.is_finite() || !f_plus.is_finite() || decays.iter().any(|d| !d.is_finite())
            {
                analysis.insert(label.clone(), FitRecord::failed("oscillation fit diverged"));
                continue;
            }
            // f in 1/ns; the sign difference isolates the qubit offset.
            let freq_offset_hz = (f_plus - f_minus) / 2.0 * 1e9;
            let mean_decay = (decays[0] + decays[1]) / 2.0;
            if mean_decay >= 0.0 {
                analysis.insert(label.clone(), FitRecord::failed("non-decaying envelope"));
                continue;
            }
            let t2_us = -1.0 / mean_decay / 1000.0;

            let mut values = BTreeMap::new();
            values.insert("freq_offset_hz".to_string(), freq_offset_hz);
            values.insert("t2_ramsey_us".to_string(), t2_us);
            analysis.insert(label.clone(), FitRecord::successful(values));
        }
        Ok(analysis)
    }

    fn apply(&self, machine: &mut Machine, analysis: &NodeAnalysis) -> NodeResult<()> {
        for (name, record) in &analysis.fit_results {
            if !record.outcome.is_successful() {
                continue;
            }
            let qubit = machine.qubit_mut(name)?;
            if let Some(offset) = record.value("freq_offset_hz") {
                qubit.f_01_hz += offset;
                qubit.xy.intermediate_frequency_hz += offset;
            }
            if let Some(t2) = record.value("t2_ramsey_us") {
                qubit.t2ramsey_us = Some(t2);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_machine;
    use alsvid_fit::oscillation_decay_exp;
    use ndarray::ArrayD;
    use std::collections::BTreeMap as Map;

    fn params() -> NodeParams {
        let mut p = NodeParams::default();
        p.set_extra("max_wait_time_in_ns", serde_json::json!(2000.0));
        p.set_extra("wait_time_step_in_ns", serde_json::json!(16.0));
        p
    }

    #[test]
    fn test_build_validates() {
        let machine = test_machine();
        let program = Ramsey.build(&machine, &params()).unwrap();
        program.validate().unwrap();
        // Two qubits, one pipeline each.
        assert_eq!(program.pipelines.len(), 2);
        assert_eq!(program.sweep_axes().len(), 2);
    }

    #[test]
    fn test_rejects_misaligned_idle_times() {
        let machine = test_machine();
        let mut p = params();
        p.set_extra("wait_time_step_in_ns", serde_json::json!(10.0));
        assert!(matches!(
            Ramsey.build(&machine, &p),
            Err(NodeError::Parameter(_))
        ));
    }

    #[test]
    fn test_analyze_recovers_frequency_offset() {
        let machine = test_machine();
        let p = params();
        let axes = Ramsey.axes(&machine, &p).unwrap();
        let times = axes[1].1.clone();

        // Programmed detuning 1 MHz, real offset +50 kHz.
        let detuning: f64 = 1e6 * 1e-9;
        let offset: f64 = 5e4 * 1e-9;
        let mut results: Map<String, ArrayD<f64>> = Map::new();
        for (i, _) in ["q1", "q2"].iter().enumerate() {
            let mut data = Vec::new();
            for sign in [-1.0, 1.0] {
                let f = (sign * detuning + offset).abs();
                for &t in &times {
                    data.push(oscillation_decay_exp(t, 0.4, f, 0.0, 0.5, -1e-4));
                }
            }
            results.insert(
                format!("state{}", i + 1),
                ArrayD::from_shape_vec(vec![2, times.len()], data).unwrap(),
            );
        }
        let ds = Dataset::assemble(&results, &["q1".into(), "q2".into()], &axes).unwrap();

        let analysis = Ramsey.analyze(&ds, &machine, &p).unwrap();
        let record = analysis.record("q1").unwrap();
        assert!(record.outcome.is_successful());
        let found = record.value("freq_offset_hz").unwrap();
        assert!((found - 5e4).abs() < 2e3, "offset = {found}");
        let t2 = record.value("t2_ramsey_us").unwrap();
        assert!((t2 - 10.0).abs() < 0.5, "t2 = {t2}");
    }

    #[test]
    fn test_apply_updates_frequency() {
        let mut machine = test_machine();
        let f_before = machine.qubit("q1").unwrap().f_01_hz;

        let mut analysis = NodeAnalysis::default();
        let mut values = Map::new();
        values.insert("freq_offset_hz".to_string(), 5e4);
        values.insert("t2_ramsey_us".to_string(), 12.0);
        analysis.insert("q1", FitRecord::successful(values));
        analysis.insert("q2", FitRecord::failed("diverged"));

        Ramsey.apply(&mut machine, &analysis).unwrap();
        let q1 = machine.qubit("q1").unwrap();
        assert!((q1.f_01_hz - f_before - 5e4).abs() < 1e-9);
        assert_eq!(q1.t2ramsey_us, Some(12.0));
        // Failed fits leave the state untouched.
        assert!(machine.qubit("q2").unwrap().t2ramsey_us.is_none());
    }
}
