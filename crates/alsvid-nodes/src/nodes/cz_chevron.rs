//! CZ chevron: two-qubit exchange vs flux amplitude and interaction time.
//!
//! Both qubits are excited, then the control qubit is flux-pulsed toward
//! the |02>/|11> resonance while the coupler plays its calibrated pulse.
//! Sweeping pulse amplitude and duration traces the chevron pattern of the
//! excitation exchange; fitting it yields the coupling strength J2, the
//! resonance detuning, and from those the flux amplitude and gate time of
//! the CZ gate written back into the pair.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;

use alsvid_fit::{Dataset, OscillationDecayExp, RabiChevron, fit_model};
use alsvid_seq::{AmpScale, Instr, Param, Program, StreamDecl, SweepAxis};
use alsvid_state::{CzGate, FluxTarget, Machine, TransmonPair};

use crate::error::{NodeError, NodeResult};
use crate::node::{
    CalibrationNode, FitRecord, NodeAnalysis, flux_prelude, measure_state, reset_instr,
    state_pipeline,
};
use crate::params::NodeParams;

/// Chevron calibration of the CZ gate.
pub struct CzChevron;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct CzChevronExtras {
    max_time_in_ns: u32,
    amp_range: f64,
    amp_step: f64,
}

impl Default for CzChevronExtras {
    fn default() -> Self {
        Self {
            max_time_in_ns: 200,
            amp_range: 0.2,
            amp_step: 0.003,
        }
    }
}

impl CzChevronExtras {
    /// Flux-pulse durations in ns, one per 4 ns clock cycle.
    fn times(&self) -> NodeResult<Vec<f64>> {
        if self.max_time_in_ns % 4 != 0 {
            return Err(NodeError::Parameter(format!(
                "max_time_in_ns must be a multiple of the 4 ns clock, got {}",
                self.max_time_in_ns
            )));
        }
        let values: Vec<f64> = (4..self.max_time_in_ns / 4).map(|c| (c * 4) as f64).collect();
        if values.is_empty() {
            return Err(NodeError::Parameter(
                "max_time_in_ns leaves no flux-pulse durations".into(),
            ));
        }
        Ok(values)
    }

    /// Relative amplitude factors around the estimated resonance.
    fn amps(&self) -> NodeResult<Vec<f64>> {
        let axis = SweepAxis::arange("amp", 1.0 - self.amp_range, 1.0 + self.amp_range, self.amp_step);
        if axis.is_empty() {
            return Err(NodeError::Parameter("empty amplitude sweep".into()));
        }
        Ok(axis.values)
    }
}

/// Control-qubit flux amplitude placing |11> on resonance with |02>.
///
/// The interaction detuning is the control-target frequency difference
/// minus the target anharmonicity; the quadratic flux response converts it
/// to volts.
fn resonance_amplitude(machine: &Machine, pair: &TransmonPair) -> NodeResult<f64> {
    let control = machine.qubit(&pair.qubit_control)?;
    let target = machine.qubit(&pair.qubit_target)?;
    let detuning = control.f_01_hz - target.f_01_hz - target.anharmonicity_hz;
    let ratio = -detuning / control.freq_vs_flux_01_quad_term;
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(NodeError::Parameter(format!(
            "{}: interaction detuning {detuning:.3e} Hz is unreachable with quad term {:.3e}",
            pair.name, control.freq_vs_flux_01_quad_term
        )));
    }
    Ok(ratio.sqrt())
}

/// Round up onto the 4 ns clock with one guard cycle.
fn clock_up(t_ns: u32) -> u32 {
    t_ns - t_ns % 4 + 4
}

impl CalibrationNode for CzChevron {
    fn name(&self) -> &'static str {
        "cz_chevron"
    }

    fn describe(&self) -> &'static str {
        "CZ chevron: coupling J2 and the gate's flux amplitude and length"
    }

    fn targets(&self, machine: &Machine, params: &NodeParams) -> NodeResult<Vec<String>> {
        params.target_pairs(machine)
    }

    fn axes(
        &self,
        _machine: &Machine,
        params: &NodeParams,
    ) -> NodeResult<Vec<(String, Vec<f64>)>> {
        let extras: CzChevronExtras = params.extras()?;
        Ok(vec![
            ("amp".to_string(), extras.amps()?),
            ("time".to_string(), extras.times()?),
        ])
    }

    fn build(&self, machine: &Machine, params: &NodeParams) -> NodeResult<Program> {
        let extras: CzChevronExtras = params.extras()?;
        let times = extras.times()?;
        let amps = extras.amps()?;
        let pairs = params.target_pairs(machine)?;

        let mut program = Program::new("cz_chevron", params.num_averages);
        for (i, name) in pairs.iter().enumerate() {
            let pair = machine.pair(name)?;
            let control = machine.qubit(&pair.qubit_control)?;
            let target = machine.qubit(&pair.qubit_target)?;
            let z = control.z.as_ref().ok_or_else(|| {
                NodeError::Parameter(format!("{} has no flux element", control.name))
            })?;
            let z_const = z.operation("const")?;
            let scale = resonance_amplitude(machine, pair)? / z_const.amplitude();

            let control_stream = format!("state_control_{name}");
            let target_stream = format!("state_target_{name}");
            program.streams.push(StreamDecl::scalar(&control_stream));
            program.streams.push(StreamDecl::scalar(&target_stream));

            let mut body = vec![
                reset_instr(control, params.reset),
                reset_instr(target, params.reset),
                Instr::Align { elements: vec![] },
            ];
            for qubit in [control, target] {
                body.push(Instr::Play {
                    element: qubit.xy_element(),
                    operation: "x180".into(),
                    amp_scale: None,
                    duration_ns: None,
                });
                body.push(Instr::Wait {
                    elements: vec![qubit.xy_element()],
                    duration_ns: Param::value(20.0),
                });
            }
            body.push(Instr::Align { elements: vec![] });
            body.push(Instr::Play {
                element: control.z_element(),
                operation: "const".into(),
                amp_scale: Some(AmpScale::uniform(Param::scaled("amp", scale))),
                duration_ns: Some(Param::axis("time")),
            });
            if let Some(coupler) = &pair.coupler {
                if coupler.operations.contains_key("const") {
                    body.push(Instr::Play {
                        element: pair.coupler_element(),
                        operation: "const".into(),
                        amp_scale: None,
                        duration_ns: Some(Param::axis("time")),
                    });
                }
            }
            // Park the drives until the longest flux pulse has passed.
            body.push(Instr::Wait {
                elements: vec![control.xy_element(), target.xy_element()],
                duration_ns: Param::value((extras.max_time_in_ns + 40) as f64),
            });
            body.push(Instr::Align { elements: vec![] });
            body.push(measure_state(control, &control_stream));
            body.push(measure_state(target, &target_stream));

            let mut block = flux_prelude(machine, params.flux_point, FluxTarget::Pair(name))?;
            block.push(Instr::Sweep {
                axis: SweepAxis::list("amp", amps.clone()),
                body: vec![Instr::Sweep {
                    axis: SweepAxis::list("time", times.clone()),
                    body,
                }],
            });
            if !params.multiplexed {
                block.push(Instr::Align { elements: vec![] });
            }
            program.body.extend(block);

            program.pipelines.push(state_pipeline(
                &control_stream,
                &[times.len(), amps.len()],
                format!("state_control{}", i + 1),
            ));
            program.pipelines.push(state_pipeline(
                &target_stream,
                &[times.len(), amps.len()],
                format!("state_target{}", i + 1),
            ));
        }
        Ok(program)
    }

    fn analyze(
        &self,
        ds: &Dataset,
        machine: &Machine,
        _params: &NodeParams,
    ) -> NodeResult<NodeAnalysis> {
        let amps = ds.coord_values("amp")?.to_vec();
        let times = ds.coord_values("time")?.to_vec();
        let labels = match ds.coord("qubit")? {
            alsvid_fit::Coord::Labels(l) => l.clone(),
            _ => return Err(NodeError::Analysis("pair axis has no labels".into())),
        };

        let mut analysis = NodeAnalysis::default();
        for label in &labels {
            let pair = machine.pair(label)?;
            let control = machine.qubit(&pair.qubit_control)?;
            let quad = control.freq_vs_flux_01_quad_term;
            let base = resonance_amplitude(machine, pair)?;
            let per_pair = ds.sel_qubit(label)?;
            let target_var = per_pair.var("state_target")?;

            // Coarse pass: the amplitude row with the strongest exchange.
            let resonance_row = (0..amps.len())
                .max_by(|&a, &b| {
                    let contrast = |row: usize| {
                        let lane: Vec<f64> =
                            (0..times.len()).map(|t| target_var[[row, t]]).collect();
                        let min = lane.iter().cloned().fold(f64::INFINITY, f64::min);
                        let max = lane.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                        max - min
                    };
                    contrast(a).total_cmp(&contrast(b))
                })
                .ok_or_else(|| NodeError::Analysis("empty amplitude axis".into()))?;
            let xs_time: Vec<Vec<f64>> = times.iter().map(|&t| vec![t]).collect();
            let lane: Vec<f64> = (0..times.len())
                .map(|t| target_var[[resonance_row, t]])
                .collect();
            let coarse = match fit_model(&OscillationDecayExp, &xs_time, &lane) {
                Ok(fit) if fit.params[1].abs() > f64::EPSILON => fit,
                _ => {
                    analysis.insert(label.clone(), FitRecord::failed("no exchange oscillation"));
                    continue;
                }
            };
            // sin^2 doubles the oscillation rate: the exchange period is
            // twice the fitted one.
            let exchange_period_ns = 2.0 / coarse.params[1].abs();
            let coarse_amp_v = amps[resonance_row] * base;
            let coarse_det_hz = -coarse_amp_v.powi(2) * quad;

            // Full chevron fit over the (detuning, time) surface.
            let mut xs = Vec::with_capacity(amps.len() * times.len());
            let mut y = Vec::with_capacity(amps.len() * times.len());
            for (ai, &a) in amps.iter().enumerate() {
                let det = -(a * base).powi(2) * quad;
                for (ti, &t) in times.iter().enumerate() {
                    xs.push(vec![det, t * 1e-9]);
                    y.push(target_var[[ai, ti]]);
                }
            }
            let model = RabiChevron {
                init_time_s: exchange_period_ns * 1e-9,
                init_detuning_hz: coarse_det_hz,
            };
            let (j2_hz, det_hz, amp_v, len_ns) = match fit_model(&model, &xs, &y) {
                Ok(fit) if fit.params[0].abs() > 0.0 && -fit.params[1] / quad > 0.0 => {
                    let j = fit.params[0].abs();
                    let det = fit.params[1];
                    let amp = (-det / quad).sqrt();
                    // One exchange period plus a guard before clock rounding.
                    let len = clock_up((1.0 / (2.0 * j) * 1e9) as u32 + 9);
                    (j, det, amp, len)
                }
                other => {
                    if let Err(e) = other {
                        debug!(pair = %label, error = %e, "chevron fit failed, keeping coarse values");
                    }
                    let j = 1e9 / exchange_period_ns / 2.0;
                    let len = clock_up(exchange_period_ns as u32);
                    (j, coarse_det_hz, coarse_amp_v, len)
                }
            };

            let mut values = BTreeMap::new();
            values.insert("j2_hz".to_string(), j2_hz);
            values.insert("detuning_hz".to_string(), det_hz);
            values.insert("flux_amplitude_v".to_string(), amp_v);
            values.insert("gate_length_ns".to_string(), len_ns as f64);
            analysis.insert(label.clone(), FitRecord::successful(values));
        }
        Ok(analysis)
    }

    fn apply(&self, machine: &mut Machine, analysis: &NodeAnalysis) -> NodeResult<()> {
        for (name, record) in &analysis.fit_results {
            if !record.outcome.is_successful() {
                continue;
            }
            let (Some(amp), Some(len), Some(j2)) = (
                record.value("flux_amplitude_v"),
                record.value("gate_length_ns"),
                record.value("j2_hz"),
            ) else {
                continue;
            };
            let pair = machine.pair_mut(name)?;
            // Phase corrections are calibrated elsewhere; keep them.
            let (correction_control, correction_target) = pair
                .cz
                .as_ref()
                .map(|cz| (cz.phase_correction_control, cz.phase_correction_target))
                .unwrap_or((0.0, 0.0));
            pair.cz = Some(CzGate {
                flux_amplitude: amp,
                length_ns: len as u32,
                phase_correction_control: correction_control,
                phase_correction_target: correction_target,
                coupling_j2_hz: j2,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_machine_with_pair;
    use alsvid_fit::rabi_chevron;
    use ndarray::ArrayD;
    use std::collections::BTreeMap as Map;

    fn params() -> NodeParams {
        let mut p = NodeParams::default();
        p.set_extra("max_time_in_ns", serde_json::json!(200));
        p.set_extra("amp_range", serde_json::json!(0.2));
        p.set_extra("amp_step", serde_json::json!(0.05));
        p
    }

    #[test]
    fn test_build_validates() {
        let machine = test_machine_with_pair();
        let program = CzChevron.build(&machine, &params()).unwrap();
        program.validate().unwrap();
        let axes = program.sweep_axes();
        assert_eq!(axes[0].name, "amp");
        assert_eq!(axes[1].name, "time");
        // Control and target pipelines for the single pair.
        assert_eq!(program.pipelines.len(), 2);
    }

    #[test]
    fn test_rejects_off_clock_max_time() {
        let machine = test_machine_with_pair();
        let mut p = params();
        p.set_extra("max_time_in_ns", serde_json::json!(190));
        assert!(matches!(
            CzChevron.build(&machine, &p),
            Err(NodeError::Parameter(_))
        ));
    }

    #[test]
    fn test_analyze_recovers_coupling() {
        let machine = test_machine_with_pair();
        let p = params();
        let axes = CzChevron.axes(&machine, &p).unwrap();
        let amps = axes[0].1.clone();
        let times = axes[1].1.clone();

        let pair = machine.pair("q1_q2").unwrap();
        let control = machine.qubit("q1").unwrap();
        let quad = control.freq_vs_flux_01_quad_term;
        let base = resonance_amplitude(&machine, pair).unwrap();
        let f0 = -base.powi(2) * quad;
        let j = 10e6;

        let mut data_control = Vec::new();
        let mut data_target = Vec::new();
        for &a in &amps {
            let det = -(a * base).powi(2) * quad;
            for &t in &times {
                let y = rabi_chevron(det, t * 1e-9, j, f0, -1.0, 1.0, 1e-8);
                data_target.push(y);
                data_control.push(1.0 - y);
            }
        }
        let shape = vec![amps.len(), times.len()];
        let mut results: Map<String, ArrayD<f64>> = Map::new();
        results.insert(
            "state_control1".to_string(),
            ArrayD::from_shape_vec(shape.clone(), data_control).unwrap(),
        );
        results.insert(
            "state_target1".to_string(),
            ArrayD::from_shape_vec(shape, data_target).unwrap(),
        );
        let ds = Dataset::assemble(&results, &["q1_q2".into()], &axes).unwrap();

        let analysis = CzChevron.analyze(&ds, &machine, &p).unwrap();
        let record = analysis.record("q1_q2").unwrap();
        assert!(record.outcome.is_successful());
        let j2 = record.value("j2_hz").unwrap();
        assert!((j2 - j).abs() / j < 0.05, "j2 = {j2}");
        let len = record.value("gate_length_ns").unwrap();
        // One exchange period is 50 ns; guarded and clock-rounded to 60.
        assert_eq!(len as u32, 60);
        let amp = record.value("flux_amplitude_v").unwrap();
        assert!((amp - base).abs() / base < 0.05, "amp = {amp}");
    }

    #[test]
    fn test_apply_writes_cz_gate() {
        let mut machine = test_machine_with_pair();
        let mut values = Map::new();
        values.insert("j2_hz".to_string(), 9.5e6);
        values.insert("detuning_hz".to_string(), 198e6);
        values.insert("flux_amplitude_v".to_string(), 0.31);
        values.insert("gate_length_ns".to_string(), 60.0);
        let mut analysis = NodeAnalysis::default();
        analysis.insert("q1_q2", FitRecord::successful(values));

        CzChevron.apply(&mut machine, &analysis).unwrap();
        let cz = machine.pair("q1_q2").unwrap().cz.as_ref().unwrap();
        assert_eq!(cz.length_ns, 60);
        assert!((cz.flux_amplitude - 0.31).abs() < 1e-12);
        assert!((cz.coupling_j2_hz - 9.5e6).abs() < 1.0);
    }

    #[test]
    fn test_clock_up() {
        assert_eq!(clock_up(59), 60);
        assert_eq!(clock_up(60), 64);
        assert_eq!(clock_up(50), 52);
    }
}
