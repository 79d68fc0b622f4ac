//! DRAG coefficient calibration (pulse-pair method).
//!
//! Two complementary sequences — `x180*amp(1,0,0,a) . y90*amp(a,0,0,1)` and
//! `y180*amp(a,0,0,1) . x90*amp(1,0,0,a)` — land the qubit in the same state
//! only at the correct DRAG coefficient. Sweeping the quadrature scaling
//! factor and intersecting the two linear responses yields the coefficient
//! directly. The stored coefficient is pinned to -1 for the run so the
//! swept factor maps onto absolute alpha.

use std::collections::BTreeMap;

use serde::Deserialize;

use alsvid_fit::{Dataset, line_intersection, polyfit};
use alsvid_seq::{AmpScale, Instr, Param, Program, StreamDecl, SweepAxis};
use alsvid_state::{FluxTarget, Machine};

use crate::error::{NodeError, NodeResult};
use crate::node::{
    CalibrationNode, FitRecord, NodeAnalysis, align_qubit, flux_prelude, measure_state,
    reset_instr, state_pipeline,
};
use crate::params::NodeParams;

/// Alpha pinned into the state for the duration of the run.
const ALPHA_OVERRIDE: f64 = -1.0;

/// DRAG calibration over an amplitude-factor sweep.
pub struct DragCalibration;

/// The drive operation whose coefficient is calibrated.
const OPERATION: &str = "x180";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct DragExtras {
    min_amp_factor: f64,
    max_amp_factor: f64,
    amp_factor_step: f64,
}

impl Default for DragExtras {
    fn default() -> Self {
        Self {
            min_amp_factor: -2.0,
            max_amp_factor: 2.0,
            amp_factor_step: 0.05,
        }
    }
}

impl DragExtras {
    fn amps(&self) -> NodeResult<Vec<f64>> {
        let axis = SweepAxis::arange("amp", self.min_amp_factor, self.max_amp_factor, self.amp_factor_step);
        if axis.is_empty() {
            return Err(NodeError::Parameter("empty amplitude-factor sweep".into()));
        }
        if self.min_amp_factor < -2.0 || self.max_amp_factor > 2.0 {
            return Err(NodeError::Parameter(
                "amplitude factors must stay within [-2, 2)".into(),
            ));
        }
        Ok(axis.values)
    }
}

impl CalibrationNode for DragCalibration {
    fn name(&self) -> &'static str {
        "drag_calibration"
    }

    fn describe(&self) -> &'static str {
        "DRAG coefficient via intersecting x180-y90 / y180-x90 pulse pairs"
    }

    fn targets(&self, machine: &Machine, params: &NodeParams) -> NodeResult<Vec<String>> {
        params.target_qubits(machine)
    }

    fn prepare(&self, machine: &mut Machine, params: &NodeParams) -> NodeResult<()> {
        let names = params.target_qubits(machine)?;
        for name in names {
            let qubit = machine.qubit_mut(&name)?;
            if let Some(drag) = qubit.xy.operation_mut(OPERATION)?.as_drag_mut() {
                drag.alpha = ALPHA_OVERRIDE;
            }
        }
        Ok(())
    }

    fn axes(
        &self,
        _machine: &Machine,
        params: &NodeParams,
    ) -> NodeResult<Vec<(String, Vec<f64>)>> {
        let extras: DragExtras = params.extras()?;
        Ok(vec![
            ("sequence".to_string(), vec![0.0, 1.0]),
            ("amp".to_string(), extras.amps()?),
        ])
    }

    fn build(&self, machine: &Machine, params: &NodeParams) -> NodeResult<Program> {
        let extras: DragExtras = params.extras()?;
        let amps = extras.amps()?;
        let qubits = machine.select_qubits(params.qubits.as_deref())?;

        let mut program = Program::new("drag_calibration", params.num_averages);
        for (i, qubit) in qubits.iter().enumerate() {
            let stream = format!("state_{}", qubit.name);
            program.streams.push(StreamDecl::scalar(&stream));
            let xy = qubit.xy_element();

            let pair = |first: &str, first_scale: AmpScale, second: &str, second_scale: AmpScale| {
                vec![
                    reset_instr(qubit, params.reset),
                    align_qubit(qubit),
                    Instr::Play {
                        element: xy.clone(),
                        operation: first.to_string(),
                        amp_scale: Some(first_scale),
                        duration_ns: None,
                    },
                    Instr::Play {
                        element: xy.clone(),
                        operation: second.to_string(),
                        amp_scale: Some(second_scale),
                        duration_ns: None,
                    },
                    align_qubit(qubit),
                    measure_state(qubit, &stream),
                ]
            };

            let mut block = flux_prelude(machine, params.flux_point, FluxTarget::Qubit(&qubit.name))?;
            // Sequence 0: x180 . y90; sequence 1: y180 . x90.
            block.push(Instr::Sweep {
                axis: SweepAxis::list("amp", amps.clone()),
                body: pair(
                    "x180",
                    AmpScale::q_scale(Param::axis("amp")),
                    "y90",
                    AmpScale::i_scale(Param::axis("amp")),
                ),
            });
            block.push(Instr::Sweep {
                axis: SweepAxis::list("amp", amps.clone()),
                body: pair(
                    "y180",
                    AmpScale::i_scale(Param::axis("amp")),
                    "x90",
                    AmpScale::q_scale(Param::axis("amp")),
                ),
            });
            if !params.multiplexed {
                block.push(Instr::Align { elements: vec![] });
            }
            program.body.extend(block);

            program.pipelines.push(state_pipeline(
                &stream,
                &[amps.len(), 2],
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
        let amps = ds.coord_values("amp")?.to_vec();
        let labels = match ds.coord("qubit")? {
            alsvid_fit::Coord::Labels(l) => l.clone(),
            _ => return Err(NodeError::Analysis("qubit axis has no labels".into())),
        };

        let mut analysis = NodeAnalysis::default();
        for label in &labels {
            let per_qubit = ds.sel_qubit(label)?;
            // Linear fit of state vs amplitude factor for each sequence.
            let mut lines = Vec::new();
            for seq in 0..2 {
                let row = per_qubit.sel_index("sequence", seq)?;
                let y = row.values_1d("state")?;
                match polyfit(&amps, &y, 1) {
                    Ok(coeffs) => lines.push((coeffs[0], coeffs[1])),
                    Err(e) => {
                        lines.clear();
                        analysis.insert(label.clone(), FitRecord::failed(e.to_string()));
                        break;
                    }
                }
            }
            if lines.len() < 2 {
                continue;
            }
            let Some(intersection) = line_intersection(lines[0], lines[1]) else {
                analysis.insert(
                    label.clone(),
                    FitRecord::failed("parallel sequence responses"),
                );
                continue;
            };
            // The swept factor scales the pinned coefficient.
            let alpha = intersection * ALPHA_OVERRIDE;
            let mut values = BTreeMap::new();
            values.insert("alpha".to_string(), alpha);
            analysis.insert(label.clone(), FitRecord::successful(values));
        }
        Ok(analysis)
    }

    fn apply(&self, machine: &mut Machine, analysis: &NodeAnalysis) -> NodeResult<()> {
        for (name, record) in &analysis.fit_results {
            let Some(alpha) = record.value("alpha") else {
                continue;
            };
            let qubit = machine.qubit_mut(name)?;
            if let Some(drag) = qubit.xy.operation_mut(OPERATION)?.as_drag_mut() {
                drag.alpha = alpha;
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
    fn test_prepare_pins_alpha() {
        let mut machine = test_machine();
        DragCalibration
            .prepare(&mut machine, &NodeParams::default())
            .unwrap();
        let alpha = machine
            .qubit("q1")
            .unwrap()
            .xy
            .operation("x180")
            .unwrap()
            .as_drag()
            .unwrap()
            .alpha;
        assert_eq!(alpha, ALPHA_OVERRIDE);
    }

    #[test]
    fn test_build_emits_both_sequences() {
        let machine = test_machine();
        let program = DragCalibration.build(&machine, &NodeParams::default()).unwrap();
        program.validate().unwrap();
        // Sibling amp sweeps collapse into one logical axis.
        assert_eq!(program.sweep_axes().len(), 1);
        assert_eq!(program.pipelines[0].shape()[0], 2);
    }

    #[test]
    fn test_rejects_out_of_range_factors() {
        let machine = test_machine();
        let mut p = NodeParams::default();
        p.set_extra("max_amp_factor", serde_json::json!(3.0));
        assert!(matches!(
            DragCalibration.build(&machine, &p),
            Err(NodeError::Parameter(_))
        ));
    }

    #[test]
    fn test_analyze_finds_intersection() {
        let machine = test_machine();
        let p = NodeParams::default();
        let axes = DragCalibration.axes(&machine, &p).unwrap();
        let amps = axes[1].1.clone();

        // Two lines crossing at a = 0.8: with the -1 override, alpha = -0.8.
        let mut results: Map<String, ArrayD<f64>> = Map::new();
        for i in 0..2 {
            let mut data = Vec::new();
            for (slope, intercept) in [(0.1, 0.5), (-0.1, 0.66)] {
                for &a in &amps {
                    data.push(intercept + slope * a);
                }
            }
            results.insert(
                format!("state{}", i + 1),
                ArrayD::from_shape_vec(vec![2, amps.len()], data).unwrap(),
            );
        }
        let ds = Dataset::assemble(&results, &["q1".into(), "q2".into()], &axes).unwrap();

        let analysis = DragCalibration.analyze(&ds, &machine, &p).unwrap();
        let alpha = analysis.record("q1").unwrap().value("alpha").unwrap();
        assert!((alpha + 0.8).abs() < 1e-9, "alpha = {alpha}");
    }

    #[test]
    fn test_apply_writes_alpha() {
        let mut machine = test_machine();
        let mut analysis = NodeAnalysis::default();
        let mut values = Map::new();
        values.insert("alpha".to_string(), -0.73);
        analysis.insert("q2", FitRecord::successful(values));

        DragCalibration.apply(&mut machine, &analysis).unwrap();
        let alpha = machine
            .qubit("q2")
            .unwrap()
            .xy
            .operation("x180")
            .unwrap()
            .as_drag()
            .unwrap()
            .alpha;
        assert!((alpha + 0.73).abs() < 1e-12);
    }
}
