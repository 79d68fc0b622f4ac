//! Hahn echo vs flux offset.
//!
//! `x90 – tau/2 – x180 – tau/2 – x90` over an idle-time sweep, repeated for
//! a grid of flux offsets around the operating point. The refocusing pulse
//! cancels quasi-static dephasing, so the envelope decays with T2E; fitting
//! every flux row maps the coherence across the bias range, and the row at
//! the operating point updates the qubit's stored echo time.

use std::collections::BTreeMap;

use serde::Deserialize;

use alsvid_fit::{Dataset, EchoDecayExp, fit_along};
use alsvid_seq::{Instr, Param, Program, StreamDecl, SweepAxis};
use alsvid_state::{FluxTarget, Machine};

use crate::error::{NodeError, NodeResult};
use crate::node::{
    CalibrationNode, FitRecord, NodeAnalysis, align_qubit, flux_prelude, measure_state,
    reset_instr, state_pipeline,
};
use crate::params::NodeParams;

/// Echo coherence across a flux-offset grid.
pub struct T2Echo;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct T2EchoExtras {
    min_wait_time_in_ns: f64,
    max_wait_time_in_ns: f64,
    wait_time_step_in_ns: f64,
    flux_span: f64,
    flux_step: f64,
}

impl Default for T2EchoExtras {
    fn default() -> Self {
        Self {
            min_wait_time_in_ns: 16.0,
            max_wait_time_in_ns: 30_000.0,
            wait_time_step_in_ns: 400.0,
            flux_span: 0.1,
            flux_step: 0.005,
        }
    }
}

impl T2EchoExtras {
    fn idle_times(&self, params: &NodeParams) -> NodeResult<Vec<f64>> {
        let axis = SweepAxis::arange(
            "idle_time",
            self.min_wait_time_in_ns,
            self.max_wait_time_in_ns,
            self.wait_time_step_in_ns,
        );
        // Each half of the echo waits tau/2 on the 4 ns clock, so the
        // total idle times must sit on the 8 ns grid.
        params.require_clock_aligned(
            "idle-time halves",
            &axis.values.iter().map(|v| v / 2.0).collect::<Vec<_>>(),
        )?;
        Ok(axis.values)
    }

    fn flux_offsets(&self) -> NodeResult<Vec<f64>> {
        let axis = SweepAxis::arange(
            "flux",
            -self.flux_span / 2.0,
            self.flux_span / 2.0 + self.flux_step / 2.0,
            self.flux_step,
        );
        if axis.is_empty() {
            return Err(NodeError::Parameter("empty flux sweep".into()));
        }
        Ok(axis.values)
    }
}

impl CalibrationNode for T2Echo {
    fn name(&self) -> &'static str {
        "t2_echo"
    }

    fn describe(&self) -> &'static str {
        "Hahn echo vs flux: T2E map and echo time at the operating point"
    }

    fn targets(&self, machine: &Machine, params: &NodeParams) -> NodeResult<Vec<String>> {
        params.target_qubits(machine)
    }

    fn axes(
        &self,
        _machine: &Machine,
        params: &NodeParams,
    ) -> NodeResult<Vec<(String, Vec<f64>)>> {
        let extras: T2EchoExtras = params.extras()?;
        Ok(vec![
            ("flux".to_string(), extras.flux_offsets()?),
            ("idle_time".to_string(), extras.idle_times(params)?),
        ])
    }

    fn build(&self, machine: &Machine, params: &NodeParams) -> NodeResult<Program> {
        let extras: T2EchoExtras = params.extras()?;
        let idle_times = extras.idle_times(params)?;
        let flux_offsets = extras.flux_offsets()?;
        let qubits = machine.select_qubits(params.qubits.as_deref())?;

        let mut program = Program::new("t2_echo", params.num_averages);
        for (i, qubit) in qubits.iter().enumerate() {
            let z = qubit
                .z
                .as_ref()
                .ok_or_else(|| NodeError::Parameter(format!("{} has no flux element", qubit.name)))?;
            let stream = format!("state_{}", qubit.name);
            program.streams.push(StreamDecl::scalar(&stream));
            let xy = qubit.xy_element();

            let echo = vec![
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
                    duration_ns: Param::scaled("idle_time", 0.5),
                },
                Instr::Play {
                    element: xy.clone(),
                    operation: "x180".into(),
                    amp_scale: None,
                    duration_ns: None,
                },
                Instr::Wait {
                    elements: vec![xy.clone()],
                    duration_ns: Param::scaled("idle_time", 0.5),
                },
                Instr::Play {
                    element: xy,
                    operation: "x90".into(),
                    amp_scale: None,
                    duration_ns: None,
                },
                align_qubit(qubit),
                measure_state(qubit, &stream),
            ];

            let mut block = flux_prelude(machine, params.flux_point, FluxTarget::Qubit(&qubit.name))?;
            block.push(Instr::Sweep {
                axis: SweepAxis::list("flux", flux_offsets.clone()),
                body: vec![
                    // Bias rides the flux axis on top of the idle offset.
                    Instr::SetDcOffset {
                        element: qubit.z_element(),
                        volts: Param::affine("flux", 1.0, z.joint_offset),
                    },
                    Instr::Wait {
                        elements: vec![qubit.z_element()],
                        duration_ns: Param::value(z.settle_time_ns as f64),
                    },
                    Instr::Align { elements: vec![] },
                    Instr::Sweep {
                        axis: SweepAxis::list("idle_time", idle_times.clone()),
                        body: echo,
                    },
                ],
            });
            if !params.multiplexed {
                block.push(Instr::Align { elements: vec![] });
            }
            program.body.extend(block);

            program.pipelines.push(state_pipeline(
                &stream,
                &[idle_times.len(), flux_offsets.len()],
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
        let fitted = fit_along(ds, "state", "idle_time", &EchoDecayExp)?;
        let decay = fitted.var("decay")?;
        let decay_echo = fitted.var("decay_echo")?;
        let flux = ds.coord_values("flux")?.to_vec();

        let labels = match ds.coord("qubit")? {
            alsvid_fit::Coord::Labels(l) => l.clone(),
            _ => return Err(NodeError::Analysis("qubit axis has no labels".into())),
        };
        // Row closest to the operating point (zero offset).
        let idle_row = flux
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(i, _)| i)
            .ok_or_else(|| NodeError::Analysis("empty flux axis".into()))?;

        let mut analysis = NodeAnalysis::default();
        for (i, label) in labels.iter().enumerate() {
            let gaussian = decay_echo[[i, idle_row]];
            let exponential = decay[[i, idle_row]];
            // The Gaussian envelope dominates echo decay; fall back to the
            // exponential rate when it fits away to nothing.
            let rate = if gaussian.is_finite() && gaussian.abs() > 1e-12 {
                gaussian.abs()
            } else if exponential.is_finite() && exponential > 0.0 {
                exponential
            } else {
                analysis.insert(label.clone(), FitRecord::failed("echo fit diverged"));
                continue;
            };
            let t2_echo_us = 1.0 / rate / 1000.0;

            let mut values = BTreeMap::new();
            values.insert("t2_echo_us".to_string(), t2_echo_us);
            values.insert("flux_at_fit_v".to_string(), flux[idle_row]);
            analysis.insert(label.clone(), FitRecord::successful(values));
        }
        Ok(analysis)
    }

    fn apply(&self, machine: &mut Machine, analysis: &NodeAnalysis) -> NodeResult<()> {
        for (name, record) in &analysis.fit_results {
            if let Some(t2) = record.value("t2_echo_us") {
                machine.qubit_mut(name)?.t2echo_us = Some(t2);
            }
        }
        Ok(())
    }
}
