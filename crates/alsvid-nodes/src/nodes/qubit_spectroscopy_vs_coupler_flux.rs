//! Qubit spectroscopy vs coupler flux.
//!
//! A saturation tone sweeps across the control qubit's resonance while the
//! pair's coupler bias steps through its range. Each flux row shows the
//! qubit line as a Lorentzian peak in the demodulated amplitude; the peak
//! position vs flux follows the quadratic flux response, and its curvature
//! updates the stored frequency-vs-flux quadratic term.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;

use alsvid_fit::{Dataset, Lorentzian, fit_model, polyfit, polyval};
use alsvid_seq::{AmpScale, Instr, Param, Pipeline, Program, StreamDecl, StreamOp, SweepAxis};
use alsvid_state::{FluxTarget, Machine};

use crate::error::{NodeError, NodeResult};
use crate::node::{CalibrationNode, FitRecord, NodeAnalysis, flux_prelude};
use crate::params::NodeParams;

/// Control-qubit spectroscopy across the coupler bias range.
pub struct QubitSpectroscopyVsCouplerFlux;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct SpectroscopyExtras {
    operation: String,
    operation_amplitude_factor: f64,
    operation_len_in_ns: Option<u32>,
    frequency_span_in_mhz: f64,
    frequency_step_in_mhz: f64,
    min_flux_offset_in_v: f64,
    max_flux_offset_in_v: f64,
    num_flux_points: usize,
}

impl Default for SpectroscopyExtras {
    fn default() -> Self {
        Self {
            operation: "saturation".to_string(),
            operation_amplitude_factor: 0.1,
            operation_len_in_ns: None,
            frequency_span_in_mhz: 125.0,
            frequency_step_in_mhz: 0.5,
            min_flux_offset_in_v: -0.2,
            max_flux_offset_in_v: 0.03,
            num_flux_points: 101,
        }
    }
}

impl SpectroscopyExtras {
    /// Drive detunings around the stored resonance, Hz.
    fn detunings(&self) -> NodeResult<Vec<f64>> {
        let span = self.frequency_span_in_mhz * 1e6;
        let axis = SweepAxis::arange(
            "freq",
            -span / 2.0,
            span / 2.0,
            self.frequency_step_in_mhz * 1e6,
        );
        if axis.is_empty() {
            return Err(NodeError::Parameter("empty frequency sweep".into()));
        }
        Ok(axis.values)
    }

    /// Coupler bias grid, volts.
    fn fluxes(&self) -> NodeResult<Vec<f64>> {
        // The curvature fit needs at least a parabola's worth of rows.
        if self.num_flux_points < 3 {
            return Err(NodeError::Parameter(
                "num_flux_points must be at least 3".into(),
            ));
        }
        Ok(SweepAxis::linspace(
            "flux",
            self.min_flux_offset_in_v,
            self.max_flux_offset_in_v,
            self.num_flux_points,
        )
        .values)
    }
}

impl CalibrationNode for QubitSpectroscopyVsCouplerFlux {
    fn name(&self) -> &'static str {
        "qubit_spectroscopy_vs_coupler_flux"
    }

    fn describe(&self) -> &'static str {
        "Qubit line vs coupler bias: frequency-vs-flux quadratic term"
    }

    fn targets(&self, machine: &Machine, params: &NodeParams) -> NodeResult<Vec<String>> {
        params.target_pairs(machine)
    }

    fn axes(
        &self,
        _machine: &Machine,
        params: &NodeParams,
    ) -> NodeResult<Vec<(String, Vec<f64>)>> {
        let extras: SpectroscopyExtras = params.extras()?;
        Ok(vec![
            ("freq".to_string(), extras.detunings()?),
            ("flux".to_string(), extras.fluxes()?),
        ])
    }

    fn build(&self, machine: &Machine, params: &NodeParams) -> NodeResult<Program> {
        let extras: SpectroscopyExtras = params.extras()?;
        let detunings = extras.detunings()?;
        let fluxes = extras.fluxes()?;
        let pairs = params.target_pairs(machine)?;

        let mut program = Program::new("qubit_spectroscopy_vs_coupler_flux", params.num_averages);
        for (i, name) in pairs.iter().enumerate() {
            let pair = machine.pair(name)?;
            if pair.coupler.is_none() {
                return Err(NodeError::Parameter(format!("{name} has no coupler")));
            }
            let control = machine.qubit(&pair.qubit_control)?;
            // The saturation tone must be calibrated on the drive line.
            control.xy.operation(&extras.operation)?;
            let xy = control.xy_element();

            let stream = format!("iq_{name}");
            program.streams.push(StreamDecl::scalar(&stream));

            let body = vec![
                Instr::SetDcOffset {
                    element: pair.coupler_element(),
                    volts: Param::axis("flux"),
                },
                Instr::Align { elements: vec![] },
                Instr::Play {
                    element: xy.clone(),
                    operation: extras.operation.clone(),
                    amp_scale: Some(AmpScale::uniform(extras.operation_amplitude_factor)),
                    duration_ns: extras
                        .operation_len_in_ns
                        .map(|len| Param::value(len as f64)),
                },
                Instr::Align { elements: vec![] },
                Instr::Measure {
                    element: control.resonator_element(),
                    operation: "readout".into(),
                    stream: stream.clone(),
                },
                Instr::Wait {
                    elements: vec![control.resonator_element()],
                    duration_ns: Param::value(control.resonator.depletion_time_ns as f64),
                },
            ];

            let mut block = flux_prelude(machine, params.flux_point, FluxTarget::Pair(name))?;
            block.push(Instr::Sweep {
                axis: SweepAxis::list("freq", detunings.clone()),
                body: vec![
                    Instr::SetFrequency {
                        element: xy.clone(),
                        hz: Param::affine("freq", 1.0, control.xy.intermediate_frequency_hz),
                    },
                    Instr::Sweep {
                        axis: SweepAxis::list("flux", fluxes.clone()),
                        body,
                    },
                ],
            });
            if !params.multiplexed {
                block.push(Instr::Align { elements: vec![] });
            }
            program.body.extend(block);

            for (input, save_as) in [
                (StreamOp::Input1, format!("I{}", i + 1)),
                (StreamOp::Input2, format!("Q{}", i + 1)),
            ] {
                program.pipelines.push(Pipeline::new(
                    &stream,
                    vec![
                        input,
                        StreamOp::Buffer(fluxes.len()),
                        StreamOp::Buffer(detunings.len()),
                        StreamOp::Average,
                    ],
                    save_as,
                ));
            }
        }
        Ok(program)
    }

    fn analyze(
        &self,
        ds: &Dataset,
        machine: &Machine,
        _params: &NodeParams,
    ) -> NodeResult<NodeAnalysis> {
        let detunings = ds.coord_values("freq")?.to_vec();
        let fluxes = ds.coord_values("flux")?.to_vec();
        let labels = match ds.coord("qubit")? {
            alsvid_fit::Coord::Labels(l) => l.clone(),
            _ => return Err(NodeError::Analysis("pair axis has no labels".into())),
        };

        let mut analysis = NodeAnalysis::default();
        for label in &labels {
            machine.pair(label)?;
            let per_pair = ds.sel_qubit(label)?;
            let i_var = per_pair.var("I")?;
            let q_var = per_pair.var("Q")?;
            let magnitude = (i_var * i_var + q_var * q_var).mapv(f64::sqrt);

            // One Lorentzian per flux row; rows without a resolvable peak
            // drop out of the curvature fit.
            let xs: Vec<Vec<f64>> = detunings.iter().map(|&f| vec![f]).collect();
            let mut peak_flux = Vec::new();
            let mut peak_freq = Vec::new();
            for (j, &flux) in fluxes.iter().enumerate() {
                let y: Vec<f64> = (0..detunings.len()).map(|k| magnitude[[k, j]]).collect();
                match fit_model(&Lorentzian, &xs, &y) {
                    Ok(fit)
                        if fit.params[1].is_finite()
                            && fit.params[1] >= detunings[0]
                            && fit.params[1] <= detunings[detunings.len() - 1] =>
                    {
                        peak_flux.push(flux);
                        peak_freq.push(fit.params[1]);
                    }
                    _ => debug!(pair = %label, flux, "no peak in flux row"),
                }
            }
            if peak_flux.len() < 3 {
                analysis.insert(
                    label.clone(),
                    FitRecord::failed("too few resolved peaks for a curvature fit"),
                );
                continue;
            }

            let coeffs = match polyfit(&peak_flux, &peak_freq, 2) {
                Ok(coeffs) => coeffs,
                Err(e) => {
                    analysis.insert(label.clone(), FitRecord::failed(e.to_string()));
                    continue;
                }
            };
            let mut values = BTreeMap::new();
            values.insert("freq_vs_flux_quad_term_hz_per_v2".to_string(), coeffs[2]);
            values.insert("peak_at_zero_flux_hz".to_string(), polyval(&coeffs, 0.0));
            analysis.insert(label.clone(), FitRecord::successful(values));
        }
        Ok(analysis)
    }

    fn apply(&self, machine: &mut Machine, analysis: &NodeAnalysis) -> NodeResult<()> {
        for (name, record) in &analysis.fit_results {
            let Some(quad) = record.value("freq_vs_flux_quad_term_hz_per_v2") else {
                continue;
            };
            let control = machine.pair(name)?.qubit_control.clone();
            machine.qubit_mut(&control)?.freq_vs_flux_01_quad_term = quad;
        }
        Ok(())
    }
}
