//! The calibration-node contract.
//!
//! A node contributes four pure steps — temporary overrides, program
//! construction, analysis, state update — and the runner owns everything
//! between them (backend selection, submission, progress, assembly,
//! revert/record bookkeeping).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use alsvid_fit::Dataset;
use alsvid_seq::{Instr, Pipeline, Program, StreamOp};
use alsvid_state::{Machine, Transmon};

use crate::error::NodeResult;
use crate::params::{NodeParams, ResetKind};

/// Per-target outcome of a node's analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum Outcome {
    Successful,
    Failed { reason: String },
}

impl Outcome {
    /// True for successful outcomes.
    pub fn is_successful(&self) -> bool {
        matches!(self, Outcome::Successful)
    }
}

/// Fitted quantities for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitRecord {
    #[serde(flatten)]
    pub outcome: Outcome,
    /// Named scalar results ("alpha", "t2_echo_us", ...).
    pub values: BTreeMap<String, f64>,
}

impl FitRecord {
    /// A successful record with the given values.
    pub fn successful(values: BTreeMap<String, f64>) -> Self {
        Self {
            outcome: Outcome::Successful,
            values,
        }
    }

    /// A failed record carrying the reason.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Failed {
                reason: reason.into(),
            },
            values: BTreeMap::new(),
        }
    }

    /// Look up one value.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

/// Result of a node's analysis step, keyed by target name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeAnalysis {
    pub fit_results: BTreeMap<String, FitRecord>,
}

impl NodeAnalysis {
    /// Record one target's fit.
    pub fn insert(&mut self, target: impl Into<String>, record: FitRecord) {
        self.fit_results.insert(target.into(), record);
    }

    /// Record of one target.
    pub fn record(&self, target: &str) -> Option<&FitRecord> {
        self.fit_results.get(target)
    }

    /// True when every target analyzed successfully.
    pub fn all_successful(&self) -> bool {
        self.fit_results.values().all(|r| r.outcome.is_successful())
    }
}

/// A calibration experiment.
pub trait CalibrationNode: Send + Sync {
    /// Registry name.
    fn name(&self) -> &'static str;

    /// One-line description for listings.
    fn describe(&self) -> &'static str;

    /// Target names (qubits or pairs) the dataset stacks under.
    fn targets(&self, machine: &Machine, params: &NodeParams) -> NodeResult<Vec<String>>;

    /// Apply temporary overrides for the duration of the run.
    ///
    /// The runner snapshots the machine beforehand and reverts after
    /// execution, so overrides never leak into the analysis or the
    /// persisted state.
    fn prepare(&self, _machine: &mut Machine, _params: &NodeParams) -> NodeResult<()> {
        Ok(())
    }

    /// Build the pulse program.
    fn build(&self, machine: &Machine, params: &NodeParams) -> NodeResult<Program>;

    /// Sweep axes of the fetched streams, outermost first.
    fn axes(&self, machine: &Machine, params: &NodeParams)
    -> NodeResult<Vec<(String, Vec<f64>)>>;

    /// Extract physical quantities from the assembled dataset.
    fn analyze(
        &self,
        ds: &Dataset,
        machine: &Machine,
        params: &NodeParams,
    ) -> NodeResult<NodeAnalysis>;

    /// Write successful results into the device state.
    fn apply(&self, _machine: &mut Machine, _analysis: &NodeAnalysis) -> NodeResult<()> {
        Ok(())
    }
}

// ─── Program-building helpers shared by the nodes ───────────────────

/// DC-offset instructions placing the machine at a flux point for a target.
///
/// Emits the resolved offsets in application order, waits out the settle
/// time on the touched elements, then aligns everything.
pub fn flux_prelude(
    machine: &Machine,
    flux_point: alsvid_state::FluxPoint,
    target: alsvid_state::FluxTarget<'_>,
) -> NodeResult<Vec<Instr>> {
    let settings = machine.flux_settings(flux_point, target)?;
    let mut instrs = Vec::new();
    let mut touched = Vec::new();
    for (element, volts) in settings.offsets {
        instrs.push(Instr::SetDcOffset {
            element: element.clone(),
            volts: alsvid_seq::Param::value(volts),
        });
        if !touched.contains(&element) {
            touched.push(element);
        }
    }
    if settings.settle_ns > 0 && !touched.is_empty() {
        instrs.push(Instr::Wait {
            elements: touched,
            duration_ns: alsvid_seq::Param::value(settings.settle_ns as f64),
        });
    }
    instrs.push(Instr::Align { elements: vec![] });
    Ok(instrs)
}

/// Reset instruction for one qubit.
pub fn reset_instr(qubit: &Transmon, kind: ResetKind) -> Instr {
    match kind {
        ResetKind::Active => Instr::ActiveReset {
            qubit: qubit.name.clone(),
        },
        ResetKind::Thermal => Instr::ThermalReset {
            qubit: qubit.name.clone(),
            duration_ns: qubit.thermalization_time_ns,
        },
    }
}

/// State-discriminated measurement into a stream.
pub fn measure_state(qubit: &Transmon, stream: impl Into<String>) -> Instr {
    Instr::Measure {
        element: qubit.resonator_element(),
        operation: "readout".to_string(),
        stream: stream.into(),
    }
}

/// Align a qubit's own elements (drive, flux, resonator).
pub fn align_qubit(qubit: &Transmon) -> Instr {
    let mut elements = vec![qubit.xy_element(), qubit.resonator_element()];
    if qubit.z.is_some() {
        elements.insert(1, qubit.z_element());
    }
    Instr::Align { elements }
}

/// State pipeline `boolean_to_int -> buffers -> average`, buffers innermost
/// first.
pub fn state_pipeline(
    source: impl Into<String>,
    buffers: &[usize],
    save_as: impl Into<String>,
) -> Pipeline {
    let mut steps = vec![StreamOp::BooleanToInt];
    steps.extend(buffers.iter().map(|&n| StreamOp::Buffer(n)));
    steps.push(StreamOp::Average);
    Pipeline::new(source, steps, save_as)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_record_outcomes() {
        let mut values = BTreeMap::new();
        values.insert("alpha".to_string(), -0.8);
        let ok = FitRecord::successful(values);
        assert!(ok.outcome.is_successful());
        assert_eq!(ok.value("alpha"), Some(-0.8));

        let bad = FitRecord::failed("no convergence");
        assert!(!bad.outcome.is_successful());
        assert_eq!(bad.value("alpha"), None);
    }

    #[test]
    fn test_analysis_all_successful() {
        let mut analysis = NodeAnalysis::default();
        analysis.insert("q1", FitRecord::successful(BTreeMap::new()));
        assert!(analysis.all_successful());
        analysis.insert("q2", FitRecord::failed("bad data"));
        assert!(!analysis.all_successful());
    }

    #[test]
    fn test_state_pipeline_shape() {
        let p = state_pipeline("state_q1", &[80, 2], "state1");
        assert_eq!(p.shape(), vec![2, 80]);
        assert!(p.is_averaged());
    }

    #[test]
    fn test_fit_record_json() {
        let record = FitRecord::failed("flat trace");
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"outcome\":\"failed\""));
        let back: FitRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
