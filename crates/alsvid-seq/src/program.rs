//! The pulse-program IR.
//!
//! A [`Program`] is the unit shipped to an execution backend: a tree of
//! instructions (with nested sweeps), the streams its measurements feed, and
//! the processing pipelines that shape what comes back. Swept quantities
//! (idle times, amplitude factors, flux offsets) appear as [`Param`]
//! expressions referencing a sweep axis by name; the backend binds the axis
//! value on every iteration. The IR is serialized as JSON and travels
//! together with the controller configuration rendered from the device
//! state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{SeqError, SeqResult};
use crate::streams::{Pipeline, StreamDecl, StreamOp};

/// A parameterized pulse program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Program name, used for job naming and run records.
    pub name: String,
    /// Number of averaging iterations of the whole body.
    pub shots: u32,
    /// Instruction tree.
    pub body: Vec<Instr>,
    /// Declared measurement streams.
    pub streams: Vec<StreamDecl>,
    /// Stream-processing pipelines producing the named results.
    pub pipelines: Vec<Pipeline>,
}

impl Program {
    /// Create an empty program.
    pub fn new(name: impl Into<String>, shots: u32) -> Self {
        Self {
            name: name.into(),
            shots,
            body: Vec::new(),
            streams: Vec::new(),
            pipelines: Vec::new(),
        }
    }

    /// All sweep axes in nesting order, outermost first.
    ///
    /// Sibling sweeps over the same axis name (alternating pulse sequences
    /// swept over one amplitude grid) count as a single axis; the first
    /// occurrence wins.
    pub fn sweep_axes(&self) -> Vec<&SweepAxis> {
        let mut axes: Vec<&SweepAxis> = Vec::new();
        collect_axes(&self.body, &mut axes);
        let mut seen = std::collections::BTreeSet::new();
        axes.retain(|axis| seen.insert(axis.name.clone()));
        axes
    }

    /// Check the structural invariants before submission.
    ///
    /// Sweep axes must be non-empty, save names unique, every pipeline must
    /// read a declared stream, and a pipeline's buffer chain (innermost
    /// first) must match the sweep axis lengths it covers.
    pub fn validate(&self) -> SeqResult<()> {
        let axes = self.sweep_axes();
        for axis in &axes {
            if axis.values.is_empty() {
                return Err(SeqError::EmptySweep(axis.name.clone()));
            }
        }

        let mut seen = std::collections::BTreeSet::new();
        for pipeline in &self.pipelines {
            if !seen.insert(pipeline.save_as.clone()) {
                return Err(SeqError::DuplicateSave(pipeline.save_as.clone()));
            }
            if !self.streams.iter().any(|s| s.name == pipeline.source) {
                return Err(SeqError::UnknownStream(pipeline.source.clone()));
            }
        }

        // Buffer chains shape per-shot data: the first declared buffer
        // gathers the innermost sweep, the next one the sweep above it.
        // Programs without sweeps (unrolled bodies, e.g. randomized
        // benchmarking) shape their streams with buffers alone.
        if !axes.is_empty() {
            for pipeline in &self.pipelines {
                let buffers: Vec<usize> = pipeline
                    .steps
                    .iter()
                    .filter_map(|s| match s {
                        StreamOp::Buffer(n) => Some(*n),
                        _ => None,
                    })
                    .collect();
                for (i, &buffer) in buffers.iter().enumerate() {
                    let Some(axis) = axes.iter().rev().nth(i) else {
                        break;
                    };
                    if buffer != axis.values.len() {
                        return Err(SeqError::BufferMismatch {
                            stream: pipeline.save_as.clone(),
                            buffer,
                            axis: axis.name.clone(),
                            len: axis.values.len(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

fn collect_axes<'a>(body: &'a [Instr], out: &mut Vec<&'a SweepAxis>) {
    for instr in body {
        if let Instr::Sweep { axis, body } = instr {
            out.push(axis);
            collect_axes(body, out);
        }
    }
}

/// A scalar quantity that may reference sweep axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "param", rename_all = "snake_case")]
pub enum Param {
    /// A fixed value.
    Const { value: f64 },
    /// `factor * axis + offset`.
    Axis {
        axis: String,
        #[serde(default = "one")]
        factor: f64,
        #[serde(default)]
        offset: f64,
    },
    /// `factor * axis1 * axis2 * ...` — used for phases accumulated over
    /// two swept quantities (detuning sign times idle time).
    Product { axes: Vec<String>, factor: f64 },
}

fn one() -> f64 {
    1.0
}

impl Param {
    /// A constant.
    pub fn value(v: f64) -> Self {
        Param::Const { value: v }
    }

    /// The bare value of an axis.
    pub fn axis(name: impl Into<String>) -> Self {
        Param::Axis {
            axis: name.into(),
            factor: 1.0,
            offset: 0.0,
        }
    }

    /// A scaled axis value.
    pub fn scaled(name: impl Into<String>, factor: f64) -> Self {
        Param::Axis {
            axis: name.into(),
            factor,
            offset: 0.0,
        }
    }

    /// A scaled and shifted axis value.
    pub fn affine(name: impl Into<String>, factor: f64, offset: f64) -> Self {
        Param::Axis {
            axis: name.into(),
            factor,
            offset,
        }
    }

    /// Evaluate under the given axis bindings.
    ///
    /// An unbound axis evaluates through its absence as an error at the
    /// backend; here it is surfaced as `None`.
    pub fn eval(&self, bindings: &HashMap<String, f64>) -> Option<f64> {
        match self {
            Param::Const { value } => Some(*value),
            Param::Axis {
                axis,
                factor,
                offset,
            } => bindings.get(axis).map(|v| factor * v + offset),
            Param::Product { axes, factor } => {
                let mut out = *factor;
                for axis in axes {
                    out *= bindings.get(axis)?;
                }
                Some(out)
            }
        }
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Param::value(v)
    }
}

/// IQ amplitude scaling of a play instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "amp", rename_all = "snake_case")]
pub enum AmpScale {
    /// Uniform scaling of both quadratures.
    Uniform { scale: Param },
    /// Full 2x2 matrix `[v00, v01, v10, v11]`.
    Matrix { matrix: [Param; 4] },
}

impl AmpScale {
    /// `amp(a)`.
    pub fn uniform(scale: impl Into<Param>) -> Self {
        AmpScale::Uniform {
            scale: scale.into(),
        }
    }

    /// `amp(1, 0, 0, a)`.
    pub fn q_scale(scale: impl Into<Param>) -> Self {
        AmpScale::Matrix {
            matrix: [
                Param::value(1.0),
                Param::value(0.0),
                Param::value(0.0),
                scale.into(),
            ],
        }
    }

    /// `amp(a, 0, 0, 1)`.
    pub fn i_scale(scale: impl Into<Param>) -> Self {
        AmpScale::Matrix {
            matrix: [
                scale.into(),
                Param::value(0.0),
                Param::value(0.0),
                Param::value(1.0),
            ],
        }
    }

    /// Evaluate into a concrete matrix under the given bindings.
    pub fn eval(&self, bindings: &HashMap<String, f64>) -> Option<AmpMatrix> {
        match self {
            AmpScale::Uniform { scale } => Some(AmpMatrix::scale(scale.eval(bindings)?)),
            AmpScale::Matrix { matrix } => Some(AmpMatrix {
                v00: matrix[0].eval(bindings)?,
                v01: matrix[1].eval(bindings)?,
                v10: matrix[2].eval(bindings)?,
                v11: matrix[3].eval(bindings)?,
            }),
        }
    }
}

/// A concrete 2x2 IQ scaling matrix.
///
/// The calibrated waveform `(i, q)` is replaced by
/// `(v00*i + v01*q, v10*i + v11*q)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmpMatrix {
    pub v00: f64,
    pub v01: f64,
    pub v10: f64,
    pub v11: f64,
}

impl AmpMatrix {
    /// Uniform scaling of both quadratures.
    pub fn scale(factor: f64) -> Self {
        Self {
            v00: factor,
            v01: 0.0,
            v10: 0.0,
            v11: factor,
        }
    }

    /// Apply to one sample.
    pub fn apply(&self, i: f64, q: f64) -> (f64, f64) {
        (self.v00 * i + self.v01 * q, self.v10 * i + self.v11 * q)
    }
}

/// A single instruction of the program body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instr {
    /// Play a calibrated operation on an element.
    Play {
        element: String,
        operation: String,
        /// IQ amplitude scaling applied on top of the calibrated amplitude.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amp_scale: Option<AmpScale>,
        /// Stretch or truncate the pulse to this duration, ns.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ns: Option<Param>,
    },
    /// Rotate the element's frame by an angle in radians (virtual Z).
    FrameRotation { element: String, angle: Param },
    /// Reset the element's frame phase to zero.
    ResetPhase { element: String },
    /// Override the element's oscillator frequency, Hz.
    SetFrequency { element: String, hz: Param },
    /// Measure an element into a stream (demodulated I/Q).
    Measure {
        element: String,
        operation: String,
        stream: String,
    },
    /// Measure raw ADC samples into an ADC-trace stream.
    MeasureRaw {
        element: String,
        operation: String,
        stream: String,
    },
    /// Idle the listed elements for a duration, ns.
    Wait {
        elements: Vec<String>,
        duration_ns: Param,
    },
    /// Synchronize elements; an empty list aligns everything.
    Align { elements: Vec<String> },
    /// Step an element's DC offset, volts.
    SetDcOffset { element: String, volts: Param },
    /// Feedback-based ground-state reset of a qubit.
    ActiveReset { qubit: String },
    /// Passive reset: wait out the qubit's thermalization time.
    ThermalReset { qubit: String, duration_ns: u32 },
    /// Repeat the body once per axis value, binding the value to the axis
    /// name. Nested sweeps nest loops; the innermost sweep is the fastest
    /// axis of the streamed data.
    Sweep { axis: SweepAxis, body: Vec<Instr> },
}

/// A named sweep axis with its coordinate values.
///
/// The values double as the dataset coordinates once results come back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepAxis {
    pub name: String,
    pub values: Vec<f64>,
}

impl SweepAxis {
    /// Evenly spaced values including both endpoints.
    pub fn linspace(name: impl Into<String>, start: f64, stop: f64, num: usize) -> Self {
        let values = if num < 2 {
            vec![start]
        } else {
            let step = (stop - start) / (num - 1) as f64;
            (0..num).map(|i| start + step * i as f64).collect()
        };
        Self {
            name: name.into(),
            values,
        }
    }

    /// Half-open range `[start, stop)` with a fixed step.
    pub fn arange(name: impl Into<String>, start: f64, stop: f64, step: f64) -> Self {
        let mut values = Vec::new();
        let mut v = start;
        while (step > 0.0 && v < stop) || (step < 0.0 && v > stop) {
            values.push(v);
            v += step;
        }
        Self {
            name: name.into(),
            values,
        }
    }

    /// Explicit value list.
    pub fn list(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the axis carries no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn swept_program() -> Program {
        let mut program = Program::new("test", 100);
        program.streams.push(StreamDecl::scalar("state_q1"));
        program.body.push(Instr::Sweep {
            axis: SweepAxis::list("sequence", vec![0.0, 1.0]),
            body: vec![Instr::Sweep {
                axis: SweepAxis::arange("amp", -2.0, 2.0, 0.05),
                body: vec![
                    Instr::Play {
                        element: "q1.xy".into(),
                        operation: "x180".into(),
                        amp_scale: Some(AmpScale::q_scale(Param::axis("amp"))),
                        duration_ns: None,
                    },
                    Instr::Measure {
                        element: "q1.resonator".into(),
                        operation: "readout".into(),
                        stream: "state_q1".into(),
                    },
                ],
            }],
        });
        program.pipelines.push(Pipeline {
            source: "state_q1".into(),
            steps: vec![
                StreamOp::BooleanToInt,
                StreamOp::Buffer(80),
                StreamOp::Buffer(2),
                StreamOp::Average,
            ],
            save_as: "state1".into(),
        });
        program
    }

    #[test]
    fn test_sweep_axes_order() {
        let program = swept_program();
        let axes = program.sweep_axes();
        assert_eq!(axes.len(), 2);
        assert_eq!(axes[0].name, "sequence");
        assert_eq!(axes[1].name, "amp");
        assert_eq!(axes[1].len(), 80);
    }

    #[test]
    fn test_validate_accepts_matching_buffers() {
        assert!(swept_program().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_buffer_mismatch() {
        let mut program = swept_program();
        program.pipelines[0].steps[1] = StreamOp::Buffer(81);
        let err = program.validate().unwrap_err();
        assert!(matches!(err, SeqError::BufferMismatch { .. }));
    }

    #[test]
    fn test_validate_rejects_duplicate_save() {
        let mut program = swept_program();
        let dup = program.pipelines[0].clone();
        program.pipelines.push(dup);
        assert!(matches!(
            program.validate(),
            Err(SeqError::DuplicateSave(_))
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_stream() {
        let mut program = swept_program();
        program.pipelines[0].source = "nope".into();
        assert!(matches!(
            program.validate(),
            Err(SeqError::UnknownStream(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_axis() {
        let mut program = swept_program();
        program.body.push(Instr::Sweep {
            axis: SweepAxis::list("empty", vec![]),
            body: vec![],
        });
        assert!(matches!(program.validate(), Err(SeqError::EmptySweep(_))));
    }

    #[test]
    fn test_arange_excludes_stop() {
        let axis = SweepAxis::arange("a", 0.0, 1.0, 0.25);
        assert_eq!(axis.values, vec![0.0, 0.25, 0.5, 0.75]);
    }

    #[test]
    fn test_param_eval() {
        let mut bindings = HashMap::new();
        bindings.insert("t".to_string(), 100.0);
        bindings.insert("sign".to_string(), -1.0);

        assert_eq!(Param::value(3.0).eval(&bindings), Some(3.0));
        assert_eq!(Param::scaled("t", 4.0).eval(&bindings), Some(400.0));
        assert_eq!(Param::affine("t", 2.0, 5.0).eval(&bindings), Some(205.0));
        let phase = Param::Product {
            axes: vec!["sign".into(), "t".into()],
            factor: 0.01,
        };
        assert_eq!(phase.eval(&bindings), Some(-1.0));
        assert_eq!(Param::axis("missing").eval(&bindings), None);
    }

    #[test]
    fn test_amp_scale_eval() {
        let mut bindings = HashMap::new();
        bindings.insert("a".to_string(), 0.5);

        let m = AmpScale::q_scale(Param::axis("a")).eval(&bindings).unwrap();
        assert_eq!(m.apply(1.0, 1.0), (1.0, 0.5));

        let u = AmpScale::uniform(2.0).eval(&bindings).unwrap();
        assert_eq!(u.apply(0.5, -0.5), (1.0, -1.0));

        let i = AmpScale::i_scale(Param::axis("a")).eval(&bindings).unwrap();
        assert_eq!(i.apply(1.0, 1.0), (0.5, 1.0));
    }

    #[test]
    fn test_program_json_roundtrip() {
        let program = swept_program();
        let json = serde_json::to_string(&program).unwrap();
        let back: Program = serde_json::from_str(&json).unwrap();
        assert_eq!(back, program);
    }
}
