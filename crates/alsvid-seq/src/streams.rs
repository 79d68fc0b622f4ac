//! Measurement streams and their processing pipelines.
//!
//! A measurement instruction feeds a declared stream; a [`Pipeline`] then
//! describes how the backend folds the raw stream into the named array the
//! client fetches. The buffer chain determines the fetched shape: each
//! `Buffer(n)` gathers `n` consecutive values into a new innermost axis, so
//! the last buffer of the chain becomes the outermost axis of the result.

use serde::{Deserialize, Serialize};

/// What a stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// One scalar per measurement (demodulated quadrature or state bit).
    Scalar,
    /// Raw ADC trace, one sample per nanosecond of the readout window.
    AdcTrace,
}

/// A declared measurement stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDecl {
    pub name: String,
    pub kind: StreamKind,
}

impl StreamDecl {
    /// Declare a scalar stream.
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: StreamKind::Scalar,
        }
    }

    /// Declare a raw ADC-trace stream.
    pub fn adc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: StreamKind::AdcTrace,
        }
    }
}

/// One processing step of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StreamOp {
    /// Gather this many consecutive values into a new innermost axis.
    Buffer(usize),
    /// Average over the averaging (shots) axis.
    Average,
    /// Map state booleans to 0/1 integers.
    BooleanToInt,
    /// Keep only the first ADC input of a trace stream.
    Input1,
    /// Keep only the second ADC input of a trace stream.
    Input2,
    /// Save only the last value instead of the full history.
    SaveLast,
}

/// A stream-processing pipeline ending in a named save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Declared stream this pipeline reads.
    pub source: String,
    /// Processing steps, applied in order.
    pub steps: Vec<StreamOp>,
    /// Name the result is fetched under.
    pub save_as: String,
}

impl Pipeline {
    /// Convenience constructor.
    pub fn new(source: impl Into<String>, steps: Vec<StreamOp>, save_as: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            steps,
            save_as: save_as.into(),
        }
    }

    /// Shape of the fetched array, outermost axis first.
    ///
    /// Only the buffer chain contributes; averaging folds the shots axis
    /// away and `SaveLast` drops the history axis.
    pub fn shape(&self) -> Vec<usize> {
        self.steps
            .iter()
            .rev()
            .filter_map(|s| match s {
                StreamOp::Buffer(n) => Some(*n),
                _ => None,
            })
            .collect()
    }

    /// Whether this pipeline averages over shots.
    pub fn is_averaged(&self) -> bool {
        self.steps.contains(&StreamOp::Average)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_shape_outermost_first() {
        let p = Pipeline::new(
            "state_q1",
            vec![
                StreamOp::BooleanToInt,
                StreamOp::Buffer(80),
                StreamOp::Buffer(2),
                StreamOp::Average,
            ],
            "state1",
        );
        assert_eq!(p.shape(), vec![2, 80]);
        assert!(p.is_averaged());
    }

    #[test]
    fn test_pipeline_shape_scalar() {
        let p = Pipeline::new("n", vec![StreamOp::SaveLast], "n");
        assert!(p.shape().is_empty());
        assert!(!p.is_averaged());
    }

    #[test]
    fn test_stream_decl_json() {
        let decl = StreamDecl::adc("adc_q1");
        let json = serde_json::to_string(&decl).unwrap();
        assert!(json.contains("adc_trace"));
    }
}
