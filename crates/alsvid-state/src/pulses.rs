//! Pulse operation records.
//!
//! These are the calibrated parameters stored per element operation
//! (`x180`, `x90`, `readout`, `const`, ...). Sampling the actual waveforms
//! from these records is the sequence crate's job; the state only carries
//! the numbers the fits update.

use serde::{Deserialize, Serialize};

/// A calibrated pulse operation attached to an element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PulseOp {
    /// DRAG-shaped drive pulse.
    Drag(DragPulse),
    /// Flat rectangular pulse (flux steps, saturation tones).
    Square(SquarePulse),
    /// Readout pulse with demodulation metadata.
    Readout(ReadoutPulse),
}

impl PulseOp {
    /// Pulse length in nanoseconds.
    pub fn length_ns(&self) -> u32 {
        match self {
            PulseOp::Drag(p) => p.length_ns,
            PulseOp::Square(p) => p.length_ns,
            PulseOp::Readout(p) => p.length_ns,
        }
    }

    /// Peak amplitude in volts.
    pub fn amplitude(&self) -> f64 {
        match self {
            PulseOp::Drag(p) => p.amplitude,
            PulseOp::Square(p) => p.amplitude,
            PulseOp::Readout(p) => p.amplitude,
        }
    }

    /// Borrow the DRAG parameters, if this is a drive pulse.
    pub fn as_drag(&self) -> Option<&DragPulse> {
        match self {
            PulseOp::Drag(p) => Some(p),
            _ => None,
        }
    }

    /// Mutably borrow the DRAG parameters, if this is a drive pulse.
    pub fn as_drag_mut(&mut self) -> Option<&mut DragPulse> {
        match self {
            PulseOp::Drag(p) => Some(p),
            _ => None,
        }
    }

    /// Borrow the readout parameters, if this is a readout pulse.
    pub fn as_readout(&self) -> Option<&ReadoutPulse> {
        match self {
            PulseOp::Readout(p) => Some(p),
            _ => None,
        }
    }

    /// Mutably borrow the readout parameters, if this is a readout pulse.
    pub fn as_readout_mut(&mut self) -> Option<&mut ReadoutPulse> {
        match self {
            PulseOp::Readout(p) => Some(p),
            _ => None,
        }
    }
}

/// DRAG pulse: Gaussian envelope with a scaled-derivative quadrature that
/// suppresses leakage to the second excited state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DragPulse {
    /// Peak amplitude in volts.
    pub amplitude: f64,
    /// Pulse length in nanoseconds.
    pub length_ns: u32,
    /// DRAG coefficient. The derivative quadrature is scaled by
    /// `alpha / anharmonicity`.
    pub alpha: f64,
    /// Qubit anharmonicity in Hz (negative for transmons).
    pub anharmonicity_hz: f64,
    /// Extra detuning applied as a phase ramp across the pulse, in Hz.
    #[serde(default)]
    pub detuning_hz: f64,
    /// Rotation axis in the equatorial plane, radians (0 = X, pi/2 = Y).
    #[serde(default)]
    pub axis_angle: f64,
}

/// Flat rectangular pulse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SquarePulse {
    /// Amplitude in volts.
    pub amplitude: f64,
    /// Pulse length in nanoseconds.
    pub length_ns: u32,
}

/// Readout pulse plus the demodulation parameters calibrated against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadoutPulse {
    /// Amplitude in volts.
    pub amplitude: f64,
    /// Pulse length in nanoseconds.
    pub length_ns: u32,
    /// IQ-plane rotation applied before thresholding, radians.
    #[serde(default)]
    pub rotation_angle: f64,
    /// Ground/excited discrimination threshold on the rotated I quadrature.
    #[serde(default)]
    pub threshold: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pulse_op_accessors() {
        let op = PulseOp::Drag(DragPulse {
            amplitude: 0.2,
            length_ns: 40,
            alpha: -1.0,
            anharmonicity_hz: -200e6,
            detuning_hz: 0.0,
            axis_angle: 0.0,
        });
        assert_eq!(op.length_ns(), 40);
        assert!((op.amplitude() - 0.2).abs() < 1e-12);
        assert!(op.as_drag().is_some());
        assert!(op.as_readout().is_none());
    }

    #[test]
    fn test_pulse_op_json_tagging() {
        let op = PulseOp::Square(SquarePulse {
            amplitude: 0.1,
            length_ns: 100,
        });
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"kind\":\"square\""));
        let back: PulseOp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }
}
