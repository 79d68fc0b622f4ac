//! Waveform sampling.
//!
//! Pulse operations stored in the device state are parameter records; this
//! module turns them into I/Q sample vectors at the controller rate (1 GS/s).
//! The simulator renders programs through these samples and the controller
//! configuration carries their lengths.

use ndarray::Array1;
use std::f64::consts::PI;

use alsvid_state::{DragPulse, PulseOp, SAMPLE_RATE_HZ};

use crate::program::AmpMatrix;

/// Sampled I/Q envelope of one pulse.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub i: Array1<f64>,
    pub q: Array1<f64>,
}

impl Waveform {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.i.len()
    }

    /// True for zero-length waveforms.
    pub fn is_empty(&self) -> bool {
        self.i.is_empty()
    }

    /// Apply an IQ scaling matrix sample by sample.
    pub fn scaled(&self, m: &AmpMatrix) -> Waveform {
        let mut i = Array1::zeros(self.len());
        let mut q = Array1::zeros(self.len());
        for idx in 0..self.len() {
            let (si, sq) = m.apply(self.i[idx], self.q[idx]);
            i[idx] = si;
            q[idx] = sq;
        }
        Waveform { i, q }
    }
}

/// Sample a pulse operation at the controller rate.
///
/// `duration_ns` overrides the calibrated length (square pulses stretch,
/// shaped pulses truncate or zero-pad).
pub fn sample(op: &PulseOp, duration_ns: Option<u32>) -> Waveform {
    let length_ns = duration_ns.unwrap_or_else(|| op.length_ns());
    let n = (length_ns as f64 * SAMPLE_RATE_HZ / 1e9) as usize;
    match op {
        PulseOp::Drag(p) => sample_drag(p, n),
        PulseOp::Square(p) => constant(p.amplitude, n),
        PulseOp::Readout(p) => constant(p.amplitude, n),
    }
}

fn constant(amplitude: f64, n: usize) -> Waveform {
    Waveform {
        i: Array1::from_elem(n, amplitude),
        q: Array1::zeros(n),
    }
}

/// Gaussian envelope with a scaled-derivative quadrature.
///
/// The derivative quadrature is scaled by `alpha / (2 pi anharmonicity)`;
/// a nonzero detuning is applied as a phase ramp across the pulse.
fn sample_drag(p: &DragPulse, n: usize) -> Waveform {
    let mut i = Array1::zeros(n);
    let mut q = Array1::zeros(n);
    if n == 0 {
        return Waveform { i, q };
    }

    let center = (n as f64 - 1.0) / 2.0;
    let sigma = n as f64 / 5.0;
    let dt = 1.0 / SAMPLE_RATE_HZ;
    let (axis_cos, axis_sin) = (p.axis_angle.cos(), p.axis_angle.sin());

    for k in 0..n {
        let t = k as f64 - center;
        let gauss = p.amplitude * (-t * t / (2.0 * sigma * sigma)).exp();
        let deriv = -t / (sigma * sigma) * gauss * SAMPLE_RATE_HZ;
        let envelope_i = gauss;
        let envelope_q = if p.anharmonicity_hz != 0.0 {
            p.alpha * deriv / (2.0 * PI * p.anharmonicity_hz)
        } else {
            0.0
        };

        // Detuning phase ramp, then rotation into the requested axis.
        let phase = 2.0 * PI * p.detuning_hz * (k as f64) * dt;
        let (c, s) = (phase.cos(), phase.sin());
        let ri = envelope_i * c - envelope_q * s;
        let rq = envelope_i * s + envelope_q * c;
        i[k] = ri * axis_cos - rq * axis_sin;
        q[k] = ri * axis_sin + rq * axis_cos;
    }
    Waveform { i, q }
}
