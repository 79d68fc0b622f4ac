//! Physical model library.
//!
//! Pure evaluation functions plus [`Model`] wrappers bundling parameter
//! names and guess heuristics for the batch fitter. Parameters follow the
//! conventions of the analysis code that consumes them: decays are rates in
//! inverse x-units (negative for decaying signals), frequencies are in
//! inverse x-units.

use std::f64::consts::PI;

use crate::guess;

/// `a * exp(t * decay) + offset`
pub fn decay_exp(t: f64, a: f64, offset: f64, decay: f64) -> f64 {
    a * (t * decay).exp() + offset
}

/// `a * cos(2 pi f t + phi) * exp(t * decay) + offset`
pub fn oscillation_decay_exp(t: f64, a: f64, f: f64, phi: f64, offset: f64, decay: f64) -> f64 {
    a * (2.0 * PI * f * t + phi).cos() * (t * decay).exp() + offset
}

/// `a * exp(-t * decay - (t * decay_echo)^2) + offset`
pub fn echo_decay_exp(t: f64, a: f64, offset: f64, decay: f64, decay_echo: f64) -> f64 {
    a * (-t * decay - (t * decay_echo).powi(2)).exp() + offset
}

/// `a * p^m + b` — randomized-benchmarking survival probability.
pub fn power_law(m: f64, a: f64, b: f64, p: f64) -> f64 {
    a * p.powf(m) + b
}

/// Lorentzian peak on a flat background.
pub fn lorentzian(x: f64, amplitude: f64, center: f64, width: f64, offset: f64) -> f64 {
    let half = width / 2.0;
    offset + amplitude * half * half / ((x - center).powi(2) + half * half)
}

/// Two-qubit chevron: excitation exchange vs detuning and interaction time.
///
/// `offset + a * sin^2(2 pi sqrt(4 J^2 + (f - f0)^2) * t) * exp(-tau |f - f0|)`
/// with `x = [f, t]` (detuning in Hz, time in seconds).
pub fn rabi_chevron(f: f64, t: f64, j: f64, f0: f64, a: f64, offset: f64, tau: f64) -> f64 {
    let rabi = (4.0 * j * j + (f - f0).powi(2)).sqrt();
    offset + a * (2.0 * PI * rabi * t).sin().powi(2) * (-tau * (f - f0).abs()).exp()
}

/// A fittable model: evaluation, parameter names, initial guess.
pub trait Model: Sync {
    /// Parameter names, in the order the solver sees them.
    fn param_names(&self) -> &'static [&'static str];

    /// Evaluate at one point. `x` carries one value per model dimension.
    fn eval(&self, params: &[f64], x: &[f64]) -> f64;

    /// Initial parameter guess from the data.
    fn guess(&self, xs: &[Vec<f64>], y: &[f64]) -> Vec<f64>;
}

/// Exponential decay toward an offset.
pub struct DecayExp;

impl Model for DecayExp {
    fn param_names(&self) -> &'static [&'static str] {
        &["a", "offset", "decay"]
    }

    fn eval(&self, p: &[f64], x: &[f64]) -> f64 {
        decay_exp(x[0], p[0], p[1], p[2])
    }

    fn guess(&self, xs: &[Vec<f64>], y: &[f64]) -> Vec<f64> {
        let x: Vec<f64> = xs.iter().map(|v| v[0]).collect();
        let offset = guess::tail_mean(y);
        let a = y.first().copied().unwrap_or(1.0) - offset;
        let decay = guess::log_linear_decay(&x, y, offset);
        vec![a, offset, decay]
    }
}

/// Decaying oscillation.
pub struct OscillationDecayExp;

impl Model for OscillationDecayExp {
    fn param_names(&self) -> &'static [&'static str] {
        &["a", "f", "phi", "offset", "decay"]
    }

    fn eval(&self, p: &[f64], x: &[f64]) -> f64 {
        oscillation_decay_exp(x[0], p[0], p[1], p[2], p[3], p[4])
    }

    fn guess(&self, xs: &[Vec<f64>], y: &[f64]) -> Vec<f64> {
        let x: Vec<f64> = xs.iter().map(|v| v[0]).collect();
        let offset = y.iter().sum::<f64>() / y.len().max(1) as f64;
        let (min, max) = guess::min_max(y);
        let a = (max - min) / 2.0;
        let f = guess::dominant_frequency(&x, y);
        let decay = guess::log_linear_decay(&x, y, offset);
        vec![a, f, 0.0, offset, decay]
    }
}

/// Hahn-echo decay with a Gaussian component.
pub struct EchoDecayExp;

impl Model for EchoDecayExp {
    fn param_names(&self) -> &'static [&'static str] {
        &["a", "offset", "decay", "decay_echo"]
    }

    fn eval(&self, p: &[f64], x: &[f64]) -> f64 {
        echo_decay_exp(x[0], p[0], p[1], p[2], p[3])
    }

    fn guess(&self, xs: &[Vec<f64>], y: &[f64]) -> Vec<f64> {
        let x: Vec<f64> = xs.iter().map(|v| v[0]).collect();
        let offset = guess::tail_mean(y);
        let a = y.first().copied().unwrap_or(1.0) - offset;
        // The Gaussian term dominates; seed it from the half-decay point
        // and let the solver pick up the exponential remainder from zero.
        let decay_echo = guess::half_crossing(&x, y, offset, a)
            .map(|t| 2.0_f64.ln().sqrt() / t)
            .unwrap_or_else(|| {
                let span = x.last().copied().unwrap_or(1.0) - x.first().copied().unwrap_or(0.0);
                if span.abs() > 0.0 { 1.0 / span } else { 1.0 }
            });
        vec![a, offset, 0.0, decay_echo]
    }
}

/// Randomized-benchmarking power law.
pub struct PowerLaw;

impl Model for PowerLaw {
    fn param_names(&self) -> &'static [&'static str] {
        &["a", "b", "p"]
    }

    fn eval(&self, p: &[f64], x: &[f64]) -> f64 {
        power_law(x[0], p[0], p[1], p[2])
    }

    fn guess(&self, xs: &[Vec<f64>], y: &[f64]) -> Vec<f64> {
        // Single-qubit baseline is the 0.5 random-guess floor.
        let b = 0.5;
        let x: Vec<f64> = xs.iter().map(|v| v[0]).collect();
        let decay = guess::log_linear_decay(&x, y, b);
        let p = decay.exp().clamp(0.0, 1.0);
        let a = (y.first().copied().unwrap_or(1.0) - b).clamp(0.0, 1.0);
        vec![a, b, p]
    }
}

/// Lorentzian spectroscopy peak.
pub struct Lorentzian;

impl Model for Lorentzian {
    fn param_names(&self) -> &'static [&'static str] {
        &["amplitude", "center", "width", "offset"]
    }

    fn eval(&self, p: &[f64], x: &[f64]) -> f64 {
        lorentzian(x[0], p[0], p[1], p[2], p[3])
    }

    fn guess(&self, xs: &[Vec<f64>], y: &[f64]) -> Vec<f64> {
        let x: Vec<f64> = xs.iter().map(|v| v[0]).collect();
        let (amplitude, center, width, offset) = guess::peak(&x, y);
        vec![amplitude, center, width, offset]
    }
}

/// Two-dimensional chevron over `[detuning, time]` points.
pub struct RabiChevron {
    /// Initial gate-time estimate, seconds.
    pub init_time_s: f64,
    /// Initial detuning estimate, Hz.
    pub init_detuning_hz: f64,
}

impl Model for RabiChevron {
    fn param_names(&self) -> &'static [&'static str] {
        &["j", "f0", "a", "offset", "tau"]
    }

    fn eval(&self, p: &[f64], x: &[f64]) -> f64 {
        rabi_chevron(x[0], x[1], p[0], p[1], p[2], p[3], p[4])
    }

    fn guess(&self, _xs: &[Vec<f64>], _y: &[f64]) -> Vec<f64> {
        // Half a period of exchange at resonance over the initial time.
        vec![
            1.0 / self.init_time_s / 2.0,
            self.init_detuning_hz,
            -1.0,
            1.0,
            100e-9,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decay_exp_limits() {
        // decay < 0 relaxes toward the offset.
        assert!((decay_exp(0.0, 0.4, 0.1, -0.01) - 0.5).abs() < 1e-12);
        assert!((decay_exp(1e4, 0.4, 0.1, -0.01) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_oscillation_periodicity() {
        let f = 0.125;
        let y0 = oscillation_decay_exp(0.0, 1.0, f, 0.0, 0.0, 0.0);
        let y1 = oscillation_decay_exp(8.0, 1.0, f, 0.0, 0.0, 0.0);
        assert!((y0 - y1).abs() < 1e-12);
    }

    #[test]
    fn test_lorentzian_peak_value() {
        let y = lorentzian(5.0, 2.0, 5.0, 1.0, 0.25);
        assert!((y - 2.25).abs() < 1e-12);
        // Half maximum at center +- width/2.
        let half = lorentzian(5.5, 2.0, 5.0, 1.0, 0.25);
        assert!((half - 1.25).abs() < 1e-12);
    }

    #[test]
    fn test_chevron_resonance() {
        // On resonance, oscillation at 2J with full contrast.
        let j = 5e6;
        let t = 1.0 / (4.0 * 2.0 * j);
        let y = rabi_chevron(0.0, t, j, 0.0, -1.0, 1.0, 100e-9);
        assert!(y < 0.6);
    }

    #[test]
    fn test_power_law_monotonic() {
        let a = power_law(1.0, 0.5, 0.5, 0.99);
        let b = power_law(100.0, 0.5, 0.5, 0.99);
        assert!(b < a);
    }
}
