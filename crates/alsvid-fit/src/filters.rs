//! Trace filtering, edge detection and polynomial fitting.

use crate::error::{FitError, FitResult};

/// Centered moving average; the window shrinks at the edges.
pub fn moving_average(y: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 || y.is_empty() {
        return y.to_vec();
    }
    let half = window / 2;
    (0..y.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(y.len());
            y[lo..hi].iter().sum::<f64>() / (hi - lo) as f64
        })
        .collect()
}

/// First rising-edge index of a smoothed trace, aligned to the 4 ns clock.
///
/// The threshold is the midpoint between the head and tail means of the
/// trace: before the pulse arrives the trace sits at the noise floor, after
/// arrival it sits at the pulse level. Returns `None` when the trace never
/// crosses, i.e. no pulse was captured.
pub fn rising_edge_delay_ns(trace: &[f64], window: usize) -> Option<u32> {
    if trace.len() < 8 {
        return None;
    }
    let smoothed = moving_average(trace, window);
    let head = trace.len() / 8;
    let floor = smoothed[..head].iter().sum::<f64>() / head as f64;
    let level = smoothed[smoothed.len() - head..].iter().sum::<f64>() / head as f64;
    let threshold = (floor + level) / 2.0;
    if (level - floor).abs() < 1e-12 {
        return None;
    }

    let edge = smoothed.iter().position(|&v| v > threshold)?;
    // Round to the controller's 4 ns clock.
    Some(((edge as f64 / 4.0).round() * 4.0) as u32)
}

/// Least-squares polynomial fit, coefficients lowest order first.
///
/// Normal equations with Gaussian elimination; the degrees used here (at
/// most 2, for the DRAG intersection and the flux curvature) keep the
/// conditioning harmless.
pub fn polyfit(x: &[f64], y: &[f64], degree: usize) -> FitResult<Vec<f64>> {
    let n_params = degree + 1;
    if x.len() < n_params || x.len() != y.len() {
        return Err(FitError::TooFewPoints {
            got: x.len(),
            needed: n_params,
        });
    }

    let mut ata = vec![vec![0.0; n_params]; n_params];
    let mut atb = vec![0.0; n_params];
    for (&xv, &yv) in x.iter().zip(y) {
        let mut powers = vec![1.0; n_params];
        for k in 1..n_params {
            powers[k] = powers[k - 1] * xv;
        }
        for j in 0..n_params {
            atb[j] += powers[j] * yv;
            for k in 0..n_params {
                ata[j][k] += powers[j] * powers[k];
            }
        }
    }

    // Gaussian elimination with partial pivoting.
    for col in 0..n_params {
        let pivot = (col..n_params)
            .max_by(|&i, &j| ata[i][col].abs().total_cmp(&ata[j][col].abs()))
            .expect("non-empty");
        if ata[pivot][col].abs() < 1e-300 {
            return Err(FitError::Singular("polyfit"));
        }
        ata.swap(col, pivot);
        atb.swap(col, pivot);
        for row in (col + 1)..n_params {
            let factor = ata[row][col] / ata[col][col];
            for k in col..n_params {
                ata[row][k] -= factor * ata[col][k];
            }
            atb[row] -= factor * atb[col];
        }
    }
    let mut coeffs = vec![0.0; n_params];
    for row in (0..n_params).rev() {
        let mut sum = atb[row];
        for k in (row + 1)..n_params {
            sum -= ata[row][k] * coeffs[k];
        }
        coeffs[row] = sum / ata[row][row];
    }
    Ok(coeffs)
}

/// Evaluate a polynomial with coefficients lowest order first.
pub fn polyval(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

/// Intersection of two lines given as `(intercept, slope)` pairs.
///
/// `None` for parallel lines.
pub fn line_intersection(a: (f64, f64), b: (f64, f64)) -> Option<f64> {
    let slope_diff = a.1 - b.1;
    if slope_diff.abs() < 1e-300 {
        return None;
    }
    Some((b.0 - a.0) / slope_diff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moving_average_flattens_spike() {
        let mut y = vec![0.0; 21];
        y[10] = 1.0;
        let smoothed = moving_average(&y, 5);
        assert!((smoothed[10] - 0.2).abs() < 1e-12);
        assert!(smoothed[3] < 1e-12);
    }

    #[test]
    fn test_rising_edge_detects_step() {
        let mut trace = vec![0.01; 300];
        for v in trace.iter_mut().skip(130) {
            *v = 0.2;
        }
        let delay = rising_edge_delay_ns(&trace, 11).unwrap();
        assert_eq!(delay % 4, 0);
        assert!((128..=136).contains(&delay), "delay = {delay}");
    }

    #[test]
    fn test_rising_edge_flat_trace() {
        let trace = vec![0.05; 200];
        assert_eq!(rising_edge_delay_ns(&trace, 11), None);
    }

    #[test]
    fn test_polyfit_recovers_line() {
        let x: Vec<f64> = (0..20).map(|i| i as f64 * 0.1).collect();
        let y: Vec<f64> = x.iter().map(|&v| 0.3 - 1.7 * v).collect();
        let coeffs = polyfit(&x, &y, 1).unwrap();
        assert!((coeffs[0] - 0.3).abs() < 1e-9);
        assert!((coeffs[1] + 1.7).abs() < 1e-9);
    }

    #[test]
    fn test_polyfit_recovers_quadratic() {
        let x: Vec<f64> = (-10..=10).map(|i| i as f64 * 0.05).collect();
        let y: Vec<f64> = x.iter().map(|&v| 2.0 + 0.5 * v - 3.0 * v * v).collect();
        let coeffs = polyfit(&x, &y, 2).unwrap();
        assert!((coeffs[2] + 3.0).abs() < 1e-6);
        assert!((polyval(&coeffs, 0.3) - (2.0 + 0.15 - 0.27)).abs() < 1e-6);
    }

    #[test]
    fn test_line_intersection() {
        // y = 1 + x and y = 3 - x cross at x = 1.
        let x = line_intersection((1.0, 1.0), (3.0, -1.0)).unwrap();
        assert!((x - 1.0).abs() < 1e-12);
        assert!(line_intersection((0.0, 2.0), (1.0, 2.0)).is_none());
    }

    proptest::proptest! {
        #[test]
        fn prop_moving_average_stays_in_range(
            y in proptest::collection::vec(-1.0f64..1.0, 8..64),
            window in 1usize..9,
        ) {
            let smoothed = moving_average(&y, window);
            let min = y.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = y.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            for v in smoothed {
                proptest::prop_assert!(v >= min - 1e-12 && v <= max + 1e-12);
            }
        }

        #[test]
        fn prop_polyfit_interpolates_exact_lines(
            intercept in -5.0f64..5.0,
            slope in -5.0f64..5.0,
        ) {
            let x: Vec<f64> = (0..16).map(|i| i as f64 * 0.25).collect();
            let y: Vec<f64> = x.iter().map(|&v| intercept + slope * v).collect();
            let coeffs = polyfit(&x, &y, 1).unwrap();
            proptest::prop_assert!((coeffs[0] - intercept).abs() < 1e-6);
            proptest::prop_assert!((coeffs[1] - slope).abs() < 1e-6);
        }
    }
}
