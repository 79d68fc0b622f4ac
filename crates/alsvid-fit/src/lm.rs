//! Damped least-squares (Levenberg–Marquardt) fitting.
//!
//! A forward-difference Jacobian, a multiplicative damping schedule and
//! convergence on the relative chi-square change. Failure to converge is an
//! error value for the caller to handle; the analysis code treats it as a
//! per-qubit outcome, never a panic.

use ndarray::{ArrayD, Axis};
use tracing::debug;

use crate::dataset::Dataset;
use crate::error::{FitError, FitResult};
use crate::models::Model;

/// Solver options.
#[derive(Debug, Clone)]
pub struct LmOptions {
    /// Iteration budget.
    pub max_iter: usize,
    /// Relative chi-square change declaring convergence.
    pub tol: f64,
    /// Initial damping factor.
    pub lambda: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iter: 200,
            tol: 1e-9,
            lambda: 1e-3,
        }
    }
}

/// Fitted parameters with their residual.
#[derive(Debug, Clone)]
pub struct Fit {
    pub params: Vec<f64>,
    pub chi2: f64,
    pub iterations: usize,
}

/// Fit a model to `(xs, y)` points starting from `p0`.
pub fn lm_fit(
    model: &dyn Model,
    xs: &[Vec<f64>],
    y: &[f64],
    p0: &[f64],
    opts: &LmOptions,
) -> FitResult<Fit> {
    let n_params = p0.len();
    if y.len() < n_params {
        return Err(FitError::TooFewPoints {
            got: y.len(),
            needed: n_params,
        });
    }

    let chi2_of = |p: &[f64]| -> f64 {
        xs.iter()
            .zip(y)
            .map(|(x, &yv)| {
                let r = yv - model.eval(p, x);
                r * r
            })
            .sum()
    };

    let mut params = p0.to_vec();
    let mut chi2 = chi2_of(&params);
    let mut lambda = opts.lambda;

    for iteration in 0..opts.max_iter {
        // Forward-difference Jacobian and residuals.
        let mut jtj = vec![vec![0.0; n_params]; n_params];
        let mut jtr = vec![0.0; n_params];
        let steps: Vec<f64> = params
            .iter()
            .map(|p| 1e-8 * p.abs().max(1.0))
            .collect();

        for (x, &yv) in xs.iter().zip(y) {
            let f0 = model.eval(&params, x);
            let r = yv - f0;
            let mut grad = vec![0.0; n_params];
            for j in 0..n_params {
                let mut shifted = params.clone();
                shifted[j] += steps[j];
                grad[j] = (model.eval(&shifted, x) - f0) / steps[j];
            }
            for j in 0..n_params {
                jtr[j] += grad[j] * r;
                for k in 0..n_params {
                    jtj[j][k] += grad[j] * grad[k];
                }
            }
        }

        // Damped step, retried with increasing damping until chi2 drops.
        let mut accepted = false;
        for _ in 0..16 {
            let mut damped = jtj.clone();
            for (j, row) in damped.iter_mut().enumerate() {
                row[j] += lambda * jtj[j][j].max(1e-12);
            }
            let Ok(delta) = solve(damped, jtr.clone()) else {
                lambda *= 10.0;
                continue;
            };
            let trial: Vec<f64> = params.iter().zip(&delta).map(|(p, d)| p + d).collect();
            let trial_chi2 = chi2_of(&trial);
            if trial_chi2.is_finite() && trial_chi2 < chi2 {
                let improvement = (chi2 - trial_chi2) / chi2.max(1e-300);
                params = trial;
                chi2 = trial_chi2;
                lambda = (lambda / 10.0).max(1e-12);
                accepted = true;
                if chi2 < 1e-20 || improvement < opts.tol {
                    return Ok(Fit {
                        params,
                        chi2,
                        iterations: iteration + 1,
                    });
                }
                break;
            }
            lambda *= 10.0;
        }

        if !accepted {
            // Damping saturated: the current point is a (local) optimum.
            debug!(iteration, chi2, "damping saturated, accepting optimum");
            return Ok(Fit {
                params,
                chi2,
                iterations: iteration + 1,
            });
        }
    }

    Err(FitError::NoConvergence(opts.max_iter))
}

/// Fit a model with its own guess heuristic.
pub fn fit_model(model: &dyn Model, xs: &[Vec<f64>], y: &[f64]) -> FitResult<Fit> {
    let p0 = model.guess(xs, y);
    lm_fit(model, xs, y, &p0, &LmOptions::default())
}

/// Fit a 1-D model along one dimension of a dataset variable.
///
/// Runs one fit per index combination of the remaining dimensions and
/// returns a dataset over those dimensions with one variable per model
/// parameter plus a `chi2` variable. Individual fit failures surface as
/// NaN entries, mirroring how the analysis treats unfittable rows.
pub fn fit_along(ds: &Dataset, var: &str, dim: &str, model: &dyn Model) -> FitResult<Dataset> {
    let array = ds.var(var)?;
    let axis = ds
        .dims()
        .iter()
        .position(|d| d == dim)
        .ok_or_else(|| FitError::UnknownDim(dim.to_string()))?;
    let x = ds.coord_values(dim)?.to_vec();
    let xs: Vec<Vec<f64>> = x.iter().map(|&v| vec![v]).collect();

    let remaining: Vec<(String, crate::dataset::Coord)> = ds
        .dims()
        .iter()
        .filter(|d| *d != dim)
        .map(|d| (d.clone(), ds.coord(d).expect("own dim").clone()))
        .collect();
    let out_shape: Vec<usize> = remaining.iter().map(|(_, c)| c.len()).collect();
    let mut out = Dataset::new(remaining);

    let names = model.param_names();
    let lanes: Vec<Vec<f64>> = array
        .lanes(Axis(axis))
        .into_iter()
        .map(|lane| lane.to_vec())
        .collect();

    let mut param_data: Vec<Vec<f64>> = vec![Vec::with_capacity(lanes.len()); names.len()];
    let mut chi2_data = Vec::with_capacity(lanes.len());
    for y in &lanes {
        match fit_model(model, &xs, y) {
            Ok(fit) => {
                for (j, value) in fit.params.iter().enumerate() {
                    param_data[j].push(*value);
                }
                chi2_data.push(fit.chi2);
            }
            Err(e) => {
                debug!(var, dim, error = %e, "lane fit failed");
                for data in &mut param_data {
                    data.push(f64::NAN);
                }
                chi2_data.push(f64::NAN);
            }
        }
    }

    let shape = if out_shape.is_empty() {
        vec![1]
    } else {
        out_shape
    };
    for (j, name) in names.iter().enumerate() {
        let data = std::mem::take(&mut param_data[j]);
        out.insert_var(
            *name,
            ArrayD::from_shape_vec(shape.clone(), data).expect("lane count"),
        );
    }
    out.insert_var(
        "chi2",
        ArrayD::from_shape_vec(shape, chi2_data).expect("lane count"),
    );
    Ok(out)
}

/// Solve a small dense linear system by Gaussian elimination.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> FitResult<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .expect("non-empty");
        if a[pivot][col].abs() < 1e-300 {
            return Err(FitError::Singular("normal equations"));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut sum = b[row];
        for k in (row + 1)..n {
            sum -= a[row][k] * x[k];
        }
        x[row] = sum / a[row][row];
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Coord, Dataset};
    use crate::models::{
        DecayExp, Lorentzian, OscillationDecayExp, PowerLaw, decay_exp, lorentzian,
        oscillation_decay_exp, power_law,
    };

    fn points(x: &[f64]) -> Vec<Vec<f64>> {
        x.iter().map(|&v| vec![v]).collect()
    }

    #[test]
    fn test_fit_decay_exp() {
        let x: Vec<f64> = (0..80).map(|i| i as f64 * 0.5).collect();
        let y: Vec<f64> = x.iter().map(|&t| decay_exp(t, 0.4, 0.1, -0.08)).collect();
        let fit = fit_model(&DecayExp, &points(&x), &y).unwrap();
        assert!((fit.params[0] - 0.4).abs() < 1e-4, "a = {}", fit.params[0]);
        assert!((fit.params[1] - 0.1).abs() < 1e-4);
        assert!((fit.params[2] + 0.08).abs() < 1e-4);
    }

    #[test]
    fn test_fit_oscillation_decay() {
        let x: Vec<f64> = (0..200).map(|i| i as f64).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|&t| oscillation_decay_exp(t, 0.3, 0.021, 0.4, 0.5, -0.005))
            .collect();
        let fit = fit_model(&OscillationDecayExp, &points(&x), &y).unwrap();
        assert!((fit.params[1] - 0.021).abs() < 5e-4, "f = {}", fit.params[1]);
        assert!((fit.params[3] - 0.5).abs() < 1e-2);
    }

    #[test]
    fn test_fit_echo_decay() {
        let x: Vec<f64> = (0..20).map(|i| 16.0 + i as f64 * 200.0).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|&t| crate::models::echo_decay_exp(t, 0.45, 0.5, 1e-6, 5e-4))
            .collect();
        let fit = fit_model(&crate::models::EchoDecayExp, &points(&x), &y).unwrap();
        assert!(
            (fit.params[3].abs() - 5e-4).abs() < 1e-5,
            "decay_echo = {}",
            fit.params[3]
        );
    }

    #[test]
    fn test_fit_power_law() {
        let depths: Vec<f64> = [0.0, 20.0, 40.0, 80.0, 160.0, 320.0, 640.0].to_vec();
        let y: Vec<f64> = depths
            .iter()
            .map(|&m| power_law(m, 0.45, 0.5, 0.995))
            .collect();
        let fit = fit_model(&PowerLaw, &points(&depths), &y).unwrap();
        assert!((fit.params[2] - 0.995).abs() < 1e-3, "p = {}", fit.params[2]);
    }

    #[test]
    fn test_fit_lorentzian_dip() {
        let x: Vec<f64> = (0..201).map(|i| -50.0 + i as f64 * 0.5).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|&v| lorentzian(v, -0.6, 12.0, 8.0, 0.9))
            .collect();
        let fit = fit_model(&Lorentzian, &points(&x), &y).unwrap();
        assert!((fit.params[1] - 12.0).abs() < 0.1, "center = {}", fit.params[1]);
    }

    #[test]
    fn test_fit_with_noise_converges_close() {
        let x: Vec<f64> = (0..100).map(|i| i as f64).collect();
        // Deterministic pseudo-noise.
        let y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, &t)| {
                decay_exp(t, 0.4, 0.1, -0.05) + 0.005 * ((i * 37 % 17) as f64 / 17.0 - 0.5)
            })
            .collect();
        let fit = fit_model(&DecayExp, &points(&x), &y).unwrap();
        assert!((fit.params[2] + 0.05).abs() < 5e-3);
    }

    #[test]
    fn test_too_few_points() {
        let err = fit_model(&DecayExp, &points(&[1.0, 2.0]), &[0.5, 0.4]).unwrap_err();
        assert!(matches!(err, FitError::TooFewPoints { .. }));
    }

    #[test]
    fn test_fit_along_per_qubit() {
        let x: Vec<f64> = (0..60).map(|i| i as f64).collect();
        let decays = [-0.05, -0.02];
        let mut data = Vec::new();
        for decay in decays {
            for &t in &x {
                data.push(decay_exp(t, 0.4, 0.1, decay));
            }
        }
        let mut ds = Dataset::new(vec![
            (
                "qubit".to_string(),
                Coord::Labels(vec!["q1".into(), "q2".into()]),
            ),
            ("idle_time".to_string(), Coord::Values(x)),
        ]);
        ds.insert_var(
            "state",
            ArrayD::from_shape_vec(vec![2, 60], data).unwrap(),
        );

        let fitted = fit_along(&ds, "state", "idle_time", &DecayExp).unwrap();
        assert_eq!(fitted.dims(), &["qubit"]);
        let decay = fitted.var("decay").unwrap();
        assert!((decay[[0]] + 0.05).abs() < 1e-3);
        assert!((decay[[1]] + 0.02).abs() < 1e-3);
    }
}
