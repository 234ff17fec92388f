// src/power_fit.rs

use crate::error::{Result, TransformError};
use crate::linalg_backends::{BackendSVD, LinAlgBackendProvider};
use log::{debug, info, trace};
use ndarray::{arr1, arr2, s, Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// Number of parameters in `amp * x^exponent`.
const NUM_PARAMETERS: usize = 2;

/// `y = amplitude * x^exponent`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerLaw {
    pub amplitude: f64,
    pub exponent: f64,
}

impl PowerLaw {
    pub fn evaluate(&self, x: f64) -> f64 {
        self.amplitude * x.powf(self.exponent)
    }
}

/// A converged least-squares fit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PowerLawFit {
    pub law: PowerLaw,
    /// Function evaluations spent, counted the way the iteration cap is.
    pub iterations: usize,
    /// Residual sum of squares at the returned parameters.
    pub cost: f64,
}

/// Elbow search result for a rotated eigenvalue spectrum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ComponentCountEstimate {
    pub n_components: usize,
    /// Grid abscissa closest to the origin.
    pub elbow_x: f64,
    pub elbow_y: f64,
    pub fit: PowerLawFit,
}

/// Parameters for the power-law fit and the elbow grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerFitConfig {
    /// Only the leading eigenvalues are fitted; the low-magnitude tail would
    /// otherwise dominate the fit.
    pub max_eigenvalues: usize,
    pub grid_start: f64,
    pub grid_end: f64,
    pub grid_points: usize,
    /// Cap on Levenberg-Marquardt function evaluations.
    pub max_iterations: usize,
    /// Starting Marquardt damping factor.
    pub initial_damping: f64,
    /// Relative reduction of the residual sum of squares that counts as converged.
    pub cost_tolerance: f64,
    /// Relative parameter step that counts as converged.
    pub parameter_tolerance: f64,
}

impl Default for PowerFitConfig {
    fn default() -> Self {
        PowerFitConfig {
            max_eigenvalues: 50,
            grid_start: 1.0,
            grid_end: 50.0,
            grid_points: 1000,
            max_iterations: 200 * (NUM_PARAMETERS + 1),
            initial_damping: 1e-3,
            cost_tolerance: 1.49012e-8,
            parameter_tolerance: 1.49012e-8,
        }
    }
}

impl PowerFitConfig {
    fn validate(&self) -> Result<()> {
        if self.max_eigenvalues == 0 {
            return Err(TransformError::InvalidInput("max_eigenvalues must be at least 1".to_string()));
        }
        if self.grid_points == 0 {
            return Err(TransformError::InvalidInput("elbow grid needs at least one point".to_string()));
        }
        if !(self.grid_start.is_finite() && self.grid_end.is_finite() && self.grid_start <= self.grid_end) {
            return Err(TransformError::InvalidInput(format!(
                "elbow grid bounds must be finite and ordered, got [{}, {}]",
                self.grid_start, self.grid_end
            )));
        }
        if !(self.initial_damping.is_finite() && self.initial_damping > 0.0) {
            return Err(TransformError::InvalidInput(format!(
                "initial damping must be positive, got {}",
                self.initial_damping
            )));
        }
        if !(self.cost_tolerance >= 0.0 && self.parameter_tolerance >= 0.0) {
            return Err(TransformError::InvalidInput(
                "convergence tolerances must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

fn sum_of_squared_residuals(law: &PowerLaw, x: &ArrayView1<f64>, y: &ArrayView1<f64>) -> f64 {
    x.iter()
        .zip(y.iter())
        .map(|(&xi, &yi)| {
            let residual = law.evaluate(xi) - yi;
            residual * residual
        })
        .sum()
}

/// Start point for the iteration: a straight-line fit in log-log space when
/// every target is positive, otherwise amplitude = exponent = 1.
fn initial_guess(x: &ArrayView1<f64>, y: &ArrayView1<f64>) -> PowerLaw {
    let fallback = PowerLaw { amplitude: 1.0, exponent: 1.0 };
    if y.iter().any(|&v| v <= 0.0) {
        return fallback;
    }
    let n = x.len() as f64;
    let log_x = x.mapv(f64::ln);
    let log_y = y.mapv(f64::ln);
    let mean_log_x = log_x.sum() / n;
    let mean_log_y = log_y.sum() / n;
    let centered_x = log_x.mapv(|v| v - mean_log_x);
    let spread = centered_x.dot(&centered_x);
    if spread <= 0.0 {
        return fallback;
    }
    let exponent = centered_x.dot(&log_y.mapv(|v| v - mean_log_y)) / spread;
    let amplitude = (mean_log_y - exponent * mean_log_x).exp();
    if amplitude.is_finite() && exponent.is_finite() {
        PowerLaw { amplitude, exponent }
    } else {
        fallback
    }
}

/// Solves the 2x2 damped normal equations through the SVD backend,
/// discarding singular values that are negligible relative to the largest.
fn solve_damped_step<B: BackendSVD<f64>>(
    backend: &B,
    system: Array2<f64>,
    rhs: &Array1<f64>,
) -> Result<Array1<f64>> {
    let svd = backend
        .svd_into(system, true, true)
        .map_err(|e| TransformError::linalg("Levenberg-Marquardt step", e))?;
    let (u, vt) = match (svd.u, svd.vt) {
        (Some(u), Some(vt)) => (u, vt),
        _ => {
            return Err(TransformError::linalg(
                "Levenberg-Marquardt step",
                "backend did not return singular vectors".into(),
            ))
        }
    };
    let largest = svd.s.iter().cloned().fold(0.0_f64, f64::max);
    let cutoff = largest * f64::EPSILON * NUM_PARAMETERS as f64;
    let projected = u.t().dot(rhs);
    let scaled = Array1::from_shape_fn(projected.len(), |i| {
        if svd.s[i] > cutoff {
            projected[i] / svd.s[i]
        } else {
            0.0
        }
    });
    Ok(vt.t().dot(&scaled))
}

/// Fits `y = amplitude * x^exponent` by Levenberg-Marquardt least squares.
///
/// All `x` must be strictly positive. Fails with
/// [`TransformError::FitDidNotConverge`] when neither tolerance is met within
/// `config.max_iterations` function evaluations, and with
/// [`TransformError::FitDiverged`] when the cost or parameters stop being finite.
pub fn fit_power_law(x: &ArrayView1<f64>, y: &ArrayView1<f64>, config: &PowerFitConfig) -> Result<PowerLawFit> {
    config.validate()?;
    if x.len() != y.len() {
        return Err(TransformError::InvalidInput(format!(
            "x has {} points but y has {}",
            x.len(),
            y.len()
        )));
    }
    if x.len() < NUM_PARAMETERS {
        return Err(TransformError::TooFewPoints {
            required: NUM_PARAMETERS,
            found: x.len(),
        });
    }
    if x.iter().any(|&v| !(v.is_finite() && v > 0.0)) {
        return Err(TransformError::InvalidInput(
            "power-law abscissae must be positive and finite".to_string(),
        ));
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(TransformError::InvalidInput("values to fit must be finite".to_string()));
    }

    let backend = LinAlgBackendProvider::<f64>::new();
    let log_x = x.mapv(f64::ln);
    let mut law = initial_guess(x, y);
    let mut cost = sum_of_squared_residuals(&law, x, y);
    let mut damping = config.initial_damping;
    let mut evaluations = 1;

    if !cost.is_finite() {
        return Err(TransformError::FitDiverged(format!(
            "initial guess amplitude = {}, exponent = {} gives a non-finite cost",
            law.amplitude, law.exponent
        )));
    }
    debug!(
        "Power-law fit over {} points starting from amplitude = {:.6}, exponent = {:.6} (cost {:.6e}).",
        x.len(),
        law.amplitude,
        law.exponent,
        cost
    );

    while evaluations < config.max_iterations {
        if cost == 0.0 {
            return Ok(PowerLawFit { law, iterations: evaluations, cost });
        }

        // Jacobian columns: d/d amp = x^b, d/d b = amp * x^b * ln x.
        let powered = x.mapv(|xi| xi.powf(law.exponent));
        let d_amplitude = powered.clone();
        let d_exponent = &powered * &log_x * law.amplitude;
        let residuals = &powered * law.amplitude - y;

        let normal = arr2(&[
            [d_amplitude.dot(&d_amplitude), d_amplitude.dot(&d_exponent)],
            [d_exponent.dot(&d_amplitude), d_exponent.dot(&d_exponent)],
        ]);
        let gradient = arr1(&[d_amplitude.dot(&residuals), d_exponent.dot(&residuals)]);
        if gradient.iter().all(|g| *g == 0.0) {
            return Ok(PowerLawFit { law, iterations: evaluations, cost });
        }

        let mut damped = normal.clone();
        for i in 0..NUM_PARAMETERS {
            damped[[i, i]] += damping * normal[[i, i]].max(f64::MIN_POSITIVE);
        }
        let step = solve_damped_step(&backend, damped, &-&gradient)?;

        let candidate = PowerLaw {
            amplitude: law.amplitude + step[0],
            exponent: law.exponent + step[1],
        };
        let candidate_cost = sum_of_squared_residuals(&candidate, x, y);
        evaluations += 1;

        let parameter_norm = law.amplitude.hypot(law.exponent);
        let step_norm = step[0].hypot(step[1]);
        let small_step = step_norm <= config.parameter_tolerance * (parameter_norm + config.parameter_tolerance);

        trace!(
            "LM evaluation {}: amplitude = {:.6e}, exponent = {:.6e}, cost = {:.6e}, damping = {:.3e}",
            evaluations,
            candidate.amplitude,
            candidate.exponent,
            candidate_cost,
            damping
        );

        if candidate_cost.is_finite() && candidate_cost < cost {
            let relative_reduction = (cost - candidate_cost) / cost;
            law = candidate;
            cost = candidate_cost;
            damping = (damping / 10.0).max(f64::MIN_POSITIVE);
            if relative_reduction <= config.cost_tolerance || small_step {
                debug!(
                    "Power-law fit converged after {} evaluations: amplitude = {:.6}, exponent = {:.6}, cost = {:.6e}.",
                    evaluations, law.amplitude, law.exponent, cost
                );
                return Ok(PowerLawFit { law, iterations: evaluations, cost });
            }
        } else {
            if small_step {
                // No representable step lowers the cost any further.
                debug!(
                    "Power-law fit stalled at a minimum after {} evaluations: amplitude = {:.6}, exponent = {:.6}.",
                    evaluations, law.amplitude, law.exponent
                );
                return Ok(PowerLawFit { law, iterations: evaluations, cost });
            }
            damping *= 10.0;
            if !damping.is_finite() {
                return Err(TransformError::FitDiverged(format!(
                    "damping overflowed at amplitude = {}, exponent = {}",
                    law.amplitude, law.exponent
                )));
            }
        }
    }

    Err(TransformError::FitDidNotConverge {
        iterations: evaluations,
        last_cost: cost,
    })
}

/// Fits a power law to the leading rotated eigenvalues and returns the point
/// of the fitted curve nearest the origin.
///
/// The fit uses `(i, L_i)` for `i = 1..=n` over the first
/// `config.max_eigenvalues` values. The curve is sampled on
/// `linspace(grid_start, grid_end, grid_points)`; the sample minimizing
/// `sqrt(x^2 + y^2)` is the elbow (first one on ties) and its `x`, rounded,
/// is the component count.
pub fn estimate_component_count(eigvals_rot: &ArrayView1<f64>, config: &PowerFitConfig) -> Result<ComponentCountEstimate> {
    config.validate()?;
    let num_fitted = eigvals_rot.len().min(config.max_eigenvalues);
    let leading = eigvals_rot.slice(s![..num_fitted]);
    let abscissae = Array1::from_shape_fn(num_fitted, |i| (i + 1) as f64);

    let fit = fit_power_law(&abscissae.view(), &leading, config)?;

    let grid = Array1::linspace(config.grid_start, config.grid_end, config.grid_points);
    let mut elbow: Option<(f64, f64, f64)> = None;
    for &x in grid.iter() {
        let y = fit.law.evaluate(x);
        let distance = x.hypot(y);
        if distance.is_nan() {
            continue;
        }
        let closer = elbow.map_or(true, |(_, _, best)| distance < best);
        if closer {
            elbow = Some((x, y, distance));
        }
    }
    let (elbow_x, elbow_y, _) = elbow.ok_or_else(|| {
        TransformError::FitDiverged(format!(
            "fitted curve amplitude = {}, exponent = {} is undefined over the elbow grid",
            fit.law.amplitude, fit.law.exponent
        ))
    })?;

    let rounded = elbow_x.round();
    if rounded < 0.0 {
        return Err(TransformError::InvalidInput(format!(
            "elbow abscissa {} is negative; the grid must lie on the positive axis",
            elbow_x
        )));
    }
    let n_components = rounded as usize;
    info!(
        "Estimated {} components from {} eigenvalues (elbow at x = {:.3}, y = {:.3}).",
        n_components, num_fitted, elbow_x, elbow_y
    );

    Ok(ComponentCountEstimate {
        n_components,
        elbow_x,
        elbow_y,
        fit,
    })
}

/// Estimated number of components for a descending vector of rotated
/// eigenvalues, with the default fit and grid settings.
pub fn fit_power(eigvals_rot: &ArrayView1<f64>) -> Result<usize> {
    estimate_component_count(eigvals_rot, &PowerFitConfig::default()).map(|estimate| estimate.n_components)
}
