// src/rotation.rs

use crate::diagnostics::{compute_orthogonality_error_f64, RotationIterationDetail};
use crate::error::{Result, TransformError};
use crate::linalg_backends::{BackendSVD, LinAlgBackendProvider};
use log::{debug, trace, warn};
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Member of the orthomax family selected by `gamma`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RotationCriterion {
    /// gamma = 1
    Varimax,
    /// gamma = 0
    Quartimax,
    /// Any other weight of the column-variance term.
    Orthomax(f64),
}

impl RotationCriterion {
    pub fn gamma(&self) -> f64 {
        match self {
            RotationCriterion::Varimax => 1.0,
            RotationCriterion::Quartimax => 0.0,
            RotationCriterion::Orthomax(gamma) => *gamma,
        }
    }
}

/// Parameters of the orthomax fixed-point iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    /// 1.0 for varimax, 0.0 for quartimax.
    pub gamma: f64,
    /// Upper bound on SVD updates of the rotation (`q`).
    pub max_iterations: usize,
    /// Iteration stops once `d / d_old < 1 + tolerance`.
    pub tolerance: f64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        RotationConfig {
            gamma: 1.0,
            max_iterations: 50,
            tolerance: 1e-6,
        }
    }
}

impl RotationConfig {
    pub fn varimax() -> Self {
        Self::default()
    }

    pub fn quartimax() -> Self {
        Self::with_criterion(RotationCriterion::Quartimax)
    }

    pub fn with_criterion(criterion: RotationCriterion) -> Self {
        RotationConfig {
            gamma: criterion.gamma(),
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.gamma.is_finite() {
            return Err(TransformError::InvalidInput(format!(
                "rotation gamma must be finite, got {}",
                self.gamma
            )));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(TransformError::InvalidInput(format!(
                "rotation tolerance must be a positive finite number, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// Everything produced by one rotation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationOutput {
    /// `phi . r`, shape (p, k).
    pub rotated_loadings: Array2<f64>,
    /// The orthogonal rotation `r`, shape (k, k).
    pub rotation_matrix: Array2<f64>,
    /// Value of `d` after every SVD update, in iteration order.
    pub criterion_trace: Vec<f64>,
    pub iterations_run: usize,
    /// Whether the ratio test fired before the iteration cap.
    pub converged: bool,
    pub iteration_details: Vec<RotationIterationDetail>,
}

/// Orthomax rotation of a loadings matrix by repeated orthogonal Procrustes
/// steps.
///
/// Each iteration forms `Lambda = phi . r`, builds the target
/// `phi^T (Lambda^3 - (gamma / p) Lambda diag(Lambda^T Lambda))`, and replaces
/// `r` with `u . vh` from the SVD of that target. `r` is therefore orthogonal
/// by construction; nothing re-orthogonalizes it.
///
/// The stopping rule is `d_old != 0 && d / d_old < 1 + tol` where `d` is the
/// sum of singular values. Any decrease of `d` also satisfies it, so the loop
/// can stop on a step that made the criterion worse.
#[derive(Debug, Clone)]
pub struct OrthomaxRotation {
    config: RotationConfig,
}

impl Default for OrthomaxRotation {
    fn default() -> Self {
        Self::new(RotationConfig::default())
    }
}

impl OrthomaxRotation {
    pub fn new(config: RotationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    pub fn rotate(&self, phi: &ArrayView2<f64>) -> Result<RotationOutput> {
        self.config.validate()?;
        let (num_variables, num_factors) = phi.dim();
        let gamma = self.config.gamma;

        let mut rotation = Array2::<f64>::eye(num_factors);
        let mut criterion_trace = Vec::with_capacity(self.config.max_iterations);
        let mut iteration_details = Vec::with_capacity(self.config.max_iterations);

        if num_variables == 0 || num_factors == 0 {
            debug!(
                "Loadings matrix is empty ({} x {}); returning it unrotated.",
                num_variables, num_factors
            );
            return Ok(RotationOutput {
                rotated_loadings: phi.to_owned(),
                rotation_matrix: rotation,
                criterion_trace,
                iterations_run: 0,
                converged: false,
                iteration_details,
            });
        }

        let backend = LinAlgBackendProvider::<f64>::new();
        let variance_weight = gamma / num_variables as f64;
        let mut criterion = 0.0_f64;
        let mut converged = false;

        for iteration in 0..self.config.max_iterations {
            let previous_criterion = criterion;
            let lambda = phi.dot(&rotation);

            let column_energy = lambda.mapv(|x| x * x).sum_axis(Axis(0));
            // Lambda . diag(diag(Lambda^T Lambda)) scales column j by its squared norm.
            let scaled_lambda = &lambda * &column_energy.insert_axis(Axis(0));
            let cubed_lambda = lambda.mapv(|x| x * x * x);
            let target = phi.t().dot(&(cubed_lambda - scaled_lambda * variance_weight));

            let svd = backend
                .svd_into(target, true, true)
                .map_err(|e| TransformError::linalg("orthomax Procrustes SVD", e))?;
            let (u, vt) = match (svd.u, svd.vt) {
                (Some(u), Some(vt)) => (u, vt),
                _ => {
                    return Err(TransformError::linalg(
                        "orthomax Procrustes SVD",
                        "backend did not return singular vectors".into(),
                    ))
                }
            };
            rotation = u.dot(&vt);
            criterion = svd.s.sum();
            criterion_trace.push(criterion);

            let criterion_ratio = (previous_criterion != 0.0).then(|| criterion / previous_criterion);
            let orthogonality_error = compute_orthogonality_error_f64(&rotation.view());
            trace!(
                "Orthomax iteration {}: d = {:.6e}, ratio = {:?}, orthogonality error = {:?}",
                iteration + 1,
                criterion,
                criterion_ratio,
                orthogonality_error
            );
            iteration_details.push(RotationIterationDetail {
                iteration: iteration + 1,
                criterion,
                criterion_ratio,
                orthogonality_error,
            });

            if criterion_stalled(previous_criterion, criterion, self.config.tolerance) {
                converged = true;
                break;
            }
        }

        let iterations_run = criterion_trace.len();
        if converged {
            debug!(
                "Orthomax rotation (gamma = {}) converged after {} iterations, d = {:.6e}.",
                gamma, iterations_run, criterion
            );
        } else if iterations_run > 0 {
            warn!(
                "Orthomax rotation (gamma = {}) reached the iteration cap of {} without meeting tolerance {:e}; returning the last rotation.",
                gamma, self.config.max_iterations, self.config.tolerance
            );
        }

        Ok(RotationOutput {
            rotated_loadings: phi.dot(&rotation),
            rotation_matrix: rotation,
            criterion_trace,
            iterations_run,
            converged,
            iteration_details,
        })
    }
}

/// `d_old != 0 && d / d_old < 1 + tol`. A decrease of `d` also counts as stalled.
pub(crate) fn criterion_stalled(previous: f64, current: f64, tol: f64) -> bool {
    previous != 0.0 && current / previous < 1.0 + tol
}

/// Rotates the loadings `phi` (p x k) and returns `phi . r`.
///
/// * `gamma` - 1.0 for varimax, 0.0 for quartimax.
/// * `q` - maximum number of iterations.
/// * `tol` - relative convergence tolerance on the singular-value sum.
///
/// Hitting `q` without converging is not an error; the last rotation is used.
pub fn rotate_components(phi: &ArrayView2<f64>, gamma: f64, q: usize, tol: f64) -> Result<Array2<f64>> {
    let config = RotationConfig {
        gamma,
        max_iterations: q,
        tolerance: tol,
    };
    OrthomaxRotation::new(config)
        .rotate(phi)
        .map(|output| output.rotated_loadings)
}
