// src/diagnostics.rs

use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Per-iteration record of the orthomax fixed-point loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RotationIterationDetail {
    pub iteration: usize,
    /// Sum of singular values of the Procrustes target (the `d` criterion).
    pub criterion: f64,
    /// `d / d_old`, absent on the first iteration.
    pub criterion_ratio: Option<f64>,
    /// ||I - R^T R||_F of the updated rotation.
    pub orthogonality_error: Option<f64>,
}

/// Computes Frobenius norm for an f64 matrix.
pub fn compute_frob_norm_f64(matrix: &ArrayView2<f64>) -> f64 {
    if matrix.is_empty() {
        return 0.0;
    }
    matrix.iter().map(|&x| x * x).sum::<f64>().sqrt()
}

/// Computes orthogonality error ||I - Q^T Q||_F for an f64 matrix.
pub fn compute_orthogonality_error_f64(q_matrix: &ArrayView2<f64>) -> Option<f64> {
    if q_matrix.nrows() == 0 || q_matrix.ncols() == 0 {
        return None;
    }
    let qtq = q_matrix.t().dot(q_matrix);
    let identity = Array2::<f64>::eye(qtq.nrows());
    let diff = identity - qtq;

    Some(compute_frob_norm_f64(&diff.view()))
}

/// Column means and population (ddof = 0) standard deviations.
///
/// Empty columns yield NaN for both, which is what `mean` / `std` on an
/// empty lane produce.
pub fn column_moments(matrix: &ArrayView2<f64>) -> (Array1<f64>, Array1<f64>) {
    let n_rows = matrix.nrows();
    if n_rows == 0 {
        let nan = Array1::from_elem(matrix.ncols(), f64::NAN);
        return (nan.clone(), nan);
    }
    let means = matrix.mean_axis(Axis(0)).unwrap_or_else(|| Array1::from_elem(matrix.ncols(), f64::NAN));
    let stds = matrix.std_axis(Axis(0), 0.0);
    (means, stds)
}

/// Raw orthomax objective of a loadings matrix:
/// `sum(L^4) - (gamma / p) * sum_j (sum_i L_ij^2)^2`.
///
/// Varimax (gamma = 1) and quartimax (gamma = 0) rotations increase this
/// value; it is reported for inspection, the rotation loop itself tracks the
/// singular-value sum of the Procrustes target instead.
pub fn orthomax_objective(loadings: &ArrayView2<f64>, gamma: f64) -> f64 {
    let p = loadings.nrows();
    if p == 0 || loadings.ncols() == 0 {
        return 0.0;
    }
    let squared = loadings.mapv(|x| x * x);
    let fourth_power_sum: f64 = squared.iter().map(|&x| x * x).sum();
    let column_square_sums = squared.sum_axis(Axis(0));
    let spread: f64 = column_square_sums.iter().map(|&c| c * c).sum();
    fourth_power_sum - (gamma / p as f64) * spread
}
