// src/transforms.rs

use log::{debug, info, warn};
use ndarray::{Array, Array2, ArrayBase, ArrayView2, Axis, Data, Dimension};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Applies `log2(x + 1)` elementwise and returns a new array.
///
/// Entries at or below `-1` follow IEEE semantics (`-inf` at exactly `-1`,
/// NaN below it); no error is raised.
pub fn matrix_log2<S, D>(matrix: &ArrayBase<S, D>) -> Array<f64, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    matrix.mapv(|value| (value + 1.0).log2())
}

/// In-place variant of [`matrix_log2`].
pub fn matrix_log2_in_place(matrix: &mut Array2<f64>) {
    matrix.mapv_inplace(|value| (value + 1.0).log2());
}

/// Result of z-scoring a connectivity matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZscoreOutput {
    /// Column-standardized matrix, same shape as the input.
    pub data: Array2<f64>,
    /// Columns whose entries were replaced with standard normal draws before
    /// standardizing, in ascending order.
    pub repaired_columns: Vec<usize>,
}

/// Indices of columns whose sum is exactly zero.
///
/// This is how empty connectivity profiles are detected. A column whose
/// entries cancel (e.g. `[1, -1]`) is also reported even though its variance
/// is not zero; a constant non-zero column is not reported.
pub fn find_zero_sum_columns(matrix: &ArrayView2<f64>) -> Vec<usize> {
    matrix
        .sum_axis(Axis(0))
        .iter()
        .enumerate()
        .filter(|(_, &column_sum)| column_sum == 0.0)
        .map(|(column_index, _)| column_index)
        .collect()
}

/// Replaces every zero-sum column with independent standard normal draws,
/// one per row. Returns the repaired column indices.
pub fn repair_degenerate_columns<R: Rng + ?Sized>(matrix: &mut Array2<f64>, rng: &mut R) -> Vec<usize> {
    let degenerate_columns = find_zero_sum_columns(&matrix.view());
    if degenerate_columns.is_empty() {
        return degenerate_columns;
    }

    info!(
        "Found {} columns with zero std; replacing them with normally distributed random numbers.",
        degenerate_columns.len()
    );
    for &column_index in &degenerate_columns {
        for value in matrix.column_mut(column_index).iter_mut() {
            *value = rng.sample(StandardNormal);
        }
    }
    degenerate_columns
}

/// Standardizes each column to zero mean and unit population variance
/// (ddof = 0) without touching the caller's matrix.
///
/// Zero-sum columns are first replaced with standard normal draws from `rng`
/// (see [`repair_degenerate_columns`]). Columns that are constant but not
/// zero-sum are left as they are and come out as NaN.
pub fn matrix_zscore<R: Rng + ?Sized>(matrix: &ArrayView2<f64>, rng: &mut R) -> ZscoreOutput {
    let mut data = matrix.to_owned();
    let repaired_columns = matrix_zscore_in_place(&mut data, rng);
    ZscoreOutput { data, repaired_columns }
}

/// [`matrix_zscore`] with a `ChaCha8Rng` seeded from `seed`.
pub fn matrix_zscore_seeded(matrix: &ArrayView2<f64>, seed: u64) -> ZscoreOutput {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    matrix_zscore(matrix, &mut rng)
}

/// Repairs degenerate columns and standardizes `matrix` in place.
///
/// Returns the indices of the repaired columns.
pub fn matrix_zscore_in_place<R: Rng + ?Sized>(matrix: &mut Array2<f64>, rng: &mut R) -> Vec<usize> {
    let (num_rows, num_columns) = matrix.dim();
    if num_rows == 0 || num_columns == 0 {
        debug!(
            "Skipping z-score of empty matrix ({} rows, {} columns).",
            num_rows, num_columns
        );
        return Vec::new();
    }

    let repaired_columns = repair_degenerate_columns(matrix, rng);
    standardize_columns(matrix);
    repaired_columns
}

fn standardize_columns(matrix: &mut Array2<f64>) {
    let num_rows = matrix.nrows() as f64;

    let constant_columns: usize = matrix
        .axis_iter_mut(Axis(1))
        .into_par_iter()
        .map(|mut column| {
            let mean = column.sum() / num_rows;
            column.mapv_inplace(|value| value - mean);

            let variance = column.iter().map(|value| value * value).sum::<f64>() / num_rows;
            let std_dev = variance.sqrt();
            column.mapv_inplace(|value| value / std_dev);
            usize::from(std_dev == 0.0)
        })
        .sum();

    if constant_columns > 0 {
        warn!(
            "{} columns have zero standard deviation after repair; their z-scores are NaN.",
            constant_columns
        );
    }
}
