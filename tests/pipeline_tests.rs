// In tests/pipeline_tests.rs

use approx::assert_abs_diff_eq;
use connectivity_transforms::diagnostics::{column_moments, compute_frob_norm_f64, compute_orthogonality_error_f64};
use connectivity_transforms::{
    fit_power, matrix_log2, matrix_zscore, matrix_zscore_seeded, rotate_components, OrthomaxRotation,
    RotationConfig, RotationOutput, TransformError,
};
use ndarray::{arr1, arr2, s, Array1, Array2, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const DEFAULT_FLOAT_TOLERANCE_F64: f64 = 1e-9;

fn assert_standardized_columns(matrix: &Array2<f64>, context: &str) {
    let (means, stds) = column_moments(&matrix.view());
    for j in 0..matrix.ncols() {
        assert!(
            approx::abs_diff_eq!(means[j], 0.0, epsilon = DEFAULT_FLOAT_TOLERANCE_F64),
            "{}: column {} mean {}",
            context,
            j,
            means[j]
        );
        assert!(
            (stds[j] - 1.0).abs() < DEFAULT_FLOAT_TOLERANCE_F64,
            "{}: column {} std {}",
            context,
            j,
            stds[j]
        );
    }
}

#[test]
fn zscore_repairs_single_zero_column_in_five_by_five() {
    let m = arr2(&[
        [1.0, 6.0, 2.0, 0.0, 9.0],
        [2.0, 4.0, 7.0, 0.0, 3.0],
        [3.0, 8.0, 1.0, 0.0, 5.0],
        [4.0, 5.0, 3.0, 0.0, 1.0],
        [5.0, 7.0, 6.0, 0.0, 2.0],
    ]);
    let mut rng = ChaCha8Rng::seed_from_u64(2025);
    let out = matrix_zscore(&m.view(), &mut rng);

    assert_eq!(out.repaired_columns, vec![3]);
    assert_eq!(out.data.dim(), (5, 5));
    assert!(out.data.iter().all(|v| v.is_finite()));
    assert_standardized_columns(&out.data, "5x5 with zero column");
    assert!(m.column(3).iter().all(|&v| v == 0.0), "input must be left untouched");
}

#[test]
fn log2_then_zscore_on_connectivity_counts() {
    let mut rng = ChaCha8Rng::seed_from_u64(17);
    let mut counts = Array2::random_using((40, 12), Uniform::new(0.0, 500.0), &mut rng).mapv(f64::floor);
    counts.column_mut(4).fill(0.0);
    counts.column_mut(9).fill(0.0);

    let compressed = matrix_log2(&counts);
    assert!(compressed.iter().all(|&v| v >= 0.0));
    // log2(0 + 1) keeps empty profiles empty, so they are still detected.
    let z = matrix_zscore_seeded(&compressed.view(), 99);
    assert_eq!(z.repaired_columns, vec![4, 9]);
    assert_standardized_columns(&z.data, "log2 + zscore");
}

#[test]
fn rotating_identity_loadings_is_a_no_op() {
    let phi = Array2::<f64>::eye(4).slice(s![.., ..3]).to_owned();
    let rotated = rotate_components(&phi.view(), 1.0, 50, 1e-6).unwrap();
    for (a, b) in rotated.iter().zip(phi.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = DEFAULT_FLOAT_TOLERANCE_F64);
    }
}

#[test]
fn rotation_of_pca_loadings_from_zscored_profiles() {
    // Three groups of targets driven by three latent seed patterns.
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let latent = Array2::random_using((60, 3), Uniform::new(-1.0, 1.0), &mut rng);
    let mut data = Array2::<f64>::zeros((60, 15));
    for j in 0..15 {
        let source = latent.column(j / 5);
        let noise = Array1::random_using(60, Uniform::new(-0.1, 0.1), &mut rng);
        data.column_mut(j).assign(&(&source + &noise));
    }
    let z = matrix_zscore_seeded(&data.view(), 1).data;

    // Loadings from the correlation matrix: top-3 eigenvectors scaled by sqrt(eigenvalue).
    use ndarray_linalg::{Eigh, UPLO};
    let correlation = z.t().dot(&z) / z.nrows() as f64;
    let (eigenvalues, eigenvectors) = correlation.eigh(UPLO::Upper).unwrap();
    let k = 3;
    let n = eigenvalues.len();
    let mut phi = Array2::<f64>::zeros((15, k));
    for c in 0..k {
        let idx = n - 1 - c;
        phi.column_mut(c).assign(&(&eigenvectors.column(idx) * eigenvalues[idx].sqrt()));
    }

    let output: RotationOutput = OrthomaxRotation::new(RotationConfig::varimax()).rotate(&phi.view()).unwrap();
    assert!(compute_orthogonality_error_f64(&output.rotation_matrix.view()).unwrap() < 1e-10);
    assert_abs_diff_eq!(
        compute_frob_norm_f64(&phi.view()),
        compute_frob_norm_f64(&output.rotated_loadings.view()),
        epsilon = 1e-9
    );

    // After varimax every target loads mainly on one factor, and targets from
    // the same group share that factor.
    let dominant: Vec<usize> = output
        .rotated_loadings
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .max_by(|a, b| a.1.abs().partial_cmp(&b.1.abs()).unwrap())
                .map(|(i, _)| i)
                .unwrap()
        })
        .collect();
    for group in 0..3 {
        let first = dominant[group * 5];
        assert!(dominant[group * 5..group * 5 + 5].iter().all(|&d| d == first), "{:?}", dominant);
    }
}

#[test]
fn power_fit_on_realistic_spectrum() {
    let spectrum = arr1(&[100.0, 80.0, 60.0, 45.0, 30.0, 20.0, 15.0, 11.0, 8.0, 6.0, 5.0, 4.0]);
    let n_components = fit_power(&spectrum.view()).unwrap();
    assert!((1..=50).contains(&n_components), "got {}", n_components);
}

#[test]
fn power_fit_failure_is_descriptive() {
    let err = fit_power(&arr1(&[3.0]).view()).unwrap_err();
    assert!(matches!(err, TransformError::TooFewPoints { .. }));
    assert!(err.to_string().contains("at least 2 points"), "{}", err);
}

#[test]
fn rotation_output_serializes() {
    let phi = arr2(&[[0.8, 0.3], [0.7, 0.4], [0.2, 0.9], [0.3, 0.8]]);
    let output = OrthomaxRotation::default().rotate(&phi.view()).unwrap();
    let json = serde_json::to_string(&output).unwrap();
    let restored: RotationOutput = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.iterations_run, output.iterations_run);
    assert_eq!(restored.rotation_matrix.dim(), (2, 2));
}
