// src/linalg_backends.rs

#[derive(Debug, Default, Copy, Clone)]
pub struct LinAlgBackendProvider<F: 'static + Copy + Send + Sync> {
    _phantom: PhantomData<F>,
}

impl<F: 'static + Copy + Send + Sync> LinAlgBackendProvider<F> {
    pub fn new() -> Self {
        Self { _phantom: PhantomData }
    }
}

use ndarray::{Array1, Array2};
use std::marker::PhantomData;

use crate::error::ThreadSafeStdError;

// --- Trait Definitions ---

/// Output of a Singular Value Decomposition.
#[derive(Debug)]
pub struct SVDOutput<F: 'static> {
    pub u: Option<Array2<F>>,
    /// Singular values in descending order.
    pub s: Array1<F>,
    pub vt: Option<Array2<F>>,
}

/// Trait for Singular Value Decomposition.
///
/// Both the orthomax rotation (orthogonal Procrustes step) and the
/// Levenberg-Marquardt step solve go through this seam, so switching the
/// backend feature switches every decomposition in the crate.
pub trait BackendSVD<F: 'static + Copy + Send + Sync> {
    fn svd_into(&self, matrix: Array2<F>, compute_u: bool, compute_v: bool) -> Result<SVDOutput<F>, ThreadSafeStdError>;
}

// --- NdarrayLinAlgBackend Implementation ---
use ndarray_linalg::SVDInto as NdLinalgSVDInto;

#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

fn to_dyn_error<E: std::error::Error + Send + Sync + 'static>(e: E) -> ThreadSafeStdError {
    Box::new(e)
}

impl BackendSVD<f64> for NdarrayLinAlgBackend {
    fn svd_into(&self, matrix: Array2<f64>, compute_u: bool, compute_v: bool) -> Result<SVDOutput<f64>, ThreadSafeStdError> {
        let (nrows, ncols) = matrix.dim();
        if matrix.is_empty() {
            let k_dim = nrows.min(ncols);
            return Ok(SVDOutput {
                u: if compute_u { Some(Array2::zeros((nrows, k_dim))) } else { None },
                s: Array1::zeros(k_dim),
                vt: if compute_v { Some(Array2::zeros((k_dim, ncols))) } else { None },
            });
        }
        let (u, s, vt) = matrix.svd_into(compute_u, compute_v).map_err(to_dyn_error)?;
        Ok(SVDOutput { u, s, vt })
    }
}

// --- FaerLinAlgBackend Implementation ---
#[cfg(feature = "backend_faer")]
mod faer_specific_code {
    use super::{BackendSVD, SVDOutput};
    use crate::error::ThreadSafeStdError;
    use bytemuck::Pod;
    use faer::linalg::solvers::Svd as FaerSolverSvd;
    use faer::traits::num_traits::Zero;
    use faer::traits::ComplexField;
    use faer::MatRef;
    use ndarray::{Array1, Array2, ShapeBuilder};

    fn to_dyn_error_faer(msg: String) -> ThreadSafeStdError {
        Box::new(std::io::Error::new(std::io::ErrorKind::Other, msg))
    }

    #[derive(Debug, Default, Copy, Clone)]
    pub struct FaerLinAlgBackend;

    fn faer_mat_to_ndarray<F: ComplexField + Copy + Pod + Zero>(faer_mat: MatRef<'_, F>) -> Array2<F> {
        let nrows = faer_mat.nrows();
        let ncols = faer_mat.ncols();
        if nrows == 0 || ncols == 0 {
            return Array2::zeros((nrows, ncols).f());
        }
        Array2::from_shape_fn((nrows, ncols).f(), |(i, j)| faer_mat[(i, j)])
    }

    fn faer_col_to_ndarray_vec<F: ComplexField + Copy + Pod + Zero>(faer_col: faer::ColRef<'_, F>) -> Array1<F> {
        Array1::from_shape_fn(faer_col.nrows(), |i| faer_col[i])
    }

    impl BackendSVD<f64> for FaerLinAlgBackend {
        fn svd_into(&self, matrix: Array2<f64>, compute_u: bool, compute_v: bool) -> Result<SVDOutput<f64>, ThreadSafeStdError> {
            let (nrows, ncols) = matrix.dim();
            if matrix.is_empty() {
                let k_dim = nrows.min(ncols);
                return Ok(SVDOutput {
                    u: if compute_u { Some(Array2::zeros((nrows, k_dim))) } else { None },
                    s: Array1::zeros(k_dim),
                    vt: if compute_v { Some(Array2::zeros((k_dim, ncols))) } else { None },
                });
            }
            // Rotation targets are built with `dot` and are always standard layout,
            // but a caller may hand us a transposed view turned owned.
            let matrix = if matrix.is_standard_layout() { matrix } else { matrix.as_standard_layout().into_owned() };
            let slice = matrix.as_slice_memory_order().ok_or_else(|| {
                to_dyn_error_faer(format!(
                    "Failed to get slice from row-major ndarray matrix ({}x{})",
                    nrows, ncols
                ))
            })?;
            let faer_mat_view = faer::MatRef::from_row_major_slice(slice, nrows, ncols);

            let svd_solver_instance = FaerSolverSvd::new_thin(faer_mat_view.as_ref())
                .map_err(|e| to_dyn_error_faer(format!("Faer SVD computation failed: {:?}", e)))?;

            let s_ndarray = faer_col_to_ndarray_vec(svd_solver_instance.S().column_vector());

            let u_ndarray = if compute_u {
                Some(faer_mat_to_ndarray(svd_solver_instance.U().as_ref()))
            } else {
                None
            };

            let vt_ndarray = if compute_v {
                let v_ndarray = faer_mat_to_ndarray(svd_solver_instance.V().as_ref());
                Some(v_ndarray.t().into_owned())
            } else {
                None
            };

            Ok(SVDOutput { u: u_ndarray, s: s_ndarray, vt: vt_ndarray })
        }
    }
}

// --- LinAlgBackendProvider Dispatch ---

/// Dispatches to the linear algebra backend selected by compile-time
/// feature flags.
#[cfg(not(feature = "backend_faer"))]
impl<F> BackendSVD<F> for LinAlgBackendProvider<F>
where
    F: 'static + Copy + Send + Sync,
    NdarrayLinAlgBackend: BackendSVD<F>,
{
    fn svd_into(&self, matrix: Array2<F>, compute_u: bool, compute_v: bool) -> Result<SVDOutput<F>, ThreadSafeStdError> {
        NdarrayLinAlgBackend.svd_into(matrix, compute_u, compute_v)
    }
}

#[cfg(feature = "backend_faer")]
impl<F> BackendSVD<F> for LinAlgBackendProvider<F>
where
    F: 'static + Copy + Send + Sync,
    faer_specific_code::FaerLinAlgBackend: BackendSVD<F>,
{
    fn svd_into(&self, matrix: Array2<F>, compute_u: bool, compute_v: bool) -> Result<SVDOutput<F>, ThreadSafeStdError> {
        faer_specific_code::FaerLinAlgBackend.svd_into(matrix, compute_u, compute_v)
    }
}
