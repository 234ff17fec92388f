// Matrix transforms for connectivity-based parcellation

#![doc = include_str!("../README.md")]

pub mod diagnostics;
pub mod error;
pub mod linalg_backends;
pub mod power_fit;
pub mod rotation;
pub mod transforms;


pub use error::{Result, ThreadSafeStdError, TransformError};
pub use power_fit::{
    estimate_component_count, fit_power, fit_power_law, ComponentCountEstimate, PowerFitConfig, PowerLaw,
    PowerLawFit,
};
pub use rotation::{rotate_components, OrthomaxRotation, RotationConfig, RotationCriterion, RotationOutput};
pub use transforms::{
    find_zero_sum_columns, matrix_log2, matrix_log2_in_place, matrix_zscore, matrix_zscore_in_place,
    matrix_zscore_seeded, repair_degenerate_columns, ZscoreOutput,
};
