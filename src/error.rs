use std::error::Error;
use std::fmt;

/// A thread-safe wrapper for standard dynamic errors,
/// so they implement `Send` and `Sync`.
pub type ThreadSafeStdError = Box<dyn Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, TransformError>;

/// Failures surfaced by the matrix transforms.
///
/// Numeric primitives (SVD, the least-squares step) are not retried; their
/// errors are wrapped in [`TransformError::Linalg`] and handed to the caller.
#[derive(Debug)]
pub enum TransformError {
    /// The arguments cannot be processed at all (empty vector, bad tolerance, ...).
    InvalidInput(String),
    /// A linear-algebra backend call failed.
    Linalg {
        context: &'static str,
        source: ThreadSafeStdError,
    },
    /// The power-law fit needs at least as many points as it has parameters.
    TooFewPoints { required: usize, found: usize },
    /// Levenberg-Marquardt hit its iteration cap before meeting either tolerance.
    FitDidNotConverge { iterations: usize, last_cost: f64 },
    /// Levenberg-Marquardt produced a non-finite cost or parameter.
    FitDiverged(String),
}

impl TransformError {
    pub(crate) fn linalg(context: &'static str, source: ThreadSafeStdError) -> Self {
        TransformError::Linalg { context, source }
    }
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            TransformError::Linalg { context, source } => {
                write!(f, "linear algebra failure during {context}: {source}")
            }
            TransformError::TooFewPoints { required, found } => write!(
                f,
                "power-law fit needs at least {required} points, got {found}"
            ),
            TransformError::FitDidNotConverge { iterations, last_cost } => write!(
                f,
                "power-law curve fit did not converge after {iterations} iterations (residual sum of squares {last_cost:e})"
            ),
            TransformError::FitDiverged(msg) => write!(f, "power-law curve fit diverged: {msg}"),
        }
    }
}

impl Error for TransformError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TransformError::Linalg { source, .. } => Some(&**source),
            _ => None,
        }
    }
}
