use thiserror::Error;

// Unified error type for probkryst

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlsError {
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
    #[error("operator must be square, got shape ({rows}, {cols})")]
    NotSquare { rows: usize, cols: usize },
    #[error("structural violation: {0}")]
    Structure(String),
    #[error("matrix is not positive definite: {0}")]
    NotPositiveDefinite(String),
    #[error("factorization error: {0}")]
    FactorError(String),
    #[error("numerical breakdown at iteration {iteration} (s^T y = {curvature:e})")]
    Breakdown { iteration: usize, curvature: f64 },
    #[error("unsupported assumption on A: '{0}' (expected 'sympos' or 'symposnoise')")]
    UnsupportedAssumption(String),
    #[error("invalid option: {0}")]
    InvalidOption(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}
