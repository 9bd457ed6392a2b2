//! Error taxonomy for fitting, inference and selection.

use mixreg_data::DataError;
use mixreg_linalg::LinalgError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ModelError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Optimizer did not converge within {max_iter} iterations")]
    NonConvergence { max_iter: u64 },

    #[error("Random-effects covariance is singular (relative Cholesky diagonal {value:.2e} below {tol:.0e})")]
    SingularFit { value: f64, tol: f64 },

    #[error("Design matrix is rank deficient: column '{column}' is aliased")]
    RankDeficient { column: String },

    #[error("Response '{column}' must be 0/1, found {value}")]
    InvalidResponse { column: String, value: String },

    #[error("Dimension mismatch: expected {expected} columns, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Models are not nested: {0}")]
    NotNested(String),

    #[error("Operation not supported for this model: {0}")]
    UnsupportedModel(String),

    #[error("Unknown coefficient '{0}'")]
    UnknownCoefficient(String),

    #[error("Invalid model specification: {0}")]
    InvalidSpec(String),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Linalg(#[from] LinalgError),

    #[error("Optimizer failure: {0}")]
    Optimizer(String),

    #[error("Invalid reference distribution: {0}")]
    Distribution(String),

    #[error("Serialization failure: {0}")]
    Serialization(String),
}
