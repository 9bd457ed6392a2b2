//! mixreg-linalg: Linear algebra wrappers for mixreg
//!
//! Provides the dense matrix type and the decompositions (Cholesky, QR,
//! symmetric eigen) used by the model fitters and sandwich estimators.

pub mod dense;
pub mod decomposition;

pub use decomposition::LinalgError;
pub use dense::DenseMatrix;
