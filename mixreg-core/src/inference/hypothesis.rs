//! Joint Wald tests of linear contrasts.

use mixreg_linalg::decomposition::inverse_spd;
use mixreg_linalg::DenseMatrix;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use tracing::debug;

use super::{standard_errors, EstimatorKind, Inferable};
use crate::error::{ModelError, Result};
use crate::fit::model::FittedModel;
use crate::spec::Term;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaldTest {
    pub estimator: EstimatorKind,
    pub statistic: f64,
    /// Number of contrast rows.
    pub df: usize,
    pub p_value: f64,
}

/// Test C beta = 0 jointly. Each row of `contrast` is one linear combination
/// of the coefficients; the statistic (C b)' (C V C')^{-1} (C b) is referred
/// to chi-squared with one degree of freedom per row.
pub fn wald_test<M: Inferable + ?Sized>(
    model: &M,
    kind: EstimatorKind,
    contrast: &DenseMatrix,
) -> Result<WaldTest> {
    let p = model.estimates().len();
    if contrast.ncols() != p {
        return Err(ModelError::DimensionMismatch {
            expected: p,
            got: contrast.ncols(),
        });
    }
    let q = contrast.nrows();
    if q == 0 {
        return Err(ModelError::InvalidSpec("contrast has no rows".into()));
    }

    let v = standard_errors(model, kind)?;
    let cb = contrast.mat_vec(model.estimates());
    let mut middle = contrast
        .mat_mul(&v.covariance)
        .mat_mul(&contrast.transpose());
    middle.symmetrize();
    let inv = inverse_spd(&middle)?;
    let statistic = inv.quad_form(&cb, &cb);

    let chi2 = ChiSquared::new(q as f64).map_err(|e| ModelError::Distribution(e.to_string()))?;
    let p_value = 1.0 - chi2.cdf(statistic);
    debug!(
        "Wald test ({}): statistic={:.4}, df={}, p={:.4e}",
        kind, statistic, q, p_value
    );
    Ok(WaldTest {
        estimator: kind,
        statistic,
        df: q,
        p_value,
    })
}

/// Contrast selecting every coefficient that belongs to `term` (for example
/// all treatment dummies of a factor), one row per coefficient.
pub fn term_contrast(model: &FittedModel, term: &str) -> Result<DenseMatrix> {
    let wanted = Term::parse(term);
    let columns: Vec<usize> = model
        .coefficient_terms
        .iter()
        .enumerate()
        .filter(|(_, t)| Term::parse(t).same_variables(&wanted))
        .map(|(i, _)| i)
        .collect();
    if columns.is_empty() {
        return Err(ModelError::UnknownCoefficient(term.to_string()));
    }
    let p = model.n_coef();
    let mut c = DenseMatrix::zeros(columns.len(), p);
    for (row, &col) in columns.iter().enumerate() {
        c.set(row, col, 1.0);
    }
    Ok(c)
}
