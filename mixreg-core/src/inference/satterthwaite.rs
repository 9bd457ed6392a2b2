//! Single-coefficient tests with approximate degrees of freedom.
//!
//! Sandwich estimators use the Bell-McCaffrey degrees of freedom under the
//! working covariance. Model-based tests on linear fits use
//! df = 2 (c'Vc)^2 / (g' A g), where g is the gradient of c'Vc over the
//! variance parameters (theta, log sigma^2) and A the inverse observed
//! information of those parameters.

use std::iter;

use finitediff::FiniteDiff;
use mixreg_linalg::decomposition::inverse_spd;
use mixreg_linalg::DenseMatrix;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::sandwich::{adjustments, bell_mccaffrey_df, bread};
use super::{standard_errors, two_sided_p, unit_contrast, EstimatorKind, Inferable};
use crate::error::{ModelError, Result};
use crate::fit::model::FittedModel;
use crate::fit::profile::evaluate;

/// Relative finite-difference step for the variance parameters.
const STEP: f64 = 1e-4;

/// Perturbation `finitediff` applies to each coordinate of a `Vec<f64>`.
const FD_STEP: f64 = 1.490_116_119_384_765_6e-8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SatterthwaiteTest {
    pub coefficient: String,
    pub estimator: EstimatorKind,
    pub estimate: f64,
    pub std_error: f64,
    pub statistic: f64,
    pub df: f64,
    pub p_value: f64,
}

/// Approximate degrees of freedom of c' beta under `kind`.
pub fn satterthwaite_df<M: Inferable + ?Sized>(
    model: &M,
    kind: EstimatorKind,
    c: &[f64],
) -> Result<f64> {
    let p = model.estimates().len();
    if c.len() != p {
        return Err(ModelError::DimensionMismatch {
            expected: p,
            got: c.len(),
        });
    }
    match kind {
        EstimatorKind::ModelBased => model.variance_parameter_df(c),
        _ => {
            let blocks = model.cluster_blocks()?;
            let m = bread(&blocks)?;
            let adj = adjustments(&blocks, &m, kind)?;
            Ok(bell_mccaffrey_df(&blocks, &m, &adj, c))
        }
    }
}

/// t test of one coefficient against zero with Satterthwaite degrees of
/// freedom.
pub fn satterthwaite_test<M: Inferable + ?Sized>(
    model: &M,
    kind: EstimatorKind,
    coefficient: &str,
) -> Result<SatterthwaiteTest> {
    let index = model.coefficient_position(coefficient)?;
    let c = unit_contrast(model.estimates().len(), index);
    let estimate = model.estimates()[index];
    let std_error = standard_errors(model, kind)?.standard_errors[index];
    let statistic = estimate / std_error;
    let df = satterthwaite_df(model, kind, &c)?;
    let p_value = two_sided_p(statistic, df)?;
    debug!(
        "Satterthwaite test of {} ({}): t={:.4}, df={:.2}, p={:.4e}",
        coefficient, kind, statistic, df, p_value
    );
    Ok(SatterthwaiteTest {
        coefficient: coefficient.to_string(),
        estimator: kind,
        estimate,
        std_error,
        statistic,
        df,
        p_value,
    })
}

/// Model-based Satterthwaite df for a fitted model. Infinite for logistic
/// fits; falls back to n - p when the variance-parameter information is not
/// positive definite.
///
/// Derivatives are taken over phi = (theta, log sigma^2) in scaled
/// coordinates u, phi = phi_hat + diag(s) u, so that the fixed `finitediff`
/// perturbation of u moves each parameter by `STEP` relative to its size. The
/// df is invariant under this reparametrization.
pub(crate) fn model_based_df(model: &FittedModel, c: &[f64]) -> Result<f64> {
    let Some(marginal) = model.marginal() else {
        return Ok(f64::INFINITY);
    };
    let data = &model.data;
    let method = model.method;
    let n_theta = marginal.theta.len();
    let fallback = model.residual_df() as f64;

    let phi_hat: Vec<f64> = marginal
        .theta
        .iter()
        .copied()
        .chain(iter::once(marginal.sigma2.ln()))
        .collect();
    let scale: Vec<f64> = marginal
        .theta
        .iter()
        .map(|t| STEP * t.abs().max(1.0) / FD_STEP)
        .chain(iter::once(STEP / FD_STEP))
        .collect();
    let to_phi = |u: &Vec<f64>| -> Vec<f64> {
        phi_hat
            .iter()
            .zip(&scale)
            .zip(u)
            .map(|((p, s), ui)| p + s * ui)
            .collect()
    };

    let neg_log_lik = |u: &Vec<f64>| -> f64 {
        let phi = to_phi(u);
        let (theta, rest) = phi.split_at(n_theta);
        match evaluate(&data.x, &data.y, &data.clusters, &marginal.covariance, theta) {
            Ok(profile) => -profile.log_likelihood_at(method, rest[0].exp()),
            Err(_) => f64::NAN,
        }
    };
    let contrast_variance = |u: &Vec<f64>| -> f64 {
        let phi = to_phi(u);
        let (theta, rest) = phi.split_at(n_theta);
        match evaluate(&data.x, &data.y, &data.clusters, &marginal.covariance, theta) {
            Ok(profile) => rest[0].exp() * profile.xtx_inv.quad_form(c, c),
            Err(_) => f64::NAN,
        }
    };
    let score = |u: &Vec<f64>| -> Vec<f64> { u.central_diff(&neg_log_lik) };

    let origin = vec![0.0; phi_hat.len()];
    let d = origin.len();
    let hess = origin.central_hessian(&score);
    let grad = origin.central_diff(&contrast_variance);
    if hess.iter().flatten().chain(&grad).any(|v| !v.is_finite()) {
        warn!("Variance-parameter derivatives not finite; using residual df");
        return Ok(fallback);
    }
    let mut information = DenseMatrix::from_rows(&hess, d);
    information.symmetrize();
    let a = match inverse_spd(&information) {
        Ok(a) => a,
        Err(e) => {
            warn!("Variance-parameter information not invertible ({}); using residual df", e);
            return Ok(fallback);
        }
    };

    let v = contrast_variance(&origin);
    let df = 2.0 * v * v / a.quad_form(&grad, &grad);
    if !df.is_finite() || df <= 0.0 {
        warn!("Satterthwaite df not positive ({}); using residual df", df);
        return Ok(fallback);
    }
    debug!("Satterthwaite df over {} variance parameters: {:.3}", d, df);
    Ok(df)
}
