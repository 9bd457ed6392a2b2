//! Logistic regression by iteratively reweighted least squares.
//!
//! Besides the coefficients, the fit carries per-observation diagnostics:
//! leverage from the QR of W^{1/2} X, Pearson and deviance residuals,
//! standardized deviance residuals and Cook's distance.

use mixreg_data::table::format_number;
use mixreg_data::{Column, Table};
use mixreg_linalg::decomposition::{CholeskyDecomp, QrDecomp};
use mixreg_linalg::DenseMatrix;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::design::Design;
use super::link;
use super::model::{
    EstimationMethod, FitData, FitDetails, FitWarning, FittedModel, LogisticDetails,
};
use crate::error::{ModelError, Result};
use crate::spec::ModelSpec;

/// Fitted probabilities closer than this to 0 or 1 trigger a warning.
const BOUNDARY_EPS: f64 = 1e-8;

/// Configuration for IRLS.
#[derive(Debug, Clone)]
pub struct LogisticOptions {
    pub max_iter: usize,
    /// Relative deviance change declaring convergence.
    pub tol: f64,
}

impl Default for LogisticOptions {
    fn default() -> Self {
        Self {
            max_iter: 25,
            tol: 1e-8,
        }
    }
}

/// Per-observation diagnostics, in design-row order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationDiagnostics {
    pub hat: Vec<f64>,
    pub pearson_residuals: Vec<f64>,
    pub deviance_residuals: Vec<f64>,
    /// Deviance residual / sqrt(1 - h).
    pub standardized_residuals: Vec<f64>,
    pub cooks_distance: Vec<f64>,
}

/// Cut-offs for [`ObservationDiagnostics::flag_influential`]. A `None`
/// threshold is not checked.
#[derive(Debug, Clone, Default)]
pub struct InfluenceThresholds {
    pub leverage: Option<f64>,
    pub standardized_residual: Option<f64>,
    pub cooks_distance: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfluenceReason {
    Leverage,
    Residual,
    CooksDistance,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InfluenceFlag {
    /// Design-row index.
    pub index: usize,
    pub reasons: Vec<InfluenceReason>,
}

impl ObservationDiagnostics {
    /// Observations exceeding any of the given thresholds.
    pub fn flag_influential(&self, thresholds: &InfluenceThresholds) -> Vec<InfluenceFlag> {
        let mut flags = Vec::new();
        for i in 0..self.hat.len() {
            let mut reasons = Vec::new();
            if thresholds.leverage.is_some_and(|t| self.hat[i] > t) {
                reasons.push(InfluenceReason::Leverage);
            }
            if thresholds
                .standardized_residual
                .is_some_and(|t| self.standardized_residuals[i].abs() > t)
            {
                reasons.push(InfluenceReason::Residual);
            }
            if thresholds.cooks_distance.is_some_and(|t| self.cooks_distance[i] > t) {
                reasons.push(InfluenceReason::CooksDistance);
            }
            if !reasons.is_empty() {
                flags.push(InfluenceFlag { index: i, reasons });
            }
        }
        flags
    }
}

/// Converged IRLS state.
#[derive(Debug, Clone)]
pub(crate) struct IrlsFit {
    pub beta: Vec<f64>,
    pub mu: Vec<f64>,
    pub deviance: f64,
    pub iterations: usize,
    /// Unclamped probabilities numerically 0 or 1.
    pub boundary: usize,
}

/// Fit a logistic regression of a 0/1 response.
pub fn fit_logistic_regression(
    table: &Table,
    spec: &ModelSpec,
    options: &LogisticOptions,
) -> Result<FittedModel> {
    check_binary_column(table, &spec.response)?;
    let design = Design::build(table, spec, &[])?;
    if let Some(&bad) = design.y.iter().find(|&&v| v != 0.0 && v != 1.0) {
        return Err(ModelError::InvalidResponse {
            column: spec.response.clone(),
            value: format_number(bad),
        });
    }

    let n = design.n_obs();
    let p = design.n_coef();
    let fit = irls(&design.x, &design.y, &vec![0.0; n], options)?;

    let mut warnings = design.warnings.clone();
    if fit.boundary > 0 {
        warn!(
            "{} fitted probabilities numerically 0 or 1 occurred",
            fit.boundary
        );
        warnings.push(FitWarning::BoundaryProbabilities {
            count: fit.boundary,
        });
    }

    let w: Vec<f64> = fit.mu.iter().map(|&m| link::variance(m)).collect();
    let information = design.x.xtwx(&w);
    let covariance = CholeskyDecomp::new(&information)?.inverse();
    let diagnostics = diagnostics(&design.x, &design.y, &fit.mu, &w)?;
    let null_deviance = null_deviance(&design.y, spec.intercept);

    info!(
        "Logistic IRLS converged in {} iterations: deviance={:.4}, null deviance={:.4}",
        fit.iterations, fit.deviance, null_deviance
    );

    Ok(FittedModel {
        spec: spec.clone(),
        method: EstimationMethod::Ml,
        coefficient_names: design.column_names.clone(),
        coefficient_terms: design.column_terms.clone(),
        coefficients: fit.beta,
        covariance,
        log_likelihood: -0.5 * fit.deviance,
        n_params: p,
        n_obs: n,
        iterations: fit.iterations as u64,
        warnings,
        details: FitDetails::Logistic(LogisticDetails {
            deviance: fit.deviance,
            null_deviance,
            fitted: fit.mu,
            diagnostics,
        }),
        data: FitData::from_design(&design, &spec.response),
    })
}

/// Categorical and identifier responses are rejected outright, whatever their
/// labels; only numeric 0/1 columns are fitted.
fn check_binary_column(table: &Table, response: &str) -> Result<()> {
    let column = table.column(response)?;
    if matches!(column, Column::Numeric(_)) {
        return Ok(());
    }
    let value = (0..column.len())
        .map(|i| column.label(i))
        .find(|l| l != "0" && l != "1")
        .or_else(|| (!column.is_empty()).then(|| column.label(0)))
        .unwrap_or_default();
    Err(ModelError::InvalidResponse {
        column: response.to_string(),
        value,
    })
}

/// IRLS with a fixed offset in the linear predictor. Stops when the relative
/// deviance change falls below `options.tol`.
pub(crate) fn irls(
    x: &DenseMatrix,
    y: &[f64],
    offset: &[f64],
    options: &LogisticOptions,
) -> Result<IrlsFit> {
    let p = x.ncols();

    let mut mu: Vec<f64> = y.iter().map(|&yi| (yi + 0.5) / 2.0).collect();
    let mut eta: Vec<f64> = mu.iter().map(|&m| link::logit(m)).collect();
    let mut beta = vec![0.0; p];
    let mut dev_old = binomial_deviance(y, &mu);

    for iter in 1..=options.max_iter {
        let w: Vec<f64> = mu.iter().map(|&m| link::variance(m)).collect();
        // working response, offset removed
        let z: Vec<f64> = eta
            .iter()
            .zip(offset)
            .zip(y.iter().zip(mu.iter().zip(&w)))
            .map(|((&e, &o), (&yi, (&mi, &wi)))| e - o + (yi - mi) / wi)
            .collect();

        eta = if p > 0 {
            let xtwx = x.xtwx(&w);
            let xtwz = x.xtwv(&w, &z);
            beta = CholeskyDecomp::new(&xtwx)?.solve(&xtwz);
            x.mat_vec(&beta)
                .iter()
                .zip(offset)
                .map(|(a, o)| a + o)
                .collect()
        } else {
            offset.to_vec()
        };
        mu = eta.iter().map(|&e| link::clamp_probability(link::expit(e))).collect();

        let dev = binomial_deviance(y, &mu);
        debug!("IRLS iteration {}: deviance={:.8}", iter, dev);
        if (dev - dev_old).abs() / (dev.abs() + 0.1) < options.tol {
            let boundary = eta
                .iter()
                .map(|&e| link::expit(e))
                .filter(|&m| m < BOUNDARY_EPS || m > 1.0 - BOUNDARY_EPS)
                .count();
            return Ok(IrlsFit {
                beta,
                mu,
                deviance: dev,
                iterations: iter,
                boundary,
            });
        }
        dev_old = dev;
    }

    Err(ModelError::NonConvergence {
        max_iter: options.max_iter as u64,
    })
}

/// -2 * binomial log-likelihood of 0/1 outcomes.
pub(crate) fn binomial_deviance(y: &[f64], mu: &[f64]) -> f64 {
    y.iter()
        .zip(mu)
        .map(|(&yi, &mi)| link::unit_deviance(yi, mi))
        .sum()
}

fn null_deviance(y: &[f64], intercept: bool) -> f64 {
    let n = y.len() as f64;
    let p0 = if intercept {
        link::clamp_probability(y.iter().sum::<f64>() / n)
    } else {
        0.5
    };
    binomial_deviance(y, &vec![p0; y.len()])
}

fn diagnostics(
    x: &DenseMatrix,
    y: &[f64],
    mu: &[f64],
    w: &[f64],
) -> Result<ObservationDiagnostics> {
    let p = x.ncols() as f64;
    let sqrt_w: Vec<f64> = w.iter().map(|v| v.sqrt()).collect();
    let hat = QrDecomp::new(&x.scale_rows(&sqrt_w))?.hat_diagonal();

    let n = y.len();
    let mut pearson = Vec::with_capacity(n);
    let mut deviance = Vec::with_capacity(n);
    let mut standardized = Vec::with_capacity(n);
    let mut cooks = Vec::with_capacity(n);
    for i in 0..n {
        let r = y[i] - mu[i];
        let rp = r / w[i].sqrt();
        let rd = r.signum() * link::unit_deviance(y[i], mu[i]).max(0.0).sqrt();
        let one_minus_h = (1.0 - hat[i]).max(f64::EPSILON);
        pearson.push(rp);
        deviance.push(rd);
        standardized.push(rd / one_minus_h.sqrt());
        cooks.push(rp * rp * hat[i] / (p * one_minus_h * one_minus_h));
    }
    Ok(ObservationDiagnostics {
        hat,
        pearson_residuals: pearson,
        deviance_residuals: deviance,
        standardized_residuals: standardized,
        cooks_distance: cooks,
    })
}
