//! Inference on fitted models.
//!
//! - Model-based and cluster-robust (CR0, CR1, CR2) coefficient covariances
//! - Wald tests of linear contrasts
//! - Satterthwaite-type tests with estimated degrees of freedom
//! - Wald and profile-likelihood confidence intervals, odds ratios
//!
//! Every operation is written against the [`Inferable`] capability, which
//! [`FittedModel`] implements for all three families.

pub mod hypothesis;
pub mod intervals;
pub mod sandwich;
pub mod satterthwaite;

use std::fmt;
use std::str::FromStr;

use mixreg_linalg::decomposition::inverse_spd;
use mixreg_linalg::DenseMatrix;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

use crate::error::{ModelError, Result};
use crate::fit::model::{FitDetails, FittedModel};
use sandwich::ClusterBlock;

pub use hypothesis::{term_contrast, wald_test, WaldTest};
pub use intervals::{
    coefficient_table, confidence_interval, odds_ratios, CoefficientRow, IntervalMethod, OddsRatio,
};
pub use satterthwaite::{satterthwaite_df, satterthwaite_test, SatterthwaiteTest};

/// Coefficient covariance estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EstimatorKind {
    /// Inverse information of the fitted model.
    ModelBased,
    /// Sandwich with unadjusted cluster residuals.
    Cr0,
    /// CR0 scaled by G / (G - 1).
    Cr1,
    /// Bias-reduced linearization.
    Cr2,
}

impl EstimatorKind {
    pub fn is_sandwich(self) -> bool {
        self != EstimatorKind::ModelBased
    }
}

impl fmt::Display for EstimatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EstimatorKind::ModelBased => "model-based",
            EstimatorKind::Cr0 => "CR0",
            EstimatorKind::Cr1 => "CR1",
            EstimatorKind::Cr2 => "CR2",
        };
        f.write_str(s)
    }
}

impl FromStr for EstimatorKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "model" | "model-based" | "modelbased" => Ok(EstimatorKind::ModelBased),
            "cr0" => Ok(EstimatorKind::Cr0),
            "cr1" => Ok(EstimatorKind::Cr1),
            "cr2" => Ok(EstimatorKind::Cr2),
            other => Err(ModelError::InvalidSpec(format!(
                "unknown variance estimator '{}'",
                other
            ))),
        }
    }
}

/// Coefficient covariance tagged with the estimator that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarianceEstimate {
    pub kind: EstimatorKind,
    pub names: Vec<String>,
    pub covariance: DenseMatrix,
    pub standard_errors: Vec<f64>,
}

impl VarianceEstimate {
    fn new(kind: EstimatorKind, names: Vec<String>, covariance: DenseMatrix) -> Self {
        let standard_errors = covariance.diag().iter().map(|v| v.max(0.0).sqrt()).collect();
        Self {
            kind,
            names,
            covariance,
            standard_errors,
        }
    }

    /// c' V c
    pub fn contrast_variance(&self, c: &[f64]) -> f64 {
        self.covariance.quad_form(c, c)
    }
}

/// What the inference routines need from a fitted model.
pub trait Inferable {
    /// Coefficient estimates.
    fn estimates(&self) -> &[f64];

    /// Coefficient names, aligned with [`Inferable::estimates`].
    fn names(&self) -> &[String];

    /// Model-based coefficient covariance.
    fn model_covariance(&self) -> &DenseMatrix;

    /// Reference degrees of freedom for model-based single-coefficient
    /// statistics; infinite where the statistic is asymptotically normal.
    fn reference_df(&self) -> f64;

    /// Per-cluster blocks of the working model for sandwich estimators.
    fn cluster_blocks(&self) -> Result<Vec<ClusterBlock>>;

    /// Satterthwaite degrees of freedom of c' beta under the model-based
    /// covariance, accounting for estimated variance parameters.
    fn variance_parameter_df(&self, c: &[f64]) -> Result<f64>;

    /// Maximized log-likelihood with coefficient `index` held at `value`.
    fn profile_at(&self, index: usize, value: f64) -> Result<f64>;

    /// Unconstrained maximum of the likelihood surface used by
    /// [`Inferable::profile_at`].
    fn profile_reference(&self) -> Result<f64>;

    fn coefficient_position(&self, name: &str) -> Result<usize> {
        self.names()
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| ModelError::UnknownCoefficient(name.to_string()))
    }
}

impl Inferable for FittedModel {
    fn estimates(&self) -> &[f64] {
        &self.coefficients
    }

    fn names(&self) -> &[String] {
        &self.coefficient_names
    }

    fn model_covariance(&self) -> &DenseMatrix {
        &self.covariance
    }

    fn reference_df(&self) -> f64 {
        if self.is_linear() {
            self.residual_df() as f64
        } else {
            f64::INFINITY
        }
    }

    fn cluster_blocks(&self) -> Result<Vec<ClusterBlock>> {
        let data = &self.data;
        match &self.details {
            FitDetails::Logistic(d) => data
                .clusters
                .iter()
                .map(|rows| {
                    let v: Vec<f64> = rows
                        .iter()
                        .map(|&i| d.fitted[i] * (1.0 - d.fitted[i]))
                        .collect();
                    let inv: Vec<f64> = v.iter().map(|w| 1.0 / w).collect();
                    Ok(ClusterBlock {
                        rows: rows.clone(),
                        x: data.x.select_rows(rows).scale_rows(&v),
                        phi: DenseMatrix::from_diag(&v),
                        weight: DenseMatrix::from_diag(&inv),
                        residuals: rows.iter().map(|&i| data.y[i] - d.fitted[i]).collect(),
                    })
                })
                .collect(),
            FitDetails::Gls(_) | FitDetails::LinearMixed(_) => {
                let marginal = self.marginal().ok_or_else(|| {
                    ModelError::UnsupportedModel("linear fit without variance parameters".into())
                })?;
                let fitted = data.x.mat_vec(&self.coefficients);
                data.clusters
                    .iter()
                    .zip(marginal.blocks(&data.clusters))
                    .map(|(rows, phi)| -> Result<ClusterBlock> {
                        Ok(ClusterBlock {
                            rows: rows.clone(),
                            x: data.x.select_rows(rows),
                            weight: inverse_spd(&phi)?,
                            phi,
                            residuals: rows.iter().map(|&i| data.y[i] - fitted[i]).collect(),
                        })
                    })
                    .collect()
            }
        }
    }

    fn variance_parameter_df(&self, c: &[f64]) -> Result<f64> {
        satterthwaite::model_based_df(self, c)
    }

    fn profile_at(&self, index: usize, value: f64) -> Result<f64> {
        intervals::profile_fixed(self, Some((index, value)))
    }

    fn profile_reference(&self) -> Result<f64> {
        intervals::profile_fixed(self, None)
    }
}

/// Coefficient covariance under the requested estimator.
pub fn standard_errors<M: Inferable + ?Sized>(
    model: &M,
    kind: EstimatorKind,
) -> Result<VarianceEstimate> {
    let covariance = match kind {
        EstimatorKind::ModelBased => model.model_covariance().clone(),
        _ => sandwich::sandwich(&model.cluster_blocks()?, kind)?,
    };
    Ok(VarianceEstimate::new(kind, model.names().to_vec(), covariance))
}

/// Unit vector selecting coefficient `index` out of `p`.
pub(crate) fn unit_contrast(p: usize, index: usize) -> Vec<f64> {
    let mut c = vec![0.0; p];
    c[index] = 1.0;
    c
}

fn check_level(level: f64) -> Result<()> {
    if level > 0.0 && level < 1.0 {
        Ok(())
    } else {
        Err(ModelError::InvalidSpec(format!(
            "confidence level {} outside (0, 1)",
            level
        )))
    }
}

/// Two-sided p-value of a t statistic; standard normal for infinite `df`.
pub(crate) fn two_sided_p(statistic: f64, df: f64) -> Result<f64> {
    let tail = if df.is_finite() {
        StudentsT::new(0.0, 1.0, df)
            .map_err(|e| ModelError::Distribution(e.to_string()))?
            .cdf(-statistic.abs())
    } else {
        Normal::new(0.0, 1.0)
            .map_err(|e| ModelError::Distribution(e.to_string()))?
            .cdf(-statistic.abs())
    };
    Ok((2.0 * tail).min(1.0))
}

/// Two-sided critical value at confidence `level`.
pub(crate) fn critical_value(level: f64, df: f64) -> Result<f64> {
    check_level(level)?;
    let upper = 0.5 + 0.5 * level;
    if df.is_finite() {
        Ok(StudentsT::new(0.0, 1.0, df)
            .map_err(|e| ModelError::Distribution(e.to_string()))?
            .inverse_cdf(upper))
    } else {
        Ok(Normal::new(0.0, 1.0)
            .map_err(|e| ModelError::Distribution(e.to_string()))?
            .inverse_cdf(upper))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_quantiles() {
        assert!((critical_value(0.95, f64::INFINITY).unwrap() - 1.959964).abs() < 1e-5);
        assert!((critical_value(0.95, 10.0).unwrap() - 2.228139).abs() < 1e-4);
        assert!((two_sided_p(1.959964, f64::INFINITY).unwrap() - 0.05).abs() < 1e-5);
        assert!(critical_value(1.0, 5.0).is_err());
    }

    #[test]
    fn test_estimator_parse() {
        assert_eq!("CR2".parse::<EstimatorKind>().unwrap(), EstimatorKind::Cr2);
        assert_eq!(
            "model-based".parse::<EstimatorKind>().unwrap(),
            EstimatorKind::ModelBased
        );
        assert!("hc3".parse::<EstimatorKind>().is_err());
        assert_eq!(EstimatorKind::Cr1.to_string(), "CR1");
    }
}
