//! Fitted-model representation shared by every family.

use std::fmt;

use mixreg_linalg::DenseMatrix;
use serde::{Deserialize, Serialize};

use super::covariance::{CovarianceModel, CovarianceParams, CovarianceStructure};
use super::design::Design;
use super::logistic::ObservationDiagnostics;
use crate::error::{ModelError, Result};
use crate::spec::{ModelSpec, RandomEffects};

/// Likelihood maximized for the variance parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EstimationMethod {
    Ml,
    Reml,
}

impl fmt::Display for EstimationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstimationMethod::Ml => write!(f, "ML"),
            EstimationMethod::Reml => write!(f, "REML"),
        }
    }
}

/// Non-fatal conditions recorded during fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FitWarning {
    /// A declared level has no observations and was dropped from the design.
    ZeroVariance { variable: String, level: String },
    /// Rows with a missing value in a used column were excluded.
    DroppedRows { count: usize },
    /// Fitted probabilities numerically 0 or 1 (quasi-separation).
    BoundaryProbabilities { count: usize },
    /// Variance parameters were re-estimated by ML.
    RefitWithMl,
}

impl fmt::Display for FitWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitWarning::ZeroVariance { variable, level } => {
                write!(f, "level '{}' of '{}' is unobserved and was dropped", level, variable)
            }
            FitWarning::DroppedRows { count } => write!(f, "{} incomplete rows dropped", count),
            FitWarning::BoundaryProbabilities { count } => {
                write!(f, "{} fitted probabilities numerically 0 or 1", count)
            }
            FitWarning::RefitWithMl => write!(f, "refit by maximum likelihood"),
        }
    }
}

/// Rows, response and cluster partition the model was fitted to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitData {
    pub x: DenseMatrix,
    pub y: Vec<f64>,
    pub rows: Vec<usize>,
    pub clusters: Vec<Vec<usize>>,
    pub cluster_labels: Vec<String>,
    pub fingerprint: u64,
}

impl FitData {
    pub(crate) fn from_design(design: &Design, response: &str) -> Self {
        Self {
            x: design.x.clone(),
            y: design.y.clone(),
            rows: design.rows.clone(),
            clusters: design.clusters.clone(),
            cluster_labels: design.cluster_labels.clone(),
            fingerprint: design.fingerprint(response),
        }
    }
}

/// Variance-parameter state of a linear (GLS or mixed) fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginalState {
    pub covariance: CovarianceModel,
    /// Unconstrained optimizer coordinates.
    pub theta: Vec<f64>,
    /// Residual variance.
    pub sigma2: f64,
}

impl MarginalState {
    /// Per-cluster marginal covariance sigma^2 * R_j.
    pub fn blocks(&self, clusters: &[Vec<usize>]) -> Vec<DenseMatrix> {
        self.covariance
            .blocks(&self.theta, clusters)
            .into_iter()
            .map(|r| r.scale(self.sigma2))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlsDetails {
    pub structure: CovarianceStructure,
    pub params: CovarianceParams,
    pub marginal: MarginalState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmeDetails {
    pub random: RandomEffects,
    pub effect_names: Vec<String>,
    /// Random-effects covariance (absolute scale).
    pub effects_covariance: DenseMatrix,
    /// Conditional modes of the random effects, one vector per cluster.
    pub blups: Vec<Vec<f64>>,
    pub marginal: MarginalState,
}

impl LmeDetails {
    pub fn residual_variance(&self) -> f64 {
        self.marginal.sigma2
    }

    pub fn effect_sd(&self) -> Vec<f64> {
        self.effects_covariance.diag().iter().map(|v| v.sqrt()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticDetails {
    pub deviance: f64,
    pub null_deviance: f64,
    /// Fitted probabilities.
    pub fitted: Vec<f64>,
    pub diagnostics: ObservationDiagnostics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FitDetails {
    LinearMixed(LmeDetails),
    Gls(GlsDetails),
    Logistic(LogisticDetails),
}

/// A fitted model. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedModel {
    pub spec: ModelSpec,
    pub method: EstimationMethod,
    pub coefficient_names: Vec<String>,
    /// Term label owning each coefficient.
    pub coefficient_terms: Vec<String>,
    pub coefficients: Vec<f64>,
    /// Model-based covariance of the coefficients.
    pub covariance: DenseMatrix,
    pub log_likelihood: f64,
    /// Number of estimated parameters, including variance parameters.
    pub n_params: usize,
    pub n_obs: usize,
    pub iterations: u64,
    pub warnings: Vec<FitWarning>,
    pub details: FitDetails,
    pub data: FitData,
}

impl FittedModel {
    pub fn aic(&self) -> f64 {
        -2.0 * self.log_likelihood + 2.0 * self.n_params as f64
    }

    pub fn bic(&self) -> f64 {
        -2.0 * self.log_likelihood + (self.n_obs as f64).ln() * self.n_params as f64
    }

    pub fn n_coef(&self) -> usize {
        self.coefficients.len()
    }

    pub fn residual_df(&self) -> usize {
        self.n_obs.saturating_sub(self.n_coef())
    }

    pub fn n_clusters(&self) -> usize {
        self.data.clusters.len()
    }

    pub fn family_name(&self) -> &'static str {
        match self.details {
            FitDetails::LinearMixed(_) => "linear mixed-effects",
            FitDetails::Gls(_) => "generalized least squares",
            FitDetails::Logistic(_) => "logistic",
        }
    }

    pub fn is_linear(&self) -> bool {
        !matches!(self.details, FitDetails::Logistic(_))
    }

    pub fn marginal(&self) -> Option<&MarginalState> {
        match &self.details {
            FitDetails::LinearMixed(d) => Some(&d.marginal),
            FitDetails::Gls(d) => Some(&d.marginal),
            FitDetails::Logistic(_) => None,
        }
    }

    pub fn coefficient_index(&self, name: &str) -> Result<usize> {
        self.coefficient_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| ModelError::UnknownCoefficient(name.to_string()))
    }

    pub fn coefficient(&self, name: &str) -> Result<f64> {
        Ok(self.coefficients[self.coefficient_index(name)?])
    }

    /// Population-level fitted values: X beta, or probabilities for logistic.
    pub fn fitted_values(&self) -> Vec<f64> {
        match &self.details {
            FitDetails::Logistic(d) => d.fitted.clone(),
            _ => self.data.x.mat_vec(&self.coefficients),
        }
    }

    pub fn residuals(&self) -> Vec<f64> {
        self.data
            .y
            .iter()
            .zip(self.fitted_values())
            .map(|(y, f)| y - f)
            .collect()
    }

    pub fn has_warning(&self, warning: &FitWarning) -> bool {
        self.warnings.contains(warning)
    }
}
