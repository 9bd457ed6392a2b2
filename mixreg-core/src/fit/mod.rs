//! Model fitting.
//!
//! - Design-matrix expansion shared by every family
//! - Profiled ML/REML likelihood for block-diagonal residual covariances
//! - GLS with compound-symmetric or AR(1) correlation and per-stratum variances
//! - Linear mixed-effects models (random intercepts and slopes)
//! - Logistic regression by IRLS, with observation diagnostics

pub mod covariance;
pub mod design;
pub mod gls;
pub mod link;
pub mod lme;
pub mod logistic;
pub mod model;
pub mod optim;
pub mod profile;

use mixreg_data::Table;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::spec::{ModelSpec, RandomEffects};
use covariance::CovarianceStructure;
use gls::{fit_generalized_least_squares, GlsOptions};
use lme::{fit_linear_mixed_effects, LmeOptions};
use logistic::{fit_logistic_regression, LogisticOptions};
use model::{EstimationMethod, FittedModel};

/// A model family with its fitting options, applied to varying specs by the
/// selection routines.
#[derive(Debug, Clone)]
pub enum ModelFamily {
    LinearMixed {
        random: RandomEffects,
        options: LmeOptions,
    },
    Gls {
        structure: CovarianceStructure,
        method: EstimationMethod,
        options: GlsOptions,
    },
    Logistic {
        options: LogisticOptions,
    },
}

/// Coarse family tag used when checking that two fits are comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LikelihoodKind {
    Gaussian,
    Binomial,
}

impl ModelFamily {
    pub fn fit(&self, table: &Table, spec: &ModelSpec) -> Result<FittedModel> {
        match self {
            ModelFamily::LinearMixed { random, options } => {
                fit_linear_mixed_effects(table, spec, random, options)
            }
            ModelFamily::Gls {
                structure,
                method,
                options,
            } => fit_generalized_least_squares(table, spec, structure, *method, options),
            ModelFamily::Logistic { options } => fit_logistic_regression(table, spec, options),
        }
    }

    pub fn method(&self) -> EstimationMethod {
        match self {
            ModelFamily::LinearMixed { options, .. } => options.method,
            ModelFamily::Gls { method, .. } => *method,
            ModelFamily::Logistic { .. } => EstimationMethod::Ml,
        }
    }

    /// Columns the family reads beyond those of the spec.
    pub fn extra_variables(&self) -> Vec<String> {
        match self {
            ModelFamily::LinearMixed { random, .. } => random.slopes.clone(),
            ModelFamily::Gls { structure, .. } => structure.variance_by.iter().cloned().collect(),
            ModelFamily::Logistic { .. } => Vec::new(),
        }
    }

    /// Same family with variance parameters estimated by ML.
    pub fn with_ml(&self) -> ModelFamily {
        match self {
            ModelFamily::LinearMixed { random, options } => ModelFamily::LinearMixed {
                random: random.clone(),
                options: LmeOptions {
                    method: EstimationMethod::Ml,
                    ..options.clone()
                },
            },
            ModelFamily::Gls {
                structure, options, ..
            } => ModelFamily::Gls {
                structure: structure.clone(),
                method: EstimationMethod::Ml,
                options: options.clone(),
            },
            ModelFamily::Logistic { options } => ModelFamily::Logistic {
                options: options.clone(),
            },
        }
    }
}

impl FittedModel {
    pub fn likelihood_kind(&self) -> LikelihoodKind {
        if self.is_linear() {
            LikelihoodKind::Gaussian
        } else {
            LikelihoodKind::Binomial
        }
    }
}
