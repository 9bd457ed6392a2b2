//! mixreg-core: Model fitting, inference and selection for mixreg
//!
//! Fits linear mixed-effects, generalized least squares and logistic
//! regression models from a structured [`ModelSpec`], computes model-based
//! and cluster-robust inference, compares nested fits and runs stepwise
//! term selection. Fitted models can be saved and reloaded.

pub mod error;
pub mod fit;
pub mod inference;
pub mod model;
pub mod selection;
pub mod spec;

pub use error::{ModelError, Result};
pub use fit::covariance::{Correlation, CovarianceParams, CovarianceStructure};
pub use fit::gls::{fit_generalized_least_squares, GlsOptions};
pub use fit::lme::{fit_linear_mixed_effects, LmeOptions};
pub use fit::logistic::{
    fit_logistic_regression, InfluenceFlag, InfluenceReason, InfluenceThresholds, LogisticOptions,
    ObservationDiagnostics,
};
pub use fit::model::{EstimationMethod, FitDetails, FitWarning, FittedModel};
pub use fit::optim::NelderMeadConfig;
pub use fit::{LikelihoodKind, ModelFamily};
pub use inference::{
    coefficient_table, confidence_interval, odds_ratios, satterthwaite_test, standard_errors,
    term_contrast, wald_test, EstimatorKind, Inferable, IntervalMethod, VarianceEstimate,
};
pub use selection::{
    compare, compare_chain, fit_candidates, rank_by, stepwise_select, Candidate, ComparisonResult,
    Criterion, Direction, Scope,
};
pub use spec::{ModelSpec, RandomEffects, Term};
