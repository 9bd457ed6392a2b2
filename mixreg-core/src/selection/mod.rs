//! Model comparison and selection.
//!
//! - Likelihood-ratio comparison of nested fits with AIC and BIC
//! - Sequential comparison of a chain of nested fits
//! - Parallel fitting and ranking of candidate models
//! - Greedy stepwise search over fixed-effect terms (see [`stepwise`])

pub mod stepwise;

use mixreg_data::Table;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use tracing::{debug, warn};

use crate::error::{ModelError, Result};
use crate::fit::model::{EstimationMethod, FittedModel};
use crate::fit::ModelFamily;
use crate::spec::ModelSpec;

pub use stepwise::{stepwise_select, Direction, Scope};

/// Information criterion minimized during selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Criterion {
    #[default]
    Aic,
    Bic,
}

impl Criterion {
    pub fn value(self, model: &FittedModel) -> f64 {
        match self {
            Criterion::Aic => model.aic(),
            Criterion::Bic => model.bic(),
        }
    }
}

/// Likelihood summary of one fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitStatistics {
    pub log_likelihood: f64,
    pub n_params: usize,
    pub aic: f64,
    pub bic: f64,
}

impl From<&FittedModel> for FitStatistics {
    fn from(model: &FittedModel) -> Self {
        Self {
            log_likelihood: model.log_likelihood,
            n_params: model.n_params,
            aic: model.aic(),
            bic: model.bic(),
        }
    }
}

/// Likelihood-ratio comparison of a reduced fit against a fuller one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub reduced: FitStatistics,
    pub full: FitStatistics,
    /// 2 (logLik_full - logLik_reduced), floored at zero.
    pub statistic: f64,
    /// Difference in parameter counts.
    pub df: usize,
    pub p_value: f64,
}

fn not_nested(reason: impl Into<String>) -> ModelError {
    ModelError::NotNested(reason.into())
}

/// Compare `reduced` against `full`.
///
/// The fits must share the response, likelihood family, data and estimation
/// method; the fixed terms of `reduced` must be a subset of those of `full`
/// and `full` must have more parameters. REML fits are only comparable when
/// their fixed effects are identical, since the restricted likelihood depends
/// on the fixed-effect design.
pub fn compare(reduced: &FittedModel, full: &FittedModel) -> Result<ComparisonResult> {
    if reduced.spec.response != full.spec.response {
        return Err(not_nested(format!(
            "responses differ ('{}' vs '{}')",
            reduced.spec.response, full.spec.response
        )));
    }
    if reduced.likelihood_kind() != full.likelihood_kind() {
        return Err(not_nested(format!(
            "likelihood families differ ({} vs {})",
            reduced.family_name(),
            full.family_name()
        )));
    }
    if reduced.data.fingerprint != full.data.fingerprint {
        return Err(not_nested("models were fitted to different observations"));
    }
    if reduced.method != full.method {
        return Err(not_nested(format!(
            "estimation methods differ ({} vs {})",
            reduced.method, full.method
        )));
    }
    let reduced_terms = reduced.spec.term_labels();
    let full_terms = full.spec.term_labels();
    if !reduced_terms.is_subset(&full_terms) || (reduced.spec.intercept && !full.spec.intercept) {
        return Err(not_nested("fixed terms of the first model are not contained in the second"));
    }
    if full.n_params <= reduced.n_params {
        return Err(not_nested(format!(
            "second model must have more parameters ({} vs {})",
            full.n_params, reduced.n_params
        )));
    }
    if reduced.method == EstimationMethod::Reml
        && (reduced_terms != full_terms || reduced.spec.intercept != full.spec.intercept)
    {
        return Err(not_nested(
            "REML fits with different fixed effects are not comparable; refit with ML",
        ));
    }

    let statistic = (2.0 * (full.log_likelihood - reduced.log_likelihood)).max(0.0);
    let df = full.n_params - reduced.n_params;
    let chi2 = ChiSquared::new(df as f64).map_err(|e| ModelError::Distribution(e.to_string()))?;
    let p_value = 1.0 - chi2.cdf(statistic);
    debug!(
        "LRT: statistic={:.4}, df={}, p={:.4e}",
        statistic, df, p_value
    );
    Ok(ComparisonResult {
        reduced: reduced.into(),
        full: full.into(),
        statistic,
        df,
        p_value,
    })
}

/// Compare each fit with the next, as in a sequential analysis-of-deviance
/// table. Fits must be ordered from smallest to largest.
pub fn compare_chain(models: &[FittedModel]) -> Result<Vec<ComparisonResult>> {
    models
        .windows(2)
        .map(|pair| compare(&pair[0], &pair[1]))
        .collect()
}

/// A named model to fit.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    pub spec: ModelSpec,
    pub family: ModelFamily,
}

/// Outcome of fitting one candidate; failures are kept as unavailable entries.
#[derive(Debug, Clone)]
pub struct CandidateFit {
    pub name: String,
    pub result: Result<FittedModel>,
}

impl CandidateFit {
    pub fn model(&self) -> Option<&FittedModel> {
        self.result.as_ref().ok()
    }
}

/// Fit every candidate on the rayon pool. Results keep the input order.
pub fn fit_candidates(table: &Table, candidates: &[Candidate]) -> Vec<CandidateFit> {
    candidates
        .par_iter()
        .map(|c| {
            let result = c.family.fit(table, &c.spec);
            if let Err(e) = &result {
                warn!("Candidate '{}' unavailable: {}", c.name, e);
            }
            CandidateFit {
                name: c.name.clone(),
                result,
            }
        })
        .collect()
}

/// Available candidates ordered by `criterion` (smallest first), ties by
/// name.
pub fn rank_by(fits: &[CandidateFit], criterion: Criterion) -> Vec<(String, f64)> {
    let mut ranked: Vec<(String, f64)> = fits
        .iter()
        .filter_map(|f| f.model().map(|m| (f.name.clone(), criterion.value(m))))
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}
