//! Generalized least squares with a structured residual covariance.

use mixreg_data::Table;
use tracing::{debug, info};

use super::covariance::{Correlation, CovarianceModel, CovarianceStructure, StructuredCovariance};
use super::design::Design;
use super::model::{EstimationMethod, FitData, FitDetails, FittedModel, GlsDetails, MarginalState};
use super::optim::NelderMeadConfig;
use super::profile::fit_marginal;
use crate::error::{ModelError, Result};
use crate::spec::ModelSpec;

#[derive(Debug, Clone, Default)]
pub struct GlsOptions {
    pub optimizer: NelderMeadConfig,
}

/// Fit a linear model whose residuals are correlated within clusters of the
/// spec's grouping column and may have a separate variance per stratum.
///
/// With an independent structure and no variance function this is ordinary
/// least squares.
pub fn fit_generalized_least_squares(
    table: &Table,
    spec: &ModelSpec,
    structure: &CovarianceStructure,
    method: EstimationMethod,
    options: &GlsOptions,
) -> Result<FittedModel> {
    if structure.correlation != Correlation::Independent && spec.group.is_none() {
        return Err(ModelError::InvalidSpec(
            "a correlation structure requires a grouping column".into(),
        ));
    }
    let extra: Vec<&str> = structure.variance_by.iter().map(|s| s.as_str()).collect();
    let design = Design::build(table, spec, &extra)?;

    let (levels, strata) = match &structure.variance_by {
        Some(column) => design.strata(table, column)?,
        None => (Vec::new(), Vec::new()),
    };
    let structured = StructuredCovariance::new(structure, design.max_cluster_size(), levels, strata)?;
    let covariance = CovarianceModel::Structured(structured.clone());
    debug!(
        "GLS: {:?} correlation, {} variance parameters",
        structure.correlation,
        covariance.n_theta()
    );

    let fit = fit_marginal(
        &design.x,
        &design.y,
        &design.clusters,
        &covariance,
        method,
        None,
        &options.optimizer,
    )?;
    let sigma2 = fit.profile.sigma2(method);
    let params = structured.params(&fit.theta);

    info!(
        "GLS ({}) converged in {} iterations: logLik={:.4}, sigma={:.4}, rho={:?}",
        method,
        fit.iterations,
        fit.log_likelihood,
        sigma2.sqrt(),
        params.correlation
    );

    let p = design.n_coef();
    Ok(FittedModel {
        spec: spec.clone(),
        method,
        coefficient_names: design.column_names.clone(),
        coefficient_terms: design.column_terms.clone(),
        coefficients: fit.profile.beta.clone(),
        covariance: fit.profile.xtx_inv.scale(sigma2),
        log_likelihood: fit.log_likelihood,
        n_params: p + covariance.n_theta() + 1,
        n_obs: design.n_obs(),
        iterations: fit.iterations,
        warnings: design.warnings.clone(),
        details: FitDetails::Gls(GlsDetails {
            structure: structure.clone(),
            params,
            marginal: MarginalState {
                covariance,
                theta: fit.theta,
                sigma2,
            },
        }),
        data: FitData::from_design(&design, &spec.response),
    })
}
