//! Linear mixed-effects models with random effects varying by cluster.
//!
//! Model: y_j = X_j beta + Z_j b_j + e_j, b_j ~ N(0, sigma^2 Psi),
//! e_j ~ N(0, sigma^2 I). The marginal covariance sigma^2 (I + Z_j Psi Z_j')
//! goes through the same profiled likelihood as GLS, with Psi = Lambda Lambda'
//! parameterized by the lower triangle of Lambda.

use mixreg_data::Table;
use mixreg_linalg::decomposition::CholeskyDecomp;
use tracing::{debug, info, warn};

use super::covariance::{CovarianceModel, RandomEffectsCovariance};
use super::design::Design;
use super::model::{EstimationMethod, FitData, FitDetails, FittedModel, LmeDetails, MarginalState};
use super::optim::NelderMeadConfig;
use super::profile::fit_marginal;
use crate::error::{ModelError, Result};
use crate::spec::{ModelSpec, RandomEffects};

/// Configuration for mixed-model fitting.
#[derive(Debug, Clone)]
pub struct LmeOptions {
    pub method: EstimationMethod,
    /// A relative Cholesky diagonal below this marks a singular fit.
    pub singular_tol: f64,
    pub optimizer: NelderMeadConfig,
}

impl Default for LmeOptions {
    fn default() -> Self {
        Self {
            method: EstimationMethod::Reml,
            singular_tol: 1e-4,
            optimizer: NelderMeadConfig::default(),
        }
    }
}

/// Fit a linear mixed model with `random` effects varying by the spec's group.
///
/// Fails with [`ModelError::SingularFit`] when the estimated random-effects
/// covariance is on the boundary (a variance at zero or a perfect
/// correlation).
pub fn fit_linear_mixed_effects(
    table: &Table,
    spec: &ModelSpec,
    random: &RandomEffects,
    options: &LmeOptions,
) -> Result<FittedModel> {
    if spec.group.is_none() {
        return Err(ModelError::InvalidSpec(
            "a mixed model requires a grouping column".into(),
        ));
    }
    let extra: Vec<&str> = random.slopes.iter().map(|s| s.as_str()).collect();
    let mut design = Design::build(table, spec, &extra)?;
    let (z, names) = design.random_effects_matrix(table, random)?;
    let re = RandomEffectsCovariance::new(z, names);
    let covariance = CovarianceModel::RandomEffects(re.clone());
    debug!(
        "LME: {} random effects over {} clusters",
        re.q(),
        design.clusters.len()
    );

    let method = options.method;
    let fit = fit_marginal(
        &design.x,
        &design.y,
        &design.clusters,
        &covariance,
        method,
        None,
        &options.optimizer,
    )?;

    let smallest = re
        .lambda_diagonal(&fit.theta)
        .into_iter()
        .fold(f64::INFINITY, f64::min);
    if smallest < options.singular_tol {
        warn!(
            "Singular fit: relative Cholesky diagonal {:.2e} below {:.0e}",
            smallest, options.singular_tol
        );
        return Err(ModelError::SingularFit {
            value: smallest,
            tol: options.singular_tol,
        });
    }

    let sigma2 = fit.profile.sigma2(method);
    let psi = re.psi(&fit.theta);
    let blups = conditional_modes(&design, &covariance, &fit.theta, &re, &fit.profile.beta)?;

    info!(
        "LME ({}) converged in {} iterations: logLik={:.4}, sigma={:.4}",
        method,
        fit.iterations,
        fit.log_likelihood,
        sigma2.sqrt()
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
        n_params: p + re.n_theta() + 1,
        n_obs: design.n_obs(),
        iterations: fit.iterations,
        warnings: design.warnings.clone(),
        details: FitDetails::LinearMixed(LmeDetails {
            random: random.clone(),
            effect_names: re.names.clone(),
            effects_covariance: psi.scale(sigma2),
            blups,
            marginal: MarginalState {
                covariance,
                theta: fit.theta,
                sigma2,
            },
        }),
        data: FitData::from_design(&design, &spec.response),
    })
}

/// b_j = Psi Z_j' R_j^{-1} (y_j - X_j beta) for every cluster.
fn conditional_modes(
    design: &Design,
    covariance: &CovarianceModel,
    theta: &[f64],
    re: &RandomEffectsCovariance,
    beta: &[f64],
) -> Result<Vec<Vec<f64>>> {
    let psi = re.psi(theta);
    let fitted = design.x.mat_vec(beta);
    let blocks = covariance.blocks(theta, &design.clusters);
    design
        .clusters
        .iter()
        .zip(blocks)
        .map(|(rows, r)| {
            let resid: Vec<f64> = rows.iter().map(|&i| design.y[i] - fitted[i]).collect();
            let solved = CholeskyDecomp::new(&r)?.solve(&resid);
            let zj = re.z.select_rows(rows);
            Ok(psi.mat_vec(&zj.t_mat_vec(&solved)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixreg_data::Column;

    fn clustered(y: Vec<f64>, per: usize) -> Table {
        let n = y.len();
        let x: Vec<f64> = (0..n).map(|i| (i % per) as f64).collect();
        let g: Vec<String> = (0..n).map(|i| format!("g{}", i / per)).collect();
        Table::new(vec![
            ("y".into(), Column::Numeric(y)),
            ("x".into(), Column::Numeric(x)),
            ("g".into(), Column::Identifier(g)),
        ])
        .unwrap()
    }

    #[test]
    fn test_random_intercept_recovers_between_variance() {
        // strong cluster offsets, small within-cluster noise
        let offsets = [-3.0, 2.0, 0.5, -1.0, 4.0, -2.5];
        let noise = [0.1, -0.2, 0.15, -0.05];
        let mut y = Vec::new();
        for o in offsets {
            for (k, e) in noise.iter().enumerate() {
                y.push(10.0 + o + 0.5 * k as f64 + e);
            }
        }
        let table = clustered(y, 4);
        let spec = ModelSpec::builder("y").term("x").group("g").build().unwrap();
        let fit =
            fit_linear_mixed_effects(&table, &spec, &RandomEffects::intercept(), &LmeOptions::default())
                .unwrap();

        assert!((fit.coefficient("x").unwrap() - 0.5).abs() < 0.1);
        let FitDetails::LinearMixed(d) = &fit.details else {
            panic!("expected mixed-model details");
        };
        assert!(d.effect_sd()[0] > 1.5);
        assert!(d.residual_variance() < 0.1);
        assert_eq!(d.blups.len(), 6);
        // shrunken offsets keep their sign and ordering
        assert!(d.blups[4][0] > d.blups[1][0]);
        assert!(d.blups[0][0] < 0.0);
        assert_eq!(fit.n_params, 4);
    }

    #[test]
    fn test_zero_between_variance_is_singular() {
        // identical cluster means: the REML between-cluster variance is zero
        let pattern = [-1.0, 0.0, 1.0, 0.5, -0.5];
        let mut y = Vec::new();
        for g in 0..5 {
            for k in 0..5 {
                y.push(pattern[(k + g) % 5]);
            }
        }
        let table = clustered(y, 5);
        let spec = ModelSpec::builder("y").group("g").build().unwrap();
        let err =
            fit_linear_mixed_effects(&table, &spec, &RandomEffects::intercept(), &LmeOptions::default())
                .unwrap_err();
        assert!(matches!(err, ModelError::SingularFit { .. }));
    }

    #[test]
    fn test_group_required() {
        let table = clustered(vec![1.0, 2.0, 3.0, 4.0], 2);
        let spec = ModelSpec::builder("y").term("x").build().unwrap();
        let err =
            fit_linear_mixed_effects(&table, &spec, &RandomEffects::intercept(), &LmeOptions::default())
                .unwrap_err();
        assert!(matches!(err, ModelError::InvalidSpec(_)));
    }
}
