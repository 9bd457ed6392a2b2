//! Confidence intervals, odds ratios and coefficient tables.
//!
//! Wald intervals are estimate +/- q * SE and symmetric by construction, with
//! q from N(0, 1) for model-based logistic fits, t(n - p) for model-based
//! linear fits and t(Bell-McCaffrey df) for sandwich estimators.
//!
//! Profile intervals invert the likelihood-ratio test: the bounds are where
//! the maximized log-likelihood with the coefficient held fixed drops
//! chi2_1(level) / 2 below its maximum. Linear fits are profiled on the ML
//! surface whatever their estimation method. Profile intervals do not depend
//! on the variance estimator.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::satterthwaite::satterthwaite_df;
use super::{
    critical_value, standard_errors, two_sided_p, unit_contrast, EstimatorKind, Inferable,
};
use crate::error::{ModelError, Result};
use crate::fit::logistic::{irls, LogisticOptions};
use crate::fit::model::{EstimationMethod, FittedModel};
use crate::fit::optim::NelderMeadConfig;
use crate::fit::profile::fit_marginal;

const MAX_BRACKET_DOUBLINGS: usize = 40;
const MAX_BISECTIONS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalMethod {
    Wald,
    Profile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsRatio {
    pub term: String,
    pub odds_ratio: f64,
    pub low: f64,
    pub high: f64,
}

/// One line of a coefficient summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoefficientRow {
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
    pub statistic: f64,
    /// Infinite for normal reference.
    pub df: f64,
    pub p_value: f64,
    pub low: f64,
    pub high: f64,
}

/// Degrees of freedom of the Wald reference distribution for one coefficient.
fn wald_df<M: Inferable + ?Sized>(model: &M, kind: EstimatorKind, index: usize) -> Result<f64> {
    match kind {
        EstimatorKind::ModelBased => Ok(model.reference_df()),
        _ => satterthwaite_df(model, kind, &unit_contrast(model.estimates().len(), index)),
    }
}

/// Confidence interval for one coefficient.
pub fn confidence_interval<M: Inferable + ?Sized>(
    model: &M,
    coefficient: &str,
    kind: EstimatorKind,
    level: f64,
    method: IntervalMethod,
) -> Result<(f64, f64)> {
    let index = model.coefficient_position(coefficient)?;
    let estimate = model.estimates()[index];
    let se = standard_errors(model, kind)?.standard_errors[index];
    match method {
        IntervalMethod::Wald => {
            let q = critical_value(level, wald_df(model, kind, index)?)?;
            Ok((estimate - q * se, estimate + q * se))
        }
        IntervalMethod::Profile => profile_interval(model, index, level, se),
    }
}

fn profile_interval<M: Inferable + ?Sized>(
    model: &M,
    index: usize,
    level: f64,
    se: f64,
) -> Result<(f64, f64)> {
    if !(level > 0.0 && level < 1.0) {
        return Err(ModelError::InvalidSpec(format!(
            "confidence level {} outside (0, 1)",
            level
        )));
    }
    // chi-square(1) quantile as z^2
    let crit = critical_value(level, f64::INFINITY)?.powi(2);
    let target = model.profile_reference()? - 0.5 * crit;
    let estimate = model.estimates()[index];
    let step = if se.is_finite() && se > 0.0 { se } else { 1.0 };

    let mut bounds = [0.0; 2];
    for (bound, sign) in bounds.iter_mut().zip([-1.0, 1.0]) {
        // bracket: inside at `near`, outside at `far`
        let mut near = estimate;
        let mut far = estimate + sign * step;
        let mut doublings = 0;
        while model.profile_at(index, far)? >= target {
            near = far;
            far = estimate + sign * 2.0 * (far - estimate).abs();
            doublings += 1;
            if doublings > MAX_BRACKET_DOUBLINGS {
                return Err(ModelError::InvalidSpec(
                    "profile likelihood does not fall below the interval cutoff".into(),
                ));
            }
        }
        let tol = 1e-10 * (1.0 + estimate.abs() + step);
        for _ in 0..MAX_BISECTIONS {
            if (far - near).abs() < tol {
                break;
            }
            let mid = 0.5 * (near + far);
            if model.profile_at(index, mid)? >= target {
                near = mid;
            } else {
                far = mid;
            }
        }
        *bound = 0.5 * (near + far);
    }
    debug!(
        "Profile interval for coefficient {}: ({:.6}, {:.6})",
        index, bounds[0], bounds[1]
    );
    Ok((bounds[0], bounds[1]))
}

/// Maximized log-likelihood with coefficient `fixed.0` held at `fixed.1`, or
/// the unconstrained maximum when `fixed` is `None`. Logistic fits are refit
/// by IRLS with an offset; linear fits by ML with the remaining coefficients
/// and variance parameters free, started from the fitted variance parameters.
pub(crate) fn profile_fixed(model: &FittedModel, fixed: Option<(usize, f64)>) -> Result<f64> {
    let data = &model.data;
    let n = data.y.len();
    let (x, offset) = match fixed {
        Some((k, value)) => {
            let keep: Vec<usize> = (0..data.x.ncols()).filter(|&j| j != k).collect();
            let offset: Vec<f64> = data.x.col(k).iter().map(|v| v * value).collect();
            (data.x.select_cols(&keep), offset)
        }
        None => (data.x.clone(), vec![0.0; n]),
    };

    match model.marginal() {
        None => {
            let fit = irls(&x, &data.y, &offset, &LogisticOptions::default())?;
            Ok(-0.5 * fit.deviance)
        }
        Some(marginal) => {
            let y: Vec<f64> = data.y.iter().zip(&offset).map(|(y, o)| y - o).collect();
            let fit = fit_marginal(
                &x,
                &y,
                &data.clusters,
                &marginal.covariance,
                EstimationMethod::Ml,
                Some(&marginal.theta),
                &NelderMeadConfig::default(),
            )?;
            Ok(fit.log_likelihood)
        }
    }
}

impl FittedModel {
    /// Maximized (ML) log-likelihood with `coefficient` held at `value`.
    pub fn profile_log_likelihood(&self, coefficient: &str, value: f64) -> Result<f64> {
        let index = self.coefficient_index(coefficient)?;
        profile_fixed(self, Some((index, value)))
    }
}

/// Exponentiated coefficients of a logistic fit with Wald bounds.
pub fn odds_ratios(
    model: &FittedModel,
    kind: EstimatorKind,
    level: f64,
) -> Result<Vec<OddsRatio>> {
    if model.is_linear() {
        return Err(ModelError::UnsupportedModel(format!(
            "odds ratios need a logistic fit, got {}",
            model.family_name()
        )));
    }
    coefficient_table(model, kind, level).map(|rows| {
        rows.into_iter()
            .map(|r| OddsRatio {
                term: r.name,
                odds_ratio: r.estimate.exp(),
                low: r.low.exp(),
                high: r.high.exp(),
            })
            .collect()
    })
}

/// Estimate, standard error, test and Wald interval for every coefficient.
pub fn coefficient_table<M: Inferable + ?Sized>(
    model: &M,
    kind: EstimatorKind,
    level: f64,
) -> Result<Vec<CoefficientRow>> {
    let v = standard_errors(model, kind)?;
    model
        .names()
        .iter()
        .enumerate()
        .map(|(i, name)| -> Result<CoefficientRow> {
            let estimate = model.estimates()[i];
            let std_error = v.standard_errors[i];
            let df = wald_df(model, kind, i)?;
            let statistic = estimate / std_error;
            let q = critical_value(level, df)?;
            Ok(CoefficientRow {
                name: name.clone(),
                estimate,
                std_error,
                statistic,
                df,
                p_value: two_sided_p(statistic, df)?,
                low: estimate - q * std_error,
                high: estimate + q * std_error,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::covariance::CovarianceStructure;
    use crate::fit::gls::{fit_generalized_least_squares, GlsOptions};
    use crate::fit::logistic::fit_logistic_regression;
    use crate::spec::ModelSpec;
    use mixreg_data::{Column, Table};

    fn admissions() -> Table {
        let mut y = Vec::new();
        let mut x = Vec::new();
        for (group, events) in [(0.0, 3), (1.0, 6)] {
            for k in 0..10 {
                y.push(if k < events { 1.0 } else { 0.0 });
                x.push(group);
            }
        }
        Table::new(vec![
            ("admit".into(), Column::Numeric(y)),
            ("x".into(), Column::Numeric(x)),
        ])
        .unwrap()
    }

    fn logistic() -> FittedModel {
        let spec = ModelSpec::builder("admit").term("x").build().unwrap();
        fit_logistic_regression(&admissions(), &spec, &LogisticOptions::default()).unwrap()
    }

    #[test]
    fn test_odds_ratios_exponentiate_coefficients() {
        let model = logistic();
        let ors = odds_ratios(&model, EstimatorKind::ModelBased, 0.95).unwrap();
        assert_eq!(ors.len(), 2);
        for (or, b) in ors.iter().zip(&model.coefficients) {
            assert!((or.odds_ratio - b.exp()).abs() < 1e-12 * or.odds_ratio);
            assert!(or.low <= or.odds_ratio && or.odds_ratio <= or.high);
        }
        // 6/4 over 3/7
        assert!((ors[1].odds_ratio - 3.5).abs() < 1e-6);
    }

    #[test]
    fn test_odds_ratios_reject_linear_fit() {
        let spec = ModelSpec::builder("admit").term("x").build().unwrap();
        let linear = fit_generalized_least_squares(
            &admissions(),
            &spec,
            &CovarianceStructure::independent(),
            EstimationMethod::Ml,
            &GlsOptions::default(),
        )
        .unwrap();
        assert!(matches!(
            odds_ratios(&linear, EstimatorKind::ModelBased, 0.95),
            Err(ModelError::UnsupportedModel(_))
        ));
    }

    #[test]
    fn test_wald_symmetric_profile_contains_estimate() {
        let model = logistic();
        let b = model.coefficient("x").unwrap();
        let (lo, hi) =
            confidence_interval(&model, "x", EstimatorKind::ModelBased, 0.95, IntervalMethod::Wald)
                .unwrap();
        assert!(((hi - b) - (b - lo)).abs() < 1e-10);

        let (plo, phi) = confidence_interval(
            &model,
            "x",
            EstimatorKind::ModelBased,
            0.95,
            IntervalMethod::Profile,
        )
        .unwrap();
        assert!(plo < b && b < phi);
        assert!(((phi - b) - (b - plo)).abs() > 1e-4);
        // the likelihood at each bound sits at the cutoff
        let cutoff = model.log_likelihood - 0.5 * 3.841458820694124;
        assert!((model.profile_log_likelihood("x", plo).unwrap() - cutoff).abs() < 1e-6);
        assert!((model.profile_log_likelihood("x", phi).unwrap() - cutoff).abs() < 1e-6);
    }

    #[test]
    fn test_profile_interval_ols_closed_form() {
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y = vec![0.8, 2.1, 2.9, 4.3, 4.8, 6.2, 7.1, 7.7, 9.4, 9.8];
        let table = Table::new(vec![
            ("y".into(), Column::Numeric(y)),
            ("x".into(), Column::Numeric(x)),
        ])
        .unwrap();
        let spec = ModelSpec::builder("y").term("x").build().unwrap();
        let model = fit_generalized_least_squares(
            &table,
            &spec,
            &CovarianceStructure::independent(),
            EstimationMethod::Ml,
            &GlsOptions::default(),
        )
        .unwrap();

        // RSS(b) = RSS + (b - b_hat)^2 / m_kk, so the bound solves
        // n ln(RSS(b) / RSS) = chi2_1(level)
        let n = 10.0;
        let var = model.covariance.get(1, 1);
        let half = (n * var * ((3.841458820694124 / n).exp() - 1.0)).sqrt();
        let b = model.coefficient("x").unwrap();
        let (lo, hi) = confidence_interval(
            &model,
            "x",
            EstimatorKind::ModelBased,
            0.95,
            IntervalMethod::Profile,
        )
        .unwrap();
        assert!((lo - (b - half)).abs() < 1e-6);
        assert!((hi - (b + half)).abs() < 1e-6);
    }

    #[test]
    fn test_coefficient_table_uses_residual_df() {
        let spec = ModelSpec::builder("admit").term("x").build().unwrap();
        let linear = fit_generalized_least_squares(
            &admissions(),
            &spec,
            &CovarianceStructure::independent(),
            EstimationMethod::Reml,
            &GlsOptions::default(),
        )
        .unwrap();
        let rows = coefficient_table(&linear, EstimatorKind::ModelBased, 0.9).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].df, 18.0);
        assert!(rows[1].low < rows[1].estimate && rows[1].estimate < rows[1].high);

        let logistic_rows = coefficient_table(&logistic(), EstimatorKind::ModelBased, 0.9).unwrap();
        assert!(logistic_rows[0].df.is_infinite());
    }
}
