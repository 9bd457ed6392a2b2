//! Profiled Gaussian likelihood for linear models with a block-diagonal
//! residual covariance sigma^2 * R.
//!
//! Each block is whitened through its Cholesky factor, so the fixed effects
//! and sigma^2 have closed forms for any R; only the parameters of R are left
//! to the optimizer. GLS and mixed models share this core.

use std::f64::consts::PI;

use mixreg_linalg::decomposition::CholeskyDecomp;
use mixreg_linalg::{DenseMatrix, LinalgError};

use super::covariance::CovarianceModel;
use super::model::EstimationMethod;
use super::optim::{minimize, NelderMeadConfig, INFEASIBLE};
use crate::error::{ModelError, Result};

/// Closed-form quantities at fixed R.
#[derive(Debug, Clone)]
pub struct GlsProfile {
    pub beta: Vec<f64>,
    /// Whitened residual sum of squares.
    pub rss: f64,
    /// sum_j log|R_j|
    pub log_det_r: f64,
    /// log|X' R^{-1} X|
    pub log_det_xtx: f64,
    /// (X' R^{-1} X)^{-1}
    pub xtx_inv: DenseMatrix,
    pub n: usize,
    pub p: usize,
}

impl GlsProfile {
    pub fn compute(
        x: &DenseMatrix,
        y: &[f64],
        clusters: &[Vec<usize>],
        blocks: &[DenseMatrix],
    ) -> std::result::Result<Self, LinalgError> {
        let n = x.nrows();
        let p = x.ncols();
        let mut xtx = DenseMatrix::zeros(p, p);
        let mut xty = vec![0.0; p];
        let mut log_det_r = 0.0;
        let mut whitened = Vec::with_capacity(clusters.len());

        for (rows, r) in clusters.iter().zip(blocks) {
            let chol = CholeskyDecomp::new(r)?;
            log_det_r += chol.log_det();
            let xs = chol.solve_lower_mat(&x.select_rows(rows));
            let yj: Vec<f64> = rows.iter().map(|&i| y[i]).collect();
            let ys = chol.solve_lower(&yj);
            xtx = xtx.add(&xs.transpose().mat_mul(&xs));
            for (a, v) in xty.iter_mut().zip(xs.t_mat_vec(&ys)) {
                *a += v;
            }
            whitened.push((xs, ys));
        }

        let (beta, xtx_inv, log_det_xtx) = if p == 0 {
            (Vec::new(), DenseMatrix::zeros(0, 0), 0.0)
        } else {
            xtx.symmetrize();
            let chol = CholeskyDecomp::new(&xtx)?;
            (chol.solve(&xty), chol.inverse(), chol.log_det())
        };

        let rss = whitened
            .iter()
            .map(|(xs, ys)| {
                let fit = xs.mat_vec(&beta);
                ys.iter().zip(fit).map(|(a, b)| (a - b).powi(2)).sum::<f64>()
            })
            .sum();

        Ok(Self {
            beta,
            rss,
            log_det_r,
            log_det_xtx,
            xtx_inv,
            n,
            p,
        })
    }

    fn dof(&self, method: EstimationMethod) -> f64 {
        match method {
            EstimationMethod::Ml => self.n as f64,
            EstimationMethod::Reml => (self.n - self.p) as f64,
        }
    }

    /// Estimate of sigma^2 at this R.
    pub fn sigma2(&self, method: EstimationMethod) -> f64 {
        self.rss / self.dof(method)
    }

    /// Log-likelihood maximized over beta and sigma^2.
    pub fn log_likelihood(&self, method: EstimationMethod) -> f64 {
        let m = self.dof(method);
        let ll = -0.5 * m * ((2.0 * PI).ln() + 1.0 + (self.rss / m).ln()) - 0.5 * self.log_det_r;
        match method {
            EstimationMethod::Ml => ll,
            EstimationMethod::Reml => ll - 0.5 * self.log_det_xtx,
        }
    }

    /// Log-likelihood at a given sigma^2, beta profiled.
    pub fn log_likelihood_at(&self, method: EstimationMethod, sigma2: f64) -> f64 {
        let m = self.dof(method);
        let ll = -0.5 * m * (2.0 * PI * sigma2).ln()
            - 0.5 * self.log_det_r
            - self.rss / (2.0 * sigma2);
        match method {
            EstimationMethod::Ml => ll,
            EstimationMethod::Reml => ll - 0.5 * self.log_det_xtx,
        }
    }
}

/// Evaluate the profile at `theta`.
pub fn evaluate(
    x: &DenseMatrix,
    y: &[f64],
    clusters: &[Vec<usize>],
    model: &CovarianceModel,
    theta: &[f64],
) -> std::result::Result<GlsProfile, LinalgError> {
    GlsProfile::compute(x, y, clusters, &model.blocks(theta, clusters))
}

/// Optimized variance parameters and the profile at the optimum.
#[derive(Debug, Clone)]
pub struct MarginalFit {
    pub theta: Vec<f64>,
    pub profile: GlsProfile,
    pub log_likelihood: f64,
    pub iterations: u64,
}

/// Maximize the profiled likelihood over the parameters of `model`.
pub fn fit_marginal(
    x: &DenseMatrix,
    y: &[f64],
    clusters: &[Vec<usize>],
    model: &CovarianceModel,
    method: EstimationMethod,
    start: Option<&[f64]>,
    config: &NelderMeadConfig,
) -> Result<MarginalFit> {
    if x.nrows() <= x.ncols() {
        return Err(ModelError::InvalidSpec(format!(
            "{} observations cannot support {} coefficients",
            x.nrows(),
            x.ncols()
        )));
    }
    let objective = |theta: &[f64]| match evaluate(x, y, clusters, model, theta) {
        Ok(p) => -p.log_likelihood(method),
        Err(_) => INFEASIBLE,
    };
    let theta0 = start
        .map(|s| s.to_vec())
        .unwrap_or_else(|| model.initial_theta());
    let outcome = minimize(&objective, &theta0, config)?;
    if !outcome.converged {
        return Err(ModelError::NonConvergence {
            max_iter: config.max_iter,
        });
    }
    let profile = evaluate(x, y, clusters, model, &outcome.theta)?;
    Ok(MarginalFit {
        log_likelihood: profile.log_likelihood(method),
        theta: outcome.theta,
        profile,
        iterations: outcome.iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::covariance::{CovarianceStructure, StructuredCovariance};

    fn line() -> (DenseMatrix, Vec<f64>) {
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let y = vec![1.1, 1.9, 3.2, 3.8, 5.3, 5.9];
        let mut data = vec![1.0; 6];
        data.extend_from_slice(&xs);
        (DenseMatrix::from_col_major(6, 2, data), y)
    }

    #[test]
    fn test_identity_blocks_give_ols() {
        let (x, y) = line();
        let clusters: Vec<Vec<usize>> = (0..6).map(|i| vec![i]).collect();
        let blocks = vec![DenseMatrix::identity(1); 6];
        let p = GlsProfile::compute(&x, &y, &clusters, &blocks).unwrap();

        // OLS by hand
        let n = 6.0;
        let mx = 3.5;
        let my = y.iter().sum::<f64>() / n;
        let sxy: f64 = (0..6).map(|i| (i as f64 + 1.0 - mx) * (y[i] - my)).sum();
        let sxx: f64 = (0..6).map(|i| (i as f64 + 1.0 - mx).powi(2)).sum();
        let slope = sxy / sxx;
        assert!((p.beta[1] - slope).abs() < 1e-10);
        assert!((p.beta[0] - (my - slope * mx)).abs() < 1e-10);

        let sigma2 = p.rss / n;
        let ll = -0.5 * n * (2.0 * PI * sigma2).ln() - 0.5 * n;
        assert!((p.log_likelihood(EstimationMethod::Ml) - ll).abs() < 1e-10);
        assert!((p.sigma2(EstimationMethod::Reml) - p.rss / 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_profiled_matches_explicit_sigma() {
        let (x, y) = line();
        let clusters = vec![vec![0, 1, 2], vec![3, 4, 5]];
        let s = StructuredCovariance::new(&CovarianceStructure::compound_symmetry(), 3, vec![], vec![])
            .unwrap();
        let model = CovarianceModel::Structured(s);
        let p = evaluate(&x, &y, &clusters, &model, &[0.3]).unwrap();
        for method in [EstimationMethod::Ml, EstimationMethod::Reml] {
            let s2 = p.sigma2(method);
            assert!((p.log_likelihood(method) - p.log_likelihood_at(method, s2)).abs() < 1e-10);
            assert!(p.log_likelihood_at(method, s2 * 1.1) < p.log_likelihood(method));
        }
    }

    #[test]
    fn test_fit_marginal_without_parameters() {
        let (x, y) = line();
        let clusters: Vec<Vec<usize>> = (0..6).map(|i| vec![i]).collect();
        let s = StructuredCovariance::new(&CovarianceStructure::independent(), 1, vec![], vec![])
            .unwrap();
        let fit = fit_marginal(
            &x,
            &y,
            &clusters,
            &CovarianceModel::Structured(s),
            EstimationMethod::Ml,
            None,
            &NelderMeadConfig::default(),
        )
        .unwrap();
        assert!(fit.theta.is_empty());
        assert_eq!(fit.iterations, 0);
    }
}
