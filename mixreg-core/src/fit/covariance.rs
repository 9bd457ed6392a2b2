//! Within-cluster covariance models.
//!
//! Each model maps an unconstrained parameter vector theta to the relative
//! covariance block R_j of every cluster; the marginal covariance is
//! sigma^2 * R_j.
//!
//! Structured (GLS) blocks are R_j = D C(rho) D where C is the correlation
//! pattern and D holds per-stratum standard-deviation ratios. Random-effects
//! blocks are R_j = I + Z_j Lambda Lambda' Z_j'.

use mixreg_linalg::DenseMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Within-cluster correlation pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Correlation {
    Independent,
    /// Equal correlation between any two observations of a cluster.
    CompoundSymmetry,
    /// rho^|s - t| by position within the cluster.
    Ar1,
}

/// Residual covariance structure of a GLS model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovarianceStructure {
    pub correlation: Correlation,
    /// Hold the correlation at this value instead of estimating it.
    pub fixed_correlation: Option<f64>,
    /// Estimate a separate residual variance for each level of this column.
    pub variance_by: Option<String>,
}

impl CovarianceStructure {
    pub fn independent() -> Self {
        Self {
            correlation: Correlation::Independent,
            fixed_correlation: None,
            variance_by: None,
        }
    }

    pub fn compound_symmetry() -> Self {
        Self {
            correlation: Correlation::CompoundSymmetry,
            ..Self::independent()
        }
    }

    pub fn ar1() -> Self {
        Self {
            correlation: Correlation::Ar1,
            ..Self::independent()
        }
    }

    /// Independent residuals with a separate variance per level of `column`.
    pub fn identity_by_group(column: &str) -> Self {
        Self::independent().with_group_variances(column)
    }

    pub fn with_fixed_correlation(mut self, rho: f64) -> Self {
        self.fixed_correlation = Some(rho);
        self
    }

    pub fn with_group_variances(mut self, column: &str) -> Self {
        self.variance_by = Some(column.to_string());
        self
    }

    fn estimates_correlation(&self) -> bool {
        self.correlation != Correlation::Independent && self.fixed_correlation.is_none()
    }
}

/// Estimated structure parameters on their natural scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovarianceParams {
    pub correlation: Option<f64>,
    /// Residual standard-deviation ratio per stratum; the first is 1.
    pub variance_ratios: Vec<(String, f64)>,
}

/// Parameterization of a GLS covariance structure over a fixed design.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredCovariance {
    correlation: Correlation,
    fixed_correlation: Option<f64>,
    estimate_correlation: bool,
    /// Compound-symmetry lower bound -1/(m - 1) for the largest cluster size m.
    lower: f64,
    levels: Vec<String>,
    strata: Vec<usize>,
}

impl StructuredCovariance {
    /// `levels`/`strata` give the variance stratum of every design row; pass
    /// empty vectors when the structure has no variance function.
    pub fn new(
        structure: &CovarianceStructure,
        max_cluster_size: usize,
        levels: Vec<String>,
        strata: Vec<usize>,
    ) -> Result<Self> {
        let lower = if max_cluster_size > 1 {
            -1.0 / (max_cluster_size as f64 - 1.0)
        } else {
            -1.0
        };
        if structure.correlation != Correlation::Independent {
            if max_cluster_size < 2 {
                return Err(ModelError::InvalidSpec(
                    "a correlation structure needs clusters with at least two observations".into(),
                ));
            }
            if let Some(rho) = structure.fixed_correlation {
                let lo = match structure.correlation {
                    Correlation::CompoundSymmetry => lower,
                    _ => -1.0,
                };
                if !(rho > lo && rho < 1.0) {
                    return Err(ModelError::InvalidSpec(format!(
                        "fixed correlation {} outside ({:.4}, 1)",
                        rho, lo
                    )));
                }
            }
        }
        Ok(Self {
            correlation: structure.correlation,
            fixed_correlation: structure.fixed_correlation,
            estimate_correlation: structure.estimates_correlation(),
            lower,
            levels,
            strata,
        })
    }

    pub fn n_theta(&self) -> usize {
        usize::from(self.estimate_correlation) + self.levels.len().saturating_sub(1)
    }

    pub fn initial_theta(&self) -> Vec<f64> {
        let mut theta = Vec::with_capacity(self.n_theta());
        if self.estimate_correlation {
            theta.push(match self.correlation {
                // start at rho = 0
                Correlation::CompoundSymmetry => {
                    let u = -self.lower / (1.0 - self.lower);
                    (u / (1.0 - u)).ln()
                }
                _ => 0.0,
            });
        }
        theta.extend(std::iter::repeat(0.0).take(self.levels.len().saturating_sub(1)));
        theta
    }

    /// Correlation implied by theta (0 for independence).
    pub fn rho(&self, theta: &[f64]) -> f64 {
        match (self.correlation, self.estimate_correlation) {
            (Correlation::Independent, _) => 0.0,
            (_, false) => self.fixed_correlation.unwrap_or(0.0),
            (Correlation::CompoundSymmetry, true) => {
                self.lower + (1.0 - self.lower) / (1.0 + (-theta[0]).exp())
            }
            (Correlation::Ar1, true) => theta[0].tanh(),
        }
    }

    /// Standard-deviation ratio of each stratum.
    pub fn ratios(&self, theta: &[f64]) -> Vec<f64> {
        let offset = usize::from(self.estimate_correlation);
        let mut ratios = vec![1.0; self.levels.len().max(1)];
        for (k, r) in ratios.iter_mut().enumerate().skip(1) {
            *r = theta[offset + k - 1].exp();
        }
        ratios
    }

    pub fn params(&self, theta: &[f64]) -> CovarianceParams {
        let correlation = match self.correlation {
            Correlation::Independent => None,
            _ => Some(self.rho(theta)),
        };
        let ratios = self.ratios(theta);
        CovarianceParams {
            correlation,
            variance_ratios: self.levels.iter().cloned().zip(ratios).collect(),
        }
    }

    fn block(&self, rows: &[usize], rho: f64, ratios: &[f64]) -> DenseMatrix {
        let m = rows.len();
        let sd: Vec<f64> = rows
            .iter()
            .map(|&i| {
                if self.strata.is_empty() {
                    1.0
                } else {
                    ratios[self.strata[i]]
                }
            })
            .collect();
        let mut r = DenseMatrix::zeros(m, m);
        for a in 0..m {
            for b in 0..m {
                let c = if a == b {
                    1.0
                } else {
                    match self.correlation {
                        Correlation::Independent => 0.0,
                        Correlation::CompoundSymmetry => rho,
                        Correlation::Ar1 => rho.powi((a as i32 - b as i32).abs()),
                    }
                };
                r.set(a, b, sd[a] * sd[b] * c);
            }
        }
        r
    }
}

/// Random-effects parameterization: theta holds the lower triangle of the
/// relative Cholesky factor Lambda, row by row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomEffectsCovariance {
    pub z: DenseMatrix,
    pub names: Vec<String>,
}

impl RandomEffectsCovariance {
    pub fn new(z: DenseMatrix, names: Vec<String>) -> Self {
        Self { z, names }
    }

    pub fn q(&self) -> usize {
        self.z.ncols()
    }

    pub fn n_theta(&self) -> usize {
        let q = self.q();
        q * (q + 1) / 2
    }

    pub fn initial_theta(&self) -> Vec<f64> {
        let q = self.q();
        let mut theta = Vec::with_capacity(self.n_theta());
        for i in 0..q {
            for j in 0..=i {
                theta.push(if i == j { 1.0 } else { 0.0 });
            }
        }
        theta
    }

    pub fn lambda(&self, theta: &[f64]) -> DenseMatrix {
        let q = self.q();
        let mut l = DenseMatrix::zeros(q, q);
        let mut k = 0;
        for i in 0..q {
            for j in 0..=i {
                l.set(i, j, theta[k]);
                k += 1;
            }
        }
        l
    }

    /// Relative covariance Psi = Lambda Lambda' (absolute covariance is sigma^2 Psi).
    pub fn psi(&self, theta: &[f64]) -> DenseMatrix {
        let l = self.lambda(theta);
        l.mat_mul(&l.transpose())
    }

    /// Diagonal of Lambda in absolute value; small entries mark a singular fit.
    pub fn lambda_diagonal(&self, theta: &[f64]) -> Vec<f64> {
        self.lambda(theta).diag().iter().map(|d| d.abs()).collect()
    }

    fn block(&self, rows: &[usize], psi: &DenseMatrix) -> DenseMatrix {
        let zj = self.z.select_rows(rows);
        let mut r = zj.mat_mul(psi).mat_mul(&zj.transpose());
        for a in 0..rows.len() {
            r.set(a, a, r.get(a, a) + 1.0);
        }
        r.symmetrize();
        r
    }
}

/// Covariance model of a linear fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CovarianceModel {
    Structured(StructuredCovariance),
    RandomEffects(RandomEffectsCovariance),
}

impl CovarianceModel {
    pub fn n_theta(&self) -> usize {
        match self {
            CovarianceModel::Structured(s) => s.n_theta(),
            CovarianceModel::RandomEffects(r) => r.n_theta(),
        }
    }

    pub fn initial_theta(&self) -> Vec<f64> {
        match self {
            CovarianceModel::Structured(s) => s.initial_theta(),
            CovarianceModel::RandomEffects(r) => r.initial_theta(),
        }
    }

    /// Relative covariance block R_j for every cluster.
    pub fn blocks(&self, theta: &[f64], clusters: &[Vec<usize>]) -> Vec<DenseMatrix> {
        match self {
            CovarianceModel::Structured(s) => {
                let rho = s.rho(theta);
                let ratios = s.ratios(theta);
                clusters.iter().map(|rows| s.block(rows, rho, &ratios)).collect()
            }
            CovarianceModel::RandomEffects(r) => {
                let psi = r.psi(theta);
                clusters.iter().map(|rows| r.block(rows, &psi)).collect()
            }
        }
    }
}
