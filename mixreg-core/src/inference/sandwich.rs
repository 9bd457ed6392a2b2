//! Cluster-robust (sandwich) covariance estimators.
//!
//! All estimators are built from per-cluster blocks (X_j, W_j, Phi_j, e_j):
//! a design block, the inverse working covariance, the working covariance
//! and the residuals. Linear fits use X_j and Phi_j = sigma^2 R_j; logistic
//! fits use V_j X_j and Phi_j = V_j = diag(mu (1 - mu)) so the same algebra
//! applies to the IRLS working model.
//!
//! CR2 multiplies each cluster's residuals by
//! A_j = D_j' (D_j (Phi_j - X_j M X_j') D_j')^{-1/2} D_j with Phi_j = D_j' D_j,
//! which makes the estimator exactly unbiased when the working covariance is
//! correct.

use mixreg_linalg::decomposition::{inverse_spd, psd_inverse_sqrt, CholeskyDecomp};
use mixreg_linalg::DenseMatrix;

use super::EstimatorKind;
use crate::error::Result;

/// Eigenvalues of the CR2 inner matrix below this fraction of the largest are
/// treated as zero.
const CR2_EIGEN_TOL: f64 = 1e-12;

/// One cluster's contribution to the sandwich.
#[derive(Debug, Clone)]
pub struct ClusterBlock {
    /// Design-row indices.
    pub rows: Vec<usize>,
    pub x: DenseMatrix,
    /// Working covariance Phi_j.
    pub phi: DenseMatrix,
    /// Phi_j^{-1}
    pub weight: DenseMatrix,
    pub residuals: Vec<f64>,
}

/// M = (sum_j X_j' W_j X_j)^{-1}
pub fn bread(blocks: &[ClusterBlock]) -> Result<DenseMatrix> {
    let p = blocks.first().map(|b| b.x.ncols()).unwrap_or(0);
    let mut info = DenseMatrix::zeros(p, p);
    for b in blocks {
        info = info.add(&b.x.transpose().mat_mul(&b.weight).mat_mul(&b.x));
    }
    info.symmetrize();
    Ok(inverse_spd(&info)?)
}

/// Residual adjustment A_j per cluster: identity except for CR2.
pub fn adjustments(
    blocks: &[ClusterBlock],
    bread: &DenseMatrix,
    kind: EstimatorKind,
) -> Result<Vec<DenseMatrix>> {
    match kind {
        EstimatorKind::Cr2 => blocks.iter().map(|b| cr2_adjustment(b, bread)).collect(),
        _ => Ok(blocks
            .iter()
            .map(|b| DenseMatrix::identity(b.rows.len()))
            .collect()),
    }
}

fn cr2_adjustment(block: &ClusterBlock, bread: &DenseMatrix) -> Result<DenseMatrix> {
    // Phi = L L' so D = L'
    let d = CholeskyDecomp::new(&block.phi)?.lower.transpose();
    let leverage = block.x.mat_mul(bread).mat_mul(&block.x.transpose());
    let mut inner = d
        .mat_mul(&block.phi.sub(&leverage))
        .mat_mul(&d.transpose());
    inner.symmetrize();
    let root = psd_inverse_sqrt(&inner, CR2_EIGEN_TOL)?;
    Ok(d.transpose().mat_mul(&root).mat_mul(&d))
}

/// Cluster-robust covariance of the coefficients.
pub fn sandwich(blocks: &[ClusterBlock], kind: EstimatorKind) -> Result<DenseMatrix> {
    let m = bread(blocks)?;
    let adj = adjustments(blocks, &m, kind)?;
    let p = m.nrows();
    let mut meat = DenseMatrix::zeros(p, p);
    for (b, a) in blocks.iter().zip(&adj) {
        let u = b.x.t_mat_vec(&b.weight.mat_vec(&a.mat_vec(&b.residuals)));
        meat = meat.add(&DenseMatrix::outer(&u, &u));
    }
    let mut v = m.mat_mul(&meat).mat_mul(&m);
    let g = blocks.len() as f64;
    if kind == EstimatorKind::Cr1 && g > 1.0 {
        v = v.scale(g / (g - 1.0));
    }
    v.symmetrize();
    Ok(v)
}

/// Bell-McCaffrey degrees of freedom for the contrast `c` under the working
/// covariance.
pub fn bell_mccaffrey_df(
    blocks: &[ClusterBlock],
    bread: &DenseMatrix,
    adjustments: &[DenseMatrix],
    c: &[f64],
) -> f64 {
    let g = blocks.len();
    let mc = bread.mat_vec(c);
    // u_j = A_j W_j X_j M c
    let u: Vec<Vec<f64>> = blocks
        .iter()
        .zip(adjustments)
        .map(|(b, a)| a.mat_vec(&b.weight.mat_vec(&b.x.mat_vec(&mc))))
        .collect();
    // s_j = M X_j' u_j
    let s: Vec<Vec<f64>> = blocks
        .iter()
        .zip(&u)
        .map(|(b, uj)| bread.mat_vec(&b.x.t_mat_vec(uj)))
        .collect();

    // omega[j][k] = g_j' Phi g_k where g_j = (I - H)' E_j u_j, accumulated
    // block by block: g_j restricted to cluster i is delta_ij u_j - W_i X_i s_j
    let mut omega = vec![0.0; g * g];
    for (i, b) in blocks.iter().enumerate() {
        let wx = b.weight.mat_mul(&b.x);
        let cols: Vec<Vec<f64>> = (0..g)
            .map(|j| {
                let mut col: Vec<f64> = wx.mat_vec(&s[j]).iter().map(|v| -v).collect();
                if i == j {
                    for (cv, uv) in col.iter_mut().zip(&u[j]) {
                        *cv += uv;
                    }
                }
                col
            })
            .collect();
        let phi_cols: Vec<Vec<f64>> = cols.iter().map(|c| b.phi.mat_vec(c)).collect();
        for j in 0..g {
            for k in j..g {
                let v = DenseMatrix::dot(&cols[j], &phi_cols[k]);
                omega[j * g + k] += v;
                if k != j {
                    omega[k * g + j] += v;
                }
            }
        }
    }
    let trace: f64 = (0..g).map(|j| omega[j * g + j]).sum();
    let sumsq: f64 = omega.iter().map(|v| v * v).sum();
    trace * trace / sumsq
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Three clusters with an exchangeable working covariance.
    fn blocks() -> Vec<ClusterBlock> {
        let mk = |rows: Vec<usize>, xs: &[f64], resid: Vec<f64>| {
            let m = xs.len();
            let mut data = vec![1.0; m];
            data.extend_from_slice(xs);
            let x = DenseMatrix::from_col_major(m, 2, data);
            let mut phi = DenseMatrix::zeros(m, m);
            for a in 0..m {
                for b in 0..m {
                    phi.set(a, b, if a == b { 2.0 } else { 0.6 });
                }
            }
            let weight = inverse_spd(&phi).unwrap();
            ClusterBlock {
                rows,
                x,
                phi,
                weight,
                residuals: resid,
            }
        };
        vec![
            mk(vec![0, 1, 2], &[1.0, 2.0, 4.0], vec![0.3, -0.5, 0.1]),
            mk(vec![3, 4, 5, 6], &[0.0, 1.0, 3.0, 5.0], vec![-0.2, 0.4, 0.1, -0.3]),
            mk(vec![7, 8], &[2.0, 6.0], vec![0.5, -0.4]),
        ]
    }

    #[test]
    fn test_cr2_adjustment_restores_working_covariance() {
        // E[e_j e_j'] = Phi_j - X_j M X_j', so A_j (Phi_j - X_j M X_j') A_j = Phi_j
        // gives E[V_CR2] = M exactly.
        let blocks = blocks();
        let m = bread(&blocks).unwrap();
        let adj = adjustments(&blocks, &m, EstimatorKind::Cr2).unwrap();
        for (b, a) in blocks.iter().zip(&adj) {
            let resid_cov = b.phi.sub(&b.x.mat_mul(&m).mat_mul(&b.x.transpose()));
            let back = a.mat_mul(&resid_cov).mat_mul(a);
            for r in 0..b.rows.len() {
                for c in 0..b.rows.len() {
                    assert!(
                        (back.get(r, c) - b.phi.get(r, c)).abs() < 1e-8,
                        "entry ({}, {}): {} vs {}",
                        r,
                        c,
                        back.get(r, c),
                        b.phi.get(r, c)
                    );
                }
            }
        }
    }

    #[test]
    fn test_expected_cr2_equals_bread() {
        let blocks = blocks();
        let m = bread(&blocks).unwrap();
        let adj = adjustments(&blocks, &m, EstimatorKind::Cr2).unwrap();
        // sum_j X_j' W_j A_j E[e e'] A_j W_j X_j, then sandwich with M
        let mut meat = DenseMatrix::zeros(2, 2);
        for (b, a) in blocks.iter().zip(&adj) {
            let resid_cov = b.phi.sub(&b.x.mat_mul(&m).mat_mul(&b.x.transpose()));
            let left = b.x.transpose().mat_mul(&b.weight).mat_mul(a);
            meat = meat.add(&left.mat_mul(&resid_cov).mat_mul(&left.transpose()));
        }
        let expected = m.mat_mul(&meat).mat_mul(&m);
        for r in 0..2 {
            for c in 0..2 {
                assert!((expected.get(r, c) - m.get(r, c)).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_cr1_scales_cr0() {
        let blocks = blocks();
        let v0 = sandwich(&blocks, EstimatorKind::Cr0).unwrap();
        let v1 = sandwich(&blocks, EstimatorKind::Cr1).unwrap();
        assert!((v1.get(1, 1) - 1.5 * v0.get(1, 1)).abs() < 1e-12);
    }

    #[test]
    fn test_bell_mccaffrey_df_bounds() {
        let blocks = blocks();
        let m = bread(&blocks).unwrap();
        let adj = adjustments(&blocks, &m, EstimatorKind::Cr2).unwrap();
        let df = bell_mccaffrey_df(&blocks, &m, &adj, &[0.0, 1.0]);
        assert!(df > 0.0 && df <= 3.0 + 1e-9, "df = {}", df);
    }
}
