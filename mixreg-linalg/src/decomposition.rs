#![allow(clippy::needless_range_loop)]
//! Factorizations used by the fitters.
//!
//! - Cholesky of cluster covariance blocks and normal-equation matrices
//! - Householder QR for rank checks, least squares and leverages
//! - symmetric eigendecomposition (faer) for matrix functions such as the
//!   inverse square root needed by CR2

use crate::dense::DenseMatrix;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinalgError {
    #[error("Matrix is not positive definite")]
    NotPositiveDefinite,

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Column {column} is linearly dependent on earlier columns")]
    RankDeficient { column: usize },
}

fn require_square(a: &DenseMatrix) -> Result<usize, LinalgError> {
    if a.nrows() == a.ncols() {
        Ok(a.nrows())
    } else {
        Err(LinalgError::DimensionMismatch {
            expected: a.nrows(),
            got: a.ncols(),
        })
    }
}

/// Back substitution for an upper triangular system given by `upper(i, j)`.
fn back_substitute(n: usize, rhs: &[f64], upper: impl Fn(usize, usize) -> f64) -> Vec<f64> {
    let mut x = rhs.to_vec();
    for i in (0..n).rev() {
        for j in (i + 1)..n {
            x[i] -= upper(i, j) * x[j];
        }
        x[i] /= upper(i, i);
    }
    x
}

/// `A = L L'` with `L` lower triangular.
#[derive(Debug, Clone)]
pub struct CholeskyDecomp {
    pub lower: DenseMatrix,
}

impl CholeskyDecomp {
    /// Row-by-row factorization. Fails on the first non-positive or
    /// non-finite pivot.
    pub fn new(a: &DenseMatrix) -> Result<Self, LinalgError> {
        let n = require_square(a)?;
        // rows of L, each truncated at the diagonal
        let mut rows: Vec<Vec<f64>> = Vec::with_capacity(n);
        for i in 0..n {
            let mut row = Vec::with_capacity(i + 1);
            for j in 0..=i {
                let lj: &[f64] = if j < i { &rows[j][..j] } else { &row[..j] };
                let partial: f64 = row[..j].iter().zip(lj).map(|(x, y)| x * y).sum();
                let v = a.get(i, j) - partial;
                if j == i {
                    if !(v.is_finite() && v > 0.0) {
                        return Err(LinalgError::NotPositiveDefinite);
                    }
                    row.push(v.sqrt());
                } else {
                    row.push(v / rows[j][j]);
                }
            }
            rows.push(row);
        }
        let mut lower = DenseMatrix::zeros(n, n);
        for (i, row) in rows.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                lower.set(i, j, v);
            }
        }
        Ok(Self { lower })
    }

    pub fn dim(&self) -> usize {
        self.lower.nrows()
    }

    /// `L^{-1} b`
    pub fn solve_lower(&self, b: &[f64]) -> Vec<f64> {
        assert_eq!(b.len(), self.dim());
        let mut y = b.to_vec();
        for i in 0..y.len() {
            for j in 0..i {
                y[i] -= self.lower.get(i, j) * y[j];
            }
            y[i] /= self.lower.get(i, i);
        }
        y
    }

    /// `L^{-1} B`, column by column.
    pub fn solve_lower_mat(&self, b: &DenseMatrix) -> DenseMatrix {
        let mut out = DenseMatrix::zeros(b.nrows(), b.ncols());
        for j in 0..b.ncols() {
            out.set_col(j, &self.solve_lower(&b.col(j)));
        }
        out
    }

    /// `A^{-1} b`
    pub fn solve(&self, b: &[f64]) -> Vec<f64> {
        let y = self.solve_lower(b);
        back_substitute(self.dim(), &y, |i, j| self.lower.get(j, i))
    }

    /// `A^{-1}`, symmetrized.
    pub fn inverse(&self) -> DenseMatrix {
        let n = self.dim();
        let mut inv = DenseMatrix::zeros(n, n);
        let mut unit = vec![0.0; n];
        for j in 0..n {
            unit[j] = 1.0;
            inv.set_col(j, &self.solve(&unit));
            unit[j] = 0.0;
        }
        inv.symmetrize();
        inv
    }

    /// `log |A|`
    pub fn log_det(&self) -> f64 {
        self.lower.diag().iter().map(|d| 2.0 * d.ln()).sum()
    }
}

/// Thin QR by Householder reflections, `A = Q R` with `Q` of size m x n.
pub struct QrDecomp {
    pub q: DenseMatrix,
    pub r: DenseMatrix,
}

impl QrDecomp {
    /// A column is aliased when its part orthogonal to the earlier columns
    /// is below this fraction of its own norm.
    pub const RANK_TOL: f64 = 1e-10;

    /// Fails with the index of the first aliased column.
    pub fn new(a: &DenseMatrix) -> Result<Self, LinalgError> {
        let (m, n) = (a.nrows(), a.ncols());
        if m < n {
            return Err(LinalgError::RankDeficient { column: m });
        }

        let mut work: Vec<Vec<f64>> = (0..n).map(|j| a.col(j)).collect();
        let norms: Vec<f64> = work.iter().map(|c| DenseMatrix::dot(c, c).sqrt()).collect();
        let mut reflectors: Vec<Vec<f64>> = Vec::with_capacity(n);
        let mut r = DenseMatrix::zeros(n, n);

        for k in 0..n {
            let tail = &work[k][k..];
            let alpha = DenseMatrix::dot(tail, tail).sqrt();
            if norms[k] < 1e-300 || alpha < Self::RANK_TOL * norms[k] {
                return Err(LinalgError::RankDeficient { column: k });
            }
            let diag = if tail[0] > 0.0 { -alpha } else { alpha };
            let mut v = tail.to_vec();
            v[0] -= diag;
            let vnorm = DenseMatrix::dot(&v, &v).sqrt();
            v.iter_mut().for_each(|x| *x /= vnorm);

            for j in k..n {
                let col = &mut work[j][k..];
                let proj = 2.0 * DenseMatrix::dot(&v, col);
                col.iter_mut().zip(&v).for_each(|(c, vi)| *c -= proj * vi);
            }
            for j in k..n {
                r.set(k, j, work[j][k]);
            }
            reflectors.push(v);
        }

        // Q = H_0 H_1 ... H_{n-1} applied to the first n unit vectors
        let mut q = DenseMatrix::zeros(m, n);
        for j in 0..n {
            let mut e = vec![0.0; m];
            e[j] = 1.0;
            for (k, v) in reflectors.iter().enumerate().rev() {
                let seg = &mut e[k..];
                let proj = 2.0 * DenseMatrix::dot(v, seg);
                seg.iter_mut().zip(v).for_each(|(c, vi)| *c -= proj * vi);
            }
            q.set_col(j, &e);
        }

        Ok(Self { q, r })
    }

    /// Least-squares solution of `A x = b`.
    pub fn solve(&self, b: &[f64]) -> Vec<f64> {
        let qtb = self.q.t_mat_vec(b);
        back_substitute(self.r.nrows(), &qtb, |i, j| self.r.get(i, j))
    }

    /// Leverages: row sums of squares of `Q`.
    pub fn hat_diagonal(&self) -> Vec<f64> {
        (0..self.q.nrows())
            .map(|i| self.q.row(i).iter().map(|x| x * x).sum())
            .collect()
    }
}

/// `A = U diag(values) U'` for symmetric `A`.
pub struct SymmetricEigen {
    pub values: Vec<f64>,
    pub vectors: DenseMatrix,
}

impl SymmetricEigen {
    pub fn new(a: &DenseMatrix) -> Result<Self, LinalgError> {
        let n = require_square(a)?;
        let evd = a.as_faer().selfadjoint_eigendecomposition(faer::Side::Lower);
        let s = evd.s().column_vector();
        let u = evd.u();
        let values = (0..n).map(|k| s.read(k)).collect();
        let vectors = DenseMatrix::from_col_major(
            n,
            n,
            (0..n).flat_map(|j| (0..n).map(move |i| (i, j))).map(|(i, j)| u.read(i, j)).collect(),
        );
        Ok(Self { values, vectors })
    }

    /// `U diag(f(values)) U'`
    pub fn map_values(&self, f: impl Fn(f64) -> f64) -> DenseMatrix {
        let scaled: Vec<f64> = self.values.iter().map(|&v| f(v)).collect();
        let mut out = self
            .vectors
            .mat_mul(&self.vectors.transpose().scale_rows(&scaled));
        out.symmetrize();
        out
    }
}

/// Eigenvalues, largest first.
pub fn symmetric_eigenvalues(a: &DenseMatrix) -> Result<Vec<f64>, LinalgError> {
    let mut values = SymmetricEigen::new(a)?.values;
    values.sort_by(|x, y| y.total_cmp(x));
    Ok(values)
}

/// Symmetric inverse square root of a PSD matrix, pseudo-inverse style:
/// eigenvalues at or below `tol` times the largest are mapped to zero.
pub fn psd_inverse_sqrt(a: &DenseMatrix, tol: f64) -> Result<DenseMatrix, LinalgError> {
    let eig = SymmetricEigen::new(a)?;
    let largest = eig.values.iter().copied().fold(f64::MIN_POSITIVE, f64::max);
    let cutoff = tol * largest;
    Ok(eig.map_values(|v| if v > cutoff { v.sqrt().recip() } else { 0.0 }))
}

pub fn inverse_spd(a: &DenseMatrix) -> Result<DenseMatrix, LinalgError> {
    Ok(CholeskyDecomp::new(a)?.inverse())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_identity(m: &DenseMatrix, tol: f64) {
        for i in 0..m.nrows() {
            for j in 0..m.ncols() {
                let want = if i == j { 1.0 } else { 0.0 };
                assert!((m.get(i, j) - want).abs() < tol, "({}, {}) = {}", i, j, m.get(i, j));
            }
        }
    }

    #[test]
    fn test_cholesky_factor() {
        let a = DenseMatrix::from_row_major(2, 2, &[4.0, 2.0, 2.0, 3.0]);
        let chol = CholeskyDecomp::new(&a).unwrap();
        assert!((chol.lower.get(0, 0) - 2.0).abs() < 1e-12);
        assert!((chol.lower.get(1, 0) - 1.0).abs() < 1e-12);
        assert!((chol.lower.get(1, 1) - 2.0f64.sqrt()).abs() < 1e-12);
        assert_eq!(chol.lower.get(0, 1), 0.0);
        assert!((chol.log_det() - 8.0f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_cholesky_solves() {
        let a = DenseMatrix::from_row_major(3, 3, &[4.0, 2.0, 1.0, 2.0, 5.0, 3.0, 1.0, 3.0, 6.0]);
        let b = [1.0, 2.0, 3.0];
        let chol = CholeskyDecomp::new(&a).unwrap();
        let ax = a.mat_vec(&chol.solve(&b));
        for (lhs, rhs) in ax.iter().zip(&b) {
            assert!((lhs - rhs).abs() < 1e-10);
        }
        assert_identity(&a.mat_mul(&inverse_spd(&a).unwrap()), 1e-10);

        // whitened block has identity covariance: L^{-1} A L^{-T} = I
        let w = chol.solve_lower_mat(&a);
        assert_identity(&chol.solve_lower_mat(&w.transpose()), 1e-10);
    }

    #[test]
    fn test_cholesky_rejects_indefinite() {
        let a = DenseMatrix::from_row_major(2, 2, &[1.0, 3.0, 3.0, 1.0]);
        assert_eq!(CholeskyDecomp::new(&a).unwrap_err(), LinalgError::NotPositiveDefinite);
        let rect = DenseMatrix::zeros(2, 3);
        assert!(matches!(
            CholeskyDecomp::new(&rect),
            Err(LinalgError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_qr_least_squares_and_leverage() {
        let a = DenseMatrix::from_row_major(3, 2, &[1.0, 1.0, 1.0, 2.0, 1.0, 3.0]);
        let b = [1.0, 2.0, 2.0];
        let qr = QrDecomp::new(&a).unwrap();
        let x = qr.solve(&b);
        // fitted line through (1,1) (2,2) (3,2)
        assert!((x[0] - 2.0 / 3.0).abs() < 1e-10);
        assert!((x[1] - 0.5).abs() < 1e-10);
        assert_identity(&qr.q.transpose().mat_mul(&qr.q), 1e-12);
        let h = qr.hat_diagonal();
        assert!((h.iter().sum::<f64>() - 2.0).abs() < 1e-10);
        assert!((h[1] - 1.0 / 3.0).abs() < 1e-10);
    }

    #[test]
    fn test_qr_reports_aliased_column() {
        // third column = first + second
        let a = DenseMatrix::from_row_major(
            4,
            3,
            &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 2.0, 3.0, 1.0, 3.0, 4.0],
        );
        assert_eq!(
            QrDecomp::new(&a).err(),
            Some(LinalgError::RankDeficient { column: 2 })
        );
    }

    #[test]
    fn test_eigen_functions() {
        let a = DenseMatrix::from_row_major(2, 2, &[3.0, 1.0, 1.0, 3.0]);
        let values = symmetric_eigenvalues(&a).unwrap();
        assert!((values[0] - 4.0).abs() < 1e-10);
        assert!((values[1] - 2.0).abs() < 1e-10);

        let b = DenseMatrix::from_row_major(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let s = psd_inverse_sqrt(&b, 1e-12).unwrap();
        assert_identity(&s.mat_mul(&b).mat_mul(&s), 1e-8);

        // rank-one input: pseudo-inverse square root keeps the null space at zero
        let p = DenseMatrix::outer(&[1.0, 1.0], &[1.0, 1.0]);
        let ps = psd_inverse_sqrt(&p, 1e-10).unwrap();
        let proj = ps.mat_mul(&p).mat_mul(&ps);
        assert!((proj.get(0, 0) - 0.5).abs() < 1e-8);
        assert!((proj.get(0, 1) - 0.5).abs() < 1e-8);
    }
}
