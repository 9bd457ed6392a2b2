#![allow(clippy::needless_range_loop)]
//! Column-major dense matrices on top of faer.
//!
//! Model fitting only ever touches small design blocks (one cluster at a
//! time) and p x p cross products, so most operations here are direct loops
//! over faer storage; `mat_mul` defers to faer's kernel.

use faer::Mat;
use serde::{Deserialize, Serialize};

/// Dense `f64` matrix. Persisted as `{ nrows, ncols, data }`, column-major.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "Stored", into = "Stored")]
pub struct DenseMatrix {
    inner: Mat<f64>,
}

#[derive(Serialize, Deserialize)]
struct Stored {
    nrows: usize,
    ncols: usize,
    data: Vec<f64>,
}

impl From<Stored> for DenseMatrix {
    fn from(s: Stored) -> Self {
        DenseMatrix::from_col_major(s.nrows, s.ncols, s.data)
    }
}

impl From<DenseMatrix> for Stored {
    fn from(m: DenseMatrix) -> Self {
        Stored {
            nrows: m.nrows(),
            ncols: m.ncols(),
            data: m.to_col_major(),
        }
    }
}

impl DenseMatrix {
    fn build(nrows: usize, ncols: usize, f: impl FnMut(usize, usize) -> f64) -> Self {
        Self {
            inner: Mat::from_fn(nrows, ncols, f),
        }
    }

    fn zip_with(&self, other: &DenseMatrix, f: impl Fn(f64, f64) -> f64) -> DenseMatrix {
        assert_eq!(
            (self.nrows(), self.ncols()),
            (other.nrows(), other.ncols()),
            "shape mismatch"
        );
        Self::build(self.nrows(), self.ncols(), |i, j| {
            f(self.inner.read(i, j), other.inner.read(i, j))
        })
    }

    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            inner: Mat::zeros(nrows, ncols),
        }
    }

    /// `data[j * nrows + i]` is entry (i, j).
    pub fn from_col_major(nrows: usize, ncols: usize, data: Vec<f64>) -> Self {
        assert_eq!(data.len(), nrows * ncols);
        Self::build(nrows, ncols, |i, j| data[i + j * nrows])
    }

    /// `data[i * ncols + j]` is entry (i, j).
    pub fn from_row_major(nrows: usize, ncols: usize, data: &[f64]) -> Self {
        assert_eq!(data.len(), nrows * ncols);
        Self::build(nrows, ncols, |i, j| data[j + i * ncols])
    }

    /// Stack `rows` on top of each other; each must hold `ncols` values.
    pub fn from_rows(rows: &[Vec<f64>], ncols: usize) -> Self {
        Self::build(rows.len(), ncols, |i, j| rows[i][j])
    }

    pub fn identity(n: usize) -> Self {
        Self::from_diag(&vec![1.0; n])
    }

    pub fn from_diag(d: &[f64]) -> Self {
        let mut m = Self::zeros(d.len(), d.len());
        for (k, &v) in d.iter().enumerate() {
            m.set(k, k, v);
        }
        m
    }

    pub fn nrows(&self) -> usize {
        self.inner.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.inner.ncols()
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.inner.read(row, col)
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.inner.write(row, col, value);
    }

    pub fn as_faer(&self) -> &Mat<f64> {
        &self.inner
    }

    /// `A v`
    pub fn mat_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(v.len(), self.ncols());
        let mut out = vec![0.0; self.nrows()];
        for (j, &vj) in v.iter().enumerate() {
            if vj == 0.0 {
                continue;
            }
            for (i, o) in out.iter_mut().enumerate() {
                *o += vj * self.inner.read(i, j);
            }
        }
        out
    }

    /// `A' v`
    pub fn t_mat_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(v.len(), self.nrows());
        let mut out = vec![0.0; self.ncols()];
        for (j, o) in out.iter_mut().enumerate() {
            *o = v
                .iter()
                .enumerate()
                .map(|(i, vi)| vi * self.inner.read(i, j))
                .sum();
        }
        out
    }

    pub fn mat_mul(&self, other: &DenseMatrix) -> DenseMatrix {
        assert_eq!(self.ncols(), other.nrows(), "inner dimensions differ");
        DenseMatrix {
            inner: &self.inner * &other.inner,
        }
    }

    pub fn transpose(&self) -> DenseMatrix {
        Self::build(self.ncols(), self.nrows(), |i, j| self.inner.read(j, i))
    }

    pub fn col(&self, j: usize) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.nrows());
        out.extend((0..self.nrows()).map(|i| self.inner.read(i, j)));
        out
    }

    pub fn row(&self, i: usize) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.ncols());
        out.extend((0..self.ncols()).map(|j| self.inner.read(i, j)));
        out
    }

    pub fn set_col(&mut self, j: usize, values: &[f64]) {
        assert_eq!(values.len(), self.nrows());
        for (i, &v) in values.iter().enumerate() {
            self.inner.write(i, j, v);
        }
    }

    /// Sub-matrix made of the listed rows, in list order.
    pub fn select_rows(&self, rows: &[usize]) -> DenseMatrix {
        Self::build(rows.len(), self.ncols(), |i, j| self.inner.read(rows[i], j))
    }

    /// Sub-matrix made of the listed columns, in list order.
    pub fn select_cols(&self, cols: &[usize]) -> DenseMatrix {
        Self::build(self.nrows(), cols.len(), |i, j| self.inner.read(i, cols[j]))
    }

    pub fn add(&self, other: &DenseMatrix) -> DenseMatrix {
        self.zip_with(other, |a, b| a + b)
    }

    pub fn sub(&self, other: &DenseMatrix) -> DenseMatrix {
        self.zip_with(other, |a, b| a - b)
    }

    pub fn scale(&self, s: f64) -> DenseMatrix {
        Self::build(self.nrows(), self.ncols(), |i, j| s * self.inner.read(i, j))
    }

    /// `diag(w) A`
    pub fn scale_rows(&self, w: &[f64]) -> DenseMatrix {
        assert_eq!(w.len(), self.nrows());
        Self::build(self.nrows(), self.ncols(), |i, j| w[i] * self.inner.read(i, j))
    }

    /// Leading diagonal; for non-square input stops at the shorter side.
    pub fn diag(&self) -> Vec<f64> {
        (0..self.nrows().min(self.ncols()))
            .map(|k| self.inner.read(k, k))
            .collect()
    }

    /// Overwrite both triangles with their average. Sandwich products pick
    /// up rounding asymmetry that later eigen/Cholesky steps should not see.
    pub fn symmetrize(&mut self) {
        assert_eq!(self.nrows(), self.ncols(), "symmetrize needs a square matrix");
        for j in 1..self.ncols() {
            for i in 0..j {
                let m = (self.inner.read(i, j) + self.inner.read(j, i)) / 2.0;
                self.inner.write(i, j, m);
                self.inner.write(j, i, m);
            }
        }
    }

    /// `a b'`
    pub fn outer(a: &[f64], b: &[f64]) -> DenseMatrix {
        Self::build(a.len(), b.len(), |i, j| a[i] * b[j])
    }

    /// `a' A b`
    pub fn quad_form(&self, a: &[f64], b: &[f64]) -> f64 {
        Self::dot(&self.t_mat_vec(a), b)
    }

    pub fn dot(a: &[f64], b: &[f64]) -> f64 {
        assert_eq!(a.len(), b.len());
        a.iter().zip(b).fold(0.0, |acc, (x, y)| acc + x * y)
    }

    /// Weighted cross product `X' diag(w) X`, filled from the upper triangle.
    pub fn xtwx(&self, w: &[f64]) -> DenseMatrix {
        assert_eq!(w.len(), self.nrows());
        let p = self.ncols();
        let mut out = DenseMatrix::zeros(p, p);
        for a in 0..p {
            let wa: Vec<f64> = w
                .iter()
                .enumerate()
                .map(|(i, wi)| wi * self.inner.read(i, a))
                .collect();
            for b in a..p {
                let v = wa
                    .iter()
                    .enumerate()
                    .map(|(i, x)| x * self.inner.read(i, b))
                    .sum();
                out.set(a, b, v);
                out.set(b, a, v);
            }
        }
        out
    }

    /// `X' diag(w) v`
    pub fn xtwv(&self, w: &[f64], v: &[f64]) -> Vec<f64> {
        assert_eq!(w.len(), v.len());
        let wv: Vec<f64> = w.iter().zip(v).map(|(a, b)| a * b).collect();
        self.t_mat_vec(&wv)
    }

    pub fn to_col_major(&self) -> Vec<f64> {
        (0..self.ncols()).flat_map(|j| self.col(j)).collect()
    }
}

impl std::fmt::Display for DenseMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for i in 0..self.nrows() {
            let line: Vec<String> = self.row(i).iter().map(|v| format!("{:.6}", v)).collect();
            writeln!(f, "{}", line.join("\t"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-10
    }

    #[test]
    fn test_constructors_agree() {
        let rm = DenseMatrix::from_row_major(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let cm = DenseMatrix::from_col_major(2, 3, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        let rows = DenseMatrix::from_rows(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]], 3);
        for i in 0..2 {
            for j in 0..3 {
                assert_eq!(rm.get(i, j), cm.get(i, j));
                assert_eq!(rm.get(i, j), rows.get(i, j));
            }
        }
        let eye = DenseMatrix::identity(3);
        assert_eq!(eye.diag(), vec![1.0; 3]);
        assert_eq!(eye.get(2, 0), 0.0);
    }

    #[test]
    fn test_products() {
        let a = DenseMatrix::from_row_major(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = DenseMatrix::from_row_major(3, 2, &[7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
        let c = a.mat_mul(&b);
        assert!(close(c.get(0, 0), 58.0));
        assert!(close(c.get(1, 1), 154.0));
        assert_eq!(a.mat_vec(&[1.0, 0.0, -1.0]), vec![-2.0, -2.0]);
        let v = [1.0, -1.0];
        assert_eq!(a.t_mat_vec(&v), a.transpose().mat_vec(&v));
    }

    #[test]
    fn test_row_and_column_selection() {
        let a = DenseMatrix::from_row_major(3, 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let s = a.select_rows(&[2, 0]);
        assert_eq!(s.row(0), vec![5.0, 6.0]);
        assert_eq!(s.row(1), vec![1.0, 2.0]);
        assert_eq!(a.select_cols(&[1]).col(0), vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_weighted_cross_products() {
        let x = DenseMatrix::from_row_major(3, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let w = [1.0, 2.0, 3.0];
        let g = x.xtwx(&w);
        assert!(close(g.get(0, 0), 4.0));
        assert!(close(g.get(0, 1), 3.0));
        assert!(close(g.get(1, 0), 3.0));
        assert!(close(g.get(1, 1), 5.0));
        assert_eq!(x.xtwv(&w, &[1.0, 1.0, 2.0]), vec![7.0, 8.0]);
    }

    #[test]
    fn test_elementwise_and_forms() {
        let a = DenseMatrix::from_row_major(2, 2, &[1.0, 2.0, 4.0, 1.0]);
        let d = DenseMatrix::from_diag(&[2.0, 3.0]);
        assert_eq!(a.add(&d).sub(&d).get(1, 0), 4.0);
        assert_eq!(a.scale(2.0).get(0, 1), 4.0);
        assert_eq!(a.scale_rows(&[1.0, -1.0]).row(1), vec![-4.0, -1.0]);
        assert_eq!(DenseMatrix::outer(&[1.0, 2.0], &[3.0, 4.0]).get(1, 0), 6.0);
        assert!(close(d.quad_form(&[1.0, 1.0], &[1.0, 2.0]), 8.0));

        let mut s = a.clone();
        s.symmetrize();
        assert_eq!((s.get(0, 1), s.get(1, 0)), (3.0, 3.0));
    }

    #[test]
    fn test_stored_layout_is_column_major() {
        let a = DenseMatrix::from_row_major(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let stored: Stored = a.into();
        assert_eq!(stored.data, vec![1.0, 3.0, 2.0, 4.0]);
        assert_eq!(DenseMatrix::from(stored).get(0, 1), 2.0);
    }
}
