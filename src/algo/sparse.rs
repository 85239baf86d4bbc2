//! Compressed sparse row matrices and a conjugate gradient solver.
//!
//! The Laplacian operator and the rigidity Hessian are both stored here.

use nalgebra::DVector;
use rayon::prelude::*;

use crate::error::{FitError, Result};

/// Rows above which products run on the rayon pool.
const PARALLEL_ROWS: usize = 4096;

/// Compressed Sparse Row (CSR) matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    rows: usize,
    cols: usize,
    /// `row_ptr[i]..row_ptr[i + 1]` indexes the entries of row `i`.
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    /// Create a CSR matrix from `(row, col, value)` triplets.
    ///
    /// Duplicate entries at the same position are summed.
    pub fn from_triplets(rows: usize, cols: usize, mut triplets: Vec<(usize, usize, f64)>) -> Self {
        triplets.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut row_ptr = vec![0usize; rows + 1];
        let mut col_idx: Vec<usize> = Vec::with_capacity(triplets.len());
        let mut values: Vec<f64> = Vec::with_capacity(triplets.len());
        let mut last: Option<(usize, usize)> = None;

        for (row, col, val) in triplets {
            if last == Some((row, col)) {
                if let Some(v) = values.last_mut() {
                    *v += val;
                }
                continue;
            }
            col_idx.push(col);
            values.push(val);
            row_ptr[row + 1] += 1;
            last = Some((row, col));
        }

        // Counts to offsets
        for r in 0..rows {
            row_ptr[r + 1] += row_ptr[r];
        }

        Self {
            rows,
            cols,
            row_ptr,
            col_idx,
            values,
        }
    }

    /// Number of rows.
    #[inline]
    pub fn nrows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[inline]
    pub fn ncols(&self) -> usize {
        self.cols
    }

    /// Number of stored entries.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Iterate over `(col, value)` pairs of row `i`.
    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.row_ptr[i]..self.row_ptr[i + 1];
        self.col_idx[range.clone()]
            .iter()
            .copied()
            .zip(self.values[range].iter().copied())
    }

    /// Entry at `(i, j)`, zero if not stored.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.row(i).find(|&(c, _)| c == j).map_or(0.0, |(_, v)| v)
    }

    fn row_dot(&self, i: usize, x: &[f64]) -> f64 {
        self.row(i).map(|(c, v)| v * x[c]).sum()
    }

    /// `y = A x`.
    pub fn mul_vec(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        if x.len() != self.cols {
            return Err(FitError::invalid_param(
                "x.len()",
                x.len(),
                "must match the matrix column count",
            ));
        }
        let xs = x.as_slice();
        let y: Vec<f64> = if self.rows >= PARALLEL_ROWS {
            (0..self.rows)
                .into_par_iter()
                .map(|i| self.row_dot(i, xs))
                .collect()
        } else {
            (0..self.rows).map(|i| self.row_dot(i, xs)).collect()
        };
        Ok(DVector::from_vec(y))
    }

    /// `y = A^T x`.
    pub fn mul_vec_transpose(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        if x.len() != self.rows {
            return Err(FitError::invalid_param(
                "x.len()",
                x.len(),
                "must match the matrix row count",
            ));
        }
        let mut y = DVector::zeros(self.cols);
        for i in 0..self.rows {
            let xi = x[i];
            if xi == 0.0 {
                continue;
            }
            for (c, v) in self.row(i) {
                y[c] += v * xi;
            }
        }
        Ok(y)
    }

    /// `A^T A`, assembled row by row.
    pub fn gram(&self) -> Self {
        let mut triplets = Vec::new();
        for r in 0..self.rows {
            let entries: Vec<(usize, f64)> = self.row(r).collect();
            for &(i, vi) in &entries {
                for &(j, vj) in &entries {
                    triplets.push((i, j, vi * vj));
                }
            }
        }
        Self::from_triplets(self.cols, self.cols, triplets)
    }

    /// Kronecker product with the `block x block` identity.
    pub fn kron_identity(&self, block: usize) -> Self {
        let mut triplets = Vec::with_capacity(self.nnz() * block);
        for r in 0..self.rows {
            for (c, v) in self.row(r) {
                for k in 0..block {
                    triplets.push((r * block + k, c * block + k, v));
                }
            }
        }
        Self::from_triplets(self.rows * block, self.cols * block, triplets)
    }

    /// Copy with every entry multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        let mut out = self.clone();
        for v in &mut out.values {
            *v *= factor;
        }
        out
    }
}

/// Solve `A x = b` with the conjugate gradient method.
///
/// `A` must be symmetric positive (semi-)definite. Convergence is measured on
/// the relative residual `|r| / |b|`.
pub fn conjugate_gradient(
    a: &CsrMatrix,
    b: &DVector<f64>,
    x0: Option<&DVector<f64>>,
    max_iter: usize,
    tolerance: f64,
) -> Result<DVector<f64>> {
    let n = b.len();
    if a.nrows() != n || a.ncols() != n {
        return Err(FitError::invalid_param(
            "b.len()",
            n,
            "must match the dimensions of a square matrix",
        ));
    }

    let mut x = match x0 {
        Some(x0) => x0.clone(),
        None => DVector::zeros(n),
    };

    let b_norm = b.norm();
    if b_norm < 1e-15 {
        return Ok(x);
    }

    let mut r = b - a.mul_vec(&x)?;
    let mut r_norm_sq = r.dot(&r);
    if r_norm_sq.sqrt() / b_norm < tolerance {
        return Ok(x);
    }

    let mut p = r.clone();
    for _ in 0..max_iter {
        let ap = a.mul_vec(&p)?;
        let p_ap = p.dot(&ap);
        if p_ap.abs() < 1e-15 {
            break;
        }
        let alpha = r_norm_sq / p_ap;
        x += alpha * &p;
        r -= alpha * &ap;

        let new_r_norm_sq = r.dot(&r);
        if new_r_norm_sq.sqrt() / b_norm < tolerance {
            return Ok(x);
        }
        let beta = new_r_norm_sq / r_norm_sq;
        p = &r + beta * &p;
        r_norm_sq = new_r_norm_sq;
    }

    Err(FitError::ConvergenceFailed {
        iterations: max_iter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spd_2x2() -> CsrMatrix {
        // [ 4  1 ]
        // [ 1  3 ]
        CsrMatrix::from_triplets(2, 2, vec![(0, 0, 4.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)])
    }

    #[test]
    fn test_from_triplets_sums_duplicates() {
        let a = CsrMatrix::from_triplets(
            2,
            2,
            vec![(1, 1, 3.0), (0, 0, 2.0), (0, 1, 1.0), (0, 0, 2.0), (1, 0, 1.0)],
        );
        assert_eq!(a, spd_2x2());
        assert_eq!(a.nnz(), 4);
        assert_eq!(a.get(0, 0), 4.0);
    }

    #[test]
    fn test_empty_rows() {
        let a = CsrMatrix::from_triplets(4, 4, vec![(2, 1, 5.0)]);
        assert_eq!(a.row(0).count(), 0);
        assert_eq!(a.row(3).count(), 0);
        assert_eq!(a.get(2, 1), 5.0);
        let y = a.mul_vec(&DVector::from_vec(vec![0.0, 2.0, 0.0, 0.0])).unwrap();
        assert_eq!(y.as_slice(), &[0.0, 0.0, 10.0, 0.0]);
    }

    #[test]
    fn test_mul_vec_and_transpose() {
        // [ 1 2 0 ]
        // [ 0 0 3 ]
        let a = CsrMatrix::from_triplets(2, 3, vec![(0, 0, 1.0), (0, 1, 2.0), (1, 2, 3.0)]);
        let y = a.mul_vec(&DVector::from_vec(vec![1.0, 1.0, 1.0])).unwrap();
        assert_eq!(y.as_slice(), &[3.0, 3.0]);
        let z = a.mul_vec_transpose(&DVector::from_vec(vec![1.0, 2.0])).unwrap();
        assert_eq!(z.as_slice(), &[1.0, 2.0, 6.0]);
        assert!(a.mul_vec(&DVector::zeros(2)).is_err());
    }

    #[test]
    fn test_gram_and_kron() {
        let a = CsrMatrix::from_triplets(2, 2, vec![(0, 0, 1.0), (0, 1, -1.0), (1, 1, 2.0)]);
        let g = a.gram();
        // A^T A = [[1, -1], [-1, 5]]
        assert_eq!(g.get(0, 0), 1.0);
        assert_eq!(g.get(0, 1), -1.0);
        assert_eq!(g.get(1, 0), -1.0);
        assert_eq!(g.get(1, 1), 5.0);

        let k = g.kron_identity(3);
        assert_eq!(k.nrows(), 6);
        assert_eq!(k.get(4, 4), 5.0);
        assert_eq!(k.get(1, 4), -1.0);
        assert_eq!(k.get(1, 3), 0.0);
    }

    #[test]
    fn test_cg_simple() {
        // Solution: x = 1/11, y = 7/11
        let a = spd_2x2();
        let b = DVector::from_vec(vec![1.0, 2.0]);
        let x = conjugate_gradient(&a, &b, None, 100, 1e-10).unwrap();
        assert!((x[0] - 1.0 / 11.0).abs() < 1e-8);
        assert!((x[1] - 7.0 / 11.0).abs() < 1e-8);
    }

    #[test]
    fn test_cg_with_initial_guess() {
        let a = spd_2x2();
        let b = DVector::from_vec(vec![1.0, 2.0]);
        let x0 = DVector::from_vec(vec![0.1, 0.6]);
        let x = conjugate_gradient(&a, &b, Some(&x0), 100, 1e-10).unwrap();
        let residual = a.mul_vec(&x).unwrap() - b;
        assert!(residual.norm() < 1e-8);
    }
}
