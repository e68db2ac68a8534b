//! Incomplete symmetric `L D L^T` factorization used as a positive-definite
//! preconditioner for the certificate matrix.
//!
//! The factorization is left-looking (Crout order). Column `k` of `L` is
//! accumulated in a dense work vector from the lower part of column `k` of
//! `S` and the contributions of every earlier column `j` with
//! `L[k, j] != 0`. Two sparsity controls are then applied to the finished
//! column:
//!
//! - entries with `|l| <= drop_tol * ||L_k||_1` are discarded
//! - at most `ceil(max_fill_factor * nnz(S) / n)` of the largest remaining
//!   entries are kept
//!
//! Pivots smaller than `pivot_tol * max_i |S_ii|` are moved to that floor
//! (keeping their sign), and the preconditioner uses `|D|`, so
//! `P^{-1} = L^{-T} |D|^{-1} L^{-1}` is always symmetric positive definite.

use num_traits::Float;
use sesync_core::{
    error::{ManifoldError, Result},
    sparse::CsrMatrix,
    types::{constants, DMatrix, DVector, Scalar},
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::preconditioner::Preconditioner;

/// Sparsity and stability controls of the incomplete factorization.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IldlConfig<T: Scalar> {
    /// Column fill budget relative to the average row count of the input.
    pub max_fill_factor: T,
    /// Relative drop tolerance against the column's 1-norm.
    pub drop_tol: T,
    /// Pivot floor relative to the largest diagonal magnitude.
    pub pivot_tol: T,
}

impl<T: Scalar> Default for IldlConfig<T> {
    fn default() -> Self {
        Self {
            max_fill_factor: <T as Scalar>::from_f64(3.0),
            drop_tol: <T as Scalar>::from_f64(1e-3),
            pivot_tol: constants::pivot_tolerance(),
        }
    }
}

impl<T: Scalar> IldlConfig<T> {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the fill factor.
    pub fn with_max_fill_factor(mut self, factor: T) -> Self {
        self.max_fill_factor = factor;
        self
    }

    /// Sets the drop tolerance.
    pub fn with_drop_tol(mut self, tol: T) -> Self {
        self.drop_tol = tol;
        self
    }

    /// Sets the relative pivot floor.
    pub fn with_pivot_tol(mut self, tol: T) -> Self {
        self.pivot_tol = tol;
        self
    }
}

/// Incomplete `L D L^T` factors.
///
/// `L` is unit lower triangular and stored column-wise without its diagonal.
#[derive(Debug, Clone)]
pub struct IncompleteLdl<T: Scalar> {
    dim: usize,
    col_ptr: Vec<usize>,
    row_idx: Vec<usize>,
    values: Vec<T>,
    diag: DVector<T>,
}

impl<T: Scalar> IncompleteLdl<T> {
    /// Factors the symmetric matrix `s`.
    ///
    /// Only the lower triangle is read (through the rows of `s`, which by
    /// symmetry hold the columns).
    ///
    /// # Errors
    ///
    /// Returns an error if `s` is not square or contains non-finite values.
    pub fn factor(s: &CsrMatrix<T>, config: &IldlConfig<T>) -> Result<Self> {
        let n = s.nrows();
        if s.ncols() != n {
            return Err(ManifoldError::dimension_mismatch(
                format!("square matrix ({n} x {n})"),
                format!("({} x {})", n, s.ncols()),
            ));
        }

        let max_diag = s
            .diagonal()
            .iter()
            .fold(T::zero(), |acc, v| <T as Float>::max(acc, <T as Float>::abs(*v)));
        let scale = if max_diag > T::zero() { max_diag } else { T::one() };
        let floor = config.pivot_tol * scale;

        let fill = Scalar::to_f64(config.max_fill_factor) * s.nnz() as f64 / n.max(1) as f64;
        let max_per_column = (fill.ceil() as usize).max(1);

        let mut columns: Vec<Vec<(usize, T)>> = vec![Vec::new(); n];
        // rows[i] lists (j, L[i, j]) for the finished columns j < i
        let mut rows: Vec<Vec<(usize, T)>> = vec![Vec::new(); n];
        let mut diag = DVector::zeros(n);

        let mut work = vec![T::zero(); n];
        let mut marker = vec![usize::MAX; n];
        let mut pattern: Vec<usize> = Vec::new();

        for k in 0..n {
            let mut pivot = T::zero();
            for (i, a) in s.row(k) {
                if !<T as Float>::is_finite(a) {
                    return Err(ManifoldError::numerical_error(format!(
                        "non-finite entry in row {k} of the factored matrix"
                    )));
                }
                if i == k {
                    pivot += a;
                } else if i > k {
                    if marker[i] != k {
                        marker[i] = k;
                        pattern.push(i);
                    }
                    work[i] += a;
                }
            }

            for &(j, lkj) in &rows[k] {
                let dj = diag[j];
                pivot -= lkj * lkj * dj;
                let scaled = lkj * dj;
                for &(i, lij) in &columns[j] {
                    if i <= k {
                        continue;
                    }
                    if marker[i] != k {
                        marker[i] = k;
                        pattern.push(i);
                    }
                    work[i] -= lij * scaled;
                }
            }

            if <T as Float>::abs(pivot) < floor {
                pivot = if pivot < T::zero() { -floor } else { floor };
            }
            diag[k] = pivot;

            let mut column: Vec<(usize, T)> = pattern
                .drain(..)
                .filter_map(|i| {
                    let l = work[i] / pivot;
                    work[i] = T::zero();
                    (l != T::zero()).then_some((i, l))
                })
                .collect();

            let norm1 = column
                .iter()
                .fold(T::zero(), |acc, (_, l)| acc + <T as Float>::abs(*l));
            let threshold = config.drop_tol * norm1;
            column.retain(|(_, l)| <T as Float>::abs(*l) > threshold);

            if column.len() > max_per_column {
                column.sort_unstable_by(|a, b| {
                    <T as Float>::abs(b.1)
                        .partial_cmp(&<T as Float>::abs(a.1))
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                column.truncate(max_per_column);
            }
            column.sort_unstable_by_key(|&(i, _)| i);

            for &(i, l) in &column {
                rows[i].push((k, l));
            }
            columns[k] = column;
        }

        let mut col_ptr = Vec::with_capacity(n + 1);
        let mut row_idx = Vec::new();
        let mut values = Vec::new();
        col_ptr.push(0);
        for column in columns {
            for (i, l) in column {
                row_idx.push(i);
                values.push(l);
            }
            col_ptr.push(row_idx.len());
        }

        Ok(Self {
            dim: n,
            col_ptr,
            row_idx,
            values,
            diag,
        })
    }

    /// Dimension of the factored matrix.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of stored off-diagonal entries of `L`.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Pivots `D` (with their signs).
    pub fn diagonal(&self) -> &DVector<T> {
        &self.diag
    }

    fn column(&self, k: usize) -> impl Iterator<Item = (usize, T)> + '_ {
        let range = self.col_ptr[k]..self.col_ptr[k + 1];
        self.row_idx[range.clone()]
            .iter()
            .copied()
            .zip(self.values[range].iter().copied())
    }

    /// Solves `L |D| L^T x = b`.
    pub fn solve(&self, b: &DVector<T>) -> Result<DVector<T>> {
        if b.len() != self.dim {
            return Err(ManifoldError::dimension_mismatch(self.dim, b.len()));
        }
        let mut x = b.clone();

        for k in 0..self.dim {
            let xk = x[k];
            for (i, l) in self.column(k) {
                x[i] -= l * xk;
            }
        }
        for k in 0..self.dim {
            x[k] /= <T as Float>::abs(self.diag[k]);
        }
        for k in (0..self.dim).rev() {
            let mut xk = x[k];
            for (i, l) in self.column(k) {
                xk -= l * x[i];
            }
            x[k] = xk;
        }
        Ok(x)
    }

    /// Dense `L D L^T`.
    pub fn reconstruct_dense(&self) -> DMatrix<T> {
        let mut l = DMatrix::<T>::identity(self.dim, self.dim);
        for k in 0..self.dim {
            for (i, v) in self.column(k) {
                l[(i, k)] = v;
            }
        }
        let ld = &l * DMatrix::from_diagonal(&self.diag);
        ld * l.transpose()
    }
}

impl<T: Scalar> Preconditioner<T> for IncompleteLdl<T> {
    fn apply(&self, block: &DMatrix<T>) -> Result<DMatrix<T>> {
        if block.nrows() != self.dim {
            return Err(ManifoldError::dimension_mismatch(self.dim, block.nrows()));
        }
        let mut out = DMatrix::zeros(block.nrows(), block.ncols());
        for (j, column) in block.column_iter().enumerate() {
            let solved = self.solve(&column.into_owned())?;
            out.set_column(j, &solved);
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "Incomplete LDL^T"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tridiagonal(n: usize, diag: f64, off: f64) -> DMatrix<f64> {
        DMatrix::from_fn(n, n, |i, j| {
            if i == j {
                diag
            } else if i.abs_diff(j) == 1 {
                off
            } else {
                0.0
            }
        })
    }

    fn exact() -> IldlConfig<f64> {
        IldlConfig::new()
            .with_drop_tol(0.0)
            .with_max_fill_factor(1e6)
    }

    #[test]
    fn test_exact_factorization_without_dropping() {
        let dense = DMatrix::from_row_slice(
            4,
            4,
            &[
                4.0, 1.0, 0.0, 1.0, //
                1.0, 5.0, 2.0, 0.0, //
                0.0, 2.0, 6.0, 1.0, //
                1.0, 0.0, 1.0, 3.0,
            ],
        );
        let s = CsrMatrix::from_dense(&dense, 0.0);
        let ldl = IncompleteLdl::factor(&s, &exact()).unwrap();

        assert_relative_eq!(ldl.reconstruct_dense(), dense, epsilon = 1e-12);
        assert!(ldl.nnz() >= 3);
    }

    #[test]
    fn test_indefinite_matrix_is_reproduced() {
        let dense = DMatrix::from_row_slice(3, 3, &[1.0, 2.0, 0.0, 2.0, 1.0, 1.0, 0.0, 1.0, -2.0]);
        let s = CsrMatrix::from_dense(&dense, 0.0);
        let ldl = IncompleteLdl::factor(&s, &exact()).unwrap();

        assert_relative_eq!(ldl.reconstruct_dense(), dense, epsilon = 1e-12);
        assert!(ldl.diagonal().iter().any(|d| *d < 0.0));
    }

    #[test]
    fn test_solve_inverts_positive_definite_matrix() {
        let dense = tridiagonal(6, 4.0, -1.0);
        let s = CsrMatrix::from_dense(&dense, 0.0);
        let ldl = IncompleteLdl::factor(&s, &exact()).unwrap();

        let b = DVector::from_fn(6, |i, _| (i as f64) - 2.5);
        let x = ldl.solve(&b).unwrap();
        assert_relative_eq!(&dense * x, b, epsilon = 1e-10);
    }

    #[test]
    fn test_fill_budget_limits_columns() {
        let n = 8;
        let dense = DMatrix::from_fn(n, n, |i, j| if i == j { 10.0 } else { 1.0 / (1.0 + (i + j) as f64) });
        let s = CsrMatrix::from_dense(&dense, 0.0);
        let config = IldlConfig::new().with_drop_tol(0.0).with_max_fill_factor(0.25);
        let ldl = IncompleteLdl::factor(&s, &config).unwrap();

        // ceil(0.25 * 64 / 8) = 2 entries per column
        for k in 0..n {
            assert!(ldl.col_ptr[k + 1] - ldl.col_ptr[k] <= 2);
        }
    }

    #[test]
    fn test_pivot_floor_keeps_preconditioner_definite() {
        let dense = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let s = CsrMatrix::from_dense(&dense, 0.0);
        let ldl = IncompleteLdl::factor(&s, &exact()).unwrap();

        let floor = constants::pivot_tolerance::<f64>();
        assert_relative_eq!(ldl.diagonal()[1], floor);

        let block = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]);
        let applied = ldl.apply(&block).unwrap();
        let quad = (block.transpose() * &applied).symmetric_eigenvalues();
        assert!(quad.iter().all(|v| *v > 0.0));
    }

    #[test]
    fn test_non_square_is_rejected() {
        let s = CsrMatrix::<f64>::zeros(2, 3);
        assert!(IncompleteLdl::factor(&s, &IldlConfig::default()).is_err());
    }
}
