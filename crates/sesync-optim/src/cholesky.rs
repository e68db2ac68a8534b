//! Sparse Cholesky factorization of symmetric positive-definite matrices.
//!
//! Wraps the up-looking `L D L^T` of `sprs-ldl` under a reverse
//! Cuthill-McKee ordering. The factor is kept in double precision whatever
//! the scalar type of the caller, and `D` is checked to be positive, so a
//! successful factorization certifies numerical positive definiteness.

use std::fmt;
use std::sync::Arc;

use sesync_core::{
    error::{ManifoldError, Result},
    sparse::CsrMatrix,
    types::{DMatrix, Scalar},
};
use sprs::{CsMat, FillInReduction, SymmetryCheck, TriMat};
use sprs_ldl::{Ldl, LdlNumeric};

use crate::preconditioner::Preconditioner;

/// Exact sparse `L D L^T = P A P^T` with a fill-reducing permutation `P`.
#[derive(Clone)]
pub struct SparseCholesky<T: Scalar> {
    factor: Arc<LdlNumeric<f64, usize>>,
    dim: usize,
    _scalar: std::marker::PhantomData<T>,
}

impl<T: Scalar> fmt::Debug for SparseCholesky<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparseCholesky")
            .field("dim", &self.dim)
            .finish_non_exhaustive()
    }
}

impl<T: Scalar> SparseCholesky<T> {
    /// Factors the symmetric matrix `a`; `name` labels the error.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if `a` is not square and
    /// `NumericalError` if the factorization breaks down or a pivot falls
    /// below `n eps max_i |a_ii|`.
    pub fn factor(a: &CsrMatrix<T>, name: &str) -> Result<Self> {
        let dim = a.nrows();
        if a.ncols() != dim {
            return Err(ManifoldError::dimension_mismatch(
                format!("square {name}"),
                format!("{} x {}", dim, a.ncols()),
            ));
        }

        let mut triplets = TriMat::with_capacity((dim, dim), a.nnz());
        let mut scale = 0.0_f64;
        for i in 0..dim {
            for (j, v) in a.row(i) {
                let v = Scalar::to_f64(v);
                if i == j {
                    scale = scale.max(v.abs());
                }
                triplets.add_triplet(i, j, v);
            }
        }
        let csc: CsMat<f64> = triplets.to_csc();

        let factor = Ldl::new()
            .fill_in_reduction(FillInReduction::ReverseCuthillMcKee)
            .check_symmetry(SymmetryCheck::DontCheckSymmetry)
            .numeric(csc.view())
            .map_err(|e| {
                ManifoldError::numerical_error(format!("factorization of {name} failed: {e:?}"))
            })?;

        let floor = f64::EPSILON * dim as f64 * if scale > 0.0 { scale } else { 1.0 };
        if let Some(k) = factor.d().iter().position(|&pivot| !(pivot > floor)) {
            return Err(ManifoldError::numerical_error(format!(
                "{name} is not positive definite (pivot {k} is {:.3e})",
                factor.d()[k]
            )));
        }

        Ok(Self {
            factor: Arc::new(factor),
            dim,
            _scalar: std::marker::PhantomData,
        })
    }

    /// Order of the factored matrix.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Solves `A X = B` column by column.
    pub fn solve(&self, b: &DMatrix<T>) -> Result<DMatrix<T>> {
        if b.nrows() != self.dim {
            return Err(ManifoldError::dimension_mismatch(self.dim, b.nrows()));
        }
        let mut x = DMatrix::zeros(b.nrows(), b.ncols());
        for (j, column) in b.column_iter().enumerate() {
            let rhs: Vec<f64> = column.iter().map(|v| Scalar::to_f64(*v)).collect();
            let solved = self.factor.solve(rhs.as_slice());
            for (i, v) in solved.into_iter().enumerate() {
                x[(i, j)] = <T as Scalar>::from_f64(v);
            }
        }
        Ok(x)
    }
}

impl<T: Scalar> Preconditioner<T> for SparseCholesky<T> {
    fn apply(&self, block: &DMatrix<T>) -> Result<DMatrix<T>> {
        self.solve(block)
    }

    fn name(&self) -> &str {
        "Sparse Cholesky"
    }
}
