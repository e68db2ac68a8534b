//! Product of Stiefel manifolds St(k, p)^n.
//!
//! A point is a `p x (k*n)` matrix whose `n` consecutive `p x k` column
//! blocks each have orthonormal columns. This is the rotational search space
//! of the rank-`p` relaxation of SE(k) synchronization.

use nalgebra::{DMatrix, DMatrixView, DMatrixViewMut};
use num_traits::Float;
use rand::Rng;

use sesync_core::{
    error::{ManifoldError, Result},
    types::{symmetric_part, Scalar},
};

use crate::matrix_manifold::{gaussian_matrix, MatrixManifold};

/// The product manifold St(k, p)^n using matrix operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StiefelProduct {
    k: usize,
    p: usize,
    n: usize,
}

impl StiefelProduct {
    /// Creates the product manifold St(k, p)^n.
    ///
    /// # Errors
    ///
    /// Returns an error if `k = 0`, `n = 0`, or `p < k`.
    pub fn new(k: usize, p: usize, n: usize) -> Result<Self> {
        if k == 0 || n == 0 {
            return Err(ManifoldError::invalid_point(
                "Stiefel product requires k > 0 and n > 0",
            ));
        }
        if p < k {
            return Err(ManifoldError::invalid_point(format!(
                "Stiefel manifold St(k,p) requires p >= k, got k={}, p={}",
                k, p
            )));
        }
        Ok(Self { k, p, n })
    }

    /// Number of orthonormal columns per block.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Ambient row dimension of each block (the relaxation rank).
    pub fn p(&self) -> usize {
        self.p
    }

    /// Number of blocks.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Projects every block of `a` to the nearest matrix with orthonormal
    /// columns (polar factor).
    pub(crate) fn project_blocks<T: Scalar>(
        &self,
        a: DMatrixView<'_, T>,
        mut out: DMatrixViewMut<'_, T>,
    ) -> Result<()> {
        for i in 0..self.n {
            let block = a.columns(i * self.k, self.k).into_owned();
            let polar = polar_factor(&block)?;
            out.columns_mut(i * self.k, self.k).copy_from(&polar);
        }
        Ok(())
    }

    /// Tangent projection `V_i - Y_i sym(Y_i^T V_i)` applied blockwise.
    pub(crate) fn project_tangent_blocks<T: Scalar>(
        &self,
        y: DMatrixView<'_, T>,
        v: DMatrixView<'_, T>,
        mut out: DMatrixViewMut<'_, T>,
    ) {
        for i in 0..self.n {
            let yi = y.columns(i * self.k, self.k);
            let vi = v.columns(i * self.k, self.k);
            let sym = symmetric_part(&(yi.transpose() * &vi));
            out.columns_mut(i * self.k, self.k)
                .copy_from(&(&vi - &yi * &sym));
        }
    }

    /// Computes `A_i sym(B_i^T C_i)` for every block.
    ///
    /// With `A = Ydot`, `B = Y` and `C` the Euclidean gradient this is the
    /// curvature correction in the Riemannian Hessian.
    pub fn sym_block_diag_product<T: Scalar>(
        &self,
        a: &DMatrix<T>,
        b: &DMatrix<T>,
        c: &DMatrix<T>,
    ) -> DMatrix<T> {
        let mut out = DMatrix::zeros(a.nrows(), self.k * self.n);
        self.sym_block_diag_product_into(a.as_view(), b.as_view(), c.as_view(), out.as_view_mut());
        out
    }

    pub(crate) fn sym_block_diag_product_into<T: Scalar>(
        &self,
        a: DMatrixView<'_, T>,
        b: DMatrixView<'_, T>,
        c: DMatrixView<'_, T>,
        mut out: DMatrixViewMut<'_, T>,
    ) {
        for i in 0..self.n {
            let cols = i * self.k;
            let sym = symmetric_part(&(b.columns(cols, self.k).transpose() * c.columns(cols, self.k)));
            out.columns_mut(cols, self.k)
                .copy_from(&(a.columns(cols, self.k) * &sym));
        }
    }

    /// Largest deviation `max_i ||Y_i^T Y_i - I||_F`.
    pub(crate) fn orthonormality_error<T: Scalar>(&self, y: DMatrixView<'_, T>) -> T {
        let identity = DMatrix::<T>::identity(self.k, self.k);
        (0..self.n)
            .map(|i| {
                let yi = y.columns(i * self.k, self.k);
                (yi.transpose() * &yi - &identity).norm()
            })
            .fold(T::zero(), |a, b| <T as Float>::max(a, b))
    }

    /// Largest deviation `max_i ||sym(Y_i^T V_i)||_F`.
    pub(crate) fn tangency_error<T: Scalar>(
        &self,
        y: DMatrixView<'_, T>,
        v: DMatrixView<'_, T>,
    ) -> T {
        (0..self.n)
            .map(|i| {
                let cols = i * self.k;
                symmetric_part(&(y.columns(cols, self.k).transpose() * v.columns(cols, self.k)))
                    .norm()
            })
            .fold(T::zero(), |a, b| <T as Float>::max(a, b))
    }

    fn check_shape<T: Scalar>(&self, m: &DMatrix<T>) -> Result<()> {
        if m.nrows() != self.p || m.ncols() != self.k * self.n {
            return Err(ManifoldError::dimension_mismatch(
                format!("({}, {})", self.p, self.k * self.n),
                format!("({}, {})", m.nrows(), m.ncols()),
            ));
        }
        Ok(())
    }
}

/// Polar factor `U V^T` of a tall matrix with thin SVD `U S V^T`.
pub fn polar_factor<T: Scalar>(block: &DMatrix<T>) -> Result<DMatrix<T>> {
    let svd = block.clone().svd(true, true);
    let u = svd
        .u
        .ok_or_else(|| ManifoldError::numerical_error("SVD failed to produce U"))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| ManifoldError::numerical_error("SVD failed to produce V^T"))?;
    Ok(u * v_t)
}

/// Nearest rotation in SO(k) to a square matrix.
///
/// Computes the polar factor and, when its determinant is negative, flips
/// the singular direction belonging to the smallest singular value.
pub fn project_to_rotation<T: Scalar>(m: &DMatrix<T>) -> Result<DMatrix<T>> {
    if m.nrows() != m.ncols() {
        return Err(ManifoldError::dimension_mismatch(
            "square matrix",
            format!("({}, {})", m.nrows(), m.ncols()),
        ));
    }
    let svd = m.clone().svd(true, true);
    let mut u = svd
        .u
        .ok_or_else(|| ManifoldError::numerical_error("SVD failed to produce U"))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| ManifoldError::numerical_error("SVD failed to produce V^T"))?;

    if (&u * &v_t).determinant() < T::zero() {
        let last = u.ncols() - 1;
        u.column_mut(last).neg_mut();
    }
    Ok(u * v_t)
}

impl<T: Scalar> MatrixManifold<T> for StiefelProduct {
    fn name(&self) -> &str {
        "StiefelProduct"
    }

    fn nrows(&self) -> usize {
        self.p
    }

    fn ncols(&self) -> usize {
        self.k * self.n
    }

    fn dimension(&self) -> usize {
        self.n * (self.p * self.k - self.k * (self.k + 1) / 2)
    }

    fn is_point_on_manifold(&self, point: &DMatrix<T>, tolerance: T) -> bool {
        if self.check_shape(point).is_err() {
            return false;
        }
        self.orthonormality_error(point.as_view()) < tolerance
    }

    fn is_vector_in_tangent_space(
        &self,
        point: &DMatrix<T>,
        vector: &DMatrix<T>,
        tolerance: T,
    ) -> bool {
        if !self.is_point_on_manifold(point, tolerance) || self.check_shape(vector).is_err() {
            return false;
        }
        self.tangency_error(point.as_view(), vector.as_view()) < tolerance
    }

    fn project_point(&self, matrix: &DMatrix<T>, result: &mut DMatrix<T>) -> Result<()> {
        self.check_shape(matrix)?;
        self.check_shape(result)?;
        self.project_blocks(matrix.as_view(), result.as_view_mut())
    }

    fn project_tangent(
        &self,
        point: &DMatrix<T>,
        vector: &DMatrix<T>,
        result: &mut DMatrix<T>,
    ) -> Result<()> {
        self.check_shape(point)?;
        self.check_shape(vector)?;
        self.check_shape(result)?;
        self.project_tangent_blocks(point.as_view(), vector.as_view(), result.as_view_mut());
        Ok(())
    }

    fn retract(
        &self,
        point: &DMatrix<T>,
        tangent: &DMatrix<T>,
        result: &mut DMatrix<T>,
    ) -> Result<()> {
        // Polar retraction: R_Y(V) = polar(Y + V) blockwise
        self.check_shape(tangent)?;
        let shifted = point + tangent;
        self.project_point(&shifted, result)
    }

    fn random_point<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<DMatrix<T>> {
        let ambient = gaussian_matrix(self.p, self.k * self.n, rng);
        let mut point = DMatrix::zeros(self.p, self.k * self.n);
        self.project_point(&ambient, &mut point)?;
        Ok(point)
    }
}
