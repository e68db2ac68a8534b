//! Locally optimal block preconditioned conjugate gradient (LOBPCG) for the
//! algebraically smallest eigenpair of a sparse symmetric matrix.
//!
//! Each iteration orthonormalizes the search space `[X, W, P]` (current Ritz
//! block, preconditioned residuals, previous search directions) and performs
//! a Rayleigh-Ritz projection onto it. Directions that become linearly
//! dependent are deflated from the basis.

use nalgebra::SymmetricEigen;
use num_traits::Float;
use rand::{rngs::SmallRng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use sesync_core::{
    error::{ManifoldError, Result},
    sparse::CsrMatrix,
    types::{DMatrix, DVector, Scalar},
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::preconditioner::Preconditioner;

/// Relative norm below which a new basis direction is deflated.
const DEFLATION_TOL: f64 = 1e-10;

/// LOBPCG parameters.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LobpcgConfig<T: Scalar> {
    /// Number of simultaneously iterated vectors.
    pub block_size: usize,
    /// Iteration budget.
    pub max_iterations: usize,
    /// Numerical tolerance on the minimum eigenvalue.
    pub tolerance: T,
}

impl<T: Scalar> Default for LobpcgConfig<T> {
    fn default() -> Self {
        Self {
            block_size: 4,
            max_iterations: 100,
            tolerance: <T as Scalar>::from_f64(1e-3),
        }
    }
}

impl<T: Scalar> LobpcgConfig<T> {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the block size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the iteration budget.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the eigenvalue tolerance.
    pub fn with_tolerance(mut self, tolerance: T) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Stopping predicate on the lowest Ritz pair.
    ///
    /// Fires when the residual is below half the tolerance, or when the Ritz
    /// value is clearly negative and the residual is below half its
    /// magnitude (enough to certify a negative eigenvalue).
    pub fn is_converged(&self, theta: T, residual: T) -> bool {
        let half = <T as Scalar>::from_f64(0.5);
        residual <= half * self.tolerance
            || (theta < -self.tolerance && residual <= half * <T as Float>::abs(theta))
    }
}

/// Lowest Ritz pair found by [`lobpcg_min_eigenpair`].
#[derive(Debug, Clone)]
pub struct LobpcgResult<T: Scalar> {
    /// Ritz value.
    pub eigenvalue: T,
    /// Unit-norm Ritz vector.
    pub eigenvector: DVector<T>,
    /// Residual norm `||S x - theta x||`.
    pub residual: T,
    /// Iterations performed.
    pub iterations: usize,
    /// Whether the stopping predicate fired within the budget.
    pub converged: bool,
}

/// Modified Gram-Schmidt (two passes) of `candidates` against `basis`.
///
/// Appends the surviving normalized candidates to the returned basis.
fn extend_orthonormal<T: Scalar>(basis: Vec<DVector<T>>, candidates: &DMatrix<T>) -> Vec<DVector<T>> {
    let tol = <T as Scalar>::from_f64(DEFLATION_TOL);
    let mut basis = basis;
    for column in candidates.column_iter() {
        let mut v = column.into_owned();
        let original = v.norm();
        if !(original > T::zero()) || !<T as Float>::is_finite(original) {
            continue;
        }
        for _ in 0..2 {
            for q in &basis {
                let c = q.dot(&v);
                v.axpy(-c, q, T::one());
            }
        }
        let norm = v.norm();
        if norm > tol * original {
            basis.push(v / norm);
        }
    }
    basis
}

/// Rayleigh-Ritz on the orthonormal `basis`, returning the `k` smallest Ritz
/// values and their coefficient vectors.
fn rayleigh_ritz<T: Scalar>(
    basis: &DMatrix<T>,
    s_basis: &DMatrix<T>,
    k: usize,
) -> (DVector<T>, DMatrix<T>) {
    let h = basis.transpose() * s_basis;
    let h = (&h + h.transpose()) * <T as Scalar>::from_f64(0.5);
    let eigen = SymmetricEigen::new(h);

    let mut order: Vec<usize> = (0..eigen.eigenvalues.len()).collect();
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[a]
            .partial_cmp(&eigen.eigenvalues[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(k);

    let values = DVector::from_iterator(order.len(), order.iter().map(|&i| eigen.eigenvalues[i]));
    let mut vectors = DMatrix::zeros(basis.ncols(), order.len());
    for (j, &i) in order.iter().enumerate() {
        vectors.set_column(j, &eigen.eigenvectors.column(i));
    }
    (values, vectors)
}

/// Residual block `S X - X diag(theta)`.
fn residuals<T: Scalar>(x: &DMatrix<T>, sx: &DMatrix<T>, theta: &DVector<T>) -> DMatrix<T> {
    let mut r = sx.clone();
    for (j, t) in theta.iter().enumerate() {
        let mut col = r.column_mut(j);
        col.axpy(-*t, &x.column(j), T::one());
    }
    r
}

/// Computes the algebraically smallest eigenpair of the symmetric matrix `s`.
///
/// The starting block is drawn from a Gaussian seeded with `seed`. Exhausting
/// the iteration budget is not an error: the best Ritz pair is returned with
/// `converged = false`.
///
/// # Errors
///
/// Returns an error if `s` is not square, the block size is zero, or the
/// preconditioner fails.
pub fn lobpcg_min_eigenpair<T, P>(
    s: &CsrMatrix<T>,
    preconditioner: &P,
    config: &LobpcgConfig<T>,
    seed: u64,
) -> Result<LobpcgResult<T>>
where
    T: Scalar,
    P: Preconditioner<T> + ?Sized,
{
    let n = s.nrows();
    if s.ncols() != n || n == 0 {
        return Err(ManifoldError::dimension_mismatch(
            "non-empty square matrix",
            format!("({} x {})", n, s.ncols()),
        ));
    }
    if config.block_size == 0 {
        return Err(ManifoldError::numerical_error("LOBPCG block size must be positive"));
    }
    let m = config.block_size.min(n);

    let mut rng = SmallRng::seed_from_u64(seed);
    let start = DMatrix::from_fn(n, m, |_, _| {
        let v: f64 = StandardNormal.sample(&mut rng);
        <T as Scalar>::from_f64(v)
    });
    let basis = extend_orthonormal(Vec::new(), &start);
    if basis.is_empty() {
        return Err(ManifoldError::numerical_error("degenerate LOBPCG starting block"));
    }
    let basis = DMatrix::from_columns(&basis);
    let s_basis = s.mul_dense(&basis)?;
    let (mut theta, coeffs) = rayleigh_ritz(&basis, &s_basis, m);
    let mut x = &basis * &coeffs;
    let mut sx = &s_basis * &coeffs;
    let mut r = residuals(&x, &sx, &theta);
    let mut p: Option<DMatrix<T>> = None;

    let mut converged = false;
    let mut iterations = 0;
    for iteration in 1..=config.max_iterations {
        let w = preconditioner.apply(&r)?;

        let mut columns = extend_orthonormal(Vec::new(), &x);
        let x_count = columns.len();
        columns = extend_orthonormal(columns, &w);
        if let Some(p) = &p {
            columns = extend_orthonormal(columns, p);
        }
        let basis = DMatrix::from_columns(&columns);
        let s_basis = s.mul_dense(&basis)?;
        let k = m.min(basis.ncols());
        let (values, coeffs) = rayleigh_ritz(&basis, &s_basis, k);

        let extra = basis.ncols() - x_count;
        p = (extra > 0).then(|| {
            basis.columns(x_count, extra) * coeffs.rows(x_count, extra)
        });
        theta = values;
        x = &basis * &coeffs;
        sx = &s_basis * &coeffs;
        r = residuals(&x, &sx, &theta);
        iterations = iteration;

        let rho = r.column(0).norm();
        log::debug!(
            "LOBPCG iter {:3}  theta = {:.6e}  residual = {:.3e}  basis = {}",
            iteration,
            Scalar::to_f64(theta[0]),
            Scalar::to_f64(rho),
            basis.ncols(),
        );
        if config.is_converged(theta[0], rho) {
            converged = true;
            break;
        }
    }

    let mut eigenvector = x.column(0).into_owned();
    let norm = eigenvector.norm();
    if norm > T::zero() {
        eigenvector /= norm;
    }
    Ok(LobpcgResult {
        eigenvalue: theta[0],
        residual: r.column(0).norm(),
        eigenvector,
        iterations,
        converged,
    })
}
