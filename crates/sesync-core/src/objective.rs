//! Objective interface for second-order Riemannian solvers.
//!
//! Iterates are dense `r x N` matrices living on a matrix manifold whose
//! geometry (tangent projection, retraction) is supplied by the implementor.
//! Tangent vectors share the iterate's shape and the metric is the
//! Frobenius inner product unless overridden.

use crate::{
    error::Result,
    types::{frobenius_inner, DMatrix, Scalar},
};
use num_traits::Float;

/// Smooth objective on a matrix manifold, with the first and second-order
/// information needed by trust-region methods.
pub trait RiemannianObjective<T: Scalar> {
    /// Evaluates the objective at `y`.
    fn cost(&self, y: &DMatrix<T>) -> Result<T>;

    /// Euclidean gradient of the objective at `y`.
    fn euclidean_gradient(&self, y: &DMatrix<T>) -> Result<DMatrix<T>>;

    /// Converts the Euclidean gradient `egrad` at `y` to the Riemannian
    /// gradient.
    fn riemannian_gradient(&self, y: &DMatrix<T>, egrad: &DMatrix<T>) -> Result<DMatrix<T>>;

    /// Riemannian Hessian applied to the tangent vector `ydot` at `y`.
    ///
    /// `egrad` is the Euclidean gradient at `y`, which the curvature
    /// correction term depends on.
    fn hessian_vector_product(
        &self,
        y: &DMatrix<T>,
        egrad: &DMatrix<T>,
        ydot: &DMatrix<T>,
    ) -> Result<DMatrix<T>>;

    /// Applies the preconditioner to a tangent vector at `y`.
    ///
    /// The result must be a tangent vector at `y`. The default is the
    /// identity.
    fn precondition(&self, _y: &DMatrix<T>, v: &DMatrix<T>) -> Result<DMatrix<T>> {
        Ok(v.clone())
    }

    /// Orthogonal projection of an ambient matrix onto the tangent space
    /// at `y`.
    fn project_tangent(&self, y: &DMatrix<T>, v: &DMatrix<T>) -> Result<DMatrix<T>>;

    /// Retracts the tangent vector `v` at `y` back onto the manifold.
    fn retract(&self, y: &DMatrix<T>, v: &DMatrix<T>) -> Result<DMatrix<T>>;

    /// Riemannian metric on the tangent space at `y`.
    fn inner_product(&self, _y: &DMatrix<T>, u: &DMatrix<T>, v: &DMatrix<T>) -> T {
        frobenius_inner(u, v)
    }
}

/// Utilities for checking gradient and Hessian implementations.
///
/// Derivatives are compared against central finite differences taken along
/// the retraction curve `t -> R_y(t v)`. The second-order check assumes a
/// second-order retraction (such as the polar retraction on Stiefel
/// manifolds).
pub struct DerivativeChecker;

impl DerivativeChecker {
    /// Checks the Riemannian gradient along the tangent direction `v`.
    ///
    /// Compares `<grad f(y), v>` with the central difference of the
    /// objective along the retraction curve.
    ///
    /// # Returns
    ///
    /// A tuple of (passes, absolute_error).
    pub fn check_gradient<T: Scalar>(
        objective: &(impl RiemannianObjective<T> + ?Sized),
        y: &DMatrix<T>,
        v: &DMatrix<T>,
        tol: T,
    ) -> Result<(bool, T)> {
        let h = <T as Float>::cbrt(T::epsilon());

        let egrad = objective.euclidean_gradient(y)?;
        let rgrad = objective.riemannian_gradient(y, &egrad)?;
        let analytical = objective.inner_product(y, &rgrad, v);

        let f_plus = objective.cost(&objective.retract(y, &(v * h))?)?;
        let f_minus = objective.cost(&objective.retract(y, &(v * (-h)))?)?;
        let fd = (f_plus - f_minus) / (h + h);

        let error = <T as Float>::abs(analytical - fd);
        Ok((error < tol, error))
    }

    /// Checks the Riemannian Hessian quadratic form along `v`.
    ///
    /// Compares `<v, Hess f(y)[v]>` with the second central difference of
    /// the objective along the retraction curve.
    ///
    /// # Returns
    ///
    /// A tuple of (passes, absolute_error).
    pub fn check_hessian<T: Scalar>(
        objective: &(impl RiemannianObjective<T> + ?Sized),
        y: &DMatrix<T>,
        v: &DMatrix<T>,
        tol: T,
    ) -> Result<(bool, T)> {
        let h = <T as Float>::powf(T::epsilon(), <T as Scalar>::from_f64(0.25));

        let egrad = objective.euclidean_gradient(y)?;
        let hv = objective.hessian_vector_product(y, &egrad, v)?;
        let analytical = objective.inner_product(y, v, &hv);

        let f0 = objective.cost(y)?;
        let f_plus = objective.cost(&objective.retract(y, &(v * h))?)?;
        let f_minus = objective.cost(&objective.retract(y, &(v * (-h)))?)?;
        let fd = (f_plus - f0 - f0 + f_minus) / (h * h);

        let error = <T as Float>::abs(analytical - fd);
        Ok((error < tol, error))
    }

    /// Checks that the Hessian operator is self-adjoint on the tangent
    /// space: `<u, H v> = <H u, v>`.
    ///
    /// # Returns
    ///
    /// A tuple of (is_symmetric, asymmetry).
    pub fn check_hessian_symmetry<T: Scalar>(
        objective: &(impl RiemannianObjective<T> + ?Sized),
        y: &DMatrix<T>,
        u: &DMatrix<T>,
        v: &DMatrix<T>,
        tol: T,
    ) -> Result<(bool, T)> {
        let egrad = objective.euclidean_gradient(y)?;
        let hu = objective.hessian_vector_product(y, &egrad, u)?;
        let hv = objective.hessian_vector_product(y, &egrad, v)?;

        let asymmetry = <T as Float>::abs(
            objective.inner_product(y, u, &hv) - objective.inner_product(y, &hu, v),
        );
        Ok((asymmetry < tol, asymmetry))
    }
}
