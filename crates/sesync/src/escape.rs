//! Escape from saddle points along a negative curvature direction of the
//! certificate matrix.

use nalgebra::{DMatrix, DVector};
use num_traits::Float;
use sesync_core::{
    error::{ManifoldError, Result},
    types::Scalar,
};

use crate::problem::SynchronizationProblem;

/// Smallest step length tried.
const MIN_STEPSIZE: f64 = 1e-6;

/// Builds a descent point at rank `r + 1` from a saddle `Y` at rank `r`.
///
/// With `v_F` the last `N` entries of `v` (one per column of `Y`), the
/// second-order descent direction at `Y_aug = [Y; 0]` is
/// `Ydot = [0; v_F^T]`. Step lengths start at
/// `max(16 alpha_min, 10 grad_tol / |theta|)` and are halved until the
/// retracted point decreases the objective while keeping both gradient norms
/// above their tolerances, so the next trust-region run does not stop
/// immediately. Returns `None` once the step length drops below
/// `alpha_min`.
pub fn escape_saddle<T, P>(
    problem: &P,
    y: &DMatrix<T>,
    theta: T,
    v: &DVector<T>,
    grad_tol: T,
    precon_grad_tol: T,
) -> Result<Option<DMatrix<T>>>
where
    T: Scalar,
    P: SynchronizationProblem<T> + ?Sized,
{
    let (r, ncols) = y.shape();
    if v.len() < ncols {
        return Err(ManifoldError::dimension_mismatch(
            format!("eigenvector of length at least {ncols}"),
            v.len(),
        ));
    }
    let v_f = v.rows(v.len() - ncols, ncols);

    let mut y_aug = DMatrix::zeros(r + 1, ncols);
    y_aug.rows_mut(0, r).copy_from(y);
    let mut y_dot = DMatrix::zeros(r + 1, ncols);
    y_dot.row_mut(r).copy_from(&v_f.transpose());

    let value = problem.cost(y)?;
    let alpha_min = <T as Scalar>::from_f64(MIN_STEPSIZE);
    let mut alpha = <T as Float>::max(
        <T as Scalar>::from_f64(16.0) * alpha_min,
        <T as Scalar>::from_f64(10.0) * grad_tol / <T as Float>::abs(theta),
    );

    while alpha >= alpha_min {
        let y_test = problem.retract(&y_aug, &(&y_dot * alpha))?;
        let test_value = problem.cost(&y_test)?;
        if test_value < value {
            let egrad = problem.euclidean_gradient(&y_test)?;
            let grad = problem.riemannian_gradient(&y_test, &egrad)?;
            let grad_norm = <T as Float>::sqrt(problem.inner_product(&y_test, &grad, &grad));
            let precon = problem.precondition(&y_test, &grad)?;
            let precon_norm = <T as Float>::sqrt(problem.inner_product(&y_test, &precon, &precon));
            if grad_norm > grad_tol && precon_norm > precon_grad_tol {
                log::debug!(
                    "escaping saddle with stepsize {:.3e}: f = {:.6e} -> {:.6e}",
                    Scalar::to_f64(alpha),
                    Scalar::to_f64(value),
                    Scalar::to_f64(test_value)
                );
                return Ok(Some(y_test));
            }
        }
        alpha = alpha * <T as Scalar>::from_f64(0.5);
    }

    log::warn!(
        "saddle escape failed: no stepsize above {:.1e} decreases the objective",
        MIN_STEPSIZE
    );
    Ok(None)
}
