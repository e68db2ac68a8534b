//! Truncated preconditioned conjugate gradient (Steihaug-Toint) subsolver.
//!
//! Approximately solves the trust-region subproblem
//!
//! ```text
//! min_eta  m(eta) = <g, eta> + 1/2 <eta, H eta>
//! s.t.     ||eta||_P <= Delta
//! ```
//!
//! where `||.||_P` is the norm induced by the inverse of the preconditioner.
//! The norms `<eta, P^-1 eta>`, `<eta, P^-1 delta>` and `<delta, P^-1 delta>`
//! are tracked by recurrences so that the inverse preconditioner is never
//! applied explicitly.
//!
//! # References
//!
//! - Absil, Baker & Gallivan, "Trust-Region Methods on Riemannian Manifolds" (2007)
//! - Conn, Gould & Toint, "Trust Region Methods" (2000), Algorithm 7.5.1

use num_traits::Float;
use sesync_core::{
    error::{ManifoldError, Result},
    objective::RiemannianObjective,
    types::{DMatrix, Scalar},
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration of the truncated CG subsolver.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TcgConfig<T: Scalar> {
    /// Linear convergence target `kappa` in (0, 1).
    pub kappa: T,
    /// Superlinear convergence exponent `theta > 0`.
    pub theta: T,
    /// Maximum number of inner iterations.
    pub max_iterations: usize,
}

impl<T: Scalar> Default for TcgConfig<T> {
    fn default() -> Self {
        Self {
            kappa: <T as Scalar>::from_f64(0.1),
            theta: <T as Scalar>::from_f64(0.5),
            max_iterations: 10_000,
        }
    }
}

impl<T: Scalar> TcgConfig<T> {
    /// Creates a new configuration with default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the linear convergence target.
    pub fn with_kappa(mut self, kappa: T) -> Self {
        self.kappa = kappa;
        self
    }

    /// Sets the superlinear convergence exponent.
    pub fn with_theta(mut self, theta: T) -> Self {
        self.theta = theta;
        self
    }

    /// Sets the maximum number of inner iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// Why the inner iteration stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TcgStopReason {
    /// A direction with `<delta, H delta> <= 0` was found.
    NegativeCurvature,
    /// The next iterate would have left the trust region.
    ExceededTrustRegion,
    /// Residual reached `kappa * ||r_0||`.
    LinearConvergence,
    /// Residual reached `||r_0||^(1 + theta)`.
    SuperlinearConvergence,
    /// The inner iteration budget was exhausted.
    MaxIterations,
}

impl TcgStopReason {
    /// Whether the returned step lies on the trust-region boundary.
    pub fn hit_boundary(self) -> bool {
        matches!(self, Self::NegativeCurvature | Self::ExceededTrustRegion)
    }
}

/// Output of the truncated CG subsolver.
#[derive(Debug, Clone)]
pub struct TcgResult<T: Scalar> {
    /// Approximate minimizer of the model.
    pub step: DMatrix<T>,
    /// Hessian applied to `step`.
    pub hessian_step: DMatrix<T>,
    /// Number of inner iterations performed.
    pub iterations: usize,
    /// Why the iteration stopped.
    pub stop_reason: TcgStopReason,
    /// Squared preconditioned norm `<step, P^-1 step>`.
    pub step_norm_sq_precon: T,
}

impl<T: Scalar> TcgResult<T> {
    /// Whether the step lies on the trust-region boundary.
    pub fn hit_boundary(&self) -> bool {
        self.stop_reason.hit_boundary()
    }
}

/// Runs truncated preconditioned CG at `y`.
///
/// `egrad` is the Euclidean gradient at `y` (needed by the Hessian operator)
/// and `grad` the Riemannian gradient. Every Hessian-vector product increments
/// `hessian_products`.
#[allow(clippy::too_many_arguments)]
pub fn truncated_cg<T, O>(
    objective: &O,
    y: &DMatrix<T>,
    egrad: &DMatrix<T>,
    grad: &DMatrix<T>,
    radius: T,
    config: &TcgConfig<T>,
    hessian_products: &mut usize,
) -> Result<TcgResult<T>>
where
    T: Scalar,
    O: RiemannianObjective<T> + ?Sized,
{
    let two = <T as Scalar>::from_f64(2.0);
    let radius_sq = radius * radius;

    let mut eta = DMatrix::zeros(grad.nrows(), grad.ncols());
    let mut h_eta = DMatrix::zeros(grad.nrows(), grad.ncols());

    let mut r = grad.clone();
    let norm_r0 = <T as Float>::sqrt(objective.inner_product(y, &r, &r));
    let linear_target = norm_r0 * config.kappa;
    let superlinear_target = norm_r0 * <T as Float>::powf(norm_r0, config.theta);
    let target = <T as Float>::min(linear_target, superlinear_target);

    if norm_r0 == T::zero() || config.max_iterations == 0 {
        return Ok(TcgResult {
            step: eta,
            hessian_step: h_eta,
            iterations: 0,
            stop_reason: if norm_r0 == T::zero() {
                TcgStopReason::LinearConvergence
            } else {
                TcgStopReason::MaxIterations
            },
            step_norm_sq_precon: T::zero(),
        });
    }

    let mut z = objective.precondition(y, &r)?;
    let mut z_r = objective.inner_product(y, &z, &r);
    let mut delta = -&z;

    let mut e_pe = T::zero();
    let mut e_pd = T::zero();
    let mut d_pd = z_r;

    for j in 0..config.max_iterations {
        let h_delta = objective.hessian_vector_product(y, egrad, &delta)?;
        *hessian_products += 1;

        let d_hd = objective.inner_product(y, &delta, &h_delta);
        if !<T as Float>::is_finite(d_hd) {
            return Err(ManifoldError::numerical_error(
                "non-finite curvature in truncated CG",
            ));
        }

        let alpha = z_r / d_hd;
        let e_pe_new = e_pe + two * alpha * e_pd + alpha * alpha * d_pd;

        if d_hd <= T::zero() || e_pe_new >= radius_sq {
            // Move to the boundary along delta
            let tau = (-e_pd
                + <T as Float>::sqrt(e_pd * e_pd + d_pd * (radius_sq - e_pe)))
                / d_pd;
            eta += &delta * tau;
            h_eta += &h_delta * tau;

            return Ok(TcgResult {
                step: eta,
                hessian_step: h_eta,
                iterations: j + 1,
                stop_reason: if d_hd <= T::zero() {
                    TcgStopReason::NegativeCurvature
                } else {
                    TcgStopReason::ExceededTrustRegion
                },
                step_norm_sq_precon: radius_sq,
            });
        }

        e_pe = e_pe_new;
        eta += &delta * alpha;
        h_eta += &h_delta * alpha;
        r += &h_delta * alpha;

        let norm_r = <T as Float>::sqrt(objective.inner_product(y, &r, &r));
        if norm_r <= target {
            return Ok(TcgResult {
                step: eta,
                hessian_step: h_eta,
                iterations: j + 1,
                stop_reason: if linear_target < superlinear_target {
                    TcgStopReason::LinearConvergence
                } else {
                    TcgStopReason::SuperlinearConvergence
                },
                step_norm_sq_precon: e_pe,
            });
        }

        z = objective.precondition(y, &r)?;
        let z_r_old = z_r;
        z_r = objective.inner_product(y, &z, &r);
        let beta = z_r / z_r_old;

        delta = &delta * beta - &z;
        e_pd = beta * (e_pd + alpha * d_pd);
        d_pd = z_r + beta * beta * d_pd;
    }

    Ok(TcgResult {
        step: eta,
        hessian_step: h_eta,
        iterations: config.max_iterations,
        stop_reason: TcgStopReason::MaxIterations,
        step_norm_sq_precon: e_pe,
    })
}
