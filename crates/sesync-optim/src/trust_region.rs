//! Riemannian truncated-Newton trust-region optimizer (TNT).
//!
//! At each outer iteration the method evaluates the objective, its
//! Riemannian gradient and preconditioned gradient, approximately solves the
//! trust-region subproblem with [`truncated_cg`], and accepts or rejects the
//! retracted trial point according to the ratio of actual to predicted
//! decrease.
//!
//! # Radius update
//!
//! - accept iff `rho >= acceptance_ratio` and the trial value is finite
//! - on rejection: `Delta <- shrink_factor * Delta`
//! - on acceptance with `rho > expansion_ratio` and a boundary step:
//!   `Delta <- min(expansion_factor * Delta, max_radius)`
//!
//! # References
//!
//! - Absil et al., "Trust-Region Methods on Riemannian Manifolds" (2007)
//! - Rosen et al., "SE-Sync: A certifiably correct algorithm for
//!   synchronization over the special Euclidean group" (2019)

use num_traits::Float;
use sesync_core::{
    error::{ManifoldError, OptimizerError, OptimizerResult, Result},
    objective::RiemannianObjective,
    types::{DMatrix, Scalar},
};
use std::time::{Duration, Instant};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    monitor::{TntIterationInfo, TntMonitor},
    tcg::{truncated_cg, TcgConfig},
};

/// Configuration for the truncated-Newton trust-region optimizer.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TntConfig<T: Scalar> {
    /// Stop when the Riemannian gradient norm falls below this value
    pub grad_norm_tol: T,
    /// Stop when the preconditioned gradient norm falls below this value
    pub preconditioned_grad_norm_tol: T,
    /// Stop when the relative decrease of an accepted step falls below this value
    pub rel_func_decrease_tol: T,
    /// Stop when the norm of an accepted step falls below this value
    pub stepsize_tol: T,
    /// Maximum number of outer iterations
    pub max_iterations: usize,
    /// Time budget for the whole run
    pub max_computation_time: Duration,
    /// Truncated CG parameters
    pub tcg: TcgConfig<T>,
    /// Initial trust-region radius (preconditioned norm)
    pub initial_radius: T,
    /// Maximum trust-region radius
    pub max_radius: T,
    /// Ratio threshold for accepting a step
    pub acceptance_ratio: T,
    /// Ratio threshold above which a boundary step expands the region
    pub expansion_ratio: T,
    /// Factor for shrinking the radius after a rejected step
    pub shrink_factor: T,
    /// Factor for expanding the radius
    pub expansion_factor: T,
    /// Record every accepted iterate in the result
    pub log_iterates: bool,
}

impl<T: Scalar> Default for TntConfig<T> {
    fn default() -> Self {
        Self {
            grad_norm_tol: <T as Scalar>::from_f64(1e-2),
            preconditioned_grad_norm_tol: <T as Scalar>::from_f64(1e-4),
            rel_func_decrease_tol: <T as Scalar>::from_f64(1e-6),
            stepsize_tol: <T as Scalar>::from_f64(1e-3),
            max_iterations: 1000,
            max_computation_time: Duration::from_secs(1800),
            tcg: TcgConfig::default(),
            initial_radius: T::one(),
            max_radius: <T as Scalar>::from_f64(1e15),
            acceptance_ratio: <T as Scalar>::from_f64(0.05),
            expansion_ratio: <T as Scalar>::from_f64(0.9),
            shrink_factor: <T as Scalar>::from_f64(0.25),
            expansion_factor: <T as Scalar>::from_f64(2.5),
            log_iterates: false,
        }
    }
}

impl<T: Scalar> TntConfig<T> {
    /// Creates a new configuration with default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the gradient norm tolerance.
    pub fn with_grad_norm_tol(mut self, tol: T) -> Self {
        self.grad_norm_tol = tol;
        self
    }

    /// Sets the preconditioned gradient norm tolerance.
    pub fn with_preconditioned_grad_norm_tol(mut self, tol: T) -> Self {
        self.preconditioned_grad_norm_tol = tol;
        self
    }

    /// Sets the relative function decrease tolerance.
    pub fn with_rel_func_decrease_tol(mut self, tol: T) -> Self {
        self.rel_func_decrease_tol = tol;
        self
    }

    /// Sets the step size tolerance.
    pub fn with_stepsize_tol(mut self, tol: T) -> Self {
        self.stepsize_tol = tol;
        self
    }

    /// Sets the maximum number of outer iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the time budget.
    pub fn with_max_computation_time(mut self, budget: Duration) -> Self {
        self.max_computation_time = budget;
        self
    }

    /// Sets the truncated CG parameters.
    pub fn with_tcg(mut self, tcg: TcgConfig<T>) -> Self {
        self.tcg = tcg;
        self
    }

    /// Sets the initial trust-region radius.
    pub fn with_initial_radius(mut self, radius: T) -> Self {
        self.initial_radius = radius;
        self
    }

    /// Records every accepted iterate.
    pub fn with_log_iterates(mut self, log_iterates: bool) -> Self {
        self.log_iterates = log_iterates;
        self
    }

    /// Checks the parameters for consistency.
    pub fn validate(&self) -> OptimizerResult<()> {
        let positive = [
            ("grad_norm_tol", self.grad_norm_tol),
            ("preconditioned_grad_norm_tol", self.preconditioned_grad_norm_tol),
            ("rel_func_decrease_tol", self.rel_func_decrease_tol),
            ("stepsize_tol", self.stepsize_tol),
            ("initial_radius", self.initial_radius),
        ];
        for (parameter, value) in positive {
            if !(value > T::zero()) {
                return Err(OptimizerError::invalid_configuration(
                    "must be positive",
                    parameter,
                    value.to_string(),
                ));
            }
        }
        let kappa = self.tcg.kappa;
        if !(kappa > T::zero() && kappa < T::one()) {
            return Err(OptimizerError::invalid_configuration(
                "must lie in (0, 1)",
                "STPCG_kappa",
                kappa.to_string(),
            ));
        }
        if !(self.tcg.theta > T::zero()) {
            return Err(OptimizerError::invalid_configuration(
                "must be positive",
                "STPCG_theta",
                self.tcg.theta.to_string(),
            ));
        }
        if !(self.acceptance_ratio > T::zero()
            && self.acceptance_ratio < self.expansion_ratio
            && self.expansion_ratio < T::one())
        {
            return Err(OptimizerError::invalid_configuration(
                "requires 0 < acceptance_ratio < expansion_ratio < 1",
                "acceptance_ratio",
                self.acceptance_ratio.to_string(),
            ));
        }
        if !(self.shrink_factor > T::zero() && self.shrink_factor < T::one()) {
            return Err(OptimizerError::invalid_configuration(
                "must lie in (0, 1)",
                "shrink_factor",
                self.shrink_factor.to_string(),
            ));
        }
        if !(self.expansion_factor > T::one()) {
            return Err(OptimizerError::invalid_configuration(
                "must exceed 1",
                "expansion_factor",
                self.expansion_factor.to_string(),
            ));
        }
        Ok(())
    }
}

/// Reason the outer iteration stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TntTermination {
    /// Riemannian gradient norm below tolerance.
    Gradient,
    /// Preconditioned gradient norm below tolerance.
    PreconditionedGradient,
    /// Relative decrease of the last accepted step below tolerance.
    RelativeDecrease,
    /// Norm of the last accepted step below tolerance.
    Stepsize,
    /// Outer iteration budget exhausted.
    MaxIterations,
    /// Time budget exhausted.
    ElapsedTime,
}

/// Result of a trust-region run, with per-iteration traces.
///
/// Trace entry `k` describes the iterate at the start of outer iteration
/// `k`. A run stopped by the time budget before its first iteration has
/// empty traces.
#[derive(Debug, Clone)]
pub struct TntResult<T: Scalar> {
    /// Final iterate.
    pub point: DMatrix<T>,
    /// Objective value at `point`.
    pub value: T,
    /// Riemannian gradient norm at `point`.
    pub gradient_norm: T,
    /// Preconditioned gradient norm at `point`.
    pub preconditioned_gradient_norm: T,
    /// Number of outer iterations (subproblem solves).
    pub iterations: usize,
    /// Why the run stopped.
    pub termination: TntTermination,
    /// Objective values.
    pub objective_values: Vec<T>,
    /// Riemannian gradient norms.
    pub gradient_norms: Vec<T>,
    /// Preconditioned gradient norms.
    pub preconditioned_gradient_norms: Vec<T>,
    /// Cumulative Hessian-vector products.
    pub hessian_vector_products: Vec<usize>,
    /// Elapsed seconds.
    pub elapsed_times: Vec<f64>,
    /// Iterates (only when `log_iterates` is set).
    pub iterates: Vec<DMatrix<T>>,
    /// Total run time.
    pub elapsed: Duration,
}

/// First and second-order information at the current iterate.
struct Evaluation<T: Scalar> {
    value: T,
    egrad: DMatrix<T>,
    grad: DMatrix<T>,
    grad_norm: T,
    precon_grad_norm: T,
}

impl<T: Scalar> Evaluation<T> {
    fn at<O>(objective: &O, y: &DMatrix<T>, value: T) -> Result<Self>
    where
        O: RiemannianObjective<T> + ?Sized,
    {
        let egrad = objective.euclidean_gradient(y)?;
        let grad = objective.riemannian_gradient(y, &egrad)?;
        let grad_norm = <T as Float>::sqrt(objective.inner_product(y, &grad, &grad));
        let precon_grad = objective.precondition(y, &grad)?;
        let precon_grad_norm =
            <T as Float>::sqrt(objective.inner_product(y, &precon_grad, &precon_grad));
        Ok(Self {
            value,
            egrad,
            grad,
            grad_norm,
            precon_grad_norm,
        })
    }
}

/// Riemannian truncated-Newton trust-region optimizer.
#[derive(Debug, Clone)]
pub struct TrustRegionNewton<T: Scalar> {
    config: TntConfig<T>,
}

impl<T: Scalar> TrustRegionNewton<T> {
    /// Creates a new optimizer with the given configuration.
    pub fn new(config: TntConfig<T>) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &TntConfig<T> {
        &self.config
    }

    /// Returns the optimizer name.
    pub fn name(&self) -> &str {
        "Riemannian Truncated-Newton Trust Region"
    }

    /// New radius after a trial step.
    fn update_radius(&self, radius: T, rho: T, accepted: bool, hit_boundary: bool) -> T {
        if !accepted {
            radius * self.config.shrink_factor
        } else if rho > self.config.expansion_ratio && hit_boundary {
            <T as Float>::min(radius * self.config.expansion_factor, self.config.max_radius)
        } else {
            radius
        }
    }

    /// Minimizes `objective` starting from `initial_point`.
    ///
    /// The `monitor`, if any, is called after every outer iteration.
    pub fn optimize<O>(
        &self,
        objective: &O,
        initial_point: &DMatrix<T>,
        mut monitor: Option<&mut dyn TntMonitor<T>>,
    ) -> Result<TntResult<T>>
    where
        O: RiemannianObjective<T> + ?Sized,
    {
        let start = Instant::now();
        let config = &self.config;

        let mut point = initial_point.clone();
        let mut result = TntResult {
            point: initial_point.clone(),
            value: T::nan(),
            gradient_norm: T::nan(),
            preconditioned_gradient_norm: T::nan(),
            iterations: 0,
            termination: TntTermination::ElapsedTime,
            objective_values: Vec::new(),
            gradient_norms: Vec::new(),
            preconditioned_gradient_norms: Vec::new(),
            hessian_vector_products: Vec::new(),
            elapsed_times: Vec::new(),
            iterates: Vec::new(),
            elapsed: Duration::ZERO,
        };

        if start.elapsed() >= config.max_computation_time {
            result.elapsed = start.elapsed();
            return Ok(result);
        }

        let value = objective.cost(&point)?;
        if !<T as Float>::is_finite(value) {
            return Err(ManifoldError::numerical_error(
                "objective is not finite at the initial point",
            ));
        }
        let mut eval = Evaluation::at(objective, &point, value)?;

        let mut radius = config.initial_radius;
        let mut hessian_products = 0usize;
        let mut iteration = 0usize;
        // (relative decrease, step norm) of the most recent accepted step
        let mut last_accepted: Option<(T, T)> = None;

        let termination = loop {
            let elapsed = start.elapsed();
            if elapsed >= config.max_computation_time {
                break TntTermination::ElapsedTime;
            }

            result.objective_values.push(eval.value);
            result.gradient_norms.push(eval.grad_norm);
            result.preconditioned_gradient_norms.push(eval.precon_grad_norm);
            result.hessian_vector_products.push(hessian_products);
            result.elapsed_times.push(elapsed.as_secs_f64());
            if config.log_iterates {
                result.iterates.push(point.clone());
            }

            if eval.grad_norm <= config.grad_norm_tol {
                break TntTermination::Gradient;
            }
            if eval.precon_grad_norm <= config.preconditioned_grad_norm_tol {
                break TntTermination::PreconditionedGradient;
            }
            if let Some((rel_decrease, step_norm)) = last_accepted.take() {
                if rel_decrease <= config.rel_func_decrease_tol {
                    break TntTermination::RelativeDecrease;
                }
                if step_norm <= config.stepsize_tol {
                    break TntTermination::Stepsize;
                }
            }
            if iteration >= config.max_iterations {
                break TntTermination::MaxIterations;
            }

            // Subsolve
            let tcg = truncated_cg(
                objective,
                &point,
                &eval.egrad,
                &eval.grad,
                radius,
                &config.tcg,
                &mut hessian_products,
            )?;
            let step_norm =
                <T as Float>::sqrt(objective.inner_product(&point, &tcg.step, &tcg.step));

            // AcceptOrReject
            let trial_point = objective.retract(&point, &tcg.step)?;
            let trial_value = objective.cost(&trial_point)?;

            let predicted = -(objective.inner_product(&point, &eval.grad, &tcg.step)
                + <T as Scalar>::from_f64(0.5)
                    * objective.inner_product(&point, &tcg.step, &tcg.hessian_step));
            let actual = eval.value - trial_value;
            let regularization = <T as Float>::max(T::one(), <T as Float>::abs(eval.value))
                * T::epsilon()
                * <T as Scalar>::from_f64(1e3);
            let rho = (actual + regularization) / (predicted + regularization);

            let accepted = <T as Float>::is_finite(trial_value)
                && trial_value <= eval.value
                && rho >= config.acceptance_ratio;
            radius = self.update_radius(radius, rho, accepted, tcg.hit_boundary());
            iteration += 1;

            if accepted {
                let denominator = <T as Float>::max(<T as Float>::abs(eval.value), T::epsilon());
                last_accepted = Some((actual / denominator, step_norm));
                point = trial_point;
                eval = Evaluation::at(objective, &point, trial_value)?;
            }

            if let Some(monitor) = monitor.as_mut() {
                monitor.on_iteration(&TntIterationInfo {
                    iteration,
                    elapsed: start.elapsed(),
                    point: &point,
                    value: eval.value,
                    gradient_norm: eval.grad_norm,
                    preconditioned_gradient_norm: eval.precon_grad_norm,
                    trust_radius: radius,
                    step_norm,
                    rho,
                    accepted,
                    tcg_iterations: tcg.iterations,
                    tcg_stop_reason: tcg.stop_reason,
                    hessian_vector_products: hessian_products,
                });
            }
        };

        log::debug!(
            "TNT stopped after {} iterations ({:?}): f = {:.6e}, |grad| = {:.3e}",
            iteration,
            termination,
            Scalar::to_f64(eval.value),
            Scalar::to_f64(eval.grad_norm),
        );

        result.point = point;
        result.value = eval.value;
        result.gradient_norm = eval.grad_norm;
        result.preconditioned_gradient_norm = eval.precon_grad_norm;
        result.iterations = iteration;
        result.termination = termination;
        result.elapsed = start.elapsed();
        Ok(result)
    }
}
