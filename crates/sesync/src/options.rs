//! Configuration of the Riemannian Staircase.

use std::time::Duration;

use num_traits::Float;
use sesync_core::{
    error::{OptimizerError, OptimizerResult},
    types::Scalar,
};
use sesync_optim::{IldlConfig, LobpcgConfig, TcgConfig, TntConfig};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    initialization::Initialization,
    problem::{Formulation, Preconditioner, ProjectionFactorization},
};

/// Options of an SE-Sync run.
///
/// # Example
///
/// ```rust
/// use sesync::{Formulation, SESyncOpts};
///
/// let options = SESyncOpts::<f64>::new()
///     .with_formulation(Formulation::Explicit)
///     .with_rank_range(4, 8)
///     .with_max_computation_time(30.0);
/// assert!(options.validate(3).is_ok());
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SESyncOpts<T: Scalar> {
    /// Stopping tolerance on the Riemannian gradient norm.
    pub grad_norm_tol: T,
    /// Stopping tolerance on the preconditioned gradient norm.
    pub preconditioned_grad_norm_tol: T,
    /// Stopping tolerance on the relative decrease of an accepted step.
    pub rel_func_decrease_tol: T,
    /// Stopping tolerance on the norm of an accepted step.
    pub stepsize_tol: T,
    /// Outer iteration budget of every trust-region run.
    pub max_iterations: usize,
    /// Inner iteration budget of every tCG solve.
    pub max_tcg_iterations: usize,
    /// Wall-clock budget of the whole run, in seconds.
    pub max_computation_time: f64,
    /// Linear convergence target of tCG.
    pub stpcg_kappa: T,
    /// Superlinear convergence exponent of tCG.
    pub stpcg_theta: T,
    /// Initial relaxation rank.
    pub r0: usize,
    /// Largest relaxation rank.
    pub rmax: usize,
    /// Numerical tolerance on the minimum eigenvalue of the certificate.
    pub min_eig_num_tol: T,
    /// LOBPCG block size.
    pub lobpcg_block_size: usize,
    /// Fill factor of the incomplete `L D L^T` preconditioner.
    pub lobpcg_max_fill_factor: T,
    /// Drop tolerance of the incomplete `L D L^T` preconditioner.
    pub lobpcg_drop_tol: T,
    /// LOBPCG iteration budget.
    pub lobpcg_max_iterations: usize,
    /// Condition-number bound of the regularized Cholesky preconditioner.
    pub reg_cholesky_precon_max_condition_number: T,
    /// Worker threads of the staircase thread pool.
    pub num_threads: usize,
    /// Problem formulation.
    pub formulation: Formulation,
    /// Initialization used when no `Y0` is supplied.
    pub initialization: Initialization,
    /// Trust-region preconditioner.
    pub preconditioner: Preconditioner,
    /// Factorization applying the translational projection.
    pub projection_factorization: ProjectionFactorization,
    /// Log per-level summaries at `info` instead of `debug`.
    pub verbose: bool,
    /// Record every accepted iterate.
    pub log_iterates: bool,
}

impl<T: Scalar> Default for SESyncOpts<T> {
    fn default() -> Self {
        Self {
            grad_norm_tol: <T as Scalar>::from_f64(1e-2),
            preconditioned_grad_norm_tol: <T as Scalar>::from_f64(1e-4),
            rel_func_decrease_tol: <T as Scalar>::from_f64(1e-6),
            stepsize_tol: <T as Scalar>::from_f64(1e-3),
            max_iterations: 1000,
            max_tcg_iterations: 10_000,
            max_computation_time: 1800.0,
            stpcg_kappa: <T as Scalar>::from_f64(0.1),
            stpcg_theta: <T as Scalar>::from_f64(0.5),
            r0: 5,
            rmax: 10,
            min_eig_num_tol: <T as Scalar>::from_f64(1e-3),
            lobpcg_block_size: 4,
            lobpcg_max_fill_factor: <T as Scalar>::from_f64(3.0),
            lobpcg_drop_tol: <T as Scalar>::from_f64(1e-3),
            lobpcg_max_iterations: 100,
            reg_cholesky_precon_max_condition_number: <T as Scalar>::from_f64(1e6),
            num_threads: 1,
            formulation: Formulation::default(),
            initialization: Initialization::default(),
            preconditioner: Preconditioner::default(),
            projection_factorization: ProjectionFactorization::default(),
            verbose: false,
            log_iterates: false,
        }
    }
}

impl<T: Scalar> SESyncOpts<T> {
    /// Creates the default options.
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

    /// Sets the trust-region iteration budget.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the tCG iteration budget.
    pub fn with_max_tcg_iterations(mut self, max_iterations: usize) -> Self {
        self.max_tcg_iterations = max_iterations;
        self
    }

    /// Sets the time budget in seconds.
    pub fn with_max_computation_time(mut self, seconds: f64) -> Self {
        self.max_computation_time = seconds;
        self
    }

    /// Sets the tCG truncation parameters.
    pub fn with_stpcg(mut self, kappa: T, theta: T) -> Self {
        self.stpcg_kappa = kappa;
        self.stpcg_theta = theta;
        self
    }

    /// Sets the initial and largest relaxation ranks.
    pub fn with_rank_range(mut self, r0: usize, rmax: usize) -> Self {
        self.r0 = r0;
        self.rmax = rmax;
        self
    }

    /// Sets the minimum eigenvalue tolerance.
    pub fn with_min_eig_num_tol(mut self, tol: T) -> Self {
        self.min_eig_num_tol = tol;
        self
    }

    /// Sets the LOBPCG block size.
    pub fn with_lobpcg_block_size(mut self, block_size: usize) -> Self {
        self.lobpcg_block_size = block_size;
        self
    }

    /// Sets the LOBPCG iteration budget.
    pub fn with_lobpcg_max_iterations(mut self, max_iterations: usize) -> Self {
        self.lobpcg_max_iterations = max_iterations;
        self
    }

    /// Sets the sparsity controls of the LOBPCG preconditioner.
    pub fn with_lobpcg_preconditioner(mut self, max_fill_factor: T, drop_tol: T) -> Self {
        self.lobpcg_max_fill_factor = max_fill_factor;
        self.lobpcg_drop_tol = drop_tol;
        self
    }

    /// Sets the condition-number bound of the regularized Cholesky
    /// preconditioner.
    pub fn with_reg_cholesky_precon_max_condition_number(mut self, bound: T) -> Self {
        self.reg_cholesky_precon_max_condition_number = bound;
        self
    }

    /// Sets the number of worker threads.
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Sets the formulation.
    pub fn with_formulation(mut self, formulation: Formulation) -> Self {
        self.formulation = formulation;
        self
    }

    /// Sets the initialization.
    pub fn with_initialization(mut self, initialization: Initialization) -> Self {
        self.initialization = initialization;
        self
    }

    /// Sets the trust-region preconditioner.
    pub fn with_preconditioner(mut self, preconditioner: Preconditioner) -> Self {
        self.preconditioner = preconditioner;
        self
    }

    /// Sets the projection factorization.
    pub fn with_projection_factorization(mut self, factorization: ProjectionFactorization) -> Self {
        self.projection_factorization = factorization;
        self
    }

    /// Enables per-level summaries at `info` level.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Enables recording of every iterate.
    pub fn with_log_iterates(mut self, log_iterates: bool) -> Self {
        self.log_iterates = log_iterates;
        self
    }

    /// Checks the options for a problem with poses of dimension `d`.
    pub fn validate(&self, d: usize) -> OptimizerResult<()> {
        if !self.max_computation_time.is_finite() || self.max_computation_time < 0.0 {
            return Err(OptimizerError::invalid_configuration(
                "must be finite and non-negative",
                "max_computation_time",
                self.max_computation_time.to_string(),
            ));
        }
        self.tnt_config(Duration::ZERO).validate()?;

        if self.r0 < d + 1 {
            return Err(OptimizerError::invalid_configuration(
                format!("must be at least d + 1 = {}", d + 1),
                "r0",
                self.r0.to_string(),
            ));
        }
        if self.rmax < self.r0 {
            return Err(OptimizerError::invalid_configuration(
                format!("must be at least r0 = {}", self.r0),
                "rmax",
                self.rmax.to_string(),
            ));
        }

        let positive = [
            ("min_eig_num_tol", self.min_eig_num_tol),
            ("LOBPCG_max_fill_factor", self.lobpcg_max_fill_factor),
            (
                "reg_Cholesky_precon_max_condition_number",
                self.reg_cholesky_precon_max_condition_number,
            ),
        ];
        for (parameter, value) in positive {
            if !(value > T::zero()) || !<T as Float>::is_finite(value) {
                return Err(OptimizerError::invalid_configuration(
                    "must be positive and finite",
                    parameter,
                    value.to_string(),
                ));
            }
        }
        if !(self.lobpcg_drop_tol >= T::zero()) {
            return Err(OptimizerError::invalid_configuration(
                "must be non-negative",
                "LOBPCG_drop_tol",
                self.lobpcg_drop_tol.to_string(),
            ));
        }

        let counts = [
            ("LOBPCG_block_size", self.lobpcg_block_size),
            ("num_threads", self.num_threads),
            ("max_tCG_iterations", self.max_tcg_iterations),
        ];
        for (parameter, value) in counts {
            if value == 0 {
                return Err(OptimizerError::invalid_configuration(
                    "must be positive",
                    parameter,
                    value.to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Trust-region configuration with the remaining time budget.
    pub fn tnt_config(&self, remaining: Duration) -> TntConfig<T> {
        TntConfig::new()
            .with_grad_norm_tol(self.grad_norm_tol)
            .with_preconditioned_grad_norm_tol(self.preconditioned_grad_norm_tol)
            .with_rel_func_decrease_tol(self.rel_func_decrease_tol)
            .with_stepsize_tol(self.stepsize_tol)
            .with_max_iterations(self.max_iterations)
            .with_max_computation_time(remaining)
            .with_tcg(
                TcgConfig::new()
                    .with_kappa(self.stpcg_kappa)
                    .with_theta(self.stpcg_theta)
                    .with_max_iterations(self.max_tcg_iterations),
            )
            .with_log_iterates(self.log_iterates)
    }

    /// Eigensolver configuration.
    pub fn lobpcg_config(&self) -> LobpcgConfig<T> {
        LobpcgConfig::new()
            .with_block_size(self.lobpcg_block_size)
            .with_max_iterations(self.lobpcg_max_iterations)
            .with_tolerance(self.min_eig_num_tol)
    }

    /// Configuration of the eigensolver preconditioner.
    pub fn ildl_config(&self) -> IldlConfig<T> {
        IldlConfig::new()
            .with_max_fill_factor(self.lobpcg_max_fill_factor)
            .with_drop_tol(self.lobpcg_drop_tol)
    }

    /// Time budget as a duration.
    pub fn time_budget(&self) -> Duration {
        Duration::try_from_secs_f64(self.max_computation_time).unwrap_or(Duration::MAX)
    }
}
