//! Observers for the truncated-Newton trust-region iteration.
//!
//! A monitor is called once per outer iteration with an immutable snapshot
//! of the solver state. It can record or log but cannot influence the run.

use sesync_core::types::{DMatrix, Scalar};
use std::time::Duration;

use crate::tcg::TcgStopReason;

/// Snapshot of one outer trust-region iteration.
#[derive(Debug, Clone, Copy)]
pub struct TntIterationInfo<'a, T: Scalar> {
    /// Outer iteration index (starting at 1).
    pub iteration: usize,
    /// Time elapsed since the solver started.
    pub elapsed: Duration,
    /// Iterate after the accept/reject decision.
    pub point: &'a DMatrix<T>,
    /// Objective value at `point`.
    pub value: T,
    /// Riemannian gradient norm at `point`.
    pub gradient_norm: T,
    /// Preconditioned gradient norm at `point`.
    pub preconditioned_gradient_norm: T,
    /// Trust-region radius after the update.
    pub trust_radius: T,
    /// Norm of the trial step.
    pub step_norm: T,
    /// Ratio of actual to predicted decrease.
    pub rho: T,
    /// Whether the trial step was accepted.
    pub accepted: bool,
    /// Inner CG iterations spent on this subproblem.
    pub tcg_iterations: usize,
    /// Why the inner CG iteration stopped.
    pub tcg_stop_reason: TcgStopReason,
    /// Cumulative Hessian-vector products.
    pub hessian_vector_products: usize,
}

/// Observer of the trust-region iteration.
pub trait TntMonitor<T: Scalar> {
    /// Called after every outer iteration.
    fn on_iteration(&mut self, info: &TntIterationInfo<'_, T>);
}

impl<T, F> TntMonitor<T> for F
where
    T: Scalar,
    F: FnMut(&TntIterationInfo<'_, T>),
{
    fn on_iteration(&mut self, info: &TntIterationInfo<'_, T>) {
        self(info);
    }
}

/// Monitor that logs every iteration at `debug` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMonitor;

impl<T: Scalar> TntMonitor<T> for LoggingMonitor {
    fn on_iteration(&mut self, info: &TntIterationInfo<'_, T>) {
        log::debug!(
            "TNT iter {:4}  f = {:.6e}  |grad| = {:.3e}  |Pgrad| = {:.3e}  step = {:.3e}  rho = {:.3}  Delta = {:.3e}  tCG {:?} ({})  {}",
            info.iteration,
            Scalar::to_f64(info.value),
            Scalar::to_f64(info.gradient_norm),
            Scalar::to_f64(info.preconditioned_gradient_norm),
            Scalar::to_f64(info.step_norm),
            Scalar::to_f64(info.rho),
            Scalar::to_f64(info.trust_radius),
            info.tcg_stop_reason,
            info.tcg_iterations,
            if info.accepted { "accepted" } else { "rejected" },
        );
    }
}
