//! Outcome of a Riemannian Staircase run.

use nalgebra::DMatrix;
use sesync_core::{sparse::CsrMatrix, types::Scalar};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Why the staircase stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SESyncStatus {
    /// The certificate matrix is numerically positive semidefinite: the
    /// rounded estimate comes with a global optimality guarantee.
    GlobalOpt,
    /// A negative eigenvalue was found but no descent step out of the
    /// saddle could be taken.
    SaddlePoint,
    /// The eigensolver ran out of iterations before resolving the minimum
    /// eigenvalue, so neither optimality nor a descent direction is
    /// established.
    EigImprecision,
    /// The next level would exceed `rmax`.
    MaxRank,
    /// The time budget was exhausted.
    ElapsedTime,
}

impl SESyncStatus {
    /// Whether the run ended with a verified global optimum.
    pub fn is_certified(self) -> bool {
        self == Self::GlobalOpt
    }
}

/// Traces, estimates and certificates of a staircase run.
///
/// Trace vectors hold one entry per staircase level visited by the trust
/// region solver, in order. `escape_direction_curvatures`,
/// `lobpcg_iters` and `verification_times` hold one entry per level whose
/// certificate was computed.
#[derive(Debug, Clone)]
pub struct SESyncResult<T: Scalar> {
    /// Critical point of the last level (or the initial iterate if the run
    /// stopped before optimizing).
    pub yopt: DMatrix<T>,
    /// Objective value `F(Yopt)`, a lower bound on the global optimum when
    /// the run is certified.
    pub sdp_val: T,
    /// Riemannian gradient norm at `Yopt`.
    pub gradnorm: T,
    /// Lagrange multiplier `Lambda(Yopt)`.
    pub lambda: CsrMatrix<T>,
    /// `tr(Lambda)`.
    pub tr_lambda: T,
    /// `SDPval - tr(Lambda)`.
    pub duality_gap: T,
    /// Rounded pose estimate `[t | R]` in SE(d)^n.
    pub xhat: DMatrix<T>,
    /// Objective of the rounded estimate.
    pub fxhat: T,
    /// `Fxhat - tr(Lambda)`.
    pub suboptimality_bound: T,
    /// Wall-clock time of the whole run, in seconds.
    pub total_computation_time: f64,
    /// Time spent building the initial iterate, in seconds.
    pub initialization_time: f64,
    /// Objective values, per level.
    pub function_values: Vec<Vec<T>>,
    /// Riemannian gradient norms, per level.
    pub gradient_norms: Vec<Vec<T>>,
    /// Preconditioned gradient norms, per level.
    pub preconditioned_gradient_norms: Vec<Vec<T>>,
    /// Cumulative Hessian-vector products, per level.
    pub hessian_vector_products: Vec<Vec<usize>>,
    /// Elapsed optimization times in seconds, per level.
    pub elapsed_optimization_times: Vec<Vec<f64>>,
    /// Curvature of the escape direction found at each uncertified level.
    pub escape_direction_curvatures: Vec<T>,
    /// LOBPCG iterations, per certification.
    pub lobpcg_iters: Vec<usize>,
    /// Certification time in seconds, per certification.
    pub verification_times: Vec<f64>,
    /// Recorded iterates, per level (empty unless `log_iterates` is set).
    pub iterates: Vec<Vec<DMatrix<T>>>,
    /// Relaxation ranks visited.
    pub ranks: Vec<usize>,
    /// Termination status.
    pub status: SESyncStatus,
}

impl<T: Scalar> SESyncResult<T> {
    /// Rank of the last level.
    pub fn final_rank(&self) -> usize {
        self.yopt.nrows()
    }

    /// Total number of trust-region iterations over every level.
    pub fn total_iterations(&self) -> usize {
        self.function_values
            .iter()
            .map(|level| level.len().saturating_sub(1))
            .sum()
    }
}
