//! Verification of second-order critical points.
//!
//! A critical point `Y` of the rank-restricted problem is globally optimal
//! for the semidefinite relaxation iff `S(Y) = M - Lambda(Y)` is positive
//! semidefinite. The minimum eigenpair of `S` decides this; a negative one
//! yields a descent direction at the next rank.

use nalgebra::{DMatrix, DVector};
use sesync_core::{error::Result, types::Scalar};
use sesync_optim::{lobpcg_min_eigenpair, IldlConfig, IncompleteLdl, LobpcgConfig};

use crate::problem::SynchronizationProblem;

/// Outcome of certifying one critical point.
#[derive(Debug, Clone)]
pub enum Certificate<T: Scalar> {
    /// Converged with `lambda_min(S) >= -tolerance`.
    GlobalOpt {
        /// Minimum eigenvalue estimate.
        theta: T,
    },
    /// The eigensolver did not converge within its budget.
    EigImprecision {
        /// Best Ritz value.
        theta: T,
    },
    /// Negative curvature direction of `S`.
    Escape {
        /// Eigenvalue, below `-tolerance`.
        theta: T,
        /// Unit eigenvector of length `n + d n`.
        direction: DVector<T>,
    },
}

/// Result of [`certify`].
#[derive(Debug, Clone)]
pub struct Verification<T: Scalar> {
    /// Classification of the critical point.
    pub certificate: Certificate<T>,
    /// LOBPCG iterations spent.
    pub iterations: usize,
}

/// Computes the minimum eigenpair of `S(Y)` and classifies `Y`.
///
/// The eigensolver is preconditioned by an incomplete `L D L^T` of `S` and
/// seeded with the rank of `Y`, so runs are reproducible.
pub fn certify<T, P>(
    problem: &P,
    y: &DMatrix<T>,
    lobpcg: &LobpcgConfig<T>,
    ildl: &IldlConfig<T>,
) -> Result<Verification<T>>
where
    T: Scalar,
    P: SynchronizationProblem<T> + ?Sized,
{
    let s = problem.certificate_matrix(y)?;
    let preconditioner = IncompleteLdl::factor(&s, ildl)?;
    let eig = lobpcg_min_eigenpair(&s, &preconditioner, lobpcg, y.nrows() as u64)?;

    let theta = eig.eigenvalue;
    // An unconverged Ritz value only bounds lambda_min(S) from above
    let certificate = if !eig.converged {
        Certificate::EigImprecision { theta }
    } else if theta >= -lobpcg.tolerance {
        Certificate::GlobalOpt { theta }
    } else {
        Certificate::Escape {
            theta,
            direction: eig.eigenvector,
        }
    };
    log::debug!(
        "certificate: lambda_min = {:.6e}, residual {:.3e} after {} LOBPCG iterations",
        Scalar::to_f64(theta),
        Scalar::to_f64(eig.residual),
        eig.iterations
    );

    Ok(Verification {
        certificate,
        iterations: eig.iterations,
    })
}
