//! Initial iterates for the Riemannian Staircase.

use nalgebra::DMatrix;
use rand::{rngs::SmallRng, SeedableRng};
use sesync_core::{
    error::{OptimizerError, OptimizerResult, Result},
    types::Scalar,
};
use sesync_manifolds::MatrixManifold;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::problem::SynchronizationProblem;

/// Seed of the random initialization.
pub const RANDOM_INITIALIZATION_SEED: u64 = 0x5e_5e_5e;

/// How the first staircase level is initialized when no `Y0` is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Initialization {
    /// Chordal relaxation of the rotational subproblem.
    #[default]
    Chordal,
    /// Uniformly random point of the rank-`r0` search space.
    Random,
}

/// Random point on the search space at rank `rank`.
pub fn random_initialization<T, P>(problem: &P, rank: usize, seed: u64) -> Result<DMatrix<T>>
where
    T: Scalar,
    P: SynchronizationProblem<T> + ?Sized,
{
    let mut rng = SmallRng::seed_from_u64(seed);
    problem.manifold(rank)?.random_point(&mut rng)
}

/// Pads `y` with zero rows up to `rank` and projects the result onto the
/// search space.
///
/// # Errors
///
/// Returns `InvalidConfiguration` if `y` has the wrong number of columns,
/// fewer than `d` rows, or more than `rank` rows.
pub fn lift_to_rank<T, P>(problem: &P, y: &DMatrix<T>, rank: usize) -> OptimizerResult<DMatrix<T>>
where
    T: Scalar,
    P: SynchronizationProblem<T> + ?Sized,
{
    let manifold = problem.manifold(rank)?;
    let ncols = MatrixManifold::<T>::ncols(&manifold);
    if y.ncols() != ncols {
        return Err(OptimizerError::invalid_configuration(
            format!("initial iterate must have {ncols} columns"),
            "Y0",
            format!("{} x {}", y.nrows(), y.ncols()),
        ));
    }
    if y.nrows() < problem.dimension() || y.nrows() > rank {
        return Err(OptimizerError::invalid_configuration(
            format!(
                "initial iterate must have between {} and {rank} rows",
                problem.dimension()
            ),
            "Y0",
            format!("{} x {}", y.nrows(), y.ncols()),
        ));
    }
    if y.iter().any(|v| !num_traits::Float::is_finite(*v)) {
        return Err(OptimizerError::invalid_configuration(
            "initial iterate must be finite",
            "Y0",
            format!("{} x {}", y.nrows(), y.ncols()),
        ));
    }

    let mut padded = DMatrix::zeros(rank, ncols);
    padded.rows_mut(0, y.nrows()).copy_from(y);
    let mut lifted = DMatrix::zeros(rank, ncols);
    manifold.project_point(&padded, &mut lifted)?;
    Ok(lifted)
}

/// First iterate of the staircase at rank `rank`.
pub fn initial_iterate<T, P>(
    problem: &P,
    initialization: Initialization,
    y0: Option<&DMatrix<T>>,
    rank: usize,
) -> OptimizerResult<DMatrix<T>>
where
    T: Scalar,
    P: SynchronizationProblem<T> + ?Sized,
{
    match (y0, initialization) {
        (Some(y), _) => lift_to_rank(problem, y, rank),
        (None, Initialization::Chordal) => {
            let chordal = problem.chordal_initialization()?;
            lift_to_rank(problem, &chordal, rank)
        }
        (None, Initialization::Random) => {
            Ok(random_initialization(problem, rank, RANDOM_INITIALIZATION_SEED)?)
        }
    }
}
