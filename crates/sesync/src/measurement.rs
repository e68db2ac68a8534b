//! Relative-pose measurements and validation of measurement graphs.

use nalgebra::{DMatrix, DVector};
use num_traits::Float;
use sesync_core::{
    error::{OptimizerError, OptimizerResult},
    types::Scalar,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Noisy measurement of the pose of node `j` expressed in the frame of node
/// `i`, with rotational (`kappa`) and translational (`tau`) precisions.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RelativePoseMeasurement<T: Scalar> {
    /// Source node.
    pub i: usize,
    /// Target node.
    pub j: usize,
    /// Relative rotation `R_ij` (d x d).
    pub r: DMatrix<T>,
    /// Relative translation `t_ij` (length d).
    pub t: DVector<T>,
    /// Rotational measurement precision.
    pub kappa: T,
    /// Translational measurement precision.
    pub tau: T,
}

impl<T: Scalar> RelativePoseMeasurement<T> {
    /// Creates a measurement.
    pub fn new(i: usize, j: usize, r: DMatrix<T>, t: DVector<T>, kappa: T, tau: T) -> Self {
        Self {
            i,
            j,
            r,
            t,
            kappa,
            tau,
        }
    }

    /// Dimension `d` of the measured pose.
    pub fn dim(&self) -> usize {
        self.t.len()
    }
}

/// Size of a validated measurement graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphSize {
    /// Pose dimension.
    pub dim: usize,
    /// Number of poses.
    pub num_poses: usize,
    /// Number of measurements.
    pub num_measurements: usize,
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}

/// Checks that `measurements` describe a well-posed synchronization problem.
///
/// The poses must be 2D or 3D, every rotation must be a proper rotation,
/// precisions must be positive and finite, and the measurement graph over
/// the nodes `0..n` must be connected.
pub fn validate_measurements<T: Scalar>(
    measurements: &[RelativePoseMeasurement<T>],
) -> OptimizerResult<GraphSize> {
    let first = measurements
        .first()
        .ok_or_else(|| OptimizerError::invalid_problem("no measurements supplied"))?;
    let d = first.dim();
    if d != 2 && d != 3 {
        return Err(OptimizerError::invalid_problem(format!(
            "poses must be 2D or 3D, got dimension {d}"
        )));
    }

    let tol = <T as Scalar>::from_f64(1e-5);
    let identity = DMatrix::<T>::identity(d, d);
    let mut num_poses = 0;
    for (k, m) in measurements.iter().enumerate() {
        if m.i == m.j {
            return Err(OptimizerError::invalid_problem(format!(
                "measurement {k} is a self-loop on node {}",
                m.i
            )));
        }
        if m.t.len() != d || m.r.nrows() != d || m.r.ncols() != d {
            return Err(OptimizerError::invalid_problem(format!(
                "measurement {k} does not have dimension {d}"
            )));
        }
        if !(m.kappa > T::zero() && m.tau > T::zero())
            || !<T as Float>::is_finite(m.kappa)
            || !<T as Float>::is_finite(m.tau)
        {
            return Err(OptimizerError::invalid_problem(format!(
                "measurement {k} has non-positive or non-finite precision"
            )));
        }
        if m.t.iter().any(|v| !<T as Float>::is_finite(*v))
            || (m.r.transpose() * &m.r - &identity).norm() > tol
            || m.r.determinant() <= T::zero()
        {
            return Err(OptimizerError::invalid_problem(format!(
                "measurement {k} does not contain a proper rotation and a finite translation"
            )));
        }
        num_poses = num_poses.max(m.i + 1).max(m.j + 1);
    }

    let mut parent: Vec<usize> = (0..num_poses).collect();
    for m in measurements {
        let a = find(&mut parent, m.i);
        let b = find(&mut parent, m.j);
        if a != b {
            parent[a] = b;
        }
    }
    let root = find(&mut parent, 0);
    if (1..num_poses).any(|v| find(&mut parent, v) != root) {
        return Err(OptimizerError::invalid_problem(
            "measurement graph is not connected",
        ));
    }

    Ok(GraphSize {
        dim: d,
        num_poses,
        num_measurements: measurements.len(),
    })
}
