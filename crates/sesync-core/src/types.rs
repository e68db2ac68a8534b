//! Type definitions and aliases for SE-Sync.
//!
//! This module provides the scalar trait shared by every crate of the
//! workspace, the dense matrix aliases used for iterates, and a handful of
//! numerical constants.

use nalgebra::{Dyn, OMatrix, OVector, RealField, Scalar as NalgebraScalar};
use num_traits::{Float, FromPrimitive};
use std::fmt::{Debug, Display};

/// Trait for scalar types used in synchronization (f32 or f64).
///
/// This trait combines all the numeric traits required by the manifold
/// operations, the trust-region solver and the eigensolver.
pub trait Scalar:
    NalgebraScalar
    + RealField
    + Float
    + FromPrimitive
    + Display
    + Debug
    + Default
    + Copy
    + Send
    + Sync
    + 'static
{
    /// Machine epsilon for this scalar type.
    const EPSILON: Self;

    /// Tolerance for checking if a point is on the manifold.
    const MANIFOLD_TOLERANCE: Self;

    /// Smallest pivot magnitude accepted by the factorizations, relative to
    /// the largest diagonal entry of the factored matrix.
    const PIVOT_TOLERANCE: Self;

    /// Convert from f64 (for constants).
    ///
    /// # Panics
    ///
    /// Panics if the conversion fails. Use `try_from_f64` for a non-panicking version.
    fn from_f64(v: f64) -> Self {
        <Self as FromPrimitive>::from_f64(v).expect("Failed to convert from f64")
    }

    /// Try to convert from f64.
    fn try_from_f64(v: f64) -> Option<Self> {
        <Self as FromPrimitive>::from_f64(v)
    }

    /// Convert to f64 (for logging and timing arithmetic).
    ///
    /// # Panics
    ///
    /// Panics if the conversion fails.
    fn to_f64(self) -> f64 {
        num_traits::cast(self).expect("Failed to convert to f64")
    }

    /// Convert from usize (for iteration counts and dimensions).
    ///
    /// # Panics
    ///
    /// Panics if the conversion fails.
    fn from_usize(v: usize) -> Self {
        <Self as FromPrimitive>::from_usize(v).expect("Failed to convert from usize")
    }
}

impl Scalar for f32 {
    const EPSILON: Self = f32::EPSILON;
    const MANIFOLD_TOLERANCE: Self = 1e-4;
    const PIVOT_TOLERANCE: Self = 1e-6;
}

impl Scalar for f64 {
    const EPSILON: Self = f64::EPSILON;
    const MANIFOLD_TOLERANCE: Self = 1e-8;
    const PIVOT_TOLERANCE: Self = 1e-12;
}

/// Type alias for a dynamically-sized matrix.
pub type DMatrix<T> = OMatrix<T, Dyn, Dyn>;

/// Type alias for a dynamically-sized vector.
pub type DVector<T> = OVector<T, Dyn>;

/// Numerical constants for different precision levels.
pub mod constants {
    use super::Scalar;

    /// Get machine epsilon for the given scalar type.
    pub fn epsilon<T: Scalar>() -> T {
        T::EPSILON
    }

    /// Get manifold membership tolerance.
    pub fn manifold_tolerance<T: Scalar>() -> T {
        T::MANIFOLD_TOLERANCE
    }

    /// Get the relative pivot tolerance.
    pub fn pivot_tolerance<T: Scalar>() -> T {
        T::PIVOT_TOLERANCE
    }
}

/// Frobenius inner product `tr(A^T B)` of two equally-shaped matrices.
pub fn frobenius_inner<T: Scalar>(a: &DMatrix<T>, b: &DMatrix<T>) -> T {
    a.iter()
        .zip(b.iter())
        .fold(T::zero(), |acc, (x, y)| acc + *x * *y)
}

/// Symmetric part `(A + A^T) / 2` of a square matrix.
pub fn symmetric_part<T: Scalar>(a: &DMatrix<T>) -> DMatrix<T> {
    (a + a.transpose()) * <T as Scalar>::from_f64(0.5)
}
