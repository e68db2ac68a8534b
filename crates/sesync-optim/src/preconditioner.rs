//! Preconditioners for the block eigensolver.
//!
//! A preconditioner approximates the inverse of the operator whose extreme
//! eigenpairs are sought and is applied to blocks of vectors stored as the
//! columns of a dense matrix.

use sesync_core::{error::Result, types::{DMatrix, Scalar}};
use std::fmt::Debug;

/// Preconditioner trait for block residual transformations.
pub trait Preconditioner<T: Scalar>: Debug {
    /// Applies the preconditioner to every column of `block`.
    fn apply(&self, block: &DMatrix<T>) -> Result<DMatrix<T>>;

    /// Returns the name of this preconditioner.
    fn name(&self) -> &str {
        "Generic Preconditioner"
    }
}

/// Identity preconditioner (no preconditioning).
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPreconditioner;

impl<T: Scalar> Preconditioner<T> for IdentityPreconditioner {
    fn apply(&self, block: &DMatrix<T>) -> Result<DMatrix<T>> {
        Ok(block.clone())
    }

    fn name(&self) -> &str {
        "Identity"
    }
}
