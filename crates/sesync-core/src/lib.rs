//! Core traits and types for SE-Sync.
//!
//! This crate provides the foundations shared by the rest of the workspace:
//! the scalar abstraction, error types, the sparse matrices used for the
//! synchronization data, and the objective interface consumed by the
//! second-order solvers.
//!
//! # Modules
//!
//! - [`error`]: Error types for manifold, linear-algebra and configuration failures
//! - [`objective`]: Riemannian objective interface and derivative checks
//! - [`sparse`]: CSR/COO sparse matrices
//! - [`types`]: Scalar trait, type aliases and numerical constants

pub mod error;
pub mod objective;
pub mod sparse;
pub mod types;

// Re-export commonly used items at the crate root
pub use error::{ManifoldError, OptimizerError, OptimizerResult, Result};
pub use objective::{DerivativeChecker, RiemannianObjective};
pub use sparse::{CooMatrix, CsrMatrix};
pub use types::{DMatrix, DVector, Scalar};

/// Prelude module for convenient imports.
///
/// # Example
/// ```
/// use sesync_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{ManifoldError, OptimizerError, OptimizerResult, Result};
    pub use crate::objective::{DerivativeChecker, RiemannianObjective};
    pub use crate::sparse::{CooMatrix, CsrMatrix};
    pub use crate::types::{frobenius_inner, symmetric_part, DMatrix, DVector, Scalar};
}
