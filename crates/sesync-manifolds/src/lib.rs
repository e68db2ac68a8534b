//! Manifolds for SE-Sync.
//!
//! This crate provides the search spaces of the Riemannian Staircase: the
//! product of Stiefel manifolds St(d, r)^n and its lift with explicit
//! translations, all operating directly on dense matrix representations.

pub mod lifted;
pub mod matrix_manifold;
pub mod stiefel_product;

pub use lifted::{Formulation, LiftedSEManifold};
pub use matrix_manifold::{gaussian_matrix, MatrixManifold};
pub use stiefel_product::{polar_factor, project_to_rotation, StiefelProduct};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::lifted::{Formulation, LiftedSEManifold};
    pub use crate::matrix_manifold::MatrixManifold;
    pub use crate::stiefel_product::StiefelProduct;
}
