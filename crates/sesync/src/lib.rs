//! # SE-Sync
//!
//! Certifiably correct synchronization over the special Euclidean group.
//!
//! Given noisy relative-pose measurements between `n` poses in SE(d), this
//! crate computes a maximum-likelihood pose estimate by solving the convex
//! semidefinite relaxation of the problem with the Riemannian Staircase,
//! and certifies global optimality whenever the relaxation is exact.
//!
//! ## Overview
//!
//! - [`SESyncProblem`] assembles the sparse data matrices from a set of
//!   [`RelativePoseMeasurement`]s.
//! - [`sesync`] runs the staircase: trust-region optimization at every rank,
//!   certification with LOBPCG, and saddle escape to the next rank.
//! - [`SESyncResult`] carries the rounded estimate, the optimality
//!   certificate, bounds and per-level traces.
//!
//! ## Quick Start
//!
//! ```rust
//! use nalgebra::{DMatrix, DVector};
//! use sesync::prelude::*;
//!
//! // Two poses one unit apart along x
//! let measurements = vec![RelativePoseMeasurement::new(
//!     0,
//!     1,
//!     DMatrix::<f64>::identity(2, 2),
//!     DVector::from_vec(vec![1.0, 0.0]),
//!     1.0,
//!     1.0,
//! )];
//!
//! let options = SESyncOpts::new().with_rank_range(3, 5);
//! let result = sesync_from_measurements(&measurements, &options, None).unwrap();
//! assert_eq!(result.status, SESyncStatus::GlobalOpt);
//! assert!(result.fxhat < 1e-8);
//! ```
//!
//! ## Features
//!
//! - `parallel` (default): row-parallel sparse products with `rayon`
//! - `serde`: serialization of measurements, options and status types

pub mod certify;
pub mod escape;
pub mod initialization;
pub mod measurement;
pub mod options;
pub mod problem;
pub mod result;
pub mod staircase;

pub use certify::{certify, Certificate, Verification};
pub use escape::escape_saddle;
pub use initialization::{initial_iterate, lift_to_rank, random_initialization, Initialization};
pub use measurement::{validate_measurements, GraphSize, RelativePoseMeasurement};
pub use options::SESyncOpts;
pub use problem::{
    Formulation, Preconditioner, ProjectionFactorization, SESyncProblem, SynchronizationProblem,
};
pub use result::{SESyncResult, SESyncStatus};
pub use staircase::{sesync, sesync_from_measurements, sesync_with_monitor};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        sesync, sesync_from_measurements, sesync_with_monitor, Formulation, Initialization,
        Preconditioner, ProjectionFactorization, RelativePoseMeasurement, SESyncOpts,
        SESyncProblem, SESyncResult, SESyncStatus, SynchronizationProblem,
    };
    pub use sesync_core::prelude::*;
    pub use sesync_optim::{TntIterationInfo, TntMonitor};
}
