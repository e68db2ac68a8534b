//! SE-Sync Optimization - second-order solvers for the rank-restricted
//! synchronization relaxation.
//!
//! This crate provides the numerical engines driven by the Riemannian
//! Staircase: the truncated-Newton trust-region method used at every rank
//! and the LOBPCG eigensolver used to verify candidate critical points.
//!
//! # Available Solvers
//!
//! - **Truncated CG**: Steihaug-Toint preconditioned conjugate gradient for the trust-region subproblem
//! - **TNT**: Riemannian truncated-Newton trust-region method
//! - **LOBPCG**: Block eigensolver for the smallest eigenpair of a sparse symmetric matrix
//! - **Incomplete LDL^T**: Positive-definite preconditioner for LOBPCG
//! - **Sparse Cholesky**: Exact fill-reduced `L D L^T` for positive-definite systems
//!
//! # Examples
//!
//! ```rust
//! use sesync_optim::{TntConfig, TrustRegionNewton, TcgConfig};
//! use std::time::Duration;
//!
//! let optimizer = TrustRegionNewton::new(
//!     TntConfig::<f64>::new()
//!         .with_grad_norm_tol(1e-6)
//!         .with_max_computation_time(Duration::from_secs(60))
//!         .with_tcg(TcgConfig::new().with_kappa(0.1).with_theta(0.5)),
//! );
//! assert!(optimizer.config().validate().is_ok());
//!
//! // Run optimization (objective and initial_point defined elsewhere)
//! // let result = optimizer.optimize(&objective, &initial_point, None)?;
//! ```

pub mod cholesky;
pub mod ildl;
pub mod lobpcg;
pub mod monitor;
pub mod preconditioner;
pub mod tcg;
pub mod trust_region;

// Re-export main solvers for convenience
pub use cholesky::SparseCholesky;
pub use ildl::{IldlConfig, IncompleteLdl};
pub use lobpcg::{lobpcg_min_eigenpair, LobpcgConfig, LobpcgResult};
pub use monitor::{LoggingMonitor, TntIterationInfo, TntMonitor};
pub use preconditioner::{IdentityPreconditioner, Preconditioner};
pub use tcg::{truncated_cg, TcgConfig, TcgResult, TcgStopReason};
pub use trust_region::{TntConfig, TntResult, TntTermination, TrustRegionNewton};
