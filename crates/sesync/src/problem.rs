//! The special Euclidean synchronization problem.
//!
//! A [`SESyncProblem`] owns the sparse data matrices assembled from a set of
//! relative-pose measurements and exposes the rank-restricted objective
//!
//! ```text
//! F(Y) = tr(Y Q Y^T)          (simplified, Y in St(d, r)^n)
//! F(Y) = tr(Y M Y^T)          (explicit, Y in R^{r x n} x St(d, r)^n)
//! ```
//!
//! together with everything the Riemannian Staircase needs to verify and
//! post-process a critical point: the certificate matrix, the Lagrange
//! multipliers, chordal initialization and rounding.
//!
//! Here `M` is the full data matrix over `[t_1 .. t_n | R_1 .. R_n]`,
//!
//! ```text
//! M = [ A Omega A^T       A Omega T~             ]
//!     [ T~^T Omega A^T    L(G~rho) + T~^T Omega T~ ]
//! ```
//!
//! and `Q = L(G~rho) + T~^T Omega^1/2 Pi Omega^1/2 T~` is the Schur complement
//! of its translational block, with `Pi` the orthogonal projector onto the
//! kernel of the reduced weighted incidence matrix `A~ Omega^1/2`.
//!
//! The relaxation rank is never stored: every operation reads it from the
//! row count of the iterate it receives.

use nalgebra::DMatrix;
use num_traits::Float;
use sesync_core::{
    error::{ManifoldError, OptimizerError, OptimizerResult, Result},
    objective::RiemannianObjective,
    sparse::{CooMatrix, CsrMatrix},
    types::{frobenius_inner, symmetric_part, Scalar},
};
use sesync_manifolds::{project_to_rotation, LiftedSEManifold, MatrixManifold};
use sesync_optim::{Preconditioner as _, SparseCholesky};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub use sesync_manifolds::Formulation;

use crate::measurement::{validate_measurements, RelativePoseMeasurement};

/// Factorization used to apply the orthogonal projection onto the kernel of
/// the reduced weighted incidence matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ProjectionFactorization {
    /// Sparse `L D L^T` of the reduced translational Laplacian.
    #[default]
    Cholesky,
    /// Dense thin QR of the reduced weighted incidence matrix.
    Qr,
}

/// Preconditioning strategy of the trust-region solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Preconditioner {
    /// No preconditioning.
    None,
    /// Inverse of the block-diagonal part of the data matrix.
    Jacobi,
    /// Factorization of the data matrix plus a small multiple of the
    /// identity bounding its condition number.
    #[default]
    RegularizedCholesky,
}

/// Problem operations required by the Riemannian Staircase.
///
/// Every operation takes the relaxation rank from the shape of the iterate
/// `Y` (`r x N`), so a single problem value serves every level.
pub trait SynchronizationProblem<T: Scalar>: RiemannianObjective<T> {
    /// Pose dimension `d`.
    fn dimension(&self) -> usize;

    /// Number of poses `n`.
    fn num_poses(&self) -> usize;

    /// Formulation of the rank-restricted problem.
    fn formulation(&self) -> Formulation;

    /// Search space at rank `rank`.
    fn manifold(&self, rank: usize) -> Result<LiftedSEManifold> {
        LiftedSEManifold::new(self.formulation(), self.dimension(), rank, self.num_poses())
    }

    /// Symmetric certificate matrix `S(Y) = M - Lambda(Y)` of dimension
    /// `n + d n`.
    fn certificate_matrix(&self, y: &DMatrix<T>) -> Result<CsrMatrix<T>>;

    /// Block-diagonal Lagrange multiplier `Lambda(Y)` (`d n x d n`).
    fn lagrange_multiplier(&self, y: &DMatrix<T>) -> Result<CsrMatrix<T>>;

    /// Chordal initialization at rank `d`.
    fn chordal_initialization(&self) -> Result<DMatrix<T>>;

    /// Rounds `Y` to a pose estimate `[t | R]` in SE(d)^n (`d x (n + d n)`).
    fn round_solution(&self, y: &DMatrix<T>) -> Result<DMatrix<T>>;

    /// Objective of a pose estimate `[t | R]` under the original cost.
    fn evaluate_pose_estimate(&self, xhat: &DMatrix<T>) -> Result<T>;
}

/// Solver for systems in the reduced translational Laplacian
/// `A~ Omega A~^T = B^T B`, with `B = Omega^1/2 A~^T`.
#[derive(Debug, Clone)]
enum ReducedSolver<T: Scalar> {
    Cholesky(SparseCholesky<T>),
    Qr { q: DMatrix<T>, r: DMatrix<T> },
}

/// Tangent-space preconditioner of the trust-region solver.
#[derive(Debug, Clone)]
enum TntPreconditioner<T: Scalar> {
    Identity,
    Jacobi {
        translation: Vec<T>,
        rotation: Vec<DMatrix<T>>,
    },
    Cholesky(SparseCholesky<T>),
}

/// Data matrices and factorizations of an SE(d) synchronization problem.
#[derive(Debug, Clone)]
pub struct SESyncProblem<T: Scalar> {
    formulation: Formulation,
    dim: usize,
    num_poses: usize,
    num_measurements: usize,
    /// Full data matrix `M` over translations and rotations.
    data_matrix: CsrMatrix<T>,
    /// Connection Laplacian `L(G~rho)`.
    rotation_laplacian: CsrMatrix<T>,
    /// `Omega^1/2 T~` (m x dn).
    weighted_translations: CsrMatrix<T>,
    weighted_translations_t: CsrMatrix<T>,
    /// `Omega^1/2 A~^T` (m x (n - 1)), last node anchored.
    weighted_incidence: CsrMatrix<T>,
    weighted_incidence_t: CsrMatrix<T>,
    reduced_solver: ReducedSolver<T>,
    preconditioner: Preconditioner,
    projection_factorization: ProjectionFactorization,
    tnt_preconditioner: TntPreconditioner<T>,
}

impl<T: Scalar> SESyncProblem<T> {
    /// Assembles the problem from relative-pose measurements.
    ///
    /// # Errors
    ///
    /// Returns `InvalidProblem` for malformed measurement sets,
    /// `InvalidConfiguration` for a condition-number bound below one, and a
    /// numerical error if a required factorization fails.
    pub fn new(
        measurements: &[RelativePoseMeasurement<T>],
        formulation: Formulation,
        projection_factorization: ProjectionFactorization,
        preconditioner: Preconditioner,
        reg_chol_max_condition_number: T,
    ) -> OptimizerResult<Self> {
        let size = validate_measurements(measurements)?;
        if !(reg_chol_max_condition_number >= T::one())
            || !<T as Float>::is_finite(reg_chol_max_condition_number)
        {
            return Err(OptimizerError::invalid_configuration(
                "must be a finite value of at least 1",
                "reg_Cholesky_precon_max_condition_number",
                reg_chol_max_condition_number.to_string(),
            ));
        }

        let d = size.dim;
        let n = size.num_poses;
        let m = size.num_measurements;
        let dn = d * n;
        let anchor = n - 1;

        let mut data = CooMatrix::new(n + dn, n + dn);
        let mut laplacian = CooMatrix::new(dn, dn);
        let mut translations = CooMatrix::new(m, dn);
        let mut incidence = CooMatrix::new(m, n - 1);
        let mut reduced_laplacian = CooMatrix::new(n - 1, n - 1);

        for (e, meas) in measurements.iter().enumerate() {
            let (i, j) = (meas.i, meas.j);
            let (kappa, tau) = (meas.kappa, meas.tau);
            let sqrt_tau = <T as Float>::sqrt(tau);

            let diagonal = DMatrix::<T>::identity(d, d) * kappa;
            let off_diagonal = &meas.r * (-kappa);
            laplacian.push_block(d * i, d * i, &diagonal)?;
            laplacian.push_block(d * j, d * j, &diagonal)?;
            laplacian.push_block(d * i, d * j, &off_diagonal)?;
            laplacian.push_block(d * j, d * i, &off_diagonal.transpose())?;

            for k in 0..d {
                translations.push(e, d * i + k, -(sqrt_tau * meas.t[k]))?;
            }
            for (node, sign) in [(i, -sqrt_tau), (j, sqrt_tau)] {
                if node != anchor {
                    incidence.push(e, node, sign)?;
                }
            }
            for (a, b, v) in [(i, i, tau), (j, j, tau), (i, j, -tau), (j, i, -tau)] {
                if a != anchor && b != anchor {
                    reduced_laplacian.push(a, b, v)?;
                }
                data.push(a, b, v)?;
            }

            for k in 0..d {
                let v = tau * meas.t[k];
                let col = n + d * i + k;
                data.push(i, col, v)?;
                data.push(col, i, v)?;
                data.push(j, col, -v)?;
                data.push(col, j, -v)?;
            }
            let outer = &meas.t * meas.t.transpose() * tau;
            data.push_block(n + d * i, n + d * i, &outer)?;
        }

        let rotation_laplacian = laplacian.to_csr();
        for row in 0..dn {
            for (col, v) in rotation_laplacian.row(row) {
                data.push(n + row, n + col, v)?;
            }
        }
        let data_matrix = data.to_csr();
        let weighted_translations = translations.to_csr();
        let weighted_translations_t = weighted_translations.transpose();
        let weighted_incidence = incidence.to_csr();
        let weighted_incidence_t = weighted_incidence.transpose();

        let reduced_solver = match projection_factorization {
            ProjectionFactorization::Cholesky => ReducedSolver::Cholesky(SparseCholesky::factor(
                &reduced_laplacian.to_csr(),
                "reduced translational Laplacian",
            )?),
            ProjectionFactorization::Qr => {
                let qr = weighted_incidence.to_dense().qr();
                ReducedSolver::Qr {
                    q: qr.q(),
                    r: qr.r(),
                }
            }
        };

        let (base, offset) = match formulation {
            Formulation::Simplified => (&rotation_laplacian, 0),
            Formulation::Explicit => (&data_matrix, n),
        };
        let tnt_preconditioner = match preconditioner {
            Preconditioner::None => TntPreconditioner::Identity,
            Preconditioner::Jacobi => {
                let translation = (0..offset)
                    .map(|k| T::one() / base.get(k, k))
                    .collect();
                let rotation = (0..n)
                    .map(|i| {
                        let start = offset + d * i;
                        DMatrix::from_fn(d, d, |a, b| base.get(start + a, start + b))
                            .try_inverse()
                            .ok_or_else(|| {
                                ManifoldError::numerical_error(format!(
                                    "singular diagonal block for pose {i}"
                                ))
                            })
                    })
                    .collect::<Result<Vec<_>>>()?;
                TntPreconditioner::Jacobi {
                    translation,
                    rotation,
                }
            }
            Preconditioner::RegularizedCholesky => {
                let lambda = base.max_abs_row_sum() / reg_chol_max_condition_number;
                let regularized = base.add_identity(lambda)?;
                TntPreconditioner::Cholesky(SparseCholesky::factor(
                    &regularized,
                    "regularized preconditioning matrix",
                )?)
            }
        };

        Ok(Self {
            formulation,
            dim: d,
            num_poses: n,
            num_measurements: m,
            data_matrix,
            rotation_laplacian,
            weighted_translations,
            weighted_translations_t,
            weighted_incidence,
            weighted_incidence_t,
            reduced_solver,
            preconditioner,
            projection_factorization,
            tnt_preconditioner,
        })
    }

    /// Number of measurements.
    pub fn num_measurements(&self) -> usize {
        self.num_measurements
    }

    /// Full data matrix `M`.
    pub fn data_matrix(&self) -> &CsrMatrix<T> {
        &self.data_matrix
    }

    /// Connection Laplacian `L(G~rho)`.
    pub fn rotation_laplacian(&self) -> &CsrMatrix<T> {
        &self.rotation_laplacian
    }

    /// Preconditioning strategy.
    pub fn preconditioner(&self) -> Preconditioner {
        self.preconditioner
    }

    /// Factorization applying the orthogonal projection.
    pub fn projection_factorization(&self) -> ProjectionFactorization {
        self.projection_factorization
    }

    fn level(&self, y: &DMatrix<T>) -> Result<LiftedSEManifold> {
        LiftedSEManifold::new(self.formulation, self.dim, y.nrows(), self.num_poses)
    }

    /// `(A~ Omega A~^T)^-1 A~ Omega^1/2 z` for `z` with one row per measurement.
    fn reduced_solve(&self, z: &DMatrix<T>) -> Result<DMatrix<T>> {
        match &self.reduced_solver {
            ReducedSolver::Cholesky(chol) => chol.apply(&self.weighted_incidence_t.mul_dense(z)?),
            ReducedSolver::Qr { q, r } => {
                if z.nrows() != q.nrows() {
                    return Err(ManifoldError::dimension_mismatch(q.nrows(), z.nrows()));
                }
                r.solve_upper_triangular(&(q.transpose() * z))
                    .ok_or_else(|| ManifoldError::numerical_error("singular triangular factor"))
            }
        }
    }

    /// Orthogonal projection `Pi w` onto the kernel of `A~ Omega^1/2`.
    fn project_translational(&self, w: &DMatrix<T>) -> Result<DMatrix<T>> {
        let x = self.reduced_solve(w)?;
        Ok(w - self.weighted_incidence.mul_dense(&x)?)
    }

    /// Right product with the data matrix: `Y Q` (simplified) or `Y M`
    /// (explicit).
    pub fn data_matrix_product(&self, y: &DMatrix<T>) -> Result<DMatrix<T>> {
        let yt = y.transpose();
        let product = match self.formulation {
            Formulation::Simplified => {
                let mut out = self.rotation_laplacian.mul_dense(&yt)?;
                let w = self.weighted_translations.mul_dense(&yt)?;
                let projected = self.project_translational(&w)?;
                out += self.weighted_translations_t.mul_dense(&projected)?;
                out
            }
            Formulation::Explicit => self.data_matrix.mul_dense(&yt)?,
        };
        Ok(product.transpose())
    }

    /// Symmetric multiplier blocks `sym(Y_i^T (Y Q)_i)`.
    fn lambda_blocks(&self, y: &DMatrix<T>) -> Result<Vec<DMatrix<T>>> {
        let manifold = self.level(y)?;
        let product = self.data_matrix_product(y)?;
        let offset = manifold.translation_columns();
        let d = self.dim;
        Ok((0..self.num_poses)
            .map(|i| {
                let cols = offset + d * i;
                symmetric_part(&(y.columns(cols, d).transpose() * product.columns(cols, d)))
            })
            .collect())
    }

    /// Optimal translations for fixed rotations `R` (`d x d n`), with the
    /// last translation pinned to zero.
    pub fn recover_translations(&self, rotations: &DMatrix<T>) -> Result<DMatrix<T>> {
        let z = self.weighted_translations.mul_dense(&rotations.transpose())?;
        let x = self.reduced_solve(&z)?;
        let mut t = DMatrix::zeros(rotations.nrows(), self.num_poses);
        t.columns_mut(0, self.num_poses - 1).copy_from(&(-x.transpose()));
        Ok(t)
    }

    fn chordal_rotations(&self) -> Result<DMatrix<T>> {
        let d = self.dim;
        let dn = d * self.num_poses;
        let rest = dn - d;

        // Anchor R_1 = I and solve the remaining normal equations
        let mut anchored = CooMatrix::new(rest, rest);
        let mut coupling = DMatrix::zeros(rest, d);
        for row in d..dn {
            for (col, v) in self.rotation_laplacian.row(row) {
                if col >= d {
                    anchored.push(row - d, col - d, v)?;
                } else {
                    coupling[(row - d, col)] = v;
                }
            }
        }
        let factor = SparseCholesky::factor(&anchored.to_csr(), "anchored connection Laplacian")?;
        let solved = factor.apply(&coupling)?;

        let mut rotations = DMatrix::zeros(d, dn);
        rotations.columns_mut(0, d).fill_with_identity();
        for i in 1..self.num_poses {
            let block = -solved.rows(d * (i - 1), d).transpose();
            rotations
                .columns_mut(d * i, d)
                .copy_from(&project_to_rotation(&block)?);
        }
        Ok(rotations)
    }
}

impl<T: Scalar> RiemannianObjective<T> for SESyncProblem<T> {
    fn cost(&self, y: &DMatrix<T>) -> Result<T> {
        let product = self.data_matrix_product(y)?;
        Ok(frobenius_inner(y, &product))
    }

    fn euclidean_gradient(&self, y: &DMatrix<T>) -> Result<DMatrix<T>> {
        Ok(self.data_matrix_product(y)? * <T as Scalar>::from_f64(2.0))
    }

    fn riemannian_gradient(&self, y: &DMatrix<T>, egrad: &DMatrix<T>) -> Result<DMatrix<T>> {
        self.project_tangent(y, egrad)
    }

    fn hessian_vector_product(
        &self,
        y: &DMatrix<T>,
        egrad: &DMatrix<T>,
        ydot: &DMatrix<T>,
    ) -> Result<DMatrix<T>> {
        let manifold = self.level(y)?;
        let correction = manifold.sym_block_diag_product(ydot, y, egrad)?;
        let ambient = self.data_matrix_product(ydot)? * <T as Scalar>::from_f64(2.0) - correction;
        self.project_tangent(y, &ambient)
    }

    fn precondition(&self, y: &DMatrix<T>, v: &DMatrix<T>) -> Result<DMatrix<T>> {
        let z = match &self.tnt_preconditioner {
            TntPreconditioner::Identity => return Ok(v.clone()),
            TntPreconditioner::Jacobi {
                translation,
                rotation,
            } => {
                let d = self.dim;
                let mut z = v.clone();
                for (k, w) in translation.iter().enumerate() {
                    z.column_mut(k).scale_mut(*w);
                }
                let offset = translation.len();
                for (i, block) in rotation.iter().enumerate() {
                    let cols = offset + d * i;
                    let scaled = v.columns(cols, d) * block;
                    z.columns_mut(cols, d).copy_from(&scaled);
                }
                z
            }
            TntPreconditioner::Cholesky(chol) => chol.apply(&v.transpose())?.transpose(),
        };
        self.project_tangent(y, &z)
    }

    fn project_tangent(&self, y: &DMatrix<T>, v: &DMatrix<T>) -> Result<DMatrix<T>> {
        let manifold = self.level(y)?;
        let mut out = DMatrix::zeros(y.nrows(), y.ncols());
        manifold.project_tangent(y, v, &mut out)?;
        Ok(out)
    }

    fn retract(&self, y: &DMatrix<T>, v: &DMatrix<T>) -> Result<DMatrix<T>> {
        let manifold = self.level(y)?;
        let mut out = DMatrix::zeros(y.nrows(), y.ncols());
        manifold.retract(y, v, &mut out)?;
        Ok(out)
    }
}

impl<T: Scalar> SynchronizationProblem<T> for SESyncProblem<T> {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn num_poses(&self) -> usize {
        self.num_poses
    }

    fn formulation(&self) -> Formulation {
        self.formulation
    }

    fn certificate_matrix(&self, y: &DMatrix<T>) -> Result<CsrMatrix<T>> {
        let n = self.num_poses;
        let d = self.dim;
        let mut lambda = CooMatrix::new(n + d * n, n + d * n);
        for (i, block) in self.lambda_blocks(y)?.iter().enumerate() {
            lambda.push_block(n + d * i, n + d * i, block)?;
        }
        self.data_matrix.add_scaled(&lambda.to_csr(), -T::one())
    }

    fn lagrange_multiplier(&self, y: &DMatrix<T>) -> Result<CsrMatrix<T>> {
        let d = self.dim;
        let mut lambda = CooMatrix::new(d * self.num_poses, d * self.num_poses);
        for (i, block) in self.lambda_blocks(y)?.iter().enumerate() {
            lambda.push_block(d * i, d * i, block)?;
        }
        Ok(lambda.to_csr())
    }

    fn chordal_initialization(&self) -> Result<DMatrix<T>> {
        let rotations = self.chordal_rotations()?;
        match self.formulation {
            Formulation::Simplified => Ok(rotations),
            Formulation::Explicit => {
                let translations = self.recover_translations(&rotations)?;
                let n = self.num_poses;
                let mut y = DMatrix::zeros(self.dim, n + rotations.ncols());
                y.columns_mut(0, n).copy_from(&translations);
                y.columns_mut(n, rotations.ncols()).copy_from(&rotations);
                Ok(y)
            }
        }
    }

    fn round_solution(&self, y: &DMatrix<T>) -> Result<DMatrix<T>> {
        let manifold = self.level(y)?;
        if y.ncols() != MatrixManifold::<T>::ncols(&manifold) {
            return Err(ManifoldError::dimension_mismatch(
                MatrixManifold::<T>::ncols(&manifold),
                y.ncols(),
            ));
        }
        let d = self.dim;
        let n = self.num_poses;
        let dn = d * n;

        let svd = manifold.rotation_part(y).svd(false, true);
        let v_t = svd
            .v_t
            .ok_or_else(|| ManifoldError::numerical_error("SVD failed to produce V^T"))?;
        let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
        order.sort_by(|&a, &b| {
            svd.singular_values[b]
                .partial_cmp(&svd.singular_values[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if order.len() < d {
            return Err(ManifoldError::numerical_error(
                "iterate has fewer than d singular values",
            ));
        }

        let mut rotations = DMatrix::zeros(d, dn);
        for (row, &k) in order.iter().take(d).enumerate() {
            rotations
                .row_mut(row)
                .copy_from(&(v_t.row(k) * svd.singular_values[k]));
        }

        let positive = (0..n)
            .filter(|&i| rotations.columns(d * i, d).into_owned().determinant() > T::zero())
            .count();
        if positive < n - positive {
            rotations.row_mut(d - 1).neg_mut();
        }
        for i in 0..n {
            let projected = project_to_rotation(&rotations.columns(d * i, d).into_owned())?;
            rotations.columns_mut(d * i, d).copy_from(&projected);
        }

        let translations = self.recover_translations(&rotations)?;
        let mut xhat = DMatrix::zeros(d, n + dn);
        xhat.columns_mut(0, n).copy_from(&translations);
        xhat.columns_mut(n, dn).copy_from(&rotations);
        Ok(xhat)
    }

    fn evaluate_pose_estimate(&self, xhat: &DMatrix<T>) -> Result<T> {
        let product = self.data_matrix.left_mul_dense(xhat)?;
        Ok(frobenius_inner(xhat, &product))
    }
}
