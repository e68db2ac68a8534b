//! Integration tests for the Riemannian Staircase driver.

mod common;

use approx::assert_relative_eq;
use nalgebra::{DMatrix, DVector};
use pretty_assertions::assert_eq;
use std::time::Duration;
use sesync::{
    escape_saddle, random_initialization, sesync, sesync_from_measurements, sesync_with_monitor,
    Formulation, Initialization, Preconditioner, ProjectionFactorization, SESyncOpts,
    SESyncProblem, SESyncStatus, SynchronizationProblem,
};
use sesync_core::{error::Result, sparse::CsrMatrix, OptimizerError, RiemannianObjective};
use sesync_manifolds::{LiftedSEManifold, MatrixManifold};
use sesync_optim::TntIterationInfo;

/// Constant objective with a fixed diagonal certificate matrix, used to
/// drive the staircase into each terminal state.
#[derive(Debug)]
struct ConstantProblem {
    d: usize,
    n: usize,
    certificate_diagonal: Vec<f64>,
}

impl ConstantProblem {
    /// Certificate `shift * I` over three planar poses.
    fn new(certificate_shift: f64) -> Self {
        Self {
            d: 2,
            n: 3,
            certificate_diagonal: vec![certificate_shift; 9],
        }
    }

    /// Certificate `diag(1 + i / N)` with its last entry replaced by `-1`.
    fn with_hidden_negative_eigenvalue(n: usize) -> Self {
        let dim = 3 * n;
        let mut certificate_diagonal: Vec<f64> =
            (0..dim).map(|i| 1.0 + i as f64 / dim as f64).collect();
        certificate_diagonal[dim - 1] = -1.0;
        Self {
            d: 2,
            n,
            certificate_diagonal,
        }
    }

    fn level(&self, y: &DMatrix<f64>) -> LiftedSEManifold {
        self.manifold(y.nrows()).unwrap()
    }
}

impl RiemannianObjective<f64> for ConstantProblem {
    fn cost(&self, _y: &DMatrix<f64>) -> Result<f64> {
        Ok(0.0)
    }

    fn euclidean_gradient(&self, y: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        Ok(DMatrix::zeros(y.nrows(), y.ncols()))
    }

    fn riemannian_gradient(&self, y: &DMatrix<f64>, egrad: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        self.project_tangent(y, egrad)
    }

    fn hessian_vector_product(
        &self,
        y: &DMatrix<f64>,
        _egrad: &DMatrix<f64>,
        _ydot: &DMatrix<f64>,
    ) -> Result<DMatrix<f64>> {
        Ok(DMatrix::zeros(y.nrows(), y.ncols()))
    }

    fn project_tangent(&self, y: &DMatrix<f64>, v: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        let mut out = DMatrix::zeros(y.nrows(), y.ncols());
        self.level(y).project_tangent(y, v, &mut out)?;
        Ok(out)
    }

    fn retract(&self, y: &DMatrix<f64>, v: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        let mut out = DMatrix::zeros(y.nrows(), y.ncols());
        self.level(y).retract(y, v, &mut out)?;
        Ok(out)
    }
}

impl SynchronizationProblem<f64> for ConstantProblem {
    fn dimension(&self) -> usize {
        self.d
    }

    fn num_poses(&self) -> usize {
        self.n
    }

    fn formulation(&self) -> Formulation {
        Formulation::Simplified
    }

    fn certificate_matrix(&self, _y: &DMatrix<f64>) -> Result<CsrMatrix<f64>> {
        let diagonal = DVector::from_vec(self.certificate_diagonal.clone());
        Ok(CsrMatrix::from_dense(&DMatrix::from_diagonal(&diagonal), 0.0))
    }

    fn lagrange_multiplier(&self, _y: &DMatrix<f64>) -> Result<CsrMatrix<f64>> {
        Ok(CsrMatrix::zeros(self.d * self.n, self.d * self.n))
    }

    fn chordal_initialization(&self) -> Result<DMatrix<f64>> {
        let mut y = DMatrix::zeros(self.d, self.d * self.n);
        for i in 0..self.n {
            y.columns_mut(self.d * i, self.d).fill_with_identity();
        }
        Ok(y)
    }

    fn round_solution(&self, y: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        let mut xhat = DMatrix::zeros(self.d, self.n + self.d * self.n);
        xhat.columns_mut(self.n, self.d * self.n)
            .copy_from(&y.rows(0, self.d));
        Ok(xhat)
    }

    fn evaluate_pose_estimate(&self, _xhat: &DMatrix<f64>) -> Result<f64> {
        Ok(0.0)
    }
}

/// Delegates to an [`SESyncProblem`], sleeping in every Hessian-vector
/// product.
#[derive(Debug)]
struct SlowProblem<'a> {
    inner: &'a SESyncProblem<f64>,
    delay: Duration,
}

impl RiemannianObjective<f64> for SlowProblem<'_> {
    fn cost(&self, y: &DMatrix<f64>) -> Result<f64> {
        self.inner.cost(y)
    }

    fn euclidean_gradient(&self, y: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        self.inner.euclidean_gradient(y)
    }

    fn riemannian_gradient(&self, y: &DMatrix<f64>, egrad: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        self.inner.riemannian_gradient(y, egrad)
    }

    fn hessian_vector_product(
        &self,
        y: &DMatrix<f64>,
        egrad: &DMatrix<f64>,
        ydot: &DMatrix<f64>,
    ) -> Result<DMatrix<f64>> {
        std::thread::sleep(self.delay);
        self.inner.hessian_vector_product(y, egrad, ydot)
    }

    fn precondition(&self, y: &DMatrix<f64>, v: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        self.inner.precondition(y, v)
    }

    fn project_tangent(&self, y: &DMatrix<f64>, v: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        self.inner.project_tangent(y, v)
    }

    fn retract(&self, y: &DMatrix<f64>, v: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        self.inner.retract(y, v)
    }

    fn inner_product(&self, y: &DMatrix<f64>, u: &DMatrix<f64>, v: &DMatrix<f64>) -> f64 {
        self.inner.inner_product(y, u, v)
    }
}

impl SynchronizationProblem<f64> for SlowProblem<'_> {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn num_poses(&self) -> usize {
        self.inner.num_poses()
    }

    fn formulation(&self) -> Formulation {
        self.inner.formulation()
    }

    fn certificate_matrix(&self, y: &DMatrix<f64>) -> Result<CsrMatrix<f64>> {
        self.inner.certificate_matrix(y)
    }

    fn lagrange_multiplier(&self, y: &DMatrix<f64>) -> Result<CsrMatrix<f64>> {
        self.inner.lagrange_multiplier(y)
    }

    fn chordal_initialization(&self) -> Result<DMatrix<f64>> {
        self.inner.chordal_initialization()
    }

    fn round_solution(&self, y: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        self.inner.round_solution(y)
    }

    fn evaluate_pose_estimate(&self, xhat: &DMatrix<f64>) -> Result<f64> {
        self.inner.evaluate_pose_estimate(xhat)
    }
}

fn tight_options() -> SESyncOpts<f64> {
    SESyncOpts::new()
        .with_grad_norm_tol(1e-6)
        .with_preconditioned_grad_norm_tol(1e-8)
        .with_rel_func_decrease_tol(1e-10)
        .with_stepsize_tol(1e-8)
        .with_rank_range(3, 8)
}

#[test]
fn test_noiseless_cycle_is_certified_in_both_formulations() {
    let data = common::noiseless_cycle(4);
    for formulation in [Formulation::Simplified, Formulation::Explicit] {
        let options = SESyncOpts::new()
            .with_formulation(formulation)
            .with_rank_range(3, 6);
        let result = sesync_from_measurements(&data.measurements, &options, None).unwrap();

        assert_eq!(result.status, SESyncStatus::GlobalOpt);
        assert_eq!(result.ranks, vec![3]);
        assert_relative_eq!(result.sdp_val, 0.0, epsilon = 1e-8);
        assert_relative_eq!(result.fxhat, 0.0, epsilon = 1e-8);
        assert!(result.suboptimality_bound.abs() < 1e-6);
        assert_eq!(result.xhat.shape(), (2, 4 + 8));
        assert_eq!(result.lobpcg_iters.len(), 1);
        assert_eq!(result.verification_times.len(), 1);
        assert!(result.escape_direction_curvatures.is_empty());
    }
}

#[test]
fn test_noisy_planar_graph_is_certified() {
    let data = common::cycle_dataset(2, 10, 0.05, 0.05, 42);
    for factorization in [ProjectionFactorization::Cholesky, ProjectionFactorization::Qr] {
        let options = tight_options().with_projection_factorization(factorization);
        let result = sesync_from_measurements(&data.measurements, &options, None).unwrap();

        assert_eq!(result.status, SESyncStatus::GlobalOpt);
        // The relaxation value lower-bounds the rounded estimate
        assert!(result.sdp_val <= result.fxhat + 1e-6);
        assert!(result.suboptimality_bound >= -1e-6);
        assert!(result.duality_gap.abs() < 1e-4 * (1.0 + result.sdp_val.abs()));
        assert_relative_eq!(result.tr_lambda, result.sdp_val - result.duality_gap, epsilon = 1e-9);
        assert!(result.gradnorm < 1e-2);
    }
}

#[test]
fn test_spatial_graph_in_explicit_formulation() {
    let data = common::cycle_dataset(3, 8, 0.02, 0.05, 7);
    let options = tight_options()
        .with_formulation(Formulation::Explicit)
        .with_rank_range(4, 8)
        .with_preconditioner(Preconditioner::Jacobi)
        .with_num_threads(2);
    let result = sesync_from_measurements(&data.measurements, &options, None).unwrap();

    assert_eq!(result.status, SESyncStatus::GlobalOpt);
    for i in 0..8 {
        let r = result.xhat.columns(8 + 3 * i, 3).into_owned();
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-9);
    }
}

#[test]
fn test_zero_time_budget_reports_elapsed_time() {
    let data = common::noiseless_cycle(4);
    let options = SESyncOpts::new().with_max_computation_time(0.0);
    let result = sesync_from_measurements(&data.measurements, &options, None).unwrap();

    assert_eq!(result.status, SESyncStatus::ElapsedTime);
    assert!(result.function_values.is_empty());
    assert!(result.ranks.is_empty());
    assert!(result.lobpcg_iters.is_empty());
    // Post-processing still runs on the initial iterate
    assert_eq!(result.yopt.nrows(), options.r0);
    assert_eq!(result.xhat.shape(), (2, 12));
}

#[test]
fn test_time_budget_exhausted_during_a_level() {
    let data = common::cycle_dataset(2, 10, 0.1, 0.1, 11);
    let problem = SESyncProblem::new(
        &data.measurements,
        Formulation::Simplified,
        ProjectionFactorization::Cholesky,
        Preconditioner::None,
        1e6,
    )
    .unwrap();
    let slow = SlowProblem {
        inner: &problem,
        delay: Duration::from_millis(20),
    };
    let options = tight_options()
        .with_initialization(Initialization::Random)
        .with_max_computation_time(0.1);
    let result = sesync(&slow, &options, None).unwrap();

    assert_eq!(result.status, SESyncStatus::ElapsedTime);
    assert!(result.total_computation_time >= 0.1);
    // The interrupted level is recorded but never certified
    assert!(!result.ranks.is_empty());
    assert_eq!(result.lobpcg_iters.len() + 1, result.ranks.len());
    assert_eq!(result.function_values.len(), result.ranks.len());
    assert!(!result.function_values[0].is_empty());
    assert_eq!(result.yopt.nrows(), *result.ranks.last().unwrap());

    // Post-processing still rounds the interrupted iterate
    assert_eq!(result.xhat.shape(), (2, 30));
    assert!(result.xhat.iter().all(|v| v.is_finite()));
    assert!(result.fxhat.is_finite());
    assert!(result.suboptimality_bound.is_finite());
}

#[test]
fn test_supplied_initial_iterate_is_padded_to_r0() {
    let data = common::cycle_dataset(2, 6, 0.0, 0.0, 0);
    let problem = SESyncProblem::new(
        &data.measurements,
        Formulation::Simplified,
        ProjectionFactorization::Cholesky,
        Preconditioner::RegularizedCholesky,
        1e6,
    )
    .unwrap();
    let options = SESyncOpts::new().with_rank_range(4, 6);
    let result = sesync(&problem, &options, Some(&data.rotation_matrix())).unwrap();

    assert_eq!(result.status, SESyncStatus::GlobalOpt);
    assert_eq!(result.ranks, vec![4]);
    // Gradient test fires on the first iteration
    assert_eq!(result.function_values[0].len(), 1);

    let wrong_shape = DMatrix::zeros(2, 5);
    assert!(matches!(
        sesync(&problem, &options, Some(&wrong_shape)),
        Err(OptimizerError::InvalidConfiguration { .. })
    ));
    let too_tall = DMatrix::zeros(5, 12);
    assert!(matches!(
        sesync(&problem, &options, Some(&too_tall)),
        Err(OptimizerError::InvalidConfiguration { .. })
    ));
}

#[test]
fn test_random_initialization_reaches_certified_optimum() {
    let data = common::noiseless_cycle(6);
    let options = tight_options()
        .with_initialization(Initialization::Random)
        .with_rank_range(3, 10);
    let result = sesync_from_measurements(&data.measurements, &options, None).unwrap();

    assert_eq!(result.status, SESyncStatus::GlobalOpt);
    assert!(result.fxhat < 1e-6);
    // Each escape moves up exactly one rank
    assert!(result.ranks.windows(2).all(|w| w[1] == w[0] + 1));
    assert_eq!(
        result.escape_direction_curvatures.len(),
        result.ranks.len() - 1
    );
}

#[test]
fn test_iterates_and_monitor() {
    let data = common::cycle_dataset(2, 8, 0.1, 0.1, 3);
    let options = tight_options().with_log_iterates(true);

    let mut seen: Vec<(usize, f64, bool)> = Vec::new();
    let mut monitor = |info: &TntIterationInfo<'_, f64>| {
        seen.push((info.point.nrows(), info.value, info.accepted));
    };
    let problem = SESyncProblem::new(
        &data.measurements,
        options.formulation,
        options.projection_factorization,
        options.preconditioner,
        options.reg_cholesky_precon_max_condition_number,
    )
    .unwrap();
    let result = sesync_with_monitor(&problem, &options, None, Some(&mut monitor)).unwrap();

    assert!(!seen.is_empty());
    // Objective values never increase within a level
    for level in &result.function_values {
        assert!(level.windows(2).all(|w| w[1] <= w[0] + 1e-12));
    }
    for pair in seen.windows(2) {
        if pair[0].0 == pair[1].0 {
            assert!(pair[1].1 <= pair[0].1 + 1e-12);
        }
    }
    assert_eq!(result.iterates.len(), result.function_values.len());
    for (iterates, values) in result.iterates.iter().zip(&result.function_values) {
        assert_eq!(iterates.len(), values.len());
    }
}

#[test]
fn test_terminal_states_of_constant_problem() {
    let global = sesync(&ConstantProblem::new(1.0), &SESyncOpts::new().with_rank_range(3, 5), None)
        .unwrap();
    assert_eq!(global.status, SESyncStatus::GlobalOpt);

    let saddle = sesync(&ConstantProblem::new(-1.0), &SESyncOpts::new().with_rank_range(3, 5), None)
        .unwrap();
    assert_eq!(saddle.status, SESyncStatus::SaddlePoint);
    assert_eq!(saddle.ranks, vec![3]);
    assert_eq!(saddle.escape_direction_curvatures.len(), 1);
    assert_relative_eq!(saddle.escape_direction_curvatures[0], -1.0, epsilon = 1e-8);

    let max_rank = sesync(&ConstantProblem::new(-1.0), &SESyncOpts::new().with_rank_range(3, 3), None)
        .unwrap();
    assert_eq!(max_rank.status, SESyncStatus::MaxRank);
    assert_eq!(max_rank.escape_direction_curvatures.len(), 1);

    let imprecise = sesync(
        &ConstantProblem::new(-1.0),
        &SESyncOpts::new()
            .with_rank_range(3, 5)
            .with_lobpcg_max_iterations(0),
        None,
    )
    .unwrap();
    assert_eq!(imprecise.status, SESyncStatus::EigImprecision);
    assert!(imprecise.escape_direction_curvatures.is_empty());
}

#[test]
fn test_unconverged_eigensolver_never_certifies() {
    let problem = ConstantProblem::with_hidden_negative_eigenvalue(40);
    let options = SESyncOpts::new()
        .with_rank_range(3, 5)
        .with_lobpcg_block_size(1)
        .with_lobpcg_max_iterations(0);
    let result = sesync(&problem, &options, None).unwrap();

    assert_eq!(result.status, SESyncStatus::EigImprecision);
    assert!(!result.status.is_certified());
    assert_eq!(result.lobpcg_iters, vec![0]);

    // With a budget the negative eigenvalue is found and escape is attempted
    let tol = options.min_eig_num_tol;
    let resolved = sesync(&problem, &options.with_lobpcg_max_iterations(200), None).unwrap();
    assert_eq!(resolved.status, SESyncStatus::SaddlePoint);
    let theta = resolved.escape_direction_curvatures[0];
    assert!(theta < -tol && theta >= -1.0 - 1e-9);
}

#[test]
fn test_configuration_errors_precede_numerical_work() {
    let problem = ConstantProblem::new(1.0);
    let bad = [
        SESyncOpts::new().with_rank_range(2, 5),
        SESyncOpts::new().with_rank_range(4, 3),
        SESyncOpts::new().with_stpcg(0.0, 0.5),
        SESyncOpts::new().with_num_threads(0),
        SESyncOpts::new().with_min_eig_num_tol(0.0),
    ];
    for options in bad {
        assert!(matches!(
            sesync(&problem, &options, None),
            Err(OptimizerError::InvalidConfiguration { .. })
        ));
    }
}

#[test]
fn test_escape_decreases_objective_at_next_rank() {
    let data = common::cycle_dataset(2, 6, 0.1, 0.1, 17);
    let problem = SESyncProblem::new(
        &data.measurements,
        Formulation::Simplified,
        ProjectionFactorization::Cholesky,
        Preconditioner::RegularizedCholesky,
        1e6,
    )
    .unwrap();

    let mut escaped = 0;
    for seed in 0..5 {
        let y = random_initialization(&problem, 3, seed).unwrap();
        let eigen = problem.certificate_matrix(&y).unwrap().to_dense().symmetric_eigen();
        let (k, theta) = eigen
            .eigenvalues
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::INFINITY), |best, (i, v)| if v < best.1 { (i, v) } else { best });
        if theta > -1e-2 {
            continue;
        }
        let v: DVector<f64> = eigen.eigenvectors.column(k).into_owned();

        if let Some(next) = escape_saddle(&problem, &y, theta, &v, 1e-2, 1e-4).unwrap() {
            escaped += 1;
            assert_eq!(next.nrows(), 4);
            assert!(problem.cost(&next).unwrap() < problem.cost(&y).unwrap());
            assert!(problem.manifold(4).unwrap().is_point_on_manifold(&next, 1e-9));

            // The next trust-region run must not stop on its first test
            let egrad = problem.euclidean_gradient(&next).unwrap();
            let grad = problem.riemannian_gradient(&next, &egrad).unwrap();
            assert!(problem.inner_product(&next, &grad, &grad).sqrt() > 1e-2);
            let precon = problem.precondition(&next, &grad).unwrap();
            assert!(problem.inner_product(&next, &precon, &precon).sqrt() > 1e-4);
        }
    }
    assert!(escaped > 0);
}
