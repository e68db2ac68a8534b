//! Integration tests for problem construction, derivatives, initialization
//! and rounding.

mod common;

use approx::assert_relative_eq;
use nalgebra::DMatrix;
use rand::{rngs::SmallRng, SeedableRng};
use sesync::{
    random_initialization, Formulation, Preconditioner, ProjectionFactorization, SESyncProblem,
    SynchronizationProblem,
};
use sesync_core::{objective::DerivativeChecker, OptimizerError, RiemannianObjective};
use sesync_manifolds::MatrixManifold;

fn build(
    data: &common::Dataset,
    formulation: Formulation,
    factorization: ProjectionFactorization,
    preconditioner: Preconditioner,
) -> SESyncProblem<f64> {
    SESyncProblem::new(&data.measurements, formulation, factorization, preconditioner, 1e6)
        .unwrap()
}

fn random_tangent(
    problem: &SESyncProblem<f64>,
    y: &DMatrix<f64>,
    seed: u64,
) -> DMatrix<f64> {
    let manifold = problem.manifold(y.nrows()).unwrap();
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut v = DMatrix::zeros(y.nrows(), y.ncols());
    manifold.random_tangent(y, &mut rng, &mut v).unwrap();
    &v / v.norm()
}

#[test]
fn test_derivatives_agree_with_finite_differences() {
    let data = common::cycle_dataset(3, 6, 0.1, 0.1, 11);
    for formulation in [Formulation::Simplified, Formulation::Explicit] {
        let problem = build(
            &data,
            formulation,
            ProjectionFactorization::Cholesky,
            Preconditioner::RegularizedCholesky,
        );
        let y = random_initialization(&problem, 5, 3).unwrap();
        let u = random_tangent(&problem, &y, 4);
        let v = random_tangent(&problem, &y, 5);

        let (ok, err) = DerivativeChecker::check_gradient(&problem, &y, &v, 1e-6).unwrap();
        assert!(ok, "{formulation:?} gradient error {err}");
        let (ok, err) = DerivativeChecker::check_hessian(&problem, &y, &v, 1e-3).unwrap();
        assert!(ok, "{formulation:?} Hessian error {err}");
        let (ok, err) =
            DerivativeChecker::check_hessian_symmetry(&problem, &y, &u, &v, 1e-8).unwrap();
        assert!(ok, "{formulation:?} Hessian asymmetry {err}");
    }
}

#[test]
fn test_projection_factorizations_agree() {
    let data = common::cycle_dataset(2, 7, 0.05, 0.2, 21);
    let cholesky = build(
        &data,
        Formulation::Simplified,
        ProjectionFactorization::Cholesky,
        Preconditioner::None,
    );
    let qr = build(
        &data,
        Formulation::Simplified,
        ProjectionFactorization::Qr,
        Preconditioner::None,
    );
    let y = random_initialization(&cholesky, 4, 8).unwrap();

    assert_relative_eq!(
        cholesky.cost(&y).unwrap(),
        qr.cost(&y).unwrap(),
        max_relative = 1e-9
    );
    assert_relative_eq!(
        cholesky.euclidean_gradient(&y).unwrap(),
        qr.euclidean_gradient(&y).unwrap(),
        epsilon = 1e-8
    );
    assert_relative_eq!(
        cholesky.round_solution(&y).unwrap(),
        qr.round_solution(&y).unwrap(),
        epsilon = 1e-8
    );
}

#[test]
fn test_cost_vanishes_at_ground_truth() {
    let data = common::cycle_dataset(3, 5, 0.0, 0.0, 0);
    let simplified = build(
        &data,
        Formulation::Simplified,
        ProjectionFactorization::Cholesky,
        Preconditioner::Jacobi,
    );
    let explicit = build(
        &data,
        Formulation::Explicit,
        ProjectionFactorization::Qr,
        Preconditioner::Jacobi,
    );

    assert_relative_eq!(
        simplified.cost(&data.rotation_matrix()).unwrap(),
        0.0,
        epsilon = 1e-9
    );
    assert_relative_eq!(explicit.cost(&data.pose_matrix()).unwrap(), 0.0, epsilon = 1e-9);
    assert_relative_eq!(
        explicit.evaluate_pose_estimate(&data.pose_matrix()).unwrap(),
        0.0,
        epsilon = 1e-9
    );
}

#[test]
fn test_chordal_initialization_recovers_noiseless_rotations() {
    let data = common::cycle_dataset(3, 6, 0.0, 0.0, 0);
    for formulation in [Formulation::Simplified, Formulation::Explicit] {
        let problem = build(
            &data,
            formulation,
            ProjectionFactorization::Cholesky,
            Preconditioner::RegularizedCholesky,
        );
        let y = problem.chordal_initialization().unwrap();
        let manifold = problem.manifold(3).unwrap();
        assert!(manifold.is_point_on_manifold(&y, 1e-10));

        // Ground truth is anchored at the first rotation
        let offset = manifold.translation_columns();
        let anchor = data.rotations[0].transpose();
        for (i, truth) in data.rotations.iter().enumerate() {
            let block = y.columns(offset + 3 * i, 3).into_owned();
            assert_relative_eq!(block, &anchor * truth, epsilon = 1e-8);
        }
        assert_relative_eq!(problem.cost(&y).unwrap(), 0.0, epsilon = 1e-8);
    }
}

#[test]
fn test_rounding_produces_special_euclidean_poses() {
    let data = common::cycle_dataset(3, 6, 0.2, 0.3, 5);
    let problem = build(
        &data,
        Formulation::Explicit,
        ProjectionFactorization::Cholesky,
        Preconditioner::RegularizedCholesky,
    );
    let y = random_initialization(&problem, 5, 13).unwrap();
    let xhat = problem.round_solution(&y).unwrap();

    assert_eq!(xhat.shape(), (3, 6 + 18));
    for i in 0..6 {
        let r = xhat.columns(6 + 3 * i, 3).into_owned();
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-10);
        assert_relative_eq!(&r.transpose() * &r, DMatrix::identity(3, 3), epsilon = 1e-10);
    }

    // Rounded translations are optimal for the rounded rotations
    let fxhat = problem.evaluate_pose_estimate(&xhat).unwrap();
    let mut shifted = xhat.clone();
    shifted[(0, 1)] += 1e-2;
    assert!(fxhat <= problem.evaluate_pose_estimate(&shifted).unwrap());
}

#[test]
fn test_certificate_has_full_dimension_for_both_formulations() {
    let data = common::cycle_dataset(2, 5, 0.05, 0.05, 2);
    for formulation in [Formulation::Simplified, Formulation::Explicit] {
        let problem = build(
            &data,
            formulation,
            ProjectionFactorization::Cholesky,
            Preconditioner::None,
        );
        let y = random_initialization(&problem, 3, 1).unwrap();
        let s = problem.certificate_matrix(&y).unwrap();
        assert_eq!((s.nrows(), s.ncols()), (5 + 10, 5 + 10));
        assert!(s.max_asymmetry() < 1e-10);

        let lambda = problem.lagrange_multiplier(&y).unwrap();
        assert_eq!(lambda.nrows(), 10);
        assert!(lambda.max_asymmetry() < 1e-10);
    }
}

#[test]
fn test_rejects_malformed_measurements() {
    let mut data = common::noiseless_cycle(4);
    data.measurements[1].kappa = -1.0;
    let result = SESyncProblem::new(
        &data.measurements,
        Formulation::Simplified,
        ProjectionFactorization::Cholesky,
        Preconditioner::RegularizedCholesky,
        1e6,
    );
    assert!(matches!(result, Err(OptimizerError::InvalidProblem { .. })));
}
