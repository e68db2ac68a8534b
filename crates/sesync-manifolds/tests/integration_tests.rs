//! Integration tests for sesync-manifolds
//!
//! These tests exercise the manifolds through the public `MatrixManifold`
//! interface, including property-based checks of the projections.

use nalgebra::DMatrix;
use proptest::prelude::*;
use rand::{rngs::SmallRng, SeedableRng};
use sesync_manifolds::{Formulation, LiftedSEManifold, MatrixManifold, StiefelProduct};

#[test]
fn test_stiefel_product_basic_operations() {
    let manifold = StiefelProduct::new(3, 5, 4).unwrap();
    let mut rng = SmallRng::seed_from_u64(42);

    let x: DMatrix<f64> = manifold.random_point(&mut rng).unwrap();
    for i in 0..4 {
        let xi = x.columns(3 * i, 3);
        let xtx = xi.transpose() * xi;
        assert!((xtx - DMatrix::<f64>::identity(3, 3)).norm() < 1e-10, "X_i^T X_i != I");
    }

    let v = DMatrix::from_fn(5, 12, |i, j| 0.1 * (i as f64 - j as f64));
    let mut tangent = DMatrix::zeros(5, 12);
    manifold.project_tangent(&x, &v, &mut tangent).unwrap();

    // Check tangent space constraint: X_i^T Z_i + Z_i^T X_i = 0
    for i in 0..4 {
        let xtz = x.columns(3 * i, 3).transpose() * tangent.columns(3 * i, 3);
        assert!((&xtz + xtz.transpose()).norm() < 1e-10, "Tangent not in tangent space");
    }
}

#[test]
fn test_riemannian_gradient_is_projection() {
    let manifold = LiftedSEManifold::new(Formulation::Simplified, 2, 3, 3).unwrap();
    let mut rng = SmallRng::seed_from_u64(5);
    let x: DMatrix<f64> = manifold.random_point(&mut rng).unwrap();
    let egrad = DMatrix::from_fn(3, 6, |i, j| (i * 6 + j) as f64);

    let mut rgrad = DMatrix::zeros(3, 6);
    let mut projected = DMatrix::zeros(3, 6);
    manifold
        .euclidean_to_riemannian_gradient(&x, &egrad, &mut rgrad)
        .unwrap();
    manifold.project_tangent(&x, &egrad, &mut projected).unwrap();
    assert_eq!(rgrad, projected);
}

#[test]
fn test_shape_mismatch_is_reported() {
    let manifold = StiefelProduct::new(2, 3, 2).unwrap();
    let wrong = DMatrix::<f64>::zeros(4, 4);
    let mut out = DMatrix::zeros(3, 4);
    assert!(manifold.project_point(&wrong, &mut out).is_err());
    assert!(!manifold.is_point_on_manifold(&wrong, 1e-8));
}

proptest! {
    #[test]
    fn prop_tangent_projection_is_idempotent(seed in any::<u64>(), explicit in any::<bool>()) {
        let formulation = if explicit { Formulation::Explicit } else { Formulation::Simplified };
        let manifold = LiftedSEManifold::new(formulation, 3, 4, 3).unwrap();
        let mut rng = SmallRng::seed_from_u64(seed);
        let ncols = MatrixManifold::<f64>::ncols(&manifold);

        let x: DMatrix<f64> = manifold.random_point(&mut rng).unwrap();
        let v = sesync_manifolds::gaussian_matrix::<f64, _>(4, ncols, &mut rng);

        let mut once = DMatrix::zeros(4, ncols);
        let mut twice = DMatrix::zeros(4, ncols);
        manifold.project_tangent(&x, &v, &mut once).unwrap();
        manifold.project_tangent(&x, &once, &mut twice).unwrap();

        prop_assert!((&once - &twice).norm() < 1e-9);
        prop_assert!(manifold.is_vector_in_tangent_space(&x, &once, 1e-9));
    }

    #[test]
    fn prop_retraction_stays_on_manifold(seed in any::<u64>(), scale in 0.0f64..3.0) {
        let manifold = StiefelProduct::new(2, 4, 5).unwrap();
        let mut rng = SmallRng::seed_from_u64(seed);

        let x: DMatrix<f64> = manifold.random_point(&mut rng).unwrap();
        let mut v = DMatrix::zeros(4, 10);
        manifold.random_tangent(&x, &mut rng, &mut v).unwrap();
        v *= scale;

        let mut y = DMatrix::zeros(4, 10);
        manifold.retract(&x, &v, &mut y).unwrap();
        prop_assert!(manifold.is_point_on_manifold(&y, 1e-9));
    }
}
