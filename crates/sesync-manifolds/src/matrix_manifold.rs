//! Matrix Manifold trait for manifolds that naturally work with matrix representations.
//!
//! Points and tangent vectors are dense matrices of a fixed shape. Operations
//! write into caller-provided output matrices so that solvers can reuse their
//! buffers across iterations.

use nalgebra::DMatrix;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use sesync_core::{
    error::Result,
    types::{frobenius_inner, Scalar},
};

/// A manifold that naturally operates on matrix representations.
///
/// # Type Parameters
///
/// * `T` - The scalar type (f32 or f64)
pub trait MatrixManifold<T: Scalar> {
    /// Returns the name of this manifold.
    fn name(&self) -> &str;

    /// Returns the number of rows in the matrix representation.
    fn nrows(&self) -> usize;

    /// Returns the number of columns in the matrix representation.
    fn ncols(&self) -> usize;

    /// Returns the intrinsic dimension of the manifold.
    ///
    /// This is the dimension of the tangent space, which may be less than
    /// the ambient dimension (nrows * ncols).
    fn dimension(&self) -> usize;

    /// Checks if a matrix represents a valid point on the manifold.
    ///
    /// # Arguments
    ///
    /// * `point` - A matrix to check
    /// * `tolerance` - Numerical tolerance for the check
    fn is_point_on_manifold(&self, point: &DMatrix<T>, tolerance: T) -> bool;

    /// Checks if a matrix represents a valid tangent vector at `point`.
    fn is_vector_in_tangent_space(
        &self,
        point: &DMatrix<T>,
        vector: &DMatrix<T>,
        tolerance: T,
    ) -> bool;

    /// Projects a matrix onto the manifold.
    ///
    /// # Arguments
    ///
    /// * `matrix` - An arbitrary matrix
    /// * `result` - Output matrix that will contain the projection
    fn project_point(&self, matrix: &DMatrix<T>, result: &mut DMatrix<T>) -> Result<()>;

    /// Projects a matrix onto the tangent space at a point.
    ///
    /// # Arguments
    ///
    /// * `point` - A point on the manifold
    /// * `vector` - An arbitrary matrix
    /// * `result` - Output matrix that will contain the projection
    fn project_tangent(
        &self,
        point: &DMatrix<T>,
        vector: &DMatrix<T>,
        result: &mut DMatrix<T>,
    ) -> Result<()>;

    /// Computes the Riemannian inner product between two tangent vectors.
    ///
    /// The default is the Frobenius inner product `tr(U^T V)`.
    fn inner_product(&self, _point: &DMatrix<T>, u: &DMatrix<T>, v: &DMatrix<T>) -> T {
        frobenius_inner(u, v)
    }

    /// Performs a retraction from the tangent space to the manifold.
    ///
    /// # Arguments
    ///
    /// * `point` - A point on the manifold
    /// * `tangent` - A tangent vector at `point`
    /// * `result` - Output matrix for the new point
    fn retract(
        &self,
        point: &DMatrix<T>,
        tangent: &DMatrix<T>,
        result: &mut DMatrix<T>,
    ) -> Result<()>;

    /// Converts a Euclidean gradient to a Riemannian gradient.
    ///
    /// For embedded manifolds with the induced metric this is the tangent
    /// space projection.
    fn euclidean_to_riemannian_gradient(
        &self,
        point: &DMatrix<T>,
        euclidean_grad: &DMatrix<T>,
        result: &mut DMatrix<T>,
    ) -> Result<()> {
        self.project_tangent(point, euclidean_grad, result)
    }

    /// Generates a random point on the manifold.
    fn random_point<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<DMatrix<T>>;

    /// Generates a random tangent vector at a point.
    fn random_tangent<R: Rng + ?Sized>(
        &self,
        point: &DMatrix<T>,
        rng: &mut R,
        result: &mut DMatrix<T>,
    ) -> Result<()> {
        let ambient = gaussian_matrix(self.nrows(), self.ncols(), rng);
        self.project_tangent(point, &ambient, result)
    }
}

/// Samples a matrix with independent standard normal entries.
pub fn gaussian_matrix<T: Scalar, R: Rng + ?Sized>(
    nrows: usize,
    ncols: usize,
    rng: &mut R,
) -> DMatrix<T> {
    DMatrix::from_fn(nrows, ncols, |_, _| {
        let x: f64 = StandardNormal.sample(rng);
        <T as Scalar>::from_f64(x)
    })
}
