//! The lifted search space of the rank-`r` SE(d) synchronization relaxation.
//!
//! For the simplified formulation translations are eliminated analytically
//! and a point is `Y in St(d, r)^n`, stored as an `r x (d*n)` matrix. For the
//! explicit formulation the translations are kept as `n` unconstrained
//! columns in front of the rotation blocks, giving `r x (n + d*n)` points on
//! `R^{r x n} x St(d, r)^n`.

use nalgebra::DMatrix;
use rand::Rng;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use sesync_core::{
    error::{ManifoldError, Result},
    types::Scalar,
};

use crate::{
    matrix_manifold::{gaussian_matrix, MatrixManifold},
    stiefel_product::StiefelProduct,
};

/// Problem formulation of SE(d) synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Formulation {
    /// Translations eliminated in closed form; rotations only.
    #[default]
    Simplified,
    /// Translations and rotations optimized jointly.
    Explicit,
}

/// Search space of one staircase level: rank, dimension, node count and
/// formulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiftedSEManifold {
    formulation: Formulation,
    stiefel: StiefelProduct,
}

impl LiftedSEManifold {
    /// Creates the lifted manifold for `n` poses in `d` dimensions at rank `r`.
    ///
    /// # Errors
    ///
    /// Returns an error if `d = 0`, `n = 0`, or `r < d`.
    pub fn new(formulation: Formulation, d: usize, r: usize, n: usize) -> Result<Self> {
        Ok(Self {
            formulation,
            stiefel: StiefelProduct::new(d, r, n)?,
        })
    }

    /// The formulation this manifold was built for.
    pub fn formulation(&self) -> Formulation {
        self.formulation
    }

    /// Relaxation rank.
    pub fn rank(&self) -> usize {
        self.stiefel.p()
    }

    /// Dimension of the poses.
    pub fn dim(&self) -> usize {
        self.stiefel.k()
    }

    /// Number of poses.
    pub fn num_poses(&self) -> usize {
        self.stiefel.n()
    }

    /// Rotational factor of the manifold.
    pub fn stiefel(&self) -> &StiefelProduct {
        &self.stiefel
    }

    /// Number of leading translation columns (0 for the simplified formulation).
    pub fn translation_columns(&self) -> usize {
        match self.formulation {
            Formulation::Simplified => 0,
            Formulation::Explicit => self.stiefel.n(),
        }
    }

    /// Number of rotation columns `d*n`.
    pub fn rotation_columns(&self) -> usize {
        self.stiefel.k() * self.stiefel.n()
    }

    /// The same manifold at another rank.
    pub fn with_rank(&self, r: usize) -> Result<Self> {
        Self::new(self.formulation, self.dim(), r, self.num_poses())
    }

    /// Extracts the rotational part of a point or tangent vector.
    pub fn rotation_part<T: Scalar>(&self, m: &DMatrix<T>) -> DMatrix<T> {
        m.columns(self.translation_columns(), self.rotation_columns())
            .into_owned()
    }

    /// Curvature correction `Ydot_i sym(Y_i^T G_i)` restricted to the
    /// rotation blocks; translation columns are zero.
    pub fn sym_block_diag_product<T: Scalar>(
        &self,
        ydot: &DMatrix<T>,
        y: &DMatrix<T>,
        egrad: &DMatrix<T>,
    ) -> Result<DMatrix<T>> {
        self.check_shape(ydot)?;
        self.check_shape(y)?;
        self.check_shape(egrad)?;
        let offset = self.translation_columns();
        let cols = self.rotation_columns();
        let mut out = DMatrix::zeros(self.rank(), offset + cols);
        self.stiefel.sym_block_diag_product_into(
            ydot.columns(offset, cols),
            y.columns(offset, cols),
            egrad.columns(offset, cols),
            out.columns_mut(offset, cols),
        );
        Ok(out)
    }

    fn check_shape<T: Scalar>(&self, m: &DMatrix<T>) -> Result<()> {
        let ncols = self.translation_columns() + self.rotation_columns();
        if m.nrows() != self.rank() || m.ncols() != ncols {
            return Err(ManifoldError::dimension_mismatch(
                format!("({}, {})", self.rank(), ncols),
                format!("({}, {})", m.nrows(), m.ncols()),
            ));
        }
        Ok(())
    }
}

impl<T: Scalar> MatrixManifold<T> for LiftedSEManifold {
    fn name(&self) -> &str {
        match self.formulation {
            Formulation::Simplified => "LiftedSEManifold(simplified)",
            Formulation::Explicit => "LiftedSEManifold(explicit)",
        }
    }

    fn nrows(&self) -> usize {
        self.rank()
    }

    fn ncols(&self) -> usize {
        self.translation_columns() + self.rotation_columns()
    }

    fn dimension(&self) -> usize {
        self.rank() * self.translation_columns()
            + <StiefelProduct as MatrixManifold<T>>::dimension(&self.stiefel)
    }

    fn is_point_on_manifold(&self, point: &DMatrix<T>, tolerance: T) -> bool {
        if self.check_shape(point).is_err() {
            return false;
        }
        let offset = self.translation_columns();
        self.stiefel
            .orthonormality_error(point.columns(offset, self.rotation_columns()))
            < tolerance
    }

    fn is_vector_in_tangent_space(
        &self,
        point: &DMatrix<T>,
        vector: &DMatrix<T>,
        tolerance: T,
    ) -> bool {
        if !self.is_point_on_manifold(point, tolerance) || self.check_shape(vector).is_err() {
            return false;
        }
        let offset = self.translation_columns();
        let cols = self.rotation_columns();
        self.stiefel
            .tangency_error(point.columns(offset, cols), vector.columns(offset, cols))
            < tolerance
    }

    fn project_point(&self, matrix: &DMatrix<T>, result: &mut DMatrix<T>) -> Result<()> {
        self.check_shape(matrix)?;
        self.check_shape(result)?;
        let offset = self.translation_columns();
        result
            .columns_mut(0, offset)
            .copy_from(&matrix.columns(0, offset));
        self.stiefel.project_blocks(
            matrix.columns(offset, self.rotation_columns()),
            result.columns_mut(offset, self.rotation_columns()),
        )
    }

    fn project_tangent(
        &self,
        point: &DMatrix<T>,
        vector: &DMatrix<T>,
        result: &mut DMatrix<T>,
    ) -> Result<()> {
        self.check_shape(point)?;
        self.check_shape(vector)?;
        self.check_shape(result)?;
        let offset = self.translation_columns();
        let cols = self.rotation_columns();
        result
            .columns_mut(0, offset)
            .copy_from(&vector.columns(0, offset));
        self.stiefel.project_tangent_blocks(
            point.columns(offset, cols),
            vector.columns(offset, cols),
            result.columns_mut(offset, cols),
        );
        Ok(())
    }

    fn retract(
        &self,
        point: &DMatrix<T>,
        tangent: &DMatrix<T>,
        result: &mut DMatrix<T>,
    ) -> Result<()> {
        // Translations move linearly, rotation blocks by the polar retraction
        self.check_shape(tangent)?;
        let shifted = point + tangent;
        self.project_point(&shifted, result)
    }

    fn random_point<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<DMatrix<T>> {
        let ambient = gaussian_matrix(self.rank(), MatrixManifold::<T>::ncols(self), rng);
        let mut point = DMatrix::zeros(self.rank(), MatrixManifold::<T>::ncols(self));
        self.project_point(&ambient, &mut point)?;
        Ok(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::SmallRng, SeedableRng};

    #[test]
    fn test_shapes_per_formulation() {
        let simplified = LiftedSEManifold::new(Formulation::Simplified, 2, 3, 4).unwrap();
        let explicit = LiftedSEManifold::new(Formulation::Explicit, 2, 3, 4).unwrap();

        assert_eq!(MatrixManifold::<f64>::ncols(&simplified), 8);
        assert_eq!(MatrixManifold::<f64>::ncols(&explicit), 12);
        assert_eq!(explicit.translation_columns(), 4);
        assert_eq!(MatrixManifold::<f64>::dimension(&explicit), 3 * 4 + 4 * 3);
        assert_eq!(explicit.with_rank(5).unwrap().rank(), 5);
        assert!(simplified.with_rank(1).is_err());
    }

    #[test]
    fn test_explicit_translations_are_unconstrained() {
        let manifold = LiftedSEManifold::new(Formulation::Explicit, 2, 3, 2).unwrap();
        let mut rng = SmallRng::seed_from_u64(3);
        let point: DMatrix<f64> = manifold.random_point(&mut rng).unwrap();
        assert!(manifold.is_point_on_manifold(&point, 1e-10));

        let mut ambient = DMatrix::from_element(3, 6, 0.5);
        ambient[(0, 0)] = 4.0;
        let mut tangent = DMatrix::zeros(3, 6);
        manifold.project_tangent(&point, &ambient, &mut tangent).unwrap();

        assert_relative_eq!(
            tangent.columns(0, 2).into_owned(),
            ambient.columns(0, 2).into_owned()
        );
        assert!(manifold.is_vector_in_tangent_space(&point, &tangent, 1e-10));

        let mut moved = DMatrix::zeros(3, 6);
        manifold.retract(&point, &tangent, &mut moved).unwrap();
        assert_relative_eq!(
            moved.columns(0, 2).into_owned(),
            point.columns(0, 2) + tangent.columns(0, 2),
            epsilon = 1e-12
        );
        assert!(manifold.is_point_on_manifold(&moved, 1e-10));
    }

    #[test]
    fn test_curvature_correction_ignores_translations() {
        let manifold = LiftedSEManifold::new(Formulation::Explicit, 1, 2, 2).unwrap();
        let ydot = DMatrix::from_element(2, 4, 1.0);
        let y = DMatrix::from_row_slice(2, 4, &[0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
        let egrad = DMatrix::from_element(2, 4, 2.0);

        let out = manifold.sym_block_diag_product(&ydot, &y, &egrad).unwrap();
        assert_relative_eq!(out.columns(0, 2).into_owned(), DMatrix::zeros(2, 2));
        assert_relative_eq!(out.columns(2, 2).into_owned(), DMatrix::from_element(2, 2, 2.0));
    }
}
