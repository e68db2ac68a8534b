//! Sparse matrix support for the synchronization data matrices.
//!
//! The connection Laplacian, the translational data matrices and the
//! certificate matrix are all assembled through [`CooMatrix`] and stored in
//! compressed sparse row form as [`CsrMatrix`]. Column indices inside a row
//! are always sorted and unique.

use crate::{
    error::{ManifoldError as Error, Result},
    types::{DMatrix, DVector, Scalar},
};
use num_traits::Float;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Compressed Sparse Row (CSR) format matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix<T: Scalar> {
    /// Number of rows
    nrows: usize,
    /// Number of columns
    ncols: usize,
    /// Row pointers (length nrows + 1)
    row_ptr: Vec<usize>,
    /// Column indices (length nnz)
    col_idx: Vec<usize>,
    /// Non-zero values (length nnz)
    values: Vec<T>,
}

impl<T: Scalar> CsrMatrix<T> {
    /// Creates a new CSR matrix from raw data.
    pub fn new(
        nrows: usize,
        ncols: usize,
        row_ptr: Vec<usize>,
        col_idx: Vec<usize>,
        values: Vec<T>,
    ) -> Result<Self> {
        if row_ptr.len() != nrows + 1 {
            return Err(Error::dimension_mismatch(
                format!("row_ptr length {}", nrows + 1),
                format!("row_ptr length {}", row_ptr.len()),
            ));
        }

        let nnz = row_ptr[nrows];
        if col_idx.len() != nnz {
            return Err(Error::dimension_mismatch(
                format!("col_idx length {}", nnz),
                format!("col_idx length {}", col_idx.len()),
            ));
        }

        if values.len() != nnz {
            return Err(Error::dimension_mismatch(
                format!("values length {}", nnz),
                format!("values length {}", values.len()),
            ));
        }

        if col_idx.iter().any(|&c| c >= ncols) {
            return Err(Error::dimension_mismatch(
                format!("column indices < {}", ncols),
                "out-of-range column index",
            ));
        }

        Ok(Self {
            nrows,
            ncols,
            row_ptr,
            col_idx,
            values,
        })
    }

    /// Creates an all-zero matrix.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            row_ptr: vec![0; nrows + 1],
            col_idx: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Creates a sparse identity matrix.
    pub fn identity(n: usize) -> Self {
        Self {
            nrows: n,
            ncols: n,
            row_ptr: (0..=n).collect(),
            col_idx: (0..n).collect(),
            values: vec![T::one(); n],
        }
    }

    /// Creates a CSR matrix from a dense matrix, dropping entries with
    /// magnitude not above `tolerance`.
    pub fn from_dense(dense: &DMatrix<T>, tolerance: T) -> Self {
        let mut row_ptr = vec![0];
        let mut col_idx = Vec::new();
        let mut values = Vec::new();

        for i in 0..dense.nrows() {
            for j in 0..dense.ncols() {
                let val = dense[(i, j)];
                if <T as Float>::abs(val) > tolerance {
                    col_idx.push(j);
                    values.push(val);
                }
            }
            row_ptr.push(col_idx.len());
        }

        Self {
            nrows: dense.nrows(),
            ncols: dense.ncols(),
            row_ptr,
            col_idx,
            values,
        }
    }

    /// Converts to a dense matrix.
    pub fn to_dense(&self) -> DMatrix<T> {
        let mut dense = DMatrix::zeros(self.nrows, self.ncols);
        for i in 0..self.nrows {
            for (j, v) in self.row(i) {
                dense[(i, j)] = v;
            }
        }
        dense
    }

    /// Returns the number of rows.
    #[inline]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Returns the number of columns.
    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Returns the number of stored entries.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Iterates over the `(column, value)` pairs of row `i`.
    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, T)> + '_ {
        let range = self.row_ptr[i]..self.row_ptr[i + 1];
        self.col_idx[range.clone()]
            .iter()
            .copied()
            .zip(self.values[range].iter().copied())
    }

    /// Returns entry `(i, j)` (zero if it is not stored).
    pub fn get(&self, i: usize, j: usize) -> T {
        let range = self.row_ptr[i]..self.row_ptr[i + 1];
        match self.col_idx[range.clone()].binary_search(&j) {
            Ok(pos) => self.values[range.start + pos],
            Err(_) => T::zero(),
        }
    }

    /// Returns the main diagonal.
    pub fn diagonal(&self) -> DVector<T> {
        let n = self.nrows.min(self.ncols);
        DVector::from_fn(n, |i, _| self.get(i, i))
    }

    /// Largest absolute row sum, an upper bound on the spectral radius.
    pub fn max_abs_row_sum(&self) -> T {
        (0..self.nrows)
            .map(|i| {
                self.row(i)
                    .fold(T::zero(), |acc, (_, v)| acc + <T as Float>::abs(v))
            })
            .fold(T::zero(), |a, b| <T as Float>::max(a, b))
    }

    /// Sparse-times-dense product `A * X`.
    ///
    /// With the `parallel` feature the rows of the result are computed
    /// independently on the rayon pool, so the result does not depend on the
    /// number of worker threads.
    pub fn mul_dense(&self, x: &DMatrix<T>) -> Result<DMatrix<T>> {
        if x.nrows() != self.ncols {
            return Err(Error::dimension_mismatch(
                format!("{} rows", self.ncols),
                format!("{} rows", x.nrows()),
            ));
        }
        let k = x.ncols();

        let compute_row = |i: usize| -> Vec<T> {
            let mut out = vec![T::zero(); k];
            for (j, v) in self.row(i) {
                for (c, o) in out.iter_mut().enumerate() {
                    *o += v * x[(j, c)];
                }
            }
            out
        };

        #[cfg(feature = "parallel")]
        let rows: Vec<Vec<T>> = (0..self.nrows).into_par_iter().map(compute_row).collect();
        #[cfg(not(feature = "parallel"))]
        let rows: Vec<Vec<T>> = (0..self.nrows).map(compute_row).collect();

        Ok(DMatrix::from_fn(self.nrows, k, |i, c| rows[i][c]))
    }

    /// Dense-times-sparse product `Y * A`.
    pub fn left_mul_dense(&self, y: &DMatrix<T>) -> Result<DMatrix<T>> {
        if y.ncols() != self.nrows {
            return Err(Error::dimension_mismatch(
                format!("{} columns", self.nrows),
                format!("{} columns", y.ncols()),
            ));
        }
        let mut out = DMatrix::zeros(y.nrows(), self.ncols);
        for i in 0..self.nrows {
            for (j, v) in self.row(i) {
                for r in 0..y.nrows() {
                    out[(r, j)] += y[(r, i)] * v;
                }
            }
        }
        Ok(out)
    }

    /// Transposes the matrix.
    pub fn transpose(&self) -> Self {
        let mut coo = CooMatrix::new(self.ncols, self.nrows);
        for i in 0..self.nrows {
            for (j, v) in self.row(i) {
                coo.triplets.push((j, i, v));
            }
        }
        coo.to_csr()
    }

    /// Computes `self + alpha * other`.
    pub fn add_scaled(&self, other: &Self, alpha: T) -> Result<Self> {
        if self.nrows != other.nrows || self.ncols != other.ncols {
            return Err(Error::dimension_mismatch(
                format!("{}x{}", self.nrows, self.ncols),
                format!("{}x{}", other.nrows, other.ncols),
            ));
        }

        let mut row_ptr = Vec::with_capacity(self.nrows + 1);
        let mut col_idx = Vec::with_capacity(self.nnz() + other.nnz());
        let mut values = Vec::with_capacity(self.nnz() + other.nnz());
        row_ptr.push(0);

        for i in 0..self.nrows {
            let mut a = self.row(i).peekable();
            let mut b = other.row(i).peekable();
            loop {
                let next = match (a.peek().copied(), b.peek().copied()) {
                    (Some((ja, va)), Some((jb, vb))) => {
                        if ja < jb {
                            a.next();
                            (ja, va)
                        } else if jb < ja {
                            b.next();
                            (jb, alpha * vb)
                        } else {
                            a.next();
                            b.next();
                            (ja, va + alpha * vb)
                        }
                    }
                    (Some((ja, va)), None) => {
                        a.next();
                        (ja, va)
                    }
                    (None, Some((jb, vb))) => {
                        b.next();
                        (jb, alpha * vb)
                    }
                    (None, None) => break,
                };
                col_idx.push(next.0);
                values.push(next.1);
            }
            row_ptr.push(col_idx.len());
        }

        Ok(Self {
            nrows: self.nrows,
            ncols: self.ncols,
            row_ptr,
            col_idx,
            values,
        })
    }

    /// Computes `self + alpha * I` for a square matrix.
    pub fn add_identity(&self, alpha: T) -> Result<Self> {
        if self.nrows != self.ncols {
            return Err(Error::dimension_mismatch("square matrix", "rectangular matrix"));
        }
        self.add_scaled(&Self::identity(self.nrows), alpha)
    }

    /// Largest asymmetry `max |A_ij - A_ji|` of a square matrix.
    pub fn max_asymmetry(&self) -> T {
        let mut worst = T::zero();
        for i in 0..self.nrows {
            for (j, v) in self.row(i) {
                worst = <T as Float>::max(worst, <T as Float>::abs(v - self.get(j, i)));
            }
        }
        worst
    }
}

/// Coordinate (COO) format builder.
///
/// Duplicate entries are summed when converting to CSR.
#[derive(Debug, Clone)]
pub struct CooMatrix<T: Scalar> {
    nrows: usize,
    ncols: usize,
    triplets: Vec<(usize, usize, T)>,
}

impl<T: Scalar> CooMatrix<T> {
    /// Creates an empty builder.
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            triplets: Vec::new(),
        }
    }

    /// Adds an entry to the matrix.
    pub fn push(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        if row >= self.nrows {
            return Err(Error::dimension_mismatch(
                format!("row < {}", self.nrows),
                format!("row = {}", row),
            ));
        }

        if col >= self.ncols {
            return Err(Error::dimension_mismatch(
                format!("col < {}", self.ncols),
                format!("col = {}", col),
            ));
        }

        if value != T::zero() {
            self.triplets.push((row, col, value));
        }

        Ok(())
    }

    /// Adds a dense block with its top-left corner at `(row, col)`.
    pub fn push_block(&mut self, row: usize, col: usize, block: &DMatrix<T>) -> Result<()> {
        for c in 0..block.ncols() {
            for r in 0..block.nrows() {
                self.push(row + r, col + c, block[(r, c)])?;
            }
        }
        Ok(())
    }

    /// Converts to CSR format.
    pub fn to_csr(&self) -> CsrMatrix<T> {
        let mut sorted_triplets = self.triplets.clone();
        sorted_triplets.sort_by_key(|&(r, c, _)| (r, c));

        // Remove duplicates by summing values
        let mut unique_triplets: Vec<(usize, usize, T)> = Vec::new();
        for (r, c, v) in sorted_triplets {
            if let Some(last) = unique_triplets.last_mut() {
                if last.0 == r && last.1 == c {
                    last.2 += v;
                    continue;
                }
            }
            unique_triplets.push((r, c, v));
        }

        let mut row_ptr = vec![0];
        let mut col_idx = Vec::with_capacity(unique_triplets.len());
        let mut values = Vec::with_capacity(unique_triplets.len());

        let mut current_row = 0;
        for (r, c, v) in unique_triplets {
            while current_row < r {
                row_ptr.push(col_idx.len());
                current_row += 1;
            }
            col_idx.push(c);
            values.push(v);
        }

        while current_row < self.nrows {
            row_ptr.push(col_idx.len());
            current_row += 1;
        }

        CsrMatrix {
            nrows: self.nrows,
            ncols: self.ncols,
            row_ptr,
            col_idx,
            values,
        }
    }
}
