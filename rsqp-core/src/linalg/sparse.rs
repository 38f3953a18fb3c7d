//! Sparse matrix types and operations.
//!
//! This module provides wrappers and utilities for sparse matrices in CSC
//! (Compressed Sparse Column) format. It is also the convert-to-sparse
//! adapter between the constraint Jacobian handed in by the NLP layer and
//! the row/column/value views the direct solvers work on.

use nalgebra::DMatrix;
use sprs::{CsMat, TriMat};

/// Sparse matrix in CSC format.
pub type SparseCsc = CsMat<f64>;

/// Triplet format sparse matrix builder.
pub type SparseTriMat = TriMat<f64>;

/// Build a sparse CSC matrix from triplets (row, col, value).
///
/// Duplicate entries are summed.
///
/// # Arguments
///
/// * `nrows` - Number of rows
/// * `ncols` - Number of columns
/// * `triplets` - Iterator of (row, col, value) tuples
pub fn from_triplets<I>(nrows: usize, ncols: usize, triplets: I) -> SparseCsc
where
    I: IntoIterator<Item = (usize, usize, f64)>,
{
    let mut tri = TriMat::new((nrows, ncols));
    for (i, j, v) in triplets {
        tri.add_triplet(i, j, v);
    }
    tri.to_csc()
}

/// Build a sparse CSC matrix from a dense matrix, dropping exact zeros.
pub fn from_dense(dense: &DMatrix<f64>) -> SparseCsc {
    let mut tri = TriMat::new((dense.nrows(), dense.ncols()));
    for j in 0..dense.ncols() {
        for i in 0..dense.nrows() {
            let v = dense[(i, j)];
            if v != 0.0 {
                tri.add_triplet(i, j, v);
            }
        }
    }
    tri.to_csc()
}

/// Expand a sparse matrix into a dense one.
pub fn to_dense(a: &SparseCsc) -> DMatrix<f64> {
    let mut dense = DMatrix::zeros(a.rows(), a.cols());
    for (&val, (row, col)) in a.iter() {
        dense[(row, col)] += val;
    }
    dense
}

/// Create an identity matrix in CSC format.
pub fn identity(n: usize) -> SparseCsc {
    from_triplets(n, n, (0..n).map(|i| (i, i, 1.0)))
}

/// Sparse matrix-vector product: y = alpha * A * x + beta * y
pub fn spmv(a: &SparseCsc, x: &[f64], y: &mut [f64], alpha: f64, beta: f64) {
    assert_eq!(a.cols(), x.len());
    assert_eq!(a.rows(), y.len());

    if beta == 0.0 {
        y.fill(0.0);
    } else if beta != 1.0 {
        for yi in y.iter_mut() {
            *yi *= beta;
        }
    }

    if alpha != 0.0 {
        for (val, (row, col)) in a.iter() {
            y[row] += alpha * (*val) * x[col];
        }
    }
}

/// Transpose-vector product: y = alpha * A^T * x + beta * y
pub fn spmv_transpose(a: &SparseCsc, x: &[f64], y: &mut [f64], alpha: f64, beta: f64) {
    assert_eq!(a.rows(), x.len());
    assert_eq!(a.cols(), y.len());

    if beta == 0.0 {
        y.fill(0.0);
    } else if beta != 1.0 {
        for yi in y.iter_mut() {
            *yi *= beta;
        }
    }

    if alpha != 0.0 {
        for (val, (row, col)) in a.iter() {
            y[col] += alpha * (*val) * x[row];
        }
    }
}

/// Extract the submatrix `A(rows, cols)`.
///
/// Row `i` of the result is row `rows[i]` of `a`, column `j` is column
/// `cols[j]`. Indices may appear in any order; entries outside the
/// selection are skipped.
pub fn select(a: &SparseCsc, rows: &[usize], cols: &[usize]) -> SparseCsc {
    let mut row_map = vec![usize::MAX; a.rows()];
    for (new, &old) in rows.iter().enumerate() {
        row_map[old] = new;
    }
    let mut col_map = vec![usize::MAX; a.cols()];
    for (new, &old) in cols.iter().enumerate() {
        col_map[old] = new;
    }

    let mut tri = TriMat::new((rows.len(), cols.len()));
    for (&val, (row, col)) in a.iter() {
        let (i, j) = (row_map[row], col_map[col]);
        if i != usize::MAX && j != usize::MAX {
            tri.add_triplet(i, j, val);
        }
    }
    tri.to_csc()
}

/// Explicit transpose in CSC format.
pub fn transpose(a: &SparseCsc) -> SparseCsc {
    from_triplets(
        a.cols(),
        a.rows(),
        a.iter().map(|(&val, (row, col))| (col, row, val)),
    )
}

/// Largest absolute entry of `a` (0 for an empty matrix).
pub fn max_abs(a: &SparseCsc) -> f64 {
    a.data().iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
}

/// Infinity norm of a vector.
pub fn norm_inf(x: &[f64]) -> f64 {
    x.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
}
