//! Capability traits for the matrices a decomposition hands out.
//!
//! Instead of one deep matrix hierarchy, each concrete matrix kind implements
//! only what it can do:
//! - [`LinearOperator`]: `y = A x` and `y = A^T x`
//! - [`Invertible`]: `x = inv(A) b` and `x = inv(A^T) b`

use nalgebra::DMatrix;

use super::sparse::{spmv, spmv_transpose, SparseCsc};

/// Whether an operation uses a matrix or its transpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transpose {
    #[default]
    No,
    Trans,
}

impl Transpose {
    pub fn flip(self) -> Self {
        match self {
            Transpose::No => Transpose::Trans,
            Transpose::Trans => Transpose::No,
        }
    }
}

/// Matrix-vector products.
pub trait LinearOperator {
    fn nrows(&self) -> usize;
    fn ncols(&self) -> usize;

    /// `y = A x`, overwriting `y`.
    fn apply(&self, x: &[f64], y: &mut [f64]);

    /// `y = A^T x`, overwriting `y`.
    fn apply_transpose(&self, x: &[f64], y: &mut [f64]);

    /// `y = op(A) x`.
    fn apply_op(&self, trans: Transpose, x: &[f64], y: &mut [f64]) {
        match trans {
            Transpose::No => self.apply(x, y),
            Transpose::Trans => self.apply_transpose(x, y),
        }
    }
}

/// Linear solves with a square nonsingular matrix.
pub trait Invertible {
    fn dim(&self) -> usize;

    /// `sol = inv(A) rhs`.
    fn solve(&self, rhs: &[f64], sol: &mut [f64]);

    /// `sol = inv(A^T) rhs`.
    fn solve_transpose(&self, rhs: &[f64], sol: &mut [f64]);

    /// `sol = inv(op(A)) rhs`.
    fn solve_op(&self, trans: Transpose, rhs: &[f64], sol: &mut [f64]) {
        match trans {
            Transpose::No => self.solve(rhs, sol),
            Transpose::Trans => self.solve_transpose(rhs, sol),
        }
    }
}

impl LinearOperator for SparseCsc {
    fn nrows(&self) -> usize {
        self.rows()
    }

    fn ncols(&self) -> usize {
        self.cols()
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        spmv(self, x, y, 1.0, 0.0);
    }

    fn apply_transpose(&self, x: &[f64], y: &mut [f64]) {
        spmv_transpose(self, x, y, 1.0, 0.0);
    }
}

impl LinearOperator for DMatrix<f64> {
    fn nrows(&self) -> usize {
        self.nrows()
    }

    fn ncols(&self) -> usize {
        self.ncols()
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.ncols());
        assert_eq!(y.len(), self.nrows());
        y.fill(0.0);
        for (j, &xj) in x.iter().enumerate() {
            if xj != 0.0 {
                for (yi, aij) in y.iter_mut().zip(self.column(j).iter()) {
                    *yi += aij * xj;
                }
            }
        }
    }

    fn apply_transpose(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.nrows());
        assert_eq!(y.len(), self.ncols());
        for (j, yj) in y.iter_mut().enumerate() {
            *yj = self.column(j).iter().zip(x).map(|(a, b)| a * b).sum();
        }
    }
}

/// Build the dense matrix of `op(A)` column by column.
///
/// Meant for diagnostics and small test problems.
pub fn materialize<O: LinearOperator + ?Sized>(op: &O, trans: Transpose) -> DMatrix<f64> {
    let (rows, cols) = match trans {
        Transpose::No => (op.nrows(), op.ncols()),
        Transpose::Trans => (op.ncols(), op.nrows()),
    };
    let mut dense = DMatrix::zeros(rows, cols);
    let mut e = vec![0.0; cols];
    let mut col = vec![0.0; rows];
    for j in 0..cols {
        e[j] = 1.0;
        op.apply_op(trans, &e, &mut col);
        dense.column_mut(j).copy_from_slice(&col);
        e[j] = 0.0;
    }
    dense
}
