//! Factored basis block.

use std::fmt;
use std::sync::Arc;

use super::backend::DirectSparseSolver;
use super::operator::{Invertible, Transpose};

/// A factored square block together with the structure it was built from.
///
/// Backends create these from one analysis, so the structure and the numeric
/// factors belong together. Pairing parts from different analyses by hand is
/// not detected here; [`AnyDirectSolver`](super::backends::AnyDirectSolver)
/// answers such a mix with NaN.
pub struct BasisMatrix<S: DirectSparseSolver> {
    dim: usize,
    structure: Arc<S::Structure>,
    nonzeros: S::Nonzeros,
}

impl<S: DirectSparseSolver> BasisMatrix<S> {
    pub fn new(dim: usize, structure: Arc<S::Structure>, nonzeros: S::Nonzeros) -> Self {
        Self {
            dim,
            structure,
            nonzeros,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn structure(&self) -> &Arc<S::Structure> {
        &self.structure
    }

    pub fn nonzeros(&self) -> &S::Nonzeros {
        &self.nonzeros
    }

    pub fn into_parts(self) -> (usize, Arc<S::Structure>, S::Nonzeros) {
        (self.dim, self.structure, self.nonzeros)
    }

    /// Overwrite `x` with `inv(op(B)) x`.
    pub fn solve_in_place(&self, x: &mut [f64], trans: Transpose) {
        assert_eq!(x.len(), self.dim, "basis solve: rhs length");
        S::solve(&self.structure, &self.nonzeros, x, trans);
    }
}

impl<S: DirectSparseSolver> Invertible for BasisMatrix<S> {
    fn dim(&self) -> usize {
        self.dim
    }

    fn solve(&self, rhs: &[f64], sol: &mut [f64]) {
        sol.copy_from_slice(rhs);
        self.solve_in_place(sol, Transpose::No);
    }

    fn solve_transpose(&self, rhs: &[f64], sol: &mut [f64]) {
        sol.copy_from_slice(rhs);
        self.solve_in_place(sol, Transpose::Trans);
    }
}

impl<S: DirectSparseSolver> fmt::Debug for BasisMatrix<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasisMatrix")
            .field("dim", &self.dim)
            .field("structure", &self.structure)
            .finish_non_exhaustive()
    }
}
