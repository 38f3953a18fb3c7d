//! Direct sparse solver contract.
//!
//! A backend turns a (possibly rectangular) sparse matrix into row/column
//! permutations that expose a nonsingular leading block, and factors that
//! block. The symbolic half of the result ([`DirectSparseSolver::Structure`])
//! is immutable and shared through an `Arc` so later numeric refactors can
//! reuse it; the numeric half lives in exactly one [`BasisMatrix`].

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::basis_matrix::BasisMatrix;
use super::operator::Transpose;
use super::permutation::Permutation;
use super::sparse::SparseCsc;

/// Direct solver errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SolverError {
    /// No nonsingular block of the requested size was found
    #[error("singular basis: found rank {rank}, required {required}")]
    SingularBasis { rank: usize, required: usize },

    /// The fixed pivot sequence broke down for the current values
    #[error("numerically singular basis: pivot {pivot} has magnitude {value:e}")]
    NumericallySingular { pivot: usize, value: f64 },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Structure produced by one backend handed to another
    #[error("backend mismatch: solver is {expected}, structure came from {actual}")]
    BackendMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

/// Guidance for [`DirectSparseSolver::analyze_and_factor`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyzeHints<'a> {
    /// Fail with `SingularBasis` if fewer pivots than this are found.
    pub required_rank: usize,
    /// Rows that should land in the leading block when there is a choice.
    pub preferred_rows: Option<&'a [bool]>,
    /// Zero-based retry counter; later attempts pivot more conservatively.
    pub attempt: usize,
}

impl<'a> AnalyzeHints<'a> {
    pub fn with_rank(required_rank: usize) -> Self {
        Self {
            required_rank,
            ..Self::default()
        }
    }

    pub(crate) fn is_preferred(&self, row: usize) -> bool {
        self.preferred_rows
            .and_then(|p| p.get(row).copied())
            .unwrap_or(false)
    }
}

/// Result of a full analysis: `A(row_perm, col_perm)` has a nonsingular
/// leading `rank x rank` block, factored in `basis`.
#[derive(Debug)]
pub struct Analysis<S: DirectSparseSolver> {
    pub row_perm: Permutation,
    pub col_perm: Permutation,
    pub rank: usize,
    pub basis: BasisMatrix<S>,
}

/// Pluggable direct solver used to pick and factor the basis block.
pub trait DirectSparseSolver: Sized {
    /// Pivot order and sparsity metadata, reusable across refactors.
    type Structure: fmt::Debug;
    /// Numeric factors bound to a `Structure`.
    type Nonzeros: fmt::Debug;

    fn name(&self) -> &'static str;

    /// Whether a stricter pivot threshold on a later attempt can turn a
    /// `SingularBasis` analysis into a successful one.
    fn threshold_affects_rank(&self) -> bool {
        true
    }

    /// Choose permutations and factor the leading block of `a`.
    fn analyze_and_factor(
        &mut self,
        a: &SparseCsc,
        hints: &AnalyzeHints<'_>,
    ) -> Result<Analysis<Self>, SolverError>;

    /// Refactor a square block that has already been permuted with the
    /// permutations returned by the analysis that produced `structure`.
    fn factor(
        &mut self,
        block: &SparseCsc,
        structure: &Arc<Self::Structure>,
    ) -> Result<BasisMatrix<Self>, SolverError>;

    /// Overwrite `rhs` with `inv(op(B)) rhs` for the factored block `B`.
    fn solve(
        structure: &Self::Structure,
        nonzeros: &Self::Nonzeros,
        rhs: &mut [f64],
        trans: Transpose,
    );
}

/// Pivot threshold for a retry: the base value on the first attempt, then
/// ten times stricter per retry, capped at 1 (pure partial pivoting).
pub fn threshold_for_attempt(u: f64, attempt: usize) -> f64 {
    if attempt == 0 {
        u
    } else {
        (u * 10f64.powi(attempt as i32)).min(1.0)
    }
}
