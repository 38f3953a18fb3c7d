//! Dense LU backend.
//!
//! Analysis runs threshold complete pivoting on a dense copy of the input,
//! which is robust at finding a well-conditioned leading block but costs
//! O(m n r). Numeric refactors use plain partial-pivoting LU of the block.
//! Meant for small problems and as a reference for the sparse backend.

use std::sync::Arc;

use log::debug;

use crate::linalg::backend::{
    threshold_for_attempt, AnalyzeHints, Analysis, DirectSparseSolver, SolverError,
};
use crate::linalg::basis_matrix::BasisMatrix;
use crate::linalg::dense_lu::DenseLu;
use crate::linalg::operator::Transpose;
use crate::linalg::permutation::Permutation;
use crate::linalg::sparse::{max_abs, to_dense, SparseCsc};

/// Dense complete-pivoting LU.
#[derive(Debug, Clone)]
pub struct DenseLuSolver {
    /// Relative pivot threshold `u` in `(0, 1]`.
    pub pivot_threshold: f64,
    /// Pivots at or below `rank_tol * max|A|` count as zero.
    pub rank_tol: f64,
    /// Refactor pivots at or below `refactor_tol * max|B|` are singular.
    pub refactor_tol: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseStructure {
    pub dim: usize,
}

impl Default for DenseLuSolver {
    fn default() -> Self {
        Self {
            pivot_threshold: 0.1,
            rank_tol: 1e-10,
            refactor_tol: 1e-13,
        }
    }
}

impl DenseLuSolver {
    pub fn new(pivot_threshold: f64, rank_tol: f64, refactor_tol: f64) -> Self {
        Self {
            pivot_threshold,
            rank_tol,
            refactor_tol,
        }
    }
}

impl DirectSparseSolver for DenseLuSolver {
    type Structure = DenseStructure;
    type Nonzeros = DenseLu;

    fn name(&self) -> &'static str {
        "dense-lu"
    }

    /// Complete pivoting always accepts the largest remaining entry, so the
    /// rank found depends on `rank_tol` only.
    fn threshold_affects_rank(&self) -> bool {
        false
    }

    fn analyze_and_factor(
        &mut self,
        a: &SparseCsc,
        hints: &AnalyzeHints<'_>,
    ) -> Result<Analysis<Self>, SolverError> {
        let (m, n) = (a.rows(), a.cols());
        let u = threshold_for_attempt(self.pivot_threshold, hints.attempt);
        let abs_tol = self.rank_tol * max_abs(a);

        let mut w = to_dense(a);
        let mut rows: Vec<usize> = (0..m).collect();
        let mut cols: Vec<usize> = (0..n).collect();

        let mut rank = 0;
        for k in 0..m.min(n) {
            let mut pmax = 0.0_f64;
            for j in k..n {
                for i in k..m {
                    pmax = pmax.max(w[(i, j)].abs());
                }
            }
            if pmax <= abs_tol || pmax == 0.0 {
                break;
            }

            // Among entries within the threshold, prefer hinted rows, then size.
            let mut best: Option<(bool, f64, usize, usize)> = None;
            for j in k..n {
                for i in k..m {
                    let v = w[(i, j)].abs();
                    if v < u * pmax {
                        continue;
                    }
                    let pref = hints.is_preferred(rows[i]);
                    let better = match best {
                        None => true,
                        Some((bp, bv, _, _)) => (pref && !bp) || (pref == bp && v > bv),
                    };
                    if better {
                        best = Some((pref, v, i, j));
                    }
                }
            }
            let Some((_, _, p, q)) = best else { break };

            w.swap_rows(k, p);
            rows.swap(k, p);
            w.swap_columns(k, q);
            cols.swap(k, q);

            let wkk = w[(k, k)];
            for i in (k + 1)..m {
                let l = w[(i, k)] / wkk;
                w[(i, k)] = l;
                if l != 0.0 {
                    for j in (k + 1)..n {
                        let wkj = w[(k, j)];
                        w[(i, j)] -= l * wkj;
                    }
                }
            }
            rank = k + 1;
        }

        debug!(
            "dense-lu analysis: {}x{} input, rank {} (required {}), u = {:.1e}",
            m, n, rank, hints.required_rank, u
        );

        if rank < hints.required_rank {
            return Err(SolverError::SingularBasis {
                rank,
                required: hints.required_rank,
            });
        }

        let lu = DenseLu::from_parts(w.view((0, 0), (rank, rank)).into_owned(), (0..rank).collect());
        Ok(Analysis {
            row_perm: Permutation::from_bijection(rows),
            col_perm: Permutation::from_bijection(cols),
            rank,
            basis: BasisMatrix::new(rank, Arc::new(DenseStructure { dim: rank }), lu),
        })
    }

    fn factor(
        &mut self,
        block: &SparseCsc,
        structure: &Arc<DenseStructure>,
    ) -> Result<BasisMatrix<Self>, SolverError> {
        let dim = structure.dim;
        if block.rows() != dim || block.cols() != dim {
            return Err(SolverError::DimensionMismatch {
                expected: dim,
                actual: block.rows().max(block.cols()),
            });
        }
        let tol = self.refactor_tol * max_abs(block);
        let lu = DenseLu::factor(to_dense(block), tol)?;
        Ok(BasisMatrix::new(dim, Arc::clone(structure), lu))
    }

    fn solve(_structure: &DenseStructure, lu: &DenseLu, rhs: &mut [f64], trans: Transpose) {
        match trans {
            Transpose::No => lu.solve_in_place(rhs),
            Transpose::Trans => lu.solve_transpose_in_place(rhs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::operator::Invertible;
    use crate::linalg::sparse::{from_triplets, select};

    #[test]
    fn test_rectangular_analysis_finds_full_rank() {
        // 4x2, first row is zero, rows 1 and 3 are parallel
        let a = from_triplets(
            4,
            2,
            vec![(1, 0, 1.0), (1, 1, 2.0), (2, 0, 3.0), (2, 1, 1.0), (3, 0, 2.0), (3, 1, 4.0)],
        );
        let mut solver = DenseLuSolver::default();
        let an = solver.analyze_and_factor(&a, &AnalyzeHints::with_rank(2)).unwrap();

        assert_eq!(an.rank, 2);
        let lead = &an.row_perm.as_slice()[..2];
        assert!(!lead.contains(&0));

        // The factored block solves against the permuted leading block.
        let block = select(&a, lead, &an.col_perm.as_slice()[..2]);
        let dense = to_dense(&block);
        let mut x = [0.0; 2];
        an.basis.solve(&[1.0, 1.0], &mut x);
        let r = &dense * nalgebra::DVector::from_column_slice(&x);
        assert!((r[0] - 1.0).abs() < 1e-12 && (r[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rank_deficiency_is_reported() {
        let a = from_triplets(2, 2, vec![(0, 0, 1.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 1.0)]);
        let mut solver = DenseLuSolver::default();
        match solver.analyze_and_factor(&a, &AnalyzeHints::with_rank(2)) {
            Err(SolverError::SingularBasis { rank, required }) => {
                assert_eq!((rank, required), (1, 2));
            }
            other => panic!("expected SingularBasis, got {other:?}"),
        }
    }

    #[test]
    fn test_preferred_rows_enter_the_block() {
        // Every row has the same magnitude; the hint decides.
        let a = from_triplets(3, 1, vec![(0, 0, 1.0), (1, 0, 1.0), (2, 0, 1.0)]);
        let prefs = [false, false, true];
        let hints = AnalyzeHints {
            required_rank: 1,
            preferred_rows: Some(&prefs),
            attempt: 0,
        };
        let an = DenseLuSolver::default().analyze_and_factor(&a, &hints).unwrap();
        assert_eq!(an.row_perm.old_index(0), 2);
    }

    #[test]
    fn test_refactor_rejects_wrong_size() {
        let mut solver = DenseLuSolver::default();
        let an = solver
            .analyze_and_factor(&crate::linalg::sparse::identity(2), &AnalyzeHints::with_rank(2))
            .unwrap();
        let err = solver
            .factor(&crate::linalg::sparse::identity(3), an.basis.structure())
            .unwrap_err();
        assert_eq!(err, SolverError::DimensionMismatch { expected: 2, actual: 3 });
    }
}
