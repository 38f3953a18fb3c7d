//! Sparse LU backend with Markowitz pivoting.
//!
//! Analysis eliminates the whole (rectangular) input, choosing each pivot by
//! the Markowitz cost `(r_i - 1)(c_j - 1)` among the entries that pass the
//! columnwise threshold test `|a_ij| >= u * max_k |a_kj|`. Only the
//! sparsest `max_search` candidate columns are inspected per step, in the
//! style of MA28. The chosen pivot sequence becomes the row and column
//! permutations, so the leading block can later be refactored in natural
//! order without any search.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::{debug, trace};

use crate::linalg::backend::{
    threshold_for_attempt, AnalyzeHints, Analysis, DirectSparseSolver, SolverError,
};
use crate::linalg::basis_matrix::BasisMatrix;
use crate::linalg::operator::Transpose;
use crate::linalg::permutation::Permutation;
use crate::linalg::sparse::{max_abs, select, SparseCsc};

#[derive(Debug, Clone)]
pub struct MarkowitzLuSolver {
    /// Relative pivot threshold `u` in `(0, 1]`.
    pub pivot_threshold: f64,
    /// Entries at or below `rank_tol * max|A|` are never pivots.
    pub rank_tol: f64,
    /// Refactor pivots at or below `refactor_tol * max|B|` are singular.
    pub refactor_tol: f64,
    /// Number of eligible columns inspected per pivot search.
    pub max_search: usize,
}

impl Default for MarkowitzLuSolver {
    fn default() -> Self {
        Self {
            pivot_threshold: 0.1,
            rank_tol: 1e-10,
            refactor_tol: 1e-13,
            max_search: 4,
        }
    }
}

/// Pivot sequence metadata of an analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkowitzStructure {
    pub dim: usize,
    /// Nonzeros of the leading block at analysis time.
    pub nnz_block: usize,
    /// Nonzeros of `L` and `U` at analysis time, diagonal included.
    pub nnz_factors: usize,
}

/// `L` by columns (unit diagonal implied), `U` by rows with its diagonal
/// kept apart.
#[derive(Debug, Clone)]
pub struct MarkowitzFactors {
    l_cols: Vec<Vec<(usize, f64)>>,
    u_rows: Vec<Vec<(usize, f64)>>,
    u_diag: Vec<f64>,
}

impl MarkowitzFactors {
    pub fn nnz(&self) -> usize {
        self.u_diag.len()
            + self.l_cols.iter().map(Vec::len).sum::<usize>()
            + self.u_rows.iter().map(Vec::len).sum::<usize>()
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    row: usize,
    col: usize,
    preferred: bool,
    cost: usize,
    magnitude: f64,
}

impl Candidate {
    fn beats(&self, other: &Candidate) -> bool {
        if self.preferred != other.preferred {
            return self.preferred;
        }
        if self.cost != other.cost {
            return self.cost < other.cost;
        }
        self.magnitude > other.magnitude
    }
}

/// Active submatrix during analysis: rows hold values, columns only the
/// row pattern.
struct ActiveMatrix {
    rows: Vec<BTreeMap<usize, f64>>,
    cols: Vec<BTreeSet<usize>>,
}

impl ActiveMatrix {
    fn from_csc(a: &SparseCsc) -> Self {
        let mut rows = vec![BTreeMap::new(); a.rows()];
        let mut cols = vec![BTreeSet::new(); a.cols()];
        for (&v, (i, j)) in a.iter() {
            if v != 0.0 {
                *rows[i].entry(j).or_insert(0.0) += v;
                cols[j].insert(i);
            }
        }
        Self { rows, cols }
    }

    fn value(&self, i: usize, j: usize) -> f64 {
        self.rows[i].get(&j).copied().unwrap_or(0.0)
    }

    fn search(
        &self,
        u: f64,
        abs_tol: f64,
        hints: &AnalyzeHints<'_>,
        limit: usize,
    ) -> Option<Candidate> {
        let mut order: Vec<usize> = (0..self.cols.len())
            .filter(|&j| !self.cols[j].is_empty())
            .collect();
        order.sort_by_key(|&j| (self.cols[j].len(), j));

        let mut best: Option<Candidate> = None;
        let mut searched = 0;
        for j in order {
            let colmax = self.cols[j]
                .iter()
                .fold(0.0_f64, |acc, &i| acc.max(self.value(i, j).abs()));
            if colmax <= abs_tol {
                continue;
            }
            let col_cost = self.cols[j].len() - 1;
            let mut eligible = false;
            for &i in &self.cols[j] {
                let magnitude = self.value(i, j).abs();
                if magnitude < u * colmax || magnitude <= abs_tol {
                    continue;
                }
                eligible = true;
                let cand = Candidate {
                    row: i,
                    col: j,
                    preferred: hints.is_preferred(i),
                    cost: (self.rows[i].len() - 1) * col_cost,
                    magnitude,
                };
                if best.map_or(true, |b| cand.beats(&b)) {
                    best = Some(cand);
                }
            }
            if eligible {
                searched += 1;
                if searched >= limit {
                    break;
                }
            }
        }
        best
    }

    /// Eliminate with pivot `(p, q)` and drop row `p` and column `q`.
    fn eliminate(&mut self, p: usize, q: usize) {
        let pivot_row = std::mem::take(&mut self.rows[p]);
        let apq = pivot_row.get(&q).copied().unwrap_or(0.0);
        for &j in pivot_row.keys() {
            self.cols[j].remove(&p);
        }

        for i in std::mem::take(&mut self.cols[q]) {
            let l = self.rows[i].remove(&q).unwrap_or(0.0) / apq;
            if l == 0.0 {
                continue;
            }
            for (&j, &v) in pivot_row.iter().filter(|&(&j, _)| j != q) {
                let updated = self.value(i, j) - l * v;
                if updated == 0.0 {
                    self.rows[i].remove(&j);
                    self.cols[j].remove(&i);
                } else {
                    self.rows[i].insert(j, updated);
                    self.cols[j].insert(i);
                }
            }
        }
    }
}

/// Pivot order followed by the untouched indices in ascending order.
fn complete_order(mut order: Vec<usize>, n: usize) -> Permutation {
    let mut used = vec![false; n];
    for &i in &order {
        used[i] = true;
    }
    order.extend((0..n).filter(|&i| !used[i]));
    Permutation::from_bijection(order)
}

impl MarkowitzLuSolver {
    pub fn new(pivot_threshold: f64, rank_tol: f64, refactor_tol: f64, max_search: usize) -> Self {
        Self {
            pivot_threshold,
            rank_tol,
            refactor_tol,
            max_search,
        }
    }

    /// Right-looking LU of a square block in natural pivot order.
    fn factor_block(&self, block: &SparseCsc) -> Result<MarkowitzFactors, SolverError> {
        let dim = block.rows();
        let tol = self.refactor_tol * max_abs(block);
        let mut active = ActiveMatrix::from_csc(block);

        let mut l_cols = Vec::with_capacity(dim);
        let mut u_rows = Vec::with_capacity(dim);
        let mut u_diag = Vec::with_capacity(dim);

        for k in 0..dim {
            let mut row_k = std::mem::take(&mut active.rows[k]);
            let ukk = row_k.remove(&k).unwrap_or(0.0);
            if !(ukk.abs() > tol) {
                return Err(SolverError::NumericallySingular {
                    pivot: k,
                    value: ukk.abs(),
                });
            }

            let mut l_k = Vec::new();
            let below: Vec<usize> = std::mem::take(&mut active.cols[k])
                .into_iter()
                .filter(|&i| i > k)
                .collect();
            for i in below {
                let l = active.rows[i].remove(&k).unwrap_or(0.0) / ukk;
                if l == 0.0 {
                    continue;
                }
                l_k.push((i, l));
                for (&j, &v) in &row_k {
                    let updated = active.value(i, j) - l * v;
                    if updated == 0.0 {
                        active.rows[i].remove(&j);
                    } else {
                        active.rows[i].insert(j, updated);
                        active.cols[j].insert(i);
                    }
                }
            }

            l_cols.push(l_k);
            u_rows.push(row_k.into_iter().collect());
            u_diag.push(ukk);
        }

        Ok(MarkowitzFactors {
            l_cols,
            u_rows,
            u_diag,
        })
    }
}

impl DirectSparseSolver for MarkowitzLuSolver {
    type Structure = MarkowitzStructure;
    type Nonzeros = MarkowitzFactors;

    fn name(&self) -> &'static str {
        "markowitz-lu"
    }

    fn analyze_and_factor(
        &mut self,
        a: &SparseCsc,
        hints: &AnalyzeHints<'_>,
    ) -> Result<Analysis<Self>, SolverError> {
        let (m, n) = (a.rows(), a.cols());
        let u = threshold_for_attempt(self.pivot_threshold, hints.attempt);
        let abs_tol = self.rank_tol * max_abs(a);
        let mut active = ActiveMatrix::from_csc(a);

        let mut row_order = Vec::new();
        let mut col_order = Vec::new();
        while row_order.len() < m.min(n) {
            // Widen to a full search before declaring the rest rank deficient.
            let pivot = active
                .search(u, abs_tol, hints, self.max_search.max(1))
                .or_else(|| active.search(u, abs_tol, hints, usize::MAX));
            let Some(c) = pivot else { break };
            trace!(
                "markowitz pivot {}: ({}, {}) cost {} |a| {:.3e}",
                row_order.len(),
                c.row,
                c.col,
                c.cost,
                c.magnitude
            );
            active.eliminate(c.row, c.col);
            row_order.push(c.row);
            col_order.push(c.col);
        }

        let rank = row_order.len();
        if rank < hints.required_rank {
            debug!(
                "markowitz analysis: rank {} below required {} (u = {:.1e})",
                rank, hints.required_rank, u
            );
            return Err(SolverError::SingularBasis {
                rank,
                required: hints.required_rank,
            });
        }

        let row_perm = complete_order(row_order, m);
        let col_perm = complete_order(col_order, n);
        let block = select(a, &row_perm.as_slice()[..rank], &col_perm.as_slice()[..rank]);
        let factors = self.factor_block(&block)?;
        let structure = MarkowitzStructure {
            dim: rank,
            nnz_block: block.nnz(),
            nnz_factors: factors.nnz(),
        };
        debug!(
            "markowitz analysis: {}x{} input, rank {}, block nnz {}, factor nnz {}",
            m, n, rank, structure.nnz_block, structure.nnz_factors
        );

        Ok(Analysis {
            row_perm,
            col_perm,
            rank,
            basis: BasisMatrix::new(rank, Arc::new(structure), factors),
        })
    }

    fn factor(
        &mut self,
        block: &SparseCsc,
        structure: &Arc<MarkowitzStructure>,
    ) -> Result<BasisMatrix<Self>, SolverError> {
        if block.rows() != structure.dim || block.cols() != structure.dim {
            return Err(SolverError::DimensionMismatch {
                expected: structure.dim,
                actual: block.rows().max(block.cols()),
            });
        }
        let factors = self.factor_block(block)?;
        Ok(BasisMatrix::new(structure.dim, Arc::clone(structure), factors))
    }

    fn solve(
        _structure: &MarkowitzStructure,
        f: &MarkowitzFactors,
        rhs: &mut [f64],
        trans: Transpose,
    ) {
        let dim = f.u_diag.len();
        match trans {
            Transpose::No => {
                for k in 0..dim {
                    let xk = rhs[k];
                    for &(i, l) in &f.l_cols[k] {
                        rhs[i] -= l * xk;
                    }
                }
                for k in (0..dim).rev() {
                    let s = f.u_rows[k].iter().fold(rhs[k], |s, &(j, u)| s - u * rhs[j]);
                    rhs[k] = s / f.u_diag[k];
                }
            }
            Transpose::Trans => {
                for k in 0..dim {
                    rhs[k] /= f.u_diag[k];
                    let xk = rhs[k];
                    for &(j, u) in &f.u_rows[k] {
                        rhs[j] -= u * xk;
                    }
                }
                for k in (0..dim).rev() {
                    let s = f.l_cols[k].iter().fold(rhs[k], |s, &(i, l)| s - l * rhs[i]);
                    rhs[k] = s;
                }
            }
        }
    }
}
