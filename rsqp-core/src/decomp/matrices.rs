//! A published decomposition and the operator views derived from it.
//!
//! All views borrow the [`Decomposition`] they come from and act on vectors
//! in the permuted ordering of its [`Partition`]:
//!
//! ```text
//! C = Gc(var_dep, equ_decomp)^T          r x r
//! N = Gc(var_indep, equ_decomp)^T        r x (n-r)
//! D = -inv(C) N                          r x (n-r)
//! Z = [D; I]                             n x (n-r)
//! Y = [I; 0]      (coordinate)           n x r
//! Y = [I; -D^T]   (orthogonal)
//! R = Gc(:, equ_decomp)^T Y              r x r
//! Uy = Gc(:, equ_undecomp)^T Y           (m-r) x r
//! Uz = Gc(:, equ_undecomp)^T Z           (m-r) x (n-r)
//! ```

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

use crate::error::{DecompError, DecompResult};
use crate::linalg::backend::DirectSparseSolver;
use crate::linalg::backends::AnyDirectSolver;
use crate::linalg::basis_matrix::BasisMatrix;
use crate::linalg::operator::{Invertible, LinearOperator, Transpose};
use crate::linalg::sparse::{norm_inf, spmv, spmv_transpose, transpose, SparseCsc};
use crate::settings::{DecompSettings, DecompositionKind, Explicitness};

use super::partition::Partition;

/// Everything derived from one basis choice, published atomically.
#[derive(Debug)]
pub struct Decomposition<S: DirectSparseSolver = AnyDirectSolver> {
    partition: Partition,
    num_basis: usize,
    /// Factors `C^T`.
    basis: BasisMatrix<S>,
    /// `C^T` values, for products with `C`.
    c_t: SparseCsc,
    n_mat: SparseCsc,
    sens: StoredSensitivity,
    /// `Gc(:, equ_undecomp)` with permuted rows, when `r < m`.
    gc_undecomp: Option<SparseCsc>,
}

/// How `D` is held; the orthogonal kind always holds it explicitly.
#[derive(Debug)]
enum StoredSensitivity {
    Implicit,
    Explicit(DMatrix<f64>),
    Orthogonal {
        d: DMatrix<f64>,
        /// Cholesky of `S = I + D^T D`, `None` when `D` has no columns.
        s_chol: Option<Cholesky<f64, Dyn>>,
    },
}

impl<S: DirectSparseSolver> Decomposition<S> {
    pub(crate) fn build(
        partition: Partition,
        basis: BasisMatrix<S>,
        gc: &SparseCsc,
        settings: &DecompSettings,
        num_basis: usize,
    ) -> DecompResult<Self> {
        let r = partition.rank();
        if basis.dim() != r {
            return Err(DecompError::DimensionMismatch {
                what: "basis factorization",
                expected: r,
                actual: basis.dim(),
            });
        }

        let c_t = partition.basis_block(gc);
        let n_mat = transpose(&partition.nonbasis_block(gc));
        let gc_undecomp = (r < partition.m()).then(|| partition.undecomposed_block(gc));

        let sens = match (settings.kind, settings.d_matrix) {
            (DecompositionKind::Coordinate, Explicitness::Implicit) => StoredSensitivity::Implicit,
            (DecompositionKind::Coordinate, Explicitness::Explicit) => {
                StoredSensitivity::Explicit(form_d(&basis, &n_mat))
            }
            (DecompositionKind::Orthogonal, _) => {
                let d = form_d(&basis, &n_mat);
                let s_chol = if d.ncols() > 0 {
                    let mut s = d.transpose() * &d;
                    for i in 0..s.nrows() {
                        s[(i, i)] += 1.0;
                    }
                    let chol =
                        Cholesky::new(s).ok_or_else(|| DecompError::NumericallySingular {
                            pivot: r,
                            value: d.amax(),
                        })?;
                    Some(chol)
                } else {
                    None
                };
                StoredSensitivity::Orthogonal { d, s_chol }
            }
        };

        Ok(Self {
            partition,
            num_basis,
            basis,
            c_t,
            n_mat,
            sens,
            gc_undecomp,
        })
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn kind(&self) -> DecompositionKind {
        match self.sens {
            StoredSensitivity::Orthogonal { .. } => DecompositionKind::Orthogonal,
            _ => DecompositionKind::Coordinate,
        }
    }

    /// Generation of the basis this decomposition belongs to.
    pub fn num_basis(&self) -> usize {
        self.num_basis
    }

    pub fn rank(&self) -> usize {
        self.partition.rank()
    }

    pub fn basis(&self) -> &BasisMatrix<S> {
        &self.basis
    }

    pub fn c(&self) -> BasisOperator<'_, S> {
        BasisOperator {
            c_t: &self.c_t,
            basis: &self.basis,
        }
    }

    pub fn n(&self) -> &SparseCsc {
        &self.n_mat
    }

    pub fn d(&self) -> Sensitivity<'_, S> {
        match self.d_explicit() {
            Some(d) => Sensitivity::Explicit(d),
            None => Sensitivity::Implicit {
                c: self.c(),
                n: &self.n_mat,
            },
        }
    }

    /// The explicit `D`, if it was formed.
    pub fn d_explicit(&self) -> Option<&DMatrix<f64>> {
        match &self.sens {
            StoredSensitivity::Implicit => None,
            StoredSensitivity::Explicit(d) | StoredSensitivity::Orthogonal { d, .. } => Some(d),
        }
    }

    pub fn z(&self) -> NullSpace<'_, S> {
        NullSpace { d: self.d() }
    }

    pub fn y(&self) -> RangeSpace<'_> {
        match &self.sens {
            StoredSensitivity::Orthogonal { d, .. } => RangeSpace::Orthogonal { d },
            _ => RangeSpace::Coordinate {
                n: self.partition.n(),
                r: self.rank(),
            },
        }
    }

    pub fn r(&self) -> RangeOperator<'_, S> {
        let ortho = match &self.sens {
            StoredSensitivity::Orthogonal { d, s_chol } => Some(Woodbury {
                d,
                s_chol: s_chol.as_ref(),
            }),
            _ => None,
        };
        RangeOperator { c: self.c(), ortho }
    }

    /// `Uy`, present only when some equations are undecomposed.
    pub fn uy(&self) -> Option<Projected<'_, RangeSpace<'_>>> {
        self.gc_undecomp.as_ref().map(|gu| Projected { gu, basis: self.y() })
    }

    /// `Uz`, present only when some equations are undecomposed.
    pub fn uz(&self) -> Option<Projected<'_, NullSpace<'_, S>>> {
        self.gc_undecomp.as_ref().map(|gu| Projected { gu, basis: self.z() })
    }

    /// `c(equ_decomp)` in permuted order, from `c` in caller order.
    pub fn decomposed_residual(&self, c: &[f64]) -> DecompResult<Vec<f64>> {
        if c.len() != self.partition.m() {
            return Err(DecompError::DimensionMismatch {
                what: "constraint residual",
                expected: self.partition.m(),
                actual: c.len(),
            });
        }
        Ok(self.partition.decomp_equs().iter().map(|&j| c[j]).collect())
    }

    /// Quasi-normal step `py = -inv(R) c(equ_decomp)`, with `c` in caller
    /// order.
    pub fn quasi_normal_step(&self, c: &[f64]) -> DecompResult<Vec<f64>> {
        let c_d = self.decomposed_residual(c)?;
        let mut py = vec![0.0; c_d.len()];
        self.r().solve(&c_d, &mut py);
        py.iter_mut().for_each(|v| *v = -*v);
        Ok(py)
    }

    /// `R py + c(equ_decomp)`, the residual of the range-space solve.
    pub fn range_residual(&self, py: &[f64], c: &[f64]) -> DecompResult<Vec<f64>> {
        let mut res = self.decomposed_residual(c)?;
        self.check_step(py)?;
        let mut r_py = vec![0.0; res.len()];
        self.r().apply(py, &mut r_py);
        for (ri, v) in res.iter_mut().zip(&r_py) {
            *ri += v;
        }
        Ok(res)
    }

    /// Full-space range step `Y py`, returned in caller variable order.
    pub fn range_space_step(&self, py: &[f64]) -> DecompResult<Vec<f64>> {
        self.check_step(py)?;
        let mut y_py = vec![0.0; self.partition.n()];
        self.y().apply(py, &mut y_py);
        Ok(self.partition.unpermute_vars(&y_py))
    }

    /// `py` must have one entry per decomposed equation.
    pub(crate) fn check_step(&self, py: &[f64]) -> DecompResult<()> {
        if py.len() != self.rank() {
            return Err(DecompError::DimensionMismatch {
                what: "quasi-normal step",
                expected: self.rank(),
                actual: py.len(),
            });
        }
        Ok(())
    }
}

/// Explicit `D = -inv(C) N`, one basis solve per column of `N`.
fn form_d<S: DirectSparseSolver>(basis: &BasisMatrix<S>, n_mat: &SparseCsc) -> DMatrix<f64> {
    let r = n_mat.rows();
    let mut d = DMatrix::zeros(r, n_mat.cols());
    let mut col = vec![0.0; r];
    for (j, n_col) in n_mat.outer_iterator().enumerate() {
        col.fill(0.0);
        for (i, &v) in n_col.iter() {
            col[i] = v;
        }
        if norm_inf(&col) == 0.0 {
            continue;
        }
        // C = B^T for the factored block B.
        basis.solve_in_place(&mut col, Transpose::Trans);
        for (i, v) in col.iter().enumerate() {
            d[(i, j)] = -v;
        }
    }
    d
}

/// `C` with products through `C^T` values and solves through the factors.
#[derive(Debug)]
pub struct BasisOperator<'a, S: DirectSparseSolver> {
    c_t: &'a SparseCsc,
    basis: &'a BasisMatrix<S>,
}

impl<S: DirectSparseSolver> LinearOperator for BasisOperator<'_, S> {
    fn nrows(&self) -> usize {
        self.basis.dim()
    }

    fn ncols(&self) -> usize {
        self.basis.dim()
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        spmv_transpose(self.c_t, x, y, 1.0, 0.0);
    }

    fn apply_transpose(&self, x: &[f64], y: &mut [f64]) {
        spmv(self.c_t, x, y, 1.0, 0.0);
    }
}

impl<S: DirectSparseSolver> Invertible for BasisOperator<'_, S> {
    fn dim(&self) -> usize {
        self.basis.dim()
    }

    fn solve(&self, rhs: &[f64], sol: &mut [f64]) {
        sol.copy_from_slice(rhs);
        self.basis.solve_in_place(sol, Transpose::Trans);
    }

    fn solve_transpose(&self, rhs: &[f64], sol: &mut [f64]) {
        sol.copy_from_slice(rhs);
        self.basis.solve_in_place(sol, Transpose::No);
    }
}

/// `D`, either formed or applied as `-inv(C) N`.
#[derive(Debug)]
pub enum Sensitivity<'a, S: DirectSparseSolver> {
    Explicit(&'a DMatrix<f64>),
    Implicit {
        c: BasisOperator<'a, S>,
        n: &'a SparseCsc,
    },
}

impl<S: DirectSparseSolver> LinearOperator for Sensitivity<'_, S> {
    fn nrows(&self) -> usize {
        match self {
            Sensitivity::Explicit(d) => d.nrows(),
            Sensitivity::Implicit { n, .. } => n.rows(),
        }
    }

    fn ncols(&self) -> usize {
        match self {
            Sensitivity::Explicit(d) => d.ncols(),
            Sensitivity::Implicit { n, .. } => n.cols(),
        }
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        match self {
            Sensitivity::Explicit(d) => LinearOperator::apply(*d, x, y),
            Sensitivity::Implicit { c, n } => {
                let mut t = vec![0.0; n.rows()];
                spmv(n, x, &mut t, -1.0, 0.0);
                c.solve(&t, y);
            }
        }
    }

    fn apply_transpose(&self, x: &[f64], y: &mut [f64]) {
        match self {
            Sensitivity::Explicit(d) => LinearOperator::apply_transpose(*d, x, y),
            Sensitivity::Implicit { c, n } => {
                let mut t = vec![0.0; x.len()];
                c.solve_transpose(x, &mut t);
                spmv_transpose(n, &t, y, -1.0, 0.0);
            }
        }
    }
}

/// `Z = [D; I]`.
#[derive(Debug)]
pub struct NullSpace<'a, S: DirectSparseSolver> {
    d: Sensitivity<'a, S>,
}

impl<S: DirectSparseSolver> LinearOperator for NullSpace<'_, S> {
    fn nrows(&self) -> usize {
        self.d.nrows() + self.d.ncols()
    }

    fn ncols(&self) -> usize {
        self.d.ncols()
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        let r = self.d.nrows();
        let (dep, indep) = y.split_at_mut(r);
        self.d.apply(x, dep);
        indep.copy_from_slice(x);
    }

    fn apply_transpose(&self, x: &[f64], y: &mut [f64]) {
        let r = self.d.nrows();
        self.d.apply_transpose(&x[..r], y);
        for (yi, xi) in y.iter_mut().zip(&x[r..]) {
            *yi += xi;
        }
    }
}

/// Range-space basis `Y`.
#[derive(Debug, Clone, Copy)]
pub enum RangeSpace<'a> {
    /// `[I; 0]`
    Coordinate { n: usize, r: usize },
    /// `[I; -D^T]`
    Orthogonal { d: &'a DMatrix<f64> },
}

impl LinearOperator for RangeSpace<'_> {
    fn nrows(&self) -> usize {
        match self {
            RangeSpace::Coordinate { n, .. } => *n,
            RangeSpace::Orthogonal { d } => d.nrows() + d.ncols(),
        }
    }

    fn ncols(&self) -> usize {
        match self {
            RangeSpace::Coordinate { r, .. } => *r,
            RangeSpace::Orthogonal { d } => d.nrows(),
        }
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        let r = self.ncols();
        let (dep, indep) = y.split_at_mut(r);
        dep.copy_from_slice(x);
        match self {
            RangeSpace::Coordinate { .. } => indep.fill(0.0),
            RangeSpace::Orthogonal { d } => {
                LinearOperator::apply_transpose(*d, x, indep);
                indep.iter_mut().for_each(|v| *v = -*v);
            }
        }
    }

    fn apply_transpose(&self, x: &[f64], y: &mut [f64]) {
        let r = self.ncols();
        y.copy_from_slice(&x[..r]);
        if let RangeSpace::Orthogonal { d } = self {
            let mut dx = vec![0.0; r];
            LinearOperator::apply(*d, &x[r..], &mut dx);
            for (yi, v) in y.iter_mut().zip(&dx) {
                *yi -= v;
            }
        }
    }
}

/// `I - D inv(I + D^T D) D^T`, which equals `inv(I + D D^T)`.
#[derive(Debug, Clone, Copy)]
struct Woodbury<'a> {
    d: &'a DMatrix<f64>,
    /// `None` when `D` has no columns.
    s_chol: Option<&'a Cholesky<f64, Dyn>>,
}

impl Woodbury<'_> {
    /// `x <- inv(I + D D^T) x`
    fn solve_in_place(&self, x: &mut [f64]) {
        let Some(chol) = self.s_chol else { return };
        let xv = DVector::from_column_slice(x);
        let t = chol.solve(&(self.d.transpose() * &xv));
        let correction = self.d * t;
        for (xi, c) in x.iter_mut().zip(correction.iter()) {
            *xi -= c;
        }
    }

    /// `x <- (I + D D^T) x`
    fn apply_in_place(&self, x: &mut [f64]) {
        let xv = DVector::from_column_slice(x);
        let ddt_x = self.d * (self.d.transpose() * &xv);
        for (xi, v) in x.iter_mut().zip(ddt_x.iter()) {
            *xi += v;
        }
    }
}

/// `R`: `C` for the coordinate kind, `C (I + D D^T)` for the orthogonal one.
#[derive(Debug)]
pub struct RangeOperator<'a, S: DirectSparseSolver> {
    c: BasisOperator<'a, S>,
    ortho: Option<Woodbury<'a>>,
}

impl<S: DirectSparseSolver> LinearOperator for RangeOperator<'_, S> {
    fn nrows(&self) -> usize {
        self.c.nrows()
    }

    fn ncols(&self) -> usize {
        self.c.ncols()
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        match &self.ortho {
            None => self.c.apply(x, y),
            Some(w) => {
                let mut t = x.to_vec();
                w.apply_in_place(&mut t);
                self.c.apply(&t, y);
            }
        }
    }

    fn apply_transpose(&self, x: &[f64], y: &mut [f64]) {
        self.c.apply_transpose(x, y);
        if let Some(w) = &self.ortho {
            w.apply_in_place(y);
        }
    }
}

impl<S: DirectSparseSolver> Invertible for RangeOperator<'_, S> {
    fn dim(&self) -> usize {
        self.c.dim()
    }

    fn solve(&self, rhs: &[f64], sol: &mut [f64]) {
        self.c.solve(rhs, sol);
        if let Some(w) = &self.ortho {
            w.solve_in_place(sol);
        }
    }

    fn solve_transpose(&self, rhs: &[f64], sol: &mut [f64]) {
        match &self.ortho {
            None => self.c.solve_transpose(rhs, sol),
            Some(w) => {
                let mut t = rhs.to_vec();
                w.solve_in_place(&mut t);
                self.c.solve_transpose(&t, sol);
            }
        }
    }
}

/// `Gc(:, equ_undecomp)^T B` for a basis `B` (`Y` or `Z`).
#[derive(Debug, Clone, Copy)]
pub struct Projected<'a, B> {
    gu: &'a SparseCsc,
    basis: B,
}

impl<B: LinearOperator> LinearOperator for Projected<'_, B> {
    fn nrows(&self) -> usize {
        self.gu.cols()
    }

    fn ncols(&self) -> usize {
        self.basis.ncols()
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        let mut w = vec![0.0; self.basis.nrows()];
        self.basis.apply(x, &mut w);
        spmv_transpose(self.gu, &w, y, 1.0, 0.0);
    }

    fn apply_transpose(&self, x: &[f64], y: &mut [f64]) {
        let mut w = vec![0.0; self.gu.rows()];
        spmv(self.gu, x, &mut w, 1.0, 0.0);
        self.basis.apply_transpose(&w, y);
    }
}
