//! Variable/equation partition of the constraint gradient matrix.
//!
//! After permutation the dependent variables and decomposed equations come
//! first:
//!
//! ```text
//! P_var Gc P_equ^T = [ C^T  E^T ]   var_dep   = 0..r
//!                    [ N^T  F^T ]   var_indep = r..n
//!                      0..r r..m
//! ```

use std::ops::Range;

use crate::error::{DecompError, DecompResult};
use crate::linalg::permutation::Permutation;
use crate::linalg::sparse::{select, SparseCsc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    var_perm: Permutation,
    equ_perm: Permutation,
    rank: usize,
}

impl Partition {
    /// Partition with the first `rank` entries of each permutation as the
    /// dependent variables and decomposed equations.
    pub fn new(var_perm: Permutation, equ_perm: Permutation, rank: usize) -> DecompResult<Self> {
        if rank > var_perm.len() || rank > equ_perm.len() {
            return Err(DecompError::InvalidPartition(format!(
                "rank {} exceeds n = {} or m = {}",
                rank,
                var_perm.len(),
                equ_perm.len()
            )));
        }
        Ok(Self {
            var_perm,
            equ_perm,
            rank,
        })
    }

    /// Partition from raw new-to-old index maps.
    pub fn from_index_maps(
        var_perm: Vec<usize>,
        equ_perm: Vec<usize>,
        rank: usize,
    ) -> DecompResult<Self> {
        let var_perm = Permutation::new(var_perm).ok_or_else(|| {
            DecompError::InvalidPartition("variable order is not a permutation".into())
        })?;
        let equ_perm = Permutation::new(equ_perm).ok_or_else(|| {
            DecompError::InvalidPartition("equation order is not a permutation".into())
        })?;
        Self::new(var_perm, equ_perm, rank)
    }

    /// Partition that keeps the caller ordering.
    pub fn leading(n: usize, m: usize, rank: usize) -> DecompResult<Self> {
        Self::new(Permutation::identity(n), Permutation::identity(m), rank)
    }

    pub fn n(&self) -> usize {
        self.var_perm.len()
    }

    pub fn m(&self) -> usize {
        self.equ_perm.len()
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn var_perm(&self) -> &Permutation {
        &self.var_perm
    }

    pub fn equ_perm(&self) -> &Permutation {
        &self.equ_perm
    }

    pub fn var_dep(&self) -> Range<usize> {
        0..self.rank
    }

    pub fn var_indep(&self) -> Range<usize> {
        self.rank..self.n()
    }

    pub fn equ_decomp(&self) -> Range<usize> {
        0..self.rank
    }

    pub fn equ_undecomp(&self) -> Range<usize> {
        self.rank..self.m()
    }

    /// Caller indices of the dependent variables.
    pub fn dep_vars(&self) -> &[usize] {
        &self.var_perm.as_slice()[self.var_dep()]
    }

    /// Caller indices of the independent variables.
    pub fn indep_vars(&self) -> &[usize] {
        &self.var_perm.as_slice()[self.var_indep()]
    }

    /// Caller indices of the decomposed equations.
    pub fn decomp_equs(&self) -> &[usize] {
        &self.equ_perm.as_slice()[self.equ_decomp()]
    }

    /// Caller indices of the undecomposed equations.
    pub fn undecomp_equs(&self) -> &[usize] {
        &self.equ_perm.as_slice()[self.equ_undecomp()]
    }

    pub fn permute_vars(&self, x: &[f64]) -> Vec<f64> {
        self.var_perm.apply(x)
    }

    pub fn unpermute_vars(&self, x: &[f64]) -> Vec<f64> {
        self.var_perm.apply_inverse(x)
    }

    pub fn permute_equs(&self, c: &[f64]) -> Vec<f64> {
        self.equ_perm.apply(c)
    }

    pub fn unpermute_equs(&self, c: &[f64]) -> Vec<f64> {
        self.equ_perm.apply_inverse(c)
    }

    /// Check that `gc` is `n x m`.
    pub fn check_gc(&self, gc: &SparseCsc) -> DecompResult<()> {
        check_shape(gc, self.n(), self.m())
    }

    /// `Gc(var_dep, equ_decomp)`, the transpose of `C`.
    pub fn basis_block(&self, gc: &SparseCsc) -> SparseCsc {
        select(gc, self.dep_vars(), self.decomp_equs())
    }

    /// `Gc(var_indep, equ_decomp)`, the transpose of `N`.
    pub fn nonbasis_block(&self, gc: &SparseCsc) -> SparseCsc {
        select(gc, self.indep_vars(), self.decomp_equs())
    }

    /// All variables against the undecomposed equations, rows permuted.
    pub fn undecomposed_block(&self, gc: &SparseCsc) -> SparseCsc {
        select(gc, self.var_perm.as_slice(), self.undecomp_equs())
    }
}

pub(crate) fn check_shape(gc: &SparseCsc, n: usize, m: usize) -> DecompResult<()> {
    if gc.rows() != n {
        return Err(DecompError::DimensionMismatch {
            what: "Gc rows",
            expected: n,
            actual: gc.rows(),
        });
    }
    if gc.cols() != m {
        return Err(DecompError::DimensionMismatch {
            what: "Gc columns",
            expected: m,
            actual: gc.cols(),
        });
    }
    Ok(())
}
