//! Permutations of variables and equations.
//!
//! A [`Permutation`] stores the mapping from new (partitioned) index to old
//! (caller) index together with its inverse, so both directions are O(1).
//! Applying `P` to a vector gathers: `(P x)[i] = x[perm[i]]`.

use super::operator::LinearOperator;
use super::sparse::{from_triplets, SparseCsc};

/// Bijection over `0..n`, stored as new-to-old index map plus its inverse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    perm: Vec<usize>,
    inv: Vec<usize>,
}

impl Permutation {
    /// Identity permutation of size `n`.
    pub fn identity(n: usize) -> Self {
        let perm: Vec<usize> = (0..n).collect();
        Self {
            inv: perm.clone(),
            perm,
        }
    }

    /// Build from a new-to-old index map.
    ///
    /// Returns `None` if `perm` is not a bijection over `0..perm.len()`.
    pub fn new(perm: Vec<usize>) -> Option<Self> {
        let n = perm.len();
        let mut inv = vec![usize::MAX; n];
        for (new, &old) in perm.iter().enumerate() {
            if old >= n || inv[old] != usize::MAX {
                return None;
            }
            inv[old] = new;
        }
        Some(Self { perm, inv })
    }

    /// Build from a map known to be a bijection, e.g. the product of row
    /// swaps applied to `0..n`.
    pub(crate) fn from_bijection(perm: Vec<usize>) -> Self {
        let mut inv = vec![0; perm.len()];
        for (new, &old) in perm.iter().enumerate() {
            inv[old] = new;
        }
        debug_assert!(inv.iter().enumerate().all(|(old, &new)| perm[new] == old));
        Self { perm, inv }
    }

    pub fn len(&self) -> usize {
        self.perm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.perm.is_empty()
    }

    pub fn is_identity(&self) -> bool {
        self.perm.iter().enumerate().all(|(i, &p)| i == p)
    }

    /// New-to-old index map.
    pub fn as_slice(&self) -> &[usize] {
        &self.perm
    }

    /// Old-to-new index map.
    pub fn inverse_slice(&self) -> &[usize] {
        &self.inv
    }

    /// Old index that lands at position `new`.
    #[inline]
    pub fn old_index(&self, new: usize) -> usize {
        self.perm[new]
    }

    /// Position that old index `old` is moved to.
    #[inline]
    pub fn new_index(&self, old: usize) -> usize {
        self.inv[old]
    }

    pub fn inverse(&self) -> Permutation {
        Permutation {
            perm: self.inv.clone(),
            inv: self.perm.clone(),
        }
    }

    /// Compose with a permutation applied in the already-permuted ordering.
    ///
    /// The result maps new index `i` to `self.perm[inner.perm[i]]`, i.e.
    /// `(self ∘ inner) x == inner.apply(&self.apply(x))`.
    pub fn compose(&self, inner: &Permutation) -> Permutation {
        assert_eq!(self.len(), inner.len(), "permutation sizes differ");
        Permutation::from_bijection(inner.perm.iter().map(|&i| self.perm[i]).collect())
    }

    /// Extend a permutation of the leading `self.len()` indices to `n`
    /// indices, leaving the tail in place.
    pub fn extend_identity(&self, n: usize) -> Permutation {
        assert!(n >= self.len());
        let mut perm = self.perm.clone();
        perm.extend(self.len()..n);
        let mut inv = self.inv.clone();
        inv.extend(self.len()..n);
        Permutation { perm, inv }
    }

    /// `y = P x`, i.e. `y[i] = x[perm[i]]`.
    pub fn apply(&self, x: &[f64]) -> Vec<f64> {
        assert_eq!(x.len(), self.len());
        self.perm.iter().map(|&old| x[old]).collect()
    }

    /// `x = P^T y`, the exact inverse of [`Permutation::apply`].
    pub fn apply_inverse(&self, y: &[f64]) -> Vec<f64> {
        assert_eq!(y.len(), self.len());
        self.inv.iter().map(|&new| y[new]).collect()
    }

    /// Reorder the rows of `a` so that row `i` of the result is row
    /// `perm[i]` of `a`.
    pub fn permute_rows(&self, a: &SparseCsc) -> SparseCsc {
        assert_eq!(a.rows(), self.len());
        from_triplets(
            a.rows(),
            a.cols(),
            a.iter().map(|(&v, (row, col))| (self.inv[row], col, v)),
        )
    }

    /// Reorder the columns of `a` so that column `j` of the result is
    /// column `perm[j]` of `a`.
    pub fn permute_cols(&self, a: &SparseCsc) -> SparseCsc {
        assert_eq!(a.cols(), self.len());
        from_triplets(
            a.rows(),
            a.cols(),
            a.iter().map(|(&v, (row, col))| (row, self.inv[col], v)),
        )
    }
}

impl LinearOperator for Permutation {
    fn nrows(&self) -> usize {
        self.len()
    }

    fn ncols(&self) -> usize {
        self.len()
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(y.len(), self.len());
        for (yi, &old) in y.iter_mut().zip(&self.perm) {
            *yi = x[old];
        }
    }

    fn apply_transpose(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(y.len(), self.len());
        for (yi, &new) in y.iter_mut().zip(&self.inv) {
            *yi = x[new];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse::to_dense;

    #[test]
    fn test_rejects_non_bijection() {
        assert!(Permutation::new(vec![0, 0, 1]).is_none());
        assert!(Permutation::new(vec![0, 3, 1]).is_none());
        assert!(Permutation::new(vec![2, 0, 1]).is_some());
    }

    #[test]
    fn test_apply_inverse_roundtrip_is_exact() {
        let p = Permutation::new(vec![3, 1, 4, 0, 2]).unwrap();
        let x = vec![0.1, -2.5, 1e300, 7.0, f64::MIN_POSITIVE];

        let y = p.apply(&x);
        assert_eq!(y, vec![7.0, -2.5, f64::MIN_POSITIVE, 0.1, 1e300]);
        assert_eq!(p.apply_inverse(&y), x);
        assert_eq!(p.inverse().apply(&y), x);
    }

    #[test]
    fn test_compose_matches_sequential_application() {
        let outer = Permutation::new(vec![2, 0, 3, 1]).unwrap();
        let inner = Permutation::new(vec![1, 3, 0, 2]).unwrap();
        let x = vec![10.0, 11.0, 12.0, 13.0];

        let combined = outer.compose(&inner);
        assert_eq!(combined.apply(&x), inner.apply(&outer.apply(&x)));
        assert_eq!(combined.apply_inverse(&combined.apply(&x)), x);
    }

    #[test]
    fn test_extend_identity_keeps_tail() {
        let p = Permutation::new(vec![1, 0]).unwrap().extend_identity(4);
        assert_eq!(p.as_slice(), &[1, 0, 2, 3]);
        assert_eq!(p.inverse_slice(), &[1, 0, 2, 3]);
    }

    #[test]
    fn test_permute_rows_and_cols() {
        // a[i][j] = 10 i + j
        let a = from_triplets(
            3,
            2,
            (0..3).flat_map(|i| (0..2).map(move |j| (i, j, (10 * i + j) as f64))),
        );
        let p_rows = Permutation::new(vec![2, 0, 1]).unwrap();
        let p_cols = Permutation::new(vec![1, 0]).unwrap();

        let pa = to_dense(&p_cols.permute_cols(&p_rows.permute_rows(&a)));
        assert_eq!(pa[(0, 0)], 21.0);
        assert_eq!(pa[(1, 1)], 0.0);
        assert_eq!(pa[(2, 0)], 11.0);
    }

    #[test]
    fn test_linear_operator_view() {
        let p = Permutation::new(vec![2, 0, 1]).unwrap();
        let x = [1.0, 2.0, 3.0];
        let mut y = [0.0; 3];
        let mut back = [0.0; 3];

        LinearOperator::apply(&p, &x, &mut y);
        p.apply_transpose(&y, &mut back);

        assert_eq!(y, [3.0, 1.0, 2.0]);
        assert_eq!(back, x);
    }
}
