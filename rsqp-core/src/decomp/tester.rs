//! Consistency checks for a freshly built decomposition.
//!
//! The identities are evaluated on fixed probe vectors rather than by
//! forming the matrices, so a check costs a handful of products and solves.
//! The `Gc` products go through the caller ordering to catch permutation
//! mix-ups as well as numerical trouble.

use log::debug;

use crate::error::{DecompError, DecompResult};
use crate::linalg::backend::DirectSparseSolver;
use crate::linalg::operator::LinearOperator;
use crate::linalg::sparse::{max_abs, norm_inf, spmv, spmv_transpose, SparseCsc};

use super::matrices::Decomposition;

/// Relative residuals of the decomposition identities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecompositionCheck {
    /// `||C D x + N x||`
    pub cd_plus_n: f64,
    /// `||Gc(:, equ_decomp)^T Z x||`
    pub gc_z: f64,
    /// `||Gc(:, equ_decomp)^T Y x - R x||`
    pub gc_y_minus_r: f64,
}

impl DecompositionCheck {
    /// Name and value of the worst residual.
    pub fn worst(&self) -> (&'static str, f64) {
        [
            ("C*D + N", self.cd_plus_n),
            ("Gc'*Z", self.gc_z),
            ("Gc'*Y - R", self.gc_y_minus_r),
        ]
        .into_iter()
        .fold(("C*D + N", 0.0), |best, cur| {
            // NaN must surface as the worst value.
            if cur.1.is_nan() || cur.1 > best.1 {
                cur
            } else {
                best
            }
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DecompositionTester {
    pub tol: f64,
}

/// Deterministic probe with mixed signs and magnitudes.
fn probe(len: usize) -> Vec<f64> {
    (0..len)
        .map(|j| {
            let sign = if j % 2 == 0 { 1.0 } else { -1.0 };
            sign * (1.0 + (j % 3) as f64 * 0.5)
        })
        .collect()
}

impl DecompositionTester {
    pub fn new(tol: f64) -> Self {
        Self { tol }
    }

    /// Compute the residuals without judging them.
    pub fn check<S: DirectSparseSolver>(
        &self,
        dec: &Decomposition<S>,
        gc: &SparseCsc,
    ) -> DecompResult<DecompositionCheck> {
        let part = dec.partition();
        part.check_gc(gc)?;
        let (n, m, r) = (part.n(), part.m(), part.rank());
        let scale = 1.0 + max_abs(gc);

        // C D x + N x
        let x = probe(n - r);
        let mut dx = vec![0.0; r];
        dec.d().apply(&x, &mut dx);
        let mut cdx = vec![0.0; r];
        dec.c().apply(&dx, &mut cdx);
        spmv(dec.n(), &x, &mut cdx, 1.0, 1.0);
        let cd_plus_n = norm_inf(&cdx) / (scale * (1.0 + norm_inf(&dx)));

        // Gc(:, equ_decomp)^T Z x
        let mut zx = vec![0.0; n];
        dec.z().apply(&x, &mut zx);
        let gz = decomposed_product(dec, gc, &zx, m);
        let gc_z = norm_inf(&gz) / (scale * (1.0 + norm_inf(&zx)));

        // Gc(:, equ_decomp)^T Y x - R x
        let x = probe(r);
        let mut yx = vec![0.0; n];
        dec.y().apply(&x, &mut yx);
        let mut gy = decomposed_product(dec, gc, &yx, m);
        let mut rx = vec![0.0; r];
        dec.r().apply(&x, &mut rx);
        for (g, v) in gy.iter_mut().zip(&rx) {
            *g -= v;
        }
        let gc_y_minus_r = norm_inf(&gy) / (scale * (1.0 + norm_inf(&yx)));

        Ok(DecompositionCheck {
            cd_plus_n,
            gc_z,
            gc_y_minus_r,
        })
    }

    /// Check and fail with `TestFailed` if any residual exceeds `tol`.
    pub fn verify<S: DirectSparseSolver>(
        &self,
        dec: &Decomposition<S>,
        gc: &SparseCsc,
    ) -> DecompResult<DecompositionCheck> {
        let result = self.check(dec, gc)?;
        let (check, value) = result.worst();
        debug!(
            "decomposition check (basis {}): worst {} = {:.3e}",
            dec.num_basis(),
            check,
            value
        );
        if value.is_nan() || value > self.tol {
            return Err(DecompError::TestFailed {
                check,
                value,
                tol: self.tol,
            });
        }
        Ok(result)
    }
}

/// `(Gc^T w)(equ_decomp)` for `w` in permuted variable order, computed in
/// caller order.
fn decomposed_product<S: DirectSparseSolver>(
    dec: &Decomposition<S>,
    gc: &SparseCsc,
    w: &[f64],
    m: usize,
) -> Vec<f64> {
    let part = dec.partition();
    let w_caller = part.unpermute_vars(w);
    let mut g = vec![0.0; m];
    spmv_transpose(gc, &w_caller, &mut g, 1.0, 0.0);
    part.decomp_equs().iter().map(|&j| g[j]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decomp::partition::Partition;
    use crate::linalg::backend::AnalyzeHints;
    use crate::linalg::backends::MarkowitzLuSolver;
    use crate::linalg::sparse::from_triplets;
    use crate::settings::DecompSettings;

    fn decomposition(gc: &SparseCsc) -> Decomposition<MarkowitzLuSolver> {
        let an = MarkowitzLuSolver::default()
            .analyze_and_factor(gc, &AnalyzeHints::with_rank(gc.cols()))
            .unwrap();
        let partition = Partition::new(an.row_perm, an.col_perm, an.rank).unwrap();
        Decomposition::build(partition, an.basis, gc, &DecompSettings::default(), 1).unwrap()
    }

    fn gc() -> SparseCsc {
        from_triplets(
            3,
            2,
            vec![(0, 0, 1.0), (1, 0, 2.0), (1, 1, -1.0), (2, 1, 4.0), (2, 0, 0.5)],
        )
    }

    #[test]
    fn test_consistent_decomposition_passes() {
        let gc = gc();
        let dec = decomposition(&gc);
        let result = DecompositionTester::new(1e-10).verify(&dec, &gc).unwrap();
        assert!(result.cd_plus_n < 1e-12);
        assert!(result.gc_z < 1e-12);
        assert!(result.gc_y_minus_r < 1e-12);
    }

    #[test]
    fn test_stale_decomposition_is_caught() {
        let gc = gc();
        let dec = decomposition(&gc);

        // Same pattern, different values: D no longer matches Gc.
        let moved = from_triplets(3, 2, gc.iter().map(|(&v, (i, j))| (i, j, v * (1.0 + i as f64))));
        match DecompositionTester::new(1e-10).verify(&dec, &moved) {
            Err(DecompError::TestFailed { value, tol, .. }) => assert!(value > tol),
            other => panic!("expected TestFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_worst_prefers_nan() {
        let check = DecompositionCheck {
            cd_plus_n: 1e-3,
            gc_z: f64::NAN,
            gc_y_minus_r: 0.0,
        };
        assert_eq!(check.worst().0, "Gc'*Z");
    }
}
