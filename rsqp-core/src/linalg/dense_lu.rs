//! Dense LU factorization with partial pivoting.
//!
//! Small kernel shared by the dense backend and by the numeric refactor
//! path. Row interchanges are stored LAPACK style: at step `k` row `k` was
//! swapped with row `piv[k]`, so `P A = L U` with `P` the product of those
//! swaps.

use nalgebra::DMatrix;

use super::backend::SolverError;

/// Packed `L\U` factors of a square matrix.
#[derive(Debug, Clone)]
pub struct DenseLu {
    lu: DMatrix<f64>,
    piv: Vec<usize>,
}

impl DenseLu {
    /// Factor `a` in place with partial pivoting.
    ///
    /// Fails with `NumericallySingular` when the largest candidate pivot of
    /// a column is at or below `tol` in magnitude.
    pub fn factor(mut a: DMatrix<f64>, tol: f64) -> Result<Self, SolverError> {
        let n = a.nrows();
        if a.ncols() != n {
            return Err(SolverError::DimensionMismatch {
                expected: n,
                actual: a.ncols(),
            });
        }

        let mut piv = Vec::with_capacity(n);
        for k in 0..n {
            let mut p = k;
            let mut pmax = a[(k, k)].abs();
            for i in (k + 1)..n {
                let v = a[(i, k)].abs();
                if v > pmax {
                    pmax = v;
                    p = i;
                }
            }
            if !(pmax > tol) {
                return Err(SolverError::NumericallySingular {
                    pivot: k,
                    value: pmax,
                });
            }
            if p != k {
                a.swap_rows(k, p);
            }
            piv.push(p);

            let akk = a[(k, k)];
            for i in (k + 1)..n {
                let l = a[(i, k)] / akk;
                a[(i, k)] = l;
                if l != 0.0 {
                    for j in (k + 1)..n {
                        let akj = a[(k, j)];
                        a[(i, j)] -= l * akj;
                    }
                }
            }
        }

        Ok(Self { lu: a, piv })
    }

    /// Wrap factors computed elsewhere. `piv` uses the same swap encoding
    /// as [`DenseLu::factor`].
    pub fn from_parts(lu: DMatrix<f64>, piv: Vec<usize>) -> Self {
        debug_assert_eq!(lu.nrows(), piv.len());
        Self { lu, piv }
    }

    pub fn dim(&self) -> usize {
        self.lu.nrows()
    }

    /// Smallest and largest `|U[k,k]|`, a crude conditioning hint.
    pub fn pivot_range(&self) -> (f64, f64) {
        (0..self.dim()).fold((f64::INFINITY, 0.0_f64), |(lo, hi), k| {
            let v = self.lu[(k, k)].abs();
            (lo.min(v), hi.max(v))
        })
    }

    /// Overwrite `b` with `inv(A) b`.
    pub fn solve_in_place(&self, b: &mut [f64]) {
        let n = self.dim();
        assert_eq!(b.len(), n);

        for (k, &p) in self.piv.iter().enumerate() {
            if p != k {
                b.swap(k, p);
            }
        }
        // L y = P b
        for k in 0..n {
            let bk = b[k];
            if bk != 0.0 {
                for i in (k + 1)..n {
                    b[i] -= self.lu[(i, k)] * bk;
                }
            }
        }
        // U x = y
        for k in (0..n).rev() {
            b[k] /= self.lu[(k, k)];
            let bk = b[k];
            if bk != 0.0 {
                for i in 0..k {
                    b[i] -= self.lu[(i, k)] * bk;
                }
            }
        }
    }

    /// Overwrite `b` with `inv(A^T) b`.
    pub fn solve_transpose_in_place(&self, b: &mut [f64]) {
        let n = self.dim();
        assert_eq!(b.len(), n);

        // U^T z = b
        for k in 0..n {
            let mut s = b[k];
            for i in 0..k {
                s -= self.lu[(i, k)] * b[i];
            }
            b[k] = s / self.lu[(k, k)];
        }
        // L^T w = z
        for k in (0..n).rev() {
            let mut s = b[k];
            for i in (k + 1)..n {
                s -= self.lu[(i, k)] * b[i];
            }
            b[k] = s;
        }
        // x = P^T w
        for (k, &p) in self.piv.iter().enumerate().rev() {
            if p != k {
                b.swap(k, p);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DMatrix<f64> {
        DMatrix::from_row_slice(3, 3, &[1.0, 2.0, 0.0, 4.0, 1.0, -1.0, 0.5, 3.0, 2.0])
    }

    #[test]
    fn test_solve_and_transpose_solve() {
        let a = sample();
        let lu = DenseLu::factor(a.clone(), 1e-14).unwrap();

        let mut x = vec![1.0, -2.0, 3.0];
        lu.solve_in_place(&mut x);
        let ax = &a * nalgebra::DVector::from_column_slice(&x);
        for (got, want) in ax.iter().zip([1.0, -2.0, 3.0]) {
            assert!((got - want).abs() < 1e-12);
        }

        let mut y = vec![0.5, 0.0, -1.0];
        lu.solve_transpose_in_place(&mut y);
        let aty = a.transpose() * nalgebra::DVector::from_column_slice(&y);
        for (got, want) in aty.iter().zip([0.5, 0.0, -1.0]) {
            assert!((got - want).abs() < 1e-12);
        }
    }

    #[test]
    fn test_singular_matrix_is_reported() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        match DenseLu::factor(a, 1e-12) {
            Err(SolverError::NumericallySingular { pivot, .. }) => assert_eq!(pivot, 1),
            other => panic!("expected singular failure, got {other:?}"),
        }
    }

    #[test]
    fn test_pivot_range() {
        let lu = DenseLu::factor(DMatrix::from_diagonal_element(3, 3, 2.0), 0.0).unwrap();
        assert_eq!(lu.pivot_range(), (2.0, 2.0));
    }
}
