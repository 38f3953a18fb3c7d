//! Basis/decomposition system.
//!
//! Owns the direct solver and the currently published [`Decomposition`].
//! Every entry point builds a complete new decomposition first and only
//! then replaces the published one, so callers never observe a partially
//! updated set of matrices. Failures leave the previous decomposition (if
//! any) in place and are always reported; retry policy lives in
//! [`crate::recovery`].

use std::sync::Arc;

use log::{debug, info, warn};

use crate::error::{DecompError, DecompResult};
use crate::linalg::backend::{AnalyzeHints, DirectSparseSolver, SolverError};
use crate::linalg::backends::AnyDirectSolver;
use crate::linalg::basis_matrix::BasisMatrix;
use crate::linalg::sparse::SparseCsc;
use crate::settings::DecompSettings;

use super::matrices::Decomposition;
use super::partition::{check_shape, Partition};
use super::tester::DecompositionTester;

pub struct DecompositionSystem<S: DirectSparseSolver = AnyDirectSolver> {
    solver: S,
    settings: DecompSettings,
    n: usize,
    m: usize,
    current: Option<Decomposition<S>>,
    num_basis: usize,
}

impl DecompositionSystem<AnyDirectSolver> {
    /// System for `n` variables and `m` equality constraints using the
    /// backend named in `settings`.
    pub fn from_settings(n: usize, m: usize, settings: DecompSettings) -> DecompResult<Self> {
        let solver = AnyDirectSolver::from_settings(&settings);
        Self::new(n, m, solver, settings)
    }
}

impl<S: DirectSparseSolver> DecompositionSystem<S> {
    pub fn new(n: usize, m: usize, solver: S, settings: DecompSettings) -> DecompResult<Self> {
        settings.validate()?;
        if m > n && !settings.allow_undecomposed {
            return Err(DecompError::InvalidSettings(format!(
                "{m} equalities cannot all be decomposed with {n} variables"
            )));
        }
        Ok(Self {
            solver,
            settings,
            n,
            m,
            current: None,
            num_basis: 0,
        })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn settings(&self) -> &DecompSettings {
        &self.settings
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    /// Number of structurally new bases adopted so far.
    pub fn num_basis(&self) -> usize {
        self.num_basis
    }

    pub fn is_initialized(&self) -> bool {
        self.current.is_some()
    }

    /// The published decomposition.
    pub fn decomposition(&self) -> DecompResult<&Decomposition<S>> {
        self.current.as_ref().ok_or(DecompError::NotInitialized)
    }

    /// Adopt a caller-chosen partition.
    ///
    /// The solver may reorder variables inside `var_dep` and equations
    /// inside `equ_decomp` for stability; the sets themselves are kept.
    pub fn set_basis(
        &mut self,
        partition: Partition,
        gc: &SparseCsc,
    ) -> DecompResult<&Decomposition<S>> {
        check_shape(gc, self.n, self.m)?;
        if partition.n() != self.n || partition.m() != self.m {
            return Err(DecompError::InvalidPartition(format!(
                "partition is {}x{}, system is {}x{}",
                partition.n(),
                partition.m(),
                self.n,
                self.m
            )));
        }
        let r = partition.rank();
        if r < self.m && !self.settings.allow_undecomposed {
            return Err(DecompError::InvalidPartition(format!(
                "rank {} leaves {} equations undecomposed",
                r,
                self.m - r
            )));
        }

        let block = partition.basis_block(gc);
        let an = self
            .solver
            .analyze_and_factor(&block, &AnalyzeHints::with_rank(r))?;
        let partition = Partition::new(
            partition.var_perm().compose(&an.row_perm.extend_identity(self.n)),
            partition.equ_perm().compose(&an.col_perm.extend_identity(self.m)),
            r,
        )?;

        info!("set_basis: adopted client basis of rank {}", r);
        self.publish(partition, an.basis, gc, true)
    }

    /// Let the solver choose the partition.
    ///
    /// Variables with a nonzero entry in `nu` are preferred as dependent
    /// variables. Rank-deficient analyses are retried with stricter pivoting
    /// up to `max_select_attempts` times, unless the solver reports that the
    /// threshold cannot change its rank; only the last failure is returned.
    pub fn select_basis(
        &mut self,
        nu: Option<&[f64]>,
        gc: &SparseCsc,
    ) -> DecompResult<&Decomposition<S>> {
        check_shape(gc, self.n, self.m)?;
        if let Some(nu) = nu {
            if nu.len() != self.n {
                return Err(DecompError::DimensionMismatch {
                    what: "dual estimate",
                    expected: self.n,
                    actual: nu.len(),
                });
            }
        }

        let preferred: Option<Vec<bool>> = nu.map(|nu| nu.iter().map(|&v| v != 0.0).collect());
        let required_rank = if self.settings.allow_undecomposed {
            self.m.min(1)
        } else {
            self.m
        };

        let mut last_err = SolverError::SingularBasis {
            rank: 0,
            required: required_rank,
        };
        let attempts = if self.solver.threshold_affects_rank() {
            self.settings.max_select_attempts
        } else {
            1
        };
        for attempt in 0..attempts {
            let hints = AnalyzeHints {
                required_rank,
                preferred_rows: preferred.as_deref(),
                attempt,
            };
            match self.solver.analyze_and_factor(gc, &hints) {
                Ok(an) => {
                    let partition = Partition::new(an.row_perm, an.col_perm, an.rank)?;
                    info!(
                        "select_basis: {} chose rank {} of {} on attempt {}",
                        self.solver.name(),
                        an.rank,
                        self.m,
                        attempt + 1
                    );
                    return self.publish(partition, an.basis, gc, true);
                }
                Err(err @ SolverError::SingularBasis { .. }) => {
                    warn!("select_basis attempt {} failed: {}", attempt + 1, err);
                    last_err = err;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(last_err.into())
    }

    /// Refactor the current partition against new values of `gc`.
    ///
    /// Never falls back to [`Self::select_basis`]; a breakdown is returned
    /// as `NumericallySingular` and the old decomposition stays published.
    pub fn update_basis(&mut self, gc: &SparseCsc) -> DecompResult<&Decomposition<S>> {
        check_shape(gc, self.n, self.m)?;
        let current = self.current.as_ref().ok_or(DecompError::NotInitialized)?;
        let partition = current.partition().clone();
        let structure = Arc::clone(current.basis().structure());

        let block = partition.basis_block(gc);
        let basis = self.solver.factor(&block, &structure).map_err(|err| {
            debug!("update_basis: refactor failed: {}", err);
            DecompError::from(err)
        })?;
        self.publish(partition, basis, gc, false)
    }

    /// Build, optionally verify, then swap in a new decomposition.
    fn publish(
        &mut self,
        partition: Partition,
        basis: BasisMatrix<S>,
        gc: &SparseCsc,
        new_partition: bool,
    ) -> DecompResult<&Decomposition<S>> {
        let num_basis = if new_partition {
            self.num_basis + 1
        } else {
            self.num_basis
        };
        let dec = Decomposition::build(partition, basis, gc, &self.settings, num_basis)?;
        if self.settings.test_decomposition {
            DecompositionTester::new(self.settings.test_tol).verify(&dec, gc)?;
        }

        self.num_basis = num_basis;
        debug!(
            "published decomposition: basis {}, rank {}, kind {:?}",
            num_basis,
            dec.rank(),
            dec.kind()
        );
        Ok(self.current.insert(dec))
    }
}
