//! End-to-end scenarios for basis selection, monitoring and recovery.
//!
//! These drive the public API the way an outer SQP loop would.

use nalgebra::DMatrix;
use rsqp_core::linalg::backends::DenseStructure;
use rsqp_core::linalg::dense_lu::DenseLu;
use rsqp_core::linalg::operator::materialize;
use rsqp_core::linalg::sparse::{self, select};
use rsqp_core::monitor::compute_beta;
use rsqp_core::{
    AnalyzeHints, Analysis, BasisMatrix, BetaSource, ConditioningMonitor, DecompError,
    DecompSettings, Decomposition, DecompositionKind, DecompositionSystem, DenseLuSolver,
    DirectSparseSolver, IllConditioned, MonitorVerdict, Partition, RecoveryStrategy,
    SolverBackend, SolverError, SparseCsc, StepOutcome, Transpose,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Six variables, two equalities:
///
/// ```text
/// c0 = 2 x0 +   x1 + x2 - x3
/// c1 =   x0 + 3 x1 + 2 x4 + x5
/// ```
fn scenario_a_gc() -> SparseCsc {
    sparse::from_triplets(
        6,
        2,
        vec![
            (0, 0, 2.0),
            (1, 0, 1.0),
            (2, 0, 1.0),
            (3, 0, -1.0),
            (0, 1, 1.0),
            (1, 1, 3.0),
            (4, 1, 2.0),
            (5, 1, 1.0),
        ],
    )
}

/// Closed-form `D = -inv(C) N` for scenario A, rows x0..x1, columns x2..x5.
fn scenario_a_d() -> DMatrix<f64> {
    DMatrix::from_row_slice(2, 4, &[-0.6, 0.6, 0.4, 0.2, 0.2, -0.2, -0.8, -0.4])
}

/// `Z`, `Y` and `R` with rows and columns mapped back to caller indices.
fn caller_matrices<S: DirectSparseSolver>(
    dec: &Decomposition<S>,
) -> (DMatrix<f64>, DMatrix<f64>, DMatrix<f64>) {
    let vp = dec.partition().var_perm();
    let ep = dec.partition().equ_perm();
    let (n, r) = (dec.partition().n(), dec.rank());

    let z = materialize(&dec.z(), Transpose::No);
    let y = materialize(&dec.y(), Transpose::No);
    let rr = materialize(&dec.r(), Transpose::No);

    let mut zc = DMatrix::zeros(n, n - r);
    let mut yc = DMatrix::zeros(n, r);
    let mut rc = DMatrix::zeros(r, r);
    for i in 0..n {
        for j in 0..n - r {
            zc[(vp.old_index(i), j)] = z[(i, j)];
        }
        for k in 0..r {
            yc[(vp.old_index(i), vp.old_index(k))] = y[(i, k)];
        }
    }
    for i in 0..r {
        for k in 0..r {
            rc[(ep.old_index(i), vp.old_index(k))] = rr[(i, k)];
        }
    }
    (zc, yc, rc)
}

fn assert_close(got: &DMatrix<f64>, want: &DMatrix<f64>, what: &str) {
    assert_eq!(got.shape(), want.shape(), "{what} shape");
    let diff = (got - want).amax();
    assert!(diff < 1e-12, "{what} differs by {diff:e}:\n{got}\n{want}");
}

#[test]
fn scenario_a_coordinate_closed_form() {
    init_logger();
    let gc = scenario_a_gc();
    for backend in [SolverBackend::DenseLu, SolverBackend::MarkowitzLu] {
        let settings = DecompSettings {
            backend,
            kind: DecompositionKind::Coordinate,
            test_decomposition: true,
            ..DecompSettings::default()
        };
        let mut sys = DecompositionSystem::from_settings(6, 2, settings).unwrap();
        let dec = sys
            .set_basis(Partition::leading(6, 2, 2).unwrap(), &gc)
            .unwrap();

        let (z, y, r) = caller_matrices(dec);
        let mut z_want = DMatrix::zeros(6, 4);
        z_want.view_mut((0, 0), (2, 4)).copy_from(&scenario_a_d());
        z_want.view_mut((2, 0), (4, 4)).fill_with_identity();
        let mut y_want = DMatrix::zeros(6, 2);
        y_want.view_mut((0, 0), (2, 2)).fill_with_identity();
        let r_want = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 3.0]);

        assert_close(&z, &z_want, "Z");
        assert_close(&y, &y_want, "Y");
        assert_close(&r, &r_want, "R");
        assert!(dec.uy().is_none());
    }
}

#[test]
fn scenario_a_orthogonal_closed_form() {
    init_logger();
    let gc = scenario_a_gc();
    let settings = DecompSettings {
        backend: SolverBackend::MarkowitzLu,
        kind: DecompositionKind::Orthogonal,
        test_decomposition: true,
        ..DecompSettings::default()
    };
    let mut sys = DecompositionSystem::from_settings(6, 2, settings).unwrap();
    let dec = sys
        .set_basis(Partition::leading(6, 2, 2).unwrap(), &gc)
        .unwrap();

    let (_, y, r) = caller_matrices(dec);
    let d = scenario_a_d();
    let mut y_want = DMatrix::zeros(6, 2);
    y_want.view_mut((0, 0), (2, 2)).fill_with_identity();
    y_want.view_mut((2, 0), (4, 2)).copy_from(&(-d.transpose()));
    // C (I + D D^T)
    let r_want = DMatrix::from_row_slice(2, 2, &[3.2, 0.6, 0.0, 5.0]);

    assert_close(&y, &y_want, "Y");
    assert_close(&r, &r_want, "R");

    // Y py removes the infeasibility to first order.
    let c = [1.0, -2.0];
    let py = dec.quasi_normal_step(&c).unwrap();
    let step = dec.range_space_step(&py).unwrap();
    let mut g = [0.0; 2];
    sparse::spmv_transpose(&gc, &step, &mut g, 1.0, 0.0);
    assert!((g[0] + c[0]).abs() < 1e-12 && (g[1] + c[1]).abs() < 1e-12);
}

#[test]
fn scenario_b_monitor_fires_on_third_value() {
    let mut monitor = ConditioningMonitor::new(10.0, 0.01 / f64::EPSILON);
    let verdicts: Vec<MonitorVerdict> = [1.0, 1.0, 50.0]
        .iter()
        .map(|&beta| monitor.observe(beta, 1))
        .collect();

    assert_eq!(verdicts[0], MonitorVerdict::Accept);
    assert_eq!(verdicts[1], MonitorVerdict::Accept);
    match verdicts[2] {
        MonitorVerdict::IllConditioned(IllConditioned::Degraded { ratio, .. }) => {
            assert!((ratio - 50.0).abs() < 1e-9);
        }
        other => panic!("expected a degraded-conditioning trigger, got {other:?}"),
    }
}

/// Dense solver that reports the caller ordering as singular on the first
/// attempt, then analyzes for real.
#[derive(Debug, Default)]
struct FirstGuessSolver {
    inner: DenseLuSolver,
    calls: usize,
}

impl DirectSparseSolver for FirstGuessSolver {
    type Structure = DenseStructure;
    type Nonzeros = DenseLu;

    fn name(&self) -> &'static str {
        "first-guess"
    }

    fn analyze_and_factor(
        &mut self,
        a: &SparseCsc,
        hints: &AnalyzeHints<'_>,
    ) -> Result<Analysis<Self>, SolverError> {
        self.calls += 1;
        if hints.attempt == 0 {
            // Partition P1: the leading rows in caller order.
            let r = hints.required_rank;
            let rows: Vec<usize> = (0..r).collect();
            let cols: Vec<usize> = (0..a.cols()).collect();
            self.inner
                .analyze_and_factor(&select(a, &rows, &cols), &AnalyzeHints::with_rank(r))?;
        }
        let an = self.inner.analyze_and_factor(a, hints)?;
        let (dim, structure, nonzeros) = an.basis.into_parts();
        Ok(Analysis {
            row_perm: an.row_perm,
            col_perm: an.col_perm,
            rank: an.rank,
            basis: BasisMatrix::new(dim, structure, nonzeros),
        })
    }

    fn factor(
        &mut self,
        block: &SparseCsc,
        structure: &std::sync::Arc<DenseStructure>,
    ) -> Result<BasisMatrix<Self>, SolverError> {
        let (dim, structure, nonzeros) = self.inner.factor(block, structure)?.into_parts();
        Ok(BasisMatrix::new(dim, structure, nonzeros))
    }

    fn solve(structure: &DenseStructure, nonzeros: &DenseLu, rhs: &mut [f64], trans: Transpose) {
        DenseLuSolver::solve(structure, nonzeros, rhs, trans)
    }
}

fn scenario_c_gc() -> SparseCsc {
    // Rows 0 and 1 are parallel, so the leading 2x2 block is singular.
    sparse::from_triplets(
        4,
        2,
        vec![
            (0, 0, 1.0),
            (0, 1, 1.0),
            (1, 0, 2.0),
            (1, 1, 2.0),
            (2, 0, 1.0),
            (3, 1, 1.0),
        ],
    )
}

#[test]
fn scenario_c_select_basis_recovers_from_singular_first_choice() {
    init_logger();
    let gc = scenario_c_gc();
    let settings = DecompSettings {
        test_decomposition: true,
        ..DecompSettings::default()
    };
    let mut sys =
        DecompositionSystem::new(4, 2, FirstGuessSolver::default(), settings).unwrap();

    let dec = sys.select_basis(None, &gc).unwrap();
    let mut dep = dec.partition().dep_vars().to_vec();
    dep.sort_unstable();
    assert_ne!(dep, vec![0, 1]);
    assert_eq!(dec.num_basis(), 1);
    assert_eq!(sys.solver().calls, 2);
}

#[test]
fn scenario_c_last_failure_is_surfaced_without_retries() {
    let settings = DecompSettings {
        max_select_attempts: 1,
        ..DecompSettings::default()
    };
    let mut sys =
        DecompositionSystem::new(4, 2, FirstGuessSolver::default(), settings).unwrap();

    let err = sys.select_basis(None, &scenario_c_gc()).unwrap_err();
    assert!(matches!(err, DecompError::SingularBasis { rank: 1, required: 2 }));
    assert!(!sys.is_initialized());
}

fn recovery_setup() -> (DecompositionSystem, RecoveryStrategy, SparseCsc) {
    let settings = DecompSettings {
        max_cond_change_frac: 10.0,
        ..DecompSettings::default()
    };
    let gc = scenario_a_gc();
    let mut sys = DecompositionSystem::from_settings(6, 2, settings.clone()).unwrap();
    sys.select_basis(None, &gc).unwrap();
    (sys, RecoveryStrategy::from_settings(&settings), gc)
}

#[test]
fn scenario_d_consecutive_line_search_failures_are_fatal() {
    init_logger();
    let (mut sys, mut recovery, gc) = recovery_setup();

    recovery
        .check_conditioning(4, 0.3, &mut sys, &gc, None)
        .unwrap();
    let first = recovery.on_line_search_failure(5, &mut sys, &gc, None);
    assert_eq!(first, Ok(StepOutcome::Reselected { num_basis: 2 }));

    assert_eq!(
        recovery.check_conditioning(6, 0.7, &mut sys, &gc, None),
        Ok(StepOutcome::Continue)
    );
    match recovery.on_line_search_failure(6, &mut sys, &gc, None) {
        Err(DecompError::RecoveryExhausted {
            iter,
            previous_iter,
            beta_min,
        }) => {
            assert_eq!((iter, previous_iter), (6, 5));
            assert!((beta_min - 0.7).abs() < 1e-12);
        }
        other => panic!("expected RecoveryExhausted, got {other:?}"),
    }
    assert_eq!(recovery.recoveries(), 1);
}

#[test]
fn monitor_recovery_does_not_count_toward_escalation() {
    let (mut sys, mut recovery, gc) = recovery_setup();

    recovery.check_conditioning(1, 1.0, &mut sys, &gc, None).unwrap();
    let out = recovery.check_conditioning(2, 1e3, &mut sys, &gc, None);
    assert!(matches!(out, Ok(StepOutcome::Reselected { .. })));

    // Line search fails on the very next iteration: still recoverable.
    let out = recovery.on_line_search_failure(3, &mut sys, &gc, None);
    assert!(matches!(out, Ok(StepOutcome::Reselected { .. })));

    // A monitor trigger right after a line-search recovery is fine too.
    recovery.check_conditioning(4, 1.0, &mut sys, &gc, None).unwrap();
    let out = recovery.check_conditioning(4, 1e3, &mut sys, &gc, None);
    assert!(matches!(out, Ok(StepOutcome::Reselected { .. })));
    assert_eq!(recovery.recoveries(), 3);
}

#[test]
fn monitor_reset_law_after_new_basis() {
    let (mut sys, mut recovery, gc) = recovery_setup();
    recovery.check_conditioning(1, 1e-3, &mut sys, &gc, None).unwrap();

    // A client-driven reselection advances num_basis behind the monitor's back.
    sys.set_basis(Partition::leading(6, 2, 2).unwrap(), &gc).unwrap();
    assert_eq!(sys.num_basis(), 2);

    let out = recovery.check_conditioning(2, 1e3, &mut sys, &gc, None);
    assert_eq!(out, Ok(StepOutcome::Continue));
    assert!((recovery.monitor().beta_min() - 1e3).abs() < 1e-9);
}

#[test]
fn update_basis_tracks_new_values_without_new_generation() {
    let (mut sys, _, gc) = recovery_setup();
    let before = sys.decomposition().unwrap().partition().clone();

    let gc2 = sparse::from_triplets(6, 2, gc.iter().map(|(&v, (i, j))| (i, j, v + 0.1 * i as f64)));
    let dec = sys.update_basis(&gc2).unwrap();
    assert_eq!(dec.partition(), &before);
    assert_eq!(dec.num_basis(), 1);

    let c = materialize(&dec.c(), Transpose::No);
    let d = materialize(&dec.d(), Transpose::No);
    let n = sparse::to_dense(dec.n());
    assert!((&c * &d + n).amax() < 1e-12);
}

#[test]
fn beta_rejects_a_step_of_the_wrong_length() {
    let gc = scenario_a_gc();
    let mut sys = DecompositionSystem::from_settings(6, 2, DecompSettings::default()).unwrap();
    let dec = sys.select_basis(None, &gc).unwrap();
    let c = [0.5, -1.0];

    for source in [BetaSource::QuasiNormalStep, BetaSource::RangeResidual] {
        let err = compute_beta(source, dec, &[1.0], &c).unwrap_err();
        assert!(matches!(
            err,
            DecompError::DimensionMismatch { what: "quasi-normal step", expected: 2, actual: 1 }
        ));
    }
    let py = dec.quasi_normal_step(&c).unwrap();
    let beta = compute_beta(BetaSource::QuasiNormalStep, dec, &py, &c).unwrap();
    assert!(beta.is_finite() && beta > 0.0);
}
