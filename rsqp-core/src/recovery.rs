//! New-decomposition recovery strategy.
//!
//! Two triggers lead to a fresh [`DecompositionSystem::select_basis`]: the
//! conditioning monitor firing, and a failed line search. A line search that
//! fails again on the iteration right after a line-search recovery is fatal
//! and reported as `RecoveryExhausted`; monitor-triggered recoveries may
//! repeat as long as reselection succeeds.

use log::{error, info};

use crate::decomp::DecompositionSystem;
use crate::error::{DecompError, DecompResult};
use crate::linalg::backend::DirectSparseSolver;
use crate::linalg::sparse::SparseCsc;
use crate::monitor::{ConditioningMonitor, IllConditioned, MonitorVerdict};
use crate::settings::DecompSettings;

/// Result of a recovery check for one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Keep the current decomposition.
    Continue,
    /// A new basis was selected.
    Reselected { num_basis: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecoveryTrigger {
    IllConditioned(IllConditioned),
    LineSearchFailure,
}

#[derive(Debug, Clone)]
pub struct RecoveryStrategy {
    monitor: ConditioningMonitor,
    last_line_search_recovery: Option<usize>,
    recoveries: usize,
}

impl RecoveryStrategy {
    pub fn new(monitor: ConditioningMonitor) -> Self {
        Self {
            monitor,
            last_line_search_recovery: None,
            recoveries: 0,
        }
    }

    pub fn from_settings(settings: &DecompSettings) -> Self {
        Self::new(ConditioningMonitor::from_settings(settings))
    }

    pub fn monitor(&self) -> &ConditioningMonitor {
        &self.monitor
    }

    /// Number of successful reselections so far.
    pub fn recoveries(&self) -> usize {
        self.recoveries
    }

    /// Iteration of the last line-search-triggered recovery.
    pub fn last_line_search_recovery(&self) -> Option<usize> {
        self.last_line_search_recovery
    }

    /// Feed this iteration's `beta` to the monitor and reselect if it fires.
    pub fn check_conditioning<S: DirectSparseSolver>(
        &mut self,
        iter: usize,
        beta: f64,
        system: &mut DecompositionSystem<S>,
        gc: &SparseCsc,
        nu: Option<&[f64]>,
    ) -> DecompResult<StepOutcome> {
        match self.monitor.observe(beta, system.num_basis()) {
            MonitorVerdict::Accept => Ok(StepOutcome::Continue),
            MonitorVerdict::IllConditioned(reason) => {
                info!("iteration {}: {}", iter, reason);
                self.request_new_decomposition(
                    iter,
                    RecoveryTrigger::IllConditioned(reason),
                    system,
                    gc,
                    nu,
                )
            }
        }
    }

    /// Handle a line-search failure reported for iteration `iter`.
    pub fn on_line_search_failure<S: DirectSparseSolver>(
        &mut self,
        iter: usize,
        system: &mut DecompositionSystem<S>,
        gc: &SparseCsc,
        nu: Option<&[f64]>,
    ) -> DecompResult<StepOutcome> {
        if let Some(previous_iter) = self.last_line_search_recovery {
            if iter <= previous_iter + 1 {
                let err = DecompError::RecoveryExhausted {
                    iter,
                    previous_iter,
                    beta_min: self.monitor.beta_min(),
                };
                error!("{}", err);
                return Err(err);
            }
        }
        self.last_line_search_recovery = Some(iter);
        info!("iteration {}: line search failed", iter);
        self.request_new_decomposition(iter, RecoveryTrigger::LineSearchFailure, system, gc, nu)
    }

    /// Select a new basis and restart the monitor.
    pub fn request_new_decomposition<S: DirectSparseSolver>(
        &mut self,
        iter: usize,
        trigger: RecoveryTrigger,
        system: &mut DecompositionSystem<S>,
        gc: &SparseCsc,
        nu: Option<&[f64]>,
    ) -> DecompResult<StepOutcome> {
        let num_basis = system.select_basis(nu, gc)?.num_basis();
        self.monitor.reset();
        self.recoveries += 1;
        info!(
            "iteration {}: selected basis {} after {:?}",
            iter, num_basis, trigger
        );
        Ok(StepOutcome::Reselected { num_basis })
    }
}
