//! Conditioning monitor.
//!
//! Tracks a cheap proxy `beta` for the condition number of the basis across
//! iterations. `beta_min` is the best value seen since the basis last
//! changed; the monitor fires when `beta` grows by more than
//! `max_cond_change_frac` over it, or when `beta` passes the absolute bound
//! `max_cond`.

use std::fmt;

use log::debug;

use crate::decomp::Decomposition;
use crate::error::DecompResult;
use crate::linalg::backend::DirectSparseSolver;
use crate::linalg::sparse::norm_inf;
use crate::settings::{BetaSource, DecompSettings};

/// Why the monitor asked for a new basis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IllConditioned {
    /// `beta / beta_min` exceeded `max_cond_change_frac`.
    Degraded { beta: f64, beta_min: f64, ratio: f64 },
    /// `beta` exceeded `max_cond`.
    AbsoluteExceeded { beta: f64, max_cond: f64 },
}

impl fmt::Display for IllConditioned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IllConditioned::Degraded {
                beta,
                beta_min,
                ratio,
            } => write!(
                f,
                "conditioning degraded: beta = {beta:.3e}, beta_min = {beta_min:.3e}, ratio = {ratio:.3e}"
            ),
            IllConditioned::AbsoluteExceeded { beta, max_cond } => write!(
                f,
                "conditioning bound exceeded: beta = {beta:.3e} > {max_cond:.3e}"
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MonitorVerdict {
    Accept,
    IllConditioned(IllConditioned),
}

impl MonitorVerdict {
    pub fn is_trigger(&self) -> bool {
        matches!(self, MonitorVerdict::IllConditioned(_))
    }
}

/// `||py|| / (||c_decomp|| + tiny)`.
pub fn beta_from_step(py: &[f64], c_decomp: &[f64]) -> f64 {
    norm_inf(py) / (norm_inf(c_decomp) + f64::MIN_POSITIVE)
}

/// `||R py + c_decomp|| / (||c_decomp|| + tiny)`.
pub fn beta_from_residual(residual: &[f64], c_decomp: &[f64]) -> f64 {
    norm_inf(residual) / (norm_inf(c_decomp) + f64::MIN_POSITIVE)
}

/// `beta` for the published decomposition, `py` and `c` in caller order.
pub fn compute_beta<S: DirectSparseSolver>(
    source: BetaSource,
    dec: &Decomposition<S>,
    py: &[f64],
    c: &[f64],
) -> DecompResult<f64> {
    let c_decomp = dec.decomposed_residual(c)?;
    dec.check_step(py)?;
    Ok(match source {
        BetaSource::QuasiNormalStep => beta_from_step(py, &c_decomp),
        BetaSource::RangeResidual => beta_from_residual(&dec.range_residual(py, c)?, &c_decomp),
    })
}

#[derive(Debug, Clone)]
pub struct ConditioningMonitor {
    max_cond_change_frac: f64,
    max_cond: f64,
    beta_min: f64,
    /// Basis generation seen by the last observation.
    last_num_basis: Option<usize>,
}

impl ConditioningMonitor {
    pub fn new(max_cond_change_frac: f64, max_cond: f64) -> Self {
        Self {
            max_cond_change_frac,
            max_cond,
            beta_min: f64::INFINITY,
            last_num_basis: None,
        }
    }

    pub fn from_settings(settings: &DecompSettings) -> Self {
        Self::new(settings.max_cond_change_frac, settings.max_cond)
    }

    /// Forget the history; the next observation starts a new baseline.
    pub fn reset(&mut self) {
        self.beta_min = f64::INFINITY;
        self.last_num_basis = None;
    }

    pub fn beta_min(&self) -> f64 {
        self.beta_min
    }

    /// Judge `beta` for the basis with generation `num_basis`.
    pub fn observe(&mut self, beta: f64, num_basis: usize) -> MonitorVerdict {
        let basis_changed = self.last_num_basis != Some(num_basis);
        self.last_num_basis = Some(num_basis);
        self.update(beta, basis_changed)
    }

    /// Judge `beta`, resetting the baseline when `basis_changed`.
    pub fn update(&mut self, beta: f64, basis_changed: bool) -> MonitorVerdict {
        if !beta.is_finite() {
            return MonitorVerdict::IllConditioned(IllConditioned::AbsoluteExceeded {
                beta,
                max_cond: self.max_cond,
            });
        }

        if basis_changed {
            self.beta_min = beta + f64::EPSILON;
            debug!("monitor: new basis, beta_min = {:.3e}", self.beta_min);
            return MonitorVerdict::Accept;
        }
        if beta == 0.0 {
            return MonitorVerdict::Accept;
        }

        if beta < self.beta_min {
            self.beta_min = beta;
        } else {
            let ratio = beta / self.beta_min;
            if ratio > self.max_cond_change_frac {
                return MonitorVerdict::IllConditioned(IllConditioned::Degraded {
                    beta,
                    beta_min: self.beta_min,
                    ratio,
                });
            }
        }

        if beta > self.max_cond {
            return MonitorVerdict::IllConditioned(IllConditioned::AbsoluteExceeded {
                beta,
                max_cond: self.max_cond,
            });
        }

        debug!("monitor: beta = {:.3e}, beta_min = {:.3e}", beta, self.beta_min);
        MonitorVerdict::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_observation_sets_baseline() {
        let mut mon = ConditioningMonitor::new(10.0, 1e12);
        assert_eq!(mon.observe(5.0, 1), MonitorVerdict::Accept);
        assert!((mon.beta_min() - 5.0).abs() <= 2.0 * f64::EPSILON);
    }

    #[test]
    fn test_relative_growth_triggers() {
        let mut mon = ConditioningMonitor::new(10.0, 1e12);
        mon.observe(1.0, 1);
        assert!(!mon.observe(9.0, 1).is_trigger());
        match mon.observe(11.0, 1) {
            MonitorVerdict::IllConditioned(IllConditioned::Degraded { ratio, .. }) => {
                assert!(ratio > 10.0)
            }
            other => panic!("expected degraded, got {other:?}"),
        }
    }

    #[test]
    fn test_absolute_bound_applies_on_a_new_minimum() {
        let mut mon = ConditioningMonitor::new(10.0, 100.0);
        mon.observe(1e4, 1);
        let v = mon.observe(500.0, 1);
        assert!(matches!(
            v,
            MonitorVerdict::IllConditioned(IllConditioned::AbsoluteExceeded { .. })
        ));
        assert_eq!(mon.beta_min(), 500.0);
    }

    #[test]
    fn test_zero_beta_is_ignored() {
        let mut mon = ConditioningMonitor::new(10.0, 1e12);
        assert_eq!(mon.observe(2.0, 1), MonitorVerdict::Accept);
        assert_eq!(mon.observe(0.0, 1), MonitorVerdict::Accept);
        assert!((mon.beta_min() - 2.0).abs() <= 2.0 * f64::EPSILON);
    }

    #[test]
    fn test_reset_with_zero_beta_keeps_epsilon_baseline() {
        let mut mon = ConditioningMonitor::new(100.0, 1e12);
        assert_eq!(mon.observe(0.0, 1), MonitorVerdict::Accept);
        assert_eq!(mon.beta_min(), f64::EPSILON);
        assert!(matches!(
            mon.observe(1e-6, 1),
            MonitorVerdict::IllConditioned(IllConditioned::Degraded { .. })
        ));
    }

    #[test]
    fn test_non_finite_beta_triggers() {
        let mut mon = ConditioningMonitor::new(10.0, 1e12);
        assert!(mon.observe(f64::NAN, 1).is_trigger());
        assert!(mon.observe(f64::INFINITY, 1).is_trigger());
    }

    #[test]
    fn test_reset_forgets_history() {
        let mut mon = ConditioningMonitor::new(10.0, 1e12);
        mon.observe(1.0, 1);
        mon.reset();
        assert_eq!(mon.observe(1e3, 1), MonitorVerdict::Accept);
    }

    #[test]
    fn test_beta_formulas() {
        assert_eq!(beta_from_step(&[2.0, -4.0], &[0.5, 1.0]), 4.0);
        assert_eq!(beta_from_residual(&[0.0], &[1.0]), 0.0);
        assert!(beta_from_step(&[1.0], &[0.0]).is_finite());
    }
}
