//! Configuration of the decomposition system.
//!
//! [`DecompSettings`] is built once, validated eagerly, and passed by
//! reference into the decomposition system and the recovery strategy.
//! `Default` honours a few environment overrides for experiments:
//!
//! - `RSQP_BACKEND`: `dense` or `markowitz`
//! - `RSQP_DECOMP`: `coordinate` or `orthogonal`
//! - `RSQP_MAX_COND_CHANGE_FRAC`: float
//! - `RSQP_TEST_DECOMP`: `1`/`true` to self-check every decomposition

use std::str::FromStr;

use crate::error::{DecompError, DecompResult};

/// Direct solver used for the basis block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolverBackend {
    /// Dense complete-pivoting LU, for small problems.
    DenseLu,
    /// Sparse LU with Markowitz pivot search.
    #[default]
    MarkowitzLu,
}

/// Choice of range-space basis `Y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecompositionKind {
    /// `Y = [I; 0]`, `R = C`.
    #[default]
    Coordinate,
    /// `Y = [I; -D^T]`, `R = C (I + D D^T)`.
    Orthogonal,
}

/// Whether `D = -inv(C) N` is formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Explicitness {
    #[default]
    Explicit,
    /// Applied on demand with one basis solve per product.
    Implicit,
}

/// Which quantity the conditioning monitor measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BetaSource {
    /// `||py|| / ||c||`
    #[default]
    QuasiNormalStep,
    /// `||R py + c|| / ||c||`
    RangeResidual,
}

fn parse_err(what: &str, s: &str) -> DecompError {
    DecompError::InvalidSettings(format!("unknown {what} `{s}`"))
}

impl FromStr for SolverBackend {
    type Err = DecompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dense" | "dense-lu" => Ok(SolverBackend::DenseLu),
            "markowitz" | "markowitz-lu" | "sparse" => Ok(SolverBackend::MarkowitzLu),
            _ => Err(parse_err("backend", s)),
        }
    }
}

impl FromStr for DecompositionKind {
    type Err = DecompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "coordinate" | "basis" => Ok(DecompositionKind::Coordinate),
            "orthogonal" => Ok(DecompositionKind::Orthogonal),
            _ => Err(parse_err("decomposition", s)),
        }
    }
}

impl FromStr for Explicitness {
    type Err = DecompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "explicit" => Ok(Explicitness::Explicit),
            "implicit" => Ok(Explicitness::Implicit),
            _ => Err(parse_err("explicitness", s)),
        }
    }
}

impl FromStr for BetaSource {
    type Err = DecompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "py" | "quasi-normal" => Ok(BetaSource::QuasiNormalStep),
            "residual" | "range-residual" => Ok(BetaSource::RangeResidual),
            _ => Err(parse_err("beta source", s)),
        }
    }
}

/// Decomposition and recovery settings.
#[derive(Debug, Clone)]
pub struct DecompSettings {
    pub backend: SolverBackend,
    pub kind: DecompositionKind,
    pub d_matrix: Explicitness,

    /// Relative pivot threshold `u` for basis selection
    pub pivot_threshold: f64,
    /// Rank tolerance relative to `max|Gc|`
    pub rank_tol: f64,
    /// Pivot tolerance for numeric refactors, relative to `max|C|`
    pub refactor_pivot_tol: f64,
    /// Columns inspected per Markowitz pivot search
    pub max_search: usize,
    /// Analysis attempts per `select_basis` call
    pub max_select_attempts: usize,

    /// Accept a basis with fewer than `m` decomposed equations
    pub allow_undecomposed: bool,

    pub beta_source: BetaSource,
    /// Trigger when `beta / beta_min` exceeds this
    pub max_cond_change_frac: f64,
    /// Trigger when `beta` exceeds this regardless of history
    pub max_cond: f64,

    /// Verify every new decomposition with the tester
    pub test_decomposition: bool,
    pub test_tol: f64,
}

impl Default for DecompSettings {
    fn default() -> Self {
        let backend = std::env::var("RSQP_BACKEND")
            .ok()
            .and_then(|s| s.parse::<SolverBackend>().ok())
            .unwrap_or_default();
        let kind = std::env::var("RSQP_DECOMP")
            .ok()
            .and_then(|s| s.parse::<DecompositionKind>().ok())
            .unwrap_or_default();
        let max_cond_change_frac = std::env::var("RSQP_MAX_COND_CHANGE_FRAC")
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(100.0);

        Self {
            backend,
            kind,
            d_matrix: Explicitness::Explicit,
            pivot_threshold: 0.1,
            rank_tol: 1e-10,
            refactor_pivot_tol: 1e-13,
            max_search: 4,
            max_select_attempts: 3,
            allow_undecomposed: false,
            beta_source: BetaSource::QuasiNormalStep,
            max_cond_change_frac,
            max_cond: 0.01 / f64::EPSILON,
            test_decomposition: std::env::var("RSQP_TEST_DECOMP")
                .ok()
                .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            test_tol: 1e-8,
        }
    }
}

impl DecompSettings {
    /// Reject inconsistent or out-of-range values.
    pub fn validate(&self) -> DecompResult<()> {
        let bad = |msg: &str| Err(DecompError::InvalidSettings(msg.to_string()));

        if !(self.pivot_threshold > 0.0 && self.pivot_threshold <= 1.0) {
            return bad("pivot_threshold must lie in (0, 1]");
        }
        if !(self.rank_tol >= 0.0) || !(self.refactor_pivot_tol >= 0.0) {
            return bad("tolerances must be nonnegative");
        }
        if self.max_search == 0 {
            return bad("max_search must be at least 1");
        }
        if self.max_select_attempts == 0 {
            return bad("max_select_attempts must be at least 1");
        }
        if !(self.max_cond_change_frac > 1.0) {
            return bad("max_cond_change_frac must exceed 1");
        }
        if !(self.max_cond > 0.0) {
            return bad("max_cond must be positive");
        }
        if !(self.test_tol > 0.0) {
            return bad("test_tol must be positive");
        }
        if self.kind == DecompositionKind::Orthogonal && self.d_matrix == Explicitness::Implicit {
            return bad("the orthogonal decomposition needs an explicit D");
        }
        Ok(())
    }
}
