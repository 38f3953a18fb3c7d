//! Error types for basis selection and recovery.

use thiserror::Error;

use crate::linalg::backend::SolverError;

/// Errors surfaced by the decomposition system and the recovery strategy.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecompError {
    /// The chosen partition has a rank deficient basis block.
    #[error("singular basis: found rank {rank}, required {required}")]
    SingularBasis { rank: usize, required: usize },

    /// A valid partition became singular for the current values.
    #[error("numerically singular basis: pivot {pivot} has magnitude {value:e}")]
    NumericallySingular { pivot: usize, value: f64 },

    /// Line search failed again right after a recovery.
    #[error(
        "recovery exhausted at iteration {iter}: previous recovery at iteration {previous_iter}, beta_min = {beta_min:e}"
    )]
    RecoveryExhausted {
        iter: usize,
        previous_iter: usize,
        beta_min: f64,
    },

    /// The optional decomposition self-check found an inconsistency.
    #[error("decomposition check `{check}` failed: {value:e} > {tol:e}")]
    TestFailed {
        check: &'static str,
        value: f64,
        tol: f64,
    },

    #[error("dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid partition: {0}")]
    InvalidPartition(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// An operation that needs a basis was called before one was chosen.
    #[error("no basis has been selected")]
    NotInitialized,

    #[error(transparent)]
    Backend(SolverError),
}

pub type DecompResult<T> = Result<T, DecompError>;

impl DecompError {
    /// Whether selecting a fresh basis may cure this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DecompError::SingularBasis { .. }
                | DecompError::NumericallySingular { .. }
                | DecompError::TestFailed { .. }
        )
    }
}

impl From<SolverError> for DecompError {
    fn from(err: SolverError) -> Self {
        match err {
            SolverError::SingularBasis { rank, required } => {
                DecompError::SingularBasis { rank, required }
            }
            SolverError::NumericallySingular { pivot, value } => {
                DecompError::NumericallySingular { pivot, value }
            }
            other => DecompError::Backend(other),
        }
    }
}
