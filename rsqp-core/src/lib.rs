//! rsqp-core: basis selection and null-space decomposition for reduced-space SQP
//!
//! At every outer iteration of a reduced-space SQP method the constraint
//! gradients `Gc` (n x m, one column per equality constraint) are split into
//! a square nonsingular basis block and the rest. This crate provides:
//!
//! - **Direct solvers** that pick and factor the basis block: dense
//!   complete-pivoting LU and sparse Markowitz LU behind one trait
//! - **Decompositions** `D = -inv(C) N`, null-space basis `Z = [D; I]`,
//!   range-space basis `Y` (coordinate or orthogonal), `R`, `Uy`, `Uz`
//! - **Conditioning monitor** that watches `beta = ||py|| / ||c||` and asks
//!   for a new basis when it degrades
//! - **Recovery strategy** tying monitor triggers and line-search failures
//!   to basis reselection, with escalation on repeated failure
//!
//! # Example
//!
//! ```ignore
//! use rsqp_core::{DecompSettings, DecompositionSystem, RecoveryStrategy, StepOutcome};
//!
//! let settings = DecompSettings::default();
//! let mut system = DecompositionSystem::from_settings(n, m, settings.clone())?;
//! let mut recovery = RecoveryStrategy::from_settings(&settings);
//!
//! system.select_basis(None, &gc)?;
//! for k in 0.. {
//!     let dec = system.update_basis(&gc_k)?;
//!     let py = dec.quasi_normal_step(&c_k)?;
//!     let beta = rsqp_core::monitor::compute_beta(settings.beta_source, dec, &py, &c_k)?;
//!     if let StepOutcome::Reselected { .. } =
//!         recovery.check_conditioning(k, beta, &mut system, &gc_k, None)?
//!     {
//!         continue;
//!     }
//!     // ... tangential step, line search ...
//! }
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod settings;
pub mod linalg;
pub mod decomp;
pub mod monitor;
pub mod recovery;

// Re-export main types
pub use decomp::{Decomposition, DecompositionSystem, DecompositionTester, Partition};
pub use error::{DecompError, DecompResult};
pub use linalg::backend::{AnalyzeHints, Analysis, DirectSparseSolver, SolverError};
pub use linalg::backends::{AnyDirectSolver, DenseLuSolver, MarkowitzLuSolver};
pub use linalg::basis_matrix::BasisMatrix;
pub use linalg::operator::{Invertible, LinearOperator, Transpose};
pub use linalg::permutation::Permutation;
pub use linalg::sparse::SparseCsc;
pub use monitor::{ConditioningMonitor, IllConditioned, MonitorVerdict};
pub use recovery::{RecoveryStrategy, RecoveryTrigger, StepOutcome};
pub use settings::{BetaSource, DecompSettings, DecompositionKind, Explicitness, SolverBackend};
