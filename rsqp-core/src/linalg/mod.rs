//! Linear algebra layer.
//!
//! Sparse storage, permutations, operator traits, and the direct solver
//! backends that factor the basis block.

pub mod sparse;
pub mod permutation;
pub mod operator;
pub mod dense_lu;
pub mod backend;
pub mod basis_matrix;
pub mod backends;
