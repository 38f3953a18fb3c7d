//! Variable/equation decomposition of the constraint gradients.

pub mod matrices;
pub mod partition;
pub mod system;
pub mod tester;

pub use matrices::{
    BasisOperator, Decomposition, NullSpace, Projected, RangeOperator, RangeSpace, Sensitivity,
};
pub use partition::Partition;
pub use system::DecompositionSystem;
pub use tester::{DecompositionCheck, DecompositionTester};
