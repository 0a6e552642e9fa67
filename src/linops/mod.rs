//! Matrix-free linear operators.
//!
//! All operators implement [`LinearOperator`] and are shared as [`Operator`]
//! (`Rc<dyn LinearOperator>`); compositions hold their operands by reference count and
//! never materialize them. `todense()` is the only way to get a dense matrix out.

pub mod basic;
pub mod kronecker;
pub mod noisy;

pub use crate::core::traits::{KroneckerStructure, LinearOperator, Operator};
pub use basic::{aslinop, Identity, LowRankUpdate, MatrixMult, Product, ScalarMult, Scaled, Sum, Transpose};
pub use kronecker::{svec, svec_inverse, Kronecker, SymmetricKronecker, Symmetrize};
pub use noisy::NoisyOperator;
