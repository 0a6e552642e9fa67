//! probkryst: probabilistic linear solvers over Faer
//!
//! This crate solves symmetric positive definite systems `Ax = b` while returning
//! Gaussian beliefs over the solution, the system matrix and its inverse. Matrices are
//! handled as matrix-free linear operators with (symmetric) Kronecker structure, and the
//! beliefs keep that structure instead of materializing `n² × n²` covariances.

pub mod config;
pub mod core;
pub mod error;
pub mod linops;
pub mod matrix;
pub mod prob;
pub mod solver;
pub mod utils;

// Re-exports for convenience
pub use config::*;
pub use core::traits::{InnerProduct, KroneckerStructure, LinearOperator, Operator};
pub use error::*;
pub use linops::*;
pub use prob::*;
pub use solver::*;
pub use utils::*;
