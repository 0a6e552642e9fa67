//! Linear solvers: the probabilistic matrix-based solver and its classical counterpart.

use crate::core::traits::LinearOperator;
use crate::utils::convergence::SolveStats;

/// Common interface for classical iterative solvers.
pub trait LinearSolver {
    type Error;
    /// Solve A·x = b, writing result into `x` (which holds the initial guess).
    /// Returns iteration stats (including convergence info).
    fn solve(
        &mut self,
        a: &dyn LinearOperator,
        b: &[f64],
        x: &mut [f64],
    ) -> Result<SolveStats<f64>, Self::Error>;
}

pub mod calibration;
pub mod cg;
pub mod matrix_based;
pub mod posterior;
pub mod prior;
pub mod problinsolve;

pub use cg::CgSolver;
pub use matrix_based::{Callback, IterationState, SymmetricMatrixBasedSolver};
pub use posterior::SolutionCovariance;
pub use problinsolve::{problinsolve, MatrixPrior, Priors};
