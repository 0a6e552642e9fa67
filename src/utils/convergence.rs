//! Convergence tracking & tolerance checks for iterative solvers.

use crate::config::AssumeA;
use bitflags::bitflags;
use num_traits::Float;

bitflags! {
    /// Enabled stopping criteria (besides the iteration cap, which is always on).
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Criteria: u32 {
        const RESIDUAL_ATOL = 0b001;
        const RESIDUAL_RTOL = 0b010;
        const UNCERTAINTY   = 0b100;
        const RESIDUAL      = Self::RESIDUAL_ATOL.bits() | Self::RESIDUAL_RTOL.bits();
    }
}

/// Why an iteration stopped.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    MaxIter,
    ResidualAtol,
    ResidualRtol,
    Uncertainty,
    /// The curvature `sᵀy` of a search direction was not positive.
    Breakdown,
}

impl StopReason {
    pub fn is_converged(self) -> bool {
        matches!(self, StopReason::ResidualAtol | StopReason::ResidualRtol | StopReason::Uncertainty)
    }
}

/// Stopping criteria & stats.
#[derive(Clone, Debug)]
pub struct Convergence<T> {
    pub atol: T,
    pub rtol: T,
    pub ctol: Option<T>,
    pub max_iters: usize,
    pub criteria: Criteria,
}

#[derive(Clone, Debug)]
pub struct SolveStats<T> {
    pub iterations: usize,
    pub final_residual: T,
    pub converged: bool,
}

impl<T: Copy + Float> Convergence<T> {
    pub fn new(atol: T, rtol: T, max_iters: usize) -> Self {
        Self { atol, rtol, ctol: None, max_iters, criteria: Criteria::RESIDUAL }
    }

    /// Also stop once `sqrt(tr Cov[x]) <= ctol`.
    pub fn with_ctol(mut self, ctol: T) -> Self {
        self.ctol = Some(ctol);
        self.criteria |= Criteria::UNCERTAINTY;
        self
    }

    /// Returns the reason to stop, if any, given the residual norm, the norm of the
    /// right-hand side, the solution uncertainty `sqrt(tr Cov[x])` and the number of
    /// iterations spent so far.
    pub fn check(
        &self,
        res_norm: T,
        b_norm: T,
        uncertainty: Option<T>,
        i: usize,
    ) -> Option<StopReason> {
        if self.criteria.contains(Criteria::RESIDUAL_ATOL) && res_norm <= self.atol {
            return Some(StopReason::ResidualAtol);
        }
        if self.criteria.contains(Criteria::RESIDUAL_RTOL) && res_norm <= self.rtol * b_norm {
            return Some(StopReason::ResidualRtol);
        }
        if self.criteria.contains(Criteria::UNCERTAINTY) {
            if let (Some(ctol), Some(u)) = (self.ctol, uncertainty) {
                if u <= ctol {
                    return Some(StopReason::Uncertainty);
                }
            }
        }
        if i >= self.max_iters {
            return Some(StopReason::MaxIter);
        }
        None
    }

    /// Residual-only check in the shape the classical Krylov solvers report.
    pub fn check_residual(&self, res_norm: T, b_norm: T, i: usize) -> (bool, SolveStats<T>) {
        let reason = self.check(res_norm, b_norm, None, i);
        (
            reason.is_some(),
            SolveStats { iterations: i, final_residual: res_norm, converged: reason.is_some_and(StopReason::is_converged) },
        )
    }
}

/// Summary returned next to the posterior beliefs.
#[derive(Clone, Debug)]
pub struct SolveInfo {
    /// Iterations over all right-hand sides
    pub iterations: usize,
    pub maxiter: usize,
    /// Norm of the final residual (Frobenius norm for several right-hand sides)
    pub residual_norm: f64,
    pub converged: bool,
    pub stop_reason: StopReason,
    /// `tr Cov[x]` of the returned solution belief
    pub trace_sol_cov: f64,
    /// Scale of the uncertainty added in the unexplored subspace, if calibrated
    pub calibration_scale: Option<f64>,
    /// Declared or estimated noise level (noisy variant only)
    pub noise_scale: Option<f64>,
    pub assume_a: AssumeA,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn residual_criteria_take_precedence_over_cap() {
        let conv = Convergence::new(1e-6, 1e-3, 5);
        assert_eq!(conv.check(1e-7, 1.0, None, 5), Some(StopReason::ResidualAtol));
        assert_eq!(conv.check(1e-4, 1.0, None, 2), Some(StopReason::ResidualRtol));
        assert_eq!(conv.check(1e-1, 1.0, None, 2), None);
        assert_eq!(conv.check(1e-1, 1.0, None, 5), Some(StopReason::MaxIter));
    }

    #[test]
    fn uncertainty_criterion_only_when_enabled() {
        let conv = Convergence::new(0.0, 0.0, 100);
        assert_eq!(conv.check(1.0, 1.0, Some(1e-9), 1), None);
        let conv = conv.with_ctol(1e-3);
        assert_eq!(conv.check(1.0, 1.0, Some(1e-9), 1), Some(StopReason::Uncertainty));
        let mut only_atol = Convergence::new(1e-2, 1.0, 100);
        only_atol.criteria = Criteria::RESIDUAL_ATOL;
        assert_eq!(only_atol.check(0.5, 1.0, None, 1), None);
    }
}
