//! API options for the probabilistic linear solver.
//!
//! `SolverOptions` collects everything `problinsolve` needs besides the problem itself:
//! the assumption on `A`, the stopping tolerances, the noise model and whether the
//! posterior uncertainty is calibrated after the loop. Options are set with the
//! `with_*` builder methods and checked once at solver entry.

use crate::error::PlsError;
use crate::prob::DEFAULT_DAMPING;
use crate::utils::convergence::Convergence;
use std::fmt;
use std::str::FromStr;

/// Assumption on the system matrix.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum AssumeA {
    /// Symmetric positive definite, exact matrix-vector products.
    #[default]
    SymPos,
    /// Symmetric positive definite, matrix-vector products observed with noise.
    SymPosNoise,
}

impl FromStr for AssumeA {
    type Err = PlsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sympos" => Ok(AssumeA::SymPos),
            "symposnoise" => Ok(AssumeA::SymPosNoise),
            other => Err(PlsError::UnsupportedAssumption(other.to_string())),
        }
    }
}

impl fmt::Display for AssumeA {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssumeA::SymPos => write!(f, "sympos"),
            AssumeA::SymPosNoise => write!(f, "symposnoise"),
        }
    }
}

/// Solver configuration.
#[derive(Clone, Debug)]
pub struct SolverOptions {
    pub assume_a: AssumeA,
    /// Iteration cap over all right-hand sides; `None` means `10 n`.
    pub maxiter: Option<usize>,
    /// Absolute residual tolerance
    pub atol: f64,
    /// Relative residual tolerance, relative to `‖b‖`
    pub rtol: f64,
    /// Tolerance on `sqrt(tr Cov[x])`; disabled when `None`
    pub ctol: Option<f64>,
    /// Declared noise level of the matrix-vector products. `None` lets the noisy variant
    /// estimate it after the loop.
    pub noise_scale: Option<f64>,
    /// Calibrate the uncertainty in the unexplored subspace after the loop.
    pub calibrate: bool,
    /// Re-orthogonalize search directions in the `A`-inner product.
    pub reorthogonalize: bool,
    /// Cholesky damping of the returned beliefs.
    pub damping: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            assume_a: AssumeA::SymPos,
            maxiter: None,
            atol: 1e-6,
            rtol: 1e-6,
            ctol: None,
            noise_scale: None,
            calibrate: false,
            reorthogonalize: true,
            damping: DEFAULT_DAMPING,
        }
    }
}

impl SolverOptions {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_assume_a(mut self, assume_a: AssumeA) -> Self {
        self.assume_a = assume_a;
        self
    }
    pub fn with_maxiter(mut self, maxiter: usize) -> Self {
        self.maxiter = Some(maxiter);
        self
    }
    pub fn with_atol(mut self, atol: f64) -> Self {
        self.atol = atol;
        self
    }
    pub fn with_rtol(mut self, rtol: f64) -> Self {
        self.rtol = rtol;
        self
    }
    pub fn with_ctol(mut self, ctol: f64) -> Self {
        self.ctol = Some(ctol);
        self
    }
    pub fn with_noise_scale(mut self, noise_scale: f64) -> Self {
        self.noise_scale = Some(noise_scale);
        self
    }
    pub fn with_calibration(mut self, flag: bool) -> Self {
        self.calibrate = flag;
        self
    }
    pub fn with_reorthogonalization(mut self, flag: bool) -> Self {
        self.reorthogonalize = flag;
        self
    }
    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    /// Reject negative or non-finite tolerances and scales.
    pub fn validate(&self) -> Result<(), PlsError> {
        let named = [
            ("atol", Some(self.atol)),
            ("rtol", Some(self.rtol)),
            ("ctol", self.ctol),
            ("noise_scale", self.noise_scale),
            ("damping", Some(self.damping)),
        ];
        for (name, value) in named {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(PlsError::InvalidOption(format!("{name} must be finite and non-negative, got {v}")));
                }
            }
        }
        if self.noise_scale.is_some_and(|e| e > 0.0) && self.assume_a == AssumeA::SymPos {
            return Err(PlsError::InvalidOption(
                "a positive noise_scale requires assume_a = symposnoise".to_string(),
            ));
        }
        Ok(())
    }

    /// Stopping criteria for a system of order `n`.
    pub fn convergence(&self, n: usize) -> Convergence<f64> {
        let conv = Convergence::new(self.atol, self.rtol, self.maxiter.unwrap_or(10 * n));
        match self.ctol {
            Some(ctol) => conv.with_ctol(ctol),
            None => conv,
        }
    }
}
