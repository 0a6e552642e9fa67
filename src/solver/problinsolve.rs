//! Entry point of the probabilistic linear solver.

use crate::config::SolverOptions;
use crate::core::traits::{LinearOperator, Operator};
use crate::error::PlsError;
use crate::linops::aslinop;
use crate::prob::{Normal, Param, RandomVariable};
use crate::solver::matrix_based::{Callback, SymmetricMatrixBasedSolver};
use crate::utils::convergence::SolveInfo;
use faer::Mat;

/// Prior information about `A` or `A⁻¹`.
#[derive(Clone, Debug)]
pub enum MatrixPrior {
    /// Prior mean only; the covariance factor takes its default.
    Mean(Operator),
    /// Full prior belief. Its covariance must be `W ⊗ₛ W`; `W` becomes the prior
    /// covariance factor.
    Belief(Normal),
}

impl MatrixPrior {
    pub fn shape(&self) -> (usize, usize) {
        match self {
            MatrixPrior::Mean(op) => op.shape(),
            MatrixPrior::Belief(n) => {
                let s = n.shape();
                match s.as_slice() {
                    [m, k] => (*m, *k),
                    [m] => (*m, 1),
                    _ => (1, 1),
                }
            }
        }
    }

    pub fn mean(&self) -> Result<Operator, PlsError> {
        match self {
            MatrixPrior::Mean(op) => Ok(op.clone()),
            MatrixPrior::Belief(n) => {
                let mean = n.mean();
                mean.to_operator().ok_or_else(|| {
                    PlsError::Structure(format!("prior mean must be a matrix or operator, got a {}", mean.kind_name()))
                })
            }
        }
    }

    pub fn cov_factor(&self) -> Result<Option<Operator>, PlsError> {
        match self {
            MatrixPrior::Mean(_) => Ok(None),
            MatrixPrior::Belief(Normal::SymmetricKronecker(s)) => Ok(Some(s.factor().clone())),
            MatrixPrior::Belief(_) => Err(PlsError::Structure(
                "prior covariance must be a symmetric Kronecker product with identical factors".to_string(),
            )),
        }
    }
}

impl From<Operator> for MatrixPrior {
    fn from(op: Operator) -> Self {
        MatrixPrior::Mean(op)
    }
}

impl From<Mat<f64>> for MatrixPrior {
    fn from(m: Mat<f64>) -> Self {
        MatrixPrior::Mean(aslinop(m))
    }
}

impl From<Normal> for MatrixPrior {
    fn from(n: Normal) -> Self {
        MatrixPrior::Belief(n)
    }
}

/// Optional prior information handed to the solver.
#[derive(Clone, Debug, Default)]
pub struct Priors {
    pub a0: Option<MatrixPrior>,
    pub ainv0: Option<MatrixPrior>,
    /// Initial guess of the solution, shaped like the right-hand side
    pub x0: Option<Param>,
}

impl Priors {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_a0(mut self, a0: impl Into<MatrixPrior>) -> Self {
        self.a0 = Some(a0.into());
        self
    }
    pub fn with_ainv0(mut self, ainv0: impl Into<MatrixPrior>) -> Self {
        self.ainv0 = Some(ainv0.into());
        self
    }
    pub fn with_x0(mut self, x0: impl Into<Param>) -> Self {
        self.x0 = Some(x0.into());
        self
    }
}

/// Solve `Ax = b` for symmetric positive definite `A`, returning beliefs over the
/// solution, `A` and `A⁻¹`.
///
/// # Arguments
/// * `a` - system operator (wrap dense matrices with [`aslinop`])
/// * `b` - right-hand side: a vector, an `n × k` matrix, or a belief whose mean is used
/// * `priors` - optional priors over `A`, `A⁻¹` and an initial guess
/// * `options` - assumption on `A`, tolerances and calibration
/// * `callback` - called once per iteration with the current state
///
/// # Returns
/// `(x, A, Ainv, info)`. The solution belief has the shape of `b`.
pub fn problinsolve(
    a: Operator,
    b: impl Into<RandomVariable>,
    priors: Priors,
    options: &SolverOptions,
    callback: Option<&mut Callback<'_>>,
) -> Result<(Normal, Normal, Normal, SolveInfo), PlsError> {
    let b = b.into();
    if b.as_normal().is_some() {
        log::debug!("right-hand side is a belief; solving for its mean");
    }
    let (bmat, is_vector) = match b.mean() {
        Param::Vector(v) => (Mat::from_fn(v.len(), 1, |i, _| v[i]), true),
        Param::Matrix(m) => (m, false),
        other => {
            return Err(PlsError::DimensionMismatch(format!(
                "right-hand side must be a vector or a matrix, got a {} of shape {:?}",
                other.kind_name(),
                other.shape()
            )));
        }
    };
    let mut solver = SymmetricMatrixBasedSolver::new(a, bmat, is_vector, priors, options)?;
    solver.solve(callback)
}
