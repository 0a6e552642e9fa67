//! Gaussian beliefs over scalars, vectors, matrices and linear operators.
//!
//! [`Normal::new`] looks at the kinds and shapes of the mean and covariance once and
//! returns the matching variant. Everything downstream (sampling, densities, the
//! arithmetic used by the solver) is a `match` on that variant.
//!
//! # Features
//! - Univariate, multivariate and matrix-variate beliefs with dense parameters.
//! - Operator-variate beliefs with lazily represented mean and covariance, with
//!   factor-shape validation for Kronecker and symmetric Kronecker covariances.
//! - A dedicated variant for symmetric Kronecker covariances `W ⊗ₛ W`, sampled via the
//!   Cholesky factor of `W` alone.
//!
//! # References
//! - Bartels, S. (2019). Probabilistic Linear Algebra. PhD thesis, App. E.

use crate::core::traits::{KroneckerStructure, LinearOperator, Operator};
use crate::core::wrappers::{column, matmul};
use crate::error::PlsError;
use crate::linops::{aslinop, Identity, Kronecker, Product, Scaled, SymmetricKronecker, Symmetrize, Transpose};
use crate::matrix::dense::{cholesky_lower, unvec_row_major, vec_row_major};
use crate::prob::dirac::{Dirac, RandomVariable};
use crate::prob::param::Param;
use faer::linalg::kron::kron;
use faer::linalg::triangular_solve::solve_lower_triangular_in_place;
use faer::{Mat, MatRef, Par};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use statrs::distribution::{Continuous, ContinuousCDF};
use std::rc::Rc;

/// Diagonal shift added to covariance (factors) before a Cholesky factorization.
pub const DEFAULT_DAMPING: f64 = 1e-12;

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// `N(μ, σ²)` on the real line.
#[derive(Clone, Debug)]
pub struct UnivariateNormal {
    mean: f64,
    var: f64,
}

impl UnivariateNormal {
    pub fn new(mean: f64, var: f64) -> Result<Self, PlsError> {
        if !var.is_finite() || var < 0.0 {
            return Err(PlsError::NotPositiveDefinite(format!(
                "variance must be finite and non-negative, got {var}"
            )));
        }
        Ok(Self { mean, var })
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn var(&self) -> f64 {
        self.var
    }

    fn dist(&self) -> Result<statrs::distribution::Normal, PlsError> {
        statrs::distribution::Normal::new(self.mean, self.var.sqrt())
            .map_err(|e| PlsError::Unsupported(format!("density of a degenerate univariate normal ({e})")))
    }

    pub fn pdf(&self, x: f64) -> Result<f64, PlsError> {
        Ok(self.dist()?.pdf(x))
    }

    pub fn logpdf(&self, x: f64) -> Result<f64, PlsError> {
        Ok(self.dist()?.ln_pdf(x))
    }

    pub fn cdf(&self, x: f64) -> Result<f64, PlsError> {
        Ok(self.dist()?.cdf(x))
    }

    pub fn logcdf(&self, x: f64) -> Result<f64, PlsError> {
        Ok(self.dist()?.cdf(x).ln())
    }
}

/// `N(μ, Σ)` on ℝⁿ with a dense covariance.
#[derive(Clone, Debug)]
pub struct MultivariateNormal {
    mean: Vec<f64>,
    cov: Mat<f64>,
    damping: f64,
}

impl MultivariateNormal {
    pub fn new(mean: Vec<f64>, cov: Mat<f64>) -> Result<Self, PlsError> {
        let n = mean.len();
        if cov.nrows() != n || cov.ncols() != n {
            return Err(PlsError::DimensionMismatch(format!(
                "covariance of shape ({}, {}) does not match a mean of dimension {n}",
                cov.nrows(),
                cov.ncols()
            )));
        }
        Ok(Self { mean, cov, damping: DEFAULT_DAMPING })
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn cov(&self) -> MatRef<'_, f64> {
        self.cov.as_ref()
    }

    pub fn logpdf(&self, x: &[f64]) -> Result<f64, PlsError> {
        gaussian_logpdf(&self.mean, self.cov.as_ref(), x, self.damping)
    }
}

/// Gaussian belief over an `m × n` matrix with a dense `mn × mn` covariance of `vec(X)`.
#[derive(Clone, Debug)]
pub struct MatrixvariateNormal {
    mean: Mat<f64>,
    cov: Mat<f64>,
    damping: f64,
}

impl MatrixvariateNormal {
    pub fn new(mean: Mat<f64>, cov: Mat<f64>) -> Result<Self, PlsError> {
        let d = mean.nrows() * mean.ncols();
        if cov.nrows() != d || cov.ncols() != d {
            return Err(PlsError::DimensionMismatch(format!(
                "covariance of shape ({}, {}) does not match a ({}, {}) mean; expected ({d}, {d})",
                cov.nrows(),
                cov.ncols(),
                mean.nrows(),
                mean.ncols()
            )));
        }
        Ok(Self { mean, cov, damping: DEFAULT_DAMPING })
    }

    pub fn mean(&self) -> MatRef<'_, f64> {
        self.mean.as_ref()
    }

    pub fn cov(&self) -> MatRef<'_, f64> {
        self.cov.as_ref()
    }

    pub fn logpdf(&self, x: MatRef<'_, f64>) -> Result<f64, PlsError> {
        gaussian_logpdf(&vec_row_major(self.mean.as_ref()), self.cov.as_ref(), &vec_row_major(x), self.damping)
    }
}

/// Gaussian belief whose mean or covariance is a linear operator.
#[derive(Clone, Debug)]
pub struct OperatorvariateNormal {
    mean: Param,
    cov: Param,
    damping: f64,
}

impl OperatorvariateNormal {
    pub fn new(mean: Param, cov: Param) -> Result<Self, PlsError> {
        let structure = match &cov {
            Param::Operator(op) => op.kronecker_structure(),
            _ => None,
        };
        match structure {
            Some(KroneckerStructure::Kronecker { a, b }) => {
                let (m, n) = mean.dims2().ok_or_else(|| {
                    PlsError::Structure("a Kronecker structured covariance needs a 2-D mean".to_string())
                })?;
                if a.shape() != (m, m) || b.shape() != (n, n) {
                    return Err(PlsError::Structure(format!(
                        "Kronecker covariance factors of shape {:?} and {:?} do not match a ({m}, {n}) mean",
                        a.shape(),
                        b.shape()
                    )));
                }
            }
            Some(KroneckerStructure::Symmetric { a, .. }) => {
                let (m, n) = mean.dims2().ok_or_else(|| {
                    PlsError::Structure("a symmetric Kronecker covariance needs a 2-D mean".to_string())
                })?;
                if m != n || a.nrows() != n {
                    return Err(PlsError::Structure(format!(
                        "symmetric Kronecker covariance needs a square mean and factors of matching size, \
                         got a ({m}, {n}) mean and factors of shape {:?}",
                        a.shape()
                    )));
                }
            }
            None => {
                let d = mean.size();
                let shape = cov.shape();
                if shape.len() != 2 || shape[0] != d || shape[1] != d {
                    return Err(PlsError::DimensionMismatch(format!(
                        "covariance of shape {shape:?} does not match a mean of shape {:?}",
                        mean.shape()
                    )));
                }
            }
        }
        Ok(Self { mean, cov, damping: DEFAULT_DAMPING })
    }

    pub fn mean(&self) -> &Param {
        &self.mean
    }

    pub fn cov(&self) -> &Param {
        &self.cov
    }
}

/// Gaussian belief over an `n × n` matrix with covariance `W ⊗ₛ W`.
#[derive(Clone, Debug)]
pub struct SymmetricKroneckerNormal {
    mean: Param,
    cov: Operator,
    factor: Operator,
    damping: f64,
}

impl SymmetricKroneckerNormal {
    pub fn new(mean: Param, cov: Operator, factor: Operator) -> Result<Self, PlsError> {
        let (m, n) = mean.dims2().ok_or_else(|| {
            PlsError::Structure("a symmetric Kronecker covariance needs a 2-D mean".to_string())
        })?;
        if m != n || factor.shape() != (n, n) {
            return Err(PlsError::Structure(format!(
                "symmetric Kronecker covariance needs a square mean and factors of matching size, \
                 got a ({m}, {n}) mean and factors of shape {:?}",
                factor.shape()
            )));
        }
        Ok(Self { mean, cov, factor, damping: DEFAULT_DAMPING })
    }

    pub fn mean(&self) -> &Param {
        &self.mean
    }

    pub fn cov(&self) -> &Operator {
        &self.cov
    }

    /// The shared factor `W`.
    pub fn factor(&self) -> &Operator {
        &self.factor
    }

    pub fn dim(&self) -> usize {
        self.factor.nrows()
    }
}

/// A Gaussian belief. Built through [`Normal::new`].
#[derive(Clone, Debug)]
pub enum Normal {
    Univariate(UnivariateNormal),
    Multivariate(MultivariateNormal),
    Matrixvariate(MatrixvariateNormal),
    Operatorvariate(OperatorvariateNormal),
    SymmetricKronecker(SymmetricKroneckerNormal),
}

impl Normal {
    /// Build the variant matching the parameters.
    ///
    /// # Arguments
    /// * `mean` - scalar, 1-D or 2-D array, or operator
    /// * `cov` - covariance of the row-major flattened mean, dense or as an operator
    ///
    /// # Returns
    /// A univariate belief for single-entry parameters, a multivariate belief for a
    /// vector mean, a matrix-variate belief for a matrix mean with dense covariance, and
    /// an operator-variate belief as soon as either parameter is an operator (the
    /// symmetric Kronecker variant when the covariance is `W ⊗ₛ W`).
    pub fn new(mean: impl Into<Param>, cov: impl Into<Param>) -> Result<Self, PlsError> {
        let (mean, cov) = (mean.into(), cov.into());
        if mean.is_operator() || cov.is_operator() {
            if let Param::Operator(op) = &cov {
                if let Some(KroneckerStructure::Symmetric { a, identical: true, .. }) = op.kronecker_structure() {
                    let op = op.clone();
                    return SymmetricKroneckerNormal::new(mean, op, a).map(Normal::SymmetricKronecker);
                }
            }
            return OperatorvariateNormal::new(mean, cov).map(Normal::Operatorvariate);
        }
        if mean.size() == 1 && cov.size() == 1 {
            let (m, c) = (mean.to_flat()[0], cov.to_flat()[0]);
            return UnivariateNormal::new(m, c).map(Normal::Univariate);
        }
        match (mean, cov) {
            (Param::Vector(m), Param::Matrix(c)) => MultivariateNormal::new(m, c).map(Normal::Multivariate),
            (Param::Matrix(m), Param::Matrix(c)) => MatrixvariateNormal::new(m, c).map(Normal::Matrixvariate),
            (m, c) => Err(PlsError::DimensionMismatch(format!(
                "cannot build a normal belief from a {} mean of shape {:?} and a {} covariance of shape {:?}",
                m.kind_name(),
                m.shape(),
                c.kind_name(),
                c.shape()
            ))),
        }
    }

    pub fn mean(&self) -> Param {
        match self {
            Normal::Univariate(u) => Param::Scalar(u.mean),
            Normal::Multivariate(m) => Param::Vector(m.mean.clone()),
            Normal::Matrixvariate(m) => Param::Matrix(m.mean.clone()),
            Normal::Operatorvariate(o) => o.mean.clone(),
            Normal::SymmetricKronecker(s) => s.mean.clone(),
        }
    }

    pub fn cov(&self) -> Param {
        match self {
            Normal::Univariate(u) => Param::Scalar(u.var),
            Normal::Multivariate(m) => Param::Matrix(m.cov.clone()),
            Normal::Matrixvariate(m) => Param::Matrix(m.cov.clone()),
            Normal::Operatorvariate(o) => o.cov.clone(),
            Normal::SymmetricKronecker(s) => Param::Operator(s.cov.clone()),
        }
    }

    /// Shape of a sample.
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Normal::Univariate(_) => vec![],
            Normal::Multivariate(m) => vec![m.mean.len()],
            Normal::Matrixvariate(m) => vec![m.mean.nrows(), m.mean.ncols()],
            Normal::Operatorvariate(o) => o.mean.shape(),
            Normal::SymmetricKronecker(s) => s.mean.shape(),
        }
    }

    pub fn damping(&self) -> f64 {
        match self {
            Normal::Univariate(_) => 0.0,
            Normal::Multivariate(m) => m.damping,
            Normal::Matrixvariate(m) => m.damping,
            Normal::Operatorvariate(o) => o.damping,
            Normal::SymmetricKronecker(s) => s.damping,
        }
    }

    /// Replace the Cholesky damping used by sampling and densities.
    pub fn with_damping(mut self, damping: f64) -> Self {
        match &mut self {
            Normal::Univariate(_) => {}
            Normal::Multivariate(m) => m.damping = damping,
            Normal::Matrixvariate(m) => m.damping = damping,
            Normal::Operatorvariate(o) => o.damping = damping,
            Normal::SymmetricKronecker(s) => s.damping = damping,
        }
        self
    }

    /// The two factors of a (symmetric) Kronecker structured covariance.
    pub fn kronecker_factors(&self) -> Option<(Operator, Operator)> {
        match self {
            Normal::SymmetricKronecker(s) => Some((s.factor.clone(), s.factor.clone())),
            Normal::Operatorvariate(OperatorvariateNormal { cov: Param::Operator(op), .. }) => {
                match op.kronecker_structure()? {
                    KroneckerStructure::Kronecker { a, b } | KroneckerStructure::Symmetric { a, b, .. } => {
                        Some((a, b))
                    }
                }
            }
            _ => None,
        }
    }

    /// Marginal variances, in the shape of the mean.
    pub fn var(&self) -> Result<Param, PlsError> {
        match self {
            Normal::Univariate(u) => Ok(Param::Scalar(u.var)),
            Normal::Multivariate(m) => Ok(Param::Vector((0..m.mean.len()).map(|i| m.cov[(i, i)]).collect())),
            Normal::Matrixvariate(m) => {
                let d: Vec<f64> = (0..m.cov.nrows()).map(|i| m.cov[(i, i)]).collect();
                Ok(Param::Matrix(unvec_row_major(&d, m.mean.nrows(), m.mean.ncols())))
            }
            Normal::SymmetricKronecker(s) => {
                let w = s.factor.todense();
                Ok(Param::Matrix(symmetric_kronecker_diagonal(w.as_ref(), w.as_ref())))
            }
            Normal::Operatorvariate(o) => {
                let d = match &o.cov {
                    Param::Operator(op) => match op.kronecker_structure() {
                        Some(KroneckerStructure::Kronecker { a, b }) => {
                            let (da, db) = (a.todense(), b.todense());
                            let (m, n) = (da.nrows(), db.nrows());
                            return Ok(Param::Matrix(Mat::from_fn(m, n, |i, j| da[(i, i)] * db[(j, j)])));
                        }
                        Some(KroneckerStructure::Symmetric { a, b, .. }) => {
                            let (da, db) = (a.todense(), b.todense());
                            return Ok(Param::Matrix(symmetric_kronecker_diagonal(da.as_ref(), db.as_ref())));
                        }
                        None => operator_diagonal(op.as_ref()),
                    },
                    other => {
                        let c = other.to_dense_matrix().ok_or_else(|| {
                            PlsError::Unsupported(format!("variance of a {} covariance", other.kind_name()))
                        })?;
                        (0..c.nrows()).map(|i| c[(i, i)]).collect()
                    }
                };
                Ok(o.mean.with_flat_data(&d))
            }
        }
    }

    /// Marginal standard deviations, in the shape of the mean.
    pub fn std(&self) -> Result<Param, PlsError> {
        let var = self.var()?;
        let d: Vec<f64> = var.to_flat().iter().map(|v| v.max(0.0).sqrt()).collect();
        Ok(var.with_flat_data(&d))
    }

    /// Precompute the factorization needed to draw samples.
    pub fn sampler(&self) -> Result<Sampler, PlsError> {
        let damping = self.damping();
        match self {
            Normal::Univariate(u) => Ok(Sampler { mean: vec![u.mean], kind: SamplerKind::Scalar(u.var.sqrt()) }),
            Normal::Multivariate(m) => Ok(Sampler {
                mean: m.mean.clone(),
                kind: SamplerKind::Dense(cholesky_lower(m.cov.as_ref(), damping)?),
            }),
            Normal::Matrixvariate(m) => Ok(Sampler {
                mean: vec_row_major(m.mean.as_ref()),
                kind: SamplerKind::Dense(cholesky_lower(m.cov.as_ref(), damping)?),
            }),
            Normal::SymmetricKronecker(s) => {
                let l = aslinop(cholesky_lower(s.factor.todense().as_ref(), damping)?);
                Ok(Sampler {
                    mean: s.mean.to_flat(),
                    kind: SamplerKind::SymmetricKronecker { factor: Rc::new(Kronecker::new(l.clone(), l)), n: s.dim() },
                })
            }
            Normal::Operatorvariate(o) => {
                let kind = match &o.cov {
                    Param::Operator(op) => match op.kronecker_structure() {
                        Some(KroneckerStructure::Kronecker { a, b }) => {
                            let la = aslinop(cholesky_lower(a.todense().as_ref(), damping)?);
                            let lb = aslinop(cholesky_lower(b.todense().as_ref(), damping)?);
                            SamplerKind::Kronecker(Rc::new(Kronecker::new(la, lb)))
                        }
                        _ => SamplerKind::Dense(cholesky_lower(op.todense().as_ref(), damping)?),
                    },
                    other => {
                        let c = other.to_dense_matrix().ok_or_else(|| {
                            PlsError::Unsupported(format!("sampling with a {} covariance", other.kind_name()))
                        })?;
                        SamplerKind::Dense(cholesky_lower(c.as_ref(), damping)?)
                    }
                };
                Ok(Sampler { mean: o.mean.to_flat(), kind })
            }
        }
    }

    /// Draw `size` independent samples, each shaped like the mean.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        size: usize,
    ) -> Result<Vec<Param>, PlsError> {
        let sampler = self.sampler()?;
        let template = self.mean();
        Ok((0..size).map(|_| template.with_flat_data(&sampler.draw(rng))).collect())
    }

    pub fn pdf(&self, x: &Param) -> Result<f64, PlsError> {
        match self {
            Normal::Univariate(u) => u.pdf(single_entry(x)?),
            _ => Ok(self.logpdf(x)?.exp()),
        }
    }

    pub fn logpdf(&self, x: &Param) -> Result<f64, PlsError> {
        match self {
            Normal::Univariate(u) => u.logpdf(single_entry(x)?),
            Normal::Multivariate(m) => {
                check_shape(&self.shape(), x)?;
                m.logpdf(&x.to_flat())
            }
            Normal::Matrixvariate(m) => {
                check_shape(&self.shape(), x)?;
                gaussian_logpdf(&vec_row_major(m.mean.as_ref()), m.cov.as_ref(), &x.to_flat(), m.damping)
            }
            _ => Err(PlsError::Unsupported("densities of operator-variate normal beliefs".to_string())),
        }
    }

    pub fn cdf(&self, x: &Param) -> Result<f64, PlsError> {
        match self {
            Normal::Univariate(u) => u.cdf(single_entry(x)?),
            _ => Err(PlsError::Unsupported("cdf of a multivariate normal belief".to_string())),
        }
    }

    pub fn logcdf(&self, x: &Param) -> Result<f64, PlsError> {
        match self {
            Normal::Univariate(u) => u.logcdf(single_entry(x)?),
            _ => Err(PlsError::Unsupported("log-cdf of a multivariate normal belief".to_string())),
        }
    }

    /// Belief over `X + δ` for a known shift `δ`.
    pub fn add_dirac_shift(&self, delta: &Param) -> Result<Normal, PlsError> {
        let mean = self.mean().plus(delta)?;
        Ok(Normal::new(mean, self.cov())?.with_damping(self.damping()))
    }

    /// `X + Z` for another random variable `Z`; only point masses are supported.
    pub fn add(&self, other: &RandomVariable) -> Result<RandomVariable, PlsError> {
        RandomVariable::Normal(self.clone()).add(other)
    }

    /// Belief over `c·X`. Scaling by zero leaves a point mass at zero.
    pub fn scale(&self, c: f64) -> Result<RandomVariable, PlsError> {
        if c == 0.0 {
            return Ok(RandomVariable::Constant(Dirac::new(self.mean().scaled(0.0))));
        }
        let cov = self.scaled_cov(c)?;
        Ok(RandomVariable::Normal(Normal::new(self.mean().scaled(c), cov)?.with_damping(self.damping())))
    }

    /// Belief over `−X`.
    pub fn neg(&self) -> Result<Normal, PlsError> {
        Ok(Normal::new(self.mean().scaled(-1.0), self.cov())?.with_damping(self.damping()))
    }

    /// Covariance of `c·X`, keeping Kronecker structure intact.
    fn scaled_cov(&self, c: f64) -> Result<Param, PlsError> {
        let cov = match self {
            Normal::SymmetricKronecker(s) => {
                let w: Operator = Rc::new(Scaled::new(c.abs(), s.factor.clone()));
                Param::Operator(Rc::new(SymmetricKronecker::identical(w)?))
            }
            Normal::Operatorvariate(OperatorvariateNormal { cov: Param::Operator(op), .. }) => {
                match op.kronecker_structure() {
                    Some(KroneckerStructure::Kronecker { a, b }) => Param::Operator(Rc::new(Kronecker::new(
                        Rc::new(Scaled::new(c, a)),
                        Rc::new(Scaled::new(c, b)),
                    ))),
                    Some(KroneckerStructure::Symmetric { a, b, .. }) => Param::Operator(Rc::new(
                        SymmetricKronecker::new(Rc::new(Scaled::new(c, a)), Rc::new(Scaled::new(c, b)))?,
                    )),
                    None => Param::Operator(Rc::new(Scaled::new(c * c, op.clone()))),
                }
            }
            other => other.cov().scaled(c * c),
        };
        Ok(cov)
    }

    /// Belief over `M X` for a dense `M`.
    pub fn matmul_transform(&self, m: &Mat<f64>) -> Result<Normal, PlsError> {
        match self {
            Normal::Univariate(u) => {
                if m.ncols() != 1 {
                    return Err(transform_mismatch(m, &self.shape()));
                }
                let col = column(m.as_ref(), 0);
                if col.len() == 1 {
                    return Normal::new(col[0] * u.mean, col[0] * col[0] * u.var);
                }
                let mean: Vec<f64> = col.iter().map(|c| c * u.mean).collect();
                let cov = Mat::from_fn(col.len(), col.len(), |i, j| u.var * col[i] * col[j]);
                Normal::new(mean, cov)
            }
            Normal::Multivariate(mv) => {
                if m.ncols() != mv.mean.len() {
                    return Err(transform_mismatch(m, &self.shape()));
                }
                let mean = aslinop(m.clone()).apply(&mv.mean);
                let mt = m.transpose().to_owned();
                let cov = matmul(matmul(m.as_ref(), mv.cov.as_ref()).as_ref(), mt.as_ref());
                Ok(Normal::new(mean, cov)?.with_damping(mv.damping))
            }
            Normal::Matrixvariate(mx) => {
                if m.ncols() != mx.mean.nrows() {
                    return Err(transform_mismatch(m, &self.shape()));
                }
                let p = mx.mean.ncols();
                let k = kron_dense(m.as_ref(), Mat::<f64>::identity(p, p).as_ref());
                let kt = k.transpose().to_owned();
                let mean = matmul(m.as_ref(), mx.mean.as_ref());
                let cov = matmul(matmul(k.as_ref(), mx.cov.as_ref()).as_ref(), kt.as_ref());
                Ok(Normal::new(mean, cov)?.with_damping(mx.damping))
            }
            Normal::Operatorvariate(_) | Normal::SymmetricKronecker(_) => {
                let mean = self.mean();
                let cov = self.cov();
                let (n, p) = mean.dims2().ok_or_else(|| transform_mismatch(m, &self.shape()))?;
                if m.ncols() != n {
                    return Err(transform_mismatch(m, &self.shape()));
                }
                let mop = aslinop(m.clone());
                let new_mean = match &mean {
                    Param::Matrix(x) => Param::Matrix(matmul(m.as_ref(), x.as_ref())),
                    Param::Operator(op) => Param::Operator(Rc::new(Product::new(mop.clone(), op.clone())?)),
                    other => return Err(transform_mismatch(m, &other.shape())),
                };
                let k: Operator = Rc::new(Kronecker::new(mop, Rc::new(Identity::new(p))));
                let new_cov = congruence(k, &cov)?;
                Ok(Normal::new(new_mean, new_cov)?.with_damping(self.damping()))
            }
        }
    }

    /// Belief over `X M` for a dense `M`, e.g. the belief over `A⁻¹b` induced by a
    /// belief over `A⁻¹`.
    pub fn right_matmul(&self, m: &Mat<f64>) -> Result<Normal, PlsError> {
        let (n, p) = match self {
            Normal::Matrixvariate(_) | Normal::Operatorvariate(_) | Normal::SymmetricKronecker(_) => {
                self.mean().dims2().ok_or_else(|| transform_mismatch(m, &self.shape()))?
            }
            _ => {
                return Err(PlsError::Unsupported(
                    "right multiplication of a scalar or vector normal belief".to_string(),
                ));
            }
        };
        if m.nrows() != p {
            return Err(PlsError::DimensionMismatch(format!(
                "cannot multiply a belief of shape ({n}, {p}) by a ({}, {}) matrix from the right",
                m.nrows(),
                m.ncols()
            )));
        }
        let mt = m.transpose().to_owned();
        match self {
            Normal::Matrixvariate(mx) => {
                let k = kron_dense(Mat::<f64>::identity(n, n).as_ref(), mt.as_ref());
                let kt = k.transpose().to_owned();
                let mean = matmul(mx.mean.as_ref(), m.as_ref());
                let cov = matmul(matmul(k.as_ref(), mx.cov.as_ref()).as_ref(), kt.as_ref());
                Ok(Normal::new(mean, cov)?.with_damping(mx.damping))
            }
            _ => {
                let new_mean = match self.mean() {
                    Param::Matrix(x) => Param::Matrix(matmul(x.as_ref(), m.as_ref())),
                    Param::Operator(op) => Param::Operator(Rc::new(Product::new(op, aslinop(m.clone()))?)),
                    other => return Err(transform_mismatch(m, &other.shape())),
                };
                let k: Operator = Rc::new(Kronecker::new(Rc::new(Identity::new(n)), aslinop(mt)));
                let new_cov = congruence(k, &self.cov())?;
                Ok(Normal::new(new_mean, new_cov)?.with_damping(self.damping()))
            }
        }
    }
}

/// Precomputed square root of a covariance, ready to draw samples.
#[derive(Clone, Debug)]
pub struct Sampler {
    mean: Vec<f64>,
    kind: SamplerKind,
}

#[derive(Clone, Debug)]
enum SamplerKind {
    Scalar(f64),
    Dense(Mat<f64>),
    Kronecker(Operator),
    SymmetricKronecker { factor: Operator, n: usize },
}

impl Sampler {
    /// Length of a flattened sample.
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// One flattened (row-major) sample.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        let d = self.mean.len();
        let mut z = Vec::with_capacity(d);
        for _ in 0..d {
            let v: f64 = StandardNormal.sample(rng);
            z.push(v);
        }
        let mut out: Vec<f64> = match &self.kind {
            SamplerKind::Scalar(sd) => z.iter().map(|zi| sd * zi).collect(),
            SamplerKind::Dense(l) => {
                let zm = Mat::from_fn(d, 1, |i, _| z[i]);
                column((l * &zm).as_ref(), 0)
            }
            SamplerKind::Kronecker(f) => f.apply(&z),
            SamplerKind::SymmetricKronecker { factor, n } => Symmetrize::new(*n).apply(&factor.apply(&z)),
        };
        for (o, m) in out.iter_mut().zip(&self.mean) {
            *o += m;
        }
        out
    }
}

/// `K Σ Kᵀ`, lazily.
fn congruence(k: Operator, cov: &Param) -> Result<Param, PlsError> {
    let cov_op = cov
        .to_operator()
        .ok_or_else(|| PlsError::Unsupported(format!("transforming a {} covariance", cov.kind_name())))?;
    let inner: Operator = Rc::new(Product::new(cov_op, Rc::new(Transpose::new(k.clone())))?);
    Ok(Param::Operator(Rc::new(Product::new(k, inner)?)))
}

/// Dense `A ⊗ B`.
fn kron_dense(a: MatRef<'_, f64>, b: MatRef<'_, f64>) -> Mat<f64> {
    let mut out = Mat::zeros(a.nrows() * b.nrows(), a.ncols() * b.ncols());
    kron(out.as_mut(), a, b);
    out
}

/// Diagonal of `A ⊗ₛ B`, reshaped to `n × n`.
fn symmetric_kronecker_diagonal(a: MatRef<'_, f64>, b: MatRef<'_, f64>) -> Mat<f64> {
    let n = a.nrows();
    Mat::from_fn(n, n, |i, j| {
        0.25 * (a[(i, i)] * b[(j, j)] + a[(j, j)] * b[(i, i)] + a[(i, j)] * b[(j, i)] + a[(j, i)] * b[(i, j)])
    })
}

fn operator_diagonal(op: &dyn LinearOperator) -> Vec<f64> {
    let n = op.nrows().min(op.ncols());
    let mut e = vec![0.0; op.ncols()];
    let mut y = vec![0.0; op.nrows()];
    let mut d = Vec::with_capacity(n);
    for i in 0..n {
        e[i] = 1.0;
        op.matvec(&e, &mut y);
        d.push(y[i]);
        e[i] = 0.0;
    }
    d
}

fn gaussian_logpdf(
    mean: &[f64],
    cov: MatRef<'_, f64>,
    x: &[f64],
    damping: f64,
) -> Result<f64, PlsError> {
    if x.len() != mean.len() {
        return Err(PlsError::DimensionMismatch(format!(
            "point of dimension {} for a belief of dimension {}",
            x.len(),
            mean.len()
        )));
    }
    let l = cholesky_lower(cov, damping)?;
    let mut z = Mat::from_fn(mean.len(), 1, |i, _| x[i] - mean[i]);
    solve_lower_triangular_in_place(l.as_ref(), z.as_mut(), Par::Seq);
    let logdet: f64 = (0..l.nrows()).map(|i| 2.0 * l[(i, i)].ln()).sum();
    Ok(-0.5 * (mean.len() as f64 * LN_2PI + logdet + z.as_ref().squared_norm_l2()))
}

fn single_entry(x: &Param) -> Result<f64, PlsError> {
    if x.size() != 1 || x.is_operator() {
        return Err(PlsError::DimensionMismatch(format!(
            "expected a single value, got a {} of shape {:?}",
            x.kind_name(),
            x.shape()
        )));
    }
    Ok(x.to_flat()[0])
}

fn check_shape(expected: &[usize], x: &Param) -> Result<(), PlsError> {
    if x.shape() != expected {
        return Err(PlsError::DimensionMismatch(format!(
            "point of shape {:?} for a belief of shape {expected:?}",
            x.shape()
        )));
    }
    Ok(())
}

fn transform_mismatch(m: &Mat<f64>, shape: &[usize]) -> PlsError {
    PlsError::DimensionMismatch(format!(
        "cannot multiply a ({}, {}) matrix with a belief of shape {shape:?}",
        m.nrows(),
        m.ncols()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::dense::from_rows;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn dispatch_selects_variant() {
        assert!(matches!(Normal::new(0.0, 1.0).unwrap(), Normal::Univariate(_)));
        assert!(matches!(Normal::new(vec![0.5], 2.0).unwrap(), Normal::Univariate(_)));
        assert!(matches!(
            Normal::new(vec![0.0, 1.0], Mat::<f64>::identity(2, 2)).unwrap(),
            Normal::Multivariate(_)
        ));
        assert!(matches!(
            Normal::new(Mat::<f64>::zeros(2, 3), Mat::<f64>::identity(6, 6)).unwrap(),
            Normal::Matrixvariate(_)
        ));
        let w = aslinop(Mat::<f64>::identity(3, 3));
        let cov: Operator = Rc::new(SymmetricKronecker::identical(w).unwrap());
        assert!(matches!(Normal::new(Mat::<f64>::zeros(3, 3), cov).unwrap(), Normal::SymmetricKronecker(_)));
    }

    #[test]
    fn symmetric_kronecker_variance_matches_dense_diagonal() {
        let w = aslinop(from_rows(&[vec![2.0, 0.3], vec![0.3, 1.0]]));
        let cov: Operator = Rc::new(SymmetricKronecker::identical(w).unwrap());
        let dense = cov.todense();
        let x = Normal::new(Mat::<f64>::zeros(2, 2), cov).unwrap();
        let var = x.var().unwrap().to_flat();
        for i in 0..4 {
            assert_abs_diff_eq!(var[i], dense[(i, i)], epsilon = 1e-14);
        }
    }

    #[test]
    fn dense_sampler_reproduces_covariance_factor() {
        let cov = from_rows(&[vec![4.0, 2.0], vec![2.0, 3.0]]);
        let x = Normal::new(vec![1.0, -1.0], cov).unwrap().with_damping(0.0);
        let mut rng = StdRng::seed_from_u64(7);
        let n = 20_000;
        let samples = x.sample(&mut rng, n).unwrap();
        let mut c01 = 0.0;
        for s in &samples {
            let v = s.as_vector().unwrap();
            c01 += (v[0] - 1.0) * (v[1] + 1.0);
        }
        assert_abs_diff_eq!(c01 / n as f64, 2.0, epsilon = 0.15);
    }
}
