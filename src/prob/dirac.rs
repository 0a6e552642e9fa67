//! Point masses and the random-variable wrapper the solver accepts as input.

use crate::error::PlsError;
use crate::prob::normal::Normal;
use crate::prob::param::Param;
use faer::Mat;

/// A point mass at `support`.
#[derive(Clone, Debug)]
pub struct Dirac {
    support: Param,
}

impl Dirac {
    pub fn new(support: impl Into<Param>) -> Self {
        Self { support: support.into() }
    }

    pub fn support(&self) -> &Param {
        &self.support
    }

    pub fn mean(&self) -> Param {
        self.support.clone()
    }

    pub fn sample(&self, size: usize) -> Vec<Param> {
        vec![self.support.clone(); size]
    }
}

/// Either an exactly known value or a Gaussian belief.
#[derive(Clone, Debug)]
pub enum RandomVariable {
    Constant(Dirac),
    Normal(Normal),
}

impl RandomVariable {
    pub fn mean(&self) -> Param {
        match self {
            RandomVariable::Constant(d) => d.mean(),
            RandomVariable::Normal(n) => n.mean(),
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        self.mean().shape()
    }

    pub fn as_normal(&self) -> Option<&Normal> {
        match self {
            RandomVariable::Normal(n) => Some(n),
            RandomVariable::Constant(_) => None,
        }
    }

    /// `self + other`; only shifts by point masses are supported.
    pub fn add(&self, other: &RandomVariable) -> Result<RandomVariable, PlsError> {
        match (self, other) {
            (RandomVariable::Constant(a), RandomVariable::Constant(b)) => {
                Ok(RandomVariable::Constant(Dirac::new(a.support.plus(&b.support)?)))
            }
            (RandomVariable::Normal(n), RandomVariable::Constant(d))
            | (RandomVariable::Constant(d), RandomVariable::Normal(n)) => {
                Ok(RandomVariable::Normal(n.add_dirac_shift(d.support())?))
            }
            (RandomVariable::Normal(_), RandomVariable::Normal(_)) => Err(PlsError::Unsupported(
                "addition of two normal beliefs with unknown correlation".to_string(),
            )),
        }
    }
}

impl From<Dirac> for RandomVariable {
    fn from(d: Dirac) -> Self {
        RandomVariable::Constant(d)
    }
}

impl From<Normal> for RandomVariable {
    fn from(n: Normal) -> Self {
        RandomVariable::Normal(n)
    }
}

impl From<Vec<f64>> for RandomVariable {
    fn from(v: Vec<f64>) -> Self {
        RandomVariable::Constant(Dirac::new(v))
    }
}

impl From<Mat<f64>> for RandomVariable {
    fn from(m: Mat<f64>) -> Self {
        RandomVariable::Constant(Dirac::new(m))
    }
}
