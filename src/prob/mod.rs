//! Beliefs: point masses and structured Gaussians.

pub mod dirac;
pub mod normal;
pub mod param;

pub use dirac::{Dirac, RandomVariable};
pub use normal::{
    MatrixvariateNormal, MultivariateNormal, Normal, OperatorvariateNormal, Sampler, SymmetricKroneckerNormal,
    UnivariateNormal, DEFAULT_DAMPING,
};
pub use param::Param;
