//! An operator only observable through additive random perturbations.
//!
//! Every application of a [`NoisyOperator`] draws a fresh `E` from its noise belief and
//! returns `(A + E) x`. This models systems whose matrix-vector products come out of a
//! stochastic computation, and is what the noise-aware solver variant is built for.

use crate::core::traits::{LinearOperator, Operator};
use crate::error::PlsError;
use crate::linops::{aslinop, SymmetricKronecker};
use crate::matrix::dense::unvec_row_major;
use crate::prob::{Normal, Sampler};
use faer::Mat;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

pub struct NoisyOperator {
    a: Operator,
    noise: Sampler,
    rng: RefCell<StdRng>,
}

impl NoisyOperator {
    /// `A + E` with `E` drawn from `noise`, which must describe `n × n` matrices.
    pub fn new(a: Operator, noise: &Normal, seed: u64) -> Result<Self, PlsError> {
        let (m, n) = a.shape();
        if m != n {
            return Err(PlsError::NotSquare { rows: m, cols: n });
        }
        if noise.shape() != [n, n] {
            return Err(PlsError::DimensionMismatch(format!(
                "noise of shape {:?} for an operator of shape ({n}, {n})",
                noise.shape()
            )));
        }
        Ok(Self { a, noise: noise.sampler()?, rng: RefCell::new(StdRng::seed_from_u64(seed)) })
    }

    /// `A + E` with `E ~ N(0, ε² (I ⊗ₛ I))`, i.e. symmetric noise of scale `ε`.
    pub fn with_symmetric_noise(a: Operator, eps: f64, seed: u64) -> Result<Self, PlsError> {
        let n = a.nrows();
        let w = aslinop(Mat::from_fn(n, n, |i, j| if i == j { eps } else { 0.0 }));
        let cov: Operator = Rc::new(SymmetricKronecker::identical(w)?);
        let noise = Normal::new(Mat::<f64>::zeros(n, n), cov)?.with_damping(0.0);
        Self::new(a, &noise, seed)
    }

    /// The noise-free operator.
    pub fn exact(&self) -> &Operator {
        &self.a
    }

    fn draw(&self) -> Mat<f64> {
        let n = self.a.nrows();
        let flat = self.noise.draw(&mut *self.rng.borrow_mut());
        unvec_row_major(&flat, n, n)
    }
}

fn as_column(x: &[f64]) -> Mat<f64> {
    Mat::from_fn(x.len(), 1, |i, _| x[i])
}

impl fmt::Debug for NoisyOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoisyOperator").field("a", &self.a).field("dim", &self.noise.dim()).finish()
    }
}

impl LinearOperator for NoisyOperator {
    fn shape(&self) -> (usize, usize) {
        self.a.shape()
    }
    fn matvec(&self, x: &[f64], y: &mut [f64]) {
        self.a.matvec(x, y);
        let ex = &self.draw() * &as_column(x);
        for (i, yi) in y.iter_mut().enumerate() {
            *yi += ex[(i, 0)];
        }
    }
    fn rmatvec(&self, x: &[f64], y: &mut [f64]) {
        self.a.rmatvec(x, y);
        let e = self.draw();
        let etx = e.transpose() * as_column(x).as_ref();
        for (j, yj) in y.iter_mut().enumerate() {
            *yj += etx[(j, 0)];
        }
    }
}
