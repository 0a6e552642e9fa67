//! Conjugate Gradient (unpreconditioned) per Saad §6.1.
//!
//! The classical reference the probabilistic solver reduces to: with a scalar prior
//! covariance factor for `A⁻¹` both produce the same iterates.

use crate::core::traits::{InnerProduct, LinearOperator};
use crate::error::PlsError;
use crate::solver::LinearSolver;
use crate::utils::convergence::{Convergence, SolveStats};

pub struct CgSolver {
    pub conv: Convergence<f64>,
    pub monitor: Option<Box<dyn FnMut(usize, &[f64], f64)>>,
    pub residual_history: Vec<f64>,
}

impl CgSolver {
    /// Stop once `‖r‖ ≤ max(atol, rtol ‖b‖)` or after `max_iters` iterations.
    pub fn new(atol: f64, rtol: f64, max_iters: usize) -> Self {
        Self { conv: Convergence::new(atol, rtol, max_iters), monitor: None, residual_history: Vec::new() }
    }

    /// Called after every iteration with the iteration number, the iterate and `‖r‖`.
    pub fn with_monitor<F>(mut self, f: F) -> Self
    where
        F: FnMut(usize, &[f64], f64) + 'static,
    {
        self.monitor = Some(Box::new(f));
        self
    }

    pub fn clear_history(&mut self) {
        self.residual_history.clear();
    }
}

impl LinearSolver for CgSolver {
    type Error = PlsError;

    fn solve(
        &mut self,
        a: &dyn LinearOperator,
        b: &[f64],
        x: &mut [f64],
    ) -> Result<SolveStats<f64>, PlsError> {
        let n = b.len();
        if a.shape() != (n, n) || x.len() != n {
            return Err(PlsError::DimensionMismatch(format!(
                "operator of shape {:?} with right-hand side of length {n} and guess of length {}",
                a.shape(),
                x.len()
            )));
        }
        let ip = ();
        let ax = a.apply(x);
        let mut r: Vec<f64> = b.iter().zip(&ax).map(|(bi, axi)| bi - axi).collect();
        let mut p = r.clone();
        let mut rsq = ip.dot(r.as_slice(), r.as_slice());
        let b_norm = ip.norm(b);
        self.residual_history.push(rsq.sqrt());

        let (stop, mut stats) = self.conv.check_residual(rsq.sqrt(), b_norm, 0);
        if stop {
            return Ok(stats);
        }
        let mut ap = vec![0.0; n];
        for i in 1..=self.conv.max_iters {
            a.matvec(&p, &mut ap);
            let pap = ip.dot(p.as_slice(), ap.as_slice());
            if pap <= 0.0 || !pap.is_finite() {
                return Err(PlsError::Breakdown { iteration: i, curvature: pap });
            }
            let alpha = rsq / pap;
            for (xj, pj) in x.iter_mut().zip(&p) {
                *xj += alpha * pj;
            }
            for (rj, apj) in r.iter_mut().zip(&ap) {
                *rj -= alpha * apj;
            }
            let rsq_new = ip.dot(r.as_slice(), r.as_slice());
            let res_norm = rsq_new.sqrt();
            self.residual_history.push(res_norm);
            if let Some(m) = self.monitor.as_mut() {
                m(i, x, res_norm);
            }
            let (stop, s) = self.conv.check_residual(res_norm, b_norm, i);
            stats = s;
            if stop {
                return Ok(stats);
            }
            let beta = rsq_new / rsq;
            for (pj, rj) in p.iter_mut().zip(&r) {
                *pj = rj + beta * *pj;
            }
            rsq = rsq_new;
        }
        Ok(stats)
    }
}
