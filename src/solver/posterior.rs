//! Closed-form posteriors under symmetric Kronecker covariances, and the belief over the
//! solution they induce.
//!
//! Conditioning `N(A₀, W ⊗ₛ W)` on `AS = Y` gives
//!
//! ```text
//! Δ = Y − A₀S,   U = WS (SᵀWS)⁻¹
//! A₊ = A₀ + ΔUᵀ + UΔᵀ − U SᵀΔ Uᵀ
//! W₊ = W (I − S Uᵀ)
//! ```
//!
//! The solver applies this one direction at a time; the batch forms here are the
//! reference the incremental updates are checked against.
//!
//! # References
//! - Hennig, P. (2015). Probabilistic interpretation of linear solvers. SIAM J. Optim.
//! - Wenger, J. & Hennig, P. (2020). Probabilistic linear solvers for machine learning.

use crate::core::traits::{LinearOperator, Operator};
use crate::core::wrappers::{matmul, matmul_tn};
use crate::error::PlsError;
use crate::matrix::dense::{lu_solve, unvec_row_major, vec_row_major};
use faer::Mat;

fn check_observations(w: &Mat<f64>, s: &Mat<f64>) -> Result<(), PlsError> {
    if w.nrows() != w.ncols() {
        return Err(PlsError::NotSquare { rows: w.nrows(), cols: w.ncols() });
    }
    if s.nrows() != w.nrows() {
        return Err(PlsError::DimensionMismatch(format!(
            "{} search directions of length {} for a covariance factor of order {}",
            s.ncols(),
            s.nrows(),
            w.nrows()
        )));
    }
    Ok(())
}

/// `U = WS (SᵀWS)⁻¹`
fn gain(w: &Mat<f64>, s: &Mat<f64>) -> Result<Mat<f64>, PlsError> {
    let ws = matmul(w.as_ref(), s.as_ref());
    let g = matmul_tn(s.as_ref(), ws.as_ref());
    // U = WS G⁻¹ and G is symmetric, so Uᵀ = G⁻¹ (WS)ᵀ
    let wst = ws.transpose().to_owned();
    Ok(lu_solve(g.as_ref(), wst.as_ref())?.transpose().to_owned())
}

/// Posterior mean of a matrix belief `N(a0, w ⊗ₛ w)` after observing `a · s = y`.
pub fn symmetric_posterior_mean(
    a0: &Mat<f64>,
    w: &Mat<f64>,
    s: &Mat<f64>,
    y: &Mat<f64>,
) -> Result<Mat<f64>, PlsError> {
    check_observations(w, s)?;
    if y.nrows() != s.nrows() || y.ncols() != s.ncols() {
        return Err(PlsError::DimensionMismatch(format!(
            "observations of shape ({}, {}) for directions of shape ({}, {})",
            y.nrows(),
            y.ncols(),
            s.nrows(),
            s.ncols()
        )));
    }
    let u = gain(w, s)?;
    let a0s = matmul(a0.as_ref(), s.as_ref());
    let delta = Mat::from_fn(y.nrows(), y.ncols(), |i, j| y[(i, j)] - a0s[(i, j)]);
    let ut = u.transpose().to_owned();
    let delta_ut = matmul(delta.as_ref(), ut.as_ref());
    let std = matmul_tn(s.as_ref(), delta.as_ref());
    let correction = matmul(matmul(u.as_ref(), std.as_ref()).as_ref(), ut.as_ref());
    let n = a0.nrows();
    Ok(Mat::from_fn(n, n, |i, j| a0[(i, j)] + delta_ut[(i, j)] + delta_ut[(j, i)] - correction[(i, j)]))
}

/// Posterior covariance factor `W (I − S Uᵀ)`.
pub fn symmetric_posterior_covfactor(w: &Mat<f64>, s: &Mat<f64>) -> Result<Mat<f64>, PlsError> {
    check_observations(w, s)?;
    let u = gain(w, s)?;
    let ws = matmul(w.as_ref(), s.as_ref());
    let ut = u.transpose().to_owned();
    let down = matmul(ws.as_ref(), ut.as_ref());
    Ok(Mat::from_fn(w.nrows(), w.ncols(), |i, j| w[(i, j)] - down[(i, j)]))
}

/// Covariance of `x = HB` under `H ~ N(H̄, W ⊗ₛ W)`, acting on row-major `vec(X)` of
/// `n × k` blocks: `X ↦ ½(W X BᵀWB + WB XᵀWB)`.
#[derive(Clone, Debug)]
pub struct SolutionCovariance {
    w: Operator,
    wb: Mat<f64>,
    bwb: Mat<f64>,
    trace: f64,
}

impl SolutionCovariance {
    /// `trace_w` is `tr W`, which the solver tracks anyway.
    pub fn new(w: Operator, b: &Mat<f64>, trace_w: f64) -> Self {
        let wb = w.matmat(b.as_ref());
        let bwb = matmul_tn(b.as_ref(), wb.as_ref());
        let tr_bwb: f64 = (0..bwb.nrows()).map(|i| bwb[(i, i)]).sum();
        let wb_fro2: f64 = vec_row_major(wb.as_ref()).iter().map(|v| v * v).sum();
        let trace = 0.5 * (trace_w * tr_bwb + wb_fro2);
        Self { w, wb, bwb, trace }
    }
}

impl LinearOperator for SolutionCovariance {
    fn shape(&self) -> (usize, usize) {
        let d = self.wb.nrows() * self.wb.ncols();
        (d, d)
    }
    fn matvec(&self, x: &[f64], y: &mut [f64]) {
        let (n, k) = (self.wb.nrows(), self.wb.ncols());
        let xm = unvec_row_major(x, n, k);
        let wx = self.w.matmat(xm.as_ref());
        let left = matmul(wx.as_ref(), self.bwb.as_ref());
        let xt_wb = matmul_tn(xm.as_ref(), self.wb.as_ref());
        let right = matmul(self.wb.as_ref(), xt_wb.as_ref());
        let out = Mat::from_fn(n, k, |i, j| 0.5 * (left[(i, j)] + right[(i, j)]));
        y.copy_from_slice(&vec_row_major(out.as_ref()));
    }
    fn rmatvec(&self, x: &[f64], y: &mut [f64]) {
        self.matvec(x, y);
    }
    fn trace(&self) -> f64 {
        self.trace
    }
}
