//! Matrix-based probabilistic linear solver for symmetric positive definite systems.
//!
//! The solver keeps two Gaussian beliefs with symmetric Kronecker covariance, one over
//! `A` and one over `H = A⁻¹`, and a current iterate `x`. Every iteration
//!
//! 1. picks the direction `s = −H̄r` (made `A`-conjugate to all earlier directions),
//! 2. observes `y = As`,
//! 3. takes the exact line search step `α = −sᵀr / sᵀy`,
//! 4. conditions the `A`-belief on `As = y` and the `H`-belief on `Hy = s`.
//!
//! Step 4 is a rank-2 update of each mean and a rank-1 downdate of each covariance
//! factor, so the beliefs are stored as [`LowRankUpdate`]s on top of the priors and
//! never densified. With `W_H₀ ∝ I` the iterates coincide with those of CG.
//!
//! Several right-hand sides are solved one column after the other with the beliefs
//! shared, so every column starts from everything learned about `A` so far.
//!
//! # References
//! - Hennig, P. (2015). Probabilistic interpretation of linear solvers. SIAM J. Optim.
//! - Wenger, J. & Hennig, P. (2020). Probabilistic linear solvers for machine learning.

use crate::config::{AssumeA, SolverOptions};
use crate::core::traits::{InnerProduct, LinearOperator, Operator};
use crate::core::wrappers::{axpy, column};
use crate::error::PlsError;
use crate::linops::{LowRankUpdate, Scaled, Sum, SymmetricKronecker};
use crate::prob::{Normal, Param};
use crate::solver::calibration::{
    estimate_noise_scale, nullspace_projector, rayleigh_quotient_scale,
};
use crate::solver::posterior::SolutionCovariance;
use crate::solver::prior::{
    prior_means_from_solution_guess, scalar_prior_means, scalar_prior_scale, PriorMeans,
};
use crate::solver::problinsolve::{MatrixPrior, Priors};
use crate::utils::convergence::{Convergence, Criteria, SolveInfo, StopReason};
use faer::Mat;
use log::{debug, info, trace, warn};
use std::rc::Rc;

/// Read-only view of the solver after an iteration.
pub struct IterationState<'a> {
    /// Iterations so far, over all right-hand sides
    pub iteration: usize,
    /// Right-hand side being solved
    pub column: usize,
    pub xk: &'a Normal,
    pub ak: &'a Normal,
    pub ainvk: &'a Normal,
    pub sk: &'a [f64],
    pub yk: &'a [f64],
    pub alphak: f64,
    pub resid: &'a [f64],
}

/// Per-iteration observer.
pub type Callback<'c> = dyn FnMut(&IterationState<'_>) + 'c;

/// Mean and covariance factor of a belief `N(M, W ⊗ₛ W)` over a symmetric matrix.
#[derive(Clone, Debug)]
struct MatrixBelief {
    mean: LowRankUpdate,
    cov_factor: LowRankUpdate,
    cov_factor0: Operator,
    trace0: f64,
    trace: f64,
}

impl MatrixBelief {
    fn new(mean: Operator, cov_factor: Operator) -> Self {
        let trace0 = cov_factor.trace();
        Self {
            mean: LowRankUpdate::new(mean),
            cov_factor: LowRankUpdate::new(cov_factor.clone()),
            cov_factor0: cov_factor,
            trace0,
            trace: trace0,
        }
    }

    /// Condition on `M d = o`, with the correction shrunk by `gamma` for noisy `o`.
    ///
    /// Returns `false` (and leaves the belief untouched) if `dᵀWd` is not positive.
    fn update(&mut self, d: &[f64], o: &[f64], gamma: f64) -> bool {
        let ip = ();
        let wd = self.cov_factor.apply(d);
        let dwd = ip.dot(d, wd.as_slice());
        if !dwd.is_finite() || dwd <= 0.0 {
            return false;
        }
        let md = self.mean.apply(d);
        let delta: Vec<f64> = o.iter().zip(&md).map(|(oi, mi)| oi - mi).collect();
        let u: Vec<f64> = wd.iter().map(|v| v / dwd).collect();
        let c = 0.5 * ip.dot(d, delta.as_slice());
        let v: Vec<f64> = delta.iter().zip(&u).map(|(di, ui)| gamma * (di - c * ui)).collect();
        self.mean.push_symmetric(u.clone(), v);

        self.trace -= gamma * ip.dot(u.as_slice(), wd.as_slice());
        self.cov_factor.push(u.iter().map(|x| -gamma * x).collect(), wd);
        true
    }

    fn mean_op(&self) -> Operator {
        Rc::new(self.mean.clone())
    }

    fn cov_factor_op(&self) -> Operator {
        Rc::new(self.cov_factor.clone())
    }

    fn belief(&self, w: Operator, damping: f64) -> Result<Normal, PlsError> {
        let cov: Operator = Rc::new(SymmetricKronecker::identical(w)?);
        Ok(Normal::new(self.mean_op(), cov)?.with_damping(damping))
    }
}

/// Outcome of one iteration.
enum Step {
    Taken,
    /// Curvature `sᵀy` of the rejected direction
    Breakdown(f64),
}

/// Probabilistic linear solver for `AX = B` with symmetric positive definite `A`.
pub struct SymmetricMatrixBasedSolver {
    a: Operator,
    b: Mat<f64>,
    b_is_vector: bool,
    x0: Option<Mat<f64>>,
    x: Mat<f64>,
    resid: Mat<f64>,
    a_belief: MatrixBelief,
    ainv_belief: MatrixBelief,
    s: Vec<Vec<f64>>,
    y: Vec<Vec<f64>>,
    options: SolverOptions,
    conv: Convergence<f64>,
    gamma: f64,
    iteration: usize,
}

impl SymmetricMatrixBasedSolver {
    /// Validate the problem and set up the priors.
    ///
    /// # Arguments
    /// * `a` - square system operator
    /// * `b` - right-hand sides, one per column
    /// * `b_is_vector` - return the solution belief over a vector rather than an `n × 1` matrix
    /// * `priors` - optional prior beliefs over `A`, `A⁻¹` and an initial guess
    /// * `options` - solver configuration
    pub fn new(
        a: Operator,
        b: Mat<f64>,
        b_is_vector: bool,
        priors: Priors,
        options: &SolverOptions,
    ) -> Result<Self, PlsError> {
        options.validate()?;
        let (m, n) = a.shape();
        if m != n {
            return Err(PlsError::NotSquare { rows: m, cols: n });
        }
        if b.nrows() != n {
            return Err(PlsError::DimensionMismatch(format!(
                "right-hand side with {} rows for an operator of shape ({n}, {n})",
                b.nrows()
            )));
        }
        let k = b.ncols();
        let mut x0 = priors.x0.as_ref().map(|p| initial_guess(p, n, k)).transpose()?;
        for (name, prior) in [("A0", &priors.a0), ("Ainv0", &priors.ainv0)] {
            if let Some(shape) = prior.as_ref().map(MatrixPrior::shape) {
                if shape != (n, n) {
                    return Err(PlsError::DimensionMismatch(format!(
                        "{name} has shape {shape:?}, expected ({n}, {n})"
                    )));
                }
            }
        }

        let alpha = scalar_prior_scale(a.as_ref(), b.as_ref());
        let mut guess_means = None;
        if priors.a0.is_none() && priors.ainv0.is_none() && k == 1 {
            if let Some(x0m) = x0.as_ref() {
                let guess = column(x0m.as_ref(), 0);
                let bj = column(b.as_ref(), 0);
                match prior_means_from_solution_guess(&guess, &bj) {
                    Some((corrected, means)) => {
                        x0 = Some(Mat::from_fn(n, 1, |i, _| corrected[i]));
                        guess_means = Some(means);
                    }
                    None => {
                        debug!(
                            "initial guess is orthogonal to b; starting from zero with scalar priors"
                        );
                        x0 = Some(Mat::zeros(n, 1));
                    }
                }
            }
        }
        let from_guess = guess_means.is_some();
        let defaults = guess_means.unwrap_or_else(|| scalar_prior_means(n, alpha));
        let PriorMeans { a0: default_a0, ainv0: default_ainv0 } = defaults;

        let (ainv0, w_h0) = match &priors.ainv0 {
            Some(p) => {
                let mean = p.mean()?;
                let w = p.cov_factor()?.unwrap_or_else(|| mean.clone());
                (mean, w)
            }
            None => (default_ainv0.clone(), default_ainv0),
        };
        let (a0, w_a0) = match &priors.a0 {
            Some(p) => {
                let mean = p.mean()?;
                let w = match p.cov_factor()? {
                    Some(w) => w,
                    None => default_a_factor(&a, &mean, options.assume_a),
                };
                (mean, w)
            }
            None => {
                let w = default_a_factor(&a, &default_a0, options.assume_a);
                (default_a0, w)
            }
        };

        let gamma = match options.assume_a {
            AssumeA::SymPos => 1.0,
            AssumeA::SymPosNoise => {
                let eps = options.noise_scale.unwrap_or(0.0);
                1.0 / (1.0 + eps * eps)
            }
        };
        debug!(
            "problinsolve: n = {n}, {k} right-hand side(s), assume_A = {}, prior from {}",
            options.assume_a,
            if from_guess {
                "initial guess"
            } else if priors.a0.is_some() || priors.ainv0.is_some() {
                "user input"
            } else {
                "scalar default"
            }
        );

        Ok(Self {
            a,
            conv: options.convergence(n),
            x: Mat::zeros(n, k),
            resid: Mat::zeros(n, k),
            b,
            b_is_vector: b_is_vector && k == 1,
            x0,
            a_belief: MatrixBelief::new(a0, w_a0),
            ainv_belief: MatrixBelief::new(ainv0, w_h0),
            s: Vec::new(),
            y: Vec::new(),
            options: options.clone(),
            gamma,
            iteration: 0,
        })
    }

    pub fn dim(&self) -> usize {
        self.b.nrows()
    }

    pub fn iterations(&self) -> usize {
        self.iteration
    }

    /// Search directions taken so far.
    pub fn search_directions(&self) -> &[Vec<f64>] {
        &self.s
    }

    /// Observations `yᵢ = Asᵢ` made so far.
    pub fn observations(&self) -> &[Vec<f64>] {
        &self.y
    }

    /// Starting point for column `j`: the given guess (corrected so its residual is
    /// orthogonal to the explored directions), or `H̄b`.
    fn initial_iterate(&self, j: usize, bj: &[f64]) -> Vec<f64> {
        match &self.x0 {
            Some(x0) => {
                let mut xj = column(x0.as_ref(), j);
                if !self.s.is_empty() {
                    let ax = self.a.apply(&xj);
                    let r: Vec<f64> = bj.iter().zip(&ax).map(|(bi, ai)| bi - ai).collect();
                    axpy(1.0, &self.ainv_belief.mean.apply(&r), &mut xj);
                }
                xj
            }
            None => self.ainv_belief.mean.apply(bj),
        }
    }

    /// `tr Cov[x]` for the right-hand side `bj` under the current belief over `A⁻¹`.
    fn solution_trace(&self, bj: &[f64]) -> f64 {
        let ip = ();
        let wb = self.ainv_belief.cov_factor.apply(bj);
        let (bwb, wbwb) = (ip.dot(bj, wb.as_slice()), ip.dot(wb.as_slice(), wb.as_slice()));
        0.5 * (self.ainv_belief.trace * bwb + wbwb)
    }

    fn step(
        &mut self,
        x: &mut [f64],
        r: &mut [f64],
        column: usize,
        callback: Option<&mut Callback<'_>>,
    ) -> Result<Step, PlsError> {
        let ip = ();
        let mut s: Vec<f64> = self.ainv_belief.mean.apply(r).iter().map(|v| -v).collect();
        if self.options.reorthogonalize {
            for (si, yi) in self.s.iter().zip(&self.y) {
                let c = ip.dot(yi.as_slice(), s.as_slice()) / ip.dot(yi.as_slice(), si.as_slice());
                axpy(-c, si, &mut s);
            }
        }
        let s_norm = ip.norm(s.as_slice());
        if s_norm == 0.0 {
            return Ok(Step::Breakdown(0.0));
        }
        let y = self.a.apply(&s);
        let sy = ip.dot(s.as_slice(), y.as_slice());
        if !sy.is_finite() || sy <= f64::EPSILON * s_norm * ip.norm(y.as_slice()) {
            return Ok(Step::Breakdown(sy));
        }
        let alpha = -ip.dot(s.as_slice(), &*r) / sy;
        axpy(alpha, &s, x);
        axpy(alpha, &y, r);
        self.iteration += 1;

        if !self.a_belief.update(&s, &y, self.gamma) {
            debug!(
                "iteration {}: degenerate covariance factor for A, belief not updated",
                self.iteration
            );
        }
        if !self.ainv_belief.update(&y, &s, self.gamma) {
            debug!(
                "iteration {}: degenerate covariance factor for A^-1, belief not updated",
                self.iteration
            );
        }
        trace!(
            "iteration {}: column {column}, |r| = {:.3e}, alpha = {alpha:.3e}, s^T y = {sy:.3e}",
            self.iteration,
            ip.norm(&*r)
        );

        if let Some(cb) = callback {
            let damping = self.options.damping;
            let w_h = self.ainv_belief.cov_factor_op();
            let ak = self.a_belief.belief(self.a_belief.cov_factor_op(), damping)?;
            let ainvk = self.ainv_belief.belief(w_h.clone(), damping)?;
            let bj = Mat::from_fn(self.dim(), 1, |i, _| self.b[(i, column)]);
            let xcov: Operator = Rc::new(SolutionCovariance::new(w_h, &bj, self.ainv_belief.trace));
            let xk = Normal::new(x.to_vec(), xcov)?.with_damping(damping);
            cb(&IterationState {
                iteration: self.iteration,
                column,
                xk: &xk,
                ak: &ak,
                ainvk: &ainvk,
                sk: &s,
                yk: &y,
                alphak: alpha,
                resid: r,
            });
        }

        self.s.push(s);
        self.y.push(y);
        Ok(Step::Taken)
    }

    /// Run the solver.
    ///
    /// # Returns
    /// Beliefs over the solution, `A` and `A⁻¹`, and a [`SolveInfo`]. Non-convergence and
    /// breakdown are reported in the info, not as errors.
    pub fn solve(
        &mut self,
        mut callback: Option<&mut Callback<'_>>,
    ) -> Result<(Normal, Normal, Normal, SolveInfo), PlsError> {
        let (n, k) = (self.b.nrows(), self.b.ncols());
        let ip = ();
        let mut converged = true;
        let mut reason = StopReason::MaxIter;
        let mut halted = false;

        for j in 0..k {
            let bj = column(self.b.as_ref(), j);
            let mut xj = self.initial_iterate(j, &bj);
            let ax = self.a.apply(&xj);
            let mut rj: Vec<f64> = ax.iter().zip(&bj).map(|(ai, bi)| ai - bi).collect();
            if halted {
                self.store_column(j, &xj, &rj);
                continue;
            }
            let b_norm = ip.norm(bj.as_slice());
            let col_reason = loop {
                let uncertainty = self
                    .conv
                    .criteria
                    .contains(Criteria::UNCERTAINTY)
                    .then(|| self.solution_trace(&bj).max(0.0).sqrt());
                let res_norm = ip.norm(rj.as_slice());
                if let Some(stop) = self.conv.check(res_norm, b_norm, uncertainty, self.iteration) {
                    break stop;
                }
                let step = self.step(&mut xj, &mut rj, j, callback.as_deref_mut())?;
                if let Step::Breakdown(curvature) = step {
                    warn!(
                        "{}",
                        PlsError::Breakdown { iteration: self.iteration, curvature }
                    );
                    break StopReason::Breakdown;
                }
            };
            self.store_column(j, &xj, &rj);
            if !col_reason.is_converged() {
                converged = false;
                halted = true;
                reason = col_reason;
            } else if converged {
                reason = col_reason;
            }
        }

        let result = self.posterior(converged, reason)?;
        if converged {
            info!("problinsolve converged after {} iterations ({:?})", self.iteration, reason);
        } else {
            warn!(
                "problinsolve stopped after {} iterations without converging ({:?}), |r| = {:.3e}",
                self.iteration, reason, result.3.residual_norm
            );
        }
        debug!(
            "problinsolve: {n}x{n} system, {k} right-hand side(s), tr Cov[x] = {:.3e}",
            result.3.trace_sol_cov
        );
        Ok(result)
    }

    fn store_column(&mut self, j: usize, xj: &[f64], rj: &[f64]) {
        for i in 0..self.dim() {
            self.x[(i, j)] = xj[i];
            self.resid[(i, j)] = rj[i];
        }
    }

    /// Assemble the returned beliefs: covariance factors from the loop, plus the
    /// calibrated uncertainty on the unexplored subspace and the noise term.
    fn posterior(
        &self,
        converged: bool,
        stop_reason: StopReason,
    ) -> Result<(Normal, Normal, Normal, SolveInfo), PlsError> {
        let n = self.dim();
        let mut w_a = self.a_belief.cov_factor_op();
        let mut w_h = self.ainv_belief.cov_factor_op();
        let mut trace_w_h = self.ainv_belief.trace;

        let calibration = if self.options.calibrate {
            rayleigh_quotient_scale(&self.s, &self.y, n)
        } else {
            None
        };
        if let Some(c) = calibration {
            let p_s = nullspace_projector(&self.s, n)?;
            let p_y = nullspace_projector(&self.y, n)?;
            trace_w_h += c.psi * p_y.trace();
            w_a = plus_scaled(w_a, c.phi, p_s)?;
            w_h = plus_scaled(w_h, c.psi, p_y)?;
        }

        let noise_scale = match self.options.assume_a {
            AssumeA::SymPos => None,
            AssumeA::SymPosNoise => {
                self.options.noise_scale.or_else(|| estimate_noise_scale(&self.s, &self.y))
            }
        };
        if let Some(eps) = noise_scale.filter(|e| *e > 0.0) {
            let e2 = eps * eps;
            trace_w_h += e2 * self.ainv_belief.trace0;
            w_a = plus_scaled(w_a, e2, self.a_belief.cov_factor0.clone())?;
            w_h = plus_scaled(w_h, e2, self.ainv_belief.cov_factor0.clone())?;
        }

        let damping = self.options.damping;
        let a_post = self.a_belief.belief(w_a, damping)?;
        let ainv_post = self.ainv_belief.belief(w_h.clone(), damping)?;
        let xcov = SolutionCovariance::new(w_h, &self.b, trace_w_h);
        let trace_sol_cov = xcov.trace();
        let xmean = if self.b_is_vector {
            Param::Vector(column(self.x.as_ref(), 0))
        } else {
            Param::Matrix(self.x.clone())
        };
        let cov: Operator = Rc::new(xcov);
        let x_post = Normal::new(xmean, cov)?.with_damping(damping);

        let ip = ();
        let residual_norm = (0..self.b.ncols())
            .map(|j| {
                let r = column(self.resid.as_ref(), j);
                ip.dot(r.as_slice(), r.as_slice())
            })
            .sum::<f64>()
            .sqrt();
        let info = SolveInfo {
            iterations: self.iteration,
            maxiter: self.conv.max_iters,
            residual_norm,
            converged,
            stop_reason,
            trace_sol_cov,
            calibration_scale: calibration.map(|c| c.phi),
            noise_scale,
            assume_a: self.options.assume_a,
        };
        Ok((x_post, a_post, ainv_post, info))
    }
}

/// `w + c·term`, lazily.
fn plus_scaled(w: Operator, c: f64, term: Operator) -> Result<Operator, PlsError> {
    let scaled: Operator = Rc::new(Scaled::new(c, term));
    let sum: Operator = Rc::new(Sum::new(vec![w, scaled])?);
    Ok(sum)
}

/// `W_A₀ = A` for exact observations, `W_A₀ = A₀` when `A` is only seen through noise.
fn default_a_factor(a: &Operator, a0: &Operator, assume_a: AssumeA) -> Operator {
    match assume_a {
        AssumeA::SymPos => a.clone(),
        AssumeA::SymPosNoise => a0.clone(),
    }
}

/// Initial guess as an `n × k` block.
fn initial_guess(x0: &Param, n: usize, k: usize) -> Result<Mat<f64>, PlsError> {
    match x0 {
        Param::Vector(v) if k == 1 && v.len() == n => Ok(Mat::from_fn(n, 1, |i, _| v[i])),
        Param::Matrix(m) if m.nrows() == n && m.ncols() == k => Ok(m.clone()),
        other => Err(PlsError::DimensionMismatch(format!(
            "initial guess of shape {:?} for a solution of shape ({n}, {k})",
            other.shape()
        ))),
    }
}
