//! Prior means and covariance factors for the beliefs over `A` and `H = A⁻¹`.
//!
//! Without further information the priors are scalar: `H₀ = αI`, `A₀ = α⁻¹I` with the
//! step size `α = bᵀb / bᵀAb` that an exact line search along `b` would choose. An
//! initial guess `x₀` refines this into a rank-1 correction with `H₀b = x₀`, and
//! `A₀ = H₀⁻¹` in closed form, so both priors stay symmetric positive definite.

use crate::core::traits::{InnerProduct, LinearOperator, Operator};
use crate::core::wrappers::column;
use crate::linops::{LowRankUpdate, ScalarMult};
use faer::MatRef;
use std::rc::Rc;

/// Means of the two matrix priors.
#[derive(Clone, Debug)]
pub struct PriorMeans {
    /// Prior mean of `A`
    pub a0: Operator,
    /// Prior mean of `A⁻¹`
    pub ainv0: Operator,
}

/// `α = tr(BᵀB) / tr(BᵀAB)`, or 1 when that is not a positive number.
pub fn scalar_prior_scale(a: &dyn LinearOperator, b: MatRef<'_, f64>) -> f64 {
    let ip = ();
    let (mut bb, mut bab) = (0.0, 0.0);
    for j in 0..b.ncols() {
        let bj = column(b, j);
        bb += ip.dot(bj.as_slice(), bj.as_slice());
        bab += ip.dot(bj.as_slice(), a.apply(&bj).as_slice());
    }
    let alpha = bb / bab;
    if alpha.is_finite() && alpha > 0.0 { alpha } else { 1.0 }
}

/// `H₀ = αI`, `A₀ = α⁻¹I`.
pub fn scalar_prior_means(n: usize, alpha: f64) -> PriorMeans {
    PriorMeans { a0: Rc::new(ScalarMult::new(n, 1.0 / alpha)), ainv0: Rc::new(ScalarMult::new(n, alpha)) }
}

/// Prior means consistent with an initial guess `x₀` of the solution of `Ax = b`.
///
/// # Arguments
/// * `x0` - initial guess
/// * `b` - right-hand side
///
/// # Returns
/// The guess actually used (negated if `x₀ᵀb < 0`) and means with `H₀b = x₀`:
/// `H₀ = αI + (2/x₀ᵀb) v vᵀ` and `A₀ = α⁻¹I − 1/(α vᵀx₀) v vᵀ`, where
/// `α = x₀ᵀb / (2bᵀb)` and `v = x₀ − αb`. Returns `None` if `x₀ᵀb == 0`, in which case
/// the guess carries no usable information and the caller falls back to the scalar prior
/// with a zero initial guess.
pub fn prior_means_from_solution_guess(x0: &[f64], b: &[f64]) -> Option<(Vec<f64>, PriorMeans)> {
    let ip = ();
    let mut x0 = x0.to_vec();
    let mut bx0 = ip.dot(x0.as_slice(), b);
    if bx0 == 0.0 || !bx0.is_finite() {
        return None;
    }
    if bx0 < 0.0 {
        x0.iter_mut().for_each(|v| *v = -*v);
        bx0 = -bx0;
        log::debug!("initial guess points away from b; using its negative");
    }
    let n = b.len();
    let alpha = 0.5 * bx0 / ip.dot(b, b);
    let v: Vec<f64> = x0.iter().zip(b).map(|(xi, bi)| xi - alpha * bi).collect();
    let vx0 = ip.dot(v.as_slice(), x0.as_slice());

    let mut ainv0 = LowRankUpdate::new(Rc::new(ScalarMult::new(n, alpha)));
    ainv0.push(v.iter().map(|vi| 2.0 / bx0 * vi).collect(), v.clone());
    let mut a0 = LowRankUpdate::new(Rc::new(ScalarMult::new(n, 1.0 / alpha)));
    a0.push(v.iter().map(|vi| -vi / (alpha * vx0)).collect(), v);

    Some((x0, PriorMeans { a0: Rc::new(a0), ainv0: Rc::new(ainv0) }))
}
