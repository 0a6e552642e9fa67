//! Post-hoc uncertainty calibration.
//!
//! After the loop the posterior covariance factors vanish on the explored subspace, but
//! the remaining `n − k` directions still carry the prior's scale, which is usually far
//! off. Calibration replaces it with a scale read off the observations: the Rayleigh
//! quotients `sᵢᵀyᵢ / sᵢᵀsᵢ` sample the spectrum of `A`, their trend over the iterations
//! is extrapolated to the unexplored directions, and the covariance factors receive
//! `φ P_S⊥` (belief over `A`) and `φ⁻¹ P_Y⊥` (belief over `A⁻¹`).
//!
//! # References
//! - Wenger, J. & Hennig, P. (2020). Probabilistic linear solvers for machine learning.

use crate::core::traits::{InnerProduct, Operator};
use crate::core::wrappers::{columns_to_mat, matmul_tn};
use crate::error::PlsError;
use crate::linops::{Identity, LowRankUpdate};
use crate::matrix::dense::lu_solve;
use std::rc::Rc;

/// Uncertainty scales for the unexplored subspace.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CalibrationScale {
    /// Scale `φ` for the belief over `A`
    pub phi: f64,
    /// Scale `ψ = φ⁻¹` for the belief over `A⁻¹`
    pub psi: f64,
}

/// Fit `log(sᵢᵀyᵢ / sᵢᵀsᵢ) ≈ c₀ + c₁ i` and average the prediction over the iterations
/// `k + 1, …, n` that were not run. Predictions are clamped to the observed range.
///
/// Returns `None` when there is nothing to fit (no direction with positive curvature).
pub fn rayleigh_quotient_scale(
    s: &[Vec<f64>],
    y: &[Vec<f64>],
    n: usize,
) -> Option<CalibrationScale> {
    let ip = ();
    let logs: Vec<(f64, f64)> = s
        .iter()
        .zip(y)
        .enumerate()
        .filter_map(|(i, (si, yi))| {
            let r = ip.dot(si.as_slice(), yi.as_slice()) / ip.dot(si.as_slice(), si.as_slice());
            (r.is_finite() && r > 0.0).then(|| ((i + 1) as f64, r.ln()))
        })
        .collect();
    if logs.is_empty() {
        return None;
    }
    let m = logs.len() as f64;
    let lo = logs.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let hi = logs.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    let mean_t = logs.iter().map(|p| p.0).sum::<f64>() / m;
    let mean_l = logs.iter().map(|p| p.1).sum::<f64>() / m;

    let (c0, c1) = if logs.len() < 3 {
        (mean_l, 0.0)
    } else {
        let stt: f64 = logs.iter().map(|p| (p.0 - mean_t).powi(2)).sum();
        let stl: f64 = logs.iter().map(|p| (p.0 - mean_t) * (p.1 - mean_l)).sum();
        let c1 = if stt > 0.0 { stl / stt } else { 0.0 };
        (mean_l - c1 * mean_t, c1)
    };

    let k = s.len();
    let log_phi = if k >= n {
        mean_l
    } else {
        let preds: Vec<f64> = (k + 1..=n).map(|i| (c0 + c1 * i as f64).clamp(lo, hi)).collect();
        preds.iter().sum::<f64>() / preds.len() as f64
    };
    let phi = log_phi.exp();
    log::debug!("calibration: fitted log Rayleigh quotient {c0:.3e} + {c1:.3e} i, phi = {phi:.3e}");
    Some(CalibrationScale { phi, psi: 1.0 / phi })
}

/// `I − V(VᵀV)⁻¹Vᵀ`, the orthogonal projector onto the complement of the span of `V`.
pub fn nullspace_projector(v: &[Vec<f64>], n: usize) -> Result<Operator, PlsError> {
    let mut p = LowRankUpdate::new(Rc::new(Identity::new(n)));
    if v.is_empty() {
        return Ok(Rc::new(p));
    }
    let vm = columns_to_mat(v, n);
    let gram = matmul_tn(vm.as_ref(), vm.as_ref());
    let vt = vm.transpose().to_owned();
    // rows of (VᵀV)⁻¹Vᵀ
    let coeffs = lu_solve(gram.as_ref(), vt.as_ref())?;
    for (i, vi) in v.iter().enumerate() {
        let row: Vec<f64> = (0..n).map(|j| coeffs[(i, j)]).collect();
        p.push(vi.iter().map(|x| -x).collect(), row);
    }
    Ok(Rc::new(p))
}

/// Relative noise level of the observations, from how far `SᵀY` is from symmetric.
///
/// Under `yᵢ = (A + Eᵢ)sᵢ` with `Eᵢ ~ N(0, ε² A ⊗ₛ A)` and `A`-conjugate directions,
/// `sₖᵀyᵢ − sᵢᵀyₖ` has variance `ε² (sᵢᵀyᵢ)(sₖᵀyₖ)`; averaging the normalized squares over
/// all pairs estimates `ε²`. Needs at least two directions.
pub fn estimate_noise_scale(s: &[Vec<f64>], y: &[Vec<f64>]) -> Option<f64> {
    let ip = ();
    let curv: Vec<f64> = s.iter().zip(y).map(|(si, yi)| ip.dot(si.as_slice(), yi.as_slice())).collect();
    let mut acc = 0.0;
    let mut pairs = 0usize;
    for k in 0..s.len() {
        for i in 0..k {
            let denom = curv[i] * curv[k];
            if denom <= 0.0 || !denom.is_finite() {
                continue;
            }
            let d = ip.dot(s[k].as_slice(), y[i].as_slice()) - ip.dot(s[i].as_slice(), y[k].as_slice());
            acc += d * d / denom;
            pairs += 1;
        }
    }
    (pairs > 0).then(|| (acc / pairs as f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::LinearOperator;
    use approx::assert_abs_diff_eq;

    #[test]
    fn constant_spectrum_gives_its_scale() {
        // A = 3I: every Rayleigh quotient is 3
        let s = vec![vec![1.0, 0.0, 0.0], vec![0.0, 2.0, 0.0]];
        let y: Vec<Vec<f64>> = s.iter().map(|v| v.iter().map(|x| 3.0 * x).collect()).collect();
        let c = rayleigh_quotient_scale(&s, &y, 3).unwrap();
        assert_abs_diff_eq!(c.phi, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(c.psi, 1.0 / 3.0, epsilon = 1e-12);
        assert!(rayleigh_quotient_scale(&[], &[], 3).is_none());
    }

    #[test]
    fn projector_annihilates_span() {
        let v = vec![vec![1.0, 1.0, 0.0]];
        let p = nullspace_projector(&v, 3).unwrap();
        let pv = p.apply(&v[0]);
        for x in pv {
            assert_abs_diff_eq!(x, 0.0, epsilon = 1e-14);
        }
        let e = p.apply(&[1.0, -1.0, 2.0]);
        assert_abs_diff_eq!(e[0], 1.0, epsilon = 1e-14);
        assert_abs_diff_eq!(e[2], 2.0, epsilon = 1e-14);
        assert_abs_diff_eq!(p.trace(), 2.0, epsilon = 1e-14);
    }

    #[test]
    fn symmetric_observations_have_no_noise() {
        let s = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let y = vec![vec![2.0, 0.0], vec![0.0, 5.0]];
        assert_abs_diff_eq!(estimate_noise_scale(&s, &y).unwrap(), 0.0);
        assert!(estimate_noise_scale(&s[..1], &y[..1]).is_none());
    }
}
