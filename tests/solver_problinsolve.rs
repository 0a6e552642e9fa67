//! End-to-end tests for `problinsolve` on small random SPD systems.
//!
//! The systems are built as `A = Mᵀ M + n I` from a seeded generator, so every test is
//! reproducible and the conditioning is mild enough for tight tolerances. Reference
//! solutions come from a dense LU solve, reference posteriors from the batch closed
//! forms in `solver::posterior`.

use approx::assert_abs_diff_eq;
use faer::Mat;
use probkryst::core::wrappers::{column, columns_to_mat, matmul, matmul_tn};
use probkryst::linops::{aslinop, Identity, NoisyOperator, SymmetricKronecker};
use probkryst::matrix::dense::{asymmetry, lu_solve};
use probkryst::solver::posterior::{symmetric_posterior_covfactor, symmetric_posterior_mean};
use probkryst::solver::{problinsolve, CgSolver, IterationState, LinearSolver, Priors};
use probkryst::{AssumeA, Dirac, LinearOperator, Normal, Operator, Param, PlsError, SolverOptions, StopReason};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::rc::Rc;

/// Random SPD matrix `A = MᵀM + nI` and a random right-hand side block with `k` columns.
fn random_spd(n: usize, k: usize, seed: u64) -> (Mat<f64>, Mat<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let m = Mat::from_fn(n, n, |_, _| rng.sample::<f64, _>(StandardNormal));
    let mtm = matmul_tn(m.as_ref(), m.as_ref());
    let a = Mat::from_fn(n, n, |i, j| mtm[(i, j)] + if i == j { n as f64 } else { 0.0 });
    let b = Mat::from_fn(n, k, |_, _| rng.sample::<f64, _>(StandardNormal));
    (a, b)
}

fn dense_solve(a: &Mat<f64>, b: &Mat<f64>) -> Mat<f64> {
    lu_solve(a.as_ref(), b.as_ref()).unwrap()
}

fn assert_mat_close(x: &Mat<f64>, y: &Mat<f64>, eps: f64) {
    assert_eq!((x.nrows(), x.ncols()), (y.nrows(), y.ncols()));
    for i in 0..x.nrows() {
        for j in 0..x.ncols() {
            assert_abs_diff_eq!(x[(i, j)], y[(i, j)], epsilon = eps);
        }
    }
}

fn diff(x: &[f64], y: &[f64]) -> Vec<f64> {
    x.iter().zip(y).map(|(p, q)| p - q).collect()
}

fn norm(x: &[f64]) -> f64 {
    x.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Directions, observations and iterates seen by the callback.
#[derive(Default)]
struct Trace {
    s: Vec<Vec<f64>>,
    y: Vec<Vec<f64>>,
    x: Vec<Vec<f64>>,
}

fn solve_traced(
    a: &Mat<f64>,
    b: Vec<f64>,
    priors: Priors,
    opts: &SolverOptions,
) -> (Normal, Normal, Normal, probkryst::SolveInfo, Trace) {
    let mut trace = Trace::default();
    let mut cb = |state: &IterationState<'_>| {
        trace.s.push(state.sk.to_vec());
        trace.y.push(state.yk.to_vec());
        trace.x.push(state.xk.mean().to_flat());
    };
    let (x, ahat, ainv, info) = problinsolve(aslinop(a.clone()), b, priors, opts, Some(&mut cb)).unwrap();
    (x, ahat, ainv, info, trace)
}

#[test]
fn solution_matches_dense_solve() {
    let n = 10;
    let (a, b) = random_spd(n, 1, 1);
    let opts = SolverOptions::new().with_atol(1e-10).with_rtol(1e-10);
    let (x, _, _, info) = problinsolve(aslinop(a.clone()), column(b.as_ref(), 0), Priors::new(), &opts, None).unwrap();
    assert!(info.converged, "stopped with {:?}", info.stop_reason);
    assert!(info.iterations <= n + 1);
    assert_eq!(x.shape(), vec![n]);
    let expected = column(dense_solve(&a, &b).as_ref(), 0);
    let err = norm(&diff(&x.mean().to_flat(), &expected));
    assert!(err <= 1e-4 * norm(&expected), "relative error {}", err / norm(&expected));
}

#[test]
fn zero_right_hand_side_gives_zero_solution() {
    let (a, _) = random_spd(10, 1, 2);
    for e in 0..7 {
        let atol = 10f64.powi(-10 + 2 * e);
        let opts = SolverOptions::new().with_atol(atol);
        let (x, _, _, info) = problinsolve(aslinop(a.clone()), vec![0.0; 10], Priors::new(), &opts, None).unwrap();
        assert!(info.converged, "atol = {atol:e}");
        assert_eq!(info.iterations, 0);
        for v in x.mean().to_flat() {
            assert_abs_diff_eq!(v, 0.0, epsilon = 1e-15);
        }
    }
}

#[test]
fn several_right_hand_sides_share_the_beliefs() {
    let n = 8;
    let (a, b) = random_spd(n, 3, 3);
    let opts = SolverOptions::new().with_atol(1e-10).with_rtol(1e-10);
    let (x, _, ainv, info) = problinsolve(aslinop(a.clone()), b.clone(), Priors::new(), &opts, None).unwrap();
    assert!(info.converged);
    assert_eq!(x.shape(), vec![n, 3]);
    let xm = x.mean().to_dense_matrix().unwrap();
    assert_mat_close(&xm, &dense_solve(&a, &b), 1e-7);
    assert!(info.iterations <= 2 * n);
    assert_eq!(ainv.shape(), vec![n, n]);
}

#[test]
fn search_directions_are_conjugate() {
    let n = 10;
    let (a, b) = random_spd(n, 1, 4);
    let opts = SolverOptions::new().with_atol(1e-12).with_rtol(1e-12);
    let (_, _, _, _, trace) = solve_traced(&a, column(b.as_ref(), 0), Priors::new(), &opts);
    assert!(trace.s.len() >= 2);
    let ip = |u: &[f64], v: &[f64]| u.iter().zip(v).map(|(p, q)| p * q).sum::<f64>();
    for i in 0..trace.s.len() {
        for j in 0..i {
            let c = ip(&trace.s[i], &trace.y[j]);
            let scale = ip(&trace.s[i], &trace.s[i]).sqrt() * ip(&trace.y[j], &trace.y[j]).sqrt();
            assert!(c.abs() <= 1e-7 * scale, "s_{i}^T A s_{j} = {c:e}");
        }
    }
}

#[test]
fn posterior_factors_are_identical_and_symmetric() {
    let (a, b) = random_spd(7, 1, 5);
    let opts = SolverOptions::new().with_maxiter(4);
    let (_, ahat, ainv, info) =
        problinsolve(aslinop(a), column(b.as_ref(), 0), Priors::new(), &opts, None).unwrap();
    assert_eq!(info.stop_reason, StopReason::MaxIter);
    assert!(!info.converged);
    for belief in [&ahat, &ainv] {
        let Normal::SymmetricKronecker(skn) = belief else {
            panic!("expected a symmetric Kronecker belief, got {belief:?}");
        };
        let w = skn.factor().todense();
        assert!(asymmetry(w.as_ref()) <= 1e-10);
        let mean = belief.mean().to_dense_matrix().unwrap();
        assert!(asymmetry(mean.as_ref()) <= 1e-10);
        let (wa, wb) = belief.kronecker_factors().unwrap();
        assert!(Rc::ptr_eq(&wa, &wb));
    }
}

#[test]
fn reduces_to_conjugate_gradients_with_scalar_prior() {
    let n = 10;
    let (a, b) = random_spd(n, 1, 6);
    let bv = column(b.as_ref(), 0);

    let mut cg_iterates: Vec<Vec<f64>> = Vec::new();
    let sink = Rc::new(std::cell::RefCell::new(Vec::new()));
    let cg_sink = sink.clone();
    let mut cg = CgSolver::new(1e-10, 0.0, n).with_monitor(move |_, x: &[f64], _| cg_sink.borrow_mut().push(x.to_vec()));
    let mut x_cg = vec![0.0; n];
    let op = aslinop(a.clone());
    cg.solve(op.as_ref(), &bv, &mut x_cg).unwrap();
    cg_iterates.extend(sink.borrow().iter().cloned());

    for assume_a in [AssumeA::SymPos, AssumeA::SymPosNoise] {
        let mut opts = SolverOptions::new().with_assume_a(assume_a).with_atol(1e-10).with_rtol(0.0);
        if assume_a == AssumeA::SymPosNoise {
            opts = opts.with_noise_scale(0.0);
        }
        // a zero guess is orthogonal to b, so the scalar prior and x₀ = 0 are used
        let priors = Priors::new().with_x0(vec![0.0; n]);
        let (_, _, _, _, trace) = solve_traced(&a, bv.clone(), priors, &opts);
        let m = trace.x.len().min(cg_iterates.len());
        assert!(m >= n / 2);
        for k in 0..m {
            for i in 0..n {
                assert_abs_diff_eq!(trace.x[k][i], cg_iterates[k][i], epsilon = 1e-9 * (1.0 + cg_iterates[k][i].abs()));
            }
        }
    }
}

/// `N(I, I ⊗ₛ I)` over `A⁻¹` and `N(I, A ⊗ₛ A)` over `A`.
fn cg_priors(a: &Mat<f64>) -> Priors {
    let n = a.nrows();
    let id: Operator = Rc::new(Identity::new(n));
    let h_cov: Operator = Rc::new(SymmetricKronecker::identical(id.clone()).unwrap());
    let a_cov: Operator = Rc::new(SymmetricKronecker::identical(aslinop(a.clone())).unwrap());
    let ainv0 = Normal::new(Param::Operator(id.clone()), h_cov).unwrap();
    let a0 = Normal::new(Param::Operator(id), a_cov).unwrap();
    assert!(matches!(ainv0, Normal::SymmetricKronecker(_)));
    Priors::new().with_ainv0(ainv0).with_a0(a0)
}

#[test]
fn reduces_to_conjugate_gradients_with_kronecker_priors() {
    let n = 10;
    let (a, b) = random_spd(n, 1, 16);
    let bv = column(b.as_ref(), 0);

    // the solver starts from H̄₀b = b
    let sink = Rc::new(std::cell::RefCell::new(vec![bv.clone()]));
    let cg_sink = sink.clone();
    let mut cg = CgSolver::new(1e-10, 0.0, n).with_monitor(move |_, x: &[f64], _| cg_sink.borrow_mut().push(x.to_vec()));
    let mut x_cg = bv.clone();
    cg.solve(aslinop(a.clone()).as_ref(), &bv, &mut x_cg).unwrap();
    let cg_iterates = sink.borrow().clone();

    let runs = [
        SolverOptions::new().with_atol(1e-10).with_rtol(0.0),
        SolverOptions::new()
            .with_assume_a(AssumeA::SymPosNoise)
            .with_noise_scale(0.0)
            .with_atol(1e-10)
            .with_rtol(0.0)
            .with_maxiter(cg_iterates.len() - 1),
    ];
    for opts in runs {
        let (_, _, _, info, trace) = solve_traced(&a, bv.clone(), cg_priors(&a), &opts);
        let mut pls_iterates = vec![bv.clone()];
        pls_iterates.extend(trace.x);
        let m = pls_iterates.len().min(cg_iterates.len());
        assert!(m > n / 2, "only {m} iterates with {:?}", info.stop_reason);
        for k in 0..m {
            let err = norm(&diff(&pls_iterates[k], &cg_iterates[k]));
            assert!(err <= 1e-12 * norm(&cg_iterates[k]), "iterate {k}: relative difference {}", err / norm(&cg_iterates[k]));
        }
    }
}

#[test]
fn inverse_prior_belief_solves_the_system() {
    let n = 10;
    let (a, b) = random_spd(n, 1, 17);
    let id: Operator = Rc::new(Identity::new(n));
    let cov: Operator = Rc::new(SymmetricKronecker::identical(id.clone()).unwrap());
    let ainv0 = Normal::new(Mat::<f64>::identity(n, n), cov).unwrap();
    let opts = SolverOptions::new().with_atol(1e-10).with_rtol(1e-10);
    let (x, _, ainv, info) =
        problinsolve(aslinop(a.clone()), column(b.as_ref(), 0), Priors::new().with_ainv0(ainv0), &opts, None).unwrap();
    assert!(info.converged);
    let expected = column(dense_solve(&a, &b).as_ref(), 0);
    let err = norm(&diff(&x.mean().to_flat(), &expected));
    assert!(err <= 1e-4 * norm(&expected));
    assert!(matches!(ainv, Normal::SymmetricKronecker(_)));

    // a belief whose covariance is not W ⊗ₛ W cannot serve as a prior
    let dense_cov = Mat::<f64>::identity(n * n, n * n);
    let bad = Normal::new(Mat::<f64>::identity(n, n), dense_cov).unwrap();
    let res = problinsolve(aslinop(a), column(b.as_ref(), 0), Priors::new().with_ainv0(bad), &opts, None);
    assert!(matches!(res, Err(PlsError::Structure(_))));
}

#[test]
fn incremental_posterior_matches_closed_form() {
    let n = 6;
    let (a, b) = random_spd(n, 1, 7);
    let bv = column(b.as_ref(), 0);
    let opts = SolverOptions::new().with_maxiter(4).with_calibration(false);
    let (_, ahat, ainv, _, trace) = solve_traced(&a, bv.clone(), Priors::new(), &opts);
    let s = columns_to_mat(&trace.s, n);
    let y = columns_to_mat(&trace.y, n);

    // default scalar prior: H₀ = αI, A₀ = α⁻¹I with α = bᵀb / bᵀAb
    let ab = aslinop(a.clone()).apply(&bv);
    let bb: f64 = bv.iter().map(|v| v * v).sum();
    let bab: f64 = bv.iter().zip(&ab).map(|(p, q)| p * q).sum();
    let alpha = bb / bab;
    let a0 = Mat::from_fn(n, n, |i, j| if i == j { 1.0 / alpha } else { 0.0 });
    let h0 = Mat::from_fn(n, n, |i, j| if i == j { alpha } else { 0.0 });

    let a_mean = symmetric_posterior_mean(&a0, &a, &s, &y).unwrap();
    let a_factor = symmetric_posterior_covfactor(&a, &s).unwrap();
    assert_mat_close(&ahat.mean().to_dense_matrix().unwrap(), &a_mean, 1e-8);
    assert_mat_close(&ahat.kronecker_factors().unwrap().0.todense(), &a_factor, 1e-8);

    let h_mean = symmetric_posterior_mean(&h0, &h0, &y, &s).unwrap();
    let h_factor = symmetric_posterior_covfactor(&h0, &y).unwrap();
    assert_mat_close(&ainv.mean().to_dense_matrix().unwrap(), &h_mean, 1e-8);
    assert_mat_close(&ainv.kronecker_factors().unwrap().0.todense(), &h_factor, 1e-8);
}

#[test]
fn solution_covariance_is_induced_by_inverse_belief() {
    let n = 5;
    let (a, b) = random_spd(n, 1, 8);
    let opts = SolverOptions::new().with_maxiter(3);
    let (x, _, ainv, info) = problinsolve(aslinop(a), b.clone(), Priors::new(), &opts, None).unwrap();
    let induced = ainv.right_matmul(&b).unwrap();
    let xc = x.cov().to_dense_matrix().unwrap();
    let ic = induced.cov().to_dense_matrix().unwrap();
    assert_mat_close(&xc, &ic, 1e-10);
    let tr: f64 = (0..xc.nrows()).map(|i| xc[(i, i)]).sum();
    assert_abs_diff_eq!(tr, info.trace_sol_cov, epsilon = 1e-9 * (1.0 + tr.abs()));
}

#[test]
fn dimension_mismatches_are_reported() {
    let (a, _) = random_spd(4, 1, 9);
    let opts = SolverOptions::new();
    let res = problinsolve(aslinop(a.clone()), vec![1.0; 3], Priors::new(), &opts, None);
    assert!(matches!(res, Err(PlsError::DimensionMismatch(_))));

    let rect = aslinop(Mat::<f64>::zeros(4, 3));
    let res = problinsolve(rect, vec![1.0; 4], Priors::new(), &opts, None);
    assert!(matches!(res, Err(PlsError::NotSquare { rows: 4, cols: 3 })));

    let priors = Priors::new().with_a0(Mat::<f64>::identity(3, 3));
    let res = problinsolve(aslinop(a.clone()), vec![1.0; 4], priors, &opts, None);
    assert!(matches!(res, Err(PlsError::DimensionMismatch(_))));

    let res = problinsolve(aslinop(a), Dirac::new(1.0), Priors::new(), &opts, None);
    assert!(matches!(res, Err(PlsError::DimensionMismatch(_))));
}

#[test]
fn unknown_assumption_is_rejected() {
    let err = "symmetric".parse::<AssumeA>().unwrap_err();
    assert_eq!(err, PlsError::UnsupportedAssumption("symmetric".to_string()));
    assert_eq!("symposnoise".parse::<AssumeA>().unwrap(), AssumeA::SymPosNoise);
}

#[test]
fn good_guess_prior_starts_at_the_guess() {
    let n = 6;
    let (a, b) = random_spd(n, 1, 10);
    let bv = column(b.as_ref(), 0);
    let exact = column(dense_solve(&a, &b).as_ref(), 0);
    let guess: Vec<f64> = exact.iter().enumerate().map(|(i, v)| v + 1e-3 * (i as f64).sin()).collect();
    let opts = SolverOptions::new().with_atol(1e-10).with_rtol(1e-10);
    let (x, _, ainv, info, trace) = solve_traced(&a, bv.clone(), Priors::new().with_x0(guess.clone()), &opts);
    assert!(info.converged);
    // the line search from the guess can only reduce the error in the energy norm
    assert!(!trace.x.is_empty());
    let op = aslinop(a.clone());
    let energy = |x: &[f64]| {
        let e = diff(x, &exact);
        e.iter().zip(op.apply(&e)).map(|(p, q)| p * q).sum::<f64>()
    };
    assert!(energy(&trace.x[0]) <= energy(&guess));
    for (xi, ei) in x.mean().to_flat().iter().zip(&exact) {
        assert_abs_diff_eq!(*xi, *ei, epsilon = 1e-8);
    }
    assert_eq!(ainv.shape(), vec![n, n]);
}

#[test]
fn noisy_system_reports_its_noise_level() {
    let n = 8;
    let (a, b) = random_spd(n, 1, 11);
    let noisy = NoisyOperator::with_symmetric_noise(aslinop(a.clone()), 1e-3, 42).unwrap();
    let opts = SolverOptions::new().with_assume_a(AssumeA::SymPosNoise).with_maxiter(n).with_rtol(1e-4);
    let (x, ahat, _, info) = problinsolve(Rc::new(noisy), column(b.as_ref(), 0), Priors::new(), &opts, None).unwrap();
    assert_eq!(info.assume_a, AssumeA::SymPosNoise);
    let eps = info.noise_scale.expect("noise scale is estimated when not given");
    assert!(eps.is_finite() && eps >= 0.0);
    let exact = column(dense_solve(&a, &b).as_ref(), 0);
    let rel = norm(&diff(&x.mean().to_flat(), &exact)) / norm(&exact);
    assert!(rel <= 5e-2, "relative error {rel}");
    let w = ahat.kronecker_factors().unwrap().0.todense();
    assert!(asymmetry(w.as_ref()) <= 1e-10);
}

#[test]
fn declared_noise_is_added_to_the_factors() {
    let n = 6;
    let (a, b) = random_spd(n, 1, 12);
    let bv = column(b.as_ref(), 0);
    let base = SolverOptions::new().with_assume_a(AssumeA::SymPosNoise).with_maxiter(3);
    let (_, _, quiet, _) =
        problinsolve(aslinop(a.clone()), bv.clone(), Priors::new(), &base.clone().with_noise_scale(0.0), None).unwrap();
    let (_, _, loud, info) =
        problinsolve(aslinop(a), bv, Priors::new(), &base.with_noise_scale(0.1), None).unwrap();
    assert_eq!(info.noise_scale, Some(0.1));
    let tq = quiet.kronecker_factors().unwrap().0.trace();
    let tl = loud.kronecker_factors().unwrap().0.trace();
    assert!(tl > tq);
}

#[test]
fn positive_noise_scale_needs_the_noisy_assumption() {
    let (a, b) = random_spd(4, 1, 13);
    let opts = SolverOptions::new().with_noise_scale(0.1);
    let res = problinsolve(aslinop(a), column(b.as_ref(), 0), Priors::new(), &opts, None);
    assert!(matches!(res, Err(PlsError::InvalidOption(_))));
}

#[test]
fn calibration_adds_uncertainty_off_the_explored_subspace() {
    let n = 10;
    let (a, b) = random_spd(n, 1, 14);
    let bv = column(b.as_ref(), 0);
    let base = SolverOptions::new().with_maxiter(3);
    let (_, plain, _, info_plain) = problinsolve(aslinop(a.clone()), bv.clone(), Priors::new(), &base, None).unwrap();
    let (_, cal, _, info) =
        problinsolve(aslinop(a), bv, Priors::new(), &base.clone().with_calibration(true), None).unwrap();
    assert!(info_plain.calibration_scale.is_none());
    let phi = info.calibration_scale.expect("three directions are enough to calibrate");
    assert!(phi > 0.0);
    let wp = plain.kronecker_factors().unwrap().0.todense();
    let wc = cal.kronecker_factors().unwrap().0.todense();
    assert!(asymmetry(wc.as_ref()) <= 1e-10);
    let tp: f64 = (0..n).map(|i| wp[(i, i)]).sum();
    let tc: f64 = (0..n).map(|i| wc[(i, i)]).sum();
    assert_abs_diff_eq!(tc - tp, phi * (n - 3) as f64, epsilon = 1e-8 * (1.0 + tc.abs()));
}

#[test]
fn uncertainty_tolerance_stops_the_loop() {
    let n = 10;
    let (a, b) = random_spd(n, 1, 15);
    let opts = SolverOptions::new().with_atol(0.0).with_rtol(0.0).with_ctol(1e6);
    let (_, _, _, info) = problinsolve(aslinop(a), column(b.as_ref(), 0), Priors::new(), &opts, None).unwrap();
    assert_eq!(info.stop_reason, StopReason::Uncertainty);
    assert!(info.converged);
    assert_eq!(info.iterations, 0);
}

#[test]
fn belief_right_hand_side_uses_its_mean() {
    let n = 5;
    let (a, b) = random_spd(n, 1, 16);
    let bv = column(b.as_ref(), 0);
    let cov = Mat::<f64>::identity(n, n);
    let belief = Normal::new(bv.clone(), cov).unwrap();
    let opts = SolverOptions::new().with_atol(1e-10).with_rtol(1e-10);
    let (x1, _, _, _) = problinsolve(aslinop(a.clone()), belief, Priors::new(), &opts, None).unwrap();
    let (x2, _, _, _) = problinsolve(aslinop(a.clone()), bv, Priors::new(), &opts, None).unwrap();
    assert_eq!(x1.mean().to_flat(), x2.mean().to_flat());
    let check = matmul(a.as_ref(), Mat::from_fn(n, 1, |i, _| x1.mean().to_flat()[i]).as_ref());
    assert_mat_close(&check, &b, 1e-8);
    assert!(matches!(x1.mean(), Param::Vector(_)));
}
