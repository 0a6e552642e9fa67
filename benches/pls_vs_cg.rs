use criterion::{black_box, criterion_group, criterion_main, Criterion};
use faer::Mat;
use probkryst::linops::aslinop;
use probkryst::solver::{problinsolve, CgSolver, LinearSolver, Priors};
use probkryst::SolverOptions;

fn bench_pls_vs_cg(c: &mut Criterion) {
    let n = 100;
    // diagonally dominant SPD test matrix
    let a = Mat::from_fn(n, n, |i, j| if i == j { n as f64 } else { ((i + j) as f64).sin() / (1.0 + (i as f64 - j as f64).abs()) });
    let a = Mat::from_fn(n, n, |i, j| 0.5 * (a[(i, j)] + a[(j, i)]));
    let b: Vec<f64> = (0..n).map(|i| (i as f64).cos()).collect();
    let op = aslinop(a);

    c.bench_function("probkryst problinsolve", |ben| {
        let opts = SolverOptions::new().with_atol(1e-8).with_rtol(1e-8);
        ben.iter(|| {
            let _res = problinsolve(op.clone(), black_box(b.clone()), Priors::new(), &opts, None).unwrap();
        })
    });

    c.bench_function("probkryst CG", |ben| {
        let mut solver = CgSolver::new(1e-8, 1e-8, 10 * n);
        ben.iter(|| {
            let mut x = vec![0.0; n];
            solver.clear_history();
            let _stats = solver.solve(op.as_ref(), black_box(&b), black_box(&mut x)).unwrap();
        })
    });
}

criterion_group!(benches, bench_pls_vs_cg);
criterion_main!(benches);
