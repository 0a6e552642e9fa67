//! Dense‐matrix helpers on top of Faer.
//!
//! Construction from raw storage, row-major (un)vectorization matching the operator
//! convention, symmetry checks, and the damped Cholesky factorization shared by the
//! sampling and density code paths.

use crate::error::PlsError;
use faer::linalg::solvers::{FullPivLu, Llt, SolveCore};
use faer::{Conj, Mat, MatRef, Side};

/// Construct from a slice of rows.
pub fn from_rows(rows: &[Vec<f64>]) -> Mat<f64> {
    let m = rows.len();
    let n = rows.first().map_or(0, Vec::len);
    Mat::from_fn(m, n, |i, j| rows[i][j])
}

/// Row-major flattening, `vec(X)[i * n + j] = X[i, j]`.
pub fn vec_row_major(a: MatRef<'_, f64>) -> Vec<f64> {
    let (m, n) = (a.nrows(), a.ncols());
    let mut out = Vec::with_capacity(m * n);
    for i in 0..m {
        for j in 0..n {
            out.push(a[(i, j)]);
        }
    }
    out
}

/// Inverse of [`vec_row_major`].
pub fn unvec_row_major(v: &[f64], nrows: usize, ncols: usize) -> Mat<f64> {
    assert_eq!(v.len(), nrows * ncols, "unvec: vector has wrong length");
    Mat::from_fn(nrows, ncols, |i, j| v[i * ncols + j])
}

/// Largest absolute entry of `A - Aᵀ`.
pub fn asymmetry(a: MatRef<'_, f64>) -> f64 {
    let n = a.nrows().min(a.ncols());
    let mut worst = 0.0f64;
    for i in 0..n {
        for j in 0..i {
            worst = worst.max((a[(i, j)] - a[(j, i)]).abs());
        }
    }
    worst
}

/// Lower Cholesky factor of `A + damping·I`.
pub fn cholesky_lower(a: MatRef<'_, f64>, damping: f64) -> Result<Mat<f64>, PlsError> {
    if a.nrows() != a.ncols() {
        return Err(PlsError::NotSquare { rows: a.nrows(), cols: a.ncols() });
    }
    let n = a.nrows();
    let damped = Mat::from_fn(n, n, |i, j| {
        // only the lower triangle is read; keep the input exactly symmetric
        let v = 0.5 * (a[(i, j)] + a[(j, i)]);
        if i == j { v + damping } else { v }
    });
    let llt = Llt::new(damped.as_ref(), Side::Lower).map_err(|e| {
        PlsError::NotPositiveDefinite(format!("Cholesky factorization of a {n}x{n} matrix failed ({e:?})"))
    })?;
    Ok(llt.L().to_owned())
}

/// Solve `G X = R` for a small dense `G` with full-pivoting LU.
pub fn lu_solve(g: MatRef<'_, f64>, rhs: MatRef<'_, f64>) -> Result<Mat<f64>, PlsError> {
    if g.nrows() != g.ncols() {
        return Err(PlsError::NotSquare { rows: g.nrows(), cols: g.ncols() });
    }
    if g.nrows() != rhs.nrows() {
        return Err(PlsError::DimensionMismatch(format!(
            "system of order {} with right-hand side of {} rows",
            g.nrows(),
            rhs.nrows()
        )));
    }
    let factor = FullPivLu::new(g);
    let mut x = rhs.to_owned();
    factor.solve_in_place_with_conj(Conj::No, x.as_mut());
    if (0..x.nrows()).any(|i| (0..x.ncols()).any(|j| !x[(i, j)].is_finite())) {
        return Err(PlsError::FactorError("singular Gram matrix".to_string()));
    }
    Ok(x)
}
