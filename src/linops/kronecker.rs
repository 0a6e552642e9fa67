//! Kronecker and symmetric Kronecker products.
//!
//! Neither operator ever forms its `mn × mn` matrix: an operand is reshaped (row-major)
//! into a block `X`, the factors are applied from the left and the right, and the result
//! is flattened again. For `A ⊗ B` that is `vec(A X Bᵀ)`. The symmetric Kronecker product
//! first projects `X` onto the symmetric matrices and then returns the symmetric matrix
//! `½(A Xₛ Bᵀ + B Xₛ Aᵀ)`, so its range is the vectorized symmetric matrices.
//!
//! # References
//! - Van Loan, C. (2000). The ubiquitous Kronecker product. J. Comput. Appl. Math.
//! - Bartels, S. (2019). Probabilistic Linear Algebra. PhD thesis, App. E.

use crate::core::traits::{KroneckerStructure, LinearOperator, Operator};
use crate::error::PlsError;
use std::rc::Rc;

/// `vec(A X Bᵀ)` (or `vec(Aᵀ X B)` when `transpose`), `x = vec(X)` row-major.
fn kron_apply(
    a: &dyn LinearOperator,
    b: &dyn LinearOperator,
    x: &[f64],
    y: &mut [f64],
    transpose: bool,
) {
    let (ma, na) = if transpose { (a.ncols(), a.nrows()) } else { a.shape() };
    let (mb, nb) = if transpose { (b.ncols(), b.nrows()) } else { b.shape() };
    debug_assert_eq!(x.len(), na * nb);
    debug_assert_eq!(y.len(), ma * mb);

    // T = X Bᵀ, row by row: T[i, :] = B X[i, :]
    let mut t = vec![0.0; na * mb];
    let mut row_out = vec![0.0; mb];
    for i in 0..na {
        let row = &x[i * nb..(i + 1) * nb];
        if transpose { b.rmatvec(row, &mut row_out) } else { b.matvec(row, &mut row_out) }
        t[i * mb..(i + 1) * mb].copy_from_slice(&row_out);
    }

    // Y = A T, column by column
    let mut col_in = vec![0.0; na];
    let mut col_out = vec![0.0; ma];
    for j in 0..mb {
        for i in 0..na {
            col_in[i] = t[i * mb + j];
        }
        if transpose { a.rmatvec(&col_in, &mut col_out) } else { a.matvec(&col_in, &mut col_out) }
        for i in 0..ma {
            y[i * mb + j] = col_out[i];
        }
    }
}

/// In-place `X ← ½(X + Xᵀ)` on a row-major `n × n` block.
fn symmetrize_in_place(x: &mut [f64], n: usize) {
    for i in 0..n {
        for j in 0..i {
            let v = 0.5 * (x[i * n + j] + x[j * n + i]);
            x[i * n + j] = v;
            x[j * n + i] = v;
        }
    }
}

/// Side length of a square operand of length `len`.
fn square_side(len: usize) -> usize {
    (len as f64).sqrt().round() as usize
}

/// Kronecker product `A ⊗ B`.
#[derive(Clone, Debug)]
pub struct Kronecker {
    a: Operator,
    b: Operator,
}

impl Kronecker {
    pub fn new(a: Operator, b: Operator) -> Self {
        Self { a, b }
    }

    pub fn a(&self) -> &Operator {
        &self.a
    }

    pub fn b(&self) -> &Operator {
        &self.b
    }
}

impl LinearOperator for Kronecker {
    fn shape(&self) -> (usize, usize) {
        let (ma, na) = self.a.shape();
        let (mb, nb) = self.b.shape();
        (ma * mb, na * nb)
    }
    fn matvec(&self, x: &[f64], y: &mut [f64]) {
        kron_apply(self.a.as_ref(), self.b.as_ref(), x, y, false);
    }
    fn rmatvec(&self, x: &[f64], y: &mut [f64]) {
        kron_apply(self.a.as_ref(), self.b.as_ref(), x, y, true);
    }
    fn trace(&self) -> f64 {
        self.a.trace() * self.b.trace()
    }
    fn kronecker_structure(&self) -> Option<KroneckerStructure> {
        Some(KroneckerStructure::Kronecker { a: self.a.clone(), b: self.b.clone() })
    }
}

/// Symmetric Kronecker product `A ⊗ₛ B` of two `n × n` factors, acting on ℝ^{n²}.
#[derive(Clone, Debug)]
pub struct SymmetricKronecker {
    a: Operator,
    b: Operator,
    n: usize,
    identical: bool,
}

impl SymmetricKronecker {
    /// `A ⊗ₛ B`. The factors count as identical only if they are the same operator.
    pub fn new(a: Operator, b: Operator) -> Result<Self, PlsError> {
        let n = a.nrows();
        if a.shape() != (n, n) || b.shape() != (n, n) {
            return Err(PlsError::Structure(format!(
                "symmetric Kronecker product needs square factors of equal size, got {:?} and {:?}",
                a.shape(),
                b.shape()
            )));
        }
        let identical = std::ptr::addr_eq(Rc::as_ptr(&a), Rc::as_ptr(&b));
        Ok(Self { a, b, n, identical })
    }

    /// `W ⊗ₛ W`
    pub fn identical(w: Operator) -> Result<Self, PlsError> {
        Self::new(w.clone(), w)
    }

    pub fn a(&self) -> &Operator {
        &self.a
    }

    pub fn b(&self) -> &Operator {
        &self.b
    }

    /// Whether both factors are the same operator.
    pub fn has_identical_factors(&self) -> bool {
        self.identical
    }

    /// Size `n` of the factors.
    pub fn factor_dim(&self) -> usize {
        self.n
    }

    /// Apply to `svec(X)` and return `svec` of the (symmetric) result.
    pub fn apply_svec(&self, v: &[f64]) -> Result<Vec<f64>, PlsError> {
        let x = svec_inverse(v, self.n)?;
        let y = self.apply(&x);
        svec(&y, self.n)
    }
}

impl LinearOperator for SymmetricKronecker {
    fn shape(&self) -> (usize, usize) {
        let nn = self.n * self.n;
        (nn, nn)
    }
    fn matvec(&self, x: &[f64], y: &mut [f64]) {
        let mut xs = x.to_vec();
        symmetrize_in_place(&mut xs, self.n);
        kron_apply(self.a.as_ref(), self.b.as_ref(), &xs, y, false);
        symmetrize_in_place(y, self.n);
    }
    fn rmatvec(&self, x: &[f64], y: &mut [f64]) {
        let mut xs = x.to_vec();
        symmetrize_in_place(&mut xs, self.n);
        kron_apply(self.a.as_ref(), self.b.as_ref(), &xs, y, true);
        symmetrize_in_place(y, self.n);
    }
    /// `½(tr A · tr B + tr AB)`
    fn trace(&self) -> f64 {
        let mut e = vec![0.0; self.n];
        let mut tr_ab = 0.0;
        for i in 0..self.n {
            e[i] = 1.0;
            let be = self.b.apply(&e);
            tr_ab += self.a.apply(&be)[i];
            e[i] = 0.0;
        }
        0.5 * (self.a.trace() * self.b.trace() + tr_ab)
    }
    fn kronecker_structure(&self) -> Option<KroneckerStructure> {
        Some(KroneckerStructure::Symmetric { a: self.a.clone(), b: self.b.clone(), identical: self.identical })
    }
}

/// Orthogonal projection of ℝ^{n²} onto vectorized symmetric matrices.
#[derive(Clone, Debug)]
pub struct Symmetrize {
    n: usize,
}

impl Symmetrize {
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl LinearOperator for Symmetrize {
    fn shape(&self) -> (usize, usize) {
        (self.n * self.n, self.n * self.n)
    }
    fn matvec(&self, x: &[f64], y: &mut [f64]) {
        y.copy_from_slice(x);
        symmetrize_in_place(y, self.n);
    }
    fn rmatvec(&self, x: &[f64], y: &mut [f64]) {
        self.matvec(x, y);
    }
    fn trace(&self) -> f64 {
        (self.n * (self.n + 1)) as f64 / 2.0
    }
}

/// `svec(X)`: upper triangle of a symmetric `n × n` matrix (given as row-major `vec(X)`),
/// row by row, off-diagonal entries scaled by `√2` so that `svec` is an isometry.
pub fn svec(x: &[f64], n: usize) -> Result<Vec<f64>, PlsError> {
    if x.len() != n * n {
        return Err(PlsError::DimensionMismatch(format!(
            "svec of a {n}x{n} matrix needs {} entries, got {}",
            n * n,
            x.len()
        )));
    }
    let mut out = Vec::with_capacity(n * (n + 1) / 2);
    for i in 0..n {
        out.push(x[i * n + i]);
        for j in i + 1..n {
            out.push(std::f64::consts::SQRT_2 * 0.5 * (x[i * n + j] + x[j * n + i]));
        }
    }
    Ok(out)
}

/// Inverse of [`svec`], returning row-major `vec(X)`.
pub fn svec_inverse(v: &[f64], n: usize) -> Result<Vec<f64>, PlsError> {
    if v.len() != n * (n + 1) / 2 {
        return Err(PlsError::DimensionMismatch(format!(
            "svec of a {n}x{n} matrix has {} entries, got {}",
            n * (n + 1) / 2,
            v.len()
        )));
    }
    let mut x = vec![0.0; n * n];
    let mut k = 0;
    for i in 0..n {
        x[i * n + i] = v[k];
        k += 1;
        for j in i + 1..n {
            let val = v[k] / std::f64::consts::SQRT_2;
            x[i * n + j] = val;
            x[j * n + i] = val;
            k += 1;
        }
    }
    Ok(x)
}
