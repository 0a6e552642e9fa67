//! Core linear-algebra traits for probkryst.
//!
//! Vectorization convention used throughout the crate: a matrix `X` of shape `(m, n)`
//! is flattened row-major, `vec(X)[i * n + j] = X[i, j]`. With that convention
//! `(A ⊗ B) vec(X) = vec(A X Bᵀ)`.

use faer::{Mat, MatRef};
use std::fmt;
use std::rc::Rc;

/// Shared handle to an immutable operator.
pub type Operator = Rc<dyn LinearOperator>;

/// Inner products & norms.
pub trait InnerProduct<V: ?Sized> {
    /// Associated scalar type.
    type Scalar: Copy + PartialOrd;
    /// Compute dot(x, y).
    fn dot(&self, x: &V, y: &V) -> Self::Scalar;
    /// Compute ‖x‖₂.
    fn norm(&self, x: &V) -> Self::Scalar;
}

/// Kronecker structure an operator may expose to the belief factory.
#[derive(Clone, Debug)]
pub enum KroneckerStructure {
    /// `A ⊗ B`
    Kronecker { a: Operator, b: Operator },
    /// `A ⊗ₛ B`; `identical` is set when both factors are the same operator.
    Symmetric { a: Operator, b: Operator, identical: bool },
}

/// A matrix-free linear map of shape `(nrows, ncols)`.
pub trait LinearOperator: fmt::Debug {
    /// `(rows, cols)`
    fn shape(&self) -> (usize, usize);

    /// Compute y = A · x.
    fn matvec(&self, x: &[f64], y: &mut [f64]);

    /// Compute y = Aᵀ · x.
    fn rmatvec(&self, x: &[f64], y: &mut [f64]);

    fn nrows(&self) -> usize {
        self.shape().0
    }

    fn ncols(&self) -> usize {
        self.shape().1
    }

    /// Allocating matvec.
    fn apply(&self, x: &[f64]) -> Vec<f64> {
        let mut y = vec![0.0; self.nrows()];
        self.matvec(x, &mut y);
        y
    }

    /// Allocating transposed matvec.
    fn apply_transpose(&self, x: &[f64]) -> Vec<f64> {
        let mut y = vec![0.0; self.ncols()];
        self.rmatvec(x, &mut y);
        y
    }

    /// Apply to every column of `x`.
    fn matmat(&self, x: MatRef<'_, f64>) -> Mat<f64> {
        debug_assert_eq!(x.nrows(), self.ncols(), "matmat: operand has wrong number of rows");
        let (m, n) = self.shape();
        let mut out = Mat::zeros(m, x.ncols());
        let mut xj = vec![0.0; n];
        let mut yj = vec![0.0; m];
        for j in 0..x.ncols() {
            for i in 0..n {
                xj[i] = x[(i, j)];
            }
            self.matvec(&xj, &mut yj);
            for i in 0..m {
                out[(i, j)] = yj[i];
            }
        }
        out
    }

    /// Materialize the operator. Only called on explicit demand.
    fn todense(&self) -> Mat<f64> {
        let n = self.ncols();
        self.matmat(Mat::<f64>::identity(n, n).as_ref())
    }

    /// Trace, by probing with unit vectors unless overridden.
    fn trace(&self) -> f64 {
        let n = self.nrows().min(self.ncols());
        let mut e = vec![0.0; self.ncols()];
        let mut y = vec![0.0; self.nrows()];
        let mut tr = 0.0;
        for i in 0..n {
            e[i] = 1.0;
            self.matvec(&e, &mut y);
            tr += y[i];
            e[i] = 0.0;
        }
        tr
    }

    /// Kronecker structure, if any.
    fn kronecker_structure(&self) -> Option<KroneckerStructure> {
        None
    }
}
