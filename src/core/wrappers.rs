//! Wrappers for faer dense matrix types and vector operations.
//!
//! This module provides the `InnerProduct` implementations for `Vec<T>` and slices, the
//! small BLAS-1 style helpers the solvers use on `Vec<f64>` iterates, and thin wrappers over
//! faer's dense products used when a factor has to be materialized.
//!
//! # References
//! - [faer crate documentation](https://docs.rs/faer)
//! - [num-traits crate documentation](https://docs.rs/num-traits)

use crate::core::traits::InnerProduct;
use faer::{Mat, MatRef};
use num_traits::Float;

/// Implements inner product and norm for slices.
impl<T: Float> InnerProduct<[T]> for () {
    type Scalar = T;
    /// Computes the dot product of two vectors: `x^T y`.
    fn dot(&self, x: &[T], y: &[T]) -> T {
        assert_eq!(x.len(), y.len(), "Vectors must have the same length");
        x.iter()
            .zip(y.iter())
            .map(|(xi, yi)| *xi * *yi)
            .fold(T::zero(), |acc, v| acc + v)
    }
    /// Computes the Euclidean norm of a vector: `||x||_2`.
    fn norm(&self, x: &[T]) -> T {
        x.iter()
            .map(|xi| *xi * *xi)
            .fold(T::zero(), |acc, v| acc + v)
            .sqrt()
    }
}

/// Implements inner product and norm for vectors by delegating to the slice impl.
impl<T: Float> InnerProduct<Vec<T>> for () {
    type Scalar = T;
    fn dot(&self, x: &Vec<T>, y: &Vec<T>) -> T {
        InnerProduct::<[T]>::dot(self, x.as_slice(), y.as_slice())
    }
    fn norm(&self, x: &Vec<T>) -> T {
        InnerProduct::<[T]>::norm(self, x.as_slice())
    }
}

/// y ← y + a·x
pub fn axpy(a: f64, x: &[f64], y: &mut [f64]) {
    assert_eq!(x.len(), y.len(), "Vectors must have the same length");
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += a * *xi;
    }
}

/// Dense product `A · B`.
pub fn matmul(a: MatRef<'_, f64>, b: MatRef<'_, f64>) -> Mat<f64> {
    assert_eq!(a.ncols(), b.nrows(), "Inner dimensions must agree");
    a * b
}

/// Dense product `Aᵀ · B`.
pub fn matmul_tn(a: MatRef<'_, f64>, b: MatRef<'_, f64>) -> Mat<f64> {
    assert_eq!(a.nrows(), b.nrows(), "Inner dimensions must agree");
    a.transpose() * b
}

/// Stack equally sized vectors as the columns of a matrix.
pub fn columns_to_mat(cols: &[Vec<f64>], nrows: usize) -> Mat<f64> {
    Mat::from_fn(nrows, cols.len(), |i, j| cols[j][i])
}

/// Column `j` of `a` as an owned vector.
pub fn column(a: MatRef<'_, f64>, j: usize) -> Vec<f64> {
    (0..a.nrows()).map(|i| a[(i, j)]).collect()
}
