//! Elementary operators and the compositions the solver builds from them.
//!
//! `Identity`, `ScalarMult` and `MatrixMult` are the leaves. `Sum`, `Scaled`, `Product`
//! and `Transpose` compose lazily. `LowRankUpdate` is a base operator plus a sum of
//! outer products, which is how every posterior mean and covariance factor is stored.

use crate::core::traits::{InnerProduct, LinearOperator, Operator};
use crate::error::PlsError;
use faer::{Mat, MatRef};
use std::rc::Rc;

/// The identity map on ℝⁿ.
#[derive(Clone, Debug)]
pub struct Identity {
    n: usize,
}

impl Identity {
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl LinearOperator for Identity {
    fn shape(&self) -> (usize, usize) {
        (self.n, self.n)
    }
    fn matvec(&self, x: &[f64], y: &mut [f64]) {
        y.copy_from_slice(x);
    }
    fn rmatvec(&self, x: &[f64], y: &mut [f64]) {
        y.copy_from_slice(x);
    }
    fn matmat(&self, x: MatRef<'_, f64>) -> Mat<f64> {
        x.to_owned()
    }
    fn todense(&self) -> Mat<f64> {
        Mat::identity(self.n, self.n)
    }
    fn trace(&self) -> f64 {
        self.n as f64
    }
}

/// `c·I` on ℝⁿ.
#[derive(Clone, Debug)]
pub struct ScalarMult {
    n: usize,
    scalar: f64,
}

impl ScalarMult {
    pub fn new(n: usize, scalar: f64) -> Self {
        Self { n, scalar }
    }

    pub fn scalar(&self) -> f64 {
        self.scalar
    }
}

impl LinearOperator for ScalarMult {
    fn shape(&self) -> (usize, usize) {
        (self.n, self.n)
    }
    fn matvec(&self, x: &[f64], y: &mut [f64]) {
        for (yi, xi) in y.iter_mut().zip(x) {
            *yi = self.scalar * xi;
        }
    }
    fn rmatvec(&self, x: &[f64], y: &mut [f64]) {
        self.matvec(x, y);
    }
    fn todense(&self) -> Mat<f64> {
        Mat::from_fn(self.n, self.n, |i, j| if i == j { self.scalar } else { 0.0 })
    }
    fn trace(&self) -> f64 {
        self.scalar * self.n as f64
    }
}

/// A dense matrix behind the operator interface.
#[derive(Clone, Debug)]
pub struct MatrixMult {
    a: Mat<f64>,
}

impl MatrixMult {
    pub fn new(a: Mat<f64>) -> Self {
        Self { a }
    }

    pub fn matrix(&self) -> MatRef<'_, f64> {
        self.a.as_ref()
    }
}

impl From<Mat<f64>> for MatrixMult {
    fn from(a: Mat<f64>) -> Self {
        Self::new(a)
    }
}

impl LinearOperator for MatrixMult {
    fn shape(&self) -> (usize, usize) {
        (self.a.nrows(), self.a.ncols())
    }
    fn matvec(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(self.a.nrows(), y.len(), "Output vector y has incorrect length");
        assert_eq!(self.a.ncols(), x.len(), "Input vector x has incorrect length");
        for i in 0..self.a.nrows() {
            y[i] = 0.0;
            for j in 0..self.a.ncols() {
                y[i] += self.a[(i, j)] * x[j];
            }
        }
    }
    fn rmatvec(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(self.a.ncols(), y.len(), "Output vector y has incorrect length");
        assert_eq!(self.a.nrows(), x.len(), "Input vector x has incorrect length");
        for j in 0..self.a.ncols() {
            y[j] = 0.0;
            for i in 0..self.a.nrows() {
                y[j] += self.a[(i, j)] * x[i];
            }
        }
    }
    fn todense(&self) -> Mat<f64> {
        self.a.clone()
    }
    fn trace(&self) -> f64 {
        (0..self.a.nrows().min(self.a.ncols())).map(|i| self.a[(i, i)]).sum()
    }
}

/// Lazy sum of operators of equal shape.
#[derive(Clone, Debug)]
pub struct Sum {
    terms: Vec<Operator>,
    shape: (usize, usize),
}

impl Sum {
    pub fn new(terms: Vec<Operator>) -> Result<Self, PlsError> {
        let shape = terms
            .first()
            .map(|t| t.shape())
            .ok_or_else(|| PlsError::Structure("sum of zero operators".to_string()))?;
        if let Some(bad) = terms.iter().find(|t| t.shape() != shape) {
            return Err(PlsError::DimensionMismatch(format!(
                "cannot add operators of shape {:?} and {:?}",
                shape,
                bad.shape()
            )));
        }
        Ok(Self { terms, shape })
    }
}

impl LinearOperator for Sum {
    fn shape(&self) -> (usize, usize) {
        self.shape
    }
    fn matvec(&self, x: &[f64], y: &mut [f64]) {
        y.iter_mut().for_each(|v| *v = 0.0);
        let mut tmp = vec![0.0; y.len()];
        for t in &self.terms {
            t.matvec(x, &mut tmp);
            for (yi, ti) in y.iter_mut().zip(&tmp) {
                *yi += ti;
            }
        }
    }
    fn rmatvec(&self, x: &[f64], y: &mut [f64]) {
        y.iter_mut().for_each(|v| *v = 0.0);
        let mut tmp = vec![0.0; y.len()];
        for t in &self.terms {
            t.rmatvec(x, &mut tmp);
            for (yi, ti) in y.iter_mut().zip(&tmp) {
                *yi += ti;
            }
        }
    }
    fn trace(&self) -> f64 {
        self.terms.iter().map(|t| t.trace()).sum()
    }
}

/// `c·A`
#[derive(Clone, Debug)]
pub struct Scaled {
    scalar: f64,
    op: Operator,
}

impl Scaled {
    pub fn new(scalar: f64, op: Operator) -> Self {
        Self { scalar, op }
    }
}

impl LinearOperator for Scaled {
    fn shape(&self) -> (usize, usize) {
        self.op.shape()
    }
    fn matvec(&self, x: &[f64], y: &mut [f64]) {
        self.op.matvec(x, y);
        y.iter_mut().for_each(|v| *v *= self.scalar);
    }
    fn rmatvec(&self, x: &[f64], y: &mut [f64]) {
        self.op.rmatvec(x, y);
        y.iter_mut().for_each(|v| *v *= self.scalar);
    }
    fn trace(&self) -> f64 {
        self.scalar * self.op.trace()
    }
}

/// Composition `A · B`.
#[derive(Clone, Debug)]
pub struct Product {
    left: Operator,
    right: Operator,
}

impl Product {
    pub fn new(left: Operator, right: Operator) -> Result<Self, PlsError> {
        if left.ncols() != right.nrows() {
            return Err(PlsError::DimensionMismatch(format!(
                "cannot compose operators of shape {:?} and {:?}",
                left.shape(),
                right.shape()
            )));
        }
        Ok(Self { left, right })
    }
}

impl LinearOperator for Product {
    fn shape(&self) -> (usize, usize) {
        (self.left.nrows(), self.right.ncols())
    }
    fn matvec(&self, x: &[f64], y: &mut [f64]) {
        let tmp = self.right.apply(x);
        self.left.matvec(&tmp, y);
    }
    fn rmatvec(&self, x: &[f64], y: &mut [f64]) {
        let tmp = self.left.apply_transpose(x);
        self.right.rmatvec(&tmp, y);
    }
}

/// `Aᵀ`
#[derive(Clone, Debug)]
pub struct Transpose {
    op: Operator,
}

impl Transpose {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }
}

impl LinearOperator for Transpose {
    fn shape(&self) -> (usize, usize) {
        let (m, n) = self.op.shape();
        (n, m)
    }
    fn matvec(&self, x: &[f64], y: &mut [f64]) {
        self.op.rmatvec(x, y);
    }
    fn rmatvec(&self, x: &[f64], y: &mut [f64]) {
        self.op.matvec(x, y);
    }
    fn trace(&self) -> f64 {
        self.op.trace()
    }
}

/// `B + Σᵢ lᵢ rᵢᵀ` for a square base operator `B`.
///
/// The factor lists are plain growable sequences; the solver pushes one or two pairs per
/// iteration and snapshots the operator when it hands out a belief.
#[derive(Clone, Debug)]
pub struct LowRankUpdate {
    base: Operator,
    left: Vec<Vec<f64>>,
    right: Vec<Vec<f64>>,
}

impl LowRankUpdate {
    pub fn new(base: Operator) -> Self {
        Self { base, left: Vec::new(), right: Vec::new() }
    }

    pub fn base(&self) -> &Operator {
        &self.base
    }

    pub fn rank(&self) -> usize {
        self.left.len()
    }

    /// Append the outer product `l rᵀ`.
    pub fn push(&mut self, l: Vec<f64>, r: Vec<f64>) {
        debug_assert_eq!(l.len(), self.base.nrows());
        debug_assert_eq!(r.len(), self.base.ncols());
        self.left.push(l);
        self.right.push(r);
    }

    /// Append the symmetric pair `u vᵀ + v uᵀ`.
    pub fn push_symmetric(&mut self, u: Vec<f64>, v: Vec<f64>) {
        self.push(u.clone(), v.clone());
        self.push(v, u);
    }
}

impl LinearOperator for LowRankUpdate {
    fn shape(&self) -> (usize, usize) {
        self.base.shape()
    }
    fn matvec(&self, x: &[f64], y: &mut [f64]) {
        self.base.matvec(x, y);
        let ip = ();
        for (l, r) in self.left.iter().zip(&self.right) {
            let c = ip.dot(r.as_slice(), x);
            for (yi, li) in y.iter_mut().zip(l) {
                *yi += c * li;
            }
        }
    }
    fn rmatvec(&self, x: &[f64], y: &mut [f64]) {
        self.base.rmatvec(x, y);
        let ip = ();
        for (l, r) in self.left.iter().zip(&self.right) {
            let c = ip.dot(l.as_slice(), x);
            for (yi, ri) in y.iter_mut().zip(r) {
                *yi += c * ri;
            }
        }
    }
    fn trace(&self) -> f64 {
        let ip = ();
        self.base.trace()
            + self
                .left
                .iter()
                .zip(&self.right)
                .map(|(l, r)| ip.dot(l.as_slice(), r.as_slice()))
                .sum::<f64>()
    }
}

/// Wrap a dense matrix as a shared operator.
pub fn aslinop(a: Mat<f64>) -> Operator {
    Rc::new(MatrixMult::new(a))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::dense::from_rows;
    use approx::assert_abs_diff_eq;

    #[test]
    fn low_rank_update_matches_dense() {
        let base: Operator = Rc::new(ScalarMult::new(3, 2.0));
        let mut op = LowRankUpdate::new(base);
        op.push_symmetric(vec![1.0, 0.0, 1.0], vec![0.5, -1.0, 2.0]);
        let dense = op.todense();
        let u = [1.0, 0.0, 1.0];
        let v = [0.5, -1.0, 2.0];
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 2.0 } else { 0.0 } + u[i] * v[j] + v[i] * u[j];
                assert_abs_diff_eq!(dense[(i, j)], expected, epsilon = 1e-14);
            }
        }
        assert_abs_diff_eq!(op.trace(), 6.0 + 2.0 * (0.5 + 2.0), epsilon = 1e-14);
        assert_abs_diff_eq!(crate::matrix::dense::asymmetry(dense.as_ref()), 0.0);
    }

    #[test]
    fn product_and_transpose_compose() {
        let a = aslinop(from_rows(&[vec![1.0, 2.0], vec![0.0, 1.0], vec![3.0, -1.0]]));
        let b = aslinop(from_rows(&[vec![2.0, 0.0, 1.0], vec![1.0, 1.0, 0.0]]));
        let ab = Product::new(a.clone(), b.clone()).unwrap();
        assert_eq!(ab.shape(), (3, 3));
        let x = [1.0, -2.0, 0.5];
        let y = ab.apply(&x);
        let expected = a.apply(&b.apply(&x));
        for (yi, ei) in y.iter().zip(&expected) {
            assert_abs_diff_eq!(*yi, *ei, epsilon = 1e-14);
        }
        let t = Transpose::new(Rc::new(ab));
        let dense = t.todense();
        let ab_dense = Product::new(a, b).unwrap().todense();
        for i in 0..3 {
            for j in 0..3 {
                assert_abs_diff_eq!(dense[(i, j)], ab_dense[(j, i)], epsilon = 1e-14);
            }
        }
        assert!(Product::new(t.op.clone(), aslinop(Mat::zeros(2, 2))).is_err());
    }

    #[test]
    fn sum_rejects_shape_mismatch() {
        let terms: Vec<Operator> = vec![Rc::new(Identity::new(3)), Rc::new(Identity::new(4))];
        assert!(matches!(Sum::new(terms), Err(PlsError::DimensionMismatch(_))));
    }
}
