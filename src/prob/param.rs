//! Parameter values of a belief: scalars, dense arrays or linear operators.

use crate::core::traits::{LinearOperator, Operator};
use crate::error::PlsError;
use crate::linops::{aslinop, Sum};
use crate::matrix::dense::{unvec_row_major, vec_row_major};
use faer::Mat;
use std::rc::Rc;

#[derive(Clone, Debug)]
pub enum Param {
    Scalar(f64),
    /// 1-D array
    Vector(Vec<f64>),
    /// 2-D array
    Matrix(Mat<f64>),
    Operator(Operator),
}

impl Param {
    /// Shape in the array sense: `[]`, `[n]` or `[m, n]`.
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Param::Scalar(_) => vec![],
            Param::Vector(v) => vec![v.len()],
            Param::Matrix(m) => vec![m.nrows(), m.ncols()],
            Param::Operator(op) => {
                let (m, n) = op.shape();
                vec![m, n]
            }
        }
    }

    /// Number of entries once flattened.
    pub fn size(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_operator(&self) -> bool {
        matches!(self, Param::Operator(_))
    }

    /// `(rows, cols)` for 2-D parameters.
    pub fn dims2(&self) -> Option<(usize, usize)> {
        match self {
            Param::Matrix(m) => Some((m.nrows(), m.ncols())),
            Param::Operator(op) => Some(op.shape()),
            _ => None,
        }
    }

    /// Row-major flattening. Densifies operators.
    pub fn to_flat(&self) -> Vec<f64> {
        match self {
            Param::Scalar(s) => vec![*s],
            Param::Vector(v) => v.clone(),
            Param::Matrix(m) => vec_row_major(m.as_ref()),
            Param::Operator(op) => vec_row_major(op.todense().as_ref()),
        }
    }

    /// Dense 2-D view of a matrix or operator parameter.
    pub fn to_dense_matrix(&self) -> Option<Mat<f64>> {
        match self {
            Param::Matrix(m) => Some(m.clone()),
            Param::Operator(op) => Some(op.todense()),
            _ => None,
        }
    }

    /// The parameter as an operator, wrapping dense matrices.
    pub fn to_operator(&self) -> Option<Operator> {
        match self {
            Param::Matrix(m) => Some(aslinop(m.clone())),
            Param::Operator(op) => Some(op.clone()),
            _ => None,
        }
    }

    /// Reshape flat data to the shape of `self`, dense.
    pub fn with_flat_data(&self, data: &[f64]) -> Param {
        match self {
            Param::Scalar(_) => Param::Scalar(data[0]),
            Param::Vector(_) => Param::Vector(data.to_vec()),
            Param::Matrix(m) => Param::Matrix(unvec_row_major(data, m.nrows(), m.ncols())),
            Param::Operator(op) => Param::Matrix(unvec_row_major(data, op.nrows(), op.ncols())),
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Param::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            Param::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<&Mat<f64>> {
        match self {
            Param::Matrix(m) => Some(m),
            _ => None,
        }
    }

    /// `c · self`, lazily for operators.
    pub fn scaled(&self, c: f64) -> Param {
        match self {
            Param::Scalar(s) => Param::Scalar(c * s),
            Param::Vector(v) => Param::Vector(v.iter().map(|x| c * x).collect()),
            Param::Matrix(m) => Param::Matrix(Mat::from_fn(m.nrows(), m.ncols(), |i, j| c * m[(i, j)])),
            Param::Operator(op) => Param::Operator(Rc::new(crate::linops::Scaled::new(c, op.clone()))),
        }
    }

    /// `self + other` for parameters of equal shape.
    pub fn plus(&self, other: &Param) -> Result<Param, PlsError> {
        if self.shape() != other.shape() {
            return Err(PlsError::DimensionMismatch(format!(
                "cannot add parameters of shape {:?} and {:?}",
                self.shape(),
                other.shape()
            )));
        }
        Ok(match (self, other) {
            (Param::Scalar(a), Param::Scalar(b)) => Param::Scalar(a + b),
            (Param::Vector(a), Param::Vector(b)) => Param::Vector(a.iter().zip(b).map(|(x, y)| x + y).collect()),
            (Param::Matrix(a), Param::Matrix(b)) => {
                Param::Matrix(Mat::from_fn(a.nrows(), a.ncols(), |i, j| a[(i, j)] + b[(i, j)]))
            }
            (a, b) => match (a.to_operator(), b.to_operator()) {
                (Some(x), Some(y)) => Param::Operator(Rc::new(Sum::new(vec![x, y])?)),
                _ => {
                    return Err(PlsError::Unsupported(format!(
                        "addition of parameters of kind {} and {}",
                        a.kind_name(),
                        b.kind_name()
                    )));
                }
            },
        })
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Param::Scalar(_) => "scalar",
            Param::Vector(_) => "vector",
            Param::Matrix(_) => "matrix",
            Param::Operator(_) => "operator",
        }
    }
}

impl From<f64> for Param {
    fn from(s: f64) -> Self {
        Param::Scalar(s)
    }
}

impl From<Vec<f64>> for Param {
    fn from(v: Vec<f64>) -> Self {
        Param::Vector(v)
    }
}

impl From<Mat<f64>> for Param {
    fn from(m: Mat<f64>) -> Self {
        Param::Matrix(m)
    }
}

impl From<Operator> for Param {
    fn from(op: Operator) -> Self {
        Param::Operator(op)
    }
}
