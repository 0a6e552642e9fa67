//! Matrix module: dense helpers over `faer::Mat`.

pub mod dense;
pub use dense::{cholesky_lower, from_rows, unvec_row_major, vec_row_major};
