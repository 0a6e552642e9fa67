pub mod options;

pub use options::{AssumeA, SolverOptions};
