pub mod convergence;

pub use convergence::{Convergence, Criteria, SolveInfo, SolveStats, StopReason};
