pub mod traits;
pub mod wrappers;
