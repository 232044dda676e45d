pub mod fixtures;
pub mod strategies;

pub use fixtures::*;
