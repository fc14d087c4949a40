//! Platform Policy Module
//!
//! Describes the operating system the storage simulates: separators, case
//! sensitivity, path rules and conditional execution helpers.

pub mod path;
pub mod types;

pub use types::{Execute, SimulatedOs, StringComparison};
