#![warn(missing_docs)]
//! Deterministic fixtures shared by the integration tests.

mod fixtures;

pub use fixtures::*;
