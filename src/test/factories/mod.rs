//! Program factories used across unit tests.

mod program;

pub use program::*;
