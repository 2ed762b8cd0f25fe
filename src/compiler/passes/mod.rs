//! Per-method optimization passes.
//!
//! - [`constants`] - Constant propagation transform driven by a fixpoint
//! - [`copying`] - Block-local copy propagation
//! - [`cse`] - Block-local common subexpression elimination
//! - [`deadcode`] - Unreachable block and dead instruction removal

pub mod constants;
pub mod copying;
pub mod cse;
pub mod deadcode;

pub use constants::{Transform, TransformConfig, TransformStats};
pub use copying::{CopyPropagationPass, CopyPropagationStats};
pub use cse::{CommonSubexpressionPass, CseStats};
pub use deadcode::{LocalDcePass, LocalDceStats};
