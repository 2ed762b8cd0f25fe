//! Supporting infrastructure shared by the optimization passes.
//!
//! - [`pool`] - [`PriorityThreadPool`], the dispatcher of the inliner's jobs

pub mod pool;

pub use pool::PriorityThreadPool;
