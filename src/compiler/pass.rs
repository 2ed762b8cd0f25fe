//! The interface shared by the block-local shrinking passes.

use crate::{
    compiler::EventLog,
    ir::{MethodBody, MethodId},
    Result,
};

/// A transformation that operates on one method body at a time.
///
/// All passes must be thread-safe (Send + Sync): the inliner shrinks unrelated methods on
/// several worker threads with one shared pass instance. Per-method working state is local
/// to [`MethodPass::run_on_method`]; anything a pass accumulates across methods must use
/// interior synchronization.
pub trait MethodPass: Send + Sync {
    /// Unique name for logging and debugging.
    fn name(&self) -> &'static str;

    /// Run the pass on a single method body.
    ///
    /// Returns `true` if any changes were made, `false` otherwise.
    /// Events should be recorded directly to `events`.
    ///
    /// # Arguments
    ///
    /// * `body` - The method body to transform.
    /// * `method` - The method the body belongs to, if it is part of a program.
    /// * `events` - Change log shared by all passes of a run.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is structurally malformed.
    fn run_on_method(
        &self,
        body: &mut MethodBody,
        method: Option<MethodId>,
        events: &EventLog,
    ) -> Result<bool>;

    /// Get a description of what this pass does.
    fn description(&self) -> &'static str {
        "No description available"
    }
}
