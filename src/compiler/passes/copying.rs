//! Copy propagation pass.
//!
//! This pass eliminates redundant copy operations by replacing uses of
//! copy destinations with their sources, and deletes moves that became no-ops.
//!
//! # Example
//!
//! Before:
//! ```text
//! move v1, v0
//! add-int-lit v2, v1, 5
//! move v1, v0
//! return v1
//! ```
//!
//! After:
//! ```text
//! move v1, v0        // Can now be eliminated by DCE
//! add-int-lit v2, v0, 5
//! return v0
//! ```
//!
//! # Algorithm
//!
//! The pass is block-local. Walking each block forwards it keeps a map from copy
//! destinations to their sources:
//!
//! 1. Uses of a mapped register are rewritten to its source
//! 2. A move whose rewritten source equals its destination, or that repeats a copy
//!    which is still intact, is deleted
//! 3. A write to a register drops every mapping it takes part in
//! 4. A surviving move records a new mapping
//!
//! # Complexity
//!
//! - Time: O(n × c) where n is the number of instructions and c the number of live copies
//! - Space: O(c) for the copy map

use std::{collections::HashMap, ops::AddAssign};

use crate::{
    compiler::{pass::MethodPass, EventKind, EventLog},
    ir::{MethodBody, MethodId, Reg},
    Result,
};

/// Counts of rewrites performed by [`CopyPropagationPass`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyPropagationStats {
    /// Moves deleted as no-ops
    pub moves_eliminated: usize,
    /// Register uses forwarded to a copy source
    pub uses_replaced: usize,
}

impl CopyPropagationStats {
    /// Returns `true` if the pass changed anything.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.moves_eliminated + self.uses_replaced > 0
    }
}

impl AddAssign for CopyPropagationStats {
    fn add_assign(&mut self, other: Self) {
        self.moves_eliminated += other.moves_eliminated;
        self.uses_replaced += other.uses_replaced;
    }
}

/// Copy propagation pass.
///
/// Tracks copy operations and propagates the source to all later uses of the copy
/// within the same block.
///
/// # Handled Cases
///
/// - Direct copies: `move v1, v0` followed by uses of `v1`
/// - Copy chains: `move v1, v0; move v2, v1` both map to `v0`
/// - Self-moves: `move v0, v0`
/// - Repeated copies: a second `move v1, v0` while the first is intact
pub struct CopyPropagationPass;

impl Default for CopyPropagationPass {
    fn default() -> Self {
        Self::new()
    }
}

impl CopyPropagationPass {
    /// Creates a new copy propagation pass.
    ///
    /// # Returns
    ///
    /// A new `CopyPropagationPass` instance.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Drops every mapping `reg` takes part in.
    fn kill(copies: &mut HashMap<Reg, Reg>, reg: Reg) {
        copies.remove(&reg);
        copies.retain(|_, src| *src != reg);
    }

    /// Runs the pass and reports what it did.
    ///
    /// # Arguments
    ///
    /// * `body` - The method body to transform.
    /// * `method` - The owning method, for change tracking.
    /// * `events` - Change log to record into.
    ///
    /// # Returns
    ///
    /// The number of uses forwarded and moves deleted.
    pub fn run(
        &self,
        body: &mut MethodBody,
        method: Option<MethodId>,
        events: &EventLog,
    ) -> CopyPropagationStats {
        let mut stats = CopyPropagationStats::default();

        for id in body.cfg.block_ids() {
            let Some(block) = body.cfg.block_mut(id) else {
                continue;
            };
            let mut copies: HashMap<Reg, Reg> = HashMap::new();
            let insns = std::mem::take(block.instructions_mut());
            let mut kept = Vec::with_capacity(insns.len());

            for mut insn in insns {
                for src in &mut insn.srcs {
                    if let Some(&source) = copies.get(src) {
                        *src = source;
                        stats.uses_replaced += 1;
                    }
                }

                if insn.opcode.is_move() {
                    if let (Some(dest), Some(src)) = (insn.dest, insn.src(0)) {
                        if dest == src || copies.get(&dest) == Some(&src) {
                            stats.moves_eliminated += 1;
                            events
                                .record(EventKind::CopyPropagated)
                                .maybe_method(method)
                                .location(insn.id)
                                .message(format!("{insn} is a no-op"));
                            continue;
                        }
                        Self::kill(&mut copies, dest);
                        copies.insert(dest, src);
                        kept.push(insn);
                        continue;
                    }
                }

                if let Some(dest) = insn.dest {
                    Self::kill(&mut copies, dest);
                }
                kept.push(insn);
            }

            *block.instructions_mut() = kept;
        }

        if stats.changed() {
            log::trace!(
                "copy propagation: {} uses replaced, {} moves eliminated",
                stats.uses_replaced,
                stats.moves_eliminated
            );
        }
        stats
    }
}

impl MethodPass for CopyPropagationPass {
    fn name(&self) -> &'static str {
        "copy-propagation"
    }

    fn description(&self) -> &'static str {
        "Propagates copy operations, replacing uses with original sources"
    }

    fn run_on_method(
        &self,
        body: &mut MethodBody,
        method: Option<MethodId>,
        events: &EventLog,
    ) -> Result<bool> {
        Ok(self.run(body, method, events).changed())
    }
}
