//! Local dead code elimination.
//!
//! Removes blocks that cannot be reached from the entry and side-effect-free instructions
//! whose destination register is never read afterwards.
//!
//! # Algorithm
//!
//! 1. Delete every block not reachable from the entry (ghost edges count as reachable)
//! 2. Compute [`Liveness`] and sweep each block backwards from its live-out set,
//!    deleting pure instructions whose destination is dead
//! 3. Repeat step 2 while it deletes something, since removing a use can kill a
//!    definition in a predecessor
//!
//! Field and array loads, literal division and invokes may throw and are never removed.

use std::collections::BTreeSet;

use crate::{
    analysis::Liveness,
    compiler::{pass::MethodPass, EventKind, EventLog},
    ir::{MethodBody, MethodId},
    Result,
};

/// Counts of removals performed by [`LocalDcePass`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalDceStats {
    /// Instructions removed because their result was dead
    pub dead_instructions_removed: usize,
    /// Blocks removed because they were unreachable
    pub unreachable_blocks_removed: usize,
}

impl LocalDceStats {
    /// Returns `true` if the pass changed anything.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.dead_instructions_removed + self.unreachable_blocks_removed > 0
    }
}

impl std::ops::AddAssign for LocalDceStats {
    fn add_assign(&mut self, other: Self) {
        self.dead_instructions_removed += other.dead_instructions_removed;
        self.unreachable_blocks_removed += other.unreachable_blocks_removed;
    }
}

/// Local dead code elimination pass.
pub struct LocalDcePass;

impl Default for LocalDcePass {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalDcePass {
    /// Creates a new dead code elimination pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn remove_unreachable_blocks(
        body: &mut MethodBody,
        method: Option<MethodId>,
        events: &EventLog,
    ) -> Result<usize> {
        let reachable = body.cfg.reachable_blocks();
        let mut removed = 0;
        for id in body.cfg.block_ids() {
            if reachable.contains(&id) {
                continue;
            }
            body.cfg.remove_block(id)?;
            events
                .record(EventKind::BlockRemoved)
                .maybe_method(method)
                .message(format!("{id}"));
            removed += 1;
        }
        Ok(removed)
    }

    fn sweep(body: &mut MethodBody, method: Option<MethodId>, events: &EventLog) -> usize {
        let liveness = Liveness::compute(&body.cfg);
        let mut removed = 0;
        for id in body.cfg.block_ids() {
            let mut live: BTreeSet<_> = liveness.live_out(id);
            let Some(block) = body.cfg.block_mut(id) else {
                continue;
            };
            let insns = std::mem::take(block.instructions_mut());
            let mut kept = Vec::with_capacity(insns.len());
            for insn in insns.into_iter().rev() {
                let dead = insn.opcode.is_pure() && insn.dest.is_some_and(|d| !live.contains(&d));
                if dead {
                    events
                        .record(EventKind::InstructionRemoved)
                        .maybe_method(method)
                        .location(insn.id)
                        .message(format!("{insn}"));
                    removed += 1;
                    continue;
                }
                Liveness::step_backward(&mut live, &insn);
                kept.push(insn);
            }
            kept.reverse();
            *block.instructions_mut() = kept;
        }
        removed
    }

    /// Runs the pass and reports what it did.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the graph is inconsistent.
    pub fn run(
        &self,
        body: &mut MethodBody,
        method: Option<MethodId>,
        events: &EventLog,
    ) -> Result<LocalDceStats> {
        let mut stats = LocalDceStats {
            unreachable_blocks_removed: Self::remove_unreachable_blocks(body, method, events)?,
            ..LocalDceStats::default()
        };
        loop {
            let removed = Self::sweep(body, method, events);
            if removed == 0 {
                break;
            }
            stats.dead_instructions_removed += removed;
        }
        if stats.changed() {
            log::trace!(
                "dce: {} instructions, {} blocks removed",
                stats.dead_instructions_removed,
                stats.unreachable_blocks_removed
            );
        }
        Ok(stats)
    }
}

impl MethodPass for LocalDcePass {
    fn name(&self) -> &'static str {
        "local-dce"
    }

    fn description(&self) -> &'static str {
        "Removes unreachable blocks and pure instructions with dead results"
    }

    fn run_on_method(
        &self,
        body: &mut MethodBody,
        method: Option<MethodId>,
        events: &EventLog,
    ) -> Result<bool> {
        Ok(self.run(body, method, events)?.changed())
    }
}
