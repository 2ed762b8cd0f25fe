//! Register liveness.
//!
//! A register is *live* at a program point if some path from that point reads it before
//! writing it.
//!
//! # Algorithm
//!
//! This is a backward data flow analysis:
//!
//! - `USE[B]` = registers read in B before any write
//! - `DEF[B]` = registers written in B
//! - `OUT[B]` = ∪{IN[S] | S is a successor of B}, ghost successors included
//! - `IN[B]` = USE[B] ∪ (OUT[B] - DEF[B])

use std::collections::{BTreeMap, BTreeSet};

use crate::ir::{BlockId, ControlFlowGraph, Instruction, Reg};

/// Live registers at block boundaries.
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    live_in: BTreeMap<BlockId, BTreeSet<Reg>>,
    live_out: BTreeMap<BlockId, BTreeSet<Reg>>,
}

impl Liveness {
    /// Computes liveness for every block of `cfg`.
    #[must_use]
    pub fn compute(cfg: &ControlFlowGraph) -> Self {
        let mut uses = BTreeMap::new();
        let mut defs = BTreeMap::new();
        for block in cfg.blocks() {
            let mut used = BTreeSet::new();
            let mut defined = BTreeSet::new();
            for insn in block.instructions() {
                for src in &insn.srcs {
                    if !defined.contains(src) {
                        used.insert(*src);
                    }
                }
                if let Some(dest) = insn.dest {
                    defined.insert(dest);
                }
            }
            uses.insert(block.id(), used);
            defs.insert(block.id(), defined);
        }

        let mut result = Self::default();
        let mut order = cfg.reverse_postorder();
        order.reverse();
        let mut changed = true;
        while changed {
            changed = false;
            for &id in &order {
                let Some(block) = cfg.block(id) else {
                    continue;
                };
                let out: BTreeSet<Reg> = block
                    .successors()
                    .iter()
                    .filter_map(|e| result.live_in.get(&e.target))
                    .flatten()
                    .copied()
                    .collect();
                let mut live = uses.get(&id).cloned().unwrap_or_default();
                if let Some(defined) = defs.get(&id) {
                    live.extend(out.difference(defined).copied());
                } else {
                    live.extend(out.iter().copied());
                }
                if result.live_in.get(&id) != Some(&live) {
                    result.live_in.insert(id, live);
                    changed = true;
                }
                result.live_out.insert(id, out);
            }
        }
        result
    }

    /// Registers live on entry to `block`.
    #[must_use]
    pub fn live_in(&self, block: BlockId) -> BTreeSet<Reg> {
        self.live_in.get(&block).cloned().unwrap_or_default()
    }

    /// Registers live on exit from `block`.
    #[must_use]
    pub fn live_out(&self, block: BlockId) -> BTreeSet<Reg> {
        self.live_out.get(&block).cloned().unwrap_or_default()
    }

    /// Steps a live set backwards over one instruction.
    pub fn step_backward(live: &mut BTreeSet<Reg>, insn: &Instruction) {
        if let Some(dest) = insn.dest {
            live.remove(&dest);
        }
        live.extend(insn.srcs.iter().copied());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{MethodBuilder, Opcode};

    #[test]
    fn test_liveness_across_blocks() {
        let body = MethodBuilder::new(3, [Reg(2)]).build_with(|m| {
            m.block(0, |b| {
                b.const_(Reg(0), 1);
                b.const_(Reg(1), 2);
                b.if_zero(Opcode::IfEqz, Reg(2), 2, 1);
            });
            m.block(1, |b| {
                b.ret(Reg(0));
            });
            m.block(2, |b| {
                b.const_(Reg(0), 3);
                b.ret(Reg(0));
            });
        });
        let liveness = Liveness::compute(&body.cfg);
        assert!(liveness.live_in(BlockId(0)).contains(&Reg(2)));
        assert!(!liveness.live_in(BlockId(0)).contains(&Reg(0)));
        let out = liveness.live_out(BlockId(0));
        assert!(out.contains(&Reg(0)));
        assert!(!out.contains(&Reg(1)));
        assert!(liveness.live_in(BlockId(2)).is_empty());
    }

    #[test]
    fn test_liveness_in_loop() {
        let body = MethodBuilder::new(2, []).build_with(|m| {
            m.block(0, |b| {
                b.const_(Reg(0), 0);
                b.fallthrough(1);
            });
            m.block(1, |b| {
                b.binop_lit(Opcode::AddIntLit, Reg(0), Reg(0), 1);
                b.if_zero(Opcode::IfNez, Reg(0), 1, 2);
            });
            m.block(2, |b| {
                b.return_void();
            });
        });
        let liveness = Liveness::compute(&body.cfg);
        assert!(liveness.live_out(BlockId(0)).contains(&Reg(0)));
        assert!(liveness.live_out(BlockId(1)).contains(&Reg(0)));
    }
}
