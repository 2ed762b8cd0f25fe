//! Control flow graph of a method body.
//!
//! Blocks live in an arena keyed by [`BlockId`]; iteration follows id order, which is the
//! program order blocks were created in. Each block owns its instructions and its ordered
//! outgoing [`Edge`]s:
//!
//! - a single [`EdgeKind::Goto`] edge for fallthrough (or the default target of a switch),
//! - [`EdgeKind::Branch`] edges for the taken side of a conditional (no key) or for switch
//!   cases (keyed),
//! - [`EdgeKind::Ghost`] edges, which carry no data flow but keep their targets alive.
//!
//! A graph is either *editable* (the structured form, where branch targets are implied by
//! edges alone) or *linear* (the layout form, where switch labels are tied to the code
//! layout). Some rewrites, like collapsing switch labels, only apply to the linear form.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    ir::{InsnId, Instruction, Opcode},
    Result,
};

/// Arena index of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// Position of an instruction: block plus index within the block.
///
/// Locations stay valid as long as the graph is not mutated, which makes them suitable keys
/// for change sets collected during a read-only traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InsnLocation {
    /// The owning block
    pub block: BlockId,
    /// Index within the block
    pub index: usize,
}

impl InsnLocation {
    /// Creates a location.
    #[must_use]
    pub fn new(block: BlockId, index: usize) -> Self {
        Self { block, index }
    }
}

/// Kind of a control flow edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Fallthrough, unconditional jump, or switch default
    Goto,
    /// Taken side of a conditional branch (`None`) or a switch case (`Some(key)`)
    Branch(Option<i32>),
    /// Structural edge without data flow
    Ghost,
}

impl EdgeKind {
    /// Returns the switch case key carried by this edge.
    #[must_use]
    pub fn case_key(self) -> Option<i32> {
        match self {
            Self::Branch(key) => key,
            _ => None,
        }
    }
}

/// A directed control flow edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    /// Source block
    pub src: BlockId,
    /// Target block
    pub target: BlockId,
    /// Edge type
    pub kind: EdgeKind,
}

/// A basic block: instructions plus outgoing edges.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    id: BlockId,
    insns: Vec<Instruction>,
    succs: Vec<Edge>,
}

impl Block {
    fn new(id: BlockId) -> Self {
        Self {
            id,
            insns: Vec::new(),
            succs: Vec::new(),
        }
    }

    /// Returns the id of this block.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Returns the instructions of this block in order.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.insns
    }

    /// Returns the outgoing edges of this block in order.
    #[must_use]
    pub fn successors(&self) -> &[Edge] {
        &self.succs
    }

    /// Returns the outgoing edges that carry data flow.
    pub fn non_ghost_successors(&self) -> impl Iterator<Item = &Edge> {
        self.succs.iter().filter(|e| e.kind != EdgeKind::Ghost)
    }

    /// Returns the last instruction if it is a conditional branch or a switch.
    #[must_use]
    pub fn branch(&self) -> Option<&Instruction> {
        self.insns.last().filter(|insn| insn.opcode.is_branch())
    }

    /// Returns the target of the goto edge, if any.
    #[must_use]
    pub fn goto_target(&self) -> Option<BlockId> {
        self.succs
            .iter()
            .find(|e| e.kind == EdgeKind::Goto)
            .map(|e| e.target)
    }

    /// Returns the number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.insns.len()
    }

    /// Returns `true` if the block holds no instruction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    pub(crate) fn instructions_mut(&mut self) -> &mut Vec<Instruction> {
        &mut self.insns
    }

    pub(crate) fn successors_mut(&mut self) -> &mut Vec<Edge> {
        &mut self.succs
    }
}

/// The control flow graph of one method.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlFlowGraph {
    blocks: BTreeMap<BlockId, Block>,
    entry: BlockId,
    editable: bool,
    next_block: usize,
    next_insn: u32,
}

impl ControlFlowGraph {
    /// Creates a graph holding a single empty entry block.
    ///
    /// # Arguments
    ///
    /// * `editable` - Whether the graph is in its structured, editable form.
    #[must_use]
    pub fn new(editable: bool) -> Self {
        let entry = BlockId(0);
        let mut blocks = BTreeMap::new();
        blocks.insert(entry, Block::new(entry));
        Self {
            blocks,
            entry,
            editable,
            next_block: 1,
            next_insn: 1,
        }
    }

    /// Returns the entry block.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// Returns `true` for the structured, editable form.
    #[must_use]
    pub fn is_editable(&self) -> bool {
        self.editable
    }

    /// Switches between the editable and the linear form.
    pub fn set_editable(&mut self, editable: bool) {
        self.editable = editable;
    }

    /// Looks up a block.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(&id)
    }

    fn expect_block_mut(&mut self, id: BlockId) -> Result<&mut Block> {
        self.blocks
            .get_mut(&id)
            .ok_or_else(|| malformed_error!("Block {} does not exist", id))
    }

    /// Iterates all blocks in program order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    /// Returns all block ids in program order.
    #[must_use]
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks.keys().copied().collect()
    }

    /// Returns the number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Appends a new empty block and returns its id.
    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        self.blocks.insert(id, Block::new(id));
        id
    }

    /// Hands out a fresh instruction id.
    pub(crate) fn fresh_instruction_id(&mut self) -> InsnId {
        let id = InsnId(self.next_insn);
        self.next_insn += 1;
        id
    }

    /// Appends an instruction to a block, assigning it a fresh id.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the block does not exist.
    pub fn push_instruction(&mut self, block: BlockId, mut insn: Instruction) -> Result<InsnId> {
        let id = self.fresh_instruction_id();
        insn.id = id;
        self.expect_block_mut(block)?.insns.push(insn);
        Ok(id)
    }

    /// Adds an edge from `src` to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if either block does not exist.
    pub fn add_edge(&mut self, src: BlockId, target: BlockId, kind: EdgeKind) -> Result<()> {
        if !self.blocks.contains_key(&target) {
            return Err(malformed_error!("Edge target {} does not exist", target));
        }
        self.expect_block_mut(src)?
            .succs
            .push(Edge { src, target, kind });
        Ok(())
    }

    /// Returns the predecessors of a block, one entry per incoming edge.
    #[must_use]
    pub fn predecessors(&self, id: BlockId) -> Vec<BlockId> {
        self.blocks
            .values()
            .flat_map(|b| b.succs.iter())
            .filter(|e| e.target == id)
            .map(|e| e.src)
            .collect()
    }

    /// Iterates all instructions in program order.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.blocks.values().flat_map(|b| b.insns.iter())
    }

    /// Returns the number of instructions over all blocks.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.blocks.values().map(Block::len).sum()
    }

    /// Finds the location of an instruction by id.
    #[must_use]
    pub fn find_instruction(&self, id: InsnId) -> Option<InsnLocation> {
        self.blocks.values().find_map(|b| {
            b.insns
                .iter()
                .position(|insn| insn.id == id)
                .map(|index| InsnLocation::new(b.id, index))
        })
    }

    /// Returns the instruction at a location.
    #[must_use]
    pub fn instruction(&self, loc: InsnLocation) -> Option<&Instruction> {
        self.blocks.get(&loc.block)?.insns.get(loc.index)
    }

    /// Estimated encoded size of the whole graph in code units.
    #[must_use]
    pub fn estimate_code_units(&self) -> usize {
        self.instructions().map(Instruction::code_units).sum()
    }

    /// Returns all blocks reachable from the entry, ghost edges included.
    #[must_use]
    pub fn reachable_blocks(&self) -> BTreeSet<BlockId> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![self.entry];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(block) = self.blocks.get(&id) {
                stack.extend(block.succs.iter().map(|e| e.target));
            }
        }
        seen
    }

    /// Returns the blocks in reverse post-order from the entry.
    #[must_use]
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut visited = BTreeSet::new();
        let mut order = Vec::with_capacity(self.blocks.len());
        let mut stack = vec![(self.entry, 0usize)];
        visited.insert(self.entry);
        while let Some((id, next)) = stack.pop() {
            let succs = self.blocks.get(&id).map_or(&[][..], |b| &b.succs[..]);
            if let Some(edge) = succs.get(next) {
                stack.push((id, next + 1));
                if visited.insert(edge.target) {
                    stack.push((edge.target, 0));
                }
            } else {
                order.push(id);
            }
        }
        order.reverse();
        order
    }

    /// Removes a block together with every edge leading into it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] when asked to remove the entry block.
    pub fn remove_block(&mut self, id: BlockId) -> Result<()> {
        if id == self.entry {
            return Err(malformed_error!("Cannot remove entry block {}", id));
        }
        self.blocks.remove(&id);
        for block in self.blocks.values_mut() {
            block.succs.retain(|e| e.target != id);
        }
        Ok(())
    }

    /// Splits `block` before instruction `at`.
    ///
    /// The instructions from `at` onwards and all outgoing edges move to a new block; the
    /// original block falls through into it.
    ///
    /// # Returns
    ///
    /// The id of the new block holding the tail.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the block does not exist or `at` is out of
    /// range.
    pub fn split_block(&mut self, block: BlockId, at: usize) -> Result<BlockId> {
        let tail_id = BlockId(self.next_block);
        let head = self.expect_block_mut(block)?;
        if at > head.insns.len() {
            return Err(malformed_error!(
                "Split position {} out of range for {}",
                at,
                block
            ));
        }
        let insns = head.insns.split_off(at);
        let mut succs = std::mem::take(&mut head.succs);
        head.succs.push(Edge {
            src: block,
            target: tail_id,
            kind: EdgeKind::Goto,
        });
        for edge in &mut succs {
            edge.src = tail_id;
        }
        self.next_block += 1;
        self.blocks.insert(
            tail_id,
            Block {
                id: tail_id,
                insns,
                succs,
            },
        );
        Ok(tail_id)
    }

    /// Replaces `count` instructions starting at `loc` with `replacements`.
    ///
    /// Replacement instructions receive fresh ids.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the range is out of bounds.
    pub fn replace_instructions(
        &mut self,
        loc: InsnLocation,
        count: usize,
        replacements: Vec<Instruction>,
    ) -> Result<()> {
        let mut fresh = Vec::with_capacity(replacements.len());
        for mut insn in replacements {
            insn.id = self.fresh_instruction_id();
            fresh.push(insn);
        }
        let block = self.expect_block_mut(loc.block)?;
        if loc.index + count > block.insns.len() {
            return Err(malformed_error!(
                "Replacement range {}..{} out of bounds in {}",
                loc.index,
                loc.index + count,
                loc.block
            ));
        }
        block.insns.splice(loc.index..loc.index + count, fresh);
        Ok(())
    }

    /// Inserts instructions before position `loc`, assigning fresh ids.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the position is out of bounds.
    pub fn insert_instructions(
        &mut self,
        loc: InsnLocation,
        insns: Vec<Instruction>,
    ) -> Result<()> {
        self.replace_instructions(loc, 0, insns)
    }

    /// Removes the instruction at `loc`.
    ///
    /// Removing a branch through this method leaves its edges in place; use
    /// [`ControlFlowGraph::remove_branch`] for that.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the location is out of bounds.
    pub fn remove_instruction(&mut self, loc: InsnLocation) -> Result<Instruction> {
        let block = self.expect_block_mut(loc.block)?;
        if loc.index >= block.insns.len() {
            return Err(malformed_error!(
                "Instruction index {} out of bounds in {}",
                loc.index,
                loc.block
            ));
        }
        Ok(block.insns.remove(loc.index))
    }

    /// Replaces the terminating branch of `block` with an unconditional jump.
    ///
    /// The single remaining un-keyed [`EdgeKind::Branch`] edge becomes the goto edge; the
    /// fallthrough edge and any remaining case edges are dropped. Ghost edges are kept.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the block does not end in a branch, if the
    /// replacement is not a `goto`, or if there is not exactly one un-keyed branch edge to
    /// jump to.
    pub fn replace_branch(&mut self, block: BlockId, mut goto: Instruction) -> Result<()> {
        if goto.opcode != Opcode::Goto {
            return Err(malformed_error!(
                "Branch in {} can only be replaced by goto, got {}",
                block,
                goto.opcode
            ));
        }
        goto.id = self.fresh_instruction_id();
        let b = self.expect_block_mut(block)?;
        if b.branch().is_none() {
            return Err(malformed_error!("{} does not end in a branch", block));
        }
        let targets: Vec<BlockId> = b
            .succs
            .iter()
            .filter(|e| e.kind == EdgeKind::Branch(None))
            .map(|e| e.target)
            .collect();
        let [target] = targets.as_slice() else {
            return Err(malformed_error!(
                "{} has {} un-keyed branch edges, expected exactly one",
                block,
                targets.len()
            ));
        };
        let target = *target;
        b.succs.retain(|e| e.kind == EdgeKind::Ghost);
        b.succs.push(Edge {
            src: block,
            target,
            kind: EdgeKind::Goto,
        });
        if let Some(last) = b.insns.last_mut() {
            *last = goto;
        }
        Ok(())
    }

    /// Deletes the terminating branch of `block`, leaving only its fallthrough.
    ///
    /// All [`EdgeKind::Branch`] edges are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the block does not end in a branch or has no
    /// fallthrough edge.
    pub fn remove_branch(&mut self, block: BlockId) -> Result<()> {
        let b = self.expect_block_mut(block)?;
        if b.branch().is_none() {
            return Err(malformed_error!("{} does not end in a branch", block));
        }
        if b.goto_target().is_none() {
            return Err(malformed_error!("{} has no fallthrough edge", block));
        }
        b.succs.retain(|e| !matches!(e.kind, EdgeKind::Branch(_)));
        b.insns.pop();
        Ok(())
    }

    /// Removes the outgoing edge at `index` of `block`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the edge does not exist.
    pub fn remove_edge(&mut self, block: BlockId, index: usize) -> Result<Edge> {
        let b = self.expect_block_mut(block)?;
        if index >= b.succs.len() {
            return Err(malformed_error!("Edge {} out of bounds in {}", index, block));
        }
        Ok(b.succs.remove(index))
    }

    /// Changes the kind of the outgoing edge at `index` of `block`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the edge does not exist.
    pub fn set_edge_kind(&mut self, block: BlockId, index: usize, kind: EdgeKind) -> Result<()> {
        let b = self.expect_block_mut(block)?;
        let edge = b
            .succs
            .get_mut(index)
            .ok_or_else(|| malformed_error!("Edge {} out of bounds in {}", index, block))?;
        edge.kind = kind;
        Ok(())
    }

    /// Checks the edge shape of every block against its terminator.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] describing the first violation:
    /// a conditional branch without exactly two non-ghost successors, a switch without
    /// exactly one default edge, duplicate case keys, or a block with keyed edges that does
    /// not end in a switch.
    pub fn validate(&self) -> Result<()> {
        for block in self.blocks.values() {
            let gotos = block
                .succs
                .iter()
                .filter(|e| e.kind == EdgeKind::Goto)
                .count();
            if gotos > 1 {
                return Err(malformed_error!("{} has {} goto edges", block.id, gotos));
            }
            match block.branch().map(|insn| insn.opcode) {
                Some(op) if op.is_conditional_branch() => {
                    let n = block.non_ghost_successors().count();
                    if n != 2 {
                        return Err(malformed_error!(
                            "Conditional branch in {} has {} non-ghost successors",
                            block.id,
                            n
                        ));
                    }
                }
                Some(_) => {
                    if gotos != 1 {
                        return Err(malformed_error!("Switch in {} has no default edge", block.id));
                    }
                    let mut keys = BTreeSet::new();
                    for key in block.succs.iter().filter_map(|e| e.kind.case_key()) {
                        if !keys.insert(key) {
                            return Err(malformed_error!(
                                "Switch in {} has duplicate case key {}",
                                block.id,
                                key
                            ));
                        }
                    }
                }
                None => {
                    if block
                        .succs
                        .iter()
                        .any(|e| matches!(e.kind, EdgeKind::Branch(_)))
                    {
                        return Err(malformed_error!(
                            "{} has branch edges but no branch instruction",
                            block.id
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Reg;

    fn diamond() -> Result<ControlFlowGraph> {
        let mut cfg = ControlFlowGraph::new(false);
        let entry = cfg.entry();
        let taken = cfg.add_block();
        let fall = cfg.add_block();
        cfg.push_instruction(entry, Instruction::new(Opcode::IfEqz).with_src(Reg(0)))?;
        cfg.add_edge(entry, fall, EdgeKind::Goto)?;
        cfg.add_edge(entry, taken, EdgeKind::Branch(None))?;
        cfg.push_instruction(taken, Instruction::new(Opcode::ReturnVoid))?;
        cfg.push_instruction(fall, Instruction::new(Opcode::ReturnVoid))?;
        Ok(cfg)
    }

    #[test]
    fn test_replace_branch_keeps_taken_edge() -> Result<()> {
        let mut cfg = diamond()?;
        cfg.validate()?;
        cfg.replace_branch(cfg.entry(), Instruction::new(Opcode::Goto))?;
        let entry = cfg.block(cfg.entry()).unwrap();
        assert_eq!(entry.successors().len(), 1);
        assert_eq!(entry.goto_target(), Some(BlockId(1)));
        assert_eq!(entry.instructions()[0].opcode, Opcode::Goto);
        cfg.validate()
    }

    #[test]
    fn test_remove_branch_keeps_fallthrough() -> Result<()> {
        let mut cfg = diamond()?;
        cfg.remove_branch(cfg.entry())?;
        let entry = cfg.block(cfg.entry()).unwrap();
        assert!(entry.is_empty());
        assert_eq!(entry.goto_target(), Some(BlockId(2)));
        assert!(!cfg.reachable_blocks().contains(&BlockId(1)));
        Ok(())
    }

    #[test]
    fn test_replace_branch_rejects_non_goto() -> Result<()> {
        let mut cfg = diamond()?;
        let result = cfg.replace_branch(cfg.entry(), Instruction::new(Opcode::Nop));
        assert!(matches!(result, Err(crate::Error::Malformed { .. })));
        Ok(())
    }

    #[test]
    fn test_split_block_moves_tail_and_edges() -> Result<()> {
        let mut cfg = ControlFlowGraph::new(true);
        let entry = cfg.entry();
        let exit = cfg.add_block();
        cfg.push_instruction(entry, Instruction::constant(Reg(0), 1, false))?;
        let second = cfg.push_instruction(entry, Instruction::constant(Reg(1), 2, false))?;
        cfg.add_edge(entry, exit, EdgeKind::Goto)?;

        let tail = cfg.split_block(entry, 1)?;
        assert_eq!(cfg.block(entry).unwrap().len(), 1);
        assert_eq!(cfg.block(entry).unwrap().goto_target(), Some(tail));
        assert_eq!(cfg.block(tail).unwrap().goto_target(), Some(exit));
        assert_eq!(cfg.find_instruction(second), Some(InsnLocation::new(tail, 0)));
        assert_eq!(cfg.predecessors(exit), vec![tail]);
        Ok(())
    }

    #[test]
    fn test_insert_assigns_fresh_ids() -> Result<()> {
        let mut cfg = diamond()?;
        let taken = BlockId(1);
        let existing = cfg.block(taken).unwrap().instructions()[0].id;
        cfg.insert_instructions(
            InsnLocation::new(taken, 0),
            vec![Instruction::constant(Reg(1), 4, false)],
        )?;
        let insns = cfg.block(taken).unwrap().instructions();
        assert_eq!(insns.len(), 2);
        assert_eq!(insns[0].opcode, Opcode::Const);
        assert_ne!(insns[0].id, existing);
        assert_eq!(cfg.find_instruction(existing), Some(InsnLocation::new(taken, 1)));
        Ok(())
    }

    #[test]
    fn test_validate_rejects_one_armed_conditional() -> Result<()> {
        let mut cfg = ControlFlowGraph::new(false);
        let entry = cfg.entry();
        let next = cfg.add_block();
        cfg.push_instruction(entry, Instruction::new(Opcode::IfNez).with_src(Reg(0)))?;
        cfg.add_edge(entry, next, EdgeKind::Goto)?;
        assert!(cfg.validate().is_err());
        Ok(())
    }

    #[test]
    fn test_reverse_postorder_starts_at_entry() -> Result<()> {
        let cfg = diamond()?;
        let rpo = cfg.reverse_postorder();
        assert_eq!(rpo.first(), Some(&cfg.entry()));
        assert_eq!(rpo.len(), 3);
        Ok(())
    }
}
