//! Method bodies and a closure-based builder for them.
//!
//! # Example
//!
//! ```rust
//! use dexopt::ir::{MemberRef, MethodBuilder, Reg};
//!
//! let field = MemberRef::new("LFoo;", "x");
//! let body = MethodBuilder::new(2, []).build_with(|m| {
//!     m.block(0, |b| {
//!         b.const_(Reg(0), 7);
//!         b.sput(Reg(0), field.clone());
//!         b.fallthrough(1);
//!     });
//!     m.block(1, |b| {
//!         b.return_void();
//!     });
//! });
//! assert_eq!(body.cfg.block_count(), 2);
//! ```

use crate::ir::{BlockId, ControlFlowGraph, EdgeKind, InsnId, Instruction, MemberRef, Opcode, Reg};

/// The code of one method: parameters, register frame and control flow graph.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodBody {
    /// Registers holding the incoming arguments, in argument order
    pub params: Vec<Reg>,
    /// Number of registers in the frame
    pub registers_size: u32,
    /// Exception types caught by handlers in this body
    pub catch_types: Vec<String>,
    /// The control flow graph
    pub cfg: ControlFlowGraph,
}

impl MethodBody {
    /// Creates an empty body.
    ///
    /// # Arguments
    ///
    /// * `registers_size` - Size of the register frame.
    /// * `params` - Registers receiving the arguments.
    /// * `editable` - Whether the graph starts in its structured, editable form.
    #[must_use]
    pub fn new(registers_size: u32, params: Vec<Reg>, editable: bool) -> Self {
        Self {
            params,
            registers_size,
            catch_types: Vec::new(),
            cfg: ControlFlowGraph::new(editable),
        }
    }

    /// Estimated encoded size in code units.
    #[must_use]
    pub fn estimate_code_units(&self) -> usize {
        self.cfg.estimate_code_units()
    }

    /// Number of return instructions in the body.
    #[must_use]
    pub fn return_count(&self) -> usize {
        self.cfg
            .instructions()
            .filter(|insn| insn.opcode.is_return())
            .count()
    }

    /// Grows the frame by `count` registers and returns the first new register number.
    pub fn allocate_registers(&mut self, count: u32) -> u32 {
        let base = self.registers_size;
        self.registers_size += count;
        base
    }
}

/// Builder for [`MethodBody`] values.
pub struct MethodBuilder {
    body: MethodBody,
}

impl MethodBuilder {
    /// Starts a body in the linear (non-editable) form.
    pub fn new(registers_size: u32, params: impl IntoIterator<Item = Reg>) -> Self {
        Self {
            body: MethodBody::new(registers_size, params.into_iter().collect(), false),
        }
    }

    /// Selects the structured, editable form.
    #[must_use]
    pub fn editable(mut self, editable: bool) -> Self {
        self.body.cfg.set_editable(editable);
        self
    }

    /// Declares an exception type caught by this body.
    #[must_use]
    pub fn catch_type(mut self, ty: impl Into<String>) -> Self {
        self.body.catch_types.push(ty.into());
        self
    }

    /// Runs `f` to populate blocks and returns the finished body.
    pub fn build_with<F: FnOnce(&mut MethodScope<'_>)>(mut self, f: F) -> MethodBody {
        let mut scope = MethodScope {
            cfg: &mut self.body.cfg,
        };
        f(&mut scope);
        self.body
    }
}

/// Block-level access handed to [`MethodBuilder::build_with`].
pub struct MethodScope<'a> {
    cfg: &'a mut ControlFlowGraph,
}

impl MethodScope<'_> {
    /// Populates block `index`, creating it and any lower-numbered blocks on demand.
    pub fn block<F: FnOnce(&mut BlockBuilder<'_>)>(&mut self, index: usize, f: F) -> &mut Self {
        let id = ensure_block(self.cfg, index);
        let mut builder = BlockBuilder {
            cfg: &mut *self.cfg,
            id,
        };
        f(&mut builder);
        self
    }
}

fn ensure_block(cfg: &mut ControlFlowGraph, index: usize) -> BlockId {
    let id = BlockId(index);
    while cfg.block(id).is_none() {
        if cfg.add_block().0 >= index {
            break;
        }
    }
    id
}

/// Appends instructions and edges to one block.
pub struct BlockBuilder<'a> {
    cfg: &'a mut ControlFlowGraph,
    id: BlockId,
}

impl BlockBuilder<'_> {
    /// Returns the id of the block being built.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Appends an arbitrary instruction.
    pub fn insn(&mut self, mut insn: Instruction) -> InsnId {
        let id = self.cfg.fresh_instruction_id();
        insn.id = id;
        if let Some(block) = self.cfg.block_mut(self.id) {
            block.instructions_mut().push(insn);
        }
        id
    }

    fn edge(&mut self, target: usize, kind: EdgeKind) {
        let target = ensure_block(self.cfg, target);
        let src = self.id;
        if let Some(block) = self.cfg.block_mut(src) {
            block
                .successors_mut()
                .push(crate::ir::Edge { src, target, kind });
        }
    }

    /// `const dest, value`
    pub fn const_(&mut self, dest: Reg, value: i64) -> InsnId {
        self.insn(Instruction::constant(dest, value, false))
    }

    /// `const-wide dest, value`
    pub fn const_wide(&mut self, dest: Reg, value: i64) -> InsnId {
        self.insn(Instruction::constant(dest, value, true))
    }

    /// `move dest, src`
    pub fn mov(&mut self, dest: Reg, src: Reg) -> InsnId {
        self.insn(Instruction::mov(Opcode::Move, dest, src))
    }

    /// `move-object dest, src`
    pub fn mov_object(&mut self, dest: Reg, src: Reg) -> InsnId {
        self.insn(Instruction::mov(Opcode::MoveObject, dest, src))
    }

    /// A load-like operation followed by its `move-result-pseudo` into `dest`.
    fn with_pseudo(&mut self, insn: Instruction, dest: Reg) -> InsnId {
        let pseudo = insn.opcode.move_result_pseudo_for();
        let id = self.insn(insn);
        self.insn(Instruction::new(pseudo).with_dest(dest));
        id
    }

    /// `sget` of a 32-bit field into `dest`.
    pub fn sget(&mut self, field: MemberRef, dest: Reg) -> InsnId {
        self.with_pseudo(Instruction::new(Opcode::Sget).with_field(field), dest)
    }

    /// `sget-object` of a field into `dest`.
    pub fn sget_object(&mut self, field: MemberRef, dest: Reg) -> InsnId {
        self.with_pseudo(Instruction::new(Opcode::SgetObject).with_field(field), dest)
    }

    /// `sput src, field`
    pub fn sput(&mut self, src: Reg, field: MemberRef) -> InsnId {
        self.insn(Instruction::new(Opcode::Sput).with_src(src).with_field(field))
    }

    /// `iget` of `obj.field` into `dest`.
    pub fn iget(&mut self, obj: Reg, field: MemberRef, dest: Reg) -> InsnId {
        self.with_pseudo(
            Instruction::new(Opcode::Iget).with_src(obj).with_field(field),
            dest,
        )
    }

    /// `iput src, obj, field`
    pub fn iput(&mut self, src: Reg, obj: Reg, field: MemberRef) -> InsnId {
        self.insn(
            Instruction::new(Opcode::Iput)
                .with_srcs([src, obj])
                .with_field(field),
        )
    }

    /// `aget` of `array[index]` into `dest`.
    pub fn aget(&mut self, array: Reg, index: Reg, dest: Reg) -> InsnId {
        self.with_pseudo(Instruction::new(Opcode::Aget).with_srcs([array, index]), dest)
    }

    /// Three-register arithmetic `dest = a op b`.
    pub fn binop(&mut self, op: Opcode, dest: Reg, a: Reg, b: Reg) -> InsnId {
        self.insn(Instruction::new(op).with_dest(dest).with_srcs([a, b]))
    }

    /// Literal arithmetic `dest = src op lit`; division and remainder go through a
    /// `move-result-pseudo`.
    pub fn binop_lit(&mut self, op: Opcode, dest: Reg, src: Reg, lit: i64) -> InsnId {
        let insn = Instruction::new(op).with_src(src).with_literal(lit);
        if op.has_move_result_pseudo() {
            self.with_pseudo(insn, dest)
        } else {
            self.insn(insn.with_dest(dest))
        }
    }

    /// `new-instance` of `ty` into `dest`.
    pub fn new_instance(&mut self, ty: impl Into<String>, dest: Reg) -> InsnId {
        self.with_pseudo(Instruction::new(Opcode::NewInstance).with_type(ty), dest)
    }

    /// An invoke of `method` with `args`.
    pub fn invoke(
        &mut self,
        op: Opcode,
        method: MemberRef,
        args: impl IntoIterator<Item = Reg>,
    ) -> InsnId {
        self.insn(Instruction::new(op).with_method(method).with_srcs(args))
    }

    /// `move-result dest`
    pub fn move_result(&mut self, dest: Reg) -> InsnId {
        self.insn(Instruction::new(Opcode::MoveResult).with_dest(dest))
    }

    /// `return src`
    pub fn ret(&mut self, src: Reg) -> InsnId {
        self.insn(Instruction::new(Opcode::Return).with_src(src))
    }

    /// `return-void`
    pub fn return_void(&mut self) -> InsnId {
        self.insn(Instruction::new(Opcode::ReturnVoid))
    }

    /// `throw src`
    pub fn throw(&mut self, src: Reg) -> InsnId {
        self.insn(Instruction::new(Opcode::Throw).with_src(src))
    }

    /// Falls through to block `target` without a jump instruction.
    pub fn fallthrough(&mut self, target: usize) {
        self.edge(target, EdgeKind::Goto);
    }

    /// `goto target`
    pub fn goto(&mut self, target: usize) -> InsnId {
        let id = self.insn(Instruction::new(Opcode::Goto));
        self.edge(target, EdgeKind::Goto);
        id
    }

    /// A structural edge to `target`.
    pub fn ghost(&mut self, target: usize) {
        self.edge(target, EdgeKind::Ghost);
    }

    /// Zero-compare branch: jumps to `taken` when the test holds, else falls to `fall`.
    pub fn if_zero(&mut self, op: Opcode, src: Reg, taken: usize, fall: usize) -> InsnId {
        let id = self.insn(Instruction::new(op).with_src(src));
        self.edge(fall, EdgeKind::Goto);
        self.edge(taken, EdgeKind::Branch(None));
        id
    }

    /// Two-register branch: jumps to `taken` when `a op b` holds, else falls to `fall`.
    pub fn if_cmp(&mut self, op: Opcode, a: Reg, b: Reg, taken: usize, fall: usize) -> InsnId {
        let id = self.insn(Instruction::new(op).with_srcs([a, b]));
        self.edge(fall, EdgeKind::Goto);
        self.edge(taken, EdgeKind::Branch(None));
        id
    }

    /// `switch src` with `(key, target)` cases and a default target.
    pub fn switch(&mut self, src: Reg, cases: &[(i32, usize)], default: usize) -> InsnId {
        let id = self.insn(Instruction::new(Opcode::Switch).with_src(src));
        self.edge(default, EdgeKind::Goto);
        for &(key, target) in cases {
            self.edge(target, EdgeKind::Branch(Some(key)));
        }
        id
    }
}
