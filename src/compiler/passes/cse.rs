//! Common subexpression elimination.
//!
//! Block-local value numbering of side-effect-free expressions. A recomputation of an
//! expression whose operands still carry the same value numbers is replaced by a `move`
//! from the register that already holds the result.
//!
//! # Example
//!
//! Before:
//! ```text
//! add-int v2, v0, v1
//! add-int v3, v1, v0
//! ```
//!
//! After:
//! ```text
//! add-int v2, v0, v1
//! move v3, v2
//! ```
//!
//! Constant loads are numbered but never replaced; a `const` is as cheap as a `move`.

use std::collections::HashMap;

use crate::{
    compiler::{pass::MethodPass, EventKind, EventLog},
    ir::{Instruction, MethodBody, MethodId, Opcode, Reg},
    Result,
};

/// Counts of rewrites performed by [`CommonSubexpressionPass`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CseStats {
    /// Recomputations replaced by moves
    pub instructions_eliminated: usize,
}

impl std::ops::AddAssign for CseStats {
    fn add_assign(&mut self, other: Self) {
        self.instructions_eliminated += other.instructions_eliminated;
    }
}

type ValueNumber = u32;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Expr {
    Literal(i64),
    Unary(Opcode, ValueNumber, i64),
    Binary(Opcode, ValueNumber, ValueNumber),
}

#[derive(Default)]
struct ValueTable {
    registers: HashMap<Reg, ValueNumber>,
    expressions: HashMap<Expr, (ValueNumber, Reg)>,
    next: ValueNumber,
}

impl ValueTable {
    fn fresh(&mut self) -> ValueNumber {
        let vn = self.next;
        self.next += 1;
        vn
    }

    fn number_of(&mut self, reg: Reg) -> ValueNumber {
        if let Some(&vn) = self.registers.get(&reg) {
            return vn;
        }
        let vn = self.fresh();
        self.registers.insert(reg, vn);
        vn
    }

    fn expression(&mut self, insn: &Instruction) -> Option<Expr> {
        let op = insn.opcode;
        if op.is_const() {
            return insn.literal().map(Expr::Literal);
        }
        if op.is_arith_lit() && !op.is_div_rem_lit() {
            let src = self.number_of(insn.src(0)?);
            return Some(Expr::Unary(op, src, insn.literal()?));
        }
        if op.is_binop() {
            let mut a = self.number_of(insn.src(0)?);
            let mut b = self.number_of(insn.src(1)?);
            if op != Opcode::SubInt && a > b {
                std::mem::swap(&mut a, &mut b);
            }
            return Some(Expr::Binary(op, a, b));
        }
        None
    }
}

/// Common subexpression elimination pass.
pub struct CommonSubexpressionPass;

impl Default for CommonSubexpressionPass {
    fn default() -> Self {
        Self::new()
    }
}

impl CommonSubexpressionPass {
    /// Creates a new common subexpression elimination pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Runs the pass and reports what it did.
    pub fn run(
        &self,
        body: &mut MethodBody,
        method: Option<MethodId>,
        events: &EventLog,
    ) -> CseStats {
        let mut stats = CseStats::default();

        for id in body.cfg.block_ids() {
            let Some(block) = body.cfg.block_mut(id) else {
                continue;
            };
            let mut table = ValueTable::default();

            for insn in block.instructions_mut().iter_mut() {
                let Some(dest) = insn.dest else {
                    continue;
                };
                if insn.opcode.is_move() {
                    let vn = match insn.src(0) {
                        Some(src) => table.number_of(src),
                        None => table.fresh(),
                    };
                    table.registers.insert(dest, vn);
                    continue;
                }
                let Some(expr) = table.expression(insn) else {
                    let vn = table.fresh();
                    table.registers.insert(dest, vn);
                    continue;
                };

                match table.expressions.get(&expr).copied() {
                    Some((vn, holder))
                        if holder != dest
                            && table.registers.get(&holder) == Some(&vn)
                            && !insn.opcode.is_const() =>
                    {
                        stats.instructions_eliminated += 1;
                        events
                            .record(EventKind::ExpressionEliminated)
                            .maybe_method(method)
                            .location(insn.id)
                            .message(format!("{insn} reuses {holder}"));
                        let id = insn.id;
                        *insn = Instruction::mov(Opcode::Move, dest, holder);
                        insn.id = id;
                        table.registers.insert(dest, vn);
                    }
                    Some((vn, holder)) if table.registers.get(&holder) == Some(&vn) => {
                        table.registers.insert(dest, vn);
                    }
                    _ => {
                        let vn = table.fresh();
                        table.registers.insert(dest, vn);
                        table.expressions.insert(expr, (vn, dest));
                    }
                }
            }
        }

        if stats.instructions_eliminated > 0 {
            log::trace!("cse: {} expressions eliminated", stats.instructions_eliminated);
        }
        stats
    }
}

impl MethodPass for CommonSubexpressionPass {
    fn name(&self) -> &'static str {
        "cse"
    }

    fn description(&self) -> &'static str {
        "Replaces recomputed pure expressions with moves from earlier results"
    }

    fn run_on_method(
        &self,
        body: &mut MethodBody,
        method: Option<MethodId>,
        events: &EventLog,
    ) -> Result<bool> {
        Ok(self.run(body, method, events).instructions_eliminated > 0)
    }
}
