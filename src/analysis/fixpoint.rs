//! Forward constant-propagation fixpoint over a method's control flow graph.
//!
//! This module provides the [`FixpointIterator`] contract consumed by the constant
//! propagation transform, and [`IntraproceduralFixpoint`], a worklist implementation of it.
//!
//! # Algorithm
//!
//! 1. Every block starts at bottom (unreachable); the entry block starts at the initial
//!    environment (top, or seeded with call-site constant arguments)
//! 2. Blocks are visited from a worklist ordered by reverse postorder
//! 3. A block's exit state is its entry state advanced by [`ConstantTransfer`]
//! 4. Each non-ghost out edge refines the exit state (branch conditions, switch keys) and
//!    joins the result into the target's entry state
//! 5. A target whose entry state grew is queued again
//!
//! # Complexity
//!
//! The constant domain has height 3, so each register can change at most twice per block;
//! the solver terminates after O(blocks × registers) block visits.

use std::collections::{BTreeMap, VecDeque};

use crate::{
    analysis::{
        AbstractValue, ConstantEnvironment, JoinSemiLattice, MeetSemiLattice, WholeProgramState,
        RESULT_REGISTER,
    },
    ir::{
        BlockId, Edge, EdgeKind, FieldId, FieldSearch, Instruction, MethodBody, Opcode, Reg,
        Resolver,
    },
};

/// A converged fixpoint that can be replayed instruction by instruction.
pub trait FixpointIterator<V: AbstractValue> {
    /// Returns the converged entry state of `block`; bottom for unreachable blocks.
    fn entry_state(&self, block: BlockId) -> ConstantEnvironment<V>;

    /// Advances `env` over one instruction.
    fn analyze_instruction(&self, insn: &Instruction, env: &mut ConstantEnvironment<V>);

    /// Projects the exit state `env` of `edge.src` along `edge`.
    ///
    /// Returns bottom if the edge cannot be taken from `env`.
    fn analyze_edge(&self, edge: &Edge, env: &ConstantEnvironment<V>) -> ConstantEnvironment<V>;
}

/// Transfer function of the constant analysis.
///
/// Field loads deliver their value through [`RESULT_REGISTER`]. Fields owned by the class
/// under initialization are tracked flow-sensitively in the environment; all other fields
/// are read from the [`WholeProgramState`]. Invokes clobber the result register and every
/// tracked field.
pub struct ConstantTransfer<'a, V: AbstractValue> {
    resolver: &'a dyn Resolver,
    wps: &'a dyn WholeProgramState<V>,
    class_under_init: Option<&'a str>,
    receiver: Option<Reg>,
}

impl<'a, V: AbstractValue> ConstantTransfer<'a, V> {
    /// Creates a transfer function without a class under initialization.
    ///
    /// # Arguments
    ///
    /// * `resolver` - Symbol resolution for field references.
    /// * `wps` - Whole-program field values.
    pub fn new(resolver: &'a dyn Resolver, wps: &'a dyn WholeProgramState<V>) -> Self {
        Self {
            resolver,
            wps,
            class_under_init: None,
            receiver: None,
        }
    }

    /// Tracks the fields of `class` flow-sensitively.
    ///
    /// Instance fields are only tracked when accessed through the `receiver` register, see
    /// [`ConstantTransfer::with_receiver`].
    #[must_use]
    pub fn with_class_under_init(mut self, class: Option<&'a str>) -> Self {
        self.class_under_init = class;
        self
    }

    /// Sets the register holding the object under initialization.
    #[must_use]
    pub fn with_receiver(mut self, receiver: Option<Reg>) -> Self {
        self.receiver = receiver;
        self
    }

    /// Returns the symbol resolver.
    #[must_use]
    pub fn resolver(&self) -> &'a dyn Resolver {
        self.resolver
    }

    /// Returns the class whose fields are tracked flow-sensitively.
    #[must_use]
    pub fn class_under_init(&self) -> Option<&'a str> {
        self.class_under_init
    }

    /// Resolves the field accessed by `insn` and reports whether it is tracked in the
    /// environment at this access.
    fn tracked_field(&self, insn: &Instruction) -> (Option<FieldId>, bool) {
        let Some(def) = insn
            .field()
            .and_then(|f| self.resolver.resolve_field(f, FieldSearch::for_opcode(insn.opcode)))
        else {
            return (None, false);
        };
        let owned = self.class_under_init == Some(def.class.as_str());
        let through_receiver = if insn.opcode.is_static_field_op() {
            true
        } else {
            // iget obj / iput value, obj
            let obj = if insn.opcode.is_iget() { insn.src(0) } else { insn.src(1) };
            obj.is_some() && obj == self.receiver
        };
        (Some(def.id), owned && through_receiver)
    }

    fn owned_by_class_under_init(&self, insn: &Instruction) -> bool {
        insn.field().is_some_and(|f| {
            self.resolver
                .resolve_field(f, FieldSearch::for_opcode(insn.opcode))
                .is_some_and(|def| self.class_under_init == Some(def.class.as_str()))
        })
    }

    fn load(&self, insn: &Instruction, env: &ConstantEnvironment<V>) -> V {
        match self.tracked_field(insn) {
            (Some(id), true) => env.get_field(id),
            (Some(_), false) if self.owned_by_class_under_init(insn) => V::top(),
            (Some(id), false) => self.wps.field_value(id),
            (None, _) => V::top(),
        }
    }

    fn store(&self, insn: &Instruction, env: &mut ConstantEnvironment<V>) {
        match self.tracked_field(insn) {
            (Some(id), true) => {
                let value = insn.src(0).map_or_else(V::top, |r| env.get(r));
                env.set_field(id, value);
            }
            // a store through another reference may alias the receiver
            (Some(id), false) if self.owned_by_class_under_init(insn) => {
                env.set_field(id, V::top());
            }
            _ => {}
        }
    }

    /// Advances `env` over one instruction.
    pub fn apply(&self, insn: &Instruction, env: &mut ConstantEnvironment<V>) {
        if env.is_bottom() {
            return;
        }
        let op = insn.opcode;
        match op {
            _ if op.is_const() => {
                if let (Some(dest), Some(value)) = (insn.dest, insn.literal()) {
                    env.set(dest, V::from_constant(value));
                }
            }
            _ if op.is_move() => {
                if let (Some(dest), Some(src)) = (insn.dest, insn.src(0)) {
                    let value = env.get(src);
                    env.set(dest, value);
                }
            }
            _ if op.is_move_result() || op.is_move_result_pseudo() => {
                let value = env.get(RESULT_REGISTER);
                env.set(RESULT_REGISTER, V::top());
                if let Some(dest) = insn.dest {
                    env.set(dest, value);
                }
            }
            _ if op.is_sget() || op.is_iget() => {
                let value = self.load(insn, env);
                env.set(RESULT_REGISTER, value);
            }
            _ if op.is_div_rem_lit() => {
                let value = eval_literal(op, insn, env);
                env.set(RESULT_REGISTER, value);
            }
            _ if op.is_arith_lit() || op.is_binop() => {
                let value = if op.is_binop() {
                    eval_binop(op, insn, env)
                } else {
                    eval_literal(op, insn, env)
                };
                if let Some(dest) = insn.dest {
                    env.set(dest, value);
                }
            }
            _ if op.is_sput() || op.is_iput() => self.store(insn, env),
            _ if op.is_invoke() => {
                env.set(RESULT_REGISTER, V::top());
                env.clear_fields();
            }
            Opcode::Aget | Opcode::NewInstance => env.set(RESULT_REGISTER, V::top()),
            _ => {
                if let Some(dest) = insn.dest {
                    env.set(dest, V::top());
                }
            }
        }
    }
}

fn as_i32(value: i64) -> i32 {
    value as i32
}

fn eval_literal<V: AbstractValue>(
    op: Opcode,
    insn: &Instruction,
    env: &ConstantEnvironment<V>,
) -> V {
    let (Some(src), Some(lit)) = (insn.src(0), insn.literal()) else {
        return V::top();
    };
    let Some(a) = env.get(src).constant_value().map(as_i32) else {
        return V::top();
    };
    let lit = as_i32(lit);
    let shift = (lit & 0x1f) as u32;
    let result = match op {
        Opcode::AddIntLit => a.wrapping_add(lit),
        Opcode::RsubIntLit => lit.wrapping_sub(a),
        Opcode::MulIntLit => a.wrapping_mul(lit),
        Opcode::AndIntLit => a & lit,
        Opcode::OrIntLit => a | lit,
        Opcode::XorIntLit => a ^ lit,
        Opcode::ShlIntLit => a.wrapping_shl(shift),
        Opcode::ShrIntLit => a.wrapping_shr(shift),
        Opcode::UshrIntLit => ((a as u32) >> shift) as i32,
        Opcode::DivIntLit if lit != 0 => a.wrapping_div(lit),
        Opcode::RemIntLit if lit != 0 => a.wrapping_rem(lit),
        _ => return V::top(),
    };
    V::from_constant(i64::from(result))
}

fn eval_binop<V: AbstractValue>(op: Opcode, insn: &Instruction, env: &ConstantEnvironment<V>) -> V {
    let (Some(a), Some(b)) = (insn.src(0), insn.src(1)) else {
        return V::top();
    };
    let (Some(a), Some(b)) = (env.get(a).constant_value(), env.get(b).constant_value()) else {
        return V::top();
    };
    let (a, b) = (as_i32(a), as_i32(b));
    let result = match op {
        Opcode::AddInt => a.wrapping_add(b),
        Opcode::SubInt => a.wrapping_sub(b),
        Opcode::MulInt => a.wrapping_mul(b),
        _ => return V::top(),
    };
    V::from_constant(i64::from(result))
}

/// Evaluates the comparison of a conditional branch on two known operands.
fn branch_taken(op: Opcode, a: i64, b: i64) -> bool {
    match op {
        Opcode::IfEq | Opcode::IfEqz => a == b,
        Opcode::IfNe | Opcode::IfNez => a != b,
        Opcode::IfLt | Opcode::IfLtz => a < b,
        Opcode::IfGe | Opcode::IfGez => a >= b,
        Opcode::IfGt | Opcode::IfGtz => a > b,
        Opcode::IfLe | Opcode::IfLez => a <= b,
        _ => true,
    }
}

#[derive(Debug, Clone)]
struct Terminator {
    insn: Instruction,
    case_keys: Vec<i32>,
}

/// Worklist fixpoint of [`ConstantTransfer`] over one method body.
///
/// The result does not borrow the body, so the body can be rewritten while the fixpoint is
/// replayed by a transform.
pub struct IntraproceduralFixpoint<'a, V: AbstractValue> {
    transfer: ConstantTransfer<'a, V>,
    entry_states: BTreeMap<BlockId, ConstantEnvironment<V>>,
    terminators: BTreeMap<BlockId, Terminator>,
    iterations: usize,
}

impl<'a, V: AbstractValue> IntraproceduralFixpoint<'a, V> {
    /// Runs the analysis to a fixpoint.
    ///
    /// # Arguments
    ///
    /// * `body` - The method to analyze.
    /// * `transfer` - The transfer function.
    /// * `initial` - Entry state of the entry block, e.g. constant arguments bound to the
    ///   parameter registers.
    pub fn analyze(
        body: &MethodBody,
        transfer: ConstantTransfer<'a, V>,
        initial: ConstantEnvironment<V>,
    ) -> Self {
        let cfg = &body.cfg;
        let terminators = cfg
            .blocks()
            .filter_map(|block| {
                let insn = block.branch()?.clone();
                let case_keys = block
                    .successors()
                    .iter()
                    .filter_map(|e| e.kind.case_key())
                    .collect();
                Some((block.id(), Terminator { insn, case_keys }))
            })
            .collect();

        let mut fixpoint = Self {
            transfer,
            entry_states: BTreeMap::new(),
            terminators,
            iterations: 0,
        };

        let order = cfg.reverse_postorder();
        let position: BTreeMap<BlockId, usize> =
            order.iter().enumerate().map(|(i, b)| (*b, i)).collect();
        let mut worklist = VecDeque::new();
        let mut in_worklist = vec![false; order.len()];

        fixpoint.entry_states.insert(cfg.entry(), initial);
        worklist.push_back(0usize);
        if let Some(flag) = in_worklist.first_mut() {
            *flag = true;
        }

        while let Some(index) = worklist.pop_front() {
            in_worklist[index] = false;
            fixpoint.iterations += 1;
            let id = order[index];
            let Some(block) = cfg.block(id) else {
                continue;
            };
            let mut env = fixpoint.entry_state(id);
            if env.is_bottom() {
                continue;
            }
            for insn in block.instructions() {
                fixpoint.transfer.apply(insn, &mut env);
            }
            for edge in block.non_ghost_successors() {
                let out = fixpoint.analyze_edge(edge, &env);
                let current = fixpoint.entry_state(edge.target);
                let joined = current.join(&out);
                if joined != current {
                    fixpoint.entry_states.insert(edge.target, joined);
                    if let Some(&target) = position.get(&edge.target) {
                        if !in_worklist[target] {
                            in_worklist[target] = true;
                            worklist.push_back(target);
                        }
                    }
                }
            }
        }

        fixpoint
    }

    /// Returns the transfer function the fixpoint was computed with.
    #[must_use]
    pub fn transfer(&self) -> &ConstantTransfer<'a, V> {
        &self.transfer
    }

    /// Number of block visits until convergence.
    #[must_use]
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Returns `true` if the block's entry state is not bottom.
    #[must_use]
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.entry_states
            .get(&block)
            .is_some_and(|env| !env.is_bottom())
    }

    /// Number of blocks of `body` proven unreachable.
    #[must_use]
    pub fn unreachable_block_count(&self, body: &MethodBody) -> usize {
        body.cfg
            .block_ids()
            .into_iter()
            .filter(|b| !self.is_reachable(*b))
            .count()
    }

    fn refine_conditional(
        op: Opcode,
        insn: &Instruction,
        taken: bool,
        env: &mut ConstantEnvironment<V>,
    ) {
        if op.is_zero_test() {
            let Some(src) = insn.src(0) else { return };
            let value = env.get(src);
            match value.constant_value() {
                Some(a) if branch_taken(op, a, 0) != taken => env.set_to_bottom(),
                Some(_) => {}
                None => {
                    let is_zero = (op == Opcode::IfEqz && taken) || (op == Opcode::IfNez && !taken);
                    if is_zero {
                        env.set(src, value.meet(&V::from_constant(0)));
                    }
                }
            }
        } else {
            let (Some(ra), Some(rb)) = (insn.src(0), insn.src(1)) else {
                return;
            };
            let (va, vb) = (env.get(ra), env.get(rb));
            match (va.constant_value(), vb.constant_value()) {
                (Some(a), Some(b)) => {
                    if branch_taken(op, a, b) != taken {
                        env.set_to_bottom();
                    }
                }
                _ => {
                    let equal = (op == Opcode::IfEq && taken) || (op == Opcode::IfNe && !taken);
                    if equal {
                        let met = va.meet(&vb);
                        env.set(ra, met.clone());
                        env.set(rb, met);
                    }
                }
            }
        }
    }
}

impl<V: AbstractValue> FixpointIterator<V> for IntraproceduralFixpoint<'_, V> {
    fn entry_state(&self, block: BlockId) -> ConstantEnvironment<V> {
        self.entry_states
            .get(&block)
            .cloned()
            .unwrap_or_else(ConstantEnvironment::bottom)
    }

    fn analyze_instruction(&self, insn: &Instruction, env: &mut ConstantEnvironment<V>) {
        self.transfer.apply(insn, env);
    }

    fn analyze_edge(&self, edge: &Edge, env: &ConstantEnvironment<V>) -> ConstantEnvironment<V> {
        let mut out = env.clone();
        if out.is_bottom() || edge.kind == EdgeKind::Ghost {
            return out;
        }
        let Some(term) = self.terminators.get(&edge.src) else {
            return out;
        };
        let op = term.insn.opcode;
        if op.is_conditional_branch() {
            let taken = matches!(edge.kind, EdgeKind::Branch(_));
            Self::refine_conditional(op, &term.insn, taken, &mut out);
        } else if op.is_switch() {
            let Some(src) = term.insn.src(0) else {
                return out;
            };
            let scrutinee = env.get(src);
            match edge.kind {
                EdgeKind::Branch(Some(key)) => {
                    out.set(src, scrutinee.meet(&V::from_constant(i64::from(key))));
                }
                EdgeKind::Goto => {
                    if let Some(value) = scrutinee.constant_value() {
                        if term.case_keys.iter().any(|k| i64::from(*k) == value) {
                            out.set_to_bottom();
                        }
                    }
                }
                _ => {}
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{ConstantDomain, FieldSummary},
        ir::{MemberRef, MethodBuilder, Program},
        test::factories::static_field_program,
    };

    fn run<'a>(
        body: &MethodBody,
        program: &'a Program,
        wps: &'a FieldSummary<ConstantDomain>,
    ) -> IntraproceduralFixpoint<'a, ConstantDomain> {
        IntraproceduralFixpoint::analyze(
            body,
            ConstantTransfer::new(program, wps),
            ConstantEnvironment::top(),
        )
    }

    #[test]
    fn test_constant_branch_prunes_taken_side() {
        let program = Program::new();
        let wps = FieldSummary::new();
        let body = MethodBuilder::new(2, []).build_with(|m| {
            m.block(0, |b| {
                b.const_(Reg(0), 0);
                b.if_zero(Opcode::IfNez, Reg(0), 2, 1);
            });
            m.block(1, |b| {
                b.return_void();
            });
            m.block(2, |b| {
                b.return_void();
            });
        });
        let fixpoint = run(&body, &program, &wps);
        assert!(fixpoint.is_reachable(BlockId(1)));
        assert!(!fixpoint.is_reachable(BlockId(2)));
        assert_eq!(fixpoint.unreachable_block_count(&body), 1);
    }

    #[test]
    fn test_join_at_merge() {
        let program = Program::new();
        let wps = FieldSummary::new();
        let body = MethodBuilder::new(3, [Reg(2)]).build_with(|m| {
            m.block(0, |b| {
                b.if_zero(Opcode::IfEqz, Reg(2), 2, 1);
            });
            m.block(1, |b| {
                b.const_(Reg(0), 5);
                b.const_(Reg(1), 1);
                b.goto(3);
            });
            m.block(2, |b| {
                b.const_(Reg(0), 5);
                b.const_(Reg(1), 2);
                b.goto(3);
            });
            m.block(3, |b| {
                b.return_void();
            });
        });
        let fixpoint = run(&body, &program, &wps);
        let merged = fixpoint.entry_state(BlockId(3));
        assert_eq!(merged.get(Reg(0)), ConstantDomain::Constant(5));
        assert!(merged.get(Reg(1)).is_top());
        // the taken edge of if-eqz refines the parameter
        assert_eq!(
            fixpoint.entry_state(BlockId(2)).get(Reg(2)),
            ConstantDomain::Constant(0)
        );
    }

    #[test]
    fn test_loop_converges() {
        let program = Program::new();
        let wps = FieldSummary::new();
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
        let fixpoint = run(&body, &program, &wps);
        assert!(fixpoint.entry_state(BlockId(1)).get(Reg(0)).is_top());
        assert!(fixpoint.is_reachable(BlockId(2)));
    }

    #[test]
    fn test_switch_edges() {
        let program = Program::new();
        let wps = FieldSummary::new();
        let body = MethodBuilder::new(1, []).build_with(|m| {
            m.block(0, |b| {
                b.const_(Reg(0), 2);
                b.switch(Reg(0), &[(1, 1), (2, 2)], 3);
            });
            for i in 1..=3 {
                m.block(i, |b| {
                    b.return_void();
                });
            }
        });
        let fixpoint = run(&body, &program, &wps);
        assert!(!fixpoint.is_reachable(BlockId(1)));
        assert!(fixpoint.is_reachable(BlockId(2)));
        assert!(!fixpoint.is_reachable(BlockId(3)));
    }

    #[test]
    fn test_field_loads_use_whole_program_state() {
        let (program, field) = static_field_program();
        let wps = FieldSummary::new().with_field(field, ConstantDomain::Constant(7));
        let body = MethodBuilder::new(1, []).build_with(|m| {
            m.block(0, |b| {
                b.sget(MemberRef::new("LFoo;", "x"), Reg(0));
                b.return_void();
            });
        });
        let fixpoint = run(&body, &program, &wps);
        let mut env = fixpoint.entry_state(BlockId(0));
        for insn in body.cfg.block(BlockId(0)).unwrap().instructions() {
            fixpoint.analyze_instruction(insn, &mut env);
        }
        assert_eq!(env.get(Reg(0)), ConstantDomain::Constant(7));
    }

    #[test]
    fn test_class_under_init_tracks_stores() {
        let (program, field) = static_field_program();
        let wps = FieldSummary::new().with_field(field, ConstantDomain::Constant(7));
        let body = MethodBuilder::new(2, []).build_with(|m| {
            m.block(0, |b| {
                b.const_(Reg(0), 3);
                b.sput(Reg(0), MemberRef::new("LFoo;", "x"));
                b.sget(MemberRef::new("LFoo;", "x"), Reg(1));
                b.return_void();
            });
        });
        let transfer = ConstantTransfer::new(&program, &wps).with_class_under_init(Some("LFoo;"));
        let fixpoint =
            IntraproceduralFixpoint::analyze(&body, transfer, ConstantEnvironment::top());
        let mut env = fixpoint.entry_state(BlockId(0));
        for insn in body.cfg.block(BlockId(0)).unwrap().instructions() {
            fixpoint.analyze_instruction(insn, &mut env);
        }
        assert_eq!(env.get(Reg(1)), ConstantDomain::Constant(3));
        assert_eq!(env.get_field(field), ConstantDomain::Constant(3));
    }

    #[test]
    fn test_literal_arithmetic_wraps_and_guards_division() {
        let program = Program::new();
        let wps = FieldSummary::new();
        let body = MethodBuilder::new(4, []).build_with(|m| {
            m.block(0, |b| {
                b.const_(Reg(0), i64::from(i32::MAX));
                b.binop_lit(Opcode::AddIntLit, Reg(1), Reg(0), 1);
                b.binop_lit(Opcode::DivIntLit, Reg(2), Reg(0), 0);
                b.binop_lit(Opcode::RemIntLit, Reg(3), Reg(0), 10);
                b.return_void();
            });
        });
        let fixpoint = run(&body, &program, &wps);
        let mut env = fixpoint.entry_state(BlockId(0));
        for insn in body.cfg.block(BlockId(0)).unwrap().instructions() {
            fixpoint.analyze_instruction(insn, &mut env);
        }
        assert_eq!(env.get(Reg(1)), ConstantDomain::Constant(i64::from(i32::MIN)));
        assert!(env.get(Reg(2)).is_top());
        assert_eq!(env.get(Reg(3)), ConstantDomain::Constant(7));
    }
}
