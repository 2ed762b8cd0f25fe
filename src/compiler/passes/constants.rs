//! Constant propagation transform.
//!
//! This transform rewrites one method body using a converged constant-propagation fixpoint:
//!
//! - **Redundant store elimination**: a field store writing the value the field provably
//!   already holds is deleted
//! - **Constant materialization**: a move, a load result or a literal arithmetic result
//!   whose value is an exact constant is replaced by a `const` load
//! - **Dead switch elimination**: case labels that cannot match are dropped and a switch
//!   with a single reachable case becomes a `goto` (linear graphs only)
//! - **Dead branch elimination**: a conditional branch with one infeasible side becomes a
//!   `goto` or is deleted
//!
//! # Example
//!
//! Before (the whole-program value of `Foo.x` is 7):
//! ```text
//! const v0, 7
//! sput v0, LFoo;.x
//! sget LFoo;.x
//! move-result-pseudo v1
//! add-int-lit v2, v1, 1
//! ```
//!
//! After:
//! ```text
//! const v0, 7
//! const v1, 7
//! const v2, 8
//! ```
//!
//! # Algorithm
//!
//! 1. For every block whose fixpoint entry state is not bottom, replay the fixpoint over the
//!    block, collecting replacements, deletions and switch label edits into a change set.
//!    The graph is not touched during this walk.
//! 2. Apply the change set in one batch: label edits first, then instruction changes in
//!    descending position order per block, so earlier positions stay valid.
//!
//! Blocks with a bottom entry state are unreachable and left for dead code elimination.

use std::{collections::BTreeMap, ops::AddAssign};

use crate::{
    analysis::{
        AbstractValue, ConstantEnvironment, FixpointIterator, JoinSemiLattice, MeetSemiLattice,
        WholeProgramState,
    },
    compiler::{EventKind, EventLog},
    ir::{
        Block, BlockId, ControlFlowGraph, EdgeKind, FieldSearch, InsnLocation, Instruction,
        MethodBody, MethodId, Opcode, Reg, Resolver,
    },
    Result,
};

/// Options of the constant propagation transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformConfig {
    /// Replace register-to-register moves of known constants
    pub replace_moves_with_consts: bool,
    /// Simplify switches on linear graphs
    pub remove_dead_switch: bool,
    /// Class whose initializer is being transformed; its fields are read from the
    /// flow-sensitive environment instead of the whole-program state
    pub class_under_init: Option<String>,
    /// Register holding the object under construction. Instance stores of the class under
    /// initialization are only compared against the flow-sensitive value through it
    pub receiver: Option<Reg>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            replace_moves_with_consts: true,
            remove_dead_switch: true,
            class_under_init: None,
            receiver: None,
        }
    }
}

impl TransformConfig {
    /// Enables or disables move-to-const rewriting.
    #[must_use]
    pub fn with_replace_moves_with_consts(mut self, enabled: bool) -> Self {
        self.replace_moves_with_consts = enabled;
        self
    }

    /// Enables or disables switch simplification.
    #[must_use]
    pub fn with_remove_dead_switch(mut self, enabled: bool) -> Self {
        self.remove_dead_switch = enabled;
        self
    }

    /// Sets the class under initialization.
    #[must_use]
    pub fn with_class_under_init(mut self, class: Option<String>) -> Self {
        self.class_under_init = class;
        self
    }

    /// Sets the receiver register of a constructor.
    #[must_use]
    pub fn with_receiver(mut self, receiver: Option<Reg>) -> Self {
        self.receiver = receiver;
        self
    }
}

/// Counts of rewrites performed by [`Transform::apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformStats {
    /// Instructions replaced by constant loads
    pub materialized_consts: usize,
    /// Conditional branches and switches removed or turned into jumps
    pub branches_removed: usize,
    /// Field stores deleted because the field already held the value
    pub redundant_puts_removed: usize,
}

impl AddAssign for TransformStats {
    fn add_assign(&mut self, other: Self) {
        self.materialized_consts += other.materialized_consts;
        self.branches_removed += other.branches_removed;
        self.redundant_puts_removed += other.redundant_puts_removed;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeEdit {
    /// Drop a switch label
    Neutralize,
    /// Turn a switch label into the plain branch target of a `goto`
    MakeSimple,
}

#[derive(Debug)]
enum Change {
    /// Replace `count` instructions starting at the keyed position
    Replace { count: usize, insns: Vec<Instruction> },
    Delete,
}

impl Change {
    fn len(&self) -> usize {
        match self {
            Self::Replace { count, .. } => *count,
            Self::Delete => 1,
        }
    }
}

/// Changes collected during the read-only walk, keyed by stable arena positions.
#[derive(Debug, Default)]
struct ChangeSet {
    insns: BTreeMap<BlockId, BTreeMap<usize, Change>>,
    edges: BTreeMap<BlockId, BTreeMap<usize, EdgeEdit>>,
}

impl ChangeSet {
    fn add(&mut self, loc: InsnLocation, change: Change) -> Result<()> {
        let block = self.insns.entry(loc.block).or_default();
        let end = loc.index + change.len();
        let overlaps = block
            .iter()
            .any(|(&start, other)| start < end && loc.index < start + other.len());
        if overlaps {
            return Err(malformed_error!(
                "Overlapping changes at {}:{}",
                loc.block,
                loc.index
            ));
        }
        block.insert(loc.index, change);
        Ok(())
    }

    fn edit_edge(&mut self, block: BlockId, index: usize, edit: EdgeEdit) {
        self.edges.entry(block).or_default().insert(index, edit);
    }

    fn apply(self, cfg: &mut ControlFlowGraph) -> Result<()> {
        for (block, edits) in self.edges {
            for (index, edit) in edits.into_iter().rev() {
                match edit {
                    EdgeEdit::Neutralize => {
                        cfg.remove_edge(block, index)?;
                    }
                    EdgeEdit::MakeSimple => {
                        cfg.set_edge_kind(block, index, EdgeKind::Branch(None))?;
                    }
                }
            }
        }

        for (block, changes) in self.insns {
            for (index, change) in changes.into_iter().rev() {
                let loc = InsnLocation::new(block, index);
                let is_branch = cfg
                    .instruction(loc)
                    .is_some_and(|insn| insn.opcode.is_branch());
                match change {
                    Change::Replace { insns, .. } if is_branch => {
                        let [goto] = <[Instruction; 1]>::try_from(insns).map_err(|insns| {
                            malformed_error!(
                                "Branch in {} replaced by {} instructions",
                                block,
                                insns.len()
                            )
                        })?;
                        cfg.replace_branch(block, goto)?;
                    }
                    Change::Replace { count, insns } => {
                        cfg.replace_instructions(loc, count, insns)?;
                    }
                    Change::Delete if is_branch => cfg.remove_branch(block)?,
                    Change::Delete => {
                        log::trace!("Removing instruction at {}:{}", block, index);
                        cfg.remove_instruction(loc)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// The constant propagation transform.
///
/// The transform is stateless between calls and can be shared across threads.
#[derive(Debug, Clone, Default)]
pub struct Transform {
    config: TransformConfig,
}

struct Walk<'a, V: AbstractValue> {
    config: &'a TransformConfig,
    wps: &'a dyn WholeProgramState<V>,
    resolver: &'a dyn Resolver,
    events: Option<&'a EventLog>,
    method: Option<MethodId>,
    changes: ChangeSet,
    stats: TransformStats,
}

impl Transform {
    /// Creates a transform with the given options.
    #[must_use]
    pub fn new(config: TransformConfig) -> Self {
        Self { config }
    }

    /// Returns the options of this transform.
    #[must_use]
    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    /// Rewrites `body` using a converged fixpoint.
    ///
    /// # Arguments
    ///
    /// * `fixpoint` - The converged analysis of `body`.
    /// * `wps` - Whole-program field values.
    /// * `resolver` - Symbol resolution for field stores.
    /// * `body` - The method to rewrite in place.
    ///
    /// # Returns
    ///
    /// The number of rewrites performed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if a conditional branch block does not have
    /// exactly two non-ghost successors, a switch has no default edge, a branch would be
    /// replaced by more than one instruction, or changes overlap.
    pub fn apply<V: AbstractValue>(
        &self,
        fixpoint: &impl FixpointIterator<V>,
        wps: &dyn WholeProgramState<V>,
        resolver: &dyn Resolver,
        body: &mut MethodBody,
    ) -> Result<TransformStats> {
        self.apply_recording(fixpoint, wps, resolver, body, None, None)
    }

    /// Like [`Transform::apply`], additionally recording every rewrite into `events`.
    ///
    /// # Errors
    ///
    /// See [`Transform::apply`].
    pub fn apply_recording<V: AbstractValue>(
        &self,
        fixpoint: &impl FixpointIterator<V>,
        wps: &dyn WholeProgramState<V>,
        resolver: &dyn Resolver,
        body: &mut MethodBody,
        events: Option<&EventLog>,
        method: Option<MethodId>,
    ) -> Result<TransformStats> {
        let mut walk = Walk {
            config: &self.config,
            wps,
            resolver,
            events,
            method,
            changes: ChangeSet::default(),
            stats: TransformStats::default(),
        };
        let editable = body.cfg.is_editable();
        for block in body.cfg.blocks() {
            let mut env = fixpoint.entry_state(block.id());
            // unreachable; left for dead code elimination
            if env.is_bottom() {
                continue;
            }
            for (index, insn) in block.instructions().iter().enumerate() {
                let loc = InsnLocation::new(block.id(), index);
                walk.eliminate_redundant_put(&env, insn, loc)?;
                fixpoint.analyze_instruction(insn, &mut env);
                walk.simplify_instruction(&env, block, insn, loc)?;
            }
            walk.eliminate_dead_branch(fixpoint, &env, block, editable)?;
        }
        let Walk { changes, stats, .. } = walk;
        changes.apply(&mut body.cfg)?;
        Ok(stats)
    }
}

impl<V: AbstractValue> Walk<'_, V> {
    fn record(&self, kind: EventKind, insn: &Instruction, message: String) {
        if let Some(events) = self.events {
            events
                .record(kind)
                .maybe_method(self.method)
                .location(insn.id)
                .message(message);
        }
    }

    fn eliminate_redundant_put(
        &mut self,
        env: &ConstantEnvironment<V>,
        insn: &Instruction,
        loc: InsnLocation,
    ) -> Result<()> {
        let op = insn.opcode;
        if !(op.is_sput() || op.is_iput()) {
            return Ok(());
        }
        let Some(field) = insn
            .field()
            .and_then(|f| self.resolver.resolve_field(f, FieldSearch::for_opcode(op)))
        else {
            return Ok(());
        };
        let owned = self.config.class_under_init.as_deref() == Some(field.class.as_str());
        let through_receiver = insn.src(1).is_some() && insn.src(1) == self.config.receiver;
        let existing = if !owned {
            self.wps.field_value(field.id)
        } else if op.is_sput() || through_receiver {
            env.get_field(field.id)
        } else {
            // the environment only holds the receiver's copy of an instance field
            return Ok(());
        };
        let Some(src) = insn.src(0) else {
            return Ok(());
        };
        let new_value = env.get(src);
        if existing.runtime_equals(&new_value) {
            log::trace!("{}.{} already has {:?}", field.class, field.name, existing);
            self.changes.add(loc, Change::Delete)?;
            self.stats.redundant_puts_removed += 1;
            self.record(EventKind::StoreRemoved, insn, format!("{insn}"));
        }
        Ok(())
    }

    fn simplify_instruction(
        &mut self,
        env: &ConstantEnvironment<V>,
        block: &Block,
        insn: &Instruction,
        loc: InsnLocation,
    ) -> Result<()> {
        let op = insn.opcode;
        let eligible = match op {
            Opcode::Move | Opcode::MoveWide => self.config.replace_moves_with_consts,
            _ if op.is_move_result_pseudo() => loc.index.checked_sub(1).is_some_and(|prev| {
                block.instructions().get(prev).is_some_and(|primary| {
                    let p = primary.opcode;
                    p.is_sget() || p.is_iget() || p == Opcode::Aget || p.is_div_rem_lit()
                })
            }),
            _ => op.is_arith_lit() && !op.is_div_rem_lit(),
        };
        if eligible {
            self.replace_with_const(env, insn, loc)?;
        }
        Ok(())
    }

    /// Replaces an instruction with a constant load of its destination's new value.
    ///
    /// `env` holds the state after `insn`. A `move-result-pseudo` is replaced together with
    /// the primary instruction it belongs to.
    fn replace_with_const(
        &mut self,
        env: &ConstantEnvironment<V>,
        insn: &Instruction,
        loc: InsnLocation,
    ) -> Result<()> {
        let Some(dest) = insn.dest else {
            return Ok(());
        };
        let value = env.get(dest);
        let replacement = value_to_instructions(insn, dest, &value);
        if replacement.is_empty() {
            return Ok(());
        }
        if insn.opcode.is_move_result_pseudo() {
            let primary = InsnLocation::new(loc.block, loc.index - 1);
            self.changes.add(
                primary,
                Change::Replace {
                    count: 2,
                    insns: replacement,
                },
            )?;
        } else {
            self.changes.add(
                loc,
                Change::Replace {
                    count: 1,
                    insns: replacement,
                },
            )?;
        }
        self.stats.materialized_consts += 1;
        self.record(
            EventKind::ConstantMaterialized,
            insn,
            format!("{dest} = {:?}", value),
        );
        Ok(())
    }

    fn eliminate_dead_branch(
        &mut self,
        fixpoint: &impl FixpointIterator<V>,
        env: &ConstantEnvironment<V>,
        block: &Block,
        editable: bool,
    ) -> Result<()> {
        let Some(insn) = block.instructions().last() else {
            return Ok(());
        };
        if insn.opcode.is_switch() {
            return self.remove_dead_switch(env, block, insn, editable);
        }
        if !insn.opcode.is_conditional_branch() {
            return Ok(());
        }

        let succs: Vec<_> = block.non_ghost_successors().collect();
        if succs.len() != 2 {
            return Err(malformed_error!(
                "Conditional branch in {} has {} non-ghost successors",
                block.id(),
                succs.len()
            ));
        }
        let loc = InsnLocation::new(block.id(), block.len() - 1);
        for edge in succs {
            if fixpoint.analyze_edge(edge, env).is_bottom() {
                let is_fallthrough = edge.kind == EdgeKind::Goto;
                log::trace!(
                    "Changed conditional branch {} as it is always {}",
                    insn,
                    is_fallthrough
                );
                self.stats.branches_removed += 1;
                if is_fallthrough {
                    self.changes.add(
                        loc,
                        Change::Replace {
                            count: 1,
                            insns: vec![Instruction::new(Opcode::Goto)],
                        },
                    )?;
                } else {
                    self.changes.add(loc, Change::Delete)?;
                }
                self.record(EventKind::BranchRemoved, insn, format!("{insn}"));
                // the block is reachable, so the other side must be
                break;
            }
        }
        Ok(())
    }

    fn remove_dead_switch(
        &mut self,
        env: &ConstantEnvironment<V>,
        block: &Block,
        insn: &Instruction,
        editable: bool,
    ) -> Result<()> {
        // labels only exist in the linear form
        if !self.config.remove_dead_switch || editable {
            return Ok(());
        }

        let mut default = None;
        for edge in block.successors() {
            match edge.kind {
                EdgeKind::Goto if default.is_some() => {
                    return Err(malformed_error!("Switch in {} has two default edges", block.id()));
                }
                EdgeKind::Goto => default = Some(edge.target),
                _ => {}
            }
        }
        let Some(default) = default else {
            return Err(malformed_error!("Switch in {} has no default edge", block.id()));
        };
        let Some(src) = insn.src(0) else {
            return Err(malformed_error!("Switch in {} has no scrutinee", block.id()));
        };

        let scrutinee = env.get(src);
        let mut should_optimize = !scrutinee.is_top();
        let mut reachable: Option<BlockId> = None;
        let mut reachable_labels = Vec::new();
        for (index, edge) in block.successors().iter().enumerate() {
            let EdgeKind::Branch(Some(key)) = edge.kind else {
                continue;
            };
            let case = scrutinee.meet(&V::from_constant(i64::from(key)));
            if case.is_bottom() || edge.target == default {
                self.changes.edit_edge(block.id(), index, EdgeEdit::Neutralize);
                continue;
            }
            match reachable {
                Some(target) if target != edge.target => should_optimize = false,
                Some(_) => {}
                None => reachable = Some(edge.target),
            }
            reachable_labels.push((index, edge.target));
        }

        if !should_optimize {
            return Ok(());
        }
        self.stats.branches_removed += 1;
        let loc = InsnLocation::new(block.id(), block.len() - 1);

        match reachable {
            None => {
                // falls to the default block
                self.changes.add(loc, Change::Delete)?;
            }
            Some(_) => {
                self.changes.add(
                    loc,
                    Change::Replace {
                        count: 1,
                        insns: vec![Instruction::new(Opcode::Goto)],
                    },
                )?;
                let mut labels = reachable_labels.into_iter().map(|(index, _)| index);
                if let Some(first) = labels.next() {
                    self.changes.edit_edge(block.id(), first, EdgeEdit::MakeSimple);
                }
                for index in labels {
                    self.changes.edit_edge(block.id(), index, EdgeEdit::Neutralize);
                }
            }
        }
        self.record(EventKind::SwitchSimplified, insn, format!("{insn} on {:?}", scrutinee));
        Ok(())
    }
}

/// Builds the constant load equivalent to `insn` writing `value` into `dest`.
///
/// Returns an empty sequence when the value is not an exact constant, when the destination
/// holds an object reference, or when the constant does not fit a 32-bit load.
fn value_to_instructions<V: AbstractValue>(
    insn: &Instruction,
    dest: Reg,
    value: &V,
) -> Vec<Instruction> {
    let Some(constant) = value.constant_value() else {
        return Vec::new();
    };
    let op = insn.opcode;
    if op.is_object() {
        return Vec::new();
    }
    let wide = op.is_wide();
    if !wide && i32::try_from(constant).is_err() {
        return Vec::new();
    }
    vec![Instruction::constant(dest, constant, wide)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{
            ConstantDomain, ConstantEnvironment, ConstantTransfer, FieldSummary,
            IntraproceduralFixpoint,
        },
        ir::{AccessFlags, ClassDef, FieldDef, MemberRef, MethodBuilder, Program},
        test::factories::static_field_program,
    };

    fn run(
        body: &mut MethodBody,
        program: &Program,
        wps: &FieldSummary<ConstantDomain>,
        config: TransformConfig,
    ) -> Result<TransformStats> {
        let transform = Transform::new(config);
        let fixpoint = IntraproceduralFixpoint::analyze(
            body,
            ConstantTransfer::new(program, wps)
                .with_class_under_init(transform.config().class_under_init.as_deref())
                .with_receiver(transform.config().receiver),
            ConstantEnvironment::top(),
        );
        transform.apply(&fixpoint, wps, program, body)
    }

    fn opcodes(body: &MethodBody, block: usize) -> Vec<Opcode> {
        body.cfg
            .block(BlockId(block))
            .map(|b| b.instructions().iter().map(|i| i.opcode).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_materializes_load_and_arithmetic() -> Result<()> {
        let (program, field) = static_field_program();
        let wps = FieldSummary::new().with_field(field, ConstantDomain::Constant(7));
        let mut body = MethodBuilder::new(3, []).build_with(|m| {
            m.block(0, |b| {
                b.sget(MemberRef::new("LFoo;", "x"), Reg(1));
                b.binop_lit(Opcode::AddIntLit, Reg(2), Reg(1), 1);
                b.ret(Reg(2));
            });
        });
        let stats = run(&mut body, &program, &wps, TransformConfig::default())?;
        assert_eq!(stats.materialized_consts, 2);
        let insns = body.cfg.block(BlockId(0)).unwrap().instructions();
        assert_eq!(insns.len(), 3);
        assert_eq!(insns[0].opcode, Opcode::Const);
        assert_eq!(insns[0].dest, Some(Reg(1)));
        assert_eq!(insns[0].literal(), Some(7));
        assert_eq!(insns[1].literal(), Some(8));
        assert_eq!(insns[1].dest, Some(Reg(2)));
        Ok(())
    }

    #[test]
    fn test_move_replacement_respects_config() -> Result<()> {
        let program = Program::new();
        let wps = FieldSummary::new();
        let build = || {
            MethodBuilder::new(2, []).build_with(|m| {
                m.block(0, |b| {
                    b.const_(Reg(0), 3);
                    b.mov(Reg(1), Reg(0));
                    b.ret(Reg(1));
                });
            })
        };
        let mut body = build();
        let config = TransformConfig::default().with_replace_moves_with_consts(false);
        assert_eq!(run(&mut body, &program, &wps, config)?.materialized_consts, 0);
        assert_eq!(opcodes(&body, 0)[1], Opcode::Move);

        let mut body = build();
        assert_eq!(
            run(&mut body, &program, &wps, TransformConfig::default())?.materialized_consts,
            1
        );
        assert_eq!(opcodes(&body, 0)[1], Opcode::Const);
        Ok(())
    }

    #[test]
    fn test_redundant_store_in_initializer_uses_environment() -> Result<()> {
        let (program, field) = static_field_program();
        // outside the initializer the field is unknown
        let wps = FieldSummary::new();
        let mut body = MethodBuilder::new(1, []).build_with(|m| {
            m.block(0, |b| {
                b.const_(Reg(0), 5);
                b.sput(Reg(0), MemberRef::new("LFoo;", "x"));
                b.sput(Reg(0), MemberRef::new("LFoo;", "x"));
                b.return_void();
            });
        });
        let config = TransformConfig::default().with_class_under_init(Some("LFoo;".into()));
        let stats = run(&mut body, &program, &wps, config)?;
        assert_eq!(stats.redundant_puts_removed, 1);
        assert_eq!(
            opcodes(&body, 0),
            vec![Opcode::Const, Opcode::Sput, Opcode::ReturnVoid]
        );
        assert!(wps.field_value(field).is_top());
        Ok(())
    }

    #[test]
    fn test_constructor_store_to_other_instance_is_kept() -> Result<()> {
        let mut program = Program::new();
        program.add_class(ClassDef::new("LFoo;"));
        program.add_field(FieldDef::new("LFoo;", "f", AccessFlags::PUBLIC));
        let wps = FieldSummary::new();
        // v0 is the receiver, v1 another instance of the same class
        let mut body = MethodBuilder::new(3, [Reg(0), Reg(1)]).build_with(|m| {
            m.block(0, |b| {
                b.const_(Reg(2), 5);
                b.iput(Reg(2), Reg(0), MemberRef::new("LFoo;", "f"));
                b.iput(Reg(2), Reg(1), MemberRef::new("LFoo;", "f"));
                b.iput(Reg(2), Reg(0), MemberRef::new("LFoo;", "f"));
                b.return_void();
            });
        });
        let config = TransformConfig::default()
            .with_class_under_init(Some("LFoo;".into()))
            .with_receiver(Some(Reg(0)));
        let stats = run(&mut body, &program, &wps, config)?;
        // the store through v1 may alias the receiver, so the last store stays as well
        assert_eq!(stats.redundant_puts_removed, 0);
        assert_eq!(
            opcodes(&body, 0),
            vec![
                Opcode::Const,
                Opcode::Iput,
                Opcode::Iput,
                Opcode::Iput,
                Opcode::ReturnVoid
            ]
        );

        let mut body = MethodBuilder::new(3, [Reg(0), Reg(1)]).build_with(|m| {
            m.block(0, |b| {
                b.const_(Reg(2), 5);
                b.iput(Reg(2), Reg(0), MemberRef::new("LFoo;", "f"));
                b.iput(Reg(2), Reg(0), MemberRef::new("LFoo;", "f"));
                b.return_void();
            });
        });
        let config = TransformConfig::default()
            .with_class_under_init(Some("LFoo;".into()))
            .with_receiver(Some(Reg(0)));
        assert_eq!(run(&mut body, &program, &wps, config)?.redundant_puts_removed, 1);
        Ok(())
    }

    #[test]
    fn test_store_of_different_value_is_kept() -> Result<()> {
        let (program, field) = static_field_program();
        let wps = FieldSummary::new().with_field(field, ConstantDomain::Constant(7));
        let mut body = MethodBuilder::new(1, []).build_with(|m| {
            m.block(0, |b| {
                b.const_(Reg(0), 8);
                b.sput(Reg(0), MemberRef::new("LFoo;", "x"));
                b.return_void();
            });
        });
        let stats = run(&mut body, &program, &wps, TransformConfig::default())?;
        assert_eq!(stats, TransformStats::default());
        assert_eq!(opcodes(&body, 0).len(), 3);
        Ok(())
    }

    #[test]
    fn test_switch_labels_to_default_are_dropped_even_when_unknown() -> Result<()> {
        let program = Program::new();
        let wps = FieldSummary::new();
        let mut body = MethodBuilder::new(1, [Reg(0)]).build_with(|m| {
            m.block(0, |b| {
                b.switch(Reg(0), &[(1, 1), (2, 2), (3, 2)], 2);
            });
            m.block(1, |b| {
                b.return_void();
            });
            m.block(2, |b| {
                b.return_void();
            });
        });
        let stats = run(&mut body, &program, &wps, TransformConfig::default())?;
        assert_eq!(stats.branches_removed, 0);
        let entry = body.cfg.block(BlockId(0)).unwrap();
        assert_eq!(entry.successors().len(), 2);
        assert_eq!(opcodes(&body, 0), vec![Opcode::Switch]);
        body.cfg.validate()
    }

    #[test]
    fn test_switch_untouched_on_editable_graph() -> Result<()> {
        let program = Program::new();
        let wps = FieldSummary::new();
        let mut body = MethodBuilder::new(1, []).editable(true).build_with(|m| {
            m.block(0, |b| {
                b.const_(Reg(0), 1);
                b.switch(Reg(0), &[(1, 1), (2, 2)], 3);
            });
            for i in 1..=3 {
                m.block(i, |b| {
                    b.return_void();
                });
            }
        });
        let stats = run(&mut body, &program, &wps, TransformConfig::default())?;
        assert_eq!(stats.branches_removed, 0);
        assert_eq!(body.cfg.block(BlockId(0)).unwrap().successors().len(), 3);
        Ok(())
    }

    #[test]
    fn test_switch_without_reachable_case_is_deleted() -> Result<()> {
        let program = Program::new();
        let wps = FieldSummary::new();
        let mut body = MethodBuilder::new(1, []).build_with(|m| {
            m.block(0, |b| {
                b.const_(Reg(0), 9);
                b.switch(Reg(0), &[(1, 1), (2, 2)], 3);
            });
            for i in 1..=3 {
                m.block(i, |b| {
                    b.return_void();
                });
            }
        });
        let stats = run(&mut body, &program, &wps, TransformConfig::default())?;
        assert_eq!(stats.branches_removed, 1);
        let entry = body.cfg.block(BlockId(0)).unwrap();
        assert_eq!(opcodes(&body, 0), vec![Opcode::Const]);
        assert_eq!(entry.successors().len(), 1);
        assert_eq!(entry.goto_target(), Some(BlockId(3)));
        body.cfg.validate()
    }

    #[test]
    fn test_switch_collapses_to_single_target() -> Result<()> {
        let program = Program::new();
        let wps = FieldSummary::new();
        let mut body = MethodBuilder::new(1, []).build_with(|m| {
            m.block(0, |b| {
                b.const_(Reg(0), 0);
                b.switch(Reg(0), &[(0, 1), (5, 1)], 2);
            });
            m.block(1, |b| {
                b.return_void();
            });
            m.block(2, |b| {
                b.return_void();
            });
        });
        let stats = run(&mut body, &program, &wps, TransformConfig::default())?;
        assert_eq!(stats.branches_removed, 1);
        let entry = body.cfg.block(BlockId(0)).unwrap();
        assert_eq!(entry.goto_target(), Some(BlockId(1)));
        assert_eq!(entry.successors().len(), 1);
        assert_eq!(opcodes(&body, 0), vec![Opcode::Const, Opcode::Goto]);

        let again = run(&mut body, &program, &wps, TransformConfig::default())?;
        assert_eq!(again, TransformStats::default());
        body.cfg.validate()
    }

    #[test]
    fn test_malformed_conditional_is_fatal() {
        let program = Program::new();
        let wps = FieldSummary::new();
        let mut body = MethodBuilder::new(1, [Reg(0)]).build_with(|m| {
            m.block(0, |b| {
                b.insn(Instruction::new(Opcode::IfEqz).with_src(Reg(0)));
                b.fallthrough(1);
            });
            m.block(1, |b| {
                b.return_void();
            });
        });
        let result = run(&mut body, &program, &wps, TransformConfig::default());
        assert!(matches!(result, Err(crate::Error::Malformed { .. })));
    }

    #[test]
    fn test_overlapping_changes_are_rejected() {
        let mut changes = ChangeSet::default();
        let loc = InsnLocation::new(BlockId(0), 1);
        assert!(changes
            .add(
                InsnLocation::new(BlockId(0), 0),
                Change::Replace {
                    count: 2,
                    insns: Vec::new()
                }
            )
            .is_ok());
        assert!(changes.add(loc, Change::Delete).is_err());
        assert!(changes
            .add(InsnLocation::new(BlockId(0), 2), Change::Delete)
            .is_ok());
    }

    #[test]
    fn test_stats_accumulate() {
        let mut total = TransformStats::default();
        total += TransformStats {
            materialized_consts: 1,
            branches_removed: 2,
            redundant_puts_removed: 3,
        };
        total += TransformStats {
            materialized_consts: 1,
            ..TransformStats::default()
        };
        assert_eq!(total.materialized_consts, 2);
        assert_eq!(total.redundant_puts_removed, 3);
    }
}
