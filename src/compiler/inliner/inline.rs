//! Splicing a callee body into a caller at one call site.
//!
//! Two bridging forms exist:
//!
//! - **Copies**: the caller block is split after the call, the arguments are copied into
//!   fresh registers holding the callee's parameters, and every callee return becomes a
//!   move into the call's result register followed by a jump to the split-off tail.
//! - **Tail call**: when the call is followed by nothing but a return of its result, the
//!   callee's parameters are renamed to the argument registers and the callee's returns
//!   become the caller's returns. No copies and no continuation block are needed.
//!
//! Callee registers are always moved above the caller's frame, so the two bodies never
//! share a register except through the bridge.

use std::collections::{BTreeMap, HashMap};

use crate::{
    ir::{BlockId, EdgeKind, InsnId, InsnLocation, Instruction, MethodBody, Opcode, Reg},
    Result,
};

/// Picks the `move` variant for copying an argument into `param`.
///
/// The first instruction of `callee` that reads the parameter with a typed opcode decides;
/// an untyped parameter is copied with a plain `move`.
fn param_move(callee: &MethodBody, param: Reg) -> Opcode {
    for insn in callee.cfg.instructions() {
        let op = insn.opcode;
        // iget obj / iput value, obj
        let is_receiver = (op.is_iget() && insn.src(0) == Some(param))
            || (op.is_iput() && insn.src(1) == Some(param));
        if is_receiver {
            return Opcode::MoveObject;
        }
        let typed = op.is_move() || op.is_return() || op.is_sput() || op.is_iput();
        if typed && insn.src(0) == Some(param) {
            return op.move_for();
        }
    }
    Opcode::Move
}

/// What [`inline_call_site`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Splice {
    /// The tail-call form was used
    pub tail_call: bool,
    /// The call had the tail-call shape but the callee overwrites a parameter whose
    /// argument register is shared, so copies were used
    pub write_over_ins: bool,
    /// Blocks added to the caller
    pub blocks_added: usize,
}

struct CallShape {
    loc: InsnLocation,
    invoke: Instruction,
    /// The `move-result` following the call, if any
    result: Option<Instruction>,
    /// The return ending the block, when nothing else follows the call
    tail_return: Option<Instruction>,
}

fn call_shape(caller: &MethodBody, invoke_id: InsnId) -> Result<CallShape> {
    let loc = caller
        .cfg
        .find_instruction(invoke_id)
        .ok_or_else(|| malformed_error!("Call site {:?} is not in the caller", invoke_id))?;
    let block = caller
        .cfg
        .block(loc.block)
        .ok_or_else(|| malformed_error!("Block {} does not exist", loc.block))?;
    let insns = block.instructions();
    let invoke = insns[loc.index].clone();
    if !invoke.opcode.is_invoke() {
        return Err(malformed_error!("{} is not a call", invoke));
    }

    let mut rest = insns[loc.index + 1..].iter();
    let mut next = rest.next();
    let result = next.filter(|insn| insn.opcode.is_move_result()).cloned();
    if result.is_some() {
        next = rest.next();
    }
    let ends_block = block.non_ghost_successors().next().is_none();
    let tail_return = match (next, rest.next()) {
        (Some(ret), None) if ends_block && ret.opcode.is_return() => {
            let returns_result = match (&result, ret.src(0)) {
                (Some(mr), Some(src)) => mr.dest == Some(src),
                (None, None) => true,
                _ => false,
            };
            returns_result.then(|| ret.clone())
        }
        _ => None,
    };

    Ok(CallShape {
        loc,
        invoke,
        result,
        tail_return,
    })
}

/// Replaces the call `invoke_id` in `caller` by a copy of `callee`.
///
/// # Arguments
///
/// * `caller` - The body to splice into.
/// * `invoke_id` - The call instruction.
/// * `callee` - The body of the called method.
///
/// # Returns
///
/// A description of the splice.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if the call site does not exist, the argument
/// count does not match the callee's parameters, or the resulting edges are inconsistent.
pub fn inline_call_site(
    caller: &mut MethodBody,
    invoke_id: InsnId,
    callee: &MethodBody,
) -> Result<Splice> {
    let shape = call_shape(caller, invoke_id)?;
    let args = shape.invoke.srcs.clone();
    if args.len() != callee.params.len() {
        return Err(malformed_error!(
            "{} passes {} arguments to a method taking {}",
            shape.invoke,
            args.len(),
            callee.params.len()
        ));
    }

    let returns_match = shape.tail_return.as_ref().is_some_and(|ret| {
        callee
            .cfg
            .instructions()
            .filter(|insn| insn.opcode.is_return())
            .all(|insn| insn.opcode == ret.opcode)
    });
    let mut write_over_ins = false;
    let tail_call = returns_match && {
        let mut distinct = args.clone();
        distinct.sort_unstable();
        distinct.dedup();
        let aliased = distinct.len() != args.len();
        let writes_param = callee
            .cfg
            .instructions()
            .any(|insn| insn.dest.is_some_and(|d| callee.params.contains(&d)));
        write_over_ins = aliased && writes_param;
        !write_over_ins
    };

    let base = caller.allocate_registers(callee.registers_size);
    let renamed_params: HashMap<Reg, Reg> = if tail_call {
        callee.params.iter().copied().zip(args.iter().copied()).collect()
    } else {
        HashMap::new()
    };
    let map = |reg: Reg| {
        renamed_params
            .get(&reg)
            .copied()
            .unwrap_or(Reg(base + reg.0))
    };

    let CallShape { loc, invoke, result, .. } = shape;
    let head = loc.block;
    let blocks_before = caller.cfg.block_count();

    let continuation = if tail_call {
        // drop the call, its move-result and the return
        let block_len = caller.cfg.block(head).map_or(0, |b| b.len());
        for index in (loc.index..block_len).rev() {
            caller.cfg.remove_instruction(InsnLocation::new(head, index))?;
        }
        None
    } else {
        if result.is_some() {
            caller
                .cfg
                .remove_instruction(InsnLocation::new(head, loc.index + 1))?;
        }
        let tail = caller.cfg.split_block(head, loc.index + 1)?;
        caller.cfg.remove_instruction(loc)?;
        // the split left exactly one goto edge from the head to the tail
        let goto = caller
            .cfg
            .block(head)
            .and_then(|b| b.successors().iter().position(|e| e.kind == EdgeKind::Goto))
            .ok_or_else(|| malformed_error!("Split block {} lost its goto edge", head))?;
        caller.cfg.remove_edge(head, goto)?;
        for (param, arg) in callee.params.iter().zip(&args) {
            let copy = Instruction::mov(param_move(callee, *param), map(*param), *arg);
            caller.cfg.push_instruction(head, copy)?;
        }
        Some(tail)
    };

    let blocks: BTreeMap<BlockId, BlockId> = callee
        .cfg
        .block_ids()
        .into_iter()
        .map(|id| (id, caller.cfg.add_block()))
        .collect();
    let result_reg = result.and_then(|mr| mr.dest);
    let copy_of = |id: BlockId| {
        blocks
            .get(&id)
            .copied()
            .ok_or_else(|| malformed_error!("Callee edge targets missing block {}", id))
    };

    for block in callee.cfg.blocks() {
        let copy = copy_of(block.id())?;
        for insn in block.instructions() {
            let mut insn = insn.clone();
            insn.rename_registers(map);
            match continuation {
                Some(tail) if insn.opcode.is_return() => {
                    if let (Some(dest), Some(src)) = (result_reg, insn.src(0)) {
                        let bridge = Instruction::mov(insn.opcode.move_for(), dest, src);
                        caller.cfg.push_instruction(copy, bridge)?;
                    }
                    caller.cfg.add_edge(copy, tail, EdgeKind::Goto)?;
                }
                _ => {
                    caller.cfg.push_instruction(copy, insn)?;
                }
            }
        }
        for edge in block.successors() {
            caller.cfg.add_edge(copy, copy_of(edge.target)?, edge.kind)?;
        }
    }

    caller
        .cfg
        .add_edge(head, copy_of(callee.cfg.entry())?, EdgeKind::Goto)?;
    for ty in &callee.catch_types {
        if !caller.catch_types.contains(ty) {
            caller.catch_types.push(ty.clone());
        }
    }

    log::trace!(
        "spliced {} into {} ({} form)",
        invoke,
        head,
        if tail_call { "tail-call" } else { "copy" }
    );
    Ok(Splice {
        tail_call,
        write_over_ins,
        blocks_added: caller.cfg.block_count() - blocks_before,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{MemberRef, MethodBuilder};

    fn add_one() -> MethodBody {
        MethodBuilder::new(2, [Reg(1)]).build_with(|m| {
            m.block(0, |b| {
                b.binop_lit(Opcode::AddIntLit, Reg(0), Reg(1), 1);
                b.ret(Reg(0));
            });
        })
    }

    fn target() -> MemberRef {
        MemberRef::new("LFoo;", "addOne")
    }

    #[test]
    fn test_copy_form_bridges_arguments_and_result() -> Result<()> {
        let mut invoke = InsnId::default();
        let mut caller = MethodBuilder::new(3, [Reg(0)]).build_with(|m| {
            m.block(0, |b| {
                invoke = b.invoke(Opcode::InvokeStatic, target(), [Reg(0)]);
                b.move_result(Reg(1));
                b.binop_lit(Opcode::MulIntLit, Reg(2), Reg(1), 2);
                b.ret(Reg(2));
            });
        });

        let splice = inline_call_site(&mut caller, invoke, &add_one())?;
        assert!(!splice.tail_call);
        assert_eq!(splice.blocks_added, 2);
        assert_eq!(caller.registers_size, 5);
        caller.cfg.validate()?;

        let head = caller.cfg.block(BlockId(0)).unwrap();
        assert_eq!(head.instructions().len(), 1);
        assert_eq!(head.instructions()[0].opcode, Opcode::Move);
        assert_eq!(head.instructions()[0].dest, Some(Reg(4)));
        assert!(!caller.cfg.instructions().any(|i| i.opcode.is_invoke()));
        assert_eq!(caller.return_count(), 1);

        // the callee return became `move v1, v3`
        let moves: Vec<_> = caller
            .cfg
            .instructions()
            .filter(|i| i.opcode == Opcode::Move && i.dest == Some(Reg(1)))
            .collect();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].srcs, vec![Reg(3)]);
        Ok(())
    }

    #[test]
    fn test_argument_copies_follow_parameter_kind() -> Result<()> {
        let callee = MethodBuilder::new(3, [Reg(1), Reg(2)]).build_with(|m| {
            m.block(0, |b| {
                b.iget(Reg(1), MemberRef::new("LFoo;", "count"), Reg(0));
                b.binop(Opcode::AddInt, Reg(0), Reg(0), Reg(2));
                b.ret(Reg(0));
            });
        });
        let mut invoke = InsnId::default();
        let mut caller = MethodBuilder::new(3, [Reg(0), Reg(1)]).build_with(|m| {
            m.block(0, |b| {
                invoke = b.invoke(Opcode::InvokeStatic, target(), [Reg(0), Reg(1)]);
                b.move_result(Reg(2));
                b.binop_lit(Opcode::MulIntLit, Reg(2), Reg(2), 2);
                b.ret(Reg(2));
            });
        });

        inline_call_site(&mut caller, invoke, &callee)?;
        caller.cfg.validate()?;
        let copies: Vec<_> = caller
            .cfg
            .block(BlockId(0))
            .unwrap()
            .instructions()
            .iter()
            .map(|i| (i.opcode, i.srcs.clone()))
            .collect();
        assert_eq!(
            copies,
            vec![
                (Opcode::MoveObject, vec![Reg(0)]),
                (Opcode::Move, vec![Reg(1)])
            ]
        );
        Ok(())
    }

    #[test]
    fn test_tail_call_renames_parameters() -> Result<()> {
        let mut invoke = InsnId::default();
        let mut caller = MethodBuilder::new(2, [Reg(0)]).build_with(|m| {
            m.block(0, |b| {
                invoke = b.invoke(Opcode::InvokeStatic, target(), [Reg(0)]);
                b.move_result(Reg(1));
                b.ret(Reg(1));
            });
        });

        let splice = inline_call_site(&mut caller, invoke, &add_one())?;
        assert!(splice.tail_call);
        assert_eq!(splice.blocks_added, 1);
        caller.cfg.validate()?;

        assert!(caller.cfg.block(BlockId(0)).unwrap().is_empty());
        let add = caller
            .cfg
            .instructions()
            .find(|i| i.opcode == Opcode::AddIntLit)
            .cloned()
            .unwrap();
        assert_eq!(add.srcs, vec![Reg(0)]);
        assert_eq!(add.dest, Some(Reg(2)));
        assert_eq!(caller.return_count(), 1);
        Ok(())
    }

    #[test]
    fn test_aliased_arguments_fall_back_to_copies() -> Result<()> {
        let callee = MethodBuilder::new(2, [Reg(0), Reg(1)]).build_with(|m| {
            m.block(0, |b| {
                b.binop_lit(Opcode::AddIntLit, Reg(0), Reg(0), 1);
                b.binop(Opcode::SubInt, Reg(0), Reg(0), Reg(1));
                b.ret(Reg(0));
            });
        });
        let mut invoke = InsnId::default();
        let mut caller = MethodBuilder::new(2, [Reg(0)]).build_with(|m| {
            m.block(0, |b| {
                invoke = b.invoke(Opcode::InvokeStatic, target(), [Reg(0), Reg(0)]);
                b.move_result(Reg(1));
                b.ret(Reg(1));
            });
        });

        let splice = inline_call_site(&mut caller, invoke, &callee)?;
        assert!(splice.write_over_ins);
        assert!(!splice.tail_call);
        caller.cfg.validate()
    }

    #[test]
    fn test_multiple_returns_join_in_continuation() -> Result<()> {
        let callee = MethodBuilder::new(2, [Reg(0)]).build_with(|m| {
            m.block(0, |b| {
                b.if_zero(Opcode::IfEqz, Reg(0), 2, 1);
            });
            m.block(1, |b| {
                b.const_(Reg(1), 1);
                b.ret(Reg(1));
            });
            m.block(2, |b| {
                b.const_(Reg(1), 2);
                b.ret(Reg(1));
            });
        });
        let mut invoke = InsnId::default();
        let mut caller = MethodBuilder::new(2, [Reg(0)]).build_with(|m| {
            m.block(0, |b| {
                invoke = b.invoke(Opcode::InvokeStatic, target(), [Reg(0)]);
                b.move_result(Reg(1));
                b.sput(Reg(1), MemberRef::new("LFoo;", "x"));
                b.return_void();
            });
        });

        let splice = inline_call_site(&mut caller, invoke, &callee)?;
        assert_eq!(splice.blocks_added, 4);
        caller.cfg.validate()?;
        let continuation = BlockId(1);
        assert_eq!(caller.cfg.predecessors(continuation).len(), 2);
        assert_eq!(caller.return_count(), 1);
        Ok(())
    }

    #[test]
    fn test_missing_call_site_is_malformed() {
        let mut caller = add_one();
        let result = inline_call_site(&mut caller, InsnId(99), &add_one());
        assert!(matches!(result, Err(crate::Error::Malformed { .. })));
    }
}
