//! Constant propagation integration tests.
//!
//! These tests run the public pipeline end to end:
//! 1. Build a method body with `MethodBuilder`
//! 2. Analyze it with `IntraproceduralFixpoint`
//! 3. Rewrite it with `Transform`
//! 4. Check the rewritten graph and the statistics

use dexopt::{
    analysis::{
        ConstantDomain, ConstantEnvironment, ConstantTransfer, FieldSummary,
        IntraproceduralFixpoint,
    },
    compiler::{EventKind, EventLog, Transform, TransformConfig, TransformStats},
    ir::{
        AccessFlags, BlockId, ClassDef, FieldDef, MemberRef, MethodBody, MethodBuilder, Opcode,
        Program, Reg,
    },
    Result,
};

/// Program with class `LFoo;` and its static field `x`, whose whole-program value is `x`.
fn program_with_field(x: i64) -> (Program, FieldSummary<ConstantDomain>) {
    let mut program = Program::new();
    program.add_class(ClassDef::new("LFoo;"));
    let field = program.add_field(FieldDef::new("LFoo;", "x", AccessFlags::STATIC));
    let wps = FieldSummary::new().with_field(field, ConstantDomain::Constant(x));
    (program, wps)
}

/// Analyze and transform `body` with the default options.
fn propagate(
    body: &mut MethodBody,
    program: &Program,
    wps: &FieldSummary<ConstantDomain>,
    events: &EventLog,
) -> Result<TransformStats> {
    let fixpoint = IntraproceduralFixpoint::analyze(
        body,
        ConstantTransfer::new(program, wps),
        ConstantEnvironment::top(),
    );
    Transform::new(TransformConfig::default()).apply_recording(
        &fixpoint,
        wps,
        program,
        body,
        Some(events),
        None,
    )
}

fn opcodes(body: &MethodBody, block: usize) -> Vec<Opcode> {
    body.cfg
        .block(BlockId(block))
        .map(|b| b.instructions().iter().map(|i| i.opcode).collect())
        .unwrap_or_default()
}

fn targets(body: &MethodBody, block: usize) -> Vec<BlockId> {
    body.cfg
        .block(BlockId(block))
        .map(|b| b.non_ghost_successors().map(|e| e.target).collect())
        .unwrap_or_default()
}

#[test]
fn test_redundant_store_is_removed() -> Result<()> {
    let (program, wps) = program_with_field(7);
    let mut body = MethodBuilder::new(1, []).build_with(|m| {
        m.block(0, |b| {
            b.const_(Reg(0), 7);
            b.sput(Reg(0), MemberRef::new("LFoo;", "x"));
            b.return_void();
        });
    });
    let events = EventLog::new();

    let stats = propagate(&mut body, &program, &wps, &events)?;

    assert_eq!(stats.redundant_puts_removed, 1);
    assert_eq!(stats.materialized_consts, 0);
    assert_eq!(opcodes(&body, 0), vec![Opcode::Const, Opcode::ReturnVoid]);
    assert_eq!(events.count_kind(EventKind::StoreRemoved), 1);
    Ok(())
}

#[test]
fn test_store_of_another_value_is_kept() -> Result<()> {
    let (program, wps) = program_with_field(7);
    let mut body = MethodBuilder::new(1, []).build_with(|m| {
        m.block(0, |b| {
            b.const_(Reg(0), 6);
            b.sput(Reg(0), MemberRef::new("LFoo;", "x"));
            b.return_void();
        });
    });

    let stats = propagate(&mut body, &program, &wps, &EventLog::new())?;

    assert_eq!(stats.redundant_puts_removed, 0);
    assert_eq!(opcodes(&body, 0).len(), 3);
    Ok(())
}

#[test]
fn test_decided_switch_becomes_goto() -> Result<()> {
    let program = Program::new();
    let wps = FieldSummary::new();
    let mut body = MethodBuilder::new(1, []).build_with(|m| {
        m.block(0, |b| {
            b.const_(Reg(0), 2);
            b.switch(Reg(0), &[(1, 1), (2, 2), (3, 3)], 4);
        });
        for i in 1..=4 {
            m.block(i, |b| {
                b.return_void();
            });
        }
    });
    let events = EventLog::new();

    let stats = propagate(&mut body, &program, &wps, &events)?;

    assert_eq!(stats.branches_removed, 1);
    assert_eq!(opcodes(&body, 0), vec![Opcode::Const, Opcode::Goto]);
    assert_eq!(targets(&body, 0), vec![BlockId(2)]);
    assert!(events.has(EventKind::SwitchSimplified));
    body.cfg.validate()?;

    // a second run finds nothing left to do
    let again = propagate(&mut body, &program, &wps, &EventLog::new())?;
    assert_eq!(again, TransformStats::default());
    assert_eq!(targets(&body, 0), vec![BlockId(2)]);
    Ok(())
}

#[test]
fn test_dead_branch_is_removed() -> Result<()> {
    let program = Program::new();
    let wps = FieldSummary::new();
    let mut body = MethodBuilder::new(1, []).build_with(|m| {
        m.block(0, |b| {
            b.const_(Reg(0), 0);
            b.if_zero(Opcode::IfEqz, Reg(0), 2, 1);
        });
        m.block(1, |b| {
            b.return_void();
        });
        m.block(2, |b| {
            b.return_void();
        });
    });

    let stats = propagate(&mut body, &program, &wps, &EventLog::new())?;

    assert_eq!(stats.branches_removed, 1);
    assert_eq!(targets(&body, 0), vec![BlockId(2)]);
    assert!(!opcodes(&body, 0).contains(&Opcode::IfEqz));
    body.cfg.validate()
}

#[test]
fn test_unreachable_block_is_left_alone() -> Result<()> {
    let program = Program::new();
    let wps = FieldSummary::new();
    let mut body = MethodBuilder::new(3, []).build_with(|m| {
        m.block(0, |b| {
            b.const_(Reg(0), 1);
            b.if_zero(Opcode::IfEqz, Reg(0), 2, 1);
        });
        m.block(1, |b| {
            b.return_void();
        });
        m.block(2, |b| {
            b.const_(Reg(1), 3);
            b.mov(Reg(2), Reg(1));
            b.ret(Reg(2));
        });
    });
    let unreachable_before = body.cfg.block(BlockId(2)).cloned();

    let stats = propagate(&mut body, &program, &wps, &EventLog::new())?;

    // the branch falls through; the never-taken side keeps its move
    assert_eq!(stats.branches_removed, 1);
    assert_eq!(stats.materialized_consts, 0);
    assert_eq!(targets(&body, 0), vec![BlockId(1)]);
    assert_eq!(body.cfg.block(BlockId(2)).cloned(), unreachable_before);
    Ok(())
}

#[test]
fn test_unknown_values_change_nothing() -> Result<()> {
    let program = Program::new();
    let wps = FieldSummary::new();
    let mut body = MethodBuilder::new(2, [Reg(0)]).build_with(|m| {
        m.block(0, |b| {
            b.binop_lit(Opcode::AddIntLit, Reg(1), Reg(0), 1);
            b.if_zero(Opcode::IfNez, Reg(1), 2, 1);
        });
        m.block(1, |b| {
            b.return_void();
        });
        m.block(2, |b| {
            b.return_void();
        });
    });
    let original = body.clone();
    let events = EventLog::new();

    let stats = propagate(&mut body, &program, &wps, &events)?;

    assert_eq!(stats, TransformStats::default());
    assert_eq!(body, original);
    assert!(events.is_empty());
    Ok(())
}
