#![allow(unused)]
extern crate dexopt;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use dexopt::prelude::*;
use std::hint::black_box;

/// Builds a chain of `length` blocks, each loading a non-zero constant, copying it, and
/// branching to the exit on zero, so every block has a dead branch and a move to
/// materialize.
fn branchy_method(length: usize) -> MethodBody {
    MethodBuilder::new(2, []).build_with(|m| {
        for i in 0..length {
            m.block(i, |b| {
                b.const_(Reg(0), 1 + (i % 3) as i64);
                b.mov(Reg(1), Reg(0));
                b.if_zero(Opcode::IfEqz, Reg(1), length, i + 1);
            });
        }
        m.block(length, |b| {
            b.return_void();
        });
    })
}

/// Builds `width` roots, each calling `width` shared mid-level methods, each calling two
/// constant leaves.
fn layered_program(width: usize) -> (Program, Vec<MethodId>) {
    let mut program = Program::new();
    program.add_class(ClassDef::new("LFoo;"));
    let flags = AccessFlags::PUBLIC | AccessFlags::STATIC;
    let mut candidates = Vec::new();

    for i in 0..width {
        candidates.push(program.add_method_with_body(
            MethodDef::new("LFoo;", format!("leaf{i}"), flags),
            MethodBuilder::new(1, []).build_with(|m| {
                m.block(0, |b| {
                    b.const_(Reg(0), i as i64);
                    b.ret(Reg(0));
                });
            }),
        ));
    }
    for i in 0..width {
        let first = MemberRef::new("LFoo;", format!("leaf{i}"));
        let second = MemberRef::new("LFoo;", format!("leaf{}", (i + 1) % width));
        candidates.push(program.add_method_with_body(
            MethodDef::new("LFoo;", format!("mid{i}"), flags),
            MethodBuilder::new(2, []).build_with(|m| {
                m.block(0, |b| {
                    b.invoke(Opcode::InvokeStatic, first, []);
                    b.move_result(Reg(0));
                    b.invoke(Opcode::InvokeStatic, second, []);
                    b.move_result(Reg(1));
                    b.binop(Opcode::AddInt, Reg(0), Reg(0), Reg(1));
                    b.ret(Reg(0));
                });
            }),
        ));
    }
    for i in 0..width {
        program.add_method_with_body(
            MethodDef::new("LFoo;", format!("root{i}"), flags).root(),
            MethodBuilder::new(1, []).build_with(|m| {
                m.block(0, |b| {
                    for j in 0..width {
                        b.invoke(
                            Opcode::InvokeStatic,
                            MemberRef::new("LFoo;", format!("mid{j}")),
                            [],
                        );
                        b.move_result(Reg(0));
                    }
                    b.ret(Reg(0));
                });
            }),
        );
    }
    (program, candidates)
}

/// Benchmark the constant propagation fixpoint plus rewrite on a branchy method
fn bench_constant_propagation(c: &mut Criterion) {
    let program = Program::new();
    let wps = FieldSummary::<ConstantDomain>::new();
    let transform = Transform::new(TransformConfig::default());
    let body = branchy_method(256);

    let mut group = c.benchmark_group("constprop");
    group.throughput(Throughput::Elements(body.cfg.instruction_count() as u64));
    group.bench_function("analyze_and_apply", |b| {
        b.iter_batched(
            || body.clone(),
            |mut body| {
                let fixpoint = IntraproceduralFixpoint::analyze(
                    &body,
                    ConstantTransfer::new(&program, &wps),
                    ConstantEnvironment::top(),
                );
                let stats = transform.apply(&fixpoint, &wps, &program, &mut body).unwrap();
                black_box(stats)
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

/// Benchmark bulk inlining, sequential versus a worker pool
fn bench_inline_methods(c: &mut Criterion) {
    let wps = FieldSummary::<ConstantDomain>::new();

    let mut group = c.benchmark_group("inliner");
    for threads in [0, 4] {
        group.bench_function(format!("inline_methods_{threads}_threads"), |b| {
            b.iter_batched(
                || layered_program(32),
                |(program, candidates)| {
                    let config = InlinerConfig {
                        num_threads: threads,
                        ..InlinerConfig::default()
                    };
                    let mut inliner = MultiMethodInliner::new(
                        &program,
                        &wps,
                        candidates,
                        config,
                        InlinerMode::WholeProgram,
                    );
                    inliner.inline_methods().unwrap();
                    inliner.finalize().unwrap();
                    black_box(inliner.get_info().unwrap())
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_constant_propagation, bench_inline_methods);
criterion_main!(benches);
