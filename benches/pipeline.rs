//! Benchmarks for the per-method pipeline.
//!
//! Measures the full pass sequence on synthetic bytecode shapes:
//! straight-line code, nested counting loops and a try/finally ladder.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use methodscope::prelude::*;

fn make_code(name: &str, local_slots: u16, instructions: Vec<Instruction>) -> MethodCode {
    let mut code = MethodCode::new(
        MethodId::new("bench/Sample", name, "()V"),
        MethodFlags::PUBLIC,
        instructions,
    );
    code.local_slots = local_slots;
    code
}

/// `n` repetitions of `v = v + k; store` straight-line code.
fn linear_method(n: u32) -> MethodCode {
    let mut instructions = Vec::new();
    let mut offset = 0;
    instructions.push(Instruction::new(offset, Opcode::Const(ConstValue::Int(0))));
    offset += 1;
    instructions.push(Instruction::new(offset, Opcode::Store { slot: 0 }));
    offset += 1;
    for k in 0..n {
        instructions.push(Instruction::new(offset, Opcode::Load { slot: 0 }));
        instructions.push(Instruction::new(offset + 1, Opcode::Const(ConstValue::Int(k as i64))));
        instructions.push(Instruction::new(offset + 2, Opcode::Binary(BinaryOp::Add)));
        instructions.push(Instruction::new(offset + 3, Opcode::Store { slot: 0 }));
        offset += 4;
    }
    instructions.push(Instruction::new(offset, Opcode::Return { with_value: false }));
    make_code("linear", 1, instructions)
}

/// `n` sequential counting loops, each `while (i < 100) i = i + 3;`.
fn loop_ladder(n: u32) -> MethodCode {
    let mut instructions = Vec::new();
    let mut offset = 0;
    for _ in 0..n {
        let head = offset + 2;
        let exit = offset + 10;
        instructions.push(Instruction::new(offset, Opcode::Const(ConstValue::Int(0))));
        instructions.push(Instruction::new(offset + 1, Opcode::Store { slot: 0 }));
        instructions.push(Instruction::new(head, Opcode::Load { slot: 0 }));
        instructions.push(Instruction::new(head + 1, Opcode::Const(ConstValue::Int(100))));
        instructions.push(Instruction::new(
            head + 2,
            Opcode::IfCmp {
                cond: Comparison::Ge,
                target: exit,
            },
        ));
        instructions.push(Instruction::new(head + 3, Opcode::Load { slot: 0 }));
        instructions.push(Instruction::new(head + 4, Opcode::Const(ConstValue::Int(3))));
        instructions.push(Instruction::new(head + 5, Opcode::Binary(BinaryOp::Add)));
        instructions.push(Instruction::new(head + 6, Opcode::Store { slot: 0 }));
        instructions.push(Instruction::new(head + 7, Opcode::Goto { target: head }));
        offset = exit;
    }
    instructions.push(Instruction::new(offset, Opcode::Return { with_value: false }));
    make_code("loops", 1, instructions)
}

/// A try block with a catch-all cleanup handler and two exit paths.
fn finally_method() -> MethodCode {
    let mut code = make_code(
        "cleanup",
        3,
        vec![
            Instruction::new(0, Opcode::Const(ConstValue::Int(0))),
            Instruction::new(1, Opcode::Store { slot: 0 }),
            Instruction::new(2, Opcode::Load { slot: 0 }),
            Instruction::new(
                3,
                Opcode::If {
                    cond: Comparison::Eq,
                    target: 5,
                },
            ),
            Instruction::new(4, Opcode::Goto { target: 11 }),
            Instruction::new(5, Opcode::Goto { target: 14 }),
            Instruction::new(6, Opcode::Store { slot: 1 }),
            Instruction::new(7, Opcode::Const(ConstValue::Int(99))),
            Instruction::new(8, Opcode::Store { slot: 2 }),
            Instruction::new(9, Opcode::Load { slot: 1 }),
            Instruction::new(10, Opcode::Athrow),
            Instruction::new(11, Opcode::Const(ConstValue::Int(7))),
            Instruction::new(12, Opcode::Store { slot: 0 }),
            Instruction::new(13, Opcode::Return { with_value: false }),
            Instruction::new(14, Opcode::Const(ConstValue::Int(9))),
            Instruction::new(15, Opcode::Store { slot: 0 }),
            Instruction::new(16, Opcode::Return { with_value: false }),
        ],
    );
    code.exceptions.push(ExceptionEntry {
        start: 2,
        end: 6,
        handler: 6,
        exception_type: None,
    });
    code
}

fn bench_decompile_method(c: &mut Criterion) {
    let shapes: Vec<(&str, MethodCode)> = vec![
        ("linear_64", linear_method(64)),
        ("loops_16", loop_ladder(16)),
        ("finally", finally_method()),
    ];

    let mut group = c.benchmark_group("decompile_method");
    for (name, code) in &shapes {
        group.throughput(Throughput::Elements(code.instructions.len() as u64));
        group.bench_function(*name, |b| {
            b.iter(|| {
                let sink = WarningSink::new();
                let out = decompile_method(
                    black_box(code.clone()),
                    DecompileOptions::new(),
                    &sink,
                )
                .expect("pipeline failed");
                black_box(out)
            });
        });
    }
    group.finish();
}

fn bench_decompile_all(c: &mut Criterion) {
    let methods: Vec<MethodCode> = (0..64).map(|_| loop_ladder(4)).collect();

    let mut group = c.benchmark_group("decompile_all");
    group.throughput(Throughput::Elements(methods.len() as u64));
    group.bench_function("loops_4_x64", |b| {
        b.iter(|| {
            let sink = std::sync::Arc::new(WarningSink::new());
            let results = decompile_all(
                black_box(methods.clone()),
                DecompileOptions::new(),
                &sink,
            );
            black_box(results)
        });
    });
    group.finish();
}

criterion_group!(benches, bench_decompile_method, bench_decompile_all);
criterion_main!(benches);
