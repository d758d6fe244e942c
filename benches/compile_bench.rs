//! Benchmarks for ArniComp compilation, assembly, and execution

use arnicomp::asm::assemble;
use arnicomp::compiler::compile_source;
use arnicomp::emulator::Cpu;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

const VAR_START: u16 = 0;
const VAR_END: u16 = 200;
const SCRATCH: u16 = 250;

/// Benchmark compile time for a loop body of varying statement counts.
fn bench_compile_time(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile_time");

    for &size in &[1, 8, 16, 32, 64] {
        let source = loop_source(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("{size}_statements"), |b| {
            b.iter(|| {
                let result = compile_source(black_box(&source), VAR_START, VAR_END, SCRATCH);
                black_box(result)
            })
        });
    }

    group.finish();
}

/// Benchmark the two-pass assembler on a representative program.
fn bench_assembler(c: &mut Criterion) {
    let source = r#"
        LDI #0
        MOV RD,RA
    loop:
        LDI #1
        ADD RA
        MOV RD,ACC
        LDI #100
        SUB RA
        JNE @loop
        HLT
    "#;

    c.bench_function("assemble_counting_loop", |b| {
        b.iter(|| {
            let result = assemble(black_box(source));
            black_box(result)
        })
    });
}

/// Benchmark end-to-end emulation of a counting loop.
fn bench_emulator(c: &mut Criterion) {
    let source = r#"
        LDI #0
        MOV RD,RA
    loop:
        LDI #1
        ADD RA
        MOV RD,ACC
        LDI #100
        SUB RA
        JNE @loop
        HLT
    "#;
    let bytes = assemble(source).unwrap();

    c.bench_function("run_counting_loop", |b| {
        b.iter(|| {
            let mut cpu = Cpu::new();
            cpu.load_program(black_box(&bytes), 0);
            let cycles = cpu.run(10_000);
            black_box(cycles)
        })
    });
}

fn loop_source(statements: usize) -> String {
    let mut src = String::from("volatile byte out = 0\nbyte i = 0\n");
    for n in 0..statements {
        src.push_str(&format!("byte t{n} = {n}\nout = out + t{n}\n"));
    }
    src
}

criterion_group!(benches, bench_compile_time, bench_assembler, bench_emulator);
criterion_main!(benches);
