use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use udon_bytecode::{assemble, verify_program, Program, ProgramBuilder, TypeTag, Value};

const SOURCE: &str = r#"
.data_start
    .export count
    count: %SystemInt32, 0
    step: %SystemInt32, 1
.data_end
.code_start
    .export _interact
    _interact:
        PUSH, count
        PUSH, step
        PUSH, count
        EXTERN, "SystemInt32.__op_Addition__SystemInt32_SystemInt32__SystemInt32"
        JUMP, 0xFFFFFFFC
.code_end
"#;

fn build_program(variables: u32) -> Program {
    let mut builder = ProgramBuilder::new("bench");
    for i in 0..variables {
        builder
            .variable(format!("v{i}"), TypeTag::Int32, Value::Int32(i as i32))
            .unwrap();
    }
    builder.entry_point("_start", true).unwrap();
    for i in 0..variables {
        builder.code().emit_push(i);
        builder.code().emit_pop();
    }
    builder.code().emit_halt();
    builder.build()
}

fn bench_assemble(c: &mut Criterion) {
    c.bench_function("assemble_counter", |b| {
        b.iter(|| assemble("counter", black_box(SOURCE)).unwrap());
    });
}

fn bench_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("program_encoding");
    for &variables in &[16_u32, 256, 4096] {
        let program = build_program(variables);
        let bytes = program.encode();

        group.bench_with_input(BenchmarkId::new("encode", variables), &program, |b, p| {
            b.iter(|| black_box(p.encode()));
        });
        group.bench_with_input(BenchmarkId::new("decode", variables), &bytes, |b, bytes| {
            b.iter(|| Program::decode(black_box(bytes)).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("verify", variables), &program, |b, p| {
            b.iter(|| verify_program(black_box(p)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_assemble, bench_encode_decode);
criterion_main!(benches);
