use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use weft_bytecode::{access, CodeBody, CodeUnit, Insn, MemberRef, MethodDef, Opcode};

fn sample_unit(methods: usize) -> CodeUnit {
    let mut unit = CodeUnit::new("bench/Sample", Some("weft/Object".to_string()));
    let callee = unit
        .constants
        .intern_member(&MemberRef::new("bench/Sample", "helper", "(I)I"));

    for i in 0..methods {
        let body = CodeBody {
            insns: vec![
                Insn::load(1),
                Insn::member(Opcode::InvokeStatic, callee),
                Insn::op(Opcode::Return),
            ],
            handlers: Vec::new(),
        };
        let (code, handlers) = body.encode().unwrap();
        let mut method = MethodDef::new(access::PUBLIC, format!("m{}", i), "(I)I");
        method.code = code;
        method.handlers = handlers;
        method.max_stack = 1;
        method.max_locals = 2;
        unit.methods.push(method);
    }
    unit
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("unit_encode");
    for methods in [1usize, 16, 128] {
        let unit = sample_unit(methods);
        group.throughput(Throughput::Elements(methods as u64));
        group.bench_with_input(BenchmarkId::from_parameter(methods), &unit, |b, unit| {
            b.iter(|| black_box(unit).encode());
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("unit_decode");
    for methods in [1usize, 16, 128] {
        let bytes = sample_unit(methods).encode();
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(methods), &bytes, |b, bytes| {
            b.iter(|| CodeUnit::decode(black_box(bytes)).unwrap());
        });
    }
    group.finish();
}

fn bench_body_rewrite(c: &mut Criterion) {
    let unit = sample_unit(1);
    let method = &unit.methods[0];

    c.bench_function("body_decode_rewrite_encode", |b| {
        b.iter(|| {
            let body = CodeBody::decode(black_box(&method.code), &method.handlers).unwrap();
            let (rewritten, _) = body.rewrite(vec![Insn::op(Opcode::Nop)], |_, insn, out| {
                out.emit(*insn);
            });
            rewritten.encode().unwrap()
        });
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_body_rewrite);
criterion_main!(benches);
