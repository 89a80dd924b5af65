use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use weft_bytecode::{access, CodeBody, CodeUnit, Insn, MethodDef, Opcode};
use weft_weaver::{markers, CatalogHandle, Loader, MemoryLoader, RuleCatalog, TypeWorld, Weaver, WeaverConfig};

fn unit_with_methods(name: &str, methods: usize) -> CodeUnit {
    let mut unit = CodeUnit::new(name, Some("weft/Object".to_string()));
    let body = CodeBody {
        insns: vec![Insn::load(1), Insn::op(Opcode::Return)],
        handlers: Vec::new(),
    };
    let (code, _) = body.encode().unwrap();
    for i in 0..methods {
        let mut method = MethodDef::new(access::PUBLIC, format!("m{}", i), "(I)I");
        method.code = code.clone();
        method.max_stack = 1;
        method.max_locals = 2;
        unit.methods.push(method);
    }
    unit
}

fn advice_unit() -> CodeUnit {
    let mut unit = CodeUnit::new("bench/Advice", Some("weft/Object".to_string()));
    let (code, _) = CodeBody {
        insns: vec![Insn::op(Opcode::ReturnVoid)],
        handlers: Vec::new(),
    }
    .encode()
    .unwrap();
    for (name, marker) in [("before", markers::ON_BEFORE), ("after", markers::ON_AFTER)] {
        let mut method = MethodDef::new(access::PUBLIC | access::STATIC, name, "()V");
        method.markers.push(marker.to_string());
        method.code = code.clone();
        unit.methods.push(method);
    }
    unit
}

fn setup() -> (Weaver, Arc<dyn Loader>) {
    let loader = MemoryLoader::new(1, None)
        .with_unit("bench/Advice", advice_unit().encode())
        .into_handle();
    let catalog = RuleCatalog::from_json(
        r#"{ "advice": [{
            "advice": "bench/Advice",
            "pointcut": { "class_name": "bench/Woven*", "method_name": "*", "timer": "bench" }
        }] }"#,
        &loader,
    )
    .unwrap();
    let weaver = Weaver::new(
        Arc::new(CatalogHandle::new(catalog)),
        Arc::new(TypeWorld::new()),
        WeaverConfig::default(),
    );
    (weaver, loader)
}

fn bench_skip(c: &mut Criterion) {
    let (weaver, loader) = setup();
    let bytes = unit_with_methods("bench/Plain", 16).encode();
    c.bench_function("weave_unmatched", |b| {
        b.iter(|| weaver.transform(black_box(&bytes), "bench/Plain", None, &loader));
    });
}

fn bench_weave(c: &mut Criterion) {
    let (weaver, loader) = setup();
    let mut group = c.benchmark_group("weave_advised");
    for methods in [1usize, 16, 64] {
        let bytes = unit_with_methods("bench/Woven", methods).encode();
        group.throughput(Throughput::Elements(methods as u64));
        group.bench_with_input(BenchmarkId::from_parameter(methods), &bytes, |b, bytes| {
            b.iter(|| weaver.transform(black_box(bytes), "bench/Woven", None, &loader).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_skip, bench_weave);
criterion_main!(benches);
