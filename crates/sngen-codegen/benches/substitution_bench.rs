//! Benchmarks for the substitution-engine hot paths

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use sngen_codegen::{ensure_ftype, function_substitute, substitute};
use sngen_model::Precision;

fn sample_code() -> String {
    let mut code = String::new();
    for i in 0..64 {
        code.push_str(&format!(
            "scalar alpha{i} = $(Isyn) * 0.125 + exp(-DT / 20.0) * $(V) + {i}.5e-3;\n",
            i = i
        ));
    }
    code
}

fn bench_ensure_ftype(c: &mut Criterion) {
    let code = sample_code();
    c.bench_function("ensure_ftype_single", |b| {
        b.iter(|| {
            let mut buf = code.clone();
            ensure_ftype(black_box(&mut buf), Precision::Float);
            buf
        })
    });
    c.bench_function("ensure_ftype_double", |b| {
        b.iter(|| {
            let mut buf = code.clone();
            ensure_ftype(black_box(&mut buf), Precision::Double);
            buf
        })
    });
}

fn bench_substitute(c: &mut Criterion) {
    let code = sample_code();
    c.bench_function("substitute_vars", |b| {
        b.iter(|| {
            let mut buf = code.clone();
            substitute(black_box(&mut buf), "$(V)", "lV");
            substitute(black_box(&mut buf), "$(Isyn)", "Isyn");
            buf
        })
    });
}

fn bench_function_substitute(c: &mut Criterion) {
    let mut code = String::new();
    for _ in 0..64 {
        code.push_str("$(addToInSyn, $(g) * ($(V) + 1.0));\n");
    }
    c.bench_function("function_substitute", |b| {
        b.iter(|| {
            let mut buf = code.clone();
            function_substitute(
                black_box(&mut buf),
                "addToInSyn",
                1,
                "atomicAdd(&inSyn[i], $(0))",
            )
            .unwrap();
            buf
        })
    });
}

criterion_group!(
    benches,
    bench_ensure_ftype,
    bench_substitute,
    bench_function_substitute
);
criterion_main!(benches);
