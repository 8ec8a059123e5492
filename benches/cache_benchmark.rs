//! Benchmark program-cache lookup cost and key construction.
//!
//! Run with: cargo bench --bench cache_benchmark

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kernel_rt::compiler::{CompileRequest, ProgramCache, ProgramCompiler};
use kernel_rt::{CommandQueue, CompileFailure, ContextId, DebugFlags, DeviceInfo, DeviceKind, ExecutionControl};

struct NullCompiler;

impl ProgramCompiler for NullCompiler {
    type Program = usize;
    type Kernel = ();

    fn compile(&self, request: &CompileRequest<'_>) -> Result<usize, CompileFailure> {
        Ok(request.key.source().len())
    }

    fn entry_point(&self, _program: &usize, _name: &str) -> Result<(), CompileFailure> {
        Ok(())
    }
}

/// Kernel source of roughly `bytes` bytes, distinct per `seed`.
fn synthetic_source(bytes: usize, seed: usize) -> String {
    let mut s = format!("// variant {seed}\n");
    while s.len() < bytes {
        s.push_str("kernel void k(global int* x) { x[get_global_id(0)] += 1; }\n");
    }
    s
}

fn bench_cache_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_hit");
    let ctx = ContextId::from_raw(1);

    for entries in [1usize, 64, 1024] {
        let cache = ProgramCache::new();
        let sources: Vec<String> = (0..entries).map(|i| synthetic_source(4096, i)).collect();
        for src in &sources {
            cache.acquire(&NullCompiler, ctx, "gpu0", "-O2", src, DebugFlags::NONE).unwrap();
        }
        let lookup = &sources[entries / 2];

        group.bench_with_input(BenchmarkId::from_parameter(entries), &entries, |b, _| {
            b.iter(|| {
                cache
                    .acquire(&NullCompiler, ctx, "gpu0", "-O2", black_box(lookup), DebugFlags::NONE)
                    .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_compilation_key(c: &mut Criterion) {
    let mut ctl = ExecutionControl::new(CommandQueue::new(
        ContextId::from_raw(2),
        DeviceInfo::new("gpu0", DeviceKind::Gpu),
    ));
    ctl.set_compile_options("-cl-mad-enable");
    let fragments = [synthetic_source(512, 0), synthetic_source(8192, 1), synthetic_source(256, 2)];

    c.bench_function("compilation_key_for_9k", |b| {
        b.iter(|| ctl.compilation_key_for(black_box(&fragments), "-O2"))
    });
}

criterion_group!(benches, bench_cache_hit, bench_compilation_key);
criterion_main!(benches);
