//! Program Cache + Profiler walkthrough
//!
//! Sorts a buffer several times through `ExecutionControl::dispatch`,
//! acquiring a (simulated) JIT kernel through the global program cache, and
//! prints the profiler summary. The first trial pays the compile cost and is
//! left out of the average.
//!
//! Run with: RUST_LOG=info cargo run --example profile_cache

use std::time::Duration;

use kernel_rt::compiler::{CompileRequest, KernelRequest, ProgramCache, ProgramCompiler, TypeRegistry};
use kernel_rt::profiling::{Attribute, Profiler};
use kernel_rt::{
    acquire_kernels, BufferAllocator, CompileFailure, ContextId, DebugFlags, ExecutionControl, MemFlags, RunMode,
    RuntimeResult,
};
use rayon::prelude::*;

const SORT_TEMPLATE: &str = "template <typename T> kernel void sortTemplate(global T* data) { /* ... */ }";

/// Stands in for a device driver: "compiling" takes 50 ms.
struct SimulatedDriver;

#[derive(Debug)]
struct SimulatedProgram {
    source_bytes: usize,
}

impl ProgramCompiler for SimulatedDriver {
    type Program = SimulatedProgram;
    type Kernel = String;

    fn compile(&self, request: &CompileRequest<'_>) -> Result<SimulatedProgram, CompileFailure> {
        if request.debug.contains(DebugFlags::PERSIST_INTERMEDIATE_ARTIFACTS) {
            log::info!("(would keep intermediate files for {})", request.key.device());
        }
        std::thread::sleep(Duration::from_millis(50));
        Ok(SimulatedProgram {
            source_bytes: request.key.source().len(),
        })
    }

    fn entry_point(&self, program: &SimulatedProgram, name: &str) -> Result<String, CompileFailure> {
        Ok(format!("{name} ({} bytes of source)", program.source_bytes))
    }
}

/// Host memory standing in for device buffers.
struct HostAllocator;

impl BufferAllocator for HostAllocator {
    type Buffer = Vec<u8>;

    fn allocate(&self, _context: ContextId, size: usize, _flags: MemFlags) -> RuntimeResult<Vec<u8>> {
        Ok(vec![0; size])
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let registry = TypeRegistry::with_builtins();
    let request = KernelRequest::new(SORT_TEMPLATE)
        .kernel("sort")
        .instantiation("template kernel void sortInstantiated(global {T}* data);")
        .bind_type::<u32>(&registry, "T")?;

    let ctl = ExecutionControl::get_default();
    let mut profiler = Profiler::new(format!("sort<{}>", registry.lookup::<u32>()?.name));

    let mut data: Vec<u32> = (0..1_000_000u32).map(|i| i.wrapping_mul(2_654_435_761)).collect();
    let bytes = (data.len() * std::mem::size_of::<u32>()) as f64;

    for _ in 0..6 {
        profiler.start_trial()?;
        profiler.set_step_name("acquire")?;
        let kernels = acquire_kernels(&ctl, ProgramCache::global(), &SimulatedDriver, &request)?;
        let scratch = ctl.acquire_buffer(&HostAllocator, bytes as usize, MemFlags::READ_WRITE)?;

        profiler.next_step()?;
        profiler.set_step_name("sort")?;
        profiler.set(Attribute::Memory, 2.0 * bytes)?;
        let mode = ctl.resolve_run_mode(data.len());
        data = ctl.dispatch(
            data.len(),
            || {
                let mut v = data.clone();
                v.sort_unstable();
                v
            },
            || {
                let mut v = data.clone();
                v.par_sort_unstable();
                v
            },
            || {
                // No device here: run the host path under the kernel's name.
                log::debug!("launching {} with {} scratch bytes", kernels[0], scratch.capacity());
                let mut v = data.clone();
                v.par_sort_unstable();
                v
            },
        );
        profiler.stop_trial()?;
        log::info!("trial done on {mode}");

        data.reverse();
    }
    profiler.end()?;

    println!("scratch pool: {} byte(s)", ctl.total_buffer_size());
    let stats = ProgramCache::<SimulatedProgram>::global().stats();
    println!("cache: {} compilation(s), {} hit(s)", stats.compilations, stats.hits);
    if ctl.force_run_mode() != RunMode::Automatic {
        println!("run mode forced to {}", ctl.force_run_mode());
    }

    profiler.write_sum(&mut std::io::stdout().lock())?;
    Ok(())
}
