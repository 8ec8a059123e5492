//! Per-call execution control.
//!
//! An [`ExecutionControl`] carries the bound command queue, the run-mode
//! override, debug flags and compile options for one algorithm invocation.
//! It decides which backend runs ([`ExecutionControl::resolve_run_mode`]) and
//! is the only authority for the [`CompilationKey`] the program cache sees
//! ([`ExecutionControl::compilation_key_for`]).
//!
//! ```
//! use kernel_rt::control::{ExecutionControl, RunMode};
//!
//! let mut ctl = ExecutionControl::get_default();
//! ctl.set_force_run_mode(RunMode::SerialFallback);
//! assert_eq!(ctl.resolve_run_mode(1 << 20), RunMode::SerialFallback);
//! ```

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::buffers::{BufferAllocator, BufferPool, MemFlags, PooledBuffer};
use crate::compiler::{BuildSettings, CompilationKey};
use crate::config::RuntimeConfig;
use crate::device::{CommandQueue, ContextId, DeviceInfo};
use crate::error::RuntimeResult;

/// Inputs shorter than this run serially under [`RunMode::Automatic`].
pub const DEFAULT_SERIAL_THRESHOLD: usize = 256;

/// Work-groups launched per compute unit unless overridden.
pub const DEFAULT_WG_PER_COMPUTE_UNIT: u32 = 8;

/// Backend choice for one algorithm invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunMode {
    Automatic,
    SerialFallback,
    MultiCoreFallback,
    Accelerated,
}

impl RunMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Automatic => "Automatic",
            Self::SerialFallback => "SerialCpu",
            Self::MultiCoreFallback => "MultiCoreCpu",
            Self::Accelerated => "Accelerated",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Debug annotations forwarded to the compiler. Never part of a cache key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DebugFlags(u32);

impl DebugFlags {
    pub const NONE: Self = Self(0);
    /// Log build status and options for every compilation.
    pub const COMPILE_DIAGNOSTICS: Self = Self(0x1);
    /// Log the full kernel source before compiling.
    pub const SHOW_CODE: Self = Self(0x2);
    /// Ask the compiler to keep its intermediate files.
    pub const PERSIST_INTERMEDIATE_ARTIFACTS: Self = Self(0x4);

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for DebugFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DebugFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for DebugFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::COMPILE_DIAGNOSTICS) {
            names.push("COMPILE_DIAGNOSTICS");
        }
        if self.contains(Self::SHOW_CODE) {
            names.push("SHOW_CODE");
        }
        if self.contains(Self::PERSIST_INTERMEDIATE_ARTIFACTS) {
            names.push("PERSIST_INTERMEDIATE_ARTIFACTS");
        }
        if names.is_empty() {
            write!(f, "DebugFlags(NONE)")
        } else {
            write!(f, "DebugFlags({})", names.join(" | "))
        }
    }
}

/// Execution control for one algorithm call.
///
/// Clone it before mutating on another thread; the program cache it leads to
/// is shared, the control itself is not. Clones also share the control's
/// [`BufferPool`].
#[derive(Debug, Clone)]
pub struct ExecutionControl {
    queue: CommandQueue,
    run_mode: RunMode,
    debug: DebugFlags,
    compile_options: String,
    compile_for_all_devices: bool,
    wg_per_compute_unit: u32,
    serial_threshold: usize,
    buffers: Arc<BufferPool>,
}

static DEFAULT_CONTROL: OnceLock<RwLock<ExecutionControl>> = OnceLock::new();

fn default_slot() -> &'static RwLock<ExecutionControl> {
    DEFAULT_CONTROL.get_or_init(|| {
        let config = RuntimeConfig::global();
        let queue = CommandQueue::new(ContextId::new(), DeviceInfo::host());
        let mut ctl = ExecutionControl::new(queue);
        ctl.run_mode = config.run_mode;
        ctl.debug = config.debug;
        ctl.compile_options = config.compile_options.clone();
        ctl.serial_threshold = config.serial_threshold;
        log::debug!("Default execution control: {ctl:?}");
        RwLock::new(ctl)
    })
}

impl ExecutionControl {
    /// Control bound to `queue` with every other field at its default.
    pub fn new(queue: CommandQueue) -> Self {
        Self {
            queue,
            run_mode: RunMode::Automatic,
            debug: DebugFlags::NONE,
            compile_options: String::new(),
            compile_for_all_devices: true,
            wg_per_compute_unit: DEFAULT_WG_PER_COMPUTE_UNIT,
            serial_threshold: DEFAULT_SERIAL_THRESHOLD,
            buffers: Arc::new(BufferPool::new()),
        }
    }

    /// Copy of the process-wide default control.
    ///
    /// Seeded from [`RuntimeConfig::global`] and bound to the host device
    /// until [`set_default`](Self::set_default) installs a real queue.
    pub fn get_default() -> Self {
        default_slot()
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the process-wide default control.
    pub fn set_default(ctl: ExecutionControl) {
        let mut slot = default_slot().write().unwrap_or_else(PoisonError::into_inner);
        log::info!(
            "Default execution control now targets {} ({})",
            ctl.queue.device().id,
            ctl.queue.device().kind.name()
        );
        *slot = ctl;
    }

    // ── getters ─────────────────────────────────────────────────────

    pub fn command_queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn context(&self) -> ContextId {
        self.queue.context()
    }

    pub fn device(&self) -> &DeviceInfo {
        self.queue.device()
    }

    pub fn force_run_mode(&self) -> RunMode {
        self.run_mode
    }

    pub fn debug(&self) -> DebugFlags {
        self.debug
    }

    pub fn compile_options(&self) -> &str {
        &self.compile_options
    }

    pub fn compile_for_all_devices(&self) -> bool {
        self.compile_for_all_devices
    }

    pub fn wg_per_compute_unit(&self) -> u32 {
        self.wg_per_compute_unit
    }

    pub fn serial_threshold(&self) -> usize {
        self.serial_threshold
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffers
    }

    // ── setters ─────────────────────────────────────────────────────

    pub fn set_command_queue(&mut self, queue: CommandQueue) {
        self.queue = queue;
    }

    pub fn set_force_run_mode(&mut self, mode: RunMode) {
        self.run_mode = mode;
    }

    pub fn set_debug(&mut self, debug: DebugFlags) {
        self.debug = debug;
    }

    pub fn set_compile_options(&mut self, options: impl Into<String>) {
        self.compile_options = options.into();
    }

    pub fn set_compile_for_all_devices(&mut self, all: bool) {
        self.compile_for_all_devices = all;
    }

    pub fn set_wg_per_compute_unit(&mut self, wg: u32) {
        self.wg_per_compute_unit = wg.max(1);
    }

    pub fn set_serial_threshold(&mut self, threshold: usize) {
        self.serial_threshold = threshold;
    }

    /// Draw scratch buffers from `pool` instead of the one this control was
    /// created (or cloned) with.
    pub fn set_buffer_pool(&mut self, pool: Arc<BufferPool>) {
        self.buffers = pool;
    }

    // ── scratch buffers ─────────────────────────────────────────────

    /// Scratch buffer of at least `size` bytes in this control's context,
    /// reused from the pool when a free one is large enough.
    pub fn acquire_buffer<A: BufferAllocator>(
        &self,
        allocator: &A,
        size: usize,
        flags: MemFlags,
    ) -> RuntimeResult<PooledBuffer<A::Buffer>> {
        self.buffers.acquire(allocator, self.context(), size, flags)
    }

    /// Release every pooled buffer.
    pub fn free_buffers(&self) {
        self.buffers.free_buffers();
    }

    /// Bytes held by the pool, in use or not.
    pub fn total_buffer_size(&self) -> usize {
        self.buffers.total_buffer_size()
    }

    // ── decisions ───────────────────────────────────────────────────

    /// Backend for an input of `len` elements. Never returns `Automatic`.
    ///
    /// A forced mode is returned as-is whatever the size.
    pub fn resolve_run_mode(&self, len: usize) -> RunMode {
        match self.run_mode {
            RunMode::Automatic => self.automatic_run_mode(len, rayon::current_num_threads()),
            forced => forced,
        }
    }

    fn automatic_run_mode(&self, len: usize, worker_threads: usize) -> RunMode {
        if len < self.serial_threshold {
            RunMode::SerialFallback
        } else if self.device().kind.is_accelerated() {
            RunMode::Accelerated
        } else if worker_threads > 1 {
            RunMode::MultiCoreFallback
        } else {
            RunMode::SerialFallback
        }
    }

    /// Cache key for `source_fragments` compiled with `options`.
    ///
    /// - context and device come from the bound queue;
    /// - options are the caller's options followed by this control's extra
    ///   options, single-space separated, blanks dropped;
    /// - source is the fragments joined by a blank line, in the given order.
    ///
    /// Debug flags are deliberately absent.
    pub fn compilation_key_for<S: AsRef<str>>(&self, source_fragments: &[S], options: &str) -> CompilationKey {
        let options = [options.trim(), self.compile_options.trim()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let source = source_fragments
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join("\n\n");

        CompilationKey::new(self.context(), self.device().id.clone(), options, source)
    }

    /// Settings handed to the compiler beside the key.
    pub fn build_settings(&self) -> BuildSettings {
        BuildSettings {
            debug: self.debug,
            all_devices: self.compile_for_all_devices,
        }
    }

    /// Work-group count for the bound device.
    pub fn num_work_groups(&self) -> usize {
        self.device().compute_units.max(1) as usize * self.wg_per_compute_unit as usize
    }

    /// Run exactly one of the three backends, chosen by
    /// [`resolve_run_mode`](Self::resolve_run_mode).
    pub fn dispatch<R>(
        &self,
        len: usize,
        serial: impl FnOnce() -> R,
        multicore: impl FnOnce() -> R,
        accelerated: impl FnOnce() -> R,
    ) -> R {
        let mode = self.resolve_run_mode(len);
        log::trace!("Dispatching {len} elements to {mode}");
        match mode {
            RunMode::SerialFallback | RunMode::Automatic => serial(),
            RunMode::MultiCoreFallback => multicore(),
            RunMode::Accelerated => accelerated(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceKind;

    fn gpu_control() -> ExecutionControl {
        let device = DeviceInfo::new("gpu0", DeviceKind::Gpu).with_compute_units(32);
        ExecutionControl::new(CommandQueue::new(ContextId::from_raw(0xA), device))
    }

    fn cpu_control() -> ExecutionControl {
        let device = DeviceInfo::new("cpu0", DeviceKind::Cpu).with_compute_units(16);
        ExecutionControl::new(CommandQueue::new(ContextId::from_raw(0xB), device))
    }

    #[test]
    fn test_forced_modes_are_authoritative() {
        let mut ctl = gpu_control();
        for mode in [RunMode::SerialFallback, RunMode::MultiCoreFallback, RunMode::Accelerated] {
            ctl.set_force_run_mode(mode);
            for len in [0, 1, 255, 256, 1 << 24] {
                assert_eq!(ctl.resolve_run_mode(len), mode);
            }
        }
    }

    #[test]
    fn test_automatic_small_input_is_serial() {
        let ctl = gpu_control();
        assert_eq!(ctl.resolve_run_mode(0), RunMode::SerialFallback);
        assert_eq!(ctl.resolve_run_mode(DEFAULT_SERIAL_THRESHOLD - 1), RunMode::SerialFallback);
        assert_eq!(ctl.resolve_run_mode(DEFAULT_SERIAL_THRESHOLD), RunMode::Accelerated);
    }

    #[test]
    fn test_automatic_without_accelerator() {
        let ctl = cpu_control();
        assert_eq!(ctl.automatic_run_mode(1 << 20, 8), RunMode::MultiCoreFallback);
        assert_eq!(ctl.automatic_run_mode(1 << 20, 1), RunMode::SerialFallback);
        assert_eq!(ctl.automatic_run_mode(10, 8), RunMode::SerialFallback);
    }

    #[test]
    fn test_serial_threshold_override() {
        let mut ctl = gpu_control();
        ctl.set_serial_threshold(0);
        assert_eq!(ctl.resolve_run_mode(0), RunMode::Accelerated);
    }

    #[test]
    fn test_compilation_key_layout() {
        let mut ctl = gpu_control();
        ctl.set_compile_options("-cl-mad-enable");
        let key = ctl.compilation_key_for(&["typedef int T;", "kernel void k() {}"], " -O2 ");

        assert_eq!(key.context(), ContextId::from_raw(0xA));
        assert_eq!(key.device(), "gpu0");
        assert_eq!(key.options(), "-O2 -cl-mad-enable");
        assert_eq!(key.source(), "typedef int T;\n\nkernel void k() {}");
    }

    #[test]
    fn test_compilation_key_deterministic() {
        let ctl = gpu_control();
        let fragments = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            ctl.compilation_key_for(&fragments, "-O2"),
            ctl.compilation_key_for(&["a", "b"], "-O2")
        );
        assert_eq!(ctl.compilation_key_for(&["a"], "").options(), "");
    }

    #[test]
    fn test_debug_flags_excluded_from_key() {
        let plain = gpu_control();
        let mut noisy = plain.clone();
        noisy.set_debug(DebugFlags::COMPILE_DIAGNOSTICS | DebugFlags::PERSIST_INTERMEDIATE_ARTIFACTS);
        assert_eq!(
            plain.compilation_key_for(&["src"], "-O2"),
            noisy.compilation_key_for(&["src"], "-O2")
        );
    }

    #[test]
    fn test_debug_flag_ops() {
        let mut flags = DebugFlags::NONE;
        assert!(flags.is_empty());
        flags |= DebugFlags::SHOW_CODE;
        assert!(flags.contains(DebugFlags::SHOW_CODE));
        assert!(!flags.contains(DebugFlags::COMPILE_DIAGNOSTICS));
        assert_eq!(format!("{flags:?}"), "DebugFlags(SHOW_CODE)");
    }

    #[test]
    fn test_dispatch_runs_selected_backend() {
        let mut ctl = gpu_control();
        ctl.set_force_run_mode(RunMode::MultiCoreFallback);
        let picked = ctl.dispatch(1024, || "serial", || "multicore", || "accelerated");
        assert_eq!(picked, "multicore");

        ctl.set_force_run_mode(RunMode::Automatic);
        assert_eq!(ctl.dispatch(4, || "serial", || "multicore", || "accelerated"), "serial");
        assert_eq!(ctl.dispatch(4096, || "serial", || "multicore", || "accelerated"), "accelerated");
    }

    #[test]
    fn test_work_groups() {
        let mut ctl = gpu_control();
        assert_eq!(ctl.num_work_groups(), 32 * 8);
        ctl.set_wg_per_compute_unit(0);
        assert_eq!(ctl.wg_per_compute_unit(), 1);
    }

    #[derive(Default)]
    struct HostAllocator {
        allocations: std::sync::atomic::AtomicUsize,
    }

    impl BufferAllocator for HostAllocator {
        type Buffer = Vec<u8>;

        fn allocate(&self, _context: ContextId, size: usize, _flags: MemFlags) -> RuntimeResult<Vec<u8>> {
            self.allocations.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(vec![0; size])
        }
    }

    #[test]
    fn test_clones_share_buffer_pool() {
        let ctl = gpu_control();
        let copy = ctl.clone();
        let alloc = HostAllocator::default();

        drop(ctl.acquire_buffer(&alloc, 4096, MemFlags::READ_WRITE).unwrap());
        let reused = copy.acquire_buffer(&alloc, 1024, MemFlags::READ_WRITE).unwrap();
        assert_eq!(reused.len(), 4096);
        assert_eq!(alloc.allocations.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(copy.total_buffer_size(), 4096);

        let mut separate = copy.clone();
        separate.set_buffer_pool(Arc::new(BufferPool::new()));
        assert_eq!(separate.total_buffer_size(), 0);

        drop(reused);
        ctl.free_buffers();
        assert_eq!(copy.total_buffer_size(), 0);
    }

    #[test]
    fn test_buffers_keyed_by_bound_context() {
        let mut ctl = gpu_control();
        let alloc = HostAllocator::default();

        drop(ctl.acquire_buffer(&alloc, 64, MemFlags::READ_WRITE).unwrap());
        ctl.set_command_queue(CommandQueue::new(ContextId::from_raw(0xC), DeviceInfo::host()));
        drop(ctl.acquire_buffer(&alloc, 64, MemFlags::READ_WRITE).unwrap());

        assert_eq!(alloc.allocations.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(ctl.buffer_pool().len(), 2);
    }

    #[test]
    fn test_default_control_is_a_copy() {
        let mut ctl = ExecutionControl::get_default();
        ctl.set_force_run_mode(RunMode::Accelerated);
        ctl.set_compile_options("-DLOCAL_COPY");
        let fresh = ExecutionControl::get_default();
        assert_ne!(fresh.compile_options(), "-DLOCAL_COPY");
    }
}
