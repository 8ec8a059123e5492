//! kernel-rt: host-side runtime for JIT-specialized GPU/multicore kernels.
//!
//! This crate provides the layer around externally supplied kernel source:
//! - **Program Cache**: compile once per {context, device, options, source},
//!   shared by every caller, safe under concurrency
//! - **Execution Control**: per-call backend choice (serial, multicore,
//!   accelerated), the canonical compilation key and pooled scratch buffers
//! - **Profiler**: trial/step timing with cold-run exclusion and sample
//!   standard deviations, rendered as a nested log or JSON
//!
//! # Quick Start
//!
//! ```ignore
//! use kernel_rt::{acquire_kernels, ExecutionControl, KernelRequest, ProgramCache};
//!
//! let ctl = ExecutionControl::get_default();
//! let request = KernelRequest::new(SORT_TEMPLATE)
//!     .kernel("sort")
//!     .user_type::<u32>(&registry)?
//!     .instantiation(SORT_U32);
//! let kernels = acquire_kernels(&ctl, ProgramCache::global(), &driver, &request)?;
//! ```

pub mod buffers;
pub mod compiler;
pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod profiling;

pub use compiler::{
    acquire_kernels, BuildSettings, CacheStats, CompilationKey, CompileRequest, KernelRequest, KernelType,
    ProgramCache, ProgramCompiler, TypeRegistry,
};
pub use buffers::{BufferAllocator, BufferPool, MemFlags, PooledBuffer};
pub use config::RuntimeConfig;
pub use control::{DebugFlags, ExecutionControl, RunMode};
pub use device::{CommandQueue, ContextId, DeviceInfo, DeviceKind};
pub use error::{CompileFailure, ProfileError, ProfileResult, RuntimeError, RuntimeResult};
pub use profiling::{Attribute, Profiler};
