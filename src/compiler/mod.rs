//! JIT compilation layer: keys, the compiler seam, the program cache and the
//! kernel-acquisition glue.
//!
//! # Pipeline
//!
//! ```text
//! KernelType ─┐
//! (registry)  ├─► KernelRequest ─► ExecutionControl::compilation_key_for
//! template ───┘                              │
//!                                            ▼
//!                     ProgramCache::acquire ─► ProgramCompiler::compile (miss only)
//!                                            │
//!                                            ▼
//!                     ProgramCompiler::entry_point("<name>Instantiated")
//! ```

pub mod cache;
pub mod kernels;
pub mod registry;

pub use cache::{CacheStats, ProgramCache};
pub use kernels::{acquire_kernels, KernelRequest, INSTANTIATED_SUFFIX};
pub use registry::{KernelType, TypeEntry, TypeRegistry};

use std::fmt;

use crate::control::DebugFlags;
use crate::device::ContextId;
use crate::error::CompileFailure;

/// Identity of one JIT-compiled artifact.
///
/// Ordering compares context, then device, then options, then source, so the
/// cache can keep entries in an ordered map.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompilationKey {
    context: ContextId,
    device: String,
    options: String,
    source: String,
}

impl CompilationKey {
    pub fn new(
        context: ContextId,
        device: impl Into<String>,
        options: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            context,
            device: device.into(),
            options: options.into(),
            source: source.into(),
        }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn options(&self) -> &str {
        &self.options
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for CompilationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Sources run to kilobytes; print the length only.
        write!(
            f,
            "CompilationKey({}, {}, {:?}, {} bytes of source)",
            self.context,
            self.device,
            self.options,
            self.source.len()
        )
    }
}

/// Per-call build settings that travel beside the key, never inside it.
///
/// Two requests differing only here resolve to the same cached program: the
/// program serves the key's device whether it was also built for the rest of
/// the context or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildSettings {
    pub debug: DebugFlags,
    /// Build for every device in the key's context, not just the key's one.
    pub all_devices: bool,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            debug: DebugFlags::NONE,
            all_devices: true,
        }
    }
}

impl From<DebugFlags> for BuildSettings {
    fn from(debug: DebugFlags) -> Self {
        Self {
            debug,
            ..Self::default()
        }
    }
}

/// Everything a compiler sees for one compilation.
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    pub key: &'a CompilationKey,
    pub debug: DebugFlags,
    /// Whether the driver should target every device in the context.
    pub all_devices: bool,
}

/// The external JIT primitive.
///
/// Implementations wrap a real driver (OpenCL `clBuildProgram`, NVRTC, ...)
/// or, in tests, a scripted fake.
pub trait ProgramCompiler: Send + Sync {
    type Program: Send + Sync;
    type Kernel;

    /// Compile `request.key.source()` for the key's context and device, or
    /// for all of the context's devices when `request.all_devices` is set.
    fn compile(&self, request: &CompileRequest<'_>) -> Result<Self::Program, CompileFailure>;

    /// Extract one kernel entry point from a compiled program.
    fn entry_point(&self, program: &Self::Program, name: &str) -> Result<Self::Kernel, CompileFailure>;
}
