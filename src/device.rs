//! Device-side identities consumed by the cache and the execution control.
//!
//! Platform enumeration lives outside this crate; callers describe what they
//! enumerated with a [`ContextId`], a [`DeviceInfo`] and a [`CommandQueue`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

// Set on every id minted by `ContextId::new`. User-space handle values
// (pointers, driver ids) never carry it.
const GENERATED_TAG: u64 = 1 << 63;

/// Handle identity of an execution context.
///
/// Two ids are equal only if they name the same underlying context handle,
/// never because two contexts happen to look alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContextId(u64);

impl ContextId {
    /// Allocate a fresh, process-unique context id.
    ///
    /// Generated ids live in their own range (top bit set) and never equal a
    /// [`from_raw`](Self::from_raw) handle below `1 << 63`.
    pub fn new() -> Self {
        Self(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed) | GENERATED_TAG)
    }

    /// Wrap an existing runtime handle (e.g. a `cl_context` pointer value).
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Whether this id came from [`new`](Self::new).
    pub fn is_generated(&self) -> bool {
        self.0 & GENERATED_TAG != 0
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx:{:#x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Cpu,
    Gpu,
    Accelerator,
}

impl DeviceKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::Gpu => "GPU",
            Self::Accelerator => "Accelerator",
        }
    }

    /// Whether kernels on this device count as the accelerated backend.
    pub fn is_accelerated(&self) -> bool {
        matches!(self, Self::Gpu | Self::Accelerator)
    }
}

/// Description of one compute device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Stable identity string, e.g. "gpu0" or "Tahiti:32CU".
    pub id: String,
    pub kind: DeviceKind,
    pub compute_units: u32,
}

impl DeviceInfo {
    pub fn new(id: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            compute_units: 1,
        }
    }

    pub fn with_compute_units(mut self, compute_units: u32) -> Self {
        self.compute_units = compute_units;
        self
    }

    /// Host CPU as seen by the fallback paths.
    pub fn host() -> Self {
        let units = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);
        Self::new("host", DeviceKind::Cpu).with_compute_units(units)
    }
}

/// A command queue bound to one device of one context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandQueue {
    context: ContextId,
    device: DeviceInfo,
}

impl CommandQueue {
    pub fn new(context: ContextId, device: DeviceInfo) -> Self {
        Self { context, device }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_ids_unique() {
        let a = ContextId::new();
        let b = ContextId::new();
        assert_ne!(a, b);
        assert_eq!(ContextId::from_raw(a.raw()), a);
    }

    #[test]
    fn test_generated_ids_never_match_raw_handles() {
        let generated: Vec<ContextId> = (0..64).map(|_| ContextId::new()).collect();
        for id in &generated {
            assert!(id.is_generated());
            for raw in [0u64, 1, 2, 3, 64, 0x7fff_ffff_f000] {
                assert_ne!(*id, ContextId::from_raw(raw));
            }
        }
        assert!(!ContextId::from_raw(1).is_generated());
        assert!(!ContextId::from_raw(0x55d4_a1b2_c000).is_generated());
    }

    #[test]
    fn test_accelerated_kinds() {
        assert!(DeviceKind::Gpu.is_accelerated());
        assert!(DeviceKind::Accelerator.is_accelerated());
        assert!(!DeviceKind::Cpu.is_accelerated());
    }

    #[test]
    fn test_host_device() {
        let host = DeviceInfo::host();
        assert_eq!(host.kind, DeviceKind::Cpu);
        assert!(host.compute_units >= 1);
    }
}
