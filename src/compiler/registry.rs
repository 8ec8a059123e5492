//! Type registry: maps a Rust type to the name and source fragment that the
//! kernel source uses for it.
//!
//! Two ways in:
//! - compile-time, by implementing [`KernelType`] (or the `kernel_type!`
//!   macro);
//! - run-time, by calling [`TypeRegistry::register`] with explicit strings.

use std::any::TypeId;
use std::collections::HashMap;

use crate::error::{RuntimeError, RuntimeResult};

/// A type usable as a kernel operand or functor.
pub trait KernelType: 'static {
    /// Name of the type in kernel source, e.g. `"float"` or `"MyFunctor"`.
    fn type_name() -> String;

    /// Source defining the type (struct/functor body). Empty for builtins.
    fn cl_code() -> String {
        String::new()
    }
}

/// Implement [`KernelType`] for a type with a fixed name and optional code.
///
/// ```
/// use kernel_rt::kernel_type;
///
/// struct Saxpy;
/// kernel_type!(Saxpy, "Saxpy", "typedef struct Saxpy { float a; } Saxpy;");
/// ```
#[macro_export]
macro_rules! kernel_type {
    ($ty:ty, $name:expr) => {
        impl $crate::compiler::KernelType for $ty {
            fn type_name() -> String {
                String::from($name)
            }
        }
    };
    ($ty:ty, $name:expr, $code:expr) => {
        impl $crate::compiler::KernelType for $ty {
            fn type_name() -> String {
                String::from($name)
            }
            fn cl_code() -> String {
                String::from($code)
            }
        }
    };
}

kernel_type!(i8, "char");
kernel_type!(u8, "uchar");
kernel_type!(i16, "short");
kernel_type!(u16, "ushort");
kernel_type!(i32, "int");
kernel_type!(u32, "uint");
kernel_type!(i64, "long");
kernel_type!(u64, "ulong");
kernel_type!(f32, "float");
kernel_type!(f64, "double");

/// Name and source fragment of one registered type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeEntry {
    pub name: String,
    pub code: String,
}

/// Run-time registry keyed by `TypeId`.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    entries: HashMap<TypeId, TypeEntry>,
}

impl TypeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the scalar builtins.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_kernel_type::<i8>();
        registry.register_kernel_type::<u8>();
        registry.register_kernel_type::<i16>();
        registry.register_kernel_type::<u16>();
        registry.register_kernel_type::<i32>();
        registry.register_kernel_type::<u32>();
        registry.register_kernel_type::<i64>();
        registry.register_kernel_type::<u64>();
        registry.register_kernel_type::<f32>();
        registry.register_kernel_type::<f64>();
        registry
    }

    /// Register `T` under an explicit name and source fragment.
    ///
    /// Re-registering replaces the previous entry.
    pub fn register<T: 'static>(&mut self, name: impl Into<String>, code: impl Into<String>) {
        let entry = TypeEntry {
            name: name.into(),
            code: code.into(),
        };
        if let Some(previous) = self.entries.insert(TypeId::of::<T>(), entry) {
            log::debug!(
                "Replaced kernel type entry {} for {}",
                previous.name,
                std::any::type_name::<T>()
            );
        }
    }

    /// Register `T` using its [`KernelType`] implementation.
    pub fn register_kernel_type<T: KernelType>(&mut self) {
        self.register::<T>(T::type_name(), T::cl_code());
    }

    pub fn get<T: 'static>(&self) -> Option<&TypeEntry> {
        self.entries.get(&TypeId::of::<T>())
    }

    /// Like [`get`](Self::get) but reports unregistered types as an error.
    pub fn lookup<T: 'static>(&self) -> RuntimeResult<&TypeEntry> {
        self.get::<T>()
            .ok_or_else(|| RuntimeError::UnknownType(std::any::type_name::<T>().to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
