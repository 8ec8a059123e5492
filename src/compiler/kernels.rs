//! Kernel acquisition: assemble the full source for a templated algorithm,
//! fetch (or compile) its program through the cache and pull out the
//! instantiated entry points.

use crate::compiler::{ProgramCache, ProgramCompiler, TypeRegistry};
use crate::control::ExecutionControl;
use crate::error::{RuntimeError, RuntimeResult};

/// Suffix appended to every kernel name to form its entry point.
pub const INSTANTIATED_SUFFIX: &str = "Instantiated";

/// Everything needed to build one templated program.
#[derive(Debug, Clone, Default)]
pub struct KernelRequest {
    kernel_names: Vec<String>,
    user_code: Vec<String>,
    template: String,
    instantiation: String,
    options: String,
}

impl KernelRequest {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            ..Self::default()
        }
    }

    /// Add a kernel to extract; its entry point is `name + "Instantiated"`.
    pub fn kernel(mut self, name: impl Into<String>) -> Self {
        self.kernel_names.push(name.into());
        self
    }

    /// Prepend user code (type definitions, functors) ahead of the template.
    pub fn user_code(mut self, code: impl Into<String>) -> Self {
        let code = code.into();
        if !code.trim().is_empty() {
            self.user_code.push(code);
        }
        self
    }

    /// Add the source fragment registered for `T`, if it has one.
    pub fn user_type<T: 'static>(self, registry: &TypeRegistry) -> RuntimeResult<Self> {
        let code = registry.lookup::<T>()?.code.clone();
        Ok(self.user_code(code))
    }

    /// Template instantiation appended after the template body.
    pub fn instantiation(mut self, instantiation: impl Into<String>) -> Self {
        self.instantiation = instantiation.into();
        self
    }

    /// Bind the type parameter `placeholder` to `T`: every `{placeholder}`
    /// in the instantiation becomes the name `T` is registered under, and
    /// the type's source fragment (if any) is added as user code.
    ///
    /// Set the instantiation first; unbound placeholders are left as is.
    pub fn bind_type<T: 'static>(
        mut self,
        registry: &TypeRegistry,
        placeholder: &str,
    ) -> RuntimeResult<Self> {
        let entry = registry.lookup::<T>()?;
        self.instantiation = self
            .instantiation
            .replace(&format!("{{{placeholder}}}"), &entry.name);
        Ok(self.user_code(entry.code.clone()))
    }

    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.options = options.into();
        self
    }

    pub fn kernel_names(&self) -> &[String] {
        &self.kernel_names
    }

    /// Source fragments in compile order: user code, template, instantiation.
    pub fn fragments(&self) -> Vec<&str> {
        self.user_code
            .iter()
            .map(String::as_str)
            .chain([self.template.as_str(), self.instantiation.as_str()])
            .filter(|fragment| !fragment.is_empty())
            .collect()
    }
}

/// Fetch the program for `request` and extract one kernel per name, in order.
pub fn acquire_kernels<C>(
    ctl: &ExecutionControl,
    cache: &ProgramCache<C::Program>,
    compiler: &C,
    request: &KernelRequest,
) -> RuntimeResult<Vec<C::Kernel>>
where
    C: ProgramCompiler,
{
    let key = ctl.compilation_key_for(&request.fragments(), &request.options);
    let program = cache.acquire_key(compiler, &key, ctl.build_settings())?;

    request
        .kernel_names
        .iter()
        .map(|name| {
            let entry = format!("{name}{INSTANTIATED_SUFFIX}");
            compiler
                .entry_point(&program, &entry)
                .map_err(|failure| RuntimeError::EntryPointMissing {
                    name: entry,
                    diagnostic: failure.diagnostic,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompileRequest;
    use crate::device::{CommandQueue, ContextId, DeviceInfo, DeviceKind};
    use crate::error::CompileFailure;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Program = its source; kernels exist for every `kernel void <name>(` line.
    #[derive(Default)]
    struct SourceCompiler {
        compiles: AtomicUsize,
    }

    impl ProgramCompiler for SourceCompiler {
        type Program = String;
        type Kernel = String;

        fn compile(&self, request: &CompileRequest<'_>) -> Result<String, CompileFailure> {
            self.compiles.fetch_add(1, Ordering::SeqCst);
            Ok(request.key.source().to_string())
        }

        fn entry_point(&self, program: &String, name: &str) -> Result<String, CompileFailure> {
            if program.contains(&format!("kernel void {name}(")) {
                Ok(name.to_string())
            } else {
                Err(CompileFailure::new(format!("CL_INVALID_KERNEL_NAME: {name}")))
            }
        }
    }

    struct Plus;

    fn control() -> ExecutionControl {
        let device = DeviceInfo::new("gpu0", DeviceKind::Gpu);
        ExecutionControl::new(CommandQueue::new(ContextId::from_raw(0x42), device))
    }

    fn request() -> KernelRequest {
        KernelRequest::new("template<class T> kernel void reduceTemplate(global T* x) {}")
            .kernel("reduce")
            .user_code("struct Plus { int x; };")
            .instantiation("template __attribute__((mangled_name(reduceInstantiated)))\nkernel void reduceInstantiated(global int* x);")
            .options("-x clc++")
    }

    #[test]
    fn test_fragment_order() {
        let request = request();
        let fragments = request.fragments();
        assert_eq!(fragments.len(), 3);
        assert!(fragments[0].starts_with("struct Plus"));
        assert!(fragments[1].starts_with("template<class T>"));
        assert!(fragments[2].contains("mangled_name"));
    }

    #[test]
    fn test_acquire_extracts_instantiated_entry() {
        let ctl = control();
        let cache = ProgramCache::new();
        let compiler = SourceCompiler::default();

        let kernels = acquire_kernels(&ctl, &cache, &compiler, &request()).unwrap();
        assert_eq!(kernels, vec!["reduceInstantiated".to_string()]);

        // Second call is served from the cache.
        acquire_kernels(&ctl, &cache, &compiler, &request()).unwrap();
        assert_eq!(compiler.compiles.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_entry_point() {
        let ctl = control();
        let cache = ProgramCache::new();
        let compiler = SourceCompiler::default();

        let err = acquire_kernels(&ctl, &cache, &compiler, &request().kernel("scan")).unwrap_err();
        match err {
            RuntimeError::EntryPointMissing { name, diagnostic } => {
                assert_eq!(name, "scanInstantiated");
                assert!(diagnostic.contains("CL_INVALID_KERNEL_NAME"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // The program itself compiled fine and stays cached.
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_user_type_from_registry() {
        let mut registry = TypeRegistry::with_builtins();
        assert!(request().user_type::<Plus>(&registry).is_err());

        registry.register::<Plus>("Plus", "struct PlusFunctor { int y; };");
        let req = KernelRequest::new("body").user_type::<Plus>(&registry).unwrap();
        assert_eq!(req.fragments(), vec!["struct PlusFunctor { int y; };", "body"]);

        // Builtins carry no code and add no fragment.
        let req = KernelRequest::new("body").user_type::<f32>(&registry).unwrap();
        assert_eq!(req.fragments(), vec!["body"]);
    }

    #[test]
    fn test_bind_type_names_instantiation() {
        let mut registry = TypeRegistry::with_builtins();
        registry.register::<Plus>("PlusFunctor", "struct PlusFunctor { int y; };");

        let req = KernelRequest::new("template<class T, class F> kernel void reduceTemplate(global T* x, F f) {}")
            .kernel("reduce")
            .instantiation("template kernel void reduceInstantiated(global {T}* x, {F} f);")
            .bind_type::<u32>(&registry, "T")
            .unwrap()
            .bind_type::<Plus>(&registry, "F")
            .unwrap();

        let fragments = req.fragments();
        assert_eq!(fragments[0], "struct PlusFunctor { int y; };");
        assert_eq!(
            fragments[2],
            "template kernel void reduceInstantiated(global uint* x, PlusFunctor f);"
        );

        // The bound names reach the compiled source.
        let ctl = control();
        let cache = ProgramCache::new();
        let compiler = SourceCompiler::default();
        acquire_kernels(&ctl, &cache, &compiler, &req).unwrap();
        let key = ctl.compilation_key_for(&req.fragments(), "");
        assert!(cache.get(&key).unwrap().contains("global uint* x, PlusFunctor f"));
    }

    #[test]
    fn test_bind_unregistered_type_fails() {
        let registry = TypeRegistry::new();
        let err = KernelRequest::new("body")
            .instantiation("f({T})")
            .bind_type::<Plus>(&registry, "T")
            .unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownType(_)));
    }
}
