//! Program cache: compile once per key, share the handle forever.
//!
//! Entries live in an ordered map from [`CompilationKey`] to a per-key slot.
//! The map lock is held only for slot bookkeeping; compilation runs under the
//! slot's own lock. Callers asking for the same key queue behind the
//! in-flight compile and then see its result; callers asking for other keys
//! proceed without waiting for it.
//!
//! A failed compile leaves no entry behind, so the next request for that key
//! compiles again.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Instant;

use crate::compiler::{BuildSettings, CompilationKey, CompileRequest, ProgramCompiler};
use crate::control::DebugFlags;
use crate::device::ContextId;
use crate::error::{RuntimeError, RuntimeResult};

type Slot<P> = Arc<Mutex<Option<Arc<P>>>>;

/// Map-side view of a slot. `ready` flips under the map lock once the slot
/// holds a program, so counting never has to touch slot locks.
struct Entry<P> {
    slot: Slot<P>,
    ready: bool,
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub compilations: u64,
    pub failures: u64,
    pub entries: usize,
}

/// Compile-once cache of JIT programs of type `P`.
pub struct ProgramCache<P> {
    entries: Mutex<BTreeMap<CompilationKey, Entry<P>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    compilations: AtomicU64,
    failures: AtomicU64,
}

impl<P> ProgramCache<P> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            compilations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Look up `{context, device, options, source}`, compiling on a miss.
    pub fn acquire<C>(
        &self,
        compiler: &C,
        context: ContextId,
        device: &str,
        options: &str,
        source: &str,
        settings: impl Into<BuildSettings>,
    ) -> RuntimeResult<Arc<P>>
    where
        C: ProgramCompiler<Program = P>,
    {
        let key = CompilationKey::new(context, device, options, source);
        self.acquire_key(compiler, &key, settings)
    }

    /// Same as [`acquire`](Self::acquire) for an already-built key.
    ///
    /// `settings` reach the compiler on a miss only; they never select an
    /// entry.
    pub fn acquire_key<C>(
        &self,
        compiler: &C,
        key: &CompilationKey,
        settings: impl Into<BuildSettings>,
    ) -> RuntimeResult<Arc<P>>
    where
        C: ProgramCompiler<Program = P>,
    {
        let BuildSettings { debug, all_devices } = settings.into();
        loop {
            let slot = self.slot_for(key);
            let mut program = lock(&slot);
            if let Some(existing) = program.as_ref() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                log::trace!("Program cache hit: {key:?}");
                return Ok(Arc::clone(existing));
            }

            // The slot was dropped (failed compile or invalidate) while we
            // queued on it; take the fresh one instead.
            if !self.is_registered(key, &slot) {
                continue;
            }

            self.misses.fetch_add(1, Ordering::Relaxed);
            if debug.contains(DebugFlags::SHOW_CODE) {
                log::debug!("Compiling source for {}:\n{}", key.device(), key.source());
            }

            let started = Instant::now();
            return match compiler.compile(&CompileRequest {
                key,
                debug,
                all_devices,
            }) {
                Ok(compiled) => {
                    let compiled = Arc::new(compiled);
                    *program = Some(Arc::clone(&compiled));
                    self.mark_ready(key, &slot);
                    self.compilations.fetch_add(1, Ordering::Relaxed);
                    log::info!(
                        "Compiled program for {} in {:.3} ms: {key:?}",
                        key.device(),
                        started.elapsed().as_secs_f64() * 1e3
                    );
                    Ok(compiled)
                }
                Err(failure) => {
                    self.unregister(key, &slot);
                    drop(program);
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    log::warn!("Compilation failed for {key:?}: {}", failure.diagnostic);
                    if debug.contains(DebugFlags::COMPILE_DIAGNOSTICS) {
                        log::debug!("Failed source for {}:\n{}", key.device(), key.source());
                    }
                    Err(RuntimeError::CompileFailed {
                        device: key.device().to_string(),
                        options: key.options().to_string(),
                        diagnostic: failure.diagnostic,
                    })
                }
            };
        }
    }

    /// Cached program for `key`, without compiling.
    pub fn get(&self, key: &CompilationKey) -> Option<Arc<P>> {
        let slot = lock(&self.entries)
            .get(key)
            .filter(|entry| entry.ready)
            .map(|entry| Arc::clone(&entry.slot))?;
        let program = lock(&slot).clone();
        program
    }

    /// Drop the entry for `key`. Handles already given out stay valid.
    pub fn invalidate(&self, key: &CompilationKey) -> bool {
        let removed = lock(&self.entries).remove(key).is_some();
        if removed {
            log::debug!("Invalidated program cache entry: {key:?}");
        }
        removed
    }

    /// Drop every entry.
    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    /// Number of compiled entries.
    pub fn len(&self) -> usize {
        lock(&self.entries).values().filter(|entry| entry.ready).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            compilations: self.compilations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    fn slot_for(&self, key: &CompilationKey) -> Slot<P> {
        let mut entries = lock(&self.entries);
        let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
            slot: Arc::default(),
            ready: false,
        });
        Arc::clone(&entry.slot)
    }

    fn is_registered(&self, key: &CompilationKey, slot: &Slot<P>) -> bool {
        lock(&self.entries)
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(&current.slot, slot))
    }

    // Lock order is slot then map; the map side never locks a slot.
    fn mark_ready(&self, key: &CompilationKey, slot: &Slot<P>) {
        if let Some(entry) = lock(&self.entries).get_mut(key) {
            if Arc::ptr_eq(&entry.slot, slot) {
                entry.ready = true;
            }
        }
    }

    fn unregister(&self, key: &CompilationKey, slot: &Slot<P>) {
        let mut entries = lock(&self.entries);
        if entries.get(key).is_some_and(|current| Arc::ptr_eq(&current.slot, slot)) {
            entries.remove(key);
        }
    }
}

impl<P: Send + Sync + 'static> ProgramCache<P> {
    /// Process-wide cache for programs of type `P`, created on first use and
    /// kept until process exit.
    pub fn global() -> &'static ProgramCache<P> {
        static CACHES: OnceLock<Mutex<HashMap<TypeId, &'static (dyn Any + Send + Sync)>>> =
            OnceLock::new();

        let mut caches = lock(CACHES.get_or_init(Default::default));
        let cache = *caches.entry(TypeId::of::<P>()).or_insert_with(|| {
            let leaked: &'static (dyn Any + Send + Sync) = Box::leak(Box::new(ProgramCache::<P>::new()));
            leaked
        });
        cache
            .downcast_ref::<ProgramCache<P>>()
            .expect("global program cache registered under a foreign TypeId")
    }
}

impl<P> Default for ProgramCache<P> {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Nothing inside is left half-written across a panic.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
