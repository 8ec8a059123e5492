//! Scratch device buffers pooled per execution control.
//!
//! Algorithms that need temporary device memory ask the control for a buffer
//! of at least `size` bytes. A free pooled buffer that is large enough is
//! handed out again; otherwise the caller-supplied [`BufferAllocator`]
//! creates one. The returned [`PooledBuffer`] goes back to the pool when it
//! is dropped.
//!
//! Buffers are pooled by context, memory flags and buffer type, so two
//! allocators with different buffer types never see each other's memory.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::ops::{BitOr, Deref};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::device::ContextId;
use crate::error::RuntimeResult;

/// Access flags a buffer is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemFlags(u64);

impl MemFlags {
    pub const READ_WRITE: Self = Self(0x1);
    pub const WRITE_ONLY: Self = Self(0x2);
    pub const READ_ONLY: Self = Self(0x4);
    /// Back the buffer with host-allocated memory.
    pub const ALLOC_HOST_PTR: Self = Self(0x10);

    pub fn bits(&self) -> u64 {
        self.0
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MemFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The external allocation primitive (`clCreateBuffer`, `cuMemAlloc`, ...).
pub trait BufferAllocator: Send + Sync {
    type Buffer: Send + Sync + 'static;

    /// Allocate `size` bytes in `context`.
    fn allocate(&self, context: ContextId, size: usize, flags: MemFlags) -> RuntimeResult<Self::Buffer>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PoolKey {
    context: ContextId,
    flags: MemFlags,
    buffer_type: TypeId,
}

struct PoolEntry {
    id: u64,
    size: usize,
    in_use: bool,
    buffer: Arc<dyn Any + Send + Sync>,
}

/// Pool of reusable buffers. Shared through an `Arc` by every control clone
/// that should draw from it.
#[derive(Default)]
pub struct BufferPool {
    entries: Mutex<HashMap<PoolKey, Vec<PoolEntry>>>,
    next_id: AtomicU64,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer of at least `size` bytes for `context`, reused when possible.
    ///
    /// A free buffer that is too small is dropped and replaced by the new
    /// allocation, so the pool does not accumulate undersized buffers.
    pub fn acquire<A: BufferAllocator>(
        self: &Arc<Self>,
        allocator: &A,
        context: ContextId,
        size: usize,
        flags: MemFlags,
    ) -> RuntimeResult<PooledBuffer<A::Buffer>> {
        let key = PoolKey {
            context,
            flags,
            buffer_type: TypeId::of::<A::Buffer>(),
        };

        {
            let mut entries = lock(&self.entries);
            let pooled = entries.entry(key).or_default();

            let reusable = pooled
                .iter_mut()
                .filter(|entry| !entry.in_use && entry.size >= size)
                .find_map(|entry| {
                    let buffer = Arc::clone(&entry.buffer).downcast::<A::Buffer>().ok()?;
                    Some((entry, buffer))
                });
            if let Some((entry, buffer)) = reusable {
                entry.in_use = true;
                log::trace!("Reusing {}-byte buffer for {size}-byte request on {context}", entry.size);
                return Ok(PooledBuffer {
                    buffer,
                    capacity: entry.size,
                    id: entry.id,
                    key,
                    pool: Arc::clone(self),
                });
            }

            if let Some(pos) = pooled.iter().position(|entry| !entry.in_use) {
                let undersized = pooled.swap_remove(pos);
                log::debug!(
                    "Replacing free {}-byte buffer with a {size}-byte one on {context}",
                    undersized.size
                );
            }
        }

        let buffer = Arc::new(allocator.allocate(context, size, flags)?);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.entries).entry(key).or_default().push(PoolEntry {
            id,
            size,
            in_use: true,
            buffer: Arc::clone(&buffer) as Arc<dyn Any + Send + Sync>,
        });
        log::debug!("Allocated {size}-byte buffer ({flags:?}) on {context}");

        Ok(PooledBuffer {
            buffer,
            capacity: size,
            id,
            key,
            pool: Arc::clone(self),
        })
    }

    /// Drop every pooled buffer. Buffers still held by callers stay valid
    /// and are simply not returned to the pool.
    pub fn free_buffers(&self) {
        let mut entries = lock(&self.entries);
        let freed: usize = entries.values().map(Vec::len).sum();
        entries.clear();
        log::debug!("Freed {freed} pooled buffers");
    }

    /// Bytes held by the pool, in use or not.
    pub fn total_buffer_size(&self) -> usize {
        lock(&self.entries)
            .values()
            .flatten()
            .map(|entry| entry.size)
            .sum()
    }

    /// Number of pooled buffers, in use or not.
    pub fn len(&self) -> usize {
        lock(&self.entries).values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffers currently handed out.
    pub fn in_use(&self) -> usize {
        lock(&self.entries)
            .values()
            .flatten()
            .filter(|entry| entry.in_use)
            .count()
    }

    fn release(&self, key: &PoolKey, id: u64) {
        let mut entries = lock(&self.entries);
        if let Some(entry) = entries
            .get_mut(key)
            .and_then(|pooled| pooled.iter_mut().find(|entry| entry.id == id))
        {
            entry.in_use = false;
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffers", &self.len())
            .field("bytes", &self.total_buffer_size())
            .finish()
    }
}

/// A buffer on loan from a [`BufferPool`]; returned to it on drop.
pub struct PooledBuffer<B> {
    buffer: Arc<B>,
    capacity: usize,
    id: u64,
    key: PoolKey,
    pool: Arc<BufferPool>,
}

impl<B> PooledBuffer<B> {
    /// Size the buffer was allocated with; at least the requested size.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<B> Deref for PooledBuffer<B> {
    type Target = B;

    fn deref(&self) -> &B {
        &self.buffer
    }
}

impl<B> Drop for PooledBuffer<B> {
    fn drop(&mut self) {
        self.pool.release(&self.key, self.id);
    }
}

impl<B: fmt::Debug> fmt::Debug for PooledBuffer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("buffer", &self.buffer)
            .field("capacity", &self.capacity)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
