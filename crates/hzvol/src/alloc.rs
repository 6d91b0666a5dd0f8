//! Buffer allocators: the shared block-payload pool and the small scratch
//! allocator family used for staging buffers.
//!
//! Block payloads within one query are almost always the same size
//! (`2^bits_per_block × sample_width`), so the pool keeps returned buffers
//! on a free list and hands them back to later blocks instead of hitting
//! the heap once per block.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::Mutex;

/// Alignment of every scratch allocation, wide enough for any sample
/// primitive.
const SCRATCH_ALIGN: usize = 8;

/// A raw scratch allocation handed out by a [`ScratchAlloc`].
///
/// The block must be returned to (or must not outlive) the allocator that
/// produced it.
#[derive(Debug)]
pub struct ScratchBlock {
    ptr: NonNull<u8>,
    bytes: usize,
}

impl ScratchBlock {
    /// Length of the block in bytes.
    pub fn len(&self) -> usize {
        self.bytes
    }

    /// Returns true if the block is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// The block's contents.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.bytes) }
    }

    /// The block's contents, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.bytes) }
    }
}

/// Interface for the scratch allocators.
pub trait ScratchAlloc {
    /// Allocates `bytes` bytes, or returns `None` when the allocator cannot
    /// satisfy the request.
    fn allocate(&mut self, bytes: usize) -> Option<ScratchBlock>;

    /// Returns a block. Yields false when the allocator declined to (or
    /// cannot) reclaim it.
    fn deallocate(&mut self, block: ScratchBlock) -> bool;

    /// Returns true if the block came from this allocator.
    fn owns(&self, block: &ScratchBlock) -> bool;
}

/// The host-heap allocator. `owns` always answers false: heap blocks carry
/// no provenance.
#[derive(Debug, Default)]
pub struct Mallocator;

impl ScratchAlloc for Mallocator {
    fn allocate(&mut self, bytes: usize) -> Option<ScratchBlock> {
        let layout = Layout::from_size_align(bytes.max(1), SCRATCH_ALIGN).ok()?;
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        Some(ScratchBlock { ptr, bytes })
    }

    fn deallocate(&mut self, block: ScratchBlock) -> bool {
        let Ok(layout) = Layout::from_size_align(block.bytes.max(1), SCRATCH_ALIGN) else {
            return false;
        };
        unsafe { dealloc(block.ptr.as_ptr(), layout) };
        true
    }

    fn owns(&self, _block: &ScratchBlock) -> bool {
        false
    }
}

/// A bump allocator over a fixed backing buffer. `deallocate` is a no-op;
/// [`LinearAllocator::reset`] reclaims everything at once.
#[derive(Debug)]
pub struct LinearAllocator {
    storage: Box<[u8]>,
    used: usize,
}

impl LinearAllocator {
    /// Creates a bump allocator with `capacity` bytes of backing storage.
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![0; capacity].into_boxed_slice(),
            used: 0,
        }
    }

    /// Discards every outstanding allocation and rewinds the bump counter.
    pub fn reset(&mut self) {
        self.used = 0;
    }
}

impl ScratchAlloc for LinearAllocator {
    fn allocate(&mut self, bytes: usize) -> Option<ScratchBlock> {
        let start = (self.used + SCRATCH_ALIGN - 1) & !(SCRATCH_ALIGN - 1);
        if start + bytes > self.storage.len() {
            return None;
        }
        self.used = start + bytes;
        let ptr = NonNull::new(self.storage[start..].as_mut_ptr())?;
        Some(ScratchBlock { ptr, bytes })
    }

    fn deallocate(&mut self, _block: ScratchBlock) -> bool {
        false
    }

    fn owns(&self, block: &ScratchBlock) -> bool {
        let base = self.storage.as_ptr() as usize;
        let p = block.ptr.as_ptr() as usize;
        base <= p && p + block.bytes <= base + self.storage.len()
    }
}

/// A [`LinearAllocator`] whose capacity is fixed at compile time.
#[derive(Debug)]
pub struct InlineLinearAllocator<const CAP: usize> {
    inner: LinearAllocator,
}

impl<const CAP: usize> Default for InlineLinearAllocator<CAP> {
    fn default() -> Self {
        Self {
            inner: LinearAllocator::new(CAP),
        }
    }
}

impl<const CAP: usize> InlineLinearAllocator<CAP> {
    /// Rewinds the bump counter.
    pub fn reset(&mut self) {
        self.inner.reset();
    }
}

impl<const CAP: usize> ScratchAlloc for InlineLinearAllocator<CAP> {
    fn allocate(&mut self, bytes: usize) -> Option<ScratchBlock> {
        self.inner.allocate(bytes)
    }

    fn deallocate(&mut self, block: ScratchBlock) -> bool {
        self.inner.deallocate(block)
    }

    fn owns(&self, block: &ScratchBlock) -> bool {
        self.inner.owns(block)
    }
}

/// Tries a primary allocator first and falls back to a secondary when the
/// primary comes up empty. Deallocation routes by ownership.
#[derive(Debug, Default)]
pub struct FallbackAllocator<P, S> {
    primary: P,
    secondary: S,
}

impl<P: ScratchAlloc, S: ScratchAlloc> FallbackAllocator<P, S> {
    /// Creates a fallback pair.
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }
}

impl<P: ScratchAlloc, S: ScratchAlloc> ScratchAlloc for FallbackAllocator<P, S> {
    fn allocate(&mut self, bytes: usize) -> Option<ScratchBlock> {
        self.primary
            .allocate(bytes)
            .or_else(|| self.secondary.allocate(bytes))
    }

    fn deallocate(&mut self, block: ScratchBlock) -> bool {
        if self.primary.owns(&block) {
            self.primary.deallocate(block)
        } else {
            self.secondary.deallocate(block)
        }
    }

    fn owns(&self, block: &ScratchBlock) -> bool {
        self.primary.owns(block) || self.secondary.owns(block)
    }
}

#[derive(Debug, Default)]
struct PoolInner {
    free: Vec<Vec<u8>>,
    min_size: usize,
    max_size: usize,
}

/// A same-size pool of block payload buffers.
///
/// Requests inside `[min_size, max_size]` are served from the free list
/// when possible; anything else goes straight to the heap. Returned buffers
/// whose capacity matches the pool size go back on the free list. All
/// operations are serialized internally, so placement tasks can return
/// buffers concurrently.
#[derive(Debug, Default)]
pub struct BlockPool {
    inner: Mutex<PoolInner>,
}

impl BlockPool {
    /// Creates an empty pool. Sizes are configured per query via
    /// [`BlockPool::set_sizes`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconfigures the pooled size range. Changing `max_size` drains the
    /// free list, since pooled buffers of the old size are no longer
    /// interchangeable.
    pub fn set_sizes(&self, min_size: usize, max_size: usize) {
        let mut inner = self.inner.lock().expect("block pool poisoned");
        if inner.max_size != max_size {
            inner.free.clear();
        }
        inner.min_size = min_size;
        inner.max_size = max_size;
    }

    /// The pooled buffer size.
    pub fn max_size(&self) -> usize {
        self.inner.lock().expect("block pool poisoned").max_size
    }

    /// Returns a zeroed buffer of exactly `bytes` bytes, reusing a pooled
    /// buffer when the size falls in the pooled range.
    pub fn allocate(&self, bytes: usize) -> Vec<u8> {
        let mut inner = self.inner.lock().expect("block pool poisoned");
        if bytes >= inner.min_size && bytes <= inner.max_size {
            if let Some(mut buf) = inner.free.pop() {
                buf.clear();
                buf.resize(bytes, 0);
                return buf;
            }
            let max_size = inner.max_size;
            drop(inner);
            let mut buf = Vec::with_capacity(max_size);
            buf.resize(bytes, 0);
            return buf;
        }
        drop(inner);
        vec![0; bytes]
    }

    /// Returns a buffer to the pool. Buffers that cannot serve future
    /// pooled requests are simply dropped.
    pub fn deallocate(&self, buf: Vec<u8>) {
        let mut inner = self.inner.lock().expect("block pool poisoned");
        if inner.max_size > 0 && buf.capacity() >= inner.max_size {
            inner.free.push(buf);
        }
    }

    /// Releases every pooled buffer back to the heap.
    pub fn deallocate_all(&self) {
        self.inner.lock().expect("block pool poisoned").free.clear();
    }
}
