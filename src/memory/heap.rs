//! Heap-backed memory segment.

use super::{cache_align, IpcHandle, MemorySegment, MemoryType, CACHE_LINE};
use crate::error::{Error, Result};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

/// A memory segment backed by an aligned heap allocation.
///
/// The default backend for single-process pools. Memory is zeroed and
/// aligned to the cache line so block 0 starts on a cache-line boundary
/// without any padding bookkeeping.
///
/// # Example
///
/// ```rust
/// use millrace::memory::{HeapSegment, MemorySegment, CACHE_LINE};
///
/// let segment = HeapSegment::new(1024).unwrap();
/// assert_eq!(segment.len(), 1024);
/// assert_eq!(segment.as_ptr().as_ptr() as usize % CACHE_LINE, 0);
/// ```
pub struct HeapSegment {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl HeapSegment {
    /// Allocate a zeroed, cache-line aligned segment of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is 0 or the allocation fails.
    pub fn new(size: usize) -> Result<Self> {
        Self::with_alignment(size, CACHE_LINE)
    }

    /// Allocate with an explicit alignment (must be a power of two).
    pub fn with_alignment(size: usize, align: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::AllocationFailed(
                "size must be greater than 0".into(),
            ));
        }
        if !align.is_power_of_two() {
            return Err(Error::AllocationFailed(
                "alignment must be a power of 2".into(),
            ));
        }

        // Layout size must be padded so the allocator honors the alignment.
        let padded = if align > CACHE_LINE {
            size.next_multiple_of(align)
        } else {
            cache_align(size).max(size)
        };
        let layout = Layout::from_size_align(padded.max(size), align)
            .map_err(|e| Error::AllocationFailed(e.to_string()))?;

        // SAFETY: layout has non-zero size (checked above).
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw)
            .ok_or_else(|| Error::AllocationFailed(format!("heap allocation of {size} bytes")))?;

        Ok(Self { ptr, layout })
    }
}

impl MemorySegment for HeapSegment {
    fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    fn len(&self) -> usize {
        self.layout.size()
    }

    fn memory_type(&self) -> MemoryType {
        MemoryType::Heap
    }

    fn ipc_handle(&self) -> Option<IpcHandle> {
        // Private heap memory cannot be mapped by another process.
        None
    }
}

impl Drop for HeapSegment {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by alloc_zeroed with exactly this layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

// SAFETY: the segment owns its allocation exclusively; the pointer is valid
// from any thread and all mutation goes through the pool's block protocol.
unsafe impl Send for HeapSegment {}
// SAFETY: HeapSegment itself exposes no interior mutation; concurrent block
// access is coordinated by the pool free-list.
unsafe impl Sync for HeapSegment {}
