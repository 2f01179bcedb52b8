//! Fixed-block memory pool backed by a lock-free free list.
//!
//! A [`Pool`] carves one contiguous [`MemorySegment`] into equally sized,
//! cache-line aligned blocks and tracks the free ones in a [`Queue`] of
//! block offsets. Acquisition and release are therefore wait-free for any
//! number of threads and never touch the system allocator.
//!
//! Unlike a general allocator the pool never blocks: [`Pool::get`] on an
//! exhausted pool returns `None` immediately and lets the caller decide
//! whether to retry, shed load, or fail. Sample allocation
//! ([`crate::sample::Sample::alloc`]) builds directly on this.

use crate::error::{Error, Result};
use crate::memory::{self, MemorySegment, MemoryType, cache_align};
use crate::queue::Queue;
use std::ptr::NonNull;
use std::sync::Arc;

// ============================================================================
// Pool
// ============================================================================

/// Fixed-block pool over a single memory segment.
///
/// Blocks are handed out as raw [`NonNull`] pointers into the segment;
/// holders must keep the pool alive (usually via the `Arc` this crate's
/// constructors return) until every block has been returned.
///
/// # Example
///
/// ```rust
/// use millrace::memory::MemoryType;
/// use millrace::pool::Pool;
///
/// let pool = Pool::new(16, 128, MemoryType::Heap).unwrap();
/// let block = pool.get().unwrap();
/// assert!(pool.put(block));
/// ```
pub struct Pool {
    segment: Box<dyn MemorySegment>,
    /// Free list of block offsets into the segment.
    free: Queue<usize>,
    block_size: usize,
    block_count: usize,
}

impl Pool {
    /// Create a pool of `block_count` blocks of at least `block_size`
    /// bytes each, backed by freshly allocated memory of the given type.
    ///
    /// The block size is rounded up to a multiple of the cache line, so
    /// no two blocks ever share a line.
    pub fn new(block_count: usize, block_size: usize, memory_type: MemoryType) -> Result<Arc<Self>> {
        if block_count == 0 || block_size == 0 {
            return Err(Error::Config(
                "pool needs a non-zero block count and block size".into(),
            ));
        }
        let block_size = cache_align(block_size);
        let segment = memory::allocate(memory_type, block_count * block_size)?;
        Self::with_segment(segment, block_size)
    }

    /// Create a pool over an existing segment, for memory the caller
    /// obtained elsewhere (a DMA export, a peer's shared mapping).
    ///
    /// As many whole blocks as fit in the segment become available.
    pub fn with_segment(segment: Box<dyn MemorySegment>, block_size: usize) -> Result<Arc<Self>> {
        let block_size = cache_align(block_size);
        let block_count = segment.len() / block_size;
        if block_count == 0 {
            return Err(Error::Config(format!(
                "segment of {} bytes cannot hold a single {} byte block",
                segment.len(),
                block_size
            )));
        }

        let free = Queue::new(block_count);
        for i in 0..block_count {
            if free.push(i * block_size).is_err() {
                return Err(Error::AllocationFailed(
                    "pool free list smaller than block count".into(),
                ));
            }
        }

        tracing::debug!(
            blocks = block_count,
            block_size,
            memory_type = ?segment.memory_type(),
            "pool created"
        );

        Ok(Arc::new(Self {
            segment,
            free,
            block_size,
            block_count,
        }))
    }

    /// Size of each block in bytes (cache-line aligned).
    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total number of blocks.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.block_count
    }

    /// Estimate of the number of free blocks.
    #[inline]
    pub fn available(&self) -> usize {
        self.free.available()
    }

    /// Kind of memory backing the pool.
    pub fn memory_type(&self) -> MemoryType {
        self.segment.memory_type()
    }

    /// Acquire one block, or `None` when the pool is exhausted.
    ///
    /// Never blocks. The returned pointer is valid until given back via
    /// [`Pool::put`] and is aligned to the cache line.
    pub fn get(&self) -> Option<NonNull<u8>> {
        match self.free.pull() {
            Some(offset) => {
                // SAFETY: offsets on the free list were derived from the
                // segment bounds at construction.
                Some(unsafe { NonNull::new_unchecked(self.segment.as_ptr().as_ptr().add(offset)) })
            }
            None => {
                crate::observability::record_pool_exhausted();
                None
            }
        }
    }

    /// Return a block to the pool.
    ///
    /// Rejects (returns `false`) pointers that are not block-aligned
    /// addresses inside this pool's segment; a `false` from a pointer the
    /// pool itself handed out indicates a double release.
    pub fn put(&self, block: NonNull<u8>) -> bool {
        let base = self.segment.as_ptr().as_ptr() as usize;
        let addr = block.as_ptr() as usize;

        let Some(offset) = addr.checked_sub(base) else {
            return false;
        };
        if offset >= self.block_count * self.block_size || offset % self.block_size != 0 {
            return false;
        }

        self.free.push(offset).is_ok()
    }

    /// Acquire up to `n` blocks, stopping when the pool runs dry.
    /// Returns how many were appended to `out`.
    pub fn get_many(&self, out: &mut Vec<NonNull<u8>>, n: usize) -> usize {
        for i in 0..n {
            match self.get() {
                Some(block) => out.push(block),
                None => return i,
            }
        }
        n
    }

    /// Return a batch of blocks, stopping at the first rejection.
    /// Returns how many were accepted.
    pub fn put_many(&self, blocks: &[NonNull<u8>]) -> usize {
        for (i, &block) in blocks.iter().enumerate() {
            if !self.put(block) {
                return i;
            }
        }
        blocks.len()
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("block_size", &self.block_size)
            .field("capacity", &self.block_count)
            .field("available", &self.available())
            .field("memory_type", &self.segment.memory_type())
            .finish()
    }
}
