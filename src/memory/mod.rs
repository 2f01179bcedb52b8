//! Pluggable backing memory for sample pools.
//!
//! A pool carves one contiguous [`MemorySegment`] into equal, cache-line
//! aligned blocks. Where that segment lives is a deployment decision, not a
//! pool concern:
//!
//! - [`HeapSegment`]: aligned, zeroed process-private memory (the default)
//! - [`HugePageSegment`]: 2 MiB / 1 GiB pages for TLB-friendly large pools
//! - [`SharedSegment`]: memfd-backed memory another process can map
//! - [`DmaSegment`]: wraps a DMA-BUF descriptor exported by a device driver
//!
//! # Example
//!
//! ```rust
//! use millrace::memory::{allocate, MemoryType};
//!
//! let segment = allocate(MemoryType::Heap, 64 * 1024).unwrap();
//! assert!(segment.len() >= 64 * 1024);
//! ```

use crate::error::{Error, Result};

mod heap;
#[cfg(target_os = "linux")]
mod dma;
#[cfg(target_os = "linux")]
mod huge_pages;
#[cfg(target_os = "linux")]
mod shared;

pub use heap::HeapSegment;
#[cfg(target_os = "linux")]
pub use dma::DmaSegment;
#[cfg(target_os = "linux")]
pub use huge_pages::{HugePageSegment, HugePageSize};
#[cfg(target_os = "linux")]
pub use shared::SharedSegment;

/// Cache line size assumed for block alignment and cursor padding.
pub const CACHE_LINE: usize = 64;

/// Round `n` up to the next multiple of [`CACHE_LINE`].
#[inline]
pub const fn cache_align(n: usize) -> usize {
    (n + CACHE_LINE - 1) & !(CACHE_LINE - 1)
}

/// Type of memory backing a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryType {
    /// Process-private heap memory.
    Heap,
    /// Huge pages (2 MiB), reducing TLB pressure for large pools.
    HugePages,
    /// Anonymous shared memory (memfd), mappable by other processes.
    Shared,
    /// DMA-BUF backed memory exported by a device driver.
    ///
    /// Cannot be allocated here. Wrap an exported descriptor with
    /// [`DmaSegment::from_fd`] and hand the segment to the pool directly.
    DmaBuf,
}

impl MemoryType {
    /// Can a segment of this type be shared across processes on the same
    /// machine?
    #[inline]
    pub fn supports_ipc(&self) -> bool {
        match self {
            MemoryType::Heap => false,
            MemoryType::HugePages => false,
            MemoryType::Shared => true,
            MemoryType::DmaBuf => true,
        }
    }
}

/// Handle for sharing a segment with another process.
///
/// The descriptor is meant to travel over a Unix socket via `SCM_RIGHTS`;
/// the receiver maps it and interprets the pool layout identically.
#[derive(Debug, Clone)]
pub enum IpcHandle {
    /// File descriptor plus region size.
    Fd {
        /// The raw file descriptor.
        fd: std::os::unix::io::RawFd,
        /// Size of the memory region in bytes.
        size: usize,
    },
}

/// Trait for memory segment backends.
///
/// A segment is one contiguous, writable region that outlives every block
/// handed out of it. Pools rely on that: block addresses are derived from
/// `as_ptr()` plus an offset and stay valid for the segment's lifetime.
///
/// # Safety
///
/// Implementations must ensure the pointer remains valid and the region
/// stays mapped for the lifetime of the segment value.
pub trait MemorySegment: Send + Sync {
    /// Raw pointer to the start of the region.
    fn as_ptr(&self) -> std::ptr::NonNull<u8>;

    /// Total size of the region in bytes.
    fn len(&self) -> usize;

    /// Returns true if the region has zero length.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The type of memory backing this segment.
    fn memory_type(&self) -> MemoryType;

    /// Handle for cross-process sharing, if this backend supports it.
    fn ipc_handle(&self) -> Option<IpcHandle>;
}

/// Allocate a segment of at least `len` bytes from the given memory type.
///
/// Backends may round the size up (huge pages round to the page size).
/// [`MemoryType::DmaBuf`] cannot be allocated from thin air; wrap a
/// device-exported descriptor instead.
pub fn allocate(memory: MemoryType, len: usize) -> Result<Box<dyn MemorySegment>> {
    match memory {
        MemoryType::Heap => Ok(Box::new(HeapSegment::new(len)?)),
        #[cfg(target_os = "linux")]
        MemoryType::HugePages => Ok(Box::new(HugePageSegment::new(HugePageSize::MB2, len)?)),
        #[cfg(target_os = "linux")]
        MemoryType::Shared => Ok(Box::new(SharedSegment::new("millrace-pool", len)?)),
        #[cfg(not(target_os = "linux"))]
        MemoryType::HugePages | MemoryType::Shared => {
            Err(Error::NotSupported("memory type requires Linux"))
        }
        MemoryType::DmaBuf => Err(Error::Config(
            "dma segments wrap externally exported descriptors; use DmaSegment::from_fd".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_align() {
        assert_eq!(cache_align(0), 0);
        assert_eq!(cache_align(1), CACHE_LINE);
        assert_eq!(cache_align(CACHE_LINE), CACHE_LINE);
        assert_eq!(cache_align(CACHE_LINE + 1), 2 * CACHE_LINE);
    }

    #[test]
    fn test_allocate_heap() {
        let segment = allocate(MemoryType::Heap, 4096).unwrap();
        assert_eq!(segment.len(), 4096);
        assert_eq!(segment.memory_type(), MemoryType::Heap);
        assert!(segment.ipc_handle().is_none());
    }

    #[test]
    fn test_allocate_dma_refused() {
        assert!(allocate(MemoryType::DmaBuf, 4096).is_err());
    }

    #[test]
    fn test_ipc_support() {
        assert!(!MemoryType::Heap.supports_ipc());
        assert!(MemoryType::Shared.supports_ipc());
        assert!(MemoryType::DmaBuf.supports_ipc());
    }
}
