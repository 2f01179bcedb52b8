//! Huge page memory segment for TLB-friendly pools.
//!
//! Large sample pools touch every block on a hot path; backing them with
//! 2 MiB (or 1 GiB) pages keeps the TLB footprint at a handful of entries.
//!
//! # Requirements
//!
//! - Linux kernel with huge page support
//! - Reserved pages (`/proc/sys/vm/nr_hugepages`)
//!
//! # Example
//!
//! ```rust,ignore
//! use millrace::memory::{HugePageSegment, HugePageSize};
//!
//! let segment = HugePageSegment::new(HugePageSize::MB2, 4 * 1024 * 1024)?;
//! segment.prefault();
//! ```

use super::{IpcHandle, MemorySegment, MemoryType};
use crate::error::{Error, Result};
use rustix::mm::{MapFlags, ProtFlags};
use std::ptr::NonNull;

/// Size of huge pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HugePageSize {
    /// 2 MiB huge pages (standard on x86_64).
    MB2,
    /// 1 GiB gigantic pages.
    GB1,
}

impl HugePageSize {
    /// The page size in bytes.
    pub fn bytes(self) -> usize {
        match self {
            HugePageSize::MB2 => 2 * 1024 * 1024,
            HugePageSize::GB1 => 1024 * 1024 * 1024,
        }
    }

    /// The `MAP_HUGETLB` size encoding for mmap.
    fn shift(self) -> u32 {
        match self {
            HugePageSize::MB2 => 21,
            HugePageSize::GB1 => 30,
        }
    }
}

/// A memory segment backed by huge pages.
///
/// The requested size is rounded up to a whole number of pages. Anonymous
/// huge mappings are process-private; use [`super::SharedSegment`] when the
/// pool must cross a process boundary.
pub struct HugePageSegment {
    ptr: NonNull<u8>,
    len: usize,
    page_size: HugePageSize,
}

impl HugePageSegment {
    /// Allocate a huge page segment of at least `size` bytes.
    ///
    /// # Errors
    ///
    /// Fails when `size` is 0 or when the kernel has no pages of the
    /// requested size available (reservation or permissions).
    pub fn new(page_size: HugePageSize, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::AllocationFailed(
                "size must be greater than 0".into(),
            ));
        }

        let page_bytes = page_size.bytes();
        let aligned_size = size.div_ceil(page_bytes) * page_bytes;

        // MAP_HUGETLB | (log2(pagesize) << MAP_HUGE_SHIFT), MAP_HUGE_SHIFT = 26.
        let huge_flags =
            MapFlags::from_bits_retain(MapFlags::HUGETLB.bits() | ((page_size.shift()) << 26));

        // SAFETY: anonymous mapping, no aliasing with existing memory.
        let ptr = unsafe {
            rustix::mm::mmap_anonymous(
                std::ptr::null_mut(),
                aligned_size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::PRIVATE | huge_flags,
            )?
        };

        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| Error::AllocationFailed("mmap returned null".into()))?;

        Ok(Self {
            ptr,
            len: aligned_size,
            page_size,
        })
    }

    /// Allocate with huge pages, falling back to regular pages when the
    /// reservation is exhausted.
    ///
    /// The fallback keeps the segment usable at the cost of the TLB win;
    /// a warning is logged so the degradation is visible.
    pub fn new_or_fallback(page_size: HugePageSize, size: usize) -> Result<Self> {
        match Self::new(page_size, size) {
            Ok(segment) => Ok(segment),
            Err(_) if size == 0 => Err(Error::AllocationFailed(
                "size must be greater than 0".into(),
            )),
            Err(err) => {
                tracing::warn!(%err, size, "huge page allocation failed, using regular pages");

                // SAFETY: anonymous mapping, no aliasing with existing memory.
                let ptr = unsafe {
                    rustix::mm::mmap_anonymous(
                        std::ptr::null_mut(),
                        size,
                        ProtFlags::READ | ProtFlags::WRITE,
                        MapFlags::PRIVATE,
                    )?
                };
                let ptr = NonNull::new(ptr.cast::<u8>())
                    .ok_or_else(|| Error::AllocationFailed("mmap returned null".into()))?;

                Ok(Self {
                    ptr,
                    len: size,
                    page_size,
                })
            }
        }
    }

    /// The huge page size this segment was created with.
    pub fn page_size(&self) -> HugePageSize {
        self.page_size
    }

    /// Touch every page so physical frames are faulted in before the
    /// real-time portion of the run begins.
    pub fn prefault(&self) {
        // 4 KiB stride also covers mappings downgraded by new_or_fallback.
        let step = 4096.min(self.len);
        let ptr = self.ptr.as_ptr();
        for offset in (0..self.len).step_by(step) {
            // SAFETY: offset < len; volatile read prevents elision.
            unsafe { std::ptr::read_volatile(ptr.add(offset)) };
        }
    }
}

impl MemorySegment for HugePageSegment {
    fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    fn len(&self) -> usize {
        self.len
    }

    fn memory_type(&self) -> MemoryType {
        MemoryType::HugePages
    }

    fn ipc_handle(&self) -> Option<IpcHandle> {
        // Anonymous mappings have no descriptor to pass.
        None
    }
}

impl Drop for HugePageSegment {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe exactly the mapping created in new().
        unsafe {
            let _ = rustix::mm::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

// SAFETY: the mapping is owned exclusively and valid from any thread.
unsafe impl Send for HugePageSegment {}
// SAFETY: no interior mutation through &self beyond prefault's volatile
// reads; block-level coordination belongs to the pool.
unsafe impl Sync for HugePageSegment {}
