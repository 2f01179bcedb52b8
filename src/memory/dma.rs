//! DMA-BUF memory segment for device-visible pools.
//!
//! DMA-BUF is the Linux buffer sharing mechanism. Acquisition cards and
//! FPGA bridges export their capture buffers as DMA-BUF descriptors; a pool
//! built over such a segment lets samples land in device-visible memory
//! without a copy. Driver programming stays entirely outside this crate;
//! the segment only wraps and maps an already exported descriptor.

use super::{IpcHandle, MemorySegment, MemoryType};
use crate::error::{Error, Result};
use rustix::fd::OwnedFd;
use rustix::mm::{MapFlags, ProtFlags};
use std::os::unix::io::AsRawFd;
use std::ptr::NonNull;

/// A memory segment backed by a DMA-BUF file descriptor.
///
/// # Example
///
/// ```rust,ignore
/// use millrace::memory::DmaSegment;
///
/// // fd obtained from the device driver's export ioctl
/// let segment = DmaSegment::from_fd(dmabuf_fd, buffer_len)?;
/// let pool = Pool::with_segment(Box::new(segment), 256)?;
/// ```
pub struct DmaSegment {
    fd: OwnedFd,
    ptr: NonNull<u8>,
    len: usize,
}

impl DmaSegment {
    /// Map an exported DMA-BUF descriptor for CPU access.
    ///
    /// Ownership of `fd` transfers to the segment; the mapping is
    /// read/write and shared with the device.
    ///
    /// # Errors
    ///
    /// Returns an error if `len` is 0 or the mmap fails (driver refusing
    /// CPU access, bad length).
    pub fn from_fd(fd: OwnedFd, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(Error::AllocationFailed(
                "size must be greater than 0".into(),
            ));
        }

        // SAFETY: fresh mapping over a descriptor we own, no aliasing.
        let ptr = unsafe {
            rustix::mm::mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )?
        };
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| Error::AllocationFailed("mmap returned null".into()))?;

        Ok(Self { fd, ptr, len })
    }
}

impl MemorySegment for DmaSegment {
    fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    fn len(&self) -> usize {
        self.len
    }

    fn memory_type(&self) -> MemoryType {
        MemoryType::DmaBuf
    }

    fn ipc_handle(&self) -> Option<IpcHandle> {
        Some(IpcHandle::Fd {
            fd: self.fd.as_raw_fd(),
            size: self.len,
        })
    }
}

impl Drop for DmaSegment {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe exactly the mapping created in from_fd().
        unsafe {
            let _ = rustix::mm::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

// SAFETY: the mapping is valid from any thread for the segment's lifetime.
unsafe impl Send for DmaSegment {}
// SAFETY: no interior mutation through &self; device/CPU coherence is the
// caller's protocol, block-level coordination is the pool's.
unsafe impl Sync for DmaSegment {}
