//! Shared memory segment over Linux memfd.
//!
//! A pool whose free-list stores block *offsets* works unchanged when its
//! backing segment is mapped by a second process at a different base
//! address. This segment provides that backing: anonymous shared memory
//! created with `memfd_create`, shared by passing the descriptor over a
//! Unix socket.

use super::{IpcHandle, MemorySegment, MemoryType};
use crate::error::{Error, Result};
use rustix::fd::OwnedFd;
use rustix::mm::{MapFlags, ProtFlags};
use std::ffi::CString;
use std::os::unix::io::AsRawFd;
use std::ptr::NonNull;

/// A memory segment backed by anonymous shared memory (memfd).
///
/// - Anonymous: no filesystem entry, the kernel reclaims the region when
///   the last mapping and descriptor are gone
/// - Shareable: the descriptor travels via `SCM_RIGHTS`; the peer maps the
///   same physical pages with [`SharedSegment::from_fd`]
///
/// # Example
///
/// ```rust,ignore
/// use millrace::memory::{SharedSegment, MemorySegment};
///
/// let segment = SharedSegment::new("lab-bench", 1024 * 1024)?;
/// let handle = segment.ipc_handle().unwrap();
/// // send handle over a Unix socket; the peer calls SharedSegment::from_fd
/// ```
pub struct SharedSegment {
    fd: OwnedFd,
    ptr: NonNull<u8>,
    len: usize,
}

impl SharedSegment {
    /// Create a new shared segment of `size` bytes.
    ///
    /// `name` is purely diagnostic (it shows up under `/proc/self/fd/`).
    ///
    /// # Errors
    ///
    /// Returns an error if `memfd_create`, `ftruncate` or `mmap` fails, or
    /// if `size` is 0.
    pub fn new(name: &str, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::AllocationFailed(
                "size must be greater than 0".into(),
            ));
        }

        let cname = CString::new(name).map_err(|e| Error::AllocationFailed(e.to_string()))?;
        let fd = rustix::fs::memfd_create(&cname, rustix::fs::MemfdFlags::CLOEXEC)?;
        rustix::fs::ftruncate(&fd, size as u64)?;

        let ptr = Self::map(&fd, size)?;
        Ok(Self { fd, ptr, len: size })
    }

    /// Map a segment created by another process from its descriptor.
    ///
    /// `len` must match the creator's size; the mapping fails otherwise or,
    /// worse, silently truncates the visible region.
    pub fn from_fd(fd: OwnedFd, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(Error::AllocationFailed(
                "size must be greater than 0".into(),
            ));
        }
        let ptr = Self::map(&fd, len)?;
        Ok(Self { fd, ptr, len })
    }

    fn map(fd: &OwnedFd, len: usize) -> Result<NonNull<u8>> {
        // SAFETY: fresh mapping over a descriptor we own, no aliasing.
        let ptr = unsafe {
            rustix::mm::mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                fd,
                0,
            )?
        };
        NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| Error::AllocationFailed("mmap returned null".into()))
    }
}

impl MemorySegment for SharedSegment {
    fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    fn len(&self) -> usize {
        self.len
    }

    fn memory_type(&self) -> MemoryType {
        MemoryType::Shared
    }

    fn ipc_handle(&self) -> Option<IpcHandle> {
        Some(IpcHandle::Fd {
            fd: self.fd.as_raw_fd(),
            size: self.len,
        })
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe exactly the mapping created in map().
        unsafe {
            let _ = rustix::mm::munmap(self.ptr.as_ptr().cast(), self.len);
        }
        // fd drops with the struct; the kernel frees the pages once every
        // mapping and descriptor is gone.
    }
}

// SAFETY: the mapping is valid from any thread for the segment's lifetime.
unsafe impl Send for SharedSegment {}
// SAFETY: no interior mutation through &self; cross-process block access is
// coordinated by the pool's atomic free-list.
unsafe impl Sync for SharedSegment {}
