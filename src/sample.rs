//! Reference-counted samples living in pool blocks.
//!
//! A sample is one timestamped, sequence-numbered vector of values. Its
//! storage is a single [`Pool`] block: a fixed `#[repr(C)]` header at the
//! start, the value array directly behind it. That in-memory layout is the
//! contract format adapters serialize, so it never changes shape per build
//! configuration.
//!
//! The public [`Sample`] type is a smart handle. `Clone` takes a reference
//! on the shared block, `Drop` releases one, and the handle that drops the
//! count to zero returns the block to the owning pool. Every live handle
//! holds an `Arc` of its pool, which is what keeps the backing memory alive
//! until the last sample is gone.
//!
//! Mutation follows a sole-owner rule: scalar header fields may only be
//! written while the refcount is 1 (asserted), and [`Sample::values_mut`]
//! simply refuses otherwise. Once a sample has been cloned for fan-out it
//! is read-only.

use crate::clock::{Timestamp, Timestamps};
use crate::error::{Error, Result};
use crate::node::NodeId;
use crate::pool::Pool;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

// ============================================================================
// Layout
// ============================================================================

/// Header at the start of every sample block.
///
/// `#[repr(C)]`: 56 bytes, 8-byte aligned, identical in every process that
/// maps a shared pool.
#[repr(C)]
struct SampleHeader {
    /// Monotonic sequence number assigned by the producer.
    sequence: u64,
    /// Values currently valid, `<= capacity`.
    length: u32,
    /// Maximum values the block can hold; fixed at allocation.
    capacity: u32,
    /// Live references to this block.
    refcount: AtomicU32,
    /// Id of the node that produced the sample, 0 when unset.
    source: u32,
    /// Per-index value-kind bitmap: bit set = integer, clear = float.
    format: u64,
    /// Origin, received and sent timestamps.
    ts: Timestamps,
}

const HEADER_BYTES: usize = std::mem::size_of::<SampleHeader>();
const VALUE_BYTES: usize = std::mem::size_of::<Value>();

/// Values a block of `block_size` bytes can hold behind the header.
#[inline]
const fn value_capacity(block_size: usize) -> usize {
    (block_size - HEADER_BYTES) / VALUE_BYTES
}

// ============================================================================
// Values
// ============================================================================

/// Kind of a single value, as recorded in the sample's format bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// IEEE-754 single-precision float.
    Float,
    /// Signed 32-bit integer.
    Integer,
}

/// One 4-byte sample value.
///
/// The cell itself is untyped; the sample's format bitmap says whether an
/// index holds a float or an integer. Conversions are plain bit casts, so
/// any bit pattern is a valid `Value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Value(u32);

impl Value {
    /// A value holding a float.
    #[inline]
    pub fn float(v: f32) -> Self {
        Self(v.to_bits())
    }

    /// A value holding an integer.
    #[inline]
    pub fn integer(v: i32) -> Self {
        Self(v as u32)
    }

    /// Interpret the cell as a float.
    #[inline]
    pub fn as_f32(self) -> f32 {
        f32::from_bits(self.0)
    }

    /// Interpret the cell as an integer.
    #[inline]
    pub fn as_i32(self) -> i32 {
        self.0 as i32
    }

    /// Raw bit pattern.
    #[inline]
    pub fn to_bits(self) -> u32 {
        self.0
    }

    /// Value from a raw bit pattern.
    #[inline]
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }
}

// ============================================================================
// Sample
// ============================================================================

/// Shared handle to one sample block.
///
/// # Example
///
/// ```rust
/// use millrace::memory::MemoryType;
/// use millrace::pool::Pool;
/// use millrace::sample::{Sample, Value, ValueKind};
///
/// let pool = Pool::new(8, Sample::bytes_required(16), MemoryType::Heap).unwrap();
/// let mut smp = Sample::alloc(&pool).unwrap();
///
/// smp.set_len(2);
/// if let Some(values) = smp.values_mut() {
///     values[0] = Value::float(1.5);
///     values[1] = Value::integer(-3);
/// }
/// smp.set_value_kind(1, ValueKind::Integer);
///
/// assert_eq!(smp.values()[0].as_f32(), 1.5);
/// assert_eq!(smp.value_kind(1), Some(ValueKind::Integer));
/// ```
pub struct Sample {
    header: NonNull<SampleHeader>,
    pool: Arc<Pool>,
}

// SAFETY: the handle moves whole; the refcount is atomic and plain header
// fields are only written through the sole-owner assert, so no two threads
// write the same block concurrently.
unsafe impl Send for Sample {}
// SAFETY: &Sample only permits reads of plain header fields plus atomic
// refcount operations; every write path requires &mut plus sole ownership.
unsafe impl Sync for Sample {}

impl Sample {
    /// Bytes a block needs to carry a sample with `values` values.
    ///
    /// Feed this to [`Pool::new`] as the block size; the pool's cache-line
    /// rounding may grant a little extra capacity.
    #[inline]
    pub const fn bytes_required(values: usize) -> usize {
        HEADER_BYTES + values * VALUE_BYTES
    }

    /// Allocate one sample from `pool`.
    ///
    /// The returned handle holds the first (and only) reference. The header
    /// is fully initialized: sequence 0, length 0, capacity from the pool's
    /// block size, bitmap and timestamps cleared.
    ///
    /// # Errors
    ///
    /// [`Error::PoolExhausted`] when no block is free. Treat it as
    /// backpressure, not a fault.
    pub fn alloc(pool: &Arc<Pool>) -> Result<Self> {
        let block = pool.get().ok_or(Error::PoolExhausted)?;
        let header = block.cast::<SampleHeader>();

        // SAFETY: pool blocks are cache-line aligned (stricter than the
        // header's alignment) and at least one cache line long, which
        // covers the 56-byte header.
        unsafe {
            header.as_ptr().write(SampleHeader {
                sequence: 0,
                length: 0,
                capacity: value_capacity(pool.block_size()) as u32,
                refcount: AtomicU32::new(1),
                source: 0,
                format: 0,
                ts: Timestamps::default(),
            });
        }

        Ok(Self {
            header,
            pool: Arc::clone(pool),
        })
    }

    /// Allocate up to `count` samples.
    ///
    /// Returns fewer when the pool runs out; that is degradation the
    /// caller handles (typically by dropping the read), not an error.
    pub fn alloc_many(pool: &Arc<Pool>, count: usize) -> Vec<Self> {
        let mut samples = Vec::with_capacity(count);
        for _ in 0..count {
            match Self::alloc(pool) {
                Ok(smp) => samples.push(smp),
                Err(_) => break,
            }
        }
        if samples.len() < count {
            tracing::warn!(
                requested = count,
                allocated = samples.len(),
                "pool exhausted during batch allocation"
            );
        }
        samples
    }

    #[inline]
    fn header_ptr(&self) -> *mut SampleHeader {
        self.header.as_ptr()
    }

    #[inline]
    fn refcount(&self) -> &AtomicU32 {
        // SAFETY: the header outlives the handle and the refcount field is
        // atomic, so a shared reference is always valid.
        unsafe { &(*self.header_ptr()).refcount }
    }

    /// Current reference count.
    #[inline]
    pub fn ref_count(&self) -> u32 {
        self.refcount().load(Ordering::Acquire)
    }

    #[inline]
    fn assert_sole_owner(&self) {
        assert_eq!(self.ref_count(), 1, "sample mutated while shared");
    }

    /// Sequence number.
    #[inline]
    pub fn sequence(&self) -> u64 {
        // SAFETY: reads of plain fields are safe; writers hold the sole
        // reference, so no concurrent write can exist alongside this read.
        unsafe { (*self.header_ptr()).sequence }
    }

    /// Set the sequence number. Sole-owner operation.
    #[inline]
    pub fn set_sequence(&mut self, sequence: u64) {
        self.assert_sole_owner();
        // SAFETY: sole ownership just asserted; no other reference exists.
        unsafe { (*self.header_ptr()).sequence = sequence };
    }

    /// Number of valid values.
    #[inline]
    pub fn len(&self) -> usize {
        // SAFETY: see `sequence`.
        unsafe { (*self.header_ptr()).length as usize }
    }

    /// Whether the sample carries no values.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set the number of valid values. Sole-owner operation.
    ///
    /// # Panics
    ///
    /// Panics if `len > capacity()`.
    #[inline]
    pub fn set_len(&mut self, len: usize) {
        self.assert_sole_owner();
        assert!(len <= self.capacity(), "length exceeds sample capacity");
        // SAFETY: sole ownership asserted above.
        unsafe { (*self.header_ptr()).length = len as u32 };
    }

    /// Maximum values this block can hold; fixed at allocation.
    #[inline]
    pub fn capacity(&self) -> usize {
        // SAFETY: see `sequence`.
        unsafe { (*self.header_ptr()).capacity as usize }
    }

    /// The three timestamps.
    #[inline]
    pub fn ts(&self) -> Timestamps {
        // SAFETY: see `sequence`.
        unsafe { (*self.header_ptr()).ts }
    }

    /// Set the origin timestamp. Sole-owner operation.
    #[inline]
    pub fn set_ts_origin(&mut self, ts: Timestamp) {
        self.assert_sole_owner();
        // SAFETY: sole ownership asserted above.
        unsafe { (*self.header_ptr()).ts.origin = ts };
    }

    /// Set the received timestamp. Sole-owner operation.
    #[inline]
    pub fn set_ts_received(&mut self, ts: Timestamp) {
        self.assert_sole_owner();
        // SAFETY: sole ownership asserted above.
        unsafe { (*self.header_ptr()).ts.received = ts };
    }

    /// Set the sent timestamp. Sole-owner operation.
    #[inline]
    pub fn set_ts_sent(&mut self, ts: Timestamp) {
        self.assert_sole_owner();
        // SAFETY: sole ownership asserted above.
        unsafe { (*self.header_ptr()).ts.sent = ts };
    }

    /// Node that produced this sample, if recorded.
    #[inline]
    pub fn source(&self) -> Option<NodeId> {
        // SAFETY: see `sequence`.
        NodeId::from_raw(unsafe { (*self.header_ptr()).source })
    }

    /// Record the producing node. Sole-owner operation.
    #[inline]
    pub fn set_source(&mut self, id: NodeId) {
        self.assert_sole_owner();
        // SAFETY: sole ownership asserted above.
        unsafe { (*self.header_ptr()).source = id.as_u32() };
    }

    /// Kind of the value at `idx`, or `None` for indices the 64-bit bitmap
    /// cannot describe (`idx >= 64`).
    #[inline]
    pub fn value_kind(&self, idx: usize) -> Option<ValueKind> {
        if idx >= 64 {
            return None;
        }
        // SAFETY: see `sequence`.
        let format = unsafe { (*self.header_ptr()).format };
        Some(if format & (1 << idx) != 0 {
            ValueKind::Integer
        } else {
            ValueKind::Float
        })
    }

    /// Record the kind of the value at `idx`. Sole-owner operation.
    ///
    /// Returns `false` for `idx >= 64`.
    #[inline]
    pub fn set_value_kind(&mut self, idx: usize, kind: ValueKind) -> bool {
        if idx >= 64 {
            return false;
        }
        self.assert_sole_owner();
        // SAFETY: sole ownership asserted above.
        unsafe {
            let format = &mut (*self.header_ptr()).format;
            match kind {
                ValueKind::Integer => *format |= 1 << idx,
                ValueKind::Float => *format &= !(1 << idx),
            }
        }
        true
    }

    #[inline]
    fn values_base(&self) -> *mut Value {
        // Values start directly behind the header; offset 56 keeps the
        // required 4-byte alignment.
        // SAFETY: in-bounds offset within the sample's block.
        unsafe { self.header_ptr().cast::<u8>().add(HEADER_BYTES).cast::<Value>() }
    }

    /// The valid values, `len()` of them.
    #[inline]
    pub fn values(&self) -> &[Value] {
        // SAFETY: the block reserves `capacity` cells behind the header and
        // `length <= capacity` always holds; cells are plain 4-byte data,
        // valid for any bit pattern.
        unsafe { std::slice::from_raw_parts(self.values_base(), self.len()) }
    }

    /// The whole writable value array, `capacity()` cells.
    ///
    /// `None` unless this handle is the sole owner, since a cloned
    /// (fanned-out) sample is read-only. Write values first, then publish
    /// the valid count with [`Sample::set_len`].
    #[inline]
    pub fn values_mut(&mut self) -> Option<&mut [Value]> {
        if self.ref_count() != 1 {
            return None;
        }
        // SAFETY: sole ownership checked; the block reserves `capacity`
        // cells and stale contents are valid `Value` bit patterns.
        Some(unsafe { std::slice::from_raw_parts_mut(self.values_base(), self.capacity()) })
    }
}

impl Clone for Sample {
    fn clone(&self) -> Self {
        self.refcount().fetch_add(1, Ordering::AcqRel);
        Self {
            header: self.header,
            pool: Arc::clone(&self.pool),
        }
    }
}

impl Drop for Sample {
    fn drop(&mut self) {
        let prev = self.refcount().fetch_sub(1, Ordering::AcqRel);
        if prev == 1 && !self.pool.put(self.header.cast::<u8>()) {
            tracing::error!("sample block rejected by its own pool");
        }
    }
}

impl std::fmt::Debug for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sample")
            .field("sequence", &self.sequence())
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("ref_count", &self.ref_count())
            .field("source", &self.source())
            .finish()
    }
}
