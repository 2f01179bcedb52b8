//! Time types for sample metadata.
//!
//! This module provides:
//! - [`Timestamp`]: wall-clock nanoseconds since the Unix epoch (8 bytes, Copy)
//! - [`Timestamps`]: the origin/received/sent triple carried by every sample
//!
//! The zero timestamp doubles as the "unset" sentinel, matching the all-zero
//! state of a freshly initialized sample header.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// Timestamp
// ============================================================================

/// Wall-clock time in nanoseconds since the Unix epoch (8 bytes, Copy).
///
/// # Special Values
///
/// - `Timestamp::ZERO`: unset (no timestamp recorded)
///
/// # Examples
///
/// ```rust
/// use millrace::clock::Timestamp;
///
/// let t = Timestamp::from_nanos(1_500_000_000);
/// assert_eq!(t.as_nanos(), 1_500_000_000);
/// assert!(!t.is_unset());
/// assert_eq!(format!("{}", t), "1.500000000");
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The unset timestamp.
    pub const ZERO: Self = Self(0);

    /// Create from nanoseconds since the Unix epoch.
    #[inline]
    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    /// Capture the current wall-clock time.
    ///
    /// A clock set before 1970 collapses to [`Timestamp::ZERO`].
    #[inline]
    pub fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => Self(d.as_nanos() as u64),
            Err(_) => Self::ZERO,
        }
    }

    /// Nanoseconds since the Unix epoch.
    #[inline]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Whether this timestamp was never recorded.
    #[inline]
    pub const fn is_unset(self) -> bool {
        self.0 == 0
    }

    /// Seconds (fractional) between `earlier` and `self`.
    ///
    /// Negative when `self` precedes `earlier`; useful for one-way delays
    /// measured across imperfectly synchronized clocks.
    #[inline]
    pub fn seconds_since(self, earlier: Timestamp) -> f64 {
        (self.0 as f64 - earlier.0 as f64) / 1e9
    }

    /// This timestamp shifted forward by `d`, saturating at the maximum.
    #[inline]
    pub fn saturating_add(self, d: std::time::Duration) -> Timestamp {
        Self(self.0.saturating_add(d.as_nanos() as u64))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.0 / 1_000_000_000, self.0 % 1_000_000_000)
    }
}

// ============================================================================
// Timestamps
// ============================================================================

/// The three timestamps carried by every sample.
///
/// Part of the fixed sample header layout; all fields default to unset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Timestamps {
    /// When the value was produced at its origin (set by the source).
    pub origin: Timestamp,
    /// When this process received the sample (stamped at node ingress).
    pub received: Timestamp,
    /// When this process sent the sample onwards (stamped at fan-out).
    pub sent: Timestamp,
}
