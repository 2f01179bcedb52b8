//! Error types for millrace.

use thiserror::Error;

/// Result type alias using millrace's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for millrace operations.
///
/// Capacity exhaustion on the hot path (full queue, empty pool) is *not*
/// represented here; those are expected conditions expressed as rejected
/// items and short counts. `Error` covers startup failures, lifecycle
/// misuse and the clean end-of-stream signal.
#[derive(Error, Debug)]
pub enum Error {
    /// Memory pool is exhausted (no blocks available).
    #[error("memory pool exhausted: no blocks available")]
    PoolExhausted,

    /// Backing memory allocation failed.
    #[error("memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Invalid configuration, rejected before any thread starts.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A hook name had no registered constructor.
    #[error("unknown hook type: {0}")]
    UnknownHook(String),

    /// An operation was attempted in a state that does not permit it.
    #[error("cannot {op} in state {state:?}")]
    InvalidState {
        /// The attempted operation.
        op: &'static str,
        /// The state the component was in.
        state: crate::node::State,
    },

    /// The endpoint does not implement this capability.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    /// Clean end of stream: the far side stopped or the run finished.
    ///
    /// This is a lifecycle signal, not a fault; path readers shut down
    /// quietly when they see it.
    #[error("end of stream")]
    Stopped,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System call error (via rustix).
    #[error("system error: {0}")]
    System(#[from] rustix::io::Errno),
}
