//! # Millrace
//!
//! Lock-free sample transport between real-time data nodes.
//!
//! Millrace moves small, timestamped measurement samples from source nodes
//! to destination nodes through per-path hook pipelines, without locks or
//! allocation on the data path.
//!
//! ## Features
//!
//! - **Lock-free pool**: a bounded MPMC queue serves as the free list,
//!   so allocation is a queue pull and release is a queue push
//! - **Reference-counted samples**: cloning shares the block, the last
//!   drop returns it to its pool
//! - **Hook pipeline**: priority-ordered sample processing with built-in
//!   reorder dropping and restart detection
//! - **Multi-source paths**: any/all gating across up to 64 sources, with
//!   optional fixed-rate resend of the latest batch
//! - **Linux-optimized**: memfd-backed shared segments, huge pages,
//!   timerfd pacing, eventfd wakeups
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use millrace::prelude::*;
//! use millrace::nodes::{LoopbackNode, SignalNode, Waveform};
//!
//! let source = Node::new(
//!     "sine",
//!     Box::new(SignalNode::new(Waveform::Sine).with_rate(100.0)),
//! )
//! .into_shared();
//! let sink = Node::new("sink", Box::new(LoopbackNode::new(64))).into_shared();
//! source.lock().unwrap().start()?;
//! sink.lock().unwrap().start()?;
//!
//! let mut path = Path::builder("acquisition")
//!     .source(source)
//!     .destination(sink)
//!     .build()?;
//! path.check()?;
//! path.start()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod clock;
pub mod error;
pub mod hook;
pub mod hooks;
pub mod memory;
pub mod node;
pub mod nodes;
pub mod observability;
pub mod path;
pub mod pool;
pub mod queue;
pub mod sample;
pub mod stats;
pub mod task;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::clock::{Timestamp, Timestamps};
    pub use crate::error::{Error, Result};
    pub use crate::memory::MemoryType;
    pub use crate::node::{Node, NodeKind, SharedNode, State};
    pub use crate::path::{Mapping, Mode, Path, PathBuilder};
    pub use crate::pool::Pool;
    pub use crate::sample::{Sample, Value, ValueKind};
}

pub use error::{Error, Result};
