//! Built-in node kinds.
//!
//! Concrete [`NodeKind`](crate::node::NodeKind) implementations shipped
//! with the crate: an in-memory loopback for wiring paths together and a
//! timer-paced signal generator for feeding them. External transports
//! implement the same trait from their own crates.

pub mod loopback;
pub mod signal;

pub use loopback::{LoopbackHandle, LoopbackNode};
pub use signal::{SignalNode, Waveform};
