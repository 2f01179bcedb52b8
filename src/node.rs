//! Polymorphic I/O endpoints.
//!
//! A [`Node`] wraps one concrete [`NodeKind`] (a signal generator, an
//! in-memory loopback, a socket adapter living outside this crate) behind a
//! uniform read/write surface. The wrapper owns everything kinds should not
//! have to repeat: the lifecycle state machine, vectorize chunking, the
//! per-node sequence counter and the source/timestamp stamping of freshly
//! read samples.
//!
//! Kinds stay synchronous and single-threaded; a path serializes access to
//! each node from its worker threads.

use crate::clock::Timestamp;
use crate::error::{Error, Result};
use crate::sample::Sample;
use smallvec::SmallVec;
use std::num::NonZeroU32;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Default `sample_len` hint for kinds that do not declare one.
pub const DEFAULT_SAMPLE_LEN: usize = 64;

/// A node shared between its owner and a path's worker threads.
///
/// Kinds are single-threaded by contract; the mutex serializes every
/// reader/writer that touches the endpoint.
pub type SharedNode = Arc<Mutex<Node>>;

// ============================================================================
// State machine
// ============================================================================

/// Lifecycle states shared by nodes and paths.
///
/// `Created` and `Stopped` are the re-entrant states: both accept a fresh
/// `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Constructed, not yet validated.
    Created,
    /// Validated configuration, ready to start.
    Checked,
    /// Start in progress.
    Starting,
    /// Live.
    Running,
    /// Stop in progress.
    Stopping,
    /// Stopped; may be started again.
    Stopped,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            State::Created => "created",
            State::Checked => "checked",
            State::Starting => "starting",
            State::Running => "running",
            State::Stopping => "stopping",
            State::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Node identity
// ============================================================================

static NEXT_NODE_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique node identifier.
///
/// Ids start at 1; samples store `0` for "no source", which is why this is
/// a `NonZeroU32` under the hood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(NonZeroU32);

impl NodeId {
    fn next() -> Self {
        let raw = NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroU32::new(raw).unwrap_or(NonZeroU32::MIN))
    }

    /// Id from its wire representation; `0` means "unset".
    #[inline]
    pub fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    /// Wire representation.
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0.get()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// NodeKind trait
// ============================================================================

/// Capability interface a concrete endpoint implements.
///
/// The [`Node`] wrapper handles chunking and state; a kind only moves
/// samples.
///
/// # Read contract
///
/// `read` receives a slice of pre-allocated samples from the path's pool
/// and fills the first `n` of them, returning `n`. A kind backed by its own
/// queue may instead *replace* slice entries with samples it already holds;
/// the displaced pre-allocations return to their pool automatically when
/// overwritten. Returning `Err(Error::Stopped)` signals a clean
/// end-of-stream; returning `Ok(0)` means "nothing right now".
///
/// # Example
///
/// ```rust,ignore
/// struct CounterKind { next: u64 }
///
/// impl NodeKind for CounterKind {
///     fn kind(&self) -> &'static str { "counter" }
///
///     fn read(&mut self, samples: &mut [Sample]) -> Result<usize> {
///         for smp in samples.iter_mut() {
///             smp.set_sequence(self.next);
///             self.next += 1;
///         }
///         Ok(samples.len())
///     }
///
///     fn write(&mut self, samples: &[Sample]) -> Result<usize> {
///         Ok(samples.len()) // discard
///     }
/// }
/// ```
pub trait NodeKind: Send {
    /// Short static name of the kind ("signal", "loopback", ...).
    fn kind(&self) -> &'static str;

    /// Acquire backend resources. Called by [`Node::start`].
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release backend resources. Called by [`Node::stop`].
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Read up to `samples.len()` samples; see the read contract above.
    fn read(&mut self, samples: &mut [Sample]) -> Result<usize>;

    /// Write a batch, returning how many samples were accepted.
    fn write(&mut self, samples: &[Sample]) -> Result<usize>;

    /// Swap the endpoint's direction, where that is meaningful.
    fn reverse(&mut self) -> Result<()> {
        Err(Error::NotSupported("reverse"))
    }

    /// File descriptors a path may poll instead of blocking in `read`.
    ///
    /// Empty when the kind cannot be multiplexed.
    fn poll_fds(&self) -> SmallVec<[RawFd; 2]> {
        SmallVec::new()
    }

    /// How many values per sample this endpoint works with.
    fn sample_len(&self) -> usize {
        DEFAULT_SAMPLE_LEN
    }
}

// ============================================================================
// Node wrapper
// ============================================================================

/// A named, stateful endpoint around one [`NodeKind`].
pub struct Node {
    name: String,
    id: NodeId,
    kind: Box<dyn NodeKind>,
    vectorize: usize,
    affinity: Option<usize>,
    sequence: u64,
    state: State,
}

impl Node {
    /// Wrap `kind` under `name`. Vectorize defaults to 1 (no batching).
    pub fn new(name: impl Into<String>, kind: Box<dyn NodeKind>) -> Self {
        Self {
            name: name.into(),
            id: NodeId::next(),
            kind,
            vectorize: 1,
            affinity: None,
            sequence: 0,
            state: State::Created,
        }
    }

    /// Set the maximum batch size per backend call.
    pub fn with_vectorize(mut self, vectorize: usize) -> Self {
        self.vectorize = vectorize;
        self
    }

    /// Pin the worker thread servicing this node to a CPU.
    pub fn with_affinity(mut self, cpu: usize) -> Self {
        self.affinity = Some(cpu);
        self
    }

    /// Wrap this node for sharing with a path.
    pub fn into_shared(self) -> SharedNode {
        Arc::new(Mutex::new(self))
    }

    /// Node name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process-unique id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Kind name ("signal", "loopback", ...).
    pub fn kind_name(&self) -> &'static str {
        self.kind.kind()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Maximum batch size per backend call.
    pub fn vectorize(&self) -> usize {
        self.vectorize
    }

    /// CPU the servicing worker should pin itself to.
    pub fn affinity(&self) -> Option<usize> {
        self.affinity
    }

    /// Samples read since the last start.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Values per sample this endpoint works with.
    pub fn sample_len(&self) -> usize {
        self.kind.sample_len()
    }

    /// Descriptors a path may poll; empty if unsupported.
    pub fn poll_fds(&self) -> SmallVec<[RawFd; 2]> {
        self.kind.poll_fds()
    }

    /// Start the node: validate, open the backend, reset the sequence.
    ///
    /// Only legal from `Created` or `Stopped`.
    pub fn start(&mut self) -> Result<()> {
        if !matches!(self.state, State::Created | State::Stopped) {
            return Err(Error::InvalidState {
                op: "start",
                state: self.state,
            });
        }
        if self.vectorize == 0 {
            return Err(Error::Config(format!(
                "node '{}' has vectorize 0; need at least 1",
                self.name
            )));
        }

        let prev = self.state;
        self.state = State::Starting;
        if let Err(err) = self.kind.open() {
            self.state = prev;
            return Err(err);
        }
        self.sequence = 0;
        self.state = State::Running;
        tracing::debug!(node = %self.name, id = %self.id, kind = self.kind.kind(), "node started");
        Ok(())
    }

    /// Stop the node and close the backend. Only legal from `Running`.
    pub fn stop(&mut self) -> Result<()> {
        if self.state != State::Running {
            return Err(Error::InvalidState {
                op: "stop",
                state: self.state,
            });
        }
        self.state = State::Stopping;
        let result = self.kind.close();
        self.state = State::Stopped;
        tracing::debug!(node = %self.name, "node stopped");
        result
    }

    /// Swap source and destination roles, where the kind supports it.
    /// Only legal while the node is not running.
    pub fn reverse(&mut self) -> Result<()> {
        if self.state == State::Running {
            return Err(Error::InvalidState {
                op: "reverse",
                state: self.state,
            });
        }
        self.kind.reverse()
    }

    /// Read into `samples`, chunked by `vectorize`.
    ///
    /// Sub-calls accumulate until the slice is full or a sub-call makes no
    /// progress. Freshly read samples get this node recorded as their
    /// source and, if the backend left it unset, a `received` timestamp.
    pub fn read(&mut self, samples: &mut [Sample]) -> Result<usize> {
        if self.state != State::Running {
            return Err(Error::InvalidState {
                op: "read",
                state: self.state,
            });
        }

        let mut total = 0;
        while total < samples.len() {
            let chunk = (samples.len() - total).min(self.vectorize);
            let n = match self.kind.read(&mut samples[total..total + chunk]) {
                Ok(n) => n,
                // Samples already read are not discarded; the error
                // resurfaces on the next call.
                Err(err) if total > 0 => {
                    tracing::debug!(node = %self.name, %err, "read stopped after partial batch");
                    break;
                }
                Err(err) => return Err(err),
            };
            if n == 0 {
                break;
            }

            let now = Timestamp::now();
            for smp in &mut samples[total..total + n] {
                // Samples a kind swapped in may still be co-owned by the
                // producing side; those keep their original provenance.
                if smp.ref_count() == 1 {
                    smp.set_source(self.id);
                    if smp.ts().received.is_unset() {
                        smp.set_ts_received(now);
                    }
                }
            }

            self.sequence = self.sequence.wrapping_add(n as u64);
            total += n;
        }
        Ok(total)
    }

    /// Write `samples`, chunked by `vectorize`.
    ///
    /// Returns how many samples the backend accepted; stops early on a
    /// zero-progress sub-call.
    pub fn write(&mut self, samples: &[Sample]) -> Result<usize> {
        if self.state != State::Running {
            return Err(Error::InvalidState {
                op: "write",
                state: self.state,
            });
        }

        let mut total = 0;
        while total < samples.len() {
            let chunk = (samples.len() - total).min(self.vectorize);
            let n = match self.kind.write(&samples[total..total + chunk]) {
                Ok(n) => n,
                Err(err) if total > 0 => {
                    tracing::debug!(node = %self.name, %err, "write stopped after partial batch");
                    break;
                }
                Err(err) => return Err(err),
            };
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("kind", &self.kind.kind())
            .field("state", &self.state)
            .field("vectorize", &self.vectorize)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryType;
    use crate::pool::Pool;
    use std::sync::Arc;

    /// Emits counted sequences and records every sub-call size.
    struct CounterKind {
        next: u64,
        limit: Option<u64>,
        chunks: Arc<std::sync::Mutex<Vec<usize>>>,
    }

    impl CounterKind {
        fn new() -> Self {
            Self {
                next: 0,
                limit: None,
                chunks: Arc::default(),
            }
        }

        fn with_limit(limit: u64) -> Self {
            Self {
                limit: Some(limit),
                ..Self::new()
            }
        }

        fn chunk_log(&self) -> Arc<std::sync::Mutex<Vec<usize>>> {
            self.chunks.clone()
        }
    }

    impl NodeKind for CounterKind {
        fn kind(&self) -> &'static str {
            "counter"
        }

        fn read(&mut self, samples: &mut [Sample]) -> Result<usize> {
            self.chunks.lock().unwrap().push(samples.len());
            let mut filled = 0;
            for smp in samples.iter_mut() {
                if let Some(limit) = self.limit {
                    if self.next >= limit {
                        break;
                    }
                }
                smp.set_sequence(self.next);
                self.next += 1;
                filled += 1;
            }
            Ok(filled)
        }

        fn write(&mut self, samples: &[Sample]) -> Result<usize> {
            self.chunks.lock().unwrap().push(samples.len());
            Ok(samples.len())
        }
    }

    fn test_pool() -> Arc<Pool> {
        Pool::new(32, Sample::bytes_required(8), MemoryType::Heap).unwrap()
    }

    fn batch(pool: &Arc<Pool>, n: usize) -> Vec<Sample> {
        Sample::alloc_many(pool, n)
    }

    #[test]
    fn test_state_machine() {
        let mut node = Node::new("n", Box::new(CounterKind::new()));
        assert_eq!(node.state(), State::Created);

        node.start().unwrap();
        assert_eq!(node.state(), State::Running);

        // Double start is a lifecycle error.
        assert!(matches!(
            node.start(),
            Err(Error::InvalidState { op: "start", .. })
        ));

        node.stop().unwrap();
        assert_eq!(node.state(), State::Stopped);

        // Stopped is re-entrant.
        node.start().unwrap();
        assert_eq!(node.state(), State::Running);
        node.stop().unwrap();
    }

    #[test]
    fn test_vectorize_zero_rejected() {
        let mut node = Node::new("n", Box::new(CounterKind::new())).with_vectorize(0);
        assert!(matches!(node.start(), Err(Error::Config(_))));
    }

    #[test]
    fn test_read_requires_running() {
        let pool = test_pool();
        let mut node = Node::new("n", Box::new(CounterKind::new()));
        let mut samples = batch(&pool, 2);
        assert!(matches!(
            node.read(&mut samples),
            Err(Error::InvalidState { op: "read", .. })
        ));
    }

    #[test]
    fn test_read_chunks_by_vectorize() {
        let pool = test_pool();
        let kind = CounterKind::new();
        let chunks = kind.chunk_log();
        let mut node = Node::new("n", Box::new(kind)).with_vectorize(4);
        node.start().unwrap();

        let mut samples = batch(&pool, 10);
        let n = node.read(&mut samples).unwrap();
        assert_eq!(n, 10);
        assert_eq!(node.sequence(), 10);
        assert_eq!(*chunks.lock().unwrap(), vec![4, 4, 2]);

        for (i, smp) in samples.iter().enumerate() {
            assert_eq!(smp.sequence(), i as u64);
        }
    }

    #[test]
    fn test_write_chunk_sizes() {
        let pool = test_pool();
        let kind = CounterKind::new();
        let chunks = kind.chunk_log();
        let mut node = Node::new("n", Box::new(kind)).with_vectorize(4);
        node.start().unwrap();

        let samples = batch(&pool, 10);
        assert_eq!(node.write(&samples).unwrap(), 10);
        assert_eq!(*chunks.lock().unwrap(), vec![4, 4, 2]);
    }

    #[test]
    fn test_zero_progress_stops_loop() {
        let pool = test_pool();
        let kind = CounterKind::with_limit(6);
        let chunks = kind.chunk_log();
        let mut node = Node::new("n", Box::new(kind)).with_vectorize(4);
        node.start().unwrap();

        let mut samples = batch(&pool, 10);
        let n = node.read(&mut samples).unwrap();
        assert_eq!(n, 6);
        assert_eq!(node.sequence(), 6);
        // Second chunk fills only 2 of 4; the loop keeps going and stops at
        // the third chunk's zero-progress call.
        assert_eq!(*chunks.lock().unwrap(), vec![4, 4, 4]);
    }

    #[test]
    fn test_error_after_progress_keeps_partial_batch() {
        /// Succeeds for `good` samples, then fails every call.
        struct FlakyKind {
            good: usize,
            next: u64,
        }

        impl NodeKind for FlakyKind {
            fn kind(&self) -> &'static str {
                "flaky"
            }

            fn read(&mut self, samples: &mut [Sample]) -> Result<usize> {
                if self.good == 0 {
                    return Err(Error::Stopped);
                }
                let n = samples.len().min(self.good);
                self.good -= n;
                for smp in &mut samples[..n] {
                    smp.set_sequence(self.next);
                    self.next += 1;
                }
                Ok(n)
            }

            fn write(&mut self, _samples: &[Sample]) -> Result<usize> {
                Err(Error::Stopped)
            }
        }

        let pool = test_pool();
        let mut node =
            Node::new("n", Box::new(FlakyKind { good: 3, next: 0 })).with_vectorize(2);
        node.start().unwrap();

        // The error after 3 samples does not discard them.
        let mut samples = batch(&pool, 6);
        assert_eq!(node.read(&mut samples).unwrap(), 3);

        // With no progress made, it propagates.
        assert!(matches!(node.read(&mut samples), Err(Error::Stopped)));
        assert!(matches!(node.write(&samples), Err(Error::Stopped)));
    }

    #[test]
    fn test_read_stamps_source_and_received() {
        let pool = test_pool();
        let mut node = Node::new("n", Box::new(CounterKind::new())).with_vectorize(8);
        node.start().unwrap();

        let mut samples = batch(&pool, 4);
        node.read(&mut samples).unwrap();

        for smp in &samples {
            assert_eq!(smp.source(), Some(node.id()));
            assert!(!smp.ts().received.is_unset());
        }
    }

    #[test]
    fn test_sequence_resets_on_start() {
        let pool = test_pool();
        let mut node = Node::new("n", Box::new(CounterKind::new())).with_vectorize(8);
        node.start().unwrap();

        let mut samples = batch(&pool, 5);
        node.read(&mut samples).unwrap();
        assert_eq!(node.sequence(), 5);

        node.stop().unwrap();
        node.start().unwrap();
        assert_eq!(node.sequence(), 0);
    }

    #[test]
    fn test_reverse_unsupported_by_default() {
        let mut node = Node::new("n", Box::new(CounterKind::new()));
        assert!(matches!(node.reverse(), Err(Error::NotSupported(_))));

        node.start().unwrap();
        assert!(matches!(
            node.reverse(),
            Err(Error::InvalidState { op: "reverse", .. })
        ));
        node.stop().unwrap();
    }

    #[test]
    fn test_node_ids_unique() {
        let a = Node::new("a", Box::new(CounterKind::new()));
        let b = Node::new("b", Box::new(CounterKind::new()));
        assert_ne!(a.id(), b.id());
        assert!(a.id().as_u32() >= 1);
    }
}
