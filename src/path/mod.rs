//! Paths: the runtime unit connecting sources to destinations.
//!
//! A [`Path`] reads batches of samples from one or more source nodes, runs
//! them through its hook pipeline and fans the survivors out to every
//! destination node. Construction goes through [`PathBuilder`];
//! [`Path::check`] validates the configuration and builds the sample pool
//! before any thread exists; [`Path::start`] spawns the workers.
//!
//! Multi-source gating follows [`Mode`]: `Any` forwards each source's
//! batches as they arrive, `All` assembles one sample per source per round
//! and forwards the assembled rounds. With a `rate`, writes decouple from
//! reads: a timer thread re-sends the latest surviving batch at a fixed
//! cadence (sample-and-hold).

mod builder;
mod worker;

pub use builder::PathBuilder;

use crate::error::{Error, Result};
use crate::hook::{Hook, HookEvent, Pipeline};
use crate::node::{SharedNode, State};
use crate::observability::PathMetrics;
use crate::pool::Pool;
use crate::sample::Sample;

use worker::{PathShared, Rounds, Shutdown};

use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Default per-source in-flight budget, in samples.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Hard cap on sources per path: the round bitmask is 64 bits wide.
const MAX_SOURCES: usize = 64;

// ============================================================================
// Configuration types
// ============================================================================

/// Gating policy for paths with several sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Process a batch as soon as any one source delivers.
    #[default]
    Any,
    /// Wait until every source contributed, then emit one sample per
    /// source per round.
    All,
}

/// Window into a source's value vector.
///
/// An arriving sample is narrowed to `values[offset..offset + length]`
/// before it enters the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    /// First value index to keep.
    pub offset: usize,
    /// Number of values to keep.
    pub length: usize,
}

/// A source endpoint with its optional value window.
#[derive(Clone)]
pub(crate) struct PathSource {
    pub(crate) node: SharedNode,
    pub(crate) mapping: Option<Mapping>,
}

// ============================================================================
// Path
// ============================================================================

struct Running {
    shared: Arc<PathShared>,
    workers: Vec<JoinHandle<()>>,
}

/// A configured path through the hook pipeline.
///
/// Lifecycle: `Created` → [`check`](Path::check) → `Checked` →
/// [`start`](Path::start) → `Running` → [`stop`](Path::stop) → `Stopped`,
/// and from `Stopped` back to `Running`. The pool built at check time is
/// reused across restarts.
pub struct Path {
    name: String,
    mode: Mode,
    rate: Option<f64>,
    periodic: Option<Duration>,
    enabled: bool,
    prefer_poll: bool,
    queue_depth: usize,
    pool_blocks: Option<usize>,
    memory_type: crate::memory::MemoryType,
    sources: Vec<PathSource>,
    destinations: Vec<SharedNode>,
    source_names: Vec<String>,
    dest_names: Vec<String>,
    pipeline: Arc<Mutex<Pipeline>>,
    metrics: PathMetrics,
    pool: Option<Arc<Pool>>,
    sample_len: usize,
    state: State,
    running: Option<Running>,
}

impl Path {
    /// Start building a path called `name`.
    pub fn builder(name: impl Into<String>) -> PathBuilder {
        PathBuilder::new(name)
    }

    pub(crate) fn assemble(builder: PathBuilder, hooks: Vec<(i32, Box<dyn Hook>)>) -> Self {
        let source_names: Vec<String> = builder
            .sources
            .iter()
            .map(|(node, _)| node.lock().unwrap().name().to_string())
            .collect();
        let dest_names: Vec<String> = builder
            .destinations
            .iter()
            .map(|node| node.lock().unwrap().name().to_string())
            .collect();
        let sources = builder
            .sources
            .into_iter()
            .map(|(node, mapping)| PathSource { node, mapping })
            .collect();
        let metrics = PathMetrics::new(&builder.name);

        Self {
            name: builder.name,
            mode: builder.mode,
            rate: builder.rate,
            periodic: builder.periodic,
            enabled: builder.enabled,
            prefer_poll: builder.prefer_poll,
            queue_depth: builder.queue_depth,
            pool_blocks: builder.pool_blocks,
            memory_type: builder.memory_type,
            sources,
            destinations: builder.destinations,
            source_names,
            dest_names,
            pipeline: Arc::new(Mutex::new(Pipeline::new(hooks))),
            metrics,
            pool: None,
            sample_len: 0,
            state: State::Created,
            running: None,
        }
    }

    /// Path name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Multi-source gating mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Whether `start` will actually spawn workers.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Whether workers are currently live.
    pub fn is_running(&self) -> bool {
        self.state == State::Running
    }

    /// Values per sample the pool is sized for; 0 before `check`.
    pub fn sample_len(&self) -> usize {
        self.sample_len
    }

    /// The sample pool, once `check` built it.
    pub fn pool(&self) -> Option<&Arc<Pool>> {
        self.pool.as_ref()
    }

    /// `(priority, name)` of each hook, in run order.
    pub fn hooks(&self) -> Vec<(i32, String)> {
        let pipeline = self.pipeline.lock().unwrap();
        pipeline
            .hooks()
            .map(|(priority, name)| (priority, name.to_string()))
            .collect()
    }

    /// Validate the configuration and build the sample pool.
    ///
    /// All failures are configuration errors raised before any worker
    /// thread exists. Only legal from `Created`.
    pub fn check(&mut self) -> Result<()> {
        if self.state != State::Created {
            return Err(Error::InvalidState {
                op: "check",
                state: self.state,
            });
        }
        if self.sources.is_empty() {
            return Err(Error::Config(format!("path '{}' has no sources", self.name)));
        }
        if self.destinations.is_empty() {
            return Err(Error::Config(format!(
                "path '{}' has no destinations",
                self.name
            )));
        }
        if self.sources.len() > MAX_SOURCES {
            return Err(Error::Config(format!(
                "path '{}' has {} sources; the round bitmask holds at most {}",
                self.name,
                self.sources.len(),
                MAX_SOURCES
            )));
        }
        if self.queue_depth == 0 {
            return Err(Error::Config("queue depth must be at least 1".into()));
        }
        if let Some(rate) = self.rate {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(Error::Config(format!("invalid path rate {rate}")));
            }
        }
        if let Some(interval) = self.periodic {
            if interval.is_zero() {
                return Err(Error::Config("periodic interval must be non-zero".into()));
            }
        }

        let mut sample_len = 0;
        for source in &self.sources {
            let node = source.node.lock().unwrap();
            if node.vectorize() == 0 {
                return Err(Error::Config(format!(
                    "source node '{}' has vectorize 0; need at least 1",
                    node.name()
                )));
            }
            let declared = node.sample_len();
            let mapped = match source.mapping {
                Some(mapping) => {
                    if mapping.length == 0 {
                        return Err(Error::Config(format!(
                            "mapping for source '{}' selects no values",
                            node.name()
                        )));
                    }
                    if mapping.offset + mapping.length > declared {
                        return Err(Error::Config(format!(
                            "mapping {}..{} exceeds the {} values of source '{}'",
                            mapping.offset,
                            mapping.offset + mapping.length,
                            declared,
                            node.name()
                        )));
                    }
                    // Blocks must hold the window end: the source deposits
                    // its values before the narrowing happens.
                    mapping.offset + mapping.length
                }
                None => declared,
            };
            sample_len = sample_len.max(mapped);
        }
        for dest in &self.destinations {
            let node = dest.lock().unwrap();
            if node.vectorize() == 0 {
                return Err(Error::Config(format!(
                    "destination node '{}' has vectorize 0; need at least 1",
                    node.name()
                )));
            }
        }

        self.sample_len = sample_len.max(1);
        let blocks = self
            .pool_blocks
            .unwrap_or(2 * self.queue_depth * self.sources.len());
        self.pool = Some(Pool::new(
            blocks,
            Sample::bytes_required(self.sample_len),
            self.memory_type,
        )?);

        self.state = State::Checked;
        tracing::debug!(
            path = %self.name,
            sample_len = self.sample_len,
            blocks,
            "path checked"
        );
        Ok(())
    }

    /// Spawn the path's workers.
    ///
    /// Only legal from `Checked` or `Stopped`, with every source and
    /// destination node already running. `PathStart` hooks run before the
    /// first worker exists. A disabled path logs and does nothing.
    pub fn start(&mut self) -> Result<()> {
        if !matches!(self.state, State::Checked | State::Stopped) {
            return Err(Error::InvalidState {
                op: "start",
                state: self.state,
            });
        }
        if !self.enabled {
            tracing::info!(path = %self.name, "path disabled, not starting");
            return Ok(());
        }
        let Some(pool) = self.pool.as_ref().map(Arc::clone) else {
            return Err(Error::Config(format!("path '{}' has no pool", self.name)));
        };

        for (source, name) in self.sources.iter().zip(&self.source_names) {
            if source.node.lock().unwrap().state() != State::Running {
                return Err(Error::Config(format!(
                    "source node '{name}' is not running"
                )));
            }
        }
        for (dest, name) in self.destinations.iter().zip(&self.dest_names) {
            if dest.lock().unwrap().state() != State::Running {
                return Err(Error::Config(format!(
                    "destination node '{name}' is not running"
                )));
            }
        }

        let use_poll = self.prefer_poll
            && self
                .sources
                .iter()
                .all(|source| !source.node.lock().unwrap().poll_fds().is_empty());

        let prev = self.state;
        self.state = State::Starting;

        {
            let mut pipeline = self.pipeline.lock().unwrap();
            if let Err(err) = pipeline.start_all() {
                self.state = prev;
                return Err(err);
            }
            pipeline.run(HookEvent::PathStart, &mut Vec::new());
        }

        let shared = Arc::new(PathShared {
            name: self.name.clone(),
            mode: self.mode,
            rate_limited: self.rate.is_some(),
            sources: self.sources.clone(),
            destinations: self.destinations.clone(),
            pool,
            pipeline: Arc::clone(&self.pipeline),
            metrics: self.metrics.clone(),
            shutdown: Shutdown::new(),
            stash: Mutex::new(Vec::new()),
            rounds: Mutex::new(Rounds::new(self.sources.len(), self.queue_depth)),
        });

        let mut workers = Vec::new();
        if let Err(err) = self.spawn_workers(&shared, use_poll, &mut workers) {
            shared.shutdown.signal();
            join_workers(&self.name, &mut workers);
            let mut pipeline = self.pipeline.lock().unwrap();
            pipeline.run(HookEvent::PathStop, &mut Vec::new());
            if let Err(stop_err) = pipeline.stop_all() {
                tracing::warn!(path = %self.name, err = %stop_err, "hook teardown failed during aborted start");
            }
            self.state = prev;
            return Err(err);
        }

        self.running = Some(Running {
            shared,
            workers,
        });
        self.state = State::Running;
        tracing::info!(
            path = %self,
            mode = ?self.mode,
            poll = use_poll,
            rate = self.rate,
            "path started"
        );
        Ok(())
    }

    fn spawn_workers(
        &self,
        shared: &Arc<PathShared>,
        use_poll: bool,
        workers: &mut Vec<JoinHandle<()>>,
    ) -> Result<()> {
        if use_poll {
            let s = Arc::clone(shared);
            workers.push(spawn_worker(format!("{}-poll", self.name), move || {
                worker::poll_loop(s)
            })?);
        } else {
            for (index, source_name) in self.source_names.iter().enumerate() {
                let s = Arc::clone(shared);
                workers.push(spawn_worker(
                    format!("{}-read-{}", self.name, source_name),
                    move || worker::reader_loop(s, index),
                )?);
            }
        }
        if let Some(rate) = self.rate {
            let s = Arc::clone(shared);
            workers.push(spawn_worker(format!("{}-rate", self.name), move || {
                worker::rate_loop(s, rate)
            })?);
        }
        if let Some(interval) = self.periodic {
            let s = Arc::clone(shared);
            workers.push(spawn_worker(format!("{}-periodic", self.name), move || {
                worker::periodic_loop(s, interval)
            })?);
        }
        Ok(())
    }

    /// Stop the workers, then run the `PathStop` hooks.
    ///
    /// Joins every worker before the hooks fire, so no batch is in flight
    /// when they observe the event. The path may be started again.
    pub fn stop(&mut self) -> Result<()> {
        if self.state != State::Running {
            return Err(Error::InvalidState {
                op: "stop",
                state: self.state,
            });
        }
        self.state = State::Stopping;

        let result = match self.running.take() {
            Some(mut running) => {
                running.shared.shutdown.signal();
                join_workers(&self.name, &mut running.workers);
                // Dropping the run state releases the stash and staged
                // samples back to the pool.
                drop(running);

                let mut pipeline = self.pipeline.lock().unwrap();
                pipeline.run(HookEvent::PathStop, &mut Vec::new());
                pipeline.stop_all()
            }
            None => Ok(()),
        };

        self.state = State::Stopped;
        tracing::info!(path = %self.name, "path stopped");
        result
    }
}

impl fmt::Display for Path {
    /// Renders the topology, `"src1, src2 => [dst1, dst2]"`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} => [{}]",
            self.source_names.join(", "),
            self.dest_names.join(", ")
        )
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Path")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("sources", &self.source_names)
            .field("destinations", &self.dest_names)
            .field("rate", &self.rate)
            .finish()
    }
}

impl Drop for Path {
    fn drop(&mut self) {
        if let Some(mut running) = self.running.take() {
            tracing::debug!(path = %self.name, "path dropped while running");
            running.shared.shutdown.signal();
            join_workers(&self.name, &mut running.workers);
        }
    }
}

fn spawn_worker(name: String, f: impl FnOnce() + Send + 'static) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(name)
        .spawn(f)
        .map_err(Error::Io)
}

fn join_workers(path: &str, workers: &mut Vec<JoinHandle<()>>) {
    for worker in workers.drain(..) {
        let name = worker.thread().name().unwrap_or("worker").to_string();
        if worker.join().is_err() {
            tracing::error!(path, worker = %name, "worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::nodes::{LoopbackHandle, LoopbackNode};

    const TICK: Duration = Duration::from_millis(10);
    const PATIENCE: Duration = Duration::from_millis(500);

    fn loopback(name: &str) -> (SharedNode, LoopbackHandle) {
        let kind = LoopbackNode::new(16).with_read_timeout(TICK);
        let handle = kind.handle();
        (Node::new(name, Box::new(kind)).into_shared(), handle)
    }

    fn loopback_with_len(name: &str, len: usize) -> SharedNode {
        let kind = LoopbackNode::new(16).with_sample_len(len);
        Node::new(name, Box::new(kind)).into_shared()
    }

    fn start_node(node: &SharedNode) {
        node.lock().unwrap().start().unwrap();
    }

    fn sequenced(pool: &Arc<Pool>, sequence: u64) -> Sample {
        let mut smp = Sample::alloc(pool).unwrap();
        smp.set_sequence(sequence);
        smp
    }

    fn test_pool() -> Arc<Pool> {
        Pool::new(
            32,
            Sample::bytes_required(8),
            crate::memory::MemoryType::Heap,
        )
        .unwrap()
    }

    #[test]
    fn test_check_requires_endpoints() {
        let (dst, _) = loopback("dst");
        let mut path = Path::builder("p").destination(dst).build().unwrap();
        assert!(matches!(path.check(), Err(Error::Config(msg)) if msg.contains("no sources")));

        let (src, _) = loopback("src");
        let mut path = Path::builder("p").source(src).build().unwrap();
        assert!(
            matches!(path.check(), Err(Error::Config(msg)) if msg.contains("no destinations"))
        );
    }

    #[test]
    fn test_check_validates_mappings() {
        let (dst, _) = loopback("dst");
        let mut path = Path::builder("p")
            .source_mapped(loopback_with_len("src", 4), Mapping { offset: 0, length: 0 })
            .destination(dst.clone())
            .build()
            .unwrap();
        assert!(matches!(path.check(), Err(Error::Config(msg)) if msg.contains("no values")));

        let mut path = Path::builder("p")
            .source_mapped(loopback_with_len("src", 4), Mapping { offset: 2, length: 3 })
            .destination(dst)
            .build()
            .unwrap();
        assert!(matches!(path.check(), Err(Error::Config(msg)) if msg.contains("exceeds")));
    }

    #[test]
    fn test_check_rejects_bad_timing() {
        let (dst, _) = loopback("dst");
        let (src, _) = loopback("src");
        let mut path = Path::builder("p")
            .source(src.clone())
            .destination(dst.clone())
            .rate(-1.0)
            .build()
            .unwrap();
        assert!(matches!(path.check(), Err(Error::Config(msg)) if msg.contains("rate")));

        let mut path = Path::builder("p")
            .source(src)
            .destination(dst)
            .periodic(Duration::ZERO)
            .build()
            .unwrap();
        assert!(matches!(path.check(), Err(Error::Config(msg)) if msg.contains("periodic")));
    }

    #[test]
    fn test_check_sizes_the_pool() {
        let (dst, _) = loopback("dst");
        let mut path = Path::builder("p")
            .source(loopback_with_len("a", 4))
            .source_mapped(loopback_with_len("b", 8), Mapping { offset: 2, length: 6 })
            .destination(dst)
            .queue_depth(8)
            .build()
            .unwrap();
        path.check().unwrap();

        assert_eq!(path.state(), State::Checked);
        // The deepest window end wins: source 'b' deposits values 0..8
        // before its window narrows them.
        assert_eq!(path.sample_len(), 8);
        // Two sources, depth 8, doubled for headroom.
        assert_eq!(path.pool().unwrap().capacity(), 32);

        // Checking twice is a lifecycle error.
        assert!(matches!(
            path.check(),
            Err(Error::InvalidState { op: "check", .. })
        ));
    }

    #[test]
    fn test_pool_blocks_override() {
        let (src, _) = loopback("src");
        let (dst, _) = loopback("dst");
        let mut path = Path::builder("p")
            .source(src)
            .destination(dst)
            .pool_blocks(10)
            .build()
            .unwrap();
        path.check().unwrap();
        assert_eq!(path.pool().unwrap().capacity(), 10);
    }

    #[test]
    fn test_start_needs_check_and_running_nodes() {
        let (src, _) = loopback("src");
        let (dst, _) = loopback("dst");
        let mut path = Path::builder("p")
            .source(src.clone())
            .destination(dst.clone())
            .build()
            .unwrap();

        assert!(matches!(
            path.start(),
            Err(Error::InvalidState { op: "start", .. })
        ));

        path.check().unwrap();
        // Nodes were never started.
        assert!(matches!(path.start(), Err(Error::Config(msg)) if msg.contains("not running")));

        start_node(&src);
        assert!(matches!(path.start(), Err(Error::Config(msg)) if msg.contains("'dst'")));
    }

    #[test]
    fn test_lifecycle_roundtrip() {
        let (src, _src_handle) = loopback("src");
        let (dst, _dst_handle) = loopback("dst");
        start_node(&src);
        start_node(&dst);

        let mut path = Path::builder("p")
            .source(src)
            .destination(dst)
            .build()
            .unwrap();
        path.check().unwrap();

        path.start().unwrap();
        assert!(path.is_running());
        path.stop().unwrap();
        assert_eq!(path.state(), State::Stopped);

        // Stopped paths restart with the same pool.
        path.start().unwrap();
        assert!(path.is_running());
        path.stop().unwrap();

        assert!(matches!(
            path.stop(),
            Err(Error::InvalidState { op: "stop", .. })
        ));
    }

    #[test]
    fn test_disabled_start_is_a_noop() {
        let (src, _) = loopback("src");
        let (dst, _) = loopback("dst");
        start_node(&src);
        start_node(&dst);

        let mut path = Path::builder("p")
            .source(src)
            .destination(dst)
            .enabled(false)
            .build()
            .unwrap();
        path.check().unwrap();

        path.start().unwrap();
        assert!(!path.is_running());
        assert_eq!(path.state(), State::Checked);
    }

    #[test]
    fn test_samples_flow_end_to_end() {
        let (src, src_handle) = loopback("src");
        let (dst, dst_handle) = loopback("dst");
        start_node(&src);
        start_node(&dst);

        let mut path = Path::builder("p")
            .source(src)
            .destination(dst)
            .build()
            .unwrap();
        path.check().unwrap();
        path.start().unwrap();

        let pool = test_pool();
        src_handle.inject(sequenced(&pool, 5)).unwrap();

        let delivered = dst_handle
            .extract(PATIENCE)
            .unwrap()
            .expect("sample should cross the path");
        assert_eq!(delivered.sequence(), 5);
        assert!(!delivered.ts().sent.is_unset());

        path.stop().unwrap();
    }

    #[test]
    fn test_display_shows_topology() {
        let (a, _) = loopback("a");
        let (b, _) = loopback("b");
        let (c, _) = loopback("c");
        let path = Path::builder("p")
            .source(a)
            .source(b)
            .destination(c)
            .build()
            .unwrap();
        assert_eq!(format!("{path}"), "a, b => [c]");
    }
}
