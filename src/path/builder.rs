//! Path construction.
//!
//! [`PathBuilder`] gathers the static configuration of a path: its
//! endpoints, hook chain, gating mode and timing. `build` resolves every
//! registry-named hook and hands back a [`Path`] in the `Created` state;
//! numeric and topological validation follows in [`Path::check`].

use crate::error::Result;
use crate::hook::Hook;
use crate::hooks::HookRegistry;
use crate::memory::MemoryType;
use crate::node::SharedNode;

use super::{Mapping, Mode, Path, DEFAULT_QUEUE_DEPTH};

use std::time::Duration;

/// Builder for [`Path`].
///
/// # Example
///
/// ```rust,ignore
/// let path = PathBuilder::new("acquisition")
///     .source(signal)
///     .destination(sink)
///     .mode(Mode::Any)
///     .rate(100.0)
///     .build()?;
/// ```
pub struct PathBuilder {
    pub(super) name: String,
    pub(super) mode: Mode,
    pub(super) rate: Option<f64>,
    pub(super) periodic: Option<Duration>,
    pub(super) enabled: bool,
    builtin: bool,
    pub(super) prefer_poll: bool,
    pub(super) queue_depth: usize,
    pub(super) pool_blocks: Option<usize>,
    pub(super) memory_type: MemoryType,
    registry: HookRegistry,
    pub(super) sources: Vec<(SharedNode, Option<Mapping>)>,
    pub(super) destinations: Vec<SharedNode>,
    hooks: Vec<(i32, Box<dyn Hook>)>,
    hook_names: Vec<String>,
}

impl PathBuilder {
    /// Start building a path called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: Mode::default(),
            rate: None,
            periodic: None,
            enabled: true,
            builtin: true,
            prefer_poll: true,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            pool_blocks: None,
            memory_type: MemoryType::Heap,
            registry: HookRegistry::with_defaults(),
            sources: Vec::new(),
            destinations: Vec::new(),
            hooks: Vec::new(),
            hook_names: Vec::new(),
        }
    }

    /// Add a source node delivering its full value vector.
    pub fn source(mut self, node: SharedNode) -> Self {
        self.sources.push((node, None));
        self
    }

    /// Add a source node narrowed to a value window.
    pub fn source_mapped(mut self, node: SharedNode, mapping: Mapping) -> Self {
        self.sources.push((node, Some(mapping)));
        self
    }

    /// Add a destination node; every destination receives the full
    /// fan-out.
    pub fn destination(mut self, node: SharedNode) -> Self {
        self.destinations.push(node);
        self
    }

    /// Multi-source gating mode; defaults to [`Mode::Any`].
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Decouple writes from reads at a fixed output rate in hertz
    /// (sample-and-hold).
    pub fn rate(mut self, rate: f64) -> Self {
        self.rate = Some(rate);
        self
    }

    /// Fire the `Periodic` hooks every `interval` (stats summaries, pool
    /// gauge refresh).
    pub fn periodic(mut self, interval: Duration) -> Self {
        self.periodic = Some(interval);
        self
    }

    /// A disabled path validates normally but `start` becomes a no-op.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Auto-install the restart and drop-reordered hooks (on by default).
    pub fn builtin(mut self, builtin: bool) -> Self {
        self.builtin = builtin;
        self
    }

    /// Prefer a single poll-based reader when every source exposes
    /// descriptors (on by default). Off forces one thread per source.
    pub fn prefer_poll(mut self, prefer: bool) -> Self {
        self.prefer_poll = prefer;
        self
    }

    /// Per-source in-flight budget: sizes the default pool and bounds the
    /// `All`-mode staging backlog.
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Override the pool size computed from the queue depth.
    pub fn pool_blocks(mut self, blocks: usize) -> Self {
        self.pool_blocks = Some(blocks);
        self
    }

    /// Backing memory for the path's pool; defaults to
    /// [`MemoryType::Heap`].
    pub fn memory_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = memory_type;
        self
    }

    /// Replace the registry used for named and builtin hooks.
    pub fn registry(mut self, registry: HookRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Add a hook instance at an explicit priority.
    pub fn hook(mut self, priority: i32, hook: Box<dyn Hook>) -> Self {
        self.hooks.push((priority, hook));
        self
    }

    /// Add a registry hook by name, at the registry's default priority.
    pub fn hook_by_name(mut self, name: impl Into<String>) -> Self {
        self.hook_names.push(name.into());
        self
    }

    /// Assemble the path.
    ///
    /// # Errors
    ///
    /// [`crate::error::Error::UnknownHook`] when a named hook (or, with
    /// builtins enabled, `restart`/`drop_reordered`) has no registered
    /// constructor.
    pub fn build(mut self) -> Result<Path> {
        let mut hooks = std::mem::take(&mut self.hooks);
        if self.builtin {
            for name in ["restart", "drop_reordered"] {
                let (priority, hook) = self.registry.create(name)?;
                hooks.push((priority, hook));
            }
        }
        for name in std::mem::take(&mut self.hook_names) {
            let (priority, hook) = self.registry.create(&name)?;
            hooks.push((priority, hook));
        }

        Ok(Path::assemble(self, hooks))
    }
}

impl std::fmt::Debug for PathBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathBuilder")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("sources", &self.sources.len())
            .field("destinations", &self.destinations.len())
            .field("rate", &self.rate)
            .field("builtin", &self.builtin)
            .finish()
    }
}
