//! Stateful processing pipeline between reads and writes.
//!
//! A [`Hook`] observes or rewrites batches of samples in flight. Hooks
//! carry private state in their impl struct (construction allocates it,
//! `Drop` releases it) and are driven by a [`Pipeline`] that keeps them
//! stable-sorted by priority. `process` has no error channel: a hook
//! signals only by compacting the batch, and a batch that comes out empty
//! halts the remaining pipeline for that run.
//!
//! History-dependent hooks record copied header fields (sequence numbers,
//! timestamps) of samples they have seen, never retained handles, so the
//! pipeline cannot inflate refcounts or alias payload mutation.

use crate::error::Result;
use crate::sample::Sample;

/// The unit of work flowing through a pipeline.
pub type Batch = Vec<Sample>;

// ============================================================================
// Events
// ============================================================================

/// A point in the path lifecycle at which hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    /// The path is starting; the batch is empty.
    PathStart,
    /// The path is stopping; the batch is empty.
    PathStop,
    /// A sequence reset was detected; the batch holds the new run's samples.
    PathRestart,
    /// Samples were read from a source.
    Read,
    /// Samples are about to be written to the destinations.
    Write,
    /// Mask bit gating the [`Hook::periodic`] callback.
    Periodic,
}

impl HookEvent {
    const fn bit(self) -> u8 {
        match self {
            HookEvent::PathStart => 1 << 0,
            HookEvent::PathStop => 1 << 1,
            HookEvent::PathRestart => 1 << 2,
            HookEvent::Read => 1 << 3,
            HookEvent::Write => 1 << 4,
            HookEvent::Periodic => 1 << 5,
        }
    }
}

/// Set of [`HookEvent`]s a hook subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMask(u8);

impl EventMask {
    /// Subscribes to nothing.
    pub const EMPTY: EventMask = EventMask(0);
    /// Path start.
    pub const PATH_START: EventMask = EventMask(1 << 0);
    /// Path stop.
    pub const PATH_STOP: EventMask = EventMask(1 << 1);
    /// Sequence reset.
    pub const PATH_RESTART: EventMask = EventMask(1 << 2);
    /// Post-read batches.
    pub const READ: EventMask = EventMask(1 << 3);
    /// Pre-write batches.
    pub const WRITE: EventMask = EventMask(1 << 4);
    /// Periodic callback.
    pub const PERIODIC: EventMask = EventMask(1 << 5);
    /// Every event.
    pub const ALL: EventMask = EventMask(0b11_1111);

    /// Whether `event` is in the set.
    pub const fn contains(self, event: HookEvent) -> bool {
        self.0 & event.bit() != 0
    }

    /// Union, usable in const contexts.
    pub const fn with(self, other: EventMask) -> EventMask {
        EventMask(self.0 | other.0)
    }
}

impl std::ops::BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        self.with(rhs)
    }
}

// ============================================================================
// Hook trait
// ============================================================================

/// Per-run context handed to [`Hook::process`].
#[derive(Debug, Default)]
pub struct HookContext {
    restart_at: Option<usize>,
}

impl HookContext {
    /// Report that the sample at `index` begins a new run. The runner
    /// dispatches a [`HookEvent::PathRestart`] over `batch[index..]` before
    /// resuming the current run.
    pub fn request_restart(&mut self, index: usize) {
        self.restart_at = Some(index);
    }
}

/// A stage in the processing pipeline.
///
/// Hooks are owned by exactly one pipeline and are called from one worker
/// thread at a time, so `&mut self` state needs no interior locking.
pub trait Hook: Send {
    /// Stable name, used in logs and by the registry.
    fn name(&self) -> &'static str;

    /// Events this hook wants to see.
    fn mask(&self) -> EventMask;

    /// Called once before the path's workers spawn. A failure here aborts
    /// the path start.
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once after the path's workers have joined.
    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called from the path's periodic thread when
    /// [`EventMask::PERIODIC`] is in the mask.
    fn periodic(&mut self) -> Result<()> {
        Ok(())
    }

    /// Observe or rewrite a batch. Compaction keeps the surviving samples
    /// in order (swap-to-front, then truncate); removed samples return to
    /// their pool when the truncated tail drops.
    fn process(&mut self, event: HookEvent, batch: &mut Batch, ctx: &mut HookContext);
}

// ============================================================================
// Pipeline
// ============================================================================

/// What a [`Pipeline::run`] did to its batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// The batch came out empty and the remaining hooks were skipped.
    pub halted: bool,
    /// Samples removed across all hooks, nested restart runs included.
    pub dropped: u64,
    /// Sequence resets dispatched during this run.
    pub restarts: u32,
}

struct Entry {
    priority: i32,
    hook: Box<dyn Hook>,
}

/// Priority-ordered hook chain.
///
/// Entries are stable-sorted ascending by priority once at build; equal
/// priorities keep their insertion order.
pub struct Pipeline {
    entries: Vec<Entry>,
}

impl Pipeline {
    /// Empty pipeline; `run` passes batches through untouched.
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    /// Build from `(priority, hook)` pairs.
    pub fn new(hooks: Vec<(i32, Box<dyn Hook>)>) -> Self {
        let mut entries: Vec<Entry> = hooks
            .into_iter()
            .map(|(priority, hook)| Entry { priority, hook })
            .collect();
        entries.sort_by_key(|e| e.priority);
        Self { entries }
    }

    /// Number of hooks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pipeline holds no hooks.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(priority, name)` of each hook, in run order.
    pub fn hooks(&self) -> impl Iterator<Item = (i32, &str)> {
        self.entries.iter().map(|e| (e.priority, e.hook.name()))
    }

    /// Run every hook's `start`, in priority order. The first failure is
    /// returned and aborts the path start.
    pub fn start_all(&mut self) -> Result<()> {
        for entry in &mut self.entries {
            if let Err(err) = entry.hook.start() {
                tracing::error!(hook = entry.hook.name(), %err, "hook start failed");
                return Err(err);
            }
        }
        Ok(())
    }

    /// Run every hook's `stop`. Teardown is best-effort: all hooks are
    /// stopped even when one fails, and the first error is returned.
    pub fn stop_all(&mut self) -> Result<()> {
        let mut first_err = None;
        for entry in &mut self.entries {
            if let Err(err) = entry.hook.stop() {
                tracing::warn!(hook = entry.hook.name(), %err, "hook stop failed");
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Invoke `periodic` on hooks subscribed to [`EventMask::PERIODIC`].
    /// Failures are logged, not propagated; the periodic thread keeps
    /// ticking.
    pub fn run_periodic(&mut self) {
        for entry in &mut self.entries {
            if !entry.hook.mask().contains(HookEvent::Periodic) {
                continue;
            }
            if let Err(err) = entry.hook.periodic() {
                tracing::warn!(hook = entry.hook.name(), %err, "periodic hook failed");
            }
        }
    }

    /// Dispatch `event` with `batch` through all mask-matching hooks in
    /// priority order.
    ///
    /// When a hook empties a batch that had samples, the remaining hooks
    /// are skipped and the report is marked halted: the batch was dropped
    /// in full, intentionally. When a hook requests a restart, the samples
    /// from the reported index on are run through the whole pipeline as a
    /// [`HookEvent::PathRestart`] and re-appended before the outer run
    /// continues.
    pub fn run(&mut self, event: HookEvent, batch: &mut Batch) -> RunReport {
        let mut report = RunReport::default();
        let had_samples = !batch.is_empty();

        let mut i = 0;
        while i < self.entries.len() {
            let restart_at = {
                let entry = &mut self.entries[i];
                if !entry.hook.mask().contains(event) {
                    i += 1;
                    continue;
                }

                let before = batch.len();
                let mut ctx = HookContext::default();
                entry.hook.process(event, batch, &mut ctx);
                report.dropped += before.saturating_sub(batch.len()) as u64;
                ctx.restart_at
            };

            if let Some(at) = restart_at {
                assert!(at <= batch.len(), "restart index out of range");
                report.restarts += 1;

                let mut rest = batch.split_off(at);
                let nested = self.run(HookEvent::PathRestart, &mut rest);
                report.dropped += nested.dropped;
                batch.append(&mut rest);
            }

            if had_samples && batch.is_empty() {
                report.halted = true;
                break;
            }
            i += 1;
        }

        report
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| (e.priority, e.hook.name())))
            .finish()
    }
}
