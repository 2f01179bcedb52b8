//! Worker loops and the state they share.
//!
//! A running path is a set of plain OS threads over one [`PathShared`]:
//! readers (one per source, or a single poll multiplexer), an optional
//! rate-limited writer and an optional periodic ticker. Cancellation is
//! cooperative: [`Shutdown`] pairs an atomic flag with an eventfd so
//! poll-based waits wake instantly while blocking reads observe the flag
//! when their own timeout expires.

use crate::clock::Timestamp;
use crate::error::Error;
use crate::hook::{HookEvent, Pipeline};
use crate::node::SharedNode;
use crate::observability::{self, PathMetrics};
use crate::pool::Pool;
use crate::sample::Sample;
use crate::task::Task;

use super::{Mapping, Mode, PathSource};

use rustix::event::{poll, PollFd, PollFlags};
use rustix::fd::BorrowedFd;
#[cfg(target_os = "linux")]
use rustix::event::{eventfd, EventfdFlags};
#[cfg(target_os = "linux")]
use rustix::fd::{AsFd, OwnedFd};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Backoff after an allocation found the pool empty; keeps an exhausted
/// reader from spinning while in-flight samples drain.
const POOL_RETRY: Duration = Duration::from_millis(1);

/// Poll granularity when no shutdown descriptor exists; bounds how long a
/// worker can miss the shutdown flag.
const POLL_TIMEOUT_MS: i32 = 100;

// ============================================================================
// Shutdown signal
// ============================================================================

/// One-shot stop signal shared by all of a path's workers.
///
/// `signal` flips the flag and leaves the eventfd readable, so any number
/// of pollers wake and stay woken. A fresh `Shutdown` is built per run;
/// restarting a path never reuses a signalled one.
pub(crate) struct Shutdown {
    flag: AtomicBool,
    #[cfg(target_os = "linux")]
    event: Option<OwnedFd>,
}

impl Shutdown {
    pub(crate) fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
            #[cfg(target_os = "linux")]
            event: match eventfd(0, EventfdFlags::NONBLOCK | EventfdFlags::CLOEXEC) {
                Ok(fd) => Some(fd),
                Err(err) => {
                    tracing::warn!(%err, "eventfd unavailable, workers fall back to timeouts");
                    None
                }
            },
        }
    }

    /// Request shutdown and wake descriptor-based waiters.
    pub(crate) fn signal(&self) {
        self.flag.store(true, Ordering::Release);
        #[cfg(target_os = "linux")]
        if let Some(event) = &self.event {
            if let Err(err) = rustix::io::write(event, &1u64.to_ne_bytes()) {
                tracing::warn!(%err, "shutdown eventfd write failed");
            }
        }
    }

    #[inline]
    pub(crate) fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Descriptor that becomes readable once `signal` ran, for poll-based
    /// workers. `None` when eventfd creation failed or is unsupported.
    #[cfg(target_os = "linux")]
    pub(crate) fn fd(&self) -> Option<BorrowedFd<'_>> {
        self.event.as_ref().map(|fd| fd.as_fd())
    }

    #[cfg(not(target_os = "linux"))]
    pub(crate) fn fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }
}

// ============================================================================
// Shared run state
// ============================================================================

/// Everything a path's workers touch, behind one `Arc` per run.
pub(crate) struct PathShared {
    pub(crate) name: String,
    pub(crate) mode: Mode,
    /// Whether a rate writer owns the write side; readers then stash
    /// instead of writing.
    pub(crate) rate_limited: bool,
    pub(crate) sources: Vec<PathSource>,
    pub(crate) destinations: Vec<SharedNode>,
    pub(crate) pool: Arc<Pool>,
    pub(crate) pipeline: Arc<Mutex<Pipeline>>,
    pub(crate) metrics: PathMetrics,
    pub(crate) shutdown: Shutdown,
    /// Latest surviving batch, held for the rate writer (sample-and-hold).
    pub(crate) stash: Mutex<Vec<Sample>>,
    /// `All`-mode staging; unused in `Any` mode.
    pub(crate) rounds: Mutex<Rounds>,
}

// ============================================================================
// All-mode round staging
// ============================================================================

/// Per-source staging for `Mode::All`.
///
/// Each source's samples queue up until the received-bitmask covers every
/// source; a round then takes the oldest sample of each. The mask resets at
/// round completion and leftover staged samples immediately re-arm their
/// bits, so a burst from one source never counts for more than one bit per
/// round.
pub(crate) struct Rounds {
    staged: Vec<VecDeque<Sample>>,
    received: u64,
    /// Per-source backlog bound; beyond it the oldest staged samples are
    /// dropped so a straggling source cannot pin the whole pool.
    cap: usize,
}

impl Rounds {
    pub(crate) fn new(sources: usize, cap: usize) -> Self {
        debug_assert!(sources <= 64, "received-bitmask holds at most 64 sources");
        Self {
            staged: (0..sources).map(|_| VecDeque::new()).collect(),
            received: 0,
            cap: cap.max(1),
        }
    }

    fn full_mask(&self) -> u64 {
        if self.staged.len() == 64 {
            u64::MAX
        } else {
            (1u64 << self.staged.len()) - 1
        }
    }

    /// Stage `fresh` samples for `index` and assemble every round that is
    /// now complete, in source order. Returns the rounds plus the number of
    /// staged samples dropped to the backlog cap.
    pub(crate) fn stage(&mut self, index: usize, fresh: Vec<Sample>) -> (Vec<Vec<Sample>>, u64) {
        let mut dropped = 0u64;
        let queue = &mut self.staged[index];
        for smp in fresh {
            if queue.len() >= self.cap {
                // Keep the freshest data; the oldest is the stalest.
                queue.pop_front();
                dropped += 1;
            }
            queue.push_back(smp);
        }
        if !queue.is_empty() {
            self.received |= 1 << index;
        }

        let full = self.full_mask();
        let mut complete = Vec::new();
        while self.received == full {
            let mut round = Vec::with_capacity(self.staged.len());
            self.received = 0;
            for (i, queue) in self.staged.iter_mut().enumerate() {
                if let Some(smp) = queue.pop_front() {
                    round.push(smp);
                }
                if !queue.is_empty() {
                    self.received |= 1 << i;
                }
            }
            debug_assert_eq!(round.len(), self.staged.len());
            complete.push(round);
        }
        (complete, dropped)
    }

    /// Current received-bitmask; bit `i` set when source `i` has staged
    /// samples waiting.
    #[cfg(test)]
    pub(crate) fn received(&self) -> u64 {
        self.received
    }
}

// ============================================================================
// Mapping application
// ============================================================================

/// Narrow `smp` to the mapped value window, in place when this handle is
/// the sole owner and via a fresh pool block otherwise. Returns `false`
/// when the sample had to be dropped (copy needed, pool empty).
pub(crate) fn apply_mapping(smp: &mut Sample, mapping: Mapping, pool: &Arc<Pool>) -> bool {
    let len = smp.len();
    if mapping.offset == 0 && len <= mapping.length {
        return true;
    }
    let take = len.saturating_sub(mapping.offset).min(mapping.length);

    if smp.ref_count() == 1 {
        if take > 0 {
            if let Some(values) = smp.values_mut() {
                values.copy_within(mapping.offset..mapping.offset + take, 0);
            }
            for i in 0..take {
                if let Some(kind) = smp.value_kind(mapping.offset + i) {
                    smp.set_value_kind(i, kind);
                }
            }
        }
        smp.set_len(take);
        return true;
    }

    // A co-owned payload is read-only; narrow into a copy instead.
    let mut fresh = match Sample::alloc(pool) {
        Ok(fresh) => fresh,
        Err(_) => {
            observability::record_pool_exhausted();
            tracing::warn!(
                sequence = smp.sequence(),
                "pool empty while remapping a shared sample, dropping it"
            );
            return false;
        }
    };
    if take > 0 {
        if let Some(values) = fresh.values_mut() {
            values[..take].copy_from_slice(&smp.values()[mapping.offset..mapping.offset + take]);
        }
        for i in 0..take {
            if let Some(kind) = smp.value_kind(mapping.offset + i) {
                fresh.set_value_kind(i, kind);
            }
        }
    }
    fresh.set_len(take);
    fresh.set_sequence(smp.sequence());
    let ts = smp.ts();
    fresh.set_ts_origin(ts.origin);
    fresh.set_ts_received(ts.received);
    if let Some(source) = smp.source() {
        fresh.set_source(source);
    }
    *smp = fresh;
    true
}

// ============================================================================
// Batch processing
// ============================================================================

/// Run the `Read` hooks over a fresh batch and hand the survivors to the
/// write side: the stash when rate-limited, the destinations otherwise.
fn process_batch(shared: &PathShared, mut batch: Vec<Sample>) {
    let report = {
        let mut pipeline = shared.pipeline.lock().unwrap();
        pipeline.run(HookEvent::Read, &mut batch)
    };
    if report.dropped > 0 {
        shared.metrics.record_dropped(report.dropped);
    }
    shared.metrics.record_batch(batch.len());
    if batch.is_empty() {
        // Intentional full drop; nothing reaches the destinations.
        return;
    }

    if shared.rate_limited {
        let mut stash = shared.stash.lock().unwrap();
        // Replacing the stash drops the superseded batch back to the pool.
        *stash = batch;
    } else {
        write_batch(shared, &mut batch);
    }
}

/// Run the `Write` hooks, stamp `ts.sent`, and fan the batch out to every
/// destination. A failing destination is logged and skipped; the others
/// still receive the batch.
pub(crate) fn write_batch(shared: &PathShared, batch: &mut Vec<Sample>) {
    let report = {
        let mut pipeline = shared.pipeline.lock().unwrap();
        pipeline.run(HookEvent::Write, batch)
    };
    if report.dropped > 0 {
        shared.metrics.record_dropped(report.dropped);
    }
    if batch.is_empty() {
        return;
    }

    let now = Timestamp::now();
    for smp in batch.iter_mut() {
        // A payload still co-owned by an earlier delivery is read-only;
        // its original sent stamp stands.
        if smp.ref_count() == 1 {
            smp.set_ts_sent(now);
        }
    }

    let mut delivered = 0u64;
    for dest in &shared.destinations {
        let mut node = dest.lock().unwrap();
        match node.write(batch) {
            Ok(sent) => {
                delivered += sent as u64;
                tracing::trace!(path = %shared.name, node = node.name(), sent, "batch delivered");
            }
            Err(err) => {
                tracing::warn!(path = %shared.name, node = node.name(), %err, "destination write failed");
            }
        }
    }
    if delivered > 0 {
        shared.metrics.record_written(delivered);
    }
}

// ============================================================================
// Read rounds
// ============================================================================

/// Why a reader finished a round.
enum RoundOutcome {
    /// Keep reading.
    Continue,
    /// The source signalled a clean end of stream.
    Finished,
    /// The source failed; already logged.
    Failed,
}

/// One allocation-read-process round against source `index`.
fn run_round(shared: &PathShared, index: usize, vectorize: usize, node_name: &str) -> RoundOutcome {
    let source = &shared.sources[index];

    let mut batch = Sample::alloc_many(&shared.pool, vectorize);
    if batch.is_empty() {
        observability::record_pool_exhausted();
        std::thread::sleep(POOL_RETRY);
        return RoundOutcome::Continue;
    }

    let n = {
        let mut node = source.node.lock().unwrap();
        match node.read(&mut batch) {
            Ok(n) => n,
            Err(Error::Stopped) => return RoundOutcome::Finished,
            Err(err) => {
                tracing::error!(path = %shared.name, source = node_name, %err, "source read failed");
                return RoundOutcome::Failed;
            }
        }
    };
    if n == 0 {
        return RoundOutcome::Continue;
    }
    batch.truncate(n);
    shared.metrics.record_read(n as u64);

    if let Some(mapping) = source.mapping {
        let before = batch.len();
        batch.retain_mut(|smp| apply_mapping(smp, mapping, &shared.pool));
        let removed = (before - batch.len()) as u64;
        if removed > 0 {
            shared.metrics.record_dropped(removed);
        }
    }

    match shared.mode {
        Mode::Any => process_batch(shared, batch),
        Mode::All => {
            let (complete, dropped) = {
                let mut rounds = shared.rounds.lock().unwrap();
                rounds.stage(index, batch)
            };
            if dropped > 0 {
                shared.metrics.record_dropped(dropped);
                tracing::warn!(
                    path = %shared.name,
                    source = node_name,
                    dropped,
                    "staged backlog overflowed, oldest samples dropped"
                );
            }
            for round in complete {
                process_batch(shared, round);
            }
        }
    }
    RoundOutcome::Continue
}

// ============================================================================
// Worker loops
// ============================================================================

/// Reader servicing a single source until shutdown or end of stream.
pub(crate) fn reader_loop(shared: Arc<PathShared>, index: usize) {
    let span = tracing::info_span!("path", name = %shared.name);
    let _guard = span.enter();

    let (node_name, vectorize, affinity) = {
        let node = shared.sources[index].node.lock().unwrap();
        (node.name().to_string(), node.vectorize(), node.affinity())
    };
    if let Some(cpu) = affinity {
        apply_affinity(&node_name, cpu);
    }
    tracing::debug!(source = %node_name, "reader running");

    while !shared.shutdown.is_set() {
        match run_round(&shared, index, vectorize, &node_name) {
            RoundOutcome::Continue => {}
            RoundOutcome::Finished => {
                tracing::debug!(source = %node_name, "source finished");
                break;
            }
            RoundOutcome::Failed => break,
        }
    }
    tracing::debug!(source = %node_name, "reader exiting");
}

struct PollEntry {
    source: usize,
    raw: std::os::unix::io::RawFd,
    vectorize: usize,
    name: String,
}

/// Single reader multiplexing every source through its descriptors.
///
/// Chosen at start only when each source exposes at least one poll fd.
pub(crate) fn poll_loop(shared: Arc<PathShared>) {
    let span = tracing::info_span!("path", name = %shared.name);
    let _guard = span.enter();

    let mut entries = Vec::new();
    let mut affinity = None;
    for (i, source) in shared.sources.iter().enumerate() {
        let node = source.node.lock().unwrap();
        affinity = affinity.or(node.affinity());
        for raw in node.poll_fds() {
            entries.push(PollEntry {
                source: i,
                raw,
                vectorize: node.vectorize(),
                name: node.name().to_string(),
            });
        }
    }
    if let Some(cpu) = affinity {
        apply_affinity("poll", cpu);
    }
    tracing::debug!(descriptors = entries.len(), "poll reader running");

    let mut alive = vec![true; entries.len()];
    loop {
        if shared.shutdown.is_set() {
            break;
        }

        let mut fds: Vec<PollFd<'_>> = Vec::with_capacity(entries.len() + 1);
        let shutdown_fd = shared.shutdown.fd();
        if let Some(fd) = shutdown_fd {
            fds.push(PollFd::from_borrowed_fd(fd, PollFlags::IN));
        }
        let base = fds.len();

        let mut polled = Vec::with_capacity(entries.len());
        for (ei, entry) in entries.iter().enumerate() {
            if !alive[ei] {
                continue;
            }
            // SAFETY: the descriptor belongs to a source node the path
            // keeps running for the lifetime of this worker.
            let fd = unsafe { BorrowedFd::borrow_raw(entry.raw) };
            fds.push(PollFd::from_borrowed_fd(fd, PollFlags::IN));
            polled.push(ei);
        }
        if polled.is_empty() {
            tracing::debug!("all sources finished");
            break;
        }

        let timeout = if base == 1 { -1 } else { POLL_TIMEOUT_MS };
        match poll(&mut fds, timeout) {
            Ok(_) => {}
            Err(rustix::io::Errno::INTR) => continue,
            Err(err) => {
                tracing::error!(path = %shared.name, %err, "poll failed");
                break;
            }
        }
        if base == 1 && !fds[0].revents().is_empty() {
            break;
        }

        for (slot, ei) in polled.iter().enumerate() {
            if fds[base + slot].revents().is_empty() {
                continue;
            }
            let entry = &entries[*ei];
            match run_round(&shared, entry.source, entry.vectorize, &entry.name) {
                RoundOutcome::Continue => {}
                RoundOutcome::Finished => {
                    tracing::debug!(source = %entry.name, "source finished");
                    alive[*ei] = false;
                }
                RoundOutcome::Failed => alive[*ei] = false,
            }
        }
    }
    tracing::debug!("poll reader exiting");
}

/// Timer-driven writer: every tick re-sends the current stash
/// (sample-and-hold) until fresher samples replace it.
pub(crate) fn rate_loop(shared: Arc<PathShared>, rate: f64) {
    let span = tracing::info_span!("path", name = %shared.name);
    let _guard = span.enter();

    let mut task = match Task::rate(rate) {
        Ok(task) => task,
        Err(err) => {
            tracing::error!(path = %shared.name, %err, "rate timer unavailable");
            return;
        }
    };
    tracing::debug!(rate, "rate writer running");

    loop {
        let Some(steps) = wait_tick(&mut task, &shared.shutdown) else {
            break;
        };
        if steps > 1 {
            tracing::trace!(missed = steps - 1, "rate writer fell behind");
        }

        // Take the stash so the batch is sole-owned for hooks and the
        // sent stamp.
        let mut batch = {
            let mut stash = shared.stash.lock().unwrap();
            std::mem::take(&mut *stash)
        };
        if batch.is_empty() {
            continue;
        }
        write_batch(&shared, &mut batch);

        // Hold the batch for the next tick unless a reader stashed a
        // fresher one while we were writing.
        let mut stash = shared.stash.lock().unwrap();
        if stash.is_empty() {
            *stash = batch;
        }
    }
    tracing::debug!("rate writer exiting");
}

/// Periodic ticker: fires the `Periodic` hooks and refreshes the pool
/// gauge at a fixed interval.
pub(crate) fn periodic_loop(shared: Arc<PathShared>, interval: Duration) {
    let span = tracing::info_span!("path", name = %shared.name);
    let _guard = span.enter();

    let mut task = match Task::interval(interval) {
        Ok(task) => task,
        Err(err) => {
            tracing::error!(path = %shared.name, %err, "periodic timer unavailable");
            return;
        }
    };
    tracing::debug!(interval = ?interval, "periodic ticker running");

    while wait_tick(&mut task, &shared.shutdown).is_some() {
        {
            let mut pipeline = shared.pipeline.lock().unwrap();
            pipeline.run_periodic();
        }
        observability::record_pool_available(&shared.name, shared.pool.available());
    }
    tracing::debug!("periodic ticker exiting");
}

/// Block until the next timer tick, returning the elapsed period count, or
/// `None` once shutdown is requested.
///
/// With both descriptors available the two are polled together and
/// shutdown wakes instantly; otherwise the flag is checked around a
/// blocking wait, bounding shutdown latency by one period.
fn wait_tick(task: &mut Task, shutdown: &Shutdown) -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let decision = match (shutdown.fd(), task.fd()) {
            (Some(event), Some(timer)) => {
                let mut fds = [
                    PollFd::from_borrowed_fd(event, PollFlags::IN),
                    PollFd::from_borrowed_fd(timer, PollFlags::IN),
                ];
                loop {
                    match poll(&mut fds, -1) {
                        Ok(_) => {}
                        Err(rustix::io::Errno::INTR) => continue,
                        Err(err) => {
                            tracing::warn!(%err, "timer poll failed");
                            break TickPoll::Blocking;
                        }
                    }
                    if !fds[0].revents().is_empty() {
                        break TickPoll::Shutdown;
                    }
                    if !fds[1].revents().is_empty() {
                        break TickPoll::Due;
                    }
                }
            }
            _ => TickPoll::Blocking,
        };
        match decision {
            TickPoll::Shutdown => return None,
            // Expirations are pending, so the read returns immediately.
            TickPoll::Due => return reap_tick(task),
            TickPoll::Blocking => {}
        }
    }

    if shutdown.is_set() {
        return None;
    }
    match reap_tick(task) {
        Some(_) if shutdown.is_set() => None,
        outcome => outcome,
    }
}

#[cfg(target_os = "linux")]
enum TickPoll {
    Shutdown,
    Due,
    Blocking,
}

fn reap_tick(task: &mut Task) -> Option<u64> {
    match task.wait() {
        Ok(steps) => Some(steps),
        Err(err) => {
            tracing::warn!(%err, "timer wait failed");
            None
        }
    }
}

// ============================================================================
// CPU affinity
// ============================================================================

#[cfg(target_os = "linux")]
fn apply_affinity(owner: &str, cpu: usize) {
    let mut set = rustix::process::CpuSet::new();
    set.set(cpu);
    match rustix::process::sched_setaffinity(None, &set) {
        Ok(()) => tracing::debug!(owner, cpu, "worker pinned"),
        Err(err) => tracing::warn!(owner, cpu, %err, "failed to set cpu affinity"),
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_affinity(owner: &str, cpu: usize) {
    tracing::debug!(owner, cpu, "cpu affinity not supported on this platform");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryType;

    fn test_pool() -> Arc<Pool> {
        Pool::new(32, Sample::bytes_required(8), MemoryType::Heap).unwrap()
    }

    fn sample_with(pool: &Arc<Pool>, sequence: u64, values: &[f32]) -> Sample {
        let mut smp = Sample::alloc(pool).unwrap();
        smp.set_sequence(sequence);
        let cells = smp.values_mut().unwrap();
        for (i, v) in values.iter().enumerate() {
            cells[i] = crate::sample::Value::float(*v);
        }
        smp.set_len(values.len());
        smp
    }

    // ------------------------------------------------------------------
    // Rounds
    // ------------------------------------------------------------------

    #[test]
    fn test_single_source_rounds_emit_immediately() {
        let pool = test_pool();
        let mut rounds = Rounds::new(1, 8);

        let fresh = (0..3).map(|i| sample_with(&pool, i, &[])).collect();
        let (complete, dropped) = rounds.stage(0, fresh);
        assert_eq!(dropped, 0);
        assert_eq!(complete.len(), 3);
        for (i, round) in complete.iter().enumerate() {
            assert_eq!(round.len(), 1);
            assert_eq!(round[0].sequence(), i as u64);
        }
        assert_eq!(rounds.received(), 0);
    }

    #[test]
    fn test_round_waits_for_straggler() {
        let pool = test_pool();
        let mut rounds = Rounds::new(2, 8);

        // Two samples from source 0: no round yet, bit 0 armed.
        let (complete, _) = rounds.stage(0, vec![
            sample_with(&pool, 10, &[]),
            sample_with(&pool, 11, &[]),
        ]);
        assert!(complete.is_empty());
        assert_eq!(rounds.received(), 0b01);

        // Source 1 arrives: one round with one sample per source, and the
        // leftover from source 0 re-arms its bit.
        let (complete, _) = rounds.stage(1, vec![sample_with(&pool, 20, &[])]);
        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0].len(), 2);
        assert_eq!(complete[0][0].sequence(), 10);
        assert_eq!(complete[0][1].sequence(), 20);
        assert_eq!(rounds.received(), 0b01);

        // Another sample for source 1 completes the second round.
        let (complete, _) = rounds.stage(1, vec![sample_with(&pool, 21, &[])]);
        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0][0].sequence(), 11);
        assert_eq!(complete[0][1].sequence(), 21);
        assert_eq!(rounds.received(), 0);
    }

    #[test]
    fn test_burst_completes_several_rounds() {
        let pool = test_pool();
        let mut rounds = Rounds::new(2, 8);

        rounds.stage(0, (0..3).map(|i| sample_with(&pool, i, &[])).collect());
        let (complete, _) = rounds.stage(1, (10..13).map(|i| sample_with(&pool, i, &[])).collect());
        assert_eq!(complete.len(), 3);
        for (i, round) in complete.iter().enumerate() {
            assert_eq!(round[0].sequence(), i as u64);
            assert_eq!(round[1].sequence(), 10 + i as u64);
        }
    }

    #[test]
    fn test_backlog_cap_drops_oldest() {
        let pool = test_pool();
        let mut rounds = Rounds::new(2, 2);

        let fresh = (0..5).map(|i| sample_with(&pool, i, &[])).collect();
        let (complete, dropped) = rounds.stage(0, fresh);
        assert!(complete.is_empty());
        assert_eq!(dropped, 3);

        // The freshest two survived.
        let (complete, _) = rounds.stage(1, vec![sample_with(&pool, 100, &[])]);
        assert_eq!(complete[0][0].sequence(), 3);
    }

    #[test]
    fn test_staged_samples_return_to_pool_on_drop() {
        let pool = test_pool();
        {
            let mut rounds = Rounds::new(1, 8);
            let (complete, _) = rounds.stage(0, vec![sample_with(&pool, 1, &[])]);
            drop(complete);
            rounds.stage(0, vec![sample_with(&pool, 2, &[])]);
        }
        assert_eq!(pool.available(), pool.capacity());
    }

    // ------------------------------------------------------------------
    // Mapping
    // ------------------------------------------------------------------

    #[test]
    fn test_mapping_narrows_in_place() {
        let pool = test_pool();
        let mut smp = sample_with(&pool, 7, &[1.0, 2.0, 3.0, 4.0]);
        smp.set_value_kind(2, crate::sample::ValueKind::Integer);

        assert!(apply_mapping(&mut smp, Mapping { offset: 1, length: 2 }, &pool));
        assert_eq!(smp.len(), 2);
        assert_eq!(smp.values()[0].as_f32(), 2.0);
        assert_eq!(smp.value_kind(1), Some(crate::sample::ValueKind::Integer));
        assert_eq!(smp.sequence(), 7);
    }

    #[test]
    fn test_identity_mapping_is_a_noop() {
        let pool = test_pool();
        let mut smp = sample_with(&pool, 1, &[1.0, 2.0]);
        assert!(apply_mapping(&mut smp, Mapping { offset: 0, length: 8 }, &pool));
        assert_eq!(smp.len(), 2);
        assert_eq!(smp.values()[0].as_f32(), 1.0);
    }

    #[test]
    fn test_window_beyond_data_leaves_empty_sample() {
        let pool = test_pool();
        let mut smp = sample_with(&pool, 1, &[1.0, 2.0]);
        assert!(apply_mapping(&mut smp, Mapping { offset: 4, length: 2 }, &pool));
        assert!(smp.is_empty());

        // Same window against a shared sample goes through the copy.
        let mut smp = sample_with(&pool, 2, &[1.0, 2.0]);
        let _held = smp.clone();
        assert!(apply_mapping(&mut smp, Mapping { offset: 4, length: 2 }, &pool));
        assert!(smp.is_empty());
        assert_eq!(smp.ref_count(), 1);
    }

    #[test]
    fn test_shared_sample_is_copied_not_mutated() {
        let pool = test_pool();
        let mut smp = sample_with(&pool, 9, &[1.0, 2.0, 3.0]);
        let held = smp.clone();

        assert!(apply_mapping(&mut smp, Mapping { offset: 1, length: 1 }, &pool));
        assert_eq!(smp.len(), 1);
        assert_eq!(smp.values()[0].as_f32(), 2.0);
        assert_eq!(smp.ref_count(), 1);
        assert_eq!(smp.sequence(), 9);

        // The co-owner still sees the full payload.
        assert_eq!(held.len(), 3);
        assert_eq!(held.values()[0].as_f32(), 1.0);
    }

    #[test]
    fn test_shared_sample_dropped_when_pool_empty() {
        let pool = Pool::new(1, Sample::bytes_required(4), MemoryType::Heap).unwrap();
        let mut smp = sample_with(&pool, 1, &[1.0, 2.0]);
        let _held = smp.clone();

        // The only block is in use, so the copy cannot be made.
        assert!(!apply_mapping(&mut smp, Mapping { offset: 1, length: 1 }, &pool));
    }

    // ------------------------------------------------------------------
    // Shutdown and ticking
    // ------------------------------------------------------------------

    #[test]
    fn test_shutdown_flag() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_set());
        shutdown.signal();
        assert!(shutdown.is_set());
        // Signalling twice is harmless.
        shutdown.signal();
        assert!(shutdown.is_set());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_shutdown_fd_becomes_readable() {
        let shutdown = Shutdown::new();
        let fd = shutdown.fd().expect("eventfd should exist on linux");
        let mut fds = [PollFd::from_borrowed_fd(fd, PollFlags::IN)];

        assert_eq!(poll(&mut fds, 0).unwrap(), 0);
        shutdown.signal();
        assert_eq!(poll(&mut fds, 0).unwrap(), 1);
        // Level-triggered: a second poller still wakes.
        assert_eq!(poll(&mut fds, 0).unwrap(), 1);
    }

    #[test]
    fn test_wait_tick_stops_on_shutdown() {
        let shutdown = Shutdown::new();
        shutdown.signal();
        let mut task = Task::rate(10.0).unwrap();
        assert!(wait_tick(&mut task, &shutdown).is_none());
    }

    #[test]
    fn test_wait_tick_delivers_periods() {
        let shutdown = Shutdown::new();
        let mut task = Task::rate(200.0).unwrap();
        let steps = wait_tick(&mut task, &shutdown).unwrap();
        assert!(steps >= 1);
    }
}
