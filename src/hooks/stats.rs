//! Per-path statistics collection.

use crate::clock::Timestamp;
use crate::error::Result;
use crate::hook::{Batch, EventMask, Hook, HookContext, HookEvent};
use crate::stats::{Metric, Stats};

/// Header fields copied from the last seen sample. Never a retained
/// handle: history must not hold pool blocks or inflate refcounts.
#[derive(Debug, Clone, Copy)]
struct LastSeen {
    sequence: u64,
    origin: Timestamp,
    received: Timestamp,
}

/// Collects one-way delay, inter-arrival gaps and reordering distances
/// into [`Stats`] histograms.
///
/// Summaries go to the log on `periodic` and `stop`; history and
/// histograms clear on `PathStart` and `PathRestart` so each run is
/// measured on its own.
#[derive(Debug)]
pub struct StatsHook {
    owner: String,
    stats: Stats,
    last: Option<LastSeen>,
}

impl StatsHook {
    /// Default histogram shape: 20 buckets sized after 500 values.
    pub const DEFAULT_BUCKETS: usize = 20;
    /// Default warmup length.
    pub const DEFAULT_WARMUP: u64 = 500;

    /// Collector labelled `owner` in summary lines.
    pub fn new(owner: impl Into<String>, buckets: usize, warmup: u64) -> Self {
        Self {
            owner: owner.into(),
            stats: Stats::new(buckets, warmup),
            last: None,
        }
    }

    /// Collector with the default histogram shape.
    pub fn with_defaults(owner: impl Into<String>) -> Self {
        Self::new(owner, Self::DEFAULT_BUCKETS, Self::DEFAULT_WARMUP)
    }

    /// The collected histograms.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    fn observe(&mut self, sequence: u64, origin: Timestamp, received: Timestamp) {
        if !origin.is_unset() && !received.is_unset() {
            self.stats
                .update(Metric::OneWayDelay, received.seconds_since(origin));
        }

        if let Some(last) = self.last {
            let dist = sequence.wrapping_sub(last.sequence) as u32 as i32;
            if dist != 1 {
                self.stats.update(Metric::Reordered, f64::from(dist));
            }
            if !origin.is_unset() && !last.origin.is_unset() {
                self.stats
                    .update(Metric::GapOrigin, origin.seconds_since(last.origin));
            }
            if !received.is_unset() && !last.received.is_unset() {
                self.stats
                    .update(Metric::GapReceived, received.seconds_since(last.received));
            }
        }

        self.last = Some(LastSeen {
            sequence,
            origin,
            received,
        });
    }
}

impl Hook for StatsHook {
    fn name(&self) -> &'static str {
        "stats"
    }

    fn mask(&self) -> EventMask {
        EventMask::READ
            .with(EventMask::PATH_START)
            .with(EventMask::PATH_RESTART)
            .with(EventMask::PERIODIC)
    }

    fn stop(&mut self) -> Result<()> {
        self.stats.log_summary(&self.owner);
        Ok(())
    }

    fn periodic(&mut self) -> Result<()> {
        self.stats.log_summary(&self.owner);
        Ok(())
    }

    fn process(&mut self, event: HookEvent, batch: &mut Batch, _ctx: &mut HookContext) {
        if event != HookEvent::Read {
            self.stats.reset();
            self.last = None;
            return;
        }

        for smp in batch.iter() {
            let ts = smp.ts();
            self.observe(smp.sequence(), ts.origin, ts.received);
        }
    }
}
