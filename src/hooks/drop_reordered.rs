//! Wrap-aware reordering filter.

use crate::hook::{Batch, EventMask, Hook, HookContext, HookEvent};

/// Drops samples that arrive out of order.
///
/// The distance to the previously seen sequence is computed in 32-bit
/// wrapping arithmetic and read as signed, so counting through a 32-bit
/// wrap keeps a distance of +1 while a late duplicate or an older sample
/// goes non-positive and is dropped. History advances on every sample,
/// dropped ones included, anchoring the distance to the latest arrival.
#[derive(Debug, Default)]
pub struct DropReordered {
    prev: Option<u64>,
}

impl DropReordered {
    /// Fresh filter with no history; the first sample is always kept.
    pub fn new() -> Self {
        Self::default()
    }

    fn distance(prev: u64, cur: u64) -> i32 {
        cur.wrapping_sub(prev) as u32 as i32
    }
}

impl Hook for DropReordered {
    fn name(&self) -> &'static str {
        "drop_reordered"
    }

    fn mask(&self) -> EventMask {
        EventMask::READ
            .with(EventMask::PATH_START)
            .with(EventMask::PATH_RESTART)
    }

    fn process(&mut self, event: HookEvent, batch: &mut Batch, _ctx: &mut HookContext) {
        if event != HookEvent::Read {
            // A new run renumbers from scratch; stale history would drop
            // its entire head.
            self.prev = None;
            return;
        }

        let mut kept = 0;
        for i in 0..batch.len() {
            let cur = batch[i].sequence();
            let keep = match self.prev {
                Some(prev) => Self::distance(prev, cur) > 0,
                None => true,
            };
            self.prev = Some(cur);

            if keep {
                batch.swap(i, kept);
                kept += 1;
            } else {
                tracing::debug!(sequence = cur, "dropping reordered sample");
            }
        }
        batch.truncate(kept);
    }
}
