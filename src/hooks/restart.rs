//! Sequence-reset detection.

use crate::hook::{Batch, EventMask, Hook, HookContext, HookEvent};

/// Half the 32-bit sequence range. Reordering distances are tiny; a
/// backwards jump bigger than this is a new run, not a late sample.
const HALF_RANGE: u64 = u32::MAX as u64 / 2;

/// Watches for sequence resets and asks the pipeline to dispatch a
/// [`HookEvent::PathRestart`] over the new run's samples.
///
/// A reset is a zero sequence after any progress, or a backwards jump
/// greater than [`HALF_RANGE`]. A plain 32-bit wrap is neither: the
/// post-wrap distance stays small and positive, so steady counting
/// through the wrap does not restart the path.
#[derive(Debug, Default)]
pub struct Restart {
    prev: Option<u64>,
}

impl Restart {
    /// Fresh detector with no history.
    pub fn new() -> Self {
        Self::default()
    }

    fn is_reset(prev: u64, cur: u64) -> bool {
        (cur == 0 && prev > 0) || (cur < prev && prev - cur > HALF_RANGE)
    }
}

impl Hook for Restart {
    fn name(&self) -> &'static str {
        "restart"
    }

    fn mask(&self) -> EventMask {
        EventMask::READ.with(EventMask::PATH_START)
    }

    fn process(&mut self, event: HookEvent, batch: &mut Batch, ctx: &mut HookContext) {
        if event == HookEvent::PathStart {
            self.prev = None;
            return;
        }

        let mut requested = false;
        for (i, smp) in batch.iter().enumerate() {
            let cur = smp.sequence();
            if !requested {
                if let Some(prev) = self.prev {
                    if Self::is_reset(prev, cur) {
                        tracing::info!(prev, cur, "sequence reset detected");
                        ctx.request_restart(i);
                        requested = true;
                    }
                }
            }
            self.prev = Some(cur);
        }
    }
}
