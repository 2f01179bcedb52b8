//! Startup-transient suppression.

use crate::clock::Timestamp;
use crate::hook::{Batch, EventMask, Hook, HookContext, HookEvent};
use std::time::Duration;

#[derive(Debug)]
enum Gate {
    /// Swallow a fixed number of samples.
    Count { skip: u64, seen: u64 },
    /// Swallow everything received within `skip` of the first sample.
    Window {
        skip: Duration,
        deadline: Option<Timestamp>,
    },
}

/// Drops the head of a stream: the first N samples, or everything
/// arriving within a settle window measured from the first sample.
///
/// The gate re-arms on `PathStart` and on `PathRestart`, so every run
/// sheds its own transient.
#[derive(Debug)]
pub struct SkipFirst {
    gate: Gate,
}

impl SkipFirst {
    /// Skip the first `count` samples of each run.
    pub fn count(count: u64) -> Self {
        Self {
            gate: Gate::Count {
                skip: count,
                seen: 0,
            },
        }
    }

    /// Skip samples received within `window` of each run's first sample.
    pub fn window(window: Duration) -> Self {
        Self {
            gate: Gate::Window {
                skip: window,
                deadline: None,
            },
        }
    }

    fn rearm(&mut self) {
        match &mut self.gate {
            Gate::Count { seen, .. } => *seen = 0,
            Gate::Window { deadline, .. } => *deadline = None,
        }
    }
}

impl Hook for SkipFirst {
    fn name(&self) -> &'static str {
        "skip_first"
    }

    fn mask(&self) -> EventMask {
        EventMask::READ
            .with(EventMask::PATH_START)
            .with(EventMask::PATH_RESTART)
    }

    fn process(&mut self, event: HookEvent, batch: &mut Batch, _ctx: &mut HookContext) {
        if event != HookEvent::Read {
            self.rearm();
            return;
        }

        let mut kept = 0;
        for i in 0..batch.len() {
            let keep = match &mut self.gate {
                Gate::Count { skip, seen } => {
                    let keep = *seen >= *skip;
                    *seen += 1;
                    keep
                }
                Gate::Window { skip, deadline } => {
                    let received = batch[i].ts().received;
                    let deadline =
                        *deadline.get_or_insert_with(|| received.saturating_add(*skip));
                    received >= deadline
                }
            };

            if keep {
                batch.swap(i, kept);
                kept += 1;
            }
        }
        batch.truncate(kept);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::Pipeline;
    use crate::memory::MemoryType;
    use crate::pool::Pool;
    use crate::sample::Sample;
    use std::sync::Arc;

    fn seq_batch(pool: &Arc<Pool>, seqs: &[u64]) -> Batch {
        seqs.iter()
            .map(|&seq| {
                let mut smp = Sample::alloc(pool).unwrap();
                smp.set_sequence(seq);
                smp
            })
            .collect()
    }

    fn run(pipeline: &mut Pipeline, batch: &mut Batch) -> Vec<u64> {
        pipeline.run(HookEvent::Read, batch);
        batch.iter().map(|s| s.sequence()).collect()
    }

    #[test]
    fn test_count_gate() {
        let pool = Pool::new(16, Sample::bytes_required(4), MemoryType::Heap).unwrap();
        let mut pipeline =
            Pipeline::new(vec![(99, Box::new(SkipFirst::count(3)) as Box<dyn Hook>)]);

        let mut batch = seq_batch(&pool, &[0, 1]);
        assert_eq!(run(&mut pipeline, &mut batch), Vec::<u64>::new());

        let mut batch = seq_batch(&pool, &[2, 3, 4]);
        assert_eq!(run(&mut pipeline, &mut batch), vec![3, 4]);
    }

    #[test]
    fn test_count_rearms_on_restart() {
        let pool = Pool::new(16, Sample::bytes_required(4), MemoryType::Heap).unwrap();
        let mut pipeline =
            Pipeline::new(vec![(99, Box::new(SkipFirst::count(1)) as Box<dyn Hook>)]);

        let mut batch = seq_batch(&pool, &[0, 1]);
        assert_eq!(run(&mut pipeline, &mut batch), vec![1]);

        let mut empty = Batch::new();
        pipeline.run(HookEvent::PathRestart, &mut empty);

        // The new run loses its first sample again.
        let mut batch = seq_batch(&pool, &[0, 1]);
        assert_eq!(run(&mut pipeline, &mut batch), vec![1]);
    }

    #[test]
    fn test_window_gate() {
        let pool = Pool::new(16, Sample::bytes_required(4), MemoryType::Heap).unwrap();
        let mut pipeline = Pipeline::new(vec![(
            99,
            Box::new(SkipFirst::window(Duration::from_secs(1))) as Box<dyn Hook>,
        )]);

        let mut batch = seq_batch(&pool, &[0, 1, 2, 3]);
        let stamps = [0_u64, 400_000_000, 1_000_000_000, 2_500_000_000];
        for (smp, &ns) in batch.iter_mut().zip(&stamps) {
            smp.set_ts_received(Timestamp::from_nanos(1_000_000_000 + ns));
        }

        // Window anchors at the first sample (t=1s), deadline t=2s.
        assert_eq!(run(&mut pipeline, &mut batch), vec![2, 3]);
    }
}
