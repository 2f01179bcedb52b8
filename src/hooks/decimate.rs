//! Rate reduction by sample count.

use crate::hook::{Batch, EventMask, Hook, HookContext, HookEvent};
use std::num::NonZeroU32;

/// Keeps every `ratio`-th sample, starting with the first.
///
/// The counter runs across batch borders, so a steady stream decimates
/// evenly no matter how reads chunk it.
#[derive(Debug)]
pub struct Decimate {
    ratio: NonZeroU32,
    counter: u64,
}

impl Decimate {
    /// Keep one sample out of every `ratio`. A ratio of 1 passes
    /// everything through.
    pub fn new(ratio: NonZeroU32) -> Self {
        Self { ratio, counter: 0 }
    }
}

impl Hook for Decimate {
    fn name(&self) -> &'static str {
        "decimate"
    }

    fn mask(&self) -> EventMask {
        EventMask::READ
    }

    fn process(&mut self, _event: HookEvent, batch: &mut Batch, _ctx: &mut HookContext) {
        let ratio = u64::from(self.ratio.get());

        let mut kept = 0;
        for i in 0..batch.len() {
            let keep = self.counter % ratio == 0;
            self.counter += 1;

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

    fn run_seqs(pipeline: &mut Pipeline, pool: &Arc<Pool>, seqs: &[u64]) -> Vec<u64> {
        let mut batch: Batch = seqs
            .iter()
            .map(|&seq| {
                let mut smp = Sample::alloc(pool).unwrap();
                smp.set_sequence(seq);
                smp
            })
            .collect();
        pipeline.run(HookEvent::Read, &mut batch);
        batch.iter().map(|s| s.sequence()).collect()
    }

    #[test]
    fn test_keeps_every_third() {
        let pool = Pool::new(16, Sample::bytes_required(4), MemoryType::Heap).unwrap();
        let ratio = NonZeroU32::new(3).unwrap();
        let mut pipeline =
            Pipeline::new(vec![(99, Box::new(Decimate::new(ratio)) as Box<dyn Hook>)]);

        let out = run_seqs(&mut pipeline, &pool, &[0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(out, vec![0, 3, 6]);
    }

    #[test]
    fn test_counter_spans_batches() {
        let pool = Pool::new(16, Sample::bytes_required(4), MemoryType::Heap).unwrap();
        let ratio = NonZeroU32::new(3).unwrap();
        let mut pipeline =
            Pipeline::new(vec![(99, Box::new(Decimate::new(ratio)) as Box<dyn Hook>)]);

        assert_eq!(run_seqs(&mut pipeline, &pool, &[0, 1]), vec![0]);
        // Continues mid-cycle: global positions 2, 3, 4 keep only 3.
        assert_eq!(run_seqs(&mut pipeline, &pool, &[2, 3, 4]), vec![3]);
    }

    #[test]
    fn test_ratio_one_passes_through() {
        let pool = Pool::new(16, Sample::bytes_required(4), MemoryType::Heap).unwrap();
        let mut pipeline = Pipeline::new(vec![(
            99,
            Box::new(Decimate::new(NonZeroU32::MIN)) as Box<dyn Hook>,
        )]);

        let out = run_seqs(&mut pipeline, &pool, &[1, 2, 3]);
        assert_eq!(out, vec![1, 2, 3]);
    }
}
