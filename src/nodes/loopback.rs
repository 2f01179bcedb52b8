//! In-memory endpoint: written samples come back out of `read`.

use crate::error::{Error, Result};
use crate::node::NodeKind;
use crate::queue::SignalledQueue;
use crate::sample::Sample;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Queue-backed endpoint that echoes writes back to readers.
///
/// `write` clones each sample into an internal [`SignalledQueue`]; a full
/// queue drops the sample with a warning rather than blocking the writer.
/// `read` swaps queued samples into the caller's slice; the displaced
/// pre-allocations return to their own pool as they are overwritten, and
/// the swapped-in samples keep the pool they were allocated from, so
/// loopbacks may join paths with different pools.
pub struct LoopbackNode {
    queue: Arc<SignalledQueue<Sample>>,
    read_timeout: Duration,
    sample_len: usize,
}

impl LoopbackNode {
    /// Loopback with room for `depth` in-flight samples.
    pub fn new(depth: usize) -> Self {
        Self {
            queue: Arc::new(SignalledQueue::new(depth)),
            read_timeout: DEFAULT_READ_TIMEOUT,
            sample_len: crate::node::DEFAULT_SAMPLE_LEN,
        }
    }

    /// How long `read` waits for the first sample before returning empty.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Declare the values-per-sample this endpoint carries.
    pub fn with_sample_len(mut self, len: usize) -> Self {
        self.sample_len = len;
        self
    }

    /// A cloneable handle onto the internal queue, for backend threads or
    /// tests that inject and extract without going through the node.
    pub fn handle(&self) -> LoopbackHandle {
        LoopbackHandle {
            queue: Arc::clone(&self.queue),
        }
    }
}

impl NodeKind for LoopbackNode {
    fn kind(&self) -> &'static str {
        "loopback"
    }

    fn open(&mut self) -> Result<()> {
        // Leftovers from a previous run would leak into this one.
        while let Ok(Some(_)) = self.queue.pull_timeout(Duration::ZERO) {}
        self.queue.reopen();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.queue.close();
        Ok(())
    }

    fn read(&mut self, samples: &mut [Sample]) -> Result<usize> {
        let mut pulled = Vec::with_capacity(samples.len());
        let n = self
            .queue
            .pull_many_timeout(&mut pulled, samples.len(), self.read_timeout)?;
        for (slot, smp) in samples.iter_mut().zip(pulled) {
            *slot = smp;
        }
        Ok(n)
    }

    fn write(&mut self, samples: &[Sample]) -> Result<usize> {
        for smp in samples {
            if self.queue.push(smp.clone()).is_err() {
                tracing::warn!(
                    sequence = smp.sequence(),
                    "loopback queue full, dropping sample"
                );
            }
        }
        Ok(samples.len())
    }

    fn sample_len(&self) -> usize {
        self.sample_len
    }
}

/// Clonable access to a [`LoopbackNode`]'s queue.
#[derive(Clone)]
pub struct LoopbackHandle {
    queue: Arc<SignalledQueue<Sample>>,
}

impl LoopbackHandle {
    /// Push a sample in from outside; a full or closed queue returns it.
    pub fn inject(&self, smp: Sample) -> std::result::Result<(), Sample> {
        self.queue.push(smp)
    }

    /// Pull a sample out, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// [`Error::Stopped`] once the node has closed and the queue drained.
    pub fn extract(&self, timeout: Duration) -> Result<Option<Sample>> {
        self.queue.pull_timeout(timeout)
    }

    /// Estimate of queued samples.
    pub fn available(&self) -> usize {
        self.queue.available()
    }
}

impl std::fmt::Debug for LoopbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackHandle")
            .field("available", &self.queue.available())
            .finish()
    }
}
