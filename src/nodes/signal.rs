//! Timer-paced signal generator.

use crate::clock::Timestamp;
use crate::error::{Error, Result};
use crate::node::{NodeKind, State};
use crate::sample::{Sample, Value};
use crate::task::Task;
use smallvec::SmallVec;
use std::os::unix::io::{AsRawFd, RawFd};

/// Waveform shapes the generator can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    /// `amplitude * sin(2π * frequency * t)`
    Sine,
    /// `±amplitude`, switching at half the waveform period.
    Square,
    /// Sawtooth rising from 0 to `amplitude` once per waveform period.
    Ramp,
    /// The sample's own sequence number.
    Counter,
    /// `amplitude` in every sample.
    Constant,
}

/// Source endpoint generating samples at a fixed rate.
///
/// Each `read` waits one timer period and fills a single sample, so the
/// wrapper's vectorize loop produces evenly paced batches. The waveform
/// phase is derived from the sequence counter rather than the wall clock,
/// keeping the shape exact even when the timer reports missed periods;
/// those show up as sequence gaps, not phase jumps.
pub struct SignalNode {
    waveform: Waveform,
    rate: f64,
    frequency: f64,
    amplitude: f64,
    values: usize,
    limit: Option<u64>,
    task: Option<Task>,
    counter: u64,
}

impl SignalNode {
    /// Generator with 1 value per sample at 10 Hz, unit amplitude and
    /// 1 Hz waveform frequency.
    pub fn new(waveform: Waveform) -> Self {
        Self {
            waveform,
            rate: 10.0,
            frequency: 1.0,
            amplitude: 1.0,
            values: 1,
            limit: None,
            task: None,
            counter: 0,
        }
    }

    /// Samples per second.
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    /// Waveform repetitions per second.
    pub fn with_frequency(mut self, frequency: f64) -> Self {
        self.frequency = frequency;
        self
    }

    /// Peak value.
    pub fn with_amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Values per sample (all carry the same waveform value).
    pub fn with_values(mut self, values: usize) -> Self {
        self.values = values;
        self
    }

    /// Stop with [`Error::Stopped`] after this many samples.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    fn waveform_value(&self, seq: u64) -> f64 {
        let running = seq as f64 / self.rate;
        let phase = (running * self.frequency).fract();

        match self.waveform {
            Waveform::Sine => self.amplitude * (std::f64::consts::TAU * phase).sin(),
            Waveform::Square => self.amplitude * if phase < 0.5 { -1.0 } else { 1.0 },
            Waveform::Ramp => self.amplitude * phase,
            Waveform::Counter => seq as f64,
            Waveform::Constant => self.amplitude,
        }
    }
}

impl NodeKind for SignalNode {
    fn kind(&self) -> &'static str {
        "signal"
    }

    fn open(&mut self) -> Result<()> {
        self.task = Some(Task::rate(self.rate)?);
        self.counter = 0;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.task = None;
        Ok(())
    }

    fn read(&mut self, samples: &mut [Sample]) -> Result<usize> {
        let Some(first) = samples.first_mut() else {
            return Ok(0);
        };

        if let Some(limit) = self.limit {
            if self.counter >= limit {
                tracing::info!(limit, "signal generator reached its limit");
                return Err(Error::Stopped);
            }
        }

        let steps = match &mut self.task {
            Some(task) => task.wait()?,
            None => {
                return Err(Error::InvalidState {
                    op: "read",
                    state: State::Created,
                })
            }
        };
        if steps > 1 {
            tracing::warn!(missed = steps - 1, "signal generator missed timer periods");
        }

        let seq = self.counter;
        self.counter += steps;

        let value = self.waveform_value(seq) as f32;
        let len = self.values.min(first.capacity());
        if let Some(vals) = first.values_mut() {
            for v in vals.iter_mut().take(len) {
                *v = Value::float(value);
            }
        }

        let now = Timestamp::now();
        first.set_sequence(seq);
        first.set_len(len);
        first.set_ts_origin(now);
        first.set_ts_received(now);

        Ok(1)
    }

    fn write(&mut self, _samples: &[Sample]) -> Result<usize> {
        Err(Error::NotSupported("write to a signal generator"))
    }

    fn poll_fds(&self) -> SmallVec<[RawFd; 2]> {
        match self.task.as_ref().and_then(|t| t.fd()) {
            Some(fd) => {
                let mut fds = SmallVec::new();
                fds.push(fd.as_raw_fd());
                fds
            }
            None => SmallVec::new(),
        }
    }

    fn sample_len(&self) -> usize {
        self.values
    }
}

impl std::fmt::Debug for SignalNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalNode")
            .field("waveform", &self.waveform)
            .field("rate", &self.rate)
            .field("frequency", &self.frequency)
            .field("amplitude", &self.amplitude)
            .field("values", &self.values)
            .field("limit", &self.limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryType;
    use crate::node::Node;
    use crate::pool::Pool;
    use std::sync::Arc;

    fn test_pool() -> Arc<Pool> {
        Pool::new(16, Sample::bytes_required(8), MemoryType::Heap).unwrap()
    }

    #[test]
    fn test_waveform_values() {
        // rate 1000, frequency 250: phase advances a quarter turn per sample.
        let sine = SignalNode::new(Waveform::Sine)
            .with_rate(1000.0)
            .with_frequency(250.0)
            .with_amplitude(2.0);
        assert!(sine.waveform_value(0).abs() < 1e-9);
        assert!((sine.waveform_value(1) - 2.0).abs() < 1e-9);
        assert!(sine.waveform_value(2).abs() < 1e-9);
        assert!((sine.waveform_value(3) + 2.0).abs() < 1e-9);

        let square = SignalNode::new(Waveform::Square)
            .with_rate(1000.0)
            .with_frequency(250.0);
        assert_eq!(square.waveform_value(0), -1.0);
        assert_eq!(square.waveform_value(1), -1.0);
        assert_eq!(square.waveform_value(2), 1.0);
        assert_eq!(square.waveform_value(3), 1.0);

        let ramp = SignalNode::new(Waveform::Ramp)
            .with_rate(1000.0)
            .with_frequency(250.0)
            .with_amplitude(4.0);
        assert!((ramp.waveform_value(1) - 1.0).abs() < 1e-9);
        assert!((ramp.waveform_value(3) - 3.0).abs() < 1e-9);
        assert!(ramp.waveform_value(4).abs() < 1e-9);

        assert_eq!(SignalNode::new(Waveform::Counter).waveform_value(7), 7.0);
        assert_eq!(
            SignalNode::new(Waveform::Constant)
                .with_amplitude(2.5)
                .waveform_value(123),
            2.5
        );
    }

    #[test]
    fn test_generates_paced_sequences() {
        let pool = test_pool();
        let mut node = Node::new(
            "sig0",
            Box::new(
                SignalNode::new(Waveform::Counter)
                    .with_rate(500.0)
                    .with_values(3),
            ),
        )
        .with_vectorize(1);
        node.start().unwrap();

        let mut batch = Sample::alloc_many(&pool, 3);
        assert_eq!(node.read(&mut batch).unwrap(), 3);

        let mut prev = None;
        for smp in &batch {
            assert_eq!(smp.len(), 3);
            assert_eq!(smp.values()[0].as_f32(), smp.sequence() as f32);
            assert!(!smp.ts().origin.is_unset());
            assert_eq!(smp.ts().origin, smp.ts().received);
            assert_eq!(smp.source(), Some(node.id()));
            if let Some(prev) = prev {
                assert!(smp.sequence() > prev);
            }
            prev = Some(smp.sequence());
        }
    }

    #[test]
    fn test_limit_stops_generation() {
        let pool = test_pool();
        let mut node = Node::new(
            "sig1",
            Box::new(
                SignalNode::new(Waveform::Constant)
                    .with_rate(2000.0)
                    .with_limit(3),
            ),
        );
        node.start().unwrap();

        let mut batch = Sample::alloc_many(&pool, 8);
        let n = node.read(&mut batch).unwrap();
        assert!(n <= 3, "limit overrun: {n}");

        // Drain whatever pacing slack allowed, then the stop is sticky.
        let mut total = n;
        loop {
            match node.read(&mut batch) {
                Ok(n) => total += n,
                Err(Error::Stopped) => break,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(total <= 3);
    }

    #[test]
    fn test_read_before_open_fails() {
        let pool = test_pool();
        let mut kind = SignalNode::new(Waveform::Constant);
        let mut batch = Sample::alloc_many(&pool, 1);
        assert!(matches!(
            kind.read(&mut batch),
            Err(Error::InvalidState { op: "read", .. })
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_poll_fd_available_after_open() {
        let mut kind = SignalNode::new(Waveform::Sine).with_rate(100.0);
        assert!(kind.poll_fds().is_empty());
        kind.open().unwrap();
        assert_eq!(kind.poll_fds().len(), 1);
        kind.close().unwrap();
        assert!(kind.poll_fds().is_empty());
    }

    #[test]
    fn test_write_not_supported() {
        let mut node = Node::new("sig2", Box::new(SignalNode::new(Waveform::Sine)));
        node.start().unwrap();
        let pool = test_pool();
        let batch = Sample::alloc_many(&pool, 1);
        assert!(matches!(node.write(&batch), Err(Error::NotSupported(_))));
    }
}
