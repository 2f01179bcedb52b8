//! Running statistics with warmup-sized histograms.
//!
//! [`Hist`] keeps min/max and an online mean/variance (Knuth's running
//! method) from the first value on. Bucketed counts need a range, so the
//! histogram watches its first `warmup` values, then freezes the observed
//! span into `bucket_count` equal buckets; later values land in a bucket
//! or in the `lower`/`higher` overflow tallies.
//!
//! [`Stats`] groups the four path metrics the stats hook maintains:
//! one-way delay, origin gap, arrival gap and reordering distance.

// ============================================================================
// Hist
// ============================================================================

/// Histogram with online moments and warmup-derived bucket layout.
#[derive(Debug, Clone)]
pub struct Hist {
    bucket_count: usize,
    warmup: u64,

    low: f64,
    resolution: f64,
    buckets: Vec<u64>,

    total: u64,
    higher: u64,
    lower: u64,

    highest: f64,
    lowest: f64,
    last: f64,

    mean: f64,
    m2: f64,
}

impl Hist {
    /// Histogram that sizes `bucket_count` buckets after observing
    /// `warmup` values. `bucket_count` 0 disables bucketing entirely.
    pub fn new(bucket_count: usize, warmup: u64) -> Self {
        Self {
            bucket_count,
            warmup,
            low: 0.0,
            resolution: 0.0,
            buckets: Vec::new(),
            total: 0,
            higher: 0,
            lower: 0,
            highest: f64::MIN,
            lowest: f64::MAX,
            last: 0.0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    /// Record one value.
    pub fn put(&mut self, value: f64) {
        self.last = value;

        if value > self.highest {
            self.highest = value;
        }
        if value < self.lowest {
            self.lowest = value;
        }

        self.total += 1;

        // Running mean and variance, Knuth TAOCP vol. 2 p. 232.
        if self.total == 1 {
            self.mean = value;
            self.m2 = 0.0;
        } else {
            let delta = value - self.mean;
            self.mean += delta / self.total as f64;
            self.m2 += delta * (value - self.mean);
        }

        if self.buckets.is_empty() {
            // Still warming up: freeze the layout once enough of the value
            // range has been seen. Warmup values themselves stay unbucketed.
            if self.bucket_count > 0
                && self.total >= self.warmup.max(2)
                && self.highest > self.lowest
            {
                self.low = self.lowest;
                self.resolution = (self.highest - self.lowest) / self.bucket_count as f64;
                self.buckets = vec![0; self.bucket_count];
            }
        } else {
            let idx = ((value - self.low) / self.resolution).round();
            if idx < 0.0 {
                self.lower += 1;
            } else if idx as usize >= self.buckets.len() {
                self.higher += 1;
            } else {
                self.buckets[idx as usize] += 1;
            }
        }
    }

    /// Forget everything, including the bucket layout (a fresh warmup
    /// begins).
    pub fn reset(&mut self) {
        self.low = 0.0;
        self.resolution = 0.0;
        self.buckets.clear();
        self.total = 0;
        self.higher = 0;
        self.lower = 0;
        self.highest = f64::MIN;
        self.lowest = f64::MAX;
        self.last = 0.0;
        self.mean = 0.0;
        self.m2 = 0.0;
    }

    /// Number of recorded values.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Mean of all recorded values, 0 when empty.
    pub fn mean(&self) -> f64 {
        if self.total > 0 { self.mean } else { 0.0 }
    }

    /// Sample variance, 0 with fewer than two values.
    pub fn variance(&self) -> f64 {
        if self.total > 1 {
            self.m2 / (self.total - 1) as f64
        } else {
            0.0
        }
    }

    /// Sample standard deviation.
    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Smallest value seen, `None` when empty.
    pub fn min(&self) -> Option<f64> {
        (self.total > 0).then_some(self.lowest)
    }

    /// Largest value seen, `None` when empty.
    pub fn max(&self) -> Option<f64> {
        (self.total > 0).then_some(self.highest)
    }

    /// Most recently recorded value.
    pub fn last(&self) -> f64 {
        self.last
    }

    /// Bucketed counts; empty until warmup completes.
    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }

    /// Values that fell above the frozen range.
    pub fn higher(&self) -> u64 {
        self.higher
    }

    /// Values that fell below the frozen range.
    pub fn lower(&self) -> u64 {
        self.lower
    }
}

// ============================================================================
// Stats
// ============================================================================

/// Path metrics tracked by the stats hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    /// `ts.received - ts.origin` per sample, in seconds.
    OneWayDelay,
    /// Gap between consecutive origin timestamps, in seconds.
    GapOrigin,
    /// Gap between consecutive arrival timestamps, in seconds.
    GapReceived,
    /// Sequence distance of samples that arrived out of order.
    Reordered,
}

impl Metric {
    /// All metrics, in summary order.
    pub const ALL: [Metric; 4] = [
        Metric::OneWayDelay,
        Metric::GapOrigin,
        Metric::GapReceived,
        Metric::Reordered,
    ];

    fn label(self) -> &'static str {
        match self {
            Metric::OneWayDelay => "one_way_delay",
            Metric::GapOrigin => "gap_origin",
            Metric::GapReceived => "gap_received",
            Metric::Reordered => "reordered",
        }
    }
}

/// One histogram per [`Metric`].
#[derive(Debug, Clone)]
pub struct Stats {
    owd: Hist,
    gap_origin: Hist,
    gap_received: Hist,
    reordered: Hist,
}

impl Stats {
    /// Stats with the given histogram shape for every metric.
    pub fn new(bucket_count: usize, warmup: u64) -> Self {
        Self {
            owd: Hist::new(bucket_count, warmup),
            gap_origin: Hist::new(bucket_count, warmup),
            gap_received: Hist::new(bucket_count, warmup),
            reordered: Hist::new(bucket_count, warmup),
        }
    }

    /// Record a value for one metric.
    pub fn update(&mut self, metric: Metric, value: f64) {
        self.hist_mut(metric).put(value);
    }

    /// Clear every metric (fresh warmups).
    pub fn reset(&mut self) {
        self.owd.reset();
        self.gap_origin.reset();
        self.gap_received.reset();
        self.reordered.reset();
    }

    /// Histogram of one metric.
    pub fn hist(&self, metric: Metric) -> &Hist {
        match metric {
            Metric::OneWayDelay => &self.owd,
            Metric::GapOrigin => &self.gap_origin,
            Metric::GapReceived => &self.gap_received,
            Metric::Reordered => &self.reordered,
        }
    }

    fn hist_mut(&mut self, metric: Metric) -> &mut Hist {
        match metric {
            Metric::OneWayDelay => &mut self.owd,
            Metric::GapOrigin => &mut self.gap_origin,
            Metric::GapReceived => &mut self.gap_received,
            Metric::Reordered => &mut self.reordered,
        }
    }

    /// Log one summary line per non-empty metric.
    pub fn log_summary(&self, owner: &str) {
        for metric in Metric::ALL {
            let hist = self.hist(metric);
            if hist.total() == 0 {
                continue;
            }
            tracing::info!(
                owner,
                metric = metric.label(),
                total = hist.total(),
                mean = hist.mean(),
                stddev = hist.stddev(),
                min = hist.min().unwrap_or(0.0),
                max = hist.max().unwrap_or(0.0),
                "stats summary"
            );
        }
    }
}
