//! # Call Instrumentation
//!
//! Provide the sink interface a `Client` reports to, plus `Metrics`, a
//! built-in sink with atomic counters and fixed-bucket latency histograms.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: Use atomic counters to aggregate events cheaply.
//! 2. **Fixed Buckets**: Keep histogram buckets in a contiguous array for cache locality.
//! 3. **Closed Names**: Counters and timings are enums; `name()` gives the
//!    stable string for backends keyed by name.
//!
//! ## Notes
//! - Timing samples are measured from the start of the call, so `Write`
//!   includes acquire time and `Release` is the full call duration.
//! - Bucket boundaries are expressed in microseconds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default latency bucket boundaries in microseconds.
pub const DEFAULT_LATENCY_BUCKETS_US: [u64; 14] = [
    10, 20, 50, 100, 200, 500, 1_000, 2_000, 5_000, 10_000, 20_000, 50_000, 100_000, 1_000_000,
];

const COUNTERS: usize = 6;
const TIMINGS: usize = 4;

/// Events counted per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    /// An empty slot dialed a fresh connection.
    NewConnection,
    /// Acquiring or dialing a connection failed.
    AcquireError,
    /// The call deadline could not be applied.
    DeadlineError,
    WriteError,
    ReadError,
    /// A connection was closed by the fatal-close policy.
    FatalClose,
}

impl Counter {
    pub const ALL: [Counter; COUNTERS] = [
        Counter::NewConnection,
        Counter::AcquireError,
        Counter::DeadlineError,
        Counter::WriteError,
        Counter::ReadError,
        Counter::FatalClose,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Counter::NewConnection => "kvwire connection new",
            Counter::AcquireError => "kvwire connection acquire error",
            Counter::DeadlineError => "kvwire connection set deadline error",
            Counter::WriteError => "kvwire connection write error",
            Counter::ReadError => "kvwire connection read error",
            Counter::FatalClose => "kvwire connection error close",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Call phases that produce a timing sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timing {
    Acquire,
    Write,
    Read,
    Release,
}

impl Timing {
    pub const ALL: [Timing; TIMINGS] = [Timing::Acquire, Timing::Write, Timing::Read, Timing::Release];

    pub fn name(self) -> &'static str {
        match self {
            Timing::Acquire => "kvwire connection acquire",
            Timing::Write => "kvwire connection write",
            Timing::Read => "kvwire connection read",
            Timing::Release => "kvwire connection release",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Instrumentation sink. Implementations must be cheap; they run on every call.
pub trait Stats: Send + Sync {
    fn inc(&self, counter: Counter);
    fn record(&self, timing: Timing, elapsed: Duration);
}

/// Snapshot of all client metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Counter values, in `Counter::ALL` order.
    pub counters: Vec<(Counter, u64)>,
    /// Histograms, in `Timing::ALL` order.
    pub timings: Vec<(Timing, LatencySnapshot)>,
}

impl MetricsSnapshot {
    /// Value of one counter.
    pub fn counter(&self, counter: Counter) -> u64 {
        self.counters
            .iter()
            .find(|(c, _)| *c == counter)
            .map_or(0, |(_, value)| *value)
    }

    /// Histogram for one timing.
    pub fn timing(&self, timing: Timing) -> Option<&LatencySnapshot> {
        self.timings.iter().find(|(t, _)| *t == timing).map(|(_, snap)| snap)
    }
}

/// Snapshot of the latency histogram.
#[derive(Debug, Clone)]
pub struct LatencySnapshot {
    /// Bucket boundaries in microseconds.
    pub bounds_us: Vec<u64>,
    /// Bucket counts, including the overflow bucket at the end.
    pub buckets: Vec<u64>,
    /// Total number of samples.
    pub samples: u64,
    /// Sum of latencies in microseconds.
    pub sum_us: u64,
}

/// Thread-safe metrics aggregator for a client.
///
/// `Ordering::Relaxed` is sufficient because we do not require cross-field
/// ordering, only eventual consistency.
pub struct Metrics {
    counters: [AtomicU64; COUNTERS],
    latencies: [LatencyHistogram; TIMINGS],
}

impl Metrics {
    /// Creates a new metrics aggregator with the default latency buckets.
    pub fn new() -> Self {
        Self::with_latency_buckets(DEFAULT_LATENCY_BUCKETS_US.to_vec())
    }

    /// Creates a new metrics aggregator with custom latency bucket boundaries.
    ///
    /// The boundaries must be sorted ascending and represent microseconds.
    pub fn with_latency_buckets(bounds_us: Vec<u64>) -> Self {
        Metrics {
            counters: std::array::from_fn(|_| AtomicU64::new(0)),
            latencies: std::array::from_fn(|_| LatencyHistogram::new(bounds_us.clone())),
        }
    }

    /// Returns a snapshot of all counters and histogram buckets.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: Counter::ALL
                .iter()
                .map(|&c| (c, self.counters[c.index()].load(Ordering::Relaxed)))
                .collect(),
            timings: Timing::ALL
                .iter()
                .map(|&t| (t, self.latencies[t.index()].snapshot()))
                .collect(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats for Metrics {
    fn inc(&self, counter: Counter) {
        self.counters[counter.index()].fetch_add(1, Ordering::Relaxed);
    }

    fn record(&self, timing: Timing, elapsed: Duration) {
        self.latencies[timing.index()].record(elapsed);
    }
}

/// Fixed-bucket latency histogram.
///
/// Uses a linear scan to pick buckets; this is O(buckets) but the list is small
/// and stays hot in cache.
pub struct LatencyHistogram {
    bounds_us: Vec<u64>,
    buckets: Vec<AtomicU64>,
    sum_us: AtomicU64,
    samples: AtomicU64,
}

impl LatencyHistogram {
    /// Creates a histogram with explicit bucket boundaries (microseconds).
    ///
    /// **Input**: `bounds_us` sorted ascending.
    /// **Output**: histogram with `bounds_us.len() + 1` buckets (last is overflow).
    pub fn new(bounds_us: Vec<u64>) -> Self {
        let buckets = (0..=bounds_us.len()).map(|_| AtomicU64::new(0)).collect();
        LatencyHistogram {
            bounds_us,
            buckets,
            sum_us: AtomicU64::new(0),
            samples: AtomicU64::new(0),
        }
    }

    /// Records a latency measurement into the histogram.
    ///
    /// **Logic**:
    /// 1. Convert to microseconds.
    /// 2. Increment `samples` and add to `sum_us`.
    /// 3. Find the first bucket where `micros <= bound`, otherwise use overflow.
    pub fn record(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(micros, Ordering::Relaxed);

        let idx = self
            .bounds_us
            .iter()
            .position(|&bound| micros <= bound)
            .unwrap_or(self.bounds_us.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot of the histogram.
    pub fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            bounds_us: self.bounds_us.clone(),
            buckets: self
                .buckets
                .iter()
                .map(|bucket| bucket.load(Ordering::Relaxed))
                .collect(),
            samples: self.samples.load(Ordering::Relaxed),
            sum_us: self.sum_us.load(Ordering::Relaxed),
        }
    }
}
