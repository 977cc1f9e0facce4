//! Latency histogram: fixed buckets incremented wait-free, plus a bounded
//! reservoir of raw observations for percentile estimation.

use crossbeam::queue::ArrayQueue;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Upper bucket bounds in milliseconds. The final bucket is open-ended.
pub const BUCKET_BOUNDS_MS: [f64; 8] = [0.5, 1.0, 2.0, 5.0, 10.0, 50.0, 100.0, 500.0];

/// Number of buckets including the open-ended tail.
pub const BUCKETS: usize = BUCKET_BOUNDS_MS.len() + 1;

/// Display labels, index-aligned with the recorded counts.
pub const BUCKET_LABELS: [&str; BUCKETS] = [
    "<0.5ms", "<=1ms", "<=2ms", "<=5ms", "<=10ms", "<=50ms", "<=100ms", "<=500ms", ">500ms",
];

/// How many raw observations the reservoir retains. When full, the oldest
/// sample is displaced and counted as dropped.
pub const RESERVOIR_CAPACITY: usize = 10_000;

/// Concurrent latency recorder. Bucket increments are single atomic adds;
/// the reservoir is a lock-free bounded ring.
pub struct LatencyHistogram {
    buckets: [AtomicU64; BUCKETS],
    reservoir: ArrayQueue<f64>,
    dropped: AtomicU64,
    sum_micros: AtomicU64,
    count: AtomicU64,
    max_micros: AtomicU64,
}

impl LatencyHistogram {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(RESERVOIR_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(reservoir_capacity: usize) -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            reservoir: ArrayQueue::new(reservoir_capacity.max(1)),
            dropped: AtomicU64::new(0),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
            max_micros: AtomicU64::new(0),
        }
    }

    pub fn record(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        let ms = latency.as_secs_f64() * 1_000.0;

        if let Some(bucket) = self.buckets.get(bucket_index(ms)) {
            bucket.fetch_add(1, Ordering::Relaxed);
        }
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);

        if self.reservoir.force_push(ms).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Drain into an immutable snapshot. Called once, after every worker for
    /// the band has exited.
    #[must_use]
    pub fn freeze(&self) -> HistogramSnapshot {
        let buckets: Vec<u64> = self
            .buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect();

        let mut samples = Vec::with_capacity(self.reservoir.len());
        while let Some(sample) = self.reservoir.pop() {
            samples.push(sample);
        }
        samples.sort_unstable_by(|a, b| a.total_cmp(b));

        let count = self.count.load(Ordering::Relaxed);
        let sum_micros = self.sum_micros.load(Ordering::Relaxed);
        #[allow(clippy::cast_precision_loss)]
        let avg_ms = if count == 0 {
            0.0
        } else {
            sum_micros as f64 / count as f64 / 1_000.0
        };
        #[allow(clippy::cast_precision_loss)]
        let max_ms = self.max_micros.load(Ordering::Relaxed) as f64 / 1_000.0;

        let std_dev_ms = std_dev(&samples, avg_ms);

        HistogramSnapshot {
            buckets,
            dropped_samples: self.dropped.load(Ordering::Relaxed),
            sampled: samples.len() as u64,
            latency: LatencySummary {
                avg_ms,
                p50_ms: percentile(&samples, 50.0),
                p95_ms: percentile(&samples, 95.0),
                p99_ms: percentile(&samples, 99.0),
                std_dev_ms,
                max_ms,
            },
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

fn bucket_index(ms: f64) -> usize {
    if BUCKET_BOUNDS_MS.first().is_some_and(|lowest| ms < *lowest) {
        return 0;
    }
    BUCKET_BOUNDS_MS
        .iter()
        .enumerate()
        .skip(1)
        .find_map(|(i, bound)| (ms <= *bound).then_some(i))
        .unwrap_or(BUCKETS - 1)
}

/// Nearest-rank percentile over a pre-sorted slice.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let rank = ((pct / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted
        .get(rank.min(sorted.len() - 1))
        .copied()
        .unwrap_or(0.0)
}

fn std_dev(samples: &[f64], mean: f64) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / samples.len() as f64;
    variance.sqrt()
}

/// Percentile summary derived from the reservoir at freeze time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub std_dev_ms: f64,
    pub max_ms: f64,
}

impl LatencySummary {
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            avg_ms: 0.0,
            p50_ms: 0.0,
            p95_ms: 0.0,
            p99_ms: 0.0,
            std_dev_ms: 0.0,
            max_ms: 0.0,
        }
    }
}

/// Frozen histogram state carried inside a band result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    /// Per-bucket counts, index-aligned with [`BUCKET_LABELS`].
    pub buckets: Vec<u64>,
    /// Observations displaced from the reservoir after it filled.
    pub dropped_samples: u64,
    /// Observations retained in the reservoir at freeze time.
    pub sampled: u64,
    pub latency: LatencySummary,
}

impl HistogramSnapshot {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            buckets: vec![0; BUCKETS],
            dropped_samples: 0,
            sampled: 0,
            latency: LatencySummary::zero(),
        }
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.buckets.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_bucket_index_bounds() {
        assert_eq!(bucket_index(0.1), 0);
        assert_eq!(bucket_index(0.5), 1);
        assert_eq!(bucket_index(1.0), 1);
        assert_eq!(bucket_index(1.5), 2);
        assert_eq!(bucket_index(5.0), 3);
        assert_eq!(bucket_index(42.0), 5);
        assert_eq!(bucket_index(100.0), 6);
        assert_eq!(bucket_index(400.0), 7);
        assert_eq!(bucket_index(9_999.0), 8);
    }

    #[test]
    fn test_every_observation_lands_in_a_bucket() {
        let histogram = LatencyHistogram::new();
        for micros in [100_u64, 800, 1_500, 4_000, 9_000, 40_000, 90_000, 400_000, 900_000] {
            histogram.record(Duration::from_micros(micros));
        }
        let snapshot = histogram.freeze();
        assert_eq!(snapshot.total(), 9);
        assert_eq!(snapshot.buckets, vec![1, 1, 1, 1, 1, 1, 1, 1, 1]);
    }

    #[test]
    fn test_reservoir_bound_and_drop_accounting() {
        let histogram = LatencyHistogram::with_capacity(8);
        for i in 0..20_u64 {
            histogram.record(Duration::from_millis(i));
        }
        let snapshot = histogram.freeze();
        assert_eq!(snapshot.sampled, 8);
        assert_eq!(snapshot.dropped_samples, 12);
        // every completed operation still contributes to a bucket
        assert_eq!(snapshot.total(), 20);
        assert!(snapshot.sampled + snapshot.dropped_samples >= snapshot.total());
    }

    #[test]
    fn test_oldest_samples_are_displaced() {
        let histogram = LatencyHistogram::with_capacity(4);
        for i in 0..10_u64 {
            histogram.record(Duration::from_millis(i));
        }
        let snapshot = histogram.freeze();
        // samples 6..10 survive, the earliest are gone
        assert!((snapshot.latency.p50_ms - 8.0).abs() < 1.5);
    }

    #[test]
    fn test_percentiles_on_known_distribution() {
        let histogram = LatencyHistogram::new();
        for i in 1..=100_u64 {
            histogram.record(Duration::from_millis(i));
        }
        let snapshot = histogram.freeze();
        assert!((snapshot.latency.p50_ms - 50.0).abs() <= 1.0);
        assert!((snapshot.latency.p95_ms - 95.0).abs() <= 1.0);
        assert!((snapshot.latency.p99_ms - 99.0).abs() <= 1.0);
        assert!((snapshot.latency.avg_ms - 50.5).abs() <= 0.5);
        assert!((snapshot.latency.max_ms - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_empty_histogram_freezes_to_zeroes() {
        let snapshot = LatencyHistogram::new().freeze();
        assert_eq!(snapshot.total(), 0);
        assert_eq!(snapshot.latency, LatencySummary::zero());
    }

    #[test]
    fn test_concurrent_recording() {
        use std::sync::Arc;

        let histogram = Arc::new(LatencyHistogram::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let histogram = Arc::clone(&histogram);
                std::thread::spawn(move || {
                    for i in 0..500_u64 {
                        histogram.record(Duration::from_micros(i * 37 % 200_000));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let snapshot = histogram.freeze();
        assert_eq!(snapshot.total(), 4_000);
        assert_eq!(snapshot.sampled + snapshot.dropped_samples, 4_000);
    }
}
