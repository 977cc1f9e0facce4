//! Per-band operation counters.
//!
//! One [`Metrics`] instance is created at band start, shared by every worker
//! in the band, and frozen into an immutable [`MetricsSnapshot`] once all
//! workers have exited. All hot-path mutation is atomic.

pub mod histogram;

pub use histogram::{
    BUCKET_LABELS, BUCKETS, HistogramSnapshot, LatencyHistogram, LatencySummary,
};

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// What a successful driver operation reports back.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpOutcome {
    /// Queries executed by the operation (an operation may run several).
    pub queries: u64,
    pub rows_read: u64,
    pub rows_modified: u64,
}

impl OpOutcome {
    #[must_use]
    pub const fn single_query() -> Self {
        Self {
            queries: 1,
            rows_read: 0,
            rows_modified: 0,
        }
    }
}

/// Live counters for one band.
pub struct Metrics {
    committed: AtomicU64,
    executed: AtomicU64,
    errors: AtomicU64,
    attempted: AtomicU64,
    rows_read: AtomicU64,
    rows_modified: AtomicU64,
    by_kind: [AtomicU64; 5],
    exemplars: Mutex<BTreeMap<ErrorKind, String>>,
    histogram: LatencyHistogram,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            committed: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            attempted: AtomicU64::new(0),
            rows_read: AtomicU64::new(0),
            rows_modified: AtomicU64::new(0),
            by_kind: std::array::from_fn(|_| AtomicU64::new(0)),
            exemplars: Mutex::new(BTreeMap::new()),
            histogram: LatencyHistogram::new(),
        }
    }

    pub fn record_attempt(&self) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, latency: Duration, outcome: OpOutcome) {
        self.committed.fetch_add(1, Ordering::Relaxed);
        self.executed
            .fetch_add(outcome.queries.max(1), Ordering::Relaxed);
        self.rows_read.fetch_add(outcome.rows_read, Ordering::Relaxed);
        self.rows_modified
            .fetch_add(outcome.rows_modified, Ordering::Relaxed);
        self.histogram.record(latency);
    }

    /// Count a failed operation. The first message seen for each kind is
    /// retained as an exemplar for the final report.
    pub fn record_error(&self, kind: ErrorKind, message: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        if let Some(counter) = self.by_kind.get(kind_index(kind)) {
            counter.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut exemplars) = self.exemplars.lock() {
            exemplars
                .entry(kind)
                .or_insert_with(|| truncate_exemplar(message));
        }
    }

    #[must_use]
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn attempted(&self) -> u64 {
        self.attempted.load(Ordering::Relaxed)
    }

    /// Freeze into an immutable snapshot, converting raw counts into rates
    /// over the measured wall-clock duration.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn freeze(&self, measured: Duration) -> MetricsSnapshot {
        let secs = measured.as_secs_f64();
        let committed = self.committed.load(Ordering::Relaxed);
        let executed = self.executed.load(Ordering::Relaxed);

        let mut error_kinds = BTreeMap::new();
        for kind in ErrorKind::all() {
            let count = self
                .by_kind
                .get(kind_index(kind))
                .map_or(0, |counter| counter.load(Ordering::Relaxed));
            if count > 0 {
                error_kinds.insert(kind, count);
            }
        }

        let error_exemplars = self
            .exemplars
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default();

        MetricsSnapshot {
            committed,
            executed,
            errors: self.errors.load(Ordering::Relaxed),
            attempted: self.attempted.load(Ordering::Relaxed),
            rows_read: self.rows_read.load(Ordering::Relaxed),
            rows_modified: self.rows_modified.load(Ordering::Relaxed),
            tps: if secs > 0.0 { committed as f64 / secs } else { 0.0 },
            qps: if secs > 0.0 { executed as f64 / secs } else { 0.0 },
            error_kinds,
            error_exemplars,
            histogram: self.histogram.freeze(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

const fn kind_index(kind: ErrorKind) -> usize {
    match kind {
        ErrorKind::Transient => 0,
        ErrorKind::Timeout => 1,
        ErrorKind::CircuitOpen => 2,
        ErrorKind::Permanent => 3,
        ErrorKind::Fatal => 4,
    }
}

fn truncate_exemplar(message: &str) -> String {
    const MAX: usize = 240;
    if message.len() <= MAX {
        return message.to_string();
    }
    let mut cut = MAX;
    while !message.is_char_boundary(cut) {
        cut -= 1;
    }
    message
        .get(..cut)
        .map_or_else(|| message.to_string(), |head| format!("{head}…"))
}

/// Immutable view of a band's counters after freeze.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub committed: u64,
    pub executed: u64,
    pub errors: u64,
    pub attempted: u64,
    pub rows_read: u64,
    pub rows_modified: u64,
    /// Committed operations per second over the measured window.
    pub tps: f64,
    /// Executed queries per second over the measured window.
    pub qps: f64,
    pub error_kinds: BTreeMap<ErrorKind, u64>,
    pub error_exemplars: BTreeMap<ErrorKind, String>,
    pub histogram: HistogramSnapshot,
}

impl MetricsSnapshot {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            committed: 0,
            executed: 0,
            errors: 0,
            attempted: 0,
            rows_read: 0,
            rows_modified: 0,
            tps: 0.0,
            qps: 0.0,
            error_kinds: BTreeMap::new(),
            error_exemplars: BTreeMap::new(),
            histogram: HistogramSnapshot::empty(),
        }
    }

    /// Errors as a fraction of committed operations. Defined as 0 when the
    /// band committed nothing and saw no errors, and 1 when every attempt
    /// failed.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        if self.committed == 0 {
            if self.errors == 0 { 0.0 } else { 1.0 }
        } else {
            self.errors as f64 / self.committed as f64
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_success_accounting() {
        let metrics = Metrics::new();
        metrics.record_attempt();
        metrics.record_success(
            Duration::from_millis(3),
            OpOutcome {
                queries: 2,
                rows_read: 10,
                rows_modified: 1,
            },
        );

        let snapshot = metrics.freeze(Duration::from_secs(1));
        assert_eq!(snapshot.committed, 1);
        assert_eq!(snapshot.executed, 2);
        assert_eq!(snapshot.rows_read, 10);
        assert_eq!(snapshot.rows_modified, 1);
        assert_eq!(snapshot.attempted, 1);
        assert!((snapshot.tps - 1.0).abs() < f64::EPSILON);
        assert!((snapshot.qps - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_error_kinds_and_exemplars() {
        let metrics = Metrics::new();
        metrics.record_error(ErrorKind::Transient, "connection reset by peer");
        metrics.record_error(ErrorKind::Transient, "second message ignored");
        metrics.record_error(ErrorKind::Permanent, "relation \"missing\" does not exist");

        let snapshot = metrics.freeze(Duration::from_secs(1));
        assert_eq!(snapshot.errors, 3);
        assert_eq!(snapshot.error_kinds.get(&ErrorKind::Transient), Some(&2));
        assert_eq!(snapshot.error_kinds.get(&ErrorKind::Permanent), Some(&1));
        assert_eq!(
            snapshot.error_exemplars.get(&ErrorKind::Transient).map(String::as_str),
            Some("connection reset by peer")
        );
    }

    #[test]
    fn test_rates_over_zero_duration_are_zero() {
        let metrics = Metrics::new();
        metrics.record_success(Duration::from_millis(1), OpOutcome::single_query());
        let snapshot = metrics.freeze(Duration::ZERO);
        assert!((snapshot.tps - 0.0).abs() < f64::EPSILON);
        assert!((snapshot.qps - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_error_rate() {
        let metrics = Metrics::new();
        for _ in 0..99 {
            metrics.record_attempt();
            metrics.record_success(Duration::from_millis(1), OpOutcome::single_query());
        }
        metrics.record_attempt();
        metrics.record_error(ErrorKind::Transient, "reset");

        let snapshot = metrics.freeze(Duration::from_secs(10));
        assert!((snapshot.error_rate() - 1.0 / 99.0).abs() < 1e-9);
    }

    #[test]
    fn test_error_rate_with_nothing_committed() {
        assert!((MetricsSnapshot::empty().error_rate() - 0.0).abs() < f64::EPSILON);

        let metrics = Metrics::new();
        metrics.record_attempt();
        metrics.record_error(ErrorKind::Permanent, "boom");
        let snapshot = metrics.freeze(Duration::from_secs(1));
        assert!((snapshot.error_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_exemplar_truncation() {
        let long = "x".repeat(1_000);
        let truncated = truncate_exemplar(&long);
        assert!(truncated.chars().count() <= 241);
        assert!(truncated.ends_with('…'));
    }

    #[test]
    fn test_concurrent_counting() {
        use std::sync::Arc;

        let metrics = Arc::new(Metrics::new());
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for i in 0..1_000_u64 {
                        metrics.record_attempt();
                        if (i + worker) % 10 == 0 {
                            metrics.record_error(ErrorKind::Transient, "reset");
                        } else {
                            metrics.record_success(
                                Duration::from_micros(i),
                                OpOutcome::single_query(),
                            );
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = metrics.freeze(Duration::from_secs(1));
        assert_eq!(snapshot.attempted, 4_000);
        assert_eq!(snapshot.committed + snapshot.errors, 4_000);
        assert_eq!(snapshot.histogram.total(), snapshot.committed);
    }
}
