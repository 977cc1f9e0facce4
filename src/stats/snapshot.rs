//! Baseline / delta snapshots of backend counters bracketing a band.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One `pg_stat_statements` record captured alongside a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopQuery {
    pub query: String,
    pub calls: i64,
    pub total_exec_time_ms: f64,
    pub mean_exec_time_ms: f64,
    pub rows: i64,
}

/// Cumulative backend counters plus point-in-time gauges, captured at one
/// instant. Two of these bracket a band's measurement phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineStats {
    pub captured_at: DateTime<Utc>,
    pub blocks_read: i64,
    pub blocks_hit: i64,
    pub blocks_written: i64,
    pub wal_records: i64,
    pub wal_bytes: i64,
    pub checkpoints_req: i64,
    pub checkpoints_timed: i64,
    pub temp_files: i64,
    pub temp_bytes: i64,
    pub deadlocks: i64,
    pub active_connections: i64,
    pub max_connections: i64,
    #[serde(default)]
    pub top_queries: Vec<TopQuery>,
}

impl BaselineStats {
    #[must_use]
    pub fn zero() -> Self {
        Self {
            captured_at: Utc::now(),
            blocks_read: 0,
            blocks_hit: 0,
            blocks_written: 0,
            wal_records: 0,
            wal_bytes: 0,
            checkpoints_req: 0,
            checkpoints_timed: 0,
            temp_files: 0,
            temp_bytes: 0,
            deadlocks: 0,
            active_connections: 0,
            max_connections: 0,
            top_queries: Vec::new(),
        }
    }
}

/// Per-band backend activity: final minus baseline for cumulative counters,
/// final values for gauges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaStats {
    pub blocks_read: i64,
    pub blocks_hit: i64,
    pub blocks_written: i64,
    pub wal_records: i64,
    pub wal_bytes: i64,
    pub checkpoints_req: i64,
    pub checkpoints_timed: i64,
    pub temp_files: i64,
    pub temp_bytes: i64,
    pub deadlocks: i64,
    /// Gauge: final sample's value, not a difference.
    pub active_connections: i64,
    /// Gauge: final sample's value, not a difference.
    pub max_connections: i64,
    /// Percentage in `[0, 100]`, recomputed from the delta reads/hits.
    /// Defined as 100 when the band read nothing.
    pub cache_hit_ratio: f64,
    /// Set when any cumulative counter went backwards, which happens when
    /// the backend restarted (or stats were reset) mid-band. Deltas are
    /// clamped at zero in that case.
    pub counters_reset: bool,
    #[serde(default)]
    pub top_queries: Vec<TopQuery>,
}

impl DeltaStats {
    /// Final minus baseline. Counters that went backwards clamp to zero and
    /// set the `counters_reset` flag.
    #[must_use]
    pub fn between(baseline: &BaselineStats, final_: &BaselineStats) -> Self {
        let mut reset = false;
        let mut delta = |current: i64, base: i64| -> i64 {
            let d = current - base;
            if d < 0 {
                reset = true;
                0
            } else {
                d
            }
        };

        let blocks_read = delta(final_.blocks_read, baseline.blocks_read);
        let blocks_hit = delta(final_.blocks_hit, baseline.blocks_hit);
        let blocks_written = delta(final_.blocks_written, baseline.blocks_written);
        let wal_records = delta(final_.wal_records, baseline.wal_records);
        let wal_bytes = delta(final_.wal_bytes, baseline.wal_bytes);
        let checkpoints_req = delta(final_.checkpoints_req, baseline.checkpoints_req);
        let checkpoints_timed = delta(final_.checkpoints_timed, baseline.checkpoints_timed);
        let temp_files = delta(final_.temp_files, baseline.temp_files);
        let temp_bytes = delta(final_.temp_bytes, baseline.temp_bytes);
        let deadlocks = delta(final_.deadlocks, baseline.deadlocks);

        Self {
            blocks_read,
            blocks_hit,
            blocks_written,
            wal_records,
            wal_bytes,
            checkpoints_req,
            checkpoints_timed,
            temp_files,
            temp_bytes,
            deadlocks,
            active_connections: final_.active_connections,
            max_connections: final_.max_connections,
            cache_hit_ratio: cache_hit_ratio(blocks_hit, blocks_read),
            counters_reset: reset,
            top_queries: final_.top_queries.clone(),
        }
    }

    #[must_use]
    pub fn zero() -> Self {
        Self::between(&BaselineStats::zero(), &BaselineStats::zero())
    }
}

/// Buffer cache hit percentage over a delta window.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn cache_hit_ratio(hits: i64, reads: i64) -> f64 {
    let total = hits + reads;
    if total <= 0 {
        100.0
    } else {
        hits as f64 / total as f64 * 100.0
    }
}
