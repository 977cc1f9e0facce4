//! Version-aware sampling of backend statistics views.
//!
//! Counter sources shift across PostgreSQL releases: backend buffer writes
//! moved from `pg_stat_bgwriter` into `pg_stat_io`, checkpoint counters into
//! `pg_stat_checkpointer`. The collector detects the major version once and
//! branches per query. Any individual counter query that fails is logged and
//! zeroed; collection never aborts the band it is measuring.

mod snapshot;

pub use snapshot::{BaselineStats, DeltaStats, TopQuery, cache_hit_ratio};

use crate::context::RunContext;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::PgPool;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Assumed major version when detection fails.
pub const FALLBACK_VERSION: i32 = 15;

/// Interval between live samples while a band is measuring.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

static VERSION_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"PostgreSQL (\d+)").ok());

/// Parse the major version out of a `version()` string.
#[must_use]
pub fn parse_major_version(version: &str) -> Option<i32> {
    let re = VERSION_RE.as_ref()?;
    re.captures(version)?.get(1)?.as_str().parse().ok()
}

pub struct StatsCollector {
    pool: PgPool,
    version: i32,
}

impl StatsCollector {
    /// Detect the backend version and build a collector bound to `pool`.
    pub async fn connect(pool: PgPool) -> Self {
        let version = Self::detect_backend_version(&pool).await;
        Self { pool, version }
    }

    #[must_use]
    pub fn with_version(pool: PgPool, version: i32) -> Self {
        Self { pool, version }
    }

    /// Query and parse the server's major version, defaulting to
    /// [`FALLBACK_VERSION`] when the query or the parse fails.
    pub async fn detect_backend_version(pool: &PgPool) -> i32 {
        match sqlx::query_scalar::<_, String>("SELECT version()")
            .fetch_one(pool)
            .await
        {
            Ok(raw) => parse_major_version(&raw).unwrap_or_else(|| {
                warn!(version = %raw, "could not parse backend version, assuming {FALLBACK_VERSION}");
                FALLBACK_VERSION
            }),
            Err(e) => {
                warn!("backend version detection failed ({e}), assuming {FALLBACK_VERSION}");
                FALLBACK_VERSION
            }
        }
    }

    #[must_use]
    pub const fn version(&self) -> i32 {
        self.version
    }

    /// Capture a full snapshot of cumulative counters and gauges.
    pub async fn capture_baseline(&self) -> BaselineStats {
        let (blocks_read, blocks_hit) = self
            .fetch_pair(
                "SELECT COALESCE(blks_read, 0), COALESCE(blks_hit, 0) \
                 FROM pg_stat_database WHERE datname = current_database()",
                "database block counters",
            )
            .await;

        let (temp_files, temp_bytes) = self
            .fetch_pair(
                "SELECT COALESCE(temp_files, 0), COALESCE(temp_bytes, 0) \
                 FROM pg_stat_database WHERE datname = current_database()",
                "temp file counters",
            )
            .await;

        let deadlocks = self
            .fetch_one(
                "SELECT COALESCE(deadlocks, 0) \
                 FROM pg_stat_database WHERE datname = current_database()",
                "deadlock counter",
            )
            .await;

        let (wal_records, wal_bytes) = self
            .fetch_pair(
                "SELECT wal_records, wal_bytes::bigint FROM pg_stat_wal",
                "wal counters",
            )
            .await;

        let blocks_written = self.fetch_blocks_written().await;
        let (checkpoints_req, checkpoints_timed) = self.fetch_checkpoint_counters().await;

        let active_connections = self
            .fetch_one(
                "SELECT count(*) FROM pg_stat_activity WHERE state = 'active'",
                "active connection gauge",
            )
            .await;

        let max_connections = self
            .fetch_one(
                "SELECT setting::bigint FROM pg_settings WHERE name = 'max_connections'",
                "max_connections setting",
            )
            .await;

        BaselineStats {
            captured_at: Utc::now(),
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
            active_connections,
            max_connections,
            top_queries: self.fetch_top_queries().await,
        }
    }

    /// Capture a final snapshot and return final minus `baseline`.
    pub async fn compute_delta(&self, baseline: &BaselineStats) -> DeltaStats {
        let final_ = self.capture_baseline().await;
        let delta = DeltaStats::between(baseline, &final_);
        if delta.counters_reset {
            warn!("backend counters went backwards mid-band (stats reset or restart)");
        }
        delta
    }

    /// Spawn the live sampling ticker. Runs until the context is cancelled or
    /// the returned handle is aborted.
    #[must_use]
    pub fn spawn_sampler(&self, ctx: &RunContext, interval: Duration) -> JoinHandle<()> {
        let pool = self.pool.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // the first tick fires immediately; skip it so samples land
            // inside the measurement window
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = ctx.cancelled() => break,
                    _ = ticker.tick() => {
                        Self::sample(&pool).await;
                    }
                }
            }
        })
    }

    /// One live sample for dashboards/operators, logged rather than stored.
    async fn sample(pool: &PgPool) {
        match sqlx::query_as::<_, (i64, i64)>(
            "SELECT count(*) FILTER (WHERE state = 'active'), count(*) FROM pg_stat_activity",
        )
        .fetch_one(pool)
        .await
        {
            Ok((active, total)) => {
                debug!(active, total, "connection sample");
            }
            Err(e) => debug!("live sample failed: {e}"),
        }
    }

    /// Backend buffer writes. On 16+ the per-backend I/O view is
    /// authoritative; older servers expose the `buffers_backend` column on
    /// the bgwriter view.
    async fn fetch_blocks_written(&self) -> i64 {
        if self.version >= 16 {
            match sqlx::query_scalar::<_, i64>(
                "SELECT COALESCE(SUM(writes), 0)::bigint FROM pg_stat_io \
                 WHERE context = 'normal' AND object = 'relation'",
            )
            .fetch_one(&self.pool)
            .await
            {
                Ok(writes) => return writes,
                Err(e) => {
                    debug!("pg_stat_io unavailable ({e}), falling back to pg_stat_bgwriter");
                }
            }
        }
        self.fetch_one(
            "SELECT COALESCE(buffers_backend, 0) FROM pg_stat_bgwriter",
            "backend buffer writes",
        )
        .await
    }

    /// Requested/timed checkpoint counters, from whichever view this server
    /// carries them in.
    async fn fetch_checkpoint_counters(&self) -> (i64, i64) {
        if self.version >= 15 {
            match sqlx::query_as::<_, (i64, i64)>(
                "SELECT num_requested, num_timed FROM pg_stat_checkpointer",
            )
            .fetch_one(&self.pool)
            .await
            {
                Ok(counters) => return counters,
                Err(e) => {
                    debug!(
                        "pg_stat_checkpointer unavailable ({e}), falling back to pg_stat_bgwriter"
                    );
                }
            }
        }
        self.fetch_pair(
            "SELECT COALESCE(checkpoints_req, 0), COALESCE(checkpoints_timed, 0) \
             FROM pg_stat_bgwriter",
            "checkpoint counters",
        )
        .await
    }

    async fn fetch_top_queries(&self) -> Vec<TopQuery> {
        let rows = sqlx::query_as::<_, (String, i64, f64, f64, i64)>(
            "SELECT left(query, 500), calls, total_exec_time, mean_exec_time, rows \
             FROM pg_stat_statements ORDER BY total_exec_time DESC LIMIT 5",
        )
        .fetch_all(&self.pool)
        .await;

        match rows {
            Ok(rows) => rows
                .into_iter()
                .map(
                    |(query, calls, total_exec_time_ms, mean_exec_time_ms, rows)| TopQuery {
                        query,
                        calls,
                        total_exec_time_ms,
                        mean_exec_time_ms,
                        rows,
                    },
                )
                .collect(),
            Err(e) => {
                // pg_stat_statements is optional; absence is the common case
                debug!("top query capture skipped: {e}");
                Vec::new()
            }
        }
    }

    async fn fetch_one(&self, sql: &str, what: &str) -> i64 {
        match sqlx::query_scalar::<_, i64>(sql).fetch_one(&self.pool).await {
            Ok(value) => value,
            Err(e) => {
                warn!("failed to read {what} ({e}), recording 0");
                0
            }
        }
    }

    async fn fetch_pair(&self, sql: &str, what: &str) -> (i64, i64) {
        match sqlx::query_as::<_, (i64, i64)>(sql)
            .fetch_one(&self.pool)
            .await
        {
            Ok(pair) => pair,
            Err(e) => {
                warn!("failed to read {what} ({e}), recording 0");
                (0, 0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_major_version() {
        assert_eq!(
            parse_major_version(
                "PostgreSQL 16.4 (Debian 16.4-1.pgdg120+1) on x86_64-pc-linux-gnu"
            ),
            Some(16)
        );
        assert_eq!(
            parse_major_version("PostgreSQL 12.19 on x86_64-pc-linux-gnu"),
            Some(12)
        );
        assert_eq!(parse_major_version("PostgreSQL 18beta1 on aarch64"), Some(18));
    }

    #[test]
    fn test_parse_major_version_rejects_garbage() {
        assert_eq!(parse_major_version("MariaDB 11.2"), None);
        assert_eq!(parse_major_version(""), None);
    }
}
