//! Progressive scaling orchestrator.
//!
//! Plans a ladder of bands, runs each through the warmup → baseline →
//! measure → delta → checkpoint pipeline, then derives the cross-band
//! analysis and emits artifacts. Cancellation is observed at every phase
//! boundary; a cancelled run still produces artifacts from whatever bands
//! completed.

pub mod analysis;
pub mod bottleneck;
pub mod curvefit;
pub mod plan;

use crate::checkpoint::Checkpoint;
use crate::config::Config;
use crate::context::RunContext;
use crate::driver::WorkloadDriver;
use crate::export;
use crate::resilience::backpressure::{BackpressureController, ScaleEvent};
use crate::resilience::circuit::CircuitBreaker;
use crate::stats::{SAMPLE_INTERVAL, StatsCollector};
use crate::worker::WorkerPool;
use analysis::{BandResult, Optimal, ScalingRegion, derive_fields, sanitize, select_optimal};
use anyhow::{Context, Result};
use bottleneck::{BottleneckClass, BottleneckReport, classify};
use chrono::{DateTime, Utc};
use curvefit::FitReport;
use plan::{Band, Plan};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Interrupted,
    Failed,
}

/// Run identity and lifecycle, the `metadata` block of the JSON artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub workload: String,
    pub backend_version: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub plan_fingerprint: String,
}

/// Cross-band analysis block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimal: Option<Optimal>,
    pub models: FitReport,
    pub bottleneck: BottleneckReport,
    /// Band index → scaling region label.
    pub regions: BTreeMap<String, String>,
}

/// The complete run document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressiveResult {
    pub metadata: RunMetadata,
    pub configuration: Config,
    pub bands: Vec<BandResult>,
    pub analysis: Analysis,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scale_events: Vec<ScaleEvent>,
    /// Artifact files written for this run. Not part of the document itself.
    #[serde(skip)]
    pub artifacts: Vec<PathBuf>,
}

impl ProgressiveResult {
    #[must_use]
    pub const fn interrupted(&self) -> bool {
        matches!(self.metadata.status, RunStatus::Interrupted)
    }
}

pub struct ProgressiveEngine {
    config: Config,
    dsn: SecretString,
}

impl ProgressiveEngine {
    /// Build an engine for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error when the database section cannot form a DSN.
    pub fn new(config: Config) -> Result<Self> {
        let dsn = config.database.dsn()?;
        Ok(Self { config, dsn })
    }

    /// Execute the full run: plan, bands, analysis, artifacts.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend is unreachable before any band has
    /// run, or when artifact emission fails. Failures mid-run surface in the
    /// result's status instead.
    pub async fn run(
        &self,
        ctx: &RunContext,
        driver: Arc<dyn WorkloadDriver>,
    ) -> Result<ProgressiveResult> {
        let started_at = Utc::now();
        let plan = Plan::generate(&self.config.progressive);
        info!(
            bands = plan.bands.len(),
            strategy = %self.config.progressive.strategy,
            fingerprint = %plan.fingerprint,
            "plan generated"
        );

        let mut results: Vec<BandResult> = Vec::new();
        let mut run_id = ctx.run_id().to_string();
        if let Some(checkpoint) =
            Checkpoint::find_resumable(&self.config.checkpoint_dir, &plan.fingerprint)
        {
            info!(
                run_id = %checkpoint.run_id,
                completed = checkpoint.completed.len(),
                "resuming from checkpoint"
            );
            results = checkpoint.completed;
            run_id = checkpoint.run_id;
        }

        let stats_pool = self
            .connect_pool(1)
            .await
            .context("backend unreachable at startup")?;
        let stats = StatsCollector::connect(stats_pool.clone()).await;
        info!(version = stats.version(), "backend version detected");

        let circuit = Arc::new(CircuitBreaker::new(self.config.circuit.clone()));
        let mut scale_events: Vec<ScaleEvent> = Vec::new();
        let mut status = RunStatus::Completed;
        let mut failure: Option<String> = None;

        let done: BTreeSet<usize> = results.iter().map(|r| r.band.index).collect();
        for band in &plan.bands {
            if done.contains(&band.index) {
                debug!(band = band.index, "already completed in a previous run, skipping");
                continue;
            }
            if ctx.is_cancelled() {
                status = RunStatus::Interrupted;
                break;
            }

            match self
                .run_band(ctx, band, &stats, &circuit, &driver, &mut scale_events)
                .await
            {
                Ok(result) => {
                    let interrupted = result.interrupted;
                    results.push(result);
                    derive_fields(&mut results);
                    reclassify(&mut results);

                    let checkpoint =
                        Checkpoint::new(&run_id, &plan.fingerprint, results.clone(), None);
                    if let Err(e) = checkpoint.write(&self.config.checkpoint_dir) {
                        warn!("checkpoint write failed: {e}");
                    }

                    if interrupted {
                        status = RunStatus::Interrupted;
                        break;
                    }
                }
                Err(e) => {
                    error!(band = band.index, "band failed: {e:#}");
                    failure = Some(format!("band {}: {e:#}", band.index));
                    status = RunStatus::Failed;
                    if self.config.abort_run_on_fatal {
                        break;
                    }
                }
            }

            if !band.cooldown.is_zero() && !ctx.is_cancelled() {
                debug!(band = band.index, "cooldown");
                tokio::select! {
                    () = ctx.cancelled() => {}
                    () = tokio::time::sleep(band.cooldown) => {}
                }
            }
        }

        stats_pool.close().await;
        if ctx.is_cancelled() && status == RunStatus::Completed {
            status = RunStatus::Interrupted;
        }

        let mut result = self.assemble(
            run_id.clone(),
            started_at,
            status,
            failure,
            stats.version(),
            plan.fingerprint.clone(),
            results,
            scale_events,
        );
        match export::csv::write(&self.config.output_dir, &run_id, &result.bands) {
            Ok(path) => {
                info!(path = %path.display(), "CSV artifact written");
                result.artifacts.push(path);
            }
            Err(e) => warn!("CSV export failed: {e}"),
        }
        match export::json::write(&self.config.output_dir, &run_id, &result) {
            Ok(path) => {
                info!(path = %path.display(), "JSON artifact written");
                result.artifacts.push(path);
            }
            Err(e) => warn!("JSON export failed: {e}"),
        }

        if result.metadata.status == RunStatus::Completed {
            Checkpoint::remove(&self.config.checkpoint_dir, &run_id);
        }

        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        run_id: String,
        started_at: DateTime<Utc>,
        status: RunStatus,
        failure: Option<String>,
        backend_version: i32,
        plan_fingerprint: String,
        bands: Vec<BandResult>,
        scale_events: Vec<ScaleEvent>,
    ) -> ProgressiveResult {
        ProgressiveResult {
            metadata: RunMetadata {
                run_id,
                workload: self.config.workload.clone(),
                backend_version,
                started_at,
                finished_at: Utc::now(),
                status,
                failure,
                plan_fingerprint,
            },
            configuration: self.config.clone(),
            analysis: analyze(&bands, self.config.error_cap),
            bands,
            scale_events,
            artifacts: Vec::new(),
        }
    }

    async fn run_band(
        &self,
        ctx: &RunContext,
        band: &Band,
        stats: &StatsCollector,
        circuit: &Arc<CircuitBreaker>,
        driver: &Arc<dyn WorkloadDriver>,
        scale_events: &mut Vec<ScaleEvent>,
    ) -> Result<BandResult> {
        info!(
            band = band.index,
            workers = band.workers,
            connections = band.connections,
            "starting band"
        );

        let pool = self
            .connect_pool(band.connections)
            .await
            .context("backend unreachable while sizing band pool")?;
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&pool)
            .await
            .context("band health check failed")?;

        let backpressure = Arc::new(BackpressureController::new(
            self.config.backpressure.clone(),
            band.workers as usize,
            band.connections as usize,
        ));
        let workers = WorkerPool::new(
            Arc::clone(circuit),
            Arc::clone(&backpressure),
            self.config.retry_max,
        );

        if !band.warmup.is_zero() && !ctx.is_cancelled() {
            debug!(band = band.index, "warmup");
            let _ = workers
                .run(ctx, band, band.warmup, Arc::clone(driver), pool.clone())
                .await;
        }

        let baseline = stats.capture_baseline().await;
        let sampler = stats.spawn_sampler(ctx, SAMPLE_INTERVAL);

        let outcome = workers
            .run(ctx, band, band.measure, Arc::clone(driver), pool.clone())
            .await;

        sampler.abort();
        let _ = sampler.await;

        // all workers have exited; the final sample sees every side effect
        let delta = stats.compute_delta(&baseline).await;
        pool.close().await;
        scale_events.extend(backpressure.take_events());

        info!(
            band = band.index,
            tps = outcome.metrics.tps,
            errors = outcome.metrics.errors,
            p95_ms = outcome.metrics.histogram.latency.p95_ms,
            aborted = outcome.aborted,
            interrupted = outcome.interrupted,
            "band finished"
        );

        Ok(BandResult {
            band: band.clone(),
            duration_s: outcome.elapsed.as_secs_f64(),
            metrics: outcome.metrics,
            delta,
            efficiency: 0.0,
            marginal_gain: None,
            second_derivative: None,
            scaling_region: ScalingRegion::Baseline,
            bottleneck: BottleneckClass::Balanced,
            aborted: outcome.aborted,
            interrupted: outcome.interrupted,
        })
    }

    async fn connect_pool(&self, connections: u32) -> Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(connections)
            .min_connections(0)
            .acquire_timeout(Duration::from_secs(10))
            .connect(self.dsn.expose_secret())
            .await?;
        Ok(pool)
    }
}

/// Re-run bottleneck classification; depends on derived fields, so runs
/// after every [`derive_fields`] pass.
fn reclassify(results: &mut [BandResult]) {
    for result in results {
        result.bottleneck = classify(&result.delta, result.marginal_gain, result.scaling_region);
    }
}

/// Build the cross-band analysis block over sanitized results. Interrupted
/// and aborted bands stay in the exports but are excluded from curve
/// fitting, where their truncated throughput would skew every model.
#[must_use]
pub fn analyze(results: &[BandResult], error_cap: f64) -> Analysis {
    let points: Vec<(f64, f64)> = results
        .iter()
        .filter(|r| !r.interrupted && !r.aborted)
        .map(|r| (f64::from(r.band.workers), sanitize(r.metrics.tps)))
        .collect();

    let labels: Vec<BottleneckClass> = results.iter().map(|r| r.bottleneck).collect();
    let regions: BTreeMap<String, String> = results
        .iter()
        .map(|r| {
            (
                r.band.index.to_string(),
                r.scaling_region.as_str().to_string(),
            )
        })
        .collect();

    Analysis {
        optimal: select_optimal(results, error_cap),
        models: curvefit::fit_all(&points),
        bottleneck: BottleneckReport::from_labels(labels),
        regions,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::indexing_slicing)]

    use super::*;
    use crate::metrics::MetricsSnapshot;
    use crate::stats::DeltaStats;

    fn result(index: usize, workers: u32, tps: f64, interrupted: bool) -> BandResult {
        let mut metrics = MetricsSnapshot::empty();
        metrics.tps = tps;
        BandResult {
            band: Band {
                index,
                workers,
                connections: workers,
                warmup: Duration::from_secs(1),
                measure: Duration::from_secs(10),
                cooldown: Duration::from_secs(1),
            },
            metrics,
            delta: DeltaStats::zero(),
            duration_s: 10.0,
            efficiency: 0.0,
            marginal_gain: None,
            second_derivative: None,
            scaling_region: ScalingRegion::Baseline,
            bottleneck: BottleneckClass::Balanced,
            aborted: false,
            interrupted,
        }
    }

    #[test]
    fn test_analyze_builds_region_map() {
        let mut results = vec![
            result(0, 10, 1_000.0, false),
            result(1, 20, 2_000.0, false),
            result(2, 30, 2_900.0, false),
        ];
        derive_fields(&mut results);
        let analysis = analyze(&results, 0.01);

        assert_eq!(analysis.regions.get("0").map(String::as_str), Some("baseline"));
        assert_eq!(analysis.regions.get("1").map(String::as_str), Some("linear"));
        assert!(analysis.optimal.is_some());
    }

    #[test]
    fn test_analyze_excludes_interrupted_bands_from_fits() {
        let mut results = vec![
            result(0, 10, 1_000.0, false),
            result(1, 20, 2_000.0, false),
            result(2, 30, 3_000.0, false),
            result(3, 40, 120.0, true),
        ];
        derive_fields(&mut results);
        let analysis = analyze(&results, 0.01);

        // three clean points fit a near-perfect line; the truncated fourth
        // band would have wrecked it
        let linear = analysis.models.models.get("linear").unwrap();
        assert!(linear.r_squared > 0.999);
        assert!((analysis.models.observed_workers.1 - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reclassify_marks_degrading_band_over_provisioned() {
        let mut results = vec![
            result(0, 10, 1_000.0, false),
            result(1, 20, 2_000.0, false),
            result(2, 30, 1_500.0, false),
        ];
        derive_fields(&mut results);
        reclassify(&mut results);
        assert_eq!(results[2].bottleneck, BottleneckClass::OverProvisioned);
    }

    #[test]
    fn test_result_document_serializes() {
        let mut results = vec![result(0, 10, 1_000.0, false), result(1, 20, 1_900.0, false)];
        derive_fields(&mut results);

        let document = ProgressiveResult {
            metadata: RunMetadata {
                run_id: "testrun".to_string(),
                workload: "select1".to_string(),
                backend_version: 16,
                started_at: Utc::now(),
                finished_at: Utc::now(),
                status: RunStatus::Completed,
                failure: None,
                plan_fingerprint: "fp".to_string(),
            },
            configuration: Config::default(),
            analysis: analyze(&results, 0.01),
            bands: results,
            scale_events: Vec::new(),
            artifacts: Vec::new(),
        };

        let json = serde_json::to_string_pretty(&document).unwrap();
        assert!(json.contains("\"metadata\""));
        assert!(json.contains("\"configuration\""));
        assert!(json.contains("\"analysis\""));
        assert!(!json.contains("NaN"));

        let parsed: ProgressiveResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.bands.len(), 2);
        assert_eq!(parsed.metadata.status, RunStatus::Completed);
    }
}
