#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::indexing_slicing)]
#![allow(dead_code)]

use std::time::Duration;
use stormdb::engine::analysis::{BandResult, ScalingRegion, derive_fields};
use stormdb::engine::bottleneck::BottleneckClass;
use stormdb::engine::plan::Band;
use stormdb::metrics::MetricsSnapshot;
use stormdb::stats::DeltaStats;

/// Build a band result with the given identity and throughput; everything
/// else is zeroed so tests control exactly what they assert on.
pub fn band_result(index: usize, workers: u32, tps: f64) -> BandResult {
    let mut metrics = MetricsSnapshot::empty();
    metrics.tps = tps;
    metrics.qps = tps;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        metrics.committed = (tps * 10.0).max(0.0) as u64;
    }

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
        interrupted: false,
    }
}

/// Band results for a ladder of `(workers, tps)` pairs, with derived fields
/// already computed.
pub fn ladder(points: &[(u32, f64)]) -> Vec<BandResult> {
    let mut results: Vec<BandResult> = points
        .iter()
        .enumerate()
        .map(|(i, (workers, tps))| band_result(i, *workers, *tps))
        .collect();
    derive_fields(&mut results);
    results
}
