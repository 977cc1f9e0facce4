//! Derived per-band metrics and cross-band analysis.
//!
//! Every floating value leaving this module passes through [`sanitize`]:
//! NaN and infinities become 0.0, so artifacts always serialize and
//! downstream tooling never chokes on a division that went wrong.

use crate::engine::plan::Band;
use crate::metrics::MetricsSnapshot;
use crate::stats::DeltaStats;
use serde::{Deserialize, Serialize};

/// Qualitative label for a band's marginal gain relative to the first
/// measured gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingRegion {
    Baseline,
    Linear,
    Diminishing,
    Saturation,
    Degradation,
}

impl ScalingRegion {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Linear => "linear",
            Self::Diminishing => "diminishing",
            Self::Saturation => "saturation",
            Self::Degradation => "degradation",
        }
    }
}

impl std::fmt::Display for ScalingRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything measured and derived for one completed band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandResult {
    pub band: Band,
    pub metrics: MetricsSnapshot,
    pub delta: DeltaStats,
    /// Measured wall-clock duration in seconds.
    pub duration_s: f64,
    /// Committed operations per second per worker.
    pub efficiency: f64,
    /// Discrete first derivative of TPS with respect to workers. Absent for
    /// the first band.
    pub marginal_gain: Option<f64>,
    /// Discrete second difference of TPS. Absent for the first two bands.
    pub second_derivative: Option<f64>,
    pub scaling_region: ScalingRegion,
    pub bottleneck: crate::engine::bottleneck::BottleneckClass,
    pub aborted: bool,
    pub interrupted: bool,
}

/// Replace NaN and ±Inf with 0.0.
#[must_use]
pub fn sanitize(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

/// Division that treats a zero (or non-finite) denominator as yielding 0.0.
#[must_use]
pub fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 || !denominator.is_finite() || !numerator.is_finite() {
        0.0
    } else {
        sanitize(numerator / denominator)
    }
}

/// Compute efficiency for a band.
#[must_use]
pub fn efficiency(tps: f64, workers: u32) -> f64 {
    safe_div(tps, f64::from(workers))
}

/// Marginal gain between two consecutive bands. `None` when the worker
/// counts coincide (the derivative is undefined there).
#[must_use]
pub fn marginal_gain(tps: f64, prev_tps: f64, workers: u32, prev_workers: u32) -> Option<f64> {
    if workers == prev_workers {
        return None;
    }
    Some(sanitize(
        (tps - prev_tps) / (f64::from(workers) - f64::from(prev_workers)),
    ))
}

/// Classify a marginal gain against the first measured gain.
///
/// Above 80% of the reference still counts as linear scaling, 20-80% as
/// diminishing returns, 0-20% as saturation, and negative gain as
/// degradation.
#[must_use]
pub fn scaling_region(gain: Option<f64>, reference_gain: Option<f64>) -> ScalingRegion {
    let Some(gain) = gain else {
        return ScalingRegion::Baseline;
    };
    if gain < 0.0 {
        return ScalingRegion::Degradation;
    }
    let Some(reference) = reference_gain.filter(|r| *r > 0.0) else {
        // no meaningful reference: positive gain defaults to linear
        return if gain > 0.0 {
            ScalingRegion::Linear
        } else {
            ScalingRegion::Saturation
        };
    };
    let ratio = gain / reference;
    if ratio > 0.8 {
        ScalingRegion::Linear
    } else if ratio > 0.2 {
        ScalingRegion::Diminishing
    } else {
        ScalingRegion::Saturation
    }
}

/// Recompute the derived fields across an ordered result sequence. Called
/// whenever a band completes so checkpoints always carry consistent values.
pub fn derive_fields(results: &mut [BandResult]) {
    let snapshot: Vec<(u32, f64)> = results
        .iter()
        .map(|r| (r.band.workers, sanitize(r.metrics.tps)))
        .collect();

    let mut gains: Vec<Option<f64>> = Vec::with_capacity(results.len());
    gains.push(None);
    for pair in snapshot.windows(2) {
        if let &[(prev_workers, prev_tps), (workers, tps)] = pair {
            gains.push(marginal_gain(tps, prev_tps, workers, prev_workers));
        }
    }
    let reference = gains.iter().flatten().next().copied();

    let mut prev_gain: Option<f64> = None;
    for (i, (result, gain)) in results.iter_mut().zip(&gains).enumerate() {
        let tps = sanitize(result.metrics.tps);
        result.efficiency = efficiency(tps, result.band.workers);
        result.marginal_gain = *gain;
        result.second_derivative = if i >= 2 {
            match (*gain, prev_gain) {
                (Some(g), Some(prev)) => Some(sanitize(g - prev)),
                _ => None,
            }
        } else {
            None
        };
        result.scaling_region = if i == 0 {
            ScalingRegion::Baseline
        } else {
            scaling_region(*gain, reference)
        };
        prev_gain = *gain;
    }
}

/// The band selected as this run's operating point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Optimal {
    pub band_index: usize,
    pub workers: u32,
    pub connections: u32,
    pub tps: f64,
    pub efficiency: f64,
    pub reason: String,
}

/// Pick the winner: highest TPS among bands under the error cap, ties
/// within 0.1% broken by efficiency. When every band violates the cap the
/// least-broken one wins.
#[must_use]
pub fn select_optimal(results: &[BandResult], error_cap: f64) -> Option<Optimal> {
    let eligible: Vec<&BandResult> = results
        .iter()
        .filter(|r| r.metrics.error_rate() < error_cap)
        .collect();

    let (winner, reason) = if eligible.is_empty() {
        let fallback = results.iter().min_by_key(|r| r.metrics.errors)?;
        (
            fallback,
            format!(
                "all bands exceeded the {:.2}% error cap; selected fewest errors",
                error_cap * 100.0
            ),
        )
    } else {
        let mut best = *eligible.first()?;
        for &candidate in eligible.iter().skip(1) {
            let best_tps = sanitize(best.metrics.tps);
            let tps = sanitize(candidate.metrics.tps);
            if tps > best_tps * 1.001 {
                best = candidate;
            } else if tps >= best_tps * 0.999 && candidate.efficiency > best.efficiency {
                // effectively tied on TPS; prefer the cheaper band
                best = candidate;
            }
        }
        (
            best,
            "highest TPS under the error cap, ties broken by efficiency".to_string(),
        )
    };

    Some(Optimal {
        band_index: winner.band.index,
        workers: winner.band.workers,
        connections: winner.band.connections,
        tps: sanitize(winner.metrics.tps),
        efficiency: sanitize(winner.efficiency),
        reason,
    })
}
