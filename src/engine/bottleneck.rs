//! Bottleneck classification from backend counter deltas.

use crate::engine::analysis::ScalingRegion;
use crate::stats::DeltaStats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cache-hit percentage below which a band smells I/O-bound.
pub const CACHE_HIT_THRESHOLD: f64 = 95.0;

/// Temp-file growth considered significant (1 MiB).
const TEMP_BYTES_SIGNIFICANT: i64 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckClass {
    IoBound,
    CpuBound,
    QueueBound,
    OverProvisioned,
    Balanced,
}

impl BottleneckClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IoBound => "io_bound",
            Self::CpuBound => "cpu_bound",
            Self::QueueBound => "queue_bound",
            Self::OverProvisioned => "over_provisioned",
            Self::Balanced => "balanced",
        }
    }
}

impl std::fmt::Display for BottleneckClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label one band. Negative marginal gain trumps everything: adding workers
/// that cost throughput means the band is over-provisioned whatever the
/// backend counters say.
#[must_use]
pub fn classify(
    delta: &DeltaStats,
    marginal_gain: Option<f64>,
    region: ScalingRegion,
) -> BottleneckClass {
    if marginal_gain.is_some_and(|g| g < 0.0) {
        return BottleneckClass::OverProvisioned;
    }
    if delta.deadlocks > 0 {
        return BottleneckClass::QueueBound;
    }
    if delta.cache_hit_ratio < CACHE_HIT_THRESHOLD && delta.temp_bytes >= TEMP_BYTES_SIGNIFICANT {
        return BottleneckClass::IoBound;
    }
    // healthy cache but throughput flattening: the backend is compute-bound
    if delta.cache_hit_ratio >= CACHE_HIT_THRESHOLD
        && matches!(region, ScalingRegion::Saturation | ScalingRegion::Diminishing)
    {
        return BottleneckClass::CpuBound;
    }
    BottleneckClass::Balanced
}

/// The run-level verdict: modal label plus the fraction of bands agreeing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BottleneckReport {
    pub label: BottleneckClass,
    /// Fraction of bands carrying the modal label, in `[0, 1]`.
    pub confidence: f64,
    pub per_band: Vec<BottleneckClass>,
}

impl BottleneckReport {
    #[must_use]
    pub fn from_labels(labels: Vec<BottleneckClass>) -> Self {
        let mut counts: BTreeMap<BottleneckClass, usize> = BTreeMap::new();
        for label in &labels {
            *counts.entry(*label).or_insert(0) += 1;
        }
        let (label, agreeing) = counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .unwrap_or((BottleneckClass::Balanced, 0));

        #[allow(clippy::cast_precision_loss)]
        let confidence = if labels.is_empty() {
            0.0
        } else {
            agreeing as f64 / labels.len() as f64
        };

        Self {
            label,
            confidence,
            per_band: labels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(cache_hit_ratio: f64, temp_bytes: i64, deadlocks: i64) -> DeltaStats {
        DeltaStats {
            cache_hit_ratio,
            temp_bytes,
            deadlocks,
            ..DeltaStats::zero()
        }
    }

    #[test]
    fn test_negative_gain_is_over_provisioned() {
        let label = classify(
            &delta(99.0, 0, 0),
            Some(-5.0),
            ScalingRegion::Degradation,
        );
        assert_eq!(label, BottleneckClass::OverProvisioned);
    }

    #[test]
    fn test_deadlocks_are_queue_bound() {
        let label = classify(&delta(99.9, 0, 3), Some(10.0), ScalingRegion::Linear);
        assert_eq!(label, BottleneckClass::QueueBound);
    }

    #[test]
    fn test_cold_cache_with_temp_spill_is_io_bound() {
        let label = classify(
            &delta(88.0, 10 << 20, 0),
            Some(10.0),
            ScalingRegion::Diminishing,
        );
        assert_eq!(label, BottleneckClass::IoBound);
    }

    #[test]
    fn test_warm_cache_saturation_is_cpu_bound() {
        let label = classify(&delta(99.5, 0, 0), Some(2.0), ScalingRegion::Saturation);
        assert_eq!(label, BottleneckClass::CpuBound);
    }

    #[test]
    fn test_healthy_linear_band_is_balanced() {
        let label = classify(&delta(99.5, 0, 0), Some(100.0), ScalingRegion::Linear);
        assert_eq!(label, BottleneckClass::Balanced);
    }

    #[test]
    fn test_report_picks_modal_label() {
        let report = BottleneckReport::from_labels(vec![
            BottleneckClass::CpuBound,
            BottleneckClass::CpuBound,
            BottleneckClass::IoBound,
            BottleneckClass::CpuBound,
        ]);
        assert_eq!(report.label, BottleneckClass::CpuBound);
        assert!((report.confidence - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_report_on_empty_labels() {
        let report = BottleneckReport::from_labels(Vec::new());
        assert_eq!(report.label, BottleneckClass::Balanced);
        assert!((report.confidence - 0.0).abs() < f64::EPSILON);
    }
}
