//! Band planning: turn scaling bounds and a strategy into a concrete ladder
//! of worker/connection counts.

use crate::config::{ProgressiveConfig, Strategy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One planned load step: fixed worker/connection budget for a bounded
/// duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Band {
    pub index: usize,
    pub workers: u32,
    pub connections: u32,
    #[serde(with = "humantime_serde")]
    pub warmup: Duration,
    #[serde(with = "humantime_serde")]
    pub measure: Duration,
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
}

/// The full run plan. The fingerprint identifies the plan across restarts so
/// checkpoints are only resumed into the run that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub bands: Vec<Band>,
    pub fingerprint: String,
}

impl Plan {
    /// Generate the band ladder for `config`. With progressive scaling off,
    /// the plan is a single band at the maximum budgets.
    #[must_use]
    pub fn generate(config: &ProgressiveConfig) -> Self {
        let workers = if config.enabled {
            ladder(
                config.strategy,
                config.min_workers,
                config.max_workers,
                config.bands,
            )
        } else {
            vec![config.max_workers]
        };
        let connections = if config.enabled {
            ladder(
                config.strategy,
                config.min_connections,
                config.max_connections,
                config.bands,
            )
        } else {
            vec![config.max_connections]
        };

        // the two ladders can dedup to different lengths; pair them up and
        // coalesce duplicates of the combined step
        let steps = workers.len().max(connections.len());
        let mut bands: Vec<Band> = Vec::with_capacity(steps);
        for i in 0..steps {
            let w = *workers.get(i).or_else(|| workers.last()).unwrap_or(&1);
            let c = *connections
                .get(i)
                .or_else(|| connections.last())
                .unwrap_or(&1);
            if bands.last().is_some_and(|b: &Band| b.workers == w && b.connections == c) {
                continue;
            }
            bands.push(Band {
                index: bands.len(),
                workers: w,
                connections: c,
                warmup: config.warmup,
                measure: config.measure,
                cooldown: config.cooldown,
            });
        }

        let fingerprint = fingerprint(config, &bands);
        Self { bands, fingerprint }
    }
}

/// `bands` values spanning `[min, max]` under the given strategy, floored to
/// integers and deduplicated while preserving order.
fn ladder(strategy: Strategy, min: u32, max: u32, bands: u32) -> Vec<u32> {
    let raw = match strategy {
        Strategy::Linear => linear(min, max, bands),
        Strategy::Exponential => exponential(min, max, bands),
        Strategy::Fibonacci => fibonacci(min, max, bands),
    };

    let mut out: Vec<u32> = Vec::with_capacity(raw.len());
    for value in raw {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let floored = value.floor().clamp(1.0, f64::from(u32::MAX)) as u32;
        if out.last() != Some(&floored) {
            out.push(floored);
        }
    }
    out
}

fn linear(min: u32, max: u32, bands: u32) -> Vec<f64> {
    let (min_f, max_f) = (f64::from(min), f64::from(max));
    if bands <= 1 {
        return vec![max_f];
    }
    let span = max_f - min_f;
    let last = f64::from(bands - 1);
    (0..bands)
        .map(|i| min_f + span * f64::from(i) / last)
        .collect()
}

fn exponential(min: u32, max: u32, bands: u32) -> Vec<f64> {
    let (min_f, max_f) = (f64::from(min), f64::from(max));
    if bands <= 1 {
        return vec![max_f];
    }
    if min == max {
        return vec![min_f; bands as usize];
    }
    let ratio = max_f / min_f;
    let last = f64::from(bands - 1);
    (0..bands)
        .map(|i| min_f * ratio.powf(f64::from(i) / last))
        .collect()
}

/// First `bands` Fibonacci numbers rescaled to span `[min, max]`.
fn fibonacci(min: u32, max: u32, bands: u32) -> Vec<f64> {
    let (min_f, max_f) = (f64::from(min), f64::from(max));
    if bands <= 1 {
        return vec![max_f];
    }
    let mut fib = Vec::with_capacity(bands as usize);
    let (mut a, mut b) = (1.0_f64, 1.0_f64);
    for _ in 0..bands {
        fib.push(a);
        (a, b) = (b, a + b);
    }
    let (Some(&first), Some(&last)) = (fib.first(), fib.last()) else {
        return vec![max_f];
    };
    let span = last - first;
    if span <= 0.0 {
        return vec![min_f; bands as usize];
    }
    fib.iter()
        .map(|f| min_f + (max_f - min_f) * (f - first) / span)
        .collect()
}

fn fingerprint(config: &ProgressiveConfig, bands: &[Band]) -> String {
    let steps: Vec<String> = bands
        .iter()
        .map(|b| format!("{}x{}", b.workers, b.connections))
        .collect();
    format!(
        "{}:{}:{}s/{}s/{}s:[{}]",
        config.strategy,
        bands.len(),
        config.warmup.as_secs(),
        config.measure.as_secs(),
        config.cooldown.as_secs(),
        steps.join(",")
    )
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::indexing_slicing)]

    use super::*;

    fn config(strategy: Strategy, min: u32, max: u32, bands: u32) -> ProgressiveConfig {
        ProgressiveConfig {
            enabled: true,
            min_workers: min,
            max_workers: max,
            min_connections: min,
            max_connections: max,
            bands,
            strategy,
            ..ProgressiveConfig::default()
        }
    }

    #[test]
    fn test_linear_five_bands_ten_to_fifty() {
        let plan = Plan::generate(&config(Strategy::Linear, 10, 50, 5));
        let workers: Vec<u32> = plan.bands.iter().map(|b| b.workers).collect();
        assert_eq!(workers, vec![10, 20, 30, 40, 50]);
        // connections scale symmetrically
        let connections: Vec<u32> = plan.bands.iter().map(|b| b.connections).collect();
        assert_eq!(connections, vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn test_exponential_six_bands_ten_to_eighty() {
        let plan = Plan::generate(&config(Strategy::Exponential, 10, 80, 6));
        let workers: Vec<u32> = plan.bands.iter().map(|b| b.workers).collect();
        assert_eq!(workers.first(), Some(&10));
        assert_eq!(workers.last(), Some(&80));
        assert!(workers.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_fibonacci_spans_bounds() {
        let plan = Plan::generate(&config(Strategy::Fibonacci, 5, 100, 6));
        let workers: Vec<u32> = plan.bands.iter().map(|b| b.workers).collect();
        assert_eq!(workers.first(), Some(&5));
        assert_eq!(workers.last(), Some(&100));
        assert!(workers.windows(2).all(|w| w[0] < w[1]));
        // fibonacci growth accelerates: later gaps dominate earlier ones
        let first_gap = workers[1] - workers[0];
        let last_gap = workers[workers.len() - 1] - workers[workers.len() - 2];
        assert!(last_gap > first_gap);
    }

    #[test]
    fn test_duplicates_are_coalesced() {
        // 1..=3 over 6 bands floors onto repeated values
        let plan = Plan::generate(&config(Strategy::Linear, 1, 3, 6));
        let workers: Vec<u32> = plan.bands.iter().map(|b| b.workers).collect();
        assert_eq!(workers, vec![1, 2, 3]);
        let indexes: Vec<usize> = plan.bands.iter().map(|b| b.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[test]
    fn test_single_band_plan() {
        let plan = Plan::generate(&config(Strategy::Linear, 10, 50, 1));
        assert_eq!(plan.bands.len(), 1);
        assert_eq!(plan.bands[0].workers, 50);
    }

    #[test]
    fn test_non_progressive_plans_one_band_at_max() {
        let mut cfg = config(Strategy::Linear, 10, 50, 5);
        cfg.enabled = false;
        let plan = Plan::generate(&cfg);
        assert_eq!(plan.bands.len(), 1);
        assert_eq!(plan.bands[0].workers, 50);
        assert_eq!(plan.bands[0].connections, 50);
    }

    #[test]
    fn test_equal_bounds_collapse_to_one_band() {
        let plan = Plan::generate(&config(Strategy::Exponential, 20, 20, 4));
        assert_eq!(plan.bands.len(), 1);
        assert_eq!(plan.bands[0].workers, 20);
    }

    #[test]
    fn test_fingerprint_is_stable_and_sensitive() {
        let a = Plan::generate(&config(Strategy::Linear, 10, 50, 5));
        let b = Plan::generate(&config(Strategy::Linear, 10, 50, 5));
        assert_eq!(a.fingerprint, b.fingerprint);

        let c = Plan::generate(&config(Strategy::Linear, 10, 60, 5));
        assert_ne!(a.fingerprint, c.fingerprint);

        let d = Plan::generate(&config(Strategy::Exponential, 10, 50, 5));
        assert_ne!(a.fingerprint, d.fingerprint);
    }

    #[test]
    fn test_band_durations_come_from_config() {
        let mut cfg = config(Strategy::Linear, 10, 50, 2);
        cfg.warmup = Duration::from_secs(3);
        cfg.measure = Duration::from_secs(45);
        cfg.cooldown = Duration::from_secs(7);
        let plan = Plan::generate(&cfg);
        for band in &plan.bands {
            assert_eq!(band.warmup, Duration::from_secs(3));
            assert_eq!(band.measure, Duration::from_secs(45));
            assert_eq!(band.cooldown, Duration::from_secs(7));
        }
    }
}
