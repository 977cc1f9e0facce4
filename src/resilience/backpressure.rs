//! Adaptive admission control.
//!
//! Bounds concurrently held connections and worker slots, and folds observed
//! latency into a single pressure value in `[0, 1]`. Admission is refused
//! once pressure crosses the configured threshold, which pushes workers into
//! jittered backoff instead of queueing unbounded work on a saturated
//! backend.

use crate::config::BackpressureConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::time::Instant;

/// Observations kept in the sliding latency window.
const LATENCY_WINDOW: usize = 512;

/// How long pressure must stay above / below its bands before the budgets
/// are adjusted.
const SCALE_COOLDOWN_SECS: u64 = 10;

/// Fraction of the threshold below which the controller considers the system
/// comfortably idle.
const SCALE_UP_BAND: f64 = 0.5;

/// A recorded budget adjustment, surfaced in the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleEvent {
    pub at: DateTime<Utc>,
    pub old_workers: usize,
    pub new_workers: usize,
    pub old_connections: usize,
    pub new_connections: usize,
    pub reason: String,
}

#[derive(Debug)]
struct ScaleState {
    above_since: Option<Instant>,
    below_since: Option<Instant>,
    events: Vec<ScaleEvent>,
}

pub struct BackpressureController {
    config: BackpressureConfig,
    hard_max_workers: usize,
    hard_max_connections: usize,
    max_workers: AtomicUsize,
    max_connections: AtomicUsize,
    active_workers: AtomicUsize,
    active_connections: AtomicUsize,
    /// Current pressure, stored as f64 bits.
    pressure: AtomicU64,
    latencies: Mutex<VecDeque<f64>>,
    scale: Mutex<ScaleState>,
}

impl BackpressureController {
    #[must_use]
    pub fn new(config: BackpressureConfig, max_workers: usize, max_connections: usize) -> Self {
        Self {
            config,
            hard_max_workers: max_workers,
            hard_max_connections: max_connections,
            max_workers: AtomicUsize::new(max_workers),
            max_connections: AtomicUsize::new(max_connections),
            active_workers: AtomicUsize::new(0),
            active_connections: AtomicUsize::new(0),
            pressure: AtomicU64::new(0.0_f64.to_bits()),
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
            scale: Mutex::new(ScaleState {
                above_since: None,
                below_since: None,
                events: Vec::new(),
            }),
        }
    }

    /// Try to take a worker slot. Never admits past the current budget.
    #[must_use]
    pub fn acquire_worker(&self) -> bool {
        self.acquire(&self.active_workers, &self.max_workers)
    }

    pub fn release_worker(&self) {
        Self::release(&self.active_workers);
        self.update_pressure();
    }

    #[must_use]
    pub fn acquire_connection(&self) -> bool {
        self.acquire(&self.active_connections, &self.max_connections)
    }

    pub fn release_connection(&self) {
        Self::release(&self.active_connections);
        self.update_pressure();
    }

    fn acquire(&self, active: &AtomicUsize, budget: &AtomicUsize) -> bool {
        if self.pressure() >= self.config.pressure_threshold {
            return false;
        }
        let max = budget.load(Ordering::Acquire);
        active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            })
            .is_ok()
    }

    fn release(active: &AtomicUsize) {
        let _ = active.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            current.checked_sub(1)
        });
    }

    /// Fold one completed-operation latency into the sliding window.
    pub fn observe_latency(&self, latency: std::time::Duration) {
        let ms = latency.as_secs_f64() * 1_000.0;
        if let Ok(mut window) = self.latencies.lock() {
            if window.len() == LATENCY_WINDOW {
                window.pop_front();
            }
            window.push_back(ms);
        }
        self.update_pressure();
    }

    #[must_use]
    pub fn pressure(&self) -> f64 {
        f64::from_bits(self.pressure.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn worker_budget(&self) -> usize {
        self.max_workers.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn connection_budget(&self) -> usize {
        self.max_connections.load(Ordering::Acquire)
    }

    /// Drain recorded budget adjustments.
    #[must_use]
    pub fn take_events(&self) -> Vec<ScaleEvent> {
        self.scale
            .lock()
            .map(|mut s| std::mem::take(&mut s.events))
            .unwrap_or_default()
    }

    #[allow(clippy::cast_precision_loss)]
    fn update_pressure(&self) {
        let workers = self.active_workers.load(Ordering::Acquire) as f64;
        let connections = self.active_connections.load(Ordering::Acquire) as f64;
        let max_workers = self.max_workers.load(Ordering::Acquire).max(1) as f64;
        let max_connections = self.max_connections.load(Ordering::Acquire).max(1) as f64;

        let latency_component = self.latency_pressure();
        let p = (workers / max_workers)
            .max(connections / max_connections)
            .max(latency_component)
            .clamp(0.0, 1.0);

        self.pressure.store(p.to_bits(), Ordering::Release);

        if self.config.auto_scale {
            self.maybe_rescale(p);
        }
    }

    fn latency_pressure(&self) -> f64 {
        let p95 = self
            .latencies
            .lock()
            .map(|window| window_p95(&window))
            .unwrap_or(0.0);

        let target = self.config.target_latency.as_secs_f64() * 1_000.0;
        let max = self.config.max_latency.as_secs_f64() * 1_000.0;
        if max <= target {
            return 0.0;
        }
        ((p95 - target) / (max - target)).clamp(0.0, 1.0)
    }

    fn maybe_rescale(&self, pressure: f64) {
        let now = Instant::now();
        let cooldown = std::time::Duration::from_secs(SCALE_COOLDOWN_SECS);
        let Ok(mut scale) = self.scale.lock() else {
            return;
        };

        if pressure >= self.config.pressure_threshold {
            scale.below_since = None;
            let since = *scale.above_since.get_or_insert(now);
            if now.duration_since(since) >= cooldown {
                scale.above_since = None;
                drop(scale);
                self.rescale(0.9, "sustained pressure above threshold");
            }
        } else if pressure < self.config.pressure_threshold * SCALE_UP_BAND {
            scale.above_since = None;
            let since = *scale.below_since.get_or_insert(now);
            if now.duration_since(since) >= cooldown {
                scale.below_since = None;
                drop(scale);
                self.rescale(1.1, "sustained pressure well below threshold");
            }
        } else {
            scale.above_since = None;
            scale.below_since = None;
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn rescale(&self, factor: f64, reason: &str) {
        let old_workers = self.max_workers.load(Ordering::Acquire);
        let old_connections = self.max_connections.load(Ordering::Acquire);

        let new_workers = ((old_workers as f64 * factor).floor() as usize)
            .clamp(1, self.hard_max_workers);
        let new_connections = ((old_connections as f64 * factor).floor() as usize)
            .clamp(1, self.hard_max_connections);

        if new_workers == old_workers && new_connections == old_connections {
            return;
        }

        self.max_workers.store(new_workers, Ordering::Release);
        self.max_connections.store(new_connections, Ordering::Release);

        tracing::info!(
            old_workers,
            new_workers,
            old_connections,
            new_connections,
            reason,
            "backpressure budgets adjusted"
        );

        if let Ok(mut scale) = self.scale.lock() {
            scale.events.push(ScaleEvent {
                at: Utc::now(),
                old_workers,
                new_workers,
                old_connections,
                new_connections,
                reason: reason.to_string(),
            });
        }
    }
}

fn window_p95(window: &VecDeque<f64>) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = window.iter().copied().collect();
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let rank = (0.95 * (sorted.len() - 1) as f64).round() as usize;
    sorted
        .get(rank.min(sorted.len() - 1))
        .copied()
        .unwrap_or(0.0)
}
