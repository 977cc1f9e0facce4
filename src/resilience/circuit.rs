//! Per-resource circuit breaker.
//!
//! Three states: `Closed` executes calls and counts failures inside a rolling
//! window; `Open` fails fast until the reset timeout elapses; `HalfOpen`
//! admits a bounded number of probes and closes again only when all of them
//! succeed consecutively.
//!
//! The current state lives in an atomic so the closed-state fast path never
//! takes the transition lock. Transitions themselves are serialized behind a
//! single mutex; no lock is held across an await point.

use crate::config::CircuitConfig;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

/// Error surface of [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum CircuitError<E>
where
    E: std::error::Error,
{
    /// The breaker refused the call without touching the backend.
    #[error("circuit open")]
    Open,
    /// The underlying operation ran and failed.
    #[error("{0}")]
    Inner(E),
}

/// Point-in-time view of the breaker, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub state: State,
    pub consecutive_failures: u32,
    pub half_open_inflight: u32,
    /// Time since the most recent failure, if any.
    pub last_failure_age: Option<std::time::Duration>,
}

#[derive(Debug)]
struct Inner {
    consecutive_failures: u32,
    window_start: Option<Instant>,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
    half_open_inflight: u32,
    half_open_successes: u32,
}

pub struct CircuitBreaker {
    config: CircuitConfig,
    state: AtomicU8,
    inner: Mutex<Inner>,
}

/// Outcome of admission; carried through the call so completion is accounted
/// against the right state.
#[derive(Debug, Clone, Copy)]
enum Permit {
    Normal,
    Probe,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(CLOSED),
            inner: Mutex::new(Inner {
                consecutive_failures: 0,
                window_start: None,
                last_failure: None,
                opened_at: None,
                half_open_inflight: 0,
                half_open_successes: 0,
            }),
        }
    }

    /// Run `op` under the breaker.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitError::Open`] when the call is short-circuited, or
    /// [`CircuitError::Inner`] carrying the operation's own error.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error,
    {
        let permit = self.admit().ok_or(CircuitError::Open)?;

        match op().await {
            Ok(value) => {
                self.on_success(permit);
                Ok(value)
            }
            Err(e) => {
                self.on_failure(permit);
                Err(CircuitError::Inner(e))
            }
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = match self.state.load(Ordering::Acquire) {
            OPEN => State::Open,
            HALF_OPEN => State::HalfOpen,
            _ => State::Closed,
        };
        let inner = lock_inner(&self.inner);
        CircuitSnapshot {
            state,
            consecutive_failures: inner.consecutive_failures,
            half_open_inflight: inner.half_open_inflight,
            last_failure_age: inner.last_failure.map(|at| at.elapsed()),
        }
    }

    fn admit(&self) -> Option<Permit> {
        match self.state.load(Ordering::Acquire) {
            CLOSED => Some(Permit::Normal),
            OPEN => {
                let mut inner = lock_inner(&self.inner);
                // re-check under the lock; another caller may have moved us
                if self.state.load(Ordering::Acquire) == CLOSED {
                    return Some(Permit::Normal);
                }
                let opened_at = inner.opened_at?;
                if opened_at.elapsed() >= self.config.reset_timeout {
                    inner.half_open_inflight = 1;
                    inner.half_open_successes = 0;
                    self.state.store(HALF_OPEN, Ordering::Release);
                    tracing::debug!("circuit half-open, admitting probe");
                    Some(Permit::Probe)
                } else {
                    None
                }
            }
            _ => {
                let mut inner = lock_inner(&self.inner);
                if self.state.load(Ordering::Acquire) != HALF_OPEN {
                    // state moved while we waited on the lock; be conservative
                    return None;
                }
                if inner.half_open_inflight < self.config.half_open_probes {
                    inner.half_open_inflight += 1;
                    Some(Permit::Probe)
                } else {
                    None
                }
            }
        }
    }

    fn on_success(&self, permit: Permit) {
        match permit {
            Permit::Normal => {
                let mut inner = lock_inner(&self.inner);
                inner.consecutive_failures = 0;
                inner.window_start = None;
            }
            Permit::Probe => {
                let mut inner = lock_inner(&self.inner);
                inner.half_open_inflight = inner.half_open_inflight.saturating_sub(1);
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_probes {
                    inner.consecutive_failures = 0;
                    inner.window_start = None;
                    inner.opened_at = None;
                    inner.half_open_inflight = 0;
                    inner.half_open_successes = 0;
                    self.state.store(CLOSED, Ordering::Release);
                    tracing::info!("circuit closed after successful probes");
                }
            }
        }
    }

    fn on_failure(&self, permit: Permit) {
        let now = Instant::now();
        match permit {
            Permit::Normal => {
                let mut inner = lock_inner(&self.inner);
                inner.last_failure = Some(now);
                match inner.window_start {
                    Some(start) if now.duration_since(start) <= self.config.window => {
                        inner.consecutive_failures += 1;
                    }
                    _ => {
                        inner.window_start = Some(now);
                        inner.consecutive_failures = 1;
                    }
                }
                if inner.consecutive_failures >= self.config.max_failures {
                    inner.opened_at = Some(now);
                    self.state.store(OPEN, Ordering::Release);
                    tracing::warn!(
                        failures = inner.consecutive_failures,
                        "circuit opened"
                    );
                }
            }
            Permit::Probe => {
                let mut inner = lock_inner(&self.inner);
                inner.last_failure = Some(now);
                inner.opened_at = Some(now);
                inner.half_open_inflight = 0;
                inner.half_open_successes = 0;
                self.state.store(OPEN, Ordering::Release);
                tracing::warn!("circuit re-opened after failed probe");
            }
        }
    }
}

/// The lock only guards plain counters; a poisoned lock would mean a panic
/// mid-transition, so recovering the inner value is sound.
fn lock_inner(mutex: &Mutex<Inner>) -> std::sync::MutexGuard<'_, Inner> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
