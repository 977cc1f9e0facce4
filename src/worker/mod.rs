//! Parallel workload execution for one band.
//!
//! Spawns exactly `band.workers` tasks, each looping over the driver's
//! single-operation entry point until the band deadline passes or the run is
//! cancelled. All shared mutation goes through atomics; the only suspension
//! points are connection borrow, driver I/O and jittered backoff sleeps.

pub mod retry;

use crate::context::RunContext;
use crate::driver::WorkloadDriver;
use crate::engine::plan::Band;
use crate::error::{ErrorKind, OpError};
use crate::metrics::{Metrics, MetricsSnapshot, OpOutcome};
use crate::resilience::backpressure::BackpressureController;
use crate::resilience::circuit::{CircuitBreaker, CircuitError};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Hard deadline for a single driver call.
pub const OP_DEADLINE: Duration = Duration::from_secs(30);

/// How long cancelled workers get to finish their current operation before
/// they are aborted.
pub const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Rolling window for the early-abort error-rate check.
const ABORT_WINDOW: Duration = Duration::from_secs(10);

/// Error fraction above which a band is cut short.
const ABORT_ERROR_RATE: f64 = 0.5;

/// Minimum operations inside the window before the abort check applies.
const ABORT_MIN_OPS: u64 = 10;

/// Outcome of running one band phase.
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub metrics: MetricsSnapshot,
    /// Wall clock actually spent executing.
    pub elapsed: Duration,
    /// The phase was cut short by the sustained-error-rate guard.
    pub aborted: bool,
    /// The phase was cut short by run cancellation.
    pub interrupted: bool,
}

pub struct WorkerPool {
    circuit: Arc<CircuitBreaker>,
    backpressure: Arc<BackpressureController>,
    retry_max: u32,
}

impl WorkerPool {
    #[must_use]
    pub fn new(
        circuit: Arc<CircuitBreaker>,
        backpressure: Arc<BackpressureController>,
        retry_max: u32,
    ) -> Self {
        Self {
            circuit,
            backpressure,
            retry_max,
        }
    }

    /// Run `band.workers` workers against `driver` for `duration`.
    ///
    /// Returns once every worker has exited, so the caller's final stats
    /// sample always happens after the last operation.
    pub async fn run(
        &self,
        ctx: &RunContext,
        band: &Band,
        duration: Duration,
        driver: Arc<dyn WorkloadDriver>,
        pool: PgPool,
    ) -> PhaseOutcome {
        let metrics = Arc::new(Metrics::new());
        let band_ctx = ctx.child();
        let started = Instant::now();
        let deadline = started + duration;

        let mut workers = JoinSet::new();
        for worker_id in 0..band.workers {
            workers.spawn(worker_loop(WorkerShared {
                ctx: band_ctx.clone(),
                driver: Arc::clone(&driver),
                pool: pool.clone(),
                metrics: Arc::clone(&metrics),
                circuit: Arc::clone(&self.circuit),
                backpressure: Arc::clone(&self.backpressure),
                retry_max: self.retry_max,
                deadline,
                worker_id,
            }));
        }

        let monitor = tokio::spawn(abort_monitor(band_ctx.clone(), Arc::clone(&metrics)));

        let interrupted = tokio::select! {
            () = drain(&mut workers) => false,
            () = ctx.cancelled() => true,
        };

        if interrupted {
            band_ctx.cancel();
            debug!(band = band.index, "cancellation observed, granting grace period");
            if tokio::time::timeout(CANCEL_GRACE, drain(&mut workers))
                .await
                .is_err()
            {
                warn!(band = band.index, "grace period expired, aborting workers");
                workers.abort_all();
                drain(&mut workers).await;
            }
        }

        let aborted = band_ctx.is_cancelled() && !interrupted;
        monitor.abort();
        let _ = monitor.await;

        PhaseOutcome {
            metrics: metrics.freeze(started.elapsed()),
            elapsed: started.elapsed(),
            aborted,
            interrupted,
        }
    }
}

async fn drain(workers: &mut JoinSet<()>) {
    while workers.join_next().await.is_some() {}
}

struct WorkerShared {
    ctx: RunContext,
    driver: Arc<dyn WorkloadDriver>,
    pool: PgPool,
    metrics: Arc<Metrics>,
    circuit: Arc<CircuitBreaker>,
    backpressure: Arc<BackpressureController>,
    retry_max: u32,
    deadline: Instant,
    worker_id: u32,
}

async fn worker_loop(shared: WorkerShared) {
    let mut rng = SmallRng::from_entropy();

    while !shared.ctx.is_cancelled() && Instant::now() < shared.deadline {
        if !shared.backpressure.acquire_worker() {
            refusal_sleep(&mut rng).await;
            continue;
        }
        if !shared.backpressure.acquire_connection() {
            shared.backpressure.release_worker();
            refusal_sleep(&mut rng).await;
            continue;
        }

        shared.metrics.record_attempt();
        let started = Instant::now();
        let result = run_op(&shared, &mut rng).await;
        let latency = started.elapsed();

        match result {
            Ok(outcome) => {
                shared.metrics.record_success(latency, outcome);
                shared.backpressure.observe_latency(latency);
            }
            Err(e) => {
                let kind = e.kind();
                shared.metrics.record_error(kind, &e.to_string());
                if kind == ErrorKind::Fatal {
                    warn!(worker = shared.worker_id, "fatal operation error: {e}");
                }
            }
        }

        shared.backpressure.release_connection();
        shared.backpressure.release_worker();
    }
}

/// One logical operation: circuit-wrapped, deadline-bounded driver call with
/// kind-aware retries. Transient failures back off with full jitter up to
/// `retry_max` attempts; a timeout is retried once; everything else surfaces
/// immediately.
async fn run_op(shared: &WorkerShared, rng: &mut SmallRng) -> Result<OpOutcome, OpError> {
    let mut transient_retries = 0_u32;
    let mut timeout_retried = false;

    loop {
        let e = match attempt_op(shared, rng).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) => e,
        };

        let retry = match e.kind() {
            ErrorKind::Transient if transient_retries < shared.retry_max => {
                transient_retries += 1;
                true
            }
            ErrorKind::Timeout if !timeout_retried => {
                timeout_retried = true;
                true
            }
            _ => false,
        };

        if !retry || shared.ctx.is_cancelled() {
            return Err(e);
        }

        debug!(
            worker = shared.worker_id,
            attempt = transient_retries,
            "retrying after {e}"
        );
        tokio::time::sleep(retry::backoff_delay(transient_retries.max(1), rng)).await;
    }
}

async fn attempt_op(shared: &WorkerShared, rng: &mut SmallRng) -> Result<OpOutcome, OpError> {
    let circuit_result = shared
        .circuit
        .execute(move || async move {
            let mut conn = shared.pool.acquire().await.map_err(OpError::Acquire)?;
            match tokio::time::timeout(
                OP_DEADLINE,
                shared.driver.execute_one(&shared.ctx, &mut conn, rng),
            )
            .await
            {
                Ok(result) => result.map_err(OpError::from),
                Err(_) => Err(OpError::Timeout(OP_DEADLINE)),
            }
        })
        .await;

    match circuit_result {
        Ok(outcome) => Ok(outcome),
        Err(CircuitError::Open) => Err(OpError::CircuitOpen),
        Err(CircuitError::Inner(e)) => Err(e),
    }
}

async fn refusal_sleep(rng: &mut SmallRng) {
    let micros = rng.gen_range(1_000..=20_000_u64);
    tokio::time::sleep(Duration::from_micros(micros)).await;
}

/// Watches the rolling error rate and cancels the band when failures
/// dominate a sustained window.
async fn abort_monitor(ctx: RunContext, metrics: Arc<Metrics>) {
    let mut window: std::collections::VecDeque<(Instant, u64, u64)> =
        std::collections::VecDeque::new();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = ctx.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let now = Instant::now();
        window.push_back((now, metrics.committed(), metrics.errors()));
        while window
            .front()
            .is_some_and(|(at, _, _)| now.duration_since(*at) > ABORT_WINDOW)
        {
            window.pop_front();
        }

        let Some((_, first_committed, first_errors)) = window.front().copied() else {
            continue;
        };
        let Some((_, last_committed, last_errors)) = window.back().copied() else {
            continue;
        };

        let committed = last_committed.saturating_sub(first_committed);
        let errors = last_errors.saturating_sub(first_errors);
        let total = committed + errors;
        if total < ABORT_MIN_OPS {
            continue;
        }

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let rate = errors as f64 / total as f64;
        if rate > ABORT_ERROR_RATE && window.len() > ABORT_WINDOW.as_secs() as usize {
            warn!(errors, committed, rate, "sustained error rate above 50%, aborting band");
            ctx.cancel();
            return;
        }
    }
}
