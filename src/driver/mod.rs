//! Pluggable workload contract.
//!
//! The engine is workload-agnostic: it drives anything implementing
//! [`WorkloadDriver`]. Drivers are registered at compile time by name; the
//! registry is the single place a new workload has to be added.

mod select;

pub use select::SelectOneDriver;

use crate::config::Config;
use crate::context::RunContext;
use crate::error::DriverError;
use crate::metrics::OpOutcome;
use async_trait::async_trait;
use rand::rngs::SmallRng;
use sqlx::{PgConnection, PgPool};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A workload implementation.
///
/// `execute_one` is invoked concurrently from many workers and must be
/// thread-safe; implementations should return promptly once the context is
/// cancelled rather than starting new statements.
#[async_trait]
pub trait WorkloadDriver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Idempotent schema and data preparation.
    async fn setup(&self, ctx: &RunContext, pool: &PgPool, config: &Config)
    -> Result<(), DriverError>;

    /// Tear down whatever `setup` created.
    async fn cleanup(
        &self,
        ctx: &RunContext,
        pool: &PgPool,
        config: &Config,
    ) -> Result<(), DriverError>;

    /// One unit of work on a borrowed connection.
    async fn execute_one(
        &self,
        ctx: &RunContext,
        conn: &mut PgConnection,
        rng: &mut SmallRng,
    ) -> Result<OpOutcome, DriverError>;
}

type DriverFactory = fn() -> Arc<dyn WorkloadDriver>;

fn factories() -> BTreeMap<&'static str, DriverFactory> {
    let mut map: BTreeMap<&'static str, DriverFactory> = BTreeMap::new();
    map.insert("select1", || Arc::new(SelectOneDriver));
    // Add new built-in drivers here.
    map
}

/// Look up a driver by its registered name.
#[must_use]
pub fn resolve(name: &str) -> Option<Arc<dyn WorkloadDriver>> {
    factories().get(name).map(|factory| factory())
}

/// Names of every registered driver, sorted.
#[must_use]
pub fn available() -> Vec<&'static str> {
    factories().keys().copied().collect()
}
