//! Smoke-test workload: one `SELECT 1` per operation.
//!
//! Useful for validating connectivity, pool sizing and the measurement
//! pipeline itself without touching any schema.

use super::WorkloadDriver;
use crate::config::Config;
use crate::context::RunContext;
use crate::error::DriverError;
use crate::metrics::OpOutcome;
use async_trait::async_trait;
use rand::rngs::SmallRng;
use sqlx::{PgConnection, PgPool};

pub struct SelectOneDriver;

#[async_trait]
impl WorkloadDriver for SelectOneDriver {
    fn name(&self) -> &'static str {
        "select1"
    }

    async fn setup(
        &self,
        _ctx: &RunContext,
        pool: &PgPool,
        _config: &Config,
    ) -> Result<(), DriverError> {
        // nothing to create; just prove the endpoint answers
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(pool)
            .await?;
        Ok(())
    }

    async fn cleanup(
        &self,
        _ctx: &RunContext,
        _pool: &PgPool,
        _config: &Config,
    ) -> Result<(), DriverError> {
        Ok(())
    }

    async fn execute_one(
        &self,
        _ctx: &RunContext,
        conn: &mut PgConnection,
        _rng: &mut SmallRng,
    ) -> Result<OpOutcome, DriverError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(conn)
            .await?;
        Ok(OpOutcome {
            queries: 1,
            rows_read: 1,
            rows_modified: 0,
        })
    }
}
