use crate::cli::actions::Action;
use crate::config::Config;
use crate::context::RunContext;
use crate::driver;
use anyhow::{Context, Result, anyhow};
use secrecy::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::info;

/// Handle the setup action: driver schema/data preparation only.
///
/// # Errors
///
/// Returns an error when the config is invalid, the backend is unreachable
/// or the driver's setup fails.
pub async fn handle(action: Action) -> Result<i32> {
    let Action::Setup { config } = action else {
        return Err(anyhow!("setup handler invoked with a different action"));
    };

    let config = Config::load(&config)?;
    let driver = driver::resolve(&config.workload)
        .with_context(|| format!("unknown workload {:?}", config.workload))?;

    let dsn = config.database.dsn()?;
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(10))
        .connect(dsn.expose_secret())
        .await
        .context("backend unreachable")?;

    let ctx = RunContext::new();
    driver
        .setup(&ctx, &pool, &config)
        .await
        .with_context(|| format!("setup failed for workload {:?}", config.workload))?;

    info!(workload = %config.workload, "setup complete");
    pool.close().await;
    Ok(0)
}
