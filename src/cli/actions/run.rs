use crate::cli::actions::Action;
use crate::config::Config;
use crate::context::RunContext;
use crate::driver;
use crate::engine::{ProgressiveEngine, RunStatus};
use crate::export::render_summary;
use anyhow::{Context, Result, anyhow};
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// Exit code for a clean run.
pub const EXIT_OK: i32 = 0;
/// Configuration or setup failure.
pub const EXIT_CONFIG: i32 = 1;
/// Runtime failure with partial results.
pub const EXIT_RUNTIME: i32 = 2;
/// Interrupted by signal.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Window in which a second signal forces immediate exit.
const FORCE_EXIT_WINDOW: Duration = Duration::from_secs(2);

/// Handle the run action. Returns the process exit code.
///
/// # Errors
///
/// Returns an error for configuration problems; runtime failures map to
/// exit codes instead so partial results still reach the user.
pub async fn handle(action: Action) -> Result<i32> {
    let Action::Run { config } = action else {
        return Err(anyhow!("run handler invoked with a different action"));
    };

    let config = Config::load(&config)?;
    let driver = driver::resolve(&config.workload).with_context(|| {
        format!(
            "unknown workload {:?} (available: {})",
            config.workload,
            driver::available().join(", ")
        )
    })?;

    let ctx = RunContext::new();
    info!(run_id = %ctx.run_id(), workload = %config.workload, "starting run");
    spawn_signal_handler(ctx.clone());

    let engine = ProgressiveEngine::new(config)?;
    let result = match engine.run(&ctx, driver).await {
        Ok(result) => result,
        Err(e) => {
            error!("run failed before producing results: {e:#}");
            return Ok(EXIT_CONFIG);
        }
    };

    println!("{}", render_summary(&result));

    Ok(match result.metadata.status {
        RunStatus::Completed => EXIT_OK,
        RunStatus::Failed => EXIT_RUNTIME,
        RunStatus::Interrupted => EXIT_INTERRUPTED,
    })
}

/// Install the run's signal handling: the first SIGINT/SIGTERM cancels the
/// run gracefully, a second within [`FORCE_EXIT_WINDOW`] exits immediately.
fn spawn_signal_handler(ctx: RunContext) {
    tokio::spawn(async move {
        if wait_for_signal().await.is_err() {
            return;
        }
        warn!("signal received, finishing current band (press again to force exit)");
        ctx.cancel();

        let force = tokio::time::timeout(FORCE_EXIT_WINDOW, wait_for_signal()).await;
        if matches!(force, Ok(Ok(()))) {
            error!("second signal, exiting immediately");
            std::process::exit(EXIT_INTERRUPTED);
        }
        // after the window a further signal still forces exit, without the
        // two-press hint
        if wait_for_signal().await.is_ok() {
            std::process::exit(EXIT_INTERRUPTED);
        }
    });
}

/// Wait for SIGINT or SIGTERM (Ctrl+C on non-Unix systems).
async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .context("failed to install SIGINT handler")?;
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("failed to install Ctrl+C handler")?;
        info!("received Ctrl+C");
    }

    Ok(())
}
