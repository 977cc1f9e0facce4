use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable consulted for the log filter when no `-v` flags are
/// given.
const LOG_LEVEL_ENV: &str = "STORMDB_LOG_LEVEL";

/// Fallback filter: band lifecycle visible, dependency chatter suppressed.
const DEFAULT_FILTER: &str = "stormdb=info,warn";

/// Initialize the tracing subscriber.
///
/// Precedence: an explicit directive from the verbosity flags, then
/// `STORMDB_LOG_LEVEL`, then [`DEFAULT_FILTER`].
///
/// # Errors
///
/// Returns an error if a subscriber is already installed.
pub fn init(directive: Option<&str>) -> Result<()> {
    let filter = directive.map_or_else(
        || {
            EnvFilter::try_from_env(LOG_LEVEL_ENV)
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
        },
        EnvFilter::new,
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()?;

    Ok(())
}
