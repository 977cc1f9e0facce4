use crate::cli::{actions::Action, commands, dispatch::handler, telemetry};
use anyhow::Result;

/// Log filter directive for a repeated `-v` count. `None` defers to
/// `STORMDB_LOG_LEVEL`; band progress logs at info, so one `-v` surfaces it,
/// two add engine internals, three everything.
const fn verbosity_filter(verbose_count: u8) -> Option<&'static str> {
    match verbose_count {
        0 => None,
        1 => Some("stormdb=info,warn"),
        2 => Some("stormdb=debug,info"),
        _ => Some("stormdb=trace,debug"),
    }
}

/// Parse the command line, bring up logging and hand back the action to run.
///
/// # Errors
///
/// Returns an error when telemetry initialization or dispatch fails.
pub fn start() -> Result<Action> {
    let matches = commands::new().get_matches();

    telemetry::init(verbosity_filter(matches.get_count("verbose")))?;

    handler(&matches)
}
