use crate::cli::actions::Action;
use anyhow::{Result, bail};
use std::path::PathBuf;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let Some((name, sub)) = matches.subcommand() else {
        bail!("no subcommand given");
    };
    let config = sub
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_default();

    match name {
        "run" => Ok(Action::Run { config }),
        "setup" => Ok(Action::Setup { config }),
        "cleanup" => Ok(Action::Cleanup { config }),
        other => bail!("unknown subcommand {other:?}"),
    }
}
