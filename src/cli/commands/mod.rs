use clap::{
    Arg, ArgAction, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .help("Run configuration file (YAML)")
        .env("STORMDB_CONFIG")
        .value_name("FILE")
        .required(true)
        .value_parser(clap::value_parser!(std::path::PathBuf))
}

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("stormdb")
        .about("Progressive PostgreSQL load-testing engine")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .help("Increase verbosity, -vv for debug")
                .action(ArgAction::Count),
        )
        .subcommand(
            Command::new("run")
                .about("Execute a workload, with or without progressive scaling")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("setup")
                .about("Run the workload driver's schema and data preparation only")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("cleanup")
                .about("Tear down whatever the workload driver's setup created")
                .arg(config_arg()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_new() {
        let command = new();
        assert_eq!(command.get_name(), "stormdb");
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_run_requires_config() {
        let result = new().try_get_matches_from(vec!["stormdb", "run"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_run_with_config() {
        let matches = new()
            .try_get_matches_from(vec!["stormdb", "run", "--config", "bench.yaml"])
            .map_err(|e| e.to_string());
        let matches = matches.as_ref().ok();
        let (name, sub) = matches.and_then(|m| m.subcommand()).map_or(("", None), |(n, s)| (n, Some(s)));
        assert_eq!(name, "run");
        assert_eq!(
            sub.and_then(|s| s.get_one::<PathBuf>("config").cloned()),
            Some(PathBuf::from("bench.yaml"))
        );
    }

    #[test]
    fn test_config_from_env() {
        temp_env::with_var("STORMDB_CONFIG", Some("from-env.yaml"), || {
            let matches = new().try_get_matches_from(vec!["stormdb", "setup"]);
            let matches = matches.as_ref().ok();
            let config = matches
                .and_then(|m| m.subcommand_matches("setup"))
                .and_then(|s| s.get_one::<PathBuf>("config").cloned());
            assert_eq!(config, Some(PathBuf::from("from-env.yaml")));
        });
    }

    #[test]
    fn test_verbosity_counts() {
        let matches = new()
            .try_get_matches_from(vec!["stormdb", "run", "-c", "f.yaml", "-vv"])
            .map_err(|e| e.to_string());
        let count = matches
            .as_ref()
            .ok()
            .and_then(|m| m.subcommand_matches("run"))
            .map_or(0, |s| s.get_count("verbose"));
        assert_eq!(count, 2);
    }
}
