use anyhow::{Context, Result};
use clap::Parser;
use fortios_xutils::settings::{default_settings, load_settings, Settings};
use tracing_subscriber::EnvFilter;

mod cli;
mod network_cmd;
mod parse_cmd;
mod path_guard;
mod policy_cmd;

use cli::{Cli, Command};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let settings = resolve_settings(cli.settings.as_deref())?;

    match cli.command {
        Command::Parse(args) => parse_cmd::run_parse(args, &settings),
        Command::Inspect(args) => parse_cmd::run_inspect(args),
        Command::PolicySave(args) => policy_cmd::run_policy_save(args, &settings),
        Command::PolicySearch(args) => policy_cmd::run_policy_search(args, &settings),
        Command::NetworkCollect(args) => network_cmd::run_collect(args, &settings),
        Command::NetworkCompose(args) => network_cmd::run_compose(args),
        Command::NetworkFindPaths(args) => network_cmd::run_find_paths(args, &settings),
    }
}

/// `RUST_LOG` wins over `-v` when set.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn resolve_settings(path: Option<&std::path::Path>) -> Result<Settings> {
    match path {
        Some(path) => load_settings(path)
            .with_context(|| format!("failed to load settings {}", path.display())),
        None => Ok(default_settings()),
    }
}
