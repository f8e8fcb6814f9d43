use std::net::IpAddr;
use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use fortios_xutils::netutils::normalize_ip;

#[derive(Parser, Debug)]
#[command(name = "fortios-xutils", version)]
#[command(about = "Parse FortiOS configuration dumps, search policies and trace reachability")]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Settings TOML file. Built-in defaults are used when omitted.
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Parse configuration dumps and write JSON files per device.
    Parse(ParseArgs),
    /// Show the block structure of a configuration dump.
    Inspect(InspectArgs),
    /// Resolve firewall policies and save them.
    PolicySave(PolicySaveArgs),
    /// Find policies and address objects covering an IP address.
    PolicySearch(PolicySearchArgs),
    /// Build the interface graph of one device.
    NetworkCollect(NetworkCollectArgs),
    /// Merge device graphs into one.
    NetworkCompose(NetworkComposeArgs),
    /// Find paths traffic can take between two IP addresses.
    NetworkFindPaths(NetworkFindPathsArgs),
}

#[derive(Parser, Debug)]
pub struct ParseArgs {
    /// Configuration dumps to parse.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
    /// Output directory. Overrides the settings file.
    #[arg(short, long)]
    pub outdir: Option<PathBuf>,
    /// Section names or patterns to write as separate files.
    #[arg(short, long = "section")]
    pub sections: Vec<String>,
    /// Also save each parsed dataset as a snapshot in the device directory.
    #[arg(long)]
    pub snapshot: bool,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct InspectArgs {
    pub file: PathBuf,
    /// Only show the top-level `config` block with this name.
    #[arg(long)]
    pub section: Option<String>,
    #[arg(long, default_value_t = 3)]
    pub depth: usize,
}

#[derive(Parser, Debug)]
pub struct PolicySaveArgs {
    /// Configuration dump, parsed JSON or dataset snapshot.
    pub file: PathBuf,
    /// Output file; `*.gz` writes a snapshot, anything else JSON.
    #[arg(short, long)]
    pub output: PathBuf,
    #[arg(long, value_enum)]
    pub range_expansion: Option<RangeExpansionArg>,
    /// Also print resolution problems.
    #[arg(long)]
    pub issues: bool,
}

#[derive(Parser, Debug)]
pub struct PolicySearchArgs {
    /// Configuration dump, parsed JSON, dataset or policy snapshot.
    pub file: PathBuf,
    /// Address to look up; a trailing `/32` or `/128` is accepted.
    #[arg(long, value_parser = normalize_ip)]
    pub ip: IpAddr,
    /// Also list address objects covering the IP (needs a dataset input).
    #[arg(long)]
    pub addresses: bool,
    /// Print the matching policies as flat table rows.
    #[arg(long)]
    pub table: bool,
    #[arg(long, value_enum)]
    pub range_expansion: Option<RangeExpansionArg>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct NetworkCollectArgs {
    /// Configuration dump, parsed JSON or dataset snapshot.
    pub file: PathBuf,
    /// Output graph; `*.gz` writes a snapshot, anything else JSON.
    #[arg(short, long)]
    pub output: PathBuf,
    #[arg(long, value_enum)]
    pub range_expansion: Option<RangeExpansionArg>,
}

#[derive(Parser, Debug)]
pub struct NetworkComposeArgs {
    /// Graphs written by `network-collect`.
    #[arg(required = true)]
    pub graphs: Vec<PathBuf>,
    #[arg(short, long)]
    pub output: PathBuf,
}

#[derive(Parser, Debug)]
pub struct NetworkFindPathsArgs {
    /// Graph written by `network-collect` or `network-compose`.
    pub graph: PathBuf,
    #[arg(long, value_parser = normalize_ip)]
    pub src: IpAddr,
    #[arg(long, value_parser = normalize_ip)]
    pub dst: IpAddr,
    /// Longest path in hops. Overrides the settings file.
    #[arg(long)]
    pub max_hops: Option<usize>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// How `iprange` address objects expand.
#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum RangeExpansionArg {
    /// Minimal list of CIDR blocks.
    Cidr,
    /// One host prefix per address.
    Hosts,
}
