//! Command line interface for repath.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::types::{PathId, Role};

/// repath - multi-path control plane
#[derive(Parser, Debug)]
#[command(
    name = "repath",
    author,
    version,
    about = "Delay-driven path selection between two endpoints joined by four paths",
    long_about = r#"
repath runs one endpoint of a two-endpoint, four-path link:

  - the sender probes every path and answers switch proposals
  - the receiver measures one-way delays, watches the trend on the active
    path and negotiates a move to the lowest-delay path when it degrades

QUICK START:
  Receiver:  repath run --role receiver --bind 0.0.0.0:9000
  Sender:    repath run --role sender --bind 0.0.0.0:9000 --peer 10.0.0.2:9000
  Config:    repath config --output repath.toml
"#
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Log format
    #[arg(long, global = true)]
    pub format: Option<OutputFormat>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one endpoint until interrupted
    Run(RunArgs),

    /// Print an example configuration
    Config(ConfigArgs),
}

/// Run command arguments
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Endpoint role (overrides the configuration file)
    #[arg(short, long)]
    pub role: Option<Role>,

    /// Local UDP address carrying the control frames
    #[arg(short, long)]
    pub bind: Option<SocketAddr>,

    /// Remote UDP address (learned from the first frame when omitted)
    #[arg(short, long)]
    pub peer: Option<SocketAddr>,

    /// Path the link starts on (1-4)
    #[arg(long, value_parser = parse_path)]
    pub initial_path: Option<PathId>,

    /// Interval between probe rounds, e.g. "1s" or "250ms"
    #[arg(long, value_parser = parse_duration)]
    pub probe_interval: Option<Duration>,

    /// Stop after this long instead of waiting for Ctrl-C
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,
}

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Print the sender side of the example deployment
    #[arg(long)]
    pub sender: bool,

    /// Output path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

fn parse_path(s: &str) -> Result<PathId, String> {
    let id: u8 = s.parse().map_err(|e| format!("{e}"))?;
    PathId::new(id).map_err(|e| e.to_string())
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s).map_err(|e| e.to_string())
}
