//! Command-line interface definitions and parsing

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use hublink_core::Config;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log JSON to a rolling file in addition to stderr
    #[arg(long, global = true)]
    pub production: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Discover a controller and connect to it
    Connect(ConnectArgs),
    /// Print the effective configuration as TOML
    ShowConfig,
    /// Show the controller paired last
    Last,
    /// Delete the stored pairing record
    Forget,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ConnectArgs {
    /// Give up after this many seconds (overrides the configuration)
    #[arg(short, long, value_name = "SECS", conflicts_with = "no_timeout")]
    pub timeout: Option<u64>,

    /// Keep searching until a controller connects or the run is interrupted
    #[arg(long)]
    pub no_timeout: bool,

    /// Use a scripted transport instead of the Bluetooth adapter
    #[arg(long)]
    pub simulate: bool,
}

impl ConnectArgs {
    /// Discovery deadline for this invocation.
    #[must_use]
    pub fn discovery_timeout(&self, config: &Config) -> Option<Duration> {
        if self.no_timeout {
            return None;
        }
        self.timeout
            .map(Duration::from_secs)
            .or_else(|| config.discovery_timeout())
    }
}
