//! CLI module for rtxconf
//!
//! Argument parsing and subcommand dispatch for the `rtxconf` binary.

pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// rtxconf - Declarative configuration for Yamaha RTX routers
///
/// Reads `show config` output into typed records and plans the commands
/// that bring a router to a desired state.
#[derive(Parser, Debug, Clone)]
#[command(name = "rtxconf")]
#[command(author = "rtxconf Contributors")]
#[command(version)]
#[command(about = "Declarative configuration for Yamaha RTX routers", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(long, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "RTXCONF_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Human,
    /// JSON output for scripting
    Json,
    /// YAML output
    Yaml,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Parse a configuration dump into records
    Parse(commands::parse::ParseArgs),

    /// Print the commands that converge a device on a desired state
    Plan(commands::plan::PlanArgs),

    /// List the command patterns the engine understands
    Catalog(commands::catalog::CatalogArgs),
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }
}
