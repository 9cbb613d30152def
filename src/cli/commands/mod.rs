//! Subcommands module for rtxconf CLI

pub mod catalog;
pub mod parse;
pub mod plan;

use crate::cli::{Cli, OutputFormat};
use anyhow::{Context, Result};
use rtxconf::config::EngineConfig;
use rtxconf::Engine;
use serde::Serialize;
use std::path::Path;

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration
    pub config: EngineConfig,
    /// Engine built from the configuration
    pub engine: Engine,
    /// Output format
    pub output: OutputFormat,
    /// Verbosity level
    pub verbosity: u8,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &Cli, config: EngineConfig) -> Result<Self> {
        let engine = Engine::from_config(&config).context("Failed to build engine")?;
        Ok(Self {
            config,
            engine,
            output: cli.output,
            verbosity: cli.verbosity(),
        })
    }

    /// Prints a value in the structured formats; returns false in human mode.
    pub fn emit<T: Serialize>(&self, value: &T) -> Result<bool> {
        match self.output {
            OutputFormat::Human => Ok(false),
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(value)?);
                Ok(true)
            }
            OutputFormat::Yaml => {
                print!("{}", serde_yaml::to_string(value)?);
                Ok(true)
            }
        }
    }
}

/// Reads a whole text file, naming it in the error.
pub fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}
