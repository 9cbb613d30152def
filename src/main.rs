//! rtxconf - Declarative configuration for Yamaha RTX routers
//!
//! This is the main entry point for the rtxconf CLI.

mod cli;

use anyhow::Result;
use cli::commands::CommandContext;
use cli::{Cli, Commands};
use rtxconf::config::EngineConfig;
use rtxconf::telemetry::init_from_verbosity;

/// Application version information
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            e.downcast_ref::<rtxconf::Error>()
                .map_or(1, rtxconf::Error::exit_code)
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration
    let config = EngineConfig::load(cli.config.as_ref()).unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config: {}", e);
        EngineConfig::default()
    });

    // Initialize logging based on verbosity
    if let Err(e) = init_from_verbosity(config.logging.clone(), cli.verbosity()) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    if cli.verbosity() >= 2 {
        eprintln!("rtxconf v{}", VERSION);
    }

    // Create command context
    let mut ctx = CommandContext::new(&cli, config)?;

    // Execute the appropriate command
    match &cli.command {
        Commands::Parse(args) => args.execute(&mut ctx),
        Commands::Plan(args) => args.execute(&mut ctx),
        Commands::Catalog(args) => args.execute(&mut ctx),
    }
}
