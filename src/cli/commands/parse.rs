//! Parse command - read a configuration dump

use super::{read_text, CommandContext};
use crate::cli::OutputFormat;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

/// Arguments for the parse command
#[derive(Parser, Debug, Clone)]
pub struct ParseArgs {
    /// File holding `show config` output
    #[arg(required = true)]
    pub file: PathBuf,

    /// Print records as JSON (same as --output json)
    #[arg(long)]
    pub json: bool,
}

impl ParseArgs {
    /// Execute the parse command
    pub fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        if self.json {
            ctx.output = OutputFormat::Json;
        }
        let raw = read_text(&self.file)?;
        let parsed = ctx.engine.parse(&raw);

        if !ctx.emit(&parsed)? {
            for record in &parsed.records {
                println!("{}", record.key());
                if ctx.verbosity > 0 {
                    for command in ctx.engine.synthesize(record, None)? {
                        println!("    {}", command);
                    }
                }
            }
            for diagnostic in &parsed.diagnostics {
                eprintln!("{}", diagnostic);
            }
            println!(
                "\n{} records, {} diagnostics",
                parsed.records.len(),
                parsed.diagnostics.len()
            );
        }

        Ok(if parsed.is_clean() { 0 } else { 1 })
    }
}
