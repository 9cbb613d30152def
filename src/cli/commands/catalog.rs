//! Catalog command - list known command patterns

use super::CommandContext;
use anyhow::Result;
use clap::Parser;
use serde::Serialize;

/// Arguments for the catalog command
#[derive(Parser, Debug, Clone)]
pub struct CatalogArgs {
    /// Only list patterns of this family
    #[arg(long)]
    pub family: Option<String>,
}

#[derive(Debug, Serialize)]
struct PatternSummary<'a> {
    name: &'a str,
    family: &'a str,
    syntax: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    no_form: Option<&'a str>,
}

impl CatalogArgs {
    /// Execute the catalog command
    pub fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let catalog = ctx.engine.catalog();
        let patterns: Vec<PatternSummary<'_>> = catalog
            .patterns()
            .filter(|p| self.family.as_deref().map_or(true, |f| p.family == f))
            .map(|p| PatternSummary {
                name: &p.name,
                family: &p.family,
                syntax: &p.syntax,
                no_form: p.no_form.as_deref(),
            })
            .collect();

        if !ctx.emit(&patterns)? {
            println!("catalog {}", catalog.version());
            for p in &patterns {
                println!("  {:<28} {:<16} {}", p.name, p.family, p.syntax);
            }
        }
        Ok(0)
    }
}
