//! Plan command - commands that converge a device on a desired state

use super::{read_text, CommandContext};
use anyhow::{bail, Context, Result};
use clap::Parser;
use rtxconf::acl::AccessList;
use rtxconf::collision::{check_against_siblings, OwnedRange};
use rtxconf::record::DomainRecord;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Arguments for the plan command
#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    /// Desired state (JSON or YAML)
    #[arg(long, required = true)]
    pub desired: PathBuf,

    /// Current `show config` output; without it every record is new
    #[arg(long)]
    pub current: Option<PathBuf>,
}

/// What the operator wants on the device.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DesiredState {
    pub records: Vec<DomainRecord>,
    pub access_lists: Vec<AccessList>,
}

#[derive(Debug, Serialize)]
struct Plan {
    commands: Vec<String>,
}

impl DesiredState {
    /// Loads a desired state, choosing the format by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let content = read_text(path)?;
        let state = match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => serde_yaml::from_str(&content)?,
            _ => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?,
        };
        Ok(state)
    }
}

impl PlanArgs {
    /// Execute the plan command
    pub fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let desired = DesiredState::load(&self.desired)?;
        let engine = &ctx.engine;

        let current = match &self.current {
            Some(path) => {
                let parsed = engine.parse(&read_text(path)?);
                for diagnostic in &parsed.diagnostics {
                    eprintln!("warning: {}", diagnostic);
                }
                parsed.records
            }
            None => Vec::new(),
        };

        let mut ranges: Vec<OwnedRange> = Vec::new();
        for list in &desired.access_lists {
            if let Some(range) = list.owned_range(engine.allocator())? {
                ranges.push(range);
            }
        }
        for range in &ranges {
            let report = check_against_siblings(range, &ranges);
            if !report.is_clear() {
                report.into_result()?;
            }
        }

        let mut records = Vec::new();
        for list in &desired.access_lists {
            records.extend(list.resolve(engine.allocator())?);
        }
        records.extend(desired.records);

        let keys: Vec<_> = records.iter().map(DomainRecord::key).collect();
        for (i, key) in keys.iter().enumerate() {
            if keys[..i].contains(key) {
                bail!("{} is declared more than once", key);
            }
        }

        let commands = engine.plan(&records, &current)?;
        info!(commands = commands.len(), "Plan ready");

        if !ctx.emit(&Plan {
            commands: commands.clone(),
        })? {
            if commands.is_empty() {
                println!("No changes.");
            }
            for command in &commands {
                println!("{}", command);
            }
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_desired_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"records": [{{"family": "static_route", "destination": "default",
                "hops": [{{"gateway": "pp 1"}}]}}]}}"#
        )
        .unwrap();
        let state = DesiredState::load(file.path()).unwrap();
        assert_eq!(state.records.len(), 1);
        assert!(state.access_lists.is_empty());
    }

    #[test]
    fn test_load_desired_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "access_lists:\n  - name: {{state: known, value: web}}\n    kind: ip\n    policy: {{mode: auto, start: 100, step: 10}}\n    entries: []"
        )
        .unwrap();
        let state = DesiredState::load(file.path()).unwrap();
        assert_eq!(state.access_lists.len(), 1);
    }
}
