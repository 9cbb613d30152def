//! Command synthesis helpers shared by the families.

use crate::catalog::Catalog;
use crate::error::Result;
use crate::normalize::Normalizer;
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

/// One CLI command to send to the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    /// Catalog pattern the command instantiates
    pub pattern: String,
    /// Rendered from the no-form
    pub negated: bool,
    pub text: String,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Parameter values for rendering, keyed by catalog parameter name.
pub fn values<const N: usize>(pairs: [(&str, String); N]) -> IndexMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Renders commands through the catalog's templates.
#[derive(Clone, Copy)]
pub struct CommandBuilder<'a> {
    pub catalog: &'a Catalog,
    pub normalizer: &'a Normalizer,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(catalog: &'a Catalog, normalizer: &'a Normalizer) -> Self {
        Self {
            catalog,
            normalizer,
        }
    }

    /// The canonical set command of a pattern.
    pub fn set(&self, pattern: &str, values: &IndexMap<String, String>) -> Result<Command> {
        let text = self.catalog.pattern(pattern)?.render(values)?;
        Ok(Command {
            pattern: pattern.to_string(),
            negated: false,
            text,
        })
    }

    /// The no-form of a pattern.
    pub fn no(&self, pattern: &str, values: &IndexMap<String, String>) -> Result<Command> {
        let text = self.catalog.pattern(pattern)?.render_no_form(values)?;
        Ok(Command {
            pattern: pattern.to_string(),
            negated: true,
            text,
        })
    }
}

/// Orders commands by catalog declaration order; within one pattern every
/// no-form precedes the set commands. The sort is stable otherwise.
///
/// Context openers are declared before their sub-options, so a `select`
/// line still leads the commands it scopes.
pub fn order(commands: &mut [Command], catalog: &Catalog) {
    commands.sort_by_key(|c| (catalog.ordinal(&c.pattern), !c.negated));
}

/// Joins a list of numbers with single spaces.
pub fn join_numbers(numbers: &[u32]) -> String {
    numbers
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}
