//! Reconstruction of lines wrapped by the router's terminal.
//!
//! `show config` output is wrapped at a fixed width. A wrap can fall inside
//! a number (`... 20010` / `0 200102`), before a `=value`, or between two
//! tokens, in which case the continuation is printed with leading
//! whitespace. Lines are stitched back together before matching.

use crate::catalog::Catalog;
use crate::config::PreprocessorConfig;
use crate::error::{Diagnostic, DiagnosticKind};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{trace, warn};

/// A reconstructed configuration line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogicalLine {
    /// Trimmed, rejoined text
    pub text: String,
    /// 1-based number of the first physical line
    pub line: usize,
    /// First physical line started with whitespace
    pub indented: bool,
    /// Wrapping could not be undone safely; the line must not be matched
    pub malformed: bool,
}

impl LogicalLine {
    pub fn new(text: impl Into<String>, line: usize, indented: bool) -> Self {
        Self {
            text: text.into(),
            line,
            indented,
            malformed: false,
        }
    }

    /// The first whitespace-separated word.
    pub fn head(&self) -> &str {
        self.text.split_whitespace().next().unwrap_or("")
    }
}

/// Rejoins wrapped physical lines into logical lines.
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    heads: BTreeSet<String>,
}

impl Preprocessor {
    /// Creates a preprocessor that treats `heads` as command keywords.
    pub fn new<I, S>(heads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            heads: heads.into_iter().map(Into::into).collect(),
        }
    }

    /// Known heads are the catalog's heads plus the configured extras.
    pub fn from_catalog(catalog: &Catalog, config: &PreprocessorConfig) -> Self {
        let mut heads = catalog.heads();
        heads.extend(config.extra_command_heads.iter().cloned());
        Self { heads }
    }

    pub fn is_head(&self, word: &str) -> bool {
        self.heads.contains(word)
    }

    /// Reconstructs the text, one logical line per output line.
    pub fn reconstruct(&self, raw: &str) -> String {
        let (lines, _) = self.reconstruct_lines(raw);
        lines
            .into_iter()
            .map(|l| l.text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Reconstructs logical lines and reports lines that could not be
    /// rejoined unambiguously.
    pub fn reconstruct_lines(&self, raw: &str) -> (Vec<LogicalLine>, Vec<Diagnostic>) {
        let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");
        let physical: Vec<(usize, &str)> = normalized
            .split('\n')
            .enumerate()
            .map(|(i, l)| (i + 1, l))
            .filter(|(_, l)| {
                let t = l.trim();
                !t.is_empty() && !t.starts_with('#')
            })
            .collect();

        let mut lines: Vec<LogicalLine> = Vec::new();
        let mut diagnostics = Vec::new();
        let mut current: Option<LogicalLine> = None;

        for (pos, &(number, raw_line)) in physical.iter().enumerate() {
            let trimmed = raw_line.trim();
            let leading_ws = raw_line.starts_with(char::is_whitespace);

            let continues = match current.as_ref() {
                Some(_) => self.is_continuation(trimmed, leading_ws),
                None => false,
            };

            if !continues {
                if let Some(done) = current.take() {
                    lines.push(done);
                }
                current = Some(LogicalLine::new(trimmed, number, leading_ws));
                continue;
            }

            let Some(cur) = current.as_mut() else {
                continue;
            };

            if cur.malformed {
                // once poisoned, following fragments stay standalone
                let mut fragment = LogicalLine::new(trimmed, number, leading_ws);
                fragment.malformed = true;
                lines.push(std::mem::replace(cur, fragment));
                continue;
            }

            let digit_split = !leading_ws
                && trimmed.starts_with(|c: char| c.is_ascii_digit())
                && cur.text.ends_with(|c: char| c.is_ascii_digit());

            let next_is_split = physical.get(pos + 1).is_some_and(|&(_, next)| {
                !next.starts_with(char::is_whitespace)
                    && next.trim().starts_with(|c: char| c.is_ascii_digit())
            });
            let lone_digits = trimmed.chars().all(|c| c.is_ascii_digit());

            if digit_split && lone_digits && next_is_split {
                warn!(line = number, "Ambiguous wrapped number, leaving lines unmerged");
                diagnostics.push(Diagnostic::new(
                    number,
                    DiagnosticKind::MalformedInput,
                    format!(
                        "digit fragment '{}' could end one wrapped number or start another",
                        trimmed
                    ),
                    trimmed,
                ));
                cur.malformed = true;
                let mut fragment = LogicalLine::new(trimmed, number, leading_ws);
                fragment.malformed = true;
                lines.push(std::mem::replace(cur, fragment));
                continue;
            }

            if digit_split || trimmed.starts_with('=') {
                cur.text.push_str(trimmed);
            } else {
                cur.text.push(' ');
                cur.text.push_str(trimmed);
            }
            trace!(line = number, joined = %cur.text, "Joined continuation line");
        }

        if let Some(done) = current.take() {
            lines.push(done);
        }
        (lines, diagnostics)
    }

    fn is_continuation(&self, trimmed: &str, leading_ws: bool) -> bool {
        if trimmed.starts_with(|c: char| c.is_ascii_digit()) || trimmed.starts_with('=') {
            return true;
        }
        if leading_ws {
            let head = trimmed.split_whitespace().next().unwrap_or("");
            return !self.is_head(head);
        }
        false
    }
}
