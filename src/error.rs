//! Error types for rtxconf.
//!
//! Fatal conditions surface as [`Error`]. Per-line problems found while
//! reading device output are not errors: they are collected as
//! [`Diagnostic`]s next to the records that did parse.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for rtxconf operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for rtxconf.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Input Errors
    // ========================================================================
    /// Device output could not be reconstructed safely.
    #[error("Malformed input at line {line}: {message}")]
    MalformedInput {
        /// 1-based source line
        line: usize,
        /// Error message
        message: String,
    },

    /// No catalog pattern matched the line.
    #[error("No pattern matches '{0}'")]
    UnknownPattern(String),

    /// More than one catalog pattern matched the line.
    #[error("Line '{line}' matches several patterns: {}", .patterns.join(", "))]
    AmbiguousMatch {
        /// Offending line
        line: String,
        /// Names of every matching pattern
        patterns: Vec<String>,
    },

    // ========================================================================
    // Record Errors
    // ========================================================================
    /// A record field violates its constraints.
    #[error("Invalid value for '{field}' in {record}: {message}")]
    Validation {
        /// Field name
        field: String,
        /// Record identity
        record: String,
        /// Error message
        message: String,
    },

    /// The record belongs to a family with no registered builder.
    #[error("Family '{0}' is not registered")]
    UnknownFamily(String),

    // ========================================================================
    // Sequence Errors
    // ========================================================================
    /// Automatic allocation ran past the family maximum.
    #[error("Sequence overflow: {count} entries from {start} step {step} exceed maximum {max}")]
    SequenceOverflow {
        /// First sequence number
        start: u32,
        /// Increment
        step: u32,
        /// Requested entries
        count: usize,
        /// Family maximum
        max: u32,
    },

    /// The same sequence number was declared twice.
    #[error("Duplicate sequence number {sequence} in {owner}")]
    DuplicateSequence {
        /// Repeated number
        sequence: u32,
        /// Owning rule set
        owner: String,
    },

    /// Two rule sets claim overlapping sequence ranges.
    #[error(
        "Sequence collision: {owner} overlaps {competing_owner} on {overlap_start}-{overlap_end}{}",
        more_suffix(.additional)
    )]
    CollisionDetected {
        /// Candidate rule set
        owner: String,
        /// Rule set already holding the range
        competing_owner: String,
        /// First overlapping number
        overlap_start: u32,
        /// Last overlapping number
        overlap_end: u32,
        /// Further conflicts not named in the message
        additional: usize,
    },

    // ========================================================================
    // Device Errors
    // ========================================================================
    /// The live device query failed. The source is propagated unchanged.
    #[error(transparent)]
    DeviceQuery(Box<dyn std::error::Error + Send + Sync>),

    /// A command was rejected or the transport failed.
    #[error("Transport error while running '{command}': {message}")]
    Transport {
        /// Command being executed
        command: String,
        /// Error message
        message: String,
    },

    /// Re-reading the device after apply did not show the desired record.
    #[error("Device did not converge on {record}: {message}")]
    NotConverged {
        /// Record identity
        record: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Catalog Errors
    // ========================================================================
    /// The command catalog failed validation.
    #[error("Catalog error in '{pattern}': {message}")]
    Catalog {
        /// Pattern name, or "catalog" for file-level problems
        pattern: String,
        /// Error message
        message: String,
    },

    /// A command template could not be parsed or rendered.
    #[error("Template error in '{template}': {message}")]
    Template {
        /// Template text
        template: String,
        /// Error message
        message: String,
    },

    /// A compiled pattern regex was rejected.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // IO Errors
    // ========================================================================
    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ========================================================================
    // Serialization Errors
    // ========================================================================
    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    // ========================================================================
    // Other Errors
    // ========================================================================
    /// Generic error with source.
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a new validation error.
    pub fn validation(
        field: impl Into<String>,
        record: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            record: record.into(),
            message: message.into(),
        }
    }

    /// Creates a new catalog error.
    pub fn catalog(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Catalog {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    /// Creates a new template error.
    pub fn template(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Template {
            template: template.into(),
            message: message.into(),
        }
    }

    /// Creates a new transport error.
    pub fn transport(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Wraps a failed device query without altering it.
    pub fn device_query<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::DeviceQuery(Box::new(source))
    }

    /// Returns true if this error only affects a single input line.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::MalformedInput { .. } | Error::UnknownPattern(_) | Error::AmbiguousMatch { .. }
        )
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Validation { .. } | Error::DuplicateSequence { .. } => 2,
            Error::SequenceOverflow { .. } | Error::CollisionDetected { .. } => 3,
            Error::DeviceQuery(_) | Error::Transport { .. } | Error::NotConverged { .. } => 4,
            Error::Catalog { .. } | Error::Template { .. } | Error::Regex(_) => 5,
            Error::Config(_) | Error::TomlParse(_) => 6,
            _ => 1,
        }
    }

    /// The diagnostic kind this error maps to when it is recorded per line.
    pub fn diagnostic_kind(&self) -> DiagnosticKind {
        match self {
            Error::MalformedInput { .. } => DiagnosticKind::MalformedInput,
            Error::UnknownPattern(_) => DiagnosticKind::UnknownPattern,
            Error::AmbiguousMatch { .. } => DiagnosticKind::AmbiguousMatch,
            _ => DiagnosticKind::Validation,
        }
    }
}

fn more_suffix(additional: &usize) -> String {
    if *additional > 0 {
        format!(" (and {} more)", additional)
    } else {
        String::new()
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Adds context with a closure that is only evaluated on error.
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Other {
            message: message.into(),
            source: Some(Box::new(e)),
        })
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::Other {
            message: f().into(),
            source: Some(Box::new(e)),
        })
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Category of a recoverable, per-line parse problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    MalformedInput,
    UnknownPattern,
    AmbiguousMatch,
    Validation,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::MalformedInput => write!(f, "malformed_input"),
            DiagnosticKind::UnknownPattern => write!(f, "unknown_pattern"),
            DiagnosticKind::AmbiguousMatch => write!(f, "ambiguous_match"),
            DiagnosticKind::Validation => write!(f, "validation"),
        }
    }
}

/// A recoverable problem tied to one source line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// 1-based line in the raw device output
    pub line: usize,
    pub kind: DiagnosticKind,
    pub message: String,
    /// Logical line text after reconstruction
    pub text: String,
}

impl Diagnostic {
    pub fn new(
        line: usize,
        kind: DiagnosticKind,
        message: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            line,
            kind,
            message: message.into(),
            text: text.into(),
        }
    }

    /// Records an error against a line, keeping its category.
    pub fn from_error(line: usize, text: impl Into<String>, error: &Error) -> Self {
        Self::new(line, error.diagnostic_kind(), error.to_string(), text)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: [{}] {}", self.line, self.kind, self.message)
    }
}
