//! Structured logging layer using the tracing crate.
//!
//! Supports pretty, compact, JSON and full output, written to stderr or
//! appended to a file.

use crate::error::{Error, Result};
use crate::telemetry::config::{LogFormat, LogLevel, LoggingConfig};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Builder for constructing a logging layer.
pub struct LoggingBuilder {
    config: LoggingConfig,
}

impl LoggingBuilder {
    /// Create a new logging builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: LoggingConfig::default(),
        }
    }

    /// Create a builder from an existing configuration.
    pub fn from_config(config: LoggingConfig) -> Self {
        Self { config }
    }

    /// Set the log level.
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        self
    }

    /// Set the log format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.config.format = format;
        self
    }

    /// Set ANSI colors.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.config.ansi_colors = enabled;
        self
    }

    /// Include target in logs.
    pub fn with_target(mut self, enabled: bool) -> Self {
        self.config.with_target = enabled;
        self
    }

    /// Set filter directive.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.config.filter = Some(filter.into());
        self
    }

    /// Set log file path.
    pub fn with_file_output(mut self, path: impl AsRef<Path>) -> Self {
        self.config.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Build and initialize the logging layer (global subscriber).
    pub fn init(self) -> Result<()> {
        let env_filter = self.build_filter();
        let writer = self.make_writer()?;
        let layer = self.build_layer(writer);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
            .map_err(|e| Error::Config(e.to_string()))
    }

    fn build_filter(&self) -> EnvFilter {
        let default_filter = self.config.level.to_string();

        if let Some(ref filter) = self.config.filter {
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(filter))
                .unwrap_or_else(|_| EnvFilter::new(&default_filter))
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter))
        }
    }

    fn make_writer(&self) -> Result<BoxMakeWriter> {
        match self.config.file {
            Some(ref path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Ok(BoxMakeWriter::new(Mutex::new(file)))
            }
            None => Ok(BoxMakeWriter::new(std::io::stderr)),
        }
    }

    fn span_events(&self) -> FmtSpan {
        if self.config.with_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    fn build_layer<S>(&self, writer: BoxMakeWriter) -> Box<dyn Layer<S> + Send + Sync + 'static>
    where
        S: Subscriber + for<'a> LookupSpan<'a> + Send + Sync,
    {
        let ansi = self.config.ansi_colors && self.config.file.is_none();

        match self.config.format {
            LogFormat::Pretty => Box::new(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(writer)
                    .with_ansi(ansi)
                    .with_target(self.config.with_target)
                    .with_file(self.config.with_file)
                    .with_line_number(self.config.with_file)
                    .with_span_events(self.span_events()),
            ),
            LogFormat::Compact => Box::new(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(writer)
                    .with_ansi(ansi)
                    .with_target(self.config.with_target)
                    .with_file(self.config.with_file)
                    .with_line_number(self.config.with_file)
                    .with_span_events(self.span_events()),
            ),
            LogFormat::Json => Box::new(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_current_span(self.config.with_spans)
                    .with_span_list(self.config.with_spans)
                    .with_file(self.config.with_file)
                    .with_line_number(self.config.with_file)
                    .with_span_events(self.span_events()),
            ),
            LogFormat::Full => Box::new(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(ansi)
                    .with_target(self.config.with_target)
                    .with_file(self.config.with_file)
                    .with_line_number(self.config.with_file)
                    .with_span_events(FmtSpan::FULL),
            ),
        }
    }
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize logging from CLI verbosity, on top of a loaded configuration.
pub fn init_from_verbosity(base: LoggingConfig, verbosity: u8) -> Result<()> {
    let config = if verbosity == 0 {
        base
    } else {
        LoggingConfig {
            level: LogLevel::from_verbosity(verbosity),
            format: if verbosity >= 3 {
                LogFormat::Full
            } else {
                base.format
            },
            with_file: verbosity >= 3,
            with_target: verbosity >= 2,
            ..base
        }
    };

    LoggingBuilder::from_config(config).init()
}
