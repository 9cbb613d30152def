//! Telemetry module for rtxconf.
//!
//! Structured logging through the `tracing` crate. The engine emits
//! `debug!` events per parsed line, `warn!` for ambiguous or malformed
//! input and `info!` for plan summaries; this module decides where they go.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use rtxconf::telemetry::{LoggingBuilder, LogFormat};
//!
//! LoggingBuilder::new().with_format(LogFormat::Json).init()?;
//! ```

pub mod config;
pub mod logging;

// Re-exports for convenience
pub use config::{LogFormat, LogLevel, LoggingConfig};
pub use logging::{init_from_verbosity, LoggingBuilder};
