//! # rtxconf - Declarative configuration for Yamaha RTX routers
//!
//! rtxconf reads the line-oriented text a router prints for `show config`,
//! turns it into typed records and, in the other direction, computes the
//! CLI commands that move a device from its current state to a desired one.
//!
//! ## Core Concepts
//!
//! - **Catalog**: declarative description of every supported command, its
//!   parameters, aliases and no-form
//! - **Records**: one typed value per configuration object (a filter, a
//!   tunnel, a route...), identified by a [`RecordKey`](record::RecordKey)
//! - **Families**: builders and synthesizers for one kind of record
//! - **Derivable fields**: values such as pre-shared keys that the device
//!   accepts but never shows back
//!
//! ## Architecture Overview
//!
//! ```text
//! raw text ──► Preprocessor ──► Matcher ──► Family builders ──► records
//!                  (wrapped           (catalog         (typed, with
//!                   lines)             patterns)        diagnostics)
//!
//! (desired, previous) ──► Family synthesizers ──► ordered commands
//!                          (Catalog, Normalizer,        │
//!                           SequenceAllocator)          ▼
//!                                          transport ──► re-parse to confirm
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use rtxconf::prelude::*;
//!
//! let engine = Engine::builtin()?;
//! let current = engine.parse(&device_output);
//! for diagnostic in &current.diagnostics {
//!     eprintln!("{}", diagnostic);
//! }
//! let commands = engine.synthesize(&desired, current.find(&desired.key()))?;
//! ```

// Re-export commonly used items in prelude
pub mod prelude {
    //! Common imports for working with rtxconf.
    //!
    //! ```rust,ignore
    //! use rtxconf::prelude::*;
    //! ```

    pub use crate::acl::{AccessList, AclEntry, AclKind, AclRule};
    pub use crate::collision::{CollisionReport, OwnedRange, SequenceRange};
    pub use crate::engine::{Engine, ParseOutput};
    pub use crate::error::{Diagnostic, DiagnosticKind, Error, Result};
    pub use crate::record::{DerivableField, DomainRecord, RecordKey};
    pub use crate::sequence::{SequenceAllocator, SequencePolicy};
    pub use crate::transport::{apply_and_confirm, CommandExecutor};
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases.
///
/// Fatal conditions are [`Error`](error::Error) values; per-line parse
/// problems are [`Diagnostic`](error::Diagnostic)s.
pub mod error;

/// Engine configuration loaded from TOML, YAML or JSON plus environment
/// overrides.
pub mod config;

/// Structured logging setup.
pub mod telemetry;

// ============================================================================
// Reading Configuration Text
// ============================================================================

/// The command catalog and its template language.
pub mod catalog;

/// Value equivalence classes (`pass` and `pass-nolog`, `*` and `any`...).
pub mod normalize;

/// Reconstruction of wrapped physical lines into logical lines.
pub mod preprocess;

/// Matching logical lines against catalog patterns.
pub mod matcher;

// ============================================================================
// Records and Families
// ============================================================================

/// Typed records and the `DerivableField` tri-state.
pub mod record;

/// Per-family builders and synthesizers.
pub mod family;

/// Command rendering and ordering.
pub mod synth;

/// Merging read-back records with declared ones.
pub mod reconcile;

// ============================================================================
// Rule Lists
// ============================================================================

/// Sequence numbering for ordered rule lists.
pub mod sequence;

/// Sequence range collision checks.
pub mod collision;

/// Named access lists compiled to numbered filters.
pub mod acl;

// ============================================================================
// Engine
// ============================================================================

/// The engine tying everything together.
pub mod engine;

/// The boundary to whatever sends commands to a device.
pub mod transport;

pub use engine::{Engine, ParseOutput};
pub use error::{Error, Result};

/// Returns the current version of rtxconf.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
