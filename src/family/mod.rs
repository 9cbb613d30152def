//! Configuration families.
//!
//! Each family turns the matched lines of its catalog patterns into typed
//! records and, in the other direction, synthesizes the commands that move
//! the device from one record state to another. Families are looked up by
//! the catalog's `family` field through a [`FamilyRegistry`].

pub mod admin;
pub mod binding;
pub mod dns;
pub mod dynamic_filter;
pub mod ethernet_filter;
pub mod ip_filter;
pub mod route;
pub mod tunnel;

use crate::catalog::Catalog;
use crate::error::{Diagnostic, Error, Result};
use crate::matcher::MatchResult;
use crate::normalize::{CanonicalValue, Normalizer, ADDRESS};
use crate::record::DomainRecord;
use crate::synth::{Command, CommandBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// What a family needs from the engine.
#[derive(Clone, Copy)]
pub struct FamilyContext<'a> {
    pub catalog: &'a Catalog,
    pub normalizer: &'a Normalizer,
}

impl<'a> FamilyContext<'a> {
    pub fn new(catalog: &'a Catalog, normalizer: &'a Normalizer) -> Self {
        Self {
            catalog,
            normalizer,
        }
    }

    pub fn commands(&self) -> CommandBuilder<'a> {
        CommandBuilder::new(self.catalog, self.normalizer)
    }
}

/// Records and per-line problems produced by a builder.
pub type BuildOutput = (Vec<DomainRecord>, Vec<Diagnostic>);

/// Builder and synthesizer of one configuration family.
pub trait RecordFamily: Send + Sync {
    /// Catalog family name
    fn name(&self) -> &'static str;

    /// Converts matched lines (in source order) into records.
    fn build(&self, matches: &[MatchResult], cx: &FamilyContext<'_>) -> BuildOutput;

    /// Normalizes a caller-supplied record to the form the builder produces.
    fn canonicalize(&self, record: &DomainRecord, cx: &FamilyContext<'_>) -> Result<DomainRecord>;

    /// Commands that turn `previous` into `desired`. Unchanged records
    /// produce nothing.
    fn synthesize(
        &self,
        desired: &DomainRecord,
        previous: Option<&DomainRecord>,
        cx: &FamilyContext<'_>,
    ) -> Result<Vec<Command>>;

    /// Commands that remove the record from the device.
    fn delete(&self, record: &DomainRecord, cx: &FamilyContext<'_>) -> Result<Vec<Command>>;

    /// Merges a freshly read record with the declared one.
    fn reconcile(&self, observed: &DomainRecord, declared: &DomainRecord) -> Result<DomainRecord> {
        crate::reconcile::merge(observed, declared)
    }

    /// Command whose output shows the record.
    fn show_command(&self, record: &DomainRecord) -> String {
        let _ = record;
        "show config".to_string()
    }
}

/// Registry for looking up families by name.
pub struct FamilyRegistry {
    families: HashMap<String, Arc<dyn RecordFamily>>,
}

impl FamilyRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            families: HashMap::new(),
        }
    }

    /// Create a registry with all built-in families
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        // Ordered rule lists
        registry.register(Arc::new(ip_filter::IpFilterFamily));
        registry.register(Arc::new(dynamic_filter::DynamicFilterFamily));
        registry.register(Arc::new(ethernet_filter::EthernetFilterFamily));
        registry.register(Arc::new(binding::FilterBindingFamily));

        // Services and contexts
        registry.register(Arc::new(dns::DnsFamily));
        registry.register(Arc::new(tunnel::TunnelFamily));
        registry.register(Arc::new(route::StaticRouteFamily));
        registry.register(Arc::new(admin::AdminUserFamily));
        registry
    }

    /// Register a family
    pub fn register(&mut self, family: Arc<dyn RecordFamily>) {
        self.families.insert(family.name().to_string(), family);
    }

    /// Get a family by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn RecordFamily>> {
        self.families.get(name).cloned()
    }

    /// Get a family, failing for unregistered names
    pub fn require(&self, name: &str) -> Result<Arc<dyn RecordFamily>> {
        self.get(name)
            .ok_or_else(|| Error::UnknownFamily(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.families.contains_key(name)
    }

    /// Get all family names
    pub fn names(&self) -> Vec<&str> {
        self.families.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for FamilyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

// ============================================================================
// Shared field types
// ============================================================================

/// Source or destination of a filter rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    /// Matches everything (`*`)
    Any,
    Address(String),
}

impl Endpoint {
    /// Reads an address through the normalizer.
    pub fn parse(raw: &str, field: &str, normalizer: &Normalizer) -> Result<Self> {
        Ok(match normalizer.canonicalize(field, raw)? {
            CanonicalValue::Any => Endpoint::Any,
            CanonicalValue::Token(t) => Endpoint::Address(t),
            CanonicalValue::Bool(_) => {
                return Err(Error::validation(field, "endpoint", format!("'{}' is not an address", raw)))
            }
        })
    }

    pub fn canonical(&self, field: &str, normalizer: &Normalizer) -> Result<Self> {
        match self {
            Endpoint::Any => Ok(Endpoint::Any),
            Endpoint::Address(a) => Self::parse(a, field, normalizer),
        }
    }

    pub fn spelling(&self) -> &str {
        match self {
            Endpoint::Any => "*",
            Endpoint::Address(a) => a,
        }
    }

    pub fn address(raw: &str, normalizer: &Normalizer) -> Result<Self> {
        Self::parse(raw, ADDRESS, normalizer)
    }
}

/// Direction of a filter binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            other => Err(Error::validation("direction", "binding", format!("'{}' is not in/out", other))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => write!(f, "in"),
            Direction::Out => write!(f, "out"),
        }
    }
}

/// Records a failed line as a diagnostic.
pub(crate) fn diagnose(m: &MatchResult, error: &Error) -> Diagnostic {
    Diagnostic::from_error(m.line, &m.text, error)
}

/// Rejects a record handed to the wrong family.
pub(crate) fn wrong_family(expected: &str, record: &DomainRecord) -> Error {
    Error::validation(
        "family",
        record.key().to_string(),
        format!("expected a {} record", expected),
    )
}
