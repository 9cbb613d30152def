//! Interface filter bindings (`ip lan1 secure filter in ...`).

use super::{diagnose, wrong_family, BuildOutput, Direction, FamilyContext, RecordFamily};
use crate::error::{Error, Result};
use crate::matcher::MatchResult;
use crate::record::DomainRecord;
use crate::synth::{join_numbers, values, Command};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which filter table a binding refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    Ip,
    Ipv6,
    Ethernet,
}

impl BindingKind {
    fn pattern(self) -> &'static str {
        match self {
            BindingKind::Ip => "ip_secure_filter",
            BindingKind::Ipv6 => "ipv6_secure_filter",
            BindingKind::Ethernet => "ethernet_filter_binding",
        }
    }

    fn from_pattern(pattern: &str) -> Option<Self> {
        match pattern {
            "ip_secure_filter" => Some(BindingKind::Ip),
            "ipv6_secure_filter" => Some(BindingKind::Ipv6),
            "ethernet_filter_binding" => Some(BindingKind::Ethernet),
            _ => None,
        }
    }
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingKind::Ip => write!(f, "ip"),
            BindingKind::Ipv6 => write!(f, "ipv6"),
            BindingKind::Ethernet => write!(f, "ethernet"),
        }
    }
}

/// Ordered list of filters applied to one interface direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterBinding {
    pub kind: BindingKind,
    pub interface: String,
    pub direction: Direction,
    pub filters: Vec<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dynamic_filters: Vec<u32>,
}

impl FilterBinding {
    fn from_match(m: &MatchResult) -> Result<Self> {
        let kind = BindingKind::from_pattern(&m.pattern)
            .ok_or_else(|| Error::UnknownPattern(m.pattern.clone()))?;
        Ok(Self {
            kind,
            interface: m.require("interface")?.to_ascii_lowercase(),
            direction: Direction::parse(m.require("direction")?)?,
            filters: m.int_list("filters")?,
            dynamic_filters: m.int_list("dynamic_filters")?,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.kind == BindingKind::Ethernet && !self.dynamic_filters.is_empty() {
            return Err(Error::validation(
                "dynamic_filters",
                self.describe(),
                "ethernet bindings take no dynamic filters",
            ));
        }
        if self.filters.is_empty() && !self.dynamic_filters.is_empty() {
            return Err(Error::validation(
                "filters",
                self.describe(),
                "dynamic filters need at least one static filter",
            ));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{} {} {}", self.kind, self.interface, self.direction)
    }

    fn key_values(&self) -> IndexMap<String, String> {
        values([
            ("interface", self.interface.clone()),
            ("direction", self.direction.to_string()),
        ])
    }
}

fn as_binding(record: &DomainRecord) -> Result<&FilterBinding> {
    match record {
        DomainRecord::FilterBinding(b) => Ok(b),
        other => Err(wrong_family("filter_binding", other)),
    }
}

/// Builder and synthesizer for interface bindings.
pub struct FilterBindingFamily;

impl RecordFamily for FilterBindingFamily {
    fn name(&self) -> &'static str {
        "filter_binding"
    }

    fn build(&self, matches: &[MatchResult], _cx: &FamilyContext<'_>) -> BuildOutput {
        let mut bindings: IndexMap<(BindingKind, String, Direction), FilterBinding> =
            IndexMap::new();
        let mut diagnostics = Vec::new();
        for m in matches.iter().filter(|m| !m.is_no_form()) {
            match FilterBinding::from_match(m) {
                Ok(b) => {
                    bindings.insert((b.kind, b.interface.clone(), b.direction), b);
                }
                Err(e) => diagnostics.push(diagnose(m, &e)),
            }
        }
        (
            bindings
                .into_values()
                .map(DomainRecord::FilterBinding)
                .collect(),
            diagnostics,
        )
    }

    fn canonicalize(&self, record: &DomainRecord, _cx: &FamilyContext<'_>) -> Result<DomainRecord> {
        let b = as_binding(record)?;
        Ok(DomainRecord::FilterBinding(FilterBinding {
            interface: b.interface.to_ascii_lowercase(),
            ..b.clone()
        }))
    }

    fn synthesize(
        &self,
        desired: &DomainRecord,
        previous: Option<&DomainRecord>,
        cx: &FamilyContext<'_>,
    ) -> Result<Vec<Command>> {
        let desired = as_binding(desired)?;
        let previous = previous.map(as_binding).transpose()?;
        if previous == Some(desired) {
            return Ok(Vec::new());
        }
        desired.validate()?;

        // an empty list unbinds the direction
        if desired.filters.is_empty() {
            return match previous {
                Some(_) => self.delete(&DomainRecord::FilterBinding(desired.clone()), cx),
                None => Ok(Vec::new()),
            };
        }

        let mut v = desired.key_values();
        v.insert("filters".into(), join_numbers(&desired.filters));
        if !desired.dynamic_filters.is_empty() {
            v.insert("dynamic_filters".into(), join_numbers(&desired.dynamic_filters));
        }
        Ok(vec![cx.commands().set(desired.kind.pattern(), &v)?])
    }

    fn delete(&self, record: &DomainRecord, cx: &FamilyContext<'_>) -> Result<Vec<Command>> {
        let b = as_binding(record)?;
        Ok(vec![cx.commands().no(b.kind.pattern(), &b.key_values())?])
    }

    fn show_command(&self, record: &DomainRecord) -> String {
        match as_binding(record) {
            Ok(b) => format!("show config | grep \"{} {}\"", b.kind, b.interface),
            Err(_) => "show config".to_string(),
        }
    }
}
