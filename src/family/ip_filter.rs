//! IP and IPv6 static filters.

use super::{diagnose, wrong_family, BuildOutput, Endpoint, FamilyContext, RecordFamily};
use crate::error::{Error, Result};
use crate::matcher::MatchResult;
use crate::normalize::{Normalizer, ADDRESS, FILTER_ACTION, PROTOCOL};
use crate::record::DomainRecord;
use crate::synth::{values, Command};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest IP and IPv6 filter number the device accepts.
pub const MAX_NUMBER: u32 = 21474836;

/// Address family of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    /// Leading keyword of the version's commands.
    pub fn keyword(self) -> &'static str {
        match self {
            IpVersion::V4 => "ip",
            IpVersion::V6 => "ipv6",
        }
    }

    fn filter_pattern(self) -> &'static str {
        match self {
            IpVersion::V4 => "ip_filter",
            IpVersion::V6 => "ipv6_filter",
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpVersion::V4 => write!(f, "v4"),
            IpVersion::V6 => write!(f, "v6"),
        }
    }
}

/// Filter action in canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterAction {
    Pass,
    PassLog,
    Reject,
    RejectLog,
    Restrict,
    RestrictLog,
}

impl FilterAction {
    /// Reads any accepted spelling.
    pub fn parse(raw: &str, normalizer: &Normalizer) -> Result<Self> {
        match normalizer.canonical_text(FILTER_ACTION, raw)?.as_str() {
            "pass" => Ok(FilterAction::Pass),
            "pass-log" => Ok(FilterAction::PassLog),
            "reject" => Ok(FilterAction::Reject),
            "reject-log" => Ok(FilterAction::RejectLog),
            "restrict" => Ok(FilterAction::Restrict),
            "restrict-log" => Ok(FilterAction::RestrictLog),
            other => Err(Error::validation("action", "filter", format!("unknown action '{}'", other))),
        }
    }

    pub fn spelling(self) -> &'static str {
        match self {
            FilterAction::Pass => "pass",
            FilterAction::PassLog => "pass-log",
            FilterAction::Reject => "reject",
            FilterAction::RejectLog => "reject-log",
            FilterAction::Restrict => "restrict",
            FilterAction::RestrictLog => "restrict-log",
        }
    }

    pub fn is_restrict(self) -> bool {
        matches!(self, FilterAction::Restrict | FilterAction::RestrictLog)
    }
}

impl fmt::Display for FilterAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.spelling())
    }
}

/// The match-and-act part of an IP filter, shared with access lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRule {
    pub action: FilterAction,
    pub source: Endpoint,
    pub destination: Endpoint,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_port: Option<String>,
    #[serde(default)]
    pub established: bool,
}

impl IpRule {
    fn from_match(m: &MatchResult, normalizer: &Normalizer) -> Result<Self> {
        let rule = Self {
            action: FilterAction::parse(m.require("action")?, normalizer)?,
            source: Endpoint::address(m.require("source")?, normalizer)?,
            destination: Endpoint::address(m.require("destination")?, normalizer)?,
            protocol: normalizer.canonical_text(PROTOCOL, m.require("protocol")?)?,
            source_port: canonical_port(m.get("source_port")),
            destination_port: canonical_port(m.get("destination_port")),
            established: m.flag("established"),
        };
        Ok(rule)
    }

    /// The rule with every field in canonical spelling.
    pub fn canonical(&self, normalizer: &Normalizer) -> Result<Self> {
        Ok(Self {
            action: self.action,
            source: self.source.canonical(ADDRESS, normalizer)?,
            destination: self.destination.canonical(ADDRESS, normalizer)?,
            protocol: normalizer.canonical_text(PROTOCOL, &self.protocol)?,
            source_port: canonical_port(self.source_port.as_deref()),
            destination_port: canonical_port(self.destination_port.as_deref()),
            established: self.established,
        })
    }

    pub fn validate(&self, record: &str) -> Result<()> {
        if self.established && self.protocol != "tcp" {
            return Err(Error::validation(
                "established",
                record,
                format!("only valid with tcp, not '{}'", self.protocol),
            ));
        }
        if self.protocol.is_empty() {
            return Err(Error::validation("protocol", record, "must not be empty"));
        }
        Ok(())
    }

    fn render_values(&self, number: u32) -> IndexMap<String, String> {
        let mut v = values([
            ("number", number.to_string()),
            ("action", self.action.spelling().to_string()),
            ("source", self.source.spelling().to_string()),
            ("destination", self.destination.spelling().to_string()),
            ("protocol", self.protocol.clone()),
        ]);
        match (&self.source_port, &self.destination_port) {
            (Some(s), Some(d)) => {
                v.insert("source_port".into(), s.clone());
                v.insert("destination_port".into(), d.clone());
            }
            (Some(s), None) => {
                v.insert("source_port".into(), s.clone());
            }
            (None, Some(d)) => {
                v.insert("source_port".into(), "*".into());
                v.insert("destination_port".into(), d.clone());
            }
            (None, None) => {}
        }
        if self.established {
            v.insert("established".into(), "established".into());
        }
        v
    }
}

/// `*` and an omitted port mean the same thing.
fn canonical_port(raw: Option<&str>) -> Option<String> {
    match raw {
        None | Some("*") | Some("") => None,
        Some(p) => Some(p.to_ascii_lowercase()),
    }
}

/// A numbered IP or IPv6 filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpFilter {
    pub version: IpVersion,
    pub number: u32,
    pub rule: IpRule,
}

impl IpFilter {
    pub fn new(version: IpVersion, number: u32, rule: IpRule) -> Self {
        Self {
            version,
            number,
            rule,
        }
    }

    fn from_match(m: &MatchResult, normalizer: &Normalizer) -> Result<Self> {
        let version = if m.pattern == IpVersion::V6.filter_pattern() {
            IpVersion::V6
        } else {
            IpVersion::V4
        };
        let filter = Self {
            version,
            number: m.require_int("number")?,
            rule: IpRule::from_match(m, normalizer)?,
        };
        filter.rule.validate(&m.pattern)?;
        Ok(filter)
    }

    fn number_values(&self) -> IndexMap<String, String> {
        values([("number", self.number.to_string())])
    }
}

fn as_ip_filter(record: &DomainRecord) -> Result<&IpFilter> {
    match record {
        DomainRecord::IpFilter(f) => Ok(f),
        other => Err(wrong_family("ip_filter", other)),
    }
}

/// Builder and synthesizer for `ip filter` / `ipv6 filter`.
pub struct IpFilterFamily;

impl RecordFamily for IpFilterFamily {
    fn name(&self) -> &'static str {
        "ip_filter"
    }

    fn build(&self, matches: &[MatchResult], cx: &FamilyContext<'_>) -> BuildOutput {
        let mut filters: IndexMap<(IpVersion, u32), IpFilter> = IndexMap::new();
        let mut diagnostics = Vec::new();

        for m in matches.iter().filter(|m| !m.is_no_form()) {
            match IpFilter::from_match(m, cx.normalizer) {
                Ok(filter) => {
                    filters.insert((filter.version, filter.number), filter);
                }
                Err(e) => diagnostics.push(diagnose(m, &e)),
            }
        }

        let records = filters.into_values().map(DomainRecord::IpFilter).collect();
        (records, diagnostics)
    }

    fn canonicalize(&self, record: &DomainRecord, cx: &FamilyContext<'_>) -> Result<DomainRecord> {
        let filter = as_ip_filter(record)?;
        Ok(DomainRecord::IpFilter(IpFilter {
            rule: filter.rule.canonical(cx.normalizer)?,
            ..filter.clone()
        }))
    }

    fn synthesize(
        &self,
        desired: &DomainRecord,
        previous: Option<&DomainRecord>,
        cx: &FamilyContext<'_>,
    ) -> Result<Vec<Command>> {
        let desired = as_ip_filter(desired)?;
        let previous = previous.map(as_ip_filter).transpose()?;
        if previous == Some(desired) {
            return Ok(Vec::new());
        }
        desired.rule.validate(&record_name(desired))?;

        // the device overwrites a filter number in place
        let command = cx.commands().set(
            desired.version.filter_pattern(),
            &desired.rule.render_values(desired.number),
        )?;
        Ok(vec![command])
    }

    fn delete(&self, record: &DomainRecord, cx: &FamilyContext<'_>) -> Result<Vec<Command>> {
        let filter = as_ip_filter(record)?;
        Ok(vec![cx
            .commands()
            .no(filter.version.filter_pattern(), &filter.number_values())?])
    }

    fn show_command(&self, record: &DomainRecord) -> String {
        match record {
            DomainRecord::IpFilter(f) => {
                format!("show config | grep \"{} filter {}\"", f.version.keyword(), f.number)
            }
            _ => "show config".to_string(),
        }
    }
}

fn record_name(filter: &IpFilter) -> String {
    format!("{} filter {}", filter.version.keyword(), filter.number)
}
