//! Dynamic (stateful inspection) filters.

use super::ip_filter::IpVersion;
use super::{diagnose, wrong_family, BuildOutput, Endpoint, FamilyContext, RecordFamily};
use crate::error::Result;
use crate::matcher::MatchResult;
use crate::normalize::{Normalizer, ADDRESS, DYNAMIC_PROTOCOL, SWITCH};
use crate::record::DomainRecord;
use crate::synth::{values, Command};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// `ip filter dynamic` / `ipv6 filter dynamic`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicFilter {
    pub version: IpVersion,
    pub number: u32,
    pub source: Endpoint,
    pub destination: Endpoint,
    /// Application protocol in canonical spelling (`dns`, `www`, ...)
    pub protocol: String,
    #[serde(default)]
    pub syslog: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
}

impl DynamicFilter {
    fn from_match(m: &MatchResult, normalizer: &Normalizer) -> Result<Self> {
        let version = if m.pattern.starts_with("ipv6") {
            IpVersion::V6
        } else {
            IpVersion::V4
        };
        Ok(Self {
            version,
            number: m.require_int("number")?,
            source: Endpoint::address(m.require("source")?, normalizer)?,
            destination: Endpoint::address(m.require("destination")?, normalizer)?,
            protocol: normalizer.canonical_text(DYNAMIC_PROTOCOL, m.require("protocol")?)?,
            syslog: match m.get("syslog") {
                Some(raw) => normalizer.to_bool(SWITCH, raw)?,
                None => false,
            },
            timeout: m.int("timeout")?,
        })
    }

    fn pattern(&self) -> &'static str {
        match self.version {
            IpVersion::V4 => "ip_filter_dynamic",
            IpVersion::V6 => "ipv6_filter_dynamic",
        }
    }

    fn render_values(&self, normalizer: &Normalizer) -> Result<IndexMap<String, String>> {
        let mut v = values([
            ("number", self.number.to_string()),
            ("source", self.source.spelling().to_string()),
            ("destination", self.destination.spelling().to_string()),
            ("protocol", self.protocol.clone()),
            ("syslog", normalizer.bool_spelling(SWITCH, self.syslog)?),
        ]);
        if let Some(timeout) = self.timeout {
            v.insert("timeout".into(), timeout.to_string());
        }
        Ok(v)
    }
}

fn as_dynamic(record: &DomainRecord) -> Result<&DynamicFilter> {
    match record {
        DomainRecord::DynamicFilter(f) => Ok(f),
        other => Err(wrong_family("dynamic_filter", other)),
    }
}

/// Builder and synthesizer for dynamic filters.
pub struct DynamicFilterFamily;

impl RecordFamily for DynamicFilterFamily {
    fn name(&self) -> &'static str {
        "dynamic_filter"
    }

    fn build(&self, matches: &[MatchResult], cx: &FamilyContext<'_>) -> BuildOutput {
        let mut filters: IndexMap<(IpVersion, u32), DynamicFilter> = IndexMap::new();
        let mut diagnostics = Vec::new();
        for m in matches.iter().filter(|m| !m.is_no_form()) {
            match DynamicFilter::from_match(m, cx.normalizer) {
                Ok(f) => {
                    filters.insert((f.version, f.number), f);
                }
                Err(e) => diagnostics.push(diagnose(m, &e)),
            }
        }
        (
            filters
                .into_values()
                .map(DomainRecord::DynamicFilter)
                .collect(),
            diagnostics,
        )
    }

    fn canonicalize(&self, record: &DomainRecord, cx: &FamilyContext<'_>) -> Result<DomainRecord> {
        let f = as_dynamic(record)?;
        Ok(DomainRecord::DynamicFilter(DynamicFilter {
            source: f.source.canonical(ADDRESS, cx.normalizer)?,
            destination: f.destination.canonical(ADDRESS, cx.normalizer)?,
            protocol: cx.normalizer.canonical_text(DYNAMIC_PROTOCOL, &f.protocol)?,
            ..f.clone()
        }))
    }

    fn synthesize(
        &self,
        desired: &DomainRecord,
        previous: Option<&DomainRecord>,
        cx: &FamilyContext<'_>,
    ) -> Result<Vec<Command>> {
        let desired = as_dynamic(desired)?;
        let previous = previous.map(as_dynamic).transpose()?;
        if previous == Some(desired) {
            return Ok(Vec::new());
        }

        let mut commands = Vec::new();
        // dropping the timeout needs a clean redefinition
        if previous.is_some_and(|p| p.timeout.is_some() && desired.timeout.is_none()) {
            commands.push(cx.commands().no(
                desired.pattern(),
                &values([("number", desired.number.to_string())]),
            )?);
        }
        commands.push(
            cx.commands()
                .set(desired.pattern(), &desired.render_values(cx.normalizer)?)?,
        );
        Ok(commands)
    }

    fn delete(&self, record: &DomainRecord, cx: &FamilyContext<'_>) -> Result<Vec<Command>> {
        let f = as_dynamic(record)?;
        Ok(vec![cx
            .commands()
            .no(f.pattern(), &values([("number", f.number.to_string())]))?])
    }
}
