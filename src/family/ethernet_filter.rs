//! Ethernet (layer 2) filters.

use super::ip_filter::FilterAction;
use super::{diagnose, wrong_family, BuildOutput, Endpoint, FamilyContext, RecordFamily};
use crate::error::{Error, Result};
use crate::matcher::MatchResult;
use crate::normalize::{Normalizer, MAC};
use crate::record::DomainRecord;
use crate::synth::{values, Command};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Highest Ethernet filter number the device accepts.
pub const MAX_NUMBER: u32 = 512;

/// What an Ethernet filter matches on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EthernetRule {
    Mac {
        source: Endpoint,
        destination: Endpoint,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ether_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        vlan: Option<u16>,
    },
    /// Hosts with (or without) a DHCP binding
    Dhcp {
        bind: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<u32>,
    },
}

impl EthernetRule {
    pub fn canonical(&self, normalizer: &Normalizer) -> Result<Self> {
        Ok(match self {
            EthernetRule::Mac {
                source,
                destination,
                ether_type,
                vlan,
            } => EthernetRule::Mac {
                source: source.canonical(MAC, normalizer)?,
                destination: destination.canonical(MAC, normalizer)?,
                ether_type: ether_type.as_ref().map(|t| t.to_ascii_lowercase()),
                vlan: *vlan,
            },
            dhcp => dhcp.clone(),
        })
    }
}

/// A numbered Ethernet filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthernetFilter {
    pub number: u32,
    pub action: FilterAction,
    pub rule: EthernetRule,
}

impl EthernetFilter {
    fn from_match(m: &MatchResult, normalizer: &Normalizer) -> Result<Self> {
        let rule = if m.pattern == "ethernet_filter_dhcp" {
            EthernetRule::Dhcp {
                bind: m.require("dhcp_type")? == "dhcp-bind",
                scope: m.int("scope")?,
            }
        } else {
            let vlan = m
                .int("vlan_id")?
                .map(|v| {
                    u16::try_from(v)
                        .map_err(|_| Error::validation("vlan_id", &m.pattern, "out of range"))
                })
                .transpose()?;
            EthernetRule::Mac {
                source: Endpoint::parse(m.require("source_mac")?, MAC, normalizer)?,
                destination: Endpoint::parse(m.require("destination_mac")?, MAC, normalizer)?,
                ether_type: m.get("ether_type").map(str::to_ascii_lowercase),
                vlan,
            }
        };
        let filter = Self {
            number: m.require_int("number")?,
            action: FilterAction::parse(m.require("action")?, normalizer)?,
            rule,
        };
        filter.validate()?;
        Ok(filter)
    }

    pub fn validate(&self) -> Result<()> {
        if self.number == 0 || self.number > MAX_NUMBER {
            return Err(Error::validation(
                "number",
                format!("ethernet filter {}", self.number),
                format!("{} is outside 1..={}", self.number, MAX_NUMBER),
            ));
        }
        if self.action.is_restrict() {
            return Err(Error::validation(
                "action",
                format!("ethernet filter {}", self.number),
                "restrict is not available for ethernet filters",
            ));
        }
        Ok(())
    }

    fn render(&self) -> (&'static str, IndexMap<String, String>) {
        let mut v = values([
            ("number", self.number.to_string()),
            ("action", self.action.spelling().to_string()),
        ]);
        match &self.rule {
            EthernetRule::Mac {
                source,
                destination,
                ether_type,
                vlan,
            } => {
                v.insert("source_mac".into(), source.spelling().to_string());
                v.insert("destination_mac".into(), destination.spelling().to_string());
                if let Some(t) = ether_type {
                    v.insert("ether_type".into(), t.clone());
                }
                if let Some(id) = vlan {
                    v.insert("vlan_id".into(), id.to_string());
                }
                ("ethernet_filter", v)
            }
            EthernetRule::Dhcp { bind, scope } => {
                let kind = if *bind { "dhcp-bind" } else { "dhcp-not-bind" };
                v.insert("dhcp_type".into(), kind.to_string());
                if let Some(s) = scope {
                    v.insert("scope".into(), s.to_string());
                }
                ("ethernet_filter_dhcp", v)
            }
        }
    }
}

fn as_ethernet(record: &DomainRecord) -> Result<&EthernetFilter> {
    match record {
        DomainRecord::EthernetFilter(f) => Ok(f),
        other => Err(wrong_family("ethernet_filter", other)),
    }
}

/// Builder and synthesizer for `ethernet filter`.
pub struct EthernetFilterFamily;

impl RecordFamily for EthernetFilterFamily {
    fn name(&self) -> &'static str {
        "ethernet_filter"
    }

    fn build(&self, matches: &[MatchResult], cx: &FamilyContext<'_>) -> BuildOutput {
        let mut filters: IndexMap<u32, EthernetFilter> = IndexMap::new();
        let mut diagnostics = Vec::new();
        for m in matches.iter().filter(|m| !m.is_no_form()) {
            match EthernetFilter::from_match(m, cx.normalizer) {
                Ok(f) => {
                    filters.insert(f.number, f);
                }
                Err(e) => diagnostics.push(diagnose(m, &e)),
            }
        }
        (
            filters
                .into_values()
                .map(DomainRecord::EthernetFilter)
                .collect(),
            diagnostics,
        )
    }

    fn canonicalize(&self, record: &DomainRecord, cx: &FamilyContext<'_>) -> Result<DomainRecord> {
        let f = as_ethernet(record)?;
        Ok(DomainRecord::EthernetFilter(EthernetFilter {
            rule: f.rule.canonical(cx.normalizer)?,
            ..f.clone()
        }))
    }

    fn synthesize(
        &self,
        desired: &DomainRecord,
        previous: Option<&DomainRecord>,
        cx: &FamilyContext<'_>,
    ) -> Result<Vec<Command>> {
        let desired = as_ethernet(desired)?;
        let previous = previous.map(as_ethernet).transpose()?;
        if previous == Some(desired) {
            return Ok(Vec::new());
        }
        desired.validate()?;
        let (pattern, values) = desired.render();
        Ok(vec![cx.commands().set(pattern, &values)?])
    }

    fn delete(&self, record: &DomainRecord, cx: &FamilyContext<'_>) -> Result<Vec<Command>> {
        let f = as_ethernet(record)?;
        Ok(vec![cx
            .commands()
            .no("ethernet_filter", &values([("number", f.number.to_string())]))?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::matcher::{MatchOutcome, Matcher};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn round_trip(line: &str) -> (DomainRecord, String) {
        let catalog = Arc::new(Catalog::builtin().unwrap());
        let normalizer = Normalizer::builtin();
        let matcher = Matcher::new(catalog.clone(), &normalizer).unwrap();
        let cx = FamilyContext::new(&catalog, &normalizer);
        let m = match matcher.match_text(line) {
            MatchOutcome::Matched(m) => m,
            other => panic!("{:?}", other),
        };
        let (records, diags) = EthernetFilterFamily.build(&[m], &cx);
        assert!(diags.is_empty(), "{:?}", diags);
        let commands = EthernetFilterFamily.synthesize(&records[0], None, &cx).unwrap();
        (records[0].clone(), commands[0].text.clone())
    }

    #[test]
    fn test_mac_rule_is_canonical() {
        let (record, text) =
            round_trip("ethernet filter 1 pass-nolog 00-A0-DE-00-00-01 * 0x0800 vlan 10");
        let f = as_ethernet(&record).unwrap();
        assert_eq!(f.action, FilterAction::Pass);
        assert_eq!(text, "ethernet filter 1 pass 00:a0:de:00:00:01 * 0x0800 vlan 10");
    }

    #[test]
    fn test_dhcp_rule() {
        let (record, text) = round_trip("ethernet filter 10 reject-log dhcp-not-bind 2");
        assert_eq!(
            as_ethernet(&record).unwrap().rule,
            EthernetRule::Dhcp {
                bind: false,
                scope: Some(2)
            }
        );
        assert_eq!(text, "ethernet filter 10 reject-log dhcp-not-bind 2");
    }

    #[test]
    fn test_delete_and_restrict_rejected() {
        let catalog = Catalog::builtin().unwrap();
        let normalizer = Normalizer::builtin();
        let cx = FamilyContext::new(&catalog, &normalizer);
        let mut filter = EthernetFilter {
            number: 7,
            action: FilterAction::Pass,
            rule: EthernetRule::Dhcp {
                bind: true,
                scope: None,
            },
        };
        let record = DomainRecord::EthernetFilter(filter.clone());
        assert_eq!(
            EthernetFilterFamily.delete(&record, &cx).unwrap()[0].text,
            "no ethernet filter 7"
        );

        filter.action = FilterAction::Restrict;
        let err = EthernetFilterFamily
            .synthesize(&DomainRecord::EthernetFilter(filter), None, &cx)
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
