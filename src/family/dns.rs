//! DNS client, resolver and forwarder settings.
//!
//! The device holds one DNS configuration, so the family produces at most
//! one record (keyed `dns`). It is only produced when at least one `dns`
//! line was read.

use super::{diagnose, wrong_family, BuildOutput, FamilyContext, RecordFamily};
use crate::error::{Error, Result};
use crate::matcher::MatchResult;
use crate::normalize::{Normalizer, ADDRESS, DNS_SERVICE, SWITCH};
use crate::record::DomainRecord;
use crate::synth::{values, Command, CommandBuilder};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

const MAX_NAME_SERVERS: usize = 3;
const MAX_SELECT_SERVERS: usize = 2;

fn default_true() -> bool {
    true
}

fn default_record_type() -> String {
    "a".to_string()
}

/// An upstream server of a `dns server select` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectServer {
    pub address: String,
    #[serde(default)]
    pub edns: bool,
}

/// Domain-based forwarding rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSelect {
    pub id: u32,
    pub servers: Vec<SelectServer>,
    #[serde(default = "default_record_type")]
    pub record_type: String,
    pub query_pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrict_pp: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticHost {
    pub hostname: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsConfig {
    #[serde(default = "default_true")]
    pub domain_lookup: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_name: Option<String>,
    #[serde(default)]
    pub name_servers: Vec<String>,
    #[serde(default)]
    pub server_selects: Vec<ServerSelect>,
    #[serde(default)]
    pub static_hosts: Vec<StaticHost>,
    /// Recursive resolver service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_address_spoof: Option<bool>,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            domain_lookup: true,
            domain_name: None,
            name_servers: Vec::new(),
            server_selects: Vec::new(),
            static_hosts: Vec::new(),
            service: None,
            private_address_spoof: None,
        }
    }
}

impl DnsConfig {
    fn apply(&mut self, m: &MatchResult, normalizer: &Normalizer) -> Result<()> {
        let negated = m.is_no_form();
        match m.pattern.as_str() {
            "dns_domain_lookup" => {
                self.domain_lookup = !negated && normalizer.to_bool(SWITCH, m.require("lookup")?)?;
            }
            "dns_domain" => {
                self.domain_name = if negated {
                    None
                } else {
                    Some(m.require("domain_name")?.to_string())
                };
            }
            "dns_server" => {
                self.name_servers = m
                    .list("servers")
                    .into_iter()
                    .map(|s| normalizer.canonical_text(ADDRESS, s))
                    .collect::<Result<_>>()?;
            }
            "dns_server_select" => {
                let id = m.require_int("id")?;
                self.server_selects.retain(|s| s.id != id);
                if !negated {
                    self.server_selects.push(ServerSelect::from_match(m, normalizer)?);
                }
            }
            "dns_static" => {
                let hostname = m.require("hostname")?;
                self.static_hosts.retain(|h| h.hostname != hostname);
                if !negated {
                    self.static_hosts.push(StaticHost {
                        hostname: hostname.to_string(),
                        address: normalizer.canonical_text(ADDRESS, m.require("address")?)?,
                    });
                }
            }
            "dns_service" => {
                self.service = if negated {
                    None
                } else {
                    Some(normalizer.to_bool(DNS_SERVICE, m.require("service")?)?)
                };
            }
            "dns_private_spoof" => {
                self.private_address_spoof = if negated {
                    None
                } else {
                    Some(normalizer.to_bool(SWITCH, m.require("spoof")?)?)
                };
            }
            other => return Err(Error::UnknownPattern(other.to_string())),
        }
        Ok(())
    }

    fn canonical(&self, normalizer: &Normalizer) -> Result<Self> {
        let address = |a: &String| normalizer.canonical_text(ADDRESS, a);
        Ok(Self {
            name_servers: self.name_servers.iter().map(address).collect::<Result<_>>()?,
            server_selects: self
                .server_selects
                .iter()
                .map(|s| -> Result<ServerSelect> {
                    Ok(ServerSelect {
                        servers: s
                            .servers
                            .iter()
                            .map(|srv| -> Result<SelectServer> {
                                Ok(SelectServer {
                                    address: address(&srv.address)?,
                                    edns: srv.edns,
                                })
                            })
                            .collect::<Result<_>>()?,
                        record_type: s.record_type.to_ascii_lowercase(),
                        ..s.clone()
                    })
                })
                .collect::<Result<_>>()?,
            static_hosts: self
                .static_hosts
                .iter()
                .map(|h| -> Result<StaticHost> {
                    Ok(StaticHost {
                        hostname: h.hostname.clone(),
                        address: address(&h.address)?,
                    })
                })
                .collect::<Result<_>>()?,
            ..self.clone()
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.name_servers.len() > MAX_NAME_SERVERS {
            return Err(Error::validation(
                "name_servers",
                "dns",
                format!("at most {} servers allowed", MAX_NAME_SERVERS),
            ));
        }
        for select in &self.server_selects {
            if select.servers.is_empty() || select.servers.len() > MAX_SELECT_SERVERS {
                return Err(Error::validation(
                    "servers",
                    format!("dns server select {}", select.id),
                    format!("1 to {} servers required", MAX_SELECT_SERVERS),
                ));
            }
            if select.id == 0 || select.id > 65535 {
                return Err(Error::validation(
                    "id",
                    format!("dns server select {}", select.id),
                    "must be within 1-65535",
                ));
            }
        }
        Ok(())
    }
}

impl ServerSelect {
    fn from_match(m: &MatchResult, normalizer: &Normalizer) -> Result<Self> {
        let mut servers = vec![SelectServer {
            address: normalizer.canonical_text(ADDRESS, m.require("server1")?)?,
            edns: normalizer.to_bool(SWITCH, m.get("edns1").unwrap_or("off"))?,
        }];
        if let Some(second) = m.get("server2") {
            servers.push(SelectServer {
                address: normalizer.canonical_text(ADDRESS, second)?,
                edns: normalizer.to_bool(SWITCH, m.get("edns2").unwrap_or("off"))?,
            });
        }
        Ok(Self {
            id: m.require_int("id")?,
            servers,
            record_type: m.get("record_type").unwrap_or("a").to_ascii_lowercase(),
            query_pattern: m.require("query_pattern")?.to_string(),
            original_sender: m.get("original_sender").map(str::to_string),
            restrict_pp: m.int("restrict_pp")?,
        })
    }

    fn render_values(&self, normalizer: &Normalizer) -> Result<IndexMap<String, String>> {
        let mut v = values([
            ("id", self.id.to_string()),
            ("record_type", self.record_type.clone()),
            ("query_pattern", self.query_pattern.clone()),
        ]);
        for (i, server) in self.servers.iter().enumerate() {
            v.insert(format!("server{}", i + 1), server.address.clone());
            v.insert(
                format!("edns{}", i + 1),
                normalizer.bool_spelling(SWITCH, server.edns)?,
            );
        }
        if let Some(sender) = &self.original_sender {
            v.insert("original_sender".into(), sender.clone());
        }
        if let Some(pp) = self.restrict_pp {
            v.insert("restrict_pp".into(), pp.to_string());
        }
        Ok(v)
    }
}

fn as_dns(record: &DomainRecord) -> Result<&DnsConfig> {
    match record {
        DomainRecord::Dns(d) => Ok(d),
        other => Err(wrong_family("dns", other)),
    }
}

fn no_select(b: &CommandBuilder<'_>, id: u32) -> Result<Command> {
    b.no("dns_server_select", &values([("id", id.to_string())]))
}

fn no_static(b: &CommandBuilder<'_>, hostname: &str) -> Result<Command> {
    b.no("dns_static", &values([("hostname", hostname.to_string())]))
}

/// Builder and synthesizer for the DNS configuration.
pub struct DnsFamily;

impl RecordFamily for DnsFamily {
    fn name(&self) -> &'static str {
        "dns"
    }

    fn build(&self, matches: &[MatchResult], cx: &FamilyContext<'_>) -> BuildOutput {
        if matches.is_empty() {
            return (Vec::new(), Vec::new());
        }
        let mut config = DnsConfig::default();
        let mut diagnostics = Vec::new();
        for m in matches {
            if let Err(e) = config.apply(m, cx.normalizer) {
                diagnostics.push(diagnose(m, &e));
            }
        }
        (vec![DomainRecord::Dns(config)], diagnostics)
    }

    fn canonicalize(&self, record: &DomainRecord, cx: &FamilyContext<'_>) -> Result<DomainRecord> {
        Ok(DomainRecord::Dns(as_dns(record)?.canonical(cx.normalizer)?))
    }

    fn synthesize(
        &self,
        desired: &DomainRecord,
        previous: Option<&DomainRecord>,
        cx: &FamilyContext<'_>,
    ) -> Result<Vec<Command>> {
        let desired = as_dns(desired)?;
        let empty = DnsConfig::default();
        let previous = previous.map(as_dns).transpose()?.unwrap_or(&empty);
        if previous == desired {
            return Ok(Vec::new());
        }
        desired.validate()?;

        let b = cx.commands();
        let n = cx.normalizer;
        let mut commands = Vec::new();

        if desired.domain_lookup != previous.domain_lookup {
            // lookup off is written as the no-form
            commands.push(if desired.domain_lookup {
                b.set("dns_domain_lookup", &values([("lookup", "on".to_string())]))?
            } else {
                b.no("dns_domain_lookup", &IndexMap::new())?
            });
        }

        if desired.domain_name != previous.domain_name {
            commands.push(match &desired.domain_name {
                Some(name) => b.set("dns_domain", &values([("domain_name", name.clone())]))?,
                None => b.no("dns_domain", &IndexMap::new())?,
            });
        }

        if desired.name_servers != previous.name_servers {
            commands.push(if desired.name_servers.is_empty() {
                b.no("dns_server", &IndexMap::new())?
            } else {
                b.set("dns_server", &values([("servers", desired.name_servers.join(" "))]))?
            });
        }

        for old in &previous.server_selects {
            if !desired.server_selects.iter().any(|s| s.id == old.id) {
                commands.push(no_select(&b, old.id)?);
            }
        }
        for select in &desired.server_selects {
            if !previous.server_selects.contains(select) {
                commands.push(b.set("dns_server_select", &select.render_values(n)?)?);
            }
        }

        for old in &previous.static_hosts {
            if !desired.static_hosts.iter().any(|h| h.hostname == old.hostname) {
                commands.push(no_static(&b, &old.hostname)?);
            }
        }
        for host in &desired.static_hosts {
            match previous.static_hosts.iter().find(|h| h.hostname == host.hostname) {
                Some(old) if old == host => continue,
                Some(_) => commands.push(no_static(&b, &host.hostname)?),
                None => {}
            }
            commands.push(b.set(
                "dns_static",
                &values([
                    ("hostname", host.hostname.clone()),
                    ("address", host.address.clone()),
                ]),
            )?);
        }

        if desired.service != previous.service {
            commands.push(match desired.service {
                Some(on) => b.set(
                    "dns_service",
                    &values([("service", n.bool_spelling(DNS_SERVICE, on)?)]),
                )?,
                None => b.no("dns_service", &IndexMap::new())?,
            });
        }

        if desired.private_address_spoof != previous.private_address_spoof {
            commands.push(match desired.private_address_spoof {
                Some(on) => b.set(
                    "dns_private_spoof",
                    &values([("spoof", n.bool_spelling(SWITCH, on)?)]),
                )?,
                None => b.no("dns_private_spoof", &IndexMap::new())?,
            });
        }

        Ok(commands)
    }

    fn delete(&self, record: &DomainRecord, cx: &FamilyContext<'_>) -> Result<Vec<Command>> {
        let current = as_dns(record)?;
        let b = cx.commands();
        let mut commands = Vec::new();
        if !current.domain_lookup {
            commands.push(b.set("dns_domain_lookup", &values([("lookup", "on".to_string())]))?);
        }
        if current.domain_name.is_some() {
            commands.push(b.no("dns_domain", &IndexMap::new())?);
        }
        if !current.name_servers.is_empty() {
            commands.push(b.no("dns_server", &IndexMap::new())?);
        }
        for select in &current.server_selects {
            commands.push(no_select(&b, select.id)?);
        }
        for host in &current.static_hosts {
            commands.push(no_static(&b, &host.hostname)?);
        }
        if current.service.is_some() {
            commands.push(b.no("dns_service", &IndexMap::new())?);
        }
        if current.private_address_spoof.is_some() {
            commands.push(b.no("dns_private_spoof", &IndexMap::new())?);
        }
        Ok(commands)
    }

    fn show_command(&self, _record: &DomainRecord) -> String {
        "show config | grep dns".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::matcher::{MatchOutcome, Matcher};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    struct Fixture {
        catalog: Arc<Catalog>,
        normalizer: Normalizer,
        matcher: Matcher,
    }

    impl Fixture {
        fn new() -> Self {
            let catalog = Arc::new(Catalog::builtin().unwrap());
            let normalizer = Normalizer::builtin();
            let matcher = Matcher::new(catalog.clone(), &normalizer).unwrap();
            Self {
                catalog,
                normalizer,
                matcher,
            }
        }

        fn cx(&self) -> FamilyContext<'_> {
            FamilyContext::new(&self.catalog, &self.normalizer)
        }

        fn build(&self, lines: &[&str]) -> DnsConfig {
            let matches: Vec<MatchResult> = lines
                .iter()
                .map(|l| match self.matcher.match_text(l) {
                    MatchOutcome::Matched(m) => m,
                    other => panic!("{}: {:?}", l, other),
                })
                .collect();
            let (records, diags) = DnsFamily.build(&matches, &self.cx());
            assert!(diags.is_empty(), "{:?}", diags);
            as_dns(&records[0]).unwrap().clone()
        }

        fn texts(&self, desired: &DnsConfig, previous: Option<&DnsConfig>) -> Vec<String> {
            let previous = previous.cloned().map(DomainRecord::Dns);
            DnsFamily
                .synthesize(&DomainRecord::Dns(desired.clone()), previous.as_ref(), &self.cx())
                .unwrap()
                .into_iter()
                .map(|c| c.text)
                .collect()
        }
    }

    // ========================================================================
    // Build
    // ========================================================================

    #[test]
    fn test_no_lines_no_record() {
        let f = Fixture::new();
        let (records, _) = DnsFamily.build(&[], &f.cx());
        assert!(records.is_empty());
    }

    #[test]
    fn test_service_spellings_are_equivalent() {
        let f = Fixture::new();
        assert_eq!(f.build(&["dns service on"]).service, Some(true));
        assert_eq!(f.build(&["dns service recursive"]).service, Some(true));
        assert_eq!(f.build(&["dns service off"]).service, Some(false));
    }

    #[test]
    fn test_select_keeps_edns_per_server() {
        let f = Fixture::new();
        let dns = f.build(&["dns server select 2 10.0.0.1 10.0.0.2 edns=on any corp.example restrict pp 1"]);
        let select = &dns.server_selects[0];
        assert_eq!(
            select.servers,
            vec![
                SelectServer {
                    address: "10.0.0.1".to_string(),
                    edns: false
                },
                SelectServer {
                    address: "10.0.0.2".to_string(),
                    edns: true
                },
            ]
        );
        assert_eq!(select.record_type, "any");
        assert_eq!(select.restrict_pp, Some(1));
    }

    #[test]
    fn test_lookup_off_spellings() {
        let f = Fixture::new();
        assert!(!f.build(&["dns domain lookup off"]).domain_lookup);
        assert!(!f.build(&["no dns domain lookup"]).domain_lookup);
        assert!(f.build(&["dns domain example.jp"]).domain_lookup);
    }

    // ========================================================================
    // Synthesize
    // ========================================================================

    #[test]
    fn test_create_uses_canonical_spellings() {
        let f = Fixture::new();
        let dns = f.build(&[
            "dns domain lookup off",
            "dns server 8.8.8.8 8.8.4.4",
            "dns service on",
            "dns static router.home 192.168.1.1",
        ]);
        assert_eq!(
            f.texts(&dns, None),
            vec![
                "no dns domain lookup",
                "dns server 8.8.8.8 8.8.4.4",
                "dns static router.home 192.168.1.1",
                "dns service recursive",
            ]
        );
        assert!(f.texts(&dns, Some(&dns)).is_empty());
    }

    #[test]
    fn test_changed_static_host_is_redefined() {
        let f = Fixture::new();
        let old = f.build(&["dns static a.home 10.0.0.1", "dns static b.home 10.0.0.2"]);
        let mut new = old.clone();
        new.static_hosts[0].address = "10.0.0.9".to_string();
        new.static_hosts.remove(1);
        assert_eq!(
            f.texts(&new, Some(&old)),
            vec!["no dns static b.home", "no dns static a.home", "dns static a.home 10.0.0.9"]
        );
    }

    #[test]
    fn test_select_default_record_type_omitted() {
        let f = Fixture::new();
        let dns = f.build(&["dns server select 1 192.168.1.1 a example.local"]);
        assert_eq!(
            f.texts(&dns, None),
            vec!["dns server select 1 192.168.1.1 example.local"]
        );
    }

    #[test]
    fn test_delete_restores_defaults() {
        let f = Fixture::new();
        let dns = f.build(&["dns domain lookup off", "dns server select 1 192.168.1.1 example.local"]);
        let texts: Vec<String> = DnsFamily
            .delete(&DomainRecord::Dns(dns), &f.cx())
            .unwrap()
            .into_iter()
            .map(|c| c.text)
            .collect();
        assert_eq!(texts, vec!["dns domain lookup on", "no dns server select 1"]);
    }
}
