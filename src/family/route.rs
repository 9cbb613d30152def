//! Static routes.

use super::{diagnose, wrong_family, BuildOutput, FamilyContext, RecordFamily};
use crate::error::{Error, Result};
use crate::matcher::MatchResult;
use crate::normalize::{Normalizer, ADDRESS, ROUTE_DESTINATION};
use crate::record::DomainRecord;
use crate::synth::{join_numbers, values, Command, CommandBuilder};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

const DEFAULT_WEIGHT: u32 = 1;

fn default_weight() -> u32 {
    DEFAULT_WEIGHT
}

/// One gateway of a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextHop {
    /// `pp 1`, `tunnel 2`, `dhcp lan2`, `null`, `loopback` or an address
    pub gateway: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keepalive: Option<u32>,
    #[serde(default)]
    pub hide: bool,
}

impl NextHop {
    pub fn new(gateway: impl Into<String>) -> Self {
        Self {
            gateway: gateway.into(),
            weight: DEFAULT_WEIGHT,
            filters: Vec::new(),
            keepalive: None,
            hide: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRoute {
    /// Canonical prefix; `default` for 0.0.0.0/0
    pub destination: String,
    pub hops: Vec<NextHop>,
}

fn canonical_gateway(raw: &str, normalizer: &Normalizer) -> Result<String> {
    let words: Vec<&str> = raw.split_whitespace().collect();
    match words.as_slice() {
        [kind, target] => Ok(format!(
            "{} {}",
            kind.to_ascii_lowercase(),
            target.to_ascii_lowercase()
        )),
        [single] => normalizer.canonical_text(ADDRESS, single),
        _ => Err(Error::validation(
            "gateway",
            "ip route",
            format!("'{}' is not a gateway", raw),
        )),
    }
}

fn hop_from_match(m: &MatchResult, normalizer: &Normalizer) -> Result<NextHop> {
    Ok(NextHop {
        gateway: canonical_gateway(m.require("gateway")?, normalizer)?,
        weight: m.int("weight")?.unwrap_or(DEFAULT_WEIGHT),
        filters: m.int_list("filters")?,
        keepalive: m.int("keepalive")?,
        hide: m.flag("hide"),
    })
}

/// Folds one `ip route` line (or its no-form) into the routes read so far.
fn apply(
    m: &MatchResult,
    routes: &mut IndexMap<String, StaticRoute>,
    normalizer: &Normalizer,
) -> Result<()> {
    let destination = normalizer.canonical_text(ROUTE_DESTINATION, m.require("destination")?)?;
    if m.is_no_form() {
        match m.get("gateway") {
            Some(gw) => {
                let gateway = canonical_gateway(gw, normalizer)?;
                if let Some(route) = routes.get_mut(&destination) {
                    route.hops.retain(|h| h.gateway != gateway);
                }
            }
            None => {
                routes.shift_remove(&destination);
            }
        }
        return Ok(());
    }
    let hop = hop_from_match(m, normalizer)?;
    let route = routes
        .entry(destination.clone())
        .or_insert_with(|| StaticRoute {
            destination,
            hops: Vec::new(),
        });
    match route.hops.iter().position(|h| h.gateway == hop.gateway) {
        Some(i) => route.hops[i] = hop,
        None => route.hops.push(hop),
    }
    Ok(())
}

fn as_route(record: &DomainRecord) -> Result<&StaticRoute> {
    match record {
        DomainRecord::StaticRoute(r) => Ok(r),
        other => Err(wrong_family("static_route", other)),
    }
}

fn set_hop(b: &CommandBuilder<'_>, destination: &str, hop: &NextHop) -> Result<Command> {
    let mut v = values([
        ("destination", destination.to_string()),
        ("gateway", hop.gateway.clone()),
        ("weight", hop.weight.to_string()),
    ]);
    if !hop.filters.is_empty() {
        v.insert("filters".into(), join_numbers(&hop.filters));
    }
    if let Some(keepalive) = hop.keepalive {
        v.insert("keepalive".into(), keepalive.to_string());
    }
    if hop.hide {
        v.insert("hide".into(), "hide".to_string());
    }
    b.set("ip_route", &v)
}

fn no_hop(b: &CommandBuilder<'_>, destination: &str, gateway: &str) -> Result<Command> {
    b.no(
        "ip_route",
        &values([
            ("destination", destination.to_string()),
            ("gateway", gateway.to_string()),
        ]),
    )
}

impl StaticRoute {
    pub fn validate(&self) -> Result<()> {
        if self.hops.is_empty() {
            return Err(Error::validation(
                "hops",
                &self.destination,
                "a route needs at least one gateway",
            ));
        }
        for hop in &self.hops {
            if !(1..=255).contains(&hop.weight) {
                return Err(Error::validation(
                    "weight",
                    &self.destination,
                    format!("{} is outside 1-255", hop.weight),
                ));
            }
        }
        Ok(())
    }
}

/// Builder and synthesizer for `ip route`.
pub struct StaticRouteFamily;

impl RecordFamily for StaticRouteFamily {
    fn name(&self) -> &'static str {
        "static_route"
    }

    fn build(&self, matches: &[MatchResult], cx: &FamilyContext<'_>) -> BuildOutput {
        let mut routes: IndexMap<String, StaticRoute> = IndexMap::new();
        let mut diagnostics = Vec::new();
        for m in matches {
            if let Err(e) = apply(m, &mut routes, cx.normalizer) {
                diagnostics.push(diagnose(m, &e));
            }
        }
        (
            routes
                .into_values()
                .filter(|r| !r.hops.is_empty())
                .map(DomainRecord::StaticRoute)
                .collect(),
            diagnostics,
        )
    }

    fn canonicalize(&self, record: &DomainRecord, cx: &FamilyContext<'_>) -> Result<DomainRecord> {
        let route = as_route(record)?;
        let hops = route
            .hops
            .iter()
            .map(|h| -> Result<NextHop> {
                Ok(NextHop {
                    gateway: canonical_gateway(&h.gateway, cx.normalizer)?,
                    ..h.clone()
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(DomainRecord::StaticRoute(StaticRoute {
            destination: cx
                .normalizer
                .canonical_text(ROUTE_DESTINATION, &route.destination)?,
            hops,
        }))
    }

    fn synthesize(
        &self,
        desired: &DomainRecord,
        previous: Option<&DomainRecord>,
        cx: &FamilyContext<'_>,
    ) -> Result<Vec<Command>> {
        let desired = as_route(desired)?;
        let previous = previous.map(as_route).transpose()?;
        if previous == Some(desired) {
            return Ok(Vec::new());
        }
        desired.validate()?;

        let b = cx.commands();
        let dest = desired.destination.as_str();
        let old_hops: &[NextHop] = previous.map(|p| p.hops.as_slice()).unwrap_or(&[]);
        let mut commands = Vec::new();

        for old in old_hops {
            if !desired.hops.iter().any(|h| h.gateway == old.gateway) {
                commands.push(no_hop(&b, dest, &old.gateway)?);
            }
        }
        for hop in &desired.hops {
            match old_hops.iter().find(|h| h.gateway == hop.gateway) {
                Some(old) if old == hop => continue,
                Some(_) => commands.push(no_hop(&b, dest, &hop.gateway)?),
                None => {}
            }
            commands.push(set_hop(&b, dest, hop)?);
        }
        Ok(commands)
    }

    fn delete(&self, record: &DomainRecord, cx: &FamilyContext<'_>) -> Result<Vec<Command>> {
        let route = as_route(record)?;
        Ok(vec![cx.commands().no(
            "ip_route",
            &values([("destination", route.destination.clone())]),
        )?])
    }

    fn show_command(&self, record: &DomainRecord) -> String {
        match as_route(record) {
            Ok(r) => format!("show config | grep \"ip route {}\"", r.destination),
            Err(_) => "show config".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::matcher::{MatchOutcome, Matcher};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn fixture() -> (Arc<Catalog>, Normalizer) {
        (Arc::new(Catalog::builtin().unwrap()), Normalizer::builtin())
    }

    fn build(lines: &[&str]) -> BuildOutput {
        let (catalog, normalizer) = fixture();
        let matcher = Matcher::new(catalog.clone(), &normalizer).unwrap();
        let matches: Vec<MatchResult> = lines
            .iter()
            .map(|l| match matcher.match_text(l) {
                MatchOutcome::Matched(m) => m,
                other => panic!("{}: {:?}", l, other),
            })
            .collect();
        StaticRouteFamily.build(&matches, &FamilyContext::new(&catalog, &normalizer))
    }

    fn texts(desired: &StaticRoute, previous: Option<&StaticRoute>) -> Vec<String> {
        let (catalog, normalizer) = fixture();
        let cx = FamilyContext::new(&catalog, &normalizer);
        let previous = previous.cloned().map(DomainRecord::StaticRoute);
        StaticRouteFamily
            .synthesize(&DomainRecord::StaticRoute(desired.clone()), previous.as_ref(), &cx)
            .unwrap()
            .into_iter()
            .map(|c| c.text)
            .collect()
    }

    #[test]
    fn test_hops_grouped_by_destination() {
        let (records, diags) = build(&[
            "ip route 10.0.0.0/255.0.0.0 gateway 192.168.1.254 weight 2",
            "ip route default gateway pp 1",
            "ip route 10.0.0.0/8 gateway tunnel 1 hide",
        ]);
        assert!(diags.is_empty());
        assert_eq!(records.len(), 2);
        let route = as_route(&records[0]).unwrap();
        assert_eq!(route.destination, "10.0.0.0/8");
        assert_eq!(route.hops.len(), 2);
        assert_eq!(route.hops[0].weight, 2);
        assert!(route.hops[1].hide);
        assert_eq!(as_route(&records[1]).unwrap().hops[0].gateway, "pp 1");
    }

    #[test]
    fn test_default_weight_is_omitted() {
        let route = StaticRoute {
            destination: "default".to_string(),
            hops: vec![NextHop::new("pp 1")],
        };
        assert_eq!(texts(&route, None), vec!["ip route default gateway pp 1"]);
        assert!(texts(&route, Some(&route)).is_empty());
    }

    #[test]
    fn test_hop_changes() {
        let old = StaticRoute {
            destination: "172.16.0.0/16".to_string(),
            hops: vec![NextHop::new("192.168.1.1"), NextHop::new("192.168.1.2")],
        };
        let mut new = old.clone();
        new.hops.remove(1);
        new.hops[0].keepalive = Some(1);
        new.hops.push(NextHop::new("tunnel 2"));
        assert_eq!(
            texts(&new, Some(&old)),
            vec![
                "no ip route 172.16.0.0/16 gateway 192.168.1.2",
                "no ip route 172.16.0.0/16 gateway 192.168.1.1",
                "ip route 172.16.0.0/16 gateway 192.168.1.1 keepalive 1",
                "ip route 172.16.0.0/16 gateway tunnel 2",
            ]
        );
    }

    #[test]
    fn test_empty_hops_rejected_and_delete() {
        let (catalog, normalizer) = fixture();
        let cx = FamilyContext::new(&catalog, &normalizer);
        let route = DomainRecord::StaticRoute(StaticRoute {
            destination: "10.1.0.0/16".to_string(),
            hops: Vec::new(),
        });
        assert!(StaticRouteFamily.synthesize(&route, None, &cx).is_err());
        assert_eq!(
            StaticRouteFamily.delete(&route, &cx).unwrap()[0].text,
            "no ip route 10.1.0.0/16"
        );
    }
}
