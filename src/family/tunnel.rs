//! Tunnel interfaces and their IPsec settings.
//!
//! A tunnel is configured inside a `tunnel select <n>` context. Sub-option
//! lines carry the source line of the select that opened their context
//! (`MatchResult::context_line`), which is how they are attached to the
//! right tunnel. `tunnel enable <n>` is a global command.

use super::{diagnose, wrong_family, BuildOutput, Direction, FamilyContext, RecordFamily};
use crate::error::{Error, Result};
use crate::matcher::MatchResult;
use crate::normalize::{Normalizer, ADDRESS, SWITCH};
use crate::record::{DerivableField, DomainRecord};
use crate::synth::{join_numbers, values, Command, CommandBuilder};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

pub const DEFAULT_ENCAPSULATION: &str = "ipsec";

fn default_encapsulation() -> String {
    DEFAULT_ENCAPSULATION.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaPolicy {
    pub encryption: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// IKE keepalive with optional dead peer detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IkeKeepalive {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpd_interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpd_retry: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelIpsec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sa_policy_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sa_policy: Option<SaPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<String>,
    /// Write-only: the device never shows it back
    #[serde(default)]
    pub pre_shared_key: DerivableField<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keepalive: Option<IkeKeepalive>,
}

impl TunnelIpsec {
    fn is_empty(&self) -> bool {
        self == &TunnelIpsec::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelFilters {
    pub filters: Vec<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dynamic_filters: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tunnel {
    pub id: u32,
    #[serde(default = "default_encapsulation")]
    pub encapsulation: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipsec: Option<TunnelIpsec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_filter_in: Option<TunnelFilters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_filter_out: Option<TunnelFilters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_mss_limit: Option<String>,
}

impl Tunnel {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            encapsulation: default_encapsulation(),
            enabled: false,
            description: None,
            ipsec: None,
            secure_filter_in: None,
            secure_filter_out: None,
            tcp_mss_limit: None,
        }
    }

    fn ipsec_mut(&mut self) -> &mut TunnelIpsec {
        self.ipsec.get_or_insert_with(TunnelIpsec::default)
    }

    fn filters_mut(&mut self, direction: Direction) -> &mut Option<TunnelFilters> {
        match direction {
            Direction::In => &mut self.secure_filter_in,
            Direction::Out => &mut self.secure_filter_out,
        }
    }

    /// IKE settings are keyed by gateway id, which must be the tunnel's own.
    fn check_gateway(&self, m: &MatchResult) -> Result<()> {
        match m.int("gateway_id")? {
            Some(gateway) if gateway != self.id => Err(Error::validation(
                "gateway_id",
                format!("tunnel {}", self.id),
                format!("gateway {} does not belong to this tunnel", gateway),
            )),
            _ => Ok(()),
        }
    }

    /// Applies one sub-option line.
    fn apply(&mut self, m: &MatchResult, normalizer: &Normalizer) -> Result<()> {
        let negated = m.is_no_form();
        self.check_gateway(m)?;
        match m.pattern.as_str() {
            "tunnel_encapsulation" => {
                self.encapsulation = if negated {
                    default_encapsulation()
                } else {
                    m.require("encapsulation")?.to_ascii_lowercase()
                };
            }
            "tunnel_description" => {
                self.description = if negated {
                    None
                } else {
                    Some(m.require("description")?.to_string())
                };
            }
            "ipsec_tunnel" => {
                let id = m.require_int("sa_policy_id")?;
                if negated {
                    self.ipsec_mut().sa_policy_id = None;
                } else {
                    self.ipsec_mut().sa_policy_id = Some(id);
                }
            }
            "ipsec_sa_policy" => {
                let id = m.require_int("sa_policy_id")?;
                let tunnel_id = self.id;
                let ipsec = self.ipsec_mut();
                if negated {
                    ipsec.sa_policy = None;
                    return Ok(());
                }
                match ipsec.sa_policy_id {
                    Some(bound) if bound != id => {
                        return Err(Error::validation(
                            "sa_policy_id",
                            format!("tunnel {}", tunnel_id),
                            format!("policy {} is not the tunnel's policy {}", id, bound),
                        ))
                    }
                    Some(_) => {}
                    None => ipsec.sa_policy_id = Some(id),
                }
                ipsec.sa_policy = Some(SaPolicy {
                    encryption: m.require("encryption")?.to_string(),
                    hash: m.get("hash").map(str::to_string),
                });
            }
            "ipsec_ike_local_address" => {
                self.ipsec_mut().local_address = if negated {
                    None
                } else {
                    Some(normalizer.canonical_text(ADDRESS, m.require("local_address")?)?)
                };
            }
            "ipsec_ike_remote_address" => {
                self.ipsec_mut().remote_address = if negated {
                    None
                } else {
                    Some(normalizer.canonical_text(ADDRESS, m.require("remote_address")?)?)
                };
            }
            "ipsec_ike_pre_shared_key" => {
                self.ipsec_mut().pre_shared_key = if negated {
                    DerivableField::Absent
                } else {
                    DerivableField::NotDerivable
                };
            }
            "ipsec_ike_keepalive" => {
                self.ipsec_mut().keepalive = if negated {
                    None
                } else {
                    Some(IkeKeepalive {
                        enabled: normalizer.to_bool(SWITCH, m.require("keepalive")?)?,
                        dpd_interval: m.int("dpd_interval")?,
                        dpd_retry: m.int("dpd_retry")?,
                    })
                };
            }
            "ip_tunnel_secure_filter" => {
                let direction = Direction::parse(m.require("direction")?)?;
                *self.filters_mut(direction) = if negated {
                    None
                } else {
                    Some(TunnelFilters {
                        filters: m.int_list("filters")?,
                        dynamic_filters: m.int_list("dynamic_filters")?,
                    })
                };
            }
            "ip_tunnel_tcp_mss" => {
                self.tcp_mss_limit = if negated {
                    None
                } else {
                    Some(m.require("mss")?.to_ascii_lowercase())
                };
            }
            other => return Err(Error::UnknownPattern(other.to_string())),
        }
        Ok(())
    }

    fn tidy(mut self) -> Self {
        if self.ipsec.as_ref().is_some_and(TunnelIpsec::is_empty) {
            self.ipsec = None;
        }
        self
    }

    fn canonical(&self, normalizer: &Normalizer) -> Result<Self> {
        let mut tunnel = self.clone();
        tunnel.encapsulation = tunnel.encapsulation.to_ascii_lowercase();
        tunnel.tcp_mss_limit = tunnel.tcp_mss_limit.map(|m| m.to_ascii_lowercase());
        if let Some(ipsec) = tunnel.ipsec.as_mut() {
            if let Some(local) = &ipsec.local_address {
                ipsec.local_address = Some(normalizer.canonical_text(ADDRESS, local)?);
            }
            if let Some(remote) = &ipsec.remote_address {
                ipsec.remote_address = Some(normalizer.canonical_text(ADDRESS, remote)?);
            }
        }
        Ok(tunnel.tidy())
    }

    pub fn validate(&self) -> Result<()> {
        let record = format!("tunnel {}", self.id);
        if let Some(ipsec) = &self.ipsec {
            if ipsec.sa_policy.is_some() && ipsec.sa_policy_id.is_none() {
                return Err(Error::validation(
                    "sa_policy_id",
                    record,
                    "an SA policy needs a policy id",
                ));
            }
            if let Some(k) = &ipsec.keepalive {
                if k.dpd_retry.is_some() && k.dpd_interval.is_none() {
                    return Err(Error::validation(
                        "dpd_retry",
                        record,
                        "a DPD retry count needs an interval",
                    ));
                }
            }
        }
        for filters in [&self.secure_filter_in, &self.secure_filter_out]
            .into_iter()
            .flatten()
        {
            if filters.filters.is_empty() {
                return Err(Error::validation(
                    "secure_filter",
                    record,
                    "a secure filter binding needs at least one filter",
                ));
            }
        }
        Ok(())
    }
}

fn as_tunnel(record: &DomainRecord) -> Result<&Tunnel> {
    match record {
        DomainRecord::Tunnel(t) => Ok(t),
        other => Err(wrong_family("tunnel", other)),
    }
}

/// Emits `set` when the value changed to something, `no` when it went away.
fn field<T: PartialEq>(
    out: &mut Vec<Command>,
    desired: Option<&T>,
    previous: Option<&T>,
    set: impl FnOnce(&T) -> Result<Command>,
    no: impl FnOnce() -> Result<Command>,
) -> Result<()> {
    if desired == previous {
        return Ok(());
    }
    match desired {
        Some(value) => out.push(set(value)?),
        None => out.push(no()?),
    }
    Ok(())
}

fn synthesize_ipsec(
    out: &mut Vec<Command>,
    b: &CommandBuilder<'_>,
    id: u32,
    desired: &TunnelIpsec,
    previous: &TunnelIpsec,
) -> Result<()> {
    let gateway = id.to_string();

    let policy_moved = desired.sa_policy_id != previous.sa_policy_id;
    if policy_moved {
        if let Some(old) = previous.sa_policy_id {
            out.push(b.no("ipsec_tunnel", &values([("sa_policy_id", old.to_string())]))?);
        }
        if let Some(new) = desired.sa_policy_id {
            out.push(b.set("ipsec_tunnel", &values([("sa_policy_id", new.to_string())]))?);
        }
    }

    if desired.sa_policy != previous.sa_policy || policy_moved {
        if let (Some(old_id), Some(_)) = (previous.sa_policy_id, &previous.sa_policy) {
            if desired.sa_policy.is_none() || policy_moved {
                out.push(b.no(
                    "ipsec_sa_policy",
                    &values([("sa_policy_id", old_id.to_string())]),
                )?);
            }
        }
        if let (Some(policy_id), Some(policy)) = (desired.sa_policy_id, &desired.sa_policy) {
            let mut v = values([
                ("sa_policy_id", policy_id.to_string()),
                ("gateway_id", gateway.clone()),
                ("encryption", policy.encryption.clone()),
            ]);
            if let Some(hash) = &policy.hash {
                v.insert("hash".into(), hash.clone());
            }
            out.push(b.set("ipsec_sa_policy", &v)?);
        }
    }

    let no_gateway = |pattern: &str| b.no(pattern, &values([("gateway_id", gateway.clone())]));

    field(
        out,
        desired.local_address.as_ref(),
        previous.local_address.as_ref(),
        |a| {
            b.set(
                "ipsec_ike_local_address",
                &values([("gateway_id", gateway.clone()), ("local_address", a.clone())]),
            )
        },
        || no_gateway("ipsec_ike_local_address"),
    )?;
    field(
        out,
        desired.remote_address.as_ref(),
        previous.remote_address.as_ref(),
        |a| {
            b.set(
                "ipsec_ike_remote_address",
                &values([("gateway_id", gateway.clone()), ("remote_address", a.clone())]),
            )
        },
        || no_gateway("ipsec_ike_remote_address"),
    )?;

    // a key the device would not show cannot be compared, only replaced
    match (&desired.pre_shared_key, &previous.pre_shared_key) {
        (DerivableField::Known(key), DerivableField::Known(old)) if key == old => {}
        (DerivableField::Known(_), DerivableField::NotDerivable) => {}
        (DerivableField::Known(key), _) => out.push(b.set(
            "ipsec_ike_pre_shared_key",
            &values([("gateway_id", gateway.clone()), ("pre_shared_key", key.clone())]),
        )?),
        (DerivableField::Absent, DerivableField::Absent) => {}
        (DerivableField::Absent, _) => out.push(no_gateway("ipsec_ike_pre_shared_key")?),
        (DerivableField::NotDerivable, _) => {}
    }

    field(
        out,
        desired.keepalive.as_ref(),
        previous.keepalive.as_ref(),
        |k| {
            let mut v = values([
                ("gateway_id", gateway.clone()),
                ("keepalive", if k.enabled { "on" } else { "off" }.to_string()),
            ]);
            if let Some(interval) = k.dpd_interval {
                v.insert("dpd_interval".into(), interval.to_string());
            }
            if let Some(retry) = k.dpd_retry {
                v.insert("dpd_retry".into(), retry.to_string());
            }
            b.set("ipsec_ike_keepalive", &v)
        },
        || no_gateway("ipsec_ike_keepalive"),
    )?;
    Ok(())
}

fn ipsec_teardown(out: &mut Vec<Command>, b: &CommandBuilder<'_>, id: u32, ipsec: &TunnelIpsec) -> Result<()> {
    let gateway = values([("gateway_id", id.to_string())]);
    if let Some(policy_id) = ipsec.sa_policy_id {
        let policy = values([("sa_policy_id", policy_id.to_string())]);
        out.push(b.no("ipsec_tunnel", &policy)?);
        if ipsec.sa_policy.is_some() {
            out.push(b.no("ipsec_sa_policy", &policy)?);
        }
    }
    if ipsec.local_address.is_some() {
        out.push(b.no("ipsec_ike_local_address", &gateway)?);
    }
    if ipsec.remote_address.is_some() {
        out.push(b.no("ipsec_ike_remote_address", &gateway)?);
    }
    if !ipsec.pre_shared_key.is_absent() {
        out.push(b.no("ipsec_ike_pre_shared_key", &gateway)?);
    }
    if ipsec.keepalive.is_some() {
        out.push(b.no("ipsec_ike_keepalive", &gateway)?);
    }
    Ok(())
}

/// Builder and synthesizer for tunnels.
pub struct TunnelFamily;

impl TunnelFamily {
    fn apply(
        m: &MatchResult,
        tunnels: &mut IndexMap<u32, Tunnel>,
        selects: &mut HashMap<usize, u32>,
        normalizer: &Normalizer,
    ) -> Result<()> {
        match m.pattern.as_str() {
            "tunnel_select" => {
                let id = m.require_int("tunnel_id")?;
                if m.is_no_form() {
                    tunnels.shift_remove(&id);
                } else {
                    selects.insert(m.line, id);
                    tunnels.entry(id).or_insert_with(|| Tunnel::new(id));
                }
            }
            "tunnel_enable" => {
                let id = m.require_int("tunnel_id")?;
                tunnels.entry(id).or_insert_with(|| Tunnel::new(id)).enabled = !m.is_no_form();
            }
            _ => {
                let id = m
                    .context_line
                    .and_then(|line| selects.get(&line).copied())
                    .ok_or_else(|| {
                        Error::validation(&m.pattern, "tunnel", "sub-option outside a tunnel select")
                    })?;
                tunnels
                    .entry(id)
                    .or_insert_with(|| Tunnel::new(id))
                    .apply(m, normalizer)?;
            }
        }
        Ok(())
    }
}

impl RecordFamily for TunnelFamily {
    fn name(&self) -> &'static str {
        "tunnel"
    }

    fn build(&self, matches: &[MatchResult], cx: &FamilyContext<'_>) -> BuildOutput {
        let mut tunnels: IndexMap<u32, Tunnel> = IndexMap::new();
        let mut selects: HashMap<usize, u32> = HashMap::new();
        let mut diagnostics = Vec::new();
        for m in matches {
            if let Err(e) = Self::apply(m, &mut tunnels, &mut selects, cx.normalizer) {
                debug!(line = m.line, error = %e, "Tunnel line rejected");
                diagnostics.push(diagnose(m, &e));
            }
        }
        (
            tunnels
                .into_values()
                .map(|t| DomainRecord::Tunnel(t.tidy()))
                .collect(),
            diagnostics,
        )
    }

    fn canonicalize(&self, record: &DomainRecord, cx: &FamilyContext<'_>) -> Result<DomainRecord> {
        Ok(DomainRecord::Tunnel(as_tunnel(record)?.canonical(cx.normalizer)?))
    }

    fn synthesize(
        &self,
        desired: &DomainRecord,
        previous: Option<&DomainRecord>,
        cx: &FamilyContext<'_>,
    ) -> Result<Vec<Command>> {
        let desired = as_tunnel(desired)?;
        let previous = previous.map(as_tunnel).transpose()?;
        if previous == Some(desired) {
            return Ok(Vec::new());
        }
        desired.validate()?;

        let id = desired.id;
        let b = cx.commands();
        let blank = Tunnel::new(id);
        let prev = previous.unwrap_or(&blank);
        let mut body = Vec::new();

        if desired.encapsulation != prev.encapsulation {
            body.push(b.set(
                "tunnel_encapsulation",
                &values([("encapsulation", desired.encapsulation.clone())]),
            )?);
        }
        field(
            &mut body,
            desired.description.as_ref(),
            prev.description.as_ref(),
            |d| b.set("tunnel_description", &values([("description", d.clone())])),
            || b.no("tunnel_description", &IndexMap::new()),
        )?;

        let no_ipsec = TunnelIpsec::default();
        synthesize_ipsec(
            &mut body,
            &b,
            id,
            desired.ipsec.as_ref().unwrap_or(&no_ipsec),
            prev.ipsec.as_ref().unwrap_or(&no_ipsec),
        )?;

        for (direction, wanted, had) in [
            (Direction::In, &desired.secure_filter_in, &prev.secure_filter_in),
            (Direction::Out, &desired.secure_filter_out, &prev.secure_filter_out),
        ] {
            let dir = direction.to_string();
            field(
                &mut body,
                wanted.as_ref(),
                had.as_ref(),
                |f| {
                    let mut v = values([
                        ("direction", dir.clone()),
                        ("filters", join_numbers(&f.filters)),
                    ]);
                    if !f.dynamic_filters.is_empty() {
                        v.insert("dynamic_filters".into(), join_numbers(&f.dynamic_filters));
                    }
                    b.set("ip_tunnel_secure_filter", &v)
                },
                || b.no("ip_tunnel_secure_filter", &values([("direction", dir.clone())])),
            )?;
        }

        field(
            &mut body,
            desired.tcp_mss_limit.as_ref(),
            prev.tcp_mss_limit.as_ref(),
            |mss| b.set("ip_tunnel_tcp_mss", &values([("mss", mss.clone())])),
            || b.no("ip_tunnel_tcp_mss", &IndexMap::new()),
        )?;

        let tunnel_id = values([("tunnel_id", id.to_string())]);
        if desired.enabled != prev.enabled {
            body.push(if desired.enabled {
                b.set("tunnel_enable", &tunnel_id)?
            } else {
                b.no("tunnel_enable", &tunnel_id)?
            });
        }

        if previous.is_some() && body.is_empty() {
            return Ok(Vec::new());
        }
        let mut commands = vec![b.set("tunnel_select", &tunnel_id)?];
        commands.extend(body);
        Ok(commands)
    }

    fn delete(&self, record: &DomainRecord, cx: &FamilyContext<'_>) -> Result<Vec<Command>> {
        let tunnel = as_tunnel(record)?;
        let b = cx.commands();
        let tunnel_id = values([("tunnel_id", tunnel.id.to_string())]);

        let mut commands = vec![b.set("tunnel_select", &tunnel_id)?];
        if tunnel.enabled {
            commands.push(b.no("tunnel_enable", &tunnel_id)?);
        }
        if let Some(ipsec) = &tunnel.ipsec {
            ipsec_teardown(&mut commands, &b, tunnel.id, ipsec)?;
        }
        commands.push(b.no("tunnel_select", &tunnel_id)?);
        Ok(commands)
    }

    fn show_command(&self, record: &DomainRecord) -> String {
        match as_tunnel(record) {
            Ok(t) => format!("show config tunnel {}", t.id),
            Err(_) => "show config".to_string(),
        }
    }
}
