//! Diff equivalence normalizer.
//!
//! The device accepts several spellings for one semantic value (`pass` and
//! `pass-nolog`, `*` and `any`, `recursive` and `on`). Every such alias
//! decision lives in this table. Builders canonicalize what they read,
//! the matcher takes its enum alternatives from it, and synthesizers ask it
//! for the one spelling they emit.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv6Addr;

/// Field key for filter actions shared by IP and Ethernet filters.
pub const FILTER_ACTION: &str = "filter_action";
/// Field key for plain `on`/`off` switches.
pub const SWITCH: &str = "switch";
/// Field key for `dns service`.
pub const DNS_SERVICE: &str = "dns_service";
/// Field key for the `administrator=` user attribute.
pub const ADMINISTRATOR: &str = "administrator";
/// Field key for dynamic filter application protocols.
pub const DYNAMIC_PROTOCOL: &str = "dynamic_protocol";
/// Field key for filter source/destination addresses.
pub const ADDRESS: &str = "address";
/// Field key for Ethernet filter MAC addresses.
pub const MAC: &str = "mac";
/// Field key for static route destinations.
pub const ROUTE_DESTINATION: &str = "route_destination";
/// Field key for filter protocols.
pub const PROTOCOL: &str = "protocol";

/// The canonical internal form of a field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalValue {
    /// Explicit wildcard (`*`, `any`)
    Any,
    Bool(bool),
    Token(String),
}

impl CanonicalValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CanonicalValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, CanonicalValue::Any)
    }
}

/// One canonical value together with every spelling that denotes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquivalenceClass {
    pub value: CanonicalValue,
    /// The spelling synthesizers emit
    pub spelling: String,
    /// Every accepted spelling, the canonical one included
    pub aliases: Vec<String>,
}

impl EquivalenceClass {
    pub fn new(value: CanonicalValue, spelling: &str, aliases: &[&str]) -> Self {
        let mut all: Vec<String> = vec![spelling.to_string()];
        all.extend(
            aliases
                .iter()
                .filter(|a| **a != spelling)
                .map(|a| a.to_string()),
        );
        Self {
            value,
            spelling: spelling.to_string(),
            aliases: all,
        }
    }

    /// A class whose canonical value is its own spelling.
    pub fn token(spelling: &str, aliases: &[&str]) -> Self {
        Self::new(CanonicalValue::Token(spelling.to_string()), spelling, aliases)
    }

    fn accepts(&self, raw: &str) -> bool {
        self.aliases.iter().any(|a| a.eq_ignore_ascii_case(raw))
    }
}

#[derive(Debug, Clone)]
enum FieldRule {
    Table(Vec<EquivalenceClass>),
    Address,
    Mac,
    RouteDestination,
    Lowercase,
}

static BUILTIN: Lazy<Normalizer> = Lazy::new(Normalizer::rtx_tables);

/// Canonical value and alias table, keyed by field.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    fields: HashMap<String, FieldRule>,
}

impl Normalizer {
    /// An empty normalizer: every field passes through unchanged.
    pub fn new() -> Self {
        Self::default()
    }

    /// The equivalence classes the RTX command set needs.
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    fn rtx_tables() -> Self {
        let mut n = Self::new();

        n.set_table(
            FILTER_ACTION,
            vec![
                EquivalenceClass::token("pass", &["pass-nolog", "permit"]),
                EquivalenceClass::token("pass-log", &[]),
                EquivalenceClass::token("reject", &["reject-nolog", "deny"]),
                EquivalenceClass::token("reject-log", &[]),
                EquivalenceClass::token("restrict", &["restrict-nolog"]),
                EquivalenceClass::token("restrict-log", &[]),
            ],
        );
        n.set_table(SWITCH, on_off("on"));
        n.set_table(DNS_SERVICE, on_off("recursive"));
        n.set_table(
            ADMINISTRATOR,
            vec![
                EquivalenceClass::new(CanonicalValue::Bool(true), "on", &["1", "2"]),
                EquivalenceClass::new(CanonicalValue::Bool(false), "off", &[]),
            ],
        );
        n.set_table(
            DYNAMIC_PROTOCOL,
            vec![
                EquivalenceClass::token("dns", &["domain"]),
                EquivalenceClass::token("www", &["http"]),
                EquivalenceClass::token("https", &[]),
                EquivalenceClass::token("ftp", &[]),
                EquivalenceClass::token("tftp", &[]),
                EquivalenceClass::token("smtp", &[]),
                EquivalenceClass::token("submission", &[]),
                EquivalenceClass::token("pop3", &[]),
                EquivalenceClass::token("telnet", &[]),
                EquivalenceClass::token("ssh", &[]),
                EquivalenceClass::token("tcp", &[]),
                EquivalenceClass::token("udp", &[]),
                EquivalenceClass::token("*", &[]),
            ],
        );
        n.fields.insert(ADDRESS.to_string(), FieldRule::Address);
        n.fields.insert(MAC.to_string(), FieldRule::Mac);
        n.fields
            .insert(ROUTE_DESTINATION.to_string(), FieldRule::RouteDestination);
        n.fields.insert(PROTOCOL.to_string(), FieldRule::Lowercase);
        n
    }

    fn set_table(&mut self, field: &str, classes: Vec<EquivalenceClass>) {
        self.fields
            .insert(field.to_string(), FieldRule::Table(classes));
    }

    /// Adds a class to a table field, creating the field if needed.
    pub fn register_class(&mut self, field: &str, class: EquivalenceClass) {
        match self.fields.get_mut(field) {
            Some(FieldRule::Table(classes)) => classes.push(class),
            _ => self.set_table(field, vec![class]),
        }
    }

    /// Whether the field has an entry in the table.
    pub fn knows(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Maps a raw spelling to its canonical value.
    pub fn canonicalize(&self, field: &str, raw: &str) -> Result<CanonicalValue> {
        let raw = raw.trim();
        match self.fields.get(field) {
            None => Ok(CanonicalValue::Token(raw.to_string())),
            Some(FieldRule::Table(classes)) => classes
                .iter()
                .find(|c| c.accepts(raw))
                .map(|c| c.value.clone())
                .ok_or_else(|| {
                    let known: Vec<&str> = classes
                        .iter()
                        .flat_map(|c| c.aliases.iter().map(String::as_str))
                        .collect();
                    Error::validation(
                        field,
                        "value",
                        format!("'{}' is not one of: {}", raw, known.join(", ")),
                    )
                }),
            Some(FieldRule::Address) => Ok(normalize_address(raw)),
            Some(FieldRule::Mac) => normalize_mac(raw)
                .ok_or_else(|| Error::validation(field, "value", format!("invalid MAC '{}'", raw))),
            Some(FieldRule::RouteDestination) => normalize_destination(raw)
                .map(CanonicalValue::Token)
                .ok_or_else(|| {
                    Error::validation(field, "value", format!("invalid destination '{}'", raw))
                }),
            Some(FieldRule::Lowercase) => Ok(CanonicalValue::Token(raw.to_ascii_lowercase())),
        }
    }

    /// Canonicalizes and returns the canonical spelling in one step.
    pub fn canonical_text(&self, field: &str, raw: &str) -> Result<String> {
        let value = self.canonicalize(field, raw)?;
        self.canonical_spelling(field, &value)
    }

    /// Canonicalizes a switch-like field to a boolean.
    pub fn to_bool(&self, field: &str, raw: &str) -> Result<bool> {
        let field = if self.knows(field) { field } else { SWITCH };
        self.canonicalize(field, raw)?
            .as_bool()
            .ok_or_else(|| Error::validation(field, "value", format!("'{}' is not a switch", raw)))
    }

    /// The spelling a synthesizer emits for a canonical value.
    pub fn canonical_spelling(&self, field: &str, value: &CanonicalValue) -> Result<String> {
        match (self.fields.get(field), value) {
            (Some(FieldRule::Table(classes)), v) => classes
                .iter()
                .find(|c| &c.value == v)
                .map(|c| c.spelling.clone())
                .ok_or_else(|| {
                    Error::validation(field, "value", format!("no spelling for {:?}", v))
                }),
            (_, CanonicalValue::Any) => Ok("*".to_string()),
            (_, CanonicalValue::Token(t)) => Ok(t.clone()),
            (_, CanonicalValue::Bool(b)) => Ok(if *b { "on" } else { "off" }.to_string()),
        }
    }

    /// Spelling for a boolean in a switch-like field.
    pub fn bool_spelling(&self, field: &str, value: bool) -> Result<String> {
        let field = if self.knows(field) { field } else { SWITCH };
        self.canonical_spelling(field, &CanonicalValue::Bool(value))
    }

    /// Whether two raw spellings denote the same value.
    pub fn equivalent(&self, field: &str, a: &str, b: &str) -> bool {
        match (self.canonicalize(field, a), self.canonicalize(field, b)) {
            (Ok(a), Ok(b)) => a == b,
            _ => a == b,
        }
    }

    /// Every accepted spelling of a table field, longest first.
    pub fn spellings(&self, field: &str) -> Option<Vec<&str>> {
        match self.fields.get(field) {
            Some(FieldRule::Table(classes)) => {
                let mut all: Vec<&str> = classes
                    .iter()
                    .flat_map(|c| c.aliases.iter().map(String::as_str))
                    .collect();
                all.sort_by_key(|s| std::cmp::Reverse(s.len()));
                Some(all)
            }
            _ => None,
        }
    }
}

fn on_off(true_spelling: &str) -> Vec<EquivalenceClass> {
    vec![
        EquivalenceClass::new(CanonicalValue::Bool(true), true_spelling, &["on"]),
        EquivalenceClass::new(CanonicalValue::Bool(false), "off", &[]),
    ]
}

fn normalize_ipv4(raw: &str) -> Option<String> {
    let octets: Vec<u8> = raw
        .split('.')
        .map(|o| o.parse::<u8>().ok())
        .collect::<Option<Vec<u8>>>()?;
    if octets.len() != 4 {
        return None;
    }
    Some(format!(
        "{}.{}.{}.{}",
        octets[0], octets[1], octets[2], octets[3]
    ))
}

fn normalize_host(raw: &str) -> String {
    if let Some(v4) = normalize_ipv4(raw) {
        return v4;
    }
    if raw.contains(':') {
        if let Ok(v6) = raw.parse::<Ipv6Addr>() {
            return v6.to_string();
        }
    }
    raw.to_ascii_lowercase()
}

fn normalize_single_address(raw: &str) -> String {
    if let Some((addr, len)) = raw.split_once('/') {
        let len = len
            .parse::<u8>()
            .map(|l| l.to_string())
            .unwrap_or_else(|_| normalize_host(len));
        return format!("{}/{}", normalize_host(addr), len);
    }
    if let Some((from, to)) = raw.split_once('-') {
        if !from.is_empty() && !to.is_empty() {
            return format!("{}-{}", normalize_host(from), normalize_host(to));
        }
    }
    normalize_host(raw)
}

fn normalize_address(raw: &str) -> CanonicalValue {
    if raw == "*" || raw.eq_ignore_ascii_case("any") {
        return CanonicalValue::Any;
    }
    let parts: Vec<String> = raw.split(',').map(normalize_single_address).collect();
    CanonicalValue::Token(parts.join(","))
}

fn normalize_mac(raw: &str) -> Option<CanonicalValue> {
    if raw == "*" || raw.eq_ignore_ascii_case("any") {
        return Some(CanonicalValue::Any);
    }
    let lower = raw.to_ascii_lowercase();
    let hex: String = lower.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    let separators_only = lower
        .chars()
        .all(|c| c.is_ascii_hexdigit() || matches!(c, ':' | '-' | '.'));
    if separators_only && hex.len() == 12 {
        let octets: Vec<&str> = (0..6).map(|i| &hex[i * 2..i * 2 + 2]).collect();
        return Some(CanonicalValue::Token(octets.join(":")));
    }
    // per-octet wildcards such as 00:a0:de:*:*:*
    let octets: Vec<&str> = lower.split(|c| c == ':' || c == '-').collect();
    let valid = octets.len() == 6
        && octets
            .iter()
            .all(|o| *o == "*" || (o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit())));
    if valid {
        if octets.iter().all(|o| *o == "*") {
            return Some(CanonicalValue::Any);
        }
        return Some(CanonicalValue::Token(octets.join(":")));
    }
    None
}

fn mask_to_len(mask: &str) -> Option<u8> {
    let normalized = normalize_ipv4(mask)?;
    let bits = normalized
        .split('.')
        .filter_map(|o| o.parse::<u8>().ok())
        .fold(0u32, |acc, o| (acc << 8) | u32::from(o));
    let len = bits.leading_ones();
    // reject non-contiguous masks
    if bits.checked_shl(len).unwrap_or(0) != 0 {
        return None;
    }
    u8::try_from(len).ok()
}

fn normalize_destination(raw: &str) -> Option<String> {
    if raw.eq_ignore_ascii_case("default") {
        return Some("default".to_string());
    }
    let (addr, len) = match raw.split_once('/') {
        Some((addr, mask)) if mask.contains('.') => (addr, mask_to_len(mask)?),
        Some((addr, len)) => (addr, len.parse::<u8>().ok().filter(|l| *l <= 32)?),
        None => (raw, 32),
    };
    let addr = normalize_ipv4(addr)?;
    if addr == "0.0.0.0" && len == 0 {
        return Some("default".to_string());
    }
    Some(format!("{}/{}", addr, len))
}
