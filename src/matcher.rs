//! Line matcher.
//!
//! Every catalog syntax (canonical, aliases and no-form) is compiled once
//! into an anchored regex. Compiled syntaxes are bucketed by their leading
//! keyword so a line is only tried against patterns that could match it.

use crate::catalog::{Catalog, CommandPattern, ParamKind, Parameter, Template};
use crate::error::{Error, Result};
use crate::normalize::{Normalizer, SWITCH};
use crate::preprocess::LogicalLine;
use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

const IPV4: &str = r"\d{1,3}(?:\.\d{1,3}){3}";
const IPV6: &str = r"[0-9A-Fa-f]*:[0-9A-Fa-f:.]*";

const NAMED_PORTS: &[&str] = &[
    "ftpdata", "ftp", "telnet", "smtp", "domain", "gopher", "finger", "www", "pop3", "sunrpc",
    "ident", "ntp", "nntp", "snmptrap", "snmp", "syslog", "printer", "talk", "route", "uucp",
    "submission", "bootps", "bootpc", "tftp", "https", "ssh", "ike", "nat-t", "l2tp", "pptp",
];

/// Which spelling of a pattern matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Canonical,
    Alias(usize),
    NoForm,
}

/// A line that instantiated a catalog pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub pattern: String,
    pub family: String,
    pub variant: Variant,
    /// Raw values by parameter name, with declared defaults filled in
    pub params: IndexMap<String, String>,
    pub line: usize,
    pub text: String,
    pub indented: bool,
    /// Source line of the context select this sub-option belongs to
    pub context_line: Option<usize>,
}

impl MatchResult {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// A required value; a missing one is a validation error.
    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name).ok_or_else(|| {
            Error::validation(name, &self.pattern, format!("missing in '{}'", self.text))
        })
    }

    pub fn int(&self, name: &str) -> Result<Option<u32>> {
        self.get(name)
            .map(|v| {
                v.parse::<u32>().map_err(|_| {
                    Error::validation(name, &self.pattern, format!("'{}' is not a number", v))
                })
            })
            .transpose()
    }

    pub fn require_int(&self, name: &str) -> Result<u32> {
        self.int(name)?.ok_or_else(|| {
            Error::validation(name, &self.pattern, format!("missing in '{}'", self.text))
        })
    }

    /// Elements of a list parameter; empty when absent.
    pub fn list(&self, name: &str) -> Vec<&str> {
        self.get(name)
            .map(|v| v.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn int_list(&self, name: &str) -> Result<Vec<u32>> {
        self.list(name)
            .into_iter()
            .map(|v| {
                v.parse::<u32>().map_err(|_| {
                    Error::validation(name, &self.pattern, format!("'{}' is not a number", v))
                })
            })
            .collect()
    }

    pub fn flag(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| !v.is_empty())
    }

    pub fn is_no_form(&self) -> bool {
        self.variant == Variant::NoForm
    }
}

/// Result of matching one line.
#[derive(Debug)]
pub enum MatchOutcome {
    Matched(MatchResult),
    Unknown,
    /// Names of every pattern that matched
    Ambiguous(Vec<String>),
    /// The line matched but a value violates its declaration
    Invalid(Error),
}

#[derive(Debug)]
struct CompiledSyntax {
    pattern: usize,
    variant: Variant,
    regex: Regex,
}

/// Compiled form of the whole catalog.
#[derive(Debug)]
pub struct Matcher {
    catalog: Arc<Catalog>,
    buckets: HashMap<String, Vec<CompiledSyntax>>,
}

impl Matcher {
    /// Compiles every syntax of the catalog.
    pub fn new(catalog: Arc<Catalog>, normalizer: &Normalizer) -> Result<Self> {
        let mut buckets: HashMap<String, Vec<CompiledSyntax>> = HashMap::new();

        for (index, pattern) in catalog.patterns().enumerate() {
            let variants = std::iter::once((Variant::Canonical, pattern.template()))
                .chain(
                    pattern
                        .alias_templates()
                        .iter()
                        .enumerate()
                        .map(|(i, t)| (Variant::Alias(i), t)),
                )
                .chain(pattern.no_form_template().map(|t| (Variant::NoForm, t)));

            for (variant, template) in variants {
                let regex = compile(pattern, template, normalizer)?;
                buckets
                    .entry(template.head().to_string())
                    .or_default()
                    .push(CompiledSyntax {
                        pattern: index,
                        variant,
                        regex,
                    });
            }
        }

        Ok(Self { catalog, buckets })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Matches a bare line of text.
    pub fn match_text(&self, text: &str) -> MatchOutcome {
        self.match_line(&LogicalLine::new(text.trim(), 0, false))
    }

    /// Matches one logical line against every candidate syntax.
    pub fn match_line(&self, line: &LogicalLine) -> MatchOutcome {
        let Some(candidates) = self.buckets.get(line.head()) else {
            return MatchOutcome::Unknown;
        };
        let patterns: Vec<&CommandPattern> = self.catalog.patterns().collect();

        let mut hits: Vec<(&CompiledSyntax, regex::Captures<'_>)> = Vec::new();
        for compiled in candidates {
            if let Some(caps) = compiled.regex.captures(&line.text) {
                hits.push((compiled, caps));
            }
        }

        let mut names: Vec<String> = Vec::new();
        for (compiled, _) in &hits {
            let name = &patterns[compiled.pattern].name;
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        if names.len() > 1 {
            return MatchOutcome::Ambiguous(names);
        }

        let Some((compiled, caps)) = hits.into_iter().next() else {
            return MatchOutcome::Unknown;
        };
        let pattern = patterns[compiled.pattern];

        match extract(pattern, compiled.variant, &caps) {
            Ok(params) => {
                trace!(line = line.line, pattern = %pattern.name, "Matched line");
                MatchOutcome::Matched(MatchResult {
                    pattern: pattern.name.clone(),
                    family: pattern.family.clone(),
                    variant: compiled.variant,
                    params,
                    line: line.line,
                    text: line.text.clone(),
                    indented: line.indented,
                    context_line: None,
                })
            }
            Err(e) => MatchOutcome::Invalid(e),
        }
    }

    /// Checks that every catalog example matches its own pattern and
    /// nothing else.
    pub fn verify_examples(&self) -> Result<()> {
        for pattern in self.catalog.patterns() {
            for example in &pattern.examples {
                match self.match_text(&example.input) {
                    MatchOutcome::Matched(m) if m.pattern == pattern.name => {}
                    MatchOutcome::Matched(m) => {
                        return Err(Error::catalog(
                            &pattern.name,
                            format!("example '{}' matched '{}'", example.input, m.pattern),
                        ))
                    }
                    MatchOutcome::Unknown => {
                        return Err(Error::catalog(
                            &pattern.name,
                            format!("example '{}' does not match", example.input),
                        ))
                    }
                    MatchOutcome::Ambiguous(names) => {
                        return Err(Error::catalog(
                            &pattern.name,
                            format!(
                                "example '{}' is ambiguous between {}",
                                example.input,
                                names.join(", ")
                            ),
                        ))
                    }
                    MatchOutcome::Invalid(e) => {
                        return Err(Error::catalog(
                            &pattern.name,
                            format!("example '{}' is invalid: {}", example.input, e),
                        ))
                    }
                }
            }
        }
        Ok(())
    }
}

fn compile(pattern: &CommandPattern, template: &Template, normalizer: &Normalizer) -> Result<Regex> {
    let source = template.regex_source(|name| {
        let param = pattern
            .param(name)
            .ok_or_else(|| Error::catalog(&pattern.name, format!("'{}' is not declared", name)))?;
        kind_regex(pattern, param, normalizer)
    })?;
    Ok(Regex::new(&source)?)
}

fn alternation<'a>(words: impl IntoIterator<Item = &'a str>) -> String {
    let mut words: Vec<&str> = words.into_iter().collect();
    words.sort_by_key(|w| std::cmp::Reverse(w.len()));
    words
        .into_iter()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("|")
}

/// Regex for one token of the parameter's kind.
fn kind_regex(pattern: &CommandPattern, param: &Parameter, normalizer: &Normalizer) -> Result<String> {
    let regex = match param.kind {
        ParamKind::Int => r"\d+".to_string(),
        ParamKind::Bool => {
            let field = param.equivalence.as_deref().unwrap_or(SWITCH);
            let spellings = normalizer
                .spellings(field)
                .unwrap_or_else(|| vec!["on", "off"]);
            alternation(spellings)
        }
        ParamKind::Enum => {
            if !param.values.is_empty() {
                alternation(param.values.iter().map(String::as_str))
            } else {
                let field = param.equivalence.as_deref().unwrap_or_default();
                let spellings = normalizer.spellings(field).ok_or_else(|| {
                    Error::catalog(
                        &pattern.name,
                        format!("enum '{}' has neither values nor an equivalence class", param.name),
                    )
                })?;
                alternation(spellings)
            }
        }
        ParamKind::Ipv4 => IPV4.to_string(),
        ParamKind::Ipv6 => IPV6.to_string(),
        ParamKind::Ip => format!("{}|{}", IPV4, IPV6),
        ParamKind::Address | ParamKind::String => r"\S+".to_string(),
        ParamKind::Prefix => format!(r"default|{ip}(?:/(?:\d{{1,2}}|{ip}))?", ip = IPV4),
        ParamKind::Mac => {
            let octet = "[0-9A-Fa-f*]{1,2}";
            format!(
                r"\*|{o}(?:[:-]{o}){{5}}|[0-9A-Fa-f]{{4}}\.[0-9A-Fa-f]{{4}}\.[0-9A-Fa-f]{{4}}|[0-9A-Fa-f]{{12}}",
                o = octet
            )
        }
        ParamKind::Interface => r"[A-Za-z]+\d+(?:[./:]\d+)*".to_string(),
        ParamKind::Port => {
            let item = format!(r"\d+(?:-\d*)?|-\d+|{}", alternation(NAMED_PORTS.iter().copied()));
            format!(r"\*|(?:{item})(?:,(?:{item}))*", item = item)
        }
        ParamKind::Protocol => r"\*|[A-Za-z0-9-]+(?:,[A-Za-z0-9-]+)*".to_string(),
        ParamKind::Gateway => format!(r"(?:pp|tunnel|dhcp)\s+[A-Za-z0-9]+|null|loopback|{}", IPV4),
        ParamKind::Hex => r"0x[0-9A-Fa-f]{4}".to_string(),
        ParamKind::Network => format!(
            r"{v4}(?:/\d{{1,2}}|-{v4})|{v6}/\d{{1,3}}",
            v4 = IPV4,
            v6 = IPV6
        ),
        ParamKind::Domain => r"[^\s=]+".to_string(),
        ParamKind::Flag => regex::escape(&param.name),
    };
    Ok(regex)
}

fn extract(
    pattern: &CommandPattern,
    variant: Variant,
    caps: &regex::Captures<'_>,
) -> Result<IndexMap<String, String>> {
    let mut params = IndexMap::new();

    for param in &pattern.parameters {
        let value = match caps.name(&param.name) {
            Some(m) => m.as_str().split_whitespace().collect::<Vec<_>>().join(" "),
            None if variant != Variant::NoForm => match &param.default {
                Some(default) => default.clone(),
                None => continue,
            },
            None => continue,
        };

        if param.kind == ParamKind::Int {
            let mut count = 0;
            for element in value.split_whitespace() {
                count += 1;
                let n = element.parse::<u64>().map_err(|_| {
                    Error::validation(
                        &param.name,
                        &pattern.name,
                        format!("'{}' is not a valid number", element),
                    )
                })?;
                param.check_range(n).map_err(|e| match e {
                    Error::Validation { field, message, .. } => Error::Validation {
                        field,
                        record: pattern.name.clone(),
                        message,
                    },
                    other => other,
                })?;
            }
            if let Some(max) = param.max_items {
                if count > max {
                    return Err(too_many(pattern, param, count, max));
                }
            }
        } else if let Some(max) = param.max_items {
            let count = value.split_whitespace().count();
            if count > max {
                return Err(too_many(pattern, param, count, max));
            }
        }

        params.insert(param.name.clone(), value);
    }
    Ok(params)
}

fn too_many(pattern: &CommandPattern, param: &Parameter, count: usize, max: usize) -> Error {
    Error::validation(
        &param.name,
        &pattern.name,
        format!("{} items given, at most {} allowed", count, max),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn matcher() -> Matcher {
        let catalog = Arc::new(Catalog::builtin().unwrap());
        Matcher::new(catalog, &Normalizer::builtin()).unwrap()
    }

    fn matched(m: &Matcher, text: &str) -> MatchResult {
        match m.match_text(text) {
            MatchOutcome::Matched(r) => r,
            other => panic!("'{}' did not match: {:?}", text, other),
        }
    }

    #[test]
    fn test_builtin_examples_verify() {
        matcher().verify_examples().unwrap();
    }

    #[test]
    fn test_ip_filter_params() {
        let m = matcher();
        let r = matched(&m, "ip filter 200099 pass * 192.168.1.1 tcp * www");
        assert_eq!(r.pattern, "ip_filter");
        assert_eq!(r.family, "ip_filter");
        assert_eq!(r.variant, Variant::Canonical);
        assert_eq!(r.get("number"), Some("200099"));
        assert_eq!(r.get("destination"), Some("192.168.1.1"));
        assert_eq!(r.get("destination_port"), Some("www"));
        assert!(!r.flag("established"));
    }

    #[test]
    fn test_established_is_a_flag_not_a_port() {
        let m = matcher();
        let r = matched(&m, "ip filter 1 pass * * tcp * established");
        assert_eq!(r.get("source_port"), Some("*"));
        assert_eq!(r.get("destination_port"), None);
        assert!(r.flag("established"));
    }

    #[test]
    fn test_defaults_filled_in() {
        let m = matcher();
        let r = matched(&m, "ip route default gateway pp 1");
        assert_eq!(r.get("gateway"), Some("pp 1"));
        assert_eq!(r.get("weight"), Some("1"));

        let r = matched(&m, "dns server select 1 192.168.1.1 example.local");
        assert_eq!(r.get("record_type"), Some("a"));
        assert_eq!(r.get("edns1"), Some("off"));
    }

    #[test]
    fn test_alias_and_no_form_variants() {
        let m = matcher();
        let r = matched(&m, "ip filter dynamic 10 * * www syslog on");
        assert_eq!(r.variant, Variant::Alias(0));
        assert_eq!(r.get("syslog"), Some("on"));

        let r = matched(&m, "no ip filter 10");
        assert!(r.is_no_form());
        assert_eq!(r.require_int("number").unwrap(), 10);

        let r = matched(&m, "tunnel disable 3");
        assert!(r.is_no_form());
        assert_eq!(r.pattern, "tunnel_enable");
    }

    #[test]
    fn test_lists_are_normalized() {
        let m = matcher();
        let r = matched(&m, "ip lan2 secure filter out 1  2 3 dynamic 100 101");
        assert_eq!(r.int_list("filters").unwrap(), vec![1, 2, 3]);
        assert_eq!(r.int_list("dynamic_filters").unwrap(), vec![100, 101]);
    }

    #[test]
    fn test_dns_select_per_server_edns() {
        let m = matcher();
        let r = matched(&m, "dns server select 5 10.0.0.1 10.0.0.2 edns=on any . restrict pp 2");
        assert_eq!(r.get("server1"), Some("10.0.0.1"));
        assert_eq!(r.get("edns1"), Some("off"));
        assert_eq!(r.get("server2"), Some("10.0.0.2"));
        assert_eq!(r.get("edns2"), Some("on"));
        assert_eq!(r.get("record_type"), Some("any"));
        assert_eq!(r.get("query_pattern"), Some("."));
        assert_eq!(r.get("restrict_pp"), Some("2"));
    }

    #[test]
    fn test_stray_edns_is_unknown() {
        let m = matcher();
        assert!(matches!(
            m.match_text("dns server select 5 10.0.0.1 example.jp edns=on"),
            MatchOutcome::Unknown
        ));
    }

    #[test]
    fn test_out_of_range_is_invalid() {
        let m = matcher();
        assert!(matches!(
            m.match_text("ethernet filter 513 pass * *"),
            MatchOutcome::Invalid(Error::Validation { .. })
        ));
        assert!(matches!(
            m.match_text("ethernet lan1 filter in 1 600"),
            MatchOutcome::Invalid(Error::Validation { .. })
        ));
    }

    #[test]
    fn test_too_many_name_servers() {
        let m = matcher();
        assert!(matches!(
            m.match_text("dns server 1.1.1.1 2.2.2.2 3.3.3.3 4.4.4.4"),
            MatchOutcome::Invalid(_)
        ));
    }

    #[test]
    fn test_unknown_lines() {
        let m = matcher();
        assert!(matches!(m.match_text("ip lan1 address 192.168.0.1/24"), MatchOutcome::Unknown));
        assert!(matches!(m.match_text("pp select 1"), MatchOutcome::Unknown));
        assert!(matches!(m.match_text(""), MatchOutcome::Unknown));
    }

    #[test]
    fn test_ambiguous_patterns_are_reported() {
        let yaml = r#"
version: "1"
commands:
  - name: first
    family: x
    syntax: "show <a>"
    parameters: [{ name: a, type: string }]
  - name: second
    family: x
    syntax: "show <b>"
    parameters: [{ name: b, type: int }]
"#;
        let catalog = Arc::new(Catalog::from_yaml(yaml).unwrap());
        let m = Matcher::new(catalog, &Normalizer::builtin()).unwrap();
        match m.match_text("show 5") {
            MatchOutcome::Ambiguous(names) => assert_eq!(names, vec!["first", "second"]),
            other => panic!("expected ambiguity, got {:?}", other),
        }
        assert!(matches!(m.match_text("show x"), MatchOutcome::Matched(_)));
    }

    #[test]
    fn test_mac_and_dhcp_variants_do_not_collide() {
        let m = matcher();
        assert_eq!(
            matched(&m, "ethernet filter 3 pass 00-A0-DE-00-00-01 * 0x86dd").pattern,
            "ethernet_filter"
        );
        assert_eq!(
            matched(&m, "ethernet filter 3 pass dhcp-bind 2").pattern,
            "ethernet_filter_dhcp"
        );
    }
}
