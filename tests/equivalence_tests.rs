//! Equivalent spellings, wrapped lines and per-line diagnostics.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use rtxconf::error::DiagnosticKind;
use rtxconf::family::dns::SelectServer;
use rtxconf::family::ip_filter::FilterAction;
use rtxconf::normalize::{Normalizer, ADDRESS, DNS_SERVICE, FILTER_ACTION, MAC};
use rtxconf::record::{DomainRecord, RecordKey};

fn dns(text: &str) -> rtxconf::family::dns::DnsConfig {
    let parsed = engine().parse(text);
    assert!(parsed.is_clean(), "{:?}", parsed.diagnostics);
    match parsed.find(&RecordKey::new("dns", "dns")) {
        Some(DomainRecord::Dns(d)) => d.clone(),
        other => panic!("unexpected {:?}", other),
    }
}

// ============================================================================
// Equivalence Classes
// ============================================================================

#[test]
fn test_pass_and_pass_nolog_are_equivalent() {
    let engine = engine();
    let a = engine.parse("ip filter 10 pass * * tcp * www");
    let b = engine.parse("ip filter 10 pass-nolog * * tcp * www");
    assert!(a.records[0].matches(&b.records[0]));
    assert!(engine.synthesize(&a.records[0], Some(&b.records[0])).unwrap().is_empty());

    match &b.records[0] {
        DomainRecord::IpFilter(f) => assert_eq!(f.rule.action, FilterAction::Pass),
        other => panic!("unexpected {:?}", other),
    }
    assert!(Normalizer::builtin().equivalent(FILTER_ACTION, "reject", "reject-nolog"));
    assert!(!Normalizer::builtin().equivalent(FILTER_ACTION, "pass", "pass-log"));
}

#[test]
fn test_star_and_any_are_equivalent() {
    let engine = engine();
    let a = engine.parse("ip filter 20 reject * 10.0.0.1 udp");
    let b = engine.parse("ip filter 20 reject any 10.0.0.1 udp");
    assert!(a.is_clean() && b.is_clean());
    assert_eq!(a.records, b.records);
    assert!(Normalizer::builtin().equivalent(ADDRESS, "*", "any"));

    // rendered with the canonical spelling
    assert_eq!(
        engine.synthesize(&b.records[0], None).unwrap(),
        vec!["ip filter 20 reject * 10.0.0.1 udp"]
    );
}

#[test]
fn test_wildcard_mac_and_star_are_equivalent() {
    let engine = engine();
    let a = engine.parse("ethernet filter 5 reject *:*:*:*:*:* 00:a0:de:00:00:01");
    let b = engine.parse("ethernet filter 5 reject * 00:a0:de:00:00:01");
    assert!(a.is_clean() && b.is_clean(), "{:?} {:?}", a.diagnostics, b.diagnostics);
    assert_eq!(a.records, b.records);
    assert!(Normalizer::builtin().equivalent(MAC, "*:*:*:*:*:*", "*"));
    assert_eq!(
        engine.synthesize(&a.records[0], None).unwrap(),
        vec!["ethernet filter 5 reject * 00:a0:de:00:00:01"]
    );
}

#[test]
fn test_dns_service_spellings() {
    assert_eq!(dns("dns service recursive").service, Some(true));
    assert_eq!(dns("dns service on").service, Some(true));
    assert!(Normalizer::builtin().equivalent(DNS_SERVICE, "on", "recursive"));

    let engine = engine();
    let record = DomainRecord::Dns(dns("dns service on"));
    assert_eq!(
        engine.synthesize(&record, None).unwrap(),
        vec!["dns service recursive"]
    );
}

#[test]
fn test_address_leading_zeros() {
    let engine = engine();
    let a = engine.parse("dns static nas.home 192.168.001.010");
    let b = engine.parse("dns static nas.home 192.168.1.10");
    assert!(a.records[0].matches(&b.records[0]));
}

// ============================================================================
// Line Reconstruction
// ============================================================================

#[test]
fn test_digit_split_binding_is_rejoined() {
    let engine = engine();
    let parsed = engine.parse("ip lan2 secure filter in 200020 20010\n0 200102\n");
    assert!(parsed.is_clean(), "{:?}", parsed.diagnostics);
    match &parsed.records[0] {
        DomainRecord::FilterBinding(b) => assert_eq!(b.filters, vec![200020, 200100, 200102]),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_whitespace_continuation_is_rejoined() {
    let engine = engine();
    let parsed = engine.parse("ip lan2 secure filter out 200020 200021\n 200022 dynamic 200080\n");
    assert!(parsed.is_clean(), "{:?}", parsed.diagnostics);
    match &parsed.records[0] {
        DomainRecord::FilterBinding(b) => {
            assert_eq!(b.filters, vec![200020, 200021, 200022]);
            assert_eq!(b.dynamic_filters, vec![200080]);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_ambiguous_digit_split_is_malformed() {
    let engine = engine();
    let parsed = engine.parse("ip lan1 secure filter in 1000 20\n0\n300 400\ndns server 1.1.1.1\n");
    assert!(parsed
        .diagnostics
        .iter()
        .any(|d| d.kind == DiagnosticKind::MalformedInput));
    assert!(parsed.find(&RecordKey::new("dns", "dns")).is_some());
    assert!(parsed.records.iter().all(|r| r.family() != "filter_binding"));
}

// ============================================================================
// DNS Server Select Flags
// ============================================================================

#[test]
fn test_edns_binds_to_preceding_server() {
    let config = dns("dns server select 5 10.0.0.1 10.0.0.2 edns=on example.jp");
    assert_eq!(
        config.server_selects[0].servers,
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
}

#[test]
fn test_edns_after_record_type_is_unknown() {
    let parsed = engine().parse("dns server select 5 10.0.0.1 aaaa edns=on example.jp");
    assert!(parsed.records.is_empty());
    assert_eq!(parsed.diagnostics.len(), 1);
    assert_eq!(parsed.diagnostics[0].kind, DiagnosticKind::UnknownPattern);
}

// ============================================================================
// Diagnostics
// ============================================================================

#[test]
fn test_out_of_range_value_is_reported_not_fatal() {
    let parsed = engine().parse("ip filter 99999999 pass * * tcp\nip route default gateway pp 1\n");
    assert_eq!(parsed.records.len(), 1);
    assert_eq!(parsed.diagnostics.len(), 1);
    assert_eq!(parsed.diagnostics[0].line, 1);
}
