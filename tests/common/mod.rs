//! Shared fixtures for the rtxconf integration tests.
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use rtxconf::record::DomainRecord;
use rtxconf::Engine;

/// A branch router configuration covering every family.
pub const BRANCH_CONFIG: &str = "\
# filters
ip filter 200000 reject 10.0.0.0/8 * * * *
ip filter 200099 pass * 192.168.1.1 tcp * www
ip filter 100 pass-log * * tcp * * established
ipv6 filter 101000 pass * * icmp6 * *
ip filter dynamic 200080 * * ftp
ip filter dynamic 200083 * * domain syslog=off
ethernet filter 1 pass-nolog 00:a0:de:00:00:01 * 0x0800
ethernet filter 10 pass-log dhcp-bind 1
ip lan2 secure filter in 200000 200099
ip lan2 secure filter out 200099 dynamic 200080 200083
ethernet lan1 filter in 1 10
dns domain lookup off
dns domain example.jp
dns server 8.8.8.8 8.8.4.4
dns server select 2 10.0.0.1 edns=on 10.0.0.2 any corp.example restrict pp 1
dns static router.home 192.168.1.1
dns service recursive
tunnel select 1
 description to branch office
 tunnel encapsulation ipsec
 ipsec tunnel 101
  ipsec sa policy 101 1 esp aes-cbc sha-hmac
  ipsec ike local address 1 192.168.1.1
  ipsec ike remote address 1 203.0.113.10
  ipsec ike keepalive use 1 on dpd 30 3
 ip tunnel secure filter in 200000 200099
 ip tunnel tcp mss limit auto
 tunnel enable 1
ip route default gateway pp 1
ip route 10.0.0.0/8 gateway 192.168.1.254 weight 2 hide
ip route 10.0.0.0/8 gateway tunnel 1
login user admin encrypted 8b6a0c6e4e
user attribute admin administrator=on connection=serial,telnet,ssh login-timer=300
";

pub fn engine() -> Engine {
    Engine::builtin().expect("builtin engine")
}

/// Commands that create every record from nothing, one per line.
pub fn render_all(engine: &Engine, records: &[DomainRecord]) -> String {
    records
        .iter()
        .flat_map(|r| engine.synthesize(r, None).expect("synthesize"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Asserts that every record of `expected` is read back equivalently.
pub fn assert_same_records(engine: &Engine, expected: &[DomainRecord], actual: &[DomainRecord]) {
    assert_eq!(
        expected.len(),
        actual.len(),
        "record count differs: {:?} vs {:?}",
        expected.iter().map(DomainRecord::key).collect::<Vec<_>>(),
        actual.iter().map(DomainRecord::key).collect::<Vec<_>>()
    );
    for record in expected {
        let back = actual
            .iter()
            .find(|r| r.key() == record.key())
            .unwrap_or_else(|| panic!("{} not read back", record.key()));
        let record = engine.canonicalize(record).expect("canonicalize");
        assert!(
            record.matches(back),
            "{} differs: {:?}",
            record.key(),
            rtxconf::reconcile::diff(&record, back).unwrap()
        );
    }
}
