//! Sequence allocation, access lists and collision checks.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rtxconf::acl::{AccessList, AclEntry, AclKind, AclRule, EthernetEntry};
use rtxconf::collision::{check_against_siblings, OwnedRange, SequenceRange};
use rtxconf::family::ethernet_filter::EthernetRule;
use rtxconf::family::ip_filter::{FilterAction, IpRule};
use rtxconf::family::Endpoint;
use rtxconf::record::DerivableField;
use rtxconf::sequence::{SequenceAllocator, SequencePolicy};
use rtxconf::Error;
use std::fmt;

// ============================================================================
// Allocation
// ============================================================================

#[test]
fn test_allocate_through_engine() {
    let engine = engine();
    assert_eq!(
        engine
            .allocate_sequence(&SequencePolicy::auto(100, 10), 3)
            .unwrap(),
        vec![100, 110, 120]
    );
}

#[test]
fn test_auto_policy_rejects_explicit_sequence() {
    let err = SequenceAllocator::default()
        .resolve(&SequencePolicy::auto(10, 10), &[None, Some(50), None], "acl web")
        .unwrap_err();
    match err {
        Error::Validation { message, record, .. } => {
            assert_eq!(record, "acl web");
            assert!(message.contains("50"), "{}", message);
        }
        other => panic!("unexpected {:?}", other),
    }
}

// ============================================================================
// Collisions
// ============================================================================

#[test]
fn test_range_overlap_examples() {
    let a = SequenceRange::new(100, 120);
    assert!(a.overlaps(&SequenceRange::new(110, 130)));
    assert!(!a.overlaps(&SequenceRange::new(200, 220)));
}

#[test]
fn test_sibling_collision_names_both_owners() {
    let first = OwnedRange::new("acl inbound", SequenceRange::new(500, 520));
    let second = OwnedRange::new("acl outbound", SequenceRange::new(510, 530));
    let err = check_against_siblings(&second, &[first.clone(), second.clone()])
        .into_result()
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("acl inbound"), "{}", message);
    assert!(message.contains("acl outbound"), "{}", message);
    assert!(message.contains("510-520"), "{}", message);
}

#[derive(Debug)]
struct QueryFailed;

impl fmt::Display for QueryFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "show config timed out")
    }
}

impl std::error::Error for QueryFailed {}

#[test]
fn test_device_query_failure_is_propagated() {
    let engine = engine();
    let candidate = OwnedRange::new("acl web", SequenceRange::new(100, 120));
    let err = engine
        .check_collision(&candidate, &[], &[], || Err(QueryFailed))
        .unwrap_err();
    assert!(matches!(err, Error::DeviceQuery(_)));
    assert_eq!(err.to_string(), "show config timed out");
}

#[test]
fn test_device_ranges_checked_after_siblings() {
    let engine = engine();
    let candidate = OwnedRange::new("acl web", SequenceRange::new(100, 120));
    let report = engine
        .check_collision(&candidate, &[], &[], || {
            Ok::<_, QueryFailed>(vec![SequenceRange::new(115, 115)])
        })
        .unwrap();
    assert_eq!(
        report.conflicting_ranges(),
        vec![("device".to_string(), 115, 115)]
    );
}

// ============================================================================
// Access Lists
// ============================================================================

fn web_acl(policy: SequencePolicy, count: usize) -> AccessList {
    AccessList {
        name: DerivableField::Known("web".to_string()),
        kind: AclKind::Ip,
        policy,
        entries: (0..count)
            .map(|i| AclEntry {
                sequence: None,
                rule: AclRule::Ip(IpRule {
                    action: if i + 1 == count {
                        FilterAction::Reject
                    } else {
                        FilterAction::Pass
                    },
                    source: Endpoint::Any,
                    destination: Endpoint::Any,
                    protocol: "tcp".to_string(),
                    source_port: None,
                    destination_port: Some("www".to_string()),
                    established: false,
                }),
            })
            .collect(),
    }
}

#[test]
fn test_acl_compiles_to_parseable_filters() {
    let engine = engine();
    let acl = web_acl(SequencePolicy::auto(200, 5), 3);
    let records = acl.resolve(engine.allocator()).unwrap();
    let text = render_all(&engine, &records);
    assert_eq!(
        text,
        "ip filter 200 pass * * tcp * www\nip filter 205 pass * * tcp * www\nip filter 210 reject * * tcp * www"
    );

    let parsed = engine.parse(&text);
    let back = AccessList::from_filters(AclKind::Ip, &parsed.records);
    assert_eq!(back.name, DerivableField::NotDerivable);
    assert_eq!(back.entries.len(), 3);
    assert_eq!(
        acl.owned_range(engine.allocator()).unwrap().unwrap().range,
        SequenceRange::new(200, 210)
    );
}

#[test]
fn test_acl_overflow() {
    let acl = web_acl(SequencePolicy::auto(65530, 10), 2);
    assert!(matches!(
        acl.resolve(&SequenceAllocator::default()),
        Err(Error::SequenceOverflow { .. })
    ));
}

#[test]
fn test_ethernet_acl_overflow() {
    let engine = engine();
    let acl = AccessList {
        name: DerivableField::Known("l2".to_string()),
        kind: AclKind::Ethernet,
        policy: SequencePolicy::auto(100, 500),
        entries: (0..2)
            .map(|_| AclEntry {
                sequence: None,
                rule: AclRule::Ethernet(EthernetEntry {
                    action: FilterAction::Pass,
                    rule: EthernetRule::Mac {
                        source: Endpoint::Any,
                        destination: Endpoint::Any,
                        ether_type: None,
                        vlan: None,
                    },
                }),
            })
            .collect(),
    };
    match acl.resolve(engine.allocator()) {
        Err(Error::SequenceOverflow { max, .. }) => assert_eq!(max, 512),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_unnamed_acls_collide() {
    let engine = engine();
    let mut first = web_acl(SequencePolicy::auto(500, 10), 3);
    let mut second = web_acl(SequencePolicy::auto(510, 10), 3);
    first.name = DerivableField::NotDerivable;
    second.name = DerivableField::NotDerivable;

    let ranges: Vec<OwnedRange> = [&first, &second]
        .iter()
        .map(|l| l.owned_range(engine.allocator()).unwrap().unwrap())
        .collect();
    let err = check_against_siblings(&ranges[1], &ranges)
        .into_result()
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("unnamed ip acl at 500"), "{}", message);
    assert!(message.contains("unnamed ip acl at 510"), "{}", message);
    assert!(message.contains("510-520"), "{}", message);
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #[test]
    fn prop_allocation_is_arithmetic(start in 1u32..=1000, step in 1u32..=100, count in 0usize..50) {
        let numbers = SequenceAllocator::default()
            .allocate(&SequencePolicy::auto(start, step), count)
            .unwrap();
        prop_assert_eq!(numbers.len(), count);
        for (i, n) in numbers.iter().enumerate() {
            prop_assert_eq!(*n, start + step * i as u32);
        }
    }

    #[test]
    fn prop_allocation_never_exceeds_max(start in 1u32..=70000, step in 1u32..=5000, count in 1usize..100) {
        let allocator = SequenceAllocator::default();
        match allocator.allocate(&SequencePolicy::auto(start, step), count) {
            Ok(numbers) => prop_assert!(numbers.iter().all(|&n| n <= allocator.max())),
            Err(e) => prop_assert!(matches!(e, Error::SequenceOverflow { .. }), "unexpected error: {:?}", e),
        }
    }

    #[test]
    fn prop_overlap_is_symmetric(a in 0u32..1000, b in 0u32..1000, c in 0u32..1000, d in 0u32..1000) {
        let x = SequenceRange::new(a, b);
        let y = SequenceRange::new(c, d);
        prop_assert_eq!(x.overlaps(&y), y.overlaps(&x));
        prop_assert_eq!(x.overlap(&y), y.overlap(&x));
        if let Some(shared) = x.overlap(&y) {
            prop_assert!(x.contains(shared.start) && y.contains(shared.end));
        }
    }

    #[test]
    fn prop_subtract_leaves_no_overlap(a in 0u32..1000, b in 0u32..1000, c in 0u32..1000, d in 0u32..1000) {
        let x = SequenceRange::new(a, b);
        let y = SequenceRange::new(c, d);
        for part in x.subtract(&y) {
            prop_assert!(!part.overlaps(&y));
            prop_assert!(part.start >= x.start && part.end <= x.end);
        }
    }
}
