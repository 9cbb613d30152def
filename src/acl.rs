//! Named access lists.
//!
//! The device has no named lists: an access list is an ordered set of rules
//! that becomes numbered filters. Its name only exists on the declaring
//! side, so a list read back from the device has `name = NotDerivable`.

use crate::collision::{OwnedRange, SequenceRange};
use crate::error::{Error, Result};
use crate::family::ethernet_filter::{self, EthernetFilter, EthernetRule};
use crate::family::ip_filter::{self, FilterAction, IpFilter, IpRule, IpVersion};
use crate::record::{DerivableField, DomainRecord};
use crate::sequence::{SequenceAllocator, SequencePolicy};
use serde::{Deserialize, Serialize};

/// Filter table an access list compiles to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AclKind {
    Ip,
    Ipv6,
    Ethernet,
}

impl AclKind {
    /// Highest filter number of the table the list compiles to.
    pub fn max_sequence(self) -> u32 {
        match self {
            AclKind::Ip | AclKind::Ipv6 => ip_filter::MAX_NUMBER,
            AclKind::Ethernet => ethernet_filter::MAX_NUMBER,
        }
    }

    fn label(self) -> &'static str {
        match self {
            AclKind::Ip => "ip",
            AclKind::Ipv6 => "ipv6",
            AclKind::Ethernet => "ethernet",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthernetEntry {
    pub action: FilterAction,
    pub rule: EthernetRule,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AclRule {
    Ip(IpRule),
    Ethernet(EthernetEntry),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    /// Explicit filter number; only allowed under a manual policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u32>,
    pub rule: AclRule,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessList {
    #[serde(default)]
    pub name: DerivableField<String>,
    pub kind: AclKind,
    pub policy: SequencePolicy,
    pub entries: Vec<AclEntry>,
}

impl AccessList {
    /// Name used in errors and collision reports. A list without a known
    /// name is told apart by its kind and first number.
    pub fn owner(&self) -> String {
        if let DerivableField::Known(name) = &self.name {
            return format!("acl {}", name);
        }
        let first = if self.policy.is_auto() {
            Some(self.policy.start)
        } else {
            self.entries.iter().filter_map(|e| e.sequence).min()
        };
        match first {
            Some(n) => format!("unnamed {} acl at {}", self.kind.label(), n),
            None => format!("unnamed {} acl", self.kind.label()),
        }
    }

    /// Filter numbers of the entries, in entry order, bounded by the
    /// table's own maximum.
    pub fn sequences(&self, allocator: &SequenceAllocator) -> Result<Vec<u32>> {
        let explicit: Vec<Option<u32>> = self.entries.iter().map(|e| e.sequence).collect();
        allocator
            .capped(self.kind.max_sequence())
            .resolve(&self.policy, &explicit, &self.owner())
    }

    /// The numbers the list occupies, for collision checks.
    pub fn sequence_range(&self, allocator: &SequenceAllocator) -> Result<Option<SequenceRange>> {
        Ok(SequenceRange::covering(&self.sequences(allocator)?))
    }

    pub fn owned_range(&self, allocator: &SequenceAllocator) -> Result<Option<OwnedRange>> {
        Ok(self
            .sequence_range(allocator)?
            .map(|range| OwnedRange::new(self.owner(), range)))
    }

    /// Compiles the list into numbered filter records.
    pub fn resolve(&self, allocator: &SequenceAllocator) -> Result<Vec<DomainRecord>> {
        let numbers = self.sequences(allocator)?;
        let owner = self.owner();
        self.entries
            .iter()
            .zip(numbers)
            .map(|(entry, number)| -> Result<DomainRecord> {
                match (self.kind, &entry.rule) {
                    (AclKind::Ip | AclKind::Ipv6, AclRule::Ip(rule)) => {
                        let version = if self.kind == AclKind::Ip {
                            IpVersion::V4
                        } else {
                            IpVersion::V6
                        };
                        rule.validate(&owner)?;
                        Ok(DomainRecord::IpFilter(IpFilter::new(version, number, rule.clone())))
                    }
                    (AclKind::Ethernet, AclRule::Ethernet(e)) => {
                        let filter = EthernetFilter {
                            number,
                            action: e.action,
                            rule: e.rule.clone(),
                        };
                        filter.validate()?;
                        Ok(DomainRecord::EthernetFilter(filter))
                    }
                    _ => Err(Error::validation(
                        "rule",
                        owner.clone(),
                        format!("entry {} does not fit a {:?} list", number, self.kind),
                    )),
                }
            })
            .collect()
    }

    /// Rebuilds a list from filters read off the device. Filters of other
    /// kinds are skipped.
    pub fn from_filters(kind: AclKind, records: &[DomainRecord]) -> Self {
        let mut entries: Vec<AclEntry> = records
            .iter()
            .filter_map(|record| match (kind, record) {
                (AclKind::Ip, DomainRecord::IpFilter(f)) if f.version == IpVersion::V4 => {
                    Some((f.number, AclRule::Ip(f.rule.clone())))
                }
                (AclKind::Ipv6, DomainRecord::IpFilter(f)) if f.version == IpVersion::V6 => {
                    Some((f.number, AclRule::Ip(f.rule.clone())))
                }
                (AclKind::Ethernet, DomainRecord::EthernetFilter(f)) => Some((
                    f.number,
                    AclRule::Ethernet(EthernetEntry {
                        action: f.action,
                        rule: f.rule.clone(),
                    }),
                )),
                _ => None,
            })
            .map(|(number, rule)| AclEntry {
                sequence: Some(number),
                rule,
            })
            .collect();
        entries.sort_by_key(|e| e.sequence);
        Self {
            name: DerivableField::NotDerivable,
            kind,
            policy: SequencePolicy::manual(),
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::Endpoint;
    use pretty_assertions::assert_eq;

    fn rule(action: FilterAction) -> AclRule {
        AclRule::Ip(IpRule {
            action,
            source: Endpoint::Any,
            destination: Endpoint::Any,
            protocol: "tcp".to_string(),
            source_port: None,
            destination_port: Some("www".to_string()),
            established: false,
        })
    }

    fn acl(policy: SequencePolicy, sequences: &[Option<u32>]) -> AccessList {
        AccessList {
            name: DerivableField::Known("web".to_string()),
            kind: AclKind::Ip,
            policy,
            entries: sequences
                .iter()
                .map(|s| AclEntry {
                    sequence: *s,
                    rule: rule(FilterAction::Pass),
                })
                .collect(),
        }
    }

    #[test]
    fn test_auto_resolution() {
        let list = acl(SequencePolicy::auto(100, 10), &[None, None, None]);
        let allocator = SequenceAllocator::default();
        let records = list.resolve(&allocator).unwrap();
        let keys: Vec<String> = records.iter().map(|r| r.key().id).collect();
        assert_eq!(keys, vec!["v4/100", "v4/110", "v4/120"]);
        assert_eq!(
            list.sequence_range(&allocator).unwrap(),
            Some(SequenceRange::new(100, 120))
        );
    }

    #[test]
    fn test_auto_with_explicit_is_rejected() {
        let list = acl(SequencePolicy::auto(10, 10), &[None, Some(50)]);
        let err = list.resolve(&SequenceAllocator::default()).unwrap_err();
        assert!(matches!(err, Error::Validation { ref record, .. } if record == "acl web"));
    }

    #[test]
    fn test_kind_mismatch() {
        let mut list = acl(SequencePolicy::auto(10, 10), &[None]);
        list.kind = AclKind::Ethernet;
        assert!(list.resolve(&SequenceAllocator::default()).is_err());
    }

    fn ethernet_acl(policy: SequencePolicy, count: usize) -> AccessList {
        AccessList {
            name: DerivableField::Known("l2".to_string()),
            kind: AclKind::Ethernet,
            policy,
            entries: (0..count)
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
        }
    }

    #[test]
    fn test_ethernet_list_stops_at_table_maximum() {
        let allocator = SequenceAllocator::default();
        let err = ethernet_acl(SequencePolicy::auto(100, 500), 2)
            .resolve(&allocator)
            .unwrap_err();
        assert!(matches!(err, Error::SequenceOverflow { max: 512, .. }), "{:?}", err);

        let records = ethernet_acl(SequencePolicy::auto(500, 12), 2)
            .resolve(&allocator)
            .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_ethernet_manual_number_above_maximum() {
        let mut list = ethernet_acl(SequencePolicy::manual(), 1);
        list.entries[0].sequence = Some(600);
        assert!(matches!(
            list.resolve(&SequenceAllocator::default()),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn test_unnamed_owners_differ() {
        let mut a = acl(SequencePolicy::auto(500, 10), &[None, None, None]);
        let mut b = acl(SequencePolicy::auto(510, 10), &[None, None, None]);
        a.name = DerivableField::NotDerivable;
        b.name = DerivableField::Absent;
        assert_eq!(a.owner(), "unnamed ip acl at 500");
        assert_ne!(a.owner(), b.owner());

        let manual = AccessList::from_filters(
            AclKind::Ip,
            &a.resolve(&SequenceAllocator::default()).unwrap(),
        );
        assert_eq!(manual.owner(), "unnamed ip acl at 500");
    }

    #[test]
    fn test_read_back_name_is_not_derivable() {
        let list = acl(SequencePolicy::manual(), &[Some(20), Some(10)]);
        let records = list.resolve(&SequenceAllocator::default()).unwrap();
        let back = AccessList::from_filters(AclKind::Ip, &records);
        assert_eq!(back.name, DerivableField::NotDerivable);
        assert!(back.name.matches(&list.name));
        let sequences: Vec<Option<u32>> = back.entries.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![Some(10), Some(20)]);
    }
}
