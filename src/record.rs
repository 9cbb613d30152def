//! Typed configuration records.

use crate::family::admin::AdminUser;
use crate::family::binding::FilterBinding;
use crate::family::dns::DnsConfig;
use crate::family::dynamic_filter::DynamicFilter;
use crate::family::ethernet_filter::EthernetFilter;
use crate::family::ip_filter::IpFilter;
use crate::family::route::StaticRoute;
use crate::family::tunnel::Tunnel;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A field whose value may be impossible to confirm by reading the device.
///
/// `NotDerivable` and `Absent` are different answers: the first means the
/// device has a value it will not show (a pre-shared key, a password), the
/// second means nothing is configured. Collapsing them would make every
/// write-only secret look like drift.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "value")]
pub enum DerivableField<T> {
    Known(T),
    NotDerivable,
    Absent,
}

impl<T> Default for DerivableField<T> {
    fn default() -> Self {
        DerivableField::Absent
    }
}

impl<T> From<Option<T>> for DerivableField<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => DerivableField::Known(v),
            None => DerivableField::Absent,
        }
    }
}

impl<T: Clone + PartialEq> DerivableField<T> {
    pub fn known(&self) -> Option<&T> {
        match self {
            DerivableField::Known(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, DerivableField::Known(_))
    }

    pub fn is_not_derivable(&self) -> bool {
        matches!(self, DerivableField::NotDerivable)
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, DerivableField::Absent)
    }

    /// Combines a freshly read value with the declared one: a value the
    /// device could not show keeps whatever was declared.
    pub fn reconcile(observed: &Self, declared: &Self) -> Self {
        match (observed, declared) {
            (DerivableField::NotDerivable, DerivableField::Known(v)) => {
                DerivableField::Known(v.clone())
            }
            (observed, _) => observed.clone(),
        }
    }

    /// Equality where `NotDerivable` on either side matches anything
    /// except `Absent`.
    pub fn matches(&self, other: &Self) -> bool {
        match (self, other) {
            (DerivableField::Absent, DerivableField::Absent) => true,
            (DerivableField::Absent, _) | (_, DerivableField::Absent) => false,
            (DerivableField::NotDerivable, _) | (_, DerivableField::NotDerivable) => true,
            (DerivableField::Known(a), DerivableField::Known(b)) => a == b,
        }
    }
}

/// Identity of a record, stable across parse/synthesize round trips.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub family: String,
    pub id: String,
}

impl RecordKey {
    pub fn new(family: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.family, self.id)
    }
}

/// One configuration object of any supported family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum DomainRecord {
    IpFilter(IpFilter),
    DynamicFilter(DynamicFilter),
    EthernetFilter(EthernetFilter),
    FilterBinding(FilterBinding),
    Dns(DnsConfig),
    Tunnel(Tunnel),
    StaticRoute(StaticRoute),
    AdminUser(AdminUser),
}

impl DomainRecord {
    /// Catalog family name.
    pub fn family(&self) -> &'static str {
        match self {
            DomainRecord::IpFilter(_) => "ip_filter",
            DomainRecord::DynamicFilter(_) => "dynamic_filter",
            DomainRecord::EthernetFilter(_) => "ethernet_filter",
            DomainRecord::FilterBinding(_) => "filter_binding",
            DomainRecord::Dns(_) => "dns",
            DomainRecord::Tunnel(_) => "tunnel",
            DomainRecord::StaticRoute(_) => "static_route",
            DomainRecord::AdminUser(_) => "admin_user",
        }
    }

    pub fn key(&self) -> RecordKey {
        let id = match self {
            DomainRecord::IpFilter(r) => format!("{}/{}", r.version, r.number),
            DomainRecord::DynamicFilter(r) => format!("{}/{}", r.version, r.number),
            DomainRecord::EthernetFilter(r) => r.number.to_string(),
            DomainRecord::FilterBinding(r) => {
                format!("{}/{}/{}", r.kind, r.interface, r.direction)
            }
            DomainRecord::Dns(_) => "dns".to_string(),
            DomainRecord::Tunnel(r) => r.id.to_string(),
            DomainRecord::StaticRoute(r) => r.destination.clone(),
            DomainRecord::AdminUser(r) => r.username.clone(),
        };
        RecordKey::new(self.family(), id)
    }

    /// Equality under which fields the device cannot show match anything.
    pub fn matches(&self, other: &DomainRecord) -> bool {
        crate::reconcile::diff(self, other)
            .map(|changes| changes.is_empty())
            .unwrap_or(false)
    }
}
