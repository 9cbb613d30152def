//! Comparison layer between what was read from the device and what was
//! declared.
//!
//! Records are compared through their JSON form so that every family gets
//! the same treatment of write-only fields: a `DerivableField` in the
//! `not_derivable` state matches any present value and, when merging, yields
//! to the declared one.

use crate::error::{Error, Result};
use crate::record::DomainRecord;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// One semantic difference between two records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    /// Dotted path, with `[i]` for list elements
    pub path: String,
    pub from: Value,
    pub to: Value,
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.path, self.from, self.to)
    }
}

fn state(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) if map.len() <= 2 => map.get("state").and_then(Value::as_str),
        _ => None,
    }
}

fn is_not_derivable(value: &Value) -> bool {
    state(value) == Some("not_derivable")
}

fn is_absent(value: &Value) -> bool {
    value.is_null() || state(value) == Some("absent")
}

/// Merges a freshly read record with the declared one. Observed values win,
/// except where the device could not show the value.
pub fn merge(observed: &DomainRecord, declared: &DomainRecord) -> Result<DomainRecord> {
    if observed.key() != declared.key() {
        return Err(Error::validation(
            "key",
            observed.key().to_string(),
            format!("cannot reconcile with {}", declared.key()),
        ));
    }
    let merged = merge_value(&serde_json::to_value(observed)?, &serde_json::to_value(declared)?);
    Ok(serde_json::from_value(merged)?)
}

fn merge_value(observed: &Value, declared: &Value) -> Value {
    if is_not_derivable(observed) && state(declared) == Some("known") {
        return declared.clone();
    }
    match (observed, declared) {
        (Value::Object(obs), Value::Object(decl)) => {
            let merged: Map<String, Value> = obs
                .iter()
                .map(|(k, v)| {
                    let value = match decl.get(k) {
                        Some(d) => merge_value(v, d),
                        None => v.clone(),
                    };
                    (k.clone(), value)
                })
                .collect();
            Value::Object(merged)
        }
        (Value::Array(obs), Value::Array(decl)) if obs.len() == decl.len() => Value::Array(
            obs.iter()
                .zip(decl)
                .map(|(o, d)| merge_value(o, d))
                .collect(),
        ),
        _ => observed.clone(),
    }
}

/// Field-wise differences from `a` to `b`. Empty when the records are
/// equivalent.
pub fn diff(a: &DomainRecord, b: &DomainRecord) -> Result<Vec<FieldChange>> {
    let mut changes = Vec::new();
    diff_value(
        "",
        &serde_json::to_value(a)?,
        &serde_json::to_value(b)?,
        &mut changes,
    );
    Ok(changes)
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn diff_value(path: &str, a: &Value, b: &Value, out: &mut Vec<FieldChange>) {
    if (is_not_derivable(a) && !is_absent(b)) || (is_not_derivable(b) && !is_absent(a)) {
        return;
    }
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => {
            let mut keys: Vec<&String> = x.keys().collect();
            keys.extend(y.keys().filter(|k| !x.contains_key(*k)));
            for key in keys {
                diff_value(
                    &join(path, key),
                    x.get(key).unwrap_or(&Value::Null),
                    y.get(key).unwrap_or(&Value::Null),
                    out,
                );
            }
        }
        (Value::Array(x), Value::Array(y)) if x.len() == y.len() => {
            for (i, (ea, eb)) in x.iter().zip(y).enumerate() {
                diff_value(&format!("{}[{}]", path, i), ea, eb, out);
            }
        }
        _ if a != b => out.push(FieldChange {
            path: path.to_string(),
            from: a.clone(),
            to: b.clone(),
        }),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::tunnel::{Tunnel, TunnelIpsec};
    use crate::record::DerivableField;
    use pretty_assertions::assert_eq;

    fn tunnel(key: DerivableField<String>) -> DomainRecord {
        let mut t = Tunnel::new(1);
        t.ipsec = Some(TunnelIpsec {
            sa_policy_id: Some(101),
            pre_shared_key: key,
            ..TunnelIpsec::default()
        });
        DomainRecord::Tunnel(t)
    }

    #[test]
    fn test_merge_keeps_declared_secret() {
        let observed = tunnel(DerivableField::NotDerivable);
        let declared = tunnel(DerivableField::Known("k".to_string()));
        assert_eq!(merge(&observed, &declared).unwrap(), declared);
    }

    #[test]
    fn test_merge_prefers_observed_values() {
        let observed = tunnel(DerivableField::NotDerivable);
        let mut declared = tunnel(DerivableField::Absent);
        if let DomainRecord::Tunnel(t) = &mut declared {
            t.description = Some("declared".to_string());
        }
        // absent declared secret does not erase what the device has
        assert_eq!(merge(&observed, &declared).unwrap(), observed);
    }

    #[test]
    fn test_merge_rejects_other_records() {
        let a = tunnel(DerivableField::Absent);
        let b = DomainRecord::Tunnel(Tunnel::new(2));
        assert!(merge(&a, &b).is_err());
    }

    #[test]
    fn test_diff_treats_not_derivable_as_wildcard() {
        let unknown = tunnel(DerivableField::NotDerivable);
        let known = tunnel(DerivableField::Known("k".to_string()));
        assert!(diff(&unknown, &known).unwrap().is_empty());
        assert!(unknown.matches(&known));

        let absent = tunnel(DerivableField::Absent);
        let changes = diff(&unknown, &absent).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "ipsec.pre_shared_key");
    }

    #[test]
    fn test_diff_paths() {
        let a = tunnel(DerivableField::Absent);
        let mut b = a.clone();
        if let DomainRecord::Tunnel(t) = &mut b {
            t.enabled = true;
            t.ipsec.as_mut().unwrap().sa_policy_id = Some(102);
        }
        let paths: Vec<String> = diff(&a, &b).unwrap().into_iter().map(|c| c.path).collect();
        assert_eq!(paths, vec!["enabled", "ipsec.sa_policy_id"]);
    }
}
