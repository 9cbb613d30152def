//! Sequence range collision checks.
//!
//! Two rule lists may not share filter numbers. A candidate list is checked
//! against its declared siblings (pure) and against what the device already
//! holds (one injected query).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Owner name used for ranges reported by the device.
pub const DEVICE_OWNER: &str = "device";

/// Inclusive range of sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SequenceRange {
    pub start: u32,
    pub end: u32,
}

impl SequenceRange {
    /// A range with its bounds in order.
    pub fn new(a: u32, b: u32) -> Self {
        Self {
            start: a.min(b),
            end: a.max(b),
        }
    }

    pub fn single(n: u32) -> Self {
        Self::new(n, n)
    }

    /// Smallest range covering every number; `None` for an empty list.
    pub fn covering(numbers: &[u32]) -> Option<Self> {
        let min = numbers.iter().copied().min()?;
        let max = numbers.iter().copied().max()?;
        Some(Self::new(min, max))
    }

    pub fn contains(&self, n: u32) -> bool {
        self.start <= n && n <= self.end
    }

    pub fn overlaps(&self, other: &SequenceRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// The shared span of two ranges.
    pub fn overlap(&self, other: &SequenceRange) -> Option<SequenceRange> {
        self.overlaps(other).then(|| SequenceRange {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        })
    }

    /// Parts of `self` not covered by `other` (zero, one or two ranges).
    pub fn subtract(&self, other: &SequenceRange) -> Vec<SequenceRange> {
        if !self.overlaps(other) {
            return vec![*self];
        }
        let mut parts = Vec::new();
        if self.start < other.start {
            parts.push(SequenceRange::new(self.start, other.start - 1));
        }
        if other.end < self.end {
            parts.push(SequenceRange::new(other.end + 1, self.end));
        }
        parts
    }
}

impl fmt::Display for SequenceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// A range claimed by a named rule list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedRange {
    pub owner: String,
    pub range: SequenceRange,
}

impl OwnedRange {
    pub fn new(owner: impl Into<String>, range: SequenceRange) -> Self {
        Self {
            owner: owner.into(),
            range,
        }
    }
}

/// One range that collides with the candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub owner: String,
    pub range: SequenceRange,
    pub overlap: SequenceRange,
}

/// Result of a collision check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollisionReport {
    pub candidate: OwnedRange,
    pub conflicts: Vec<Conflict>,
}

impl CollisionReport {
    pub fn is_clear(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// `(owner, start, end)` of every conflicting range.
    pub fn conflicting_ranges(&self) -> Vec<(String, u32, u32)> {
        self.conflicts
            .iter()
            .map(|c| (c.owner.clone(), c.range.start, c.range.end))
            .collect()
    }

    /// `Ok(())` when nothing collides, otherwise a `CollisionDetected`
    /// naming the first conflict.
    pub fn into_result(self) -> Result<()> {
        match self.conflicts.first() {
            None => Ok(()),
            Some(first) => Err(Error::CollisionDetected {
                owner: self.candidate.owner.clone(),
                competing_owner: first.owner.clone(),
                overlap_start: first.overlap.start,
                overlap_end: first.overlap.end,
                additional: self.conflicts.len() - 1,
            }),
        }
    }
}

fn collect(candidate: &OwnedRange, others: impl IntoIterator<Item = OwnedRange>) -> CollisionReport {
    let conflicts: Vec<Conflict> = others
        .into_iter()
        .filter_map(|other| {
            candidate.range.overlap(&other.range).map(|overlap| Conflict {
                owner: other.owner,
                range: other.range,
                overlap,
            })
        })
        .collect();
    if !conflicts.is_empty() {
        warn!(
            owner = %candidate.owner,
            range = %candidate.range,
            conflicts = conflicts.len(),
            "Sequence range collides"
        );
    }
    CollisionReport {
        candidate: candidate.clone(),
        conflicts,
    }
}

/// Checks a candidate against the other declared lists.
///
/// `siblings` may contain the candidate itself; exactly one slot is skipped
/// for it, the same element if present, otherwise the first equal one.
/// Owner names play no part in deciding a collision.
pub fn check_against_siblings(candidate: &OwnedRange, siblings: &[OwnedRange]) -> CollisionReport {
    let own_slot = siblings
        .iter()
        .position(|s| std::ptr::eq(s, candidate))
        .or_else(|| siblings.iter().position(|s| s == candidate));
    collect(
        candidate,
        siblings
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != own_slot)
            .map(|(_, s)| s.clone()),
    )
}

/// Checks a candidate against the ranges in use on the device.
///
/// `previously_owned` are the ranges the candidate held before this change;
/// they are removed from the device answer so an update does not collide
/// with itself. A failing query is returned as [`Error::DeviceQuery`] with
/// its source intact.
pub fn check_against_device<F, E>(
    candidate: &OwnedRange,
    previously_owned: &[SequenceRange],
    query: F,
) -> Result<CollisionReport>
where
    F: FnOnce() -> std::result::Result<Vec<SequenceRange>, E>,
    E: std::error::Error + Send + Sync + 'static,
{
    let in_use = query().map_err(Error::device_query)?;
    debug!(ranges = in_use.len(), "Device reported ranges in use");

    let mut remaining = in_use;
    for owned in previously_owned {
        remaining = remaining
            .iter()
            .flat_map(|r| r.subtract(owned))
            .collect();
    }
    Ok(collect(
        candidate,
        remaining
            .into_iter()
            .map(|range| OwnedRange::new(DEVICE_OWNER, range)),
    ))
}
