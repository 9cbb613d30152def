//! Sequence numbering for ordered rule lists.
//!
//! A rule list is numbered either automatically (`start`, `start + step`,
//! ...) or manually, with every entry carrying its own number. Mixing the
//! two in one list is rejected.

use crate::config::SequenceConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Upper bound for filter numbers when nothing else is configured.
pub const DEFAULT_MAX: u32 = 65535;

/// Candidate starts tried by [`SequenceAllocator::suggest_start`].
const PREFERRED_STARTS: [u32; 4] = [10, 100, 1000, 10000];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceMode {
    Auto,
    Manual,
}

/// How a rule list is numbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencePolicy {
    pub mode: SequenceMode,
    #[serde(default)]
    pub start: u32,
    #[serde(default)]
    pub step: u32,
}

impl SequencePolicy {
    pub fn auto(start: u32, step: u32) -> Self {
        Self {
            mode: SequenceMode::Auto,
            start,
            step,
        }
    }

    pub fn manual() -> Self {
        Self {
            mode: SequenceMode::Manual,
            start: 0,
            step: 0,
        }
    }

    /// The automatic policy configured as default.
    pub fn from_config(config: &SequenceConfig) -> Self {
        Self::auto(config.default_start, config.default_step)
    }

    pub fn is_auto(&self) -> bool {
        self.mode == SequenceMode::Auto
    }
}

/// Hands out and checks sequence numbers below a family maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceAllocator {
    max: u32,
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX)
    }
}

impl SequenceAllocator {
    pub fn new(max: u32) -> Self {
        Self { max }
    }

    pub fn from_config(config: &SequenceConfig) -> Self {
        Self::new(config.max)
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// The same allocator with its maximum lowered to a family limit.
    pub fn capped(&self, family_max: u32) -> Self {
        Self::new(self.max.min(family_max))
    }

    /// `[start, start + step, ...]` for `count` entries.
    pub fn allocate(&self, policy: &SequencePolicy, count: usize) -> Result<Vec<u32>> {
        if !policy.is_auto() {
            return Err(Error::validation(
                "mode",
                "sequence policy",
                "manual policies do not allocate numbers",
            ));
        }
        if policy.start == 0 || policy.step == 0 {
            return Err(Error::validation(
                "sequence",
                "sequence policy",
                "start and step must be positive",
            ));
        }
        if count == 0 {
            return Ok(Vec::new());
        }

        let overflow = || Error::SequenceOverflow {
            start: policy.start,
            step: policy.step,
            count,
            max: self.max,
        };
        let last = u64::from(policy.start) + u64::from(policy.step) * (count as u64 - 1);
        if last > u64::from(self.max) {
            return Err(overflow());
        }

        let numbers: Vec<u32> = (0..count as u32)
            .map(|i| policy.start + policy.step * i)
            .collect();
        debug!(start = policy.start, step = policy.step, count, "Allocated sequence numbers");
        Ok(numbers)
    }

    /// Checks manually assigned numbers: positive, in range and unique.
    pub fn validate(&self, owner: &str, numbers: &[u32]) -> Result<()> {
        let mut seen = BTreeSet::new();
        for &n in numbers {
            if n == 0 || n > self.max {
                return Err(Error::validation(
                    "sequence",
                    owner,
                    format!("{} is outside 1-{}", n, self.max),
                ));
            }
            if !seen.insert(n) {
                return Err(Error::DuplicateSequence {
                    sequence: n,
                    owner: owner.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Final numbers for a list whose entries may carry explicit numbers.
    pub fn resolve(
        &self,
        policy: &SequencePolicy,
        explicit: &[Option<u32>],
        owner: &str,
    ) -> Result<Vec<u32>> {
        match policy.mode {
            SequenceMode::Auto => {
                if let Some(n) = explicit.iter().flatten().next() {
                    return Err(Error::validation(
                        "sequence",
                        owner,
                        format!("explicit sequence {} under automatic numbering", n),
                    ));
                }
                self.allocate(policy, explicit.len())
            }
            SequenceMode::Manual => {
                let numbers = explicit
                    .iter()
                    .enumerate()
                    .map(|(i, n)| {
                        n.ok_or_else(|| {
                            Error::validation(
                                "sequence",
                                owner,
                                format!("entry {} has no sequence under manual numbering", i + 1),
                            )
                        })
                    })
                    .collect::<Result<Vec<u32>>>()?;
                self.validate(owner, &numbers)?;
                Ok(numbers)
            }
        }
    }

    /// First free start for `count` entries spaced by `step`, avoiding `used`.
    pub fn suggest_start(&self, used: &[u32], count: usize, step: u32) -> Result<u32> {
        let step = step.max(1);
        let span = u64::from(step) * (count.max(1) as u64 - 1);
        let fits = |start: u32| {
            let end = u64::from(start) + span;
            end <= u64::from(self.max)
                && !used
                    .iter()
                    .any(|&u| u64::from(u) >= u64::from(start) && u64::from(u) <= end)
        };

        if let Some(start) = PREFERRED_STARTS.iter().copied().find(|&s| fits(s)) {
            return Ok(start);
        }
        let highest = used.iter().copied().max().unwrap_or(0);
        let next = (u64::from(highest) / 100 + 1) * 100;
        match u32::try_from(next) {
            Ok(start) if fits(start) => Ok(start),
            _ => Err(Error::SequenceOverflow {
                start: u32::try_from(next).unwrap_or(u32::MAX),
                step,
                count,
                max: self.max,
            }),
        }
    }
}

/// Numbers present in both lists, ascending.
pub fn conflicts(a: &[u32], b: &[u32]) -> Vec<u32> {
    let left: BTreeSet<u32> = a.iter().copied().collect();
    let right: BTreeSet<u32> = b.iter().copied().collect();
    left.intersection(&right).copied().collect()
}
