//! Partition-key range geometry.
//!
//! Ranges are half-open `[min, max)` intervals over the string-ordered
//! effective-partition-key space. The empty string is the global minimum;
//! an empty `max` means the range extends to the end of the key space.
//! At any instant the ranges of a container form a total, non-overlapping
//! partition of the full key space.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A half-open `[min, max)` interval over the effective-partition-key space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRange {
    /// Inclusive lower bound. `""` is the start of the key space.
    pub min: String,
    /// Exclusive upper bound. `""` means the end of the key space.
    pub max: String,
}

impl KeyRange {
    /// Create a range from its bounds.
    pub fn new(min: impl Into<String>, max: impl Into<String>) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
        }
    }

    /// The full key space.
    pub fn full() -> Self {
        Self::new("", "")
    }

    /// Whether this range covers the entire key space.
    pub fn is_full(&self) -> bool {
        self.min.is_empty() && self.max.is_empty()
    }

    /// Whether `min >= max` under key-space ordering, i.e. the range can
    /// never contain a point. A range with an empty `max` is unbounded
    /// above and never inverted.
    pub fn is_inverted(&self) -> bool {
        !self.max.is_empty() && self.min.as_str() >= self.max.as_str()
    }

    /// Half-open containment of a single point: `min <= point < max`,
    /// with an empty `max` treated as the end of the key space.
    pub fn contains_point(&self, point: &str) -> bool {
        point >= self.min.as_str() && (self.max.is_empty() || point < self.max.as_str())
    }

    /// Whether two ranges share at least one point.
    pub fn overlaps(&self, other: &KeyRange) -> bool {
        let self_below_other = !self.max.is_empty() && self.max.as_str() <= other.min.as_str();
        let other_below_self = !other.max.is_empty() && other.max.as_str() <= self.min.as_str();
        !(self_below_other || other_below_self)
    }

    /// Whether `other` lies entirely within this range.
    pub fn contains_range(&self, other: &KeyRange) -> bool {
        let lower_ok = other.min.as_str() >= self.min.as_str();
        let upper_ok = self.max.is_empty()
            || (!other.max.is_empty() && other.max.as_str() <= self.max.as_str());
        lower_ok && upper_ok
    }

    /// Ordering by start boundary, then end boundary (empty max sorts last).
    pub fn cmp_bounds(&self, other: &KeyRange) -> Ordering {
        self.min
            .cmp(&other.min)
            .then_with(|| match (self.max.is_empty(), other.max.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.max.cmp(&other.max),
            })
    }
}

impl std::fmt::Display for KeyRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}, {:?})", self.min, self.max)
    }
}

/// A partition-key range with its stable service-assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKeyRange {
    /// Stable range id. Splits assign fresh ids to children.
    pub id: String,
    /// The interval this physical partition owns.
    pub range: KeyRange,
}

impl PartitionKeyRange {
    /// Create a range with the given id and bounds.
    pub fn new(id: impl Into<String>, min: impl Into<String>, max: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            range: KeyRange::new(min, max),
        }
    }

    /// Ordering by range bounds, then id (a deterministic total order).
    pub fn cmp_by_bounds(&self, other: &PartitionKeyRange) -> Ordering {
        self.range
            .cmp_bounds(&other.range)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Sort ranges into key-space order by their start boundary.
pub fn sort_by_min(ranges: &mut [PartitionKeyRange]) {
    ranges.sort_by(|a, b| a.cmp_by_bounds(b));
}
