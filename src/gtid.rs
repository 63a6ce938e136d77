//! GTID-set comparator (component A).
//!
//! A GTID set is a mapping from source UUID to a sorted, disjoint list of
//! transaction-id intervals. Comparison follows MySQL's subset arithmetic:
//! `a <= b` iff every interval of `a` is contained within `b`'s intervals
//! for the same UUID. See the GLOSSARY in the design notes for the textual
//! encoding this type parses and renders.

use crate::error::{ControllerError, Result};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// A single closed interval `[start, end]` of transaction ids, both
/// inclusive, as MySQL encodes them (`23` is shorthand for `23-23`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Interval {
    pub start: u64,
    pub end: u64,
}

impl Interval {
    #[must_use]
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// True iff `self` is entirely contained in `other`.
    #[must_use]
    const fn contained_in(self, other: Self) -> bool {
        self.start >= other.start && self.end <= other.end
    }
}

/// A parsed GTID set: `source_uuid -> sorted disjoint intervals`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GtidSet(BTreeMap<Uuid, Vec<Interval>>);

/// Outcome of comparing two GTID sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GtidComparison {
    Equal,
    ALessThanB,
    AGreaterThanB,
    Inconsistent,
}

impl GtidSet {
    /// Parse the MySQL textual encoding:
    /// `uuid:interval[:interval...][,uuid:interval...]`.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::GtidInconsistent`] if any component of
    /// the string cannot be parsed as a UUID or interval list — a
    /// malformed GTID set can never be meaningfully ordered against
    /// another, so it is treated the same as an inconsistent comparison.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::default());
        }

        let mut map = BTreeMap::new();
        for group in raw.split(',') {
            let group = group.trim();
            if group.is_empty() {
                continue;
            }
            let mut parts = group.split(':');
            let uuid_str = parts.next().ok_or(ControllerError::GtidInconsistent)?;
            let uuid = Uuid::parse_str(uuid_str).map_err(|_| ControllerError::GtidInconsistent)?;

            let mut intervals: Vec<Interval> = Vec::new();
            for interval_str in parts {
                intervals.push(parse_interval(interval_str)?);
            }
            intervals.sort_unstable();
            map.entry(uuid).or_insert_with(Vec::new).extend(intervals);
        }

        for intervals in map.values_mut() {
            intervals.sort_unstable();
        }

        Ok(Self(map))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `self <= other`: every interval of `self` fits inside some interval
    /// of `other` for the same source UUID.
    #[must_use]
    pub fn is_subset_of(&self, other: &Self) -> bool {
        for (uuid, intervals) in &self.0 {
            let Some(other_intervals) = other.0.get(uuid) else {
                if !intervals.is_empty() {
                    return false;
                }
                continue;
            };
            for interval in intervals {
                if !other_intervals
                    .iter()
                    .any(|candidate| interval.contained_in(*candidate))
                {
                    return false;
                }
            }
        }
        true
    }

    /// Compare two GTID sets. `compare(empty, empty) == Equal`.
    #[must_use]
    pub fn compare(&self, other: &Self) -> GtidComparison {
        let a_le_b = self.is_subset_of(other);
        let b_le_a = other.is_subset_of(self);
        match (a_le_b, b_le_a) {
            (true, true) => GtidComparison::Equal,
            (true, false) => GtidComparison::ALessThanB,
            (false, true) => GtidComparison::AGreaterThanB,
            (false, false) => GtidComparison::Inconsistent,
        }
    }
}

impl fmt::Display for GtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (uuid, intervals) in &self.0 {
            if !first {
                write!(f, ",")?;
            }
            first = false;
            write!(f, "{uuid}")?;
            for interval in intervals {
                if interval.start == interval.end {
                    write!(f, ":{}", interval.start)?;
                } else {
                    write!(f, ":{}-{}", interval.start, interval.end)?;
                }
            }
        }
        Ok(())
    }
}

fn parse_interval(raw: &str) -> Result<Interval> {
    if let Some((start, end)) = raw.split_once('-') {
        let start: u64 = start.parse().map_err(|_| ControllerError::GtidInconsistent)?;
        let end: u64 = end.parse().map_err(|_| ControllerError::GtidInconsistent)?;
        Ok(Interval::new(start, end))
    } else {
        let value: u64 = raw.parse().map_err(|_| ControllerError::GtidInconsistent)?;
        Ok(Interval::new(value, value))
    }
}

/// Reduce per-instance primary status over `compare`, returning the index
/// of the most-advanced instance. Ties resolve to the lowest index. Any
/// `Inconsistent` comparison, or any instance missing primary status,
/// fails with the literal message `cannot compare retrieved/executed
/// GTIDs`.
pub fn latest<'a, I>(executed_gtid_sets: I) -> Result<usize>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut best: Option<(usize, GtidSet)> = None;

    for (index, raw) in executed_gtid_sets.into_iter().enumerate() {
        let raw = raw.ok_or(ControllerError::GtidInconsistent)?;
        let candidate = GtidSet::parse(raw)?;

        best = Some(match best {
            None => (index, candidate),
            Some((best_index, best_set)) => match best_set.compare(&candidate) {
                GtidComparison::Equal | GtidComparison::AGreaterThanB => (best_index, best_set),
                GtidComparison::ALessThanB => (index, candidate),
                GtidComparison::Inconsistent => return Err(ControllerError::GtidInconsistent),
            },
        });
    }

    best.map(|(index, _)| index)
        .ok_or(ControllerError::GtidInconsistent)
}
