//! Durable checkpoint rows: processed ranges and outstanding failed events.
//!
//! These are the two independent durability tracks of the pipeline. A
//! processed range asserts "every position in here was attempted"; a failed
//! event record asserts "this one position must be retried". A successful
//! retry clears only the record, never the covering range.

use serde::{Deserialize, Serialize};

use crate::blob::Location;
use crate::error::ErrorCode;

/// RFC 3339 timestamp carried as a string. Thin wrapper providing type
/// clarity without requiring a datetime library dependency.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
    #[must_use]
    pub fn new(ts: impl Into<String>) -> Self {
        Self(ts.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A closed-open interval of positions fully attempted for one location.
///
/// Positions in `[start_position, end_position)` were each either delivered
/// or recorded as a failed event. Ranges for one location never overlap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedRange {
    pub location: Location,
    pub start_position: i64,
    pub end_position: i64,
}

impl ProcessedRange {
    #[must_use]
    pub fn new(location: impl Into<Location>, start_position: i64, end_position: i64) -> Self {
        Self {
            location: location.into(),
            start_position,
            end_position,
        }
    }

    #[must_use]
    pub fn contains(&self, position: i64) -> bool {
        position >= self.start_position && position < self.end_position
    }

    /// Collapses contiguous or overlapping ranges of the same location.
    ///
    /// Output is sorted by `(location, start_position)`. Gaps are preserved:
    /// `[100,102)` and `[103,110)` stay separate.
    #[must_use]
    pub fn merge(mut ranges: Vec<Self>) -> Vec<Self> {
        ranges.sort_by(|a, b| {
            (&a.location, a.start_position).cmp(&(&b.location, b.start_position))
        });

        let mut merged: Vec<Self> = Vec::new();
        for range in ranges {
            match merged.last_mut() {
                Some(prev)
                    if prev.location == range.location
                        && range.start_position <= prev.end_position =>
                {
                    prev.end_position = prev.end_position.max(range.end_position);
                }
                _ => merged.push(range),
            }
        }
        merged
    }
}

/// One record awaiting retry, keyed by `(location, absolute_position)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEventRecord {
    pub location: Location,
    pub absolute_position: i64,
    pub payload: serde_json::Value,
    pub error_code: ErrorCode,
    pub failed_at: Timestamp,
}

/// Row counts removed by one retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneStats {
    pub ranges_removed: u64,
    pub failures_removed: u64,
}

impl PruneStats {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.ranges_removed + self.failures_removed
    }
}
