//! The unit of work moved through the pipeline.
//!
//! A [`Blob`] is an ordered batch of records read from one position of one
//! source location. The sink annotates it with per-record failures; the
//! checkpoint store persists its coverage and its failures. Events are opaque
//! JSON values: the pipeline never inspects payload structure, only position.

use serde::{Deserialize, Serialize};

use crate::checkpoint::FailedEventRecord;
use crate::error::ErrorCode;

/// Identifier of a source partition (table, file, bucket prefix) whose
/// position space is tracked independently of every other location.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(String);

impl Location {
    #[must_use]
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for Location {
    fn from(s: S) -> Self {
        Self::new(s)
    }
}

/// Where a blob came from. Drives how the checkpoint store records its
/// outcome: source blobs write a new processed range, retry blobs only
/// resolve previously failed records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobOrigin {
    Source,
    Retry,
}

/// One record that could not be delivered, keyed by its absolute position
/// within the location's stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEvent {
    pub absolute_position: i64,
    pub payload: serde_json::Value,
    pub error_code: ErrorCode,
}

/// An ordered batch of records plus position and failure metadata.
///
/// Events are fixed at construction: nothing may remove or reorder them, so
/// the absolute position of event `i` is always `position + i`. Failure
/// tracking is additive, via [`Blob::mark_failed`] and
/// [`Blob::mark_all_failed`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Blob {
    location: Location,
    position: i64,
    num_rows: i64,
    origin: BlobOrigin,
    events: Vec<serde_json::Value>,
    failed_events: Vec<FailedEvent>,
    reports: Vec<serde_json::Value>,
}

impl Blob {
    /// Creates a source blob starting at position 0.
    #[must_use]
    pub fn new(location: impl Into<Location>, events: Vec<serde_json::Value>) -> Self {
        let num_rows = events.len() as i64;
        Self {
            location: location.into(),
            position: 0,
            num_rows,
            origin: BlobOrigin::Source,
            events,
            failed_events: Vec::new(),
            reports: Vec::new(),
        }
    }

    /// Sets the starting offset of the first record within the location's
    /// stream.
    #[must_use]
    pub fn at_position(mut self, position: i64) -> Self {
        self.position = position;
        self
    }

    /// Reconstructs retry blobs from outstanding failure records.
    ///
    /// Records are grouped by location and split into runs of contiguous
    /// absolute positions, one blob per run, so that `position + index`
    /// remains the absolute position of every replayed event. The records'
    /// original error codes stay behind in the store; replayed blobs start
    /// with an empty failure accumulator.
    #[must_use]
    pub fn from_failures(mut records: Vec<FailedEventRecord>) -> Vec<Self> {
        records.sort_by(|a, b| {
            (&a.location, a.absolute_position).cmp(&(&b.location, b.absolute_position))
        });

        let mut blobs: Vec<Self> = Vec::new();
        for record in records {
            match blobs.last_mut() {
                Some(blob)
                    if blob.location == record.location
                        && blob.position + blob.num_rows == record.absolute_position =>
                {
                    blob.events.push(record.payload);
                    blob.num_rows += 1;
                }
                _ => blobs.push(Self {
                    location: record.location,
                    position: record.absolute_position,
                    num_rows: 1,
                    origin: BlobOrigin::Retry,
                    events: vec![record.payload],
                    failed_events: Vec::new(),
                    reports: Vec::new(),
                }),
            }
        }
        blobs
    }

    #[must_use]
    pub fn location(&self) -> &Location {
        &self.location
    }

    #[must_use]
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Record count fixed at construction. Range accounting uses this even
    /// when some records later fail.
    #[must_use]
    pub fn num_rows(&self) -> i64 {
        self.num_rows
    }

    /// One past the absolute position of the last record.
    #[must_use]
    pub fn end_position(&self) -> i64 {
        self.position + self.num_rows
    }

    #[must_use]
    pub fn origin(&self) -> BlobOrigin {
        self.origin
    }

    #[must_use]
    pub fn events(&self) -> &[serde_json::Value] {
        &self.events
    }

    #[must_use]
    pub fn failed_events(&self) -> &[FailedEvent] {
        &self.failed_events
    }

    #[must_use]
    pub fn reports(&self) -> &[serde_json::Value] {
        &self.reports
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Absolute position of the event at `index` within the location's
    /// stream.
    #[must_use]
    pub fn absolute_position(&self, index: usize) -> i64 {
        self.position + index as i64
    }

    /// Absolute positions of every event without a failure entry, i.e. the
    /// records implicitly treated as delivered.
    #[must_use]
    pub fn delivered_positions(&self) -> Vec<i64> {
        let failed: std::collections::HashSet<i64> = self
            .failed_events
            .iter()
            .map(|f| f.absolute_position)
            .collect();
        (self.position..self.end_position())
            .filter(|pos| !failed.contains(pos))
            .collect()
    }

    /// Marks the event at `index` as failed with the given code. Out-of-range
    /// indexes are ignored and reported as `false`.
    pub fn mark_failed(&mut self, index: usize, error_code: ErrorCode) -> bool {
        let Some(payload) = self.events.get(index) else {
            return false;
        };
        self.failed_events.push(FailedEvent {
            absolute_position: self.absolute_position(index),
            payload: payload.clone(),
            error_code,
        });
        true
    }

    /// Marks every event failed with one systemic code, replacing any
    /// record-level annotations made so far. Used when the sink fails
    /// transport-wide and per-record results cannot be trusted.
    pub fn mark_all_failed(&mut self, error_code: ErrorCode) {
        self.failed_events.clear();
        for index in 0..self.events.len() {
            self.failed_events.push(FailedEvent {
                absolute_position: self.absolute_position(index),
                payload: self.events[index].clone(),
                error_code,
            });
        }
    }

    /// Appends a sink acknowledgment payload.
    pub fn push_report(&mut self, report: serde_json::Value) {
        self.reports.push(report);
    }
}
