//! The checkpoint store trait implemented by every backend.

use tidemark_types::blob::{Blob, BlobOrigin, Location};
use tidemark_types::checkpoint::{FailedEventRecord, ProcessedRange, PruneStats};
use tidemark_types::run::{RunId, RunRecord, RunStats, RunStatus};

use crate::error::Result;

/// Durable bookkeeping of processed ranges and outstanding failed events.
///
/// Implementations must be safe for concurrent readers and for concurrent
/// writers touching distinct locations; same-location range writes are
/// serialized by an overlap check inside the `record_outcome` transaction
/// (a losing writer gets [`crate::StateError::RangeConflict`]).
pub trait CheckpointStore: Send + Sync {
    /// Union of historically processed ranges for `location`, merged where
    /// contiguous, sorted by start position. Durable across runs.
    ///
    /// # Errors
    /// Returns an error if the backend query fails.
    fn excluded_ranges(&self, location: &Location) -> Result<Vec<ProcessedRange>>;

    /// Records the outcome of one fully sent blob, atomically.
    ///
    /// For a [`BlobOrigin::Source`] blob: inserts the blob's processed range
    /// (rejecting overlap with any existing range for the location) and
    /// upserts one failed-event row per entry in the blob's failure
    /// accumulator. For a [`BlobOrigin::Retry`] blob: writes no range;
    /// deletes the failed-event row for every replayed position that
    /// succeeded this time, and refreshes only the timestamp of rows that
    /// failed again, leaving payload and error code untouched.
    ///
    /// Empty blobs are a no-op.
    ///
    /// # Errors
    /// Returns [`crate::StateError::RangeConflict`] when the range insert
    /// loses against a concurrent writer, or a backend error; either way the
    /// transaction is rolled back and nothing is partially written.
    fn record_outcome(&self, blob: &Blob) -> Result<()>;

    /// All outstanding failed-event rows, optionally filtered to one
    /// location, ordered by `(location, absolute_position)`.
    ///
    /// # Errors
    /// Returns an error if the backend query fails.
    fn outstanding_failures(&self, location: Option<&Location>)
        -> Result<Vec<FailedEventRecord>>;

    /// Reconstructs retry blobs from every outstanding failed event, grouped
    /// by location and split into contiguous position segments.
    ///
    /// # Errors
    /// Returns an error if the backend query fails.
    fn replay_failed(&self) -> Result<Vec<Blob>> {
        Ok(Blob::from_failures(self.outstanding_failures(None)?))
    }

    /// Deletes ranges and failed events older than the retention window.
    /// Purely time-based; safe to run concurrently with delivery.
    ///
    /// # Errors
    /// Returns an error if a delete fails.
    fn prune(&self, older_than_days: i64) -> Result<PruneStats>;

    /// Opens a run-history row and returns its attempt id.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    fn start_run(&self, run_id: &RunId, mode: &str) -> Result<i64>;

    /// Finalizes a run-history row with its terminal status and counters.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    fn complete_run(&self, attempt: i64, status: RunStatus, stats: &RunStats) -> Result<()>;

    /// Most recent run-history rows, newest first.
    ///
    /// # Errors
    /// Returns an error if the backend query fails.
    fn recent_runs(&self, limit: u32) -> Result<Vec<RunRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn CheckpointStore) {}
    }
}
