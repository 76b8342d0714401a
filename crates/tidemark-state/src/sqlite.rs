//! SQLite checkpoint store backend.
//!
//! Embedded storage for single-host deployments. One connection behind a
//! mutex; every multi-row write runs inside a transaction so a failed or
//! cancelled outcome leaves no partial rows. Timestamps are stored in
//! SQLite's `%Y-%m-%d %H:%M:%S` format (UTC) and converted to ISO 8601 on
//! the way out.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection};

use tidemark_types::blob::{Blob, BlobOrigin, Location};
use tidemark_types::checkpoint::{FailedEventRecord, ProcessedRange, PruneStats, Timestamp};
use tidemark_types::error::ErrorCode;
use tidemark_types::run::{RunId, RunRecord, RunStats, RunStatus};

use crate::error::{Result, StateError};
use crate::store::CheckpointStore;

const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS processed_ranges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    location TEXT NOT NULL,
    start_position INTEGER NOT NULL,
    end_position INTEGER NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_processed_ranges_location
    ON processed_ranges (location, start_position);

CREATE TABLE IF NOT EXISTS failed_events (
    location TEXT NOT NULL,
    absolute_position INTEGER NOT NULL,
    payload TEXT NOT NULL,
    error_code INTEGER NOT NULL,
    failed_at TEXT NOT NULL,
    PRIMARY KEY (location, absolute_position)
);

CREATE INDEX IF NOT EXISTS idx_failed_events_failed_at
    ON failed_events (failed_at);

CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    mode TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    blobs_processed INTEGER NOT NULL DEFAULT 0,
    events_delivered INTEGER NOT NULL DEFAULT 0,
    events_failed INTEGER NOT NULL DEFAULT 0,
    error_message TEXT
);
";

/// SQLite-backed [`CheckpointStore`].
pub struct SqliteCheckpointStore {
    conn: Mutex<Connection>,
}

impl SqliteCheckpointStore {
    /// Opens (or creates) the database at `path`, creating parent
    /// directories as needed.
    ///
    /// # Errors
    /// Returns an error if the directory or database cannot be created.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(StateError::backend)?;
        conn.execute_batch(CREATE_TABLES)
            .map_err(|e| StateError::backend_context("open: create tables", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens a transient in-memory database. Used by tests and demos.
    ///
    /// # Errors
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StateError::backend)?;
        conn.execute_batch(CREATE_TABLES)
            .map_err(|e| StateError::backend_context("in_memory: create tables", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }
}

fn now_sqlite() -> String {
    Utc::now().format(SQLITE_DATETIME_FMT).to_string()
}

/// Converts a stored `%Y-%m-%d %H:%M:%S` timestamp to ISO 8601 UTC.
/// Unparseable input passes through unchanged.
fn sqlite_to_iso8601(ts: &str) -> String {
    NaiveDateTime::parse_from_str(ts, SQLITE_DATETIME_FMT).map_or_else(
        |_| ts.to_string(),
        |dt| format!("{}Z", dt.format("%Y-%m-%dT%H:%M:%S")),
    )
}

fn query_failures(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<FailedEventRecord>> {
    let mut stmt = conn.prepare(sql).map_err(StateError::backend)?;
    let mapped = stmt
        .query_map(params, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })
        .map_err(StateError::backend)?;

    let mut records = Vec::new();
    for row in mapped {
        let (location, position, payload, code, failed_at) = row.map_err(StateError::backend)?;
        let payload = serde_json::from_str(&payload)
            .map_err(|e| StateError::backend_context("outstanding_failures: parse payload", e))?;
        records.push(FailedEventRecord {
            location: Location::new(location),
            absolute_position: position,
            payload,
            error_code: ErrorCode::from_i64(code),
            failed_at: Timestamp::new(sqlite_to_iso8601(&failed_at)),
        });
    }
    Ok(records)
}

impl CheckpointStore for SqliteCheckpointStore {
    fn excluded_ranges(&self, location: &Location) -> Result<Vec<ProcessedRange>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT location, start_position, end_position
                 FROM processed_ranges
                 WHERE location = ?1
                 ORDER BY start_position",
            )
            .map_err(StateError::backend)?;
        let mapped = stmt
            .query_map(params![location.as_str()], |row| {
                Ok(ProcessedRange::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(StateError::backend)?;

        let mut ranges = Vec::new();
        for row in mapped {
            ranges.push(row.map_err(StateError::backend)?);
        }
        Ok(ProcessedRange::merge(ranges))
    }

    fn record_outcome(&self, blob: &Blob) -> Result<()> {
        if blob.num_rows() == 0 {
            return Ok(());
        }

        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StateError::backend_context("record_outcome: begin tx", e))?;
        let now = now_sqlite();

        match blob.origin() {
            BlobOrigin::Source => {
                // Conditional insert doubles as the same-location write
                // serializer: overlap with any existing range means another
                // writer got there first.
                let inserted = tx
                    .execute(
                        "INSERT INTO processed_ranges
                             (location, start_position, end_position, recorded_at)
                         SELECT ?1, ?2, ?3, ?4
                         WHERE NOT EXISTS (
                             SELECT 1 FROM processed_ranges
                             WHERE location = ?1
                               AND start_position < ?3
                               AND end_position > ?2
                         )",
                        params![
                            blob.location().as_str(),
                            blob.position(),
                            blob.end_position(),
                            now
                        ],
                    )
                    .map_err(|e| StateError::backend_context("record_outcome: insert range", e))?;
                if inserted == 0 {
                    return Err(StateError::RangeConflict {
                        location: blob.location().to_string(),
                        start: blob.position(),
                        end: blob.end_position(),
                    });
                }

                let mut stmt = tx
                    .prepare(
                        "INSERT INTO failed_events
                             (location, absolute_position, payload, error_code, failed_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)
                         ON CONFLICT (location, absolute_position) DO UPDATE SET
                             payload = excluded.payload,
                             error_code = excluded.error_code,
                             failed_at = excluded.failed_at",
                    )
                    .map_err(|e| StateError::backend_context("record_outcome: prepare", e))?;
                for failed in blob.failed_events() {
                    let payload = serde_json::to_string(&failed.payload).map_err(|e| {
                        StateError::backend_context("record_outcome: serialize payload", e)
                    })?;
                    stmt.execute(params![
                        blob.location().as_str(),
                        failed.absolute_position,
                        payload,
                        failed.error_code.as_i64(),
                        now
                    ])
                    .map_err(|e| {
                        StateError::backend_context("record_outcome: insert failure", e)
                    })?;
                }
                drop(stmt);
            }
            BlobOrigin::Retry => {
                // The covering range already exists; only the per-record
                // track changes. Cleared records go away, re-failures keep
                // their original payload and code with a fresh timestamp.
                let mut delete = tx
                    .prepare(
                        "DELETE FROM failed_events
                         WHERE location = ?1 AND absolute_position = ?2",
                    )
                    .map_err(|e| StateError::backend_context("record_outcome: prepare", e))?;
                for position in blob.delivered_positions() {
                    delete
                        .execute(params![blob.location().as_str(), position])
                        .map_err(|e| {
                            StateError::backend_context("record_outcome: clear failure", e)
                        })?;
                }
                drop(delete);

                let mut refresh = tx
                    .prepare(
                        "UPDATE failed_events SET failed_at = ?1
                         WHERE location = ?2 AND absolute_position = ?3",
                    )
                    .map_err(|e| StateError::backend_context("record_outcome: prepare", e))?;
                for failed in blob.failed_events() {
                    refresh
                        .execute(params![
                            now,
                            blob.location().as_str(),
                            failed.absolute_position
                        ])
                        .map_err(|e| {
                            StateError::backend_context("record_outcome: refresh failure", e)
                        })?;
                }
                drop(refresh);
            }
        }

        tx.commit()
            .map_err(|e| StateError::backend_context("record_outcome: commit", e))
    }

    fn outstanding_failures(
        &self,
        location: Option<&Location>,
    ) -> Result<Vec<FailedEventRecord>> {
        let conn = self.lock_conn()?;
        match location {
            Some(loc) => query_failures(
                &conn,
                "SELECT location, absolute_position, payload, error_code, failed_at
                 FROM failed_events
                 WHERE location = ?1
                 ORDER BY absolute_position",
                params![loc.as_str()],
            ),
            None => query_failures(
                &conn,
                "SELECT location, absolute_position, payload, error_code, failed_at
                 FROM failed_events
                 ORDER BY location, absolute_position",
                params![],
            ),
        }
    }

    fn prune(&self, older_than_days: i64) -> Result<PruneStats> {
        let days = older_than_days.max(0);
        let cutoff = (Utc::now() - chrono::Duration::days(days))
            .format(SQLITE_DATETIME_FMT)
            .to_string();

        let conn = self.lock_conn()?;
        let failures_removed = conn
            .execute(
                "DELETE FROM failed_events WHERE failed_at < ?1",
                params![cutoff],
            )
            .map_err(|e| StateError::backend_context("prune: failed_events", e))?;
        let ranges_removed = conn
            .execute(
                "DELETE FROM processed_ranges WHERE recorded_at < ?1",
                params![cutoff],
            )
            .map_err(|e| StateError::backend_context("prune: processed_ranges", e))?;

        Ok(PruneStats {
            ranges_removed: ranges_removed as u64,
            failures_removed: failures_removed as u64,
        })
    }

    fn start_run(&self, run_id: &RunId, mode: &str) -> Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO runs (run_id, mode, status, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                run_id.as_str(),
                mode,
                RunStatus::Running.as_str(),
                now_sqlite()
            ],
        )
        .map_err(|e| StateError::backend_context("start_run", e))?;
        Ok(conn.last_insert_rowid())
    }

    fn complete_run(&self, attempt: i64, status: RunStatus, stats: &RunStats) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE runs SET
                 status = ?1,
                 finished_at = ?2,
                 blobs_processed = ?3,
                 events_delivered = ?4,
                 events_failed = ?5,
                 error_message = ?6
             WHERE id = ?7",
            params![
                status.as_str(),
                now_sqlite(),
                i64::try_from(stats.blobs_processed).unwrap_or(i64::MAX),
                i64::try_from(stats.events_delivered).unwrap_or(i64::MAX),
                i64::try_from(stats.events_failed).unwrap_or(i64::MAX),
                stats.error_message,
                attempt
            ],
        )
        .map_err(|e| StateError::backend_context("complete_run", e))?;
        Ok(())
    }

    fn recent_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, run_id, mode, status, started_at, finished_at,
                        blobs_processed, events_delivered, events_failed, error_message
                 FROM runs
                 ORDER BY id DESC
                 LIMIT ?1",
            )
            .map_err(StateError::backend)?;
        let mapped = stmt
            .query_map(params![i64::from(limit)], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, i64>(8)?,
                    row.get::<_, Option<String>>(9)?,
                ))
            })
            .map_err(StateError::backend)?;

        let mut runs = Vec::new();
        for row in mapped {
            let (
                id,
                run_id,
                mode,
                status,
                started_at,
                finished_at,
                blobs,
                delivered,
                failed,
                error_message,
            ) = row.map_err(StateError::backend)?;
            let status = RunStatus::parse(&status)
                .ok_or_else(|| StateError::backend_msg(format!("unknown run status '{status}'")))?;
            runs.push(RunRecord {
                attempt: id,
                run_id: RunId::new(run_id),
                mode,
                status,
                started_at: Timestamp::new(sqlite_to_iso8601(&started_at)),
                finished_at: finished_at.map(|ts| Timestamp::new(sqlite_to_iso8601(&ts))),
                stats: RunStats {
                    blobs_processed: u64::try_from(blobs).unwrap_or_default(),
                    events_delivered: u64::try_from(delivered).unwrap_or_default(),
                    events_failed: u64::try_from(failed).unwrap_or_default(),
                    error_message,
                },
            });
        }
        Ok(runs)
    }
}

#[cfg(test)]
impl SqliteCheckpointStore {
    fn count_ranges(&self) -> i64 {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM processed_ranges", [], |row| row.get(0))
            .unwrap()
    }

    fn count_failures(&self) -> i64 {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM failed_events", [], |row| row.get(0))
            .unwrap()
    }

    fn failure_row(&self, location: &str, position: i64) -> (String, i64, String) {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT payload, error_code, failed_at FROM failed_events
             WHERE location = ?1 AND absolute_position = ?2",
            params![location, position],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap()
    }

    fn set_failure_timestamp(&self, location: &str, position: i64, ts: &str) {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE failed_events SET failed_at = ?1
             WHERE location = ?2 AND absolute_position = ?3",
            params![ts, location, position],
        )
        .unwrap();
    }

    fn set_range_timestamps(&self, ts: &str) {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE processed_ranges SET recorded_at = ?1", params![ts])
            .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn loc() -> Location {
        Location::new("L")
    }

    fn days_ago(days: i64) -> String {
        (Utc::now() - chrono::Duration::days(days))
            .format(SQLITE_DATETIME_FMT)
            .to_string()
    }

    /// Two events at positions 100/101, second one failed with code 5.
    fn partially_failed_blob() -> Blob {
        let mut blob = Blob::new("L", vec![json!({"id": "A"}), json!({"id": "B"})])
            .at_position(100);
        blob.mark_failed(1, ErrorCode::AuthDenied);
        blob
    }

    #[test]
    fn record_outcome_writes_range_and_failure() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.record_outcome(&partially_failed_blob()).unwrap();

        let ranges = store.excluded_ranges(&loc()).unwrap();
        assert_eq!(ranges, vec![ProcessedRange::new("L", 100, 102)]);

        let failures = store.outstanding_failures(Some(&loc())).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].absolute_position, 101);
        assert_eq!(failures[0].payload, json!({"id": "B"}));
        assert_eq!(failures[0].error_code, ErrorCode::AuthDenied);
    }

    #[test]
    fn excluded_ranges_merges_contiguous_blobs() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store
            .record_outcome(&Blob::new("L", vec![json!(1), json!(2)]).at_position(100))
            .unwrap();
        store
            .record_outcome(&Blob::new("L", vec![json!(3)]).at_position(102))
            .unwrap();
        store
            .record_outcome(&Blob::new("L", vec![json!(9)]).at_position(200))
            .unwrap();

        let ranges = store.excluded_ranges(&loc()).unwrap();
        assert_eq!(
            ranges,
            vec![
                ProcessedRange::new("L", 100, 103),
                ProcessedRange::new("L", 200, 201),
            ]
        );
    }

    #[test]
    fn excluded_ranges_are_per_location() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store
            .record_outcome(&Blob::new("L", vec![json!(1)]).at_position(0))
            .unwrap();
        store
            .record_outcome(&Blob::new("M", vec![json!(1)]).at_position(0))
            .unwrap();

        assert_eq!(store.excluded_ranges(&loc()).unwrap().len(), 1);
        assert_eq!(
            store
                .excluded_ranges(&Location::new("missing"))
                .unwrap()
                .len(),
            0
        );
    }

    #[test]
    fn overlapping_range_write_is_a_conflict_and_rolls_back() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.record_outcome(&partially_failed_blob()).unwrap();

        // Overlaps [100,102) and carries its own failure entry; neither the
        // range nor the failure may survive the rollback.
        let mut overlapping =
            Blob::new("L", vec![json!("x"), json!("y")]).at_position(101);
        overlapping.mark_failed(0, ErrorCode::Timeout);

        let err = store.record_outcome(&overlapping).unwrap_err();
        assert!(matches!(err, StateError::RangeConflict { .. }));
        assert!(err.to_string().contains("[101, 103)"));

        assert_eq!(store.count_ranges(), 1);
        assert_eq!(store.count_failures(), 1);
        let (_, code, _) = store.failure_row("L", 101);
        assert_eq!(code, ErrorCode::AuthDenied.as_i64());
    }

    #[test]
    fn empty_blob_is_a_noop() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.record_outcome(&Blob::new("L", vec![])).unwrap();
        assert_eq!(store.count_ranges(), 0);
    }

    #[test]
    fn replay_reconstructs_only_failed_records() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.record_outcome(&partially_failed_blob()).unwrap();

        let blobs = store.replay_failed().unwrap();
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].location().as_str(), "L");
        assert_eq!(blobs[0].position(), 101);
        assert_eq!(blobs[0].events(), &[json!({"id": "B"})]);
        assert_eq!(blobs[0].origin(), BlobOrigin::Retry);
    }

    #[test]
    fn replay_splits_non_contiguous_failures() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.record_outcome(&partially_failed_blob()).unwrap();

        let mut second = Blob::new("L", vec![json!("c"), json!("d")]).at_position(102);
        second.mark_failed(1, ErrorCode::Timeout);
        store.record_outcome(&second).unwrap();

        // Failures sit at 101 and 103; the gap at 102 forces two blobs.
        let blobs = store.replay_failed().unwrap();
        assert_eq!(blobs.len(), 2);
        assert_eq!(blobs[0].position(), 101);
        assert_eq!(blobs[1].position(), 103);
    }

    #[test]
    fn retry_success_clears_only_the_record() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.record_outcome(&partially_failed_blob()).unwrap();

        let retry = store.replay_failed().unwrap().remove(0);
        // No failure marks: the retry delivered everything.
        store.record_outcome(&retry).unwrap();

        assert!(store.outstanding_failures(None).unwrap().is_empty());
        // The coarse range must survive the record-level resolution.
        assert_eq!(
            store.excluded_ranges(&loc()).unwrap(),
            vec![ProcessedRange::new("L", 100, 102)]
        );
    }

    #[test]
    fn retry_failure_refreshes_timestamp_and_keeps_content() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.record_outcome(&partially_failed_blob()).unwrap();
        store.set_failure_timestamp("L", 101, "2020-01-01 00:00:00");

        let mut retry = store.replay_failed().unwrap().remove(0);
        // Fails again, this time with a different code; the stored row must
        // keep its original code and payload.
        retry.mark_failed(0, ErrorCode::TransientNetwork);
        store.record_outcome(&retry).unwrap();

        let failures = store.outstanding_failures(None).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error_code, ErrorCode::AuthDenied);
        assert_eq!(failures[0].payload, json!({"id": "B"}));

        let (_, _, failed_at) = store.failure_row("L", 101);
        assert_ne!(failed_at, "2020-01-01 00:00:00");
    }

    #[test]
    fn retry_outcome_never_writes_a_range() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.record_outcome(&partially_failed_blob()).unwrap();
        assert_eq!(store.count_ranges(), 1);

        let retry = store.replay_failed().unwrap().remove(0);
        store.record_outcome(&retry).unwrap();
        assert_eq!(store.count_ranges(), 1);
    }

    #[test]
    fn prune_respects_retention_boundary() {
        let store = SqliteCheckpointStore::in_memory().unwrap();

        let mut blob = Blob::new("L", vec![json!("a"), json!("b")]).at_position(0);
        blob.mark_failed(0, ErrorCode::Timeout);
        blob.mark_failed(1, ErrorCode::Timeout);
        store.record_outcome(&blob).unwrap();

        store.set_failure_timestamp("L", 0, &days_ago(51));
        store.set_failure_timestamp("L", 1, &days_ago(49));

        let stats = store.prune(50).unwrap();
        assert_eq!(stats.failures_removed, 1);
        assert_eq!(stats.ranges_removed, 0);

        let remaining = store.outstanding_failures(None).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].absolute_position, 1);
    }

    #[test]
    fn prune_removes_old_ranges() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store
            .record_outcome(&Blob::new("L", vec![json!(1)]).at_position(0))
            .unwrap();
        store.set_range_timestamps(&days_ago(60));

        let stats = store.prune(50).unwrap();
        assert_eq!(stats.ranges_removed, 1);
        assert_eq!(stats.total(), 1);
        assert!(store.excluded_ranges(&loc()).unwrap().is_empty());
    }

    #[test]
    fn run_lifecycle_round_trips() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        let attempt = store
            .start_run(&RunId::new("nightly"), "retry+normal")
            .unwrap();

        let running = store.recent_runs(10).unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].status, RunStatus::Running);
        assert!(running[0].finished_at.is_none());
        assert!(running[0].started_at.as_str().ends_with('Z'));

        let stats = RunStats {
            blobs_processed: 3,
            events_delivered: 10,
            events_failed: 2,
            error_message: None,
        };
        store
            .complete_run(attempt, RunStatus::Completed, &stats)
            .unwrap();

        let done = store.recent_runs(10).unwrap();
        assert_eq!(done[0].status, RunStatus::Completed);
        assert_eq!(done[0].stats, stats);
        assert_eq!(done[0].mode, "retry+normal");
        assert!(done[0].finished_at.is_some());
    }

    #[test]
    fn recent_runs_newest_first_with_limit() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        for name in ["a", "b", "c"] {
            store.start_run(&RunId::new(name), "normal").unwrap();
        }

        let runs = store.recent_runs(2).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id.as_str(), "c");
        assert_eq!(runs[1].run_id.as_str(), "b");
    }

    #[test]
    fn open_creates_parent_directories_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state/checkpoints.db");

        {
            let store = SqliteCheckpointStore::open(&path).unwrap();
            store.record_outcome(&partially_failed_blob()).unwrap();
        }

        let reopened = SqliteCheckpointStore::open(&path).unwrap();
        assert_eq!(reopened.excluded_ranges(&loc()).unwrap().len(), 1);
        assert_eq!(reopened.outstanding_failures(None).unwrap().len(), 1);
    }

    #[test]
    fn timestamps_convert_to_iso8601_on_read() {
        assert_eq!(
            sqlite_to_iso8601("2026-08-25 12:30:00"),
            "2026-08-25T12:30:00Z"
        );
        assert_eq!(sqlite_to_iso8601("not a timestamp"), "not a timestamp");
    }
}
