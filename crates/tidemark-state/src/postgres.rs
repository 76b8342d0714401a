//! Postgres checkpoint store backend.
//!
//! Same row model and timestamp format as the SQLite backend so either can
//! back the same pipeline. Same-location writer serialization additionally
//! takes a transaction-scoped advisory lock, since concurrent runs against
//! Postgres come from separate processes.

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use ::postgres::{Client, NoTls};

use tidemark_types::blob::{Blob, BlobOrigin, Location};
use tidemark_types::checkpoint::{FailedEventRecord, ProcessedRange, PruneStats, Timestamp};
use tidemark_types::error::ErrorCode;
use tidemark_types::run::{RunId, RunRecord, RunStats, RunStatus};

use crate::error::{Result, StateError};
use crate::store::CheckpointStore;

const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS processed_ranges (
    id BIGSERIAL PRIMARY KEY,
    location TEXT NOT NULL,
    start_position BIGINT NOT NULL,
    end_position BIGINT NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_processed_ranges_location
    ON processed_ranges (location, start_position);

CREATE TABLE IF NOT EXISTS failed_events (
    location TEXT NOT NULL,
    absolute_position BIGINT NOT NULL,
    payload TEXT NOT NULL,
    error_code BIGINT NOT NULL,
    failed_at TEXT NOT NULL,
    PRIMARY KEY (location, absolute_position)
);

CREATE INDEX IF NOT EXISTS idx_failed_events_failed_at
    ON failed_events (failed_at);

CREATE TABLE IF NOT EXISTS runs (
    id BIGSERIAL PRIMARY KEY,
    run_id TEXT NOT NULL,
    mode TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    blobs_processed BIGINT NOT NULL DEFAULT 0,
    events_delivered BIGINT NOT NULL DEFAULT 0,
    events_failed BIGINT NOT NULL DEFAULT 0,
    error_message TEXT
);
";

/// Postgres-backed [`CheckpointStore`].
pub struct PostgresCheckpointStore {
    client: Mutex<Client>,
}

impl PostgresCheckpointStore {
    /// Connects and creates the schema if it does not exist.
    ///
    /// # Errors
    /// Returns an error if the connection or schema creation fails.
    pub fn open(connstr: &str) -> Result<Self> {
        let mut client = Client::connect(connstr, NoTls).map_err(StateError::backend)?;
        client
            .batch_execute(CREATE_TABLES)
            .map_err(|e| StateError::backend_context("open: create tables", e))?;
        Ok(Self {
            client: Mutex::new(client),
        })
    }

    fn lock_client(&self) -> Result<MutexGuard<'_, Client>> {
        self.client.lock().map_err(|_| StateError::LockPoisoned)
    }
}

fn now_stamp() -> String {
    Utc::now().format(DATETIME_FMT).to_string()
}

fn stamp_to_iso8601(ts: &str) -> String {
    chrono::NaiveDateTime::parse_from_str(ts, DATETIME_FMT).map_or_else(
        |_| ts.to_string(),
        |dt| format!("{}Z", dt.format("%Y-%m-%dT%H:%M:%S")),
    )
}

impl CheckpointStore for PostgresCheckpointStore {
    fn excluded_ranges(&self, location: &Location) -> Result<Vec<ProcessedRange>> {
        let mut client = self.lock_client()?;
        let rows = client
            .query(
                "SELECT location, start_position, end_position
                 FROM processed_ranges
                 WHERE location = $1
                 ORDER BY start_position",
                &[&location.as_str()],
            )
            .map_err(StateError::backend)?;

        let ranges = rows
            .iter()
            .map(|row| {
                ProcessedRange::new(
                    row.get::<_, String>(0),
                    row.get::<_, i64>(1),
                    row.get::<_, i64>(2),
                )
            })
            .collect();
        Ok(ProcessedRange::merge(ranges))
    }

    fn record_outcome(&self, blob: &Blob) -> Result<()> {
        if blob.num_rows() == 0 {
            return Ok(());
        }

        let mut client = self.lock_client()?;
        let mut tx = client
            .transaction()
            .map_err(|e| StateError::backend_context("record_outcome: begin tx", e))?;
        let now = now_stamp();

        // Per-location writer serialization across processes; released at
        // commit or rollback.
        tx.execute(
            "SELECT pg_advisory_xact_lock(hashtext($1))",
            &[&blob.location().as_str()],
        )
        .map_err(|e| StateError::backend_context("record_outcome: advisory lock", e))?;

        match blob.origin() {
            BlobOrigin::Source => {
                let inserted = tx
                    .execute(
                        "INSERT INTO processed_ranges
                             (location, start_position, end_position, recorded_at)
                         SELECT $1, $2, $3, $4
                         WHERE NOT EXISTS (
                             SELECT 1 FROM processed_ranges
                             WHERE location = $1
                               AND start_position < $3
                               AND end_position > $2
                         )",
                        &[
                            &blob.location().as_str(),
                            &blob.position(),
                            &blob.end_position(),
                            &now,
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

                for failed in blob.failed_events() {
                    let payload = serde_json::to_string(&failed.payload).map_err(|e| {
                        StateError::backend_context("record_outcome: serialize payload", e)
                    })?;
                    tx.execute(
                        "INSERT INTO failed_events
                             (location, absolute_position, payload, error_code, failed_at)
                         VALUES ($1, $2, $3, $4, $5)
                         ON CONFLICT (location, absolute_position) DO UPDATE SET
                             payload = EXCLUDED.payload,
                             error_code = EXCLUDED.error_code,
                             failed_at = EXCLUDED.failed_at",
                        &[
                            &blob.location().as_str(),
                            &failed.absolute_position,
                            &payload,
                            &failed.error_code.as_i64(),
                            &now,
                        ],
                    )
                    .map_err(|e| {
                        StateError::backend_context("record_outcome: insert failure", e)
                    })?;
                }
            }
            BlobOrigin::Retry => {
                for position in blob.delivered_positions() {
                    tx.execute(
                        "DELETE FROM failed_events
                         WHERE location = $1 AND absolute_position = $2",
                        &[&blob.location().as_str(), &position],
                    )
                    .map_err(|e| {
                        StateError::backend_context("record_outcome: clear failure", e)
                    })?;
                }
                for failed in blob.failed_events() {
                    tx.execute(
                        "UPDATE failed_events SET failed_at = $1
                         WHERE location = $2 AND absolute_position = $3",
                        &[&now, &blob.location().as_str(), &failed.absolute_position],
                    )
                    .map_err(|e| {
                        StateError::backend_context("record_outcome: refresh failure", e)
                    })?;
                }
            }
        }

        tx.commit()
            .map_err(|e| StateError::backend_context("record_outcome: commit", e))
    }

    fn outstanding_failures(
        &self,
        location: Option<&Location>,
    ) -> Result<Vec<FailedEventRecord>> {
        let mut client = self.lock_client()?;
        let rows = match location {
            Some(loc) => client.query(
                "SELECT location, absolute_position, payload, error_code, failed_at
                 FROM failed_events
                 WHERE location = $1
                 ORDER BY absolute_position",
                &[&loc.as_str()],
            ),
            None => client.query(
                "SELECT location, absolute_position, payload, error_code, failed_at
                 FROM failed_events
                 ORDER BY location, absolute_position",
                &[],
            ),
        }
        .map_err(StateError::backend)?;

        let mut records = Vec::new();
        for row in rows {
            let payload: String = row.get(2);
            let payload = serde_json::from_str(&payload).map_err(|e| {
                StateError::backend_context("outstanding_failures: parse payload", e)
            })?;
            records.push(FailedEventRecord {
                location: Location::new(row.get::<_, String>(0)),
                absolute_position: row.get(1),
                payload,
                error_code: ErrorCode::from_i64(row.get(3)),
                failed_at: Timestamp::new(stamp_to_iso8601(&row.get::<_, String>(4))),
            });
        }
        Ok(records)
    }

    fn prune(&self, older_than_days: i64) -> Result<PruneStats> {
        let days = older_than_days.max(0);
        let cutoff = (Utc::now() - chrono::Duration::days(days))
            .format(DATETIME_FMT)
            .to_string();

        let mut client = self.lock_client()?;
        let failures_removed = client
            .execute("DELETE FROM failed_events WHERE failed_at < $1", &[&cutoff])
            .map_err(|e| StateError::backend_context("prune: failed_events", e))?;
        let ranges_removed = client
            .execute(
                "DELETE FROM processed_ranges WHERE recorded_at < $1",
                &[&cutoff],
            )
            .map_err(|e| StateError::backend_context("prune: processed_ranges", e))?;

        Ok(PruneStats {
            ranges_removed,
            failures_removed,
        })
    }

    fn start_run(&self, run_id: &RunId, mode: &str) -> Result<i64> {
        let mut client = self.lock_client()?;
        let row = client
            .query_one(
                "INSERT INTO runs (run_id, mode, status, started_at)
                 VALUES ($1, $2, $3, $4)
                 RETURNING id",
                &[
                    &run_id.as_str(),
                    &mode,
                    &RunStatus::Running.as_str(),
                    &now_stamp(),
                ],
            )
            .map_err(|e| StateError::backend_context("start_run", e))?;
        Ok(row.get(0))
    }

    fn complete_run(&self, attempt: i64, status: RunStatus, stats: &RunStats) -> Result<()> {
        let mut client = self.lock_client()?;
        client
            .execute(
                "UPDATE runs SET
                     status = $1,
                     finished_at = $2,
                     blobs_processed = $3,
                     events_delivered = $4,
                     events_failed = $5,
                     error_message = $6
                 WHERE id = $7",
                &[
                    &status.as_str(),
                    &now_stamp(),
                    &i64::try_from(stats.blobs_processed).unwrap_or(i64::MAX),
                    &i64::try_from(stats.events_delivered).unwrap_or(i64::MAX),
                    &i64::try_from(stats.events_failed).unwrap_or(i64::MAX),
                    &stats.error_message,
                    &attempt,
                ],
            )
            .map_err(|e| StateError::backend_context("complete_run", e))?;
        Ok(())
    }

    fn recent_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let mut client = self.lock_client()?;
        let rows = client
            .query(
                "SELECT id, run_id, mode, status, started_at, finished_at,
                        blobs_processed, events_delivered, events_failed, error_message
                 FROM runs
                 ORDER BY id DESC
                 LIMIT $1",
                &[&i64::from(limit)],
            )
            .map_err(StateError::backend)?;

        let mut runs = Vec::new();
        for row in rows {
            let status: String = row.get(3);
            let status = RunStatus::parse(&status)
                .ok_or_else(|| StateError::backend_msg(format!("unknown run status '{status}'")))?;
            runs.push(RunRecord {
                attempt: row.get(0),
                run_id: RunId::new(row.get::<_, String>(1)),
                mode: row.get(2),
                status,
                started_at: Timestamp::new(stamp_to_iso8601(&row.get::<_, String>(4))),
                finished_at: row
                    .get::<_, Option<String>>(5)
                    .map(|ts| Timestamp::new(stamp_to_iso8601(&ts))),
                stats: RunStats {
                    blobs_processed: u64::try_from(row.get::<_, i64>(6)).unwrap_or_default(),
                    events_delivered: u64::try_from(row.get::<_, i64>(7)).unwrap_or_default(),
                    events_failed: u64::try_from(row.get::<_, i64>(8)).unwrap_or_default(),
                    error_message: row.get(9),
                },
            });
        }
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn connect() -> PostgresCheckpointStore {
        let url = std::env::var("TEST_POSTGRES_URL")
            .expect("set TEST_POSTGRES_URL to run postgres tests");
        let store = PostgresCheckpointStore::open(&url).unwrap();
        clean_tables(&store);
        store
    }

    fn clean_tables(store: &PostgresCheckpointStore) {
        let mut client = store.client.lock().unwrap();
        client
            .batch_execute(
                "DELETE FROM processed_ranges; DELETE FROM failed_events; DELETE FROM runs;",
            )
            .unwrap();
    }

    #[test]
    #[ignore = "requires TEST_POSTGRES_URL"]
    fn record_and_replay_cycle() {
        let store = connect();

        let mut blob = Blob::new("pg", vec![json!("a"), json!("b")]).at_position(100);
        blob.mark_failed(1, ErrorCode::AuthDenied);
        store.record_outcome(&blob).unwrap();

        let ranges = store.excluded_ranges(&Location::new("pg")).unwrap();
        assert_eq!(ranges, vec![ProcessedRange::new("pg", 100, 102)]);

        let retry = store.replay_failed().unwrap().remove(0);
        assert_eq!(retry.position(), 101);
        assert_eq!(retry.events(), &[json!("b")]);

        store.record_outcome(&retry).unwrap();
        assert!(store.outstanding_failures(None).unwrap().is_empty());
        assert_eq!(store.excluded_ranges(&Location::new("pg")).unwrap().len(), 1);
    }

    #[test]
    #[ignore = "requires TEST_POSTGRES_URL"]
    fn overlap_is_rejected() {
        let store = connect();
        store
            .record_outcome(&Blob::new("pg", vec![json!(1), json!(2)]).at_position(0))
            .unwrap();

        let err = store
            .record_outcome(&Blob::new("pg", vec![json!(3)]).at_position(1))
            .unwrap_err();
        assert!(matches!(err, StateError::RangeConflict { .. }));
    }

    #[test]
    #[ignore = "requires TEST_POSTGRES_URL"]
    fn run_lifecycle() {
        let store = connect();
        let attempt = store.start_run(&RunId::new("pg-run"), "normal").unwrap();
        store
            .complete_run(attempt, RunStatus::Completed, &RunStats::default())
            .unwrap();

        let runs = store.recent_runs(1).unwrap();
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert_eq!(runs[0].run_id.as_str(), "pg-run");
    }
}
