//! Retention sweep over the checkpoint store.
//!
//! Removes processed ranges and failed event records older than the
//! retention horizon. The sweep runs before the pipeline phases when
//! `enable_cleanup` is set, and a sweep failure never fails the run.

use std::sync::Arc;

use tidemark_state::CheckpointStore;
use tidemark_types::checkpoint::PruneStats;

/// Remove checkpoint rows older than `days_to_live` days.
///
/// # Errors
///
/// Returns an error if the store cannot delete the expired rows.
pub fn prune_expired(
    store: &dyn CheckpointStore,
    days_to_live: i64,
) -> tidemark_state::Result<PruneStats> {
    let stats = store.prune(days_to_live)?;
    tracing::info!(
        days_to_live,
        ranges_removed = stats.ranges_removed,
        failures_removed = stats.failures_removed,
        "Retention sweep complete"
    );
    Ok(stats)
}

/// Sweep ahead of a run. Failures are logged and swallowed so stale
/// checkpoint rows can never block delivery.
pub(crate) async fn sweep_before_run(
    store: Arc<dyn CheckpointStore>,
    days_to_live: i64,
) -> Option<PruneStats> {
    let result =
        tokio::task::spawn_blocking(move || prune_expired(store.as_ref(), days_to_live)).await;
    match result {
        Ok(Ok(stats)) => Some(stats),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Retention sweep failed; continuing run");
            None
        }
        Err(e) => {
            tracing::error!(error = %e, "Retention sweep task failed; continuing run");
            None
        }
    }
}
